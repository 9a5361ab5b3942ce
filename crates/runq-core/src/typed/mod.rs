//! Typed - strongly typed callbacks on the edge, erased ones inside.

pub mod callback;

pub use self::callback::{DynCallback, FnCallback, Payload, TaskCallback, TypedCallback};
