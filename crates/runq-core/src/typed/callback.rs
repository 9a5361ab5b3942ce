//! TaskCallback - business logic for one queue, and its type-erased form.
//!
//! Two layers, as with any registry of heterogeneous handlers:
//! - typed surface: [`TaskCallback<T>`] sees only its own payload type
//! - erased core: [`DynCallback`] works on stored JSON payloads, so the
//!   manager can keep every operator in one map without generics

use std::any::type_name;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{RawRequest, TaskError, TaskRequest};

/// A payload that can sit on a queue.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Processes one payload.
///
/// Return values:
/// - `Ok(true)`: done, the request is discarded
/// - `Ok(false)`: not now, put it back without counting a try
/// - `Err(TaskError::Throttled)`: back off and stop draining this queue for the pass
/// - any other `Err`: counted failure, retried with backoff
///
/// # Example
/// ```ignore
/// struct SendEmail;
///
/// #[async_trait]
/// impl TaskCallback<Email> for SendEmail {
///     async fn process(&self, email: &Email) -> Result<bool, TaskError> {
///         mailer::send(email).await.map_err(|e| TaskError::failed(e.to_string()))?;
///         Ok(true)
///     }
/// }
/// ```
#[async_trait]
pub trait TaskCallback<T: Payload>: Send + Sync {
    async fn process(&self, payload: &T) -> Result<bool, TaskError>;

    /// Called after a successful `process` with the full request.
    async fn on_success(&self, _request: &TaskRequest<T>) {}
}

/// Object-safe callback over stored payloads.
#[async_trait]
pub trait DynCallback: Send + Sync {
    async fn process_raw(&self, request: &RawRequest) -> Result<bool, TaskError>;

    async fn on_success_raw(&self, request: &RawRequest);

    /// Check that `value` decodes into the payload type.
    fn validate(&self, value: &serde_json::Value) -> Result<(), serde_json::Error>;

    /// Name of the payload type, for diagnostics.
    fn payload_type(&self) -> &'static str;
}

/// Adapter from a typed callback to [`DynCallback`], built once at registration.
pub struct TypedCallback<T: Payload, C: TaskCallback<T>> {
    callback: C,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Payload, C: TaskCallback<T>> TypedCallback<T, C> {
    pub fn new(callback: C) -> Self {
        Self {
            callback,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Payload, C: TaskCallback<T>> DynCallback for TypedCallback<T, C> {
    async fn process_raw(&self, request: &RawRequest) -> Result<bool, TaskError> {
        let payload: T = serde_json::from_value(request.value.clone())?;
        self.callback.process(&payload).await
    }

    async fn on_success_raw(&self, request: &RawRequest) {
        match request.decode::<T>() {
            Ok(typed) => self.callback.on_success(&typed).await,
            Err(e) => tracing::warn!(
                request_id = %request.id,
                error = %e,
                "Cannot decode request for on_success"
            ),
        }
    }

    fn validate(&self, value: &serde_json::Value) -> Result<(), serde_json::Error> {
        serde_json::from_value::<T>(value.clone()).map(|_| ())
    }

    fn payload_type(&self) -> &'static str {
        type_name::<T>()
    }
}

/// Callback from a plain closure.
///
/// ```ignore
/// let op = TaskOperator::new::<Email, _>("emails", FnCallback::new(|e: &Email| Ok(!e.to.is_empty())));
/// ```
pub struct FnCallback<F> {
    f: F,
}

impl<F> FnCallback<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<T, F> TaskCallback<T> for FnCallback<F>
where
    T: Payload,
    F: Fn(&T) -> Result<bool, TaskError> + Send + Sync,
{
    async fn process(&self, payload: &T) -> Result<bool, TaskError> {
        (self.f)(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Greeting {
        name: String,
    }

    struct Greeter {
        successes: AtomicUsize,
    }

    #[async_trait]
    impl TaskCallback<Greeting> for Greeter {
        async fn process(&self, payload: &Greeting) -> Result<bool, TaskError> {
            Ok(!payload.name.is_empty())
        }

        async fn on_success(&self, request: &TaskRequest<Greeting>) {
            assert!(!request.value.name.is_empty());
            self.successes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn typed_callback_decodes_payload() {
        let cb = TypedCallback::<Greeting, _>::new(Greeter {
            successes: AtomicUsize::new(0),
        });

        let ok = RawRequest::new(json!({ "name": "runq" }));
        assert!(cb.process_raw(&ok).await.unwrap());
        cb.on_success_raw(&ok).await;
        assert_eq!(cb.callback.successes.load(Ordering::SeqCst), 1);

        let skipped = RawRequest::new(json!({ "name": "" }));
        assert!(!cb.process_raw(&skipped).await.unwrap());
    }

    #[tokio::test]
    async fn wrong_payload_is_a_decode_error() {
        let cb = TypedCallback::<Greeting, _>::new(Greeter {
            successes: AtomicUsize::new(0),
        });
        let bad = RawRequest::new(json!({ "nom": 1 }));
        assert!(matches!(
            cb.process_raw(&bad).await,
            Err(TaskError::Decode(_))
        ));
        assert!(cb.validate(&json!({ "nom": 1 })).is_err());
        assert!(cb.validate(&json!({ "name": "x" })).is_ok());
        assert!(cb.payload_type().ends_with("Greeting"));
    }

    #[tokio::test]
    async fn closures_are_callbacks() {
        let cb = TypedCallback::<u32, _>::new(FnCallback::new(|n: &u32| {
            if *n == 0 {
                Err(TaskError::failed("zero"))
            } else {
                Ok(n % 2 == 0)
            }
        }));
        assert!(cb.process_raw(&RawRequest::new(json!(4))).await.unwrap());
        assert!(!cb.process_raw(&RawRequest::new(json!(3))).await.unwrap());
        assert!(cb.process_raw(&RawRequest::new(json!(0))).await.is_err());
    }
}
