//! TaskOperator - one queue bound to its callback and retry policy.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::typed::{DynCallback, Payload, TaskCallback, TypedCallback};

/// Prefix of every dead-letter queue name.
pub const DLQ_PREFIX: &str = "dlq:";

pub const DEFAULT_MAX_TRIES: u32 = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_DELAY_SECS: u64 = 60;
pub const DEFAULT_MAX_DELAY_SECS: u64 = 3600;

/// Binds a queue name to a callback.
///
/// Policy fields are fixed once the operator is registered. Only the
/// counters and the `available` claim flag change afterwards, and only
/// the manager touches them.
///
/// ```ignore
/// let op = TaskOperator::new::<Email, _>("emails", SendEmail)
///     .with_max_tries(5);
/// ```
pub struct TaskOperator {
    name: String,
    dlq: String,
    callback: Arc<dyn DynCallback>,
    payload_type: &'static str,

    max_tries: u32,
    /// Advisory, not enforced.
    timeout: u64,
    delay: u64,
    /// Advisory. Backoff uses the manager-wide ceiling.
    max_delay: u64,

    successes: AtomicU64,
    errors: AtomicU64,
    skips: AtomicU64,
    available: AtomicBool,
}

impl TaskOperator {
    pub fn new<T, C>(name: impl Into<String>, callback: C) -> Self
    where
        T: Payload,
        C: TaskCallback<T> + 'static,
    {
        let callback: Arc<dyn DynCallback> = Arc::new(TypedCallback::<T, C>::new(callback));
        Self::from_dyn(name, callback)
    }

    pub fn from_dyn(name: impl Into<String>, callback: Arc<dyn DynCallback>) -> Self {
        let name = name.into();
        Self {
            dlq: dlq_name(&name),
            name,
            payload_type: callback.payload_type(),
            callback,
            max_tries: DEFAULT_MAX_TRIES,
            timeout: DEFAULT_TIMEOUT_SECS,
            delay: DEFAULT_DELAY_SECS,
            max_delay: DEFAULT_MAX_DELAY_SECS,
            successes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            skips: AtomicU64::new(0),
            available: AtomicBool::new(true),
        }
    }

    pub fn with_max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = max_tries;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = secs;
        self
    }

    pub fn with_delay(mut self, secs: u64) -> Self {
        self.delay = secs;
        self
    }

    pub fn with_max_delay(mut self, secs: u64) -> Self {
        self.max_delay = secs;
        self
    }

    /// `false` keeps the operator visible to stats and admin calls while
    /// the worker loops never drain it.
    pub fn with_available(self, available: bool) -> Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }

    /// Rename for registration under a queue prefix. The DLQ follows.
    pub(crate) fn prefixed(mut self, prefix: &str) -> Self {
        if !prefix.is_empty() {
            self.name = format!("{prefix}{}", self.name);
            self.dlq = dlq_name(&self.name);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dlq(&self) -> &str {
        &self.dlq
    }

    pub fn callback(&self) -> &dyn DynCallback {
        self.callback.as_ref()
    }

    pub fn payload_type(&self) -> &'static str {
        self.payload_type
    }

    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    pub fn timeout(&self) -> u64 {
        self.timeout
    }

    pub fn delay(&self) -> u64 {
        self.delay
    }

    pub fn max_delay(&self) -> u64 {
        self.max_delay
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn skips(&self) -> u64 {
        self.skips.load(Ordering::Relaxed)
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub(crate) fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skip(&self) {
        self.skips.fetch_add(1, Ordering::Relaxed);
    }

    /// Flip `available` from true to false. Only one caller wins.
    pub(crate) fn try_claim(&self) -> bool {
        self.available
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release(&self) {
        self.available.store(true, Ordering::Release);
    }
}

impl fmt::Debug for TaskOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOperator")
            .field("name", &self.name)
            .field("dlq", &self.dlq)
            .field("payload_type", &self.payload_type)
            .field("max_tries", &self.max_tries)
            .field("timeout", &self.timeout)
            .field("delay", &self.delay)
            .field("max_delay", &self.max_delay)
            .field("successes", &self.successes())
            .field("errors", &self.errors())
            .field("skips", &self.skips())
            .field("available", &self.is_available())
            .finish()
    }
}

pub fn dlq_name(queue: &str) -> String {
    format!("{DLQ_PREFIX}{queue}")
}

/// Releases a claimed operator on drop, so a failing drain never leaves
/// it unclaimable.
pub(crate) struct ClaimGuard<'a> {
    operator: &'a TaskOperator,
}

impl<'a> ClaimGuard<'a> {
    pub(crate) fn acquire(operator: &'a TaskOperator) -> Option<Self> {
        operator.try_claim().then_some(Self { operator })
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.operator.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskError;
    use crate::typed::FnCallback;

    fn noop(name: &str) -> TaskOperator {
        TaskOperator::new::<String, _>(name, FnCallback::new(|_: &String| Ok(true)))
    }

    #[test]
    fn defaults_and_dlq_name() {
        let op = noop("emails");
        assert_eq!(op.name(), "emails");
        assert_eq!(op.dlq(), "dlq:emails");
        assert_eq!(op.max_tries(), 10);
        assert_eq!(op.timeout(), 60);
        assert_eq!(op.delay(), 60);
        assert_eq!(op.max_delay(), 3600);
        assert!(op.is_available());
        assert!(op.payload_type().contains("String"));
    }

    #[test]
    fn builders_set_policy() {
        let op = noop("q")
            .with_max_tries(3)
            .with_timeout(5)
            .with_delay(7)
            .with_max_delay(11)
            .with_available(false);
        assert_eq!(
            (op.max_tries(), op.timeout(), op.delay(), op.max_delay()),
            (3, 5, 7, 11)
        );
        assert!(!op.is_available());
    }

    #[test]
    fn prefix_renames_queue_and_dlq() {
        let op = noop("emails").prefixed("acme:");
        assert_eq!(op.name(), "acme:emails");
        assert_eq!(op.dlq(), "dlq:acme:emails");

        let op = noop("emails").prefixed("");
        assert_eq!(op.name(), "emails");
    }

    #[test]
    fn only_one_claim_wins_and_guard_releases() {
        let op = noop("q");
        {
            let guard = ClaimGuard::acquire(&op);
            assert!(guard.is_some());
            assert!(ClaimGuard::acquire(&op).is_none());
            assert!(!op.is_available());
        }
        assert!(op.is_available());
    }

    #[test]
    fn counters_accumulate() {
        let op = TaskOperator::new::<u8, _>(
            "q",
            FnCallback::new(|_: &u8| Err(TaskError::failed("never"))),
        );
        op.record_success();
        op.record_error();
        op.record_error();
        op.record_skip();
        assert_eq!((op.successes(), op.errors(), op.skips()), (1, 2, 1));
    }
}
