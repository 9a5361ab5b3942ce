//! TaskManager - worker loops, retry policy and the admin surface.
//!
//! # Flow of one pass
//! 1. snapshot the operators, sorted by queue name
//! 2. claim each available operator (no-suffocation policy)
//! 3. drain its queue: pop, check tries and readiness, run the callback
//! 4. push exhausted requests to the DLQ and deferred ones back to the queue
//! 5. release the claim

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::TaskConfig;
use super::operator::{ClaimGuard, TaskOperator, dlq_name};
use super::retry::RetryPolicy;
use crate::domain::{ManagerError, OperatorStats, QueueError, RawRequest, TaskError};
use crate::ports::{Clock, SystemClock, TaskQueue};

/// Run once when a worker loop starts or ends.
pub type Hook = Arc<dyn Fn() + Send + Sync>;

/// Owns the operators and the worker loops that drain their queues.
///
/// ```ignore
/// let manager = TaskManager::new(queue, TaskConfig::load(None)?)
///     .with_operator(TaskOperator::new::<Email, _>("emails", SendEmail))
///     .launch();
/// // ...
/// manager.stop().await;
/// ```
pub struct TaskManager {
    queue: Arc<dyn TaskQueue>,
    config: TaskConfig,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    operators: DashMap<String, Arc<TaskOperator>>,

    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,

    before_run: Option<Hook>,
    after_run: Option<Hook>,
}

/// Where an admin call points: the live queue or its DLQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Live,
    Dead,
}

impl TaskManager {
    pub fn new(queue: Arc<dyn TaskQueue>, config: TaskConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            queue,
            retry: RetryPolicy::with_max_delay_secs(config.max_delay),
            config,
            clock: Arc::new(SystemClock),
            operators: DashMap::new(),
            running: AtomicBool::new(false),
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
            before_run: None,
            after_run: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_operator(self, operator: TaskOperator) -> Self {
        self.add_operator(operator);
        self
    }

    pub fn with_before_run(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.before_run = Some(Arc::new(hook));
        self
    }

    pub fn with_after_run(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.after_run = Some(Arc::new(hook));
        self
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    // ------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------

    /// Register an operator under the configured queue prefix. An operator
    /// already registered under the same name is replaced.
    pub fn add_operator(&self, operator: TaskOperator) -> Arc<TaskOperator> {
        let operator = Arc::new(operator.prefixed(&self.config.queue_prefix));
        let name = operator.name().to_string();
        if self
            .operators
            .insert(name.clone(), Arc::clone(&operator))
            .is_some()
        {
            warn!(queue = %name, "Replaced an existing operator");
        }
        operator
    }

    /// Unregister by external name.
    pub fn remove_operator(&self, name: &str) -> Option<Arc<TaskOperator>> {
        self.operators
            .remove(&self.queue_name(name))
            .map(|(_, operator)| operator)
    }

    /// Look up by external (unprefixed) name, falling back to the internal one.
    pub fn operator(&self, name: &str) -> Result<Arc<TaskOperator>, ManagerError> {
        self.operators
            .get(&self.queue_name(name))
            .or_else(|| self.operators.get(name))
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                ManagerError::validation("queueName", format!("The queue '{name}' does not exist."))
            })
    }

    /// Snapshot of the registered operators, ordered by queue name.
    pub fn operators(&self) -> Vec<Arc<TaskOperator>> {
        let mut operators: Vec<_> = self
            .operators
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        operators.sort_by(|a, b| a.name().cmp(b.name()));
        operators
    }

    /// Internal queue name for an external one.
    pub fn queue_name(&self, name: &str) -> String {
        format!("{}{name}", self.config.queue_prefix)
    }

    pub fn dlq_name(&self, name: &str) -> String {
        dlq_name(&self.queue_name(name))
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Wrap in an `Arc` and start the worker loops unless in test mode.
    pub fn launch(self) -> Arc<Self> {
        let manager = Arc::new(self);
        if manager.config.test {
            info!("Test mode: worker loops not started");
        } else {
            manager.start();
        }
        manager
    }

    /// Spawn `threads` worker loops. Must be called inside a tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if !workers.is_empty() {
            warn!("Task manager already started");
            return;
        }

        self.running.store(true, Ordering::SeqCst);
        self.shutdown_tx.send_replace(false);

        for worker_id in 0..self.config.threads {
            let manager = Arc::clone(self);
            workers.push(tokio::spawn(async move { manager.run(worker_id).await }));
        }

        info!(
            threads = self.config.threads,
            operators = self.operators.len(),
            sleep_secs = self.config.sleep,
            "Task manager started"
        );
    }

    /// Ask every worker loop to exit after its current request, and wait
    /// for all of them. In-flight callbacks are not interrupted.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown_tx.send_replace(true);

        let workers = {
            let mut guard = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        for join in workers {
            if let Err(e) = join.await {
                error!(error = %e, "Worker loop ended abnormally");
            }
        }

        info!("Task manager stopped");
    }

    /// Let passes run without spawning loops. For driving the manager by hand.
    pub fn turn_on(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn turn_off(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// One worker loop: passes separated by the configured sleep, until
    /// the manager is turned off. Errors are logged, never returned.
    pub async fn run(&self, worker_id: usize) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let sleep = self.config.sleep_interval();

        info!(worker_id, "Worker loop started");
        if let Some(hook) = &self.before_run {
            hook();
        }

        while self.is_running() {
            if let Err(panic) = AssertUnwindSafe(self.process_all()).catch_unwind().await {
                error!(
                    worker_id,
                    panic = %panic_message(panic.as_ref()),
                    "Processing pass panicked"
                );
            }

            if !self.is_running() {
                break;
            }
            if sleep.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(sleep) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
        }

        if let Some(hook) = &self.after_run {
            hook();
        }
        info!(worker_id, "Worker loop stopped");
    }

    // ------------------------------------------------------------------
    // Processing
    // ------------------------------------------------------------------

    /// One pass over every operator. Returns the number of requests handed
    /// to a callback that succeeded or asked to be skipped.
    pub async fn process_all(&self) -> usize {
        let mut total = 0;
        for operator in self.operators() {
            if !self.is_running() {
                break;
            }
            if !operator.is_available() {
                continue;
            }

            let _claim = if self.config.no_suffocating {
                match ClaimGuard::acquire(&operator) {
                    Some(claim) => Some(claim),
                    None => continue,
                }
            } else {
                None
            };

            match self.process_operator(&operator).await {
                Ok(count) => total += count,
                Err(e) => error!(queue = operator.name(), error = %e, "Draining queue failed"),
            }
        }
        total
    }

    /// Drain one operator's queue. Stops early when the manager is turned off.
    pub async fn process_operator(&self, operator: &TaskOperator) -> Result<usize, ManagerError> {
        self.drain(operator, true).await
    }

    async fn drain(&self, operator: &TaskOperator, until_stopped: bool) -> Result<usize, ManagerError> {
        let started = Instant::now();
        let mut dead = Vec::new();
        let mut deferred = Vec::new();
        let mut count = 0;

        let popped: Result<(), QueueError> = loop {
            if until_stopped && !self.is_running() {
                break Ok(());
            }
            let request = match self.queue.pop(operator.name()).await {
                Ok(Some(request)) => request,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };

            if request.tries >= operator.max_tries() {
                dead.push(request);
                continue;
            }
            if !request.is_ready_at(self.clock.now_millis()) {
                deferred.push(request);
                continue;
            }

            let request_started = Instant::now();
            let result = self.dispatch(operator, &request).await;
            debug!(
                queue = operator.name(),
                request_id = %request.id,
                elapsed_ms = millis(request_started.elapsed()),
                ok = result.is_ok(),
                "Dispatched request"
            );

            match result {
                Ok(true) => {
                    operator.record_success();
                    count += 1;
                }
                Ok(false) => {
                    operator.record_skip();
                    deferred.push(request);
                    count += 1;
                }
                Err(e) if e.is_throttled() => {
                    let request = self.schedule_retry(request);
                    warn!(
                        queue = operator.name(),
                        request_id = %request.id,
                        tries = request.tries,
                        error = %e,
                        "Throttled, yielding the rest of the queue"
                    );
                    deferred.push(request);
                    break Ok(());
                }
                Err(e) => {
                    operator.record_error();
                    let first_try = request.tries == 0;
                    let request = self.schedule_retry(request);
                    if first_try {
                        warn!(queue = operator.name(), request_id = %request.id, error = %e, "Request failed on first try");
                    } else {
                        error!(
                            queue = operator.name(),
                            request_id = %request.id,
                            tries = request.tries,
                            error = %e,
                            "Request failed"
                        );
                    }
                    deferred.push(request);
                }
            }
        };

        let flushed = self.flush(operator, &dead, &deferred).await;
        debug!(
            queue = operator.name(),
            processed = count,
            dead = dead.len(),
            deferred = deferred.len(),
            elapsed_ms = millis(started.elapsed()),
            "Drained queue"
        );

        popped?;
        flushed?;
        Ok(count)
    }

    /// Run the callback and, on success, its hook. A panic counts as a failure.
    async fn dispatch(&self, operator: &TaskOperator, request: &RawRequest) -> Result<bool, TaskError> {
        let callback = operator.callback();
        let run = async {
            let done = callback.process_raw(request).await?;
            if done {
                callback.on_success_raw(request).await;
            }
            Ok::<_, TaskError>(done)
        };
        AssertUnwindSafe(run)
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(TaskError::Panicked(panic_message(panic.as_ref()))))
    }

    fn schedule_retry(&self, mut request: RawRequest) -> RawRequest {
        let tries = request.increment_tries();
        request.next_run_at = Some(self.retry.next_run_at(tries, self.clock.now_millis()));
        request
    }

    async fn flush(
        &self,
        operator: &TaskOperator,
        dead: &[RawRequest],
        deferred: &[RawRequest],
    ) -> Result<(), QueueError> {
        // Everything here is already popped: try every push, report the first failure.
        let mut first_error = None;
        let batches = [(operator.dlq(), dead), (operator.name(), deferred)];
        for (queue, requests) in batches {
            for request in requests {
                if let Err(e) = self.queue.push(queue, request).await {
                    error!(queue, request_id = %request.id, error = %e, "Cannot push request back");
                    first_error.get_or_insert(e);
                }
            }
        }
        if !dead.is_empty() {
            warn!(
                queue = operator.name(),
                dlq = operator.dlq(),
                count = dead.len(),
                "Moved exhausted requests to the dead-letter queue"
            );
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Epoch millis at which a request that has failed `tries` times may run again.
    pub fn calc_next_run_at(tries: u32, max_delay_secs: u64, now_millis: i64) -> i64 {
        RetryPolicy::with_max_delay_secs(max_delay_secs).next_run_at(tries, now_millis)
    }

    // ------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------

    pub async fn stats(&self) -> Result<Vec<OperatorStats>, ManagerError> {
        let mut stats = Vec::with_capacity(self.operators.len());
        for operator in self.operators() {
            stats.push(OperatorStats {
                name: operator.name().to_string(),
                queue_size: self.queue.size(operator.name()).await?,
                dlq_size: self.queue.size(operator.dlq()).await?,
                successes: operator.successes(),
                skips: operator.skips(),
                errors: operator.errors(),
            });
        }
        Ok(stats)
    }

    // ------------------------------------------------------------------
    // Admin: queues are addressed by external name. Reads on a queue that
    // does not exist return zero or empty.
    // ------------------------------------------------------------------

    fn target_name(&self, name: &str, target: Target) -> String {
        match target {
            Target::Live => self.queue_name(name),
            Target::Dead => self.dlq_name(name),
        }
    }

    pub async fn count_requests(&self, name: &str) -> Result<usize, ManagerError> {
        Ok(self.queue.size(&self.queue_name(name)).await?)
    }

    pub async fn count_dlq(&self, name: &str) -> Result<usize, ManagerError> {
        Ok(self.queue.size(&self.dlq_name(name)).await?)
    }

    pub async fn list_requests(&self, name: &str) -> Result<Vec<RawRequest>, ManagerError> {
        Ok(self.queue.list(&self.queue_name(name)).await?)
    }

    pub async fn list_dlq(&self, name: &str) -> Result<Vec<RawRequest>, ManagerError> {
        Ok(self.queue.list(&self.dlq_name(name)).await?)
    }

    /// `page` is 1-based.
    pub async fn list_requests_page(
        &self,
        name: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<RawRequest>, ManagerError> {
        Ok(self
            .queue
            .list_page(&self.queue_name(name), page, page_size)
            .await?)
    }

    pub async fn list_dlq_page(
        &self,
        name: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<RawRequest>, ManagerError> {
        Ok(self
            .queue
            .list_page(&self.dlq_name(name), page, page_size)
            .await?)
    }

    pub async fn get_request(&self, name: &str, id: &str) -> Result<Option<RawRequest>, ManagerError> {
        self.find(&self.queue_name(name), id).await
    }

    pub async fn get_dlq(&self, name: &str, id: &str) -> Result<Option<RawRequest>, ManagerError> {
        self.find(&self.dlq_name(name), id).await
    }

    async fn find(&self, queue: &str, id: &str) -> Result<Option<RawRequest>, ManagerError> {
        Ok(self
            .queue
            .list(queue)
            .await?
            .into_iter()
            .find(|request| request.id == id))
    }

    pub async fn remove_request(&self, name: &str, id: &str) -> Result<bool, ManagerError> {
        Ok(self.queue.remove(&self.queue_name(name), id).await?)
    }

    pub async fn remove_dlq(&self, name: &str, id: &str) -> Result<bool, ManagerError> {
        Ok(self.queue.remove(&self.dlq_name(name), id).await?)
    }

    pub async fn clear_requests(&self, name: &str) -> Result<usize, ManagerError> {
        Ok(self.queue.clear(&self.queue_name(name)).await?)
    }

    pub async fn clear_dlq(&self, name: &str) -> Result<usize, ManagerError> {
        Ok(self.queue.clear(&self.dlq_name(name)).await?)
    }

    /// Move every DLQ entry back to the live queue with `tries` reset.
    pub async fn move_dlq(&self, name: &str) -> Result<usize, ManagerError> {
        let operator = self.operator(name)?;
        let moved = self
            .queue
            .move_requests(operator.dlq(), operator.name())
            .await?;
        info!(queue = operator.name(), moved, "Moved dead-letter requests back");
        Ok(moved)
    }

    /// Drain the whole queue now, whether or not the loops are running.
    pub async fn run_all(&self, name: &str) -> Result<usize, ManagerError> {
        let operator = self.operator(name)?;
        self.drain(&operator, false).await
    }

    /// Run one request by id, ignoring its schedule and try count. Removed
    /// from the queue when the callback reports success.
    pub async fn run_one(&self, name: &str, id: &str) -> Result<bool, ManagerError> {
        self.run_by_id(name, id, Target::Live).await
    }

    pub async fn run_one_dlq(&self, name: &str, id: &str) -> Result<bool, ManagerError> {
        self.run_by_id(name, id, Target::Dead).await
    }

    async fn run_by_id(&self, name: &str, id: &str, target: Target) -> Result<bool, ManagerError> {
        let queue = self.target_name(name, target);
        let requests = self.queue.list(&queue).await?;
        if requests.is_empty() {
            return Err(ManagerError::validation(
                "queueName",
                format!("No items in queue '{name}'."),
            ));
        }
        let Some(request) = requests.into_iter().find(|request| request.id == id) else {
            let kind = match target {
                Target::Live => "queue",
                Target::Dead => "DLQ",
            };
            return Err(ManagerError::validation(
                "id",
                format!("The item '{id}' was not found in {kind} '{name}'."),
            ));
        };

        let operator = self.operator(name)?;
        match self.dispatch(&operator, &request).await {
            Ok(true) => {
                operator.record_success();
                self.queue.remove(&queue, id).await?;
                Ok(true)
            }
            Ok(false) => {
                operator.record_skip();
                Ok(false)
            }
            Err(e) => {
                operator.record_error();
                Err(e.into())
            }
        }
    }

    /// Replace a queued request's payload with `payload` (JSON text).
    ///
    /// The payload must decode into the operator's payload type. The old
    /// entry is removed and a new request, with a new id and no tries, is
    /// pushed in its place.
    pub async fn modify_request(
        &self,
        name: &str,
        id: &str,
        payload: &str,
    ) -> Result<RawRequest, ManagerError> {
        self.modify(name, id, payload, Target::Live).await
    }

    pub async fn modify_dlq(
        &self,
        name: &str,
        id: &str,
        payload: &str,
    ) -> Result<RawRequest, ManagerError> {
        self.modify(name, id, payload, Target::Dead).await
    }

    async fn modify(
        &self,
        name: &str,
        id: &str,
        payload: &str,
        target: Target,
    ) -> Result<RawRequest, ManagerError> {
        if id.is_empty() {
            return Err(ManagerError::validation("id", "The ID field must be supplied."));
        }
        let operator = self.operator(name)?;

        let value: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| ManagerError::validation("value", e.to_string()))?;
        operator
            .callback()
            .validate(&value)
            .map_err(|e| ManagerError::validation("value", e.to_string()))?;

        let queue = self.target_name(name, target);
        let request = RawRequest::new(value);
        self.queue.remove(&queue, id).await?;
        self.queue.push(&queue, &request).await?;

        info!(queue = %queue, old_id = id, new_id = %request.id, "Modified request");
        Ok(request)
    }
}

fn millis(elapsed: std::time::Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
