use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, sleep};
use tracing::{info, warn};

use runq_core::{
    LocalQueue, TaskCallback, TaskConfig, TaskError, TaskManager, TaskOperator, TaskQueue,
    TaskQueueExt, TaskRequest,
};

const QUEUE: &str = "hello";

#[derive(Parser)]
#[command(name = "runq", about = "Run a demo task queue and print its stats")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<String>,

    /// Number of requests to enqueue
    #[arg(long, default_value_t = 5)]
    requests: u32,

    /// Number of calls that fail before the callback starts succeeding
    #[arg(long, default_value_t = 2)]
    fail_first: u32,

    /// Seconds to let the worker loops run
    #[arg(long, default_value_t = 3)]
    run_secs: u64,

    /// Use a Redis server instead of the in-process queue
    #[cfg(feature = "redis")]
    #[arg(long)]
    redis_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    name: String,
}

struct HelloCallback {
    remaining_failures: AtomicU32,
}

impl HelloCallback {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl TaskCallback<Hello> for HelloCallback {
    async fn process(&self, payload: &Hello) -> Result<bool, TaskError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(TaskError::failed(format!("intentional failure (left={left})")));
        }

        info!(name = %payload.name, "Hello");
        Ok(true)
    }

    async fn on_success(&self, request: &TaskRequest<Hello>) {
        info!(request_id = %request.id, tries = request.tries, "Delivered");
    }
}

async fn open_queue(args: &Args) -> Result<Arc<dyn TaskQueue>> {
    #[cfg(feature = "redis")]
    if let Some(url) = &args.redis_url {
        info!(url = %url, "Using Redis queue");
        return Ok(Arc::new(runq_core::impls::RedisQueue::connect(url).await?));
    }
    let _ = args;
    Ok(Arc::new(LocalQueue::new()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "runq_core=info,runq_cli=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = TaskConfig::load(args.config.as_deref())?;
    let queue = open_queue(&args).await?;

    // (A) Enqueue before the loops start.
    let queue_name = format!("{}{QUEUE}", config.queue_prefix);
    for i in 0..args.requests {
        let request = TaskRequest::new(Hello {
            name: format!("runq #{i}"),
        });
        queue.push_typed(&queue_name, &request).await?;
    }
    info!(count = args.requests, queue = %queue_name, "Enqueued requests");

    // (B) Start the worker loops.
    let manager = TaskManager::new(Arc::clone(&queue), config)
        .with_operator(TaskOperator::new::<Hello, _>(
            QUEUE,
            HelloCallback::new(args.fail_first),
        ))
        .launch();
    if !manager.is_running() {
        manager.turn_on();
        manager.process_all().await;
    }

    // (C) Let them work, then shut down.
    sleep(Duration::from_secs(args.run_secs)).await;
    manager.stop().await;
    println!("{}", serde_json::to_string_pretty(&manager.stats().await?)?);

    // (D) Failed requests wait on their backoff. Run them now by id.
    for request in manager.list_requests(QUEUE).await? {
        match manager.run_one(QUEUE, &request.id).await {
            Ok(done) => info!(request_id = %request.id, done, "Forced run"),
            Err(e) => warn!(request_id = %request.id, error = %e, "Forced run failed"),
        }
    }
    println!("{}", serde_json::to_string_pretty(&manager.stats().await?)?);

    Ok(())
}
