//! Worker loop.
//!
//! A worker pulls one request at a time from the jobs channel, awaits
//! `Spider::crawl` and reports a [`Completion`]. It never touches the queue. A
//! panic inside `crawl` is caught and reported as a failed crawl so the
//! coordinator's in-flight count stays correct.

use crate::error::SpiderError;
use crate::request::Request;
use crate::spider::Spider;
use futures_util::FutureExt;
use kanal::{AsyncReceiver, AsyncSender};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, trace};

/// What a worker reports back after one crawl.
pub(crate) struct Completion {
    pub worker_id: usize,
    pub request: Request,
    pub outcome: Result<Vec<Request>, SpiderError>,
    pub elapsed: Duration,
}

pub(crate) async fn run_worker<S: Spider>(
    worker_id: usize,
    spider: Arc<S>,
    jobs: AsyncReceiver<Request>,
    completions: AsyncSender<Completion>,
) {
    trace!("Worker {} started", worker_id);
    while let Ok(request) = jobs.recv().await {
        trace!("Worker {} crawling {}", worker_id, request);
        let start_time = Instant::now();
        let outcome = match AssertUnwindSafe(spider.crawl(&request)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Worker {} panicked while crawling {}: {}", worker_id, request, message);
                Err(SpiderError::GeneralError(format!("crawl panicked: {}", message)))
            }
        };

        let completion = Completion {
            worker_id,
            request,
            outcome,
            elapsed: start_time.elapsed(),
        };
        if completions.send(completion).await.is_err() {
            trace!("Completion channel closed, worker {} exiting", worker_id);
            break;
        }
    }
    trace!("Worker {} finished", worker_id);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
