use std::time::Instant;

use fabric_core::{
    message::Message,
    wire::{Interceptor, Next},
};
use tracing::{debug, warn};

/// Logs every invocation passing through it, with its outcome and latency.
#[derive(Debug, Clone, Default)]
pub struct LoggingInterceptor {
    target: Option<String>,
}

impl LoggingInterceptor {
    /// `target` names the wire end in log lines.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
        }
    }
}

impl Interceptor for LoggingInterceptor {
    async fn invoke(&self, msg: Message, next: Next<'_>) -> Message {
        let operation = next.operation();
        let target = self.target.as_deref().unwrap_or("-");
        let frames = msg.work_context().map_or(0, |c| c.call_stack().len());
        debug!(target_uri = target, operation, frames, "invoking");

        let start = Instant::now();
        let ret = next.invoke(msg).await;
        let elapsed = start.elapsed();
        match ret.fault() {
            Some(fault) => warn!(
                target_uri = target,
                operation,
                ?elapsed,
                "invocation faulted: {fault:#}"
            ),
            None => debug!(target_uri = target, operation, ?elapsed, "invocation complete"),
        }
        ret
    }

    fn name(&self) -> &str {
        "logging"
    }
}
