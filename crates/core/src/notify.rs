use async_trait::async_trait;

/// Failure-notification boundary. Real sinks (email, Slack, and the like)
/// live behind this trait; the engine only knows receiver names.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Reports one validation failure to one named receiver.
    async fn notify(&self, receiver: &str, item_name: &str, reason: &str);
}

/// Default notifier: records the failure in the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, receiver: &str, item_name: &str, reason: &str) {
        tracing::warn!(receiver, item = item_name, reason, "validation failed");
    }
}
