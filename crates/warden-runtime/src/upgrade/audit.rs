use async_trait::async_trait;

/// Operator-facing reporting of upgrade results.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record a noteworthy event.
    async fn audit(&self, message: &str);

    /// Raise an alert that needs operator attention.
    async fn alert(&self, title: &str, message: &str);
}

/// Audit sink that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAudit;

#[async_trait]
impl AuditSink for TracingAudit {
    async fn audit(&self, message: &str) {
        tracing::info!(target: "warden::audit", "{}", message);
    }

    async fn alert(&self, title: &str, message: &str) {
        tracing::error!(target: "warden::audit", title, "{}", message);
    }
}
