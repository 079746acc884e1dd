/// Errors raised while enqueuing work onto a [`crate::DynamicWorkerPool`].
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The tier's channel is closed, which only happens after the pool has
    /// been shut down.
    #[error("worker pool tier is closed")]
    Closed,
}
