/// Errors raised by [`crate::ConnectionRegistry`] operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// `set_unique_id` was called for a client id with no registered session.
    #[error("no session registered for client {0}")]
    UnknownClient(u32),

    /// `set_unique_id` was called on a session that already has a `uniqueId`
    /// (§4.2's set-once guard).
    #[error("client {0} already has a uniqueId set")]
    UniqueIdAlreadySet(u32),
}
