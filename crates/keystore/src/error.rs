//! Error types for store backends.

/// Errors that can occur when talking to the backing store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to reach the store or obtain a connection.
    #[error("Store connection error: {0}")]
    Connection(String),

    /// A command failed or timed out.
    #[error("Store query error: {0}")]
    Query(String),

    /// The store answered with a reply shape the adapter did not expect.
    #[error("Unexpected store reply: {0}")]
    UnexpectedReply(String),
}
