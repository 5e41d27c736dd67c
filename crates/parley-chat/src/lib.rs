pub mod error;
pub mod messages;
pub mod rooms;
pub mod validate;
mod views;

pub use error::ChatError;

/// Run blocking SQLite work off the async runtime.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, ChatError>
where
    F: FnOnce() -> Result<T, ChatError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ChatError::Internal(anyhow::anyhow!("blocking task join error: {e}")))?
}
