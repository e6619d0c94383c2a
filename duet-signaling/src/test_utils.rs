use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Awaits the next item matching `predicate`, giving up after `timeout`.
#[async_trait]
pub trait RecvWithTimeoutExt<T: Send> {
    async fn recv_with_timeout<F>(&mut self, timeout: Duration, predicate: F) -> anyhow::Result<T>
    where
        F: Fn(&T) -> bool + Send;
}

#[async_trait]
impl<T: Clone + Send> RecvWithTimeoutExt<T> for broadcast::Receiver<T> {
    async fn recv_with_timeout<F>(&mut self, timeout: Duration, predicate: F) -> anyhow::Result<T>
    where
        F: Fn(&T) -> bool + Send,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.recv()).await {
                Ok(Ok(item)) if predicate(&item) => return Ok(item),
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    tracing::warn!(?skipped, "Receiver lagged while waiting");
                }
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => return Err(anyhow::anyhow!("Timeout")),
                _ => continue,
            }
        }
    }
}

#[async_trait]
impl<T: Send> RecvWithTimeoutExt<T> for mpsc::UnboundedReceiver<T> {
    async fn recv_with_timeout<F>(&mut self, timeout: Duration, predicate: F) -> anyhow::Result<T>
    where
        F: Fn(&T) -> bool + Send,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.recv()).await {
                Ok(Some(item)) if predicate(&item) => return Ok(item),
                Ok(None) => return Err(anyhow::anyhow!("Channel closed")),
                Err(_) => return Err(anyhow::anyhow!("Timeout")),
                _ => continue,
            }
        }
    }
}
