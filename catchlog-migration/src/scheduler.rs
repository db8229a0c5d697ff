use async_trait::async_trait;
use std::time::Duration;

/// How the engine gives time back to interactive work.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn sleep(&self, delay: Duration);

    async fn yield_now(&self);

    /// Called between batches.
    async fn between_batches(&self, delay: Duration) {
        self.yield_now().await;
        if !delay.is_zero() {
            self.sleep(delay).await;
        }
    }
}

/// Scheduler backed by the tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }

    async fn yield_now(&self) {
        tokio::task::yield_now().await;
    }
}
