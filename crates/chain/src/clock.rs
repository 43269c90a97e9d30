//! Injectable waiting, so retry and pacing logic can be tested without sleeping.

use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;

#[async_trait]
pub trait Delay: Send + Sync + Debug {
    async fn sleep(&self, duration: Duration);
}

/// Real timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
