use std::time::Duration;

use async_trait::async_trait;

/// Stand-in for a "media is flowing" signal the browsers do not expose.
#[async_trait]
pub trait Pause: Send + Sync {
    async fn pause(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPause;

#[async_trait]
impl Pause for TokioPause {
    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Returns immediately and remembers what it was asked to wait for.
    #[derive(Debug, Default)]
    pub struct RecordedPause {
        pub requested: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Pause for RecordedPause {
        async fn pause(&self, duration: Duration) {
            self.requested.lock().unwrap().push(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn tokio_pause_advances_the_clock() {
        let started = tokio::time::Instant::now();
        TokioPause.pause(Duration::from_secs(3)).await;
        assert!(started.elapsed() >= Duration::from_secs(3));
    }
}
