//! Webhook dispatch: parse, process under a deadline, always acknowledge.
//!
//! Telegram redelivers any update that is not answered with a success status,
//! so every outcome below is acknowledged to the caller. Only the log records
//! which one happened.

use std::sync::Arc;
use std::time::Duration;

use crate::processor::UpdateProcessor;
use crate::update::Update;

/// How a single webhook delivery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// The body was not a valid update.
    Malformed,
    /// The processor returned an error or panicked.
    Failed,
    /// The deadline passed; processing was left running in the background.
    TimedOut,
}

pub struct Dispatcher<P> {
    processor: Arc<P>,
    deadline: Duration,
}

impl<P: UpdateProcessor> Dispatcher<P> {
    pub fn new(processor: P, deadline: Duration) -> Self {
        Self {
            processor: Arc::new(processor),
            deadline,
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Process one raw webhook body.
    pub async fn dispatch(&self, payload: &[u8]) -> Outcome {
        let update: Update = match serde_json::from_slice(payload) {
            Ok(update) => update,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed update");
                return Outcome::Malformed;
            }
        };
        let update_id = update.update_id;

        let processor = Arc::clone(&self.processor);
        let task = tokio::spawn(async move { processor.process(update).await });

        match tokio::time::timeout(self.deadline, task).await {
            Ok(Ok(Ok(()))) => {
                tracing::debug!(update_id, "Update processed");
                Outcome::Completed
            }
            Ok(Ok(Err(e))) => {
                tracing::error!(update_id, error = %e, "Error processing update");
                Outcome::Failed
            }
            Ok(Err(e)) => {
                tracing::error!(update_id, error = %e, "Update processing panicked");
                Outcome::Failed
            }
            Err(_) => {
                tracing::warn!(
                    update_id,
                    deadline_ms = self.deadline.as_millis() as u64,
                    "Update processing timed out"
                );
                Outcome::TimedOut
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starshop_core::AppError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    const UPDATE: &[u8] = br#"{"update_id": 1, "message": {"message_id": 1, "chat": {"id": 1, "type": "private"}, "date": 0, "text": "hi"}}"#;

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl UpdateProcessor for Counting {
        async fn process(&self, _update: Update) -> Result<(), AppError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    impl UpdateProcessor for Failing {
        async fn process(&self, _update: Update) -> Result<(), AppError> {
            Err(AppError::Processing("handler blew up".into()))
        }
    }

    struct Panicking;

    impl UpdateProcessor for Panicking {
        async fn process(&self, _update: Update) -> Result<(), AppError> {
            panic!("handler panicked")
        }
    }

    struct Hanging;

    impl UpdateProcessor for Hanging {
        async fn process(&self, _update: Update) -> Result<(), AppError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn completes_within_deadline() {
        let dispatcher = Dispatcher::new(Counting::default(), Duration::from_secs(1));
        assert_eq!(dispatcher.dispatch(UPDATE).await, Outcome::Completed);
        assert_eq!(dispatcher.processor.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_payload_skips_processing() {
        let dispatcher = Dispatcher::new(Counting::default(), Duration::from_secs(1));
        assert_eq!(dispatcher.dispatch(b"not json").await, Outcome::Malformed);
        assert_eq!(dispatcher.dispatch(br#"{"message": {}}"#).await, Outcome::Malformed);
        assert_eq!(dispatcher.processor.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn processor_error_is_contained() {
        let dispatcher = Dispatcher::new(Failing, Duration::from_secs(1));
        assert_eq!(dispatcher.dispatch(UPDATE).await, Outcome::Failed);
    }

    #[tokio::test]
    async fn processor_panic_is_contained() {
        let dispatcher = Dispatcher::new(Panicking, Duration::from_secs(1));
        assert_eq!(dispatcher.dispatch(UPDATE).await, Outcome::Failed);
    }

    #[tokio::test]
    async fn hanging_processor_hits_deadline() {
        let deadline = Duration::from_millis(50);
        let dispatcher = Dispatcher::new(Hanging, deadline);

        let started = Instant::now();
        assert_eq!(dispatcher.dispatch(UPDATE).await, Outcome::TimedOut);
        assert!(started.elapsed() < deadline + Duration::from_millis(500));
    }
}
