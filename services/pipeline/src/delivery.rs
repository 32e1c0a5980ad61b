//! Redelivery policy applied by every consumer.
//!
//! A message is handed to its handler up to `max_attempts` times. Each
//! invocation runs under a wall-clock budget; running past it counts as a
//! retryable failure. Non-retryable failures stop immediately.

use crate::config::DeliveryConfig;
use crate::consumer::{ConsumerError, IncomingMessage, MessageHandler};
use std::time::Duration;
use tracing::{debug, warn};

/// Terminal result of delivering one message to a handler
#[derive(Debug)]
pub enum DeliveryOutcome {
    /// The handler accepted the message
    Processed { attempts: u32 },
    /// The handler failed on every attempt, or failed permanently
    Failed { error: ConsumerError, attempts: u32 },
}

impl DeliveryOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryOutcome::Processed { attempts } | DeliveryOutcome::Failed { attempts, .. } => {
                *attempts
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    max_attempts: u32,
    retry_backoff: Duration,
    processing_timeout: Duration,
}

impl DeliveryPolicy {
    pub fn new(max_attempts: u32, retry_backoff: Duration, processing_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_backoff,
            processing_timeout,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `handler` on `message` until it succeeds, fails permanently, or the
    /// attempt budget is spent.
    pub async fn deliver<H>(&self, handler: &H, message: &IncomingMessage) -> DeliveryOutcome
    where
        H: MessageHandler + ?Sized,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result =
                match tokio::time::timeout(self.processing_timeout, handler.handle(message.clone()))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ConsumerError::Timeout(self.processing_timeout)),
                };

            let error = match result {
                Ok(()) => return DeliveryOutcome::Processed { attempts: attempt },
                Err(e) => e,
            };

            if !error.is_retryable() || attempt >= self.max_attempts {
                return DeliveryOutcome::Failed {
                    error,
                    attempts: attempt,
                };
            }

            warn!(
                topic = %message.metadata.topic,
                offset = message.metadata.offset,
                attempt,
                max_attempts = self.max_attempts,
                error = %error,
                "Message processing failed, retrying"
            );
            metrics::counter!("pipeline.messages.retried").increment(1);

            let backoff = self.retry_backoff * attempt;
            debug!(backoff_ms = backoff.as_millis() as u64, "Backing off before redelivery");
            tokio::time::sleep(backoff).await;
        }
    }
}

impl From<&DeliveryConfig> for DeliveryPolicy {
    fn from(config: &DeliveryConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.retry_backoff(),
            config.processing_timeout(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::MessageMetadata;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedHandler {
        calls: AtomicU32,
        succeed_on: Option<u32>,
        error: fn() -> ConsumerError,
        delay: Duration,
    }

    impl ScriptedHandler {
        fn new(succeed_on: Option<u32>, error: fn() -> ConsumerError) -> Self {
            Self {
                calls: AtomicU32::new(0),
                succeed_on,
                error,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl MessageHandler for ScriptedHandler {
        async fn handle(&self, _message: IncomingMessage) -> Result<(), ConsumerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.succeed_on {
                Some(n) if call >= n => Ok(()),
                _ => Err((self.error)()),
            }
        }
    }

    fn message() -> IncomingMessage {
        IncomingMessage {
            payload: b"{}".to_vec(),
            metadata: MessageMetadata {
                topic: "album.uploads".to_string(),
                partition: 0,
                offset: 7,
                key: None,
                timestamp: None,
                headers: HashMap::new(),
            },
        }
    }

    fn policy(max_attempts: u32) -> DeliveryPolicy {
        DeliveryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_succeeds_after_one_retry() {
        let handler =
            ScriptedHandler::new(Some(2), || ConsumerError::ProcessingError("busy".into()));

        let outcome = policy(2).deliver(&handler, &message()).await;

        assert!(matches!(outcome, DeliveryOutcome::Processed { attempts: 2 }));
        assert_eq!(outcome.attempts(), 2);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let handler = ScriptedHandler::new(None, || ConsumerError::ProcessingError("down".into()));

        let outcome = policy(2).deliver(&handler, &message()).await;

        match outcome {
            DeliveryOutcome::Failed { error, attempts } => {
                assert_eq!(attempts, 2);
                assert!(error.is_retryable());
            }
            other => panic!("expected Failed, got {:?}", other),
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let handler =
            ScriptedHandler::new(None, || ConsumerError::DeserializationError("bad json".into()));

        let outcome = policy(5).deliver(&handler, &message()).await;

        assert!(matches!(outcome, DeliveryOutcome::Failed { attempts: 1, .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_retryable_failure() {
        let mut handler = ScriptedHandler::new(Some(1), || ConsumerError::ProcessingError("slow".into()));
        handler.delay = Duration::from_millis(200);
        let policy = DeliveryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(20));

        let outcome = policy.deliver(&handler, &message()).await;

        match outcome {
            DeliveryOutcome::Failed { error, attempts } => {
                assert_eq!(attempts, 2);
                assert!(matches!(error, ConsumerError::Timeout(_)));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_attempts_is_clamped() {
        let policy = DeliveryPolicy::new(0, Duration::ZERO, Duration::from_secs(1));
        assert_eq!(policy.max_attempts(), 1);
    }
}
