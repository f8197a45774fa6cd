//! Settle-once handle bridging "round started/finished" callbacks into awaitable values.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DeferredError {
    #[error("deferred was rejected: {0}")]
    Rejected(String),
}

type Slot<T> = Option<Result<T, DeferredError>>;

/// A value that is settled at most once.
///
/// `resolve` and `reject` after the first settlement are no-ops and report
/// `false`; the first settled value is what every waiter observes.
pub struct Deferred<T> {
    slot: Arc<watch::Sender<Slot<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self { slot: Arc::clone(&self.slot) }
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred").field("resolved", &self.slot.borrow().is_some()).finish()
    }
}

impl<T> Deferred<T> {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self { slot: Arc::new(slot) }
    }

    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn reject(&self, reason: impl Into<String>) -> bool {
        self.settle(Err(DeferredError::Rejected(reason.into())))
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.borrow().is_some()
    }

    fn settle(&self, outcome: Result<T, DeferredError>) -> bool {
        let mut outcome = Some(outcome);
        self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = outcome.take();
            true
        })
    }
}

impl<T: Clone> Deferred<T> {
    /// Waits until the value is settled and returns a clone of it.
    pub async fn wait(&self) -> Result<T, DeferredError> {
        let mut receiver = self.slot.subscribe();
        let settled = receiver
            .wait_for(Option::is_some)
            .await
            .map_err(|_| DeferredError::Rejected("deferred dropped before settling".to_string()))?;
        match &*settled {
            Some(outcome) => outcome.clone(),
            None => Err(DeferredError::Rejected("deferred observed without a value".to_string())),
        }
    }

    pub fn peek(&self) -> Option<Result<T, DeferredError>> {
        self.slot.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Deferred, DeferredError};

    #[tokio::test]
    async fn second_settlement_is_ignored() {
        let deferred = Deferred::new();

        assert!(deferred.resolve("first"));
        assert!(!deferred.resolve("second"));
        assert!(!deferred.reject("too late"));

        assert!(deferred.is_resolved());
        assert_eq!(deferred.wait().await, Ok("first"));
    }

    #[tokio::test]
    async fn waiters_registered_before_settlement_observe_value() {
        let deferred = Deferred::<u32>::new();
        let waiter = {
            let deferred = deferred.clone();
            tokio::spawn(async move { deferred.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!deferred.is_resolved());
        deferred.resolve(7);

        assert_eq!(waiter.await.expect("join"), Ok(7));
    }

    #[tokio::test]
    async fn rejection_is_sticky() {
        let deferred = Deferred::<()>::new();
        assert!(deferred.reject("content unavailable"));
        assert!(!deferred.resolve(()));
        assert_eq!(
            deferred.wait().await,
            Err(DeferredError::Rejected("content unavailable".to_string()))
        );
        assert!(matches!(deferred.peek(), Some(Err(_))));
    }
}
