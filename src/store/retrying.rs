//! Store decorator applying the shared retry policy.

use super::{ResultStore, SharedStore, StoreError};
use crate::retry::RetryPolicy;
use async_trait::async_trait;

/// Wraps a store so every call is retried with a fixed delay before surfacing an error.
pub struct RetryingStore {
    inner: SharedStore,
    policy: RetryPolicy,
}

impl RetryingStore {
    /// Decorate `inner` with `policy`.
    pub fn new(inner: SharedStore, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ResultStore for RetryingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let inner = &self.inner;
        self.policy.run("store_get", move |_| inner.get(key)).await
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let inner = &self.inner;
        self.policy
            .run("store_save", move |_| inner.save(key, value))
            .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let inner = &self.inner;
        self.policy
            .run("store_delete", move |_| inner.delete(key))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` saves, then delegates.
    struct FlakyStore {
        inner: MemoryStore,
        failures: u32,
        save_calls: AtomicU32,
    }

    #[async_trait]
    impl ResultStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
            let call = self.save_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(StoreError::Unavailable(format!("simulated fault {call}")));
            }
            self.inner.save(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn save_recovers_from_transient_faults_without_duplicating() {
        let flaky = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            failures: 2,
            save_calls: AtomicU32::new(0),
        });
        let store = RetryingStore::new(
            flaky.clone(),
            RetryPolicy::new(3, Duration::from_millis(1)),
        );

        store.save("job", "content").await.expect("third attempt");

        assert_eq!(flaky.save_calls.load(Ordering::SeqCst), 3);
        assert_eq!(flaky.inner.keys().await, vec!["job".to_string()]);
        assert_eq!(
            store.get("job").await.expect("get").as_deref(),
            Some("content")
        );
    }

    #[tokio::test]
    async fn exhausted_budget_surfaces_error() {
        let flaky = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            failures: 5,
            save_calls: AtomicU32::new(0),
        });
        let store = RetryingStore::new(
            flaky.clone(),
            RetryPolicy::new(3, Duration::from_millis(1)),
        );

        let error = store.save("job", "content").await.unwrap_err();

        assert!(matches!(error, StoreError::Unavailable(_)));
        assert_eq!(flaky.save_calls.load(Ordering::SeqCst), 3);
        assert!(flaky.inner.is_empty().await);
    }
}
