use super::context::TransactionContext;
use super::error::TxnError;

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::Arc;

/// Transactional view over one named map, bound to one transaction context.
///
/// Every operation requires the context to be `Active` and implicitly
/// acquires the key's lock on first touch. Within one transaction, any
/// sequence of operations on the same key composes exactly as if applied to
/// a private copy-on-write map seeded from committed state at first touch;
/// committed state is never re-read after that (repeatable read), and other
/// readers see nothing until commit.
pub struct TransactionalMap<K, V> {
    name: String,
    ctx: Arc<TransactionContext<K, V>>,
}

impl<K, V> TransactionalMap<K, V>
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync,
    <K as FromStr>::Err: std::fmt::Display,
    V: Clone + Serialize + DeserializeOwned + PartialEq + Send + Sync,
{
    pub(crate) fn new(name: &str, ctx: Arc<TransactionContext<K, V>>) -> Self {
        Self {
            name: name.to_string(),
            ctx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value visible inside this transaction: the buffered value if the key
    /// was touched (including "known absent"), otherwise the committed value.
    pub async fn get(&self, key: &K) -> Result<Option<V>, TxnError> {
        self.ctx.touch(&self.name, key).await
    }

    pub async fn contains_key(&self, key: &K) -> Result<bool, TxnError> {
        Ok(self.ctx.touch(&self.name, key).await?.is_some())
    }

    /// Buffers `value` and returns the prior visible value.
    pub async fn put(&self, key: &K, value: V) -> Result<Option<V>, TxnError> {
        let prior = self.ctx.touch(&self.name, key).await?;
        self.ctx.buffer(&self.name, key, Some(value));
        Ok(prior)
    }

    /// Like `put`, but never reads the prior value (cheaper).
    pub async fn set(&self, key: &K, value: V) -> Result<(), TxnError> {
        self.ctx.lock_key(&self.name, key).await?;
        self.ctx.buffer(&self.name, key, Some(value));
        Ok(())
    }

    /// Buffers `value` only when no value is currently visible. Returns the
    /// existing value when there is one, absent when the put happened.
    pub async fn put_if_absent(&self, key: &K, value: V) -> Result<Option<V>, TxnError> {
        let current = self.ctx.touch(&self.name, key).await?;
        if current.is_some() {
            return Ok(current);
        }
        self.ctx.buffer(&self.name, key, Some(value));
        Ok(None)
    }

    /// Buffers `value` only when a value is currently visible; returns the
    /// prior value either way.
    pub async fn replace(&self, key: &K, value: V) -> Result<Option<V>, TxnError> {
        let current = self.ctx.touch(&self.name, key).await?;
        if current.is_some() {
            self.ctx.buffer(&self.name, key, Some(value));
        }
        Ok(current)
    }

    /// Buffers `new_value` only when the currently visible value equals
    /// `expected`, including both being absent. Buffers nothing on mismatch.
    pub async fn replace_if_same(
        &self,
        key: &K,
        expected: Option<&V>,
        new_value: V,
    ) -> Result<bool, TxnError> {
        let current = self.ctx.touch(&self.name, key).await?;
        if current.as_ref() != expected {
            return Ok(false);
        }
        self.ctx.buffer(&self.name, key, Some(new_value));
        Ok(true)
    }

    /// Buffers "known absent" and returns the prior visible value.
    pub async fn remove(&self, key: &K) -> Result<Option<V>, TxnError> {
        let prior = self.ctx.touch(&self.name, key).await?;
        self.ctx.buffer(&self.name, key, None);
        Ok(prior)
    }

    /// Removes only when the currently visible value equals `expected`
    /// (including both absent). A mismatch buffers nothing and returns false,
    /// also when `expected` is absent but the key is present.
    pub async fn remove_if_same(&self, key: &K, expected: Option<&V>) -> Result<bool, TxnError> {
        let current = self.ctx.touch(&self.name, key).await?;
        if current.as_ref() != expected {
            return Ok(false);
        }
        self.ctx.buffer(&self.name, key, None);
        Ok(true)
    }

    /// Buffers "known absent" without reading the prior value.
    pub async fn delete(&self, key: &K) -> Result<(), TxnError> {
        self.ctx.lock_key(&self.name, key).await?;
        self.ctx.buffer(&self.name, key, None);
        Ok(())
    }
}
