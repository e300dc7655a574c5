//! Read-through cache for query-side results.
//!
//! Correctness never depends on this module: every consumer treats a miss
//! and a disabled cache identically. Keys are built through [`CacheKey`] so
//! that the pattern a writer invalidates is derived from the same tuple the
//! reader stored under.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Cache operation failed: {0}")]
    OperationFailed(String),
}

/// The entity namespaces a key may live under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEntity {
    Level,
    Movement,
    Batch,
    Reservation,
    Valuation,
}

impl CacheEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheEntity::Level => "level",
            CacheEntity::Movement => "movement",
            CacheEntity::Batch => "batch",
            CacheEntity::Reservation => "reservation",
            CacheEntity::Valuation => "valuation",
        }
    }
}

/// A structured cache key scoped to (tenant, entity, key-tuple).
///
/// Writers invalidate with [`CacheKey::wildcard`] over the same tenant and
/// entity they write, which guarantees the pattern covers every reader key
/// for that scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    tenant_id: Uuid,
    entity: CacheEntity,
    parts: Vec<String>,
}

impl CacheKey {
    pub fn new(tenant_id: Uuid, entity: CacheEntity) -> Self {
        Self {
            tenant_id,
            entity,
            parts: Vec::new(),
        }
    }

    pub fn part(mut self, value: impl fmt::Display) -> Self {
        self.parts.push(value.to_string());
        self
    }

    pub fn opt_part(self, value: Option<impl fmt::Display>) -> Self {
        match value {
            Some(v) => self.part(v),
            None => self.part("none"),
        }
    }

    /// Key for one inventory level row.
    pub fn level(
        tenant_id: Uuid,
        product_id: Uuid,
        variant_id: Option<Uuid>,
        location_id: Uuid,
    ) -> Self {
        Self::new(tenant_id, CacheEntity::Level)
            .part(product_id)
            .opt_part(variant_id)
            .part(location_id)
    }

    /// Key for a valuation result of one key under one method.
    pub fn valuation(
        tenant_id: Uuid,
        product_id: Uuid,
        variant_id: Option<Uuid>,
        location_id: Uuid,
        method: &str,
    ) -> Self {
        Self::new(tenant_id, CacheEntity::Valuation)
            .part(product_id)
            .opt_part(variant_id)
            .part(location_id)
            .part(method)
    }

    /// Pattern matching every key of this tenant and entity.
    pub fn wildcard(tenant_id: Uuid, entity: CacheEntity) -> CachePattern {
        CachePattern {
            prefix: format!("{}:{}:", tenant_id, entity.as_str()),
        }
    }

    pub fn render(&self) -> String {
        let mut key = format!("{}:{}:", self.tenant_id, self.entity.as_str());
        key.push_str(&self.parts.join(":"));
        key
    }
}

/// A prefix pattern produced by [`CacheKey::wildcard`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePattern {
    prefix: String,
}

impl CachePattern {
    pub fn matches(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
    }
}

#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &CacheKey, value: &str, ttl: Option<Duration>)
        -> Result<(), CacheError>;
    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError>;
    async fn exists(&self, key: &CacheKey) -> Result<bool, CacheError>;
    async fn invalidate_pattern(&self, pattern: &CachePattern) -> Result<u64, CacheError>;
    async fn clear(&self) -> Result<(), CacheError>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() > at)
    }
}

/// In-memory cache implementation.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCache {
    store: Arc<DashMap<String, CacheEntry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheError> {
        let rendered = key.render();
        if let Some(entry) = self.store.get(&rendered) {
            if entry.is_expired() {
                drop(entry);
                self.store.remove(&rendered);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &CacheKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.store
            .insert(key.render(), CacheEntry::new(value.to_string(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.store.remove(&key.render());
        Ok(())
    }

    async fn exists(&self, key: &CacheKey) -> Result<bool, CacheError> {
        Ok(self
            .store
            .get(&key.render())
            .map(|e| !e.is_expired())
            .unwrap_or(false))
    }

    async fn invalidate_pattern(&self, pattern: &CachePattern) -> Result<u64, CacheError> {
        let before = self.store.len() as u64;
        self.store.retain(|key, _| !pattern.matches(key));
        Ok(before - self.store.len() as u64)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.store.clear();
        Ok(())
    }
}

/// Cache configuration mirrored from [`crate::config::CacheConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    pub enabled: bool,
    pub default_ttl: Option<Duration>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: Some(Duration::from_secs(300)),
        }
    }
}
