//! Category storage.
//!
//! Handlers only see the [`CategoryStore`] trait. The shipped implementation
//! is an in-process concurrent map.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;

use crate::categories::model::Category;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Persistence boundary for categories.
pub trait CategoryStore: Send + Sync {
    fn list(&self) -> Result<Vec<Category>, StoreError>;
    fn get(&self, id: u64) -> Result<Option<Category>, StoreError>;
    fn create(&self, name: String) -> Result<Category, StoreError>;
    /// Returns `None` when no category has this id.
    fn update(&self, id: u64, name: String) -> Result<Option<Category>, StoreError>;
    /// Returns `false` when no category has this id.
    fn delete(&self, id: u64) -> Result<bool, StoreError>;
}

/// Thread-safe in-memory store. Ids start at 1 and are never reused.
#[derive(Debug)]
pub struct MemoryStore {
    rows: DashMap<u64, Category>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CategoryStore for MemoryStore {
    fn list(&self) -> Result<Vec<Category>, StoreError> {
        let mut all: Vec<Category> = self.rows.iter().map(|r| r.value().clone()).collect();
        all.sort_by_key(|c| c.id);
        Ok(all)
    }

    fn get(&self, id: u64) -> Result<Option<Category>, StoreError> {
        Ok(self.rows.get(&id).map(|r| r.value().clone()))
    }

    fn create(&self, name: String) -> Result<Category, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let category = Category {
            id,
            name,
            created_at: now,
            updated_at: now,
        };
        self.rows.insert(id, category.clone());
        Ok(category)
    }

    fn update(&self, id: u64, name: String) -> Result<Option<Category>, StoreError> {
        Ok(self.rows.get_mut(&id).map(|mut row| {
            row.name = name;
            row.updated_at = Utc::now();
            row.clone()
        }))
    }

    fn delete(&self, id: u64) -> Result<bool, StoreError> {
        Ok(self.rows.remove(&id).is_some())
    }
}
