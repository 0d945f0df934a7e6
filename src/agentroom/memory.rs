//! Long-term memory capability.
//!
//! The pipeline reads relevant text before a discussion and writes the final answer after it.
//! Both directions are best effort: the pipeline logs a [`MemoryError`] and moves on.
//!
//! Two implementations ship with the crate:
//!
//! * [`NoopMemory`] remembers nothing and is the default for rooms without memory.
//! * [`InMemoryStore`] keeps entries in process and retrieves them by keyword overlap, which
//!   is enough for tests and small deployments.
//!
//! ```rust
//! use std::collections::HashMap;
//! use agentroom::memory::{InMemoryStore, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let memory = InMemoryStore::new();
//!     memory
//!         .store("User: best pasta in Rome?\nAnswer: Try cacio e pepe", HashMap::new())
//!         .await
//!         .unwrap();
//!
//!     let hit = memory.retrieve("pasta recommendations").await.unwrap();
//!     assert!(hit.unwrap().contains("cacio e pepe"));
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

/// Failure reported by a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryError {
    /// The backing store could not be reached.
    Unavailable(String),
    /// The store rejected the request.
    Backend(String),
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::Unavailable(msg) => write!(f, "Memory unavailable: {}", msg),
            MemoryError::Backend(msg) => write!(f, "Memory backend error: {}", msg),
        }
    }
}

impl Error for MemoryError {}

/// Result alias for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Best-effort long-term memory.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Text relevant to `query`, or `None` when nothing matches.
    async fn retrieve(&self, _query: &str) -> MemoryResult<Option<String>> {
        Ok(None)
    }

    /// Persist `text` together with free-form metadata.
    async fn store(&self, _text: &str, _metadata: HashMap<String, Value>) -> MemoryResult<()> {
        Ok(())
    }
}

/// Memory that stores nothing and never returns anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMemory;

#[async_trait]
impl MemoryStore for NoopMemory {}

/// One remembered text with its metadata.
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    pub text: String,
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// In-process memory ranked by keyword overlap.
pub struct InMemoryStore {
    entries: Mutex<Vec<MemoryEntry>>,
    max_results: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            max_results: 3,
        }
    }

    /// Maximum number of entries concatenated into one retrieval result.
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    /// Snapshot of everything stored so far, oldest first.
    pub async fn entries(&self) -> Vec<MemoryEntry> {
        self.entries.lock().await.clone()
    }
}

fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn retrieve(&self, query: &str) -> MemoryResult<Option<String>> {
        let wanted = keywords(query);
        if wanted.is_empty() {
            return Ok(None);
        }

        let entries = self.entries.lock().await;
        let mut scored: Vec<(usize, usize)> = entries
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| {
                let overlap = keywords(&entry.text).intersection(&wanted).count();
                (overlap > 0).then(|| (overlap, idx))
            })
            .collect();
        // best overlap first, newest first on ties
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));

        let hits: Vec<&str> = scored
            .iter()
            .take(self.max_results)
            .map(|(_, idx)| entries[*idx].text.as_str())
            .collect();

        if hits.is_empty() {
            Ok(None)
        } else {
            Ok(Some(hits.join("\n---\n")))
        }
    }

    async fn store(&self, text: &str, metadata: HashMap<String, Value>) -> MemoryResult<()> {
        if text.trim().is_empty() {
            return Err(MemoryError::Backend("refusing to store empty text".into()));
        }
        self.entries
            .lock()
            .await
            .push(MemoryEntry::new(text).with_metadata(metadata));
        Ok(())
    }
}
