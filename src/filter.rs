//! Entry filters and the per-collector filter chain.
//!
//! A [`Filter`] decides whether an entry should be dropped before it reaches
//! the queue. The two built-ins are modeled as enum variants so the hot path
//! avoids an indirect call per entry; arbitrary predicates plug in through
//! the [`LogFilter`] trait via [`Filter::Custom`].

use std::sync::Arc;

use parking_lot::RwLock;

use crate::{entry::LogEntry, level::LogLevel};

/// Trait implemented by custom log filters.
///
/// Filters are `Send + Sync` so they can be shared across threads. They must
/// be pure and fast; a slow filter stalls ingestion.
pub trait LogFilter: Send + Sync {
    /// Return `true` if `entry` should be dropped.
    fn should_drop(&self, entry: &LogEntry) -> bool;
}

/// Drops entries strictly below a minimum level.
#[derive(Clone, Copy, Debug)]
pub struct LevelFilter {
    min_level: LogLevel,
}

impl LevelFilter {
    pub fn new(min_level: LogLevel) -> Self {
        Self { min_level }
    }

    #[inline]
    fn should_drop(&self, entry: &LogEntry) -> bool {
        entry.level() < self.min_level
    }
}

/// Drops or keeps entries based on substring matches.
///
/// With `reject_if_present` set (the default), an entry containing any of the
/// configured words is dropped. With it cleared, only entries containing at
/// least one of the words are kept.
#[derive(Clone, Debug)]
pub struct KeywordFilter {
    words: Vec<String>,
    reject_if_present: bool,
}

impl KeywordFilter {
    pub fn new(words: Vec<String>, reject_if_present: bool) -> Self {
        Self {
            words,
            reject_if_present,
        }
    }

    /// Convenience constructor for the common reject-on-match form.
    pub fn rejecting(words: Vec<String>) -> Self {
        Self::new(words, true)
    }

    #[inline]
    fn should_drop(&self, entry: &LogEntry) -> bool {
        if self.words.is_empty() {
            return false;
        }
        let present = self.words.iter().any(|w| entry.content().contains(w.as_str()));
        if self.reject_if_present {
            present
        } else {
            !present
        }
    }
}

/// Concrete filter variants evaluated by the chain.
#[derive(Clone)]
pub enum Filter {
    Level(LevelFilter),
    Keyword(KeywordFilter),
    Custom(Arc<dyn LogFilter>),
}

impl Filter {
    /// Return `true` if `entry` should be dropped.
    #[inline]
    pub fn should_drop(&self, entry: &LogEntry) -> bool {
        match self {
            Self::Level(f) => f.should_drop(entry),
            Self::Keyword(f) => f.should_drop(entry),
            Self::Custom(f) => f.should_drop(entry),
        }
    }
}

impl From<LevelFilter> for Filter {
    fn from(value: LevelFilter) -> Self {
        Self::Level(value)
    }
}

impl From<KeywordFilter> for Filter {
    fn from(value: KeywordFilter) -> Self {
        Self::Keyword(value)
    }
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Level(inner) => f.debug_tuple("Level").field(inner).finish(),
            Self::Keyword(inner) => f.debug_tuple("Keyword").field(inner).finish(),
            Self::Custom(_) => f.debug_tuple("Custom").finish(),
        }
    }
}

/// Ordered filter list with rebuild-on-write snapshots.
///
/// Writers replace the whole `Arc<Vec<_>>`; the hot path clones the `Arc`
/// and traverses an immutable snapshot, so readers never hold the lock while
/// evaluating. Evaluation is left to right and short-circuits on the first
/// filter that drops.
#[derive(Default)]
pub struct FilterChain {
    filters: RwLock<Arc<Vec<Filter>>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter to the end of the chain.
    pub fn add(&self, filter: Filter) {
        let mut guard = self.filters.write();
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(filter);
        *guard = Arc::new(next);
    }

    /// Remove every filter. Entries already accepted are unaffected.
    pub fn clear(&self) {
        *self.filters.write() = Arc::new(Vec::new());
    }

    pub fn len(&self) -> usize {
        self.filters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return `true` if any filter drops `entry`, evaluating left to right.
    pub fn should_drop(&self, entry: &LogEntry) -> bool {
        let snapshot = Arc::clone(&self.filters.read());
        snapshot.iter().any(|f| f.should_drop(entry))
    }
}
