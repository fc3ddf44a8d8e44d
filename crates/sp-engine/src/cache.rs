//! Run-scoped memo of materialized histograms.
//!
//! Every distinct (channel, category, selection, process, materialization
//! shift) is computed once per run, however many requests or derived
//! processes ask for it. Each key owns its own slot, so concurrent callers of
//! the same key wait for the first computation while other keys proceed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use sp_core::{Error, Result};
use sp_hist::Histogram;

use crate::category::Category;
use crate::variation::Shift;

/// Identity of one materialized histogram.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    channel: String,
    category: String,
    content: String,
    process: String,
    shift: String,
}

impl CacheKey {
    /// Key for a process (by [`Process::fingerprint`](crate::Process::fingerprint)) in `category` at `shift`.
    pub fn new(category: &Category, process: &str, shift: &Shift) -> Self {
        Self {
            channel: category.channel().name().to_string(),
            category: category.name().to_string(),
            content: category.fingerprint(),
            process: process.to_string(),
            shift: shift.fingerprint(),
        }
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Histograms actually computed.
    pub materializations: u64,
    /// Lookups served from the cache.
    pub hits: u64,
}

type Slot = Arc<Mutex<Option<Histogram>>>;

/// Exactly-once histogram memo shared by all workers of a run.
#[derive(Debug, Default)]
pub struct ShapeCache {
    slots: Mutex<HashMap<CacheKey, Slot>>,
    materializations: AtomicU64,
    hits: AtomicU64,
}

impl ShapeCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached histogram for `key`, computing it with `compute` on
    /// first use. A failed computation leaves the slot empty.
    pub fn get_or_materialize(
        &self,
        key: CacheKey,
        compute: impl FnOnce() -> Result<Histogram>,
    ) -> Result<Histogram> {
        let slot = {
            let mut slots = self.slots.lock().map_err(|_| poisoned())?;
            Arc::clone(slots.entry(key).or_default())
        };
        let mut guard = slot.lock().map_err(|_| poisoned())?;
        if let Some(histogram) = guard.as_ref() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(histogram.clone());
        }
        let histogram = compute()?;
        *guard = Some(histogram.clone());
        self.materializations.fetch_add(1, Ordering::Relaxed);
        Ok(histogram)
    }

    /// Number of keys seen.
    pub fn len(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// True before the first lookup.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counters so far.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            materializations: self.materializations.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
        }
    }
}

fn poisoned() -> Error {
    Error::Production("shape cache poisoned".to_string())
}
