//! Sequential id generation shared by the in-memory and file-backed bead
//! providers (spec.md §4.1: ids are opaque strings, monotone per-store).

use std::sync::atomic::{AtomicU64, Ordering};

/// Generates opaque, monotonically increasing ids of the form `<prefix>-N`.
///
/// Shared between the memory and file bead providers so a freshly created
/// bead never collides with one already on disk or in memory, even across
/// restarts when seeded from the highest id already observed.
#[derive(Debug)]
pub struct SeqIdGen {
    prefix: &'static str,
    next: AtomicU64,
}

impl SeqIdGen {
    /// Create a generator that starts counting from 1.
    pub fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            next: AtomicU64::new(1),
        }
    }

    /// Create a generator seeded to continue after the highest numeric
    /// suffix already present among `existing_ids` (ids that don't match
    /// `<prefix>-N` are ignored).
    pub fn seeded(prefix: &'static str, existing_ids: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        let gen = Self::new(prefix);
        let max = existing_ids
            .into_iter()
            .filter_map(|id| gen.parse_suffix(id.as_ref()))
            .max()
            .unwrap_or(0);
        gen.next.store(max + 1, Ordering::SeqCst);
        gen
    }

    fn parse_suffix(&self, id: &str) -> Option<u64> {
        id.strip_prefix(self.prefix)
            .and_then(|rest| rest.strip_prefix('-'))
            .and_then(|n| n.parse().ok())
    }

    /// Allocate the next id.
    pub fn next(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        format!("{}-{n}", self.prefix)
    }

    /// The numeric suffix `next()` would assign right now, without
    /// allocating it.
    pub fn peek_next(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}
