/*!
 * Execution Identifiers
 * Type-safe ids from a lock-free atomic generator
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of one scheduled execution (64-bit, never recycled).
///
/// Handles carry only the id across threads; the state it names lives on the
/// owning context thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecId(pub u64);

impl fmt::Display for ExecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lock-free id counter shared by every context in the process
///
/// # Performance
/// - Cache-line aligned to prevent false sharing
/// - Relaxed ordering is enough: ids only need uniqueness, not ordering
#[repr(C, align(64))]
pub struct AtomicGenerator {
    counter: AtomicU64,
}

impl AtomicGenerator {
    pub const fn new(start: u64) -> Self {
        Self {
            counter: AtomicU64::new(start),
        }
    }

    /// Generate next id
    pub fn next(&self) -> ExecId {
        ExecId(self.counter.fetch_add(1, Ordering::Relaxed))
    }

    /// Get current counter value (for debugging)
    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

static EXEC_IDS: AtomicGenerator = AtomicGenerator::new(1);

/// Next process-wide execution id
pub(crate) fn next_exec_id() -> ExecId {
    EXEC_IDS.next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = next_exec_id();
        let b = next_exec_id();
        assert!(b.0 > a.0);
    }

    #[test]
    fn generator_starts_where_told() {
        let generator = AtomicGenerator::new(42);
        assert_eq!(generator.next(), ExecId(42));
        assert_eq!(generator.next(), ExecId(43));
        assert_eq!(generator.current(), 44);
    }

    #[test]
    fn display_is_bare_number() {
        assert_eq!(ExecId(7).to_string(), "7");
    }
}
