//! Per-URL crawl state and the CAS witness persisted alongside it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a single book URL.
///
/// Transitions are monotonic: `NotCrawled -> BeingCrawled -> Crawled -> Linked`.
/// `Crawled` and `Linked` additionally permit a self-transition ("touch")
/// whose only effect is advancing the change timestamp, which is how a
/// worker claims an already-visited vertex for the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(i64)]
pub enum CrawlState {
    NotCrawled = 0,
    BeingCrawled = 1,
    Crawled = 2,
    Linked = 3,
}

impl CrawlState {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(CrawlState::NotCrawled),
            1 => Some(CrawlState::BeingCrawled),
            2 => Some(CrawlState::Crawled),
            3 => Some(CrawlState::Linked),
            _ => None,
        }
    }
}

impl std::fmt::Display for CrawlState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CrawlState::NotCrawled => "not-crawled",
            CrawlState::BeingCrawled => "being-crawled",
            CrawlState::Crawled => "crawled",
            CrawlState::Linked => "linked",
        };
        write!(f, "{}", name)
    }
}

/// The `(state, when)` pair persisted per URL.
///
/// `when` is set by the storage layer at every successful transition and
/// doubles as the CAS witness: a transition succeeds only when the stored
/// pair equals the caller's copy by both fields. The timestamp component is
/// what lets a resumed run tell "linked in a previous run" apart from
/// "linked moments ago by a sibling worker".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub state: CrawlState,
    pub when: DateTime<Utc>,
}

impl Default for StateChange {
    /// The zero value reported for URLs absent from storage.
    fn default() -> Self {
        StateChange {
            state: CrawlState::NotCrawled,
            when: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_are_ordered() {
        assert!(CrawlState::NotCrawled < CrawlState::BeingCrawled);
        assert!(CrawlState::BeingCrawled < CrawlState::Crawled);
        assert!(CrawlState::Crawled < CrawlState::Linked);
    }

    #[test]
    fn test_i64_round_trip() {
        for state in [
            CrawlState::NotCrawled,
            CrawlState::BeingCrawled,
            CrawlState::Crawled,
            CrawlState::Linked,
        ] {
            assert_eq!(CrawlState::from_i64(state as i64), Some(state));
        }
        assert_eq!(CrawlState::from_i64(4), None);
        assert_eq!(CrawlState::from_i64(-1), None);
    }

    #[test]
    fn test_zero_value() {
        let zero = StateChange::default();
        assert_eq!(zero.state, CrawlState::NotCrawled);
        assert_eq!(zero.when, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_witness_compares_both_fields() {
        let a = StateChange {
            state: CrawlState::Crawled,
            when: Utc::now(),
        };
        let b = StateChange {
            state: CrawlState::Crawled,
            when: a.when + chrono::Duration::nanoseconds(1),
        };
        assert_ne!(a, b);
    }
}
