//! Scan outcomes

use std::fmt;

use chrono::{DateTime, Utc};

/// A recognized fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Library slot of the matching template
    pub id: u16,

    /// Match score reported by the module
    pub confidence: u16,

    /// Display name from the name registry
    pub name: String,

    /// When the match was reported
    pub matched_at: DateTime<Utc>,
}

impl Match {
    pub fn new(id: u16, confidence: u16, name: impl Into<String>) -> Self {
        Self {
            id,
            confidence,
            name: name.into(),
            matched_at: Utc::now(),
        }
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Match[id: {}, name: {}, confidence: {}]",
            self.id, self.name, self.confidence
        )
    }
}

/// Result of one scan engine tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Nothing to report
    NoFinger,

    /// Finger recognized
    Match(Match),

    /// Touched but not recognized: a doorbell ring
    NoMatch,

    /// The cycle was aborted
    Error,
}

impl ScanOutcome {
    /// Check if this outcome ends a scan cycle
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::NoFinger)
    }

    /// Check if this outcome should ring the bell
    pub fn is_ring(&self) -> bool {
        matches!(self, Self::NoMatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_classes() {
        assert!(!ScanOutcome::NoFinger.is_terminal());
        assert!(ScanOutcome::NoMatch.is_terminal());
        assert!(ScanOutcome::NoMatch.is_ring());
        assert!(!ScanOutcome::Match(Match::new(1, 80, "Alice")).is_ring());
    }

    #[test]
    fn test_match_display() {
        let m = Match::new(4, 120, "Bob");
        assert_eq!(m.to_string(), "Match[id: 4, name: Bob, confidence: 120]");
    }
}
