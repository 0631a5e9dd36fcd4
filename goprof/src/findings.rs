//! Severity, confidence and profile-kind vocabulary shared by every detector.
//!
//! Severity and confidence are derived from their inputs by the functions in
//! this module and are never tracked separately from the numbers they come
//! from.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Share of a profile at which a finding becomes `medium`.
pub const MEDIUM_SEVERITY_PERCENT: f64 = 5.0;

/// Share of a profile at which a finding becomes `high`.
pub const HIGH_SEVERITY_PERCENT: f64 = 15.0;

/// How much a finding matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// `<5%` low, `5–15%` medium, `≥15%` high.
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage >= HIGH_SEVERITY_PERCENT {
            Severity::High
        } else if percentage >= MEDIUM_SEVERITY_PERCENT {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How sure a detector is about an inferred finding.
///
/// Variants are declared weakest first so the derived ordering is
/// `possible < suspected < likely < confirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Possible,
    Suspected,
    Likely,
    Confirmed,
}

impl Confidence {
    /// Raise to `other` if it is stronger. Never lowers.
    pub fn upgrade_to(&mut self, other: Confidence) {
        if other > *self {
            *self = other;
        }
    }

    /// The next tier up, saturating at `confirmed`.
    pub fn next(self) -> Self {
        match self {
            Confidence::Possible => Confidence::Suspected,
            Confidence::Suspected => Confidence::Likely,
            Confidence::Likely | Confidence::Confirmed => Confidence::Confirmed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Possible => "possible",
            Confidence::Suspected => "suspected",
            Confidence::Likely => "likely",
            Confidence::Confirmed => "confirmed",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a profile measures, inferred from its sample types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    Cpu,
    Heap,
    Mutex,
    Goroutine,
    Unknown,
}

impl ProfileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileKind::Cpu => "cpu",
            ProfileKind::Heap => "heap",
            ProfileKind::Mutex => "mutex",
            ProfileKind::Goroutine => "goroutine",
            ProfileKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Percentage of `part` in `total`, or 0 when `total` is not positive.
pub fn percentage(part: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    part as f64 / total as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_thresholds() {
        assert_eq!(Severity::from_percentage(0.0), Severity::Low);
        assert_eq!(Severity::from_percentage(4.99), Severity::Low);
        assert_eq!(Severity::from_percentage(5.0), Severity::Medium);
        assert_eq!(Severity::from_percentage(14.99), Severity::Medium);
        assert_eq!(Severity::from_percentage(15.0), Severity::High);
        assert_eq!(Severity::from_percentage(100.0), Severity::High);
    }

    #[test]
    fn confidence_is_ordered() {
        assert!(Confidence::Possible < Confidence::Suspected);
        assert!(Confidence::Suspected < Confidence::Likely);
        assert!(Confidence::Likely < Confidence::Confirmed);
    }

    #[test]
    fn confidence_never_downgrades() {
        let mut confidence = Confidence::Likely;
        confidence.upgrade_to(Confidence::Possible);
        assert_eq!(confidence, Confidence::Likely);
        confidence.upgrade_to(Confidence::Confirmed);
        assert_eq!(confidence, Confidence::Confirmed);
    }

    #[test]
    fn serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_string(&Confidence::Suspected).unwrap(),
            "\"suspected\""
        );
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "\"high\"");
        assert_eq!(
            serde_json::to_string(&ProfileKind::Goroutine).unwrap(),
            "\"goroutine\""
        );
    }

    #[test]
    fn percentage_of_zero_total_is_zero() {
        assert_eq!(percentage(10, 0), 0.0);
        assert_eq!(percentage(25, 100), 25.0);
    }
}
