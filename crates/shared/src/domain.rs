use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(OptionId);

/// Caller-supplied key for a durable store record. Doubles as the
/// idempotency key for repeated submission attempts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey(pub String);

impl RecordKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Half-open `[start, end)` character range of a filter match inside a title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRange {
    pub start: usize,
    pub end: usize,
}

/// One searchable record surfaced to the view layer. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionItem {
    pub id: OptionId,
    pub title: String,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_ranges: Option<Vec<MatchRange>>,
}

impl OptionItem {
    pub fn is_match_annotated(&self) -> bool {
        self.match_ranges.is_some()
    }
}

/// Internal progress of one submission attempt. Only ever advances
/// forward within an attempt; `WritingStore` is never re-entered once
/// `Committing` has begun.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionPhase {
    Idle,
    WritingStore,
    Committing,
    Success,
    Error,
}

impl SubmissionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Idle | Self::Success | Self::Error)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::WritingStore | Self::Committing)
    }
}

/// Coarse submission status consumed by the view layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Idle,
    Submitting,
    Success,
    Error,
}

impl From<SubmissionPhase> for SubmissionStatus {
    fn from(phase: SubmissionPhase) -> Self {
        match phase {
            SubmissionPhase::Idle => Self::Idle,
            SubmissionPhase::WritingStore | SubmissionPhase::Committing => Self::Submitting,
            SubmissionPhase::Success => Self::Success,
            SubmissionPhase::Error => Self::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_phases_map_to_submitting() {
        assert_eq!(
            SubmissionStatus::from(SubmissionPhase::WritingStore),
            SubmissionStatus::Submitting
        );
        assert_eq!(
            SubmissionStatus::from(SubmissionPhase::Committing),
            SubmissionStatus::Submitting
        );
        assert!(SubmissionPhase::Committing.is_in_flight());
        assert!(!SubmissionPhase::Error.is_in_flight());
    }
}
