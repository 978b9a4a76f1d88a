use serde::{Deserialize, Serialize};

/// Failure classes shared across the flow engines. Each typed error
/// reports one of these so callers can render and route failures
/// without matching on crate-specific enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Client-side structural validation failure. Never retried.
    Validation,
    /// Missing precondition (no security token). No attempt is made.
    Precondition,
    /// Per-attempt wall-clock bound expired. Retriable up to the limit.
    Timeout,
    /// Transport-level network failure. Retriable up to the limit.
    Transport,
    /// Remote endpoint refused or failed the request.
    Server,
    /// Durable store write failed; the external commit is never attempted.
    Store,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Validation => "validation",
            Self::Precondition => "precondition",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::Server => "server",
            Self::Store => "store",
        };
        f.write_str(label)
    }
}
