//! Phase of a chunked sync run.

use serde::{Deserialize, Serialize};

/// Represents where a run is in its lifecycle.
///
/// ```text
/// Start ──(first chunk, cursor returned)──▶ InProgress ──(empty cursor)──▶ Complete
///   └──────────────(single-page source, empty cursor)─────────────────────────▲
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// No chunk has run yet; the cursor is empty
    Start,

    /// At least one chunk ran and the source returned a continuation cursor
    InProgress,

    /// The source returned no cursor; counters are final
    Complete,
}

impl RunPhase {
    pub fn as_str(&self) -> &str {
        match self {
            RunPhase::Start => "start",
            RunPhase::InProgress => "in_progress",
            RunPhase::Complete => "complete",
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
