use serde::{Deserialize, Serialize};

/// Describes what a reconciliation pass does with files that outlived the retention window.
///
/// Manual deletion is available under any policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExpiryPolicy {
    /// Expired files are deleted during the pass and never reach the result.
    ///
    /// Used by the slideshow.
    #[default]
    Enforce,

    /// Expired files are kept, flagged as expired and left for manual deletion.
    ///
    /// Used by the file manager.
    Retain,
}

impl ExpiryPolicy {
    /// Whether expired files are removed by the pass.
    pub fn deletes_expired(&self) -> bool {
        matches!(self, Self::Enforce)
    }
}

impl std::fmt::Display for ExpiryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match *self {
                Self::Enforce => "delete expired files",
                Self::Retain => "keep expired files for manual deletion",
            }
        )
    }
}
