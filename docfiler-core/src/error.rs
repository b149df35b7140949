//! Error taxonomy for the intake pipeline.
//!
//! `ConfigInvalid` is the only fatal variant and only ever surfaces at startup.
//! Every other variant is scoped to a single document: it ends that document's
//! run, leaves the original file where it was and is written to the parking
//! lot under the matching [`ParkReason`].
//!
//! An empty OCR field is not an error: it is handled by fallback naming and
//! logged as degraded extraction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilerError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("document unreadable: {}: {reason}", path.display())]
    DocumentUnreadable { path: PathBuf, reason: String },

    #[error("write did not settle within {waited_ms}ms: {}", path.display())]
    WriteTimedOut { path: PathBuf, waited_ms: u64 },

    #[error("relocation attempt {attempt} failed: {source}")]
    RelocationTransient {
        attempt: u32,
        #[source]
        source: io::Error,
    },

    #[error("relocation failed after {attempts} attempt(s): {}: {reason}", path.display())]
    RelocationFailed {
        path: PathBuf,
        attempts: u32,
        reason: String,
    },
}

impl FilerError {
    /// Reason code recorded when this error parks a document.
    ///
    /// `None` for errors that never reach the parking lot.
    pub fn park_reason(&self) -> Option<ParkReason> {
        match self {
            FilerError::ConfigInvalid(_) => None,
            FilerError::DocumentUnreadable { .. } => Some(ParkReason::DocumentUnreadable),
            FilerError::WriteTimedOut { .. } => Some(ParkReason::WriteTimedOut),
            FilerError::RelocationTransient { .. } | FilerError::RelocationFailed { .. } => {
                Some(ParkReason::RelocationFailed)
            }
        }
    }

    /// Number of attempts made before this error was raised.
    pub fn attempts(&self) -> u32 {
        match self {
            FilerError::RelocationTransient { attempt, .. } => *attempt,
            FilerError::RelocationFailed { attempts, .. } => *attempts,
            _ => 1,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, FilerError::RelocationTransient { .. })
    }
}

/// Stable reason codes written into parked records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParkReason {
    DocumentUnreadable,
    WriteTimedOut,
    RelocationFailed,
}

impl ParkReason {
    pub fn code(&self) -> &'static str {
        match self {
            ParkReason::DocumentUnreadable => "document_unreadable",
            ParkReason::WriteTimedOut => "write_timed_out",
            ParkReason::RelocationFailed => "relocation_failed",
        }
    }
}

impl fmt::Display for ParkReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

pub type FilerResult<T> = std::result::Result<T, FilerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_park_reason_mapping() {
        let unreadable = FilerError::DocumentUnreadable {
            path: PathBuf::from("/in/a.pdf"),
            reason: "no pages".to_string(),
        };
        assert_eq!(unreadable.park_reason(), Some(ParkReason::DocumentUnreadable));

        let timed_out = FilerError::WriteTimedOut {
            path: PathBuf::from("/in/a.pdf"),
            waited_ms: 1000,
        };
        assert_eq!(timed_out.park_reason(), Some(ParkReason::WriteTimedOut));

        assert_eq!(FilerError::ConfigInvalid("x".into()).park_reason(), None);
    }

    #[test]
    fn test_attempts_reported() {
        let failed = FilerError::RelocationFailed {
            path: PathBuf::from("/in/a.pdf"),
            attempts: 4,
            reason: "locked".to_string(),
        };
        assert_eq!(failed.attempts(), 4);
        assert!(!failed.is_transient());

        let transient = FilerError::RelocationTransient {
            attempt: 2,
            source: io::Error::new(io::ErrorKind::Other, "busy"),
        };
        assert_eq!(transient.attempts(), 2);
        assert!(transient.is_transient());
    }

    #[test]
    fn test_reason_serializes_as_code() {
        let json = serde_json::to_string(&ParkReason::WriteTimedOut).unwrap();
        assert_eq!(json, "\"write_timed_out\"");
        assert_eq!(ParkReason::RelocationFailed.to_string(), "relocation_failed");
    }
}
