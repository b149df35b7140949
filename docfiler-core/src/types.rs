use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::sanitizer::sanitize;

// ===== PIPELINE ENTITIES =====
// Each value flows through exactly one stage at a time. Nothing here is shared
// between workers; shared state lives in the queue and the folder cache.

/// A filesystem notification the dispatcher decided to look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestEvent {
    pub path: PathBuf,
    pub observed_at: DateTime<Utc>,
}

impl IngestEvent {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            observed_at: Utc::now(),
        }
    }
}

/// A settled document waiting for (or claimed by) a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub path: PathBuf,
    pub enqueued_at: DateTime<Utc>,
    /// Move attempts made for this item so far
    pub attempt_count: u32,
}

impl WorkItem {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            enqueued_at: Utc::now(),
            attempt_count: 0,
        }
    }
}

/// The three regions read off page one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    OrderNumber,
    JobName,
    DealerName,
}

impl Field {
    pub const ALL: [Field; 3] = [Field::OrderNumber, Field::JobName, Field::DealerName];

    pub fn label(&self) -> &'static str {
        match self {
            Field::OrderNumber => "order_number",
            Field::JobName => "job_name",
            Field::DealerName => "dealer_name",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Raw OCR text, exactly as the engine returned it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub order_number: String,
    pub job_name: String,
    pub dealer_name: String,
}

impl ExtractedFields {
    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::OrderNumber => &self.order_number,
            Field::JobName => &self.job_name,
            Field::DealerName => &self.dealer_name,
        }
    }

    pub fn set(&mut self, field: Field, text: String) {
        match field {
            Field::OrderNumber => self.order_number = text,
            Field::JobName => self.job_name = text,
            Field::DealerName => self.dealer_name = text,
        }
    }

    pub fn sanitize(&self) -> SanitizedFields {
        SanitizedFields {
            order_number: sanitize(&self.order_number),
            job_name: sanitize(&self.job_name),
            dealer_name: sanitize(&self.dealer_name),
        }
    }
}

/// Filename-safe versions of the extracted fields. Any of them may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizedFields {
    pub order_number: String,
    pub job_name: String,
    pub dealer_name: String,
}

impl SanitizedFields {
    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::OrderNumber => &self.order_number,
            Field::JobName => &self.job_name,
            Field::DealerName => &self.dealer_name,
        }
    }

    /// Fields that came out empty; a non-empty result means extraction degraded.
    pub fn empty_fields(&self) -> Vec<Field> {
        Field::ALL
            .into_iter()
            .filter(|field| self.get(*field).is_empty())
            .collect()
    }
}

/// Where a document goes and what it will be called. Pure data; nothing has
/// touched the filesystem yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelocationPlan {
    pub new_file_name: String,
    pub destination_key: String,
    pub destination_folder: PathBuf,
    /// True when the name came from the original filename instead of OCR
    pub used_fallback_name: bool,
}

/// Final location of a relocated document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelocatedPath {
    pub path: PathBuf,
    pub attempts: u32,
    /// True when the move crossed volumes and went through copy-verify-delete
    pub used_copy: bool,
}

/// Everything `inspect` reports about a document without moving it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inspection {
    pub document: PathBuf,
    pub extracted: ExtractedFields,
    pub sanitized: SanitizedFields,
    pub plan: RelocationPlan,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_all_fields() {
        let extracted = ExtractedFields {
            order_number: "ORD-4521★\n".to_string(),
            job_name: "Cabinet Job #2".to_string(),
            dealer_name: "O'Brien & Sons".to_string(),
        };
        let sanitized = extracted.sanitize();
        assert_eq!(sanitized.order_number, "ORD-4521");
        assert_eq!(sanitized.job_name, "Cabinet Job 2");
        assert_eq!(sanitized.dealer_name, "OBrien Sons");
        assert!(sanitized.empty_fields().is_empty());
    }

    #[test]
    fn test_empty_fields_reported() {
        let extracted = ExtractedFields {
            order_number: "12".to_string(),
            job_name: "   ".to_string(),
            dealer_name: "★★".to_string(),
        };
        let sanitized = extracted.sanitize();
        assert_eq!(
            sanitized.empty_fields(),
            vec![Field::JobName, Field::DealerName]
        );
    }

    #[test]
    fn test_field_set_get() {
        let mut fields = ExtractedFields::default();
        fields.set(Field::DealerName, "Acme".to_string());
        assert_eq!(fields.get(Field::DealerName), "Acme");
        assert_eq!(fields.get(Field::OrderNumber), "");
    }
}
