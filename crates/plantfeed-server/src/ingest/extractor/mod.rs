//! Record extraction from report files.
//!
//! `validate` turns raw bytes into a [`ParsedDocument`]; the batch and
//! aggregate extractors then read typed records out of it. Nothing in here
//! touches storage.

pub mod aggregates;
pub mod batch;
pub mod coerce;
pub mod filename;
pub mod xml;

use thiserror::Error;

pub use aggregates::{extract_aggregates, AggregateCounts};
pub use batch::extract_batch_events;
pub use filename::{derive_report_date, has_extension};
pub use xml::XmlElement;

use crate::ingest::error::IngestError;

/// Root tags a report file may carry.
pub const ACCEPTED_ROOTS: [&str; 2] = ["BatchLogs", "DailyXMLReport"];

/// Record-scoped rejection; the rest of the file is still processed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    #[error("missing required field '{0}'")]
    MissingRequiredField(&'static str),

    #[error("field '{field}' has unusable value '{value}'")]
    InvalidField { field: &'static str, value: String },
}

impl ExtractError {
    pub(crate) fn invalid(field: &'static str, value: &str) -> Self {
        Self::InvalidField {
            field,
            value: value.to_string(),
        }
    }
}

/// A report whose root tag has been checked.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub root: XmlElement,
}

impl ParsedDocument {
    pub fn root_tag(&self) -> &str {
        &self.root.name
    }
}

/// Parse `bytes` and require an accepted root tag.
pub fn validate(bytes: &[u8]) -> Result<ParsedDocument, IngestError> {
    let root = xml::parse_document(bytes).map_err(|e| IngestError::InvalidFormat(e.to_string()))?;

    if !ACCEPTED_ROOTS.contains(&root.name.as_str()) {
        return Err(IngestError::InvalidFormat(format!(
            "Expected root tag '{}' or '{}', found '{}'",
            ACCEPTED_ROOTS[0], ACCEPTED_ROOTS[1], root.name
        )));
    }

    Ok(ParsedDocument { root })
}
