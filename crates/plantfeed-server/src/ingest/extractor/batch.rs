//! Batch event extraction from `BatchLog` elements.

use chrono::{DateTime, NaiveDateTime};

use super::coerce;
use super::xml::XmlElement;
use super::ExtractError;
use crate::ingest::models::{BatchEvent, SetPoint, MAX_HOT_BINS};

pub const BATCH_ELEMENT: &str = "BatchLog";

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
];

/// Every `BatchLog` below the root, each extracted independently so one bad
/// batch does not hide the others.
pub fn extract_batch_events(
    root: &XmlElement,
    source_file: &str,
) -> Vec<Result<BatchEvent, ExtractError>> {
    root.descendants_named(BATCH_ELEMENT)
        .into_iter()
        .map(|el| extract_batch(el, source_file))
        .collect()
}

pub fn extract_batch(el: &XmlElement, source_file: &str) -> Result<BatchEvent, ExtractError> {
    let batch_raw = required(el.find_text("BatchNo"), "BatchNo")?;
    let time_raw = coerce::text(el.find_text("Time"))
        .or_else(|| coerce::text(el.find_text("Timestamp")))
        .ok_or(ExtractError::MissingRequiredField("Time"))?;
    let job_raw = required(el.find_text("JobNo"), "JobNo")?;

    let batch_no = coerce::integer(Some(&batch_raw))
        .ok_or_else(|| ExtractError::invalid("BatchNo", &batch_raw))?;
    let job_no =
        coerce::integer(Some(&job_raw)).ok_or_else(|| ExtractError::invalid("JobNo", &job_raw))?;
    let event_time = parse_timestamp(&time_raw).ok_or_else(|| ExtractError::invalid("Time", &time_raw))?;

    let hot_bins = el
        .children_named("HotBin")
        .take(MAX_HOT_BINS)
        .map(set_point)
        .collect();

    Ok(BatchEvent {
        batch_no,
        event_time,
        job_no,
        recipe_no: coerce::integer_i32(el.find_text("RecipeNo")),
        recipe_name: coerce::text(el.find_text("RecipeName")),
        bitumen: el.child("Bitumen").map(set_point).unwrap_or_default(),
        filler: el.child("Filler").map(set_point).unwrap_or_default(),
        reclaim: el.child("Reclaim").map(set_point).unwrap_or_default(),
        temperature: el.child("Temperature").map(set_point).unwrap_or_default(),
        hot_bins,
        source_file: source_file.to_string(),
    })
}

fn required(raw: Option<&str>, field: &'static str) -> Result<String, ExtractError> {
    coerce::text(raw).ok_or(ExtractError::MissingRequiredField(field))
}

fn set_point(el: &XmlElement) -> SetPoint {
    SetPoint {
        actual: coerce::decimal(el.find_text("Actual")),
        target: coerce::decimal(el.find_text("Target")),
    }
}

/// ISO-8601 (with or without offset) or day-first local timestamps.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return Some(with_offset.naive_local());
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}
