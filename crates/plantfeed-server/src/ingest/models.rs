//! Ingestion domain models
//!
//! Extracted records (batch events and daily aggregates), the durable run and
//! outcome rows, and the transient checkpoint/recovery payloads kept in the
//! coordination store.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use plantfeed_common::types::{FileOutcomeStatus, RunStatus, TriggerSource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Batch events
// ============================================================================

/// Bins beyond this count in one batch are ignored.
pub const MAX_HOT_BINS: usize = 8;

/// Actual/target pair for one process variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetPoint {
    pub actual: Option<BigDecimal>,
    pub target: Option<BigDecimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchKey {
    pub batch_no: i64,
    pub event_time: NaiveDateTime,
    pub job_no: i64,
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch {} job {} at {}", self.batch_no, self.job_no, self.event_time)
    }
}

/// One mixing cycle, unique by `(batch_no, event_time, job_no)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEvent {
    pub batch_no: i64,
    pub event_time: NaiveDateTime,
    pub job_no: i64,
    pub recipe_no: Option<i32>,
    pub recipe_name: Option<String>,
    pub bitumen: SetPoint,
    pub filler: SetPoint,
    pub reclaim: SetPoint,
    pub temperature: SetPoint,
    /// At most [`MAX_HOT_BINS`] entries, bin 1 first
    pub hot_bins: Vec<SetPoint>,
    pub source_file: String,
}

impl BatchEvent {
    pub fn key(&self) -> BatchKey {
        BatchKey {
            batch_no: self.batch_no,
            event_time: self.event_time,
            job_no: self.job_no,
        }
    }

    /// Bin `n` (1-based), empty when the batch reported fewer bins.
    pub fn hot_bin(&self, n: usize) -> SetPoint {
        n.checked_sub(1)
            .and_then(|idx| self.hot_bins.get(idx))
            .cloned()
            .unwrap_or_default()
    }
}

/// Result of attempting to create a batch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchInsert {
    Inserted,
    Duplicate,
}

// ============================================================================
// Daily aggregates
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    Oee,
    RunTime,
    Recipe,
    Material,
}

impl AggregateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateKind::Oee => "oee",
            AggregateKind::RunTime => "run_time",
            AggregateKind::Recipe => "recipe",
            AggregateKind::Material => "material",
        }
    }
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Natural key of an aggregate row: the report date plus an optional
/// secondary key (recipe or material number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AggregateKey {
    pub kind: AggregateKind,
    pub date: NaiveDate,
    pub secondary: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OeeSummary {
    pub date: NaiveDate,
    pub total_production: Option<f64>,
    pub total_empty_out: Option<f64>,
    pub production_batches: Option<i32>,
    pub empty_out_batches: Option<i32>,
}

/// Equipment tracked in the daily run-time table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Equipment {
    MixingActive,
    Mixer,
    Screen,
    HotElevator,
    Dryer,
    BurnerFlameOn,
    SlingerForward,
    SlingerReverse,
    CollectConveyor,
    DustBlower,
    DustBlowerRotaryValve,
}

impl Equipment {
    pub const ALL: [Equipment; 11] = [
        Equipment::MixingActive,
        Equipment::Mixer,
        Equipment::Screen,
        Equipment::HotElevator,
        Equipment::Dryer,
        Equipment::BurnerFlameOn,
        Equipment::SlingerForward,
        Equipment::SlingerReverse,
        Equipment::CollectConveyor,
        Equipment::DustBlower,
        Equipment::DustBlowerRotaryValve,
    ];

    /// `ItemName` as written by the plant controller.
    pub fn item_name(&self) -> &'static str {
        match self {
            Equipment::MixingActive => "Mixing Active",
            Equipment::Mixer => "Mixer",
            Equipment::Screen => "Screen",
            Equipment::HotElevator => "Hot Elevator",
            Equipment::Dryer => "Dryer",
            Equipment::BurnerFlameOn => "Burner Flame On",
            Equipment::SlingerForward => "Slinger Forward",
            Equipment::SlingerReverse => "Slinger Reverse",
            Equipment::CollectConveyor => "Collect Conveyor",
            Equipment::DustBlower => "Dust Blower",
            Equipment::DustBlowerRotaryValve => "Dust Blower Rotary Valve",
        }
    }

    /// Column in `plant_run_time`.
    pub fn column(&self) -> &'static str {
        match self {
            Equipment::MixingActive => "mixing_active_secs",
            Equipment::Mixer => "mixer_secs",
            Equipment::Screen => "screen_secs",
            Equipment::HotElevator => "hot_elevator_secs",
            Equipment::Dryer => "dryer_secs",
            Equipment::BurnerFlameOn => "burner_flame_on_secs",
            Equipment::SlingerForward => "slinger_forward_secs",
            Equipment::SlingerReverse => "slinger_reverse_secs",
            Equipment::CollectConveyor => "collect_conveyor_secs",
            Equipment::DustBlower => "dust_blower_secs",
            Equipment::DustBlowerRotaryValve => "dust_blower_rotary_valve_secs",
        }
    }

    pub fn from_item_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.item_name() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTimeTable {
    pub date: NaiveDate,
    pub seconds: BTreeMap<Equipment, i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeTotal {
    pub date: NaiveDate,
    pub recipe_no: i32,
    pub recipe_name: Option<String>,
    pub total: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialTotal {
    pub date: NaiveDate,
    pub material_no: i32,
    pub name: Option<String>,
    pub quantity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregateRecord {
    Oee(OeeSummary),
    RunTime(RunTimeTable),
    Recipe(RecipeTotal),
    Material(MaterialTotal),
}

impl AggregateRecord {
    pub fn kind(&self) -> AggregateKind {
        match self {
            AggregateRecord::Oee(_) => AggregateKind::Oee,
            AggregateRecord::RunTime(_) => AggregateKind::RunTime,
            AggregateRecord::Recipe(_) => AggregateKind::Recipe,
            AggregateRecord::Material(_) => AggregateKind::Material,
        }
    }

    pub fn key(&self) -> AggregateKey {
        let (date, secondary) = match self {
            AggregateRecord::Oee(r) => (r.date, None),
            AggregateRecord::RunTime(r) => (r.date, None),
            AggregateRecord::Recipe(r) => (r.date, Some(r.recipe_no)),
            AggregateRecord::Material(r) => (r.date, Some(r.material_no)),
        };
        AggregateKey {
            kind: self.kind(),
            date,
            secondary,
        }
    }
}

// ============================================================================
// Durable run bookkeeping
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IngestionRun {
    pub id: Uuid,
    #[sqlx(try_from = "String")]
    pub status: RunStatus,
    #[sqlx(try_from = "String")]
    pub trigger_source: TriggerSource,
    pub schedule_id: Option<i64>,
    pub remote_path: String,
    pub total_files: i64,
    pub processed_files: i64,
    pub current_file: Option<String>,
    pub records_extracted: i64,
    pub attempt: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRun {
    pub id: Uuid,
    pub trigger_source: TriggerSource,
    pub schedule_id: Option<i64>,
    pub remote_path: String,
}

/// Counter snapshot written to the run row after every file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunProgress {
    pub total_files: i64,
    pub processed_files: i64,
    pub current_file: Option<String>,
    pub records_extracted: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FileOutcome {
    pub id: i64,
    pub file_name: String,
    pub file_type: String,
    pub remote_path: String,
    pub recorded_at: DateTime<Utc>,
    #[sqlx(try_from = "String")]
    pub status: FileOutcomeStatus,
    pub error_message: Option<String>,
    #[sqlx(try_from = "String")]
    pub trigger_source: TriggerSource,
    pub schedule_id: Option<i64>,
    pub run_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewFileOutcome {
    pub file_name: String,
    pub file_type: String,
    pub remote_path: String,
    pub status: FileOutcomeStatus,
    pub error_message: Option<String>,
    pub trigger_source: TriggerSource,
    pub schedule_id: Option<i64>,
    pub run_id: Option<Uuid>,
}

/// Filters for listing file outcomes, newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutcomeFilter {
    pub status: Option<FileOutcomeStatus>,
    pub trigger_source: Option<TriggerSource>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub run_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl OutcomeFilter {
    pub const DEFAULT_LIMIT: i64 = 100;
    pub const MAX_LIMIT: i64 = 1000;

    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    pub fn matches(&self, outcome: &FileOutcome) -> bool {
        self.status.map_or(true, |s| outcome.status == s)
            && self.trigger_source.map_or(true, |t| outcome.trigger_source == t)
            && self.from.map_or(true, |from| outcome.recorded_at >= from)
            && self.to.map_or(true, |to| outcome.recorded_at <= to)
            && self.run_id.map_or(true, |id| outcome.run_id == Some(id))
    }
}

/// Externally managed schedule; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScheduleDefinition {
    pub id: i64,
    pub name: String,
    pub remote_path: String,
    pub cadence: String,
    pub is_active: bool,
}

// ============================================================================
// Transient state (coordination store)
// ============================================================================

/// Everything needed to resume a run without reprocessing finished files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_processed_file: Option<String>,
    pub processed_count: i64,
    pub remaining_files: Vec<String>,
    pub records_extracted: i64,
}

impl Checkpoint {
    /// Total files this run is responsible for, counting already finished ones.
    pub fn total_files(&self) -> i64 {
        self.processed_count + self.remaining_files.len() as i64
    }
}

/// Snapshot stored when the recovery monitor marks a run interrupted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverySnapshot {
    pub run_id: Uuid,
    pub last_file: Option<String>,
    /// `success` outcomes recorded by the run
    pub processed_files: i64,
    pub total_files: i64,
    /// Files still to do, when a checkpoint survived
    pub remaining_files: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

impl RecoverySnapshot {
    /// Checkpoint to resume from. `None` when nothing is known to remain.
    pub fn to_checkpoint(&self) -> Option<Checkpoint> {
        if self.remaining_files.is_empty() {
            return None;
        }
        Some(Checkpoint {
            last_processed_file: self.last_file.clone(),
            processed_count: self.total_files - self.remaining_files.len() as i64,
            remaining_files: self.remaining_files.clone(),
            records_extracted: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 7, 31).unwrap()
    }

    #[test]
    fn test_equipment_lookup_by_item_name() {
        assert_eq!(Equipment::from_item_name("Hot Elevator"), Some(Equipment::HotElevator));
        assert_eq!(
            Equipment::from_item_name("Dust Blower Rotary Valve"),
            Some(Equipment::DustBlowerRotaryValve)
        );
        assert_eq!(Equipment::from_item_name("hot elevator"), None);
        assert_eq!(Equipment::from_item_name("Conveyor Belt"), None);
    }

    #[test]
    fn test_aggregate_keys() {
        let recipe = AggregateRecord::Recipe(RecipeTotal {
            date: day(),
            recipe_no: 7,
            recipe_name: None,
            total: None,
        });
        assert_eq!(recipe.key().secondary, Some(7));
        assert_eq!(recipe.kind(), AggregateKind::Recipe);

        let oee = AggregateRecord::Oee(OeeSummary {
            date: day(),
            total_production: None,
            total_empty_out: None,
            production_batches: None,
            empty_out_batches: None,
        });
        assert_eq!(oee.key().secondary, None);
    }

    #[test]
    fn test_hot_bin_out_of_range_is_empty() {
        let event = BatchEvent {
            batch_no: 1,
            event_time: day().and_hms_opt(8, 0, 0).unwrap(),
            job_no: 1,
            recipe_no: None,
            recipe_name: None,
            bitumen: SetPoint::default(),
            filler: SetPoint::default(),
            reclaim: SetPoint::default(),
            temperature: SetPoint::default(),
            hot_bins: vec![SetPoint {
                actual: Some(BigDecimal::from(3)),
                target: None,
            }],
            source_file: "R_310723.xml".into(),
        };
        assert_eq!(event.hot_bin(1).actual, Some(BigDecimal::from(3)));
        assert_eq!(event.hot_bin(2), SetPoint::default());
        assert_eq!(event.hot_bin(0), SetPoint::default());
    }

    #[test]
    fn test_checkpoint_total() {
        let cp = Checkpoint {
            last_processed_file: Some("A_010124.xml".into()),
            processed_count: 1,
            remaining_files: vec!["B_020124.xml".into(), "C_030124.xml".into()],
            records_extracted: 4,
        };
        assert_eq!(cp.total_files(), 3);
    }

    #[test]
    fn test_recovery_snapshot_without_remaining_files_is_not_resumable() {
        let snapshot = RecoverySnapshot {
            run_id: Uuid::nil(),
            last_file: None,
            processed_files: 0,
            total_files: 0,
            remaining_files: vec![],
            recorded_at: Utc::now(),
        };
        assert!(snapshot.to_checkpoint().is_none());
    }

    #[test]
    fn test_outcome_filter_limit_is_clamped() {
        let filter = OutcomeFilter {
            limit: Some(50_000),
            offset: Some(-3),
            ..Default::default()
        };
        assert_eq!(filter.limit(), 1000);
        assert_eq!(filter.offset(), 0);
        assert_eq!(OutcomeFilter::default().limit(), 100);
    }
}
