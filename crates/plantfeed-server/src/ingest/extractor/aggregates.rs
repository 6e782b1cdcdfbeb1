//! Daily aggregate extraction.
//!
//! Four independent sub-trees, each optional:
//! `OEEPerformance`, `PlantRunTime/RunTime`, `RecipeTotals/RecipeTotal` and
//! `MaterialTotals/*`.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::debug;

use super::coerce;
use super::xml::XmlElement;
use crate::ingest::models::{
    AggregateKind, AggregateRecord, Equipment, MaterialTotal, OeeSummary, RecipeTotal,
    RunTimeTable,
};

/// Newly created rows per aggregate kind for one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateCounts {
    pub oee: u32,
    pub run_time: u32,
    pub recipes: u32,
    pub materials: u32,
}

impl AggregateCounts {
    pub fn add(&mut self, kind: AggregateKind, created: u32) {
        match kind {
            AggregateKind::Oee => self.oee += created,
            AggregateKind::RunTime => self.run_time += created,
            AggregateKind::Recipe => self.recipes += created,
            AggregateKind::Material => self.materials += created,
        }
    }

    pub fn total(&self) -> u32 {
        self.oee + self.run_time + self.recipes + self.materials
    }
}

/// All aggregate records found in `root`, dated `date`.
pub fn extract_aggregates(root: &XmlElement, date: NaiveDate) -> Vec<AggregateRecord> {
    let mut records = Vec::new();
    if let Some(oee) = extract_oee(root, date) {
        records.push(AggregateRecord::Oee(oee));
    }
    if let Some(run_time) = extract_run_time(root, date) {
        records.push(AggregateRecord::RunTime(run_time));
    }
    records.extend(extract_recipes(root, date).into_iter().map(AggregateRecord::Recipe));
    records.extend(extract_materials(root, date).into_iter().map(AggregateRecord::Material));
    records
}

/// `OEEPerformance` directly under the root. An element without children
/// counts as absent.
pub fn extract_oee(root: &XmlElement, date: NaiveDate) -> Option<OeeSummary> {
    let perf = root.child("OEEPerformance").filter(|el| el.has_children())?;
    Some(OeeSummary {
        date,
        total_production: coerce::float(perf.find_text("TotalProduction")),
        total_empty_out: coerce::float(perf.find_text("TotalEmptyOut")),
        production_batches: coerce::integer_i32(perf.find_text("ProductionBatches")),
        empty_out_batches: coerce::integer_i32(perf.find_text("EmptyOutBatches")),
    })
}

/// Run-time table; `None` when no known equipment is listed.
pub fn extract_run_time(root: &XmlElement, date: NaiveDate) -> Option<RunTimeTable> {
    let mut seconds = BTreeMap::new();
    for table in root.descendants_named("PlantRunTime") {
        for entry in table.children_named("RunTime") {
            let item = entry.find_text("ItemName").map(str::trim).unwrap_or_default();
            match Equipment::from_item_name(item) {
                Some(equipment) => {
                    seconds.insert(equipment, coerce::duration_secs(entry.find_text("RunningTime")));
                },
                None => debug!(item = %item, "Ignoring unknown run-time item"),
            }
        }
    }
    (!seconds.is_empty()).then_some(RunTimeTable { date, seconds })
}

/// Recipe totals with a usable recipe number.
pub fn extract_recipes(root: &XmlElement, date: NaiveDate) -> Vec<RecipeTotal> {
    root.descendants_named("RecipeTotals")
        .into_iter()
        .flat_map(|table| table.children_named("RecipeTotal"))
        .filter_map(|recipe| {
            let recipe_no = coerce::integer_i32(recipe.find_text("RecipeNo"))?;
            Some(RecipeTotal {
                date,
                recipe_no,
                recipe_name: coerce::text(recipe.find_text("RecipeName")),
                total: coerce::float(recipe.find_text("Total")),
            })
        })
        .collect()
}

/// Every child of `MaterialTotals`, whatever its tag, that carries a usable
/// material number.
pub fn extract_materials(root: &XmlElement, date: NaiveDate) -> Vec<MaterialTotal> {
    root.descendants_named("MaterialTotals")
        .into_iter()
        .flat_map(|table| table.children.iter())
        .filter_map(|material| {
            let material_no = coerce::integer_i32(material.find_text("MaterialNo"))?;
            Some(MaterialTotal {
                date,
                material_no,
                name: coerce::text(material.find_text("Name")),
                quantity: coerce::float(material.find_text("Quantity")),
            })
        })
        .collect()
}
