use std::fmt::Write as _;
use std::io::{stdout, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tlm::lut::{self, LutTable};
use tlm::{Catalog, MissionConfig};

#[derive(Debug, Clone)]
pub enum Format {
    Json,
    Text,
}

impl clap::ValueEnum for Format {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Json, Self::Text]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Json => Some(clap::builder::PossibleValue::new("json")),
            Self::Text => Some(clap::builder::PossibleValue::new("text")),
        }
    }
}

#[derive(Debug, Serialize)]
struct ElementInfo {
    id: String,
    name: Option<String>,
    category: Option<String>,
    unit: Option<String>,
    /// Empty when the element has no positions in the active mode.
    triggers: Vec<String>,
}

fn describe(catalog: &Catalog, mission: &MissionConfig) -> Vec<ElementInfo> {
    catalog
        .elements()
        .iter()
        .map(|element| ElementInfo {
            id: element.id.clone(),
            name: element.name.clone(),
            category: element.category.clone(),
            unit: element.unit.clone(),
            triggers: element
                .positions
                .triggers(mission.mode)
                .map(|triggers| triggers.iter().map(ToString::to_string).collect())
                .unwrap_or_default(),
        })
        .collect()
}

pub fn elements(mission: &MissionConfig, catalog: &Path, format: &Format) -> Result<()> {
    let catalog = Catalog::from_path(catalog, mission)
        .with_context(|| format!("loading catalog from {catalog:?}"))?;
    let elements = describe(&catalog, mission);

    match format {
        Format::Json => {
            serde_json::to_writer_pretty(stdout(), &elements).context("serializing to json")
        }
        Format::Text => {
            let mut s = String::new();
            for element in &elements {
                let _ = writeln!(
                    s,
                    "{:<24} {:<32} {}",
                    element.id,
                    element.name.as_deref().unwrap_or_default(),
                    element.triggers.join(" ")
                );
            }
            stdout()
                .write_all(s.as_bytes())
                .context("writing to stdout")
        }
    }
}

#[derive(Debug, Serialize)]
struct SlotInfo {
    slot: usize,
    minor_frame_idx: usize,
    byte_offset: usize,
}

/// Minor frame and byte carrying each slot of `group`, in minor frame order.
fn slots(mission: &MissionConfig, group: &str) -> Result<Vec<SlotInfo>> {
    let group = mission
        .group(group)
        .ok_or_else(|| anyhow!("no sub-commutated group {group}"))?;
    let offsets: Vec<usize> = (0..group.length).collect();
    let table: LutTable = lut::subcom(
        &offsets,
        &group.columns,
        group.length,
        mission.cycle_length,
    )
    .context("mapping group")?;

    Ok(table
        .into_iter()
        .flat_map(|(minor_frame_idx, entries)| {
            entries.into_iter().map(move |entry| SlotInfo {
                slot: entry.offset,
                minor_frame_idx,
                byte_offset: entry.byte_offset,
            })
        })
        .collect())
}

pub fn subcom(mission: &MissionConfig, group: &str, format: &Format) -> Result<()> {
    let slots = slots(mission, group)?;

    match format {
        Format::Json => {
            serde_json::to_writer_pretty(stdout(), &slots).context("serializing to json")
        }
        Format::Text => {
            let mut s = String::from("slot  minor frame  byte\n");
            for slot in &slots {
                let _ = writeln!(
                    s,
                    "{:>4}  {:>11}  {:>4}",
                    slot.slot, slot.minor_frame_idx, slot.byte_offset
                );
            }
            stdout()
                .write_all(s.as_bytes())
                .context("writing to stdout")
        }
    }
}

pub fn mission(mission: &MissionConfig) -> Result<()> {
    let mut out = stdout().lock();
    serde_json::to_writer_pretty(&mut out, mission).context("serializing to json")?;
    writeln!(out).context("writing to stdout")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_slot_is_carried_each_cycle() {
        let mission = MissionConfig::default();
        let group = mission.groups[0].clone();

        let slots = slots(&mission, &group.key).unwrap();

        assert_eq!(slots.len(), mission.cycle_length * group.columns.len());
        assert_eq!(slots[0].slot, 0);
        assert_eq!(slots[0].minor_frame_idx, 0);
        assert_eq!(slots[0].byte_offset, group.columns[0]);
        for slot in 0..group.length {
            assert!(slots.iter().any(|s| s.slot == slot), "slot {slot} never carried");
        }
    }

    #[test]
    fn unknown_group() {
        assert!(slots(&MissionConfig::default(), "XX").is_err());
    }
}
