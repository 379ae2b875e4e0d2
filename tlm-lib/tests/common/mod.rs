#![allow(dead_code)]

use tlm::catalog::CatalogDef;
use tlm::framing::{Buffer, Flags};
use tlm::{Catalog, MissionConfig};

pub const SYNC: [u8; 5] = [0x12, 0xfc, 0x81, 0x9f, 0xbe];

/// Minor frame `idx` of the reference mission.
///
/// The counter holds `idx`, the sync pattern closes the frame, and every sub-commutation
/// column carries the logical slot it holds in this minor frame. All other bytes are `0xee`.
pub fn frame(mission: &MissionConfig, idx: usize) -> Vec<u8> {
    let mut dat = vec![0xee; mission.frame_length];
    for group in &mission.groups {
        let width = group.columns.len();
        for (k, column) in group.columns.iter().enumerate() {
            let slot = (idx * width + k) % group.length;
            dat[*column] = u8::try_from(slot).unwrap();
        }
    }
    dat[mission.counter_offset] = u8::try_from(idx % mission.cycle_length).unwrap();
    let sync_start = mission.frame_length - SYNC.len();
    dat[sync_start..].copy_from_slice(&SYNC);
    dat
}

/// One buffer per minor frame, the first flagged as the start of the stream.
pub fn buffers(mission: &MissionConfig, indices: impl IntoIterator<Item = usize>) -> Vec<Buffer> {
    indices
        .into_iter()
        .enumerate()
        .map(|(i, idx)| {
            let flags = Flags {
                first: i == 0,
                ..Flags::default()
            };
            Buffer::new(frame(mission, idx)).with_flags(flags)
        })
        .collect()
}

/// Tagged symbols carrying `frames`, starting with the tag that acquires sync.
pub fn symbols(frames: &[Vec<u8>]) -> Vec<u8> {
    let mut symbols = vec![0x2, 0x0];
    for frame in frames {
        let bits = frame.len() * 8;
        for i in 0..bits {
            let bit = (frame[i / 8] >> (7 - i % 8)) & 1;
            symbols.push(if i == bits - 1 { 0x2 } else { 0x0 });
            symbols.push(1 - bit);
        }
    }
    symbols
}

pub const CATALOG: &str = r#"{
    "curves": {"volts": [[0, 0], [64, 32]]},
    "elements": [
        {"id": "FRMCNT", "name": "Frame counter", "positions": {"kind": "bytes", "offsets": [60]}},
        {"id": "cmd_ctr_b", "positions": {"kind": "subcom_bytes", "group": "DS", "offsets": [20]}},
        {
            "id": "spin_rate",
            "unit": "rpm",
            "positions": {"kind": "subcom_bytes", "group": "DS", "offsets": [[34, 35]]},
            "parser": {"kind": "spin_rate"}
        },
        {
            "id": "hps_1_sector_width",
            "positions": {"kind": "subcom_bits", "group": "DS", "offsets": [[102, 103]]},
            "formatter": {"kind": "options", "labels": ["invalid", "45 deg", "22.5 deg", "360 deg"]}
        },
        {
            "id": "28v_bus",
            "unit": "V",
            "calibration": "volts",
            "positions": {"kind": "subcom_bytes", "group": "AS2", "offsets": [43]}
        },
        {
            "id": "hps_1_lv_a",
            "positions": {"kind": "bytes", "offsets": [61]},
            "parser": {"kind": "fixed_word", "word": 2}
        }
    ]
}"#;

pub fn catalog(mission: &MissionConfig) -> Catalog {
    let def: CatalogDef = serde_json::from_str(CATALOG).unwrap();
    Catalog::from_def(def, mission).unwrap()
}
