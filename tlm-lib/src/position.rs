//! Position specifications.
//!
//! A position specification tells an element which trigger(s) it fires on and, for each
//! trigger, which bytes or bits of the namespace's frame make up its raw value. Offsets may be
//! given singly or as groups; a group is read together and fires on its largest offset, which
//! is the last of its bytes to arrive.
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::Mode;
use crate::lut::LutTable;
use crate::trigger::{Namespace, Trigger};
use crate::{Error, Result};

/// A single offset or a group of offsets read together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Offset {
    Single(usize),
    Group(Vec<usize>),
}

impl Offset {
    #[must_use]
    pub fn offsets(&self) -> &[usize] {
        match self {
            Offset::Single(o) => std::slice::from_ref(o),
            Offset::Group(offsets) => offsets,
        }
    }
}

impl From<usize> for Offset {
    fn from(value: usize) -> Self {
        Offset::Single(value)
    }
}

impl From<Vec<usize>> for Offset {
    fn from(value: Vec<usize>) -> Self {
        Offset::Group(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Granularity {
    Byte,
    Bit,
}

/// How to read one trigger's raw value.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Recipe {
    /// Byte offsets into the frame.
    bytes: Vec<usize>,
    /// Offsets as declared: bit offsets for bit granularity, group offsets for lookup tables.
    declared: Vec<usize>,
}

/// Trigger to recipe mapping in a single namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetSpec {
    namespace: Namespace,
    granularity: Granularity,
    triggers: Vec<Trigger>,
    recipes: HashMap<Trigger, Recipe>,
}

impl OffsetSpec {
    /// Minor-frame bytes, read from every minor frame.
    ///
    /// # Errors
    /// [Error::DuplicateTrigger] if two offsets fire on the same byte.
    pub fn bytes(offsets: &[Offset]) -> Result<Self> {
        Self::build(Namespace::MinorFrame, Granularity::Byte, offsets)
    }

    /// Minor-frame bits, read from every minor frame.
    ///
    /// # Errors
    /// [Error::DuplicateTrigger] if two offsets fire on the same byte.
    pub fn bits(offsets: &[Offset]) -> Result<Self> {
        Self::build(Namespace::MinorFrame, Granularity::Bit, offsets)
    }

    /// Bytes of a sub-commutated group's logical frame.
    ///
    /// # Errors
    /// [Error::DuplicateTrigger] if two offsets fire on the same byte.
    pub fn subcom_bytes(group: &str, offsets: &[Offset]) -> Result<Self> {
        Self::build(
            Namespace::Subcom(group.to_string()),
            Granularity::Byte,
            offsets,
        )
    }

    /// Bits of a sub-commutated group's logical frame.
    ///
    /// # Errors
    /// [Error::DuplicateTrigger] if two offsets fire on the same byte.
    pub fn subcom_bits(group: &str, offsets: &[Offset]) -> Result<Self> {
        Self::build(
            Namespace::Subcom(group.to_string()),
            Granularity::Bit,
            offsets,
        )
    }

    /// Minor-frame bytes chosen per minor frame by a lookup table.
    ///
    /// # Errors
    /// [Error::DuplicateTrigger] if the table reads the same byte of a minor frame twice.
    pub fn lut(table: &LutTable) -> Result<Self> {
        let mut spec = OffsetSpec::empty(Namespace::MinorFrame, Granularity::Byte);
        for (&minor_frame_idx, entries) in table {
            for entry in entries {
                spec.insert(
                    Trigger::minor_frame(minor_frame_idx, entry.byte_offset),
                    Recipe {
                        bytes: vec![entry.byte_offset],
                        declared: vec![entry.offset],
                    },
                )?;
            }
        }
        Ok(spec)
    }

    fn empty(namespace: Namespace, granularity: Granularity) -> Self {
        OffsetSpec {
            namespace,
            granularity,
            triggers: Vec::default(),
            recipes: HashMap::default(),
        }
    }

    fn build(namespace: Namespace, granularity: Granularity, offsets: &[Offset]) -> Result<Self> {
        let mut spec = OffsetSpec::empty(namespace, granularity);
        for offset in offsets {
            let declared = offset.offsets().to_vec();
            let bytes: Vec<usize> = match granularity {
                Granularity::Byte => declared.clone(),
                Granularity::Bit => declared.iter().map(|o| o / 8).collect(),
            };
            let Some(&last) = bytes.iter().max() else {
                return Err(Error::Config("empty offset group".to_string()));
            };
            let trigger = match &spec.namespace {
                Namespace::MinorFrame => Trigger::every_minor_frame(last),
                Namespace::Subcom(group) => Trigger::subcom(group, last),
            };
            spec.insert(trigger, Recipe { bytes, declared })?;
        }
        Ok(spec)
    }

    fn insert(&mut self, trigger: Trigger, recipe: Recipe) -> Result<()> {
        if self.recipes.contains_key(&trigger) {
            return Err(Error::DuplicateTrigger(trigger.to_string()));
        }
        self.triggers.push(trigger.clone());
        self.recipes.insert(trigger, recipe);
        Ok(())
    }

    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    #[must_use]
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Triggers in declaration order.
    #[must_use]
    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    fn recipe(&self, trigger: &Trigger) -> Result<&Recipe> {
        self.recipes
            .get(trigger)
            .or_else(|| trigger.wildcard().and_then(|w| self.recipes.get(&w)))
            .ok_or_else(|| Error::Extraction(format!("{trigger} is not a trigger of this element")))
    }

    /// Read the raw value for `trigger` from `data`, the namespace's frame.
    ///
    /// Bit granularity yields one `0`/`1` entry per declared bit, most significant first.
    ///
    /// # Errors
    /// [Error::Extraction] if `trigger` is not one of ours, a byte lies beyond `data`, or a
    /// bit recipe was wired to the wrong byte.
    pub fn collect(&self, trigger: &Trigger, data: &[u8]) -> Result<Vec<u8>> {
        let recipe = self.recipe(trigger)?;
        let byte = |i: usize| {
            data.get(i).copied().ok_or_else(|| {
                Error::Extraction(format!(
                    "{trigger} reads byte {i} of a {} byte frame",
                    data.len()
                ))
            })
        };
        match self.granularity {
            Granularity::Byte => recipe.bytes.iter().map(|&i| byte(i)).collect(),
            Granularity::Bit => recipe
                .bytes
                .iter()
                .zip(&recipe.declared)
                .map(|(&i, &bit)| {
                    if bit / 8 != i {
                        return Err(Error::Extraction(format!(
                            "bit {bit} is not in byte {i}"
                        )));
                    }
                    Ok((byte(i)? >> (7 - bit % 8)) & 1)
                })
                .collect(),
        }
    }

    /// Write a raw value for `trigger` into `data`; the inverse of [Self::collect].
    ///
    /// # Errors
    /// [Error::Extraction] if `trigger` is not one of ours, `raw` has the wrong length, or a
    /// byte lies beyond `data`.
    pub fn encode(&self, trigger: &Trigger, raw: &[u8], data: &mut [u8]) -> Result<()> {
        let recipe = self.recipe(trigger)?;
        if raw.len() != recipe.bytes.len() {
            return Err(Error::Extraction(format!(
                "{trigger} expects {} raw values, got {}",
                recipe.bytes.len(),
                raw.len()
            )));
        }
        let len = data.len();
        for (n, &i) in recipe.bytes.iter().enumerate() {
            let dest = data.get_mut(i).ok_or_else(|| {
                Error::Extraction(format!("{trigger} writes byte {i} of a {len} byte frame"))
            })?;
            match self.granularity {
                Granularity::Byte => *dest = raw[n],
                Granularity::Bit => {
                    let mask = 1u8 << (7 - recipe.declared[n] % 8);
                    if raw[n] & 1 == 1 {
                        *dest |= mask;
                    } else {
                        *dest &= !mask;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Where an element's raw value comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum Positions {
    Offsets(OffsetSpec),
    /// Per operating mode specifications. Selecting one requires the caller to supply a mode.
    ModeFiltered(BTreeMap<Mode, OffsetSpec>),
}

impl Positions {
    /// Specification in effect for `mode`.
    ///
    /// # Errors
    /// [Error::Config] if the positions are mode-filtered and no mode was given, or
    /// [Error::UnknownMode] if there is nothing for `mode`.
    pub fn select(&self, mode: Option<Mode>) -> Result<&OffsetSpec> {
        match self {
            Positions::Offsets(spec) => Ok(spec),
            Positions::ModeFiltered(specs) => {
                let mode = mode.ok_or_else(|| {
                    Error::Config("mode-filtered positions require an operating mode".to_string())
                })?;
                specs
                    .get(&mode)
                    .ok_or_else(|| Error::UnknownMode(mode.to_string()))
            }
        }
    }

    /// Triggers in effect for `mode`.
    ///
    /// # Errors
    /// See [Self::select].
    pub fn triggers(&self, mode: Option<Mode>) -> Result<&[Trigger]> {
        Ok(self.select(mode)?.triggers())
    }

    /// # Errors
    /// See [Self::select] and [OffsetSpec::collect].
    pub fn collect(&self, trigger: &Trigger, data: &[u8], mode: Option<Mode>) -> Result<Vec<u8>> {
        self.select(mode)?.collect(trigger, data)
    }

    /// # Errors
    /// See [Self::select] and [OffsetSpec::encode].
    pub fn encode(
        &self,
        trigger: &Trigger,
        raw: &[u8],
        data: &mut [u8],
        mode: Option<Mode>,
    ) -> Result<()> {
        self.select(mode)?.encode(trigger, raw, data)
    }
}

impl From<OffsetSpec> for Positions {
    fn from(value: OffsetSpec) -> Self {
        Positions::Offsets(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lut;
    use test_case::test_case;

    #[test]
    fn byte_triggers_fire_on_group_max() {
        let spec = OffsetSpec::bytes(&[60.into(), vec![34, 35].into()]).unwrap();
        assert_eq!(
            spec.triggers(),
            &[Trigger::every_minor_frame(60), Trigger::every_minor_frame(35)]
        );
    }

    #[test]
    fn bit_triggers_fire_on_last_byte() {
        let spec = OffsetSpec::subcom_bits("DS", &[(80..92).collect::<Vec<_>>().into()]).unwrap();
        assert_eq!(spec.triggers(), &[Trigger::subcom("DS", 11)]);
    }

    #[test]
    fn duplicate_trigger_is_rejected() {
        let zult = OffsetSpec::bytes(&[vec![1, 5].into(), 5.into()]);
        assert!(matches!(zult, Err(Error::DuplicateTrigger(_))));

        let zult = OffsetSpec::bits(&[3.into(), 5.into()]);
        assert!(
            matches!(zult, Err(Error::DuplicateTrigger(_))),
            "bits 3 and 5 share byte 0"
        );
    }

    #[test]
    fn collect_minor_frame_uses_wildcard() {
        let spec = OffsetSpec::bytes(&[vec![2, 3].into()]).unwrap();
        let data = [0u8, 1, 0xab, 0xcd];
        assert_eq!(
            spec.collect(&Trigger::minor_frame(17, 3), &data).unwrap(),
            vec![0xab, 0xcd]
        );
    }

    #[test]
    fn collect_bits_msb_first() {
        let spec = OffsetSpec::bits(&[vec![0, 7, 9].into()]).unwrap();
        let data = [0b1000_0000, 0b0100_0000];
        assert_eq!(
            spec.collect(&Trigger::minor_frame(0, 1), &data).unwrap(),
            vec![1, 0, 1]
        );
    }

    #[test]
    fn collect_beyond_frame_is_extraction_fault() {
        let spec = OffsetSpec::subcom_bytes("DS", &[vec![1, 9].into()]).unwrap();
        let zult = spec.collect(&Trigger::subcom("DS", 9), &[0u8; 4]);
        assert!(matches!(zult, Err(Error::Extraction(_))));

        let zult = spec.collect(&Trigger::subcom("DS", 1), &[0u8; 10]);
        assert!(
            matches!(zult, Err(Error::Extraction(_))),
            "unknown trigger should fail"
        );
    }

    #[test]
    fn lut_positions() {
        // windows [0,4) [4,8) [0,4) [4,8)
        let table = lut::subcom(&[5], &[20, 21, 22, 23], 8, 4).unwrap();
        let spec = OffsetSpec::lut(&table).unwrap();
        assert_eq!(
            spec.triggers(),
            &[Trigger::minor_frame(1, 21), Trigger::minor_frame(3, 21)]
        );
        let mut data = [0u8; 32];
        data[21] = 0x42;
        assert_eq!(
            spec.collect(&Trigger::minor_frame(3, 21), &data).unwrap(),
            vec![0x42]
        );
        assert!(spec.collect(&Trigger::minor_frame(0, 21), &data).is_err());
    }

    #[test]
    fn mode_filtered_requires_mode() {
        let positions = Positions::ModeFiltered(BTreeMap::from([(
            Mode::Engineering,
            OffsetSpec::bytes(&[1.into()]).unwrap(),
        )]));
        assert!(matches!(positions.triggers(None), Err(Error::Config(_))));
        assert!(matches!(
            positions.triggers(Some(Mode::Science)),
            Err(Error::UnknownMode(_))
        ));
        assert_eq!(
            positions.triggers(Some(Mode::Engineering)).unwrap(),
            &[Trigger::every_minor_frame(1)]
        );
    }

    #[test_case(OffsetSpec::bytes(&[vec![4, 5, 6].into()]).unwrap(), &[0xde, 0xad, 0x01]; "bytes")]
    #[test_case(OffsetSpec::bits(&[vec![9, 10, 15, 16].into()]).unwrap(), &[1, 0, 1, 1]; "bits")]
    #[test_case(OffsetSpec::subcom_bits("AS1", &[vec![3].into()]).unwrap(), &[1]; "single bit")]
    fn encode_then_collect_reproduces_raw(spec: OffsetSpec, raw: &[u8]) {
        let trigger = match spec.namespace() {
            Namespace::MinorFrame => Trigger::minor_frame(7, spec.triggers()[0].offset().unwrap()),
            Namespace::Subcom(_) => spec.triggers()[0].clone(),
        };
        let mut data = [0x5au8; 16];

        spec.encode(&trigger, raw, &mut data).unwrap();

        assert_eq!(spec.collect(&trigger, &data).unwrap(), raw);
        assert!(data[8..].iter().all(|b| *b == 0x5a), "only recipe bytes may change");
    }
}
