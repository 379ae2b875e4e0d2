//! Element catalog.
//!
//! A [Catalog] holds every [Element] the engine decodes along with the calibration curves
//! they reference. It is usually loaded from a JSON document shaped like [CatalogDef]:
//!
//! ```json
//! {
//!   "curves": { "bus_volts": [[0, 0], [255, 40]] },
//!   "elements": [
//!     { "id": "FRMCNT", "positions": { "kind": "bytes", "offsets": [60] } },
//!     {
//!       "id": "28v_bus",
//!       "unit": "V",
//!       "calibration": "bus_volts",
//!       "positions": { "kind": "subcom_bytes", "group": "AS2", "offsets": [43] }
//!     }
//!   ]
//! }
//! ```
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{MissionConfig, Mode, SubcomGroup};
use crate::element::{
    BinaryFormatter, Curve, CurveFormatter, CurveValidator, Element, FixedWordParser,
    Formatter, FssAngleParser, GroupByte, HexFormatter, NoValidator, OptionFormatter, Parser,
    PlainFormatter, PulseCountParser, RangeValidator, ShiftParser, SpinParser, SpinQuantity,
    Validator,
};
use crate::lut::{self, LutTable};
use crate::position::{Offset, OffsetSpec, Positions};
use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogDef {
    /// Calibration curves by name.
    pub curves: BTreeMap<String, Curve>,
    pub elements: Vec<ElementDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementDef {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    pub positions: PositionsDef,
    /// Defaults to folding the raw bytes or bits into an integer.
    #[serde(default)]
    pub parser: Option<ParserDef>,
    #[serde(default)]
    pub validator: Option<ValidatorDef>,
    #[serde(default)]
    pub formatter: Option<FormatterDef>,
    /// Curve used both to format and validate, unless those are given explicitly.
    #[serde(default)]
    pub calibration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PositionsDef {
    Bytes { offsets: Vec<Offset> },
    Bits { offsets: Vec<Offset> },
    SubcomBytes { group: String, offsets: Vec<Offset> },
    SubcomBits { group: String, offsets: Vec<Offset> },
    /// Combined lookup tables, in order.
    Lut { tables: Vec<LutDef> },
    ModeFiltered { modes: BTreeMap<Mode, PositionsDef> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LutDef {
    EveryMinorFrame {
        offset: usize,
    },
    /// Offsets of a group's logical frame, read from the minor frames carrying them.
    Subcom {
        group: String,
        offsets: Vec<Offset>,
        /// Overrides the group's configured columns.
        #[serde(default)]
        columns: Option<Vec<usize>>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParserDef {
    Bytes,
    Bits,
    FixedWord(FixedWordParser),
    PulseCount,
    SpinRate,
    SpinPeriod,
    MagRate,
    MagPeriod,
    SpinAngle,
    FssAngle,
    /// Sun sensor angle whose bias channel is carried by another group.
    FssAngleLookback(GroupByte),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidatorDef {
    None,
    Range { min: f64, max: f64 },
    Curve { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FormatterDef {
    Plain,
    Hex {
        #[serde(default = "default_hex_fill")]
        fill: usize,
    },
    Binary {
        #[serde(default = "default_binary_fill")]
        fill: usize,
    },
    Options {
        labels: Vec<String>,
    },
    Curve {
        name: String,
        #[serde(default = "default_precision")]
        precision: usize,
    },
}

fn default_hex_fill() -> usize {
    HexFormatter::default().fill
}

fn default_binary_fill() -> usize {
    BinaryFormatter::default().fill
}

fn default_precision() -> usize {
    CurveFormatter::DEFAULT_PRECISION
}

/// Every element known to an engine, in declaration order.
#[derive(Debug, Default)]
pub struct Catalog {
    elements: Vec<Element>,
    index: HashMap<String, usize>,
    curves: BTreeMap<String, Arc<Curve>>,
}

impl Catalog {
    /// # Errors
    /// [Error::Config] if two elements share an id.
    pub fn new(elements: Vec<Element>) -> Result<Self> {
        let mut index = HashMap::with_capacity(elements.len());
        for (idx, element) in elements.iter().enumerate() {
            if index.insert(element.id.clone(), idx).is_some() {
                return Err(Error::Config(format!("duplicate element id {}", element.id)));
            }
        }
        Ok(Catalog {
            elements,
            index,
            curves: BTreeMap::default(),
        })
    }

    /// Build the elements of `def` for the geometry of `mission`.
    ///
    /// # Errors
    /// [Error::Config] for duplicate ids, unknown curves or groups, and offsets outside of
    /// their frame. Any error from building position specifications.
    pub fn from_def(def: CatalogDef, mission: &MissionConfig) -> Result<Self> {
        let curves: BTreeMap<String, Arc<Curve>> = def
            .curves
            .into_iter()
            .map(|(name, curve)| (name, Arc::new(curve)))
            .collect();
        let builder = Builder {
            mission,
            curves: &curves,
        };
        let elements = def
            .elements
            .iter()
            .map(|d| builder.element(d))
            .collect::<Result<Vec<_>>>()?;
        debug!(
            elements = elements.len(),
            curves = curves.len(),
            "loaded catalog"
        );

        let mut catalog = Catalog::new(elements)?;
        catalog.curves = curves;
        Ok(catalog)
    }

    /// Load a JSON [CatalogDef].
    ///
    /// # Errors
    /// [Error::Io] or [Error::Json] if the file cannot be read, otherwise as [Self::from_def].
    pub fn from_path<P: AsRef<Path>>(path: P, mission: &MissionConfig) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let def: CatalogDef = serde_json::from_reader(reader)?;
        Self::from_def(def, mission)
    }

    #[must_use]
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Element> {
        self.index.get(id).map(|idx| &self.elements[*idx])
    }

    /// Position of element `id` in [Self::elements].
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    #[must_use]
    pub fn curve(&self, name: &str) -> Option<&Arc<Curve>> {
        self.curves.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

struct Builder<'a> {
    mission: &'a MissionConfig,
    curves: &'a BTreeMap<String, Arc<Curve>>,
}

impl Builder<'_> {
    fn element(&self, def: &ElementDef) -> Result<Element> {
        let positions = self
            .positions(&def.positions)
            .map_err(|e| in_element(&def.id, e))?;
        let parser = match &def.parser {
            Some(p) => parser(p),
            None => Element::default_parser(&positions, self.mission.mode)
                .map_err(|e| in_element(&def.id, e))?,
        };

        let calibration = def
            .calibration
            .as_deref()
            .map(|name| self.curve(name))
            .transpose()
            .map_err(|e| in_element(&def.id, e))?;
        let validator: Box<dyn Validator> = match (&def.validator, &calibration) {
            (Some(v), _) => self.validator(v).map_err(|e| in_element(&def.id, e))?,
            (None, Some(curve)) => Box::new(CurveValidator {
                curve: curve.clone(),
            }),
            (None, None) => Box::new(NoValidator),
        };
        let formatter: Box<dyn Formatter> = match (&def.formatter, calibration) {
            (Some(f), _) => self.formatter(f).map_err(|e| in_element(&def.id, e))?,
            (None, Some(curve)) => Box::new(CurveFormatter::new(curve)),
            (None, None) => Box::new(PlainFormatter),
        };

        Ok(Element {
            id: def.id.clone(),
            name: def.name.clone(),
            description: def.description.clone(),
            category: def.category.clone(),
            positions,
            parser,
            validator,
            formatter,
            unit: def.unit.clone(),
        })
    }

    fn positions(&self, def: &PositionsDef) -> Result<Positions> {
        let PositionsDef::ModeFiltered { modes } = def else {
            return self.spec(def).map(Positions::Offsets);
        };
        let specs = modes
            .iter()
            .map(|(mode, def)| Ok((*mode, self.spec(def)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Positions::ModeFiltered(specs))
    }

    fn spec(&self, def: &PositionsDef) -> Result<OffsetSpec> {
        let frame_length = self.mission.frame_length;
        match def {
            PositionsDef::Bytes { offsets } => {
                check_offsets("minor frame", offsets, frame_length)?;
                OffsetSpec::bytes(offsets)
            }
            PositionsDef::Bits { offsets } => {
                check_offsets("minor frame", offsets, frame_length * 8)?;
                OffsetSpec::bits(offsets)
            }
            PositionsDef::SubcomBytes { group, offsets } => {
                check_offsets(group, offsets, self.group(group)?.length)?;
                OffsetSpec::subcom_bytes(group, offsets)
            }
            PositionsDef::SubcomBits { group, offsets } => {
                check_offsets(group, offsets, self.group(group)?.length * 8)?;
                OffsetSpec::subcom_bits(group, offsets)
            }
            PositionsDef::Lut { tables } => {
                let tables = tables
                    .iter()
                    .map(|t| self.lut(t))
                    .collect::<Result<Vec<_>>>()?;
                OffsetSpec::lut(&lut::combine(tables))
            }
            PositionsDef::ModeFiltered { .. } => Err(Error::Config(
                "mode filtered positions cannot be nested".to_string(),
            )),
        }
    }

    fn lut(&self, def: &LutDef) -> Result<LutTable> {
        let cycle_length = self.mission.cycle_length;
        match def {
            LutDef::EveryMinorFrame { offset } => {
                let frame_length = self.mission.frame_length;
                check_offsets("minor frame", &[Offset::Single(*offset)], frame_length)?;
                Ok(lut::every_minor_frame(*offset, cycle_length))
            }
            LutDef::Subcom {
                group,
                offsets,
                columns,
            } => {
                let singles = offsets
                    .iter()
                    .map(|o| match o {
                        Offset::Single(o) => Ok(*o),
                        Offset::Group(_) => Err(Error::Unsupported(format!(
                            "grouped offsets {o:?} in a lookup table for {group}"
                        ))),
                    })
                    .collect::<Result<Vec<_>>>()?;
                let config = self.group(group)?;
                let columns = columns.as_deref().unwrap_or(&config.columns);
                lut::subcom(&singles, columns, config.length, cycle_length)
            }
        }
    }

    fn validator(&self, def: &ValidatorDef) -> Result<Box<dyn Validator>> {
        Ok(match def {
            ValidatorDef::None => Box::new(NoValidator),
            ValidatorDef::Range { min, max } => Box::new(RangeValidator {
                min: *min,
                max: *max,
            }),
            ValidatorDef::Curve { name } => Box::new(CurveValidator {
                curve: self.curve(name)?,
            }),
        })
    }

    fn formatter(&self, def: &FormatterDef) -> Result<Box<dyn Formatter>> {
        Ok(match def {
            FormatterDef::Plain => Box::new(PlainFormatter),
            FormatterDef::Hex { fill } => Box::new(HexFormatter { fill: *fill }),
            FormatterDef::Binary { fill } => Box::new(BinaryFormatter { fill: *fill }),
            FormatterDef::Options { labels } => Box::new(OptionFormatter::new(labels.as_slice())),
            FormatterDef::Curve { name, precision } => Box::new(CurveFormatter {
                curve: self.curve(name)?,
                precision: *precision,
            }),
        })
    }

    fn curve(&self, name: &str) -> Result<Arc<Curve>> {
        self.curves
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Config(format!("unknown curve {name}")))
    }

    fn group(&self, key: &str) -> Result<&SubcomGroup> {
        self.mission
            .group(key)
            .ok_or_else(|| Error::Config(format!("unknown sub-commutated group {key}")))
    }
}

fn parser(def: &ParserDef) -> Box<dyn Parser> {
    let spin = |quantity| Box::new(SpinParser { quantity }) as Box<dyn Parser>;
    match def {
        ParserDef::Bytes => Box::new(ShiftParser::BYTES),
        ParserDef::Bits => Box::new(ShiftParser::BITS),
        ParserDef::FixedWord(p) => Box::new(p.clone()),
        ParserDef::PulseCount => Box::new(PulseCountParser),
        ParserDef::SpinRate | ParserDef::MagRate => spin(SpinQuantity::Rate),
        ParserDef::SpinPeriod | ParserDef::MagPeriod => spin(SpinQuantity::Period),
        ParserDef::SpinAngle => spin(SpinQuantity::Angle),
        ParserDef::FssAngle => Box::new(FssAngleParser::default()),
        ParserDef::FssAngleLookback(bias) => Box::new(FssAngleParser {
            bias: Some(bias.clone()),
        }),
    }
}

fn check_offsets(namespace: &str, offsets: &[Offset], limit: usize) -> Result<()> {
    match offsets
        .iter()
        .flat_map(Offset::offsets)
        .find(|o| **o >= limit)
    {
        Some(o) => Err(Error::Config(format!(
            "offset {o} outside of {namespace} ({limit})"
        ))),
        None => Ok(()),
    }
}

fn in_element(id: &str, err: Error) -> Error {
    match err {
        Error::Config(msg) => Error::Config(format!("element {id}: {msg}")),
        err => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Value;
    use crate::trigger::Trigger;
    use std::io::Write;

    fn load(json: &str) -> Result<Catalog> {
        let def: CatalogDef = serde_json::from_str(json).unwrap();
        Catalog::from_def(def, &MissionConfig::default())
    }

    #[test]
    fn load_catalog() {
        let catalog = load(
            r#"{
                "curves": {"volts": [[0, 0], [10, 100]]},
                "elements": [
                    {"id": "FRMCNT", "positions": {"kind": "bytes", "offsets": [60]}},
                    {
                        "id": "28v_bus",
                        "unit": "V",
                        "calibration": "volts",
                        "positions": {"kind": "subcom_bytes", "group": "AS2", "offsets": [43]}
                    },
                    {
                        "id": "hps_1_sector_width",
                        "positions": {"kind": "subcom_bits", "group": "DS", "offsets": [[102, 103]]},
                        "formatter": {"kind": "options", "labels": ["invalid", "45", "22.5", "360"]}
                    },
                    {
                        "id": "spin_rate",
                        "positions": {"kind": "subcom_bytes", "group": "DS", "offsets": [[34, 35]]},
                        "parser": {"kind": "spin_rate"}
                    },
                    {
                        "id": "hps_1_lv_a",
                        "positions": {"kind": "bytes", "offsets": [61]},
                        "parser": {"kind": "fixed_word", "word": 2, "bits": [2]}
                    }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(catalog.len(), 5);
        assert_eq!(catalog.position("spin_rate"), Some(3));
        assert!(catalog.curve("volts").is_some());

        let bus = catalog.get("28v_bus").unwrap();
        assert_eq!(bus.unit.as_deref(), Some("V"));
        assert_eq!(bus.formatter.format(&Value::Int(5)), "50.000000");
        assert_eq!(bus.validator.validate(&Value::Int(11)), Some(false));

        let width = catalog.get("hps_1_sector_width").unwrap();
        assert_eq!(
            width.positions.triggers(None).unwrap(),
            &[Trigger::subcom("DS", 12)]
        );
    }

    #[test]
    fn mode_filtered_lookup_tables() {
        let mission = MissionConfig::default().with_mode(Mode::Science);
        let def: CatalogDef = serde_json::from_str(
            r#"{"elements": [{
                "id": "ess_current",
                "positions": {"kind": "mode_filtered", "modes": {
                    "engineering": {"kind": "lut", "tables": [
                        {"kind": "every_minor_frame", "offset": 87},
                        {"kind": "subcom", "group": "AS2", "offsets": [45]}
                    ]},
                    "science": {"kind": "lut", "tables": [
                        {"kind": "subcom", "group": "AS2", "offsets": [45]}
                    ]}
                }}
            }]}"#,
        )
        .unwrap();

        let catalog = Catalog::from_def(def, &mission).unwrap();

        let element = catalog.get("ess_current").unwrap();
        let engineering = element.positions.triggers(Some(Mode::Engineering)).unwrap();
        let science = element.positions.triggers(Some(Mode::Science)).unwrap();
        assert_eq!(engineering.len(), 256 + science.len());
    }

    #[test]
    fn duplicate_id() {
        let zult = load(
            r#"{"elements": [
                {"id": "a", "positions": {"kind": "bytes", "offsets": [1]}},
                {"id": "a", "positions": {"kind": "bytes", "offsets": [2]}}
            ]}"#,
        );

        assert!(matches!(zult, Err(Error::Config(_))));
    }

    #[test]
    fn unknown_references() {
        for json in [
            r#"{"elements": [{"id": "a", "calibration": "nope",
                "positions": {"kind": "bytes", "offsets": [1]}}]}"#,
            r#"{"elements": [{"id": "a",
                "positions": {"kind": "subcom_bytes", "group": "XX", "offsets": [1]}}]}"#,
            r#"{"elements": [{"id": "a",
                "positions": {"kind": "subcom_bytes", "group": "DS", "offsets": [64]}}]}"#,
        ] {
            assert!(matches!(load(json), Err(Error::Config(_))), "{json}");
        }
    }

    #[test]
    fn grouped_lookup_offsets_unsupported() {
        let zult = load(
            r#"{"elements": [{"id": "a", "positions": {"kind": "lut", "tables": [
                {"kind": "subcom", "group": "AS2", "offsets": [[43, 44]]}
            ]}}]}"#,
        );

        assert!(matches!(zult, Err(Error::Unsupported(_))));
    }

    #[test]
    fn from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = r#"{"elements": [{"id": "FRMCNT", "positions": {"kind": "bytes", "offsets": [60]}}]}"#;
        file.write_all(json.as_bytes()).unwrap();

        let catalog = Catalog::from_path(file.path(), &MissionConfig::default()).unwrap();

        assert!(catalog.get("FRMCNT").is_some());
    }
}
