/// Firmware-dependent register maps
///
/// A register map describes, for one firmware version, where every named
/// value lives inside the register blocks of the heat pump and how its bytes
/// are interpreted. Maps are immutable once built and shared behind `Arc`.
///
/// Built-in maps are composed from a firmware family base plus per-firmware
/// overlays. An overlay replaces base registers with the same name and adds
/// the rest.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::codec::{ByteOrder, DecodeKind, EnumTable};
use crate::error::{ThzError, ThzResult};
use crate::protocol::BlockAddress;

/// Largest register block payload a descriptor may address
pub const MAX_BLOCK_LENGTH: usize = 255;

/// Well-known register blocks
pub mod blocks {
    use crate::protocol::BlockAddress;

    /// Expert parameters (technician firmware only)
    pub const EXPERT: BlockAddress = 0x0002;
    /// Heating circuit 1 parameters
    pub const HEAT1: BlockAddress = 0x0005;
    /// Domestic hot water parameters
    pub const DHW_PARAMS: BlockAddress = 0x0007;
    /// Operating mode selection
    pub const OP_MODE: BlockAddress = 0x000A;
    /// Heating program schedule
    pub const HEAT_PROGRAM: BlockAddress = 0x000B;
    /// Hot water program schedule
    pub const DHW_PROGRAM: BlockAddress = 0x000C;
    /// Holiday / absence settings
    pub const ABSENCE: BlockAddress = 0x000F;
    /// Coefficient of performance (x39 firmware)
    pub const COP: BlockAddress = 0x00C1;
    /// Last faults
    pub const FAULTS: BlockAddress = 0x00D1;
    /// Hot water status
    pub const DHW_STATUS: BlockAddress = 0x00F3;
    /// Heating circuit 1 status
    pub const HC1_STATUS: BlockAddress = 0x00F4;
    /// Global status
    pub const GLOBAL: BlockAddress = 0x00FB;
    /// Firmware identification
    pub const FIRMWARE: BlockAddress = 0x00FD;
}

/// Where and how a register is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteLayout {
    /// Write command byte
    pub command: u8,
    /// Offset byte sent in front of the value
    pub offset: u8,
    /// Number of value bytes
    pub length: usize,
}

/// Static description of one named register
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterDescriptor {
    pub name: String,
    pub block: BlockAddress,
    /// Byte offset inside the block payload
    pub offset: usize,
    /// Byte length inside the block payload
    pub length: usize,
    pub kind: DecodeKind,
    #[serde(default)]
    pub byte_order: ByteOrder,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<WriteLayout>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl RegisterDescriptor {
    /// Create a big-endian, read-only descriptor
    pub fn new<S: Into<String>>(
        name: S,
        block: BlockAddress,
        offset: usize,
        length: usize,
        kind: DecodeKind,
    ) -> Self {
        Self {
            name: name.into(),
            block,
            offset,
            length,
            kind,
            byte_order: ByteOrder::Big,
            write: None,
            unit: None,
        }
    }

    pub fn little_endian(mut self) -> Self {
        self.byte_order = ByteOrder::Little;
        self
    }

    /// Attach a write layout
    pub fn writable(mut self, command: u8, offset: u8, length: usize) -> Self {
        self.write = Some(WriteLayout { command, offset, length });
        self
    }

    pub fn with_unit<S: Into<String>>(mut self, unit: S) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn is_writable(&self) -> bool {
        self.write.is_some()
    }

    /// Check the descriptor against its decode kind
    pub fn validate(&self) -> ThzResult<()> {
        if self.name.trim().is_empty() {
            return Err(ThzError::configuration("Register name must not be empty"));
        }
        self.kind
            .validate(self.length)
            .map_err(|e| ThzError::configuration(format!("{}: {}", self.name, e)))?;
        match self.offset.checked_add(self.length) {
            Some(end) if end <= MAX_BLOCK_LENGTH => {}
            _ => {
                return Err(ThzError::configuration(format!(
                    "{}: offset {} + length {} exceeds the {}-byte block limit",
                    self.name, self.offset, self.length, MAX_BLOCK_LENGTH
                )))
            }
        }
        if let Some(write) = &self.write {
            self.kind
                .validate(write.length)
                .map_err(|e| ThzError::configuration(format!("{} (write): {}", self.name, e)))?;
        }
        Ok(())
    }

    /// Cut this register's bytes out of a block payload
    pub fn slice<'a>(&self, block_data: &'a [u8]) -> ThzResult<&'a [u8]> {
        self.offset
            .checked_add(self.length)
            .and_then(|end| block_data.get(self.offset..end))
            .ok_or_else(|| {
                ThzError::decode(
                    self.name.as_str(),
                    self.length,
                    block_data.len().saturating_sub(self.offset),
                )
            })
    }
}

#[derive(Deserialize)]
struct RegisterMapFile {
    firmware: String,
    registers: Vec<RegisterDescriptor>,
}

/// Immutable register map for one firmware version
#[derive(Debug, Clone)]
pub struct RegisterMap {
    firmware: String,
    registers: Vec<RegisterDescriptor>,
    index: HashMap<String, usize>,
}

impl RegisterMap {
    /// Build a map, validating every descriptor
    ///
    /// Register names must be unique.
    pub fn new<S: Into<String>>(firmware: S, registers: Vec<RegisterDescriptor>) -> ThzResult<Self> {
        let mut index = HashMap::with_capacity(registers.len());
        for (position, register) in registers.iter().enumerate() {
            register.validate()?;
            if index.insert(register.name.clone(), position).is_some() {
                return Err(ThzError::configuration(format!(
                    "Duplicate register name: {}",
                    register.name
                )));
            }
        }
        Ok(Self {
            firmware: firmware.into(),
            registers,
            index,
        })
    }

    /// Build a map from a base layer and overlays
    ///
    /// Each overlay drops base entries whose names it redefines, then
    /// appends its own entries.
    pub fn merged<S: Into<String>>(firmware: S, layers: Vec<Vec<RegisterDescriptor>>) -> ThzResult<Self> {
        let mut merged: Vec<RegisterDescriptor> = Vec::new();
        for layer in layers {
            let overridden: BTreeSet<&str> = layer.iter().map(|r| r.name.trim()).collect();
            merged.retain(|r| !overridden.contains(r.name.trim()));
            merged.extend(layer);
        }
        Self::new(firmware, merged)
    }

    /// Parse a map from JSON: `{"firmware": "...", "registers": [...]}`
    pub fn from_json(json: &str) -> ThzResult<Self> {
        let file: RegisterMapFile = serde_json::from_str(json)?;
        Self::new(file.firmware, file.registers)
    }

    pub fn firmware(&self) -> &str {
        &self.firmware
    }

    pub fn get(&self, name: &str) -> Option<&RegisterDescriptor> {
        self.index.get(name).map(|&position| &self.registers[position])
    }

    pub fn registers(&self) -> &[RegisterDescriptor] {
        &self.registers
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Distinct blocks referenced by the map, ascending
    pub fn blocks(&self) -> Vec<BlockAddress> {
        self.registers
            .iter()
            .map(|r| r.block)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn registers_in_block(&self, block: BlockAddress) -> impl Iterator<Item = &RegisterDescriptor> {
        self.registers.iter().filter(move |r| r.block == block)
    }

    /// Blocks holding a register written by `command`
    pub fn blocks_written_by(&self, command: u8) -> Vec<BlockAddress> {
        self.registers
            .iter()
            .filter(|r| r.write.map_or(false, |w| w.command == command))
            .map(|r| r.block)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Smallest payload length covering every register of `block`
    pub fn block_length(&self, block: BlockAddress) -> usize {
        self.registers_in_block(block)
            .map(|r| r.offset + r.length)
            .max()
            .unwrap_or(0)
    }
}

/// Register maps keyed by firmware version
#[derive(Debug, Clone, Default)]
pub struct RegisterCatalog {
    maps: HashMap<String, Arc<RegisterMap>>,
}

impl RegisterCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with every built-in firmware map
    pub fn builtin() -> ThzResult<Self> {
        let mut catalog = Self::new();
        for (firmware, layers) in builtin::firmware_layers() {
            catalog.insert(RegisterMap::merged(firmware, layers)?);
        }
        Ok(catalog)
    }

    /// Add or replace the map for its firmware
    pub fn insert(&mut self, map: RegisterMap) -> Arc<RegisterMap> {
        let map = Arc::new(map);
        debug!("Registering map for firmware {} ({} registers)", map.firmware(), map.len());
        self.maps.insert(map.firmware().to_string(), Arc::clone(&map));
        map
    }

    /// Parse and add a JSON register map
    pub fn load_json(&mut self, json: &str) -> ThzResult<Arc<RegisterMap>> {
        Ok(self.insert(RegisterMap::from_json(json)?))
    }

    /// Map for a firmware version
    pub fn select(&self, firmware: &str) -> ThzResult<Arc<RegisterMap>> {
        self.maps
            .get(firmware.trim())
            .cloned()
            .ok_or_else(|| ThzError::unsupported_firmware(firmware))
    }

    /// Known firmware versions, sorted
    pub fn firmwares(&self) -> Vec<String> {
        let mut firmwares: Vec<String> = self.maps.keys().cloned().collect();
        firmwares.sort();
        firmwares
    }
}

mod builtin {
    use super::blocks::*;
    use super::*;

    const DAYS: [&str; 7] = ["Mo", "Tu", "We", "Th", "Fr", "Sa", "Su"];

    fn temp(name: &str, block: BlockAddress, offset: usize) -> RegisterDescriptor {
        RegisterDescriptor::new(name, block, offset, 2, DecodeKind::signed(10.0)).with_unit("°C")
    }

    fn bit(name: &str, offset: usize, index: u8) -> RegisterDescriptor {
        RegisterDescriptor::new(name, GLOBAL, offset, 1, DecodeKind::Bit { index })
    }

    fn nbit(name: &str, offset: usize, index: u8) -> RegisterDescriptor {
        RegisterDescriptor::new(name, GLOBAL, offset, 1, DecodeKind::NegatedBit { index })
    }

    fn program(prefix: &str, block: BlockAddress) -> Vec<RegisterDescriptor> {
        DAYS.iter()
            .enumerate()
            .map(|(day, name)| {
                let offset = day * 2;
                RegisterDescriptor::new(
                    format!("{}_{}_0", prefix, name),
                    block,
                    offset,
                    2,
                    DecodeKind::Schedule,
                )
                .writable(block as u8, offset as u8, 2)
            })
            .collect()
    }

    /// Global status shared by every firmware
    fn global_status() -> Vec<RegisterDescriptor> {
        vec![
            temp("outsideTemp", GLOBAL, 0),
            temp("flowTemp", GLOBAL, 2),
            temp("returnTemp", GLOBAL, 4),
            temp("hotGasTemp", GLOBAL, 6),
            temp("dhwTemp", GLOBAL, 8),
            temp("flowTempHC2", GLOBAL, 10),
            temp("evaporatorTemp", GLOBAL, 12),
            temp("condenserTemp", GLOBAL, 14),
            bit("mixerOpen", 16, 0),
            bit("mixerClosed", 16, 1),
            bit("heatPipeValve", 16, 2),
            bit("diverterValve", 16, 3),
            bit("dhwPump", 16, 4),
            bit("heatingCircuitPump", 16, 5),
            bit("solarPump", 16, 7),
            bit("compressor", 17, 0),
            bit("boosterStage3", 17, 1),
            bit("boosterStage2", 17, 2),
            bit("boosterStage1", 17, 3),
            nbit("highPressureSensor", 18, 0),
            nbit("lowPressureSensor", 18, 1),
            bit("evaporatorIceMonitor", 18, 2),
            bit("signalAnode", 18, 3),
            bit("evuRelease", 18, 4),
            bit("ovenFireplace", 18, 5),
            bit("STB", 18, 6),
            RegisterDescriptor::new("outputVentilatorPower", GLOBAL, 20, 2, DecodeKind::unsigned(10.0))
                .with_unit("%"),
            RegisterDescriptor::new("inputVentilatorPower", GLOBAL, 22, 2, DecodeKind::unsigned(10.0))
                .with_unit("%"),
            RegisterDescriptor::new("mainVentilatorPower", GLOBAL, 24, 2, DecodeKind::unsigned(10.0))
                .with_unit("%"),
            RegisterDescriptor::new("outputVentilatorSpeed", GLOBAL, 26, 2, DecodeKind::unsigned(1.0))
                .little_endian()
                .with_unit("rpm"),
            RegisterDescriptor::new("inputVentilatorSpeed", GLOBAL, 28, 2, DecodeKind::unsigned(1.0))
                .little_endian()
                .with_unit("rpm"),
            RegisterDescriptor::new("mainVentilatorSpeed", GLOBAL, 30, 2, DecodeKind::unsigned(1.0))
                .little_endian()
                .with_unit("rpm"),
            temp("outsideTempFiltered", GLOBAL, 32),
            RegisterDescriptor::new("relHumidity", GLOBAL, 34, 2, DecodeKind::signed(10.0)).with_unit("%"),
            temp("dewPoint", GLOBAL, 36),
            RegisterDescriptor::new("P_Nd", GLOBAL, 38, 2, DecodeKind::signed(100.0)).with_unit("bar"),
            RegisterDescriptor::new("P_Hd", GLOBAL, 40, 2, DecodeKind::signed(100.0)).with_unit("bar"),
        ]
    }

    fn dhw_status() -> Vec<RegisterDescriptor> {
        vec![
            temp("sDHW_dhwTemp", DHW_STATUS, 0),
            temp("sDHW_outsideTemp", DHW_STATUS, 2),
            temp("dhwSetTemp", DHW_STATUS, 4),
            RegisterDescriptor::new("compBlockTime", DHW_STATUS, 6, 2, DecodeKind::signed(1.0)),
            RegisterDescriptor::new("heatBlockTime", DHW_STATUS, 8, 2, DecodeKind::signed(1.0)),
            RegisterDescriptor::new("dhwBoosterStage", DHW_STATUS, 10, 1, DecodeKind::unsigned(1.0)),
            RegisterDescriptor::new("pasteurisationMode", DHW_STATUS, 11, 1, DecodeKind::unsigned(1.0)),
            RegisterDescriptor::new(
                "dhwOpMode",
                DHW_STATUS,
                12,
                1,
                DecodeKind::Enumerated { table: EnumTable::ProgramMode },
            )
            .little_endian(),
        ]
    }

    fn hc1_status() -> Vec<RegisterDescriptor> {
        vec![
            temp("sHC1_outsideTemp", HC1_STATUS, 0),
            temp("sHC1_returnTemp", HC1_STATUS, 2),
            RegisterDescriptor::new("integralHeat", HC1_STATUS, 4, 2, DecodeKind::signed(1.0)),
            temp("sHC1_flowTemp", HC1_STATUS, 6),
            temp("heatSetTemp", HC1_STATUS, 8),
            temp("heatTemp", HC1_STATUS, 10),
            RegisterDescriptor::new(
                "seasonMode",
                HC1_STATUS,
                12,
                1,
                DecodeKind::Enumerated { table: EnumTable::SummerWinter },
            )
            .little_endian(),
            RegisterDescriptor::new("integralSwitch", HC1_STATUS, 13, 2, DecodeKind::signed(1.0)),
            RegisterDescriptor::new(
                "hcOpMode",
                HC1_STATUS,
                15,
                1,
                DecodeKind::Enumerated { table: EnumTable::HeatingCircuitMode },
            )
            .little_endian(),
        ]
    }

    fn faults() -> Vec<RegisterDescriptor> {
        let mut registers = vec![RegisterDescriptor::new(
            "numberOfFaults",
            FAULTS,
            0,
            1,
            DecodeKind::unsigned(1.0),
        )];
        for slot in 0..4usize {
            let offset = 1 + slot * 4;
            registers.push(
                RegisterDescriptor::new(
                    format!("fault{}Code", slot),
                    FAULTS,
                    offset,
                    1,
                    DecodeKind::Enumerated { table: EnumTable::Fault },
                )
                .little_endian(),
            );
            registers.push(
                RegisterDescriptor::new(
                    format!("fault{}Time", slot),
                    FAULTS,
                    offset + 1,
                    1,
                    DecodeKind::Quarters,
                ),
            );
            registers.push(
                RegisterDescriptor::new(
                    format!("fault{}Weekday", slot),
                    FAULTS,
                    offset + 2,
                    1,
                    DecodeKind::Enumerated { table: EnumTable::Weekday },
                )
                .little_endian(),
            );
        }
        registers
    }

    /// Writable parameters shared by every firmware
    fn parameters() -> Vec<RegisterDescriptor> {
        let mut registers = vec![
            temp("p01RoomTempDay", HEAT1, 0).writable(0x05, 0, 2),
            temp("p02RoomTempNight", HEAT1, 2).writable(0x05, 2, 2),
            temp("p03RoomTempStandby", HEAT1, 4).writable(0x05, 4, 2),
            RegisterDescriptor::new("p13GradientHC1", HEAT1, 6, 2, DecodeKind::signed(100.0))
                .writable(0x05, 6, 2),
            temp("p04DHWsetTempDay", DHW_PARAMS, 0).writable(0x07, 0, 2),
            temp("p05DHWsetTempNight", DHW_PARAMS, 2).writable(0x07, 2, 2),
            temp("p11DHWsetTempManual", DHW_PARAMS, 4).writable(0x07, 4, 2),
            RegisterDescriptor::new("pasteurisationEnabled", DHW_PARAMS, 6, 2, DecodeKind::Switch)
                .writable(0x07, 6, 2),
            RegisterDescriptor::new(
                "opMode",
                OP_MODE,
                0,
                1,
                DecodeKind::Enumerated { table: EnumTable::OperatingMode },
            )
            .little_endian()
            .writable(0x0A, 0, 1),
            RegisterDescriptor::new(
                "dhwProgramMode",
                OP_MODE,
                1,
                1,
                DecodeKind::Enumerated { table: EnumTable::ProgramMode },
            )
            .little_endian()
            .writable(0x0A, 1, 1),
            RegisterDescriptor::new("holidayBeginTime", ABSENCE, 0, 1, DecodeKind::Quarters)
                .writable(0x0F, 0, 1),
            RegisterDescriptor::new("holidayEndTime", ABSENCE, 1, 1, DecodeKind::Quarters)
                .writable(0x0F, 1, 1),
        ];
        registers.extend(program("programHC1", HEAT_PROGRAM));
        registers.extend(program("programDHW", DHW_PROGRAM));
        registers
    }

    fn family_base() -> Vec<RegisterDescriptor> {
        let mut registers = global_status();
        registers.extend(dhw_status());
        registers.extend(hc1_status());
        registers.extend(faults());
        registers.extend(parameters());
        registers
    }

    fn overlay_214() -> Vec<RegisterDescriptor> {
        vec![
            temp("roomSetTemp", HC1_STATUS, 16),
            temp("insideTemp", HC1_STATUS, 18),
        ]
    }

    fn overlay_214j() -> Vec<RegisterDescriptor> {
        vec![RegisterDescriptor::new("relHumidity", GLOBAL, 34, 2, DecodeKind::unsigned(10.0)).with_unit("%")]
    }

    fn overlay_x39() -> Vec<RegisterDescriptor> {
        vec![
            RegisterDescriptor::new("copDHW", COP, 0, 4, DecodeKind::Float),
            RegisterDescriptor::new("copHeating", COP, 4, 4, DecodeKind::Float),
            RegisterDescriptor::new("outputVentilatorSpeed", GLOBAL, 26, 2, DecodeKind::unsigned(1.0))
                .with_unit("rpm"),
        ]
    }

    fn overlay_539() -> Vec<RegisterDescriptor> {
        vec![RegisterDescriptor::new("flowRate", GLOBAL, 42, 2, DecodeKind::unsigned(100.0)).with_unit("l/min")]
    }

    fn overlay_technician() -> Vec<RegisterDescriptor> {
        vec![
            RegisterDescriptor::new("p99PumpRateHC", EXPERT, 0, 2, DecodeKind::unsigned(1.0))
                .with_unit("%")
                .writable(0x02, 0, 2),
            temp("p99DHWmaxFlowTemp", EXPERT, 2).writable(0x02, 2, 2),
        ]
    }

    /// Firmware id and the layers its map is merged from
    pub(super) fn firmware_layers() -> Vec<(&'static str, Vec<Vec<RegisterDescriptor>>)> {
        vec![
            ("206", vec![family_base()]),
            ("214", vec![family_base(), overlay_214()]),
            ("214j", vec![family_base(), overlay_214(), overlay_214j()]),
            ("439", vec![family_base(), overlay_x39()]),
            ("539", vec![family_base(), overlay_x39(), overlay_539()]),
            (
                "439technician",
                vec![family_base(), overlay_x39(), overlay_technician()],
            ),
            (
                "539technician",
                vec![family_base(), overlay_x39(), overlay_539(), overlay_technician()],
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog() {
        let catalog = RegisterCatalog::builtin().unwrap();
        assert_eq!(
            catalog.firmwares(),
            vec!["206", "214", "214j", "439", "439technician", "539", "539technician"]
        );

        let map = catalog.select("539").unwrap();
        assert_eq!(map.firmware(), "539");
        assert!(map.get("flowRate").is_some());
        assert!(map.get("p99PumpRateHC").is_none());
    }

    #[test]
    fn test_unknown_firmware_rejected() {
        let catalog = RegisterCatalog::builtin().unwrap();
        assert!(matches!(
            catalog.select("999"),
            Err(ThzError::UnsupportedFirmware { .. })
        ));
    }

    #[test]
    fn test_overlay_overrides_by_name() {
        let catalog = RegisterCatalog::builtin().unwrap();

        let base = catalog.select("206").unwrap();
        let speed = base.get("outputVentilatorSpeed").unwrap();
        assert_eq!(speed.byte_order, ByteOrder::Little);

        let x39 = catalog.select("439").unwrap();
        let speed = x39.get("outputVentilatorSpeed").unwrap();
        assert_eq!(speed.byte_order, ByteOrder::Big);
        assert_eq!(
            x39.registers().iter().filter(|r| r.name == "outputVentilatorSpeed").count(),
            1
        );
    }

    #[test]
    fn test_blocks_written_by() {
        let catalog = RegisterCatalog::builtin().unwrap();
        let map = catalog.select("214").unwrap();
        assert_eq!(map.blocks_written_by(0x05), vec![blocks::HEAT1]);
        assert_eq!(map.blocks_written_by(0x0B), vec![blocks::HEAT_PROGRAM]);
        assert!(map.blocks_written_by(0x99).is_empty());
        assert_eq!(map.block_length(blocks::HC1_STATUS), 20);
    }

    #[test]
    fn test_slice_checks_length() {
        let register = RegisterDescriptor::new("flowTemp", blocks::GLOBAL, 2, 2, DecodeKind::signed(10.0));
        assert_eq!(register.slice(&[0, 1, 2, 3, 4]).unwrap(), &[2, 3]);
        assert!(matches!(
            register.slice(&[0, 1, 2]),
            Err(ThzError::Decode { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn test_offset_overflow_rejected() {
        let register = RegisterDescriptor::new("x", 1, usize::MAX, 2, DecodeKind::Raw);
        assert!(matches!(
            register.slice(&[0; 4]),
            Err(ThzError::Decode { expected: 2, actual: 0, .. })
        ));
        assert!(register.validate().is_err());
        assert!(RegisterDescriptor::new("y", 1, MAX_BLOCK_LENGTH - 1, 2, DecodeKind::Raw)
            .validate()
            .is_err());
        assert!(RegisterDescriptor::new("z", 1, MAX_BLOCK_LENGTH - 2, 2, DecodeKind::Raw)
            .validate()
            .is_ok());

        let json = r#"{"firmware": "huge", "registers": [
            {"name": "x", "block": 1, "offset": 18446744073709551615, "length": 2,
             "kind": {"type": "raw"}}
        ]}"#;
        assert!(matches!(
            RegisterCatalog::new().load_json(json),
            Err(ThzError::Configuration { .. })
        ));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let registers = vec![
            RegisterDescriptor::new("a", 1, 0, 1, DecodeKind::Raw),
            RegisterDescriptor::new("a", 1, 1, 1, DecodeKind::Raw),
        ];
        assert!(RegisterMap::new("x", registers).is_err());
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "firmware": "custom",
            "registers": [
                {"name": "flowTemp", "block": 251, "offset": 2, "length": 2,
                 "kind": {"type": "signed", "scale": 10.0}},
                {"name": "opMode", "block": 10, "offset": 0, "length": 1,
                 "kind": {"type": "enumerated", "table": "operating_mode"},
                 "byte_order": "little",
                 "write": {"command": 10, "offset": 0, "length": 1}}
            ]
        }"#;
        let mut catalog = RegisterCatalog::new();
        let map = catalog.load_json(json).unwrap();
        assert_eq!(map.len(), 2);
        assert!(map.get("opMode").unwrap().is_writable());
        assert_eq!(map.blocks(), vec![10, 251]);
        assert!(catalog.select("custom").is_ok());

        let invalid = r#"{"firmware": "bad", "registers": [
            {"name": "f", "block": 1, "offset": 0, "length": 2, "kind": {"type": "float"}}
        ]}"#;
        assert!(RegisterMap::from_json(invalid).is_err());
    }
}
