//! Register value codec
//!
//! Converts the raw bytes of a register into semantic [`Value`]s and back,
//! driven by the register's [`DecodeKind`] and [`ByteOrder`]. The heat pump
//! mixes big- and little-endian registers, so byte order is always taken
//! from the register descriptor and never assumed.
//!
//! | Kind | Bytes | Value |
//! |------|-------|-------|
//! | `signed` / `unsigned` | 1-8 | `Number`, divided by scale |
//! | `bit` / `negated_bit` | 1+ | `Flag` from the first byte |
//! | `switch` | 1-8 | `Flag`, non-zero is on |
//! | `float` | 4 | `Number`, IEEE-754 big-endian |
//! | `quarters` | 1+ | `Time`, 15 minute steps, `0x80` unset |
//! | `schedule` | 2 | `Schedule`, start and end quarters |
//! | `enumerated` | 1-8 | `Choice` with table label |
//! | `raw` | any | `Raw` |

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::error::{ThzError, ThzResult};

/// Number of quarter hours in a day; valid quarter values are `0..QUARTERS_PER_DAY`
pub const QUARTERS_PER_DAY: u8 = 96;

/// Quarter value meaning "no time set"
pub const UNSET_QUARTER: u8 = 0x80;

/// Byte order of a multi-byte register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

/// Option tables for enumerated registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumTable {
    /// Global operating mode (`2opmode`)
    OperatingMode,
    /// Heating circuit mode (`OpModeHC`)
    HeatingCircuitMode,
    /// Program mode (`OpMode2`)
    ProgramMode,
    /// Summer/winter mode (`SomWinMode`); codes are two-digit keys
    SummerWinter,
    Weekday,
    /// Fault codes (`faultmap`)
    Fault,
    /// Plain on/off (`1clean`)
    OnOff,
}

const OPERATING_MODE: &[(&str, &str)] = &[
    ("1", "standby"),
    ("11", "automatic"),
    ("3", "DAYmode"),
    ("4", "setback"),
    ("5", "DHWmode"),
    ("14", "manual"),
    ("0", "emergency"),
];

const HEATING_CIRCUIT_MODE: &[(&str, &str)] = &[
    ("1", "normal"),
    ("2", "setback"),
    ("3", "standby"),
    ("4", "restart"),
    ("5", "restart"),
];

const PROGRAM_MODE: &[(&str, &str)] = &[("0", "manual"), ("1", "automatic")];

const SUMMER_WINTER: &[(&str, &str)] = &[("01", "winter"), ("02", "summer")];

const WEEKDAY: &[(&str, &str)] = &[
    ("0", "Monday"),
    ("1", "Tuesday"),
    ("2", "Wednesday"),
    ("3", "Thursday"),
    ("4", "Friday"),
    ("5", "Saturday"),
    ("6", "Sunday"),
];

const FAULT: &[(&str, &str)] = &[
    ("0", "n.a."),
    ("1", "F01_AnodeFault"),
    ("2", "F02_SafetyTempDelimiterEngaged"),
    ("3", "F03_HighPreasureGuardFault"),
    ("4", "F04_LowPreasureGuardFault"),
    ("5", "F05_OutletFanFault"),
    ("6", "F06_InletFanFault"),
    ("7", "F07_MainOutputFanFault"),
    ("11", "F11_LowPreasureSensorFault"),
    ("12", "F12_HighPreasureSensorFault"),
    ("15", "F15_DHW_TemperatureFault"),
    ("17", "F17_DefrostingDurationExceeded"),
    ("20", "F20_SolarSensorFault"),
    ("21", "F21_OutsideTemperatureSensorFault"),
    ("22", "F22_HotGasTemperatureFault"),
    ("23", "F23_CondenserTemperatureSensorFault"),
    ("24", "F24_EvaporatorTemperatureSensorFault"),
    ("26", "F26_ReturnTemperatureSensorFault"),
    ("28", "F28_FlowTemperatureSensorFault"),
    ("29", "F29_DHW_TemperatureSensorFault"),
    ("30", "F30_SoftwareVersionFault"),
    ("31", "F31_RAMfault"),
    ("32", "F32_EEPromFault"),
    ("33", "F33_ExtractAirHumiditySensor"),
    ("34", "F34_FlowSensor"),
    ("35", "F35_minFlowCooling"),
    ("36", "F36_MinFlowRate"),
    ("37", "F37_MinWaterPressure"),
    ("40", "F40_FloatSwitch"),
    ("50", "F50_SensorHeatPumpReturn"),
    ("51", "F51_SensorHeatPumpFlow"),
    ("52", "F52_SensorCondenserOutlet"),
];

const ON_OFF: &[(&str, &str)] = &[("0", "off"), ("1", "on")];

impl EnumTable {
    /// `(key, label)` pairs of this table
    pub fn options(self) -> &'static [(&'static str, &'static str)] {
        match self {
            EnumTable::OperatingMode => OPERATING_MODE,
            EnumTable::HeatingCircuitMode => HEATING_CIRCUIT_MODE,
            EnumTable::ProgramMode => PROGRAM_MODE,
            EnumTable::SummerWinter => SUMMER_WINTER,
            EnumTable::Weekday => WEEKDAY,
            EnumTable::Fault => FAULT,
            EnumTable::OnOff => ON_OFF,
        }
    }

    /// Render a raw code as a table key
    ///
    /// Only the summer/winter table stores zero-padded keys.
    pub fn key_for(self, code: u64) -> String {
        match self {
            EnumTable::SummerWinter => format!("{:02}", code),
            _ => code.to_string(),
        }
    }

    /// Look up the label of a raw code
    pub fn label(self, code: u64) -> Option<&'static str> {
        let key = self.key_for(code);
        self.options()
            .iter()
            .find(|(candidate, _)| *candidate == key)
            .map(|(_, label)| *label)
    }

    /// Look up the raw code of a label
    ///
    /// When a label appears more than once the last code wins.
    pub fn code(self, label: &str) -> Option<u64> {
        self.options()
            .iter()
            .rev()
            .find(|(_, candidate)| *candidate == label)
            .and_then(|(key, _)| key.parse().ok())
    }
}

fn unit_scale() -> f64 {
    1.0
}

/// How the bytes of a register are interpreted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecodeKind {
    /// Two's-complement integer divided by `scale`
    Signed {
        #[serde(default = "unit_scale")]
        scale: f64,
    },
    /// Unsigned integer divided by `scale`
    Unsigned {
        #[serde(default = "unit_scale")]
        scale: f64,
    },
    /// Bit `index` of the first byte
    Bit { index: u8 },
    /// Inverted bit `index` of the first byte
    NegatedBit { index: u8 },
    /// On/off stored as an integer
    Switch,
    /// IEEE-754 single precision, always big-endian
    Float,
    /// Time of day in quarter hours
    Quarters,
    /// Program slot: start and end in quarter hours
    Schedule,
    /// Code looked up in an option table
    Enumerated { table: EnumTable },
    /// Uninterpreted bytes
    Raw,
}

impl DecodeKind {
    pub fn signed(scale: f64) -> Self {
        DecodeKind::Signed { scale }
    }

    pub fn unsigned(scale: f64) -> Self {
        DecodeKind::Unsigned { scale }
    }

    /// Short name used in log and error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            DecodeKind::Signed { .. } => "signed",
            DecodeKind::Unsigned { .. } => "unsigned",
            DecodeKind::Bit { .. } => "bit",
            DecodeKind::NegatedBit { .. } => "negated_bit",
            DecodeKind::Switch => "switch",
            DecodeKind::Float => "float",
            DecodeKind::Quarters => "quarters",
            DecodeKind::Schedule => "schedule",
            DecodeKind::Enumerated { .. } => "enumerated",
            DecodeKind::Raw => "raw",
        }
    }

    /// Check the scale and bit index, independent of any register length
    pub fn check_parameters(&self) -> ThzResult<()> {
        match self {
            DecodeKind::Signed { scale } | DecodeKind::Unsigned { scale }
                if !(scale.is_finite() && *scale > 0.0) =>
            {
                Err(ThzError::configuration(format!(
                    "Scale must be positive, got {}",
                    scale
                )))
            }
            DecodeKind::Bit { index } | DecodeKind::NegatedBit { index } if *index > 7 => Err(
                ThzError::configuration(format!("Bit index {} out of range 0..=7", index)),
            ),
            _ => Ok(()),
        }
    }

    /// Check that this kind can work on registers of `length` bytes
    pub fn validate(&self, length: usize) -> ThzResult<()> {
        self.check_parameters()?;
        let supported = match self {
            DecodeKind::Signed { .. } | DecodeKind::Unsigned { .. } => (1..=8).contains(&length),
            DecodeKind::Bit { .. } | DecodeKind::NegatedBit { .. } => length >= 1,
            DecodeKind::Switch | DecodeKind::Enumerated { .. } => (1..=8).contains(&length),
            DecodeKind::Float => length == 4,
            DecodeKind::Quarters => length >= 1,
            DecodeKind::Schedule => length == 2,
            DecodeKind::Raw => true,
        };

        if supported {
            Ok(())
        } else {
            Err(ThzError::configuration(format!(
                "{} registers cannot be {} byte(s) long",
                self.type_name(),
                length
            )))
        }
    }
}

/// A decoded register value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Flag(bool),
    /// Time of day; `None` when unset
    Time(Option<NaiveTime>),
    Schedule {
        start: Option<NaiveTime>,
        end: Option<NaiveTime>,
    },
    /// Enumerated code with its label, if the table knows it
    Choice {
        code: u64,
        label: Option<&'static str>,
    },
    Raw(Vec<u8>),
}

impl Value {
    /// Build a choice from a table label
    pub fn choice(table: EnumTable, label: &str) -> ThzResult<Self> {
        let code = table.code(label).ok_or_else(|| {
            ThzError::invalid_data(format!("Invalid option '{}' for {:?}", label, table))
        })?;
        Ok(Value::Choice {
            code,
            label: table.label(code),
        })
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(number) => Some(*number),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Flag(flag) => Some(*flag),
            _ => None,
        }
    }
}

fn format_time(time: &Option<NaiveTime>) -> String {
    match time {
        Some(time) => time.format("%H:%M").to_string(),
        None => "--:--".to_string(),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(number) => write!(f, "{}", number),
            Value::Flag(flag) => write!(f, "{}", if *flag { "on" } else { "off" }),
            Value::Time(time) => write!(f, "{}", format_time(time)),
            Value::Schedule { start, end } => {
                write!(f, "{}-{}", format_time(start), format_time(end))
            }
            Value::Choice { code, label: Some(label) } => write!(f, "{} ({})", label, code),
            Value::Choice { code, label: None } => write!(f, "unknown ({})", code),
            Value::Raw(bytes) => write!(f, "{}", hex::encode(bytes)),
        }
    }
}

/// Convert a quarter-hour count into a time of day
///
/// `0x80` means unset. Other values outside `0..96` are clamped to 23:45 and
/// logged, they do not fail.
pub fn quarters_to_time(quarters: u8) -> Option<NaiveTime> {
    if quarters == UNSET_QUARTER {
        return None;
    }
    let clamped = if quarters >= QUARTERS_PER_DAY {
        warn!(
            "Quarter value {} outside 0..{}, clamping to {}",
            quarters,
            QUARTERS_PER_DAY,
            QUARTERS_PER_DAY - 1
        );
        QUARTERS_PER_DAY - 1
    } else {
        quarters
    };
    NaiveTime::from_hms_opt(u32::from(clamped / 4), u32::from(clamped % 4) * 15, 0)
}

/// Convert a time of day into a quarter-hour count, rounding down
///
/// `None` encodes as `0x80`.
pub fn time_to_quarters(time: Option<NaiveTime>) -> u8 {
    match time {
        // hour < 24 and minute < 60, so the result is below 96
        Some(time) => (time.hour() * 4 + time.minute() / 15) as u8,
        None => UNSET_QUARTER,
    }
}

fn read_unsigned(raw: &[u8], order: ByteOrder) -> u64 {
    let accumulate = |acc: u64, byte: &u8| (acc << 8) | u64::from(*byte);
    match order {
        ByteOrder::Big => raw.iter().fold(0, accumulate),
        ByteOrder::Little => raw.iter().rev().fold(0, accumulate),
    }
}

fn read_signed(raw: &[u8], order: ByteOrder) -> i64 {
    let shift = 64 - raw.len() as u32 * 8;
    ((read_unsigned(raw, order) << shift) as i64) >> shift
}

fn write_unsigned(value: u64, length: usize, order: ByteOrder) -> Vec<u8> {
    let mut bytes = value.to_be_bytes()[8 - length..].to_vec();
    if order == ByteOrder::Little {
        bytes.reverse();
    }
    bytes
}

fn check_integer_length(kind: &DecodeKind, length: usize) -> ThzResult<()> {
    if (1..=8).contains(&length) {
        Ok(())
    } else {
        Err(ThzError::decode(kind.type_name(), 8, length))
    }
}

/// Decode raw register bytes
pub fn decode(kind: &DecodeKind, raw: &[u8], order: ByteOrder) -> ThzResult<Value> {
    kind.check_parameters()?;
    if raw.is_empty() && *kind != DecodeKind::Raw {
        return Err(ThzError::decode(kind.type_name(), 1, 0));
    }

    let value = match kind {
        DecodeKind::Signed { scale } => {
            check_integer_length(kind, raw.len())?;
            Value::Number(read_signed(raw, order) as f64 / scale)
        }
        DecodeKind::Unsigned { scale } => {
            check_integer_length(kind, raw.len())?;
            Value::Number(read_unsigned(raw, order) as f64 / scale)
        }
        DecodeKind::Bit { index } => Value::Flag((raw[0] >> index) & 0x01 == 1),
        DecodeKind::NegatedBit { index } => Value::Flag((raw[0] >> index) & 0x01 == 0),
        DecodeKind::Switch => {
            check_integer_length(kind, raw.len())?;
            Value::Flag(read_unsigned(raw, order) != 0)
        }
        DecodeKind::Float => {
            let bytes: [u8; 4] = raw
                .try_into()
                .map_err(|_| ThzError::decode(kind.type_name(), 4, raw.len()))?;
            Value::Number(f64::from(f32::from_be_bytes(bytes)))
        }
        DecodeKind::Quarters => Value::Time(quarters_to_time(raw[0])),
        DecodeKind::Schedule => {
            if raw.len() != 2 {
                return Err(ThzError::decode(kind.type_name(), 2, raw.len()));
            }
            Value::Schedule {
                start: quarters_to_time(raw[0]),
                end: quarters_to_time(raw[1]),
            }
        }
        DecodeKind::Enumerated { table } => {
            check_integer_length(kind, raw.len())?;
            let code = read_unsigned(raw, order);
            let label = table.label(code);
            if label.is_none() {
                warn!(
                    "Unknown code {} for {:?}, available: {:?}",
                    table.key_for(code),
                    table,
                    table.options().iter().map(|(key, _)| *key).collect::<Vec<_>>()
                );
            }
            Value::Choice { code, label }
        }
        DecodeKind::Raw => Value::Raw(raw.to_vec()),
    };
    Ok(value)
}

fn mismatch(kind: &DecodeKind, value: &Value) -> ThzError {
    ThzError::invalid_data(format!(
        "Cannot encode {:?} as {} register",
        value,
        kind.type_name()
    ))
}

fn encode_signed(scaled: f64, length: usize, order: ByteOrder) -> ThzResult<Vec<u8>> {
    let bits = length as u32 * 8;
    let (min, max) = if bits == 64 {
        (i64::MIN as f64, i64::MAX as f64)
    } else {
        (-((1i64 << (bits - 1)) as f64), ((1i64 << (bits - 1)) - 1) as f64)
    };
    if !(min..=max).contains(&scaled) {
        return Err(ThzError::invalid_data(format!(
            "Value {} out of range for {} signed byte(s)",
            scaled, length
        )));
    }
    Ok(write_unsigned(scaled as i64 as u64, length, order))
}

fn encode_unsigned(scaled: f64, length: usize, order: ByteOrder) -> ThzResult<Vec<u8>> {
    let max = if length == 8 {
        u64::MAX as f64
    } else {
        ((1u64 << (length * 8)) - 1) as f64
    };
    if !(0.0..=max).contains(&scaled) {
        return Err(ThzError::invalid_data(format!(
            "Value {} out of range for {} unsigned byte(s)",
            scaled, length
        )));
    }
    Ok(write_unsigned(scaled as u64, length, order))
}

fn pad_first_byte(first: u8, length: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; length.max(1)];
    bytes[0] = first;
    bytes
}

/// Encode a value into `length` register bytes
pub fn encode(kind: &DecodeKind, value: &Value, length: usize, order: ByteOrder) -> ThzResult<Vec<u8>> {
    kind.validate(length)?;

    match (kind, value) {
        (DecodeKind::Signed { scale }, Value::Number(number)) => {
            encode_signed((number * scale).round(), length, order)
        }
        (DecodeKind::Unsigned { scale }, Value::Number(number)) => {
            encode_unsigned((number * scale).round(), length, order)
        }
        (DecodeKind::Bit { index }, Value::Flag(flag)) => {
            Ok(pad_first_byte(u8::from(*flag) << index, length))
        }
        (DecodeKind::NegatedBit { index }, Value::Flag(flag)) => {
            Ok(pad_first_byte(u8::from(!*flag) << index, length))
        }
        (DecodeKind::Switch, Value::Flag(flag)) => {
            Ok(write_unsigned(u64::from(*flag), length, order))
        }
        (DecodeKind::Float, Value::Number(number)) => {
            if !number.is_finite() || number.abs() > f64::from(f32::MAX) {
                return Err(ThzError::invalid_data(format!(
                    "Value {} does not fit a 32-bit float",
                    number
                )));
            }
            Ok((*number as f32).to_be_bytes().to_vec())
        }
        (DecodeKind::Quarters, Value::Time(time)) => {
            Ok(pad_first_byte(time_to_quarters(*time), length))
        }
        (DecodeKind::Schedule, Value::Schedule { start, end }) => {
            Ok(vec![time_to_quarters(*start), time_to_quarters(*end)])
        }
        (DecodeKind::Enumerated { table }, Value::Choice { code, .. }) => {
            if table.label(*code).is_none() {
                warn!("Encoding code {} not listed in {:?}", code, table);
            }
            encode_unsigned(*code as f64, length, order)
        }
        (DecodeKind::Raw, Value::Raw(bytes)) => {
            if bytes.len() != length {
                return Err(ThzError::invalid_data(format!(
                    "Raw value has {} byte(s), register takes {}",
                    bytes.len(),
                    length
                )));
            }
            Ok(bytes.clone())
        }
        _ => Err(mismatch(kind, value)),
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn byte_order() -> impl Strategy<Value = ByteOrder> {
        prop_oneof![Just(ByteOrder::Big), Just(ByteOrder::Little)]
    }

    fn scale() -> impl Strategy<Value = f64> {
        prop_oneof![Just(1.0), Just(10.0), Just(100.0)]
    }

    fn signed_raw() -> impl Strategy<Value = (usize, i64)> {
        (1usize..=4).prop_flat_map(|length| {
            let half = 1i64 << (length * 8 - 1);
            (Just(length), -half..half)
        })
    }

    fn unsigned_raw() -> impl Strategy<Value = (usize, i64)> {
        (1usize..=4).prop_flat_map(|length| (Just(length), 0..(1i64 << (length * 8))))
    }

    proptest! {
        #[test]
        fn signed_roundtrip((length, raw) in signed_raw(), scale in scale(), order in byte_order()) {
            let kind = DecodeKind::Signed { scale };
            let value = Value::Number(raw as f64 / scale);
            let bytes = encode(&kind, &value, length, order).unwrap();
            prop_assert_eq!(bytes.len(), length);
            prop_assert_eq!(decode(&kind, &bytes, order).unwrap(), value);
        }

        #[test]
        fn unsigned_roundtrip((length, raw) in unsigned_raw(), scale in scale(), order in byte_order()) {
            let kind = DecodeKind::Unsigned { scale };
            let value = Value::Number(raw as f64 / scale);
            let bytes = encode(&kind, &value, length, order).unwrap();
            prop_assert_eq!(decode(&kind, &bytes, order).unwrap(), value);
        }

        #[test]
        fn bit_roundtrip(index in 0u8..8, flag in any::<bool>(), negated in any::<bool>(), order in byte_order()) {
            let kind = if negated {
                DecodeKind::NegatedBit { index }
            } else {
                DecodeKind::Bit { index }
            };
            let bytes = encode(&kind, &Value::Flag(flag), 1, order).unwrap();
            prop_assert_eq!(decode(&kind, &bytes, order).unwrap(), Value::Flag(flag));
        }

        #[test]
        fn float_roundtrip(number in any::<f32>().prop_filter("finite", |n| n.is_finite()), order in byte_order()) {
            let value = Value::Number(f64::from(number));
            let bytes = encode(&DecodeKind::Float, &value, 4, order).unwrap();
            prop_assert_eq!(decode(&DecodeKind::Float, &bytes, order).unwrap(), value);
        }

        #[test]
        fn quarters_roundtrip(quarters in prop_oneof![0u8..96, Just(UNSET_QUARTER)], order in byte_order()) {
            let value = Value::Time(quarters_to_time(quarters));
            let bytes = encode(&DecodeKind::Quarters, &value, 1, order).unwrap();
            prop_assert_eq!(&bytes, &vec![quarters]);
            prop_assert_eq!(decode(&DecodeKind::Quarters, &bytes, order).unwrap(), value);
        }
    }

    #[test]
    fn integer_bytes_roundtrip_exhaustively() {
        let kinds = [
            DecodeKind::Signed { scale: 1.0 },
            DecodeKind::Signed { scale: 10.0 },
            DecodeKind::Unsigned { scale: 1.0 },
            DecodeKind::Unsigned { scale: 10.0 },
        ];
        for kind in &kinds {
            for order in [ByteOrder::Big, ByteOrder::Little] {
                for byte in 0..=u8::MAX {
                    let value = decode(kind, &[byte], order).unwrap();
                    assert_eq!(encode(kind, &value, 1, order).unwrap(), vec![byte]);
                }
                for word in 0..=u16::MAX {
                    let raw = word.to_be_bytes();
                    let value = decode(kind, &raw, order).unwrap();
                    assert_eq!(encode(kind, &value, 2, order).unwrap(), raw.to_vec(), "{:?} {:?}", kind, order);
                }
            }
        }
    }
}
