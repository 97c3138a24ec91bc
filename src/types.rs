//! The whole-dive and per-sample data model emitted by every family parser.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A parsed dive timestamp. Mirrors the teacher crate's choice of `jiff`
/// for datetime handling: `offset` is `None` when the device did not
/// record a timezone ("local-time unknown" in the header decoder spec),
/// in which case `instant` is to be read as UTC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Datetime {
    /// The instant, always present; UTC when `offset` is `None`.
    pub instant: jiff::Timestamp,
    /// Offset from UTC, in seconds, if the device published a timezone.
    pub offset_seconds: Option<i32>,
}

impl fmt::Display for Datetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset_seconds {
            Some(secs) => write!(f, "{}{:+03}:{:02}", self.instant, secs / 3600, (secs.abs() % 3600) / 60),
            None => write!(f, "{}Z", self.instant),
        }
    }
}

/// Dive mode, per §3 and the GLOSSARY's CCR/SCR/OC.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiveMode {
    #[default]
    OC,
    CCR,
    SCR,
    Gauge,
    Freedive,
}

/// Decompression model recorded by the device (not recomputed by this crate).
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DecoModel {
    #[default]
    None,
    Buhlmann {
        conservatism: i32,
        gf_low: u32,
        gf_high: u32,
    },
    Vpm {
        conservatism: i32,
    },
}

/// Salinity/water density, for atmospheric-to-depth conversions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Salinity {
    pub kind: SalinityKind,
    /// Density in kg/m^3, when recorded; 1000 for fresh, ~1025 for salt.
    pub density: f64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalinityKind {
    #[default]
    Fresh,
    Salt,
}

/// GPS fix recorded with the dive, if any.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// Usage tag distinguishing a travel/deco/diluent gas from a primary one.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GasUsage {
    #[default]
    None,
    Oxygen,
    Diluent,
}

/// An `(O2%, He%)` blend. Nitrogen is always `100 - oxygen - helium`.
///
/// Two mixes are equal iff `(oxygen, helium, usage)` match — this is the
/// identity the gas-mix table's dedup logic keys on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Gasmix {
    /// Percent oxygen, `0..=100`.
    pub oxygen: u32,
    /// Percent helium, `0..=100`.
    pub helium: u32,
    pub usage: GasUsage,
    /// Vendor-assigned slot id, when the family records one.
    pub vendor_id: Option<u32>,
    pub diluent: bool,
}

impl Gasmix {
    pub fn new(oxygen: u32, helium: u32) -> Self {
        Self {
            oxygen,
            helium,
            usage: GasUsage::None,
            vendor_id: None,
            diluent: false,
        }
    }

    /// Percent nitrogen: the remainder after oxygen and helium.
    pub fn nitrogen(&self) -> u32 {
        100u32.saturating_sub(self.oxygen).saturating_sub(self.helium)
    }

    /// Identity used by the gas-mix table's linear-scan dedup.
    fn key(&self) -> (u32, u32, GasUsage) {
        (self.oxygen, self.helium, self.usage)
    }
}

impl PartialEq for Gasmix {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

/// Tank volume unit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TankKind {
    #[default]
    None,
    Metric,
    Imperial,
}

/// A cylinder tracked by the device across the dive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Tank {
    /// Volume in decilitres; 0 means unknown.
    pub volume_dl: u32,
    pub work_pressure_bar: f64,
    pub begin_pressure_bar: f64,
    pub end_pressure_bar: f64,
    pub kind: TankKind,
    /// Transmitter or vendor slot id used to discover/update this tank.
    pub transmitter_id: Option<u32>,
    pub active: bool,
    /// Index into the dive's gas-mix table, if linked.
    pub gasmix_index: Option<usize>,
}

impl Tank {
    pub fn new(transmitter_id: Option<u32>) -> Self {
        Self {
            volume_dl: 0,
            work_pressure_bar: 0.0,
            begin_pressure_bar: 0.0,
            end_pressure_bar: 0.0,
            kind: TankKind::None,
            transmitter_id,
            active: true,
            gasmix_index: None,
        }
    }
}

/// Deco/NDL state reported for a sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DecoType {
    Ndl,
    DecoStop,
    SafetyStop,
    DeepStop,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Deco {
    pub kind: DecoType,
    /// Stop/ceiling depth in meters; 0 for NDL.
    pub depth: f64,
    /// Remaining time at this stop, in seconds.
    pub time: u32,
    /// Time-to-surface, in seconds.
    pub tts: u32,
}

/// Which field `get_field` is being asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Divetime,
    MaxDepth,
    AvgDepth,
    TemperatureMinimum,
    TemperatureMaximum,
    Atmospheric,
    Salinity,
    DiveMode,
    DecoModel,
    GasmixCount,
    Gasmix,
    TankCount,
    Tank,
    Location,
}

/// The value returned by `get_field`, tagged by the `FieldKind` requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldValue {
    Seconds(u32),
    Meters(f64),
    Celsius(f64),
    Millibar(u32),
    Salinity(Salinity),
    DiveMode(DiveMode),
    DecoModel(DecoModel),
    Count(u32),
    Gasmix(Gasmix),
    Tank(Tank),
    Location(Location),
}

/// The kind of sample event being emitted — the tag half of the
/// `(kind, value)` pair a [`crate::sink::SampleSink`] receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleKind {
    Time,
    Depth,
    Temperature,
    Pressure,
    Gasmix,
    Setpoint,
    Ppo2,
    Deco,
    Cns,
    Heartbeat,
    Bearing,
    Vendor,
    Event,
}

/// Kind of a vendor-defined bookmark/alarm event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Unknown(u32),
    Ascent,
    Ceiling,
    Workload,
    Transmitter,
    Violation,
    Bookmark,
    Surface,
    SafetyStop,
    GasChange,
    DeepStop,
    Floor,
    MaxDepth,
    PpO2Alert,
}

/// The payload half of a sample event. Carries the pointer-valued
/// [`SampleValue::Vendor`] payload by borrow: per §5, a sink must not keep
/// that slice alive past the `emit` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleValue<'a> {
    /// Seconds since dive start.
    Time(u32),
    /// Meters.
    Depth(f64),
    /// Degrees Celsius.
    Temperature(f64),
    /// `(tank_index, bar)`.
    Pressure(usize, f64),
    /// Index into the dive's gas-mix table.
    Gasmix(usize),
    /// Rebreather setpoint, bar.
    Setpoint(f64),
    /// `(sensor_index, bar)`.
    Ppo2(usize, f64),
    Deco(DecoType, f64, u32, u32),
    /// CNS fraction, `0.0..`.
    Cns(f64),
    /// Beats per minute.
    Heartbeat(u16),
    /// Degrees, `0..360`.
    Bearing(i16),
    /// `(vendor type code, raw payload)`. Borrowed from the source blob.
    Vendor(u32, &'a [u8]),
    /// `(kind, time offset seconds, flags, value)`.
    Event(EventKind, u32, u32, u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gasmix_equality_ignores_vendor_id() {
        let a = Gasmix {
            vendor_id: Some(1),
            ..Gasmix::new(32, 0)
        };
        let b = Gasmix {
            vendor_id: Some(9),
            ..Gasmix::new(32, 0)
        };
        assert_eq!(a, b);
    }

    #[test]
    fn gasmix_nitrogen_is_remainder() {
        let trimix = Gasmix::new(18, 45);
        assert_eq!(trimix.nitrogen(), 37);
    }

    #[test]
    fn datetime_display_distinguishes_known_offset() {
        let dt = Datetime {
            instant: jiff::Timestamp::UNIX_EPOCH,
            offset_seconds: None,
        };
        assert!(dt.to_string().ends_with('Z'));
    }
}
