//! Divesystem iDive/iX3M/iX3M2, the bit-exact example family from SPEC §6/§8
//! scenario 3.
//!
//! Header (`HEADER_SIZE` = 0x36 bytes):
//!
//! | offset | field |
//! |---|---|
//! | 0x00 | u32le firmware build number; `>= APOS4_THRESHOLD` selects the expanded iX3M APOS4 sample layout |
//! | 0x04 | u32le timestamp, seconds since 2008-01-01T00:00:00Z |
//! | 0x08 | u16le raw atmospheric pressure; divisor depends on model (`atmospheric_divisor`) |
//! | 0x0A | u8 water-density index |
//! | 0x0B | u8 gas-mix count, `<= MAX_GASMIXES` |
//! | 0x0C | `MAX_GASMIXES` x 2 bytes: (O2%, He%) per slot |
//! | 0x12 | u16le sample count |
//!
//! APOS4 samples are the 0x40-byte layout given bit-exact in SPEC §6:
//! `+2 timestamp, +6 depth, +8 temp, +10 O2, +11 He, +14 algorithm, +15
//! gf_high, +16 gf_low, +18 mode, +19 setpoint, +21 deco depth, +23
//! decotime, +25 tts, +29 cns, +47 tank id/flags, +49 pressure, +50
//! bearing, +52 record type (0 = sample, 1 = info/GPS at +40/+44/+48)`.
//!
//! Pre-APOS4 firmware uses a denser 0x20-byte record with the same fields
//! minus GPS/bearing/algorithm detail; not bit-exact in any surviving
//! reference, so its offsets below are this crate's own interpretive
//! layout (see DESIGN.md).

use crate::cache::DerivedCache;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::{Parser as ParserTrait, ParserConfig};
use crate::primitives::{u16_le, u32_le};
use crate::sink::{NilSink, SampleSink};
use crate::types::{
    DecoType, Gasmix, Location, Salinity, SalinityKind, SampleKind, SampleValue,
};
use crate::types::{Datetime, FieldKind, FieldValue};

use super::support::{self, EPOCH_2008_01_01};

pub const HEADER_SIZE: usize = 0x36;
const NSAMPLES_OFFSET: usize = 0x12;
const GASMIX_SLOTS_OFFSET: usize = 0x0C;
const MAX_GASMIXES: usize = 8;
const MAX_TANKS: usize = 4;

const APOS4_THRESHOLD: u32 = 40_000_000;
const APOS4_RECORD_SIZE: usize = 0x40;
const LEGACY_RECORD_SIZE: usize = 0x20;

const TANK_300BAR_FLAG: u8 = 0x20;

fn atmospheric_divisor(model: u32) -> f64 {
    match model {
        2 | 3 => 10_000.0,
        _ => 1_000.0,
    }
}

pub struct DivesystemParser<'a> {
    data: &'a [u8],
    model: u32,
    config: ParserConfig,
    timestamp: u32,
    atmospheric_mbar: u32,
    apos4: bool,
    record_size: usize,
    cache: DerivedCache,
}

impl<'a> DivesystemParser<'a> {
    pub fn new(data: &'a [u8], model: u32, config: ParserConfig) -> Result<Self> {
        support::require_min_len(data, HEADER_SIZE, "divesystem_header")?;

        let firmware = u32_le(data, 0x00)
            .ok_or_else(|| Error::data_format("divesystem_header", "truncated firmware field"))?;
        let timestamp = u32_le(data, 0x04)
            .ok_or_else(|| Error::data_format("divesystem_header", "truncated timestamp field"))?;
        let atmospheric_raw = u16_le(data, 0x08)
            .ok_or_else(|| Error::data_format("divesystem_header", "truncated atmospheric field"))?;
        let density_index = data[0x0A];
        let gasmix_count = data[0x0B] as usize;

        let apos4 = firmware >= APOS4_THRESHOLD;
        let divisor = atmospheric_divisor(model);
        let atmospheric_bar = f64::from(atmospheric_raw) / divisor;
        let atmospheric_mbar = (atmospheric_bar * 1000.0).round() as u32;

        let mut cache = DerivedCache::new(MAX_GASMIXES, MAX_TANKS);
        cache.atmospheric_mbar = Some(atmospheric_mbar);
        cache.salinity = Some(Salinity {
            kind: if density_index == 0 {
                SalinityKind::Fresh
            } else {
                SalinityKind::Salt
            },
            density: if density_index == 0 { 1000.0 } else { 1020.0 },
        });

        if gasmix_count > MAX_GASMIXES {
            return Err(Error::data_format(
                "divesystem_header",
                format!("gas-mix count {gasmix_count} exceeds capacity {MAX_GASMIXES}"),
            ));
        }
        for slot in 0..gasmix_count {
            let offset = GASMIX_SLOTS_OFFSET + slot * 2;
            let oxygen = *data
                .get(offset)
                .ok_or_else(|| Error::data_format("divesystem_header", "truncated gas-mix slot"))?;
            let helium = *data
                .get(offset + 1)
                .ok_or_else(|| Error::data_format("divesystem_header", "truncated gas-mix slot"))?;
            cache.gasmixes.push(Gasmix::new(u32::from(oxygen), u32::from(helium)))?;
        }

        let record_size = if apos4 { APOS4_RECORD_SIZE } else { LEGACY_RECORD_SIZE };

        Ok(Self {
            data,
            model,
            config,
            timestamp,
            atmospheric_mbar,
            apos4,
            record_size,
            cache,
        })
    }

    fn nsamples(&self) -> Result<u16> {
        u16_le(self.data, NSAMPLES_OFFSET)
            .ok_or_else(|| Error::data_format("divesystem_header", "truncated sample count"))
    }

    fn ensure_derived(&mut self) -> Result<()> {
        if self.cache.derived_from_samples {
            return Ok(());
        }
        let mut nil = NilSink;
        self.samples_foreach(&mut nil)?;
        Ok(())
    }

    fn decode_apos4_record(&mut self, record: &[u8], sink: &mut dyn SampleSink) -> Result<bool> {
        let record_type = u16_le(record, 52)
            .ok_or_else(|| Error::data_format("divesystem_sample", "truncated record type"))?;

        if record_type == 1 {
            let latitude = i32::from_le_bytes(record[40..44].try_into().unwrap()) as f64 / 1_000_000.0;
            let longitude = i32::from_le_bytes(record[44..48].try_into().unwrap()) as f64 / 1_000_000.0;
            self.cache.location = Some(Location {
                latitude,
                longitude,
                altitude: 0.0,
            });
            return Ok(false);
        }

        let timestamp = u32_le(record, 2)
            .ok_or_else(|| Error::data_format("divesystem_sample", "truncated timestamp"))?;
        let depth = f64::from(u16_le(record, 6).unwrap_or(0)) / 10.0;
        let temp = f64::from(i16::from_le_bytes([record[8], record[9]])) / 10.0;
        let oxygen = u32::from(record[10]);
        let helium = u32::from(record[11]);
        let mode = record[18];
        let setpoint_raw = u16_le(record, 19).unwrap_or(0);
        let deco_depth = f64::from(u16_le(record, 21).unwrap_or(0)) / 10.0;
        let decotime = u32::from(u16_le(record, 23).unwrap_or(0));
        let tts = u32::from(u16_le(record, 25).unwrap_or(0));
        let cns = f64::from(u16_le(record, 29).unwrap_or(0)) / 100.0;
        let tank_byte = record[47];
        let pressure_raw = record[49];
        let bearing = u16_le(record, 50).unwrap_or(0) as i16;

        let time = timestamp.saturating_sub(self.timestamp);

        let mix = Gasmix::new(oxygen, helium);
        let gasmix_index = self.cache.gasmixes.find_or_insert(mix)?;

        self.cache.observe_depth(depth);
        self.cache.observe_temperature(temp);

        sink.emit(SampleKind::Time, SampleValue::Time(time));
        sink.emit(SampleKind::Depth, SampleValue::Depth(depth));
        sink.emit(SampleKind::Temperature, SampleValue::Temperature(temp));
        sink.emit(SampleKind::Gasmix, SampleValue::Gasmix(gasmix_index));

        if mode == 1 || mode == 2 {
            sink.emit(
                SampleKind::Setpoint,
                SampleValue::Setpoint(f64::from(setpoint_raw) / 1000.0),
            );
        }

        if deco_depth > 0.0 {
            sink.emit(
                SampleKind::Deco,
                SampleValue::Deco(DecoType::DecoStop, deco_depth, decotime, tts),
            );
        } else {
            sink.emit(SampleKind::Deco, SampleValue::Deco(DecoType::Ndl, 0.0, 0, tts));
        }

        sink.emit(SampleKind::Cns, SampleValue::Cns(cns));

        let tank_id = u32::from(tank_byte & 0x0F);
        let mut pressure_bar = f64::from(pressure_raw);
        if tank_byte & TANK_300BAR_FLAG != 0 {
            pressure_bar *= 2.0;
        }
        if pressure_bar > 0.0 {
            let tank_index = self.cache.tanks.record_pressure(tank_id, pressure_bar)?;
            sink.emit(SampleKind::Pressure, SampleValue::Pressure(tank_index, pressure_bar));
        }

        if bearing != 0 {
            sink.emit(SampleKind::Bearing, SampleValue::Bearing(bearing));
        }

        Ok(true)
    }

    fn decode_legacy_record(&mut self, record: &[u8], sink: &mut dyn SampleSink) -> Result<bool> {
        let time = u32::from(u16_le(record, 0).unwrap_or(0));
        let depth = f64::from(u16_le(record, 2).unwrap_or(0)) / 10.0;
        let temp = f64::from(i16::from_le_bytes([record[4], record[5]])) / 10.0;
        let oxygen = u32::from(record[6]);
        let helium = u32::from(record[7]);
        let decotime_depth = f64::from(u16_le(record, 9).unwrap_or(0)) / 10.0;
        let decotime = u32::from(u16_le(record, 11).unwrap_or(0));
        let tts = u32::from(u16_le(record, 13).unwrap_or(0));
        let cns = f64::from(u16_le(record, 15).unwrap_or(0)) / 100.0;
        let tank_byte = record[17];
        let pressure_raw = record[18];

        let mix = Gasmix::new(oxygen, helium);
        let gasmix_index = self.cache.gasmixes.find_or_insert(mix)?;

        self.cache.observe_depth(depth);
        self.cache.observe_temperature(temp);

        sink.emit(SampleKind::Time, SampleValue::Time(time));
        sink.emit(SampleKind::Depth, SampleValue::Depth(depth));
        sink.emit(SampleKind::Temperature, SampleValue::Temperature(temp));
        sink.emit(SampleKind::Gasmix, SampleValue::Gasmix(gasmix_index));

        if decotime_depth > 0.0 {
            sink.emit(
                SampleKind::Deco,
                SampleValue::Deco(DecoType::DecoStop, decotime_depth, decotime, tts),
            );
        } else {
            sink.emit(SampleKind::Deco, SampleValue::Deco(DecoType::Ndl, 0.0, 0, tts));
        }
        sink.emit(SampleKind::Cns, SampleValue::Cns(cns));

        let tank_id = u32::from(tank_byte & 0x0F);
        let mut pressure_bar = f64::from(pressure_raw);
        if tank_byte & TANK_300BAR_FLAG != 0 {
            pressure_bar *= 2.0;
        }
        if pressure_bar > 0.0 {
            let tank_index = self.cache.tanks.record_pressure(tank_id, pressure_bar)?;
            sink.emit(SampleKind::Pressure, SampleValue::Pressure(tank_index, pressure_bar));
        }

        Ok(true)
    }
}

impl<'a> ParserTrait<'a> for DivesystemParser<'a> {
    fn family(&self) -> Family {
        Family::DivesystemIDive
    }

    fn model(&self) -> u32 {
        self.model
    }

    fn get_datetime(&mut self) -> Result<Datetime> {
        Ok(support::datetime_from_epoch_seconds(EPOCH_2008_01_01, self.timestamp))
    }

    fn get_field(&mut self, field: FieldKind, index: u32) -> Result<FieldValue> {
        match field {
            FieldKind::Atmospheric => Ok(FieldValue::Millibar(self.atmospheric_mbar)),
            FieldKind::Salinity => self.cache.salinity.map(FieldValue::Salinity).ok_or(Error::Unsupported),
            FieldKind::GasmixCount => Ok(FieldValue::Count(self.cache.gasmixes.len() as u32)),
            FieldKind::Gasmix => self
                .cache
                .gasmixes
                .get(index as usize)
                .copied()
                .map(FieldValue::Gasmix)
                .ok_or_else(|| Error::InvalidArgs(format!("gasmix index {index} out of range"))),
            FieldKind::Divetime => {
                self.ensure_derived()?;
                self.cache.divetime.map(FieldValue::Seconds).ok_or(Error::Unsupported)
            }
            FieldKind::MaxDepth => {
                self.ensure_derived()?;
                self.cache.maxdepth.map(FieldValue::Meters).ok_or(Error::Unsupported)
            }
            FieldKind::AvgDepth => {
                self.ensure_derived()?;
                self.cache.finalize_avgdepth();
                self.cache.avgdepth.map(FieldValue::Meters).ok_or(Error::Unsupported)
            }
            FieldKind::TemperatureMinimum => {
                self.ensure_derived()?;
                self.cache.temperature_min.map(FieldValue::Celsius).ok_or(Error::Unsupported)
            }
            FieldKind::TemperatureMaximum => {
                self.ensure_derived()?;
                self.cache.temperature_max.map(FieldValue::Celsius).ok_or(Error::Unsupported)
            }
            FieldKind::TankCount => {
                self.ensure_derived()?;
                Ok(FieldValue::Count(self.cache.tanks.len() as u32))
            }
            FieldKind::Tank => {
                self.ensure_derived()?;
                self.cache
                    .tanks
                    .get(index as usize)
                    .copied()
                    .map(FieldValue::Tank)
                    .ok_or_else(|| Error::InvalidArgs(format!("tank index {index} out of range")))
            }
            FieldKind::DiveMode => Ok(FieldValue::DiveMode(crate::types::DiveMode::OC)),
            FieldKind::DecoModel => Ok(FieldValue::DecoModel(crate::types::DecoModel::None)),
            FieldKind::Location => {
                self.ensure_derived()?;
                self.cache.location.map(FieldValue::Location).ok_or(Error::Unsupported)
            }
        }
    }

    fn samples_foreach(&mut self, sink: &mut dyn SampleSink) -> Result<()> {
        let nsamples = self.nsamples()?;
        let mut offset = HEADER_SIZE;
        let record_size = self.record_size;
        let apos4 = self.apos4;
        let mut last_time: Option<u32> = None;

        for _ in 0..nsamples {
            if self.config.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let record = self
                .data
                .get(offset..offset + record_size)
                .ok_or_else(|| Error::data_format("divesystem_sample", "truncated sample record"))?
                .to_vec();

            let emitted = if apos4 {
                self.decode_apos4_record(&record, sink)?
            } else {
                self.decode_legacy_record(&record, sink)?
            };

            if emitted {
                if let Some(prev) = last_time {
                    let current = if apos4 {
                        u32_le(&record, 2).unwrap_or(prev).saturating_sub(self.timestamp)
                    } else {
                        u32::from(u16_le(&record, 0).unwrap_or(0))
                    };
                    if current + 5 < prev {
                        return Err(Error::data_format("divesystem_sample", "timestamp moved backward"));
                    }
                    last_time = Some(current);
                } else {
                    last_time = Some(if apos4 {
                        u32_le(&record, 2).unwrap_or(0).saturating_sub(self.timestamp)
                    } else {
                        u32::from(u16_le(&record, 0).unwrap_or(0))
                    });
                }
            }

            offset += record_size;
        }

        self.cache.divetime = last_time.or(self.cache.divetime);
        self.cache.derived_from_samples = true;
        self.cache.finalize_avgdepth();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_header(firmware: u32) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[0x00..0x04].copy_from_slice(&firmware.to_le_bytes());
        data[0x04..0x08].copy_from_slice(&0u32.to_le_bytes()); // timestamp
        data[0x08..0x0A].copy_from_slice(&1013u16.to_le_bytes()); // atmospheric_raw (divisor 1000)
        data[0x0A] = 0; // fresh water
        data[0x0B] = 1; // one gasmix
        data[0x0C] = 21; // O2
        data[0x0D] = 0; // He
        data
    }

    fn apos4_record(time: u32, depth_dm: u16, o2: u8, tank_byte: u8, pressure: u8) -> Vec<u8> {
        let mut rec = vec![0u8; APOS4_RECORD_SIZE];
        rec[2..6].copy_from_slice(&time.to_le_bytes());
        rec[6..8].copy_from_slice(&depth_dm.to_le_bytes());
        rec[8..10].copy_from_slice(&200i16.to_le_bytes()); // 20.0C
        rec[10] = o2;
        rec[11] = 0;
        rec[47] = tank_byte;
        rec[49] = pressure;
        rec[52..54].copy_from_slice(&0u16.to_le_bytes()); // record type = sample
        rec
    }

    #[test]
    fn apos4_scenario_gasmix_change_and_transmitter_doubling() {
        let mut blob = build_header(APOS4_THRESHOLD);
        blob[NSAMPLES_OFFSET..NSAMPLES_OFFSET + 2].copy_from_slice(&5u16.to_le_bytes());

        blob.extend(apos4_record(0, 0, 21, 0x00, 0));
        blob.extend(apos4_record(60, 50, 21, 0x00, 0));
        blob.extend(apos4_record(120, 100, 21, 0x20, 100)); // 300-bar flag, raw 100 -> 200
        blob.extend(apos4_record(180, 50, 32, 0x00, 0)); // gas change to EAN32
        blob.extend(apos4_record(240, 0, 32, 0x00, 0));

        let mut parser = DivesystemParser::new(&blob, 3, ParserConfig::default()).unwrap();

        match parser.get_field(FieldKind::GasmixCount, 0).unwrap() {
            FieldValue::Count(n) => assert_eq!(n, 2),
            _ => panic!("wrong field variant"),
        }

        let mut pressures = Vec::new();
        let mut closure = |kind: SampleKind, value: SampleValue<'_>| {
            if kind == SampleKind::Pressure {
                if let SampleValue::Pressure(_, bar) = value {
                    pressures.push(bar);
                }
            }
        };
        parser.samples_foreach(&mut closure).unwrap();
        assert_eq!(pressures, vec![200.0]);
    }

    #[test]
    fn no_transmitter_emits_no_pressure_and_no_tank() {
        let mut blob = build_header(APOS4_THRESHOLD);
        blob[NSAMPLES_OFFSET..NSAMPLES_OFFSET + 2].copy_from_slice(&2u16.to_le_bytes());
        blob.extend(apos4_record(0, 0, 21, 0x00, 0));
        blob.extend(apos4_record(60, 50, 21, 0x00, 0));

        let mut parser = DivesystemParser::new(&blob, 3, ParserConfig::default()).unwrap();

        let mut pressures = 0;
        let mut closure = |kind: SampleKind, _value: SampleValue<'_>| {
            if kind == SampleKind::Pressure {
                pressures += 1;
            }
        };
        parser.samples_foreach(&mut closure).unwrap();
        assert_eq!(pressures, 0);

        match parser.get_field(FieldKind::TankCount, 0).unwrap() {
            FieldValue::Count(n) => assert_eq!(n, 0),
            _ => panic!("wrong field variant"),
        }
    }

    #[test]
    fn rejects_short_header() {
        let short = vec![0u8; HEADER_SIZE - 1];
        assert!(DivesystemParser::new(&short, 3, ParserConfig::default()).is_err());
    }

    #[test]
    fn legacy_firmware_uses_smaller_record_size() {
        let mut blob = build_header(1_000_000);
        blob[NSAMPLES_OFFSET..NSAMPLES_OFFSET + 2].copy_from_slice(&1u16.to_le_bytes());
        let mut rec = vec![0u8; LEGACY_RECORD_SIZE];
        rec[0..2].copy_from_slice(&10u16.to_le_bytes());
        rec[2..4].copy_from_slice(&55u16.to_le_bytes());
        rec[4..6].copy_from_slice(&210i16.to_le_bytes());
        rec[6] = 21;
        blob.extend(rec);

        let mut parser = DivesystemParser::new(&blob, 1, ParserConfig::default()).unwrap();
        match parser.get_field(FieldKind::MaxDepth, 0).unwrap() {
            FieldValue::Meters(m) => assert!((m - 5.5).abs() < 1e-9),
            _ => panic!("wrong field variant"),
        }
    }
}
