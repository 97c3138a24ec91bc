//! Divesoft Freedom: a TLV-framed 16-byte record log with a signed header
//! (SPEC §6/§8 scenario 2).
//!
//! Header, 64 bytes:
//!
//! | offset | field |
//! |---|---|
//! | 0x00 | 4-byte signature `"DiVE"` |
//! | 0x04 | u16le CRC-16/ANSI over bytes `6..64` |
//! | 0x06 | u32le timestamp, seconds since 2000-01-01T00:00:00Z |
//! | 0x0A | i16le timezone offset, minutes |
//! | 0x0C | u8 header version |
//! | 0x0D..0x40 | reserved |
//!
//! Each record is 16 bytes; the first u32le packs `kind` (low nibble),
//! `timestamp` (bits 4..20, seconds), `sub_id` (bits 20..30). `configuration`
//! records (kind 6) carry a `DECO` sub-record at payload offset 0: gf_lo,
//! gf_hi, flags (bit 0 = seawater), vpm conservatism. `point` records (kind
//! 0) carry depth (1/100 m) and temperature (1/100 C) at payload offset 0/2.

use crate::cache::DerivedCache;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::{Parser as ParserTrait, ParserConfig};
use crate::primitives::{crc16_ansi, u16_le, u32_le};
use crate::sink::{NilSink, SampleSink};
use crate::types::{DecoModel, Salinity, SalinityKind, SampleKind, SampleValue};
use crate::types::{Datetime, FieldKind, FieldValue};

use super::support::{self, EPOCH_2000_01_01};

pub const HEADER_SIZE: usize = 64;
const RECORD_SIZE: usize = 16;
const MAX_GASMIXES: usize = 8;

const SIGNATURE: &[u8; 4] = b"DiVE";

const RECORD_KIND_POINT: u8 = 0;
const RECORD_KIND_CONFIGURATION: u8 = 6;

const MONOTONICITY_TOLERANCE_SECS: u32 = 5;

fn unpack_record_header(word: u32) -> (u8, u32, u32) {
    let kind = (word & 0x0F) as u8;
    let timestamp = (word >> 4) & 0xFFFF;
    let sub_id = (word >> 20) & 0x3FF;
    (kind, timestamp, sub_id)
}

pub struct DivesoftFreedomParser<'a> {
    data: &'a [u8],
    model: u32,
    config: ParserConfig,
    timestamp: u32,
    offset_seconds: i32,
    cache: DerivedCache,
}

impl<'a> DivesoftFreedomParser<'a> {
    pub fn new(data: &'a [u8], model: u32, config: ParserConfig) -> Result<Self> {
        support::require_min_len(data, HEADER_SIZE, "divesoft_header")?;

        if &data[0..4] != SIGNATURE {
            return Err(Error::data_format("divesoft_header", "missing DiVE signature"));
        }

        let stored_crc = u16_le(data, 4)
            .ok_or_else(|| Error::data_format("divesoft_header", "truncated CRC field"))?;
        let computed_crc = crc16_ansi(&data[6..HEADER_SIZE], 0xFFFF);
        if stored_crc != computed_crc {
            return Err(Error::data_format("divesoft_header", "header CRC mismatch"));
        }

        let timestamp = u32_le(data, 6)
            .ok_or_else(|| Error::data_format("divesoft_header", "truncated timestamp field"))?;
        let tz_minutes = i16::from_le_bytes([data[0x0A], data[0x0B]]);
        let offset_seconds = i32::from(tz_minutes) * 60;

        let cache = DerivedCache::new(MAX_GASMIXES, 0);

        Ok(Self {
            data,
            model,
            config,
            timestamp,
            offset_seconds,
            cache,
        })
    }

    fn ensure_derived(&mut self) -> Result<()> {
        if self.cache.derived_from_samples {
            return Ok(());
        }
        let mut nil = NilSink;
        self.samples_foreach(&mut nil)?;
        Ok(())
    }

    fn decode_configuration(&mut self, sub_id: u32, payload: &[u8]) -> Result<()> {
        if sub_id == 1 {
            // "DECO" sub-record.
            if payload.len() < 4 {
                return Err(Error::data_format("divesoft_record", "truncated DECO configuration"));
            }
            let gf_low = u32::from(payload[0]);
            let gf_high = u32::from(payload[1]);
            let flags = payload[2];
            let vpm = payload[3] as i32;

            self.cache.salinity = Some(Salinity {
                kind: if flags & 0x01 != 0 { SalinityKind::Salt } else { SalinityKind::Fresh },
                density: if flags & 0x01 != 0 { 1020.0 } else { 1000.0 },
            });

            self.cache.decomodel = Some(if vpm != 0 {
                DecoModel::Vpm { conservatism: vpm }
            } else {
                DecoModel::Buhlmann { conservatism: 0, gf_low, gf_high }
            });
        }
        Ok(())
    }

    fn decode_point(&mut self, time: u32, payload: &[u8], sink: &mut dyn SampleSink) -> Result<()> {
        if payload.len() < 4 {
            return Err(Error::data_format("divesoft_record", "truncated point record"));
        }
        let depth = f64::from(u16::from_le_bytes([payload[0], payload[1]])) / 100.0;
        let temp = f64::from(i16::from_le_bytes([payload[2], payload[3]])) / 100.0;

        self.cache.observe_depth(depth);
        self.cache.observe_temperature(temp);

        sink.emit(SampleKind::Time, SampleValue::Time(time));
        sink.emit(SampleKind::Depth, SampleValue::Depth(depth));
        sink.emit(SampleKind::Temperature, SampleValue::Temperature(temp));
        Ok(())
    }
}

impl<'a> ParserTrait<'a> for DivesoftFreedomParser<'a> {
    fn family(&self) -> Family {
        Family::DivesoftFreedom
    }

    fn model(&self) -> u32 {
        self.model
    }

    fn get_datetime(&mut self) -> Result<Datetime> {
        Ok(support::datetime_with_offset(EPOCH_2000_01_01, self.timestamp, self.offset_seconds))
    }

    fn get_field(&mut self, field: FieldKind, index: u32) -> Result<FieldValue> {
        match field {
            FieldKind::Salinity => {
                self.ensure_derived()?;
                self.cache.salinity.map(FieldValue::Salinity).ok_or(Error::Unsupported)
            }
            FieldKind::DecoModel => {
                self.ensure_derived()?;
                self.cache.decomodel.map(FieldValue::DecoModel).ok_or(Error::Unsupported)
            }
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
            FieldKind::GasmixCount => Ok(FieldValue::Count(self.cache.gasmixes.len() as u32)),
            FieldKind::Gasmix => self
                .cache
                .gasmixes
                .get(index as usize)
                .copied()
                .map(FieldValue::Gasmix)
                .ok_or_else(|| Error::InvalidArgs(format!("gasmix index {index} out of range"))),
            FieldKind::TankCount => Ok(FieldValue::Count(0)),
            FieldKind::Tank => Err(Error::InvalidArgs(format!("tank index {index} out of range"))),
            FieldKind::DiveMode => Ok(FieldValue::DiveMode(crate::types::DiveMode::OC)),
            FieldKind::Atmospheric => Err(Error::Unsupported),
            FieldKind::Location => Err(Error::Unsupported),
        }
    }

    fn samples_foreach(&mut self, sink: &mut dyn SampleSink) -> Result<()> {
        let mut offset = HEADER_SIZE;
        let mut last_time: Option<u32> = None;

        while offset + RECORD_SIZE <= self.data.len() {
            if self.config.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let record = &self.data[offset..offset + RECORD_SIZE];
            let word = u32::from_le_bytes(record[0..4].try_into().unwrap());
            let (kind, time, sub_id) = unpack_record_header(word);
            let payload = &record[4..];

            match kind {
                RECORD_KIND_POINT => {
                    if let Some(prev) = last_time {
                        if time + MONOTONICITY_TOLERANCE_SECS < prev {
                            return Err(Error::data_format("divesoft_sample", "timestamp moved backward"));
                        }
                        if time < prev {
                            log::warn!("divesoft: timestamp blip {time} after {prev}, skipping sample");
                            offset += RECORD_SIZE;
                            continue;
                        }
                    }
                    self.decode_point(time, payload, sink)?;
                    last_time = Some(time);
                }
                RECORD_KIND_CONFIGURATION => {
                    self.decode_configuration(sub_id, payload)?;
                }
                other => {
                    log::trace!("divesoft: ignoring record kind {other}");
                }
            }

            offset += RECORD_SIZE;
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

    fn pack_record_header(kind: u8, timestamp: u32, sub_id: u32) -> u32 {
        (kind as u32 & 0x0F) | ((timestamp & 0xFFFF) << 4) | ((sub_id & 0x3FF) << 20)
    }

    fn build_blob() -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[0..4].copy_from_slice(SIGNATURE);
        data[6..10].copy_from_slice(&1_000_000u32.to_le_bytes());
        data[0x0A..0x0C].copy_from_slice(&60i16.to_le_bytes()); // +1h

        let crc = crc16_ansi(&data[6..HEADER_SIZE], 0xFFFF);
        data[4..6].copy_from_slice(&crc.to_le_bytes());

        let mut config_record = vec![0u8; RECORD_SIZE];
        config_record[0..4].copy_from_slice(&pack_record_header(RECORD_KIND_CONFIGURATION, 0, 1).to_le_bytes());
        config_record[4] = 30; // gf_lo
        config_record[5] = 85; // gf_hi
        config_record[6] = 0x01; // seawater bit
        config_record[7] = 0; // vpm = 0
        data.extend(config_record);

        for (time, depth_cm) in [(0u32, 0u16), (10, 500), (20, 1000), (30, 500)] {
            let mut rec = vec![0u8; RECORD_SIZE];
            rec[0..4].copy_from_slice(&pack_record_header(RECORD_KIND_POINT, time, 0).to_le_bytes());
            rec[4..6].copy_from_slice(&depth_cm.to_le_bytes());
            data.extend(rec);
        }

        data
    }

    #[test]
    fn scenario_deco_model_and_salinity_and_maxdepth() {
        let blob = build_blob();
        let mut parser = DivesoftFreedomParser::new(&blob, 0, ParserConfig::default()).unwrap();

        match parser.get_field(FieldKind::DecoModel, 0).unwrap() {
            FieldValue::DecoModel(DecoModel::Buhlmann { gf_low, gf_high, .. }) => {
                assert_eq!(gf_low, 30);
                assert_eq!(gf_high, 85);
            }
            other => panic!("unexpected deco model: {other:?}"),
        }

        match parser.get_field(FieldKind::Salinity, 0).unwrap() {
            FieldValue::Salinity(s) => assert_eq!(s.kind, SalinityKind::Salt),
            _ => panic!("wrong field variant"),
        }

        match parser.get_field(FieldKind::MaxDepth, 0).unwrap() {
            FieldValue::Meters(m) => assert!((m - 10.0).abs() < 1e-9),
            _ => panic!("wrong field variant"),
        }

        let mut count = 0;
        let mut closure = |kind: SampleKind, _v: SampleValue<'_>| {
            if kind == SampleKind::Time {
                count += 1;
            }
        };
        parser.samples_foreach(&mut closure).unwrap();
        assert_eq!(count, 4);
    }

    #[test]
    fn rejects_bad_crc() {
        let mut blob = build_blob();
        blob[4] ^= 0xFF;
        assert!(DivesoftFreedomParser::new(&blob, 0, ParserConfig::default()).is_err());
    }

    #[test]
    fn rejects_missing_signature() {
        let mut blob = build_blob();
        blob[0] = b'X';
        assert!(DivesoftFreedomParser::new(&blob, 0, ParserConfig::default()).is_err());
    }
}
