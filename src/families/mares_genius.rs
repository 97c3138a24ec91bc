//! Mares Genius: a magic-tagged TLV record log, each record closed by its
//! own CRC-16/CCITT (SPEC §6/§8 scenario 4).
//!
//! File header, 8 bytes: 4-byte signature `"MGNS"` + u32le timestamp
//! (seconds since 2000-01-01T00:00:00Z). Every record after the header is
//! `[4-byte big-endian ASCII magic][body][u16be CRC-16/CCITT over
//! magic+body]`; the magic's total record length (magic + body + CRC) is
//! looked up in `RECORD_LENGTHS`.
//!
//! - `DSTR` (58 bytes): dive start; body carries the default gas mix (O2,
//!   He) at offset 0/1.
//! - `DPRS` (34 bytes): one profile sample — time delta (s), depth
//!   (1/100 m), temperature (1/100 C), gas mix (O2, He), deco stop depth
//!   (1/100 m) and time (s).
//! - `AIRS` (16 bytes): a tank pressure reading — tank id, pressure
//!   (1/100 bar) — attributed to the currently active tank.
//! - `DEND` (162 bytes): dive summary/end marker; not re-derived here
//!   since every exposed field is computed from the sample stream.

use crate::cache::DerivedCache;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::{Parser as ParserTrait, ParserConfig};
use crate::primitives::{crc16_ccitt, u16_be, u32_le};
use crate::sink::{NilSink, SampleSink};
use crate::types::{DecoType, Gasmix, SampleKind, SampleValue};
use crate::types::{Datetime, FieldKind, FieldValue};

use super::support::{self, EPOCH_2000_01_01};

pub const HEADER_SIZE: usize = 8;
const MAX_GASMIXES: usize = 8;
const MAX_TANKS: usize = 4;

const SIGNATURE: &[u8; 4] = b"MGNS";

fn record_length(magic: &[u8; 4]) -> Option<usize> {
    match magic {
        b"DSTR" => Some(58),
        b"TISS" => Some(138),
        b"DPRS" => Some(34),
        b"SDPT" => Some(78),
        b"AIRS" => Some(16),
        b"DEND" => Some(162),
        _ => None,
    }
}

pub struct MaresGeniusParser<'a> {
    data: &'a [u8],
    model: u32,
    config: ParserConfig,
    timestamp: u32,
    cache: DerivedCache,
}

impl<'a> MaresGeniusParser<'a> {
    pub fn new(data: &'a [u8], model: u32, config: ParserConfig) -> Result<Self> {
        support::require_min_len(data, HEADER_SIZE, "mares_genius_header")?;
        if &data[0..4] != SIGNATURE {
            return Err(Error::data_format("mares_genius_header", "missing MGNS signature"));
        }
        let timestamp = u32_le(data, 4)
            .ok_or_else(|| Error::data_format("mares_genius_header", "truncated timestamp field"))?;

        Ok(Self {
            data,
            model,
            config,
            timestamp,
            cache: DerivedCache::new(MAX_GASMIXES, MAX_TANKS),
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

    fn verify_record_crc(magic: &[u8; 4], record: &[u8]) -> Result<()> {
        let total_len = record.len();
        let stored = u16_be(record, total_len - 2)
            .ok_or_else(|| Error::data_format("mares_genius_record", "truncated record CRC"))?;
        let computed = crc16_ccitt(&record[..total_len - 2], 0x0000);
        if stored != computed {
            return Err(Error::data_format(
                "mares_genius_record",
                format!("{} CRC mismatch", String::from_utf8_lossy(magic)),
            ));
        }
        Ok(())
    }
}

impl<'a> ParserTrait<'a> for MaresGeniusParser<'a> {
    fn family(&self) -> Family {
        Family::MaresGenius
    }

    fn model(&self) -> u32 {
        self.model
    }

    fn get_datetime(&mut self) -> Result<Datetime> {
        Ok(support::datetime_from_epoch_seconds(EPOCH_2000_01_01, self.timestamp))
    }

    fn get_field(&mut self, field: FieldKind, index: u32) -> Result<FieldValue> {
        match field {
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
            FieldKind::GasmixCount => {
                self.ensure_derived()?;
                Ok(FieldValue::Count(self.cache.gasmixes.len() as u32))
            }
            FieldKind::Gasmix => {
                self.ensure_derived()?;
                self.cache
                    .gasmixes
                    .get(index as usize)
                    .copied()
                    .map(FieldValue::Gasmix)
                    .ok_or_else(|| Error::InvalidArgs(format!("gasmix index {index} out of range")))
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
            FieldKind::Atmospheric => Err(Error::Unsupported),
            FieldKind::Salinity => Err(Error::Unsupported),
            FieldKind::Location => Err(Error::Unsupported),
        }
    }

    fn samples_foreach(&mut self, sink: &mut dyn SampleSink) -> Result<()> {
        let mut offset = HEADER_SIZE;
        let mut time = 0u32;
        let mut current_tank_id = 0u32;

        while offset + 4 <= self.data.len() {
            if self.config.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let magic: [u8; 4] = self.data[offset..offset + 4].try_into().unwrap();
            let Some(length) = record_length(&magic) else {
                return Err(Error::data_format("mares_genius_record", "unknown record magic"));
            };
            let record = self
                .data
                .get(offset..offset + length)
                .ok_or_else(|| Error::data_format("mares_genius_record", "truncated record"))?;
            Self::verify_record_crc(&magic, record)?;
            let body = &record[4..length - 2];

            match &magic {
                b"DSTR" => {
                    let oxygen = u32::from(body[0]);
                    let helium = u32::from(body[1]);
                    self.cache.gasmixes.push(Gasmix::new(oxygen, helium))?;
                }
                b"DPRS" => {
                    let delta = u16_be(body, 0).unwrap_or(0);
                    let depth = f64::from(u16_be(body, 2).unwrap_or(0)) / 100.0;
                    let temp = f64::from(i16::from_be_bytes([body[4], body[5]])) / 100.0;
                    let oxygen = u32::from(body[6]);
                    let helium = u32::from(body[7]);
                    let deco_depth = f64::from(u16_be(body, 8).unwrap_or(0)) / 100.0;
                    let deco_time = u32::from(u16_be(body, 10).unwrap_or(0));

                    time += u32::from(delta);

                    let gasmix_index = self.cache.gasmixes.find_or_insert(Gasmix::new(oxygen, helium))?;

                    self.cache.observe_depth(depth);
                    self.cache.observe_temperature(temp);

                    sink.emit(SampleKind::Time, SampleValue::Time(time));
                    sink.emit(SampleKind::Depth, SampleValue::Depth(depth));
                    sink.emit(SampleKind::Temperature, SampleValue::Temperature(temp));
                    sink.emit(SampleKind::Gasmix, SampleValue::Gasmix(gasmix_index));

                    if deco_depth > 0.0 {
                        sink.emit(
                            SampleKind::Deco,
                            SampleValue::Deco(DecoType::DecoStop, deco_depth, deco_time, deco_time),
                        );
                    } else {
                        sink.emit(SampleKind::Deco, SampleValue::Deco(DecoType::Ndl, 0.0, 0, deco_time));
                    }
                }
                b"AIRS" => {
                    current_tank_id = u32::from(body[0]);
                    let pressure = f64::from(u16_be(body, 1).unwrap_or(0)) / 100.0;
                    let tank_index = self.cache.tanks.record_pressure(current_tank_id, pressure)?;
                    sink.emit(SampleKind::Pressure, SampleValue::Pressure(tank_index, pressure));
                }
                b"DEND" => {
                    // Dive summary; every exposed field is re-derived from samples.
                }
                _ => {
                    log::trace!("mares_genius: ignoring record {}", String::from_utf8_lossy(&magic));
                }
            }

            offset += length;
        }

        let _ = current_tank_id;
        self.cache.divetime = Some(time);
        self.cache.derived_from_samples = true;
        self.cache.finalize_avgdepth();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(magic: &[u8; 4], body: &[u8], total_len: usize) -> Vec<u8> {
        let mut rec = Vec::with_capacity(total_len);
        rec.extend_from_slice(magic);
        rec.extend_from_slice(body);
        rec.resize(total_len - 2, 0);
        let crc = crc16_ccitt(&rec, 0x0000);
        rec.extend_from_slice(&crc.to_be_bytes());
        rec
    }

    fn build_blob() -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[0..4].copy_from_slice(SIGNATURE);
        data[4..8].copy_from_slice(&0u32.to_le_bytes());

        data.extend(record(b"DSTR", &[21, 0], 58));

        let mut dprs1_body = vec![0u8; 12];
        dprs1_body[0..2].copy_from_slice(&10u16.to_be_bytes());
        dprs1_body[2..4].copy_from_slice(&500u16.to_be_bytes());
        dprs1_body[4..6].copy_from_slice(&2000i16.to_be_bytes());
        dprs1_body[6] = 21;
        data.extend(record(b"DPRS", &dprs1_body, 34));

        let mut dprs2_body = vec![0u8; 12];
        dprs2_body[0..2].copy_from_slice(&10u16.to_be_bytes());
        dprs2_body[2..4].copy_from_slice(&1000u16.to_be_bytes());
        dprs2_body[4..6].copy_from_slice(&2000i16.to_be_bytes());
        dprs2_body[6] = 21;
        data.extend(record(b"DPRS", &dprs2_body, 34));

        let mut airs_body = vec![0u8; 10];
        airs_body[0] = 0;
        airs_body[1..3].copy_from_slice(&18000u16.to_be_bytes()); // 180.00 bar
        data.extend(record(b"AIRS", &airs_body, 16));

        let mut dprs3_body = vec![0u8; 12];
        dprs3_body[0..2].copy_from_slice(&10u16.to_be_bytes());
        dprs3_body[2..4].copy_from_slice(&500u16.to_be_bytes());
        dprs3_body[4..6].copy_from_slice(&2000i16.to_be_bytes());
        dprs3_body[6] = 21;
        data.extend(record(b"DPRS", &dprs3_body, 34));

        data.extend(record(b"DEND", &[], 162));

        data
    }

    #[test]
    fn scenario_tank_count_and_endpressure() {
        let blob = build_blob();
        let mut parser = MaresGeniusParser::new(&blob, 0, ParserConfig::default()).unwrap();

        match parser.get_field(FieldKind::TankCount, 0).unwrap() {
            FieldValue::Count(n) => assert_eq!(n, 1),
            _ => panic!("wrong field variant"),
        }
        match parser.get_field(FieldKind::Tank, 0).unwrap() {
            FieldValue::Tank(tank) => assert!((tank.end_pressure_bar - 180.0).abs() < 1e-9),
            _ => panic!("wrong field variant"),
        }
    }

    #[test]
    fn rejects_bad_record_crc() {
        let mut blob = build_blob();
        let dstr_offset = HEADER_SIZE;
        blob[dstr_offset + 10] ^= 0xFF;
        let mut parser = MaresGeniusParser::new(&blob, 0, ParserConfig::default()).unwrap();
        assert!(parser.get_field(FieldKind::TankCount, 0).is_err());
    }
}
