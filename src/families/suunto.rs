//! Suunto D9 / Vyper / Solution / HelO2: fixed-stride records (§1 family
//! list) gated by an undocumented HelO2 heuristic (§9 Open Questions,
//! decided: preserved as-is, not reconciled).
//!
//! Header (`HEADER_SIZE` = 0x48 bytes):
//!
//! | offset | field |
//! |---|---|
//! | 0x00 | 3-byte sequence marker; `{0x01, 0x00, 0x00}` is the HelO2 gate (see below) |
//! | 0x03 | u32le timestamp, Unix seconds (no vendor epoch offset) |
//! | 0x07 | u16le sample interval, seconds |
//! | 0x09 | u8 gas-mix count, `<= MAX_GASMIXES` |
//! | 0x0A | `MAX_GASMIXES` x 2 bytes: (O2%, He%) per slot, stop at first disabled (O2 == 0) |
//! | 0x10 | u16le atmospheric pressure, mbar |
//! | 0x12 | u8 water-density index (`DENSITY_TABLE`) |
//! | 0x44 | u16le sample count |
//!
//! **HelO2 gate (§9 Open Question, preserved exactly):** when the header's
//! 3-byte sequence marker at offset 0 reads `{0x01, 0x00, 0x00}`, the
//! profile is assumed to carry an extra 12-byte block immediately after
//! the header and the sample loop starts 12 bytes later than usual. The
//! source never documents what this block contains; this crate skips it
//! unread, exactly as the heuristic requires, and flags it here for
//! replacement if clearer vendor documentation ever surfaces.
//!
//! Samples are 6 bytes: u16le depth (1/10 m), i16le temperature (1/10 C),
//! u8 O2%, u8 He% (a per-sample gas mix, rolled into the gas-mix table).

use crate::cache::DerivedCache;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::{Parser as ParserTrait, ParserConfig};
use crate::primitives::{u16_le, u32_le};
use crate::sink::{NilSink, SampleSink};
use crate::types::{Gasmix, Salinity, SalinityKind, SampleKind, SampleValue};
use crate::types::{Datetime, FieldKind, FieldValue};

use super::support;

pub const HEADER_SIZE: usize = 0x48;
const NSAMPLES_OFFSET: usize = 0x44;
const GASMIX_SLOTS_OFFSET: usize = 0x0A;
const SAMPLE_SIZE: usize = 6;
const MAX_GASMIXES: usize = 3;

const HELO2_SEQUENCE: [u8; 3] = [0x01, 0x00, 0x00];
const HELO2_SHIFT: usize = 12;

const DENSITY_TABLE: [f64; 2] = [1000.0, 1025.0];

pub struct SuuntoParser<'a> {
    data: &'a [u8],
    model: u32,
    config: ParserConfig,
    timestamp: u32,
    atmospheric_mbar: u32,
    profile_start: usize,
    cache: DerivedCache,
}

impl<'a> SuuntoParser<'a> {
    pub fn new(data: &'a [u8], model: u32, config: ParserConfig) -> Result<Self> {
        support::require_min_len(data, HEADER_SIZE, "suunto_header")?;

        let timestamp = u32_le(data, 0x03)
            .ok_or_else(|| Error::data_format("suunto_header", "truncated timestamp field"))?;
        let atmospheric_mbar = u32::from(
            u16_le(data, 0x10).ok_or_else(|| Error::data_format("suunto_header", "truncated atmospheric field"))?,
        );
        let density_index = data[0x12];
        let density = *DENSITY_TABLE
            .get(density_index as usize)
            .ok_or_else(|| Error::data_format("suunto_header", format!("unknown density index {density_index}")))?;
        let gasmix_count = data[0x09] as usize;
        if gasmix_count > MAX_GASMIXES {
            return Err(Error::data_format(
                "suunto_header",
                format!("gas-mix count {gasmix_count} exceeds capacity {MAX_GASMIXES}"),
            ));
        }

        let mut cache = DerivedCache::new(MAX_GASMIXES, 0);
        cache.atmospheric_mbar = Some(atmospheric_mbar);
        cache.salinity = Some(Salinity {
            kind: if density_index == 0 { SalinityKind::Fresh } else { SalinityKind::Salt },
            density,
        });

        for slot in 0..gasmix_count {
            let offset = GASMIX_SLOTS_OFFSET + slot * 2;
            let oxygen = *data
                .get(offset)
                .ok_or_else(|| Error::data_format("suunto_header", "truncated gas-mix slot"))?;
            if oxygen == 0 {
                break;
            }
            let helium = *data
                .get(offset + 1)
                .ok_or_else(|| Error::data_format("suunto_header", "truncated gas-mix slot"))?;
            cache.gasmixes.push(Gasmix::new(u32::from(oxygen), u32::from(helium)))?;
        }

        let profile_start = if data[0..3] == HELO2_SEQUENCE {
            HEADER_SIZE + HELO2_SHIFT
        } else {
            HEADER_SIZE
        };

        Ok(Self {
            data,
            model,
            config,
            timestamp,
            atmospheric_mbar,
            profile_start,
            cache,
        })
    }

    fn nsamples(&self) -> Result<u16> {
        u16_le(self.data, NSAMPLES_OFFSET)
            .ok_or_else(|| Error::data_format("suunto_header", "truncated sample count"))
    }

    fn ensure_derived(&mut self) -> Result<()> {
        if self.cache.derived_from_samples {
            return Ok(());
        }
        let mut nil = NilSink;
        self.samples_foreach(&mut nil)?;
        Ok(())
    }
}

impl<'a> ParserTrait<'a> for SuuntoParser<'a> {
    fn family(&self) -> Family {
        Family::SuuntoD9
    }

    fn model(&self) -> u32 {
        self.model
    }

    fn get_datetime(&mut self) -> Result<Datetime> {
        Ok(Datetime {
            instant: jiff::Timestamp::from_second(i64::from(self.timestamp))
                .unwrap_or(jiff::Timestamp::UNIX_EPOCH),
            offset_seconds: None,
        })
    }

    fn get_field(&mut self, field: FieldKind, index: u32) -> Result<FieldValue> {
        match field {
            FieldKind::Atmospheric => Ok(FieldValue::Millibar(self.atmospheric_mbar)),
            FieldKind::Salinity => self.cache.salinity.map(FieldValue::Salinity).ok_or(Error::Unsupported),
            FieldKind::DiveMode => Ok(FieldValue::DiveMode(crate::types::DiveMode::OC)),
            FieldKind::DecoModel => Ok(FieldValue::DecoModel(crate::types::DecoModel::None)),
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
            FieldKind::TankCount => Ok(FieldValue::Count(0)),
            FieldKind::Tank => Err(Error::InvalidArgs(format!("tank index {index} out of range"))),
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
            FieldKind::Location => Err(Error::Unsupported),
        }
    }

    fn samples_foreach(&mut self, sink: &mut dyn SampleSink) -> Result<()> {
        let nsamples = self.nsamples()?;
        let mut offset = self.profile_start;
        let mut time = 0u32;
        let interval = u32::from(u16_le(self.data, 0x07).unwrap_or(1)).max(1);

        for _ in 0..nsamples {
            if self.config.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let record = self
                .data
                .get(offset..offset + SAMPLE_SIZE)
                .ok_or_else(|| Error::data_format("suunto_sample", "truncated sample record"))?;

            let depth = f64::from(u16_le(record, 0).unwrap_or(0)) / 10.0;
            let temp = f64::from(i16::from_le_bytes([record[2], record[3]])) / 10.0;
            let oxygen = u32::from(record[4]);
            let helium = u32::from(record[5]);

            self.cache.observe_depth(depth);
            self.cache.observe_temperature(temp);

            sink.emit(SampleKind::Time, SampleValue::Time(time));
            sink.emit(SampleKind::Depth, SampleValue::Depth(depth));
            sink.emit(SampleKind::Temperature, SampleValue::Temperature(temp));

            if oxygen > 0 {
                let gasmix_index = self.cache.gasmixes.find_or_insert(Gasmix::new(oxygen, helium))?;
                sink.emit(SampleKind::Gasmix, SampleValue::Gasmix(gasmix_index));
            }

            offset += SAMPLE_SIZE;
            time += interval;
        }

        self.cache.divetime = Some(time.saturating_sub(interval));
        self.cache.derived_from_samples = true;
        self.cache.finalize_avgdepth();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_header(helo2: bool) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        if helo2 {
            data[0..3].copy_from_slice(&HELO2_SEQUENCE);
        }
        data[0x03..0x07].copy_from_slice(&1_700_000_000u32.to_le_bytes());
        data[0x07..0x09].copy_from_slice(&10u16.to_le_bytes());
        data[0x09] = 1;
        data[0x0A] = 21;
        data[0x0B] = 0;
        data[0x10..0x12].copy_from_slice(&1013u16.to_le_bytes());
        data
    }

    fn sample(depth_dm: u16, o2: u8, he: u8) -> Vec<u8> {
        let mut rec = vec![0u8; SAMPLE_SIZE];
        rec[0..2].copy_from_slice(&depth_dm.to_le_bytes());
        rec[2..4].copy_from_slice(&180i16.to_le_bytes());
        rec[4] = o2;
        rec[5] = he;
        rec
    }

    #[test]
    fn helo2_gate_shifts_profile_by_12_bytes() {
        let mut blob = build_header(true);
        blob[NSAMPLES_OFFSET..NSAMPLES_OFFSET + 2].copy_from_slice(&1u16.to_le_bytes());
        blob.extend(vec![0xAAu8; HELO2_SHIFT]); // undocumented block, skipped
        blob.extend(sample(100, 21, 0));

        let mut parser = SuuntoParser::new(&blob, 0, ParserConfig::default()).unwrap();
        match parser.get_field(FieldKind::MaxDepth, 0).unwrap() {
            FieldValue::Meters(m) => assert!((m - 10.0).abs() < 1e-9),
            _ => panic!("wrong field variant"),
        }
    }

    #[test]
    fn non_helo2_profile_starts_immediately_after_header() {
        let mut blob = build_header(false);
        blob[NSAMPLES_OFFSET..NSAMPLES_OFFSET + 2].copy_from_slice(&1u16.to_le_bytes());
        blob.extend(sample(55, 21, 0));

        let mut parser = SuuntoParser::new(&blob, 0, ParserConfig::default()).unwrap();
        match parser.get_field(FieldKind::MaxDepth, 0).unwrap() {
            FieldValue::Meters(m) => assert!((m - 5.5).abs() < 1e-9),
            _ => panic!("wrong field variant"),
        }
    }

    #[test]
    fn trimix_sample_extends_gasmix_table() {
        let mut blob = build_header(false);
        blob[NSAMPLES_OFFSET..NSAMPLES_OFFSET + 2].copy_from_slice(&2u16.to_le_bytes());
        blob.extend(sample(100, 21, 0));
        blob.extend(sample(200, 18, 35));

        let mut parser = SuuntoParser::new(&blob, 0, ParserConfig::default()).unwrap();
        match parser.get_field(FieldKind::GasmixCount, 0).unwrap() {
            FieldValue::Count(n) => assert_eq!(n, 2),
            _ => panic!("wrong field variant"),
        }
    }

    #[test]
    fn rejects_short_header() {
        let short = vec![0u8; HEADER_SIZE - 1];
        assert!(SuuntoParser::new(&short, 0, ParserConfig::default()).is_err());
    }
}
