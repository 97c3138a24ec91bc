//! McLean Extreme: the simplest fixed-stride family, used as the worked
//! example in SPEC_FULL §8 scenario 1.
//!
//! Header layout (`HEADER_SIZE` = 0x5E bytes):
//!
//! | offset | field |
//! |---|---|
//! | 0x00 | u32le timestamp, seconds since 2000-01-01T00:00:00Z |
//! | 0x04 | u32le dive-time start marker (s) |
//! | 0x08 | u32le dive-time end marker (s); `divetime = end - start` |
//! | 0x0C | u16le atmospheric pressure, mbar |
//! | 0x0E | u8 water-density index (`DENSITY_TABLE`) |
//! | 0x0F | u8 dive-mode byte (`DIVE_MODE_TABLE`) |
//! | 0x10 | u8 gas config byte: percent O2, helium assumed 0 |
//! | 0x5C | u16le sample count |
//!
//! Samples are 4 bytes: u16le gauge pressure (mbar above atmospheric),
//! i8 temperature (whole degrees C), u8 flags (reserved, unused here).

use crate::cache::DerivedCache;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::{Parser as ParserTrait, ParserConfig};
use crate::primitives::u16_le;
use crate::sink::{NilSink, SampleSink};
use crate::types::{Datetime, DiveMode, FieldKind, FieldValue, Gasmix, SampleKind, SampleValue};

use super::support::{self, EPOCH_2000_01_01};

pub const HEADER_SIZE: usize = 0x5E;
const NSAMPLES_OFFSET: usize = 0x5C;
const SAMPLE_SIZE: usize = 4;
const MAX_GASMIXES: usize = 1;
const GRAVITY: f64 = 9.806_65;

const DENSITY_TABLE: [f64; 3] = [1000.0, 1020.0, 1030.0];

fn divemode_from_byte(byte: u8) -> Result<DiveMode> {
    match byte {
        0 => Ok(DiveMode::OC),
        1 => Ok(DiveMode::CCR),
        2 => Ok(DiveMode::SCR),
        3 => Ok(DiveMode::Gauge),
        4 => Ok(DiveMode::Freedive),
        other => Err(Error::data_format("mclean_divemode", format!("unknown dive-mode byte {other}"))),
    }
}

pub struct McLeanParser<'a> {
    data: &'a [u8],
    model: u32,
    config: ParserConfig,
    atmospheric_mbar: u32,
    density: f64,
    divetime: u32,
    timestamp: u32,
    cache: DerivedCache,
}

impl<'a> McLeanParser<'a> {
    pub fn new(data: &'a [u8], model: u32, config: ParserConfig) -> Result<Self> {
        support::require_min_len(data, HEADER_SIZE, "mclean_header")?;

        let timestamp = u32::from_le_bytes(data[0..4].try_into().unwrap());
        let start = u32::from_le_bytes(data[4..8].try_into().unwrap());
        let end = u32::from_le_bytes(data[8..12].try_into().unwrap());
        let atmospheric_mbar = u32::from(u16_le(data, 0x0C).ok_or_else(|| {
            Error::data_format("mclean_header", "truncated atmospheric field")
        })?);
        let density_index = data[0x0E];
        let density = *DENSITY_TABLE
            .get(density_index as usize)
            .ok_or_else(|| Error::data_format("mclean_header", format!("unknown density index {density_index}")))?;
        let divemode_byte = data[0x0F];
        let divemode = divemode_from_byte(divemode_byte)?;
        let gas_o2 = data[0x10];

        let mut cache = DerivedCache::new(MAX_GASMIXES, 0);
        cache.atmospheric_mbar = Some(atmospheric_mbar);
        cache.salinity = Some(crate::types::Salinity {
            kind: if density_index == 0 {
                crate::types::SalinityKind::Fresh
            } else {
                crate::types::SalinityKind::Salt
            },
            density,
        });
        cache.divemode = Some(divemode);
        cache.divetime = Some(end.saturating_sub(start));
        cache.gasmixes.push(Gasmix::new(u32::from(gas_o2), 0))?;

        Ok(Self {
            data,
            model,
            config,
            atmospheric_mbar,
            density,
            divetime: end.saturating_sub(start),
            timestamp,
            cache,
        })
    }

    fn nsamples(&self) -> Result<u16> {
        u16_le(self.data, NSAMPLES_OFFSET)
            .ok_or_else(|| Error::data_format("mclean_header", "truncated sample count"))
    }

    fn depth_from_gauge_mbar(&self, gauge_mbar: u16) -> f64 {
        let pascal = f64::from(gauge_mbar) * 100.0;
        pascal / (self.density * GRAVITY)
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

impl<'a> ParserTrait<'a> for McLeanParser<'a> {
    fn family(&self) -> Family {
        Family::McLeanExtreme
    }

    fn model(&self) -> u32 {
        self.model
    }

    fn get_datetime(&mut self) -> Result<Datetime> {
        Ok(support::datetime_from_epoch_seconds(EPOCH_2000_01_01, self.timestamp))
    }

    fn get_field(&mut self, field: FieldKind, index: u32) -> Result<FieldValue> {
        match field {
            FieldKind::Divetime => Ok(FieldValue::Seconds(self.divetime)),
            FieldKind::Atmospheric => Ok(FieldValue::Millibar(self.atmospheric_mbar)),
            FieldKind::Salinity => self
                .cache
                .salinity
                .map(FieldValue::Salinity)
                .ok_or(Error::Unsupported),
            FieldKind::DiveMode => self
                .cache
                .divemode
                .map(FieldValue::DiveMode)
                .ok_or(Error::Unsupported),
            FieldKind::DecoModel => Ok(FieldValue::DecoModel(crate::types::DecoModel::None)),
            FieldKind::GasmixCount => Ok(FieldValue::Count(self.cache.gasmixes.len() as u32)),
            FieldKind::Gasmix => self
                .cache
                .gasmixes
                .get(index as usize)
                .copied()
                .map(FieldValue::Gasmix)
                .ok_or_else(|| Error::InvalidArgs(format!("gasmix index {index} out of range"))),
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
                self.cache
                    .temperature_min
                    .map(FieldValue::Celsius)
                    .ok_or(Error::Unsupported)
            }
            FieldKind::TemperatureMaximum => {
                self.ensure_derived()?;
                self.cache
                    .temperature_max
                    .map(FieldValue::Celsius)
                    .ok_or(Error::Unsupported)
            }
            FieldKind::TankCount => Ok(FieldValue::Count(0)),
            FieldKind::Tank => Err(Error::InvalidArgs(format!("tank index {index} out of range"))),
            FieldKind::Location => Err(Error::Unsupported),
        }
    }

    fn samples_foreach(&mut self, sink: &mut dyn SampleSink) -> Result<()> {
        let nsamples = self.nsamples()?;
        let mut offset = HEADER_SIZE;
        let mut time = 0u32;
        const INTERVAL_SECS: u32 = 1;

        for _ in 0..nsamples {
            if self.config.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let record = self
                .data
                .get(offset..offset + SAMPLE_SIZE)
                .ok_or_else(|| Error::data_format("mclean_sample", "truncated sample record"))?;
            let gauge_mbar = u16::from_le_bytes([record[0], record[1]]);
            let temp_c = record[2] as i8;
            let _flags = record[3];

            let depth = self.depth_from_gauge_mbar(gauge_mbar);
            self.cache.observe_depth(depth);
            self.cache.observe_temperature(f64::from(temp_c));

            sink.emit(SampleKind::Time, SampleValue::Time(time));
            sink.emit(SampleKind::Depth, SampleValue::Depth(depth));
            sink.emit(
                SampleKind::Temperature,
                SampleValue::Temperature(f64::from(temp_c)),
            );

            offset += SAMPLE_SIZE;
            time += INTERVAL_SECS;
        }

        self.cache.derived_from_samples = true;
        self.cache.finalize_avgdepth();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NilSink;

    fn build_minimal_blob() -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[0..4].copy_from_slice(&0u32.to_le_bytes()); // timestamp
        data[4..8].copy_from_slice(&0u32.to_le_bytes()); // start
        data[8..12].copy_from_slice(&600u32.to_le_bytes()); // end
        data[0x0C..0x0E].copy_from_slice(&1013u16.to_le_bytes()); // atmospheric
        data[0x0E] = 1; // density index -> salt, 1020
        data[0x0F] = 0; // dive mode REC -> OC
        data[0x10] = 21; // gas config, O2%
        data[NSAMPLES_OFFSET..NSAMPLES_OFFSET + 2].copy_from_slice(&2u16.to_le_bytes());

        data.extend_from_slice(&[100, 0, 20, 0]); // depth=100 mbar, temp=20C
        data.extend_from_slice(&[150, 0, 20, 0]); // depth=150 mbar, temp=20C
        data
    }

    #[test]
    fn scenario_minimal_header() {
        let blob = build_minimal_blob();
        let mut parser = McLeanParser::new(&blob, 0, ParserConfig::default()).unwrap();

        let dt = parser.get_datetime().unwrap();
        assert_eq!(dt.instant, jiff::Timestamp::from_second(EPOCH_2000_01_01).unwrap());

        match parser.get_field(FieldKind::Divetime, 0).unwrap() {
            FieldValue::Seconds(s) => assert_eq!(s, 600),
            _ => panic!("wrong field variant"),
        }

        match parser.get_field(FieldKind::DiveMode, 0).unwrap() {
            FieldValue::DiveMode(mode) => assert_eq!(mode, DiveMode::OC),
            _ => panic!("wrong field variant"),
        }

        match parser.get_field(FieldKind::GasmixCount, 0).unwrap() {
            FieldValue::Count(n) => assert_eq!(n, 1),
            _ => panic!("wrong field variant"),
        }

        let expected_maxdepth = (150.0 * 100.0) / (1020.0 * GRAVITY);
        match parser.get_field(FieldKind::MaxDepth, 0).unwrap() {
            FieldValue::Meters(m) => assert!((m - expected_maxdepth).abs() < 1e-9),
            _ => panic!("wrong field variant"),
        }
    }

    #[test]
    fn samples_foreach_emits_time_then_depth_then_temperature() {
        let blob = build_minimal_blob();
        let mut parser = McLeanParser::new(&blob, 0, ParserConfig::default()).unwrap();

        let mut kinds = Vec::new();
        let mut closure = |kind: SampleKind, _value: SampleValue<'_>| kinds.push(kind);
        parser.samples_foreach(&mut closure).unwrap();

        assert_eq!(
            kinds,
            vec![
                SampleKind::Time,
                SampleKind::Depth,
                SampleKind::Temperature,
                SampleKind::Time,
                SampleKind::Depth,
                SampleKind::Temperature,
            ]
        );
    }

    #[test]
    fn get_field_is_idempotent_and_does_not_reemit() {
        let blob = build_minimal_blob();
        let mut parser = McLeanParser::new(&blob, 0, ParserConfig::default()).unwrap();

        let first = parser.get_field(FieldKind::MaxDepth, 0).unwrap();
        let mut nil = NilSink;
        // Calling get_field again must not re-walk samples (derived_from_samples stays set).
        let second = parser.get_field(FieldKind::MaxDepth, 0).unwrap();
        parser.samples_foreach(&mut nil).ok();

        match (first, second) {
            (FieldValue::Meters(a), FieldValue::Meters(b)) => assert_eq!(a, b),
            _ => panic!("wrong field variant"),
        }
    }

    #[test]
    fn rejects_short_header() {
        let short = vec![0u8; HEADER_SIZE - 1];
        assert!(McLeanParser::new(&short, 0, ParserConfig::default()).is_err());
    }
}
