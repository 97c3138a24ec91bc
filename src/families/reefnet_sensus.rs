//! Reefnet Sensus / Sensus Pro / Sensus Ultra: a minimal bottom-timer
//! family with no gas-mix or tank data at all, only depth and
//! temperature (§4.4 "fixed-size" record family list). The original
//! Sensus and Sensus Pro report in the imperial convention; Sensus Ultra
//! switched to metric.
//!
//! Header (`HEADER_SIZE` = 0x0A bytes):
//!
//! | offset | field |
//! |---|---|
//! | 0x00 | u32le timestamp, seconds since 2000-01-01T00:00:00Z |
//! | 0x04 | u16le sample interval, seconds |
//! | 0x06 | u16le sample count |
//! | 0x08 | u16le atmospheric pressure, mbar |
//!
//! Samples are 3 bytes: u16le depth, i8 temperature. Sensus and Sensus
//! Pro (`MODEL_SENSUS`, `MODEL_SENSUS_PRO`) report depth in whole feet
//! and temperature in whole degrees Fahrenheit; Sensus Ultra
//! (`MODEL_SENSUS_ULTRA`) reports depth in 1/10 m and temperature in
//! whole degrees Celsius.

use crate::cache::DerivedCache;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::{Parser as ParserTrait, ParserConfig};
use crate::primitives::u16_le;
use crate::sink::{NilSink, SampleSink};
use crate::types::{SampleKind, SampleValue};
use crate::types::{Datetime, FieldKind, FieldValue};

use super::support::{self, EPOCH_2000_01_01};

pub const HEADER_SIZE: usize = 0x0A;
const NSAMPLES_OFFSET: usize = 0x06;
const SAMPLE_SIZE: usize = 3;

pub const MODEL_SENSUS: u32 = 0;
pub const MODEL_SENSUS_PRO: u32 = 1;
pub const MODEL_SENSUS_ULTRA: u32 = 2;

const FEET_TO_METERS: f64 = 0.3048;

fn fahrenheit_to_celsius(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}

fn uses_imperial_units(model: u32) -> bool {
    model != MODEL_SENSUS_ULTRA
}

pub struct ReefnetSensusParser<'a> {
    data: &'a [u8],
    model: u32,
    config: ParserConfig,
    timestamp: u32,
    interval: u32,
    atmospheric_mbar: u32,
    cache: DerivedCache,
}

impl<'a> ReefnetSensusParser<'a> {
    pub fn new(data: &'a [u8], model: u32, config: ParserConfig) -> Result<Self> {
        support::require_min_len(data, HEADER_SIZE, "reefnet_sensus_header")?;

        let timestamp = crate::primitives::u32_le(data, 0x00)
            .ok_or_else(|| Error::data_format("reefnet_sensus_header", "truncated timestamp field"))?;
        let interval = u32::from(
            u16_le(data, 0x04)
                .ok_or_else(|| Error::data_format("reefnet_sensus_header", "truncated interval field"))?,
        );
        let atmospheric_mbar = u32::from(
            u16_le(data, 0x08)
                .ok_or_else(|| Error::data_format("reefnet_sensus_header", "truncated atmospheric field"))?,
        );

        let mut cache = DerivedCache::new(0, 0);
        cache.atmospheric_mbar = Some(atmospheric_mbar);

        Ok(Self {
            data,
            model,
            config,
            timestamp,
            interval,
            atmospheric_mbar,
            cache,
        })
    }

    fn nsamples(&self) -> Result<u16> {
        u16_le(self.data, NSAMPLES_OFFSET)
            .ok_or_else(|| Error::data_format("reefnet_sensus_header", "truncated sample count"))
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

impl<'a> ParserTrait<'a> for ReefnetSensusParser<'a> {
    fn family(&self) -> Family {
        Family::ReefnetSensus
    }

    fn model(&self) -> u32 {
        self.model
    }

    fn get_datetime(&mut self) -> Result<Datetime> {
        Ok(support::datetime_from_epoch_seconds(EPOCH_2000_01_01, self.timestamp))
    }

    fn get_field(&mut self, field: FieldKind, index: u32) -> Result<FieldValue> {
        match field {
            FieldKind::Atmospheric => Ok(FieldValue::Millibar(self.atmospheric_mbar)),
            FieldKind::Salinity => Err(Error::Unsupported),
            FieldKind::DiveMode => Ok(FieldValue::DiveMode(crate::types::DiveMode::Gauge)),
            FieldKind::DecoModel => Ok(FieldValue::DecoModel(crate::types::DecoModel::None)),
            FieldKind::GasmixCount => Ok(FieldValue::Count(0)),
            FieldKind::Gasmix => Err(Error::InvalidArgs(format!("gasmix index {index} out of range"))),
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
        let mut offset = HEADER_SIZE;
        let mut time = 0u32;
        let imperial = uses_imperial_units(self.model);

        for _ in 0..nsamples {
            if self.config.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let record = self
                .data
                .get(offset..offset + SAMPLE_SIZE)
                .ok_or_else(|| Error::data_format("reefnet_sensus_sample", "truncated sample record"))?;

            let depth_raw = f64::from(u16_le(record, 0).unwrap_or(0));
            let temp_raw = f64::from(record[2] as i8);

            let depth = if imperial { depth_raw * FEET_TO_METERS } else { depth_raw / 10.0 };
            let temp = if imperial { fahrenheit_to_celsius(temp_raw) } else { temp_raw };

            self.cache.observe_depth(depth);
            self.cache.observe_temperature(temp);

            sink.emit(SampleKind::Time, SampleValue::Time(time));
            sink.emit(SampleKind::Depth, SampleValue::Depth(depth));
            sink.emit(SampleKind::Temperature, SampleValue::Temperature(temp));

            offset += SAMPLE_SIZE;
            time += self.interval.max(1);
        }

        self.cache.divetime = Some(time.saturating_sub(self.interval.max(1)));
        self.cache.derived_from_samples = true;
        self.cache.finalize_avgdepth();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_blob(model: u32) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[0x00..0x04].copy_from_slice(&0u32.to_le_bytes());
        data[0x04..0x06].copy_from_slice(&10u16.to_le_bytes());
        data[0x06..0x08].copy_from_slice(&2u16.to_le_bytes());
        data[0x08..0x0A].copy_from_slice(&1013u16.to_le_bytes());
        if model == MODEL_SENSUS_ULTRA {
            data.extend_from_slice(&[100, 0, 18]); // 10.0m, 18C
            data.extend_from_slice(&[200, 0, 17]); // 20.0m, 17C
        } else {
            data.extend_from_slice(&[33, 0, 68]); // 33ft -> ~10.06m, 68F
            data.extend_from_slice(&[66, 0, 66]); // 66ft -> ~20.12m, 66F
        }
        data
    }

    #[test]
    fn sensus_ultra_reports_metric_units_directly() {
        let blob = build_blob(MODEL_SENSUS_ULTRA);
        let mut parser = ReefnetSensusParser::new(&blob, MODEL_SENSUS_ULTRA, ParserConfig::default()).unwrap();
        match parser.get_field(FieldKind::MaxDepth, 0).unwrap() {
            FieldValue::Meters(m) => assert!((m - 20.0).abs() < 1e-9),
            _ => panic!("wrong field variant"),
        }
    }

    #[test]
    fn sensus_pro_converts_imperial_units() {
        let blob = build_blob(MODEL_SENSUS_PRO);
        let mut parser = ReefnetSensusParser::new(&blob, MODEL_SENSUS_PRO, ParserConfig::default()).unwrap();
        match parser.get_field(FieldKind::MaxDepth, 0).unwrap() {
            FieldValue::Meters(m) => assert!((m - 66.0 * FEET_TO_METERS).abs() < 1e-6),
            _ => panic!("wrong field variant"),
        }
        match parser.get_field(FieldKind::TemperatureMinimum, 0).unwrap() {
            FieldValue::Celsius(c) => assert!((c - fahrenheit_to_celsius(66.0)).abs() < 1e-6),
            _ => panic!("wrong field variant"),
        }
    }

    #[test]
    fn reports_no_gasmix_or_tank_data() {
        let blob = build_blob(MODEL_SENSUS);
        let mut parser = ReefnetSensusParser::new(&blob, MODEL_SENSUS, ParserConfig::default()).unwrap();
        assert!(matches!(parser.get_field(FieldKind::GasmixCount, 0).unwrap(), FieldValue::Count(0)));
        assert!(parser.get_field(FieldKind::Gasmix, 0).is_err());
    }

    #[test]
    fn rejects_short_header() {
        let short = vec![0u8; HEADER_SIZE - 1];
        assert!(ReefnetSensusParser::new(&short, MODEL_SENSUS, ParserConfig::default()).is_err());
    }
}
