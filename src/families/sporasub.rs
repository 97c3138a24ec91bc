//! Sporasub SP2: the simplest fixed-stride family in the corpus — no gas
//! mixes, no tanks, a single fixed sample interval (§4.4 "fixed-size"
//! record family list).
//!
//! Header (`HEADER_SIZE` = 0x20 bytes):
//!
//! | offset | field |
//! |---|---|
//! | 0x00 | u32le timestamp, seconds since 2000-01-01T00:00:00Z |
//! | 0x04 | u16le atmospheric pressure, mbar |
//! | 0x06 | u8 water-density index (`DENSITY_TABLE`) |
//! | 0x1E | u16le sample count |
//!
//! Samples are 3 bytes: u16le depth (1/10 m), i8 temperature (whole
//! degrees C). The interval is a fixed 2 s regardless of model.

use crate::cache::DerivedCache;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::{Parser as ParserTrait, ParserConfig};
use crate::primitives::u16_le;
use crate::sink::{NilSink, SampleSink};
use crate::types::{Salinity, SalinityKind, SampleKind, SampleValue};
use crate::types::{Datetime, FieldKind, FieldValue};

use super::support::{self, EPOCH_2000_01_01};

pub const HEADER_SIZE: usize = 0x20;
const NSAMPLES_OFFSET: usize = 0x1E;
const SAMPLE_SIZE: usize = 3;
const INTERVAL_SECS: u32 = 2;

const DENSITY_TABLE: [f64; 2] = [1000.0, 1025.0];

pub struct SporasubParser<'a> {
    data: &'a [u8],
    model: u32,
    config: ParserConfig,
    timestamp: u32,
    atmospheric_mbar: u32,
    cache: DerivedCache,
}

impl<'a> SporasubParser<'a> {
    pub fn new(data: &'a [u8], model: u32, config: ParserConfig) -> Result<Self> {
        support::require_min_len(data, HEADER_SIZE, "sporasub_header")?;

        let timestamp = crate::primitives::u32_le(data, 0x00)
            .ok_or_else(|| Error::data_format("sporasub_header", "truncated timestamp field"))?;
        let atmospheric_mbar = u32::from(
            u16_le(data, 0x04).ok_or_else(|| Error::data_format("sporasub_header", "truncated atmospheric field"))?,
        );
        let density_index = data[0x06];
        let density = *DENSITY_TABLE
            .get(density_index as usize)
            .ok_or_else(|| Error::data_format("sporasub_header", format!("unknown density index {density_index}")))?;

        let mut cache = DerivedCache::new(1, 0);
        cache.atmospheric_mbar = Some(atmospheric_mbar);
        cache.salinity = Some(Salinity {
            kind: if density_index == 0 { SalinityKind::Fresh } else { SalinityKind::Salt },
            density,
        });
        cache.gasmixes.push(crate::types::Gasmix::new(21, 0))?;

        Ok(Self {
            data,
            model,
            config,
            timestamp,
            atmospheric_mbar,
            cache,
        })
    }

    fn nsamples(&self) -> Result<u16> {
        u16_le(self.data, NSAMPLES_OFFSET)
            .ok_or_else(|| Error::data_format("sporasub_header", "truncated sample count"))
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

impl<'a> ParserTrait<'a> for SporasubParser<'a> {
    fn family(&self) -> Family {
        Family::SporasubSp2
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
            FieldKind::Salinity => self.cache.salinity.map(FieldValue::Salinity).ok_or(Error::Unsupported),
            FieldKind::DiveMode => Ok(FieldValue::DiveMode(crate::types::DiveMode::OC)),
            FieldKind::DecoModel => Ok(FieldValue::DecoModel(crate::types::DecoModel::None)),
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

        for _ in 0..nsamples {
            if self.config.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let record = self
                .data
                .get(offset..offset + SAMPLE_SIZE)
                .ok_or_else(|| Error::data_format("sporasub_sample", "truncated sample record"))?;

            let depth = f64::from(u16_le(record, 0).unwrap_or(0)) / 10.0;
            let temp = f64::from(record[2] as i8);

            self.cache.observe_depth(depth);
            self.cache.observe_temperature(temp);

            sink.emit(SampleKind::Time, SampleValue::Time(time));
            sink.emit(SampleKind::Depth, SampleValue::Depth(depth));
            sink.emit(SampleKind::Temperature, SampleValue::Temperature(temp));

            offset += SAMPLE_SIZE;
            time += INTERVAL_SECS;
        }

        self.cache.divetime = Some(time.saturating_sub(INTERVAL_SECS));
        self.cache.derived_from_samples = true;
        self.cache.finalize_avgdepth();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_blob() -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[0x00..0x04].copy_from_slice(&0u32.to_le_bytes());
        data[0x04..0x06].copy_from_slice(&1013u16.to_le_bytes());
        data[0x06] = 0;
        data[NSAMPLES_OFFSET..NSAMPLES_OFFSET + 2].copy_from_slice(&3u16.to_le_bytes());
        data.extend_from_slice(&[10, 0, 22]);
        data.extend_from_slice(&[50, 0, 20]);
        data.extend_from_slice(&[20, 0, 21]);
        data
    }

    #[test]
    fn scenario_fixed_interval_and_maxdepth() {
        let blob = build_blob();
        let mut parser = SporasubParser::new(&blob, 0, ParserConfig::default()).unwrap();

        let mut times = Vec::new();
        let mut closure = |kind: SampleKind, value: SampleValue<'_>| {
            if let (SampleKind::Time, SampleValue::Time(t)) = (kind, value) {
                times.push(t);
            }
        };
        parser.samples_foreach(&mut closure).unwrap();
        assert_eq!(times, vec![0, 2, 4]);

        match parser.get_field(FieldKind::MaxDepth, 0).unwrap() {
            FieldValue::Meters(m) => assert!((m - 5.0).abs() < 1e-9),
            _ => panic!("wrong field variant"),
        }
    }

    #[test]
    fn rejects_short_header() {
        let short = vec![0u8; HEADER_SIZE - 1];
        assert!(SporasubParser::new(&short, 0, ParserConfig::default()).is_err());
    }
}
