//! Mares Icon HD / Icon HD Net / Quad Air / Smart / Smart Apnea / Smart Air:
//! a fixed-stride family sharing one record shape across six model
//! variants (§4.3 "a layout is selected by model id").
//!
//! Header (`HEADER_SIZE` = 0x5C bytes):
//!
//! | offset | field |
//! |---|---|
//! | 0x00 | u32le timestamp, seconds since 2000-01-01T00:00:00Z |
//! | 0x04 | u16le sample interval, seconds |
//! | 0x06 | u8 gas-mix count, `<= MAX_GASMIXES` |
//! | 0x07 | `MAX_GASMIXES` x 2 bytes: (O2%, He%) per slot, stop at first disabled (O2 == 0) |
//! | 0x0D | u16le atmospheric pressure, mbar |
//! | 0x0F | u8 water-density index (`DENSITY_TABLE`) |
//! | 0x5A | u16le sample count |
//!
//! `MODEL_SMART_APNEA` reports [`DiveMode::Freedive`]; every other
//! recognized model id reports [`DiveMode::OC`]. No model in this family
//! is a rebreather, so no sample record carries a setpoint byte and
//! `samples_foreach` never emits [`SampleKind::Setpoint`] (§4.4
//! "Setpoint. Only emitted in CCR/SCR.").
//!
//! Samples are 8 bytes: u16le depth (1/10 m), i16le temperature (1/10 C),
//! u8 tank pressure (bar), u8 deco-stop depth (1/10 m, 0 = NDL), u16le
//! deco/NDL time remaining (s).

use crate::cache::DerivedCache;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::{Parser as ParserTrait, ParserConfig};
use crate::primitives::{u16_le, u32_le};
use crate::sink::{NilSink, SampleSink};
use crate::types::{DecoType, DiveMode, Gasmix, Salinity, SalinityKind, SampleKind, SampleValue};
use crate::types::{Datetime, FieldKind, FieldValue};

use super::support::{self, EPOCH_2000_01_01};

pub const HEADER_SIZE: usize = 0x5C;
const NSAMPLES_OFFSET: usize = 0x5A;
const GASMIX_SLOTS_OFFSET: usize = 0x07;
const SAMPLE_SIZE: usize = 8;
const MAX_GASMIXES: usize = 3;

pub const MODEL_ICON_HD: u32 = 0;
pub const MODEL_ICON_HD_NET: u32 = 1;
pub const MODEL_QUAD_AIR: u32 = 2;
pub const MODEL_SMART: u32 = 3;
pub const MODEL_SMART_APNEA: u32 = 4;
pub const MODEL_SMART_AIR: u32 = 5;

const DENSITY_TABLE: [f64; 2] = [1000.0, 1025.0];

fn divemode_for_model(model: u32) -> DiveMode {
    if model == MODEL_SMART_APNEA {
        DiveMode::Freedive
    } else {
        DiveMode::OC
    }
}

pub struct MaresIconHdParser<'a> {
    data: &'a [u8],
    model: u32,
    config: ParserConfig,
    timestamp: u32,
    interval: u32,
    atmospheric_mbar: u32,
    divemode: DiveMode,
    cache: DerivedCache,
}

impl<'a> MaresIconHdParser<'a> {
    pub fn new(data: &'a [u8], model: u32, config: ParserConfig) -> Result<Self> {
        support::require_min_len(data, HEADER_SIZE, "mares_iconhd_header")?;

        let timestamp = u32_le(data, 0x00)
            .ok_or_else(|| Error::data_format("mares_iconhd_header", "truncated timestamp field"))?;
        let interval = u32::from(
            u16_le(data, 0x04)
                .ok_or_else(|| Error::data_format("mares_iconhd_header", "truncated interval field"))?,
        );
        let gasmix_count = data[0x06] as usize;
        if gasmix_count > MAX_GASMIXES {
            return Err(Error::data_format(
                "mares_iconhd_header",
                format!("gas-mix count {gasmix_count} exceeds capacity {MAX_GASMIXES}"),
            ));
        }
        let atmospheric_mbar = u32::from(
            u16_le(data, 0x0D)
                .ok_or_else(|| Error::data_format("mares_iconhd_header", "truncated atmospheric field"))?,
        );
        let density_index = data[0x0F];
        let density = *DENSITY_TABLE
            .get(density_index as usize)
            .ok_or_else(|| Error::data_format("mares_iconhd_header", format!("unknown density index {density_index}")))?;

        let mut cache = DerivedCache::new(MAX_GASMIXES, 1);
        cache.atmospheric_mbar = Some(atmospheric_mbar);
        cache.salinity = Some(Salinity {
            kind: if density_index == 0 { SalinityKind::Fresh } else { SalinityKind::Salt },
            density,
        });

        // "Active mixes are first; stop at the first disabled mix" (§4.3 step 4).
        for slot in 0..gasmix_count {
            let offset = GASMIX_SLOTS_OFFSET + slot * 2;
            let oxygen = *data
                .get(offset)
                .ok_or_else(|| Error::data_format("mares_iconhd_header", "truncated gas-mix slot"))?;
            if oxygen == 0 {
                break;
            }
            let helium = *data
                .get(offset + 1)
                .ok_or_else(|| Error::data_format("mares_iconhd_header", "truncated gas-mix slot"))?;
            cache.gasmixes.push(Gasmix::new(u32::from(oxygen), u32::from(helium)))?;
        }

        let divemode = divemode_for_model(model);

        Ok(Self {
            data,
            model,
            config,
            timestamp,
            interval,
            atmospheric_mbar,
            divemode,
            cache,
        })
    }

    fn nsamples(&self) -> Result<u16> {
        u16_le(self.data, NSAMPLES_OFFSET)
            .ok_or_else(|| Error::data_format("mares_iconhd_header", "truncated sample count"))
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

impl<'a> ParserTrait<'a> for MaresIconHdParser<'a> {
    fn family(&self) -> Family {
        Family::MaresIconHD
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
            FieldKind::DiveMode => Ok(FieldValue::DiveMode(self.divemode)),
            FieldKind::DecoModel => Ok(FieldValue::DecoModel(crate::types::DecoModel::None)),
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
                .ok_or_else(|| Error::data_format("mares_iconhd_sample", "truncated sample record"))?;

            let depth = f64::from(u16_le(record, 0).unwrap_or(0)) / 10.0;
            let temp = f64::from(i16::from_le_bytes([record[2], record[3]])) / 10.0;
            let pressure_bar = f64::from(record[4]);
            let deco_depth = f64::from(record[5]) / 10.0;
            let deco_time = u32::from(u16_le(record, 6).unwrap_or(0));

            self.cache.observe_depth(depth);
            self.cache.observe_temperature(temp);

            sink.emit(SampleKind::Time, SampleValue::Time(time));
            sink.emit(SampleKind::Depth, SampleValue::Depth(depth));
            sink.emit(SampleKind::Temperature, SampleValue::Temperature(temp));

            if pressure_bar > 0.0 {
                let tank_index = self.cache.tanks.record_pressure(0, pressure_bar)?;
                sink.emit(SampleKind::Pressure, SampleValue::Pressure(tank_index, pressure_bar));
            }

            if deco_depth > 0.0 {
                sink.emit(
                    SampleKind::Deco,
                    SampleValue::Deco(DecoType::DecoStop, deco_depth, deco_time, deco_time),
                );
            } else {
                sink.emit(SampleKind::Deco, SampleValue::Deco(DecoType::Ndl, 0.0, 0, deco_time));
            }

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

    fn build_header(model: u32) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[0x00..0x04].copy_from_slice(&0u32.to_le_bytes());
        data[0x04..0x06].copy_from_slice(&30u16.to_le_bytes());
        data[0x06] = 1;
        data[0x07] = 21; // O2
        data[0x08] = 0; // He
        data[0x0D..0x0F].copy_from_slice(&1013u16.to_le_bytes());
        data[0x0F] = 0;
        let _ = model;
        data
    }

    fn sample(depth_dm: u16, pressure: u8, deco_depth_dm: u8) -> Vec<u8> {
        let mut rec = vec![0u8; SAMPLE_SIZE];
        rec[0..2].copy_from_slice(&depth_dm.to_le_bytes());
        rec[2..4].copy_from_slice(&200i16.to_le_bytes());
        rec[4] = pressure;
        rec[5] = deco_depth_dm;
        rec
    }

    #[test]
    fn quad_air_emits_pressure_and_decostop_but_no_setpoint() {
        let mut blob = build_header(MODEL_QUAD_AIR);
        blob[NSAMPLES_OFFSET..NSAMPLES_OFFSET + 2].copy_from_slice(&2u16.to_le_bytes());
        blob.extend(sample(50, 200, 0));
        blob.extend(sample(100, 190, 30));

        let mut parser = MaresIconHdParser::new(&blob, MODEL_QUAD_AIR, ParserConfig::default()).unwrap();
        let mut setpoints = 0;
        let mut decostops = 0;
        let mut closure = |kind: SampleKind, value: SampleValue<'_>| match (kind, value) {
            (SampleKind::Setpoint, _) => setpoints += 1,
            (SampleKind::Deco, SampleValue::Deco(DecoType::DecoStop, ..)) => decostops += 1,
            _ => {}
        };
        parser.samples_foreach(&mut closure).unwrap();
        assert_eq!(setpoints, 0);
        assert_eq!(decostops, 1);
    }

    #[test]
    fn smart_apnea_reports_freedive_mode() {
        let blob = build_header(MODEL_SMART_APNEA);
        let mut parser = MaresIconHdParser::new(&blob, MODEL_SMART_APNEA, ParserConfig::default()).unwrap();
        match parser.get_field(FieldKind::DiveMode, 0).unwrap() {
            FieldValue::DiveMode(mode) => assert_eq!(mode, DiveMode::Freedive),
            _ => panic!("wrong field variant"),
        }
    }

    #[test]
    fn icon_hd_maxdepth_from_samples() {
        let mut blob = build_header(MODEL_ICON_HD);
        blob[NSAMPLES_OFFSET..NSAMPLES_OFFSET + 2].copy_from_slice(&2u16.to_le_bytes());
        blob.extend(sample(50, 0, 0));
        blob.extend(sample(123, 0, 0));

        let mut parser = MaresIconHdParser::new(&blob, MODEL_ICON_HD, ParserConfig::default()).unwrap();
        match parser.get_field(FieldKind::MaxDepth, 0).unwrap() {
            FieldValue::Meters(m) => assert!((m - 12.3).abs() < 1e-9),
            _ => panic!("wrong field variant"),
        }
    }

    #[test]
    fn rejects_short_header() {
        let short = vec![0u8; HEADER_SIZE - 1];
        assert!(MaresIconHdParser::new(&short, MODEL_ICON_HD, ParserConfig::default()).is_err());
    }
}
