//! Heinrichs Weikamp OSTC (2/3/4, hwOS Sport/Tech): a fixed-stride family
//! whose firmware-conditional quirks (§4.4 "Firmware-conditional quirks")
//! are the bulk of its decoding logic.
//!
//! Header (`HEADER_SIZE` = 0x40 bytes):
//!
//! | offset | field |
//! |---|---|
//! | 0x00 | u8 header version; `> 0x20` selects the wider dive-time field (§9 Open Question, preserved) |
//! | 0x01 | u16le firmware, encoded as `version * 100` (e.g. `1057` = hwOS Sport 10.57, `108` = OSTC4 1.08) |
//! | 0x03 | u32le timestamp, seconds since 2000-01-01T00:00:00Z |
//! | 0x07 | u16le divetime in minutes, **only when `version <= 0x20`** |
//! | 0x09 | u32le divetime in seconds, **only when `version > 0x20`** |
//! | 0x0D | u16le atmospheric pressure, mbar |
//! | 0x0F | u8 water-density index (`DENSITY_TABLE`) |
//! | 0x10 | u8 dive-mode byte (`DIVE_MODE_TABLE`) |
//! | 0x1E | u8 fixed-gas count (gases before the first diluent, OSTC4 CCR only) |
//! | 0x1F | u8 gas-mix count, `<= MAX_GASMIXES` |
//! | 0x20 | `MAX_GASMIXES` x 2 bytes: (O2%, He%) per slot |
//! | 0x3E | u16le sample count |
//!
//! Samples are 12 bytes: u16le depth (1/10 m), i16le temperature (1/10 C),
//! u16le raw ppO2 (1/100 bar, subject to the stale-divisor quirk below),
//! u8 raw tank pressure (1 bar, or 1/10 bar under the quirk below), u8
//! deco-stop depth (1/10 m, 0 = NDL), u16le deco/NDL time (s), u8 reserved,
//! u8 diluent index (CCR only, subject to the OSTC4 bias below).
//!
//! **Firmware quirks preserved exactly (§4.4):**
//! - hwOS Tech 3.30–3.80 / hwOS Sport 10.57–10.63: a raw ppO2 of `0xFFFF`
//!   means the divisor has gone stale; it is reported as `0.0` rather than
//!   65.535 bar.
//! - hwOS Sport 10.40–10.50: tank-pressure resolution is 1/10 bar, not 1
//!   bar.
//! - OSTC4 firmware `< 1.08`: the deco/NDL field is known-bad and is
//!   skipped entirely (no `Deco` event emitted).
//! - OSTC4 in CCR mode: the diluent index is biased above the fixed-gas
//!   count; the fixed count (header 0x1E) is subtracted before lookup.

use crate::cache::DerivedCache;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::{Parser as ParserTrait, ParserConfig};
use crate::primitives::{u16_le, u32_le};
use crate::sink::{NilSink, SampleSink};
use crate::types::{DecoType, DiveMode, Gasmix, Salinity, SalinityKind, SampleKind, SampleValue};
use crate::types::{Datetime, FieldKind, FieldValue};

use super::support::{self, EPOCH_2000_01_01};

pub const HEADER_SIZE: usize = 0x40;
const NSAMPLES_OFFSET: usize = 0x3E;
const FIXED_GAS_COUNT_OFFSET: usize = 0x1E;
const GASMIX_COUNT_OFFSET: usize = 0x1F;
const GASMIX_SLOTS_OFFSET: usize = 0x20;
const SAMPLE_SIZE: usize = 12;
const MAX_GASMIXES: usize = 5;

pub const MODEL_OSTC2: u32 = 0;
pub const MODEL_OSTC3: u32 = 1;
pub const MODEL_OSTC4: u32 = 2;

const PPO2_STALE_RAW: u16 = 0xFFFF;
const OSTC4_DECO_FIXED_MIN_FIRMWARE: u16 = 108; // "1.08" encoded as version*100

const DENSITY_TABLE: [f64; 2] = [1000.0, 1025.0];

fn divemode_from_byte(byte: u8) -> Result<DiveMode> {
    match byte {
        0 => Ok(DiveMode::OC),
        1 => Ok(DiveMode::CCR),
        2 => Ok(DiveMode::SCR),
        3 => Ok(DiveMode::Gauge),
        4 => Ok(DiveMode::Freedive),
        other => Err(Error::data_format("hw_ostc_divemode", format!("unknown dive-mode byte {other}"))),
    }
}

fn ppo2_divisor_is_stale(model: u32, firmware: u16) -> bool {
    let _ = model;
    (330..=380).contains(&firmware) || (1057..=1063).contains(&firmware)
}

fn pressure_tenth_bar_resolution(firmware: u16) -> bool {
    (1040..=1050).contains(&firmware)
}

fn ostc4_deco_known_bad(model: u32, firmware: u16) -> bool {
    model == MODEL_OSTC4 && firmware < OSTC4_DECO_FIXED_MIN_FIRMWARE
}

pub struct HwOstcParser<'a> {
    data: &'a [u8],
    model: u32,
    config: ParserConfig,
    version: u8,
    firmware: u16,
    timestamp: u32,
    divetime: u32,
    atmospheric_mbar: u32,
    divemode: DiveMode,
    fixed_gas_count: u32,
    cache: DerivedCache,
}

impl<'a> HwOstcParser<'a> {
    pub fn new(data: &'a [u8], model: u32, config: ParserConfig) -> Result<Self> {
        support::require_min_len(data, HEADER_SIZE, "hw_ostc_header")?;

        let version = data[0x00];
        let firmware = u16_le(data, 0x01)
            .ok_or_else(|| Error::data_format("hw_ostc_header", "truncated firmware field"))?;
        let timestamp = u32_le(data, 0x03)
            .ok_or_else(|| Error::data_format("hw_ostc_header", "truncated timestamp field"))?;

        // §9 Open Question: version 0x20 and 0x21 use incompatible
        // dive-time encodings; preserved exactly, not reconciled.
        let divetime = if version > 0x20 {
            u32_le(data, 0x09).ok_or_else(|| Error::data_format("hw_ostc_header", "truncated divetime field"))?
        } else {
            u32::from(
                u16_le(data, 0x07).ok_or_else(|| Error::data_format("hw_ostc_header", "truncated divetime field"))?,
            ) * 60
        };

        let atmospheric_mbar = u32::from(
            u16_le(data, 0x0D).ok_or_else(|| Error::data_format("hw_ostc_header", "truncated atmospheric field"))?,
        );
        let density_index = data[0x0F];
        let density = *DENSITY_TABLE
            .get(density_index as usize)
            .ok_or_else(|| Error::data_format("hw_ostc_header", format!("unknown density index {density_index}")))?;
        let divemode = divemode_from_byte(data[0x10])?;
        let fixed_gas_count = u32::from(data[FIXED_GAS_COUNT_OFFSET]);
        let gasmix_count = data[GASMIX_COUNT_OFFSET] as usize;
        if gasmix_count > MAX_GASMIXES {
            return Err(Error::data_format(
                "hw_ostc_header",
                format!("gas-mix count {gasmix_count} exceeds capacity {MAX_GASMIXES}"),
            ));
        }

        let mut cache = DerivedCache::new(MAX_GASMIXES, 1);
        cache.atmospheric_mbar = Some(atmospheric_mbar);
        cache.salinity = Some(Salinity {
            kind: if density_index == 0 { SalinityKind::Fresh } else { SalinityKind::Salt },
            density,
        });
        cache.divemode = Some(divemode);

        for slot in 0..gasmix_count {
            let offset = GASMIX_SLOTS_OFFSET + slot * 2;
            let oxygen = *data
                .get(offset)
                .ok_or_else(|| Error::data_format("hw_ostc_header", "truncated gas-mix slot"))?;
            if oxygen == 0 {
                break;
            }
            let helium = *data
                .get(offset + 1)
                .ok_or_else(|| Error::data_format("hw_ostc_header", "truncated gas-mix slot"))?;
            let mut mix = Gasmix::new(u32::from(oxygen), u32::from(helium));
            if divemode == DiveMode::CCR && slot as u32 >= fixed_gas_count {
                mix.diluent = true;
                mix.usage = crate::types::GasUsage::Diluent;
            }
            cache.gasmixes.push(mix)?;
        }

        Ok(Self {
            data,
            model,
            config,
            version,
            firmware,
            timestamp,
            divetime,
            atmospheric_mbar,
            divemode,
            fixed_gas_count,
            cache,
        })
    }

    fn nsamples(&self) -> Result<u16> {
        u16_le(self.data, NSAMPLES_OFFSET)
            .ok_or_else(|| Error::data_format("hw_ostc_header", "truncated sample count"))
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

impl<'a> ParserTrait<'a> for HwOstcParser<'a> {
    fn family(&self) -> Family {
        Family::HwOstc
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
        const INTERVAL_SECS: u32 = 10;

        let ppo2_stale = ppo2_divisor_is_stale(self.model, self.firmware);
        let pressure_tenths = pressure_tenth_bar_resolution(self.firmware);
        let deco_known_bad = ostc4_deco_known_bad(self.model, self.firmware);
        let is_ccr = self.divemode == DiveMode::CCR;

        for _ in 0..nsamples {
            if self.config.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let record = self
                .data
                .get(offset..offset + SAMPLE_SIZE)
                .ok_or_else(|| Error::data_format("hw_ostc_sample", "truncated sample record"))?;

            let depth = f64::from(u16_le(record, 0).unwrap_or(0)) / 10.0;
            let temp = f64::from(i16::from_le_bytes([record[2], record[3]])) / 10.0;
            let ppo2_raw = u16_le(record, 4).unwrap_or(0);
            let pressure_raw = record[6];
            let deco_depth = f64::from(record[7]) / 10.0;
            let deco_time = u32::from(u16_le(record, 8).unwrap_or(0));
            let diluent_byte = record[11];

            self.cache.observe_depth(depth);
            self.cache.observe_temperature(temp);

            sink.emit(SampleKind::Time, SampleValue::Time(time));
            sink.emit(SampleKind::Depth, SampleValue::Depth(depth));
            sink.emit(SampleKind::Temperature, SampleValue::Temperature(temp));

            let ppo2 = if ppo2_stale && ppo2_raw == PPO2_STALE_RAW { 0.0 } else { f64::from(ppo2_raw) / 100.0 };
            if ppo2 > 0.0 {
                sink.emit(SampleKind::Ppo2, SampleValue::Ppo2(0, ppo2));
            }

            let pressure_bar = if pressure_tenths { f64::from(pressure_raw) / 10.0 } else { f64::from(pressure_raw) };
            if pressure_bar > 0.0 {
                let tank_index = self.cache.tanks.record_pressure(0, pressure_bar)?;
                sink.emit(SampleKind::Pressure, SampleValue::Pressure(tank_index, pressure_bar));
            }

            if !deco_known_bad {
                if deco_depth > 0.0 {
                    sink.emit(
                        SampleKind::Deco,
                        SampleValue::Deco(DecoType::DecoStop, deco_depth, deco_time, deco_time),
                    );
                } else {
                    sink.emit(SampleKind::Deco, SampleValue::Deco(DecoType::Ndl, 0.0, 0, deco_time));
                }
            }

            if is_ccr && self.model == MODEL_OSTC4 {
                let diluent_index = u32::from(diluent_byte).checked_sub(self.fixed_gas_count);
                if let Some(idx) = diluent_index {
                    if self.cache.gasmixes.get(idx as usize).is_some() {
                        sink.emit(SampleKind::Gasmix, SampleValue::Gasmix(idx as usize));
                    }
                }
            }

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

    fn build_header(version: u8, firmware: u16, model: u32) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[0x00] = version;
        data[0x01..0x03].copy_from_slice(&firmware.to_le_bytes());
        data[0x03..0x07].copy_from_slice(&0u32.to_le_bytes());
        if version > 0x20 {
            data[0x09..0x0D].copy_from_slice(&1800u32.to_le_bytes());
        } else {
            data[0x07..0x09].copy_from_slice(&30u16.to_le_bytes());
        }
        data[0x0D..0x0F].copy_from_slice(&1013u16.to_le_bytes());
        data[0x0F] = 0;
        data[0x10] = if model == MODEL_OSTC4 { 1 } else { 0 };
        data[FIXED_GAS_COUNT_OFFSET] = 1;
        data[GASMIX_COUNT_OFFSET] = 2;
        data[GASMIX_SLOTS_OFFSET] = 21;
        data[GASMIX_SLOTS_OFFSET + 1] = 0;
        data[GASMIX_SLOTS_OFFSET + 2] = 50;
        data[GASMIX_SLOTS_OFFSET + 3] = 0;
        let _ = model;
        data
    }

    fn sample(ppo2_raw: u16, pressure_raw: u8, diluent_byte: u8) -> Vec<u8> {
        let mut rec = vec![0u8; SAMPLE_SIZE];
        rec[0..2].copy_from_slice(&200u16.to_le_bytes());
        rec[2..4].copy_from_slice(&180i16.to_le_bytes());
        rec[4..6].copy_from_slice(&ppo2_raw.to_le_bytes());
        rec[6] = pressure_raw;
        rec[11] = diluent_byte;
        rec
    }

    #[test]
    fn version_0x21_uses_wide_divetime_field() {
        let blob = build_header(0x21, 100, MODEL_OSTC3);
        let mut parser = HwOstcParser::new(&blob, MODEL_OSTC3, ParserConfig::default()).unwrap();
        match parser.get_field(FieldKind::Divetime, 0).unwrap() {
            FieldValue::Seconds(s) => assert_eq!(s, 1800),
            _ => panic!("wrong field variant"),
        }
    }

    #[test]
    fn version_0x20_uses_minutes_field() {
        let blob = build_header(0x20, 100, MODEL_OSTC3);
        let mut parser = HwOstcParser::new(&blob, MODEL_OSTC3, ParserConfig::default()).unwrap();
        match parser.get_field(FieldKind::Divetime, 0).unwrap() {
            FieldValue::Seconds(s) => assert_eq!(s, 1800),
            _ => panic!("wrong field variant"),
        }
    }

    #[test]
    fn stale_ppo2_divisor_is_reported_as_zero() {
        let mut blob = build_header(0x21, 1060, MODEL_OSTC3); // within 1057..=1063
        blob[NSAMPLES_OFFSET..NSAMPLES_OFFSET + 2].copy_from_slice(&1u16.to_le_bytes());
        blob.extend(sample(0xFFFF, 0, 0));

        let mut parser = HwOstcParser::new(&blob, MODEL_OSTC3, ParserConfig::default()).unwrap();
        let mut ppo2_events = Vec::new();
        let mut closure = |kind: SampleKind, value: SampleValue<'_>| {
            if let (SampleKind::Ppo2, SampleValue::Ppo2(_, v)) = (kind, value) {
                ppo2_events.push(v);
            }
        };
        parser.samples_foreach(&mut closure).unwrap();
        assert!(ppo2_events.is_empty(), "stale ppo2 of 0.0 should not be emitted");
    }

    #[test]
    fn tenth_bar_resolution_quirk_scales_pressure() {
        let mut blob = build_header(0x21, 1045, MODEL_OSTC3); // within 1040..=1050
        blob[NSAMPLES_OFFSET..NSAMPLES_OFFSET + 2].copy_from_slice(&1u16.to_le_bytes());
        blob.extend(sample(0, 200, 0));

        let mut parser = HwOstcParser::new(&blob, MODEL_OSTC3, ParserConfig::default()).unwrap();
        let mut pressures = Vec::new();
        let mut closure = |kind: SampleKind, value: SampleValue<'_>| {
            if let (SampleKind::Pressure, SampleValue::Pressure(_, bar)) = (kind, value) {
                pressures.push(bar);
            }
        };
        parser.samples_foreach(&mut closure).unwrap();
        assert_eq!(pressures, vec![20.0]);
    }

    #[test]
    fn ostc4_old_firmware_skips_known_bad_deco() {
        let mut blob = build_header(0x21, 100, MODEL_OSTC4); // firmware "1.00" < 1.08
        blob[NSAMPLES_OFFSET..NSAMPLES_OFFSET + 2].copy_from_slice(&1u16.to_le_bytes());
        blob.extend(sample(0, 0, 0));

        let mut parser = HwOstcParser::new(&blob, MODEL_OSTC4, ParserConfig::default()).unwrap();
        let mut deco_events = 0;
        let mut closure = |kind: SampleKind, _v: SampleValue<'_>| {
            if kind == SampleKind::Deco {
                deco_events += 1;
            }
        };
        parser.samples_foreach(&mut closure).unwrap();
        assert_eq!(deco_events, 0);
    }

    #[test]
    fn ostc4_ccr_diluent_index_is_debiased() {
        let mut blob = build_header(0x21, 200, MODEL_OSTC4); // firmware "2.00" >= 1.08
        blob[NSAMPLES_OFFSET..NSAMPLES_OFFSET + 2].copy_from_slice(&1u16.to_le_bytes());
        blob.extend(sample(0, 0, 2)); // biased diluent byte 2 -> table index 1 after subtracting fixed_gas_count=1

        let mut parser = HwOstcParser::new(&blob, MODEL_OSTC4, ParserConfig::default()).unwrap();
        let mut gasmix_events = Vec::new();
        let mut closure = |kind: SampleKind, value: SampleValue<'_>| {
            if let (SampleKind::Gasmix, SampleValue::Gasmix(idx)) = (kind, value) {
                gasmix_events.push(idx);
            }
        };
        parser.samples_foreach(&mut closure).unwrap();
        assert_eq!(gasmix_events, vec![1]);
    }

    #[test]
    fn rejects_short_header() {
        let short = vec![0u8; HEADER_SIZE - 1];
        assert!(HwOstcParser::new(&short, MODEL_OSTC2, ParserConfig::default()).is_err());
    }
}
