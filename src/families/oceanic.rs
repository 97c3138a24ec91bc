//! Oceanic Atom2 / VT Pro / Veo250: a fixed-stride family whose header
//! stores the dive start as BCD fields (§4.3 "Decode the datetime") and
//! whose tank is reported in the imperial convention most Oceanic
//! computers ship with (§3 "Tank" / `imperial` conversion constants).
//!
//! Header (`HEADER_SIZE` = 0x10 bytes):
//!
//! | offset | field |
//! |---|---|
//! | 0x00 | u8 BCD year (`2000 + value`) |
//! | 0x01 | u8 BCD month |
//! | 0x02 | u8 BCD day |
//! | 0x03 | u8 BCD hour |
//! | 0x04 | u8 BCD minute |
//! | 0x05 | u8 BCD second |
//! | 0x06 | u16le sample interval, seconds |
//! | 0x08 | u16le sample count |
//! | 0x0A | u16le atmospheric pressure, mbar |
//! | 0x0C | u8 water-density index (`DENSITY_TABLE`) |
//! | 0x0D | u8 tank working pressure, 100s of psi |
//!
//! Samples are 3 bytes: u16le depth (1/4 ft), i8 temperature (whole
//! degrees F). Depth and temperature are published in metric; the tank
//! pressure is fixed at the header's working pressure for the whole dive
//! (Atom2 does not report a live transmitter reading in its profile).

use crate::cache::DerivedCache;
use crate::common::{Family, imperial};
use crate::error::{Error, Result};
use crate::parser::{Parser as ParserTrait, ParserConfig};
use crate::primitives::{bcd_to_dec, u16_le};
use crate::sink::{NilSink, SampleSink};
use crate::types::{Salinity, SalinityKind, SampleKind, SampleValue, Tank, TankKind};
use crate::types::{Datetime, FieldKind, FieldValue};

use super::support;

pub const HEADER_SIZE: usize = 0x10;
const NSAMPLES_OFFSET: usize = 0x08;
const SAMPLE_SIZE: usize = 3;
const MAX_GASMIXES: usize = 1;

const DENSITY_TABLE: [f64; 2] = [1000.0, 1025.0];
const FEET_PER_QUARTER: f64 = 0.25;
const FEET_TO_METERS: f64 = 0.3048;

fn fahrenheit_to_celsius(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}

pub struct OceanicParser<'a> {
    data: &'a [u8],
    model: u32,
    config: ParserConfig,
    interval: u32,
    atmospheric_mbar: u32,
    datetime: Datetime,
    cache: DerivedCache,
}

impl<'a> OceanicParser<'a> {
    pub fn new(data: &'a [u8], model: u32, config: ParserConfig) -> Result<Self> {
        support::require_min_len(data, HEADER_SIZE, "oceanic_header")?;

        let year = 2000 + bcd_to_dec(data[0x00]) as i16;
        let month = bcd_to_dec(data[0x01]) as i8;
        let day = bcd_to_dec(data[0x02]) as i8;
        let hour = bcd_to_dec(data[0x03]) as i8;
        let minute = bcd_to_dec(data[0x04]) as i8;
        let second = bcd_to_dec(data[0x05]) as i8;

        let date = jiff::civil::Date::new(year, month, day)
            .map_err(|e| Error::data_format("oceanic_header", format!("invalid BCD date: {e}")))?;
        let time = jiff::civil::Time::new(hour, minute, second, 0)
            .map_err(|e| Error::data_format("oceanic_header", format!("invalid BCD time: {e}")))?;
        let instant = date
            .to_datetime(time)
            .to_zoned(jiff::tz::TimeZone::UTC)
            .map_err(|e| Error::data_format("oceanic_header", format!("invalid BCD datetime: {e}")))?
            .timestamp();

        let interval = u32::from(
            u16_le(data, 0x06).ok_or_else(|| Error::data_format("oceanic_header", "truncated interval field"))?,
        );
        let atmospheric_mbar = u32::from(
            u16_le(data, 0x0A).ok_or_else(|| Error::data_format("oceanic_header", "truncated atmospheric field"))?,
        );
        let density_index = data[0x0C];
        let density = *DENSITY_TABLE
            .get(density_index as usize)
            .ok_or_else(|| Error::data_format("oceanic_header", format!("unknown density index {density_index}")))?;
        let work_pressure_psi = f64::from(data[0x0D]) * 100.0;

        let mut cache = DerivedCache::new(MAX_GASMIXES, 1);
        cache.atmospheric_mbar = Some(atmospheric_mbar);
        cache.salinity = Some(Salinity {
            kind: if density_index == 0 { SalinityKind::Fresh } else { SalinityKind::Salt },
            density,
        });
        cache.gasmixes.push(crate::types::Gasmix::new(21, 0))?;
        cache.tanks.push(Tank {
            work_pressure_bar: work_pressure_psi / imperial::PSI_PER_BAR,
            kind: TankKind::Imperial,
            ..Tank::new(None)
        })?;

        Ok(Self {
            data,
            model,
            config,
            interval,
            atmospheric_mbar,
            datetime: Datetime {
                instant,
                offset_seconds: None,
            },
            cache,
        })
    }

    fn nsamples(&self) -> Result<u16> {
        u16_le(self.data, NSAMPLES_OFFSET)
            .ok_or_else(|| Error::data_format("oceanic_header", "truncated sample count"))
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

impl<'a> ParserTrait<'a> for OceanicParser<'a> {
    fn family(&self) -> Family {
        Family::OceanicAtom2
    }

    fn model(&self) -> u32 {
        self.model
    }

    fn get_datetime(&mut self) -> Result<Datetime> {
        Ok(self.datetime.clone())
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
            FieldKind::TankCount => Ok(FieldValue::Count(self.cache.tanks.len() as u32)),
            FieldKind::Tank => self
                .cache
                .tanks
                .get(index as usize)
                .copied()
                .map(FieldValue::Tank)
                .ok_or_else(|| Error::InvalidArgs(format!("tank index {index} out of range"))),
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

        // Imperial Atom2 profile carries no live transmitter reading; the
        // header's working pressure is the only figure available, so it is
        // surfaced once rather than repeated per sample.
        if let Some(tank) = self.cache.tanks.get(0) {
            sink.emit(SampleKind::Pressure, SampleValue::Pressure(0, tank.work_pressure_bar));
        }

        for _ in 0..nsamples {
            if self.config.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let record = self
                .data
                .get(offset..offset + SAMPLE_SIZE)
                .ok_or_else(|| Error::data_format("oceanic_sample", "truncated sample record"))?;

            let depth_quarters = u16_le(record, 0).unwrap_or(0);
            let depth = f64::from(depth_quarters) * FEET_PER_QUARTER * FEET_TO_METERS;
            let temp_f = record[2] as i8;
            let temp = fahrenheit_to_celsius(f64::from(temp_f));

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

    fn bcd(value: u8) -> u8 {
        ((value / 10) << 4) | (value % 10)
    }

    fn build_blob() -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[0x00] = bcd(24);
        data[0x01] = bcd(6);
        data[0x02] = bcd(15);
        data[0x03] = bcd(9);
        data[0x04] = bcd(30);
        data[0x05] = bcd(0);
        data[0x06..0x08].copy_from_slice(&30u16.to_le_bytes());
        data[0x08..0x0A].copy_from_slice(&2u16.to_le_bytes());
        data[0x0A..0x0C].copy_from_slice(&1013u16.to_le_bytes());
        data[0x0C] = 1; // salt
        data[0x0D] = 30; // 3000 psi working pressure

        data.extend_from_slice(&[40, 0, 77]); // 10 ft -> 3.048m, 77F
        data.extend_from_slice(&[80, 0, 75]); // 20 ft -> 6.096m, 75F
        data
    }

    #[test]
    fn decodes_bcd_datetime() {
        let blob = build_blob();
        let mut parser = OceanicParser::new(&blob, 0, ParserConfig::default()).unwrap();
        let dt = parser.get_datetime().unwrap();
        assert_eq!(dt.instant.to_string(), "2024-06-15T09:30:00Z");
    }

    #[test]
    fn converts_imperial_depth_and_temperature() {
        let blob = build_blob();
        let mut parser = OceanicParser::new(&blob, 0, ParserConfig::default()).unwrap();
        match parser.get_field(FieldKind::MaxDepth, 0).unwrap() {
            FieldValue::Meters(m) => assert!((m - 6.096).abs() < 1e-6),
            _ => panic!("wrong field variant"),
        }
        match parser.get_field(FieldKind::Tank, 0).unwrap() {
            FieldValue::Tank(tank) => {
                assert_eq!(tank.kind, TankKind::Imperial);
                assert!((tank.work_pressure_bar - 3000.0 / imperial::PSI_PER_BAR).abs() < 1e-6);
            }
            _ => panic!("wrong field variant"),
        }
    }

    #[test]
    fn rejects_short_header() {
        let short = vec![0u8; HEADER_SIZE - 1];
        assert!(OceanicParser::new(&short, 0, ParserConfig::default()).is_err());
    }
}
