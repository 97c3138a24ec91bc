//! The derived-field cache shared by every family parser (§3 "Parser
//! state"). Header decoding populates most of it eagerly; a handful of
//! fields (chiefly `maxdepth`/`avgdepth` for families that don't store
//! them in the header) are filled lazily on the first sample pass,
//! gated by `cached`.

use crate::tables::{GasMixTable, TankTable};
use crate::types::{DecoModel, DiveMode, Location, Salinity};

pub struct DerivedCache {
    pub divetime: Option<u32>,
    pub maxdepth: Option<f64>,
    pub avgdepth: Option<f64>,
    pub atmospheric_mbar: Option<u32>,
    pub salinity: Option<Salinity>,
    pub divemode: Option<DiveMode>,
    pub decomodel: Option<DecoModel>,
    pub temperature_min: Option<f64>,
    pub temperature_max: Option<f64>,
    pub location: Option<Location>,
    pub gasmixes: GasMixTable,
    pub tanks: TankTable,

    depth_sum: f64,
    depth_count: u32,

    /// Set once a sample pass has run for the purpose of filling in the
    /// sample-derived fields above. Guards `Parser::get_field` against
    /// re-walking the stream on every call (§3 "computed once and cached").
    pub derived_from_samples: bool,
}

impl DerivedCache {
    pub fn new(gasmix_capacity: usize, tank_capacity: usize) -> Self {
        Self {
            divetime: None,
            maxdepth: None,
            avgdepth: None,
            atmospheric_mbar: None,
            salinity: None,
            divemode: None,
            decomodel: None,
            temperature_min: None,
            temperature_max: None,
            location: None,
            gasmixes: GasMixTable::new(gasmix_capacity),
            tanks: TankTable::new(tank_capacity),
            depth_sum: 0.0,
            depth_count: 0,
            derived_from_samples: false,
        }
    }

    /// Feed one decoded depth sample into the running max/average.
    pub fn observe_depth(&mut self, meters: f64) {
        self.maxdepth = Some(self.maxdepth.map_or(meters, |m| m.max(meters)));
        self.depth_sum += meters;
        self.depth_count += 1;
    }

    /// Feed one decoded temperature sample into the running min/max.
    pub fn observe_temperature(&mut self, celsius: f64) {
        self.temperature_min = Some(self.temperature_min.map_or(celsius, |t| t.min(celsius)));
        self.temperature_max = Some(self.temperature_max.map_or(celsius, |t| t.max(celsius)));
    }

    /// Derive the average depth from the accumulated samples, unless the
    /// header already supplied one.
    pub fn finalize_avgdepth(&mut self) {
        if self.avgdepth.is_none() && self.depth_count > 0 {
            self.avgdepth = Some(self.depth_sum / f64::from(self.depth_count));
        }
    }
}
