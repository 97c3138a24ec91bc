//! Cross-cutting derived-state policies shared by every family: the
//! capacity-bounded gas-mix and tank tables with linear-scan dedup
//! (§3 invariants, §4.4 "Gas-mix discovery" / "Tank discovery").

use crate::error::{Error, Result};
use crate::types::{Gasmix, Tank};

/// An inline, capacity-bounded gas-mix table. Each distinct mix
/// encountered (by `(oxygen, helium, usage)`) is added at most once;
/// later occurrences reuse the existing index.
pub struct GasMixTable {
    mixes: Vec<Gasmix>,
    capacity: usize,
}

impl GasMixTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            mixes: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.mixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mixes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Gasmix> {
        self.mixes.get(index)
    }

    pub fn as_slice(&self) -> &[Gasmix] {
        &self.mixes
    }

    /// Look up `mix` by identity; if absent and there's room, append it.
    /// Returns the index of the existing or newly-inserted slot.
    ///
    /// Fails with `DataFormat` if the table is full and `mix` is new —
    /// this is fatal for the dive per §4.6.
    pub fn find_or_insert(&mut self, mix: Gasmix) -> Result<usize> {
        if let Some(idx) = self.mixes.iter().position(|m| *m == mix) {
            return Ok(idx);
        }
        if self.mixes.len() >= self.capacity {
            return Err(Error::data_format(
                "gasmix_table",
                format!("capacity {} exceeded", self.capacity),
            ));
        }
        self.mixes.push(mix);
        Ok(self.mixes.len() - 1)
    }

    /// Directly append a header-declared mix without dedup (used while
    /// building the header's fixed gas-mix slots, which are assumed
    /// already distinct by construction).
    pub fn push(&mut self, mix: Gasmix) -> Result<usize> {
        if self.mixes.len() >= self.capacity {
            return Err(Error::data_format(
                "gasmix_table",
                format!("capacity {} exceeded", self.capacity),
            ));
        }
        self.mixes.push(mix);
        Ok(self.mixes.len() - 1)
    }
}

/// An inline, capacity-bounded tank table, keyed by transmitter/vendor id.
pub struct TankTable {
    tanks: Vec<Tank>,
    capacity: usize,
}

impl TankTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            tanks: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.tanks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tanks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Tank> {
        self.tanks.get(index)
    }

    pub fn as_slice(&self) -> &[Tank] {
        &self.tanks
    }

    /// Directly insert a header-declared tank (no id-based dedup).
    pub fn push(&mut self, tank: Tank) -> Result<usize> {
        if self.tanks.len() >= self.capacity {
            return Err(Error::data_format(
                "tank_table",
                format!("capacity {} exceeded", self.capacity),
            ));
        }
        self.tanks.push(tank);
        Ok(self.tanks.len() - 1)
    }

    /// On first sighting of `id` with a nonzero `pressure_bar`, insert a
    /// new tank with `begin = end = pressure_bar`. On a later sighting,
    /// update `end_pressure_bar` only. Returns the tank's index.
    pub fn record_pressure(&mut self, id: u32, pressure_bar: f64) -> Result<usize> {
        if let Some(idx) = self
            .tanks
            .iter()
            .position(|t| t.transmitter_id == Some(id))
        {
            self.tanks[idx].end_pressure_bar = pressure_bar;
            return Ok(idx);
        }
        if self.tanks.len() >= self.capacity {
            return Err(Error::data_format(
                "tank_table",
                format!("capacity {} exceeded", self.capacity),
            ));
        }
        let mut tank = Tank::new(Some(id));
        tank.begin_pressure_bar = pressure_bar;
        tank.end_pressure_bar = pressure_bar;
        self.tanks.push(tank);
        Ok(self.tanks.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gasmix_table_dedups_by_identity() {
        let mut table = GasMixTable::new(8);
        let air = Gasmix::new(21, 0);
        let i0 = table.find_or_insert(air).unwrap();
        let i1 = table.find_or_insert(Gasmix::new(21, 0)).unwrap();
        assert_eq!(i0, i1);
        assert_eq!(table.len(), 1);

        let nitrox = Gasmix::new(32, 0);
        let i2 = table.find_or_insert(nitrox).unwrap();
        assert_eq!(i2, 1);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn gasmix_table_overflow_is_fatal() {
        let mut table = GasMixTable::new(1);
        table.find_or_insert(Gasmix::new(21, 0)).unwrap();
        let err = table.find_or_insert(Gasmix::new(32, 0));
        assert!(err.is_err());
    }

    #[test]
    fn tank_table_sets_begin_then_updates_end() {
        let mut table = TankTable::new(4);
        let idx = table.record_pressure(7, 200.0).unwrap();
        assert_eq!(table.get(idx).unwrap().begin_pressure_bar, 200.0);
        assert_eq!(table.get(idx).unwrap().end_pressure_bar, 200.0);

        let idx2 = table.record_pressure(7, 50.0).unwrap();
        assert_eq!(idx, idx2);
        assert_eq!(table.get(idx).unwrap().begin_pressure_bar, 200.0);
        assert_eq!(table.get(idx).unwrap().end_pressure_bar, 50.0);
    }

    #[test]
    fn tank_table_distinguishes_ids() {
        let mut table = TankTable::new(4);
        table.record_pressure(1, 200.0).unwrap();
        table.record_pressure(2, 210.0).unwrap();
        assert_eq!(table.len(), 2);
    }
}
