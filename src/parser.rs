//! The per-family parser trait and the `(family, model, bytes) -> Parser`
//! dispatch (§6 "API seen by callers").

use crate::common::Family;
use crate::error::{Error, Result};
use crate::families;
use crate::sink::SampleSink;
use crate::types::{Datetime, FieldKind, FieldValue};

/// Cross-cutting knobs threaded into every family parser at construction.
/// Stands in for the teacher's `Context` now that there is no device/BLE
/// layer underneath the parser; today it only carries cancellation.
#[derive(Default, Clone)]
pub struct ParserConfig {
    /// Polled between records (§5); when it returns `true` the decoder
    /// stops and returns `Error::Cancelled` without further emission.
    pub cancelled: Option<std::sync::Arc<dyn Fn() -> bool + Send + Sync>>,
}

impl ParserConfig {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.as_ref().is_some_and(|f| f())
    }
}

/// The capability every family decoder implements: header field access and
/// the sample stream. One value per dive blob; not `Sync` (the derived
/// cache inside is populated lazily and is not safe to share across
/// threads concurrently), but `Send` since it only borrows its own blob.
pub trait Parser<'a> {
    fn family(&self) -> Family;
    fn model(&self) -> u32;

    /// The dive's start datetime.
    fn get_datetime(&mut self) -> Result<Datetime>;

    /// A whole-dive field. `index` selects a slot for `Gasmix`/`Tank`;
    /// ignored otherwise. May trigger a first derivation pass over the
    /// samples (with a `NilSink`) the first time a sample-derived field
    /// is requested; subsequent calls return the cached value.
    fn get_field(&mut self, field: FieldKind, index: u32) -> Result<FieldValue>;

    /// Walk the sample stream, invoking `sink.emit` for each decoded
    /// event in time order.
    fn samples_foreach(&mut self, sink: &mut dyn SampleSink) -> Result<()>;
}

/// Construct the concrete parser for `family`/`model` over `data`.
///
/// `model` is meaningful only within `family` (e.g. within
/// `Family::DivesystemIDive` it distinguishes iDive/iX3M/iX3M2 and
/// encodes the APOS4 firmware hint); see each family module for its
/// model-id convention.
pub fn parser_create<'a>(
    family: Family,
    model: u32,
    data: &'a [u8],
    config: ParserConfig,
) -> Result<Box<dyn Parser<'a> + 'a>> {
    if data.is_empty() {
        return Err(Error::InvalidArgs("empty dive blob".into()));
    }

    match family {
        Family::DivesystemIDive => {
            Ok(Box::new(families::divesystem::DivesystemParser::new(data, model, config)?))
        }
        Family::MaresIconHD => Ok(Box::new(families::mares_iconhd::MaresIconHdParser::new(
            data, model, config,
        )?)),
        Family::OceanicAtom2 => Ok(Box::new(families::oceanic::OceanicParser::new(
            data, model, config,
        )?)),
        Family::McLeanExtreme => Ok(Box::new(families::mclean::McLeanParser::new(
            data, model, config,
        )?)),
        Family::SporasubSp2 => Ok(Box::new(families::sporasub::SporasubParser::new(
            data, model, config,
        )?)),
        Family::SuuntoD9 => Ok(Box::new(families::suunto::SuuntoParser::new(
            data, model, config,
        )?)),
        Family::HwOstc => Ok(Box::new(families::hw_ostc::HwOstcParser::new(
            data, model, config,
        )?)),
        Family::CressiEdy => Ok(Box::new(families::cressi_edy::CressiEdyParser::new(
            data, model, config,
        )?)),
        Family::ReefnetSensus => Ok(Box::new(families::reefnet_sensus::ReefnetSensusParser::new(
            data, model, config,
        )?)),
        Family::DivesoftFreedom => Ok(Box::new(
            families::divesoft_freedom::DivesoftFreedomParser::new(data, model, config)?,
        )),
        Family::MaresGenius => Ok(Box::new(families::mares_genius::MaresGeniusParser::new(
            data, model, config,
        )?)),
        Family::UwatecSmart => Ok(Box::new(families::uwatec_smart::UwatecSmartParser::new(
            data, model, config,
        )?)),
    }
}
