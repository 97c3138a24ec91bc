//! Pure-Rust decoders for dive computer profile blobs.
//!
//! Each vendor family encodes one dive as an opaque byte blob: a
//! fixed-layout header plus a variable-length sequence of sample records.
//! This crate turns `(family, model, bytes)` into a small set of
//! whole-dive fields and an ordered stream of per-instant sample events,
//! mirroring the parser half of libdivecomputer without any of its
//! device-transport layer — the blob is assumed already materialized.
//!
//! Start at [`parser::parser_create`].

mod cache;
pub mod common;
pub mod error;
mod families;
pub mod primitives;
mod parser;
pub mod sink;
mod tables;
pub mod types;

pub use common::Family;
pub use error::{Error, Result};
pub use parser::{Parser, ParserConfig, parser_create};
pub use sink::{NilSink, SampleSink};
pub use types::{
    Datetime, Deco, DecoModel, DecoType, DiveMode, EventKind, FieldKind, FieldValue, GasUsage,
    Gasmix, Location, Salinity, SalinityKind, SampleKind, SampleValue, Tank, TankKind,
};
