//! The sample sink contract: the single capability a sample-stream decoder
//! needs to report decoded events, visited synchronously and in time order.

use crate::types::{SampleKind, SampleValue};

/// Receives decoded sample events, in time order, synchronously with the
/// decode. A fresh [`SampleKind::Time`] opens a new instant; zero or more
/// non-time events follow at that instant before the next `Time`.
///
/// Implementations must not retain borrowed payloads (e.g.
/// [`SampleValue::Vendor`](crate::types::SampleValue::Vendor)) past the
/// `emit` call — the decoder guarantees nothing about their validity once
/// the loop continues.
pub trait SampleSink {
    /// Report one decoded event.
    fn emit(&mut self, kind: SampleKind, value: SampleValue<'_>);
}

/// A sink that discards every event. Used by `get_field` to drive the
/// sample loop for its side effects (populating the derived cache) without
/// emitting anything to a caller-supplied sink.
pub struct NilSink;

impl SampleSink for NilSink {
    fn emit(&mut self, _kind: SampleKind, _value: SampleValue<'_>) {}
}

/// Adapts any `FnMut(SampleKind, SampleValue)` closure into a [`SampleSink`],
/// for callers that would rather pass a closure than define a type.
impl<F> SampleSink for F
where
    F: FnMut(SampleKind, SampleValue<'_>),
{
    fn emit(&mut self, kind: SampleKind, value: SampleValue<'_>) {
        self(kind, value)
    }
}
