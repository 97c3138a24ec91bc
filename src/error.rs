//! Error types for the dive-log parser crate.

/// The error taxonomy raised by parser construction and decoding.
///
/// `IoNotApplicable` is never raised by this crate — it is reserved for a
/// transport layer that sits above the parser and is out of scope here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A caller passed a `(family, model, bytes)` combination the dispatch
    /// does not recognize, or an out-of-range field index.
    #[error("invalid argument: {0}")]
    InvalidArgs(String),

    /// A family-bounded table (gas mixes, tanks, samples) ran out of room.
    #[error("no memory: {0}")]
    NoMemory(String),

    /// The blob failed a structural check: short input, bad CRC, a
    /// monotonicity violation, an unknown dive-mode/deco-model id, or a
    /// capacity overflow in a derived table.
    #[error("data format error in {context}: {detail}")]
    DataFormat {
        /// Name of the field/record the failure was detected in.
        context: &'static str,
        /// Human-readable detail.
        detail: String,
    },

    /// The field exists in principle but was not recorded for this dive
    /// (e.g. no GPS fix). Not an error for the dive as a whole.
    #[error("unsupported field")]
    Unsupported,

    /// The caller's cancellation flag was observed between records.
    #[error("cancelled")]
    Cancelled,

    /// Reserved for the transport layer; never raised by the parser core.
    #[error("I/O not applicable to an in-memory parser")]
    IoNotApplicable,
}

impl Error {
    pub(crate) fn data_format(context: &'static str, detail: impl ToString) -> Self {
        Self::DataFormat {
            context,
            detail: detail.to_string(),
        }
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_format_carries_context() {
        let err = Error::data_format("gasmix_table", "capacity exceeded");
        match err {
            Error::DataFormat { context, detail } => {
                assert_eq!(context, "gasmix_table");
                assert_eq!(detail, "capacity exceeded");
            }
            _ => panic!("expected DataFormat"),
        }
    }

    #[test]
    fn unsupported_display() {
        assert_eq!(Error::Unsupported.to_string(), "unsupported field");
    }
}
