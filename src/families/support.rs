//! Small helpers shared across family decoders: epoch-relative datetime
//! construction and the dive-mode defaults most families share.

use crate::error::Result;
use crate::types::Datetime;

/// Build a [`Datetime`] from a Unix-epoch-relative second count plus a
/// vendor epoch offset (§4.3 step 5), with no timezone information
/// ("local-time unknown").
pub fn datetime_from_epoch_seconds(epoch_unix_seconds: i64, seconds_since_epoch: u32) -> Datetime {
    let unix = epoch_unix_seconds + i64::from(seconds_since_epoch);
    Datetime {
        instant: jiff::Timestamp::from_second(unix).unwrap_or(jiff::Timestamp::UNIX_EPOCH),
        offset_seconds: None,
    }
}

/// Same as [`datetime_from_epoch_seconds`] but with an explicit UTC
/// offset, for families that record a timezone index/offset in the header.
pub fn datetime_with_offset(
    epoch_unix_seconds: i64,
    seconds_since_epoch: u32,
    offset_seconds: i32,
) -> Datetime {
    let unix = epoch_unix_seconds + i64::from(seconds_since_epoch);
    Datetime {
        instant: jiff::Timestamp::from_second(unix).unwrap_or(jiff::Timestamp::UNIX_EPOCH),
        offset_seconds: Some(offset_seconds),
    }
}

/// 2000-01-01T00:00:00Z, as a Unix second count — the epoch shared by
/// McLean Extreme and Divesoft Freedom.
pub const EPOCH_2000_01_01: i64 = 946_684_800;

/// 2008-01-01T00:00:00Z, as a Unix second count — the Divesystem epoch.
pub const EPOCH_2008_01_01: i64 = 1_199_145_600;

/// Guard helper: every header decoder's first step (§4.3 step 1).
pub fn require_min_len(data: &[u8], min: usize, context: &'static str) -> Result<()> {
    if data.len() < min {
        return Err(crate::error::Error::data_format(
            context,
            format!("blob of {} bytes shorter than minimum header {min}", data.len()),
        ));
    }
    Ok(())
}
