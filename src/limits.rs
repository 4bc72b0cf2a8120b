use crate::model::Ms;

/// Maximum cancelled bookings retained per owner. Older ones are evicted.
pub const RETENTION_CAP: usize = 5;

/// Page size of the upcoming-bookings projection.
pub const UPCOMING_LIMIT: usize = 5;

pub const MAX_SERVICE_NAME_LEN: usize = 255;
pub const MAX_OWNER_ID_LEN: usize = 256;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;
