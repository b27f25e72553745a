/// Earliest date a reservation may touch.
pub const MIN_VALID_DATE: (i32, u32, u32) = (2000, 1, 1);

/// Latest date a reservation may touch.
pub const MAX_VALID_DATE: (i32, u32, u32) = (2200, 12, 31);

/// Maximum length of a single reservation, boundaries included.
pub const MAX_RESERVATION_DAYS: i64 = 366;

pub const MAX_EXTRAS: usize = 32;

pub const MAX_EXTRA_CODE_LEN: usize = 64;

pub const MAX_LOCATION_LEN: usize = 256;

pub const MAX_DELETED_BY_LEN: usize = 256;

/// Reservation rows (any status) tracked per vehicle.
pub const MAX_RESERVATIONS_PER_VEHICLE: usize = 100_000;

/// Widest window accepted by free-range queries.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 3 * 366;

pub const MAX_IDENTITY_LEN: usize = 320;
