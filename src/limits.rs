//! Hard limits enforced at the service boundary.

/// Maximum length (in characters) of a stored second-choice text.
pub const MAX_SECOND_CHOICE_CHARS: usize = 500;

/// Characters that may not appear in second-choice text.
pub const SECOND_CHOICE_DENYLIST: [char; 5] = ['<', '>', '&', '"', '\''];

/// Audit notes quote at most this many characters of the second-choice text.
pub const AUDIT_NOTE_PREVIEW_CHARS: usize = 50;

/// Default and maximum number of entries returned by the history query.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;
pub const MAX_HISTORY_LIMIT: usize = 100;

pub const MAX_BUILDING_ID_LEN: usize = 64;
pub const MAX_CUSTOMER_ID_LEN: usize = 64;

/// Maximum length of one request line on the wire.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Upper bound on elementary units scanned per slot; guards against a
/// misconfigured minute unit turning one check into thousands of lookups.
pub const MAX_UNITS_PER_SLOT: usize = 24 * 60;

/// Default and maximum number of reservations returned by the reservation
/// history query.
pub const DEFAULT_RESERVATION_HISTORY_LIMIT: usize = 50;
pub const MAX_RESERVATION_HISTORY_LIMIT: usize = 200;

/// Default and maximum look-ahead, in days, of the upcoming-reservations query.
pub const DEFAULT_DAYS_AHEAD: u32 = 30;
pub const MAX_DAYS_AHEAD: u32 = 366;
