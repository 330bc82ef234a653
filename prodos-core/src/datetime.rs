//! ProDOS 4-byte date/time stamps.
//!
//! ```text
//!          byte 1            byte 0
//!   DATE:  |  year (7)  |month(4)| day (5) |
//!          byte 3            byte 2
//!   TIME:  |   hour     |  |   minute      |
//! ```
//!
//! All-zero bytes mean "no date". Years are two-digit: below 76 is 20xx,
//! otherwise 19xx.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

/// Two-digit years below this pivot belong to the 2000s.
const YEAR_PIVOT: u8 = 76;

/// Pack a timestamp into ProDOS format. `None` packs as all zeroes.
pub fn encode_datetime(datetime: Option<NaiveDateTime>) -> [u8; 4] {
    let Some(datetime) = datetime else {
        return [0; 4];
    };
    let year = datetime.year().rem_euclid(100) as u8;
    let month = datetime.month() as u8;
    let day = datetime.day() as u8;

    [
        ((month & 0x0F) << 5) | day,
        (year << 1) | (month >> 3),
        datetime.minute() as u8,
        datetime.hour() as u8,
    ]
}

/// Unpack a ProDOS timestamp. Returns `None` for "no date" or an impossible date.
pub fn decode_datetime(bytes: &[u8]) -> Option<NaiveDateTime> {
    if bytes[..4].iter().all(|&b| b == 0) {
        return None;
    }
    let two_digit_year = bytes[1] >> 1;
    let year = if two_digit_year < YEAR_PIVOT {
        2000 + two_digit_year as i32
    } else {
        1900 + two_digit_year as i32
    };
    let month = (bytes[0] >> 5) as u32 | (((bytes[1] & 1) as u32) << 3);
    let day = (bytes[0] & 0x1F) as u32;

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(bytes[3] as u32, bytes[2] as u32, 0)
}
