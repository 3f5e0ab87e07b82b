use chrono::Local;

use crate::consts::TIMESTAMP_FORMAT;

/// Current local time as `HH:MM:SS DD/MM/YYYY`.
pub fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}
