use time::OffsetDateTime;

pub const DISPLAY_FORMAT: &str = "[year]-[month]-[day] [hour]:[minute]:[second]";
pub const FILE_STAMP_FORMAT: &str = "[year]-[month]-[day]-[hour]-[minute]-[second]";

/// Local wall-clock time, falling back to UTC when the offset cannot be determined.
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

pub fn format(timestamp: OffsetDateTime, pattern: &str) -> String {
    time::format_description::parse(pattern)
        .ok()
        .and_then(|format| timestamp.format(&format).ok())
        .unwrap_or_else(|| timestamp.unix_timestamp().to_string())
}

/// `yyyy-MM-dd HH:mm:ss` in local time, as used in commit titles and stash messages.
pub fn display_now() -> String {
    format(now(), DISPLAY_FORMAT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_display_and_file_stamps() {
        let timestamp = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(format(timestamp, DISPLAY_FORMAT), "2023-11-14 22:13:20");
        assert_eq!(format(timestamp, FILE_STAMP_FORMAT), "2023-11-14-22-13-20");
    }
}
