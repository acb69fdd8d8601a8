use ::time::OffsetDateTime;
use ::time::format_description::well_known::Rfc3339;

/// Current UTC time as an RFC 3339 string.
pub fn now_iso8601() -> String {
    format_iso8601(OffsetDateTime::now_utc())
}

pub fn format_iso8601(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339)
        .unwrap_or_else(|_| ts.unix_timestamp().to_string())
}

/// Format a unix timestamp (seconds) as RFC 3339, falling back to the epoch.
pub fn from_unix_seconds(secs: i64) -> String {
    let ts = OffsetDateTime::from_unix_timestamp(secs).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    format_iso8601(ts)
}

pub fn parse_iso8601(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_and_parses_round_trip() {
        let formatted = from_unix_seconds(1_700_000_000);
        assert_eq!(formatted, "2023-11-14T22:13:20Z");
        let parsed = parse_iso8601(&formatted).unwrap();
        assert_eq!(parsed.unix_timestamp(), 1_700_000_000);
    }

    #[test]
    fn now_is_parseable() {
        assert!(parse_iso8601(&now_iso8601()).is_some());
    }
}
