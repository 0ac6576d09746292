//! Date/time utilities for DEPOT.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a UTC datetime as an RFC3339 string for API responses.
pub fn to_rfc3339(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_to_rfc3339() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 15, 12, 30, 45).unwrap();
        assert_eq!(to_rfc3339(&dt), "2024-03-15T12:30:45Z");
    }
}
