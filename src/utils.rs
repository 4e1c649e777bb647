use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};

use crate::params::LogCategory;

const WINDOW_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Half-open `[start, end)` window covering the UTC calendar day before `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn preceding_day(now: DateTime<Utc>) -> Self {
        let end = Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN));
        TimeWindow {
            start: end - Duration::days(1),
            end,
        }
    }

    pub fn start_param(&self) -> String {
        self.start.format(WINDOW_FORMAT).to_string()
    }

    pub fn end_param(&self) -> String {
        self.end.format(WINDOW_FORMAT).to_string()
    }
}

/// return the object name the archive is written under, partitioned by the invocation date
pub fn object_key(domain: &str, category: LogCategory, now: DateTime<Utc>) -> String {
    format!(
        "{}/{}/{}-logs-{}.json",
        domain,
        now.format("%Y/%m/%d"),
        category.as_lower(),
        now.format("%Y%m%dT%H%M%S")
    )
}

/// Browser-navigable location of an archived object.
pub fn console_url(endpoint: &str, namespace: &str, bucket: &str, key: &str) -> String {
    format!(
        "{}/n/{}/b/{}/o/{}",
        endpoint.trim_end_matches('/'),
        namespace,
        bucket,
        key.replace('/', "%2F")
    )
}
