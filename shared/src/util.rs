/// 获取当前 UTC 时间戳（毫秒）
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Minutes → millis
#[inline]
pub const fn minutes_to_millis(minutes: u64) -> i64 {
    (minutes as i64) * 60_000
}

/// Format Unix millis as RFC 3339 (UTC), the timestamp format of the external ledger
pub fn millis_to_rfc3339(millis: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_default()
}
