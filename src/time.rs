use chrono::Duration;

/// Formats an accumulated race time as `h:mm:ss.mmm`, or `m:ss.mmm` under an hour.
#[allow(clippy::cast_possible_truncation, clippy::module_name_repetitions)]
pub fn race_time(seconds: f64) -> String {
    let total = Duration::milliseconds((seconds.max(0.0) * 1000.0).round() as i64);
    let hours = total.num_hours();
    let minutes = total.num_minutes() % 60;
    let secs = total.num_seconds() % 60;
    let millis = total.num_milliseconds() % 1000;
    if hours > 0 {
        format!("{}:{:02}:{:02}.{:03}", hours, minutes, secs, millis)
    } else {
        format!("{}:{:02}.{:03}", minutes, secs, millis)
    }
}

/// Gap to the leader, `+s.mmm`.
pub fn gap(seconds: f64) -> String {
    format!("+{:.3}", seconds.max(0.0))
}

#[cfg(test)]
#[test]
fn test_race_time() {
    assert_eq!(race_time(0.0), "0:00.000");
    assert_eq!(race_time(-3.0), "0:00.000");
    assert_eq!(race_time(92.3456), "1:32.346");
    assert_eq!(race_time(5_535.5), "1:32:15.500");
    assert_eq!(race_time(3_600.0), "1:00:00.000");

    assert_eq!(gap(0.0), "+0.000");
    assert_eq!(gap(1.23449), "+1.234");
}
