//! Daily timer for crawl jobs.
//!
//! Jobs run one after another inside the loop; a slow run pushes the next
//! wake-up back instead of overlapping with it.

use crate::error::Result;
use crate::models::RunReport;
use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Time left until the next `at` on the wall clock of `now`'s timezone.
/// A time equal to `now` counts as already passed.
pub fn duration_until(now: DateTime<Tz>, at: NaiveTime) -> Duration {
    let tz = now.timezone();
    let mut date = now.date_naive();
    // Two days always suffice; a third covers a skipped local hour.
    for _ in 0..3 {
        if let Some(next) = tz.from_local_datetime(&date.and_time(at)).earliest() {
            if next > now {
                return (next - now).to_std().unwrap_or_default();
            }
        }
        let Some(following) = date.checked_add_days(Days::new(1)) else {
            break;
        };
        date = following;
    }
    Duration::ZERO
}

/// Sleep until `at` in `tz`, run `tick`, repeat forever.
pub async fn run_daily<F, Fut>(at: NaiveTime, tz: Tz, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        let now = Utc::now().with_timezone(&tz);
        let wait = duration_until(now, at);
        info!(%at, %tz, wait_secs = wait.as_secs(), "Sleeping until next scheduled run");
        sleep(wait).await;
        tick().await;
    }
}

/// Log the outcome of one scheduled run.
pub fn log_report(outcome: &Result<RunReport>) {
    match outcome {
        Ok(report) if report.is_clean() => info!(
            source = %report.source_name,
            period = %report.period,
            listed = report.listed,
            succeeded = report.succeeded,
            "Scheduled run finished"
        ),
        Ok(report) => warn!(
            source = %report.source_name,
            period = %report.period,
            listed = report.listed,
            succeeded = report.succeeded,
            failed = report.failed.len(),
            local = ?report.local,
            vector = ?report.vector,
            "Scheduled run finished with failures"
        ),
        Err(e) => error!(error = %e, "Scheduled run abandoned"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Asia::Taipei;

    fn taipei(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Tz> {
        Taipei.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_later_today() {
        let at = NaiveTime::from_hms_opt(23, 0, 0).unwrap();
        let wait = duration_until(taipei(2024, 3, 1, 22, 30), at);
        assert_eq!(wait, Duration::from_secs(30 * 60));
    }

    #[test]
    fn test_rolls_over_to_tomorrow() {
        let midnight = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
        let wait = duration_until(taipei(2024, 2, 28, 23, 59), midnight);
        assert_eq!(wait, Duration::from_secs(60));
    }

    #[test]
    fn test_exact_time_waits_a_full_day() {
        let at = NaiveTime::from_hms_opt(6, 0, 0).unwrap();
        let wait = duration_until(taipei(2024, 5, 5, 6, 0), at);
        assert_eq!(wait, Duration::from_secs(24 * 3600));
    }
}
