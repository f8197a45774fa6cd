use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone};
use quizbot_games::SlowQuiz;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// The first `hour:00` strictly after `now`, in `now`'s time zone. Days where that local
/// time does not exist are skipped.
pub fn next_run<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32) -> Option<DateTime<Tz>> {
    let timezone = now.timezone();
    let mut date = now.date_naive();
    for _ in 0..3 {
        let candidate = date
            .and_hms_opt(hour, 0, 0)
            .and_then(|local| timezone.from_local_datetime(&local).earliest());
        if let Some(candidate) = candidate.filter(|candidate| candidate > now) {
            return Some(candidate);
        }
        date = date.succ_opt()?;
    }
    None
}

/// Advances the slow quiz once a day at `hour` local time.
pub fn spawn_daily(slow_quiz: Arc<SlowQuiz>, hour: u32) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = Local::now();
            let Some(next) = next_run(&now, hour) else {
                error!(
                    event_name = "system.scheduler.no_next_run",
                    correlation_id = "scheduler",
                    hour,
                    "could not compute the next slow quiz run"
                );
                return;
            };
            info!(
                event_name = "system.scheduler.sleeping",
                correlation_id = "scheduler",
                next_run = %next.to_rfc3339(),
                "slow quiz progression scheduled"
            );
            tokio::time::sleep((next - now).to_std().unwrap_or_default()).await;

            match slow_quiz.progress_games().await {
                Ok(()) => info!(
                    event_name = "system.scheduler.progressed",
                    correlation_id = "scheduler",
                    game = "slow-quiz",
                    "daily slow quiz progression finished"
                ),
                Err(error) => error!(
                    event_name = "system.scheduler.progress_failed",
                    correlation_id = "scheduler",
                    game = "slow-quiz",
                    error = %error,
                    "daily slow quiz progression failed"
                ),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, TimeZone, Utc};

    use super::next_run;

    #[test]
    fn runs_later_today_before_the_hour() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).single().expect("time");
        let next = next_run(&now, 10).expect("next run");
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).single().expect("time"));
    }

    #[test]
    fn runs_tomorrow_at_or_after_the_hour() {
        let at = Utc.with_ymd_and_hms(2024, 2, 29, 10, 0, 0).single().expect("time");
        assert_eq!(
            next_run(&at, 10).expect("next run"),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).single().expect("time")
        );

        let after = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 0).single().expect("time");
        assert_eq!(
            next_run(&after, 10).expect("next run"),
            Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).single().expect("time")
        );
    }

    #[test]
    fn the_hour_is_read_in_the_callers_time_zone() {
        let tokyo = FixedOffset::east_opt(9 * 3600).expect("offset");
        // 00:30 UTC is 09:30 in Tokyo
        let now = Utc
            .with_ymd_and_hms(2024, 3, 1, 0, 30, 0)
            .single()
            .expect("time")
            .with_timezone(&tokyo);
        let next = next_run(&now, 10).expect("next run");
        assert_eq!(
            next.with_timezone(&Utc),
            Utc.with_ymd_and_hms(2024, 3, 1, 1, 0, 0).single().expect("time")
        );
    }
}
