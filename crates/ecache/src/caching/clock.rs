use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;

use super::entry::add_std;

/// How far, in milliseconds, the system clock may move away from the anchored wall time before
/// re-anchoring.
const MAX_DRIFT_MS: i64 = 500;

/// Wall clock used for entry timestamps.
///
/// The wall time is advanced with tokio's monotonic clock, so pausing and advancing tokio time
/// in tests moves entry deadlines along with timers. Whenever the system clock is corrected (by
/// NTP or by hand) by more than [`MAX_DRIFT_MS`], the anchor is shifted to follow it.
#[derive(Debug)]
pub(crate) struct Clock {
    anchor: Mutex<Anchor>,
}

#[derive(Debug)]
struct Anchor {
    wall: DateTime<Utc>,
    instant: Instant,
    real: std::time::Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    fn starting_at(wall: DateTime<Utc>) -> Self {
        Self {
            anchor: Mutex::new(Anchor {
                wall,
                instant: Instant::now(),
                real: std::time::Instant::now(),
            }),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let mut anchor = self.anchor.lock();

        let drift = Utc::now() - add_std(anchor.wall, anchor.real.elapsed());
        if drift.num_milliseconds().abs() > MAX_DRIFT_MS {
            tracing::debug!(drift_ms = drift.num_milliseconds(), "Re-anchoring cache clock");
            anchor.wall = anchor.wall + drift;
        }

        add_std(anchor.wall, anchor.instant.elapsed())
    }
}
