// SM-2 (SuperMemo 2) spaced repetition scheduling.
// Failed recall (quality < 3) sends the item back to daily review;
// successful recall ramps 1 day -> 6 days -> ease-scaled.

use chrono::{DateTime, Days, Utc};

pub const DEFAULT_EF: f64 = 2.5;
pub const MIN_EF: f64 = 1.3;

/// Recall quality grade, 0 through 5.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Quality {
    Blackout = 0,
    Incorrect = 1,
    Recognized = 2,
    Difficult = 3,
    Hesitant = 4,
    Perfect = 5,
}

impl Quality {
    pub fn from_u8(n: u8) -> Option<Quality> {
        match n {
            0 => Some(Quality::Blackout),
            1 => Some(Quality::Incorrect),
            2 => Some(Quality::Recognized),
            3 => Some(Quality::Difficult),
            4 => Some(Quality::Hesitant),
            5 => Some(Quality::Perfect),
            _ => None,
        }
    }

    /// Quality 3 and above counts as a successful recall.
    pub fn passing(self) -> bool {
        (self as u8) >= 3
    }
}

impl From<Quality> for f64 {
    fn from(q: Quality) -> f64 {
        q as u8 as f64
    }
}

#[derive(Clone, Copy, PartialEq, Debug, serde::Serialize)]
pub struct ReviewState {
    /// Days until the next review, always >= 1.
    pub interval: u32,
    /// Consecutive successful recalls, reset to 0 on failure.
    pub repetition: u32,
    /// Ease factor, never below [`MIN_EF`].
    pub ef: f64,
    /// When the item next becomes eligible for review.
    pub due_at: DateTime<Utc>,
}

impl ReviewState {
    /// State for an item entering the system: due immediately.
    pub fn new(now: DateTime<Utc>) -> ReviewState {
        ReviewState {
            interval: 1,
            repetition: 0,
            ef: DEFAULT_EF,
            due_at: now,
        }
    }
}

/// Compute the state after grading a review at `now`.
///
/// The ease factor is updated and clamped first; the interval
/// multiplication for mature items uses the updated, clamped value.
/// `due_at` moves forward by `interval` calendar days, keeping the
/// time-of-day of `now`.
pub fn schedule_next_review(
    current: &ReviewState,
    quality: Quality,
    now: DateTime<Utc>,
) -> ReviewState {
    let q: f64 = quality.into();
    let ef = f64::max(MIN_EF, current.ef + (0.1 - (5.0 - q) * (0.08 + (5.0 - q) * 0.02)));

    let (repetition, interval) = if !quality.passing() {
        (0, 1)
    } else {
        match current.repetition {
            0 => (1, 1),
            1 => (2, 6),
            r => (r + 1, (current.interval as f64 * ef).round() as u32),
        }
    };

    ReviewState {
        interval,
        repetition,
        ef,
        due_at: now + Days::new(u64::from(interval)),
    }
}
