//! Capsule lifecycle: edit window, lock, and opening.
//!
//! A capsule's display state is derived purely from two stored timestamps
//! and the current instant. Nothing here is enforced by the store; the
//! evaluation is recomputed whenever a capsule is shown.
//!
//! ```text
//!   created_at        created_at + 12h              open_date
//!       │── editable ──────│────────── locked ──────────│── openable ──▶
//! ```
//!
//! When `open_date` falls inside the edit window the capsule is editable and
//! openable at the same time and never locked.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::capsule::edit_window;

/// How often a displayed capsule must be re-evaluated. Elapsed time is the
/// only thing that changes the state, so this is a polling interval.
pub const REFRESH_INTERVAL: std::time::Duration =
  std::time::Duration::from_secs(60);

// ─── State ───────────────────────────────────────────────────────────────────

/// Derived display state of a capsule at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapsuleState {
  /// The owner may still edit or delete.
  pub editable:       bool,
  /// Past the edit window but not yet open.
  pub locked:         bool,
  /// The open date has been reached.
  pub openable:       bool,
  /// Countdown to `open_date`; `None` once openable.
  pub time_remaining: Option<TimeRemaining>,
}

impl CapsuleState {
  /// Whether a card may be opened for viewing.
  ///
  /// Locked capsules never open. Outside the public listing a capsule opens
  /// only once its open date has passed.
  pub fn is_viewable(&self, public_listing: bool) -> bool {
    if self.locked {
      return false;
    }
    public_listing || self.openable
  }
}

/// Evaluate a capsule created at `created_at` and opening at `open_date`.
pub fn evaluate(
  created_at: DateTime<Utc>,
  open_date: DateTime<Utc>,
  now: DateTime<Utc>,
) -> CapsuleState {
  let edit_deadline = created_at + edit_window();
  let openable = now >= open_date;

  CapsuleState {
    editable: now < edit_deadline,
    locked: now > edit_deadline && now < open_date,
    openable,
    time_remaining: (!openable).then(|| TimeRemaining::between(now, open_date)),
  }
}

// ─── Countdown ───────────────────────────────────────────────────────────────

/// Whole days, remaining whole hours and remaining whole minutes until an
/// instant. Each step is floor division; seconds are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRemaining {
  pub days:    i64,
  pub hours:   i64,
  pub minutes: i64,
}

impl TimeRemaining {
  const MINUTE_MS: i64 = 60 * 1000;
  const HOUR_MS: i64 = 60 * Self::MINUTE_MS;
  const DAY_MS: i64 = 24 * Self::HOUR_MS;

  /// Countdown from `now` to `target`. Zero when `target` is not ahead.
  pub fn between(now: DateTime<Utc>, target: DateTime<Utc>) -> Self {
    Self::from_duration(target - now)
  }

  pub fn from_duration(delta: Duration) -> Self {
    let ms = delta.num_milliseconds().max(0);
    Self {
      days:    ms / Self::DAY_MS,
      hours:   (ms % Self::DAY_MS) / Self::HOUR_MS,
      minutes: (ms % Self::HOUR_MS) / Self::MINUTE_MS,
    }
  }
}

impl fmt::Display for TimeRemaining {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}d {}h {}m", self.days, self.hours, self.minutes)
  }
}
