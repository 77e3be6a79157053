use chrono::{DateTime, Utc};
use rand::Rng;

use crate::models::ProgressObservation;

/// Supplies the `lastActivity` recency value for a roster row.
pub trait ActivitySource: Send + Sync {
    /// Whole days since the student last touched the course, if known.
    fn days_since_activity(
        &self,
        student_id: &str,
        course_id: &str,
        observations: &[&ProgressObservation],
    ) -> Option<i64>;
}

pub fn describe(days: Option<i64>) -> String {
    match days {
        Some(days) => format!("{days} days ago"),
        None => "unknown".to_string(),
    }
}

/// Parses the day count back out of a [`describe`] label.
pub fn parse_days(label: &str) -> Option<i64> {
    label.strip_suffix(" days ago")?.trim().parse().ok()
}

/// Uniform noise in 1..=10 days. Nondeterministic.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomActivity;

impl ActivitySource for RandomActivity {
    fn days_since_activity(&self, _: &str, _: &str, _: &[&ProgressObservation]) -> Option<i64> {
        Some(rand::thread_rng().gen_range(1..=10))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedActivity(pub i64);

impl ActivitySource for FixedActivity {
    fn days_since_activity(&self, _: &str, _: &str, _: &[&ProgressObservation]) -> Option<i64> {
        Some(self.0)
    }
}

/// Derives recency from observation timestamps against an injected clock.
#[derive(Debug, Clone, Copy)]
pub struct ObservedActivity {
    pub now: DateTime<Utc>,
}

impl ObservedActivity {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }
}

impl ActivitySource for ObservedActivity {
    fn days_since_activity(
        &self,
        _: &str,
        _: &str,
        observations: &[&ProgressObservation],
    ) -> Option<i64> {
        let latest = observations.iter().filter_map(|o| o.recorded_at).max()?;
        Some((self.now - latest).num_days().max(0))
    }
}
