use chrono::{DateTime, Duration, Utc};

use crate::clock::Clock;
use crate::models::StatusSnapshot;

pub const ZERO_DISPLAY: &str = "00:00:00";

/// Formats a remaining duration as `HH:MM:SS`. Negative durations read as zero
/// and hours keep counting past 24.
pub fn format_remaining(remaining: Duration) -> String {
    let total = remaining.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Time left until the next scheduled event. Never touches the network.
pub struct CountdownEngine<C: Clock> {
    clock: C,
    target: Option<DateTime<Utc>>,
    display: Option<String>,
}

impl<C: Clock> CountdownEngine<C> {
    pub fn new(clock: C) -> Self {
        Self { clock, target: None, display: None }
    }

    /// Takes the target from a fresh snapshot. A snapshot without a next event
    /// time leaves the current target and display in place.
    pub fn observe(&mut self, snapshot: &StatusSnapshot) {
        match snapshot.next_event_time() {
            Some(target) => self.set_target(Some(target)),
            None => {
                self.tick();
            }
        }
    }

    pub fn set_target(&mut self, target: Option<DateTime<Utc>>) {
        if self.target != target {
            tracing::debug!("Countdown target changed to {:?}", target);
            self.target = target;
            self.display = None;
        }
        if self.target.is_some() {
            self.tick();
        }
    }

    pub fn target(&self) -> Option<DateTime<Utc>> {
        self.target
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Recomputes the display. Without a target this does nothing and returns `None`.
    pub fn tick(&mut self) -> Option<&str> {
        let target = self.target?;
        let remaining = target - self.clock.now();
        self.display = Some(format_remaining(remaining));
        self.display.as_deref()
    }

    /// Last computed display, if any tick has run against the current target.
    pub fn display(&self) -> Option<&str> {
        self.display.as_deref()
    }

    pub fn is_elapsed(&self) -> bool {
        self.target.is_some_and(|target| target <= self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::NextEvent;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_741_770_000, 0).unwrap()
    }

    #[test]
    fn formats_zero_padded() {
        assert_eq!(format_remaining(Duration::milliseconds(3_661_000)), "01:01:01");
        assert_eq!(format_remaining(Duration::seconds(59)), "00:00:59");
        assert_eq!(format_remaining(Duration::hours(26)), "26:00:00");
        assert_eq!(format_remaining(Duration::seconds(-5)), ZERO_DISPLAY);
    }

    #[test]
    fn counts_down_and_holds_at_zero() {
        let clock = ManualClock::new(start());
        let mut countdown = CountdownEngine::new(clock.clone());
        countdown.set_target(Some(start() + Duration::milliseconds(3_661_000)));
        assert_eq!(countdown.display(), Some("01:01:01"));

        clock.advance(Duration::seconds(3_661));
        assert_eq!(countdown.tick(), Some(ZERO_DISPLAY));

        clock.advance(Duration::minutes(10));
        assert_eq!(countdown.tick(), Some(ZERO_DISPLAY));
        assert!(countdown.is_elapsed());
    }

    #[test]
    fn no_target_is_a_no_op() {
        let mut countdown = CountdownEngine::new(ManualClock::new(start()));
        assert_eq!(countdown.tick(), None);

        countdown.observe(&StatusSnapshot {
            next_event: Some(NextEvent { name: "Isha".into(), time: None }),
            ..Default::default()
        });
        assert_eq!(countdown.tick(), None);
        assert_eq!(countdown.display(), None);
    }

    #[test]
    fn new_target_restarts_the_countdown() {
        let clock = ManualClock::new(start());
        let mut countdown = CountdownEngine::new(clock.clone());
        countdown.set_target(Some(start() + Duration::seconds(10)));
        clock.advance(Duration::seconds(20));
        assert_eq!(countdown.tick(), Some(ZERO_DISPLAY));

        countdown.observe(&StatusSnapshot {
            next_event: Some(NextEvent { name: "Asr".into(), time: Some(clock.now() + Duration::hours(2)) }),
            ..Default::default()
        });
        assert_eq!(countdown.display(), Some("02:00:00"));
    }

    #[test]
    fn snapshot_without_next_event_keeps_the_target() {
        let clock = ManualClock::new(start());
        let mut countdown = CountdownEngine::new(clock.clone());
        countdown.set_target(Some(start() + Duration::seconds(30)));

        clock.advance(Duration::seconds(45));
        countdown.observe(&StatusSnapshot { next_event: None, ..Default::default() });
        assert_eq!(countdown.target(), Some(start() + Duration::seconds(30)));
        assert_eq!(countdown.display(), Some(ZERO_DISPLAY));

        countdown.set_target(None);
        assert_eq!(countdown.display(), None);
    }
}
