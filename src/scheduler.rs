//! Solar fade engine.
//!
//! The fixture fades in over a transition period centred on sunset and fades
//! out over one centred on sunrise. Brightness is a function of wall-clock time
//! elapsed since the fade began, so missed ticks never accumulate drift.

use std::{sync::Arc, time::Duration};

use anyhow::{Result, bail};
use chrono::{DateTime, Local, TimeDelta, Utc};

use crate::{
    brightness::BrightnessLevel,
    solar::{Coordinates, SolarClock},
};

const MAX_POWER: f64 = u8::MAX as f64;

/// Longest tick interval, and the share of one brightness step a tick may span.
const MAX_TICK: Duration = Duration::from_secs(1);
const TICK_FRACTION: f64 = 0.9;

/// Total length of a solar fade, always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPeriod {
    seconds: u32,
}

impl TransitionPeriod {
    pub fn from_secs(seconds: i64) -> Result<Self> {
        if seconds <= 0 {
            bail!("Need to have a transition period that is greater than zero (got {seconds}s)");
        }
        let Ok(seconds) = u32::try_from(seconds) else {
            bail!("Transition period of {seconds}s is too long");
        };
        Ok(Self { seconds })
    }

    pub const fn as_secs(self) -> u32 {
        self.seconds
    }

    pub fn as_secs_f64(self) -> f64 {
        f64::from(self.seconds)
    }

    /// Offset between a solar event and the start of the fade centred on it.
    pub fn half(self) -> TimeDelta {
        TimeDelta::milliseconds(i64::from(self.seconds) * 500)
    }

    /// Main loop cadence: `min(1s, period / 255 * 0.9)`.
    pub fn tick_interval(self) -> Duration {
        Duration::from_secs_f64(self.as_secs_f64() / MAX_POWER * TICK_FRACTION).min(MAX_TICK)
    }
}

/// Fade-in brightness `elapsed_secs` after the fade started.
pub fn fade_in_level(elapsed_secs: f64, period: TransitionPeriod) -> BrightnessLevel {
    let power = (MAX_POWER / period.as_secs_f64() * elapsed_secs).ceil();
    BrightnessLevel::clamped(power as i64)
}

/// Fade-out brightness `elapsed_secs` after the fade started.
pub fn fade_out_level(elapsed_secs: f64, period: TransitionPeriod) -> BrightnessLevel {
    let dimmed = (MAX_POWER / period.as_secs_f64() * elapsed_secs).floor();
    BrightnessLevel::clamped(i64::from(u8::MAX) - dimmed as i64)
}

fn elapsed_secs(now: DateTime<Utc>, since: DateTime<Utc>) -> f64 {
    let elapsed = now - since;
    elapsed.num_nanoseconds().map_or_else(
        || elapsed.num_milliseconds() as f64 / 1000.0,
        |nanos| nanos as f64 / 1_000_000_000.0,
    )
}

/// Formats an instant in local time the way the schedule is logged.
pub fn format_instant(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local)
        .format("%H:%M:%S on %-m/%-d/%Y")
        .to_string()
}

/// Start instants of the next fade-in and fade-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FadeSchedule {
    pub fade_in: DateTime<Utc>,
    pub fade_out: DateTime<Utc>,
}

impl FadeSchedule {
    /// Schedule for the solar night surrounding `now`: the next sunrise and
    /// the sunset preceding it. The fade-in start may already be past.
    pub fn initial(
        now: DateTime<Utc>,
        period: TransitionPeriod,
        clock: &dyn SolarClock,
        at: Coordinates,
    ) -> Self {
        let sunrise = clock.next_sunrise(now, at);
        let sunset = clock.previous_sunset(sunrise, at);
        Self {
            fade_in: sunset - period.half(),
            fade_out: sunrise - period.half(),
        }
    }
}

/// Result of one scheduler tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    /// Levels to apply, in order.
    pub levels: Vec<BrightnessLevel>,
    /// New fade-in start, when the fade-in completed on this tick.
    pub fade_in_rescheduled: Option<DateTime<Utc>>,
    /// New fade-out start, when the fade-out completed on this tick.
    pub fade_out_rescheduled: Option<DateTime<Utc>>,
}

impl TickOutcome {
    pub fn rescheduled(&self) -> bool {
        self.fade_in_rescheduled.is_some() || self.fade_out_rescheduled.is_some()
    }
}

/// Computes target brightness per tick and re-projects completed fades.
pub struct TransitionScheduler {
    period: TransitionPeriod,
    clock: Arc<dyn SolarClock>,
    schedule: FadeSchedule,
}

impl TransitionScheduler {
    pub fn new(
        period: TransitionPeriod,
        clock: Arc<dyn SolarClock>,
        now: DateTime<Utc>,
        at: Coordinates,
    ) -> Self {
        let schedule = FadeSchedule::initial(now, period, clock.as_ref(), at);
        Self::with_schedule(period, clock, schedule)
    }

    pub fn with_schedule(
        period: TransitionPeriod,
        clock: Arc<dyn SolarClock>,
        schedule: FadeSchedule,
    ) -> Self {
        Self {
            period,
            clock,
            schedule,
        }
    }

    pub const fn schedule(&self) -> FadeSchedule {
        self.schedule
    }

    pub const fn period(&self) -> TransitionPeriod {
        self.period
    }

    /// Evaluates both fades at `now`.
    ///
    /// A fade is active strictly after its start instant. `at` is only read
    /// when a completed fade is re-projected onto the next solar event.
    pub fn tick(&mut self, now: DateTime<Utc>, at: Coordinates) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        if now > self.schedule.fade_in {
            let level = fade_in_level(elapsed_secs(now, self.schedule.fade_in), self.period);
            outcome.levels.push(level);
            if level == BrightnessLevel::FULL {
                let fade_in = self.clock.next_sunset(now, at) - self.period.half();
                self.schedule.fade_in = fade_in;
                outcome.fade_in_rescheduled = Some(fade_in);
            }
        }

        if now > self.schedule.fade_out {
            let level = fade_out_level(elapsed_secs(now, self.schedule.fade_out), self.period);
            outcome.levels.push(level);
            if level == BrightnessLevel::OFF {
                let fade_out = self.clock.next_sunrise(now, at) - self.period.half();
                self.schedule.fade_out = fade_out;
                outcome.fade_out_rescheduled = Some(fade_out);
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solar::MockSolarClock;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const HERE: Coordinates = Coordinates::new(52.0, 4.9);

    fn hour() -> TransitionPeriod {
        TransitionPeriod::from_secs(3600).unwrap()
    }

    fn at(hours: u32, minutes: u32, seconds: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 1, hours, minutes, seconds)
            .unwrap()
    }

    #[test]
    fn transition_period_rejects_non_positive() {
        assert!(TransitionPeriod::from_secs(0).is_err());
        assert!(TransitionPeriod::from_secs(-5).is_err());
        assert_eq!(TransitionPeriod::from_secs(60).unwrap().as_secs(), 60);
    }

    #[test]
    fn tick_interval_is_capped_at_one_second() {
        assert_eq!(hour().tick_interval(), Duration::from_secs(1));

        let short = TransitionPeriod::from_secs(51).unwrap();
        let expected = 51.0 / 255.0 * 0.9;
        assert!((short.tick_interval().as_secs_f64() - expected).abs() < 1e-9);
    }

    #[test]
    fn half_period_is_centered() {
        assert_eq!(hour().half(), TimeDelta::seconds(1800));
        let odd = TransitionPeriod::from_secs(3).unwrap();
        assert_eq!(odd.half(), TimeDelta::milliseconds(1500));
    }

    #[test]
    fn fade_levels_at_boundaries() {
        assert_eq!(fade_in_level(0.0, hour()), BrightnessLevel::OFF);
        assert_eq!(fade_in_level(3600.0, hour()), BrightnessLevel::FULL);
        assert_eq!(fade_in_level(7200.0, hour()), BrightnessLevel::FULL);
        // ceil: the first millisecond already lights the fixture.
        assert_eq!(fade_in_level(0.001, hour()).value(), 1);

        assert_eq!(fade_out_level(0.0, hour()), BrightnessLevel::FULL);
        assert_eq!(fade_out_level(3600.0, hour()), BrightnessLevel::OFF);
        assert_eq!(fade_out_level(7200.0, hour()), BrightnessLevel::OFF);
        assert_eq!(fade_out_level(0.001, hour()).value(), 255);
    }

    #[test]
    fn initial_schedule_centres_fades_on_events() {
        let mut clock = MockSolarClock::new();
        clock
            .expect_next_sunrise()
            .returning(|_, _| at(6, 0, 0) + TimeDelta::days(1));
        clock
            .expect_previous_sunset()
            .returning(|_, _| at(19, 0, 0));

        let schedule = FadeSchedule::initial(at(12, 0, 0), hour(), &clock, HERE);

        assert_eq!(schedule.fade_in, at(18, 30, 0));
        assert_eq!(schedule.fade_out, at(5, 30, 0) + TimeDelta::days(1));
    }

    #[test]
    fn tick_before_windows_open_applies_nothing() {
        let clock = Arc::new(MockSolarClock::new());
        let schedule = FadeSchedule {
            fade_in: at(18, 30, 0),
            fade_out: at(5, 30, 0) + TimeDelta::days(1),
        };
        let mut scheduler = TransitionScheduler::with_schedule(hour(), clock, schedule);

        assert_eq!(scheduler.tick(at(12, 0, 0), HERE), TickOutcome::default());
        // The start instant itself is not inside the window.
        assert_eq!(scheduler.tick(at(18, 30, 0), HERE), TickOutcome::default());
    }

    #[test]
    fn tick_mid_fade_in_follows_elapsed_time() {
        let clock = Arc::new(MockSolarClock::new());
        let schedule = FadeSchedule {
            fade_in: at(18, 30, 0),
            fade_out: at(5, 30, 0) + TimeDelta::days(1),
        };
        let mut scheduler = TransitionScheduler::with_schedule(hour(), clock, schedule);

        let outcome = scheduler.tick(at(19, 0, 0), HERE);

        assert_eq!(outcome.levels, vec![BrightnessLevel::new(128)]);
        assert!(!outcome.rescheduled());
        assert_eq!(scheduler.schedule(), schedule);
    }

    #[test]
    fn completed_fade_in_is_rescheduled_once() {
        let mut clock = MockSolarClock::new();
        clock
            .expect_next_sunset()
            .times(1)
            .returning(|_, _| at(19, 2, 0) + TimeDelta::days(1));
        let schedule = FadeSchedule {
            fade_in: at(18, 30, 0),
            fade_out: at(5, 30, 0) + TimeDelta::days(1),
        };
        let mut scheduler = TransitionScheduler::with_schedule(hour(), Arc::new(clock), schedule);

        let outcome = scheduler.tick(at(19, 30, 0), HERE);
        assert_eq!(outcome.levels, vec![BrightnessLevel::FULL]);
        let next = at(18, 32, 0) + TimeDelta::days(1);
        assert_eq!(outcome.fade_in_rescheduled, Some(next));
        assert_eq!(scheduler.schedule().fade_in, next);

        // Later ticks during the night apply nothing and never reschedule again.
        let outcome = scheduler.tick(at(23, 0, 0), HERE);
        assert_eq!(outcome, TickOutcome::default());
    }

    #[test]
    fn completed_fade_out_is_rescheduled_once() {
        let mut clock = MockSolarClock::new();
        clock
            .expect_next_sunrise()
            .times(1)
            .returning(|_, _| at(7, 1, 0) + TimeDelta::days(1));
        let schedule = FadeSchedule {
            fade_in: at(18, 30, 0),
            fade_out: at(6, 30, 0),
        };
        let mut scheduler = TransitionScheduler::with_schedule(hour(), Arc::new(clock), schedule);

        let mid = scheduler.tick(at(7, 0, 0), HERE);
        assert_eq!(mid.levels, vec![BrightnessLevel::new(128)]);
        assert_eq!(mid.fade_out_rescheduled, None);

        let done = scheduler.tick(at(7, 30, 0), HERE);
        assert_eq!(done.levels, vec![BrightnessLevel::OFF]);
        assert_eq!(
            done.fade_out_rescheduled,
            Some(at(6, 31, 0) + TimeDelta::days(1))
        );

        assert_eq!(scheduler.tick(at(8, 0, 0), HERE), TickOutcome::default());
    }

    #[test]
    fn late_start_catches_up_in_one_tick() {
        let mut clock = MockSolarClock::new();
        clock
            .expect_next_sunset()
            .returning(|now, _| now + TimeDelta::hours(20));
        let schedule = FadeSchedule {
            fade_in: at(18, 30, 0),
            fade_out: at(5, 30, 0) + TimeDelta::days(1),
        };
        let mut scheduler = TransitionScheduler::with_schedule(hour(), Arc::new(clock), schedule);

        // Started hours after the fade-in window: full brightness immediately.
        let outcome = scheduler.tick(at(23, 45, 0), HERE);
        assert_eq!(outcome.levels, vec![BrightnessLevel::FULL]);
        assert!(outcome.fade_in_rescheduled.is_some());
    }

    #[test]
    fn reschedule_uses_coordinates_passed_at_completion() {
        let moved = Coordinates::new(40.0, -3.7);
        let mut clock = MockSolarClock::new();
        clock
            .expect_next_sunset()
            .withf(move |_, coordinates| *coordinates == moved)
            .times(1)
            .returning(|_, _| at(19, 0, 0) + TimeDelta::days(1));
        let schedule = FadeSchedule {
            fade_in: at(18, 30, 0),
            fade_out: at(5, 30, 0) + TimeDelta::days(1),
        };
        let mut scheduler = TransitionScheduler::with_schedule(hour(), Arc::new(clock), schedule);

        scheduler.tick(at(19, 0, 0), moved);
        assert_eq!(scheduler.schedule().fade_in, at(18, 30, 0));

        scheduler.tick(at(19, 31, 0), moved);
        assert_eq!(
            scheduler.schedule().fade_in,
            at(18, 30, 0) + TimeDelta::days(1)
        );
    }

    proptest! {
        #[test]
        fn fade_in_is_monotonic(period in 1i64..200_000, a in 0.0f64..1.0, b in 0.0f64..1.0) {
            let period = TransitionPeriod::from_secs(period).unwrap();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let secs = period.as_secs_f64();
            let expected = (255.0 / secs * (lo * secs)).ceil() as u8;
            prop_assert!(fade_in_level(lo * secs, period) <= fade_in_level(hi * secs, period));
            prop_assert_eq!(fade_in_level(lo * secs, period).value(), expected);
        }

        #[test]
        fn fade_out_is_monotonic(period in 1i64..200_000, a in 0.0f64..1.0, b in 0.0f64..1.0) {
            let period = TransitionPeriod::from_secs(period).unwrap();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let secs = period.as_secs_f64();
            let expected = 255 - (255.0 / secs * (lo * secs)).floor() as u8;
            prop_assert!(fade_out_level(lo * secs, period) >= fade_out_level(hi * secs, period));
            prop_assert_eq!(fade_out_level(lo * secs, period).value(), expected);
        }

        #[test]
        fn fade_is_pure_in_elapsed_time(period in 1i64..200_000, elapsed in 0.0f64..200_000.0) {
            let period = TransitionPeriod::from_secs(period).unwrap();
            prop_assert_eq!(fade_in_level(elapsed, period), fade_in_level(elapsed, period));
            prop_assert_eq!(fade_out_level(elapsed, period), fade_out_level(elapsed, period));
        }
    }
}
