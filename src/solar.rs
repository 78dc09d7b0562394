//! Sunrise and sunset lookup for a geographic coordinate.

use anyhow::{Result, bail};
use chrono::{DateTime, Days, NaiveDate, TimeDelta, Utc};
use sunrise::{SolarDay, SolarEvent};

/// Calendar days scanned on each side of the reference time.
const SEARCH_DAYS: u64 = 3;

/// Latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            bail!("Latitude {} is outside [-90, 90]", self.latitude);
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            bail!("Longitude {} is outside [-180, 180]", self.longitude);
        }
        Ok(())
    }
}

/// Solar event calculator. Implementations must be pure and total.
#[cfg_attr(test, mockall::automock)]
pub trait SolarClock: Send + Sync {
    /// First sunrise strictly after `t`.
    fn next_sunrise(&self, t: DateTime<Utc>, at: Coordinates) -> DateTime<Utc>;

    /// First sunset strictly after `t`.
    fn next_sunset(&self, t: DateTime<Utc>, at: Coordinates) -> DateTime<Utc>;

    /// Last sunset strictly before `t`.
    fn previous_sunset(&self, t: DateTime<Utc>, at: Coordinates) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy)]
enum Event {
    Sunrise,
    Sunset,
}

impl Event {
    fn solar_event(self) -> SolarEvent {
        match self {
            Event::Sunrise => SolarEvent::Sunrise,
            Event::Sunset => SolarEvent::Sunset,
        }
    }
}

/// [`SolarClock`] backed by the `sunrise` crate.
///
/// Where no event exists within a few days (polar day or night) the result is
/// one day away from the reference time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SunriseClock;

impl SunriseClock {
    fn event_on(date: NaiveDate, at: Coordinates, event: Event) -> Option<DateTime<Utc>> {
        let coord = sunrise::Coordinates::new(at.latitude, at.longitude)?;
        Some(SolarDay::new(coord, date).event_time(event.solar_event()))
    }

    fn candidates(
        t: DateTime<Utc>,
        at: Coordinates,
        event: Event,
    ) -> impl Iterator<Item = DateTime<Utc>> {
        let first = t.date_naive().checked_sub_days(Days::new(SEARCH_DAYS));
        (0..=2 * SEARCH_DAYS)
            .filter_map(move |offset| first?.checked_add_days(Days::new(offset)))
            .filter_map(move |date| Self::event_on(date, at, event))
    }

    fn next_event(t: DateTime<Utc>, at: Coordinates, event: Event) -> DateTime<Utc> {
        Self::candidates(t, at, event)
            .filter(|time| *time > t)
            .min()
            .unwrap_or(t + TimeDelta::days(1))
    }

    fn previous_event(t: DateTime<Utc>, at: Coordinates, event: Event) -> DateTime<Utc> {
        Self::candidates(t, at, event)
            .filter(|time| *time < t)
            .max()
            .unwrap_or(t - TimeDelta::days(1))
    }
}

impl SolarClock for SunriseClock {
    fn next_sunrise(&self, t: DateTime<Utc>, at: Coordinates) -> DateTime<Utc> {
        Self::next_event(t, at, Event::Sunrise)
    }

    fn next_sunset(&self, t: DateTime<Utc>, at: Coordinates) -> DateTime<Utc> {
        Self::next_event(t, at, Event::Sunset)
    }

    fn previous_sunset(&self, t: DateTime<Utc>, at: Coordinates) -> DateTime<Utc> {
        Self::previous_event(t, at, Event::Sunset)
    }
}
