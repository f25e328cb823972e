//! Seams to the rest of the observatory
//!
//! The core does not compute coordinates, read weather stations or drive a
//! dome itself. It talks to whatever implements these traits.

use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use gmwire::Site;

use crate::config::constants::{PRESSURE_RANGE_HPA, TEMPERATURE_RANGE_C};

/// JNow to J2000 conversion
pub trait TransformProvider: Send + Sync {
    /// Convert the apparent position at Julian date `jd`. None when no
    /// conversion is possible; the store then keeps the last J2000 value and
    /// marks it stale.
    fn jnow_to_j2000(&self, ra_hours: f64, dec_deg: f64, jd: f64, site: &Site)
        -> Option<(f64, f64)>;
}

/// No transform available
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTransform;

impl TransformProvider for NoTransform {
    fn jnow_to_j2000(&self, _: f64, _: f64, _: f64, _: &Site) -> Option<(f64, f64)> {
        None
    }
}

/// Receives dome azimuth targets
pub trait DomeSink: Send + Sync {
    fn slew_to_azimuth(&self, azimuth_deg: f64);
}

/// One weather station reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentReading {
    pub temperature: f64,
    pub pressure: f64,
    pub at: Instant,
}

impl EnvironmentReading {
    pub fn new(temperature: f64, pressure: f64) -> Self {
        Self {
            temperature,
            pressure,
            at: Instant::now(),
        }
    }

    /// Readings outside these bounds are almost certainly sensor faults and
    /// must never reach the mount
    pub fn is_plausible(&self) -> bool {
        let (p_lo, p_hi) = PRESSURE_RANGE_HPA;
        let (t_lo, t_hi) = TEMPERATURE_RANGE_C;
        self.pressure > p_lo && self.pressure < p_hi && self.temperature > t_lo
            && self.temperature < t_hi
    }
}

/// Source of environment readings for automatic refraction updates
pub trait EnvironmentProvider: Send + Sync {
    fn reading(&self) -> Option<EnvironmentReading>;
}

/// Holds the last plausible reading pushed in from outside
#[derive(Debug, Default)]
pub struct LatestReading {
    reading: Mutex<Option<EnvironmentReading>>,
}

impl LatestReading {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the reading if it is plausible. Returns whether it was kept.
    pub fn update(&self, reading: EnvironmentReading) -> bool {
        if !reading.is_plausible() {
            return false;
        }
        *self.reading.lock().unwrap_or_else(PoisonError::into_inner) = Some(reading);
        true
    }
}

impl EnvironmentProvider for LatestReading {
    fn reading(&self) -> Option<EnvironmentReading> {
        *self.reading.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
