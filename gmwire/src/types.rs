//! Data model shared between the pollers, the command path and consumers

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Observing site as reported by the mount
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Site {
    /// Degrees, north positive
    pub latitude: f64,
    /// Degrees, east positive
    pub longitude: f64,
    pub elevation_m: f64,
    pub julian_date: f64,
    pub local_sidereal_time: String,
}

/// Firmware identity, read once after connect
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Firmware {
    pub product_name: String,
    pub hardware_version: String,
    /// `MM.mm.pp`
    pub number: String,
    /// `MM*10000 + mm*100 + pp`, zero until the mount has answered
    pub fw: u32,
    pub date: String,
    pub time: String,
}

impl Firmware {
    /// Pack `MM.mm.pp` into a comparable integer. Anything malformed packs to 0.
    pub fn pack(number: &str) -> u32 {
        let parts: Vec<&str> = number.trim().split('.').collect();
        if parts.len() != 3 {
            return 0;
        }
        let mut packed = 0u32;
        for part in parts {
            match part.parse::<u32>() {
                Ok(v) if v < 100 => packed = packed * 100 + v,
                _ => return 0,
            }
        }
        packed
    }
}

/// Side of the pier the tube rests on
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum PierSide {
    #[default]
    Unknown,
    East,
    West,
}

impl PierSide {
    /// `Ginfo` letter to pier side
    pub fn from_letter(letter: &str) -> Option<Self> {
        match letter.trim() {
            "E" => Some(PierSide::East),
            "W" => Some(PierSide::West),
            _ => None,
        }
    }
}

impl fmt::Display for PierSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PierSide::East => write!(f, "EAST"),
            PierSide::West => write!(f, "WEST"),
            PierSide::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Mount status codes reported in `Ginfo`
pub mod status {
    pub const TRACKING: u32 = 0;
    pub const STOPPED: u32 = 1;
    pub const SLEWING_TO_PARK: u32 = 2;
    pub const UNPARKING: u32 = 3;
    pub const SLEWING_HOME: u32 = 4;
    pub const PARKED: u32 = 5;
    pub const SLEWING: u32 = 6;
    pub const TRACKING_OFF: u32 = 7;
    pub const MOTORS_LOW_TEMP: u32 = 8;
    pub const OUTSIDE_LIMITS: u32 = 9;
    pub const SATELLITE: u32 = 10;
    pub const USER_NEEDED: u32 = 11;
    pub const ERROR: u32 = 98;
    pub const UNKNOWN: u32 = 99;
}

/// Pointing tuple, overwritten by every fast tick
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Pointing {
    /// Hours
    pub ra_jnow: f64,
    /// Degrees
    pub dec_jnow: f64,
    pub ra_j2000: f64,
    pub dec_j2000: f64,
    /// Julian date the J2000 pair was converted at
    pub j2000_epoch_jd: f64,
    /// No conversion could be made for the current JNow pair
    pub j2000_stale: bool,
    pub az: f64,
    pub alt: f64,
    pub pierside: PierSide,
    pub status: u32,
    pub slewing: bool,
}

/// Refraction and related mount settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Refraction {
    /// Celsius, as used by the mount's refraction correction
    pub temperature: f64,
    /// hPa
    pub pressure: f64,
    pub telescope_temperature: Option<f64>,
    pub refraction_status: bool,
    pub dual_axis_tracking: bool,
    pub unattended_flip: bool,
    pub horizon_limit_low: f64,
    pub horizon_limit_high: f64,
}

/// Slew rate and meridian flip timing
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SlewFlip {
    pub slew_rate: u32,
    pub time_to_flip_min: f64,
    pub meridian_limit_track_deg: f64,
    pub meridian_limit_slew_deg: f64,
    pub time_to_meridian_min: f64,
}

impl SlewFlip {
    pub fn time_to_meridian(time_to_flip_min: f64, track_limit_deg: f64) -> f64 {
        time_to_flip_min - track_limit_deg / 360.0 * 24.0 * 60.0
    }
}

/// DUT1 table validity as reported by `GDUTV`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DutInfo {
    pub valid: bool,
    pub expiration: Option<NaiveDate>,
    pub expiration_raw: String,
}

/// One calibration star of the active alignment model
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AlignmentStar {
    pub number: usize,
    /// Hour angle, hours
    pub ha: f64,
    /// Degrees
    pub dec: f64,
    pub error_rms_arcsec: f64,
    pub error_angle_deg: f64,
}

/// Summary of the active alignment model from `getain`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AlignmentInfo {
    pub ra_axis_az: Option<f64>,
    pub ra_axis_alt: Option<f64>,
    pub polar_error_deg: Option<f64>,
    pub position_angle_deg: Option<f64>,
    pub orthogonality_error_deg: Option<f64>,
    pub az_knob_turns: Option<f64>,
    pub alt_knob_turns: Option<f64>,
    pub terms: Option<u32>,
    pub rms_arcsec: Option<f64>,
}

/// Stored model names and the active model's stars
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelCatalogue {
    pub name_list: Vec<String>,
    pub star_list: Vec<AlignmentStar>,
    pub info: AlignmentInfo,
    /// Bumped by every completed star refresh
    pub generation: u64,
    pub loading: bool,
}

/// The five TCP conversations held with the mount
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Channel {
    Once,
    Fast,
    Medium,
    Slow,
    Command,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Once,
        Channel::Fast,
        Channel::Medium,
        Channel::Slow,
        Channel::Command,
    ];
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Channel::Once => "once",
            Channel::Fast => "fast",
            Channel::Medium => "medium",
            Channel::Slow => "slow",
            Channel::Command => "command",
        };
        f.write_str(name)
    }
}

/// Per-channel connection state
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConnectionState {
    pub connected: bool,
    pub endpoint: String,
    pub last_error: Option<String>,
    pub last_change: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_firmware_packing() {
        assert_eq!(Firmware::pack("2.15.14"), 21514);
        assert_eq!(Firmware::pack("3.0.0"), 30000);
        assert_eq!(Firmware::pack("2.15"), 0);
        assert_eq!(Firmware::pack("2.x.1"), 0);
        assert_eq!(Firmware::pack(""), 0);
    }

    #[test]
    fn test_pierside_letters() {
        assert_eq!(PierSide::from_letter("W"), Some(PierSide::West));
        assert_eq!(PierSide::from_letter("E"), Some(PierSide::East));
        assert_eq!(PierSide::from_letter("1"), None);
        assert_eq!(PierSide::West.to_string(), "WEST");
    }

    #[test]
    fn test_time_to_meridian() {
        // 3 degrees of track limit is 12 minutes of hour angle
        let t = SlewFlip::time_to_meridian(100.0, 3.0);
        assert!((t - 88.0).abs() < 1e-9);
    }
}
