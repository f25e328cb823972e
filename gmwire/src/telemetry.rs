//! Typed replies to the poll batches
//!
//! Each parser takes the whole reply to one batch (see `commands::batches`) and
//! returns a typed value, or a parse error that leaves the store untouched.

use chrono::NaiveDate;

use crate::error::{MountError, MountResult};
use crate::protocol::{field, parse_fields, parse_values, split_fields, FieldKind, FieldSpec};
use crate::types::{AlignmentInfo, AlignmentStar, DutInfo, Firmware, PierSide, SlewFlip};

const ONCE_SCHEMA: &[FieldSpec] = &[
    field("elevation", FieldKind::Float),
    field("longitude", FieldKind::Longitude),
    field("latitude", FieldKind::Degrees),
    field("fw_date", FieldKind::Text),
    field("fw_number", FieldKind::Text),
    field("product", FieldKind::Text),
    field("fw_time", FieldKind::Text),
    field("hardware", FieldKind::Text),
];

const GINFO_SCHEMA: &[FieldSpec] = &[
    field("ra", FieldKind::Float),
    field("dec", FieldKind::Float),
    field("pierside", FieldKind::Text),
    field("az", FieldKind::Float),
    field("alt", FieldKind::Float),
    field("jd", FieldKind::Float),
    field("status", FieldKind::Int),
    field("slewing", FieldKind::Flag),
];

const MEDIUM_SCHEMA: &[FieldSpec] = &[
    field("slew_rate", FieldKind::Int),
    field("time_to_flip", FieldKind::Float),
    field("limit_track", FieldKind::Float),
    field("limit_slew", FieldKind::Float),
    field("temperature", FieldKind::Float),
    field("pressure", FieldKind::Float),
];

const SLOW_SCHEMA: &[FieldSpec] = &[
    field("telescope_temperature", FieldKind::Text),
    field("settings", FieldKind::Text),
    field("horizon_low", FieldKind::Limit),
];

const SLOW_DUT_SCHEMA: &[FieldSpec] = &[
    field("telescope_temperature", FieldKind::Text),
    field("settings", FieldKind::Text),
    field("horizon_low", FieldKind::Limit),
    field("dut", FieldKind::Text),
];

/// `GREF`, `Guaf` and `Gdat` answer one bare digit each, so they run into
/// the `Gh` answer: `101+80*`
const SETTINGS_SCHEMA: &[FieldSpec] = &[
    field("refraction", FieldKind::Flag),
    field("unattended_flip", FieldKind::Flag),
    field("dual_axis", FieldKind::Flag),
    field("horizon_high", FieldKind::Limit),
];

const STAR_SCHEMA: &[FieldSpec] = &[
    field("ha", FieldKind::Hours),
    field("dec", FieldKind::Degrees),
    field("error_rms", FieldKind::Float),
    field("error_angle", FieldKind::Float),
];

/// Site and firmware read once after connect
#[derive(Debug, Clone, PartialEq)]
pub struct OnceReply {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation_m: f64,
    pub firmware: Firmware,
}

pub fn parse_once(reply: &str) -> MountResult<OnceReply> {
    let f = parse_fields(reply, ONCE_SCHEMA)?;
    let number = f.text("fw_number")?;
    Ok(OnceReply {
        latitude: f.float("latitude")?,
        longitude: f.float("longitude")?,
        elevation_m: f.float("elevation")?,
        firmware: Firmware {
            product_name: f.text("product")?,
            hardware_version: f.text("hardware")?,
            fw: Firmware::pack(&number),
            number,
            date: f.text("fw_date")?,
            time: f.text("fw_time")?,
        },
    })
}

/// One consistent pointing sample from `GS` + `Ginfo`
#[derive(Debug, Clone, PartialEq)]
pub struct FastReply {
    pub local_sidereal_time: String,
    pub ra_jnow: f64,
    pub dec_jnow: f64,
    pub pierside: PierSide,
    pub az: f64,
    pub alt: f64,
    pub julian_date: f64,
    pub status: u32,
    pub slewing: bool,
}

pub fn parse_fast(reply: &str) -> MountResult<FastReply> {
    let chunks = split_fields(reply);
    if chunks.len() != 2 {
        return Err(MountError::ParseShort {
            expected: 2,
            got: chunks.len(),
        });
    }
    let info: Vec<&str> = chunks[1].split(',').collect();
    let f = parse_values(&info, GINFO_SCHEMA)?;
    let letter = f.text("pierside")?;
    let pierside = PierSide::from_letter(&letter)
        .ok_or_else(|| MountError::mismatch(format!("unknown pier side '{}'", letter)))?;
    let status = u32::try_from(f.int("status")?)
        .map_err(|_| MountError::mismatch("negative mount status"))?;
    Ok(FastReply {
        local_sidereal_time: chunks[0].trim().to_string(),
        ra_jnow: f.float("ra")?,
        dec_jnow: f.float("dec")?,
        pierside,
        az: f.float("az")?,
        alt: f.float("alt")?,
        julian_date: f.float("jd")?,
        status,
        slewing: f.flag("slewing")?,
    })
}

/// Slew and flip timing plus the mount's current refraction inputs
#[derive(Debug, Clone, PartialEq)]
pub struct MediumReply {
    pub slew_flip: SlewFlip,
    pub temperature: f64,
    pub pressure: f64,
}

pub fn parse_medium(reply: &str) -> MountResult<MediumReply> {
    let f = parse_fields(reply, MEDIUM_SCHEMA)?;
    let time_to_flip_min = f.float("time_to_flip")?;
    let track = f.float("limit_track")?;
    let slew_rate = u32::try_from(f.int("slew_rate")?)
        .map_err(|_| MountError::mismatch("negative slew rate"))?;
    Ok(MediumReply {
        slew_flip: SlewFlip {
            slew_rate,
            time_to_flip_min,
            meridian_limit_track_deg: track,
            meridian_limit_slew_deg: f.float("limit_slew")?,
            time_to_meridian_min: SlewFlip::time_to_meridian(time_to_flip_min, track),
        },
        temperature: f.float("temperature")?,
        pressure: f.float("pressure")?,
    })
}

/// Refraction flags, horizon limits and, on newer firmware, DUT1 validity
#[derive(Debug, Clone, PartialEq)]
pub struct SlowReply {
    pub telescope_temperature: Option<f64>,
    pub refraction_status: bool,
    pub unattended_flip: bool,
    pub dual_axis_tracking: bool,
    pub horizon_limit_high: f64,
    pub horizon_limit_low: f64,
    pub dut: Option<DutInfo>,
}

pub fn parse_slow(reply: &str, with_dut: bool) -> MountResult<SlowReply> {
    let schema = if with_dut { SLOW_DUT_SCHEMA } else { SLOW_SCHEMA };
    let f = parse_fields(reply, schema)?;
    let settings_chunk = f.text("settings")?;
    let settings = split_settings(&settings_chunk)?;
    let settings = parse_values(&settings, SETTINGS_SCHEMA)?;
    let dut = if with_dut {
        Some(parse_dut(&f.text("dut")?)?)
    } else {
        None
    };
    Ok(SlowReply {
        telescope_temperature: parse_optional_float(&f.text("telescope_temperature")?),
        refraction_status: settings.flag("refraction")?,
        unattended_flip: settings.flag("unattended_flip")?,
        dual_axis_tracking: settings.flag("dual_axis")?,
        horizon_limit_high: settings.float("horizon_high")?,
        horizon_limit_low: f.float("horizon_low")?,
        dut,
    })
}

/// Cut `101+80*` into its three flag digits and the upper horizon limit
fn split_settings(chunk: &str) -> MountResult<[&str; 4]> {
    let bad = || MountError::mismatch(format!("bad settings chunk '{}'", chunk));
    match (chunk.get(0..1), chunk.get(1..2), chunk.get(2..3), chunk.get(3..)) {
        (Some(a), Some(b), Some(c), Some(rest)) if !rest.is_empty() => Ok([a, b, c, rest]),
        _ => Err(bad()),
    }
}

/// `GDUTV` answers `valid,expiration`
pub fn parse_dut(body: &str) -> MountResult<DutInfo> {
    let (valid, expiration) = body
        .split_once(',')
        .ok_or_else(|| MountError::mismatch(format!("bad DUT reply '{}'", body)))?;
    let valid = matches!(valid.trim(), "V" | "1");
    let expiration_raw = expiration.trim().to_string();
    Ok(DutInfo {
        valid,
        expiration: NaiveDate::parse_from_str(&expiration_raw, "%Y-%m-%d").ok(),
        expiration_raw,
    })
}

/// The mount reports unavailable numbers as `E`
fn parse_optional_float(s: &str) -> Option<f64> {
    match s.trim() {
        "" | "E" => None,
        v => v.parse().ok(),
    }
}

/// Parse a bare count such as the `getalst` or `modelcnt` answer
pub fn parse_count(chunk: &str) -> MountResult<usize> {
    chunk
        .trim()
        .parse()
        .map_err(|_| MountError::mismatch(format!("bad count '{}'", chunk)))
}

/// `getain` + `getalst`: model summary and star count
pub fn parse_alignment_header(reply: &str) -> MountResult<(AlignmentInfo, usize)> {
    let chunks = split_fields(reply);
    if chunks.len() != 2 {
        return Err(MountError::ParseShort {
            expected: 2,
            got: chunks.len(),
        });
    }
    Ok((parse_alignment_info(chunks[0]), parse_count(chunks[1])?))
}

pub fn parse_alignment_info(body: &str) -> AlignmentInfo {
    let v: Vec<Option<f64>> = body.split(',').map(parse_optional_float).collect();
    let at = |i: usize| v.get(i).copied().flatten();
    AlignmentInfo {
        ra_axis_az: at(0),
        ra_axis_alt: at(1),
        polar_error_deg: at(2),
        position_angle_deg: at(3),
        orthogonality_error_deg: at(4),
        az_knob_turns: at(5),
        alt_knob_turns: at(6),
        terms: at(7).map(|t| t as u32),
        rms_arcsec: at(8),
    }
}

/// One `getalp` answer: `HH:MM:SS.SS,+DD*MM:SS.S,EEEE.E,PPP`
pub fn parse_alignment_star(number: usize, body: &str) -> MountResult<AlignmentStar> {
    let values: Vec<&str> = body.split(',').collect();
    let f = parse_values(&values, STAR_SCHEMA)?;
    Ok(AlignmentStar {
        number,
        ha: f.float("ha")?,
        dec: f.float("dec")?,
        error_rms_arcsec: f.float("error_rms")?,
        error_angle_deg: f.float("error_angle")?,
    })
}

pub fn parse_alignment_stars(reply: &str, count: usize) -> MountResult<Vec<AlignmentStar>> {
    let chunks = split_fields(reply);
    if chunks.len() != count {
        return Err(MountError::ParseShort {
            expected: count,
            got: chunks.len(),
        });
    }
    chunks
        .iter()
        .enumerate()
        .map(|(i, body)| parse_alignment_star(i + 1, body))
        .collect()
}

pub fn parse_model_names(reply: &str, count: usize) -> MountResult<Vec<String>> {
    let chunks = split_fields(reply);
    if chunks.len() != count {
        return Err(MountError::ParseShort {
            expected: count,
            got: chunks.len(),
        });
    }
    Ok(chunks.iter().map(|s| s.trim().to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONCE_REPLY: &str =
        "+0585.2#-011:35:00.0#+48:07:00.0#Mar 19 2018#2.15.14#10micron GM1000HPS#15:56:53#Q-TYPE2012#";

    #[test]
    fn test_parse_once() {
        let once = parse_once(ONCE_REPLY).unwrap();
        assert_eq!(once.elevation_m, 585.2);
        assert!((once.longitude - 11.5833).abs() < 1e-3);
        assert!((once.latitude - 48.1167).abs() < 1e-3);
        assert_eq!(once.firmware.number, "2.15.14");
        assert_eq!(once.firmware.fw, 21514);
        assert_eq!(once.firmware.product_name, "10micron GM1000HPS");
        assert_eq!(once.firmware.hardware_version, "Q-TYPE2012");
        assert_eq!(once.firmware.date, "Mar 19 2018");
        assert_eq!(once.firmware.time, "15:56:53");
    }

    #[test]
    fn test_parse_fast() {
        let fast =
            parse_fast("18:45:12.3#10.5,45.2,W,123.4,52.1,2458352.10403639,5,0#").unwrap();
        assert_eq!(fast.local_sidereal_time, "18:45:12.3");
        assert_eq!(fast.ra_jnow, 10.5);
        assert_eq!(fast.dec_jnow, 45.2);
        assert_eq!(fast.pierside, PierSide::West);
        assert_eq!(fast.az, 123.4);
        assert_eq!(fast.alt, 52.1);
        assert_eq!(fast.status, 5);
        assert!(!fast.slewing);
    }

    #[test]
    fn test_parse_fast_bad_pierside() {
        let err = parse_fast("18:45:12.3#10.5,45.2,1,123.4,52.1,2458352.1,5,0#").unwrap_err();
        assert!(matches!(err, MountError::ParseMismatch(_)));
    }

    #[test]
    fn test_parse_fast_short() {
        assert!(matches!(
            parse_fast("18:45:12.3#"),
            Err(MountError::ParseShort { .. })
        ));
        assert!(matches!(
            parse_fast("18:45:12.3#10.5,45.2,W#"),
            Err(MountError::ParseShort { .. })
        ));
    }

    #[test]
    fn test_parse_medium() {
        let medium = parse_medium("15#0100#3#5#+010.0#1013.2#").unwrap();
        assert_eq!(medium.slew_flip.slew_rate, 15);
        assert_eq!(medium.slew_flip.time_to_flip_min, 100.0);
        assert!((medium.slew_flip.time_to_meridian_min - 88.0).abs() < 1e-9);
        assert_eq!(medium.temperature, 10.0);
        assert_eq!(medium.pressure, 1013.2);
    }

    #[test]
    fn test_parse_slow_variants() {
        let old = parse_slow("+012.3#101+80*#+05*#", false).unwrap();
        assert_eq!(old.telescope_temperature, Some(12.3));
        assert!(old.refraction_status);
        assert!(!old.unattended_flip);
        assert!(old.dual_axis_tracking);
        assert_eq!(old.horizon_limit_high, 80.0);
        assert_eq!(old.horizon_limit_low, 5.0);
        assert!(old.dut.is_none());

        let new = parse_slow("E#011-05*#-10*#V,2019-06-30#", true).unwrap();
        assert_eq!(new.telescope_temperature, None);
        assert!(!new.refraction_status);
        assert!(new.unattended_flip);
        assert_eq!(new.horizon_limit_high, -5.0);
        assert_eq!(new.horizon_limit_low, -10.0);
        let dut = new.dut.unwrap();
        assert!(dut.valid);
        assert_eq!(dut.expiration, NaiveDate::from_ymd_opt(2019, 6, 30));

        // A 4-chunk reply is a mismatch when the old batch was sent
        assert!(parse_slow("E#101+80*#+05*#V,2019-06-30#", false).is_err());
    }

    #[test]
    fn test_parse_slow_bad_settings() {
        assert!(matches!(
            parse_slow("+012.3#10#+05*#", false),
            Err(MountError::ParseMismatch(_))
        ));
        assert!(matches!(
            parse_slow("+012.3#1x1+80*#+05*#", false),
            Err(MountError::ParseMismatch(_))
        ));
        assert!(matches!(
            parse_slow("+012.3#1#0#1#+80*#+05*#", false),
            Err(MountError::ParseMismatch(_))
        ));
    }

    #[test]
    fn test_parse_alignment() {
        let (info, count) =
            parse_alignment_header("0.1234,+45.0000,0.0120,123.45,+0.0012,+1.20,-0.40,12,9.8#2#")
                .unwrap();
        assert_eq!(count, 2);
        assert_eq!(info.terms, Some(12));
        assert_eq!(info.rms_arcsec, Some(9.8));

        let (empty, zero) = parse_alignment_header("E#0#").unwrap();
        assert_eq!(zero, 0);
        assert_eq!(empty.ra_axis_az, None);

        let stars = parse_alignment_stars(
            "01:00:00.00,+45*30:00.0,12.5,90#23:30:00.00,-10*00:00.0,3.1,270#",
            2,
        )
        .unwrap();
        assert_eq!(stars.len(), 2);
        assert_eq!(stars[0].number, 1);
        assert_eq!(stars[0].ha, 1.0);
        assert_eq!(stars[0].dec, 45.5);
        assert_eq!(stars[1].error_angle_deg, 270.0);
    }

    #[test]
    fn test_parse_model_names() {
        let names = parse_model_names("BACKUP#NIGHT1#", 2).unwrap();
        assert_eq!(names, vec!["BACKUP", "NIGHT1"]);
        assert!(parse_model_names("BACKUP#", 2).is_err());
    }
}
