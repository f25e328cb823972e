//! Sexagesimal coordinate codecs
//!
//! Hours travel as `HH:MM:SS.ss`, declinations and site latitudes as
//! `±DD*MM:SS.s`. Longitude keeps the LX200 convention of east being negative
//! on the wire, so it is inverted on both read and write.

use crate::error::{MountError, MountResult};

const HUNDREDTHS_PER_HOUR: f64 = 360_000.0;
const TENTHS_PER_DEGREE: f64 = 36_000.0;

fn split_sign(s: &str) -> (f64, &str) {
    match s.as_bytes().first() {
        Some(b'-') => (-1.0, &s[1..]),
        Some(b'+') => (1.0, &s[1..]),
        _ => (1.0, s),
    }
}

fn parse_sexagesimal(s: &str, separators: &[char]) -> MountResult<f64> {
    let trimmed = s.trim();
    let (sign, body) = split_sign(trimmed);
    let parts: Vec<&str> = body.split(|c| separators.contains(&c)).collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(MountError::mismatch(format!("bad sexagesimal value '{}'", s)));
    }
    let mut value = 0.0;
    let mut scale = 1.0;
    for part in parts {
        let v: f64 = part
            .parse()
            .map_err(|_| MountError::mismatch(format!("bad sexagesimal value '{}'", s)))?;
        value += v / scale;
        scale *= 60.0;
    }
    Ok(sign * value)
}

/// `HH:MM:SS.ss` to decimal hours
pub fn parse_hours(s: &str) -> MountResult<f64> {
    parse_sexagesimal(s, &[':'])
}

/// Decimal hours to `HH:MM:SS.ss`
pub fn format_hours(hours: f64) -> String {
    let total = (hours.abs() * HUNDREDTHS_PER_HOUR).round() as u64;
    let sign = if hours < 0.0 && total > 0 { "-" } else { "" };
    let hh = total / 360_000;
    let mm = (total / 6_000) % 60;
    let cs = total % 6_000;
    format!("{}{:02}:{:02}:{:02}.{:02}", sign, hh, mm, cs / 100, cs % 100)
}

/// `±DD*MM:SS.s` to decimal degrees. `:` is accepted in place of `*`
/// because site coordinates use it.
pub fn parse_degrees(s: &str) -> MountResult<f64> {
    parse_sexagesimal(s, &['*', ':', '\u{b0}'])
}

fn format_dms(degrees: f64, width: usize, separator: char) -> String {
    let total = (degrees.abs() * TENTHS_PER_DEGREE).round() as u64;
    let sign = if degrees < 0.0 && total > 0 { '-' } else { '+' };
    let dd = total / 36_000;
    let mm = (total / 600) % 60;
    let ts = total % 600;
    format!(
        "{}{:0width$}{}{:02}:{:02}.{}",
        sign,
        dd,
        separator,
        mm,
        ts / 10,
        ts % 10,
        width = width
    )
}

/// Decimal degrees to `±DD*MM:SS.s`
pub fn format_degrees(degrees: f64) -> String {
    format_dms(degrees, 2, '*')
}

/// Wire longitude (east negative) to east-positive degrees
pub fn parse_longitude(s: &str) -> MountResult<f64> {
    Ok(-parse_degrees(s)?)
}

/// East-positive degrees to wire longitude `±DDD:MM:SS.s`
pub fn format_longitude(east_degrees: f64) -> String {
    format_dms(-east_degrees, 3, ':')
}

/// Altitude limits come back as `+80*`
pub fn parse_limit_degrees(s: &str) -> MountResult<f64> {
    let body = s.trim().trim_end_matches('*');
    body.parse()
        .map_err(|_| MountError::mismatch(format!("bad limit '{}'", s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hours() {
        assert!((parse_hours("18:45:12.3").unwrap() - 18.753_417).abs() < 1e-6);
        assert_eq!(format_hours(12.0), "12:00:00.00");
        assert_eq!(format_hours(parse_hours("09:07:59.99").unwrap()), "09:07:59.99");
    }

    #[test]
    fn test_degrees() {
        assert!((parse_degrees("-05*15:30.0").unwrap() + 5.258_333).abs() < 1e-6);
        assert_eq!(format_degrees(45.5), "+45*30:00.0");
        assert_eq!(format_degrees(-0.000_01), "+00*00:00.0");
        assert_eq!(format_degrees(parse_degrees("-89*59:59.9").unwrap()), "-89*59:59.9");
    }

    #[test]
    fn test_hours_sweep() {
        for hh in 0..24u32 {
            for mm in 0..60u32 {
                for cs in [0u32, 1, 99, 100, 3_050, 5_999] {
                    let text = format!("{:02}:{:02}:{:02}.{:02}", hh, mm, cs / 100, cs % 100);
                    let hours = parse_hours(&text).unwrap();
                    let expected = hh as f64 + mm as f64 / 60.0 + cs as f64 / 360_000.0;
                    assert!((hours - expected).abs() < 1e-9, "{}", text);
                    assert_eq!(format_hours(hours), text);
                }
            }
        }
    }

    #[test]
    fn test_degrees_sweep() {
        for sign in ['+', '-'] {
            for dd in 0..90u32 {
                for mm in 0..60u32 {
                    for ts in [0u32, 1, 9, 10, 305, 599] {
                        if sign == '-' && dd == 0 && mm == 0 && ts == 0 {
                            continue;
                        }
                        let text = format!("{}{:02}*{:02}:{:02}.{}", sign, dd, mm, ts / 10, ts % 10);
                        let degrees = parse_degrees(&text).unwrap();
                        let magnitude = dd as f64 + mm as f64 / 60.0 + ts as f64 / 36_000.0;
                        let expected = if sign == '-' { -magnitude } else { magnitude };
                        assert!((degrees - expected).abs() < 1e-9, "{}", text);
                        assert_eq!(format_degrees(degrees), text);
                    }
                }
            }
        }
        assert_eq!(format_degrees(parse_degrees("+90*00:00.0").unwrap()), "+90*00:00.0");
        assert_eq!(format_degrees(parse_degrees("-90*00:00.0").unwrap()), "-90*00:00.0");
        assert_eq!(format_degrees(parse_degrees("-00*00:00.0").unwrap()), "+00*00:00.0");
    }

    #[test]
    fn test_longitude_sweep() {
        for dd in (0..180u32).step_by(7) {
            for mm in [0u32, 1, 35, 59] {
                for sign in ['+', '-'] {
                    let text = format!("{}{:03}:{:02}:17.5", sign, dd, mm);
                    assert_eq!(format_longitude(parse_longitude(&text).unwrap()), text);
                }
            }
        }
    }

    #[test]
    fn test_longitude_sign_inversion() {
        let lon = parse_longitude("-011:35:00.0").unwrap();
        assert!((lon - 11.583_333).abs() < 1e-5);
        assert_eq!(format_longitude(lon), "-011:35:00.0");
        assert_eq!(format_longitude(-70.5), "+070:30:00.0");
    }

    #[test]
    fn test_site_latitude_with_colon() {
        let lat = parse_degrees("+48:07:00.0").unwrap();
        assert!((lat - 48.116_667).abs() < 1e-5);
    }

    #[test]
    fn test_bad_values() {
        assert!(parse_hours("12:xx:00").is_err());
        assert!(parse_degrees("").is_err());
        assert!(parse_degrees("+12**30").is_err());
        assert_eq!(parse_limit_degrees("+80*").unwrap(), 80.0);
        assert_eq!(parse_limit_degrees("-05*").unwrap(), -5.0);
    }
}
