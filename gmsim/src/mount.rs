//! Simulated mount state and command answers

use std::collections::BTreeMap;

use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};

use gmwire::{
    classify, format_degrees, format_hours, format_longitude, parse_hours, split_batch,
    status, CommandCategory, Firmware,
};

/// One alignment star held by the simulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimStar {
    pub ha: f64,
    pub dec: f64,
    pub error_rms: f64,
    pub error_angle: f64,
}

/// Everything the simulated mount knows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountState {
    pub latitude: f64,
    /// East positive; the wire carries the opposite sign
    pub longitude: f64,
    pub elevation_m: f64,
    pub product_name: String,
    pub hardware_version: String,
    pub firmware_number: String,
    pub firmware_date: String,
    pub firmware_time: String,

    pub lst_hours: f64,
    pub julian_date: f64,
    pub ra_hours: f64,
    pub dec_deg: f64,
    pub az: f64,
    pub alt: f64,
    pub pierside: char,
    pub status: u32,
    pub target_ra_hours: f64,
    /// `Ginfo` polls a slew lasts
    pub slew_ticks: u32,
    pub slew_ticks_left: u32,

    pub slew_rate: u32,
    pub time_to_flip_min: f64,
    pub meridian_limit_track: u8,
    pub meridian_limit_slew: u8,
    pub temperature: f64,
    pub pressure: f64,
    pub telescope_temperature: f64,
    pub refraction: bool,
    pub unattended_flip: bool,
    pub dual_axis_tracking: bool,
    pub horizon_limit_high: i8,
    pub horizon_limit_low: i8,
    pub dut_valid: bool,
    pub dut_expiration: String,

    pub active_model: Vec<SimStar>,
    pub stored_models: BTreeMap<String, Vec<SimStar>>,

    /// Add noise to the pointing readout
    pub jitter: bool,
}

impl Default for MountState {
    fn default() -> Self {
        let stars = vec![
            SimStar {
                ha: 1.034_5,
                dec: 45.5,
                error_rms: 12.3,
                error_angle: 90.0,
            },
            SimStar {
                ha: 13.237_5,
                dec: -5.258_3,
                error_rms: 4.5,
                error_angle: 270.0,
            },
            SimStar {
                ha: 20.5,
                dec: 60.25,
                error_rms: 7.8,
                error_angle: 15.0,
            },
        ];
        let mut stored_models = BTreeMap::new();
        stored_models.insert("BACKUP".to_string(), stars.clone());
        Self {
            latitude: 48.116_667,
            longitude: 11.583_333,
            elevation_m: 585.2,
            product_name: "10micron GM1000HPS".to_string(),
            hardware_version: "Q-TYPE2012".to_string(),
            firmware_number: "2.15.14".to_string(),
            firmware_date: "Mar 19 2018".to_string(),
            firmware_time: "15:56:53".to_string(),
            lst_hours: 18.753_417,
            julian_date: 2_458_352.104_036,
            ra_hours: 10.5,
            dec_deg: 45.2,
            az: 123.4,
            alt: 52.1,
            pierside: 'W',
            status: status::TRACKING,
            target_ra_hours: 10.5,
            slew_ticks: 20,
            slew_ticks_left: 0,
            slew_rate: 2,
            time_to_flip_min: 12.5,
            meridian_limit_track: 5,
            meridian_limit_slew: 3,
            temperature: 12.3,
            pressure: 1013.2,
            telescope_temperature: 11.8,
            refraction: true,
            unattended_flip: false,
            dual_axis_tracking: true,
            horizon_limit_high: 80,
            horizon_limit_low: 5,
            dut_valid: true,
            dut_expiration: "2026-12-31".to_string(),
            active_model: stars,
            stored_models,
            jitter: false,
        }
    }
}

fn flag(on: bool) -> &'static str {
    if on {
        "1"
    } else {
        "0"
    }
}

fn parse_flag(arg: &str) -> Option<bool> {
    match arg {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}

impl MountState {
    pub fn fw(&self) -> u32 {
        Firmware::pack(&self.firmware_number)
    }

    /// Start a slew to the current target
    pub fn begin_slew(&mut self) {
        self.slew_ticks_left = self.slew_ticks.max(1);
        self.status = status::SLEWING;
    }

    pub fn is_slewing(&self) -> bool {
        self.slew_ticks_left > 0
    }

    /// Advance time by one `Ginfo` poll
    fn tick(&mut self) {
        self.julian_date += 0.1 / 86_400.0;
        self.lst_hours = (self.lst_hours + 0.1 * 1.002_737_9 / 3600.0) % 24.0;
        if self.slew_ticks_left > 0 {
            self.slew_ticks_left -= 1;
            let step = (self.target_ra_hours - self.ra_hours) / (self.slew_ticks_left + 1) as f64;
            self.ra_hours += step;
            if self.slew_ticks_left == 0 {
                self.ra_hours = self.target_ra_hours;
                self.status = status::TRACKING;
            }
        }
    }

    fn ginfo(&mut self) -> String {
        self.tick();
        let (az, alt) = if self.jitter {
            let mut rng = rand::thread_rng();
            (
                self.az + rng.gen_range(-0.001..0.001),
                self.alt + rng.gen_range(-0.001..0.001),
            )
        } else {
            (self.az, self.alt)
        };
        format!(
            "{:.4},{:.4},{},{:.4},{:.4},{:.8},{},{}#",
            self.ra_hours,
            self.dec_deg,
            self.pierside,
            az,
            alt,
            self.julian_date,
            self.status,
            u8::from(self.is_slewing())
        )
    }

    fn star(&self, number: usize) -> String {
        match number.checked_sub(1).and_then(|i| self.active_model.get(i)) {
            Some(s) => format!(
                "{},{},{:06.1},{:03.0}#",
                format_hours(s.ha),
                format_degrees(s.dec),
                s.error_rms,
                s.error_angle
            ),
            None => "E#".to_string(),
        }
    }

    fn alignment_info(&self) -> String {
        if self.active_model.is_empty() {
            return "E,E,E,E,E,E,E,E,E#".to_string();
        }
        let rms = self.active_model.iter().map(|s| s.error_rms * s.error_rms).sum::<f64>()
            / self.active_model.len() as f64;
        format!(
            "86.1234,48.1100,0.0123,12.5,0.0031,0.42,-0.17,{},{:.1}#",
            self.active_model.len().min(17),
            rms.sqrt()
        )
    }

    fn model_name(&self, number: usize) -> String {
        match number.checked_sub(1).and_then(|i| self.stored_models.keys().nth(i)) {
            Some(name) => format!("{}#", name),
            None => "#".to_string(),
        }
    }

    /// Apply a setter, answering `1` on success and `0` on a bad argument
    fn set(&mut self, token: &str) -> &'static str {
        let ok = if let Some(arg) = token.strip_prefix("SRPRS") {
            arg.parse::<f64>().map(|v| self.pressure = v).is_ok()
        } else if let Some(arg) = token.strip_prefix("SRTMP") {
            arg.parse::<f64>().map(|v| self.temperature = v).is_ok()
        } else if let Some(arg) = token.strip_prefix("SREF") {
            parse_flag(arg).map(|v| self.refraction = v).is_some()
        } else if let Some(arg) = token.strip_prefix("Suaf") {
            parse_flag(arg).map(|v| self.unattended_flip = v).is_some()
        } else if let Some(arg) = token.strip_prefix("Sdat") {
            parse_flag(arg).map(|v| self.dual_axis_tracking = v).is_some()
        } else if let Some(arg) = token.strip_prefix("Slmt") {
            arg.parse::<u8>().map(|v| self.meridian_limit_track = v).is_ok()
        } else if let Some(arg) = token.strip_prefix("Slms") {
            arg.parse::<u8>().map(|v| self.meridian_limit_slew = v).is_ok()
        } else if let Some(arg) = token.strip_prefix("Sh") {
            arg.parse::<i8>().map(|v| self.horizon_limit_high = v).is_ok()
        } else if let Some(arg) = token.strip_prefix("So") {
            arg.parse::<i8>().map(|v| self.horizon_limit_low = v).is_ok()
        } else if let Some(arg) = token.strip_prefix("Sr") {
            parse_hours(arg).map(|v| self.target_ra_hours = v).is_ok()
        } else {
            true
        };
        flag(ok)
    }

    /// Answer one bare token, None when the command gets no reply
    pub fn answer(&mut self, token: &str) -> Option<String> {
        let reply = match token {
            "Gev" => format!("{:+07.1}#", self.elevation_m),
            "Gg" => format!("{}#", format_longitude(self.longitude)),
            "Gt" => format!("{}#", format_degrees(self.latitude)),
            "GVD" => format!("{}#", self.firmware_date),
            "GVN" => format!("{}#", self.firmware_number),
            "GVP" => format!("{}#", self.product_name),
            "GVT" => format!("{}#", self.firmware_time),
            "GVZ" => format!("{}#", self.hardware_version),
            "GS" => format!("{}#", format_hours(self.lst_hours)),
            "Ginfo" => self.ginfo(),
            "GMs" => format!("{}#", self.slew_rate),
            "Gmte" => format!("{:07.1}#", self.time_to_flip_min),
            "Glmt" => format!("{:02}#", self.meridian_limit_track),
            "Glms" => format!("{:02}#", self.meridian_limit_slew),
            "GRTMP" => format!("{:+07.1}#", self.temperature),
            "GRPRS" => format!("{:06.1}#", self.pressure),
            "GTMP1" => format!("{:+06.1}#", self.telescope_temperature),
            "GREF" => flag(self.refraction).to_string(),
            "Guaf" => flag(self.unattended_flip).to_string(),
            "Gdat" => flag(self.dual_axis_tracking).to_string(),
            "Gh" => format!("{:+03}*#", self.horizon_limit_high),
            "Go" => format!("{:+03}*#", self.horizon_limit_low),
            "GDUTV" => format!(
                "{},{}#",
                if self.dut_valid { "V" } else { "E" },
                self.dut_expiration
            ),
            "getain" => self.alignment_info(),
            "getalst" => format!("{}#", self.active_model.len()),
            "modelcnt" => format!("{}#", self.stored_models.len()),
            "delalig" => {
                self.active_model.clear();
                "1".to_string()
            }
            "AP" | "RT2" => {
                self.status = status::TRACKING;
                return None;
            }
            "hP" => {
                self.status = status::PARKED;
                return None;
            }
            "RT9" => {
                self.status = status::TRACKING_OFF;
                return None;
            }
            "STOP" => {
                self.slew_ticks_left = 0;
                self.status = status::STOPPED;
                return None;
            }
            "MS" => {
                self.begin_slew();
                "0".to_string()
            }
            "FLIP" => {
                self.pierside = if self.pierside == 'W' { 'E' } else { 'W' };
                "1".to_string()
            }
            t => return self.answer_parametric(t),
        };
        Some(reply)
    }

    fn answer_parametric(&mut self, token: &str) -> Option<String> {
        if let Some(n) = token.strip_prefix("getalp") {
            return Some(n.parse::<usize>().map_or_else(|_| "E#".to_string(), |n| self.star(n)));
        }
        if let Some(n) = token.strip_prefix("modelnam") {
            return Some(n.parse::<usize>().map_or_else(|_| "#".to_string(), |n| self.model_name(n)));
        }
        if let Some(name) = token.strip_prefix("modelsv0") {
            if name.is_empty() {
                return Some("0".to_string());
            }
            self.stored_models
                .insert(name.to_string(), self.active_model.clone());
            return Some("1".to_string());
        }
        if let Some(name) = token.strip_prefix("modelld0") {
            let found = self.stored_models.get(name).cloned();
            return Some(match found {
                Some(stars) => {
                    self.active_model = stars;
                    "1".to_string()
                }
                None => "0".to_string(),
            });
        }
        if let Some(name) = token.strip_prefix("modeldel0") {
            return Some(flag(self.stored_models.remove(name).is_some()).to_string());
        }
        match classify(token) {
            CommandCategory::NoReply => None,
            CommandCategory::Raw(_) => Some(self.set(token).to_string()),
            CommandCategory::Terminated => {
                debug!("unknown command {}", token);
                Some("E#".to_string())
            }
        }
    }

    /// Answer every command of a batch, concatenated
    pub fn answer_batch(&mut self, batch: &str) -> String {
        split_batch(batch)
            .filter_map(|token| self.answer(token))
            .collect()
    }
}
