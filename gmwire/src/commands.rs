//! Command tables for the 10micron protocol
//!
//! Every command is an ASCII token framed as `:token#`. Tokens fall into three
//! reply categories. The mount never frames a reply with a length, so the
//! reader has to know up front what to wait for.

use crate::error::{MountError, MountResult};

/// How the mount answers a single command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCategory {
    /// Nothing comes back
    NoReply,
    /// A fixed number of raw bytes without a terminator
    Raw(usize),
    /// A string ended by `#`
    Terminated,
}

impl CommandCategory {
    pub fn needs_response(&self) -> bool {
        !matches!(self, CommandCategory::NoReply)
    }
}

/// Commands the mount does not answer. Matched by prefix so that
/// `RT0`, `RT2`, `RT9` and the `Q` family all land here.
pub const NO_REPLY_PREFIXES: &[&str] = &[
    "AP", "hP", "STOP", "RT", "U2", "Me", "Mw", "Mn", "Ms", "Q", "TSOLAR", "TQ",
];

/// Commands answered by raw bytes, with the byte budget for each.
/// Longer prefixes precede shorter ones that share a stem (`CMS` before `CM`).
pub const RAW_REPLY_PREFIXES: &[(&str, usize)] = &[
    ("CMS", 1),
    ("CM", 27),
    ("MA", 1),
    ("MS", 1),
    ("FLIP", 1),
    ("shutdown", 1),
    // Setting flags answer one bare digit
    ("GREF", 1),
    ("Guaf", 1),
    ("Gdat", 1),
    ("Sdat", 1),
    ("Sh", 1),
    ("So", 1),
    ("Slmt", 1),
    ("Slms", 1),
    ("SREF", 1),
    ("SRPRS", 1),
    ("SRTMP", 1),
    ("Suaf", 1),
    ("Sa", 1),
    ("Sr", 1),
    ("St", 1),
    ("Sw", 1),
    ("Sz", 1),
    ("modelld0", 1),
    ("modelsv0", 1),
    ("modeldel0", 1),
    ("delalig", 1),
    ("delalst", 2),
];

/// Classify a bare token (no `:` prefix, no `#` suffix)
pub fn classify(token: &str) -> CommandCategory {
    if NO_REPLY_PREFIXES.iter().any(|p| token.starts_with(p)) {
        return CommandCategory::NoReply;
    }
    RAW_REPLY_PREFIXES
        .iter()
        .find(|(p, _)| token.starts_with(p))
        .map(|(_, n)| CommandCategory::Raw(*n))
        .unwrap_or(CommandCategory::Terminated)
}

/// Split a batch such as `:U2#:GS#:Ginfo#` into bare tokens
pub fn split_batch(batch: &str) -> impl Iterator<Item = &str> {
    batch
        .split('#')
        .map(|t| t.strip_prefix(':').unwrap_or(t))
        .filter(|t| !t.is_empty())
}

/// What a batch's reply will look like on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Expectation {
    /// Number of `#`-terminated chunks to wait for
    pub hash_chunks: usize,
    /// Upper bound of raw reply bytes from unterminated commands
    pub raw_bytes: usize,
    /// Whether anything comes back at all
    pub needs_response: bool,
}

impl Expectation {
    /// Smallest reply length that can satisfy the expectation
    pub fn min_len(&self) -> usize {
        self.hash_chunks + self.raw_bytes
    }
}

/// Classify every token in a batch and sum up the reply expectation
pub fn analyze(batch: &str) -> Expectation {
    split_batch(batch).fold(Expectation::default(), |mut exp, token| {
        match classify(token) {
            CommandCategory::NoReply => {}
            CommandCategory::Raw(n) => {
                exp.raw_bytes += n;
                exp.needs_response = true;
            }
            CommandCategory::Terminated => {
                exp.hash_chunks += 1;
                exp.needs_response = true;
            }
        }
        exp
    })
}

/// Poll batches, one per cadence
pub mod batches {
    pub const ONCE: &str = ":U2#:Gev#:Gg#:Gt#:GVD#:GVN#:GVP#:GVT#:GVZ#";
    pub const FAST: &str = ":U2#:GS#:Ginfo#";
    pub const MEDIUM: &str = ":GMs#:Gmte#:Glmt#:Glms#:GRTMP#:GRPRS#";
    pub const SLOW_BASE: &str = ":U2#:GTMP1#:GREF#:Guaf#:Gdat#:Gh#:Go#";
    pub const SLOW_DUT_TAIL: &str = ":GDUTV#";
    pub const ALIGNMENT_HEADER: &str = ":getain#:getalst#";
    pub const MODEL_COUNT: &str = ":modelcnt#";
}

/// Firmware from which the mount understands `GDUTV`
pub const FW_DUT_QUERY: u32 = 21500;

/// Slow batch for the given packed firmware number
pub fn slow_batch(fw: u32) -> String {
    let mut batch = batches::SLOW_BASE.to_string();
    if fw >= FW_DUT_QUERY {
        batch.push_str(batches::SLOW_DUT_TAIL);
    }
    batch
}

pub const UNPARK: &str = ":AP#";
pub const PARK: &str = ":hP#";
pub const STOP: &str = ":STOP#";
pub const TRACK_SIDEREAL: &str = ":RT2#";
pub const TRACK_OFF: &str = ":RT9#";
pub const FLIP: &str = ":FLIP#";
pub const CLEAR_ALIGNMENT: &str = ":delalig#";

pub fn set_pressure(hpa: f64) -> String {
    format!(":SRPRS{:04.1}#", hpa)
}

pub fn set_temperature(celsius: f64) -> String {
    format!(":SRTMP{:+.1}#", celsius)
}

pub fn set_refraction(on: bool) -> String {
    format!(":SREF{}#", u8::from(on))
}

pub fn set_unattended_flip(on: bool) -> String {
    format!(":Suaf{}#", u8::from(on))
}

pub fn set_dual_axis_tracking(on: bool) -> String {
    format!(":Sdat{}#", u8::from(on))
}

pub fn set_meridian_limit_track(degrees: u8) -> String {
    format!(":Slmt{:02}#", degrees)
}

pub fn set_meridian_limit_slew(degrees: u8) -> String {
    format!(":Slms{:02}#", degrees)
}

/// Upper horizon limit in whole degrees
pub fn set_horizon_limit_high(degrees: i8) -> String {
    format!(":Sh{:+03}#", degrees)
}

/// Lower horizon limit in whole degrees, may be negative
pub fn set_horizon_limit_low(degrees: i8) -> String {
    format!(":So{:+03}#", degrees)
}

/// Delete-then-save, so that saving over an existing name succeeds
pub fn model_save(name: &str) -> String {
    format!(":modeldel0{0}#:modelsv0{0}#", name)
}

pub fn model_load(name: &str) -> String {
    format!(":modelld0{}#", name)
}

pub fn model_delete(name: &str) -> String {
    format!(":modeldel0{}#", name)
}

/// One `modelnam` query per stored model, numbered from 1
pub fn model_names(count: usize) -> String {
    (1..=count).map(|i| format!(":modelnam{}#", i)).collect()
}

/// One `getalp` query per alignment star, numbered from 1
pub fn alignment_stars(count: usize) -> String {
    (1..=count).map(|i| format!(":getalp{}#", i)).collect()
}

/// Model names travel inside a command token, so framing characters are
/// not allowed
pub fn validate_model_name(name: &str) -> MountResult<()> {
    if name.is_empty() {
        return Err(MountError::InvalidArgument("empty model name".to_string()));
    }
    if name.len() > 15 {
        return Err(MountError::InvalidArgument(format!("model name too long: {}", name)));
    }
    if !name.chars().all(|c| c.is_ascii_graphic() && c != '#' && c != ':') {
        return Err(MountError::InvalidArgument(format!("invalid model name: {}", name)));
    }
    Ok(())
}
