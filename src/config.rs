use crate::core::hardware::{
    DEFAULT_LANE_PINS, DEFAULT_MESSAGE_LENGTH, DEFAULT_SNAP_PINS, PinLayout,
};
use crate::game::schedule::ScheduleParams;
use crate::game::time::Time;
use ini::Ini;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_PATH: &str = "etternuino.ini";

const HARDWARE: &str = "Hardware";
const PLAYBACK: &str = "Playback";
const LOGGING: &str = "Logging";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },
    #[error("could not write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    const fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "Off",
            Self::Error => "Error",
            Self::Warn => "Warn",
            Self::Info => "Info",
            Self::Debug => "Debug",
            Self::Trace => "Trace",
        }
    }

    pub const fn as_level_filter(self) -> log::LevelFilter {
        match self {
            Self::Off => log::LevelFilter::Off,
            Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Trace => log::LevelFilter::Trace,
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(Self::Off),
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Device file of the pin controller.
    pub device: PathBuf,
    pub hardware_enabled: bool,
    pub layout: PinLayout,
    pub blink: Time,
    pub microblink: Time,
    pub music_out: bool,
    pub claps: bool,
    pub sound_start: Time,
    pub poll_interval_ms: u64,
    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        let schedule = ScheduleParams::default();
        Self {
            device: PathBuf::from("/dev/ttyACM0"),
            hardware_enabled: true,
            layout: schedule.layout,
            blink: schedule.blink,
            microblink: schedule.microblink,
            music_out: true,
            claps: false,
            sound_start: Time::zero(),
            poll_interval_ms: 1,
            log_level: LogLevel::Warn,
        }
    }
}

impl Config {
    pub fn schedule_params(&self) -> ScheduleParams {
        ScheduleParams {
            blink: self.blink.clone(),
            microblink: self.microblink.clone(),
            layout: self.layout.clone(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// Global, mutable configuration instance.
static CONFIG: std::sync::LazyLock<Mutex<Config>> =
    std::sync::LazyLock::new(|| Mutex::new(Config::default()));

/* ------------------------------ Value parsing ------------------------------ */

fn parse_bool(v: &str) -> Option<bool> {
    let v = v.trim();
    if v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
    {
        Some(true)
    } else if v.eq_ignore_ascii_case("false")
        || v.eq_ignore_ascii_case("no")
        || v.eq_ignore_ascii_case("off")
    {
        Some(false)
    } else {
        v.parse::<u8>().ok().map(|n| n != 0)
    }
}

fn parse_pins(v: &str) -> Option<Vec<usize>> {
    v.split(',')
        .map(|p| p.trim().parse::<usize>().ok())
        .collect()
}

fn join_pins(pins: &[usize]) -> String {
    pins.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(",")
}

#[inline(always)]
const fn flag(v: bool) -> &'static str {
    if v { "1" } else { "0" }
}

fn value<'a>(conf: &'a Ini, section: &str, key: &str) -> Option<&'a str> {
    conf.get_from(Some(section), key).map(str::trim)
}

fn seconds(conf: &Ini, section: &str, key: &str, fallback: &Time) -> Time {
    value(conf, section, key)
        .and_then(|v| match Time::parse(v) {
            Ok(t) => Some(t),
            Err(e) => {
                warn!("Invalid {key} '{v}': {e}; using default.");
                None
            }
        })
        .unwrap_or_else(|| fallback.clone())
}

/// Populates a config from INI contents, keeping defaults for missing or
/// malformed keys.
fn parse_config(conf: &Ini) -> Config {
    let default = Config::default();

    let device = value(conf, HARDWARE, "Device")
        .filter(|v| !v.is_empty())
        .map_or(default.device.clone(), PathBuf::from);
    let hardware_enabled = value(conf, HARDWARE, "Enabled")
        .and_then(parse_bool)
        .unwrap_or(default.hardware_enabled);

    let message_length = value(conf, HARDWARE, "MessageLength")
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_MESSAGE_LENGTH);
    let lane_pins = value(conf, HARDWARE, "LanePins")
        .and_then(parse_pins)
        .unwrap_or_else(|| DEFAULT_LANE_PINS.to_vec());
    let snap_pins = value(conf, HARDWARE, "SnapPins")
        .and_then(parse_pins)
        .unwrap_or_else(|| DEFAULT_SNAP_PINS.to_vec());
    let layout = PinLayout::new(lane_pins, &snap_pins, message_length).unwrap_or_else(|e| {
        warn!("Invalid pin layout ({e}); using the default layout.");
        default.layout.clone()
    });

    let mut blink = seconds(conf, HARDWARE, "BlinkSeconds", &default.blink);
    if !blink.is_positive() {
        warn!("BlinkSeconds must be positive; using default.");
        blink = default.blink.clone();
    }
    let mut microblink = seconds(conf, HARDWARE, "MicroblinkSeconds", &default.microblink);
    if microblink.is_negative() || microblink >= blink {
        warn!("MicroblinkSeconds must be in [0, BlinkSeconds); using default.");
        microblink = default.microblink.clone();
        if microblink >= blink {
            microblink = Time::zero();
        }
    }

    Config {
        device,
        hardware_enabled,
        layout,
        blink,
        microblink,
        music_out: value(conf, PLAYBACK, "MusicOut")
            .and_then(parse_bool)
            .unwrap_or(default.music_out),
        claps: value(conf, PLAYBACK, "Claps")
            .and_then(parse_bool)
            .unwrap_or(default.claps),
        sound_start: seconds(conf, PLAYBACK, "SoundStartSeconds", &default.sound_start),
        poll_interval_ms: value(conf, PLAYBACK, "PollIntervalMs")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&ms| ms > 0)
            .unwrap_or(default.poll_interval_ms),
        log_level: value(conf, LOGGING, "LogLevel")
            .and_then(|v| LogLevel::from_str(v).ok())
            .unwrap_or(default.log_level),
    }
}

fn to_ini(config: &Config) -> Ini {
    let mut conf = Ini::new();
    let snap: Vec<usize> = config.layout.snap_pins().to_vec();
    let lanes: Vec<usize> = (0..config.layout.lane_count())
        .filter_map(|lane| config.layout.lane_pin(lane))
        .collect();
    conf.with_section(Some(HARDWARE))
        .set("BlinkSeconds", config.blink.to_decimal())
        .set("Device", config.device.display().to_string())
        .set("Enabled", flag(config.hardware_enabled))
        .set("LanePins", join_pins(&lanes))
        .set("MessageLength", config.layout.message_length().to_string())
        .set("MicroblinkSeconds", config.microblink.to_decimal())
        .set("SnapPins", join_pins(&snap));
    conf.with_section(Some(PLAYBACK))
        .set("Claps", flag(config.claps))
        .set("MusicOut", flag(config.music_out))
        .set("PollIntervalMs", config.poll_interval_ms.to_string())
        .set("SoundStartSeconds", config.sound_start.to_decimal());
    conf.with_section(Some(LOGGING))
        .set("LogLevel", config.log_level.as_str());
    conf
}

/* -------------------------------- File I/O -------------------------------- */

fn create_default_config_file(path: &Path) -> Result<(), ConfigError> {
    info!("'{}' not found, creating with default values.", path.display());
    to_ini(&Config::default())
        .write_to_file(path)
        .map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
}

/// Reads `path`, writing a default file first when it does not exist.
pub fn read_or_create(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists()
        && let Err(e) = create_default_config_file(path)
    {
        warn!("Failed to create default config file: {e}");
        return Ok(Config::default());
    }
    let conf = Ini::load_from_file(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_config(&conf))
}

pub fn load() {
    load_from(Path::new(CONFIG_PATH));
}

/// Loads `path` into the global config. Problems are logged and leave the
/// defaults in place.
pub fn load_from(path: &Path) {
    match read_or_create(path) {
        Ok(config) => {
            *CONFIG.lock().unwrap() = config;
            info!("Configuration loaded from '{}'.", path.display());
        }
        Err(e) => warn!("{e}; using default configuration."),
    }
}

pub fn get() -> Config {
    CONFIG.lock().unwrap().clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::snap::SnapPin;

    fn parse(text: &str) -> Config {
        parse_config(&Ini::load_from_str(text).unwrap())
    }

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(parse(""), Config::default());
    }

    #[test]
    fn reads_every_section() {
        let config = parse(
            "[Hardware]\n\
             Device=/dev/ttyUSB1\n\
             Enabled=0\n\
             MessageLength=16\n\
             LanePins=10, 11, 12, 13, 14, 15\n\
             SnapPins=0,1,2,3,4,5\n\
             BlinkSeconds=0.1\n\
             MicroblinkSeconds=0.005\n\
             [Playback]\n\
             MusicOut=no\n\
             Claps=yes\n\
             SoundStartSeconds=-1.5\n\
             PollIntervalMs=4\n\
             [Logging]\n\
             LogLevel=debug\n",
        );
        assert_eq!(config.device, PathBuf::from("/dev/ttyUSB1"));
        assert!(!config.hardware_enabled);
        assert_eq!(config.layout.message_length(), 16);
        assert_eq!(config.layout.lane_count(), 6);
        assert_eq!(config.layout.lane_pin(5), Some(15));
        assert_eq!(config.layout.snap_pin(SnapPin::T192), 5);
        assert_eq!(config.blink, Time::from_ratio(1, 10));
        assert_eq!(config.microblink, Time::from_ratio(5, 1000));
        assert!(!config.music_out);
        assert!(config.claps);
        assert_eq!(config.sound_start, Time::from_ratio(-3, 2));
        assert_eq!(config.poll_interval(), Duration::from_millis(4));
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.log_level.as_level_filter(), log::LevelFilter::Debug);
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = parse(
            "[Hardware]\n\
             LanePins=0,1,2,20\n\
             BlinkSeconds=-0.06\n\
             MicroblinkSeconds=abc\n\
             [Playback]\n\
             PollIntervalMs=0\n\
             [Logging]\n\
             LogLevel=verbose\n",
        );
        let default = Config::default();
        assert_eq!(config.layout, default.layout);
        assert_eq!(config.blink, default.blink);
        assert_eq!(config.microblink, default.microblink);
        assert_eq!(config.poll_interval_ms, 1);
        assert_eq!(config.log_level, LogLevel::Warn);
    }

    #[test]
    fn microblink_must_be_shorter_than_blink() {
        let config = parse("[Hardware]\nBlinkSeconds=0.005\nMicroblinkSeconds=0.01\n");
        assert_eq!(config.blink, Time::from_ratio(5, 1000));
        assert_eq!(config.microblink, Time::zero());

        let config = parse("[Hardware]\nBlinkSeconds=0.03\nMicroblinkSeconds=0.05\n");
        assert_eq!(config.microblink, Time::from_ratio(1, 100));
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_PATH);
        let config = read_or_create(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());

        let written = Ini::load_from_file(&path).unwrap();
        assert_eq!(written.get_from(Some(HARDWARE), "SnapPins"), Some("4,5,6,7,8,9"));
        assert_eq!(written.get_from(Some(LOGGING), "LogLevel"), Some("Warn"));
        assert_eq!(read_or_create(&path).unwrap(), config);
    }

    #[test]
    fn seconds_are_written_back_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exact.ini");
        let config = Config {
            blink: Time::parse("0.0000001").unwrap(),
            microblink: Time::zero(),
            sound_start: Time::parse("-123.456789012").unwrap(),
            ..Config::default()
        };
        to_ini(&config).write_to_file(&path).unwrap();

        let written = Ini::load_from_file(&path).unwrap();
        assert_eq!(written.get_from(Some(HARDWARE), "BlinkSeconds"), Some("0.0000001"));
        assert_eq!(
            written.get_from(Some(PLAYBACK), "SoundStartSeconds"),
            Some("-123.456789012")
        );
        assert_eq!(read_or_create(&path).unwrap(), config);
    }

    #[test]
    fn edited_file_is_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.ini");
        std::fs::write(&path, "[Playback]\nClaps=1\nSoundStartSeconds=2\n").unwrap();
        let config = read_or_create(&path).unwrap();
        assert!(config.claps);
        assert_eq!(config.sound_start, Time::from_seconds(2));
        assert!(config.music_out);
    }
}
