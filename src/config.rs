//! # Configuration Module
//!
//! Handles loading and validating station configuration from TOML files.
//!
//! Every section and every field has a default, so an empty file is a
//! valid configuration for a stock REVS2 station.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, StationError};
use crate::storage::BlockKind;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub station: StationConfig,
    pub rain: RainConfig,
    pub seismic: SeismicConfig,
    pub gps: GpsConfig,
    pub lora: LoraConfig,
    pub serial: SerialConfig,
    pub storage: StorageConfig,
    pub battery: BatteryConfig,
    pub logging: LoggingConfig,
}

/// Station identity, stamped into every block file
#[derive(Debug, Deserialize, Clone)]
pub struct StationConfig {
    #[serde(default = "default_station_name")]
    pub name: String,

    #[serde(default = "default_identifier")]
    pub identifier: i64,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_serial_number")]
    pub serial_number: String,

    /// Sub-interval width; one reading per interval is kept
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u32,
}

/// Tipping-bucket rain gauge
#[derive(Debug, Deserialize, Clone)]
pub struct RainConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_rain_type_code")]
    pub type_code: String,

    #[serde(default = "default_mm_per_tip")]
    pub mm_per_tip: f64,

    /// BCM pin of the gauge's reed switch
    #[serde(default = "default_rain_pin")]
    pub gpio_pin: u8,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_block")]
    pub block: BlockKind,

    #[serde(default = "default_cadence_secs")]
    pub cadence_secs: u64,
}

/// Seismic detector on a serial port
#[derive(Debug, Deserialize, Clone)]
pub struct SeismicConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_seismic_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_seismic_type_code")]
    pub type_code: String,

    #[serde(default = "default_block")]
    pub block: BlockKind,

    #[serde(default = "default_cadence_secs")]
    pub cadence_secs: u64,
}

/// GPS receiver (NMEA over serial)
#[derive(Debug, Deserialize, Clone)]
pub struct GpsConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_gps_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_min_satellites")]
    pub min_satellites: u32,

    #[serde(default = "default_fix_timeout_secs")]
    pub fix_timeout_secs: u64,

    /// Also keep a GPS block stream (satellites and fix quality)
    #[serde(default)]
    pub store_readings: bool,

    #[serde(default = "default_gps_type_code")]
    pub type_code: String,

    #[serde(default = "default_cadence_secs")]
    pub cadence_secs: u64,
}

/// LoRa radio in transparent mode, used as a status uplink
#[derive(Debug, Deserialize, Clone)]
pub struct LoraConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_lora_port")]
    pub port: String,

    #[serde(default = "default_lora_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_lora_interval_secs")]
    pub interval_secs: u64,
}

/// Reconnect policy shared by every serial link
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_max_open_failures")]
    pub max_open_failures: u32,

    #[serde(default = "default_open_cooldown_secs")]
    pub open_cooldown_secs: u64,

    #[serde(default = "default_read_delay_ms")]
    pub read_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_disconnect_verifications")]
    pub disconnect_verifications: u32,

    #[serde(default = "default_background_check_secs")]
    pub background_check_secs: u64,

    #[serde(default = "default_quick_retry_delay_ms")]
    pub quick_retry_delay_ms: u64,

    #[serde(default)]
    pub log_immediate_retry_info: bool,

    #[serde(default = "default_enabled")]
    pub log_background_errors: bool,

    #[serde(default = "default_enabled")]
    pub log_cooldown: bool,
}

/// Output roots and removable media detection
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_internal_root")]
    pub internal_root: PathBuf,

    #[serde(default = "default_media_base")]
    pub media_base: PathBuf,

    #[serde(default = "default_data_dir_name")]
    pub data_dir_name: String,

    #[serde(default = "default_min_free_mb")]
    pub min_free_mb: u64,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_miss_threshold")]
    pub miss_threshold: u32,
}

/// Battery ADC channel and calibration (`volts = slope * raw + offset`)
#[derive(Debug, Deserialize, Clone)]
pub struct BatteryConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_adc_path")]
    pub adc_path: PathBuf,

    #[serde(default = "default_adc_scale")]
    pub adc_scale: f64,

    #[serde(default = "default_slope")]
    pub slope: f64,

    #[serde(default = "default_offset")]
    pub offset: f64,

    #[serde(default = "default_low_voltage")]
    pub low_voltage: f64,

    #[serde(default = "default_critical_voltage")]
    pub critical_voltage: f64,

    /// Also keep a battery block stream (voltage and status)
    #[serde(default)]
    pub store_readings: bool,

    #[serde(default = "default_battery_type_code")]
    pub type_code: String,

    #[serde(default = "default_cadence_secs")]
    pub cadence_secs: u64,

    /// Consecutive critical checks before a safe shutdown; 0 disables the guard
    #[serde(default = "default_shutdown_cycles")]
    pub shutdown_cycles: u32,

    #[serde(default = "default_guard_interval_secs")]
    pub guard_interval_secs: u64,

    /// Run after the station has flushed its blocks; empty only stops the station
    #[serde(default = "default_shutdown_command")]
    pub shutdown_command: Vec<String>,
}

/// Log output
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_enabled() -> bool { true }
fn default_baud_rate() -> u32 { 9600 }
fn default_timeout_ms() -> u64 { 1000 }
fn default_block() -> BlockKind { BlockKind::Hour }
fn default_cadence_secs() -> u64 { 60 }

fn default_station_name() -> String { "REVS2".to_string() }
fn default_identifier() -> i64 { 1 }
fn default_model() -> String { "rpi-5".to_string() }
fn default_serial_number() -> String { "4512".to_string() }
fn default_interval_minutes() -> u32 { 1 }

fn default_rain_type_code() -> String { "RGA".to_string() }
fn default_mm_per_tip() -> f64 { crate::sensors::rain::DEFAULT_MM_PER_TIP }
fn default_rain_pin() -> u8 { 17 }
fn default_debounce_ms() -> u64 { 300 }

fn default_seismic_port() -> String { "/dev/ttyAMA0".to_string() }
fn default_seismic_type_code() -> String { "SIS".to_string() }

fn default_gps_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_min_satellites() -> u32 { 5 }
fn default_fix_timeout_secs() -> u64 { 3 }
fn default_gps_type_code() -> String { "GPS".to_string() }

fn default_lora_port() -> String { "/dev/ttyUSB1".to_string() }
fn default_lora_baud_rate() -> u32 { 115200 }
fn default_lora_interval_secs() -> u64 { 60 }

fn default_max_open_failures() -> u32 { 5 }
fn default_open_cooldown_secs() -> u64 { 30 }
fn default_read_delay_ms() -> u64 { 200 }
fn default_backoff_factor() -> f64 { 2.0 }
fn default_max_backoff_ms() -> u64 { 2000 }
fn default_disconnect_verifications() -> u32 { 3 }
fn default_background_check_secs() -> u64 { 10 }
fn default_quick_retry_delay_ms() -> u64 { 1000 }

fn default_internal_root() -> PathBuf { PathBuf::from("./DTA") }
fn default_media_base() -> PathBuf { PathBuf::from("/media/pi") }
fn default_data_dir_name() -> String { "DTA".to_string() }
fn default_min_free_mb() -> u64 { 50 }
fn default_poll_interval_secs() -> u64 { 2 }
fn default_miss_threshold() -> u32 { 3 }

fn default_adc_path() -> PathBuf { PathBuf::from("/sys/bus/iio/devices/iio:device0/in_voltage0_raw") }
fn default_adc_scale() -> f64 { 0.001 }
fn default_slope() -> f64 { 1.0222 }
fn default_offset() -> f64 { 0.0146 }
fn default_low_voltage() -> f64 { crate::sensors::battery::DEFAULT_LOW_VOLTAGE }
fn default_critical_voltage() -> f64 { crate::sensors::battery::DEFAULT_CRITICAL_VOLTAGE }

fn default_battery_type_code() -> String { "BAT".to_string() }
fn default_shutdown_cycles() -> u32 { 3 }
fn default_guard_interval_secs() -> u64 { 60 }
fn default_shutdown_command() -> Vec<String> {
    ["sudo", "shutdown", "-h", "now"].iter().map(|s| s.to_string()).collect()
}

fn default_log_dir() -> PathBuf { PathBuf::from("./logs") }
fn default_log_level() -> String { "info".to_string() }

// A section omitted from the file behaves like an empty one.
impl Default for StationConfig {
    fn default() -> Self {
        Self {
            name: default_station_name(),
            identifier: default_identifier(),
            model: default_model(),
            serial_number: default_serial_number(),
            interval_minutes: default_interval_minutes(),
        }
    }
}

impl Default for RainConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            type_code: default_rain_type_code(),
            mm_per_tip: default_mm_per_tip(),
            gpio_pin: default_rain_pin(),
            debounce_ms: default_debounce_ms(),
            block: default_block(),
            cadence_secs: default_cadence_secs(),
        }
    }
}

impl Default for SeismicConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            port: default_seismic_port(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            type_code: default_seismic_type_code(),
            block: default_block(),
            cadence_secs: default_cadence_secs(),
        }
    }
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            port: default_gps_port(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            min_satellites: default_min_satellites(),
            fix_timeout_secs: default_fix_timeout_secs(),
            store_readings: false,
            type_code: default_gps_type_code(),
            cadence_secs: default_cadence_secs(),
        }
    }
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_lora_port(),
            baud_rate: default_lora_baud_rate(),
            timeout_ms: default_timeout_ms(),
            interval_secs: default_lora_interval_secs(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            max_open_failures: default_max_open_failures(),
            open_cooldown_secs: default_open_cooldown_secs(),
            read_delay_ms: default_read_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_backoff_ms: default_max_backoff_ms(),
            disconnect_verifications: default_disconnect_verifications(),
            background_check_secs: default_background_check_secs(),
            quick_retry_delay_ms: default_quick_retry_delay_ms(),
            log_immediate_retry_info: false,
            log_background_errors: default_enabled(),
            log_cooldown: default_enabled(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            internal_root: default_internal_root(),
            media_base: default_media_base(),
            data_dir_name: default_data_dir_name(),
            min_free_mb: default_min_free_mb(),
            poll_interval_secs: default_poll_interval_secs(),
            miss_threshold: default_miss_threshold(),
        }
    }
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            adc_path: default_adc_path(),
            adc_scale: default_adc_scale(),
            slope: default_slope(),
            offset: default_offset(),
            low_voltage: default_low_voltage(),
            critical_voltage: default_critical_voltage(),
            store_readings: false,
            type_code: default_battery_type_code(),
            cadence_secs: default_cadence_secs(),
            shutdown_cycles: default_shutdown_cycles(),
            guard_interval_secs: default_guard_interval_secs(),
            shutdown_command: default_shutdown_command(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            level: default_log_level(),
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> StationError {
    StationError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use field_station::config::Config;
    ///
    /// let config = Config::load("config/station.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Identity goes into file names
        for (name, value) in [
            ("station.name", &self.station.name),
            ("station.model", &self.station.model),
            ("station.serial_number", &self.station.serial_number),
            ("rain.type_code", &self.rain.type_code),
            ("seismic.type_code", &self.seismic.type_code),
            ("gps.type_code", &self.gps.type_code),
            ("battery.type_code", &self.battery.type_code),
        ] {
            if value.is_empty() {
                return Err(invalid(format!("{} cannot be empty", name)));
            }
            if value.contains(['/', '\\', '.', '_']) {
                return Err(invalid(format!("{} cannot contain path separators, '.' or '_'", name)));
            }
        }

        if self.station.interval_minutes == 0 || self.station.interval_minutes > 60 {
            return Err(invalid("interval_minutes must be between 1 and 60"));
        }

        if !(self.rain.mm_per_tip > 0.0 && self.rain.mm_per_tip.is_finite()) {
            return Err(invalid("mm_per_tip must be greater than 0"));
        }

        if self.rain.gpio_pin > 27 {
            return Err(invalid("rain.gpio_pin must be a header BCM pin (0-27)"));
        }

        if self.rain.debounce_ms > 5000 {
            return Err(invalid("rain.debounce_ms cannot exceed 5000"));
        }

        for (name, cadence) in [
            ("rain.cadence_secs", self.rain.cadence_secs),
            ("seismic.cadence_secs", self.seismic.cadence_secs),
            ("gps.cadence_secs", self.gps.cadence_secs),
            ("battery.cadence_secs", self.battery.cadence_secs),
            ("battery.guard_interval_secs", self.battery.guard_interval_secs),
            ("lora.interval_secs", self.lora.interval_secs),
        ] {
            if cadence == 0 || cadence > 3600 {
                return Err(invalid(format!("{} must be between 1 and 3600", name)));
            }
        }

        // Serial ports
        for (name, enabled, port, timeout_ms) in [
            ("seismic", self.seismic.enabled, &self.seismic.port, self.seismic.timeout_ms),
            ("gps", self.gps.enabled, &self.gps.port, self.gps.timeout_ms),
            ("lora", self.lora.enabled, &self.lora.port, self.lora.timeout_ms),
        ] {
            if enabled && port.is_empty() {
                return Err(invalid(format!("{} port cannot be empty when enabled", name)));
            }
            if timeout_ms == 0 || timeout_ms > 10000 {
                return Err(invalid(format!("{}.timeout_ms must be between 1 and 10000", name)));
            }
        }

        if self.gps.enabled && self.seismic.enabled && self.gps.port == self.seismic.port {
            return Err(invalid("gps and seismic cannot share a serial port"));
        }

        // Reconnect policy
        if self.serial.max_open_failures == 0 {
            return Err(invalid("max_open_failures must be greater than 0"));
        }

        if self.serial.disconnect_verifications == 0 {
            return Err(invalid("disconnect_verifications must be greater than 0"));
        }

        if !(self.serial.backoff_factor >= 1.0 && self.serial.backoff_factor <= 100.0) {
            return Err(invalid("backoff_factor must be between 1.0 and 100.0"));
        }

        if self.serial.read_delay_ms > self.serial.max_backoff_ms {
            return Err(invalid("read_delay_ms cannot exceed max_backoff_ms"));
        }

        if self.serial.background_check_secs == 0 {
            return Err(invalid("background_check_secs must be greater than 0"));
        }

        // Storage
        if self.storage.data_dir_name.is_empty() || self.storage.data_dir_name.contains('/') {
            return Err(invalid("data_dir_name must be a single directory name"));
        }

        if self.storage.poll_interval_secs == 0 || self.storage.poll_interval_secs > 600 {
            return Err(invalid("poll_interval_secs must be between 1 and 600"));
        }

        if self.storage.miss_threshold == 0 {
            return Err(invalid("miss_threshold must be greater than 0"));
        }

        // Battery thresholds
        if self.battery.critical_voltage >= self.battery.low_voltage {
            return Err(invalid("critical_voltage must be below low_voltage"));
        }

        if self.battery.adc_scale <= 0.0 {
            return Err(invalid("adc_scale must be greater than 0"));
        }

        if self.battery.shutdown_command.first().is_some_and(|program| program.is_empty()) {
            return Err(invalid("shutdown_command program cannot be empty"));
        }

        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(invalid(format!(
                "log level '{}' must be one of: trace, debug, info, warn, error",
                self.logging.level
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_valid_config() -> Config {
        Config::default()
    }

    #[test]
    fn test_default_config() {
        assert!(create_valid_config().validate().is_ok());
    }

    #[test]
    fn test_empty_file_takes_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.station.name, "REVS2");
        assert_eq!(config.rain.type_code, "RGA");
        assert_eq!(config.seismic.type_code, "SIS");
        assert_eq!(config.rain.block, BlockKind::Hour);
        assert_eq!(config.storage.data_dir_name, "DTA");
        assert!(!config.lora.enabled);
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[station]
name = "REVS3"
interval_minutes = 5

[seismic]
port = "/dev/ttyS0"
block = "day"

[gps]
min_satellites = 4

[storage]
internal_root = "/var/lib/station/DTA"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.station.name, "REVS3");
        assert_eq!(config.station.identifier, 1);
        assert_eq!(config.station.interval_minutes, 5);
        assert_eq!(config.seismic.block, BlockKind::Day);
        assert_eq!(config.gps.min_satellites, 4);
        assert_eq!(config.storage.internal_root, PathBuf::from("/var/lib/station/DTA"));
        assert_eq!(config.serial.max_open_failures, 5);
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let config = Config::from_toml(include_str!("../config/station.toml")).unwrap();
        assert_eq!(config.station.name, default_station_name());
        assert_eq!(config.serial.quick_retry_delay_ms, default_quick_retry_delay_ms());
    }

    #[test]
    fn test_unknown_block_kind() {
        let result = Config::from_toml("[rain]\nblock = \"week\"\n");
        assert!(matches!(result, Err(StationError::Config(_))));
    }

    #[test]
    fn test_empty_station_name() {
        let mut config = create_valid_config();
        config.station.name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_type_code_with_separator() {
        let mut config = create_valid_config();
        config.rain.type_code = "R_GA".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_interval_minutes_zero() {
        let mut config = create_valid_config();
        config.station.interval_minutes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_interval_minutes_too_high() {
        let mut config = create_valid_config();
        config.station.interval_minutes = 61;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mm_per_tip_zero() {
        let mut config = create_valid_config();
        config.rain.mm_per_tip = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cadence_zero() {
        let mut config = create_valid_config();
        config.seismic.cadence_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_port_when_enabled() {
        let mut config = create_valid_config();
        config.gps.port = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_port_when_disabled() {
        let mut config = create_valid_config();
        config.gps.enabled = false;
        config.gps.port = String::new();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_shared_port() {
        let mut config = create_valid_config();
        config.seismic.port = config.gps.port.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_ms_too_high() {
        let mut config = create_valid_config();
        config.seismic.timeout_ms = 10001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_factor_below_one() {
        let mut config = create_valid_config();
        config.serial.backoff_factor = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_factor_huge() {
        let mut config = create_valid_config();
        config.serial.backoff_factor = 1e20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rain_pin_outside_header() {
        let mut config = create_valid_config();
        config.rain.gpio_pin = 40;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_guard_settings() {
        let config = Config::from_toml(
            "[battery]\nshutdown_cycles = 5\nshutdown_command = [\"/sbin/poweroff\"]\n",
        )
        .unwrap();
        assert_eq!(config.battery.shutdown_cycles, 5);
        assert_eq!(config.battery.shutdown_command, vec!["/sbin/poweroff".to_string()]);

        let mut config = create_valid_config();
        config.battery.shutdown_command = vec![String::new()];
        assert!(config.validate().is_err());
        config.battery.shutdown_command.clear();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_read_delay_above_max_backoff() {
        let mut config = create_valid_config();
        config.serial.read_delay_ms = 3000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_verifications() {
        let mut config = create_valid_config();
        config.serial.disconnect_verifications = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_miss_threshold_zero() {
        let mut config = create_valid_config();
        config.storage.miss_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_nested_data_dir_name() {
        let mut config = create_valid_config();
        config.storage.data_dir_name = "a/b".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_battery_thresholds_inverted() {
        let mut config = create_valid_config();
        config.battery.critical_voltage = 10.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = create_valid_config();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_station_name(), "REVS2");
        assert_eq!(default_identifier(), 1);
        assert_eq!(default_model(), "rpi-5");
        assert_eq!(default_serial_number(), "4512");
        assert_eq!(default_mm_per_tip(), 0.25);
        assert_eq!(default_baud_rate(), 9600);
        assert_eq!(default_min_satellites(), 5);
        assert_eq!(default_max_open_failures(), 5);
        assert_eq!(default_open_cooldown_secs(), 30);
        assert_eq!(default_read_delay_ms(), 200);
        assert_eq!(default_backoff_factor(), 2.0);
        assert_eq!(default_max_backoff_ms(), 2000);
        assert_eq!(default_disconnect_verifications(), 3);
        assert_eq!(default_background_check_secs(), 10);
        assert_eq!(default_media_base(), PathBuf::from("/media/pi"));
        assert_eq!(default_miss_threshold(), 3);
        assert_eq!(default_slope(), 1.0222);
        assert_eq!(default_offset(), 0.0146);
        assert_eq!(default_log_dir(), PathBuf::from("./logs"));
        assert_eq!(default_rain_pin(), 17);
        assert_eq!(default_debounce_ms(), 300);
        assert_eq!(default_shutdown_cycles(), 3);
        assert_eq!(default_shutdown_command(), vec!["sudo", "shutdown", "-h", "now"]);
    }
}
