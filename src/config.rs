use clap::{ArgAction, Parser, ValueHint};
use dirs_next::home_dir;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::{Path, PathBuf}};
use thiserror::Error;

use crate::server::DEFAULT_PORT;

/// Error type for config loading/validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Top-level app configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub log_level: Option<String>, // e.g., "info" | "debug"
    /// ADC wiring
    pub sensor: Option<SensorConfig>,
    /// LED strip wiring
    pub led: Option<LedConfig>,
    /// aggregation service behavior
    pub service: Option<ServiceConfig>,
    /// measurement database (required)
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SensorConfig {
    pub i2c_bus: Option<u8>,   // e.g. 1 for /dev/i2c-1
    pub address: Option<u16>,  // 7-bit, default 0x48
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LedConfig {
    pub spi_bus: Option<u8>,   // e.g. 0 for /dev/spidev0.0
    pub clock_hz: Option<u32>, // symbol rate, default 2.4 MHz
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServiceConfig {
    pub device_id: Option<String>,
    pub port: Option<u16>,
    pub window_secs: Option<u64>,
    pub debounce_secs: Option<u64>,
    pub no_splash: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
}

/// CLI overrides. All fields are Options so we can layer them over YAML.
#[derive(Debug, Parser, Clone)]
#[command(name = "noisled", about = "NoisLED sound level monitor", disable_help_flag = false)]
pub struct Cli {
    /// Path to a YAML config file (overrides search)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,
    #[arg(long)]
    pub device_id: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub window_secs: Option<u64>,
    #[arg(long)]
    pub debounce_secs: Option<u64>,
    #[arg(long)]
    pub i2c_bus: Option<u8>,
    #[arg(long)]
    pub spi_bus: Option<u8>,
    /// skip the startup LED pattern test
    #[arg(long, action = ArgAction::SetTrue)]
    pub no_splash: bool,
    /// shorthand for --log-level debug
    #[arg(long, action = ArgAction::SetTrue)]
    pub debug: bool,
    /// dump fully merged config (after overrides) and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub dump_config: bool,
}

/// Public entry point: parse CLI, read YAML, merge, validate.
pub fn load() -> Result<Config, ConfigError> {
    let cli = Cli::parse();
    let cfg = build(cli.clone())?;

    if cli.dump_config {
        // Pretty YAML of effective config (nice for debugging)
        let s = serde_yaml::to_string(&cfg)?;
        println!("{s}");
        std::process::exit(0);
    }

    Ok(cfg)
}

fn build(cli: Cli) -> Result<Config, ConfigError> {
    // 1) defaults (from `Default` impl)
    let mut cfg = Config::default();

    // 2) YAML file (explicit path or search)
    if let Some(p) = cli.config.as_ref() {
        if p.exists() {
            let y = read_yaml(p)?;
            merge(&mut cfg, y);
        } else {
            return Err(ConfigError::Validation(format!(
                "Config file not found: {}",
                p.display()
            )));
        }
    } else if let Some(p) = find_config_file() {
        let y = read_yaml(&p)?;
        merge(&mut cfg, y);
    }

    // 3) CLI overrides (highest precedence)
    apply_cli_overrides(&mut cfg, &cli);

    // 4) Validate
    validate(&cfg)?;

    Ok(cfg)
}

/// Try common locations in order (first hit wins).
fn find_config_file() -> Option<PathBuf> {
    // XDG-style: ~/.config/noisled/config.yaml
    if let Some(home) = home_dir() {
        let p = home.join(".config/noisled/config.yaml");
        if p.exists() { return Some(p) }
        let p = home.join(".config/noisled.yaml");
        if p.exists() { return Some(p) }
    }
    // project local
    for candidate in &["noisled.yaml", "config.yaml", "config/noisled.yaml"] {
        let p = PathBuf::from(candidate);
        if p.exists() { return Some(p) }
    }
    None
}

fn read_yaml(path: &Path) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&s)?;
    Ok(cfg)
}

/// Shallow merge `src` into `dst`, Option-by-Option.
fn merge(dst: &mut Config, src: Config) {
    if src.log_level.is_some() { dst.log_level = src.log_level; }
    match (&mut dst.sensor, src.sensor) {
        (None, Some(c)) => dst.sensor = Some(c),
        (Some(d), Some(s)) => {
            if s.i2c_bus.is_some() { d.i2c_bus = s.i2c_bus; }
            if s.address.is_some() { d.address = s.address; }
        }
        _ => {}
    }
    match (&mut dst.led, src.led) {
        (None, Some(c)) => dst.led = Some(c),
        (Some(d), Some(s)) => {
            if s.spi_bus.is_some()  { d.spi_bus = s.spi_bus; }
            if s.clock_hz.is_some() { d.clock_hz = s.clock_hz; }
        }
        _ => {}
    }
    match (&mut dst.service, src.service) {
        (None, Some(c)) => dst.service = Some(c),
        (Some(d), Some(s)) => {
            if s.device_id.is_some()     { d.device_id = s.device_id; }
            if s.port.is_some()          { d.port = s.port; }
            if s.window_secs.is_some()   { d.window_secs = s.window_secs; }
            if s.debounce_secs.is_some() { d.debounce_secs = s.debounce_secs; }
            if s.no_splash.is_some()     { d.no_splash = s.no_splash; }
        }
        _ => {}
    }
    match (&mut dst.database, src.database) {
        (None, Some(c)) => dst.database = Some(c),
        (Some(d), Some(s)) => {
            if s.host.is_some()     { d.host = s.host; }
            if s.port.is_some()     { d.port = s.port; }
            if s.user.is_some()     { d.user = s.user; }
            if s.password.is_some() { d.password = s.password; }
            if s.name.is_some()     { d.name = s.name; }
        }
        _ => {}
    }
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) {
    if cli.log_level.is_some() { cfg.log_level = cli.log_level.clone(); }
    if cli.debug               { cfg.log_level = Some("debug".to_string()); }

    let any_service = cli.device_id.is_some()
        || cli.port.is_some()
        || cli.window_secs.is_some()
        || cli.debounce_secs.is_some()
        || cli.no_splash;
    if any_service && cfg.service.is_none() {
        cfg.service = Some(ServiceConfig::default());
    }
    if let Some(service) = cfg.service.as_mut() {
        if cli.device_id.is_some()     { service.device_id = cli.device_id.clone(); }
        if cli.port.is_some()          { service.port = cli.port; }
        if cli.window_secs.is_some()   { service.window_secs = cli.window_secs; }
        if cli.debounce_secs.is_some() { service.debounce_secs = cli.debounce_secs; }
        if cli.no_splash               { service.no_splash = Some(true); }
    }

    if cli.i2c_bus.is_some() && cfg.sensor.is_none() {
        cfg.sensor = Some(SensorConfig::default());
    }
    if let Some(sensor) = cfg.sensor.as_mut() {
        if cli.i2c_bus.is_some() { sensor.i2c_bus = cli.i2c_bus; }
    }

    if cli.spi_bus.is_some() && cfg.led.is_none() {
        cfg.led = Some(LedConfig::default());
    }
    if let Some(led) = cfg.led.as_mut() {
        if cli.spi_bus.is_some() { led.spi_bus = cli.spi_bus; }
    }
}

/// Put any invariants here (required fields, ranges, etc.)
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.database.is_none() {
        return Err(ConfigError::Validation(
            "a [database] section is required (measurements must land somewhere)".into(),
        ));
    }
    if let Some(service) = cfg.service.as_ref() {
        if service.port == Some(0) {
            return Err(ConfigError::Validation("service port must be > 0".into()));
        }
        if service.window_secs == Some(0) {
            return Err(ConfigError::Validation("window_secs must be > 0".into()));
        }
    }
    if let Some(sensor) = cfg.sensor.as_ref() {
        if let Some(addr) = sensor.address {
            if addr > 0x7F {
                return Err(ConfigError::Validation("sensor address must be 7-bit".into()));
            }
        }
    }
    Ok(())
}

impl Config {
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn device_id(&self) -> String {
        self.service
            .as_ref()
            .and_then(|s| s.device_id.clone())
            .unwrap_or_else(|| "sensor_noise_001".to_string())
    }

    pub fn port(&self) -> u16 {
        self.service
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(
            self.service.as_ref().and_then(|s| s.window_secs).unwrap_or(60),
        )
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs(
            self.service.as_ref().and_then(|s| s.debounce_secs).unwrap_or(5),
        )
    }

    pub fn no_splash(&self) -> bool {
        self.service
            .as_ref()
            .and_then(|s| s.no_splash)
            .unwrap_or(false)
    }

    pub fn i2c_bus(&self) -> u8 {
        self.sensor.as_ref().and_then(|s| s.i2c_bus).unwrap_or(1)
    }

    pub fn sensor_address(&self) -> u16 {
        self.sensor.as_ref().and_then(|s| s.address).unwrap_or(0x48)
    }

    pub fn spi_bus(&self) -> u8 {
        self.led.as_ref().and_then(|l| l.spi_bus).unwrap_or(0)
    }

    pub fn spi_clock_hz(&self) -> u32 {
        self.led.as_ref().and_then(|l| l.clock_hz).unwrap_or(2_400_000)
    }

    pub fn db_host(&self) -> String {
        self.database
            .as_ref()
            .and_then(|d| d.host.clone())
            .unwrap_or_else(|| "localhost".to_string())
    }

    pub fn db_port(&self) -> u16 {
        self.database.as_ref().and_then(|d| d.port).unwrap_or(3306)
    }

    pub fn db_user(&self) -> String {
        self.database
            .as_ref()
            .and_then(|d| d.user.clone())
            .unwrap_or_else(|| "root".to_string())
    }

    pub fn db_password(&self) -> Option<String> {
        self.database.as_ref().and_then(|d| d.password.clone())
    }

    pub fn db_name(&self) -> String {
        self.database
            .as_ref()
            .and_then(|d| d.name.clone())
            .unwrap_or_else(|| "noisled".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut full = vec!["noisled"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap()
    }

    fn with_db(mut cfg: Config) -> Config {
        cfg.database = Some(DatabaseConfig::default());
        cfg
    }

    #[test]
    fn test_defaults() {
        let cfg = with_db(Config::default());
        assert_eq!(cfg.port(), DEFAULT_PORT);
        assert_eq!(cfg.device_id(), "sensor_noise_001");
        assert_eq!(cfg.window(), Duration::from_secs(60));
        assert_eq!(cfg.debounce(), Duration::from_secs(5));
        assert_eq!(cfg.i2c_bus(), 1);
        assert_eq!(cfg.sensor_address(), 0x48);
        assert_eq!(cfg.spi_clock_hz(), 2_400_000);
        assert!(!cfg.no_splash());
        assert_eq!(cfg.db_host(), "localhost");
        assert_eq!(cfg.db_port(), 3306);
    }

    #[test]
    fn test_cli_overrides_yaml() {
        let mut cfg = with_db(Config::default());
        cfg.service = Some(ServiceConfig {
            port: Some(6000),
            window_secs: Some(10),
            ..Default::default()
        });

        let cli = cli(&["--port", "7000", "--debounce-secs", "1", "--no-splash"]);
        apply_cli_overrides(&mut cfg, &cli);

        assert_eq!(cfg.port(), 7000);
        assert_eq!(cfg.window(), Duration::from_secs(10)); // untouched
        assert_eq!(cfg.debounce(), Duration::from_secs(1));
        assert!(cfg.no_splash());
    }

    #[test]
    fn test_debug_flag_forces_debug_level() {
        let mut cfg = with_db(Config::default());
        cfg.log_level = Some("warn".to_string());
        apply_cli_overrides(&mut cfg, &cli(&["--debug"]));
        assert_eq!(cfg.log_level(), "debug");
    }

    #[test]
    fn test_database_section_required() {
        assert!(matches!(
            validate(&Config::default()),
            Err(ConfigError::Validation(_))
        ));
        assert!(validate(&with_db(Config::default())).is_ok());
    }

    #[test]
    fn test_rejects_invalid_ranges() {
        let mut cfg = with_db(Config::default());
        cfg.service = Some(ServiceConfig { port: Some(0), ..Default::default() });
        assert!(validate(&cfg).is_err());

        let mut cfg = with_db(Config::default());
        cfg.sensor = Some(SensorConfig { address: Some(0x90), ..Default::default() });
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = r#"
log_level: debug
service:
  port: 5078
  device_id: lab_sensor
database:
  host: db.local
  password: hunter2
"#;
        let parsed: Config = serde_yaml::from_str(yaml).unwrap();
        let mut cfg = Config::default();
        merge(&mut cfg, parsed);
        assert_eq!(cfg.port(), 5078);
        assert_eq!(cfg.device_id(), "lab_sensor");
        assert_eq!(cfg.db_host(), "db.local");
        assert_eq!(cfg.db_password().as_deref(), Some("hunter2"));
    }
}
