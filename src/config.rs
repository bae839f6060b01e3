// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Configuration handling.
//!
//! Settings are layered: command-line flags (or their environment
//! variables) win over the optional TOML file, which wins over built-in
//! defaults. Default path: `/etc/ipmi-fanctl/config.toml`

use crate::curve::FanCurve;
use crate::error::{Error, Result};
use clap::Parser;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ipmi-fanctl/config.toml";

pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default `ipmitool` interface.
pub const DEFAULT_INTERFACE: &str = "lanplus";

/// Default poll interval in seconds.
pub const DEFAULT_INTERVAL_SECS: u64 = 5;

/// Default hard maximum temperature in degrees Celsius.
pub const DEFAULT_MAX_TEMPERATURE: u8 = 70;

/// Default time the CPU may spend over the overheat threshold, in seconds.
pub const DEFAULT_OVERHEAT_ALLOWANCE_SECS: u64 = 900;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug, Default)]
#[command(
    name = "ipmi-fanctl",
    version,
    about = "Drives server fan speed over IPMI from CPU temperature history"
)]
pub struct Args {
    /// Path to the configuration file.
    #[arg(short, long, env = "FANCTL_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// The IPMI host to connect to.
    #[arg(short = 'H', long, env = "IPMI_HOST")]
    pub host: Option<String>,

    /// The authentication username used to connect to the host.
    #[arg(short, long = "user", env = "IPMI_USERNAME")]
    pub username: Option<String>,

    /// The authentication password used to connect to the host.
    #[arg(short, long, env = "IPMI_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// The ipmitool interface (e.g. lanplus, open).
    #[arg(short = 'I', long, env = "IPMI_INTERFACE")]
    pub interface: Option<String>,

    /// The number of seconds between updates.
    #[arg(short, long, env = "UPDATE_INTERVAL")]
    pub interval: Option<u64>,

    /// The temperature beyond which is considered unsafe for sustained
    /// periods, during which the sustained load fan curve may be activated.
    #[arg(short, long = "overheat-temperature", env = "OVERHEAT_TEMPERATURE")]
    pub overheat_temperature: Option<u8>,

    /// The maximum allowable temperature. Above it fan control is handed
    /// back to the BMC.
    #[arg(short, long = "max-temperature", env = "MAXIMUM_TEMPERATURE")]
    pub max_temperature: Option<u8>,

    /// The maximum number of seconds the CPU may stay at overheat
    /// temperatures before the sustained load fan curve is activated.
    #[arg(short = 'a', long = "overheat-allowance", env = "OVERHEAT_TIME")]
    pub overheat_allowance: Option<u64>,

    /// The fan curve under normal load, as `temp,speed%` pairs separated
    /// by ';', e.g. '30,5;40,10;50,20'.
    #[arg(short = 'f', long = "idle-fans", env = "FAN_CURVE")]
    pub idle_curve: Option<String>,

    /// The fan curve under sustained load, same form as the idle curve,
    /// e.g. '30,5;40,10;50,25;70,100'. Defaults to the idle curve.
    #[arg(short, long = "sustained-fans", env = "SUSTAINED_FAN_CURVE")]
    pub sustained_curve: Option<String>,
}

// ---------------------------------------------------------------------------
// Config file
// ---------------------------------------------------------------------------

/// Contents of the TOML config file. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub host: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub interface: Option<String>,
    pub interval_secs: Option<u64>,
    pub overheat_temperature: Option<u8>,
    pub max_temperature: Option<u8>,
    pub overheat_allowance_secs: Option<u64>,
    pub idle_curve: Option<String>,
    pub sustained_curve: Option<String>,
}

/// Load the config file, or return an empty one if the file doesn't exist.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        log::info!("No config file at {}, using flags and defaults", path.display());
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)?;
    let config: FileConfig = toml::from_str(&contents)?;

    log::info!("Loaded config from {}", path.display());
    Ok(config)
}

// ---------------------------------------------------------------------------
// Resolved settings
// ---------------------------------------------------------------------------

/// Fully resolved daemon settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub interface: String,
    pub interval: Duration,
    pub overheat_temperature: u8,
    pub max_temperature: u8,
    pub overheat_allowance: Duration,
    pub idle_curve: FanCurve,
    pub sustained_curve: FanCurve,
}

impl Settings {
    /// Read the config file named by `args` and merge it with them.
    pub fn load(args: &Args) -> Result<Self> {
        let file = load_config(Path::new(&args.config))?;
        Self::resolve(args, file)
    }

    /// Merge flags over file values over defaults.
    pub fn resolve(args: &Args, file: FileConfig) -> Result<Self> {
        let idle_text = args
            .idle_curve
            .clone()
            .or(file.idle_curve)
            .ok_or_else(|| Error::InvalidConfiguration("no idle fan curve specified".to_string()))?;
        let idle_curve = parse_curve("idle", &idle_text)?;

        let sustained_curve = match args.sustained_curve.clone().or(file.sustained_curve) {
            Some(text) if !text.trim().is_empty() => parse_curve("sustained", &text)?,
            _ => idle_curve.clone(),
        };

        let interval_secs = args
            .interval
            .or(file.interval_secs)
            .unwrap_or(DEFAULT_INTERVAL_SECS);
        if interval_secs == 0 {
            return Err(Error::InvalidConfiguration(
                "update interval must be at least one second".to_string(),
            ));
        }

        let max_temperature = args
            .max_temperature
            .or(file.max_temperature)
            .unwrap_or(DEFAULT_MAX_TEMPERATURE);
        let overheat_temperature = args
            .overheat_temperature
            .or(file.overheat_temperature)
            .unwrap_or_else(|| max_temperature.min(idle_curve.max_temperature()));

        let overheat_allowance_secs = args
            .overheat_allowance
            .or(file.overheat_allowance_secs)
            .unwrap_or(DEFAULT_OVERHEAT_ALLOWANCE_SECS);

        Ok(Self {
            host: args
                .host
                .clone()
                .or(file.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            username: args.username.clone().or(file.username),
            password: args.password.clone().or(file.password),
            interface: args
                .interface
                .clone()
                .or(file.interface)
                .unwrap_or_else(|| DEFAULT_INTERFACE.to_string()),
            interval: Duration::from_secs(interval_secs),
            overheat_temperature,
            max_temperature,
            overheat_allowance: Duration::from_secs(overheat_allowance_secs),
            idle_curve,
            sustained_curve,
        })
    }
}

impl fmt::Display for Settings {
    /// One-line summary for the startup log. Never includes the password.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "host: {}, interface: {}, user: {}, interval: {}s, overheat: {}°C, max: {}°C, \
             overheat allowance: {}s, idle curve: {}, sustained curve: {}",
            self.host,
            self.interface,
            self.username.as_deref().unwrap_or("<none>"),
            self.interval.as_secs(),
            self.overheat_temperature,
            self.max_temperature,
            self.overheat_allowance.as_secs(),
            self.idle_curve,
            self.sustained_curve,
        )
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_curve(which: &str, text: &str) -> Result<FanCurve> {
    text.parse()
        .map_err(|e| Error::InvalidConfiguration(format!("{which} curve: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(flags: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("ipmi-fanctl").chain(flags.iter().copied())).unwrap()
    }

    #[test]
    fn test_parse_fan_curves_from_flags() {
        let args = args(&[
            "-H", "host.domain.com",
            "-u", "username",
            "-p", "password",
            "-f", "30,5;40,10;50,20",
            "-s", "30,5;40,10;50,20;70,100",
        ]);
        let settings = Settings::resolve(&args, FileConfig::default()).unwrap();

        assert_eq!(settings.host, "host.domain.com");
        assert_eq!(settings.username.as_deref(), Some("username"));
        assert_eq!(settings.idle_curve.to_string(), "30,5;40,10;50,20");
        assert_eq!(settings.sustained_curve.to_string(), "30,5;40,10;50,20;70,100");
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::resolve(&args(&["-f", "30,5;40,10;50,20"]), FileConfig::default()).unwrap();

        assert_eq!(settings.host, DEFAULT_HOST);
        assert_eq!(settings.interface, DEFAULT_INTERFACE);
        assert_eq!(settings.interval, Duration::from_secs(5));
        assert_eq!(settings.max_temperature, 70);
        assert_eq!(settings.overheat_allowance, Duration::from_secs(900));
        // Overheat defaults to the hottest idle curve point, capped at max.
        assert_eq!(settings.overheat_temperature, 50);
        // Sustained curve falls back to the idle curve.
        assert_eq!(settings.sustained_curve, settings.idle_curve);
    }

    #[test]
    fn test_overheat_default_capped_by_max_temperature() {
        let settings = Settings::resolve(
            &args(&["-f", "30,5;90,100", "-m", "65"]),
            FileConfig::default(),
        )
        .unwrap();
        assert_eq!(settings.overheat_temperature, 65);
    }

    #[test]
    fn test_missing_idle_curve_is_rejected() {
        let err = Settings::resolve(&Args::default(), FileConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn test_bad_curve_is_rejected() {
        let err = Settings::resolve(&args(&["-f", "50,5;40,10"]), FileConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));

        let err = Settings::resolve(
            &args(&["-f", "30,5", "-s", "oops"]),
            FileConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let err = Settings::resolve(&args(&["-f", "30,5", "-i", "0"]), FileConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
host = "bmc.example"
interval_secs = 10
max_temperature = 80
idle_curve = "30,5;60,40"
sustained_curve = "30,10;60,100"
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let settings = Settings::load(&args(&["-c", &path, "-i", "2"])).unwrap();

        assert_eq!(settings.host, "bmc.example");
        assert_eq!(settings.interval, Duration::from_secs(2));
        assert_eq!(settings.max_temperature, 80);
        assert_eq!(settings.overheat_temperature, 60);
        assert_eq!(settings.sustained_curve.to_string(), "30,10;60,100");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = load_config(&path).unwrap();
        assert!(config.idle_curve.is_none());
    }

    #[test]
    fn test_unknown_file_key_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "fan_speed = 100").unwrap();
        assert!(matches!(load_config(file.path()), Err(Error::ConfigParse(_))));
    }

    #[test]
    fn test_summary_hides_password() {
        let settings = Settings::resolve(
            &args(&["-f", "30,5", "-p", "hunter2"]),
            FileConfig::default(),
        )
        .unwrap();
        assert!(!settings.to_string().contains("hunter2"));
    }
}
