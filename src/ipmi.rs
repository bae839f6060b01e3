// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! BMC access through `ipmitool`.
//!
//! Reads CPU temperatures from the sensor data repository and drives the
//! fans with the vendor raw commands for manual fan control. Every call
//! spawns one `ipmitool` process.

use crate::error::{Error, Result};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::process::Command;

const IPMITOOL: &str = "ipmitool";

/// Upper bound on a single `ipmitool` invocation.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

const ENGAGE_MANUAL: &[&str] = &["raw", "0x30", "0x30", "0x01", "0x00"];
const RELEASE_MANUAL: &[&str] = &["raw", "0x30", "0x30", "0x01", "0x01"];
const SET_SPEED_PREFIX: &[&str] = &["raw", "0x30", "0x30", "0x02", "0xff"];
const READ_TEMPERATURES: &[&str] = &["sdr", "type", "temperature"];

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Something that can report the current CPU temperature.
pub trait TemperatureSensor {
    /// Current temperature in degrees Celsius.
    fn read_temperature(&mut self) -> impl Future<Output = Result<u8>> + Send;
}

/// Something that can command the chassis fans.
pub trait FanActuator {
    /// Take manual control and set every fan to `percent`.
    fn set_fan_speed(&mut self, percent: u8) -> impl Future<Output = Result<()>> + Send;

    /// Hand fan control back to the BMC firmware.
    fn release_manual_control(&mut self) -> impl Future<Output = Result<()>> + Send;
}

// ---------------------------------------------------------------------------
// ipmitool client
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Ipmi {
    program: String,
    interface: String,
    host: String,
    username: Option<String>,
    password: Option<String>,
}

impl Ipmi {
    pub fn new(
        interface: impl Into<String>,
        host: impl Into<String>,
        username: Option<String>,
        password: Option<String>,
    ) -> Self {
        Self {
            program: IPMITOOL.to_string(),
            interface: interface.into(),
            host: host.into(),
            username,
            password,
        }
    }

    /// Use a different executable in place of `ipmitool`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Check that the BMC is reachable and the credentials work.
    pub async fn probe(&self) -> Result<u8> {
        self.temperature().await
    }

    pub async fn temperature(&self) -> Result<u8> {
        let output = self.run(READ_TEMPERATURES).await.map_err(Error::SensorRead)?;
        parse_max_temperature(&output)
            .ok_or_else(|| Error::SensorRead("no temperature readings in sensor output".to_string()))
    }

    pub async fn engage_manual_control(&self) -> Result<()> {
        self.run(ENGAGE_MANUAL).await.map_err(Error::Actuator)?;
        Ok(())
    }

    /// Engage manual control, then set the fan duty cycle.
    pub async fn fan_speed(&self, percent: u8) -> Result<()> {
        log::debug!("Setting fan speed to {percent}%");
        self.engage_manual_control().await?;

        let speed = format!("0x{percent:02X}");
        let mut args: Vec<&str> = SET_SPEED_PREFIX.to_vec();
        args.push(speed.as_str());
        self.run(&args).await.map_err(Error::Actuator)?;
        Ok(())
    }

    pub async fn release(&self) -> Result<()> {
        log::info!("Releasing fan speed control");
        self.run(RELEASE_MANUAL).await.map_err(Error::Actuator)?;
        Ok(())
    }

    /// Connection arguments placed before every command.
    fn connection_args(&self) -> Vec<String> {
        let mut args = vec!["-I".to_string(), self.interface.clone()];
        // The in-band interface talks to the local BMC and takes no host.
        if self.interface == "open" {
            return args;
        }

        args.extend(["-H".to_string(), self.host.clone()]);
        if let Some(user) = &self.username {
            args.extend(["-U".to_string(), user.clone()]);
        }
        // -E reads the password from IPMI_PASSWORD so it never shows up in ps.
        if self.password.is_some() {
            args.push("-E".to_string());
        }
        args
    }

    /// Run one command and return its stdout. Errors are plain messages so
    /// callers can wrap them as sensor or actuator failures.
    async fn run(&self, command: &[&str]) -> std::result::Result<String, String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.connection_args()).args(command).kill_on_drop(true);
        if let Some(password) = &self.password {
            cmd.env("IPMI_PASSWORD", password);
        }

        let output = tokio::time::timeout(COMMAND_TIMEOUT, cmd.output())
            .await
            .map_err(|_| format!("{} timed out after {}s", self.program, COMMAND_TIMEOUT.as_secs()))?
            .map_err(|e| format!("failed to run {}: {e}", self.program))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            log::debug!("{}: {}", self.program, stdout.trim());
        }
        if !stderr.trim().is_empty() {
            log::debug!("{} stderr: {}", self.program, stderr.trim());
        }

        if !output.status.success() {
            return Err(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            ));
        }
        Ok(stdout)
    }
}

impl fmt::Debug for Ipmi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ipmi")
            .field("program", &self.program)
            .field("interface", &self.interface)
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl TemperatureSensor for Ipmi {
    async fn read_temperature(&mut self) -> Result<u8> {
        self.temperature().await
    }
}

impl FanActuator for Ipmi {
    async fn set_fan_speed(&mut self, percent: u8) -> Result<()> {
        self.fan_speed(percent).await
    }

    async fn release_manual_control(&mut self) -> Result<()> {
        self.release().await
    }
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

/// Highest `<N> degrees C` reading in `ipmitool sdr type temperature` output.
///
/// ```text
/// Inlet Temp       | 04h | ok  |  7.1 | 21 degrees C
/// Temp             | 0Eh | ok  |  3.1 | 45 degrees C
/// Temp             | 0Fh | ns  |  3.2 | Disabled
/// ```
pub fn parse_max_temperature(output: &str) -> Option<u8> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.trim_end().strip_suffix(" degrees C")?;
            let (_, value) = rest.rsplit_once(char::is_whitespace)?;
            value.parse::<u8>().ok()
        })
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    const SDR_OUTPUT: &str = "\
Inlet Temp       | 04h | ok  |  7.1 | 21 degrees C
Exhaust Temp     | 01h | ok  |  7.1 | 30 degrees C
Temp             | 0Eh | ok  |  3.1 | 45 degrees C
Temp             | 0Fh | ok  |  3.2 | 52 degrees C
Temp             | 10h | ns  |  3.3 | Disabled
";

    /// Write an executable stand-in for ipmitool that logs its arguments
    /// and password next to itself.
    fn fake_ipmitool(dir: &Path, body: &str) -> String {
        let path = dir.join("ipmitool");
        let script = format!(
            "#!/bin/sh\necho \"$@\" >> \"{dir}/args\"\necho \"$IPMI_PASSWORD\" > \"{dir}/password\"\n{body}\n",
            dir = dir.display()
        );
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_str().unwrap().to_string()
    }

    fn client(program: String) -> Ipmi {
        Ipmi::new("lanplus", "bmc.local", Some("admin".to_string()), Some("secret".to_string()))
            .with_program(program)
    }

    #[test]
    fn test_parse_max_temperature() {
        assert_eq!(parse_max_temperature(SDR_OUTPUT), Some(52));
        assert_eq!(parse_max_temperature("Temp | 0Eh | ok | 3.1 | 45 degrees C\r\n"), Some(45));
    }

    #[test]
    fn test_parse_without_readings() {
        assert_eq!(parse_max_temperature(""), None);
        assert_eq!(parse_max_temperature("Temp | 10h | ns | 3.3 | Disabled"), None);
    }

    #[test]
    fn test_connection_args_keep_password_off_command_line() {
        let ipmi = client(IPMITOOL.to_string());
        let args = ipmi.connection_args();
        assert_eq!(args, ["-I", "lanplus", "-H", "bmc.local", "-U", "admin", "-E"]);
        assert!(!format!("{ipmi:?}").contains("secret"));
    }

    #[test]
    fn test_open_interface_skips_host() {
        let ipmi = Ipmi::new("open", "ignored", None, None);
        assert_eq!(ipmi.connection_args(), ["-I", "open"]);
    }

    #[tokio::test]
    async fn test_reads_temperature_through_ipmitool() {
        let dir = tempfile::tempdir().unwrap();
        let body = format!("cat <<'EOF'\n{SDR_OUTPUT}EOF");
        let mut ipmi = client(fake_ipmitool(dir.path(), &body));

        assert_eq!(ipmi.read_temperature().await.unwrap(), 52);

        let args = fs::read_to_string(dir.path().join("args")).unwrap();
        assert_eq!(args.trim(), "-I lanplus -H bmc.local -U admin -E sdr type temperature");
        let password = fs::read_to_string(dir.path().join("password")).unwrap();
        assert_eq!(password.trim(), "secret");
    }

    #[tokio::test]
    async fn test_set_fan_speed_engages_manual_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut ipmi = client(fake_ipmitool(dir.path(), "exit 0"));

        ipmi.set_fan_speed(50).await.unwrap();
        ipmi.release_manual_control().await.unwrap();

        let args = fs::read_to_string(dir.path().join("args")).unwrap();
        let commands: Vec<&str> = args
            .lines()
            .map(|l| l.trim_start_matches("-I lanplus -H bmc.local -U admin -E "))
            .collect();
        assert_eq!(
            commands,
            [
                "raw 0x30 0x30 0x01 0x00",
                "raw 0x30 0x30 0x02 0xff 0x32",
                "raw 0x30 0x30 0x01 0x01",
            ]
        );
    }

    #[tokio::test]
    async fn test_failures_map_to_error_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let mut ipmi = client(fake_ipmitool(dir.path(), "echo 'Unable to establish session' >&2\nexit 1"));

        match ipmi.read_temperature().await {
            Err(Error::SensorRead(msg)) => assert!(msg.contains("Unable to establish session")),
            other => panic!("expected sensor error, got {other:?}"),
        }
        assert!(matches!(ipmi.set_fan_speed(20).await, Err(Error::Actuator(_))));
    }

    #[tokio::test]
    async fn test_empty_output_is_a_sensor_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut ipmi = client(fake_ipmitool(dir.path(), "exit 0"));
        assert!(matches!(ipmi.read_temperature().await, Err(Error::SensorRead(_))));
    }

    #[tokio::test]
    async fn test_missing_program_is_a_sensor_error() {
        let ipmi = client("/nonexistent/ipmitool".to_string());
        assert!(matches!(ipmi.probe().await, Err(Error::SensorRead(_))));
    }
}
