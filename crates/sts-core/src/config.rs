//! Configuration loading with Figment.
//!
//! Configuration is read from:
//! 1. `config/il_sts.toml` (or a file given on the command line)
//! 2. Environment variables prefixed with `IL_STS_`, nesting separated by `__`
//!
//! # Example
//! ```no_run
//! use sts_core::config::StsConfig;
//!
//! let config = StsConfig::load()?;
//! config.validate()?;
//! println!("Sweep: {} - {} nm", config.sweep.start_nm, config.sweep.stop_nm);
//! # Ok::<(), sts_core::error::StsError>(())
//! ```
//!
//! Example override: `IL_STS_SWEEP__POWER_DBM=5`.

use crate::device::{supports_interface, DeviceKind, Interface, MAX_TSL_POWER_DBM};
use crate::error::{StsError, StsResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/il_sts.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "IL_STS_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StsConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Sweep settings
    #[serde(default)]
    pub sweep: SweepSettings,
    /// Bounded wait settings
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Instrument endpoints
    #[serde(default)]
    pub instruments: InstrumentsConfig,
    /// Output files
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "IL STS".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Laser sweep settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepSettings {
    /// Start wavelength in nm.
    pub start_nm: f64,
    /// Stop wavelength in nm.
    pub stop_nm: f64,
    /// Target wavelength step in nm.
    pub step_nm: f64,
    /// Sweep speed in nm/s.
    pub speed_nm_per_s: f64,
    /// Output power in dBm.
    pub power_dbm: f64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            start_nm: 1500.0,
            stop_nm: 1600.0,
            step_nm: 0.01,
            speed_nm_per_s: 50.0,
            power_dbm: 0.0,
        }
    }
}

impl SweepSettings {
    /// Check the values are physically meaningful.
    pub fn validate(&self) -> StsResult<()> {
        for (name, value) in [
            ("start wavelength", self.start_nm),
            ("stop wavelength", self.stop_nm),
            ("sweep step", self.step_nm),
            ("sweep speed", self.speed_nm_per_s),
            ("output power", self.power_dbm),
        ] {
            if !value.is_finite() {
                return Err(StsError::Configuration(format!("{name} {value} is not finite")));
            }
        }
        if !(self.start_nm > 0.0) {
            return Err(StsError::Configuration(format!(
                "start wavelength {} nm must be positive",
                self.start_nm
            )));
        }
        if self.start_nm >= self.stop_nm {
            return Err(StsError::Configuration(format!(
                "start wavelength {} nm must be below stop wavelength {} nm",
                self.start_nm, self.stop_nm
            )));
        }
        if !(self.step_nm > 0.0) {
            return Err(StsError::Configuration(format!(
                "sweep step {} nm must be positive",
                self.step_nm
            )));
        }
        if !(self.speed_nm_per_s > 0.0) {
            return Err(StsError::Configuration(format!(
                "sweep speed {} nm/s must be positive",
                self.speed_nm_per_s
            )));
        }
        if self.power_dbm > MAX_TSL_POWER_DBM {
            return Err(StsError::Configuration(format!(
                "output power {} dBm exceeds {} dBm",
                self.power_dbm, MAX_TSL_POWER_DBM
            )));
        }
        Ok(())
    }

    /// Time the laser needs to cover the wavelength span.
    pub fn sweep_duration(&self) -> StsResult<Duration> {
        let secs = (self.stop_nm - self.start_nm).abs() / self.speed_nm_per_s;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            StsError::Configuration(format!(
                "sweep of {} - {} nm at {} nm/s has no representable duration",
                self.start_nm, self.stop_nm, self.speed_nm_per_s
            ))
        })
    }

    /// Number of points on the target wavelength table.
    pub fn target_points(&self) -> usize {
        points_between(self.start_nm, self.stop_nm, self.step_nm)
    }
}

/// Number of grid points from `start` to `stop` inclusive at `step`.
pub fn points_between(start: f64, stop: f64, step: f64) -> usize {
    if step <= 0.0 || stop < start {
        return 0;
    }
    ((stop - start) / step + 1e-9).floor() as usize + 1
}

/// Bounds on every wait in a sweep cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Wait for the laser to report "waiting for trigger".
    pub trigger_armed_ms: u64,
    /// Wait for the laser to return to standby.
    pub standby_ms: u64,
    /// Added to the sweep duration when waiting for sampling.
    pub sampling_margin_ms: u64,
    /// Busy check before configuration.
    pub busy_ms: u64,
    /// Single command/response exchange.
    pub command_ms: u64,
    /// Interval between status polls.
    pub poll_interval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            trigger_armed_ms: 3000,
            standby_ms: 5000,
            sampling_margin_ms: 2000,
            busy_ms: 3000,
            command_ms: 5000,
            poll_interval_ms: 50,
        }
    }
}

impl TimeoutConfig {
    /// Bound for the "waiting for trigger" wait.
    pub fn trigger_armed(&self) -> Duration {
        Duration::from_millis(self.trigger_armed_ms)
    }

    /// Bound for the standby wait.
    pub fn standby(&self) -> Duration {
        Duration::from_millis(self.standby_ms)
    }

    /// Bound for the sampling wait of a sweep lasting `sweep`.
    pub fn sampling(&self, sweep: Duration) -> Duration {
        sweep.saturating_add(Duration::from_millis(self.sampling_margin_ms))
    }

    /// Bound for the busy check.
    pub fn busy(&self) -> Duration {
        Duration::from_millis(self.busy_ms)
    }

    /// Bound for one command exchange.
    pub fn command(&self) -> Duration {
        Duration::from_millis(self.command_ms)
    }

    /// Status polling interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// How to reach one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "interface", rename_all = "lowercase")]
pub enum EndpointConfig {
    /// TCP socket.
    Lan {
        /// Host name or address
        host: String,
        /// TCP port
        port: u16,
    },
    /// GPIB address behind a GPIB-Ethernet bridge.
    Gpib {
        /// Bridge host
        bridge_host: String,
        /// Bridge TCP port
        #[serde(default = "default_bridge_port")]
        bridge_port: u16,
        /// Primary GPIB address
        address: u8,
    },
    /// Serial port.
    Usb {
        /// Port path (e.g. `/dev/ttyUSB0`)
        port: String,
        /// Baud rate
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
}

fn default_bridge_port() -> u16 {
    1234
}

fn default_baud_rate() -> u32 {
    115_200
}

impl EndpointConfig {
    /// Interface the endpoint uses.
    pub fn interface(&self) -> Interface {
        match self {
            EndpointConfig::Lan { .. } => Interface::Lan,
            EndpointConfig::Gpib { .. } => Interface::Gpib,
            EndpointConfig::Usb { .. } => Interface::Usb,
        }
    }
}

impl std::fmt::Display for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointConfig::Lan { host, port } => write!(f, "LAN {host}:{port}"),
            EndpointConfig::Gpib {
                bridge_host,
                bridge_port,
                address,
            } => write!(f, "GPIB{address} via {bridge_host}:{bridge_port}"),
            EndpointConfig::Usb { port, baud_rate } => write!(f, "USB {port} @ {baud_rate}"),
        }
    }
}

/// Instrument endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentsConfig {
    /// Tunable laser
    pub tsl: EndpointConfig,
    /// Power meter
    pub mpm: EndpointConfig,
    /// Monitor sampler
    pub spu: EndpointConfig,
}

impl Default for InstrumentsConfig {
    fn default() -> Self {
        Self {
            tsl: EndpointConfig::Lan {
                host: "192.168.1.100".to_string(),
                port: 5000,
            },
            mpm: EndpointConfig::Lan {
                host: "192.168.1.161".to_string(),
                port: 5000,
            },
            spu: EndpointConfig::Usb {
                port: "/dev/ttyACM0".to_string(),
                baud_rate: default_baud_rate(),
            },
        }
    }
}

impl InstrumentsConfig {
    /// Endpoint for a device kind.
    pub fn endpoint(&self, kind: DeviceKind) -> &EndpointConfig {
        match kind {
            DeviceKind::Tsl => &self.tsl,
            DeviceKind::Mpm => &self.mpm,
            DeviceKind::Spu => &self.spu,
        }
    }
}

/// Output file configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for result and cache files
    pub output_dir: PathBuf,
    /// Subdirectory that receives files about to be overwritten
    #[serde(default = "default_archive_dir")]
    pub archive_dir: String,
}

fn default_archive_dir() -> String {
    "previous".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            archive_dir: default_archive_dir(),
        }
    }
}

impl StsConfig {
    /// Load configuration from `config/il_sts.toml` and the environment.
    pub fn load() -> StsResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path.
    ///
    /// Missing keys fall back to defaults; environment variables win over the
    /// file.
    pub fn load_from<P: AsRef<Path>>(path: P) -> StsResult<Self> {
        let config = Figment::from(Serialized::defaults(StsConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> StsResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(StsError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        self.sweep.validate()?;

        let t = &self.timeouts;
        for (name, value) in [
            ("trigger_armed_ms", t.trigger_armed_ms),
            ("standby_ms", t.standby_ms),
            ("busy_ms", t.busy_ms),
            ("command_ms", t.command_ms),
            ("poll_interval_ms", t.poll_interval_ms),
        ] {
            if value == 0 {
                return Err(StsError::Configuration(format!(
                    "timeout {name} must be greater than zero"
                )));
            }
        }

        for kind in DeviceKind::ALL {
            let endpoint = self.instruments.endpoint(kind);
            if !supports_interface(kind, endpoint.interface()) {
                return Err(StsError::Configuration(format!(
                    "{kind} cannot be connected over {}",
                    endpoint.interface()
                )));
            }
        }

        if self.storage.archive_dir.trim().is_empty() {
            return Err(StsError::Configuration(
                "storage.archive_dir must not be empty".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        StsConfig::default().validate().unwrap();
    }

    #[test]
    fn load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[application]
name = "bench 3"
log_level = "debug"

[sweep]
start_nm = 1520.0
stop_nm = 1570.0
step_nm = 0.005
speed_nm_per_s = 20.0
power_dbm = 3.0

[instruments.tsl]
interface = "gpib"
bridge_host = "10.0.0.5"
address = 1

[instruments.mpm]
interface = "lan"
host = "10.0.0.6"
port = 5000

[instruments.spu]
interface = "usb"
port = "/dev/ttyACM1"
"#
        )
        .unwrap();

        let config = StsConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.name, "bench 3");
        assert_eq!(config.sweep.stop_nm, 1570.0);
        assert_eq!(config.timeouts.trigger_armed_ms, 3000);
        assert_eq!(
            config.instruments.tsl,
            EndpointConfig::Gpib {
                bridge_host: "10.0.0.5".into(),
                bridge_port: 1234,
                address: 1
            }
        );
        config.validate().unwrap();
    }

    #[test]
    fn power_above_limit_is_rejected() {
        let mut config = StsConfig::default();
        config.sweep.power_dbm = 10.5;
        assert!(matches!(config.validate(), Err(StsError::Configuration(_))));
    }

    #[test]
    fn reversed_span_is_rejected() {
        let mut config = StsConfig::default();
        config.sweep.start_nm = 1600.0;
        config.sweep.stop_nm = 1500.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn interface_outside_capability_table_is_rejected() {
        let mut config = StsConfig::default();
        config.instruments.mpm = EndpointConfig::Usb {
            port: "/dev/ttyUSB0".into(),
            baud_rate: 9600,
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("MPM cannot be connected over USB"));
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut config = StsConfig::default();
        config.application.log_level = "verbose".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_finite_sweep_values_are_rejected() {
        let mut config = StsConfig::default();
        config.sweep.stop_nm = f64::INFINITY;
        assert!(matches!(config.validate(), Err(StsError::Configuration(_))));

        let mut config = StsConfig::default();
        config.sweep.speed_nm_per_s = f64::NAN;
        assert!(matches!(config.validate(), Err(StsError::Configuration(_))));
    }

    #[test]
    fn unrepresentable_sweep_duration_is_an_error() {
        let sweep = SweepSettings {
            speed_nm_per_s: 1e-300,
            ..SweepSettings::default()
        };
        sweep.validate().unwrap();
        assert!(matches!(sweep.sweep_duration(), Err(StsError::Configuration(_))));

        let timeouts = TimeoutConfig::default();
        assert_eq!(timeouts.sampling(Duration::MAX), Duration::MAX);
    }

    #[test]
    fn sweep_duration_and_points() {
        let sweep = SweepSettings {
            start_nm: 1500.0,
            stop_nm: 1510.0,
            step_nm: 0.1,
            speed_nm_per_s: 5.0,
            power_dbm: 0.0,
        };
        assert_eq!(sweep.sweep_duration().unwrap(), Duration::from_secs(2));
        assert_eq!(sweep.target_points(), 101);
    }
}
