//! Configuration types for the ruddr system
//!
//! Only the deserializable shapes and their validation live here. Loading a
//! configuration file is up to the caller (the daemon reads JSON).
//!
//! ```json
//! {
//!   "datadir": "/var/lib/ruddr",
//!   "notifiers": {
//!     "web": {"type": "web", "url": "https://icanhazip.com/", "interval": 3600}
//!   },
//!   "updaters": {
//!     "home": {"type": "standard", "notifier": "web", "endpoint": "https://dyn.example.net",
//!              "username": "user", "password": "pass", "hosts": "home.example.net/-"}
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default directory for persistent data
pub const DEFAULT_DATA_DIR: &str = "/var/lib/ruddr";

/// File name of the address ledger inside the data directory
pub const LEDGER_FILE_NAME: &str = "addrfile";

/// Main ruddr configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuddrConfig {
    /// Directory for persistent data (the address ledger)
    #[serde(default = "default_datadir")]
    pub datadir: PathBuf,

    /// Notifiers, by name
    #[serde(default)]
    pub notifiers: BTreeMap<String, NotifierConfig>,

    /// Updaters, by name
    #[serde(default)]
    pub updaters: BTreeMap<String, UpdaterConfig>,

    /// Default notifier for updaters that name none
    #[serde(default)]
    pub notifier: Option<String>,

    /// Default IPv4 notifier, overriding `notifier`
    #[serde(default)]
    pub notifier4: Option<String>,

    /// Default IPv6 notifier, overriding `notifier`
    #[serde(default)]
    pub notifier6: Option<String>,
}

impl RuddrConfig {
    /// Validate cross references and global settings
    pub fn validate(&self) -> Result<()> {
        if !self.datadir.is_absolute() {
            return Err(Error::config(format!(
                "datadir {} must be an absolute path",
                self.datadir.display()
            )));
        }

        if self.updaters.is_empty() {
            return Err(Error::config("At least one updater must be configured"));
        }

        for (name, notifier) in &self.notifiers {
            notifier.validate(name)?;
        }

        if self.notifier.is_some() && self.notifier4.is_some() && self.notifier6.is_some() {
            return Err(Error::config(
                "Global 'notifier' cannot be set when 'notifier4' and 'notifier6' are both set",
            ));
        }

        for (name, updater) in &self.updaters {
            if updater.notifier.is_some()
                && updater.notifier4.is_some()
                && updater.notifier6.is_some()
            {
                return Err(Error::config(format!(
                    "Updater {}: 'notifier' cannot be set when 'notifier4' and 'notifier6' are both set",
                    name
                )));
            }

            let ipv4 = self.ipv4_notifier_for(updater);
            let ipv6 = self.ipv6_notifier_for(updater);

            if ipv4.is_none() && ipv6.is_none() {
                return Err(Error::config(format!(
                    "Updater {} has no notifier configured",
                    name
                )));
            }

            for notifier in [ipv4, ipv6].into_iter().flatten() {
                if !self.notifiers.contains_key(notifier) {
                    return Err(Error::config(format!(
                        "Updater {} references unknown notifier {}",
                        name, notifier
                    )));
                }
            }
        }

        Ok(())
    }

    /// Path of the address ledger file
    pub fn ledger_path(&self) -> PathBuf {
        self.datadir.join(LEDGER_FILE_NAME)
    }

    /// IPv4 notifier for `updater`, falling back to the global defaults
    pub fn ipv4_notifier_for<'a>(&'a self, updater: &'a UpdaterConfig) -> Option<&'a str> {
        updater
            .ipv4_notifier()
            .or(self.notifier4.as_deref())
            .or(self.notifier.as_deref())
    }

    /// IPv6 notifier for `updater`, falling back to the global defaults
    pub fn ipv6_notifier_for<'a>(&'a self, updater: &'a UpdaterConfig) -> Option<&'a str> {
        updater
            .ipv6_notifier()
            .or(self.notifier6.as_deref())
            .or(self.notifier.as_deref())
    }
}

fn default_datadir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

/// Configuration for one notifier
///
/// Keys not recognized here are collected in `options` and handed to the
/// notifier's factory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Notifier type name, as registered in the [`Registry`](crate::Registry)
    #[serde(rename = "type")]
    pub kind: String,

    /// Never notify IPv4 addresses
    #[serde(default)]
    pub skip_ipv4: bool,

    /// Never notify IPv6 prefixes
    #[serde(default)]
    pub skip_ipv6: bool,

    /// Fail the check when no IPv4 address is found (default `!skip_ipv4`)
    #[serde(default)]
    pub ipv4_required: Option<bool>,

    /// Fail the check when no IPv6 prefix is found
    #[serde(default)]
    pub ipv6_required: bool,

    /// Override the notifier's minimum retry interval (seconds)
    #[serde(default)]
    pub retry_min_interval: Option<u64>,

    /// Override the notifier's maximum retry interval (seconds)
    #[serde(default)]
    pub retry_max_interval: Option<u64>,

    /// Override the notifier's polling interval (seconds)
    #[serde(default)]
    pub interval: Option<u64>,

    /// Notifier-specific options
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl NotifierConfig {
    /// Create a config for a notifier type with all defaults
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    /// Add a notifier-specific option
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Effective `ipv4_required`
    pub fn ipv4_required(&self) -> bool {
        self.ipv4_required.unwrap_or(!self.skip_ipv4)
    }

    /// Validate the family policy
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.kind.is_empty() {
            return Err(Error::config(format!("Notifier {} has no type", name)));
        }
        if self.skip_ipv4 && self.skip_ipv6 {
            return Err(Error::config(format!(
                "Notifier {} cannot skip both IPv4 and IPv6",
                name
            )));
        }
        if self.skip_ipv4 && self.ipv4_required() {
            return Err(Error::config(format!(
                "Notifier {} cannot require IPv4 when it is skipped",
                name
            )));
        }
        if self.skip_ipv6 && self.ipv6_required {
            return Err(Error::config(format!(
                "Notifier {} cannot require IPv6 when it is skipped",
                name
            )));
        }
        Ok(())
    }

    /// Read a string option
    pub fn option_str(&self, key: &str) -> Result<Option<&str>> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(Error::config(format!(
                "Option '{}' must be a string, got {}",
                key, other
            ))),
        }
    }

    /// Read an unsigned integer option (numbers or numeric strings)
    pub fn option_u64(&self, key: &str) -> Result<Option<u64>> {
        option_u64(&self.options, key)
    }
}

/// Configuration for one updater
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Updater type name, as registered in the [`Registry`](crate::Registry)
    #[serde(rename = "type")]
    pub kind: String,

    /// Notifier for both families
    #[serde(default)]
    pub notifier: Option<String>,

    /// Notifier for IPv4, overriding `notifier`
    #[serde(default)]
    pub notifier4: Option<String>,

    /// Notifier for IPv6, overriding `notifier`
    #[serde(default)]
    pub notifier6: Option<String>,

    /// Updater-specific options
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl UpdaterConfig {
    /// Create a config for an updater type attached to `notifier`
    pub fn new(kind: impl Into<String>, notifier: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            notifier: Some(notifier.into()),
            ..Self::default()
        }
    }

    /// Add an updater-specific option
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Name of the notifier feeding IPv4 addresses, if any
    pub fn ipv4_notifier(&self) -> Option<&str> {
        self.notifier4.as_deref().or(self.notifier.as_deref())
    }

    /// Name of the notifier feeding IPv6 prefixes, if any
    pub fn ipv6_notifier(&self) -> Option<&str> {
        self.notifier6.as_deref().or(self.notifier.as_deref())
    }

    /// Read a string option
    pub fn option_str(&self, key: &str) -> Result<Option<&str>> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(Error::config(format!(
                "Option '{}' must be a string, got {}",
                key, other
            ))),
        }
    }

    /// Read an unsigned integer option (numbers or numeric strings)
    pub fn option_u64(&self, key: &str) -> Result<Option<u64>> {
        option_u64(&self.options, key)
    }
}

fn option_u64(options: &Map<String, Value>, key: &str) -> Result<Option<u64>> {
    let invalid = || Error::config(format!("Option '{}' must be a non-negative integer", key));
    match options.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(invalid),
        Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

/// Check scheduling intervals for a notifier
///
/// - `retry_min`: first retry delay after a failed check (> 0)
/// - `retry_max`: cap for the doubling retry delay (>= `retry_min`)
/// - `success`: delay before the next check after a successful one;
///   zero means the notifier only checks when triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckIntervals {
    retry_min: Duration,
    retry_max: Duration,
    success: Duration,
}

impl CheckIntervals {
    /// Create validated intervals
    pub fn new(retry_min: Duration, retry_max: Duration, success: Duration) -> Result<Self> {
        if retry_min.is_zero() {
            return Err(Error::config("Minimum retry interval must be > 0"));
        }
        if retry_max < retry_min {
            return Err(Error::config(format!(
                "Maximum retry interval ({}s) must be >= minimum ({}s)",
                retry_max.as_secs(),
                retry_min.as_secs()
            )));
        }
        Ok(Self {
            retry_min,
            retry_max,
            success,
        })
    }

    /// Intervals for a notifier that does not poll: retry from 5 minutes up
    /// to a day
    pub const fn event_driven() -> Self {
        Self {
            retry_min: Duration::from_secs(300),
            retry_max: Duration::from_secs(86400),
            success: Duration::ZERO,
        }
    }

    pub fn retry_min(&self) -> Duration {
        self.retry_min
    }

    pub fn retry_max(&self) -> Duration {
        self.retry_max
    }

    pub fn success(&self) -> Duration {
        self.success
    }

    /// Apply the overrides in `config` on top of these defaults
    ///
    /// `interval` only applies to notifiers that poll by default (non-zero
    /// success interval) and must then be > 0.
    pub fn with_overrides(self, name: &str, config: &NotifierConfig) -> Result<Self> {
        let retry_min = config
            .retry_min_interval
            .map_or(self.retry_min, Duration::from_secs);
        let retry_max = config
            .retry_max_interval
            .map_or(self.retry_max, Duration::from_secs);

        let success = match config.interval {
            None => self.success,
            Some(_) if self.success.is_zero() => {
                tracing::warn!(
                    "Notifier {} does not poll; ignoring 'interval' option",
                    name
                );
                self.success
            }
            Some(0) => {
                return Err(Error::config(format!(
                    "Notifier {}: 'interval' must be > 0",
                    name
                )));
            }
            Some(secs) => Duration::from_secs(secs),
        };

        Self::new(retry_min, retry_max, success).map_err(|e| match e {
            Error::Config(msg) => Error::config(format!("Notifier {}: {}", name, msg)),
            other => other,
        })
    }
}

impl Default for CheckIntervals {
    fn default() -> Self {
        Self::event_driven()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_parse_full_config() {
        let config: RuddrConfig = serde_json::from_str(
            r#"{
                "datadir": "/tmp/ruddr",
                "notifiers": {
                    "web": {"type": "web", "url": "http://x/", "skip_ipv6": true, "interval": 60}
                },
                "updaters": {
                    "u": {"type": "standard", "notifier4": "web", "hosts": "a/-"}
                }
            }"#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.ledger_path(), PathBuf::from("/tmp/ruddr/addrfile"));

        let web = &config.notifiers["web"];
        assert_eq!(web.kind, "web");
        assert!(web.skip_ipv6);
        assert_eq!(web.interval, Some(60));
        assert_eq!(web.option_str("url").unwrap(), Some("http://x/"));
        assert!(!web.options.contains_key("skip_ipv6"));

        let u = &config.updaters["u"];
        assert_eq!(u.ipv4_notifier(), Some("web"));
        assert_eq!(u.ipv6_notifier(), None);
        assert_eq!(u.option_str("hosts").unwrap(), Some("a/-"));
    }

    #[test]
    fn test_default_datadir() {
        let config: RuddrConfig = serde_json::from_str(r#"{"updaters": {}}"#).unwrap();
        assert_eq!(config.datadir, PathBuf::from(DEFAULT_DATA_DIR));
    }

    #[test]
    fn test_validate_rejects_bad_references() {
        let mut config = RuddrConfig {
            datadir: PathBuf::from("/var/lib/ruddr"),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config
            .updaters
            .insert("u".to_string(), UpdaterConfig::new("standard", "missing"));
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config
            .notifiers
            .insert("missing".to_string(), NotifierConfig::new("static"));
        config.validate().unwrap();

        config.datadir = PathBuf::from("relative");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_notifier_per_family_override() {
        let mut u = UpdaterConfig::new("standard", "both");
        u.notifier6 = Some("six".to_string());
        assert_eq!(u.ipv4_notifier(), Some("both"));
        assert_eq!(u.ipv6_notifier(), Some("six"));
    }

    #[test]
    fn test_global_notifier_defaults() {
        let config: RuddrConfig = serde_json::from_str(
            r#"{
                "notifier": "both",
                "notifier6": "six",
                "notifiers": {"both": {"type": "static"}, "six": {"type": "static"}},
                "updaters": {
                    "plain": {"type": "standard"},
                    "own": {"type": "standard", "notifier4": "six"}
                }
            }"#,
        )
        .unwrap();
        config.validate().unwrap();

        let plain = &config.updaters["plain"];
        assert_eq!(config.ipv4_notifier_for(plain), Some("both"));
        assert_eq!(config.ipv6_notifier_for(plain), Some("six"));

        let own = &config.updaters["own"];
        assert_eq!(config.ipv4_notifier_for(own), Some("six"));
        assert_eq!(config.ipv6_notifier_for(own), Some("six"));
    }

    #[test]
    fn test_notifier_all_three_rejected() {
        let mut config = RuddrConfig {
            datadir: PathBuf::from("/var/lib/ruddr"),
            ..Default::default()
        };
        config
            .notifiers
            .insert("n".to_string(), NotifierConfig::new("static"));
        let mut u = UpdaterConfig::new("standard", "n");
        u.notifier4 = Some("n".to_string());
        u.notifier6 = Some("n".to_string());
        config.updaters.insert("u".to_string(), u);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_family_policy_validation() {
        let mut c = NotifierConfig::new("static");
        assert!(c.ipv4_required());
        c.validate("n").unwrap();

        c.skip_ipv4 = true;
        assert!(!c.ipv4_required());
        c.validate("n").unwrap();

        c.skip_ipv6 = true;
        assert!(c.validate("n").is_err());

        let mut c = NotifierConfig::new("static");
        c.skip_ipv4 = true;
        c.ipv4_required = Some(true);
        assert!(c.validate("n").is_err());

        let mut c = NotifierConfig::new("static");
        c.skip_ipv6 = true;
        c.ipv6_required = true;
        assert!(c.validate("n").is_err());
    }

    #[test]
    fn test_option_u64() {
        let c = NotifierConfig::new("x")
            .with_option("a", 10)
            .with_option("b", "20")
            .with_option("c", "abc")
            .with_option("d", -1);
        assert_eq!(c.option_u64("a").unwrap(), Some(10));
        assert_eq!(c.option_u64("b").unwrap(), Some(20));
        assert!(c.option_u64("c").is_err());
        assert!(c.option_u64("d").is_err());
        assert_eq!(c.option_u64("missing").unwrap(), None);
    }

    #[test]
    fn test_intervals_validation() {
        assert!(CheckIntervals::new(secs(0), secs(10), secs(0)).is_err());
        assert!(CheckIntervals::new(secs(10), secs(5), secs(0)).is_err());
        let i = CheckIntervals::new(secs(1), secs(1), secs(0)).unwrap();
        assert_eq!(i.retry_max(), secs(1));
    }

    #[test]
    fn test_interval_overrides() {
        let polling = CheckIntervals::new(secs(60), secs(86400), secs(10800)).unwrap();

        let mut c = NotifierConfig::new("web");
        c.interval = Some(600);
        c.retry_min_interval = Some(5);
        let i = polling.with_overrides("n", &c).unwrap();
        assert_eq!(i.success(), secs(600));
        assert_eq!(i.retry_min(), secs(5));
        assert_eq!(i.retry_max(), secs(86400));

        c.interval = Some(0);
        assert!(polling.with_overrides("n", &c).is_err());

        // Event-driven notifiers never start polling
        let mut c = NotifierConfig::new("static");
        c.interval = Some(600);
        let i = CheckIntervals::event_driven().with_overrides("n", &c).unwrap();
        assert_eq!(i.success(), Duration::ZERO);

        let mut c = NotifierConfig::new("static");
        c.retry_min_interval = Some(100_000);
        assert!(CheckIntervals::event_driven().with_overrides("n", &c).is_err());
    }
}
