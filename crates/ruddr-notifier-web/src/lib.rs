// # Web Notifier
//
// Notifier that asks a what-is-my-IP web service for the public address.
//
// ## Behavior
//
// One plain-text GET per wanted family. The family is forced per request by
// binding the client to `0.0.0.0` (IPv4) or `::` (IPv6), so the service sees
// the address of that family. The IPv6 answer is reduced to its prefix
// (`ipv6_prefix` bits, default 64).
//
// ## Configuration
//
// ```json
// {
//   "type": "web",
//   "url": "https://icanhazip.com/",
//   "url6": "https://ipv6.icanhazip.com/",
//   "timeout": 10,
//   "ipv6_prefix": 56
// }
// ```
//
// Polls every 3 hours by default; failed checks retry from 1 minute up to
// a day.

use async_trait::async_trait;
use ruddr_core::{
    CheckError, CheckIntervals, Dispatcher, Error, Ipv6Prefix, Notifier, NotifierCapabilities,
    NotifierConfig, NotifierFactory, Registry, Result,
};
use serde_json::Value;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_IPV6_PREFIX: u8 = 64;
const USER_AGENT: &str = concat!("ruddr/", env!("CARGO_PKG_VERSION"));

/// Parsed `web` notifier options
#[derive(Debug, Clone, PartialEq)]
pub struct WebOptions {
    pub url4: String,
    pub url6: String,
    pub timeout4: Duration,
    pub timeout6: Duration,
    pub ipv6_prefix: u8,
}

impl WebOptions {
    /// Read the options of notifier `name`
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if `url` is missing or a number is out of range.
    pub fn from_config(name: &str, config: &NotifierConfig) -> Result<Self> {
        let url4 = config.option_str("url")?.ok_or_else(|| {
            tracing::error!(
                "'url' config option is required. Only need IPv6? Use 'url' and \
                 attach this notifier to an updater with 'notifier6'."
            );
            Error::config(format!("{} notifier requires 'url' config option", name))
        })?;
        let url6 = config.option_str("url6")?.unwrap_or(url4);

        let timeout4 = seconds(name, config, "timeout")?.unwrap_or(DEFAULT_TIMEOUT);
        let timeout6 = seconds(name, config, "timeout6")?.unwrap_or(timeout4);

        let ipv6_prefix = match config.option_u64("ipv6_prefix") {
            Ok(None) => DEFAULT_IPV6_PREFIX,
            Ok(Some(bits)) if (1..=128).contains(&bits) => bits as u8,
            _ => {
                return Err(Error::config(format!(
                    "'ipv6_prefix' option for {} notifier must be an integer from 1-128",
                    name
                )));
            }
        };

        Ok(Self {
            url4: url4.to_string(),
            url6: url6.to_string(),
            timeout4,
            timeout6,
            ipv6_prefix,
        })
    }
}

/// Read a positive number of seconds, integer or fractional
fn seconds(name: &str, config: &NotifierConfig, key: &str) -> Result<Option<Duration>> {
    let invalid = || {
        Error::config(format!(
            "'{}' option for {} notifier must be a positive number",
            key, name
        ))
    };
    let secs = match config.options.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_f64().ok_or_else(invalid)?,
        Some(Value::String(s)) => s.trim().parse::<f64>().map_err(|_| invalid())?,
        Some(_) => return Err(invalid()),
    };
    if secs.is_nan() || secs <= 0.0 {
        return Err(invalid());
    }
    Duration::try_from_secs_f64(secs).map(Some).map_err(|_| invalid())
}

/// Parse an IPv4 response body
pub fn parse_ipv4(body: &str) -> Option<Ipv4Addr> {
    body.trim().parse().ok()
}

/// Parse an IPv6 response body and reduce it to a prefix of `prefix_len`
/// bits
pub fn parse_ipv6(body: &str, prefix_len: u8) -> Option<Ipv6Prefix> {
    let address: Ipv6Addr = body.trim().parse().ok()?;
    Ipv6Prefix::new(address, prefix_len).ok()
}

/// Result of probing one family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Probe {
    NotWanted,
    Found,
    Missing,
    HttpError,
}

impl Probe {
    fn found(self) -> bool {
        self == Probe::Found
    }
}

/// Decide the check outcome from the two probes
fn outcome(
    name: &str,
    ipv4: Probe,
    ipv6: Probe,
    need_ipv4: bool,
    need_ipv6: bool,
) -> std::result::Result<(), CheckError> {
    if ipv4 == Probe::HttpError {
        return Err(CheckError::failed(format!(
            "HTTP error for IPv4 in {} notifier",
            name
        )));
    }
    if ipv6 == Probe::HttpError {
        return Err(CheckError::failed(format!(
            "HTTP error for IPv6 in {} notifier",
            name
        )));
    }
    if !ipv4.found() && !ipv6.found() {
        return Err(CheckError::failed(format!(
            "Could not get any IP address for {} notifier",
            name
        )));
    }
    if need_ipv4 && !ipv4.found() {
        return Err(CheckError::failed(format!(
            "Could not get IPv4 address for {} notifier",
            name
        )));
    }
    if need_ipv6 && !ipv6.found() {
        return Err(CheckError::failed(format!(
            "Could not get IPv6 address for {} notifier",
            name
        )));
    }
    Ok(())
}

/// Notifier polling a what-is-my-IP web service
pub struct WebNotifier {
    name: String,
    options: WebOptions,
    client4: reqwest::Client,
    client6: reqwest::Client,
}

impl WebNotifier {
    pub fn new(name: impl Into<String>, options: WebOptions) -> Result<Self> {
        let client4 = client(IpAddr::V4(Ipv4Addr::UNSPECIFIED), options.timeout4)?;
        let client6 = client(IpAddr::V6(Ipv6Addr::UNSPECIFIED), options.timeout6)?;
        Ok(Self {
            name: name.into(),
            options,
            client4,
            client6,
        })
    }

    pub fn options(&self) -> &WebOptions {
        &self.options
    }

    /// GET `url`, returning the body of a successful response
    ///
    /// `Ok(None)` means no answer over this family (no connectivity).
    async fn fetch(
        &self,
        client: &reqwest::Client,
        url: &str,
        family: &str,
    ) -> std::result::Result<Option<String>, Probe> {
        let response = match client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Could not get {} from {}: {}", family, url, e);
                return Ok(None);
            }
        };

        let status = response.status();
        let body = response.text().await;
        if !status.is_success() {
            tracing::error!(
                "Received HTTP {} from {}: {}",
                status.as_u16(),
                url,
                body.unwrap_or_default()
            );
            return Err(Probe::HttpError);
        }

        match body {
            Ok(body) => Ok(Some(body)),
            Err(e) => {
                tracing::error!("Failed to read {} response from {}: {}", family, url, e);
                Ok(None)
            }
        }
    }

    async fn probe_ipv4(&self, dispatcher: &Dispatcher) -> Probe {
        let url = &self.options.url4;
        let body = match self.fetch(&self.client4, url, "IPv4").await {
            Ok(Some(body)) => body,
            Ok(None) => return Probe::Missing,
            Err(probe) => return probe,
        };
        match parse_ipv4(&body) {
            Some(address) => {
                dispatcher.notify_ipv4(address).await;
                Probe::Found
            }
            None => {
                tracing::error!(
                    "Response from {} did not contain valid IPv4 address: \"{}\"",
                    url,
                    body
                );
                Probe::Missing
            }
        }
    }

    async fn probe_ipv6(&self, dispatcher: &Dispatcher) -> Probe {
        let url = &self.options.url6;
        let body = match self.fetch(&self.client6, url, "IPv6").await {
            Ok(Some(body)) => body,
            Ok(None) => return Probe::Missing,
            Err(probe) => return probe,
        };
        match parse_ipv6(&body, self.options.ipv6_prefix) {
            Some(prefix) => {
                dispatcher.notify_ipv6(prefix).await;
                Probe::Found
            }
            None => {
                tracing::error!(
                    "Response from {} did not contain valid IPv6 address: \"{}\"",
                    url,
                    body
                );
                Probe::Missing
            }
        }
    }
}

fn client(local_address: IpAddr, timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .local_address(local_address)
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))
}

#[async_trait]
impl Notifier for WebNotifier {
    fn capabilities(&self) -> NotifierCapabilities {
        NotifierCapabilities {
            ipv4: true,
            ipv6: true,
            on_demand: true,
        }
    }

    fn default_intervals(&self) -> CheckIntervals {
        CheckIntervals::new(
            Duration::from_secs(60),
            Duration::from_secs(86400),
            Duration::from_secs(10800),
        )
        .unwrap_or_default()
    }

    async fn check_once(&self, dispatcher: &Dispatcher) -> std::result::Result<(), CheckError> {
        tracing::info!("Notifier {} checking IP addresses", self.name);

        let ipv4 = if dispatcher.want_ipv4() {
            self.probe_ipv4(dispatcher).await
        } else {
            Probe::NotWanted
        };
        let ipv6 = if dispatcher.want_ipv6() {
            self.probe_ipv6(dispatcher).await
        } else {
            Probe::NotWanted
        };

        outcome(
            &self.name,
            ipv4,
            ipv6,
            dispatcher.need_ipv4(),
            dispatcher.need_ipv6(),
        )
    }
}

/// Factory for `"type": "web"`
pub struct WebNotifierFactory;

impl NotifierFactory for WebNotifierFactory {
    fn create(&self, name: &str, config: &NotifierConfig) -> Result<Arc<dyn Notifier>> {
        let options = WebOptions::from_config(name, config)?;
        Ok(Arc::new(WebNotifier::new(name, options)?))
    }
}

/// Register the web notifier with a registry
pub fn register(registry: &Registry) {
    registry.register_notifier("web", Box::new(WebNotifierFactory));
}
