// # Standard Updater
//
// Updater for providers speaking the de-facto standard `/nic/update`
// protocol (a.k.a. dyndns2).
//
// ## Protocol
//
// One authenticated GET per host:
//
// ```http
// GET <endpoint>/nic/update?hostname=home.example.net&myip=203.0.113.7
// Authorization: Basic <username:password>
// ```
//
// The first word of the reply decides the outcome:
//
// | reply | outcome |
// |---|---|
// | `good`, `nochg` | published |
// | `911`, `dnserr`, `servererror` | transient, retried |
// | anything else (`badauth`, `nohost`, `abuse`, ...) | fatal, updater halts |
//
// Transport errors and HTTP error statuses are transient as well.
//
// ## IPv6
//
// The protocol sets whole addresses, but notifiers deliver prefixes. Each
// host therefore names the host bits of its IPv6 address:
//
// ```text
// hosts = "router/- nas/::1a2b:3c4d"
// ```
//
// `router` only gets IPv4 updates; `nas` gets the current prefix combined
// with `::1a2b:3c4d`.
//
// Providers disagree on how to pass an IPv6 address, hence `ipv6_dialect`:
// - `separate` (default): `myip` for IPv4, `myipv6` for IPv6
// - `separate_no`: like `separate`, but the unused one is sent as `no`
// - `combined`: `myip` for both

use async_trait::async_trait;
use ruddr_core::{
    Error, Ipv6Prefix, PublishError, Registry, Result, Updater, UpdaterCapabilities,
    UpdaterConfig, UpdaterFactory,
};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

/// HTTP timeout for one update request
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_MIN_RETRY_SECS: u64 = 300;
const USER_AGENT: &str = concat!("ruddr/", env!("CARGO_PKG_VERSION"));

/// How IPv6 addresses are passed in the query string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ipv6Dialect {
    #[default]
    Separate,
    SeparateNo,
    Combined,
}

impl std::str::FromStr for Ipv6Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "separate" => Ok(Self::Separate),
            "separate_no" => Ok(Self::SeparateNo),
            "combined" => Ok(Self::Combined),
            other => Err(Error::config(format!("Invalid IPv6 dialect '{}'", other))),
        }
    }
}

/// One entry of the `hosts` option
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub hostname: String,
    /// Host bits of the IPv6 address; `None` for IPv4 only
    pub ipv6_host: Option<Ipv6Addr>,
}

/// Parse the whitespace-separated `hosts` option
///
/// # Errors
///
/// [`Error::Config`] for entries without a slash, duplicates, an empty list,
/// or anything after the slash that is neither `-` nor an IPv6 address.
pub fn parse_hosts(name: &str, hosts: &str) -> Result<Vec<HostEntry>> {
    let mut entries: Vec<HostEntry> = Vec::new();

    for entry in hosts.split_whitespace() {
        let Some((hostname, suffix)) = entry.split_once('/') else {
            return Err(Error::config(format!(
                "{} updater hosts entry {} needs an IPv6 address or '-' after a slash",
                name, entry
            )));
        };

        if hostname.is_empty() {
            return Err(Error::config(format!(
                "{} updater has a hosts entry without a hostname",
                name
            )));
        }
        if entries.iter().any(|e| e.hostname == hostname) {
            return Err(Error::config(format!(
                "{} updater has duplicate hosts entry {}",
                name, hostname
            )));
        }

        let ipv6_host = match suffix {
            "-" => None,
            suffix => Some(suffix.parse::<Ipv6Addr>().map_err(|_| {
                Error::config(format!(
                    "{} updater hosts entry {}: '{}' is not an IPv6 address \
                     (DNS lookup of the current address is not supported)",
                    name, hostname, suffix
                ))
            })?),
        };

        entries.push(HostEntry {
            hostname: hostname.to_string(),
            ipv6_host,
        });
    }

    if entries.is_empty() {
        return Err(Error::config(format!(
            "{} updater 'hosts' option lists no hosts",
            name
        )));
    }
    Ok(entries)
}

/// Query parameters for an IPv4 update of `hostname`
pub fn ipv4_params(
    dialect: Ipv6Dialect,
    hostname: &str,
    address: Ipv4Addr,
) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("hostname", hostname.to_string()),
        ("myip", address.to_string()),
    ];
    if dialect == Ipv6Dialect::SeparateNo {
        params.push(("myipv6", "no".to_string()));
    }
    params
}

/// Query parameters for an IPv6 update of `hostname`
pub fn ipv6_params(
    dialect: Ipv6Dialect,
    hostname: &str,
    address: Ipv6Addr,
) -> Vec<(&'static str, String)> {
    let hostname = ("hostname", hostname.to_string());
    let address = address.to_string();
    match dialect {
        Ipv6Dialect::Separate => vec![hostname, ("myipv6", address)],
        Ipv6Dialect::SeparateNo => vec![
            hostname,
            ("myip", "no".to_string()),
            ("myipv6", address),
        ],
        Ipv6Dialect::Combined => vec![hostname, ("myip", address)],
    }
}

/// Classify the body of a successful HTTP response
pub fn classify_reply(body: &str) -> std::result::Result<(), PublishError> {
    match body.split_whitespace().next() {
        Some("good") | Some("nochg") => Ok(()),
        Some("911") | Some("dnserr") | Some("servererror") => Err(PublishError::failed(format!(
            "server returned '{}'",
            body.trim()
        ))),
        _ => Err(PublishError::fatal(format!(
            "server returned '{}'",
            body.trim()
        ))),
    }
}

/// Parsed `standard` updater options
#[derive(Clone)]
pub struct StandardOptions {
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub hosts: Vec<HostEntry>,
    pub ipv6_dialect: Ipv6Dialect,
    pub min_retry_interval: Duration,
}

// Hides the password
impl std::fmt::Debug for StandardOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardOptions")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("hosts", &self.hosts)
            .field("ipv6_dialect", &self.ipv6_dialect)
            .field("min_retry_interval", &self.min_retry_interval)
            .finish()
    }
}

impl StandardOptions {
    /// Read the options of updater `name`
    pub fn from_config(name: &str, config: &UpdaterConfig) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            config.option_str(key)?.map(str::to_string).ok_or_else(|| {
                tracing::error!("'{}' config option is required", key);
                Error::config(format!("{} updater requires '{}' config option", name, key))
            })
        };

        let endpoint = required("endpoint")?;
        let endpoint = format!("{}/nic/update", endpoint.strip_suffix('/').unwrap_or(&endpoint));

        let username = required("username")?;
        let password = required("password")?;
        let hosts = parse_hosts(name, &required("hosts")?)?;

        let ipv6_dialect = match config.option_str("ipv6_dialect")? {
            None => Ipv6Dialect::default(),
            Some(text) => text.parse().map_err(|_| {
                Error::config(format!("{} updater has invalid IPv6 dialect {}", name, text))
            })?,
        };

        let min_retry = config
            .option_u64("min_retry_interval")
            .map_err(|_| {
                Error::config(format!(
                    "{} updater requires an integer for 'min_retry_interval' config option",
                    name
                ))
            })?
            .unwrap_or(DEFAULT_MIN_RETRY_SECS);
        if min_retry == 0 {
            return Err(Error::config(format!(
                "{} updater 'min_retry_interval' must be > 0",
                name
            )));
        }

        Ok(Self {
            endpoint,
            username,
            password,
            hosts,
            ipv6_dialect,
            min_retry_interval: Duration::from_secs(min_retry),
        })
    }
}

/// Updater for the `/nic/update` protocol
pub struct StandardUpdater {
    name: String,
    options: StandardOptions,
    client: reqwest::Client,
}

impl std::fmt::Debug for StandardUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardUpdater")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish()
    }
}

impl StandardUpdater {
    pub fn new(name: impl Into<String>, options: StandardOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            name: name.into(),
            options,
            client,
        })
    }

    pub fn options(&self) -> &StandardOptions {
        &self.options
    }

    /// Send one update request and interpret the reply
    async fn send(
        &self,
        params: &[(&'static str, String)],
        hostname: &str,
        family: &str,
        address: &str,
    ) -> std::result::Result<(), PublishError> {
        let response = self
            .client
            .get(&self.options.endpoint)
            .basic_auth(&self.options.username, Some(&self.options.password))
            .query(params)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    "Could not update hostname '{}' {} to {}: {}",
                    hostname,
                    family,
                    address,
                    e
                );
                PublishError::failed(format!(
                    "Updater {} could not access {}: {}",
                    self.name, self.options.endpoint, e
                ))
            })?;

        let status = response.status();
        let body = response.text().await;

        if !status.is_success() {
            tracing::error!(
                "Received HTTP {} when trying to update hostname '{}' {} to {}: {}",
                status.as_u16(),
                hostname,
                family,
                address,
                body.unwrap_or_default()
            );
            return Err(PublishError::failed(format!(
                "Updater {} got HTTP {} for {}",
                self.name,
                status.as_u16(),
                self.options.endpoint
            )));
        }

        let body = body.map_err(|e| {
            PublishError::failed(format!(
                "Updater {} could not read reply: {}",
                self.name, e
            ))
        })?;

        match classify_reply(&body) {
            Ok(()) => {
                tracing::info!("Hostname '{}' {} set to {}", hostname, family, address);
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    "Server returned response '{}' when trying to update hostname '{}' {} to {}",
                    body.trim(),
                    hostname,
                    family,
                    address
                );
                Err(e)
            }
        }
    }
}

/// Keep the first error, after trying every host
fn first_error(
    error: &mut Option<PublishError>,
    result: std::result::Result<(), PublishError>,
) {
    if let Err(e) = result
        && error.is_none()
    {
        *error = Some(e);
    }
}

#[async_trait]
impl Updater for StandardUpdater {
    fn capabilities(&self) -> UpdaterCapabilities {
        UpdaterCapabilities {
            ipv4: true,
            ipv6: self.options.hosts.iter().any(|h| h.ipv6_host.is_some()),
        }
    }

    fn min_retry_interval(&self) -> Duration {
        self.options.min_retry_interval
    }

    async fn publish_ipv4(&self, address: Ipv4Addr) -> std::result::Result<(), PublishError> {
        let mut error = None;
        for host in &self.options.hosts {
            let params = ipv4_params(self.options.ipv6_dialect, &host.hostname, address);
            let result = self
                .send(&params, &host.hostname, "IPv4", &address.to_string())
                .await;
            first_error(&mut error, result);
        }
        error.map_or(Ok(()), Err)
    }

    async fn publish_ipv6(&self, prefix: Ipv6Prefix) -> std::result::Result<(), PublishError> {
        let mut error = None;
        for host in &self.options.hosts {
            let Some(host_bits) = host.ipv6_host else {
                continue;
            };
            let address = prefix.replace_prefix(host_bits);
            let params = ipv6_params(self.options.ipv6_dialect, &host.hostname, address);
            let result = self
                .send(&params, &host.hostname, "IPv6", &address.to_string())
                .await;
            first_error(&mut error, result);
        }
        error.map_or(Ok(()), Err)
    }
}

/// Factory for `"type": "standard"`
pub struct StandardUpdaterFactory;

impl UpdaterFactory for StandardUpdaterFactory {
    fn create(&self, name: &str, config: &UpdaterConfig) -> Result<Arc<dyn Updater>> {
        let options = StandardOptions::from_config(name, config)?;
        Ok(Arc::new(StandardUpdater::new(name, options)?))
    }
}

/// Register the standard updater with a registry
pub fn register(registry: &Registry) {
    registry.register_updater("standard", Box::new(StandardUpdaterFactory));
}
