use std::{env, str::FromStr, time::Duration};

use anyhow::{anyhow, Context, Result};
use strum::Display;

/// Namespace file mounted into the operator pod by the orchestrator.
const NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Process-wide runtime settings, read from the environment once at
/// startup and passed explicitly to every component that needs them.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Informer scope; `None` watches the whole cluster.
    pub watch_namespace: Option<String>,
    /// Default timeout for outbound requests made by scalers.
    pub http_default_timeout: Duration,
    pub min_tls_version: MinTlsVersion,
    /// Restrict secret reads to the operator's own namespace.
    pub restrict_secret_access: bool,
    /// The operator's own namespace.
    pub cluster_object_namespace: String,
    pub leader_election: LeaderElectionSettings,
    /// Serve metrics to the adapter over the gRPC split; when disabled
    /// the operator skips the RPC server entirely.
    pub use_metrics_service_grpc: bool,
}

#[derive(Debug, Clone)]
pub struct LeaderElectionSettings {
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
}

impl Default for LeaderElectionSettings {
    fn default() -> Self {
        LeaderElectionSettings {
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Display)]
pub enum MinTlsVersion {
    #[strum(serialize = "TLS10")]
    Tls10,
    #[strum(serialize = "TLS11")]
    Tls11,
    #[strum(serialize = "TLS12")]
    Tls12,
    #[strum(serialize = "TLS13")]
    Tls13,
}

impl FromStr for MinTlsVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "TLS10" => Ok(MinTlsVersion::Tls10),
            "TLS11" => Ok(MinTlsVersion::Tls11),
            "TLS12" => Ok(MinTlsVersion::Tls12),
            "TLS13" => Ok(MinTlsVersion::Tls13),
            _ => Err(anyhow!(
                "unsupported TLS version {:?}, expected TLS10|TLS11|TLS12|TLS13",
                s
            )),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            watch_namespace: None,
            http_default_timeout: Duration::from_millis(3000),
            min_tls_version: MinTlsVersion::Tls12,
            restrict_secret_access: false,
            cluster_object_namespace: "default".to_string(),
            leader_election: LeaderElectionSettings::default(),
            use_metrics_service_grpc: true,
        }
    }
}

impl Settings {
    /// Reads every recognised environment variable; malformed values are
    /// startup errors rather than silent defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Settings::default();

        let watch_namespace = match env::var("WATCH_NAMESPACE") {
            Ok(ns) if !ns.is_empty() => Some(ns),
            _ => None,
        };

        let http_default_timeout = match env::var("KEDA_HTTP_DEFAULT_TIMEOUT") {
            Ok(ms) => Duration::from_millis(
                ms.parse::<u64>()
                    .with_context(|| format!("invalid KEDA_HTTP_DEFAULT_TIMEOUT {:?}", ms))?,
            ),
            Err(_) => defaults.http_default_timeout,
        };

        let min_tls_version = match env::var("KEDA_HTTP_MIN_TLS_VERSION") {
            Ok(v) => v.parse()?,
            Err(_) => defaults.min_tls_version,
        };

        let restrict_secret_access = match env::var("KEDA_RESTRICT_SECRET_ACCESS") {
            Ok(v) => v
                .parse::<bool>()
                .with_context(|| format!("invalid KEDA_RESTRICT_SECRET_ACCESS {:?}", v))?,
            Err(_) => false,
        };

        let cluster_object_namespace = match env::var("KEDA_CLUSTER_OBJECT_NAMESPACE") {
            Ok(ns) if !ns.is_empty() => ns,
            _ => detect_namespace(),
        };

        let leader_defaults = LeaderElectionSettings::default();
        let leader_election = LeaderElectionSettings {
            lease_duration: duration_env(
                "KEDA_METRICS_LEADER_ELECTION_LEASE_DURATION",
                leader_defaults.lease_duration,
            )?,
            renew_deadline: duration_env(
                "KEDA_METRICS_LEADER_ELECTION_RENEW_DEADLINE",
                leader_defaults.renew_deadline,
            )?,
            retry_period: duration_env(
                "KEDA_METRICS_LEADER_ELECTION_RETRY_PERIOD",
                leader_defaults.retry_period,
            )?,
        };

        let use_metrics_service_grpc = match env::var("KEDA_USE_METRICS_SERVICE_GRPC") {
            Ok(v) => v
                .parse::<bool>()
                .with_context(|| format!("invalid KEDA_USE_METRICS_SERVICE_GRPC {:?}", v))?,
            Err(_) => true,
        };

        Ok(Settings {
            watch_namespace,
            http_default_timeout,
            min_tls_version,
            restrict_secret_access,
            cluster_object_namespace,
            leader_election,
            use_metrics_service_grpc,
        })
    }
}

fn detect_namespace() -> String {
    std::fs::read_to_string(NAMESPACE_FILE)
        .map(|ns| ns.trim().to_string())
        .ok()
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| "default".to_string())
}

fn duration_env(key: &str, default: Duration) -> Result<Duration> {
    match env::var(key) {
        Ok(v) => parse_duration(&v).with_context(|| format!("invalid {} {:?}", key, v)),
        Err(_) => Ok(default),
    }
}

/// Accepts plain seconds (`"15"`), or `"15s"` / `"1500ms"`.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    if let Some(ms) = value.strip_suffix("ms") {
        return Ok(Duration::from_millis(ms.parse()?));
    }
    if let Some(secs) = value.strip_suffix('s') {
        return Ok(Duration::from_secs(secs.parse()?));
    }
    Ok(Duration::from_secs(value.parse()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_suffixes() {
        assert_eq!(parse_duration("15").unwrap(), Duration::from_secs(15));
        assert_eq!(parse_duration("15s").unwrap(), Duration::from_secs(15));
        assert_eq!(parse_duration("1500ms").unwrap(), Duration::from_millis(1500));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn tls_version_parses() {
        assert_eq!("TLS12".parse::<MinTlsVersion>().unwrap(), MinTlsVersion::Tls12);
        assert!(MinTlsVersion::Tls12 < MinTlsVersion::Tls13);
        assert!("SSL3".parse::<MinTlsVersion>().is_err());
    }
}
