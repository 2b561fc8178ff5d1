//! Client configuration with builder pattern.
//!
//! Provides type-safe configuration for the resilience layer including:
//! - The default account endpoint and preferred regions
//! - Endpoint failover and unavailability settings
//! - Stale-routing (Gone) and throttling retry bounds
//! - Backoff for metadata calls (topology and routing fetches)
//!
//! Configuration can also be read from TOML, with durations written in
//! `humantime` form (`"30s"`, `"5m"`).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::ensure;
use url::Url;

use crate::error::{ConfigSnafu, InvalidUrlSnafu, Result};

/// Default time an endpoint stays marked unavailable.
const DEFAULT_UNAVAILABILITY_TTL: Duration = Duration::from_secs(5 * 60);

/// Upper bound for the endpoint unavailability TTL.
const MAX_UNAVAILABILITY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default interval between background topology refreshes.
const DEFAULT_TOPOLOGY_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default bound on endpoint failover retries for one operation.
const DEFAULT_MAX_ENDPOINT_FAILOVER_RETRIES: u32 = 3;

/// Default hard ceiling on charged send attempts for one operation.
const DEFAULT_MAX_OPERATION_ATTEMPTS: u32 = 16;

/// Default minimum interval between forced routing map refreshes.
const DEFAULT_MIN_ROUTING_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Default bound on stale-routing retries for one operation.
const DEFAULT_MAX_GONE_RETRIES: u32 = 3;

/// Default bound on throttling retries for one operation.
const DEFAULT_MAX_THROTTLE_RETRIES: u32 = 9;

/// Default bound on cumulative throttling wait for one operation.
const DEFAULT_MAX_THROTTLE_WAIT: Duration = Duration::from_secs(30);

/// Consistency level requested for operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConsistencyLevel {
    /// Linearizable reads.
    Strong,
    /// Reads lag writes by a bounded amount.
    BoundedStaleness,
    /// Read-your-writes within a session.
    #[default]
    Session,
    /// Reads never observe out-of-order writes.
    ConsistentPrefix,
    /// No ordering guarantee.
    Eventual,
}

impl ConsistencyLevel {
    /// Returns the header value for this level.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strong => "Strong",
            Self::BoundedStaleness => "BoundedStaleness",
            Self::Session => "Session",
            Self::ConsistentPrefix => "ConsistentPrefix",
            Self::Eventual => "Eventual",
        }
    }
}

/// Exponential backoff configuration.
///
/// Used for metadata calls and as the throttling fallback when the service
/// sends no retry-after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Maximum number of attempts (including initial attempt).
    pub max_attempts: u32,

    /// Initial backoff duration before first retry.
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Maximum backoff duration.
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,

    /// Backoff multiplier for exponential increase.
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0) for randomizing backoff.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

#[bon::bon]
impl BackoffPolicy {
    /// Creates a backoff policy, falling back to defaults for unset fields.
    #[builder]
    #[must_use]
    pub fn new(
        #[builder(default = 3)] max_attempts: u32,
        #[builder(default = Duration::from_millis(100))] initial_backoff: Duration,
        #[builder(default = Duration::from_secs(10))] max_backoff: Duration,
        #[builder(default = 2.0)] multiplier: f64,
        #[builder(default = 0.25)] jitter: f64,
    ) -> Self {
        Self { max_attempts, initial_backoff, max_backoff, multiplier, jitter }
    }
}

impl BackoffPolicy {
    /// Creates a policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, ..Default::default() }
    }

    /// Backoff used when a throttled response carries no retry-after.
    #[must_use]
    pub fn throttle_fallback() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_THROTTLE_RETRIES + 1,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }

    /// Returns the un-jittered delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let nanos = self.initial_backoff.as_nanos() as f64 * self.multiplier.powi(exponent);
        let capped = nanos.min(self.max_backoff.as_nanos() as f64);
        Duration::from_nanos(capped as u64)
    }

    fn validate(&self, field: &str) -> Result<()> {
        ensure!(
            self.max_attempts > 0,
            ConfigSnafu { message: format!("{field}.max_attempts must be at least 1") }
        );
        ensure!(
            self.multiplier >= 1.0,
            ConfigSnafu { message: format!("{field}.multiplier must be >= 1.0") }
        );
        ensure!(
            (0.0..=1.0).contains(&self.jitter),
            ConfigSnafu { message: format!("{field}.jitter must be within 0.0..=1.0") }
        );
        ensure!(
            self.initial_backoff <= self.max_backoff,
            ConfigSnafu { message: format!("{field}.initial_backoff exceeds max_backoff") }
        );
        Ok(())
    }
}

/// Bounds for stale-routing (HTTP 410) recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoneRetryOptions {
    /// Maximum stale-routing retries for one operation.
    pub max_retries: u32,

    /// Minimum time between forced collection routing map refreshes for a
    /// collection. Gates escalation from an address refresh to a full map
    /// refresh so concurrent requests hitting the same stale entry do not
    /// cause a refresh storm.
    #[serde(with = "humantime_serde")]
    pub min_routing_refresh_interval: Duration,
}

impl Default for GoneRetryOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_GONE_RETRIES,
            min_routing_refresh_interval: DEFAULT_MIN_ROUTING_REFRESH_INTERVAL,
        }
    }
}

#[bon::bon]
impl GoneRetryOptions {
    /// Creates stale-routing retry options.
    #[builder]
    #[must_use]
    pub fn new(
        #[builder(default = DEFAULT_MAX_GONE_RETRIES)] max_retries: u32,
        #[builder(default = DEFAULT_MIN_ROUTING_REFRESH_INTERVAL)]
        min_routing_refresh_interval: Duration,
    ) -> Self {
        Self { max_retries, min_routing_refresh_interval }
    }
}

/// Bounds for throttling (HTTP 429) retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleRetryOptions {
    /// Maximum throttling retries for one operation.
    pub max_retry_attempts: u32,

    /// Maximum cumulative wait across throttling retries.
    #[serde(with = "humantime_serde")]
    pub max_wait_time: Duration,

    /// Backoff used when the service sends no retry-after.
    pub fallback_backoff: BackoffPolicy,
}

impl Default for ThrottleRetryOptions {
    fn default() -> Self {
        Self {
            max_retry_attempts: DEFAULT_MAX_THROTTLE_RETRIES,
            max_wait_time: DEFAULT_MAX_THROTTLE_WAIT,
            fallback_backoff: BackoffPolicy::throttle_fallback(),
        }
    }
}

#[bon::bon]
impl ThrottleRetryOptions {
    /// Creates throttling retry options.
    #[builder]
    #[must_use]
    pub fn new(
        #[builder(default = DEFAULT_MAX_THROTTLE_RETRIES)] max_retry_attempts: u32,
        #[builder(default = DEFAULT_MAX_THROTTLE_WAIT)] max_wait_time: Duration,
        #[builder(default = BackoffPolicy::throttle_fallback())] fallback_backoff: BackoffPolicy,
    ) -> Self {
        Self { max_retry_attempts, max_wait_time, fallback_backoff }
    }
}

/// Configuration for the resilience layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientConfig {
    /// Account endpoint used until topology is known.
    pub(crate) default_endpoint: Url,

    /// Region names in order of preference.
    pub(crate) preferred_regions: Vec<String>,

    /// Send writes to every write region instead of only the first.
    pub(crate) use_multiple_write_locations: bool,

    /// Consistency requested for operations.
    pub(crate) consistency: ConsistencyLevel,

    /// How long a failed endpoint stays marked unavailable.
    #[serde(with = "humantime_serde")]
    pub(crate) endpoint_unavailability_ttl: Duration,

    /// Interval of the background topology refresh.
    #[serde(with = "humantime_serde")]
    pub(crate) topology_refresh_interval: Duration,

    /// Bound on endpoint failover retries for one operation.
    pub(crate) max_endpoint_failover_retries: u32,

    /// Hard ceiling on charged send attempts for one operation.
    pub(crate) max_operation_attempts: u32,

    /// Stale-routing retry bounds.
    pub(crate) gone: GoneRetryOptions,

    /// Throttling retry bounds.
    pub(crate) throttle: ThrottleRetryOptions,

    /// Backoff for topology and routing metadata calls.
    pub(crate) metadata_retry: BackoffPolicy,
}

impl ClientConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Parses and validates a TOML configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the TOML is malformed or any value
    /// fails validation.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: ClientConfigFile = toml::from_str(raw)
            .map_err(|err| ConfigSnafu { message: err.to_string() }.build())?;

        let mut builder = Self::builder()
            .with_default_endpoint(file.default_endpoint)
            .with_preferred_regions(file.preferred_regions)
            .with_multiple_write_locations(file.use_multiple_write_locations)
            .with_consistency(file.consistency);
        if let Some(ttl) = file.endpoint_unavailability_ttl {
            builder = builder.with_endpoint_unavailability_ttl(ttl);
        }
        if let Some(interval) = file.topology_refresh_interval {
            builder = builder.with_topology_refresh_interval(interval);
        }
        if let Some(retries) = file.max_endpoint_failover_retries {
            builder = builder.with_max_endpoint_failover_retries(retries);
        }
        if let Some(attempts) = file.max_operation_attempts {
            builder = builder.with_max_operation_attempts(attempts);
        }
        if let Some(gone) = file.gone {
            builder = builder.with_gone_retry(gone);
        }
        if let Some(throttle) = file.throttle {
            builder = builder.with_throttle_retry(throttle);
        }
        if let Some(metadata) = file.metadata_retry {
            builder = builder.with_metadata_retry(metadata);
        }
        builder.build()
    }

    /// Returns the default account endpoint.
    #[must_use]
    pub fn default_endpoint(&self) -> &Url {
        &self.default_endpoint
    }

    /// Returns the preferred regions in order.
    #[must_use]
    pub fn preferred_regions(&self) -> &[String] {
        &self.preferred_regions
    }

    /// Returns whether writes may use every write region.
    #[must_use]
    pub fn use_multiple_write_locations(&self) -> bool {
        self.use_multiple_write_locations
    }

    /// Returns the requested consistency level.
    #[must_use]
    pub fn consistency(&self) -> ConsistencyLevel {
        self.consistency
    }

    /// Returns how long a failed endpoint stays marked unavailable.
    #[must_use]
    pub fn endpoint_unavailability_ttl(&self) -> Duration {
        self.endpoint_unavailability_ttl
    }

    /// Returns the background topology refresh interval.
    #[must_use]
    pub fn topology_refresh_interval(&self) -> Duration {
        self.topology_refresh_interval
    }

    /// Returns the bound on endpoint failover retries.
    #[must_use]
    pub fn max_endpoint_failover_retries(&self) -> u32 {
        self.max_endpoint_failover_retries
    }

    /// Returns the ceiling on charged send attempts.
    #[must_use]
    pub fn max_operation_attempts(&self) -> u32 {
        self.max_operation_attempts
    }

    /// Returns the stale-routing retry options.
    #[must_use]
    pub fn gone_retry(&self) -> &GoneRetryOptions {
        &self.gone
    }

    /// Returns the throttling retry options.
    #[must_use]
    pub fn throttle_retry(&self) -> &ThrottleRetryOptions {
        &self.throttle
    }

    /// Returns the metadata call backoff.
    #[must_use]
    pub fn metadata_retry(&self) -> &BackoffPolicy {
        &self.metadata_retry
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    default_endpoint: Option<String>,
    preferred_regions: Vec<String>,
    use_multiple_write_locations: bool,
    consistency: ConsistencyLevel,
    endpoint_unavailability_ttl: Option<Duration>,
    topology_refresh_interval: Option<Duration>,
    max_endpoint_failover_retries: Option<u32>,
    max_operation_attempts: Option<u32>,
    gone: Option<GoneRetryOptions>,
    throttle: Option<ThrottleRetryOptions>,
    metadata_retry: Option<BackoffPolicy>,
}

impl ClientConfigBuilder {
    /// Sets the account endpoint used until topology is known.
    #[must_use]
    pub fn with_default_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.default_endpoint = Some(endpoint.into());
        self
    }

    /// Sets the preferred regions, most preferred first.
    #[must_use]
    pub fn with_preferred_regions<I, S>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preferred_regions = regions.into_iter().map(Into::into).collect();
        self
    }

    /// Allows writes to use every write region of a multi-write account.
    ///
    /// Default: disabled.
    #[must_use]
    pub fn with_multiple_write_locations(mut self, enabled: bool) -> Self {
        self.use_multiple_write_locations = enabled;
        self
    }

    /// Sets the consistency level.
    ///
    /// Default: [`ConsistencyLevel::Session`].
    #[must_use]
    pub fn with_consistency(mut self, consistency: ConsistencyLevel) -> Self {
        self.consistency = consistency;
        self
    }

    /// Sets how long a failed endpoint stays marked unavailable.
    ///
    /// Default: 5 minutes.
    #[must_use]
    pub fn with_endpoint_unavailability_ttl(mut self, ttl: Duration) -> Self {
        self.endpoint_unavailability_ttl = Some(ttl);
        self
    }

    /// Sets the background topology refresh interval.
    ///
    /// Default: 5 minutes.
    #[must_use]
    pub fn with_topology_refresh_interval(mut self, interval: Duration) -> Self {
        self.topology_refresh_interval = Some(interval);
        self
    }

    /// Sets the bound on endpoint failover retries.
    ///
    /// Default: 3.
    #[must_use]
    pub fn with_max_endpoint_failover_retries(mut self, retries: u32) -> Self {
        self.max_endpoint_failover_retries = Some(retries);
        self
    }

    /// Sets the ceiling on charged send attempts for one operation.
    ///
    /// Default: 16.
    #[must_use]
    pub fn with_max_operation_attempts(mut self, attempts: u32) -> Self {
        self.max_operation_attempts = Some(attempts);
        self
    }

    /// Sets the stale-routing retry options.
    #[must_use]
    pub fn with_gone_retry(mut self, options: GoneRetryOptions) -> Self {
        self.gone = Some(options);
        self
    }

    /// Sets the throttling retry options.
    #[must_use]
    pub fn with_throttle_retry(mut self, options: ThrottleRetryOptions) -> Self {
        self.throttle = Some(options);
        self
    }

    /// Sets the backoff for metadata calls.
    #[must_use]
    pub fn with_metadata_retry(mut self, policy: BackoffPolicy) -> Self {
        self.metadata_retry = Some(policy);
        self
    }

    /// Builds the configuration, validating all settings.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No default endpoint is provided, or it is not an absolute HTTP(S) URL
    /// - A preferred region name is empty
    /// - The unavailability TTL or topology refresh interval is zero
    /// - The unavailability TTL exceeds 24 hours
    /// - `max_operation_attempts` is zero
    /// - A backoff policy is inconsistent
    pub fn build(self) -> Result<ClientConfig> {
        let raw = self
            .default_endpoint
            .ok_or_else(|| ConfigSnafu { message: "default_endpoint is required" }.build())?;
        let default_endpoint = parse_endpoint(&raw)?;

        ensure!(
            self.preferred_regions.iter().all(|region| !region.trim().is_empty()),
            ConfigSnafu { message: "preferred region names cannot be empty" }
        );

        let endpoint_unavailability_ttl =
            self.endpoint_unavailability_ttl.unwrap_or(DEFAULT_UNAVAILABILITY_TTL);
        ensure!(
            !endpoint_unavailability_ttl.is_zero(),
            ConfigSnafu { message: "endpoint_unavailability_ttl cannot be zero" }
        );
        ensure!(
            endpoint_unavailability_ttl <= MAX_UNAVAILABILITY_TTL,
            ConfigSnafu { message: "endpoint_unavailability_ttl cannot exceed 24h" }
        );

        let topology_refresh_interval =
            self.topology_refresh_interval.unwrap_or(DEFAULT_TOPOLOGY_REFRESH_INTERVAL);
        ensure!(
            !topology_refresh_interval.is_zero(),
            ConfigSnafu { message: "topology_refresh_interval cannot be zero" }
        );

        let max_operation_attempts =
            self.max_operation_attempts.unwrap_or(DEFAULT_MAX_OPERATION_ATTEMPTS);
        ensure!(
            max_operation_attempts > 0,
            ConfigSnafu { message: "max_operation_attempts must be at least 1" }
        );

        let throttle = self.throttle.unwrap_or_default();
        throttle.fallback_backoff.validate("throttle.fallback_backoff")?;

        let metadata_retry = self.metadata_retry.unwrap_or_default();
        metadata_retry.validate("metadata_retry")?;

        Ok(ClientConfig {
            default_endpoint,
            preferred_regions: self.preferred_regions,
            use_multiple_write_locations: self.use_multiple_write_locations,
            consistency: self.consistency,
            endpoint_unavailability_ttl,
            topology_refresh_interval,
            max_endpoint_failover_retries: self
                .max_endpoint_failover_retries
                .unwrap_or(DEFAULT_MAX_ENDPOINT_FAILOVER_RETRIES),
            max_operation_attempts,
            gone: self.gone.unwrap_or_default(),
            throttle,
            metadata_retry,
        })
    }
}

/// TOML shape of [`ClientConfig`]; optional fields fall back to defaults.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClientConfigFile {
    default_endpoint: String,
    #[serde(default)]
    preferred_regions: Vec<String>,
    #[serde(default)]
    use_multiple_write_locations: bool,
    #[serde(default)]
    consistency: ConsistencyLevel,
    #[serde(default, with = "humantime_serde::option")]
    endpoint_unavailability_ttl: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    topology_refresh_interval: Option<Duration>,
    max_endpoint_failover_retries: Option<u32>,
    max_operation_attempts: Option<u32>,
    gone: Option<GoneRetryOptions>,
    throttle: Option<ThrottleRetryOptions>,
    metadata_retry: Option<BackoffPolicy>,
}

/// Parses an endpoint, requiring an absolute HTTP(S) URL with a host.
pub(crate) fn parse_endpoint(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|err| InvalidUrlSnafu { url: raw, message: err.to_string() }.build())?;

    if !matches!(url.scheme(), "http" | "https") {
        return InvalidUrlSnafu { url: raw, message: "URL must start with http:// or https://" }
            .fail();
    }
    if url.host_str().is_none_or(str::is_empty) {
        return InvalidUrlSnafu { url: raw, message: "URL must have a host" }.fail();
    }

    Ok(url)
}

/// Duration serialization using humantime format.
mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer};

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error::SdkError;

    fn base() -> ClientConfigBuilder {
        ClientConfig::builder().with_default_endpoint("https://account.example.com:443/")
    }

    #[test]
    fn test_defaults() {
        let config = base().build().expect("valid config");
        assert_eq!(config.default_endpoint().as_str(), "https://account.example.com/");
        assert!(config.preferred_regions().is_empty());
        assert_eq!(config.consistency(), ConsistencyLevel::Session);
        assert_eq!(config.endpoint_unavailability_ttl(), Duration::from_secs(300));
        assert_eq!(config.max_endpoint_failover_retries(), 3);
        assert_eq!(config.gone_retry().max_retries, 3);
        assert_eq!(config.gone_retry().min_routing_refresh_interval, Duration::from_secs(30));
        assert_eq!(config.throttle_retry().max_retry_attempts, 9);
        assert_eq!(config.throttle_retry().max_wait_time, Duration::from_secs(30));
        assert_eq!(config.max_operation_attempts(), 16);
    }

    #[test]
    fn test_missing_endpoint_rejected() {
        let err = ClientConfig::builder().build().unwrap_err();
        assert!(matches!(err, SdkError::Config { .. }));
    }

    #[test]
    fn test_non_http_endpoint_rejected() {
        let err = ClientConfig::builder().with_default_endpoint("ftp://x").build().unwrap_err();
        assert!(matches!(err, SdkError::InvalidUrl { .. }));

        let err = ClientConfig::builder().with_default_endpoint("not a url").build().unwrap_err();
        assert!(matches!(err, SdkError::InvalidUrl { .. }));
    }

    #[test]
    fn test_empty_region_rejected() {
        let err = base().with_preferred_regions(["West US", " "]).build().unwrap_err();
        assert!(err.to_string().contains("preferred region"));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let err = base().with_endpoint_unavailability_ttl(Duration::ZERO).build().unwrap_err();
        assert!(err.to_string().contains("endpoint_unavailability_ttl"));
    }

    #[test]
    fn test_oversized_ttl_rejected() {
        let err = base()
            .with_endpoint_unavailability_ttl(Duration::from_secs(u64::MAX))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("cannot exceed"));
        assert!(base().with_endpoint_unavailability_ttl(Duration::from_secs(86_400)).build().is_ok());
    }

    #[test]
    fn test_gone_refresh_interval_is_tunable() {
        let config = base()
            .with_gone_retry(
                GoneRetryOptions::builder()
                    .min_routing_refresh_interval(Duration::from_secs(1))
                    .build(),
            )
            .build()
            .unwrap();
        assert_eq!(config.gone_retry().min_routing_refresh_interval, Duration::from_secs(1));
        assert_eq!(config.gone_retry().max_retries, 3);
    }

    #[test]
    fn test_invalid_backoff_rejected() {
        let err = base()
            .with_metadata_retry(BackoffPolicy::builder().jitter(1.5).build())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("metadata_retry.jitter"));
    }

    #[test]
    fn test_backoff_delay_grows_and_caps() {
        let policy = BackoffPolicy::builder()
            .initial_backoff(Duration::from_millis(10))
            .max_backoff(Duration::from_millis(50))
            .multiplier(2.0)
            .build();
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for_retry(3), Duration::from_millis(40));
        assert_eq!(policy.delay_for_retry(4), Duration::from_millis(50));
    }

    #[test]
    fn test_from_toml() {
        let config = ClientConfig::from_toml_str(
            r#"
            default_endpoint = "https://account.example.com/"
            preferred_regions = ["West US", "East US"]
            consistency = "Eventual"
            endpoint_unavailability_ttl = "1m"

            [gone]
            max_retries = 2
            min_routing_refresh_interval = "1s"
            "#,
        )
        .expect("valid toml");

        assert_eq!(config.preferred_regions(), ["West US", "East US"]);
        assert_eq!(config.consistency(), ConsistencyLevel::Eventual);
        assert_eq!(config.endpoint_unavailability_ttl(), Duration::from_secs(60));
        assert_eq!(config.gone_retry().max_retries, 2);
        assert_eq!(config.gone_retry().min_routing_refresh_interval, Duration::from_secs(1));
        assert_eq!(config.throttle_retry().max_retry_attempts, 9);
    }

    #[test]
    fn test_from_toml_rejects_unknown_fields() {
        let err = ClientConfig::from_toml_str(
            r#"
            default_endpoint = "https://account.example.com/"
            retry_forever = true
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, SdkError::Config { .. }));
    }
}
