//! Client configuration with builder pattern.
//!
//! Provides type-safe configuration for table clients including:
//! - Target table and app profile
//! - Retry policies
//! - Metrics sink

use std::{fmt, sync::Arc, time::Duration};

use snafu::ensure;

use crate::{
    error::{ConfigSnafu, Result},
    metrics::{NoopSdkMetrics, SdkMetrics},
};

/// Configuration for a [`TableClient`](crate::TableClient).
#[derive(Clone)]
pub struct ClientConfig {
    /// Fully qualified table name, `projects/{p}/instances/{i}/tables/{t}`.
    pub(crate) table_name: String,

    /// App profile used to route requests, if any.
    pub(crate) app_profile_id: Option<String>,

    /// Retry policy for transient failures.
    pub(crate) retry_policy: RetryPolicy,

    /// Metrics sink.
    pub(crate) metrics: Arc<dyn SdkMetrics>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("table_name", &self.table_name)
            .field("app_profile_id", &self.app_profile_id)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Returns the table name.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Returns the app profile identifier.
    #[must_use]
    pub fn app_profile_id(&self) -> Option<&str> {
        self.app_profile_id.as_deref()
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Returns the metrics sink.
    #[must_use]
    pub fn metrics(&self) -> &Arc<dyn SdkMetrics> {
        &self.metrics
    }
}

/// Builder for [`ClientConfig`].
#[derive(Default)]
pub struct ClientConfigBuilder {
    table_name: Option<String>,
    app_profile_id: Option<String>,
    retry_policy: Option<RetryPolicy>,
    metrics: Option<Arc<dyn SdkMetrics>>,
}

impl ClientConfigBuilder {
    /// Sets the fully qualified table name.
    #[must_use]
    pub fn with_table_name<S: Into<String>>(mut self, table_name: S) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    /// Sets the app profile identifier.
    #[must_use]
    pub fn with_app_profile_id<S: Into<String>>(mut self, app_profile_id: S) -> Self {
        self.app_profile_id = Some(app_profile_id.into());
        self
    }

    /// Sets the retry policy for transient failures.
    ///
    /// Default: [`RetryPolicy::default()`].
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Sets the metrics sink.
    ///
    /// Default: [`NoopSdkMetrics`].
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn SdkMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds the configuration, validating all settings.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The table name is missing or not of the form `projects/*/instances/*/tables/*`
    /// - The app profile identifier is set but empty
    /// - The retry policy allows zero attempts, has a negative jitter, or a multiplier below 1
    pub fn build(self) -> Result<ClientConfig> {
        let table_name = self
            .table_name
            .ok_or_else(|| ConfigSnafu { message: "table_name is required" }.build())?;
        validate_table_name(&table_name)?;

        if let Some(ref profile) = self.app_profile_id {
            ensure!(!profile.is_empty(), ConfigSnafu { message: "app_profile_id cannot be empty" });
        }

        let retry_policy = self.retry_policy.unwrap_or_default();
        ensure!(
            retry_policy.max_attempts >= 1,
            ConfigSnafu { message: "retry_policy.max_attempts must be at least 1" }
        );
        ensure!(
            (0.0..=1.0).contains(&retry_policy.jitter),
            ConfigSnafu { message: "retry_policy.jitter must be between 0.0 and 1.0" }
        );
        ensure!(
            retry_policy.multiplier >= 1.0,
            ConfigSnafu { message: "retry_policy.multiplier must be at least 1.0" }
        );

        Ok(ClientConfig {
            table_name,
            app_profile_id: self.app_profile_id,
            retry_policy,
            metrics: self.metrics.unwrap_or_else(|| Arc::new(NoopSdkMetrics)),
        })
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    pub max_attempts: u32,

    /// Initial backoff duration before first retry.
    pub initial_backoff: Duration,

    /// Maximum backoff duration.
    pub max_backoff: Duration,

    /// Backoff multiplier for exponential increase.
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0) for randomizing backoff.
    pub jitter: f64,
}

impl Default for RetryPolicy {
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

impl RetryPolicy {
    /// Creates a new retry policy builder.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// Creates a policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, ..Default::default() }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    max_attempts: Option<u32>,
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    multiplier: Option<f64>,
    jitter: Option<f64>,
}

impl RetryPolicyBuilder {
    /// Sets the maximum number of attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Sets the initial backoff duration.
    #[must_use]
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = Some(backoff);
        self
    }

    /// Sets the maximum backoff duration.
    #[must_use]
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = Some(backoff);
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Sets the jitter factor (0.0 to 1.0).
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Builds the retry policy.
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            initial_backoff: self.initial_backoff.unwrap_or(defaults.initial_backoff),
            max_backoff: self.max_backoff.unwrap_or(defaults.max_backoff),
            multiplier: self.multiplier.unwrap_or(defaults.multiplier),
            jitter: self.jitter.unwrap_or(defaults.jitter),
        }
    }
}

/// Validates that a table name has the form `projects/{p}/instances/{i}/tables/{t}`.
fn validate_table_name(name: &str) -> Result<()> {
    let segments: Vec<&str> = name.split('/').collect();
    let well_formed = segments.len() == 6
        && segments[0] == "projects"
        && segments[2] == "instances"
        && segments[4] == "tables"
        && [segments[1], segments[3], segments[5]].iter().all(|s| !s.is_empty());

    ensure!(
        well_formed,
        ConfigSnafu {
            message: format!(
                "table_name '{name}' must have the form projects/{{project}}/instances/{{instance}}/tables/{{table}}"
            )
        }
    );
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::error::SdkError;

    const TABLE: &str = "projects/p/instances/i/tables/t";

    #[test]
    fn test_build_with_defaults() {
        let config = ClientConfig::builder().with_table_name(TABLE).build().unwrap();
        assert_eq!(config.table_name(), TABLE);
        assert_eq!(config.app_profile_id(), None);
        assert_eq!(config.retry_policy().max_attempts, 3);
    }

    #[test]
    fn test_build_with_app_profile() {
        let config = ClientConfig::builder()
            .with_table_name(TABLE)
            .with_app_profile_id("batch")
            .build()
            .unwrap();
        assert_eq!(config.app_profile_id(), Some("batch"));
    }

    #[test]
    fn test_missing_table_name() {
        let err = ClientConfig::builder().build().unwrap_err();
        assert!(matches!(err, SdkError::Config { .. }));
    }

    #[test]
    fn test_malformed_table_names() {
        for name in [
            "",
            "my-table",
            "projects/p/instances/i/tables/",
            "projects//instances/i/tables/t",
            "projects/p/clusters/i/tables/t",
            "projects/p/instances/i/tables/t/extra",
        ] {
            let result = ClientConfig::builder().with_table_name(name).build();
            assert!(matches!(result, Err(SdkError::Config { .. })), "{name:?} should be rejected");
        }
    }

    #[test]
    fn test_empty_app_profile_rejected() {
        let result = ClientConfig::builder().with_table_name(TABLE).with_app_profile_id("").build();
        assert!(matches!(result, Err(SdkError::Config { .. })));
    }

    #[test]
    fn test_zero_attempt_policy_rejected() {
        let policy = RetryPolicy::builder().with_max_attempts(0).build();
        let result = ClientConfig::builder().with_table_name(TABLE).with_retry_policy(policy).build();
        assert!(matches!(result, Err(SdkError::Config { .. })));
    }

    #[test]
    fn test_invalid_jitter_rejected() {
        let policy = RetryPolicy::builder().with_jitter(1.5).build();
        let result = ClientConfig::builder().with_table_name(TABLE).with_retry_policy(policy).build();
        assert!(matches!(result, Err(SdkError::Config { .. })));
    }

    #[test]
    fn test_retry_policy_builder_overrides() {
        let policy = RetryPolicy::builder()
            .with_max_attempts(5)
            .with_initial_backoff(Duration::from_millis(5))
            .with_max_backoff(Duration::from_millis(50))
            .with_multiplier(3.0)
            .with_jitter(0.0)
            .build();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_millis(5));
        assert_eq!(policy.max_backoff, Duration::from_millis(50));
        assert_eq!(policy.multiplier, 3.0);
        assert_eq!(policy.jitter, 0.0);
    }

    #[test]
    fn test_no_retry_policy() {
        assert_eq!(RetryPolicy::no_retry().max_attempts, 1);
    }
}
