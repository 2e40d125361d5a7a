//! Engine configuration from environment variables.

use std::env;

use crate::domain::ProvisioningPolicy;

/// Service name used when none is configured.
pub const DEFAULT_SERVICE_NAME: &str = "unknown-service";

/// Default number of handlers running at once per subscription.
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// Deployment environment the process runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeploymentEnvironment {
    Production,
    Staging,
    #[default]
    Development,
    Test,
}

impl DeploymentEnvironment {
    /// Parse an environment name; unknown names are development.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "staging" | "stage" => Self::Staging,
            "test" => Self::Test,
            _ => Self::Development,
        }
    }

    #[must_use]
    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }

    /// Provisioning policy implied by this environment.
    pub fn provisioning_policy(self) -> ProvisioningPolicy {
        if self.is_production() {
            ProvisioningPolicy::RequireExisting
        } else {
            ProvisioningPolicy::AutoProvision
        }
    }
}

/// Configuration for an [`EventBus`](crate::EventBus).
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Stamped into every envelope's `source`
    pub service_name: String,

    /// Deployment environment
    pub environment: DeploymentEnvironment,

    /// Whether missing topics/subscriptions may be created
    pub provisioning: ProvisioningPolicy,

    /// Default worker-pool size per subscription
    pub max_concurrency: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            environment: DeploymentEnvironment::Development,
            provisioning: ProvisioningPolicy::AutoProvision,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl BusConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SERVICE_NAME`: Envelope source (default: unknown-service)
    /// - `DEPLOY_ENV` or `APP_ENV`: production/staging/test/development (default: development)
    /// - `BUS_MAX_CONCURRENCY`: Handlers per subscription (default: 16)
    pub fn from_env() -> Self {
        let environment = env::var("DEPLOY_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .map(|v| DeploymentEnvironment::parse(&v))
            .unwrap_or_default();

        Self {
            service_name: env::var("SERVICE_NAME")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),

            environment,

            provisioning: environment.provisioning_policy(),

            max_concurrency: env::var("BUS_MAX_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_MAX_CONCURRENCY),
        }
    }

    /// Configuration for a named service in a given environment.
    pub fn for_service(service_name: &str, environment: DeploymentEnvironment) -> Self {
        Self {
            service_name: service_name.to_string(),
            environment,
            provisioning: environment.provisioning_policy(),
            ..Default::default()
        }
    }

    pub fn with_provisioning(mut self, policy: ProvisioningPolicy) -> Self {
        self.provisioning = policy;
        self
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit.max(1);
        self
    }
}
