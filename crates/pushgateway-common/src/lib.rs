//! Common types for the Pushgateway operator: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod labels;
pub mod retry;
pub mod selector;

pub use config::{ControllerConfig, InjectionConfig, ResourceDefaults};
pub use error::Error;
pub use labels::{merge_labels, LabelSet};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Naming conventions
// =============================================================================

/// Name of the Pushgateway container inside the managed Deployment
pub const CONTAINER_NAME: &str = "pushgateway";

/// Suffix appended to the instance name for the managed Deployment
pub const DEPLOYMENT_SUFFIX: &str = "-pushgateway";

/// Suffix appended to the instance name for the managed Service
pub const SERVICE_SUFFIX: &str = "-pushgateway";

/// Suffix appended to the instance name for the managed ServiceMonitor
pub const SERVICE_MONITOR_SUFFIX: &str = "-pushgateway";

/// Name of the container port, Service port, and ServiceMonitor endpoint port
pub const PORT_NAME: &str = "web";

// =============================================================================
// Defaults
// =============================================================================

/// Default port the Pushgateway listens on
pub const DEFAULT_PORT: i32 = 9091;

/// Default path metrics are pushed to and exposed on
pub const DEFAULT_TELEMETRY_PATH: &str = "/metrics";

/// Default Pushgateway image when neither the spec nor the operator config sets one
pub const DEFAULT_IMAGE: &str = "prom/pushgateway";

// =============================================================================
// Pushgateway arguments
// =============================================================================

/// Enables the admin API
pub const ENABLE_ADMIN_API_ARG: &str = "--web.enable-admin-api";
/// Enables the lifecycle endpoints
pub const ENABLE_LIFECYCLE_ARG: &str = "--web.enable-lifecycle";
/// Listen address prefix, followed by `:<port>`
pub const LISTEN_ADDRESS_ARG: &str = "--web.listen-address=";
/// Telemetry path prefix, followed by the path
pub const TELEMETRY_PATH_ARG: &str = "--web.telemetry-path=";
/// Log level prefix
pub const LOG_LEVEL_ARG: &str = "--log.level=";
/// Log format prefix
pub const LOG_FORMAT_ARG: &str = "--log.format=";

// =============================================================================
// Labels
// =============================================================================

/// Label identifying Pushgateway workloads
pub const LABEL_ROLE: &str = "role";
/// Value of [`LABEL_ROLE`] on every managed resource
pub const LABEL_ROLE_PUSHGATEWAY: &str = "pushgateway";
/// Label carrying the owning Pushgateway name
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";

/// Status value recorded when no Prometheus instance could be resolved
pub const PROMETHEUS_NOT_FOUND: &str = "N/A";

// =============================================================================
// Batch injection
// =============================================================================

/// Environment variable injected into opted-in Job and CronJob containers
pub const PUSHGATEWAY_ENV_VAR: &str = "PUSHGATEWAY";

/// Presence-only label that opts a Job or CronJob into injection
pub const INJECT_LABEL: &str = "inject-pushgateway";

/// Labels generated by the Job controller that block re-creation of a patched Job
pub const GENERATED_JOB_LABELS: &[&str] = &["controller-uid", "batch.kubernetes.io/controller-uid"];

/// Field manager used for status patches
pub const FIELD_MANAGER: &str = "pushgateway-operator";
