//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Fixed delay before retrying a pass whose namespace, ServiceAccount,
/// RoleBinding or ClusterRoleBinding write failed (milliseconds)
pub const DEFAULT_OBJECT_RETRY_DELAY_MS: u64 = 500;

/// Default exponential backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 300_000;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;

/// Default number of RBACRules reconciled in parallel
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 10;

/// Namespace given to ServiceAccount subjects and role bindings that select none
pub const DEFAULT_FALLBACK_NAMESPACE: &str = "default";

/// Finalizer that holds an RBACRule until its generated objects are swept
pub const RBAC_RULE_FINALIZER: &str = "rbac-controller.io/cleanup-rbac-rule";

/// Label carried by every generated object, naming the RBACRule that owns it
pub const OWNER_LABEL: &str = "rbac-controller.io/rbac-rule";

/// Field manager recorded on every write
pub const FIELD_MANAGER: &str = "rbac-rule-controller";

/// API group of Role, ClusterRole and of User/Group subjects
pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";
