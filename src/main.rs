//! # RBACRule Controller
//!
//! A Kubernetes controller that turns `RBACRule` resources into RoleBindings,
//! ClusterRoleBindings and ServiceAccounts.
//!
//! ## Overview
//!
//! 1. **Resolving namespaces** - explicit lists, label selectors and match expressions
//! 2. **Expanding bindings** - subjects cross role references cross namespaces
//! 3. **Converging objects** - idempotent create-or-update with ownership labels
//! 4. **Time windows** - activation is deferred until `startTime`; the rule is deleted after `endTime`
//! 5. **Cleanup** - a finalizer removes every generated object before the rule goes away
//!
//! Configuration comes from environment variables (see [`ControllerConfig::from_env`]);
//! the flags below override them.

use anyhow::Result;
use clap::Parser;
use rbac_rule_controller::config::{ControllerConfig, LogFormat};
use rbac_rule_controller::runtime::initialization::initialize;
use rbac_rule_controller::runtime::watch_loop::run_watch_loop;

/// RBACRule controller
#[derive(Debug, Parser)]
#[command(name = "rbac-rule-controller", version, about, long_about = None)]
struct Cli {
    /// Port for `/metrics`, `/healthz` and `/readyz`
    #[arg(long, env = "METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum)]
    log_format: Option<LogFormat>,

    /// Namespace used when a binding selects none
    #[arg(long, env = "DEFAULT_NAMESPACE")]
    default_namespace: Option<String>,
}

impl Cli {
    fn into_config(self) -> ControllerConfig {
        let mut config = ControllerConfig::from_env();
        if let Some(port) = self.metrics_port {
            config.metrics_port = port;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        if let Some(namespace) = self.default_namespace {
            config.default_namespace = namespace;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Cli::parse().into_config();

    let init = initialize(config).await?;
    run_watch_loop(init.client, init.rules, init.reconciler, init.server_state).await
}
