//! # CRD Generator
//!
//! Prints the `RBACRule` CustomResourceDefinition as YAML.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/rbacrule.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use kube::core::CustomResourceExt;
use rbac_rule_controller::crd::RBACRule;

fn main() -> Result<(), serde_yaml::Error> {
    let yaml = serde_yaml::to_string(&RBACRule::crd())?;
    println!("# Generated by crdgen; do not edit by hand");
    print!("{yaml}");
    Ok(())
}
