//! Prints the Ivory CRD manifests as a multi-document YAML stream.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/ivory.yaml`

use crds::{IvoryCluster, IvoryUpgrade};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [IvoryCluster::crd(), IvoryUpgrade::crd()];
    for crd in &crds {
        print!("---\n{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
