//! Prints the MysqlCluster CRD as YAML, ready for `kubectl apply -f -`.

use crds::MysqlCluster;
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&MysqlCluster::crd())?);
    Ok(())
}
