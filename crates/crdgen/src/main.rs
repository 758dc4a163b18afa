use kube::CustomResourceExt as _;
use l2c_migration::api::v1::l2c::L2c;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&L2c::crd())?);
    Ok(())
}
