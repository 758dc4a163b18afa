pub mod tekton;
pub mod v1;
