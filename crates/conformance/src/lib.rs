pub mod driver;
pub mod error;
pub mod logger;
pub mod matrix;
pub mod mountinfo;
pub mod spec;
pub mod support;

pub use driver::{CliRuntime, ContainerInstance, Guarded, InstanceState, Runtime, RuntimeDriver};
pub use error::{expect_failure, DriverError, MountInfoError};
