//! Small test registration and dispatch framework used by the conformance
//! harness. Tests are grouped, groups are registered on a [`TestManager`],
//! and results are reported in TAP form.
pub mod test;
pub mod test_group;
pub mod test_manager;
pub mod testable;

pub use conditional_test::ConditionalTest;
pub use test::Test;
pub use test_group::TestGroup;
pub use test_manager::{Summary, TestManager};
pub use testable::{TestResult, Testable, TestableGroup};
