pub mod spec_command;

use anyhow::{Context, Result};
use oci_spec::runtime::Spec;
use runtime_conformance::RuntimeDriver;

/// Runs `spec` in a fresh bundle until its process exits and returns what it
/// printed. The container is deleted before this returns.
pub fn run_to_completion(spec: &Spec, hide_stderr: bool) -> Result<String> {
    let (bundle, driver) = RuntimeDriver::with_new_bundle()?;
    let (out, _instance) = driver
        .run_and_get_output(spec, &bundle, false, hide_stderr)
        .context("failed to run container")?;
    Ok(out)
}
