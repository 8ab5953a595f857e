use anyhow::{bail, Context, Result};
use oci_spec::runtime::Spec;
use runtime_conformance::{expect_failure, RuntimeDriver};
use test_framework::{Test, TestGroup};

fn spec_generates_config() -> Result<()> {
    let (_bundle, driver) = RuntimeDriver::with_new_bundle()?;
    let dir = tempfile::tempdir()?;
    driver.generate_spec(dir.path())?;

    let config = dir.path().join("config.json");
    if !config.exists() {
        bail!("spec did not write {config:?}");
    }
    let spec = Spec::load(&config).context("generated config.json is not a valid runtime spec")?;
    if spec.process().is_none() || spec.root().is_none() {
        bail!("generated config lacks process or root: {spec:?}");
    }
    Ok(())
}

fn spec_refuses_overwrite() -> Result<()> {
    let (_bundle, driver) = RuntimeDriver::with_new_bundle()?;
    let dir = tempfile::tempdir()?;
    driver
        .generate_spec(dir.path())
        .context("first spec invocation failed")?;
    let before = std::fs::read(dir.path().join("config.json"))?;
    expect_failure(driver.generate_spec(dir.path()))
        .context("spec must not overwrite an existing config.json")?;
    if std::fs::read(dir.path().join("config.json"))? != before {
        bail!("config.json was modified by the refused invocation");
    }
    Ok(())
}

pub fn get_spec_test() -> TestGroup {
    let mut test_group = TestGroup::new("spec");
    test_group.add(vec![
        Box::new(Test::new(
            "spec-generates-config",
            Box::new(|| spec_generates_config().into()),
        )),
        Box::new(Test::new(
            "spec-refuses-overwrite",
            Box::new(|| spec_refuses_overwrite().into()),
        )),
    ]);
    test_group
}
