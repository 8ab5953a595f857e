mod tests;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use runtime_conformance::logger::{self, LoggerConfig};
use runtime_conformance::support::{set_init_path, set_rootfs_tarball, set_runtime_path};
use test_framework::{Summary, TestManager};

use crate::tests::exec::get_exec_test;
use crate::tests::lifecycle::get_lifecycle_test;
use crate::tests::mounts::get_mounts_test;
use crate::tests::spec_command::get_spec_test;

#[derive(Parser, Debug)]
#[clap(version = "0.1.0", about = "Mount and exec conformance tests for OCI runtimes")]
struct Opts {
    /// Enables debug output
    #[clap(short, long)]
    debug: bool,

    /// Log level, or a list of tracing directives. Takes precedence over --debug
    #[clap(long)]
    log_level: Option<String>,

    /// Log format, text or json
    #[clap(long)]
    log_format: Option<String>,

    #[clap(subcommand)]
    command: SubCommand,
}

impl From<&Opts> for LoggerConfig {
    fn from(opts: &Opts) -> Self {
        Self {
            log_debug_flag: opts.debug,
            log_level: opts.log_level.to_owned(),
            log_format: opts.log_format.to_owned(),
        }
    }
}

#[derive(Parser, Debug)]
enum SubCommand {
    /// run the conformance tests
    Run(Run),
    /// list available test groups
    List,
}

#[derive(Parser, Debug)]
struct Run {
    /// Path or name of the container runtime to be tested
    #[clap(long)]
    runtime: PathBuf,
    /// Path of the statically linked helper installed as /init in every container
    #[clap(long)]
    init: PathBuf,
    /// Optional rootfs.tar.gz unpacked into every bundle before /init is added
    #[clap(long)]
    rootfs_tarball: Option<PathBuf>,
    /// Selected tests to be run, format should be
    /// space separated groups, eg
    /// -t group1::test1,test3 group2 group3::test5
    #[clap(short, long, num_args(1..), value_delimiter = ' ')]
    tests: Option<Vec<String>>,
}

// parse test string given in commandline option as pair of testgroup name
// and tests belonging to that
fn parse_tests(tests: &[String]) -> Vec<(&str, Option<Vec<&str>>)> {
    tests
        .iter()
        .map(|test| match test.split_once("::") {
            Some((group, names)) => (group, Some(names.split(',').collect())),
            None => (test.as_str(), None),
        })
        .collect()
}

fn main() -> Result<()> {
    let opts: Opts = Opts::parse();

    if let Err(e) = logger::init(&opts) {
        eprintln!("logger could not be initialized: {e:?}");
    }

    let mut tm = TestManager::new();
    tm.add_test_group(Box::new(get_mounts_test()));
    tm.add_test_group(Box::new(get_exec_test()));
    tm.add_test_group(Box::new(get_lifecycle_test()));
    tm.add_test_group(Box::new(get_spec_test()));

    match opts.command {
        SubCommand::Run(args) => {
            let summary = run(args, &tm).context("run tests")?;
            tracing::info!(
                passed = summary.passed,
                failed = summary.failed,
                skipped = summary.skipped,
                "finished"
            );
            std::process::exit(summary.exit_code());
        }
        SubCommand::List => list(&tm).context("list tests")?,
    }

    Ok(())
}

fn get_abs_path(rel_path: &Path) -> Result<PathBuf> {
    match std::fs::canonicalize(rel_path) {
        // path is relative or resolved correctly
        Ok(path) => Ok(path),
        // path is name of program which probably exists in $PATH
        Err(_) => which::which(rel_path).with_context(|| format!("could not find {rel_path:?}")),
    }
}

fn run(opts: Run, test_manager: &TestManager) -> Result<Summary> {
    set_runtime_path(&get_abs_path(&opts.runtime)?)?;
    set_init_path(&get_abs_path(&opts.init)?)?;
    let tarball = opts
        .rootfs_tarball
        .as_deref()
        .map(std::fs::canonicalize)
        .transpose()
        .context("could not resolve rootfs tarball")?;
    set_rootfs_tarball(tarball.as_deref())?;

    let summary = match opts.tests {
        Some(tests) => test_manager.run_selected(parse_tests(&tests)),
        None => test_manager.run_all(),
    };
    Ok(summary)
}

fn list(test_manager: &TestManager) -> Result<()> {
    for test_group in test_manager.tests_groups() {
        println!("{test_group}");
    }

    Ok(())
}
