//! Drives the runtime under test through its command line.
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::sleep;
use std::time::Duration;

use oci_spec::runtime::{Process, Spec};
use scopeguard::ScopeGuard;
use serde::{Deserialize, Serialize};

use crate::error::DriverError;
use crate::spec::{save_config, save_process};
use crate::support::{generate_id, get_runtime_path, prepare_bundle, Bundle};

const SLEEP_TIME: Duration = Duration::from_millis(150);
const MAX_STATE_POLLS: usize = 40;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct State {
    pub oci_version: String,
    pub id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    pub bundle: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
}

/// Arguments of one runtime invocation, without the global `--root`
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub args: Vec<OsString>,
    /// discard stderr instead of capturing it
    pub hide_stderr: bool,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Invocation {
            args: args.into_iter().map(|a| a.as_ref().to_owned()).collect(),
            hide_stderr: false,
            cwd: None,
        }
    }

    pub fn hide_stderr(mut self, hide: bool) -> Self {
        self.hide_stderr = hide;
        self
    }

    pub fn current_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn command_line(&self) -> String {
        self.args
            .iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    /// None when the runtime was killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Captured {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// stdout followed by stderr, the way a terminal would show them
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        out.push_str(&self.stderr);
        out
    }

    fn into_result(self, inv: &Invocation) -> Result<Self, DriverError> {
        if self.success() {
            return Ok(self);
        }
        Err(DriverError::NonZeroExit {
            command: inv.command_line(),
            code: self.status,
            stdout: self.stdout,
            stderr: self.stderr,
        })
    }
}

/// The container runtime under test
pub trait Runtime {
    fn invoke(&self, inv: &Invocation) -> Result<Captured, DriverError>;
}

/// Runtime binary invoked as `<binary> --root <root> <args...>`
#[derive(Debug, Clone)]
pub struct CliRuntime {
    binary: PathBuf,
    root: PathBuf,
}

impl CliRuntime {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(binary: P, root: Q) -> Self {
        CliRuntime {
            binary: binary.into(),
            root: root.into(),
        }
    }
}

impl Runtime for CliRuntime {
    fn invoke(&self, inv: &Invocation) -> Result<Captured, DriverError> {
        tracing::debug!(runtime = ?self.binary, args = %inv.command_line(), "invoking runtime");
        let mut cmd = Command::new(&self.binary);
        if let Some(dir) = &inv.cwd {
            cmd.current_dir(dir);
        }
        let output = cmd
            .arg("--root")
            .arg(&self.root)
            .args(&inv.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(if inv.hide_stderr {
                Stdio::null()
            } else {
                Stdio::piped()
            })
            .output()
            .map_err(|source| DriverError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;
        let captured = Captured {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!(status = ?captured.status, "runtime exited");
        Ok(captured)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Created,
    Running,
    Stopped,
    Deleted,
}

impl InstanceState {
    fn from_status(status: &str) -> Option<Self> {
        match status {
            "created" => Some(InstanceState::Created),
            "running" => Some(InstanceState::Running),
            "stopped" => Some(InstanceState::Stopped),
            _ => None,
        }
    }
}

/// A container started by [`RuntimeDriver::run_and_get_output`]
#[derive(Debug)]
pub struct ContainerInstance<'a, R: Runtime> {
    id: String,
    state: InstanceState,
    driver: &'a RuntimeDriver<R>,
}

/// Container instance that is force deleted when it goes out of scope
pub type Guarded<'a, R> = ScopeGuard<ContainerInstance<'a, R>, fn(ContainerInstance<'a, R>)>;

fn release<R: Runtime>(mut instance: ContainerInstance<'_, R>) {
    if instance.state == InstanceState::Deleted {
        return;
    }
    if let Err(e) = instance.delete() {
        tracing::warn!(id = %instance.id, error = %e, "failed to delete container");
    }
}

impl<'a, R: Runtime> ContainerInstance<'a, R> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn exec(&self, argv: &[&str], detach: bool) -> Result<String, DriverError> {
        self.driver.exec(&self.id, argv, detach)
    }

    pub fn exec_process(&self, process_file: &Path, detach: bool) -> Result<String, DriverError> {
        self.driver.exec_process(&self.id, process_file, detach)
    }

    /// Writes `process` to `dir/process.json` and execs it
    pub fn exec_process_document(
        &self,
        process: &Process,
        dir: &Path,
        detach: bool,
    ) -> Result<String, DriverError> {
        let path = dir.join("process.json");
        save_process(process, &path).map_err(|source| DriverError::Process {
            path: path.clone(),
            source,
        })?;
        self.exec_process(&path, detach)
    }

    /// Asks the runtime for the current status
    pub fn refresh_state(&mut self) -> Result<InstanceState, DriverError> {
        let state = self.driver.state(&self.id)?;
        if let Some(s) = InstanceState::from_status(&state.status) {
            self.state = s;
        }
        Ok(self.state)
    }

    pub fn delete(&mut self) -> Result<(), DriverError> {
        self.driver.delete_force(&self.id)?;
        self.state = InstanceState::Deleted;
        Ok(())
    }
}

#[derive(Debug)]
pub struct RuntimeDriver<R: Runtime> {
    runtime: R,
}

impl RuntimeDriver<CliRuntime> {
    /// Prepares a fresh bundle and a driver for the configured runtime that
    /// keeps its state inside it
    pub fn with_new_bundle() -> Result<(Bundle, Self), DriverError> {
        let bundle = prepare_bundle().map_err(DriverError::Setup)?;
        let runtime = get_runtime_path().map_err(DriverError::Setup)?;
        let driver = RuntimeDriver::new(CliRuntime::new(runtime, bundle.state_root()));
        Ok((bundle, driver))
    }
}

impl<R: Runtime> RuntimeDriver<R> {
    pub fn new(runtime: R) -> Self {
        RuntimeDriver { runtime }
    }

    /// Runs an arbitrary runtime subcommand and returns its stdout
    pub fn run_command<I, S>(&self, args: I) -> Result<String, DriverError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let inv = Invocation::new(args);
        let captured = self.runtime.invoke(&inv)?.into_result(&inv)?;
        Ok(captured.stdout)
    }

    /// Writes `spec` into the bundle and runs it.
    ///
    /// Without `detach` this returns once the container process exited, with
    /// its stdout (and stderr unless `hide_stderr`). With `detach` it returns
    /// as soon as the runtime reports the container as running. Either way
    /// the instance is force deleted when the returned guard is dropped.
    #[tracing::instrument(level = "debug", skip(self, spec, bundle))]
    pub fn run_and_get_output(
        &self,
        spec: &Spec,
        bundle: &Bundle,
        detach: bool,
        hide_stderr: bool,
    ) -> Result<(String, Guarded<'_, R>), DriverError> {
        save_config(spec, &bundle.config_path())?;

        let id = generate_id();
        let mut args: Vec<OsString> = vec![
            "run".into(),
            "--bundle".into(),
            bundle.bundle_dir().into(),
        ];
        if detach {
            args.push("-d".into());
        }
        args.push(id.clone().into());
        let inv = Invocation::new(args).hide_stderr(hide_stderr);

        let mut instance: Guarded<'_, R> = scopeguard::guard(
            ContainerInstance {
                id,
                state: InstanceState::Created,
                driver: self,
            },
            release::<R> as fn(ContainerInstance<'_, R>),
        );

        let captured = self.runtime.invoke(&inv)?.into_result(&inv)?;
        let output = captured.combined();
        if !detach {
            instance.state = InstanceState::Stopped;
            return Ok((output, instance));
        }

        self.wait_running(&instance.id, &output)?;
        instance.state = InstanceState::Running;
        Ok((output, instance))
    }

    fn wait_running(&self, id: &str, output: &str) -> Result<(), DriverError> {
        let mut last_status = None;
        for _ in 0..MAX_STATE_POLLS {
            match self.state(id) {
                Ok(state) if state.status == "running" => return Ok(()),
                Ok(state) if state.status == "stopped" => {
                    return Err(DriverError::NotRunning {
                        id: id.to_string(),
                        status: Some(state.status),
                        output: output.to_string(),
                    });
                }
                Ok(state) => last_status = Some(state.status),
                Err(e) => tracing::debug!(id, error = %e, "container state not available yet"),
            }
            sleep(SLEEP_TIME);
        }
        Err(DriverError::NotRunning {
            id: id.to_string(),
            status: last_status,
            output: output.to_string(),
        })
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn exec(&self, id: &str, argv: &[&str], detach: bool) -> Result<String, DriverError> {
        let mut args = vec!["exec"];
        if detach {
            args.push("-d");
        }
        args.push(id);
        args.extend_from_slice(argv);
        self.run_command(args)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn exec_process(
        &self,
        id: &str,
        process_file: &Path,
        detach: bool,
    ) -> Result<String, DriverError> {
        let mut args: Vec<OsString> = vec!["exec".into(), "--process".into(), process_file.into()];
        if detach {
            args.push("-d".into());
        }
        args.push(id.into());
        self.run_command(args)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn delete_force(&self, id: &str) -> Result<(), DriverError> {
        self.run_command(["delete", "-f", id]).map(|_| ())
    }

    /// Runs `spec`, which writes a default config.json into `dir`
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn generate_spec(&self, dir: &Path) -> Result<String, DriverError> {
        let inv = Invocation::new(["spec"]).current_dir(dir);
        let captured = self.runtime.invoke(&inv)?.into_result(&inv)?;
        Ok(captured.stdout)
    }

    pub fn state(&self, id: &str) -> Result<State, DriverError> {
        let out = self.run_command(["state", id])?;
        serde_json::from_str(&out).map_err(|source| DriverError::State {
            id: id.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;
    use crate::error::expect_failure;
    use crate::spec::base_config;

    /// Replays canned results and records every invocation
    #[derive(Debug, Default)]
    struct MockRuntime {
        responses: RefCell<VecDeque<Captured>>,
        calls: RefCell<Vec<String>>,
    }

    impl MockRuntime {
        fn respond(self, status: i32, stdout: &str, stderr: &str) -> Self {
            self.responses.borrow_mut().push_back(Captured {
                status: Some(status),
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            });
            self
        }

        fn state(self, status: &str) -> Self {
            let json = format!(
                r#"{{"ociVersion":"1.0.2","id":"x","status":"{status}","pid":42,"bundle":"/b"}}"#
            );
            self.respond(0, &json, "")
        }
    }

    impl Runtime for MockRuntime {
        fn invoke(&self, inv: &Invocation) -> Result<Captured, DriverError> {
            let mut line = inv.command_line();
            if let Some(dir) = &inv.cwd {
                line = format!("{line} (in {})", dir.display());
            }
            self.calls.borrow_mut().push(line);
            Ok(self.responses.borrow_mut().pop_front().unwrap_or(Captured {
                status: Some(0),
                ..Default::default()
            }))
        }
    }

    fn scratch_bundle() -> (tempfile::TempDir, Bundle) {
        let scratch = tempfile::tempdir().unwrap();
        let init = scratch.path().join("init");
        std::fs::write(&init, b"").unwrap();
        let bundle = Bundle::create(&init, None).unwrap();
        (scratch, bundle)
    }

    fn calls(driver: &RuntimeDriver<MockRuntime>) -> Vec<String> {
        driver.runtime.calls.borrow().clone()
    }

    #[test]
    fn test_run_sync_returns_output_and_deletes() {
        let (_scratch, bundle) = scratch_bundle();
        let driver = RuntimeDriver::new(MockRuntime::default().respond(0, "hello\n", "warn\n"));
        {
            let (out, instance) = driver
                .run_and_get_output(&base_config().unwrap(), &bundle, false, false)
                .unwrap();
            assert_eq!(out, "hello\nwarn\n");
            assert_eq!(instance.state(), InstanceState::Stopped);
            assert!(bundle.config_path().exists());
        }
        let calls = calls(&driver);
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("run --bundle "));
        assert!(!calls[0].contains(" -d "));
        assert!(calls[1].starts_with("delete -f "));
    }

    #[test]
    fn test_run_detached_waits_for_running() {
        let (_scratch, bundle) = scratch_bundle();
        let runtime = MockRuntime::default()
            .respond(0, "", "")
            .state("created")
            .state("running");
        let driver = RuntimeDriver::new(runtime);
        {
            let (_, instance) = driver
                .run_and_get_output(&base_config().unwrap(), &bundle, true, true)
                .unwrap();
            assert_eq!(instance.state(), InstanceState::Running);
            assert!(calls(&driver)[0].contains(" -d "));
        }
        let calls = calls(&driver);
        assert_eq!(calls.len(), 4);
        assert!(calls[1].starts_with("state "));
        assert!(calls[3].starts_with("delete -f "));
    }

    #[test]
    fn test_run_detached_stopped_is_an_error() {
        let (_scratch, bundle) = scratch_bundle();
        let runtime = MockRuntime::default()
            .respond(0, "", "boom")
            .state("stopped");
        let driver = RuntimeDriver::new(runtime);
        let err = driver
            .run_and_get_output(&base_config().unwrap(), &bundle, true, false)
            .unwrap_err();
        match err {
            DriverError::NotRunning { status, output, .. } => {
                assert_eq!(status.as_deref(), Some("stopped"));
                assert_eq!(output, "boom");
            }
            e => panic!("unexpected error {e:?}"),
        }
        assert!(calls(&driver).last().unwrap().starts_with("delete -f "));
    }

    #[test]
    fn test_failed_run_still_deletes() {
        let (_scratch, bundle) = scratch_bundle();
        let driver = RuntimeDriver::new(MockRuntime::default().respond(1, "", "bad config"));
        let err = driver
            .run_and_get_output(&base_config().unwrap(), &bundle, false, false)
            .unwrap_err();
        assert!(err.is_nonzero_exit());
        assert_eq!(calls(&driver).len(), 2);
    }

    #[test]
    fn test_failed_release_is_logged_not_fatal() {
        let (_scratch, bundle) = scratch_bundle();
        let driver = RuntimeDriver::new(
            MockRuntime::default()
                .respond(0, "", "")
                .respond(1, "", "container does not exist"),
        );
        {
            let (_, instance) = driver
                .run_and_get_output(&base_config().unwrap(), &bundle, false, false)
                .unwrap();
            assert_eq!(instance.state(), InstanceState::Stopped);
        }
        let calls = calls(&driver);
        assert_eq!(calls.len(), 2);
        assert!(calls[1].starts_with("delete -f "));
    }

    #[test]
    fn test_never_started_container_release_failure() {
        let (_scratch, bundle) = scratch_bundle();
        let driver = RuntimeDriver::new(
            MockRuntime::default()
                .respond(1, "", "bad config")
                .respond(1, "", "container does not exist"),
        );
        let err = driver
            .run_and_get_output(&base_config().unwrap(), &bundle, false, false)
            .unwrap_err();
        assert!(err.is_nonzero_exit());
        assert!(err.to_string().contains("bad config"));
        assert_eq!(calls(&driver).len(), 2);
    }

    #[test]
    fn test_failed_explicit_delete_is_retried_on_release() {
        let (_scratch, bundle) = scratch_bundle();
        let driver = RuntimeDriver::new(
            MockRuntime::default()
                .respond(0, "", "")
                .respond(1, "", "busy")
                .respond(1, "", "still busy"),
        );
        {
            let (_, mut instance) = driver
                .run_and_get_output(&base_config().unwrap(), &bundle, false, false)
                .unwrap();
            assert!(instance.delete().unwrap_err().is_nonzero_exit());
            assert_ne!(instance.state(), InstanceState::Deleted);
        }
        let calls = calls(&driver);
        assert_eq!(calls.len(), 3);
        assert!(calls[2].starts_with("delete -f "));
    }

    #[test]
    fn test_exec_arguments() {
        let driver = RuntimeDriver::new(
            MockRuntime::default()
                .respond(0, "foo\n", "")
                .respond(1, "", "not found")
                .respond(0, "GROUPS=[0 432]\n", ""),
        );
        assert_eq!(driver.exec("abc", &["/init", "echo", "foo"], false).unwrap(), "foo\n");
        assert!(expect_failure(driver.exec("abc", &["/foo"], true)).is_ok());
        let out = driver
            .exec_process("abc", Path::new("/tmp/process.json"), false)
            .unwrap();
        assert!(out.contains("432"));

        let calls = calls(&driver);
        assert_eq!(calls[0], "exec abc /init echo foo");
        assert_eq!(calls[1], "exec -d abc /foo");
        assert_eq!(calls[2], "exec --process /tmp/process.json abc");
    }

    #[test]
    fn test_explicit_delete_is_not_repeated() {
        let (_scratch, bundle) = scratch_bundle();
        let driver = RuntimeDriver::new(MockRuntime::default());
        {
            let (_, mut instance) = driver
                .run_and_get_output(&base_config().unwrap(), &bundle, false, false)
                .unwrap();
            instance.delete().unwrap();
            assert_eq!(instance.state(), InstanceState::Deleted);
        }
        assert_eq!(calls(&driver).len(), 2);
    }

    #[test]
    fn test_generate_spec_runs_in_dir() {
        let driver =
            RuntimeDriver::new(MockRuntime::default().respond(1, "", "config.json exists"));
        let err = driver.generate_spec(Path::new("/tmp/empty")).unwrap_err();
        assert!(err.is_nonzero_exit());
        assert_eq!(calls(&driver), vec!["spec (in /tmp/empty)".to_string()]);
    }

    #[test]
    fn test_state_parse_error() {
        let driver = RuntimeDriver::new(MockRuntime::default().respond(0, "not json", ""));
        assert!(matches!(
            driver.state("abc"),
            Err(DriverError::State { .. })
        ));
    }
}
