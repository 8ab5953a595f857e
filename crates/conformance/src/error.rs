use std::path::PathBuf;

use oci_spec::OciSpecError;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("failed to spawn {binary:?}")]
    Spawn {
        binary: PathBuf,
        source: std::io::Error,
    },
    #[error("`{command}` exited with {code:?}\nstdout: {stdout}\nstderr: {stderr}")]
    NonZeroExit {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("container {id} did not reach running, last status {status:?}\n{output}")]
    NotRunning {
        id: String,
        status: Option<String>,
        output: String,
    },
    #[error("failed to parse state of container {id}")]
    State {
        id: String,
        source: serde_json::Error,
    },
    #[error("failed to set up the container environment: {0:#}")]
    Setup(anyhow::Error),
    #[error("failed to write runtime configuration")]
    Spec(#[from] OciSpecError),
    #[error("failed to write process document {path:?}")]
    Process {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl DriverError {
    /// True when the runtime ran and reported failure through its exit
    /// status. A runtime killed by a signal has no exit code and does not count.
    pub fn is_nonzero_exit(&self) -> bool {
        matches!(self, DriverError::NonZeroExit { code: Some(c), .. } if *c != 0)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MountInfoError {
    #[error("mountinfo line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("mountinfo line {line}: invalid major:minor {majmin:?}")]
    Device { line: usize, majmin: String },
}

/// Turns the result of a command that is required to fail into a verdict.
/// A non-zero exit is the expected outcome and success is an error. Any
/// other driver error stays one, including a runtime that crashed.
pub fn expect_failure<T>(res: Result<T, DriverError>) -> anyhow::Result<()> {
    match res {
        Ok(_) => Err(anyhow::anyhow!("command succeeded but was expected to fail")),
        Err(e) if e.is_nonzero_exit() => {
            tracing::debug!(error = %e, "command failed as expected");
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e).context("command failed for an unexpected reason")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nonzero() -> DriverError {
        DriverError::NonZeroExit {
            command: "exec abc /foo".to_string(),
            code: Some(1),
            stdout: String::new(),
            stderr: "no such file".to_string(),
        }
    }

    #[test]
    fn test_expect_failure() {
        assert!(expect_failure::<()>(Err(nonzero())).is_ok());
        assert!(expect_failure(Ok("output".to_string())).is_err());

        let spawn = DriverError::Spawn {
            binary: PathBuf::from("/no/runtime"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(expect_failure::<()>(Err(spawn)).is_err());
    }

    #[test]
    fn test_crashed_runtime_is_not_an_expected_failure() {
        let crashed = DriverError::NonZeroExit {
            command: "exec abc /not.here".to_string(),
            code: None,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(!crashed.is_nonzero_exit());
        let err = expect_failure::<()>(Err(crashed)).unwrap_err();
        assert!(format!("{err:#}").contains("unexpected reason"));

        let zero = DriverError::NonZeroExit {
            command: "delete abc".to_string(),
            code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(!zero.is_nonzero_exit());
        assert!(nonzero().is_nonzero_exit());
    }

    #[test]
    fn test_nonzero_exit_message_carries_output() {
        let msg = nonzero().to_string();
        assert!(msg.contains("exec abc /foo"));
        assert!(msg.contains("no such file"));
    }
}
