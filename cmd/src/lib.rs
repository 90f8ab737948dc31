use std::ffi::OsStr;
use std::fmt::Display;
use std::os::unix::process::CommandExt;
use std::process::{Output, Stdio};
use tokio::process::Command as BaseCommand;
use tracing::debug;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to spawn command: {command}")]
    Spawn {
        command: String,
        #[source]
        error: tokio::io::Error,
    },

    #[error("command failed: {command}\n{stderr}")]
    Failure { command: String, stderr: String },

    #[error("failed to exec command: {command}")]
    Exec {
        command: String,
        #[source]
        error: std::io::Error,
    },
}

#[derive(Debug)]
pub struct Command {
    cmd: BaseCommand,
    stdout: bool,
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cmd = self.cmd.as_std();
        let program = cmd.get_program().to_string_lossy();
        let args = cmd
            .get_args()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        if args.is_empty() {
            write!(f, "{program}",)
        } else {
            write!(f, "{program} {args}",)
        }
    }
}

impl Command {
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            cmd: BaseCommand::new(program),
            stdout: false,
        }
    }

    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.cmd.arg(arg);
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.cmd.args(args);
        self
    }

    pub fn env<K, V>(&mut self, key: K, value: V) -> &mut Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.cmd.env(key, value);
        self
    }

    /// Pass stdout through to the terminal instead of capturing it.
    pub fn stdout(&mut self, stdout: bool) -> &mut Command {
        self.stdout = stdout;
        self
    }

    pub async fn output(&mut self) -> Result<Output, CommandError> {
        debug!("run: {self}");
        self.cmd
            .stdin(Stdio::null())
            .stdout(if self.stdout {
                Stdio::inherit()
            } else {
                Stdio::piped()
            })
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|error| CommandError::Spawn {
                command: self.to_string(),
                error,
            })
    }

    /// Run to completion, treating a non-zero exit as [`CommandError::Failure`].
    pub async fn run(&mut self) -> Result<Output, CommandError> {
        self.output().await.and_then(|out| {
            if out.status.success() {
                Ok(out)
            } else {
                Err(CommandError::Failure {
                    command: self.to_string(),
                    stderr: String::from_utf8_lossy(&out.stderr).trim_end().to_string(),
                })
            }
        })
    }

    /// Run to completion and hand stdout (on success) or stderr (on failure) to a handler.
    ///
    /// The stderr handler may recover from a failure by returning `Ok(Some(value))`;
    /// `Ok(None)` turns the failure into [`CommandError::Failure`].
    pub async fn handle<OutHandler, ErrHandler, HandlerValue, HandlerError>(
        &mut self,
        stdout_handler: OutHandler,
        stderr_handler: ErrHandler,
    ) -> Result<Result<HandlerValue, HandlerError>, CommandError>
    where
        ErrHandler: Fn(&str) -> Result<Option<HandlerValue>, HandlerError>,
        OutHandler: Fn(&str) -> Result<HandlerValue, HandlerError>,
    {
        self.output().await.and_then(|output| {
            if output.status.success() {
                return Ok(stdout_handler(&String::from_utf8_lossy(&output.stdout)));
            }

            let stderr = String::from_utf8_lossy(&output.stderr);
            match stderr_handler(&stderr) {
                Err(error) => Ok(Err(error)),
                Ok(Some(value)) => Ok(Ok(value)),
                Ok(None) => Err(CommandError::Failure {
                    command: self.to_string(),
                    stderr: stderr.trim_end().to_string(),
                }),
            }
        })
    }

    /// Replace the current process with this command. Only returns on failure.
    pub fn exec(&self) -> CommandError {
        let cmd = self.cmd.as_std();
        let mut replacement = std::process::Command::new(cmd.get_program());
        replacement.args(cmd.get_args());
        for env in cmd.get_envs() {
            if let (key, Some(value)) = env {
                replacement.env(key, value);
            }
        }

        debug!("exec: {self}");
        let error = replacement.exec();
        CommandError::Exec {
            command: self.to_string(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_command() {
        assert_eq!(Command::new("virsh").to_string(), "virsh")
    }

    #[test]
    fn test_get_command_with_one_arg() {
        assert_eq!(Command::new("virsh").arg("list").to_string(), "virsh list")
    }

    #[test]
    fn test_get_command_with_args() {
        assert_eq!(
            Command::new("virsh")
                .args(["-c", "qemu:///system"])
                .arg("list")
                .to_string(),
            "virsh -c qemu:///system list"
        )
    }

    #[tokio::test]
    async fn test_run_failure_carries_stderr() {
        let err = Command::new("sh")
            .args(["-c", "echo nope >&2; exit 3"])
            .run()
            .await
            .unwrap_err();
        match err {
            CommandError::Failure { command, stderr } => {
                assert!(command.starts_with("sh -c"));
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_handle_recovers_from_stderr() {
        let result: Result<&str, ()> = Command::new("sh")
            .args(["-c", "echo 'domain is not running' >&2; exit 1"])
            .handle(
                |_stdout| Ok("ran"),
                |stderr| Ok(stderr.contains("not running").then_some("skipped")),
            )
            .await
            .unwrap();
        assert_eq!(result, Ok("skipped"));
    }

    #[tokio::test]
    async fn test_handle_passes_stdout() {
        let result: Result<String, ()> = Command::new("echo")
            .arg("running")
            .handle(|stdout| Ok(stdout.trim().to_owned()), |_| Ok(None))
            .await
            .unwrap();
        assert_eq!(result.unwrap(), "running");
    }

    #[tokio::test]
    async fn test_spawn_error() {
        let err = Command::new("/definitely/not/a/program").run().await.unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }
}
