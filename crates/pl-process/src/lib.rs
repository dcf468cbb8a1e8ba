pub use std::process::{Command, ExitStatus, Output, Stdio};
use tokio::io::AsyncReadExt;

use shared_child::SharedChild;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Exit code reported for a process which was terminated by a signal.
pub const SIGNALED_EXIT_CODE: i32 = -2;

/// Child is a spawned process which is sent SIGTERM and reaped
/// in the background when dropped before it has exited.
pub struct Child {
    inner: Arc<SharedChild>,

    pub stdin: Option<ChildStdio>,
    pub stdout: Option<ChildStdio>,
    pub stderr: Option<ChildStdio>,
}

pub type ChildStdio = tokio::fs::File;

impl TryFrom<std::process::Child> for Child {
    type Error = std::io::Error;

    fn try_from(mut inner: std::process::Child) -> Result<Self, Self::Error> {
        let stdin = map_stdio(inner.stdin.take());
        let stdout = map_stdio(inner.stdout.take());
        let stderr = map_stdio(inner.stderr.take());

        Ok(Self {
            inner: Arc::new(SharedChild::new(inner)?),
            stdin,
            stdout,
            stderr,
        })
    }
}

impl Child {
    pub fn id(&self) -> u32 {
        self.inner.id()
    }

    /// Wait for the child to exit on a blocking task.
    pub fn wait(&self) -> impl std::future::Future<Output = std::io::Result<ExitStatus>> {
        let cloned_inner = self.inner.clone();
        let handle = tokio::runtime::Handle::current().spawn_blocking(move || cloned_inner.wait());

        async move {
            handle
                .await
                .map_err(|join_err| std::io::Error::new(std::io::ErrorKind::Other, join_err))?
        }
    }

    pub fn try_wait(&self) -> std::io::Result<Option<ExitStatus>> {
        self.inner.try_wait()
    }
}

impl Drop for Child {
    fn drop(&mut self) {
        if let Ok(Some(_status)) = self.inner.try_wait() {
            return; // Already exited.
        }
        let pid = self.inner.id();

        {
            use shared_child::unix::SharedChildExt;

            // Note that send_signal() returns Ok() if the child has been waited on.
            if let Err(error) = self.inner.send_signal(libc::SIGTERM) {
                tracing::error!(%pid, ?error, "failed to deliver SIGTERM to child process");
            }
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // Without a runtime, block until the child is reaped.
            if let Err(error) = self.inner.wait() {
                tracing::error!(%pid, ?error, "failed to wait for dropped child process");
            }
            return;
        };
        let wait = self.wait();

        _ = handle.spawn(async move {
            let timeout = tokio::time::sleep(std::time::Duration::from_secs(15));

            tokio::select! {
                exit_code = wait => match exit_code {
                    Err(error) => {
                        tracing::error!(%pid, ?error, "failed to wait for dropped child process");
                    },
                    Ok(exit_code) if !exit_code.success() => {
                        tracing::warn!(%pid, ?exit_code, "dropped child process exited with an error");
                    }
                    Ok(_) => {
                        tracing::debug!(%pid, "dropped child process exited cleanly");
                    }
                },
                _ = timeout => {
                    tracing::error!(%pid, "dropped child process is not exiting");
                }
            };
        });
    }
}

/// Redirects of a started process's standard streams. Each path is
/// truncated and written by the process. Streams without a path are
/// inherited, and stdin is always null.
#[derive(Debug, Clone, Default)]
pub struct Redirects {
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
}

impl Redirects {
    fn apply(&self, cmd: &mut Command) -> std::io::Result<()> {
        cmd.stdin(Stdio::null());

        if let Some(path) = &self.stdout {
            cmd.stdout(std::fs::File::create(path)?);
        }
        if let Some(path) = &self.stderr {
            cmd.stderr(std::fs::File::create(path)?);
        }
        Ok(())
    }
}

/// Start program `path` with arguments `argv`.
pub fn start(path: &Path, argv: &[String], redirects: &Redirects) -> std::io::Result<Child> {
    let mut cmd = Command::new(path);
    cmd.args(argv);
    redirects.apply(&mut cmd)?;

    let child: Child = cmd.spawn()?.try_into()?;
    tracing::debug!(pid = child.id(), path = %path.display(), ?argv, "started process");

    Ok(child)
}

/// Start program `path` and wait for it to exit, returning its exit code.
/// A process terminated by a signal has exit code `SIGNALED_EXIT_CODE`.
pub async fn start_and_wait(
    path: &Path,
    argv: &[String],
    redirects: &Redirects,
) -> std::io::Result<i32> {
    let child = start(path, argv, redirects)?;
    let status = child.wait().await?;

    Ok(exit_code(status))
}

/// Map an ExitStatus into its exit code.
pub fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(SIGNALED_EXIT_CODE)
}

/// Is process `pid` alive? A process which exists but may not be
/// signaled by this one is considered alive.
pub fn is_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // Signal zero checks for existence without delivering anything.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Send SIGTERM to process `pid`.
pub fn terminate(pid: u32) -> std::io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;

    if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    tracing::debug!(%pid, "sent SIGTERM to process");
    Ok(())
}

/// Spawn the command and wait for it to exit, buffering its stdout and stderr.
/// Upon its exit return an Output having its stdout, stderr, and ExitStatus.
pub async fn output(cmd: &mut Command) -> std::io::Result<Output> {
    cmd.stdin(Stdio::null());
    cmd.stderr(Stdio::piped());
    cmd.stdout(Stdio::piped());

    let mut child: Child = cmd.spawn()?.try_into()?;

    let (mut stdout, mut stderr) = (Vec::new(), Vec::new());
    let (Some(mut stdout_pipe), Some(mut stderr_pipe)) = (child.stdout.take(), child.stderr.take())
    else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "child process is missing piped stdout or stderr",
        ));
    };

    let (out, err, wait) = tokio::join!(
        stdout_pipe.read_to_end(&mut stdout),
        stderr_pipe.read_to_end(&mut stderr),
        child.wait(),
    );
    let status = wait?;
    out?;
    err?;

    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

fn map_stdio<F>(f: Option<F>) -> Option<ChildStdio>
where
    F: Into<OwnedFd>,
{
    let f: Option<OwnedFd> = f.map(Into::into);
    let f: Option<std::fs::File> = f.map(Into::into);
    f.map(Into::into)
}

#[cfg(test)]
mod test {
    use super::{
        is_alive, output, start, start_and_wait, terminate, Child, Command, Redirects,
        SIGNALED_EXIT_CODE,
    };
    use std::path::Path;

    #[tokio::test]
    async fn test_wait() {
        let child: Child = Command::new("true").spawn().unwrap().try_into().unwrap();
        assert!(child.wait().await.unwrap().success());
        let child: Child = Command::new("false").spawn().unwrap().try_into().unwrap();
        assert!(!child.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn test_drop_cancellation() {
        // Sleep for six hours.
        let child: Child = Command::new("sleep")
            .arg("21600")
            .spawn()
            .unwrap()
            .try_into()
            .unwrap();
        let wait = child.wait();

        std::mem::drop(child);

        assert_eq!(wait.await.unwrap().to_string(), "signal: 15 (SIGTERM)");
    }

    #[tokio::test]
    async fn test_start_and_wait_with_redirects() {
        let dir = tempfile::tempdir().unwrap();
        let redirects = Redirects {
            stdout: Some(dir.path().join("out.log")),
            stderr: Some(dir.path().join("err.log")),
        };
        let argv = vec![
            "-c".to_string(),
            "echo hello; echo oops >&2; exit 3".to_string(),
        ];

        let code = start_and_wait(Path::new("sh"), &argv, &redirects)
            .await
            .unwrap();
        assert_eq!(code, 3);

        let out = std::fs::read_to_string(dir.path().join("out.log")).unwrap();
        let err = std::fs::read_to_string(dir.path().join("err.log")).unwrap();
        assert_eq!((out.as_str(), err.as_str()), ("hello\n", "oops\n"));
    }

    #[tokio::test]
    async fn test_terminate_and_is_alive() {
        let child = start(
            Path::new("sleep"),
            &["21600".to_string()],
            &Redirects::default(),
        )
        .unwrap();
        let pid = child.id();
        assert!(is_alive(pid));

        terminate(pid).unwrap();
        let status = child.wait().await.unwrap();
        assert_eq!(super::exit_code(status), SIGNALED_EXIT_CODE);

        // Reaped, so the pid no longer exists.
        assert!(!is_alive(pid));
    }

    #[tokio::test]
    async fn test_output() {
        let result = output(Command::new("cat").arg("/this/path/does/not/exist")).await;

        insta::assert_debug_snapshot!(result, @r###"
        Ok(
            Output {
                status: ExitStatus(
                    unix_wait_status(
                        256,
                    ),
                ),
                stdout: "",
                stderr: "cat: /this/path/does/not/exist: No such file or directory\n",
            },
        )
        "###);
    }
}
