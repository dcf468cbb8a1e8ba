use crate::RuntimeConfig;
use pl_session::{InterruptReason, SessionRegistry};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Supervisor runs the stored procedure runtime, restarting it when it exits.
pub struct Supervisor {
    config: RuntimeConfig,
    registry: Arc<SessionRegistry>,
}

impl Supervisor {
    pub fn new(config: RuntimeConfig, registry: Arc<SessionRegistry>) -> Self {
        Self { config, registry }
    }

    /// Run the runtime until `shutdown` resolves, then terminate it.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        tokio::pin!(shutdown);

        loop {
            let child = match pl_process::start(
                &self.config.path,
                &self.config.argv,
                &self.config.redirects(),
            ) {
                Ok(child) => child,
                Err(error) => {
                    tracing::error!(path = %self.config.path.display(), %error, "failed to start runtime");
                    runtime_exited(&self.registry);

                    tokio::select! {
                        () = tokio::time::sleep(self.config.restart_backoff) => continue,
                        () = &mut shutdown => return Ok(()),
                    }
                }
            };
            let pid = child.id();
            tracing::info!(%pid, "started runtime");

            tokio::select! {
                status = child.wait() => {
                    let code = pl_process::exit_code(status?);
                    tracing::warn!(%pid, %code, "runtime exited");
                }
                () = &mut shutdown => {
                    return stop(child, self.config.stop_timeout).await;
                }
            }
            runtime_exited(&self.registry);

            tokio::select! {
                () = tokio::time::sleep(self.config.restart_backoff) => (),
                () = &mut shutdown => return Ok(()),
            }
        }
    }
}

/// Retire connections to the exited runtime, and interrupt every session
/// which may be awaiting it. Returns the number of sessions interrupted.
pub fn runtime_exited(registry: &SessionRegistry) -> usize {
    let epoch = registry.services().pool.bump_epoch();

    let interrupted = registry.interrupt_all(
        InterruptReason::RuntimeNotRunning,
        "the stored procedure runtime exited",
    );
    tracing::debug!(%epoch, %interrupted, "interrupted sessions of exited runtime");

    interrupted
}

/// Interrupt every session for shutdown, and wait up to `timeout` for
/// each to unwind its running frames. Returns the number still running.
pub async fn drain(registry: &SessionRegistry, timeout: Duration) -> usize {
    let interrupted = registry.interrupt_all(InterruptReason::ServerShutdown, "");

    let waits: Vec<_> = registry
        .sessions()
        .into_iter()
        .map(|session| {
            tokio::task::spawn_blocking(move || session.wait_for_interrupt_timeout(timeout))
        })
        .collect();

    let mut running = 0;
    for wait in waits {
        if !matches!(wait.await, Ok(true)) {
            running += 1;
        }
    }
    tracing::info!(%interrupted, %running, "drained sessions for shutdown");

    running
}

async fn stop(child: pl_process::Child, timeout: Duration) -> anyhow::Result<()> {
    let pid = child.id();
    pl_process::terminate(pid)?;

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => {
            tracing::info!(%pid, code = pl_process::exit_code(status?), "runtime stopped");
        }
        Err(_) => {
            tracing::error!(%pid, "runtime is not exiting");
        }
    }
    Ok(())
}
