use std::process::ExitStatus;

use tokio::{process::Command, sync::mpsc};
use tracing::{debug, info};

use crate::{
    environ::Environ,
    error::{Result, VaultError},
};

/// Run `command` with exactly the variables in `env`, forwarding termination
/// signals to it until it exits. Returns the child's exit code.
pub async fn run(command: &str, args: &[String], env: &Environ) -> Result<i32> {
    let mut child = Command::new(command)
        .args(args)
        .env_clear()
        .envs(env.iter())
        .spawn()
        .map_err(|source| VaultError::SubprocessLaunch {
            command: command.to_string(),
            source,
        })?;

    info!(command, pid = ?child.id(), "Launched subprocess");

    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let listener = tokio::spawn(signals::listen(signal_tx));
    let forwarder = child
        .id()
        .map(|pid| tokio::spawn(signals::forward(pid, signal_rx)));

    let status = child.wait().await;

    listener.abort();
    if let Some(forwarder) = forwarder {
        forwarder.abort();
    }

    let status = status.map_err(|source| VaultError::SubprocessLaunch {
        command: command.to_string(),
        source,
    })?;
    let code = exit_code(status);
    debug!(command, code, "Subprocess exited");
    Ok(code)
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}

#[cfg(unix)]
mod signals {
    use tokio::{
        signal::unix::{SignalKind, signal},
        sync::mpsc,
    };
    use tracing::{debug, warn};

    /// Report every interrupt, terminate, hangup and quit received by this
    /// process.
    pub async fn listen(tx: mpsc::UnboundedSender<i32>) {
        let (Ok(mut interrupt), Ok(mut terminate), Ok(mut hangup), Ok(mut quit)) = (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
            signal(SignalKind::hangup()),
            signal(SignalKind::quit()),
        ) else {
            warn!("Cannot listen for signals, they will not be forwarded");
            return;
        };

        loop {
            let number = tokio::select! {
                Some(()) = interrupt.recv() => libc::SIGINT,
                Some(()) = terminate.recv() => libc::SIGTERM,
                Some(()) = hangup.recv() => libc::SIGHUP,
                Some(()) = quit.recv() => libc::SIGQUIT,
                else => return,
            };
            if tx.send(number).is_err() {
                return;
            }
        }
    }

    /// Deliver received signals to the child.
    pub async fn forward(pid: u32, mut rx: mpsc::UnboundedReceiver<i32>) {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return;
        };

        while let Some(number) = rx.recv().await {
            debug!(pid, signal = number, "Forwarding signal to subprocess");
            // SAFETY: kill has no memory-safety preconditions.
            let rc = unsafe { libc::kill(pid, number) };
            if rc != 0 {
                warn!(pid, signal = number, "Failed to forward signal");
            }
        }
    }
}

#[cfg(not(unix))]
mod signals {
    use tokio::sync::mpsc;

    /// Console control events reach the child directly on this platform.
    pub async fn listen(_tx: mpsc::UnboundedSender<i32>) {
        std::future::pending::<()>().await;
    }

    pub async fn forward(_pid: u32, mut rx: mpsc::UnboundedReceiver<i32>) {
        while rx.recv().await.is_some() {}
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    fn env() -> Environ {
        Environ::from_vars([("PATH".to_string(), "/usr/bin:/bin".to_string())])
    }

    #[tokio::test]
    async fn test_exit_code_propagates() {
        let code = run("sh", &sh("exit 3"), &env()).await.unwrap();
        assert_eq!(code, 3);
    }

    #[tokio::test]
    async fn test_child_sees_only_snapshot() {
        let mut env = env();
        env.set("VAULTED_TEST_VALUE", "bar");

        let script = r#"test "$VAULTED_TEST_VALUE" = bar && test -z "$HOME""#;
        let code = run("sh", &sh(script), &env).await.unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn test_signal_exit_code() {
        let code = run("sh", &sh("kill -TERM $$"), &env()).await.unwrap();
        assert_eq!(code, 128 + libc::SIGTERM);
    }

    #[tokio::test]
    async fn test_missing_command_is_launch_error() {
        let err = run("/nonexistent/vaulted-test-binary", &[], &env())
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::SubprocessLaunch { .. }));
    }
}
