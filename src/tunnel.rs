//! Local port forwarding to the tracker pod's dashboard.
//!
//! Forwarding uses the system `ssh` client in no-command mode rather than a
//! long-lived library session, so the tunnel survives independently of any
//! in-process SSH state and dies cleanly with the child process. The child
//! keeps the operator's stdin and stderr, so a key-passphrase prompt reaches
//! the terminal and client errors stay visible; after spawning, the client is
//! given a short grace period and a child that has already exited is reported
//! as [`TunnelError::EarlyExit`] instead of a dead forward claiming to be
//! open.

use std::ffi::OsString;
use std::net::IpAddr;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::credentials::Credentials;

/// Errors raised while managing the dashboard tunnel.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Raised when the `ssh` client cannot be started.
    #[error("failed to spawn ssh tunnel: {message}")]
    Spawn {
        /// Operating system error string.
        message: String,
    },
    /// Raised when the `ssh` client exits during the startup grace period.
    #[error("ssh tunnel exited during startup ({status}); check the key and pod endpoint")]
    EarlyExit {
        /// Exit status reported by the child.
        status: String,
    },
    /// Raised when the tunnel process cannot be stopped.
    #[error("failed to stop ssh tunnel: {message}")]
    Shutdown {
        /// Operating system error string.
        message: String,
    },
}

/// Grace period before the spawned client is checked for an early exit.
const STARTUP_GRACE: Duration = Duration::from_millis(400);

/// A running `ssh -N -L` forward from a local port to the tracker pod.
#[derive(Debug)]
pub struct DashboardTunnel {
    child: Child,
    local_port: u16,
}

impl DashboardTunnel {
    /// Opens a tunnel forwarding `local_port` to `remote_port` on the pod at
    /// `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::Spawn`] when the ssh client cannot start and
    /// [`TunnelError::EarlyExit`] when it dies before the forward is up.
    pub fn open(
        endpoint: (IpAddr, u16),
        credentials: &Credentials,
        local_port: u16,
        remote_port: u16,
    ) -> Result<Self, TunnelError> {
        let args = forward_args(endpoint, credentials, local_port, remote_port);
        let child = Command::new("ssh")
            .args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| TunnelError::Spawn {
                message: err.to_string(),
            })?;
        let child = confirm_started(child)?;

        info!("dashboard tunnel open at {}", local_url(local_port));
        Ok(Self { child, local_port })
    }

    /// Local URL the forwarded dashboard is reachable at.
    #[must_use]
    pub fn local_url(&self) -> String {
        local_url(self.local_port)
    }

    /// Stops the tunnel process and waits for it to exit.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::Shutdown`] when the child cannot be killed or
    /// reaped.
    pub fn close(mut self) -> Result<(), TunnelError> {
        self.child.kill().map_err(|err| TunnelError::Shutdown {
            message: err.to_string(),
        })?;
        self.child.wait().map_err(|err| TunnelError::Shutdown {
            message: err.to_string(),
        })?;
        info!("dashboard tunnel closed");
        Ok(())
    }
}

fn local_url(local_port: u16) -> String {
    format!("http://127.0.0.1:{local_port}")
}

/// Rejects a client that exited before the grace period elapsed. A bad key
/// or refused connection makes `ssh` die within milliseconds, and the error
/// must surface here rather than when the operator first loads the dashboard.
fn confirm_started(mut child: Child) -> Result<Child, TunnelError> {
    std::thread::sleep(STARTUP_GRACE);
    match child.try_wait() {
        Ok(Some(status)) => Err(TunnelError::EarlyExit {
            status: status.to_string(),
        }),
        Ok(None) => Ok(child),
        Err(err) => Err(TunnelError::Spawn {
            message: err.to_string(),
        }),
    }
}

/// Builds the argument vector for the forwarding ssh invocation. Pod host
/// keys rotate with every provisioning, so strict checking is disabled and
/// no known-hosts entry is recorded.
fn forward_args(
    endpoint: (IpAddr, u16),
    credentials: &Credentials,
    local_port: u16,
    remote_port: u16,
) -> Vec<OsString> {
    let (ip, port) = endpoint;
    vec![
        OsString::from("-N"),
        OsString::from("-L"),
        OsString::from(format!("{local_port}:127.0.0.1:{remote_port}")),
        OsString::from("-p"),
        OsString::from(port.to_string()),
        OsString::from("-i"),
        OsString::from(credentials.key_path.as_str()),
        OsString::from("-o"),
        OsString::from("StrictHostKeyChecking=no"),
        OsString::from("-o"),
        OsString::from("UserKnownHostsFile=/dev/null"),
        OsString::from(format!("{}@{ip}", credentials.user)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    fn credentials() -> Credentials {
        Credentials {
            user: String::from("root"),
            key_path: Utf8PathBuf::from("/home/operator/.ssh/id_ed25519"),
            passphrase: String::from("hunter2"),
        }
    }

    #[test]
    fn forward_args_compose_the_expected_invocation() {
        let endpoint = (IpAddr::from([203, 0, 113, 9]), 21);
        let args = forward_args(endpoint, &credentials(), 8237, 8237);
        let rendered: Vec<String> = args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            rendered,
            vec![
                "-N",
                "-L",
                "8237:127.0.0.1:8237",
                "-p",
                "21",
                "-i",
                "/home/operator/.ssh/id_ed25519",
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "UserKnownHostsFile=/dev/null",
                "root@203.0.113.9",
            ]
        );
    }

    #[test]
    fn forward_args_never_leak_the_passphrase() {
        let endpoint = (IpAddr::from([203, 0, 113, 9]), 21);
        let args = forward_args(endpoint, &credentials(), 8237, 8080);
        assert!(
            args.iter()
                .all(|arg| !arg.to_string_lossy().contains("hunter2"))
        );
    }

    #[test]
    fn local_url_targets_loopback() {
        assert_eq!(local_url(9001), "http://127.0.0.1:9001");
    }

    #[test]
    fn startup_confirmation_rejects_a_client_that_exits_immediately() {
        let child = Command::new("sh")
            .args(["-c", "exit 7"])
            .stdout(Stdio::null())
            .spawn()
            .expect("spawn shell");

        let err = confirm_started(child).expect_err("dead child must be rejected");
        assert!(matches!(err, TunnelError::EarlyExit { .. }), "{err}");
        assert!(err.to_string().contains("exited during startup"));
    }

    #[test]
    fn startup_confirmation_accepts_a_running_client() {
        let child = Command::new("sleep")
            .arg("5")
            .spawn()
            .expect("spawn sleep");

        let mut child = confirm_started(child).expect("running child passes");
        child.kill().expect("kill sleep");
        child.wait().expect("reap sleep");
    }
}
