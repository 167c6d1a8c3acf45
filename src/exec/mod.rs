//! Remote command execution and file pushes over SSH.
//!
//! The executor opens an authenticated session against a reachable pod and
//! runs commands in buffered (capture-and-return) or streaming (live-relay)
//! mode. The transport sits behind [`ShellConnector`]/[`ShellSession`] so
//! tests drive the executor with scripted doubles; the production
//! implementation lives in [`ssh`] and speaks libssh2.

mod ssh;

use std::io::Write;
use std::net::IpAddr;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{error, warn};

use crate::credentials::Credentials;
use crate::node::ComputeNode;

pub use ssh::Ssh2Connector;

/// Mode 0600 applied to every pushed file.
pub const PUSHED_FILE_MODE: i32 = 0o600;

/// Execution mode for a remote command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecMode {
    /// Capture output fully and return it.
    Buffered,
    /// Allocate a pty and relay output live; nothing is returned.
    Streaming,
}

/// A command string paired with its execution mode. Constructed and
/// consumed per call; carries no identity.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteCommand {
    /// Shell command executed on the pod.
    pub command: String,
    /// Buffered or streaming execution.
    pub mode: ExecMode,
}

impl RemoteCommand {
    /// Builds a buffered command.
    #[must_use]
    pub fn buffered(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            mode: ExecMode::Buffered,
        }
    }

    /// Builds a streaming command.
    #[must_use]
    pub fn streaming(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            mode: ExecMode::Streaming,
        }
    }
}

/// Outcome of running a [`RemoteCommand`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExecutionResult {
    /// Buffered success: trimmed standard output.
    Captured(String),
    /// Buffered failure marker under the active classification policy.
    Failed {
        /// Diagnostic text captured from the error stream.
        stderr: String,
    },
    /// Streaming completed; output went to the sink, nothing is returned.
    Streamed,
}

/// How buffered execution classifies failure.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum StderrPolicy {
    /// Any text on the error stream marks the command failed, regardless of
    /// exit status. Matches the historical behaviour of this tool.
    #[default]
    TreatAsFailure,
    /// Classify by exit status; error-stream text is surfaced as
    /// diagnostics only.
    ExitStatusOnly,
}

/// Errors raised while connecting to or executing on a pod.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExecError {
    /// Raised when a pod's network fields are not yet populated.
    #[error("pod {name} has no resolved address; wait for reachability first")]
    Unreachable {
        /// Logical pod name.
        name: String,
    },
    /// Raised when the TCP connection or SSH handshake fails.
    #[error("connection to {host}:{port} failed: {message}")]
    Connect {
        /// Remote host.
        host: String,
        /// Remote SSH port.
        port: u16,
        /// Underlying error string.
        message: String,
    },
    /// Raised when the remote host key fails verification.
    #[error("host key for {host} rejected by known-hosts check")]
    HostKeyRejected {
        /// Remote host.
        host: String,
    },
    /// Raised when key authentication is refused.
    #[error("authentication for {user} failed: {message}")]
    Auth {
        /// Remote username.
        user: String,
        /// Underlying error string.
        message: String,
    },
    /// Raised when a channel or file-transfer operation fails mid-session.
    #[error("remote session error: {message}")]
    Session {
        /// Underlying error string.
        message: String,
    },
    /// Raised when relaying streamed output to the local sink fails.
    #[error("failed to relay remote output: {message}")]
    Relay {
        /// Underlying error string.
        message: String,
    },
    /// Raised when a local file needed for a push cannot be read.
    #[error("failed to read local file {path}: {message}")]
    LocalFile {
        /// Local path that could not be read.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
}

/// Fully captured output of a buffered command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CapturedOutput {
    /// Standard output text.
    pub stdout: String,
    /// Standard error text.
    pub stderr: String,
    /// Remote exit status.
    pub exit_code: i32,
}

/// Trailing state of a streamed command after the remote process exits.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StreamedOutcome {
    /// Error-stream text drained after exit.
    pub stderr: String,
    /// Remote exit status.
    pub exit_code: i32,
}

/// One authenticated session against a pod.
pub trait ShellSession {
    /// Executes a command, capturing both output streams.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Session`] when the channel fails.
    fn exec_captured(&mut self, command: &str) -> Result<CapturedOutput, ExecError>;

    /// Executes a command on a pty, relaying output bytes to `sink` as they
    /// arrive (flushing per chunk), then draining remaining output.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Session`] when the channel fails or
    /// [`ExecError::Relay`] when the sink rejects a write.
    fn exec_streamed(
        &mut self,
        command: &str,
        sink: &mut dyn Write,
    ) -> Result<StreamedOutcome, ExecError>;

    /// Writes `content` to `dest` over the session's file-transfer channel,
    /// creating any missing destination directories and applying `mode`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Session`] when the transfer fails.
    fn push_file(&mut self, dest: &Utf8Path, content: &[u8], mode: i32) -> Result<(), ExecError>;
}

/// Opens authenticated sessions. Trait seam so tests substitute scripted
/// sessions for the libssh2 transport.
pub trait ShellConnector {
    /// Session type produced by this connector.
    type Session: ShellSession;

    /// Connects and authenticates against `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Connect`], [`ExecError::HostKeyRejected`], or
    /// [`ExecError::Auth`] when the session cannot be established.
    fn connect(
        &self,
        endpoint: (IpAddr, u16),
        credentials: &Credentials,
    ) -> Result<Self::Session, ExecError>;
}

/// Runs commands and pushes files against reachable pods.
#[derive(Clone, Debug)]
pub struct RemoteExecutor<C: ShellConnector> {
    connector: C,
    stderr_policy: StderrPolicy,
}

impl<C: ShellConnector> RemoteExecutor<C> {
    /// Creates an executor with the default stderr-as-failure policy.
    #[must_use]
    pub const fn new(connector: C) -> Self {
        Self {
            connector,
            stderr_policy: StderrPolicy::TreatAsFailure,
        }
    }

    /// Overrides the buffered failure-classification policy.
    #[must_use]
    pub const fn with_stderr_policy(mut self, policy: StderrPolicy) -> Self {
        self.stderr_policy = policy;
        self
    }

    /// Runs `command` against `node`, dispatching on its mode. Streaming
    /// output is relayed to the process standard output.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Unreachable`] when the node's network fields
    /// are unset, or any connection/session error.
    pub fn run(
        &self,
        node: &ComputeNode,
        credentials: &Credentials,
        command: &RemoteCommand,
    ) -> Result<ExecutionResult, ExecError> {
        match command.mode {
            ExecMode::Buffered => self.run_buffered(node, credentials, &command.command),
            ExecMode::Streaming => {
                let stdout = std::io::stdout();
                let mut sink = stdout.lock();
                self.run_streaming(node, credentials, &command.command, &mut sink)
            }
        }
    }

    /// Runs a command in buffered mode and classifies the outcome.
    ///
    /// Under [`StderrPolicy::TreatAsFailure`] any error-stream text yields
    /// [`ExecutionResult::Failed`] regardless of exit status; otherwise the
    /// exit status decides and stderr is logged as diagnostics.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError`] when the session cannot be established or the
    /// channel fails.
    pub fn run_buffered(
        &self,
        node: &ComputeNode,
        credentials: &Credentials,
        command: &str,
    ) -> Result<ExecutionResult, ExecError> {
        let mut session = self.connect(node, credentials)?;
        let output = session.exec_captured(command)?;

        let stderr = output.stderr.trim().to_owned();
        match self.stderr_policy {
            StderrPolicy::TreatAsFailure if !stderr.is_empty() => {
                error!(pod = %node.name, "remote command error: {stderr}");
                Ok(ExecutionResult::Failed { stderr })
            }
            StderrPolicy::ExitStatusOnly if output.exit_code != 0 => {
                error!(
                    pod = %node.name,
                    exit_code = output.exit_code,
                    "remote command failed: {stderr}"
                );
                Ok(ExecutionResult::Failed { stderr })
            }
            _ => {
                if !stderr.is_empty() {
                    warn!(pod = %node.name, "remote command diagnostics: {stderr}");
                }
                Ok(ExecutionResult::Captured(output.stdout.trim().to_owned()))
            }
        }
    }

    /// Runs a command in streaming mode, relaying output to `sink`.
    ///
    /// Remaining error-stream text and a non-zero exit status are logged
    /// once the remote process exits; the call itself returns
    /// [`ExecutionResult::Streamed`].
    ///
    /// # Errors
    ///
    /// Returns [`ExecError`] when the session cannot be established, the
    /// channel fails, or the sink rejects a write.
    pub fn run_streaming(
        &self,
        node: &ComputeNode,
        credentials: &Credentials,
        command: &str,
        sink: &mut dyn Write,
    ) -> Result<ExecutionResult, ExecError> {
        let mut session = self.connect(node, credentials)?;
        let outcome = session.exec_streamed(command, sink)?;

        let stderr = outcome.stderr.trim();
        if !stderr.is_empty() {
            error!(pod = %node.name, "remote command error: {stderr}");
        }
        if outcome.exit_code != 0 {
            error!(
                pod = %node.name,
                exit_code = outcome.exit_code,
                "remote command exited non-zero"
            );
        }
        Ok(ExecutionResult::Streamed)
    }

    /// Pushes `content` to `dest` on the pod with restrictive permissions.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError`] when the session or transfer fails.
    pub fn push_file(
        &self,
        node: &ComputeNode,
        credentials: &Credentials,
        dest: &Utf8Path,
        content: &str,
    ) -> Result<(), ExecError> {
        let mut session = self.connect(node, credentials)?;
        session.push_file(dest, content.as_bytes(), PUSHED_FILE_MODE)
    }

    /// Uploads the operator's private key to the pod's `~/.ssh` directory so
    /// the pod itself can act as an SSH client outward.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::LocalFile`] when the key cannot be read locally,
    /// or any session/transfer error.
    pub fn forward_private_key(
        &self,
        node: &ComputeNode,
        credentials: &Credentials,
    ) -> Result<Utf8PathBuf, ExecError> {
        let key_bytes =
            std::fs::read(credentials.key_path.as_std_path()).map_err(|err| {
                ExecError::LocalFile {
                    path: credentials.key_path.clone(),
                    message: err.to_string(),
                }
            })?;

        let file_name = credentials.key_path.file_name().unwrap_or("id_ed25519");
        let dest = Utf8PathBuf::from(format!(
            "{}/.ssh/{file_name}",
            remote_home(&credentials.user)
        ));

        let mut session = self.connect(node, credentials)?;
        session.push_file(&dest, &key_bytes, PUSHED_FILE_MODE)?;
        Ok(dest)
    }

    fn connect(
        &self,
        node: &ComputeNode,
        credentials: &Credentials,
    ) -> Result<C::Session, ExecError> {
        let endpoint = node.endpoint().ok_or_else(|| ExecError::Unreachable {
            name: node.name.clone(),
        })?;
        self.connector.connect(endpoint, credentials)
    }
}

/// Home directory for `user` on the pod.
fn remote_home(user: &str) -> String {
    if user == "root" {
        String::from("/root")
    } else {
        format!("/home/{user}")
    }
}
