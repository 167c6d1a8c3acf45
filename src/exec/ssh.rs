//! libssh2-backed implementation of the shell transport.
//!
//! Host identity is accepted unconditionally on first contact by default, a
//! deliberate convenience trade-off for ephemeral rental pods; flipping
//! `verify_host_key` enables an OpenSSH known-hosts check instead.

use std::io::{Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use ssh2::{CheckResult, KnownHostFileKind, OpenFlags, OpenType, Session};

use crate::credentials::{Credentials, expand_tilde};
use crate::exec::{
    CapturedOutput, ExecError, ShellConnector, ShellSession, StreamedOutcome,
};

const STREAM_CHUNK_BYTES: usize = 8192;
const DEFAULT_KNOWN_HOSTS: &str = "~/.ssh/known_hosts";

/// Connector that opens libssh2 sessions with key authentication.
#[derive(Clone, Debug)]
pub struct Ssh2Connector {
    verify_host_key: bool,
    known_hosts_path: String,
}

impl Ssh2Connector {
    /// Creates a connector. `verify_host_key` enables the known-hosts check;
    /// the default elsewhere in this crate is trust-on-first-use.
    #[must_use]
    pub fn new(verify_host_key: bool) -> Self {
        Self {
            verify_host_key,
            known_hosts_path: DEFAULT_KNOWN_HOSTS.to_owned(),
        }
    }

    /// Overrides the known-hosts file consulted when verification is on.
    #[must_use]
    pub fn with_known_hosts_path(mut self, path: impl Into<String>) -> Self {
        self.known_hosts_path = path.into();
        self
    }

    fn check_host_key(
        &self,
        session: &Session,
        host: &str,
        port: u16,
    ) -> Result<(), ExecError> {
        let mut known_hosts = session.known_hosts().map_err(session_err)?;
        let path = expand_tilde(&self.known_hosts_path);
        known_hosts
            .read_file(Path::new(&path), KnownHostFileKind::OpenSSH)
            .map_err(session_err)?;

        let (key, _) = session.host_key().ok_or_else(|| ExecError::Session {
            message: String::from("remote offered no host key"),
        })?;

        match known_hosts.check_port(host, port, key) {
            CheckResult::Match => Ok(()),
            CheckResult::Mismatch | CheckResult::NotFound | CheckResult::Failure => {
                Err(ExecError::HostKeyRejected {
                    host: host.to_owned(),
                })
            }
        }
    }
}

impl ShellConnector for Ssh2Connector {
    type Session = Ssh2Session;

    fn connect(
        &self,
        endpoint: (IpAddr, u16),
        credentials: &Credentials,
    ) -> Result<Self::Session, ExecError> {
        let (ip, port) = endpoint;
        let host = ip.to_string();
        let connect_err = |message: String| ExecError::Connect {
            host: host.clone(),
            port,
            message,
        };

        let tcp = TcpStream::connect(SocketAddr::from(endpoint))
            .map_err(|err| connect_err(err.to_string()))?;

        let mut session = Session::new().map_err(|err| connect_err(err.to_string()))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|err| connect_err(err.to_string()))?;

        if self.verify_host_key {
            self.check_host_key(&session, &host, port)?;
        }

        let passphrase = if credentials.passphrase.is_empty() {
            None
        } else {
            Some(credentials.passphrase.as_str())
        };
        session
            .userauth_pubkey_file(
                &credentials.user,
                None,
                credentials.key_path.as_std_path(),
                passphrase,
            )
            .map_err(|err| ExecError::Auth {
                user: credentials.user.clone(),
                message: err.to_string(),
            })?;

        Ok(Ssh2Session { session })
    }
}

/// One authenticated libssh2 session.
pub struct Ssh2Session {
    session: Session,
}

impl ShellSession for Ssh2Session {
    fn exec_captured(&mut self, command: &str) -> Result<CapturedOutput, ExecError> {
        let mut channel = self.session.channel_session().map_err(session_err)?;
        channel.exec(command).map_err(session_err)?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout).map_err(io_err)?;
        let mut stderr = String::new();
        channel
            .stderr()
            .read_to_string(&mut stderr)
            .map_err(io_err)?;

        channel.wait_close().map_err(session_err)?;
        let exit_code = channel.exit_status().map_err(session_err)?;

        Ok(CapturedOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    fn exec_streamed(
        &mut self,
        command: &str,
        sink: &mut dyn Write,
    ) -> Result<StreamedOutcome, ExecError> {
        let mut channel = self.session.channel_session().map_err(session_err)?;
        channel
            .request_pty("xterm", None, None)
            .map_err(session_err)?;
        channel.exec(command).map_err(session_err)?;

        let mut buf = [0_u8; STREAM_CHUNK_BYTES];
        loop {
            let read = channel.read(&mut buf).map_err(io_err)?;
            if read == 0 {
                break;
            }
            let Some(chunk) = buf.get(..read) else {
                break;
            };
            sink.write_all(chunk).map_err(relay_err)?;
            sink.flush().map_err(relay_err)?;
        }

        let mut stderr = String::new();
        channel
            .stderr()
            .read_to_string(&mut stderr)
            .map_err(io_err)?;

        channel.wait_close().map_err(session_err)?;
        let exit_code = channel.exit_status().map_err(session_err)?;

        Ok(StreamedOutcome { stderr, exit_code })
    }

    fn push_file(&mut self, dest: &Utf8Path, content: &[u8], mode: i32) -> Result<(), ExecError> {
        let sftp = self.session.sftp().map_err(session_err)?;

        for dir in missing_dirs(dest, |path| sftp.stat(path.as_std_path()).is_ok()) {
            sftp.mkdir(dir.as_std_path(), 0o700).map_err(session_err)?;
        }

        let mut file = sftp
            .open_mode(
                dest.as_std_path(),
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                mode,
                OpenType::File,
            )
            .map_err(session_err)?;
        file.write_all(content).map_err(io_err)?;
        Ok(())
    }
}

/// Ancestor directories of `dest` that `exists` reports absent, ordered
/// shallowest first so each can be created before its children.
fn missing_dirs(dest: &Utf8Path, exists: impl Fn(&Utf8Path) -> bool) -> Vec<Utf8PathBuf> {
    let mut missing = Vec::new();
    let mut cursor = dest.parent();
    while let Some(dir) = cursor {
        if dir.as_str().is_empty() || dir.as_str() == "/" || exists(dir) {
            break;
        }
        missing.push(dir.to_owned());
        cursor = dir.parent();
    }
    missing.reverse();
    missing
}

fn session_err(err: ssh2::Error) -> ExecError {
    ExecError::Session {
        message: err.to_string(),
    }
}

fn io_err(err: std::io::Error) -> ExecError {
    ExecError::Session {
        message: err.to_string(),
    }
}

fn relay_err(err: std::io::Error) -> ExecError {
    ExecError::Relay {
        message: err.to_string(),
    }
}
