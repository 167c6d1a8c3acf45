//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard as StdMutexGuard};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::credentials::{CredentialError, Credentials, PassphrasePrompt};
use crate::exec::{CapturedOutput, ExecError, ShellConnector, ShellSession, StreamedOutcome};
use crate::node::PodSpec;
use crate::registry::{NetworkStatus, NodeRegistry, PodSummary, RegistryFuture};

/// Error type returned by [`ScriptedRegistry`] when scripted to fail.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("scripted registry failure: {0}")]
pub struct ScriptedRegistryError(
    /// Message the registry was scripted to fail with.
    pub String,
);

#[derive(Debug, Default)]
struct RegistryState {
    pods: Vec<PodSummary>,
    statuses: VecDeque<Option<NetworkStatus>>,
    failure: Option<String>,
    next_id: u32,
    list_calls: usize,
    create_calls: usize,
    status_calls: usize,
    terminated: Vec<String>,
}

/// In-memory [`NodeRegistry`] with scripted status responses.
///
/// Created pods join the inventory so repeated reconciliation sees them.
/// Status queries pop pre-seeded responses in FIFO order; an empty queue
/// reports the pod as not yet reachable.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl ScriptedRegistry {
    /// Creates an empty registry with no scripted responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StdMutexGuard<'_, RegistryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seeds a pod into the inventory before any calls are made.
    pub fn seed_pod(&self, id: impl Into<String>, name: impl Into<String>) {
        self.lock().pods.push(PodSummary {
            id: id.into(),
            name: name.into(),
        });
    }

    /// Queues a status response; `None` simulates a pod without a public
    /// address yet.
    pub fn push_status(&self, status: Option<NetworkStatus>) {
        self.lock().statuses.push_back(status);
    }

    /// Makes every subsequent registry call fail with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        self.lock().failure = Some(message.into());
    }

    /// Number of inventory listings performed.
    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    /// Number of provisioning requests performed.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.lock().create_calls
    }

    /// Number of status queries performed.
    #[must_use]
    pub fn status_calls(&self) -> usize {
        self.lock().status_calls
    }

    /// Pod identifiers passed to teardown, in call order.
    #[must_use]
    pub fn terminated(&self) -> Vec<String> {
        self.lock().terminated.clone()
    }

    fn check_failure(state: &RegistryState) -> Result<(), ScriptedRegistryError> {
        match &state.failure {
            Some(message) => Err(ScriptedRegistryError(message.clone())),
            None => Ok(()),
        }
    }
}

impl NodeRegistry for ScriptedRegistry {
    type Error = ScriptedRegistryError;

    fn list(&self) -> RegistryFuture<'_, Vec<PodSummary>, Self::Error> {
        let this = self.clone();
        Box::pin(async move {
            let mut state = this.lock();
            state.list_calls += 1;
            Self::check_failure(&state)?;
            Ok(state.pods.clone())
        })
    }

    fn create<'a>(&'a self, spec: &'a PodSpec) -> RegistryFuture<'a, PodSummary, Self::Error> {
        let this = self.clone();
        Box::pin(async move {
            let mut state = this.lock();
            state.create_calls += 1;
            Self::check_failure(&state)?;
            state.next_id += 1;
            let summary = PodSummary {
                id: format!("pod-{}", state.next_id),
                name: spec.name.clone(),
            };
            state.pods.push(summary.clone());
            Ok(summary)
        })
    }

    fn network_status<'a>(
        &'a self,
        _pod_id: &'a str,
    ) -> RegistryFuture<'a, Option<NetworkStatus>, Self::Error> {
        let this = self.clone();
        Box::pin(async move {
            let mut state = this.lock();
            state.status_calls += 1;
            Self::check_failure(&state)?;
            Ok(state.statuses.pop_front().flatten())
        })
    }

    fn terminate<'a>(&'a self, pod_id: &'a str) -> RegistryFuture<'a, (), Self::Error> {
        let this = self.clone();
        let pod_id = pod_id.to_owned();
        Box::pin(async move {
            let mut state = this.lock();
            Self::check_failure(&state)?;
            state.pods.retain(|pod| pod.id != pod_id);
            state.terminated.push(pod_id);
            Ok(())
        })
    }
}

/// Records a single file pushed through a [`ScriptedShell`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordedPush {
    /// Remote destination path.
    pub dest: Utf8PathBuf,
    /// Bytes written.
    pub content: Vec<u8>,
    /// Permission mode applied.
    pub mode: i32,
}

#[derive(Debug, Default)]
struct ShellState {
    captured: VecDeque<CapturedOutput>,
    stream_chunks: Vec<Vec<u8>>,
    stream_outcome: Option<StreamedOutcome>,
    commands: Vec<String>,
    pushes: Vec<RecordedPush>,
}

/// Scripted [`ShellSession`] returning pre-seeded outputs in FIFO order.
///
/// Clones share state, so a test keeps one handle for assertions while the
/// connector hands another to the executor.
#[derive(Clone, Debug, Default)]
pub struct ScriptedShell {
    state: Arc<Mutex<ShellState>>,
}

impl ScriptedShell {
    /// Creates a shell with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StdMutexGuard<'_, ShellState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queues a captured-mode response.
    pub fn push_captured(
        &self,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        exit_code: i32,
    ) {
        self.lock().captured.push_back(CapturedOutput {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
        });
    }

    /// Scripts the chunks relayed by the next streaming execution.
    pub fn set_stream_chunks(&self, chunks: &[&str]) {
        self.lock().stream_chunks = chunks
            .iter()
            .map(|chunk| chunk.as_bytes().to_vec())
            .collect();
    }

    /// Scripts the trailing state reported after streaming completes.
    pub fn set_stream_outcome(&self, stderr: impl Into<String>, exit_code: i32) {
        self.lock().stream_outcome = Some(StreamedOutcome {
            stderr: stderr.into(),
            exit_code,
        });
    }

    /// Commands executed so far, in call order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Files pushed so far, in call order.
    #[must_use]
    pub fn pushes(&self) -> Vec<RecordedPush> {
        self.lock().pushes.clone()
    }
}

impl ShellSession for ScriptedShell {
    fn exec_captured(&mut self, command: &str) -> Result<CapturedOutput, ExecError> {
        let mut state = self.lock();
        state.commands.push(command.to_owned());
        state
            .captured
            .pop_front()
            .ok_or_else(|| ExecError::Session {
                message: String::from("no scripted response available"),
            })
    }

    fn exec_streamed(
        &mut self,
        command: &str,
        sink: &mut dyn std::io::Write,
    ) -> Result<StreamedOutcome, ExecError> {
        let (chunks, outcome) = {
            let mut state = self.lock();
            state.commands.push(command.to_owned());
            (
                std::mem::take(&mut state.stream_chunks),
                state.stream_outcome.clone(),
            )
        };

        for chunk in chunks {
            sink.write_all(&chunk).map_err(|err| ExecError::Relay {
                message: err.to_string(),
            })?;
            sink.flush().map_err(|err| ExecError::Relay {
                message: err.to_string(),
            })?;
        }

        Ok(outcome.unwrap_or(StreamedOutcome {
            stderr: String::new(),
            exit_code: 0,
        }))
    }

    fn push_file(&mut self, dest: &Utf8Path, content: &[u8], mode: i32) -> Result<(), ExecError> {
        self.lock().pushes.push(RecordedPush {
            dest: dest.to_owned(),
            content: content.to_vec(),
            mode,
        });
        Ok(())
    }
}

/// Connector yielding clones of one [`ScriptedShell`], so every session a
/// test triggers shares recorded state.
#[derive(Clone, Debug, Default)]
pub struct ScriptedConnector {
    shell: ScriptedShell,
    refuse: Arc<Mutex<Option<ExecError>>>,
    connects: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    /// Creates a connector handing out sessions backed by `shell`.
    #[must_use]
    pub fn new(shell: ScriptedShell) -> Self {
        Self {
            shell,
            refuse: Arc::new(Mutex::new(None)),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Makes every subsequent connection attempt fail with `error`.
    pub fn refuse_with(&self, error: ExecError) {
        let mut slot = self
            .refuse
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(error);
    }

    /// Number of connection attempts made.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl ShellConnector for ScriptedConnector {
    type Session = ScriptedShell;

    fn connect(
        &self,
        _endpoint: (IpAddr, u16),
        _credentials: &Credentials,
    ) -> Result<Self::Session, ExecError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let slot = self
            .refuse
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(error) = slot.as_ref() {
            return Err(error.clone());
        }
        Ok(self.shell.clone())
    }
}

/// Prompt double returning a fixed passphrase and counting invocations.
#[derive(Clone, Debug)]
pub struct StaticPrompt {
    passphrase: String,
    calls: Arc<AtomicUsize>,
}

impl StaticPrompt {
    /// Creates a prompt that always yields `passphrase`.
    #[must_use]
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: passphrase.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of times the prompt has fired.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PassphrasePrompt for StaticPrompt {
    fn read_passphrase(&self, _prompt: &str) -> Result<String, CredentialError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.passphrase.clone())
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push((key.to_string(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
