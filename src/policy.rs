//! Role-specific pod policies and the workload driver built on them.
//!
//! A [`NodePolicy`] is an immutable record describing what a pod of a given
//! role looks like (image, template, GPU shape) and how it is bootstrapped
//! once reachable. [`WorkloadNode`] binds a policy to the lifecycle
//! controller and the remote executor and drives a pod from provisioning to
//! teardown.

use std::borrow::Cow;
use std::fmt;
use std::net::IpAddr;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::info;

use crate::credentials::{CredentialError, CredentialResolver, PassphrasePrompt};
use crate::exec::{ExecError, ExecutionResult, RemoteExecutor, ShellConnector};
use crate::lifecycle::{LifecycleController, LifecycleError};
use crate::node::{ComputeNode, GpuSpec, PodSpec, SpecError};
use crate::registry::NodeRegistry;

/// Command prefix entering the application workspace on a pod.
pub const ENTER_WORKSPACE: &str = "cd .. && cd app";
/// Command activating the pod's virtual environment.
pub const ACTIVATE_ENV: &str = "source .venv/bin/activate";
/// Entrypoint launched for finetuning runs.
pub const FINETUNE_ENTRYPOINT: &str = "finetune";
/// Entrypoint launched for inference runs.
pub const INFERENCE_ENTRYPOINT: &str = "infer";

/// Image booted on the tracker pod.
pub const TRACKER_IMAGE: &str = "runpod/base:0.7.0-ubuntu2404";
/// Image booted on finetune pods.
pub const FINETUNE_IMAGE: &str = "ghcr.io/fingriffin/voice-finetune:latest";
/// Image booted on inference pods.
pub const INFERENCE_IMAGE: &str = "ghcr.io/fingriffin/voice-inference:latest";
/// Provider template backing finetune pods.
pub const FINETUNE_TEMPLATE: &str = "eziymt38z4";
/// Provider template backing inference pods.
pub const INFERENCE_TEMPLATE: &str = "lwox0565zs";

/// Remote destination for the pushed environment file.
pub const REMOTE_ENV_PATH: &str = "/app/.env";
/// Remote destination for the pushed experiment config.
pub const REMOTE_CONFIG_PATH: &str = "/app/config.yaml";

/// Role a pod plays in an experiment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    /// Long-lived experiment-tracking service pod.
    Tracker,
    /// Task pod running the finetune entrypoint.
    Finetune,
    /// Task pod running the inference entrypoint.
    Inference,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Tracker => "tracker",
            Self::Finetune => "finetune",
            Self::Inference => "inference",
        };
        f.write_str(text)
    }
}

/// One-time action run against a pod once it becomes reachable.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Bootstrap {
    /// Start the tracker daemon via a buffered startup script.
    StartTracker {
        /// Port the tracker daemon listens on.
        port: u16,
    },
    /// Push the local environment file to [`REMOTE_ENV_PATH`].
    DeployEnvFile {
        /// Local env file read and pushed.
        env_file: Utf8PathBuf,
        /// Also upload the operator's private key to the pod's `~/.ssh`.
        forward_key: bool,
    },
}

/// Immutable description of a pod role: what to provision and how to
/// bootstrap it. Built through the role constructors, tweaked through the
/// `with_` methods.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodePolicy {
    role: Role,
    name: String,
    image: String,
    template_id: Option<String>,
    volume_gb: u32,
    gpu: Option<GpuSpec>,
    network_volume_id: Option<String>,
    bootstrap: Bootstrap,
    entrypoint: Option<&'static str>,
}

impl NodePolicy {
    /// Policy for the long-lived tracker service pod: CPU only, persistent
    /// network volume, daemon started once reachable.
    #[must_use]
    pub fn tracker(network_volume_id: impl Into<String>, port: u16) -> Self {
        Self {
            role: Role::Tracker,
            name: String::from("voice-tracker"),
            image: String::from(TRACKER_IMAGE),
            template_id: None,
            volume_gb: 50,
            gpu: None,
            network_volume_id: Some(network_volume_id.into()),
            bootstrap: Bootstrap::StartTracker { port },
            entrypoint: None,
        }
    }

    /// Policy for a finetune task pod with the given GPU shape.
    #[must_use]
    pub fn finetune(gpu: GpuSpec, env_file: impl Into<Utf8PathBuf>) -> Self {
        Self::task(
            Role::Finetune,
            "voice-finetune",
            FINETUNE_IMAGE,
            FINETUNE_TEMPLATE,
            FINETUNE_ENTRYPOINT,
            gpu,
            env_file.into(),
        )
    }

    /// Policy for an inference task pod with the given GPU shape.
    #[must_use]
    pub fn inference(gpu: GpuSpec, env_file: impl Into<Utf8PathBuf>) -> Self {
        Self::task(
            Role::Inference,
            "voice-inference",
            INFERENCE_IMAGE,
            INFERENCE_TEMPLATE,
            INFERENCE_ENTRYPOINT,
            gpu,
            env_file.into(),
        )
    }

    fn task(
        role: Role,
        name: &str,
        image: &str,
        template: &str,
        entrypoint: &'static str,
        gpu: GpuSpec,
        env_file: Utf8PathBuf,
    ) -> Self {
        Self {
            role,
            name: name.to_owned(),
            image: image.to_owned(),
            template_id: Some(template.to_owned()),
            volume_gb: 50,
            gpu: Some(gpu),
            network_volume_id: None,
            bootstrap: Bootstrap::DeployEnvFile {
                env_file,
                forward_key: false,
            },
            entrypoint: Some(entrypoint),
        }
    }

    /// Overrides the logical pod name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Enables forwarding the operator's private key during bootstrap so the
    /// pod can reach private upstreams over SSH.
    #[must_use]
    pub fn with_forwarded_key(mut self) -> Self {
        if let Bootstrap::DeployEnvFile { forward_key, .. } = &mut self.bootstrap {
            *forward_key = true;
        }
        self
    }

    /// Role described by this policy.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Logical pod name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builds the provisioning spec for this policy.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Validation`] when an override left a required
    /// field empty.
    pub fn spec(&self) -> Result<PodSpec, SpecError> {
        PodSpec::builder()
            .name(self.name.clone())
            .image(self.image.clone())
            .template_id(self.template_id.clone())
            .volume_gb(self.volume_gb)
            .gpu(self.gpu.clone())
            .network_volume_id(self.network_volume_id.clone())
            .build()
    }

    /// Composes the task command for `config_path`, or `None` for roles
    /// without an entrypoint.
    #[must_use]
    pub fn run_command(&self, config_path: &Utf8Path) -> Option<String> {
        let entrypoint = self.entrypoint?;
        let escaped = shell_escape::escape(Cow::from(config_path.as_str()));
        Some(format!(
            "{ENTER_WORKSPACE} && {ACTIVATE_ENV} && {entrypoint} {escaped}"
        ))
    }

    fn startup_script(port: u16) -> String {
        format!("{ENTER_WORKSPACE} && {ACTIVATE_ENV} && zenml up --port {port}")
    }
}

/// Errors surfaced while driving a workload pod, tagged by stage.
#[derive(Debug, Error)]
pub enum WorkloadError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the policy produces an invalid provisioning spec.
    #[error("invalid pod spec: {0}")]
    Spec(#[from] SpecError),
    /// Raised when attach-or-create fails.
    #[error("failed to attach or create pod: {0}")]
    Attach(#[source] LifecycleError<E>),
    /// Raised when the pod never becomes reachable.
    #[error("pod never became reachable: {0}")]
    Wait(#[source] LifecycleError<E>),
    /// Raised when SSH credentials cannot be resolved.
    #[error("failed to resolve credentials: {0}")]
    Credential(#[from] CredentialError),
    /// Raised when the configured local env file does not exist.
    #[error("env file {path} not found; bootstrap requires it")]
    MissingEnvFile {
        /// Configured env file path.
        path: Utf8PathBuf,
    },
    /// Raised when a local file cannot be read.
    #[error("failed to read local file {path}: {message}")]
    LocalFile {
        /// Local path that could not be read.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a bootstrap session or transfer fails.
    #[error("bootstrap of {role} pod failed: {source}")]
    Bootstrap {
        /// Role being bootstrapped.
        role: Role,
        /// Underlying execution error.
        #[source]
        source: ExecError,
    },
    /// Raised when the bootstrap command itself reports failure.
    #[error("bootstrap of {role} pod reported an error: {stderr}")]
    BootstrapOutput {
        /// Role being bootstrapped.
        role: Role,
        /// Diagnostic text captured from the error stream.
        stderr: String,
    },
    /// Raised when pushing the experiment config fails.
    #[error("failed to push experiment config: {0}")]
    ConfigPush(#[source] ExecError),
    /// Raised when the streamed task execution fails.
    #[error("{role} task failed: {source}")]
    Task {
        /// Role running the task.
        role: Role,
        /// Underlying execution error.
        #[source]
        source: ExecError,
    },
    /// Raised when a task is requested on a role without an entrypoint.
    #[error("{role} pods have no task entrypoint")]
    NoEntrypoint {
        /// Role the task was requested on.
        role: Role,
    },
    /// Raised when an operation needs a provisioned pod and none exists yet.
    #[error("pod is not provisioned; call provision first")]
    NotProvisioned,
    /// Raised when teardown fails.
    #[error("failed to terminate pod: {0}")]
    Teardown(#[source] LifecycleError<E>),
}

/// Drives one pod from policy to teardown: provision, bootstrap, run,
/// terminate.
#[derive(Debug)]
pub struct WorkloadNode<R: NodeRegistry, C: ShellConnector> {
    policy: NodePolicy,
    controller: LifecycleController<R>,
    executor: RemoteExecutor<C>,
    node: Option<ComputeNode>,
}

impl<R: NodeRegistry, C: ShellConnector> WorkloadNode<R, C> {
    /// Binds a policy to the lifecycle controller and remote executor.
    #[must_use]
    pub const fn new(
        policy: NodePolicy,
        controller: LifecycleController<R>,
        executor: RemoteExecutor<C>,
    ) -> Self {
        Self {
            policy,
            controller,
            executor,
            node: None,
        }
    }

    /// Reachable address and corrected SSH port, once provisioned.
    #[must_use]
    pub fn endpoint(&self) -> Option<(IpAddr, u16)> {
        self.node.as_ref().and_then(ComputeNode::endpoint)
    }

    /// Policy this node was built from.
    #[must_use]
    pub const fn policy(&self) -> &NodePolicy {
        &self.policy
    }

    /// Provisions the pod, waits for reachability, and runs the policy's
    /// bootstrap action.
    ///
    /// # Errors
    ///
    /// Returns a stage-tagged [`WorkloadError`]: `Attach` or `Wait` for
    /// lifecycle failures, `Credential` for credential resolution, and
    /// `Bootstrap`/`BootstrapOutput`/`MissingEnvFile` for bootstrap
    /// failures.
    pub async fn provision<P: PassphrasePrompt>(
        &mut self,
        resolver: &CredentialResolver<P>,
    ) -> Result<(), WorkloadError<R::Error>> {
        let spec = self.policy.spec()?;
        let mut node = self
            .controller
            .attach_or_create(&spec)
            .await
            .map_err(WorkloadError::Attach)?;

        let waited = self.controller.wait_until_reachable(&mut node).await;
        self.node = Some(node);
        waited.map_err(WorkloadError::Wait)?;

        self.bootstrap(resolver)
    }

    fn bootstrap<P: PassphrasePrompt>(
        &self,
        resolver: &CredentialResolver<P>,
    ) -> Result<(), WorkloadError<R::Error>> {
        let role = self.policy.role;
        let node = self.node.as_ref().ok_or(WorkloadError::NotProvisioned)?;
        let credentials = resolver.resolve()?;

        match &self.policy.bootstrap {
            Bootstrap::StartTracker { port } => {
                let script = NodePolicy::startup_script(*port);
                let result = self
                    .executor
                    .run_buffered(node, &credentials, &script)
                    .map_err(|source| WorkloadError::Bootstrap { role, source })?;
                if let ExecutionResult::Failed { stderr } = result {
                    return Err(WorkloadError::BootstrapOutput { role, stderr });
                }
                info!(pod = %node.name, "tracker daemon started");
            }
            Bootstrap::DeployEnvFile {
                env_file,
                forward_key,
            } => {
                if !env_file.as_std_path().exists() {
                    return Err(WorkloadError::MissingEnvFile {
                        path: env_file.clone(),
                    });
                }
                let content = std::fs::read_to_string(env_file.as_std_path()).map_err(|err| {
                    WorkloadError::LocalFile {
                        path: env_file.clone(),
                        message: err.to_string(),
                    }
                })?;
                self.executor
                    .push_file(node, &credentials, Utf8Path::new(REMOTE_ENV_PATH), &content)
                    .map_err(|source| WorkloadError::Bootstrap { role, source })?;
                info!(pod = %node.name, "environment file deployed");

                if *forward_key {
                    let dest = self
                        .executor
                        .forward_private_key(node, &credentials)
                        .map_err(|source| WorkloadError::Bootstrap { role, source })?;
                    info!(pod = %node.name, "private key forwarded to {dest}");
                }
            }
        }
        Ok(())
    }

    /// Pushes the local experiment config to the pod and returns its remote
    /// path.
    ///
    /// # Errors
    ///
    /// Returns [`WorkloadError::LocalFile`] when the config cannot be read
    /// locally and [`WorkloadError::ConfigPush`] when the transfer fails.
    pub fn push_config<P: PassphrasePrompt>(
        &self,
        resolver: &CredentialResolver<P>,
        local: &Utf8Path,
    ) -> Result<Utf8PathBuf, WorkloadError<R::Error>> {
        let node = self.node.as_ref().ok_or(WorkloadError::NotProvisioned)?;
        let credentials = resolver.resolve()?;

        let content =
            std::fs::read_to_string(local.as_std_path()).map_err(|err| WorkloadError::LocalFile {
                path: local.to_owned(),
                message: err.to_string(),
            })?;

        let dest = Utf8PathBuf::from(REMOTE_CONFIG_PATH);
        self.executor
            .push_file(node, &credentials, &dest, &content)
            .map_err(WorkloadError::ConfigPush)?;
        info!(pod = %node.name, "experiment config pushed to {dest}");
        Ok(dest)
    }

    /// Streams the role's entrypoint against the remote config path,
    /// relaying output to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkloadError::NoEntrypoint`] for roles without a task and
    /// [`WorkloadError::Task`] when execution fails.
    pub fn run_task<P: PassphrasePrompt>(
        &self,
        resolver: &CredentialResolver<P>,
        config_path: &Utf8Path,
        sink: &mut dyn std::io::Write,
    ) -> Result<(), WorkloadError<R::Error>> {
        let role = self.policy.role;
        let node = self.node.as_ref().ok_or(WorkloadError::NotProvisioned)?;
        let credentials = resolver.resolve()?;

        let command = self
            .policy
            .run_command(config_path)
            .ok_or(WorkloadError::NoEntrypoint { role })?;

        info!(pod = %node.name, "starting {role} task");
        self.executor
            .run_streaming(node, &credentials, &command, sink)
            .map_err(|source| WorkloadError::Task { role, source })?;
        Ok(())
    }

    /// Tears the pod down.
    ///
    /// # Errors
    ///
    /// Returns [`WorkloadError::Teardown`] when the provider request fails.
    pub async fn terminate(&mut self) -> Result<(), WorkloadError<R::Error>> {
        let node = self.node.take().ok_or(WorkloadError::NotProvisioned)?;
        self.controller
            .terminate(&node)
            .await
            .map_err(WorkloadError::Teardown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::SshDefaults;
    use crate::registry::NetworkStatus;
    use crate::test_support::{ScriptedConnector, ScriptedRegistry, ScriptedShell, StaticPrompt};
    use std::time::Duration;

    fn gpu() -> GpuSpec {
        GpuSpec {
            gpu_type: String::from("NVIDIA A40"),
            count: 1,
        }
    }

    fn resolver_with_key(
        key: &tempfile::NamedTempFile,
    ) -> CredentialResolver<StaticPrompt> {
        let defaults = SshDefaults {
            user: String::from("root"),
            key_path: key.path().to_string_lossy().into_owned(),
        };
        CredentialResolver::new(defaults, StaticPrompt::new("hunter2"))
    }

    fn ready_registry() -> ScriptedRegistry {
        let registry = ScriptedRegistry::new();
        registry.push_status(Some(NetworkStatus {
            public_ip: std::net::IpAddr::from([203, 0, 113, 9]),
            ssh_port_raw: 22,
        }));
        registry
    }

    fn workload(
        policy: NodePolicy,
        registry: &ScriptedRegistry,
        shell: &ScriptedShell,
    ) -> WorkloadNode<ScriptedRegistry, ScriptedConnector> {
        let controller = LifecycleController::new(registry.clone())
            .with_poll_interval(Duration::from_millis(1))
            .with_wait_timeout(Duration::from_millis(5));
        WorkloadNode::new(
            policy,
            controller,
            RemoteExecutor::new(ScriptedConnector::new(shell.clone())),
        )
    }

    #[test]
    fn run_command_composes_workspace_activation_and_entrypoint() {
        let policy = NodePolicy::finetune(gpu(), "/tmp/.env");
        assert_eq!(
            policy.run_command(Utf8Path::new("/app/config.yaml")),
            Some(String::from(
                "cd .. && cd app && source .venv/bin/activate && finetune /app/config.yaml"
            ))
        );
    }

    #[test]
    fn run_command_escapes_unusual_paths() {
        let policy = NodePolicy::inference(gpu(), "/tmp/.env");
        let command = policy
            .run_command(Utf8Path::new("/app/my config.yaml"))
            .expect("inference has an entrypoint");
        assert!(command.ends_with("infer '/app/my config.yaml'"), "{command}");
    }

    #[test]
    fn tracker_policy_has_no_entrypoint() {
        let policy = NodePolicy::tracker("vol-1", 8237);
        assert_eq!(policy.run_command(Utf8Path::new("/app/config.yaml")), None);
        assert_eq!(policy.role(), Role::Tracker);
    }

    #[test]
    fn finetune_spec_carries_template_and_gpu() {
        let spec = NodePolicy::finetune(gpu(), "/tmp/.env")
            .with_name("custom-finetune")
            .spec()
            .expect("spec should validate");
        assert_eq!(spec.name, "custom-finetune");
        assert_eq!(spec.template_id.as_deref(), Some(FINETUNE_TEMPLATE));
        assert_eq!(spec.gpu_count(), 1);
        assert_eq!(spec.volume_gb, 50);
    }

    #[tokio::test]
    async fn provision_deploys_env_file_with_restrictive_mode() {
        let key = tempfile::NamedTempFile::new().expect("temp key");
        let env_file = tempfile::NamedTempFile::new().expect("temp env");
        std::fs::write(env_file.path(), "API_KEY=secret\n").expect("write env");
        let env_path = env_file.path().to_string_lossy().into_owned();

        let registry = ready_registry();
        let shell = ScriptedShell::new();
        let mut node = workload(NodePolicy::finetune(gpu(), env_path), &registry, &shell);

        node.provision(&resolver_with_key(&key))
            .await
            .expect("provision should succeed");

        let pushes = shell.pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].dest, Utf8PathBuf::from(REMOTE_ENV_PATH));
        assert_eq!(pushes[0].content, b"API_KEY=secret\n".to_vec());
        assert_eq!(pushes[0].mode, 0o600);
        assert_eq!(node.endpoint().map(|(_, port)| port), Some(21));
    }

    #[tokio::test]
    async fn provision_forwards_private_key_when_enabled() {
        let key = tempfile::NamedTempFile::new().expect("temp key");
        std::fs::write(key.path(), "PRIVATE KEY\n").expect("write key");
        let key_name = key
            .path()
            .file_name()
            .expect("key file name")
            .to_string_lossy()
            .into_owned();
        let env_file = tempfile::NamedTempFile::new().expect("temp env");
        std::fs::write(env_file.path(), "API_KEY=secret\n").expect("write env");
        let env_path = env_file.path().to_string_lossy().into_owned();

        let registry = ready_registry();
        let shell = ScriptedShell::new();
        let policy = NodePolicy::finetune(gpu(), env_path).with_forwarded_key();
        let mut node = workload(policy, &registry, &shell);

        node.provision(&resolver_with_key(&key))
            .await
            .expect("provision should succeed");

        let pushes = shell.pushes();
        assert_eq!(pushes.len(), 2, "env file and key both land");
        assert_eq!(pushes[0].dest, Utf8PathBuf::from(REMOTE_ENV_PATH));
        assert_eq!(pushes[1].dest, Utf8PathBuf::from(format!("/root/.ssh/{key_name}")));
        assert_eq!(pushes[1].content, b"PRIVATE KEY\n".to_vec());
        assert_eq!(pushes[1].mode, 0o600);
    }

    #[tokio::test]
    async fn provision_fails_fast_when_env_file_is_missing() {
        let key = tempfile::NamedTempFile::new().expect("temp key");
        let registry = ready_registry();
        let shell = ScriptedShell::new();
        let mut node = workload(
            NodePolicy::finetune(gpu(), "/nonexistent/.env"),
            &registry,
            &shell,
        );

        let err = node
            .provision(&resolver_with_key(&key))
            .await
            .expect_err("missing env file should abort bootstrap");

        assert!(matches!(err, WorkloadError::MissingEnvFile { .. }));
        assert!(shell.pushes().is_empty());
    }

    #[tokio::test]
    async fn tracker_bootstrap_runs_startup_script() {
        let key = tempfile::NamedTempFile::new().expect("temp key");
        let registry = ready_registry();
        let shell = ScriptedShell::new();
        shell.push_captured("started", "", 0);
        let mut node = workload(NodePolicy::tracker("vol-1", 8237), &registry, &shell);

        node.provision(&resolver_with_key(&key))
            .await
            .expect("provision should succeed");

        let commands = shell.commands();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].contains("zenml up --port 8237"), "{}", commands[0]);
        assert_eq!(
            node.endpoint().map(|(_, port)| port),
            Some(22),
            "cpu pod keeps the raw port"
        );
    }

    #[tokio::test]
    async fn tracker_bootstrap_surfaces_script_stderr() {
        let key = tempfile::NamedTempFile::new().expect("temp key");
        let registry = ready_registry();
        let shell = ScriptedShell::new();
        shell.push_captured("", "address already in use", 0);
        let mut node = workload(NodePolicy::tracker("vol-1", 8237), &registry, &shell);

        let err = node
            .provision(&resolver_with_key(&key))
            .await
            .expect_err("stderr from the startup script should fail bootstrap");

        assert!(matches!(err, WorkloadError::BootstrapOutput { .. }));
    }

    #[tokio::test]
    async fn run_task_streams_composed_command() {
        let key = tempfile::NamedTempFile::new().expect("temp key");
        let env_file = tempfile::NamedTempFile::new().expect("temp env");
        let env_path = env_file.path().to_string_lossy().into_owned();

        let registry = ready_registry();
        let shell = ScriptedShell::new();
        shell.set_stream_chunks(&["epoch 1\n"]);
        let mut node = workload(NodePolicy::finetune(gpu(), env_path), &registry, &shell);
        let resolver = resolver_with_key(&key);

        node.provision(&resolver).await.expect("provision");
        let mut sink = Vec::new();
        node.run_task(&resolver, Utf8Path::new(REMOTE_CONFIG_PATH), &mut sink)
            .expect("task should stream");

        let commands = shell.commands();
        assert_eq!(
            commands.last().map(String::as_str),
            Some("cd .. && cd app && source .venv/bin/activate && finetune /app/config.yaml")
        );
        assert_eq!(sink, b"epoch 1\n".to_vec());
    }

    #[tokio::test]
    async fn terminate_requires_provisioned_pod() {
        let registry = ScriptedRegistry::new();
        let shell = ScriptedShell::new();
        let mut node = workload(NodePolicy::tracker("vol-1", 8237), &registry, &shell);

        let err = node.terminate().await.expect_err("nothing to terminate");
        assert!(matches!(err, WorkloadError::NotProvisioned));
    }

    #[tokio::test]
    async fn terminate_tears_down_provisioned_pod() {
        let key = tempfile::NamedTempFile::new().expect("temp key");
        let env_file = tempfile::NamedTempFile::new().expect("temp env");
        let env_path = env_file.path().to_string_lossy().into_owned();

        let registry = ready_registry();
        let shell = ScriptedShell::new();
        let mut node = workload(NodePolicy::finetune(gpu(), env_path), &registry, &shell);

        node.provision(&resolver_with_key(&key))
            .await
            .expect("provision");
        node.terminate().await.expect("terminate");

        assert_eq!(registry.terminated().len(), 1);
        assert!(node.endpoint().is_none(), "node handle is cleared");
    }
}
