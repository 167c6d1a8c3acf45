//! Core library for the Gantry pod orchestration tool.
//!
//! The crate exposes a registry abstraction for provisioning short‑lived
//! rental pods, a RunPod implementation, and the lifecycle machinery that
//! powers an experiment (attach or create → wait for SSH readiness →
//! bootstrap → run → terminate).

pub mod config;
pub mod credentials;
pub mod exec;
pub mod experiment;
pub mod lifecycle;
pub mod node;
pub mod policy;
pub mod registry;
pub mod runpod;
pub mod test_support;
pub mod tunnel;

pub use config::{ConfigError, GantryConfig};
pub use credentials::{
    CredentialError, CredentialResolver, Credentials, PassphrasePrompt, SshDefaults,
    TerminalPrompt,
};
pub use exec::{
    ExecError, ExecMode, ExecutionResult, RemoteCommand, RemoteExecutor, ShellConnector,
    ShellSession, Ssh2Connector, StderrPolicy,
};
pub use experiment::{ExperimentError, FinetuneConfig, InferenceConfig, MasterConfig};
pub use lifecycle::{LifecycleController, LifecycleError};
pub use node::{ComputeNode, GpuSpec, NodeState, PodSpec, PodSpecBuilder, SpecError};
pub use policy::{Bootstrap, NodePolicy, Role, WorkloadError, WorkloadNode};
pub use registry::{NetworkStatus, NodeRegistry, PodSummary, RegistryFuture};
pub use runpod::{RunpodError, RunpodRegistry};
pub use tunnel::{DashboardTunnel, TunnelError};
