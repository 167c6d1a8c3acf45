//! Pod lifecycle reconciliation and readiness polling.
//!
//! The controller resolves a logical name against the provider inventory
//! (attach-or-create), then polls the status endpoint at a fixed interval
//! until the pod is network reachable, applying the GPU port-correction
//! rule. One controller instance manages one pod's lifecycle; callers
//! wanting several pods construct several controllers.

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::node::{ComputeNode, NodeState, PodSpec, SpecError};
use crate::registry::{NodeRegistry, PodSummary};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const WAIT_TIMEOUT: Duration = Duration::from_secs(900);

/// Errors surfaced while driving a pod's lifecycle.
#[derive(Debug, Error)]
pub enum LifecycleError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the supplied spec fails validation.
    #[error("invalid pod spec: {0}")]
    Spec(#[from] SpecError),
    /// Raised when a provider registry call fails. Not retried here; retry
    /// policy belongs to the caller.
    #[error("provider registry call failed: {0}")]
    Registry(#[source] E),
    /// Raised when the pod never becomes reachable within the wait budget.
    #[error("pod {name} did not become reachable within {} seconds", waited.as_secs())]
    ReachabilityTimeout {
        /// Logical pod name.
        name: String,
        /// Total time waited before giving up.
        waited: Duration,
    },
}

/// Drives one pod from a logical name to a reachable address.
#[derive(Clone, Debug)]
pub struct LifecycleController<R: NodeRegistry> {
    registry: R,
    poll_interval: Duration,
    wait_timeout: Duration,
}

impl<R: NodeRegistry> LifecycleController<R> {
    /// Creates a controller with production polling defaults.
    #[must_use]
    pub const fn new(registry: R) -> Self {
        Self {
            registry,
            poll_interval: POLL_INTERVAL,
            wait_timeout: WAIT_TIMEOUT,
        }
    }

    /// Overrides the readiness poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Overrides the readiness wait budget.
    #[must_use]
    pub const fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Attaches to the pod named in `spec` if the provider already knows
    /// it, otherwise creates it. Idempotent by name: a second call with the
    /// same name and any spec always attaches and never issues a second
    /// provisioning request.
    ///
    /// The returned node is in [`NodeState::Provisioning`]: it exists but
    /// may not yet be reachable.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Spec`] for invalid specs and
    /// [`LifecycleError::Registry`] when the inventory or provisioning call
    /// fails.
    pub async fn attach_or_create(
        &self,
        spec: &PodSpec,
    ) -> Result<ComputeNode, LifecycleError<R::Error>> {
        spec.validate()?;

        let pods = self
            .registry
            .list()
            .await
            .map_err(LifecycleError::Registry)?;

        let summary = match pods.into_iter().find(|pod| pod.name == spec.name) {
            Some(existing) => {
                info!(pod = %spec.name, id = %existing.id, "pod found, attaching");
                existing
            }
            None => {
                info!(pod = %spec.name, "no existing pod, provisioning");
                self.registry
                    .create(spec)
                    .await
                    .map_err(LifecycleError::Registry)?
            }
        };

        Ok(node_from_summary(summary, spec))
    }

    /// Polls the status endpoint at a fixed interval until the pod reports
    /// a public address, then applies the port-correction rule and marks
    /// the node [`NodeState::Reachable`].
    ///
    /// Checks happen at elapsed `0, interval, 2·interval, …` while
    /// `elapsed < timeout`, so a budget of ten seconds with a two-second
    /// interval yields exactly five checks.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Registry`] when a status query fails and
    /// [`LifecycleError::ReachabilityTimeout`] when the budget elapses; the
    /// node is then left in [`NodeState::TimedOut`] with its network fields
    /// unset. Timeout is a hard failure here, unlike earlier revisions of
    /// this tool which only logged it.
    pub async fn wait_until_reachable(
        &self,
        node: &mut ComputeNode,
    ) -> Result<(), LifecycleError<R::Error>> {
        let mut elapsed = Duration::ZERO;

        while elapsed < self.wait_timeout {
            let status = self
                .registry
                .network_status(&node.id)
                .await
                .map_err(LifecycleError::Registry)?;

            if let Some(network) = status {
                let port = effective_ssh_port(network.ssh_port_raw, node.gpu_count);
                node.public_ip = Some(network.public_ip);
                node.ssh_port = Some(port);
                node.state = NodeState::Reachable;
                info!(
                    pod = %node.name,
                    "pod available at {}:{port}",
                    network.public_ip
                );
                return Ok(());
            }

            debug!(pod = %node.name, elapsed = elapsed.as_secs(), "pod not reachable yet");
            sleep(self.poll_interval).await;
            elapsed += self.poll_interval;
        }

        node.state = NodeState::TimedOut;
        error!(pod = %node.name, "timed out waiting for pod to become reachable");
        Err(LifecycleError::ReachabilityTimeout {
            name: node.name.clone(),
            waited: self.wait_timeout,
        })
    }

    /// Requests teardown of the pod. Fire-and-forget on the provider side.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Registry`] when the teardown request fails.
    pub async fn terminate(
        &self,
        node: &ComputeNode,
    ) -> Result<(), LifecycleError<R::Error>> {
        self.registry
            .terminate(&node.id)
            .await
            .map_err(LifecycleError::Registry)?;
        info!(pod = %node.name, "pod terminated");
        Ok(())
    }
}

fn node_from_summary(summary: PodSummary, spec: &PodSpec) -> ComputeNode {
    ComputeNode {
        id: summary.id,
        name: summary.name,
        gpu_count: spec.gpu_count(),
        public_ip: None,
        ssh_port: None,
        state: NodeState::Provisioning,
    }
}

/// Applies the provider's port-correction quirk: GPU pods report the UDP
/// mapping for the SSH internal port, and the true TCP port is one below
/// it; CPU pods report the TCP port directly.
#[must_use]
pub const fn effective_ssh_port(raw_port: u16, gpu_count: u32) -> u16 {
    if gpu_count > 0 {
        raw_port.saturating_sub(1)
    } else {
        raw_port
    }
}
