//! Provider inventory abstraction for pod provisioning.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use crate::node::PodSpec;

/// Inventory entry returned when listing or creating pods.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PodSummary {
    /// Provider-assigned identifier.
    pub id: String,
    /// Logical pod name.
    pub name: String,
}

/// Raw network details reported by the provider status endpoint.
///
/// `ssh_port_raw` is the mapping as reported; the lifecycle controller owns
/// the GPU port-correction rule and callers must not use the raw value
/// directly.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NetworkStatus {
    /// Public address assigned to the pod.
    pub public_ip: IpAddr,
    /// Uncorrected port mapping for the SSH daemon.
    pub ssh_port_raw: u16,
}

/// Future returned by registry operations.
pub type RegistryFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Minimal query/command interface to a provider's pod inventory.
///
/// Implementations perform no retries; retry policy belongs to the lifecycle
/// controller's callers.
pub trait NodeRegistry {
    /// Provider specific error type returned by the registry.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lists existing pods. An empty inventory is an empty vector, not an
    /// error.
    fn list(&self) -> RegistryFuture<'_, Vec<PodSummary>, Self::Error>;

    /// Submits a provisioning request. The returned summary carries a
    /// provider id; network fields remain unresolved.
    fn create<'a>(&'a self, spec: &'a PodSpec) -> RegistryFuture<'a, PodSummary, Self::Error>;

    /// Queries the status endpoint. Returns `None` (not an error) while the
    /// pod has no public address yet.
    fn network_status<'a>(
        &'a self,
        pod_id: &'a str,
    ) -> RegistryFuture<'a, Option<NetworkStatus>, Self::Error>;

    /// Requests teardown. Fire-and-forget; completion is not guaranteed to
    /// be synchronous on the provider side.
    fn terminate<'a>(&'a self, pod_id: &'a str) -> RegistryFuture<'a, (), Self::Error>;
}
