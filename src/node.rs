//! Data model for provisioned compute pods.

use std::net::IpAddr;

use thiserror::Error;

/// Lifecycle states tracked for a [`ComputeNode`].
///
/// A node moves `Requested → Provisioning → Reachable`; `TimedOut` is a
/// terminal state entered only from `Provisioning` when the readiness wait
/// exhausts its budget.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeState {
    /// A provisioning request has been issued but not yet reconciled.
    Requested,
    /// The provider knows the pod but it is not yet network reachable.
    Provisioning,
    /// A public address and usable SSH port are known.
    Reachable,
    /// The readiness wait elapsed without the pod becoming reachable.
    TimedOut,
}

/// GPU shape requested for a pod.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GpuSpec {
    /// Provider GPU type identifier (for example `NVIDIA A40`).
    pub gpu_type: String,
    /// Number of GPUs to attach.
    pub count: u32,
}

/// A remotely hosted compute pod tracked from provisioning to reachability.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ComputeNode {
    /// Provider-assigned identifier.
    pub id: String,
    /// Logical name, unique per active pod from this system's point of view.
    pub name: String,
    /// Number of GPUs attached; drives the SSH port-correction rule.
    pub gpu_count: u32,
    /// Public address, unset until the pod is reachable.
    pub public_ip: Option<IpAddr>,
    /// Corrected SSH port, unset until the pod is reachable.
    pub ssh_port: Option<u16>,
    /// Current lifecycle state.
    pub state: NodeState,
}

impl ComputeNode {
    /// Returns the address and port once the node is reachable.
    #[must_use]
    pub const fn endpoint(&self) -> Option<(IpAddr, u16)> {
        match (self.public_ip, self.ssh_port) {
            (Some(ip), Some(port)) => Some((ip, port)),
            _ => None,
        }
    }
}

/// Parameters required to provision a new pod.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PodSpec {
    /// Logical pod name used for attach-or-create reconciliation.
    pub name: String,
    /// Container image booted on the pod.
    pub image: String,
    /// Optional provisioning template identifier.
    pub template_id: Option<String>,
    /// Disk volume size in GiB.
    pub volume_gb: u32,
    /// GPU shape; `None` requests a CPU-only pod.
    pub gpu: Option<GpuSpec>,
    /// Optional network volume attached to the pod.
    pub network_volume_id: Option<String>,
}

impl PodSpec {
    /// Starts a builder for a [`PodSpec`].
    #[must_use]
    pub fn builder() -> PodSpecBuilder {
        PodSpecBuilder::new()
    }

    /// Number of GPUs the spec requests.
    #[must_use]
    pub fn gpu_count(&self) -> u32 {
        self.gpu.as_ref().map_or(0, |gpu| gpu.count)
    }

    /// Validates the spec, returning a descriptive error when a required
    /// field is missing.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Validation`] when a required field is empty or a
    /// GPU shape requests zero GPUs.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.name.is_empty() {
            return Err(SpecError::Validation("name".to_owned()));
        }
        if self.image.is_empty() {
            return Err(SpecError::Validation("image".to_owned()));
        }
        if self.volume_gb == 0 {
            return Err(SpecError::Validation("volume_gb".to_owned()));
        }
        if let Some(gpu) = &self.gpu {
            if gpu.gpu_type.is_empty() {
                return Err(SpecError::Validation("gpu_type".to_owned()));
            }
            if gpu.count == 0 {
                return Err(SpecError::Validation("gpu_count".to_owned()));
            }
        }
        Ok(())
    }
}

/// Builder for [`PodSpec`] that defers trimming and validation to
/// construction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PodSpecBuilder {
    name: String,
    image: String,
    template_id: Option<String>,
    volume_gb: u32,
    gpu: Option<GpuSpec>,
    network_volume_id: Option<String>,
}

impl PodSpecBuilder {
    /// Creates an empty builder; fields must be populated before build.
    #[must_use]
    pub fn new() -> Self {
        Self {
            volume_gb: 50,
            ..Self::default()
        }
    }

    /// Sets the logical pod name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the container image.
    #[must_use]
    pub fn image(mut self, value: impl Into<String>) -> Self {
        self.image = value.into();
        self
    }

    /// Sets the optional provisioning template.
    #[must_use]
    pub fn template_id(mut self, value: Option<String>) -> Self {
        self.template_id = value;
        self
    }

    /// Sets the disk volume size in GiB.
    #[must_use]
    pub const fn volume_gb(mut self, value: u32) -> Self {
        self.volume_gb = value;
        self
    }

    /// Sets the GPU shape.
    #[must_use]
    pub fn gpu(mut self, value: Option<GpuSpec>) -> Self {
        self.gpu = value;
        self
    }

    /// Sets the optional network volume identifier.
    #[must_use]
    pub fn network_volume_id(mut self, value: Option<String>) -> Self {
        self.network_volume_id = value;
        self
    }

    /// Builds and validates the [`PodSpec`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Validation`] when any required field is empty.
    pub fn build(self) -> Result<PodSpec, SpecError> {
        let spec = PodSpec {
            name: self.name.trim().to_owned(),
            image: self.image.trim().to_owned(),
            template_id: self.template_id.map(|value| value.trim().to_owned()),
            volume_gb: self.volume_gb,
            gpu: self.gpu.map(|gpu| GpuSpec {
                gpu_type: gpu.gpu_type.trim().to_owned(),
                count: gpu.count,
            }),
            network_volume_id: self
                .network_volume_id
                .map(|value| value.trim().to_owned()),
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// Errors raised while constructing pod specs.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SpecError {
    /// Raised when a spec is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn gpu_spec() -> GpuSpec {
        GpuSpec {
            gpu_type: String::from("NVIDIA A40"),
            count: 1,
        }
    }

    #[test]
    fn builder_trims_and_validates() {
        let spec = PodSpec::builder()
            .name("  voice-finetune  ")
            .image(" ghcr.io/acme/finetune:latest ")
            .template_id(Some(String::from(" tmpl ")))
            .gpu(Some(gpu_spec()))
            .build()
            .expect("spec should validate");

        assert_eq!(spec.name, "voice-finetune");
        assert_eq!(spec.image, "ghcr.io/acme/finetune:latest");
        assert_eq!(spec.template_id.as_deref(), Some("tmpl"));
        assert_eq!(spec.volume_gb, 50);
        assert_eq!(spec.gpu_count(), 1);
    }

    #[rstest]
    #[case("", "img", "name")]
    #[case("pod", "", "image")]
    fn builder_rejects_empty_required_fields(
        #[case] name: &str,
        #[case] image: &str,
        #[case] field: &str,
    ) {
        let err = PodSpec::builder()
            .name(name)
            .image(image)
            .build()
            .expect_err("empty field should be rejected");
        assert_eq!(err, SpecError::Validation(field.to_owned()));
    }

    #[test]
    fn builder_rejects_zero_gpu_count() {
        let err = PodSpec::builder()
            .name("pod")
            .image("img")
            .gpu(Some(GpuSpec {
                gpu_type: String::from("NVIDIA A40"),
                count: 0,
            }))
            .build()
            .expect_err("zero gpu count should be rejected");
        assert_eq!(err, SpecError::Validation(String::from("gpu_count")));
    }

    #[test]
    fn endpoint_requires_both_network_fields() {
        let mut node = ComputeNode {
            id: String::from("p1"),
            name: String::from("pod"),
            gpu_count: 0,
            public_ip: Some(std::net::IpAddr::from([203, 0, 113, 9])),
            ssh_port: None,
            state: NodeState::Provisioning,
        };
        assert!(node.endpoint().is_none());

        node.ssh_port = Some(22);
        assert!(node.endpoint().is_some());
    }
}
