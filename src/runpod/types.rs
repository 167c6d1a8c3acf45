//! Wire types for the RunPod REST API.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::node::PodSpec;

/// Instance type requested for CPU-only pods.
pub(crate) const CPU_INSTANCE_ID: &str = "cpu3c-2-4";

/// Cloud placement requested for every pod.
pub(crate) const CLOUD_TYPE: &str = "SECURE";

/// Internal port whose mapping carries the SSH daemon.
pub(crate) const SSH_INTERNAL_PORT: &str = "22";

/// Inventory record returned by `GET /pods`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PodRecord {
    pub(crate) id: String,
    pub(crate) name: String,
}

/// Status record returned by `GET /pods/{id}`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PodStatusRecord {
    #[serde(default)]
    pub(crate) public_ip: Option<String>,
    #[serde(default)]
    pub(crate) port_mappings: Option<HashMap<String, u16>>,
}

/// Provisioning request body for `POST /pods`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreatePodBody {
    pub(crate) name: String,
    pub(crate) image_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) template_id: Option<String>,
    pub(crate) volume_in_gb: u32,
    pub(crate) support_public_ip: bool,
    pub(crate) start_ssh: bool,
    pub(crate) cloud_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) gpu_type_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) gpu_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) network_volume_id: Option<String>,
}

impl CreatePodBody {
    /// Maps a [`PodSpec`] onto the provider request shape. CPU pods carry
    /// the fixed instance id instead of a GPU type.
    pub(crate) fn from_spec(spec: &PodSpec) -> Self {
        let (gpu_type_id, gpu_count, instance_id) = match &spec.gpu {
            Some(gpu) => (Some(gpu.gpu_type.clone()), Some(gpu.count), None),
            None => (None, None, Some(CPU_INSTANCE_ID.to_owned())),
        };

        Self {
            name: spec.name.clone(),
            image_name: spec.image.clone(),
            template_id: spec.template_id.clone(),
            volume_in_gb: spec.volume_gb,
            support_public_ip: true,
            start_ssh: true,
            cloud_type: CLOUD_TYPE.to_owned(),
            gpu_type_id,
            gpu_count,
            instance_id,
            network_volume_id: spec.network_volume_id.clone(),
        }
    }
}
