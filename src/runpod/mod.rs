//! RunPod REST implementation of the pod registry.

mod error;
mod types;

use std::net::IpAddr;
use std::str::FromStr;

use reqwest::Client;

use crate::node::PodSpec;
use crate::registry::{NetworkStatus, NodeRegistry, PodSummary, RegistryFuture};
use types::{CreatePodBody, PodRecord, PodStatusRecord, SSH_INTERNAL_PORT};

pub use error::RunpodError;

/// Default base URL for the RunPod REST API.
pub const DEFAULT_BASE_URL: &str = "https://rest.runpod.io/v1";

/// Registry client backed by the RunPod REST API.
///
/// Authenticates every request with the bearer token supplied at
/// construction. Performs no retries.
#[derive(Clone, Debug)]
pub struct RunpodRegistry {
    http: Client,
    api_key: String,
    base_url: String,
}

impl RunpodRegistry {
    /// Creates a client against the production API endpoint.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_owned(),
        }
    }

    /// Overrides the API base URL. Used by tests to point at a local stub.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, RunpodError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(RunpodError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn fetch_status(&self, pod_id: &str) -> Result<Option<NetworkStatus>, RunpodError> {
        let response = self
            .http
            .get(self.url(&format!("pods/{pod_id}")))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let record: PodStatusRecord = Self::check(response).await?.json().await?;
        status_from_record(&record)
    }
}

/// Interprets a status record, distinguishing "not yet reachable" from a
/// malformed response.
fn status_from_record(record: &PodStatusRecord) -> Result<Option<NetworkStatus>, RunpodError> {
    let Some(ip_text) = record.public_ip.as_deref().filter(|ip| !ip.is_empty()) else {
        return Ok(None);
    };

    let public_ip = IpAddr::from_str(ip_text).map_err(|_| RunpodError::MalformedResponse {
        message: format!("invalid public address '{ip_text}'"),
    })?;

    // A pod with a public address must expose the SSH mapping; its absence
    // is a provider contract violation, not a pending state.
    let ssh_port_raw = record
        .port_mappings
        .as_ref()
        .and_then(|mappings| mappings.get(SSH_INTERNAL_PORT))
        .copied()
        .ok_or_else(|| RunpodError::MalformedResponse {
            message: format!("port mapping for internal port {SSH_INTERNAL_PORT} missing"),
        })?;

    Ok(Some(NetworkStatus {
        public_ip,
        ssh_port_raw,
    }))
}

impl NodeRegistry for RunpodRegistry {
    type Error = RunpodError;

    fn list(&self) -> RegistryFuture<'_, Vec<PodSummary>, Self::Error> {
        Box::pin(async move {
            let response = self
                .http
                .get(self.url("pods"))
                .bearer_auth(&self.api_key)
                .send()
                .await?;
            let records: Vec<PodRecord> = Self::check(response).await?.json().await?;
            Ok(records
                .into_iter()
                .map(|record| PodSummary {
                    id: record.id,
                    name: record.name,
                })
                .collect())
        })
    }

    fn create<'a>(&'a self, spec: &'a PodSpec) -> RegistryFuture<'a, PodSummary, Self::Error> {
        Box::pin(async move {
            let body = CreatePodBody::from_spec(spec);
            let response = self
                .http
                .post(self.url("pods"))
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await?;
            let record: PodRecord = Self::check(response).await?.json().await?;
            Ok(PodSummary {
                id: record.id,
                name: record.name,
            })
        })
    }

    fn network_status<'a>(
        &'a self,
        pod_id: &'a str,
    ) -> RegistryFuture<'a, Option<NetworkStatus>, Self::Error> {
        Box::pin(self.fetch_status(pod_id))
    }

    fn terminate<'a>(&'a self, pod_id: &'a str) -> RegistryFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let response = self
                .http
                .delete(self.url(&format!("pods/{pod_id}")))
                .bearer_auth(&self.api_key)
                .send()
                .await?;
            Self::check(response).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::types::{CPU_INSTANCE_ID, CreatePodBody, PodStatusRecord};
    use super::*;
    use crate::node::{GpuSpec, PodSpec};

    fn gpu_spec() -> PodSpec {
        PodSpec::builder()
            .name("voice-finetune")
            .image("ghcr.io/acme/finetune:latest")
            .gpu(Some(GpuSpec {
                gpu_type: String::from("NVIDIA A40"),
                count: 2,
            }))
            .build()
            .expect("spec should validate")
    }

    #[test]
    fn create_body_for_gpu_pod_omits_cpu_instance() {
        let body = CreatePodBody::from_spec(&gpu_spec());
        assert_eq!(body.gpu_type_id.as_deref(), Some("NVIDIA A40"));
        assert_eq!(body.gpu_count, Some(2));
        assert!(body.instance_id.is_none());
        assert!(body.support_public_ip);
        assert!(body.start_ssh);
    }

    #[test]
    fn create_body_for_cpu_pod_uses_fixed_instance() {
        let spec = PodSpec::builder()
            .name("voice-tracker")
            .image("runpod/base:0.7.0-ubuntu2404")
            .build()
            .expect("spec should validate");
        let body = CreatePodBody::from_spec(&spec);
        assert!(body.gpu_type_id.is_none());
        assert_eq!(body.instance_id.as_deref(), Some(CPU_INSTANCE_ID));
    }

    #[test]
    fn create_body_serialises_camel_case_and_skips_absent_fields() {
        let body = CreatePodBody::from_spec(&gpu_spec());
        let json = serde_json::to_value(&body).expect("body should serialise");
        assert_eq!(json["imageName"], "ghcr.io/acme/finetune:latest");
        assert_eq!(json["gpuTypeId"], "NVIDIA A40");
        assert_eq!(json["cloudType"], "SECURE");
        assert!(json.get("instanceId").is_none());
        assert!(json.get("networkVolumeId").is_none());
    }

    #[test]
    fn status_without_address_is_unresolved() {
        let record: PodStatusRecord =
            serde_json::from_str(r#"{"publicIp": null}"#).expect("record should parse");
        let status = status_from_record(&record).expect("pending status is not an error");
        assert!(status.is_none());
    }

    #[test]
    fn status_with_address_and_mapping_resolves() {
        let record: PodStatusRecord =
            serde_json::from_str(r#"{"publicIp":"203.0.113.7","portMappings":{"22":10022}}"#)
                .expect("record should parse");
        let status = status_from_record(&record)
            .expect("status should parse")
            .expect("status should resolve");
        assert_eq!(status.public_ip.to_string(), "203.0.113.7");
        assert_eq!(status.ssh_port_raw, 10_022);
    }

    #[test]
    fn status_with_address_but_no_mapping_is_malformed() {
        let record: PodStatusRecord =
            serde_json::from_str(r#"{"publicIp":"203.0.113.7"}"#).expect("record should parse");
        let err = status_from_record(&record).expect_err("missing mapping should error");
        assert!(matches!(err, RunpodError::MalformedResponse { .. }));
    }

    #[test]
    fn api_error_display_includes_status() {
        let err = RunpodError::Api {
            status: 401,
            message: String::from("unauthorized"),
        };
        assert_eq!(
            err.to_string(),
            "provider API error (status 401): unauthorized"
        );
    }
}
