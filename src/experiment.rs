//! Master experiment configuration shared by finetune and inference runs.
//!
//! One YAML file carries both role sections; loading routes the shared
//! fields downward (model, data path, merged-model name, quantization) and
//! lifts the per-role GPU types upward so pod provisioning reads them from
//! one place.

use camino::Utf8Path;
use serde::Deserialize;
use thiserror::Error;

use crate::node::GpuSpec;

const MERGED_SUFFIX: &str = "-Merged";

const fn default_true() -> bool {
    true
}

fn default_gpu_type() -> String {
    String::from("NVIDIA A40")
}

const fn default_gpus() -> u32 {
    1
}

fn default_optimizer() -> String {
    String::from("paged_adamw_32bit")
}

const fn default_epochs() -> u32 {
    3
}

const fn default_micro_batch_size() -> u32 {
    2
}

const fn default_gradient_accumulation_steps() -> u32 {
    4
}

const fn default_learning_rate() -> f64 {
    2e-4
}

const fn default_lora_r() -> u32 {
    8
}

const fn default_lora_alpha() -> u32 {
    16
}

const fn default_lora_dropout() -> f64 {
    0.05
}

const fn default_sequence_len() -> u32 {
    1024
}

fn default_device_map() -> String {
    String::from("auto")
}

const fn default_seed() -> u64 {
    42
}

fn default_split() -> String {
    String::from("test")
}

const fn default_max_tokens() -> u32 {
    2048
}

/// Finetuning section of the master config.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FinetuneConfig {
    /// Model to finetune; filled from the master `base_model` on load.
    #[serde(default)]
    pub model_name: Option<String>,
    /// Training data path; filled from the master `data_path` on load.
    #[serde(default)]
    pub train_data_path: Option<String>,
    /// Output directory; filled from the master `name` on load.
    #[serde(default)]
    pub output_dir: Option<String>,
    /// Adapter kind, for example `lora`. Required.
    pub adapter: String,
    /// Load the model in 8-bit precision.
    #[serde(default)]
    pub load_in_8bit: bool,
    /// Load the model in 4-bit precision.
    #[serde(default)]
    pub load_in_4bit: bool,
    /// Use BF16 precision.
    #[serde(default)]
    pub bf16: bool,
    /// Use FP16 precision.
    #[serde(default = "default_true")]
    pub fp16: bool,
    /// Use gradient checkpointing.
    #[serde(default = "default_true")]
    pub gradient_checkpointing: bool,
    /// Optimizer name.
    #[serde(default = "default_optimizer")]
    pub optimizer: String,
    /// GPU type; lifted to the master on load.
    #[serde(default = "default_gpu_type")]
    pub gpu_type: String,
    /// Number of GPUs.
    #[serde(default = "default_gpus")]
    pub gpus: u32,
    /// Number of training epochs.
    #[serde(default = "default_epochs")]
    pub epochs: u32,
    /// Micro batch size.
    #[serde(default = "default_micro_batch_size")]
    pub micro_batch_size: u32,
    /// Gradient accumulation steps.
    #[serde(default = "default_gradient_accumulation_steps")]
    pub gradient_accumulation_steps: u32,
    /// Learning rate.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// LoRA rank.
    #[serde(default = "default_lora_r")]
    pub lora_r: u32,
    /// LoRA alpha.
    #[serde(default = "default_lora_alpha")]
    pub lora_alpha: u32,
    /// LoRA dropout.
    #[serde(default = "default_lora_dropout")]
    pub lora_dropout: f64,
    /// Maximum sequence length.
    #[serde(default = "default_sequence_len")]
    pub sequence_len: u32,
    /// Device map for model loading.
    #[serde(default = "default_device_map")]
    pub device_map: String,
    /// Use flash attention.
    #[serde(default)]
    pub flash_attention: bool,
    /// Random seed.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Save checkpoints during training.
    #[serde(default)]
    pub checkpointing: bool,
    /// Push model and checkpoints to the model hub.
    #[serde(default = "default_true")]
    pub push_to_hub: bool,
    /// Run validation during training.
    #[serde(default)]
    pub do_validation: bool,
    /// Merge adapter weights after training.
    #[serde(default = "default_true")]
    pub do_merge: bool,
    /// Adapter subfolder inside the adapter repository.
    #[serde(default)]
    pub adapter_subfolder: Option<String>,
}

/// Inference section of the master config.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct InferenceConfig {
    /// Model name or path; filled with the merged-model name on load.
    #[serde(default)]
    pub model: Option<String>,
    /// Dataset path or hub name; filled from the master `data_path` on load.
    #[serde(default)]
    pub test_data: Option<String>,
    /// Dataset split to run inference on.
    #[serde(default = "default_split")]
    pub split: String,
    /// GPU type; lifted to the master on load.
    #[serde(default = "default_gpu_type")]
    pub gpu_type: String,
    /// Number of GPUs.
    #[serde(default = "default_gpus")]
    pub gpus: u32,
    /// Quantization method; derived from the finetune 4/8-bit flags on load.
    #[serde(default)]
    pub quantization: Option<String>,
    /// Maximum tokens to generate.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// File path the inference output is written to. Required.
    pub output_file: String,
}

/// Master configuration combining finetune and inference settings.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MasterConfig {
    /// Base model to finetune. Required.
    pub base_model: String,
    /// Training data path or dataset name. Required.
    pub data_path: String,
    /// Resulting adapter name, doubling as the output directory. Required.
    pub name: String,
    /// GPU type for finetuning, lifted from the finetune section.
    #[serde(default)]
    pub gpu_type_finetune: Option<String>,
    /// GPU type for inference, lifted from the inference section.
    #[serde(default)]
    pub gpu_type_inference: Option<String>,
    /// Finetuning section.
    pub finetune: FinetuneConfig,
    /// Inference section.
    pub inference: InferenceConfig,
}

impl MasterConfig {
    /// Loads and routes the master config from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::Io`] when the file cannot be read and
    /// [`ExperimentError::Parse`] when the YAML does not match the schema.
    pub fn load(path: &Utf8Path) -> Result<Self, ExperimentError> {
        let text =
            std::fs::read_to_string(path.as_std_path()).map_err(|err| ExperimentError::Io {
                path: path.to_owned(),
                message: err.to_string(),
            })?;
        let mut config: Self =
            serde_yaml::from_str(&text).map_err(|err| ExperimentError::Parse(err.to_string()))?;
        config.route_shared_fields();
        Ok(config)
    }

    /// Routes shared fields between the sections: master values flow down
    /// into both roles, per-role GPU types flow up, and the inference
    /// quantization follows the finetune bit-width flags.
    fn route_shared_fields(&mut self) {
        self.gpu_type_finetune = Some(self.finetune.gpu_type.clone());
        self.gpu_type_inference = Some(self.inference.gpu_type.clone());

        self.finetune.model_name = Some(self.base_model.clone());
        self.finetune.train_data_path = Some(self.data_path.clone());
        self.finetune.output_dir = Some(self.name.clone());

        self.inference.model = Some(format!("{}{MERGED_SUFFIX}", self.name));
        self.inference.test_data = Some(self.data_path.clone());

        if self.finetune.load_in_4bit {
            self.inference.quantization = Some(String::from("4bit"));
        } else if self.finetune.load_in_8bit {
            self.inference.quantization = Some(String::from("8bit"));
        }
    }

    /// GPU shape requested for the finetune pod.
    #[must_use]
    pub fn finetune_gpu(&self) -> GpuSpec {
        GpuSpec {
            gpu_type: self
                .gpu_type_finetune
                .clone()
                .unwrap_or_else(|| self.finetune.gpu_type.clone()),
            count: self.finetune.gpus,
        }
    }

    /// GPU shape requested for the inference pod.
    #[must_use]
    pub fn inference_gpu(&self) -> GpuSpec {
        GpuSpec {
            gpu_type: self
                .gpu_type_inference
                .clone()
                .unwrap_or_else(|| self.inference.gpu_type.clone()),
            count: self.inference.gpus,
        }
    }
}

/// Errors raised while loading experiment configuration.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ExperimentError {
    /// Raised when the config file cannot be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// Path that could not be read.
        path: camino::Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the YAML does not match the expected schema.
    #[error("invalid experiment config: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL_YAML: &str = "\
base_model: meta-llama/Llama-3.1-8B
data_path: data/voice.jsonl
name: voice-adapter
finetune:
  adapter: lora
  load_in_4bit: true
  gpu_type: NVIDIA H100 PCIe
inference:
  output_file: out/predictions.jsonl
  gpus: 2
";

    fn load_fixture(yaml: &str) -> MasterConfig {
        let mut file = tempfile::NamedTempFile::new().expect("temp yaml");
        file.write_all(yaml.as_bytes()).expect("write yaml");
        let path = camino::Utf8PathBuf::from(file.path().to_string_lossy().into_owned());
        MasterConfig::load(&path).expect("config should load")
    }

    #[test]
    fn routing_pushes_master_fields_into_sections() {
        let config = load_fixture(MINIMAL_YAML);

        assert_eq!(
            config.finetune.model_name.as_deref(),
            Some("meta-llama/Llama-3.1-8B")
        );
        assert_eq!(
            config.finetune.train_data_path.as_deref(),
            Some("data/voice.jsonl")
        );
        assert_eq!(config.finetune.output_dir.as_deref(), Some("voice-adapter"));
        assert_eq!(
            config.inference.model.as_deref(),
            Some("voice-adapter-Merged")
        );
        assert_eq!(
            config.inference.test_data.as_deref(),
            Some("data/voice.jsonl")
        );
    }

    #[test]
    fn routing_lifts_gpu_types_upward() {
        let config = load_fixture(MINIMAL_YAML);

        assert_eq!(
            config.gpu_type_finetune.as_deref(),
            Some("NVIDIA H100 PCIe")
        );
        assert_eq!(config.gpu_type_inference.as_deref(), Some("NVIDIA A40"));
        assert_eq!(config.finetune_gpu().gpu_type, "NVIDIA H100 PCIe");
        assert_eq!(config.finetune_gpu().count, 1);
        assert_eq!(config.inference_gpu().count, 2);
    }

    #[test]
    fn quantization_follows_bit_width_flags() {
        let config = load_fixture(MINIMAL_YAML);
        assert_eq!(config.inference.quantization.as_deref(), Some("4bit"));

        let eight_bit = MINIMAL_YAML.replace("load_in_4bit", "load_in_8bit");
        let rerouted = load_fixture(&eight_bit);
        assert_eq!(rerouted.inference.quantization.as_deref(), Some("8bit"));
    }

    #[test]
    fn defaults_apply_to_omitted_fields() {
        let config = load_fixture(MINIMAL_YAML);

        assert_eq!(config.finetune.epochs, 3);
        assert_eq!(config.finetune.optimizer, "paged_adamw_32bit");
        assert!(config.finetune.fp16);
        assert!(config.finetune.do_merge);
        assert_eq!(config.inference.split, "test");
        assert_eq!(config.inference.max_tokens, 2048);
    }

    #[test]
    fn missing_required_field_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temp yaml");
        file.write_all(b"base_model: m\ndata_path: d\n")
            .expect("write yaml");
        let path = camino::Utf8PathBuf::from(file.path().to_string_lossy().into_owned());

        let err = MasterConfig::load(&path).expect_err("incomplete config should fail");
        assert!(matches!(err, ExperimentError::Parse(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = MasterConfig::load(camino::Utf8Path::new("/nonexistent/config.yaml"))
            .expect_err("missing file should fail");
        assert!(matches!(err, ExperimentError::Io { .. }));
    }
}
