//! Per-model pre- and post-processing.
//!
//! Each model is registered with one `Processor`, picked by its configured
//! kind. `preprocess` runs at submission and is where malformed inputs are
//! rejected, so the batching path only ever sees validated tensors.
//! `postprocess` runs on each request's slice of the executor output.

mod label_decoder;

pub use label_decoder::LabelDecoder;

use std::collections::HashSet;
use std::sync::Arc;

use batchgate_common::Tensor;
use serde::Deserialize;

use crate::config::ConfigError;
use crate::error::{GatewayError, Result};

/// Pre/post-processing capability of a model.
pub trait Processor: Send + Sync {
    /// Short identifier (e.g., "passthrough", "label_decoder").
    fn kind(&self) -> &'static str;

    /// Validate and transform one request's inputs.
    fn preprocess(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>>;

    /// Transform one request's outputs.
    fn postprocess(&self, outputs: Vec<Tensor>) -> Result<Vec<Tensor>>;
}

/// Forwards tensors unchanged after validation.
#[derive(Debug, Default)]
pub struct Passthrough;

impl Processor for Passthrough {
    fn kind(&self) -> &'static str {
        "passthrough"
    }

    fn preprocess(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        validate_inputs(&inputs)?;
        Ok(inputs)
    }

    fn postprocess(&self, outputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        Ok(outputs)
    }
}

/// Checks every processor applies before a request may be queued.
///
/// Requires at least one input, unique names, well-formed tensors, and the
/// same non-zero batch dimension across all inputs.
pub fn validate_inputs(inputs: &[Tensor]) -> Result<()> {
    let first = inputs
        .first()
        .ok_or_else(|| GatewayError::InvalidInput("request has no input tensors".to_string()))?;

    let mut names = HashSet::new();
    for input in inputs {
        input
            .validate()
            .map_err(|e| GatewayError::InvalidInput(e.to_string()))?;
        if !names.insert(input.name.as_str()) {
            return Err(GatewayError::InvalidInput(format!(
                "duplicate input '{}'",
                input.name
            )));
        }
        if input.rows() != first.rows() {
            return Err(GatewayError::InvalidInput(format!(
                "input '{}' has batch dimension {}, '{}' has {}",
                input.name,
                input.rows(),
                first.name,
                first.rows()
            )));
        }
    }

    if first.rows() == 0 {
        return Err(GatewayError::InvalidInput(
            "batch dimension must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Processor selection in model config, tagged by `kind`.
///
/// ```toml
/// processor = { kind = "label_decoder", labels_path = "imagenet_labels.json" }
/// ```
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessorConfig {
    #[default]
    Passthrough,
    LabelDecoder {
        /// JSON array of label strings.
        #[serde(default)]
        labels_path: Option<String>,
        /// Inline labels, used when `labels_path` is unset.
        #[serde(default)]
        labels: Vec<String>,
        /// Score tensor to decode; the first FP32 output if unset.
        #[serde(default)]
        scores: Option<String>,
        #[serde(default = "default_label_output")]
        output: String,
    },
}

fn default_label_output() -> String {
    "LABELS".to_string()
}

/// Build the processor for `model` from its config.
pub fn build(
    model: &str,
    config: &ProcessorConfig,
) -> std::result::Result<Arc<dyn Processor>, ConfigError> {
    match config {
        ProcessorConfig::Passthrough => Ok(Arc::new(Passthrough)),
        ProcessorConfig::LabelDecoder {
            labels_path,
            labels,
            scores,
            output,
        } => {
            let labels = match labels_path {
                Some(path) => label_decoder::load_labels(path)?,
                None => labels.clone(),
            };
            if labels.is_empty() {
                return Err(ConfigError::Invalid {
                    model: model.to_string(),
                    reason: "label_decoder needs labels or labels_path".to_string(),
                });
            }
            tracing::info!("Loaded {} labels for model {}", labels.len(), model);
            Ok(Arc::new(LabelDecoder::new(labels, scores.clone(), output.clone())))
        }
    }
}
