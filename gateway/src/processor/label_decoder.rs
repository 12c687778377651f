//! Classifier post-processing: score rows to label strings.

use std::fs;

use batchgate_common::{DataType, Tensor};

use super::{validate_inputs, Processor};
use crate::config::ConfigError;
use crate::error::{GatewayError, Result};

/// Label used when the winning class has no entry in the label list.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Replaces a `[rows, classes]` score tensor with a `[rows]` BYTES tensor of
/// the arg-max labels.
pub struct LabelDecoder {
    labels: Vec<String>,
    scores: Option<String>,
    output: String,
}

impl LabelDecoder {
    pub fn new(labels: Vec<String>, scores: Option<String>, output: String) -> Self {
        Self {
            labels,
            scores,
            output,
        }
    }

    fn label_for(&self, index: usize) -> String {
        match self.labels.get(index) {
            Some(label) => label.clone(),
            None => {
                tracing::warn!("Invalid prediction index: {}, using '{}'", index, UNKNOWN_LABEL);
                UNKNOWN_LABEL.to_string()
            }
        }
    }
}

impl Processor for LabelDecoder {
    fn kind(&self) -> &'static str {
        "label_decoder"
    }

    fn preprocess(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        validate_inputs(&inputs)?;
        Ok(inputs)
    }

    fn postprocess(&self, outputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        let scores = outputs
            .iter()
            .find(|t| match &self.scores {
                Some(name) => &t.name == name,
                None => t.datatype() == DataType::Fp32,
            })
            .ok_or_else(|| {
                GatewayError::ExecutionFailed("no FP32 score tensor in executor output".to_string())
            })?;

        let values = scores.as_fp32().ok_or_else(|| {
            GatewayError::ExecutionFailed(format!("score tensor '{}' is not FP32", scores.name))
        })?;
        let width = scores.row_width().unwrap_or(0);
        if width == 0 || values.len() % width != 0 {
            return Err(GatewayError::ExecutionFailed(format!(
                "score tensor '{}' has shape {:?}, expected [rows, classes]",
                scores.name, scores.shape
            )));
        }

        let labels: Vec<String> = values
            .chunks(width)
            .map(|row| self.label_for(argmax(row)))
            .collect();

        let decoded = Tensor::bytes(self.output.clone(), vec![labels.len()], labels)
            .map_err(|e| GatewayError::ExecutionFailed(e.to_string()))?;
        Ok(vec![decoded])
    }
}

/// Index of the largest value; the first one wins ties. NaN never wins.
fn argmax(row: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] || row[best].is_nan() {
            best = i;
        }
    }
    best
}

/// Read a JSON array of labels, as shipped next to classifier models.
pub(super) fn load_labels(path: &str) -> std::result::Result<Vec<String>, ConfigError> {
    let text = fs::read_to_string(path).map_err(|e| ConfigError::Labels {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&text).map_err(|e| ConfigError::Labels {
        path: path.to_string(),
        reason: e.to_string(),
    })
}
