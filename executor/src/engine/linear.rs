//! In-process linear regression executor.

use async_trait::async_trait;
use batchgate_common::{Tensor, TensorData};

use super::ModelExecutor;
use crate::error::{ExecutionError, Result};

/// Computes `y = weight * x + bias` element-wise.
///
/// Input `i` produces output `OUTPUT__i` with the same shape.
pub struct LinearExecutor {
    weight: f32,
    bias: f32,
}

impl LinearExecutor {
    pub fn new(weight: f32, bias: f32) -> Self {
        Self { weight, bias }
    }
}

#[async_trait]
impl ModelExecutor for LinearExecutor {
    fn kind(&self) -> &'static str {
        "linear"
    }

    async fn execute(&self, model: &str, inputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        inputs
            .into_iter()
            .enumerate()
            .map(|(i, input)| {
                let datatype = input.datatype();
                let TensorData::Fp32(values) = input.data else {
                    return Err(ExecutionError::Unsupported(format!(
                        "{} expects FP32 inputs, '{}' is {}",
                        model, input.name, datatype
                    )));
                };
                let y = values.iter().map(|x| self.weight * x + self.bias).collect();
                Ok(Tensor::fp32(format!("OUTPUT__{}", i), input.shape, y)?)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_linear_batch() {
        let executor = LinearExecutor::new(2.5, 0.5);
        let input = Tensor::fp32("INPUT__0", vec![3, 1], vec![0.0, 1.0, 4.0]).unwrap();

        let outputs = executor.execute("linear_regression_model", vec![input]).await.unwrap();

        assert_eq!(outputs[0].name, "OUTPUT__0");
        assert_eq!(outputs[0].shape, vec![3, 1]);
        assert_eq!(outputs[0].as_fp32().unwrap(), &[0.5, 3.0, 10.5]);
    }

    #[tokio::test]
    async fn test_linear_rejects_non_float() {
        let executor = LinearExecutor::new(1.0, 0.0);
        let input = Tensor::bytes("text", vec![1], vec!["hi".to_string()]).unwrap();

        let err = executor.execute("m", vec![input]).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Unsupported(_)));
    }
}
