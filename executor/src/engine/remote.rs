//! Remote executor for KServe-v2 compatible inference servers.

use std::time::Duration;

use async_trait::async_trait;
use batchgate_common::{ErrorBody, InferRequest, InferResponse, Tensor};
use reqwest::Client;

use super::ModelExecutor;
use crate::error::{ExecutionError, Result};

/// Forwards each batch to `{base_url}/v2/models/{model}/infer`.
pub struct RemoteExecutor {
    http_client: Client,
    base_url: String,
    remote_model: Option<String>,
}

impl RemoteExecutor {
    pub fn new(base_url: &str, remote_model: Option<String>, timeout_secs: u64) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            remote_model,
        })
    }

    fn infer_url(&self, model: &str) -> String {
        let model = self.remote_model.as_deref().unwrap_or(model);
        format!("{}/v2/models/{}/infer", self.base_url, model)
    }
}

#[async_trait]
impl ModelExecutor for RemoteExecutor {
    fn kind(&self) -> &'static str {
        "remote"
    }

    async fn execute(&self, model: &str, inputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        let url = self.infer_url(model);
        let request = InferRequest { id: None, inputs };

        tracing::debug!("Forwarding batch for {} to {}", model, url);

        let response = self.http_client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            // KServe servers wrap the message as {"error": "..."}
            let body = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error)
                .unwrap_or(text);
            return Err(ExecutionError::Remote { status, body });
        }

        let response: InferResponse = response
            .json()
            .await
            .map_err(|e| ExecutionError::InvalidOutput(e.to_string()))?;

        Ok(response.outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn input() -> Tensor {
        Tensor::fp32("INPUT__0", vec![2, 1], vec![1.0, 2.0]).unwrap()
    }

    #[test]
    fn test_url_normalization() {
        let executor = RemoteExecutor::new("http://localhost:8000/", None, 5).unwrap();
        assert_eq!(
            executor.infer_url("linear_regression_model"),
            "http://localhost:8000/v2/models/linear_regression_model/infer"
        );
    }

    #[test]
    fn test_remote_model_override() {
        let executor =
            RemoteExecutor::new("http://localhost:8000", Some("resnet_model".to_string()), 5)
                .unwrap();
        assert_eq!(
            executor.infer_url("resnet"),
            "http://localhost:8000/v2/models/resnet_model/infer"
        );
    }

    #[tokio::test]
    async fn test_execute_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/models/linear_regression_model/infer"))
            .and(body_partial_json(json!({
                "inputs": [{"name": "INPUT__0", "shape": [2, 1], "datatype": "FP32"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model_name": "linear_regression_model",
                "outputs": [{
                    "name": "OUTPUT__0",
                    "shape": [2, 1],
                    "datatype": "FP32",
                    "data": [3.0, 5.5]
                }]
            })))
            .mount(&server)
            .await;

        let executor = RemoteExecutor::new(&server.uri(), None, 5).unwrap();
        let outputs = executor
            .execute("linear_regression_model", vec![input()])
            .await
            .unwrap();

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].name, "OUTPUT__0");
        assert_eq!(outputs[0].as_fp32().unwrap(), &[3.0, 5.5]);
    }

    #[tokio::test]
    async fn test_execute_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/models/sentiment/infer"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"error": "unexpected input"})),
            )
            .mount(&server)
            .await;

        let executor = RemoteExecutor::new(&server.uri(), None, 5).unwrap();
        let err = executor.execute("sentiment", vec![input()]).await.unwrap_err();

        match err {
            ExecutionError::Remote { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "unexpected input");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_execute_malformed_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let executor = RemoteExecutor::new(&server.uri(), None, 5).unwrap();
        let err = executor.execute("m", vec![input()]).await.unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidOutput(_)));
    }
}
