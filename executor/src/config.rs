//! Executor configuration.

use serde::Deserialize;

/// Which executor serves a model, tagged by `kind`.
///
/// ```toml
/// executor = { kind = "remote", base_url = "http://localhost:8000" }
/// executor = { kind = "linear", weight = 2.5, bias = 0.5 }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutorConfig {
    /// KServe-v2 compatible inference server.
    Remote {
        base_url: String,
        /// Upstream model name, if it differs from the gateway's name.
        #[serde(default)]
        remote_model: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    /// In-process `y = weight * x + bias`.
    Linear {
        #[serde(default = "default_weight")]
        weight: f32,
        #[serde(default)]
        bias: f32,
    },
}

// Default values
fn default_timeout_secs() -> u64 {
    300
}
fn default_weight() -> f32 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_defaults() {
        let config: ExecutorConfig =
            serde_json::from_str(r#"{"kind": "remote", "base_url": "http://triton:8000"}"#)
                .unwrap();
        assert_eq!(
            config,
            ExecutorConfig::Remote {
                base_url: "http://triton:8000".to_string(),
                remote_model: None,
                timeout_secs: 300,
            }
        );
    }

    #[test]
    fn test_linear_defaults() {
        let config: ExecutorConfig = serde_json::from_str(r#"{"kind": "linear"}"#).unwrap();
        assert_eq!(
            config,
            ExecutorConfig::Linear {
                weight: 1.0,
                bias: 0.0
            }
        );
    }
}
