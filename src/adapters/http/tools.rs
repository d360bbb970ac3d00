//! Tool server client.
//!
//! `GET {api_base}/tools` lists descriptors, either as a bare array or as
//! `{"tools": [..]}`. `POST {api_base}/tools/{name}` invokes one tool with the
//! JSON arguments as body and answers `{"result": ..}` or `{"error": ".."}`.

use anyhow::{ensure, Result};
use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::{build_client, from_send_error, read_json};
use crate::domain::models::{ToolDescriptor, ToolsConfig};
use crate::domain::ports::{CollaboratorError, ToolExecutor};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CatalogResponse {
    Wrapped { tools: Vec<ToolDescriptor> },
    Bare(Vec<ToolDescriptor>),
}

#[derive(Debug, Clone)]
pub struct HttpToolExecutor {
    http_client: ReqwestClient,
    api_base: String,
    timeout: Duration,
}

impl HttpToolExecutor {
    pub fn new(config: &ToolsConfig) -> Result<Self> {
        ensure!(!config.api_base.is_empty(), "Tool executor needs an api_base");
        let timeout = Duration::from_secs(config.timeout_secs);
        Ok(Self {
            http_client: build_client(timeout)?,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            timeout,
        })
    }
}

fn invocation_result(tool: &str, body: Value) -> Result<Value, CollaboratorError> {
    match body {
        Value::Object(mut fields) => {
            if let Some(error) = fields.remove("error").filter(|e| !e.is_null()) {
                let reason = match error {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                return Err(CollaboratorError::ToolFailed {
                    tool: tool.to_string(),
                    reason,
                });
            }
            Ok(fields
                .remove("result")
                .unwrap_or(Value::Object(fields)))
        }
        other => Ok(other),
    }
}

#[async_trait]
impl ToolExecutor for HttpToolExecutor {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, CollaboratorError> {
        let response = self
            .http_client
            .get(format!("{}/tools", self.api_base))
            .send()
            .await
            .map_err(|e| from_send_error(&e, self.timeout))?;
        let catalog = match read_json(response, self.timeout).await? {
            CatalogResponse::Wrapped { tools } | CatalogResponse::Bare(tools) => tools,
        };
        Ok(catalog)
    }

    async fn invoke(&self, name: &str, args: Value) -> Result<Value, CollaboratorError> {
        let response = self
            .http_client
            .post(format!("{}/tools/{name}", self.api_base))
            .json(&args)
            .send()
            .await
            .map_err(|e| from_send_error(&e, self.timeout))?;
        let body: Value = read_json(response, self.timeout).await?;
        invocation_result(name, body)
    }
}
