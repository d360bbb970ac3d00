use async_trait::async_trait;

use super::errors::CollaboratorError;
use crate::domain::models::ToolDescriptor;

/// Executes named tools on behalf of the pipeline.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, CollaboratorError>;

    /// Invoke `name` with JSON arguments. A tool-level failure is reported as
    /// [`CollaboratorError::ToolFailed`].
    async fn invoke(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, CollaboratorError>;
}
