//! Values carried between stages: retrieved documents, tool catalog entries,
//! tool results and guardrail verdicts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A document returned by the retriever together with its relevance score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub id: String,
    pub text: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ScoredDocument {
    pub fn new(id: impl Into<String>, text: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            score,
            metadata: HashMap::new(),
        }
    }
}

/// Parameters handed to the retriever.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalParams {
    /// Maximum number of candidates to return.
    pub top_k: usize,
    /// Knowledge-base table or collection to search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            top_k: 10,
            table: None,
        }
    }
}

/// Catalog entry published by a tool executor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// Terms that select this tool when they appear in the refined question.
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            keywords: Vec::new(),
        }
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Case-insensitive keyword match against a question.
    pub fn matches(&self, question: &str) -> bool {
        let question = question.to_lowercase();
        self.keywords
            .iter()
            .filter(|k| !k.trim().is_empty())
            .any(|k| question.contains(&k.to_lowercase()))
    }
}

/// Result of invoking one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success(serde_json::Value),
    Failure(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success(_))
    }
}

/// Everything the generator may ground its answer on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationContext {
    pub documents: Vec<ScoredDocument>,
    pub tool_results: Vec<ToolResult>,
}

impl GenerationContext {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.tool_results.is_empty()
    }

    /// Flatten the context into a prompt section.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, doc) in self.documents.iter().enumerate() {
            out.push_str(&format!("[{}] {}\n", i + 1, doc.text));
        }
        for result in &self.tool_results {
            match &result.outcome {
                ToolOutcome::Success(value) => {
                    out.push_str(&format!("tool {}: {}\n", result.tool, value));
                }
                ToolOutcome::Failure(reason) => {
                    out.push_str(&format!("tool {} failed: {}\n", result.tool, reason));
                }
            }
        }
        out
    }
}

/// Which side of the pipeline a guardrail check runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => write!(f, "inbound"),
            Self::Outbound => write!(f, "outbound"),
        }
    }
}

/// Guardrail decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "lowercase")]
pub enum Verdict {
    Allow,
    Reject(String),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}
