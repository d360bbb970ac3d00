//! In-process collaborators.
//!
//! Used by `--offline` runs of the CLI and as test doubles. None of them
//! perform I/O.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::models::{
    Direction, GenerationContext, RetrievalParams, ScoredDocument, ToolDescriptor, ToolOutcome,
    Verdict,
};
use crate::domain::ports::{
    Collaborators, CollaboratorError, Enhancer, Generator, GuardrailChecker, Reranker, Retriever,
    ToolExecutor,
};

/// Searches a fixed corpus by term overlap.
#[derive(Debug, Clone, Default)]
pub struct StaticRetriever {
    documents: Vec<ScoredDocument>,
}

impl StaticRetriever {
    pub fn new(documents: Vec<ScoredDocument>) -> Self {
        Self { documents }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    fn terms(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
            .map(str::to_lowercase)
            .collect()
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn search(
        &self,
        query: &str,
        params: &RetrievalParams,
    ) -> Result<Vec<ScoredDocument>, CollaboratorError> {
        let terms = Self::terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<ScoredDocument> = self
            .documents
            .iter()
            .filter_map(|doc| {
                let text = doc.text.to_lowercase();
                let matched = terms.iter().filter(|t| text.contains(t.as_str())).count();
                (matched > 0).then(|| ScoredDocument {
                    score: matched as f64 / terms.len() as f64,
                    ..doc.clone()
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(params.top_k);
        Ok(hits)
    }
}

/// Orders candidates by their existing score, highest first.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreReranker;

#[async_trait]
impl Reranker for ScoreReranker {
    async fn rerank(
        &self,
        _query: &str,
        mut documents: Vec<ScoredDocument>,
    ) -> Result<Vec<ScoredDocument>, CollaboratorError> {
        // Stable sort keeps retrieval order among equal scores.
        documents.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(documents)
    }
}

/// Returns the question unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughEnhancer;

#[async_trait]
impl Enhancer for PassthroughEnhancer {
    async fn enhance(
        &self,
        question: &str,
        _context: &[ScoredDocument],
    ) -> Result<String, CollaboratorError> {
        Ok(question.to_string())
    }
}

/// Tools with canned outcomes.
#[derive(Debug, Clone, Default)]
pub struct StaticToolExecutor {
    catalog: Vec<ToolDescriptor>,
    outcomes: HashMap<String, ToolOutcome>,
}

impl StaticToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool that always returns `value`.
    pub fn with_tool(mut self, descriptor: ToolDescriptor, value: Value) -> Self {
        self.outcomes
            .insert(descriptor.name.clone(), ToolOutcome::Success(value));
        self.catalog.push(descriptor);
        self
    }

    /// Register a tool that always fails with `reason`.
    pub fn with_failing_tool(mut self, descriptor: ToolDescriptor, reason: impl Into<String>) -> Self {
        self.outcomes
            .insert(descriptor.name.clone(), ToolOutcome::Failure(reason.into()));
        self.catalog.push(descriptor);
        self
    }
}

#[async_trait]
impl ToolExecutor for StaticToolExecutor {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, CollaboratorError> {
        Ok(self.catalog.clone())
    }

    async fn invoke(&self, name: &str, _args: Value) -> Result<Value, CollaboratorError> {
        match self.outcomes.get(name) {
            Some(ToolOutcome::Success(value)) => Ok(value.clone()),
            Some(ToolOutcome::Failure(reason)) => Err(CollaboratorError::ToolFailed {
                tool: name.to_string(),
                reason: reason.clone(),
            }),
            None => Err(CollaboratorError::InvalidInput(format!("unknown tool: {name}"))),
        }
    }
}

/// Always answers with the same text.
#[derive(Debug, Clone)]
pub struct CannedGenerator {
    answer: String,
}

impl CannedGenerator {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
        }
    }
}

#[async_trait]
impl Generator for CannedGenerator {
    async fn generate(
        &self,
        _prompt: &str,
        _context: &GenerationContext,
    ) -> Result<String, CollaboratorError> {
        Ok(self.answer.clone())
    }
}

/// Answers from the context: the first successful tool result, else the best
/// document, else a fixed apology.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractiveGenerator;

impl ExtractiveGenerator {
    pub const NO_CONTEXT: &'static str = "I could not find any information to answer that.";
}

#[async_trait]
impl Generator for ExtractiveGenerator {
    async fn generate(
        &self,
        prompt: &str,
        context: &GenerationContext,
    ) -> Result<String, CollaboratorError> {
        if prompt.trim().is_empty() {
            return Err(CollaboratorError::InvalidInput("empty prompt".to_string()));
        }

        let from_tool = context.tool_results.iter().find_map(|r| match &r.outcome {
            ToolOutcome::Success(Value::String(s)) => Some(s.clone()),
            ToolOutcome::Success(value) => Some(value.to_string()),
            ToolOutcome::Failure(_) => None,
        });
        let answer = from_tool
            .or_else(|| context.documents.first().map(|d| d.text.clone()))
            .unwrap_or_else(|| Self::NO_CONTEXT.to_string());
        Ok(answer)
    }
}

/// Approves everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllGuardrail;

#[async_trait]
impl GuardrailChecker for AllowAllGuardrail {
    async fn check(&self, _content: &str, _direction: Direction) -> Result<Verdict, CollaboratorError> {
        Ok(Verdict::Allow)
    }
}

/// Rejects content containing a blocked term.
#[derive(Debug, Clone, Default)]
pub struct KeywordGuardrail {
    inbound: Vec<String>,
    outbound: Vec<String>,
}

impl KeywordGuardrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_inbound(mut self, term: impl Into<String>) -> Self {
        self.inbound.push(term.into().to_lowercase());
        self
    }

    pub fn block_outbound(mut self, term: impl Into<String>) -> Self {
        self.outbound.push(term.into().to_lowercase());
        self
    }
}

#[async_trait]
impl GuardrailChecker for KeywordGuardrail {
    async fn check(&self, content: &str, direction: Direction) -> Result<Verdict, CollaboratorError> {
        let blocked = match direction {
            Direction::Inbound => &self.inbound,
            Direction::Outbound => &self.outbound,
        };
        let lowered = content.to_lowercase();
        Ok(blocked
            .iter()
            .find(|term| lowered.contains(term.as_str()))
            .map_or(Verdict::Allow, |term| {
                Verdict::Reject(format!("{direction} content mentions '{term}'"))
            }))
    }
}

/// Collaborators that need no network: empty corpus, no tools, extractive
/// answers, permissive guardrails.
pub fn offline_collaborators() -> Collaborators {
    Collaborators {
        retriever: Arc::new(StaticRetriever::empty()),
        reranker: Arc::new(ScoreReranker),
        enhancer: Arc::new(PassthroughEnhancer),
        tools: Arc::new(StaticToolExecutor::new()),
        generator: Arc::new(ExtractiveGenerator),
        guardrail: Arc::new(AllowAllGuardrail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ToolResult;
    use serde_json::json;

    fn corpus() -> StaticRetriever {
        StaticRetriever::new(vec![
            ScoredDocument::new("d1", "X peaked in April", 0.0),
            ScoredDocument::new("d2", "Y is stable all year", 0.0),
            ScoredDocument::new("d3", "The maximum value of X in April was 42", 0.0),
        ])
    }

    #[tokio::test]
    async fn test_static_retriever_scores_by_overlap() {
        let hits = corpus()
            .search("maximum value April", &RetrievalParams::default())
            .await
            .unwrap();
        let ids: Vec<_> = hits.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d3", "d1"]);
        assert!((hits[0].score - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_static_retriever_respects_top_k() {
        let params = RetrievalParams {
            top_k: 1,
            table: None,
        };
        let hits = corpus().search("April", &params).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(StaticRetriever::empty()
            .search("April", &params)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_static_tools() {
        let tools = StaticToolExecutor::new()
            .with_tool(ToolDescriptor::new("max", ""), json!(42))
            .with_failing_tool(ToolDescriptor::new("plot", ""), "offline");
        assert_eq!(tools.list_tools().await.unwrap().len(), 2);
        assert_eq!(tools.invoke("max", json!({})).await.unwrap(), json!(42));
        assert!(matches!(
            tools.invoke("plot", json!({})).await,
            Err(CollaboratorError::ToolFailed { .. })
        ));
        assert!(matches!(
            tools.invoke("missing", json!({})).await,
            Err(CollaboratorError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_extractive_generator_prefers_tool_results() {
        let context = GenerationContext {
            documents: vec![ScoredDocument::new("d1", "X peaked in April", 0.5)],
            tool_results: vec![
                ToolResult {
                    tool: "plot".into(),
                    outcome: ToolOutcome::Failure("offline".into()),
                },
                ToolResult {
                    tool: "max".into(),
                    outcome: ToolOutcome::Success(json!(42)),
                },
            ],
        };
        let answer = ExtractiveGenerator.generate("q", &context).await.unwrap();
        assert_eq!(answer, "42");

        let docs_only = GenerationContext {
            tool_results: vec![],
            ..context
        };
        let answer = ExtractiveGenerator.generate("q", &docs_only).await.unwrap();
        assert_eq!(answer, "X peaked in April");

        let answer = ExtractiveGenerator
            .generate("q", &GenerationContext::default())
            .await
            .unwrap();
        assert_eq!(answer, ExtractiveGenerator::NO_CONTEXT);
    }

    #[tokio::test]
    async fn test_keyword_guardrail_checks_each_direction() {
        let guardrail = KeywordGuardrail::new()
            .block_inbound("password")
            .block_outbound("secret");
        assert_eq!(
            guardrail
                .check("What is the admin PASSWORD?", Direction::Inbound)
                .await
                .unwrap(),
            Verdict::Reject("inbound content mentions 'password'".into())
        );
        assert!(guardrail
            .check("a secret", Direction::Inbound)
            .await
            .unwrap()
            .is_allowed());
        assert!(!guardrail
            .check("the secret is 42", Direction::Outbound)
            .await
            .unwrap()
            .is_allowed());
    }
}
