//! Stage handlers: one command handler per pipeline stage.
//!
//! Each handler calls its collaborator, translates collaborator errors into
//! [`HandlerError`] and returns the next stage's command. Guardrail verdicts
//! surface as [`HandlerError::Rejected`]. The final check returns the answer
//! instead of a follow-up command.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use super::event_handlers::{AuditLogger, NotificationForwarder, OBSERVED_EVENTS};
use super::handler_registry::{CommandHandler, CommandOutput, HandlerContext, HandlerRegistry};
use crate::domain::errors::{ConfigurationError, HandlerError};
use crate::domain::models::{
    Command, CommandKind, CommandPayload, Direction, Event, EventPayload, GenerationContext,
    RetrievalConfig, RetrievalParams, Stage, ToolOutcome, ToolResult, Verdict,
};

fn unexpected(handler: &str, command: &Command) -> HandlerError {
    HandlerError::fatal(format!("{handler} cannot handle {} commands", command.kind()))
}

fn completed(command: &Command, stage: Stage, detail: impl Into<String>) -> Event {
    command.event(EventPayload::StageCompleted {
        stage,
        detail: detail.into(),
    })
}

/// Accepts the user's question and starts the pipeline.
#[derive(Debug, Default)]
pub struct IntakeHandler;

#[async_trait]
impl CommandHandler for IntakeHandler {
    fn name(&self) -> &'static str {
        "intake"
    }

    async fn handle(
        &self,
        command: &Command,
        _ctx: &HandlerContext,
    ) -> Result<CommandOutput, HandlerError> {
        let CommandPayload::Question { text } = command.payload() else {
            return Err(unexpected(self.name(), command));
        };
        let question = text.trim();
        if question.is_empty() {
            return Err(HandlerError::fatal("question is empty"));
        }
        Ok(CommandOutput::next(command.follow_up(CommandPayload::Check {
            question: question.to_string(),
        })))
    }
}

/// Inbound guardrail.
#[derive(Debug, Clone)]
pub struct PreCheckHandler {
    params: RetrievalParams,
}

impl PreCheckHandler {
    pub fn new(params: RetrievalParams) -> Self {
        Self { params }
    }
}

#[async_trait]
impl CommandHandler for PreCheckHandler {
    fn name(&self) -> &'static str {
        "pre_check"
    }

    async fn handle(
        &self,
        command: &Command,
        ctx: &HandlerContext,
    ) -> Result<CommandOutput, HandlerError> {
        let CommandPayload::Check { question } = command.payload() else {
            return Err(unexpected(self.name(), command));
        };
        match ctx
            .collaborators
            .guardrail
            .check(question, Direction::Inbound)
            .await?
        {
            Verdict::Allow => Ok(CommandOutput::next(command.follow_up(
                CommandPayload::Retrieve {
                    question: question.clone(),
                    params: self.params.clone(),
                },
            ))
            .with_event(completed(command, Stage::Checking, "question accepted"))),
            Verdict::Reject(reason) => Err(HandlerError::Rejected(reason)),
        }
    }
}

#[derive(Debug, Default)]
pub struct RetrieveHandler;

#[async_trait]
impl CommandHandler for RetrieveHandler {
    fn name(&self) -> &'static str {
        "retrieve"
    }

    async fn handle(
        &self,
        command: &Command,
        ctx: &HandlerContext,
    ) -> Result<CommandOutput, HandlerError> {
        let CommandPayload::Retrieve { question, params } = command.payload() else {
            return Err(unexpected(self.name(), command));
        };
        let documents = ctx.collaborators.retriever.search(question, params).await?;
        debug!(found = documents.len(), top_k = params.top_k, "Retrieved documents");
        let detail = format!("{} documents", documents.len());
        Ok(CommandOutput::next(command.follow_up(CommandPayload::Rerank {
            question: question.clone(),
            documents,
        }))
        .with_event(completed(command, Stage::Retrieving, detail)))
    }
}

/// Reorders retrieved documents and keeps the best `keep`.
#[derive(Debug, Clone)]
pub struct RerankHandler {
    keep: usize,
}

impl RerankHandler {
    pub fn new(keep: usize) -> Self {
        Self { keep }
    }
}

#[async_trait]
impl CommandHandler for RerankHandler {
    fn name(&self) -> &'static str {
        "rerank"
    }

    async fn handle(
        &self,
        command: &Command,
        ctx: &HandlerContext,
    ) -> Result<CommandOutput, HandlerError> {
        let CommandPayload::Rerank {
            question,
            documents,
        } = command.payload()
        else {
            return Err(unexpected(self.name(), command));
        };
        let mut documents = if documents.is_empty() {
            Vec::new()
        } else {
            ctx.collaborators
                .reranker
                .rerank(question, documents.clone())
                .await?
        };
        documents.truncate(self.keep);
        let detail = format!("{} documents kept", documents.len());
        Ok(CommandOutput::next(command.follow_up(CommandPayload::Enhance {
            question: question.clone(),
            documents,
        }))
        .with_event(completed(command, Stage::Reranking, detail)))
    }
}

/// Refines the question and fetches the tool catalog.
#[derive(Debug, Default)]
pub struct EnhanceHandler;

#[async_trait]
impl CommandHandler for EnhanceHandler {
    fn name(&self) -> &'static str {
        "enhance"
    }

    async fn handle(
        &self,
        command: &Command,
        ctx: &HandlerContext,
    ) -> Result<CommandOutput, HandlerError> {
        let CommandPayload::Enhance {
            question,
            documents,
        } = command.payload()
        else {
            return Err(unexpected(self.name(), command));
        };
        let refined = ctx.collaborators.enhancer.enhance(question, documents).await?;
        let refined_question = if refined.trim().is_empty() {
            question.clone()
        } else {
            refined
        };
        let catalog = ctx.collaborators.tools.list_tools().await?;
        Ok(CommandOutput::next(command.follow_up(CommandPayload::UseTools {
            question: question.clone(),
            refined_question: refined_question.clone(),
            documents: documents.clone(),
            catalog,
        }))
        .with_event(completed(command, Stage::Enhancing, refined_question)))
    }
}

/// Invokes every catalog tool whose keywords occur in the refined question.
///
/// A failing tool does not fail the stage; its failure is passed on to the
/// generator as part of the context.
#[derive(Debug, Default)]
pub struct UseToolsHandler;

#[async_trait]
impl CommandHandler for UseToolsHandler {
    fn name(&self) -> &'static str {
        "use_tools"
    }

    async fn handle(
        &self,
        command: &Command,
        ctx: &HandlerContext,
    ) -> Result<CommandOutput, HandlerError> {
        let CommandPayload::UseTools {
            question,
            refined_question,
            documents,
            catalog,
        } = command.payload()
        else {
            return Err(unexpected(self.name(), command));
        };

        let mut output = CommandOutput::default();
        let mut tool_results = Vec::new();
        for tool in catalog.iter().filter(|t| t.matches(refined_question)) {
            let outcome = match ctx
                .collaborators
                .tools
                .invoke(&tool.name, json!({ "question": refined_question }))
                .await
            {
                Ok(value) => ToolOutcome::Success(value),
                Err(err) => {
                    debug!(tool = %tool.name, error = %err, "Tool invocation failed");
                    ToolOutcome::Failure(err.to_string())
                }
            };
            let result = ToolResult {
                tool: tool.name.clone(),
                outcome,
            };
            output.events.push(command.event(EventPayload::ToolInvoked {
                tool: result.tool.clone(),
                succeeded: result.is_success(),
            }));
            tool_results.push(result);
        }

        let detail = format!("{} tools used", tool_results.len());
        output.events.push(completed(command, Stage::UsingTools, detail));
        output.next = Some(command.follow_up(CommandPayload::GenerateResponse {
            question: question.clone(),
            refined_question: refined_question.clone(),
            context: GenerationContext {
                documents: documents.clone(),
                tool_results,
            },
        }));
        Ok(output)
    }
}

#[derive(Debug, Default)]
pub struct GenerateHandler;

#[async_trait]
impl CommandHandler for GenerateHandler {
    fn name(&self) -> &'static str {
        "generate"
    }

    async fn handle(
        &self,
        command: &Command,
        ctx: &HandlerContext,
    ) -> Result<CommandOutput, HandlerError> {
        let CommandPayload::GenerateResponse {
            question,
            refined_question,
            context,
        } = command.payload()
        else {
            return Err(unexpected(self.name(), command));
        };
        let answer = ctx
            .collaborators
            .generator
            .generate(refined_question, context)
            .await?;
        debug!(attempt = ctx.attempt, chars = answer.len(), "Generated answer");
        Ok(CommandOutput::next(command.follow_up(CommandPayload::FinalCheck {
            question: question.clone(),
            answer,
        }))
        .with_event(completed(command, Stage::Generating, "answer generated")))
    }
}

/// Outbound guardrail. Finishes the pipeline with the approved answer.
#[derive(Debug, Default)]
pub struct FinalCheckHandler;

#[async_trait]
impl CommandHandler for FinalCheckHandler {
    fn name(&self) -> &'static str {
        "final_check"
    }

    async fn handle(
        &self,
        command: &Command,
        ctx: &HandlerContext,
    ) -> Result<CommandOutput, HandlerError> {
        let CommandPayload::FinalCheck { answer, .. } = command.payload() else {
            return Err(unexpected(self.name(), command));
        };
        match ctx
            .collaborators
            .guardrail
            .check(answer, Direction::Outbound)
            .await?
        {
            Verdict::Allow => Ok(CommandOutput::complete(answer.clone())
                .with_event(command.event(EventPayload::Evaluation {
                    approved: true,
                    summary: "answer passed the outbound check".to_string(),
                }))
                .with_event(completed(command, Stage::FinalChecking, "answer approved"))),
            Verdict::Reject(reason) => Err(HandlerError::Rejected(reason)),
        }
    }
}

/// Registry with the standard stage handlers and event listeners.
pub fn default_registry(retrieval: &RetrievalConfig) -> Result<HandlerRegistry, ConfigurationError> {
    let params = RetrievalParams {
        top_k: retrieval.n_retrieval_candidates,
        table: retrieval.table.clone(),
    };
    let mut builder = HandlerRegistry::builder();
    builder
        .register_command(CommandKind::Question, Arc::new(IntakeHandler))?
        .register_command(CommandKind::Check, Arc::new(PreCheckHandler::new(params)))?
        .register_command(CommandKind::Retrieve, Arc::new(RetrieveHandler))?
        .register_command(
            CommandKind::Rerank,
            Arc::new(RerankHandler::new(retrieval.n_ranking_candidates)),
        )?
        .register_command(CommandKind::Enhance, Arc::new(EnhanceHandler))?
        .register_command(CommandKind::UseTools, Arc::new(UseToolsHandler))?
        .register_command(CommandKind::GenerateResponse, Arc::new(GenerateHandler))?
        .register_command(CommandKind::FinalCheck, Arc::new(FinalCheckHandler))?;
    builder
        .register_listener(OBSERVED_EVENTS, Arc::new(NotificationForwarder))
        .register_listener(OBSERVED_EVENTS, Arc::new(AuditLogger));
    builder.build()
}
