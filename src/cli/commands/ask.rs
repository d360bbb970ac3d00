//! `askbus ask`: submit one question and follow it to the end.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use futures::StreamExt;
use serde::Serialize;
use std::path::Path;

use crate::adapters::build_collaborators;
use crate::cli::output::{output, table, truncate, CommandOutput};
use crate::domain::models::{
    BackendMode, Event, EventKind, Session, SessionId, SessionOutcome, SessionStatus, Stage,
    TrailEntry,
};
use crate::infrastructure::logging::LoggerImpl;
use crate::services::PipelineService;

#[derive(Args, Debug)]
pub struct AskArgs {
    /// The question to answer
    pub question: String,

    /// Session id to use instead of a generated one
    #[arg(short, long)]
    pub session_id: Option<String>,

    /// Use in-process collaborators instead of the configured backend
    #[arg(long)]
    pub offline: bool,

    /// Show every dequeued message, not only the stages
    #[arg(long)]
    pub trail: bool,

    /// How progress events are printed
    #[arg(long, value_enum, default_value_t = EventFormat::Text)]
    pub format: EventFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EventFormat {
    /// One plain line per event
    Text,
    /// Markdown sections
    Markdown,
    /// `event:`/`data:` lines
    Sse,
}

impl EventFormat {
    fn render(self, event: &Event) -> Option<String> {
        match self {
            // The result block covers terminal events in plain output
            Self::Text if event.kind().is_terminal() || event.kind() == EventKind::EndOfStream => {
                None
            }
            Self::Text => Some(format!("{} {}", console::style("›").dim(), event.to_message())),
            Self::Markdown => Some(event.to_markdown()),
            Self::Sse => Some(event.to_event_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TrailRow {
    pub position: usize,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&TrailEntry> for TrailRow {
    fn from(entry: &TrailEntry) -> Self {
        Self {
            position: entry.position,
            kind: entry.kind.to_string(),
            stage: entry.stage,
            attempts: entry.attempts,
            error: entry.error.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AskOutput {
    pub session_id: String,
    pub question: String,
    pub status: SessionStatus,
    pub stage: Stage,
    pub outcome: SessionOutcome,
    pub history: Vec<TrailRow>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<Event>,
    #[serde(skip)]
    show_history: bool,
}

impl AskOutput {
    fn new(session: &Session, events: Vec<Event>, full_trail: bool) -> Self {
        let history = if full_trail {
            session.trail().iter().map(TrailRow::from).collect()
        } else {
            session.history().into_iter().map(TrailRow::from).collect()
        };
        Self {
            session_id: session.id.to_string(),
            question: session.question.clone(),
            status: session.status,
            stage: session.stage,
            outcome: session.outcome(),
            history,
            events,
            show_history: full_trail,
        }
    }
}

impl CommandOutput for AskOutput {
    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        match &self.outcome {
            SessionOutcome::Answered { answer } => lines.push(answer.clone()),
            SessionOutcome::Rejected { reason } => lines.push(format!(
                "{} {reason}",
                console::style("Rejected:").yellow().bold()
            )),
            SessionOutcome::Failed { reason } => lines.push(format!(
                "{} {reason}",
                console::style("Failed:").red().bold()
            )),
            SessionOutcome::Pending => lines.push("Pending".to_string()),
        }

        if self.show_history {
            let mut t = table(["#", "Message", "Stage", "Attempts", "Error"]);
            for row in &self.history {
                t.add_row(vec![
                    row.position.to_string(),
                    row.kind.clone(),
                    row.stage.map_or_else(|| "-".to_string(), |s| s.to_string()),
                    row.attempts.to_string(),
                    row.error
                        .as_deref()
                        .map_or_else(|| "-".to_string(), |e| truncate(e, 60)),
                ]);
            }
            lines.push(String::new());
            lines.push(t.to_string());
        }

        lines.push(format!(
            "{}",
            console::style(format!(
                "session {} {} after {} stage(s)",
                self.session_id,
                self.status,
                self.history.iter().filter(|r| r.stage.is_some_and(Stage::is_processing)).count()
            ))
            .dim()
        ));
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: AskArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let mut config = super::load_config(config_path)?;
    if args.offline {
        config.backend.mode = BackendMode::Offline;
    }
    let _logger = LoggerImpl::init(&config.logging)?;

    let collaborators = build_collaborators(&config)?;
    let service = PipelineService::from_config(&config, collaborators)
        .context("Failed to wire pipeline handlers")?;

    let session_id = service.submit_question(&args.question, args.session_id.map(SessionId::from))?;
    let mut stream = service.subscribe(&session_id)?;

    let mut events = Vec::new();
    let mut cancelled = false;
    loop {
        tokio::select! {
            next = stream.next() => {
                let Some(event) = next else { break };
                if json_mode {
                    events.push(event);
                } else if let Some(line) = args.format.render(&event) {
                    println!("{line}");
                }
            }
            _ = tokio::signal::ctrl_c(), if !cancelled => {
                eprintln!("{}", console::style("Cancelling...").yellow());
                service.cancel(&session_id)?;
                cancelled = true;
            }
        }
    }

    let session = service.wait(&session_id).await?;
    output(&AskOutput::new(&session, events, args.trail), json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Config, EventPayload};
    use crate::adapters::memory;

    #[test]
    fn test_text_format_skips_terminal_events() {
        let id = SessionId::from("s");
        let status = Event::new(id.clone(), EventPayload::StatusUpdate { stage: Stage::Checking });
        let done = Event::new(
            id.clone(),
            EventPayload::ResponseReady {
                question: "q".into(),
                answer: "42".into(),
            },
        );
        let eos = Event::new(id, EventPayload::EndOfStream);

        assert!(EventFormat::Text.render(&status).unwrap().contains("Starting step"));
        assert!(EventFormat::Text.render(&done).is_none());
        assert!(EventFormat::Text.render(&eos).is_none());
        assert!(EventFormat::Sse.render(&done).is_some());
    }

    #[tokio::test]
    async fn test_output_from_offline_session() {
        let service =
            PipelineService::from_config(&Config::default(), memory::offline_collaborators())
                .unwrap();
        let id = service.submit_question("What is X?", None).unwrap();
        let session = service.wait(&id).await.unwrap();

        let out = AskOutput::new(&session, Vec::new(), false);
        assert_eq!(out.status, SessionStatus::Completed);
        assert_eq!(out.history.len(), 7);
        let json = out.to_json();
        assert_eq!(json["outcome"]["status"], "answered");
        assert!(json.get("events").is_none());
        assert!(out.to_human().contains("completed after 7 stage(s)"));
    }
}
