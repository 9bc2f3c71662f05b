//! `reflexa chat` — Interactive or single-message chat.

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use reflexa_agent::{
    ActionRegistry, AgentLoop, ChatContext, EventSink, MemoryRecorder, MemorySearchAction,
    SessionEvent, TurnOutcome, TurnReport,
};
use reflexa_config::AppConfig;
use reflexa_core::event::EventBus;
use reflexa_core::message::{Conversation, Message, MessageKind};
use reflexa_core::model::ModelSetConfig;
use reflexa_providers::ModelGateway;
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct ChatOptions {
    pub message: Option<String>,
    pub model_set: Option<String>,
    pub memory: Option<String>,
    pub language: Option<String>,
    pub show_reasoning: bool,
}

pub async fn run(options: ChatOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // Fail early with setup hints when no key is configured
    let provider_keys = config.providers.values().any(|p| p.api_key.is_some());
    if !config.has_api_key() && !provider_keys {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    REFLEXA_API_KEY, OPENROUTER_API_KEY, OPENAI_API_KEY");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let set_name = options
        .model_set
        .as_deref()
        .unwrap_or(&config.default_model_set);
    let model_set = config
        .model_set(Some(set_name))
        .cloned()
        .ok_or_else(|| format!("Model set '{set_name}' is not defined"))?;

    let agent = build_agent(&config).await?;
    let language = options
        .language
        .clone()
        .unwrap_or_else(|| config.agent.language.clone());

    let mut session = Session::new(agent, Arc::new(model_set))
        .with_language(language)
        .with_coalesce_bytes(config.agent.coalesce_bytes);
    if let Some(memory) = &options.memory {
        session = session.with_memory_id(memory);
    }

    if let Some(msg) = options.message {
        // Single message mode
        let report = rendered_turn(&mut session, &msg, options.show_reasoning).await;
        return match report.outcome {
            TurnOutcome::Failed { code } => Err(format!("Turn failed: {code}").into()),
            _ => Ok(()),
        };
    }

    // Interactive mode
    println!();
    println!("  Reflexa — Interactive Mode");
    println!();
    println!("  Model set: {}", session.model_set.name);
    println!("  Language:  {}", session.language);
    match &session.memory_id {
        Some(id) => println!("  Memory:    {id} ({})", config.memory.backend),
        None => println!("  Memory:    off (pass --memory <id> to enable)"),
    }
    println!();
    println!("  Type your message and press Enter.");
    println!("  Ctrl+C cancels a running answer. Type 'exit' to quit.");
    println!();

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "exit" | "quit") {
            break;
        }

        let report = rendered_turn(&mut session, input, options.show_reasoning).await;
        if report.outcome == TurnOutcome::Cancelled {
            println!("\n  (cancelled)");
        }
        println!();
    }

    println!("  Goodbye!");
    Ok(())
}

/// Wire the configured providers, vector store and actions into an agent loop.
pub async fn build_agent(config: &AppConfig) -> Result<AgentLoop, Box<dyn std::error::Error>> {
    let events = Arc::new(EventBus::default());
    spawn_event_logger(&events);

    let registry = reflexa_providers::build_from_config(config);
    let gateway = Arc::new(ModelGateway::new(registry).with_events(events.clone()));

    let store = reflexa_memory::build_from_config(&config.memory).await?;
    let memory_search = MemorySearchAction::new(store.clone())
        .with_concurrency(config.memory.search_concurrency)
        .with_events(events.clone());
    let actions = Arc::new(ActionRegistry::with_memory_search(memory_search));

    let mut agent = AgentLoop::new(gateway, actions)
        .with_settings(&config.agent)
        .with_events(events);

    if let Some(store) = store.filter(|_| config.memory.auto_save) {
        agent = agent.with_recorder(MemoryRecorder::new(store));
    }

    Ok(agent)
}

fn spawn_event_logger(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            debug!(?event, "Domain event");
        }
    });
}

/// Run one turn with live terminal output. Ctrl+C cancels the turn.
async fn rendered_turn(session: &mut Session, input: &str, show_reasoning: bool) -> TurnReport {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<SessionEvent>();

    let printer = tokio::spawn(async move {
        let mut renderer = TerminalRenderer::new(show_reasoning);
        let mut stdout = std::io::stdout();
        while let Some(event) = rx.recv().await {
            if let Err(e) = renderer.render(&event, &mut stdout) {
                warn!(error = %e, "Terminal output failed");
                break;
            }
        }
    });

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let report = session.turn(input, Arc::new(tx), cancel).await;
    watcher.abort();

    // The sender lives in the turn's context, so the printer drains and stops.
    if let Err(e) = printer.await {
        warn!(error = %e, "Printer task failed");
    }
    report
}

/// A conversation that outlives single turns.
pub struct Session {
    agent: AgentLoop,
    model_set: Arc<ModelSetConfig>,
    memory_id: Option<String>,
    language: String,
    coalesce_bytes: usize,
    conversation: Conversation,
}

impl Session {
    pub fn new(agent: AgentLoop, model_set: Arc<ModelSetConfig>) -> Self {
        Self {
            agent,
            model_set,
            memory_id: None,
            language: "en".into(),
            coalesce_bytes: 0,
            conversation: Conversation::new(),
        }
    }

    pub fn with_memory_id(mut self, memory_id: impl Into<String>) -> Self {
        self.memory_id = Some(memory_id.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_coalesce_bytes(mut self, bytes: usize) -> Self {
        self.coalesce_bytes = bytes;
        self
    }

    /// Append the user's message and run one turn over the whole conversation.
    pub async fn turn(
        &mut self,
        input: &str,
        sink: Arc<dyn EventSink>,
        cancel: CancellationToken,
    ) -> TurnReport {
        let mut conversation = std::mem::take(&mut self.conversation);
        conversation.push(Message::user(input));

        let mut ctx = ChatContext::new(conversation, self.model_set.clone(), sink)
            .with_language(self.language.clone())
            .with_coalesce_bytes(self.coalesce_bytes)
            .with_cancel_token(cancel);
        if let Some(memory_id) = &self.memory_id {
            ctx = ctx.with_memory_id(memory_id.clone());
        }

        let report = self.agent.run_turn(&mut ctx).await;
        self.conversation = ctx.conversation;
        report
    }
}

/// Prints session events as they stream.
///
/// Reasoning is hidden unless asked for; memory lookups show as a one-line
/// status trail.
pub struct TerminalRenderer {
    show_reasoning: bool,
    hidden: HashSet<String>,
}

impl TerminalRenderer {
    pub fn new(show_reasoning: bool) -> Self {
        Self {
            show_reasoning,
            hidden: HashSet::new(),
        }
    }

    pub fn render(&mut self, event: &SessionEvent, out: &mut impl Write) -> std::io::Result<()> {
        match event {
            SessionEvent::PrepareMessage {
                message_id, kind, ..
            } => match kind {
                MessageKind::Reasoning if !self.show_reasoning => {
                    self.hidden.insert(message_id.clone());
                }
                MessageKind::Reasoning => write!(out, "  💭 ")?,
                MessageKind::MemorySearch => write!(out, "  🔎 ")?,
                MessageKind::Question => write!(out, "\n  Reflexa ? ")?,
                MessageKind::Text => write!(out, "\n  Reflexa > ")?,
            },
            SessionEvent::StreamChunk {
                message_id,
                content,
            } => {
                if !self.hidden.contains(message_id) {
                    write!(out, "{content}")?;
                }
            }
            SessionEvent::Status { message_id, status } => {
                if !self.hidden.contains(message_id) {
                    write!(out, " [{status}]")?;
                }
            }
            SessionEvent::CompleteMessage { message_id } => {
                if !self.hidden.remove(message_id) {
                    writeln!(out)?;
                }
            }
            SessionEvent::StreamTitle { title } => writeln!(out, "  ── {title} ──")?,
            SessionEvent::Error { code, message, .. } => {
                writeln!(out, "\n  ⚠️  {message} ({code})")?;
            }
            SessionEvent::Completed {
                iterations,
                usage,
                forced,
                ..
            } => {
                let forced = if *forced { ", iteration limit" } else { "" };
                writeln!(
                    out,
                    "  ({iterations} steps, {} tokens{forced})",
                    usage.total_tokens
                )?;
            }
        }
        out.flush()
    }
}
