//! End-to-end integration tests for the Reflexa agent runtime.
//!
//! These tests drive whole turns through the decision loop with a scripted
//! provider that streams its answers in small fragments, an in-memory vector
//! store and a recording event sink.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use reflexa_agent::{
    ActionRegistry, AgentLoop, ChatContext, MemoryRecorder, MemorySearchAction, RecordingSink,
    SessionEvent, TurnOutcome,
};
use reflexa_config::AppConfig;
use reflexa_core::error::ProviderError;
use reflexa_core::memory::VectorStore;
use reflexa_core::message::{Conversation, Message, MessageKind};
use reflexa_core::model::{ModelPurpose, ModelSetConfig, ModelSpec};
use reflexa_core::provider::{
    ChunkReceiver, EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest,
    ProviderResponse, StreamChunk, Usage,
};
use reflexa_memory::InMemoryVectorStore;
use reflexa_providers::{ModelGateway, ProviderRegistry};

// ── Scripted Provider ────────────────────────────────────────────────────

const VOCABULARY: [&str; 3] = ["coffee", "dog", "rust"];

/// Bag-of-words embedding over a tiny vocabulary, plus a bias dimension so
/// no vector is all zeros.
fn embed_text(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut vector: Vec<f32> = VOCABULARY
        .iter()
        .map(|word| if lower.contains(word) { 1.0 } else { 0.0 })
        .collect();
    vector.push(0.1);
    vector
}

/// Answers from a script in order, streaming each answer in fragments of
/// `fragment` characters.
struct ScriptedProvider {
    answers: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ProviderRequest>>,
    fragment: usize,
}

impl ScriptedProvider {
    fn new(fragment: usize, answers: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
            requests: Mutex::new(Vec::new()),
            fragment,
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, index: usize) -> ProviderRequest {
        self.requests.lock().unwrap()[index].clone()
    }

    fn next_answer(&self) -> String {
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedProvider exhausted")
    }
}

fn usage() -> Usage {
    Usage {
        prompt_tokens: 8,
        completion_tokens: 2,
        total_tokens: 10,
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);
        Ok(ProviderResponse {
            message: Message::assistant(self.next_answer()),
            usage: Some(usage()),
            model,
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let chars: Vec<char> = self.next_answer().chars().collect();
        let parts: Vec<String> = chars
            .chunks(self.fragment)
            .map(|c| c.iter().collect())
            .collect();

        let (tx, rx) = tokio::sync::mpsc::channel(parts.len() + 1);
        for part in parts {
            tx.send(Ok(StreamChunk {
                content: Some(part),
                done: false,
                usage: None,
            }))
            .await
            .unwrap();
        }
        tx.send(Ok(StreamChunk {
            content: None,
            done: true,
            usage: Some(usage()),
        }))
        .await
        .unwrap();
        Ok(rx)
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        Ok(EmbeddingResponse {
            embeddings: request.inputs.iter().map(|t| embed_text(t)).collect(),
            model: request.model,
            usage: None,
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn full_model_set() -> Arc<ModelSetConfig> {
    Arc::new(
        ModelSetConfig::new("e2e")
            .with_model(ModelPurpose::Reasoning, ModelSpec::new("mock", "think-1"))
            .with_model(ModelPurpose::Chat, ModelSpec::new("mock", "chat-1"))
            .with_model(ModelPurpose::Embedding, ModelSpec::new("mock", "embed-1")),
    )
}

fn gateway(provider: Arc<ScriptedProvider>) -> Arc<ModelGateway> {
    Arc::new(ModelGateway::new(ProviderRegistry::new().with("mock", provider)))
}

fn agent(provider: Arc<ScriptedProvider>, store: Option<Arc<dyn VectorStore>>) -> AgentLoop {
    AgentLoop::new(gateway(provider), Arc::new(ActionRegistry::standard(store)))
}

fn context(user: &str, model_set: Arc<ModelSetConfig>) -> (ChatContext, Arc<RecordingSink>) {
    let mut conversation = Conversation::new();
    conversation.push(Message::user(user));
    let sink = RecordingSink::new();
    let ctx = ChatContext::new(conversation, model_set, sink.clone());
    (ctx, sink)
}

fn decision(reasoning: &str, action: &str) -> String {
    format!("{reasoning}\n<<END-OF-BODY>>\n{{\"action\": \"{action}\"}}")
}

fn reply(text: &str) -> String {
    format!("{text}\n<<END-OF-BODY>>\n{{\"plain_text\": \"{text}\"}}")
}

async fn seeded_store() -> Arc<InMemoryVectorStore> {
    let store = Arc::new(InMemoryVectorStore::new());
    store
        .upsert(
            "user-42",
            "p-coffee",
            embed_text("coffee"),
            serde_json::json!({ "content": "User drinks oat-milk flat whites" }),
        )
        .await
        .unwrap();
    store
        .upsert(
            "user-42",
            "p-dog",
            embed_text("dog"),
            serde_json::json!({ "content": "User has a dog named Pixel" }),
        )
        .await
        .unwrap();
    store
}

fn chunks_of(sink: &RecordingSink) -> Vec<String> {
    sink.events()
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::StreamChunk { content, .. } => Some(content),
            _ => None,
        })
        .collect()
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn memory_lookup_then_reply_with_single_char_fragments() {
    let decision_1 = decision("I should check what I know about them.", "MemorySearch");
    let plan = concat!(
        "Looking up drinks and pets.\n<<END-OF-BODY>>\n",
        r#"{"searchGroups": [{"purpose": "drink", "keywords": "coffee"}, {"purpose": "pet", "keywords": ["dog"]}]}"#
    );
    let decision_2 = decision("Enough context now.", "Reply");
    let answer = reply("A flat white for you and a treat for Pixel.");
    let provider = ScriptedProvider::new(1, &[&decision_1, plan, &decision_2, &answer]);

    let store: Arc<dyn VectorStore> = seeded_store().await;
    let agent = agent(provider.clone(), Some(store));
    let (ctx, sink) = context("Plan my morning", full_model_set());
    let mut ctx = ctx.with_memory_id("user-42");

    let report = agent.run_turn(&mut ctx).await;

    assert_eq!(report.outcome, TurnOutcome::Finalized);
    assert_eq!(report.iterations, 2);
    assert_eq!(report.actions, ["MemorySearch", "Reply"]);
    assert_eq!(report.usage.total_tokens, 40);
    assert_eq!(provider.calls(), 4);

    // Messages in order: reasoning, memory search, reasoning, reply.
    let messages = sink.messages();
    let kinds: Vec<MessageKind> = messages.iter().map(|(_, k)| *k).collect();
    assert_eq!(
        kinds,
        [
            MessageKind::Reasoning,
            MessageKind::MemorySearch,
            MessageKind::Reasoning,
            MessageKind::Text
        ]
    );
    assert_eq!(sink.content_of(&messages[1].0), "Looking up drinks and pets.");
    assert_eq!(
        sink.content_of(&messages[3].0),
        "A flat white for you and a treat for Pixel."
    );

    // Nothing from the sentinel or the JSON payload reaches the client.
    let streamed = chunks_of(&sink).concat();
    assert!(!streamed.contains("END-OF-BODY"));
    assert!(!streamed.contains("searchGroups"));
    assert!(!streamed.contains("plain_text"));

    let statuses: Vec<String> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::Status { status, .. } => Some(status),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, ["embedding", "searching"]);

    // Each group got the memory matching its own keywords.
    let reply_prompt = provider.request(3).messages[0].content.clone();
    assert!(reply_prompt.contains("drink [coffee]: User drinks oat-milk flat whites"));
    assert!(reply_prompt.contains("pet [dog]: User has a dog named Pixel"));
    assert_eq!(provider.request(3).model, "chat-1");
    assert_eq!(provider.request(1).model, "think-1");

    assert!(matches!(
        sink.events().last(),
        Some(SessionEvent::Completed { iterations: 2, forced: false, .. })
    ));
}

#[tokio::test]
async fn iteration_limit_forces_localized_closing_message() {
    let empty_plan = "Nothing to look up.\n<<END-OF-BODY>>\n{\"searchGroups\": []}";
    let search = decision("Let me check memories.", "MemorySearch");
    let provider = ScriptedProvider::new(4, &[&search, empty_plan, &search, empty_plan]);

    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let agent = agent(provider.clone(), Some(store)).with_max_iterations(2);
    let (ctx, sink) = context("Hallo", full_model_set());
    let mut ctx = ctx.with_memory_id("user-1").with_language("de");

    let report = agent.run_turn(&mut ctx).await;

    assert_eq!(report.outcome, TurnOutcome::ForcedFinalize);
    assert_eq!(report.iterations, 2);
    assert_eq!(provider.calls(), 4);

    let last = ctx.conversation.messages.last().unwrap();
    assert_eq!(last.content, "Gibt es noch etwas, wobei ich helfen kann?");
    assert!(matches!(
        sink.events().last(),
        Some(SessionEvent::Completed { forced: true, .. })
    ));
}

#[tokio::test]
async fn unparseable_decision_falls_back_through_text_and_model_set() {
    // No sentinel: the action is found by name in the raw text.
    let provider = ScriptedProvider::new(
        5,
        &["I will just Reply to this greeting.", &reply("Hello there!")],
    );
    let chat_only = Arc::new(
        ModelSetConfig::new("chat-only")
            .with_model(ModelPurpose::Chat, ModelSpec::new("mock", "chat-only-1")),
    );

    let agent = agent(provider.clone(), None);
    let (mut ctx, sink) = context("hi", chat_only);

    let report = agent.run_turn(&mut ctx).await;

    assert_eq!(report.outcome, TurnOutcome::Finalized);
    assert_eq!(report.actions, ["Reply"]);
    // The decision's reasoning purpose fell back to the chat model.
    assert_eq!(provider.request(0).model, "chat-only-1");
    assert_eq!(provider.request(1).model, "chat-only-1");

    let (reply_id, _) = sink.messages().last().unwrap().clone();
    assert_eq!(sink.content_of(&reply_id), "Hello there!");
}

#[tokio::test]
async fn unresolvable_model_fails_before_any_call() {
    let provider = ScriptedProvider::new(3, &[]);
    let embedding_only = Arc::new(
        ModelSetConfig::new("broken")
            .with_model(ModelPurpose::Embedding, ModelSpec::new("mock", "embed-1")),
    );

    let agent = agent(provider.clone(), None);
    let (mut ctx, sink) = context("hi", embedding_only);

    let report = agent.run_turn(&mut ctx).await;

    assert_eq!(
        report.outcome,
        TurnOutcome::Failed {
            code: "model_resolution"
        }
    );
    assert_eq!(provider.calls(), 0);
    assert!(sink.events().iter().any(|e| matches!(
        e,
        SessionEvent::Error { code, .. } if code == "model_resolution"
    )));
    assert!(
        !sink
            .events()
            .iter()
            .any(|e| matches!(e, SessionEvent::Completed { .. }))
    );
}

#[tokio::test]
async fn memory_search_without_memory_id_is_not_offered() {
    let provider = ScriptedProvider::new(3, &[&decision("Check memories.", "MemorySearch")]);
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let agent = agent(provider.clone(), Some(store));
    let (mut ctx, sink) = context("What do I like?", full_model_set());

    let report = agent.run_turn(&mut ctx).await;

    // The request cannot be honored, so the decision falls back to Finalize
    assert_eq!(report.outcome, TurnOutcome::Finalized);
    assert_eq!(report.actions, ["Finalize"]);
    assert_eq!(provider.calls(), 1);
    assert!(!provider.request(0).messages[0].content.contains("- MemorySearch:"));
    assert!(matches!(
        sink.events().last(),
        Some(SessionEvent::Completed { forced: false, .. })
    ));
    assert!(!sink.events().iter().any(|e| matches!(e, SessionEvent::Error { .. })));
}

#[tokio::test]
async fn saved_exchange_is_found_on_the_next_turn() {
    let decision_reply = decision("Simple statement.", "Reply");
    let plan = concat!(
        "Checking language preferences.\n<<END-OF-BODY>>\n",
        r#"{"searchGroups": [{"purpose": "languages", "keywords": "rust"}]}"#
    );
    let decision_search = decision("They asked about themselves.", "MemorySearch");
    let first_reply = reply("Noted.");
    let second_reply = reply("You love Rust.");
    let provider = ScriptedProvider::new(
        2,
        &[
            &decision_reply,
            &first_reply,
            &decision_search,
            plan,
            &decision_reply,
            &second_reply,
        ],
    );

    let store = Arc::new(InMemoryVectorStore::new());
    let agent = agent(provider.clone(), Some(store.clone() as Arc<dyn VectorStore>))
        .with_recorder(MemoryRecorder::new(store.clone()));

    // Turn 1: the exchange is embedded and saved.
    let (ctx, _) = context("I love rust", full_model_set());
    let mut ctx = ctx.with_memory_id("user-7");
    let report = agent.run_turn(&mut ctx).await;
    assert_eq!(report.outcome, TurnOutcome::Finalized);
    assert_eq!(store.count("user-7").await.unwrap(), 1);

    // Turn 2: same conversation, new context.
    let mut conversation = ctx.conversation;
    conversation.push(Message::user("What language do I like?"));
    let sink = RecordingSink::new();
    let mut ctx = ChatContext::new(conversation, full_model_set(), sink.clone())
        .with_memory_id("user-7");

    let report = agent.run_turn(&mut ctx).await;
    assert_eq!(report.outcome, TurnOutcome::Finalized);
    assert_eq!(report.actions, ["MemorySearch", "Reply"]);

    let reply_prompt = provider.request(5).messages[0].content.clone();
    assert!(reply_prompt.contains("User: I love rust\nAssistant: Noted."));
    assert_eq!(store.count("user-7").await.unwrap(), 2);
}

#[tokio::test]
async fn bounded_concurrent_search_keeps_group_order() {
    let decision_1 = decision("Check memories.", "MemorySearch");
    let plan = concat!(
        "Three lookups.\n<<END-OF-BODY>>\n",
        r#"{"searchGroups": [{"purpose": "a", "keywords": "dog"}, {"purpose": "b", "keywords": "coffee"}, {"purpose": "c", "keywords": "dog"}]}"#
    );
    let decision_2 = decision("Done.", "Reply");
    let answer = reply("Here you go.");
    let provider = ScriptedProvider::new(7, &[&decision_1, plan, &decision_2, &answer]);

    let store: Arc<dyn VectorStore> = seeded_store().await;
    let memory_search = MemorySearchAction::new(Some(store)).with_concurrency(3);
    let registry = Arc::new(ActionRegistry::with_memory_search(memory_search));
    let agent = AgentLoop::new(gateway(provider.clone()), registry);

    let (ctx, _) = context("Tell me about my day", full_model_set());
    let mut ctx = ctx.with_memory_id("user-42");
    let report = agent.run_turn(&mut ctx).await;
    assert_eq!(report.outcome, TurnOutcome::Finalized);

    let reply_prompt = provider.request(3).messages[0].content.clone();
    let a = reply_prompt.find("a [dog]: User has a dog named Pixel").unwrap();
    let b = reply_prompt
        .find("b [coffee]: User drinks oat-milk flat whites")
        .unwrap();
    let c = reply_prompt.find("c [dog]: User has a dog named Pixel").unwrap();
    assert!(a < b && b < c);
}

#[tokio::test]
async fn config_file_drives_model_resolution() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
default_model_set = "local"

[agent]
max_iterations = 4
language = "fr"

[memory]
backend = "in_memory"

[providers.ollama]
api_url = "http://localhost:11434/v1"

[model_sets.local.models.chat]
provider = "ollama"
model = "llama3.1"

[model_sets.local.models.embedding]
provider = "ollama"
model = "nomic-embed-text"
"#,
    )
    .unwrap();

    let config = AppConfig::load_from(&path).unwrap();
    assert_eq!(config.agent.max_iterations, 4);
    assert_eq!(config.agent.language, "fr");

    let set = config.model_set(None).unwrap();
    assert_eq!(set.name, "local");

    let registry = reflexa_providers::build_from_config(&config);
    assert!(registry.contains("ollama"));

    let gateway = ModelGateway::new(registry);
    let resolved = gateway
        .resolve_model_spec(set, ModelPurpose::ReasoningHeavy)
        .unwrap();
    assert_eq!(resolved.matched, ModelPurpose::Chat);
    assert_eq!(resolved.spec.model, "llama3.1");

    let store = reflexa_memory::build_from_config(&config.memory)
        .await
        .unwrap();
    assert_eq!(store.unwrap().name(), "in_memory");
}
