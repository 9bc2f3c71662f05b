//! Prompt templates.
//!
//! Every prompt that expects a structured answer ends with the body/JSON
//! wire instructions so the answer can be parsed by
//! [`BodyJsonParser`](crate::protocol::BodyJsonParser).

use reflexa_core::message::{Conversation, Message, MessageKind};

use crate::actions::ActionRegistry;
use crate::protocol::END_OF_BODY;

/// Human-readable name of a language code, used inside prompts.
pub fn language_name(code: &str) -> &str {
    match code.to_ascii_lowercase().as_str() {
        "en" => "English",
        "de" => "German",
        "fr" => "French",
        "es" => "Spanish",
        "it" => "Italian",
        "pt" => "Portuguese",
        "nl" => "Dutch",
        _ => code,
    }
}

/// Closing message sent by the Finalize action.
pub fn closing_message(language: &str) -> &'static str {
    match language.to_ascii_lowercase().as_str() {
        "de" => "Gibt es noch etwas, wobei ich helfen kann?",
        "fr" => "Puis-je vous aider avec autre chose ?",
        "es" => "¿Hay algo más en lo que pueda ayudarte?",
        "it" => "Posso aiutarti con qualcos'altro?",
        "pt" => "Posso ajudar com mais alguma coisa?",
        "nl" => "Kan ik je nog ergens anders mee helpen?",
        _ => "Is there anything else I can help you with?",
    }
}

fn wire_format(schema: &str) -> String {
    format!(
        "Output format: write your text first. Then write a line containing exactly \
         {END_OF_BODY} and nothing else. Then write exactly one line of JSON: {schema}"
    )
}

fn context_block(context: &str) -> String {
    if context.is_empty() {
        String::new()
    } else {
        format!("\n\n## What happened so far this turn\n{context}")
    }
}

/// System prompt of the decision loop.
pub fn decision_system(language: &str, registry: &ActionRegistry, context: &str) -> String {
    let mut actions = String::new();
    for action in registry.iter() {
        actions.push_str(&format!("- {}: {}\n", action.name(), action.guidance()));
    }

    format!(
        "You are the planning step of an assistant. Decide which single action \
         to take next to answer the user's latest message.\n\n\
         ## Actions\n{actions}\n\
         Think briefly, in {language}, about what the user needs and whether \
         more information is required. Do not answer the user yourself.{context}\n\n{format}",
        language = language_name(language),
        context = context_block(context),
        format = wire_format(r#"{"action": "<one of the action names above>"}"#),
    )
}

/// System prompt of the Reply action.
pub fn reply_system(language: &str, memories: &str) -> String {
    let memories = if memories.is_empty() {
        String::new()
    } else {
        format!("\n\n## Relevant memories\n{memories}")
    };
    format!(
        "You are a helpful assistant. Answer the user's latest message in {language}. \
         Use the memories below when they are relevant and never invent facts about \
         the user.{memories}\n\n{format}",
        language = language_name(language),
        format = wire_format(r#"{"plain_text": "<your answer without markdown>"}"#),
    )
}

/// System prompt of the Question action.
pub fn question_system(language: &str, memories: &str) -> String {
    let memories = if memories.is_empty() {
        String::new()
    } else {
        format!("\n\n## Relevant memories\n{memories}")
    };
    format!(
        "You are a helpful assistant. The user's request is ambiguous or lacks \
         information you need. Ask one short clarifying question in {language}.{memories}\n\n{format}",
        language = language_name(language),
        format = wire_format(r#"{"plain_text": "<the question without markdown>"}"#),
    )
}

/// System prompt of the memory lookup planner.
pub fn memory_plan_system(language: &str, context: &str) -> String {
    format!(
        "You are planning a search over the user's long-term memories. Explain in \
         one or two sentences, in {language}, what you will look for. Then list \
         search groups: each has a short purpose and a few search keywords. Use \
         an empty list if nothing is worth searching.{context}\n\n{format}",
        language = language_name(language),
        context = context_block(context),
        format = wire_format(
            r#"{"searchGroups": [{"purpose": "<why>", "keywords": "<space separated keywords>"}]}"#
        ),
    )
}

/// System prompt for chat title generation. Plain text, no payload.
pub fn title_system(language: &str) -> String {
    format!(
        "Write a title of at most six words, in {}, for a conversation that starts \
         with the user's message. Reply with the title only, without quotes.",
        language_name(language)
    )
}

/// System prompt followed by the conversation history.
///
/// Internal reasoning and memory-lookup messages are not replayed.
pub fn with_history(system: String, conversation: &Conversation) -> Vec<Message> {
    std::iter::once(Message::system(system))
        .chain(
            conversation
                .messages
                .iter()
                .filter(|m| !matches!(m.kind, MessageKind::Reasoning | MessageKind::MemorySearch))
                .cloned(),
        )
        .collect()
}
