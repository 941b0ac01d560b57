//! Intent Router
//!
//! Classifies an utterance as DATA (talk to the warehouse) or CHAT
//! (general conversation) with fast keyword rules, falling back to a
//! constrained LLM classification for unclear cases. Total: every input
//! maps to a verdict and routing never raises; oracle failure degrades
//! to CHAT, the safer branch.

use std::sync::Arc;

use crate::models::TopLevelIntent;
use crate::services::llm::LlmClient;

const ROUTER_PROMPT: &str = "You are an Intent Classifier. Your only job is to determine if a \
user wants to talk to the database or have a general conversation.

Categories:

[DATA]: Use this if the user asks for numbers, claims, records, lists, statistics, or status \
updates on data.

[CHAT]: Use this for greetings (\"hi\", \"hello\"), social questions (\"how are you\"), or \
asking what the tool can do.

Rules:

Respond ONLY with the tag [DATA] or [CHAT].

If you are unsure, default to [CHAT].

Never execute a command. Just classify.";

const CHAT_PROMPT: &str = "You are a helpful assistant for a healthcare claims analytics \
service. You help users understand how to use the data analytics system.

Your role:
- Answer questions about the system's capabilities
- Engage in friendly conversation
- Provide brief guidance when asked

IMPORTANT RULES:
- If a user asks about data (numbers, claims, statistics, lists, providers, transactions, \
amounts), DO NOT provide example queries or SQL
- Instead, simply say: \"I can help you query that data. Please ask your question in a format \
like 'Show me [what you want]' and I'll retrieve it for you.\"
- Only provide example queries if the user explicitly asks \"how do I query\" or \"what \
queries can I use\" or \"what can this system do\"
- Keep responses brief and friendly
- For greetings, be warm and welcoming
- Do NOT generate SQL queries or provide detailed query examples unless explicitly asked \
about system capabilities

Be friendly, professional, and helpful.";

const GREETINGS: &[&str] = &[
    "hello",
    "hi",
    "hey",
    "good morning",
    "good afternoon",
    "good evening",
    "greetings",
    "howdy",
    "what's up",
];

const SOCIAL_PATTERNS: &[&str] = &[
    "how are you",
    "how's it going",
    "what can you do",
    "what are you",
    "who are you",
    "help me",
    "what is this",
];

const DATA_KEYWORDS: &[&str] = &[
    "show",
    "count",
    "total",
    "number",
    "list",
    "claims",
    "users",
    "providers",
    "status",
    "by",
    "statistics",
    "records",
    "data",
    "query",
    "find",
    "get",
    "display",
    "chart",
    "graph",
    "visualization",
    "top",
    "bottom",
    "how many",
    "what is the",
    "breakdown",
    "volume",
    "who are",
    "what are",
    "transaction",
    "amount",
    "per",
    "give me",
    "tell me",
    "which",
    "highest",
    "lowest",
    "most",
    "least",
    "disease",
    "diagnosis",
    "patient",
    "state",
    "kogi",
    "zamfara",
    "kano",
    "lagos",
    "kaduna",
];

const CAPABILITY_PATTERNS: &[&str] =
    &["what can you", "how do i", "how to", "what is this", "what does this"];

/// Routes utterances between the data pipeline and the chat branch
pub struct IntentRouter {
    llm: Arc<LlmClient>,
}

impl IntentRouter {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }

    /// System prompt for the conversational branch
    pub fn chat_prompt() -> &'static str {
        CHAT_PROMPT
    }

    /// Classify an utterance. Never fails.
    pub async fn route(&self, utterance: &str) -> TopLevelIntent {
        match fast_route(utterance) {
            FastVerdict::Chat => TopLevelIntent::Chat,
            FastVerdict::Data => TopLevelIntent::Data,
            FastVerdict::AskLlm => self.llm_classify(utterance).await,
        }
    }

    async fn llm_classify(&self, utterance: &str) -> TopLevelIntent {
        let prompt = format!("{}\n\nUser Query: {}\n\nClassification:", ROUTER_PROMPT, utterance);

        match self.llm.complete(&prompt, 0.0, 10, None).await {
            Ok(response) => parse_verdict(&response),
            Err(e) => {
                tracing::warn!("Intent classification error: {}, defaulting to CHAT", e);
                TopLevelIntent::Chat
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FastVerdict {
    Chat,
    Data,
    AskLlm,
}

/// Keyword fast path. Greetings and social questions are CHAT; a data
/// keyword without a capability question is DATA; everything else goes
/// to the LLM.
fn fast_route(utterance: &str) -> FastVerdict {
    let lower = utterance.trim().to_lowercase();

    if lower.is_empty() {
        return FastVerdict::Chat;
    }

    if GREETINGS.contains(&lower.as_str()) {
        return FastVerdict::Chat;
    }

    if SOCIAL_PATTERNS.iter().any(|p| lower.contains(p)) {
        return FastVerdict::Chat;
    }

    if DATA_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        if CAPABILITY_PATTERNS.iter().any(|p| lower.contains(p)) {
            // Might be asking about capabilities, let the LLM decide
            return FastVerdict::AskLlm;
        }
        return FastVerdict::Data;
    }

    FastVerdict::AskLlm
}

/// Parse the constrained LLM verdict; unparseable output defaults to CHAT
fn parse_verdict(response: &str) -> TopLevelIntent {
    let upper = response.trim().to_uppercase();
    if upper.contains("[DATA]") {
        TopLevelIntent::Data
    } else {
        TopLevelIntent::Chat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_is_chat() {
        assert_eq!(fast_route(""), FastVerdict::Chat);
        assert_eq!(fast_route("   "), FastVerdict::Chat);
    }

    #[test]
    fn test_greetings_are_chat() {
        assert_eq!(fast_route("hi"), FastVerdict::Chat);
        assert_eq!(fast_route("Hello"), FastVerdict::Chat);
        assert_eq!(fast_route("good morning"), FastVerdict::Chat);
    }

    #[test]
    fn test_social_questions_are_chat() {
        assert_eq!(fast_route("how are you today"), FastVerdict::Chat);
        assert_eq!(fast_route("who are you"), FastVerdict::Chat);
    }

    #[test]
    fn test_data_keywords_are_data() {
        assert_eq!(fast_route("top 5 diagnoses overall"), FastVerdict::Data);
        assert_eq!(fast_route("how many claims in Kogi"), FastVerdict::Data);
        assert_eq!(fast_route("show me the monthly claim volume"), FastVerdict::Data);
    }

    #[test]
    fn test_capability_question_defers_to_llm() {
        assert_eq!(fast_route("how do i query claims data"), FastVerdict::AskLlm);
    }

    #[test]
    fn test_unclear_defers_to_llm() {
        assert_eq!(fast_route("blue penguins"), FastVerdict::AskLlm);
    }

    #[test]
    fn test_parse_verdict() {
        assert_eq!(parse_verdict("[DATA]"), TopLevelIntent::Data);
        assert_eq!(parse_verdict("  [data] "), TopLevelIntent::Data);
        assert_eq!(parse_verdict("[CHAT]"), TopLevelIntent::Chat);
        assert_eq!(parse_verdict("no idea"), TopLevelIntent::Chat);
    }
}
