// Chat pipeline: reply + topic from the provider, then a chat-log entry

use crate::models::{CHAT_LOG, ChatExchange};
use crate::provider::{Provider, ProviderError};
use crate::store::Store;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{Instrument, debug, error, info_span, warn};
use uuid::Uuid;

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Prepended to every user message before generating the reply
pub const SYSTEM_PREAMBLE: &str = "You are PUCIO, an educational assistant for students. \
Answer clearly and concisely, in the same language the student writes in.";

/// Reply sent when the provider cannot be reached
pub const FALLBACK_REPLY: &str = "Sorry, there was a connection error with the assistant. Please try again later.";

/// Topic recorded when classification fails
pub const UNKNOWN_TOPIC: &str = "unknown";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("no message received")]
    InvalidInput,
}

/// What the caller gets back for one message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub reply: String,
    pub topic: String,
    /// Whether the exchange reached the chat log; not part of the response body
    #[serde(skip)]
    pub persisted: bool,
}

pub fn reply_prompt(message: &str) -> String {
    format!("{}\n\n{}", SYSTEM_PREAMBLE, message)
}

pub fn topic_prompt(message: &str) -> String {
    format!(
        "Classify the main topic of the following student message in one or two words \
(for example: math, history, greeting). Reply with the topic only.\n\nMessage: {}",
        message
    )
}

/// Trim and lower-case a classifier answer, keeping only its first line
///
/// An empty answer becomes `UNKNOWN_TOPIC`.
pub fn normalize_topic(raw: &str) -> String {
    let topic = raw.trim().lines().next().unwrap_or_default().trim().to_lowercase();
    if topic.is_empty() {
        UNKNOWN_TOPIC.to_string()
    } else {
        topic
    }
}

/// Turns one inbound message into a reply and a logged exchange
///
/// Provider failures and chat-log write failures never fail the request;
/// each is logged and replaced by a fixed value.
pub struct ChatOrchestrator {
    provider: Arc<dyn Provider>,
    log: Arc<Store>,
    timeout: Duration,
}

impl ChatOrchestrator {
    pub fn new(provider: Arc<dyn Provider>, log: Arc<Store>) -> Self {
        Self {
            provider,
            log,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    /// Bound each provider call to `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn chat_log(&self) -> &Arc<Store> {
        &self.log
    }

    pub async fn handle_message(&self, message: &str) -> Result<ChatReply, ChatError> {
        if message.trim().is_empty() {
            return Err(ChatError::InvalidInput);
        }

        let span = info_span!("chat", request_id = %Uuid::now_v7(), provider = self.provider.name());
        async {
            let (reply, topic) = tokio::join!(self.reply(message), self.topic(message));
            let persisted = self.persist(message, &reply, &topic).await;
            Ok(ChatReply { reply, topic, persisted })
        }
        .instrument(span)
        .await
    }

    async fn reply(&self, message: &str) -> String {
        match self.generate(&reply_prompt(message)).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Reply generation failed, using fallback");
                FALLBACK_REPLY.to_string()
            }
        }
    }

    async fn topic(&self, message: &str) -> String {
        match self.generate(&topic_prompt(message)).await {
            Ok(raw) => normalize_topic(&raw),
            Err(e) => {
                warn!(error = %e, "Topic detection failed, using sentinel");
                UNKNOWN_TOPIC.to_string()
            }
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        tokio::time::timeout(self.timeout, self.provider.generate(prompt))
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))?
    }

    async fn persist(&self, message: &str, reply: &str, topic: &str) -> bool {
        let fields = ChatExchange::new(message, reply, topic).into_fields();
        let result = match CHAT_LOG.check_required(&fields) {
            Ok(()) => self.log.clone().create_async(fields).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(record) => {
                debug!(id = record.id, topic, "Logged chat exchange");
                true
            }
            Err(e) => {
                error!(error = %e, file = ?self.log.path(), "Failed to log chat exchange");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CorruptPolicy;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Answers topic prompts with `topic` and everything else with `reply`
    struct Scripted {
        reply: Result<&'static str, ()>,
        topic: Result<&'static str, ()>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(reply: Result<&'static str, ()>, topic: Result<&'static str, ()>) -> Self {
            Self {
                reply,
                topic,
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Provider for Scripted {
        async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let answer = if prompt.starts_with("Classify") { self.topic } else { self.reply };
            answer
                .map(str::to_string)
                .map_err(|()| ProviderError::Status {
                    status: 503,
                    message: "unavailable".to_string(),
                })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct Hanging;

    #[async_trait]
    impl Provider for Hanging {
        async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("too late".to_string())
        }

        fn name(&self) -> &str {
            "hanging"
        }
    }

    fn chat_log(temp: &TempDir) -> Arc<Store> {
        Arc::new(Store::open(temp.path().join("chat_log.json"), CorruptPolicy::Recover).unwrap())
    }

    #[test]
    fn test_normalize_topic() {
        assert_eq!(normalize_topic("  Math \n"), "math");
        assert_eq!(normalize_topic("History\nbecause it mentions dates"), "history");
        assert_eq!(normalize_topic("   "), UNKNOWN_TOPIC);
        assert_eq!(normalize_topic(""), UNKNOWN_TOPIC);
    }

    #[test]
    fn test_prompts_embed_message() {
        assert!(reply_prompt("hola").starts_with(SYSTEM_PREAMBLE));
        assert!(reply_prompt("hola").ends_with("\n\nhola"));
        assert!(topic_prompt("hola").ends_with("Message: hola"));
    }

    #[tokio::test]
    async fn test_handle_message_logs_exchange() {
        let temp = TempDir::new().unwrap();
        let log = chat_log(&temp);
        let provider = Arc::new(Scripted::new(Ok("¡Hola! ¿En qué te ayudo?"), Ok(" Greeting ")));
        let chat = ChatOrchestrator::new(provider.clone(), log.clone());

        let reply = chat.handle_message("hola").await.unwrap();
        assert_eq!(reply.reply, "¡Hola! ¿En qué te ayudo?");
        assert_eq!(reply.topic, "greeting");
        assert!(reply.persisted);

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, 1);
        assert_eq!(records[0].get("message"), Some(&serde_json::json!("hola")));
        assert_eq!(records[0].get("topic"), Some(&serde_json::json!("greeting")));

        let prompts = provider.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts.contains(&reply_prompt("hola")));
        assert!(prompts.contains(&topic_prompt("hola")));
    }

    #[tokio::test]
    async fn test_empty_message_rejected_without_logging() {
        let temp = TempDir::new().unwrap();
        let log = chat_log(&temp);
        let provider = Arc::new(Scripted::new(Ok("reply"), Ok("topic")));
        let chat = ChatOrchestrator::new(provider.clone(), log.clone());

        assert!(matches!(chat.handle_message("").await, Err(ChatError::InvalidInput)));
        assert!(matches!(chat.handle_message("  \n").await, Err(ChatError::InvalidInput)));
        assert!(log.read_all().unwrap().is_empty());
        assert!(provider.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_uses_sentinels() {
        let temp = TempDir::new().unwrap();
        let log = chat_log(&temp);
        let chat = ChatOrchestrator::new(Arc::new(Scripted::new(Err(()), Err(()))), log.clone());

        let reply = chat.handle_message("hola").await.unwrap();
        assert_eq!(reply.reply, FALLBACK_REPLY);
        assert_eq!(reply.topic, UNKNOWN_TOPIC);
        assert_eq!(log.read_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_topic_failure_is_independent() {
        let temp = TempDir::new().unwrap();
        let chat = ChatOrchestrator::new(Arc::new(Scripted::new(Ok("answer"), Err(()))), chat_log(&temp));

        let reply = chat.handle_message("what is 2+2?").await.unwrap();
        assert_eq!(reply.reply, "answer");
        assert_eq!(reply.topic, UNKNOWN_TOPIC);
    }

    #[tokio::test]
    async fn test_provider_timeout_uses_sentinels() {
        let temp = TempDir::new().unwrap();
        let chat = ChatOrchestrator::new(Arc::new(Hanging), chat_log(&temp)).with_timeout(Duration::from_millis(50));

        let reply = chat.handle_message("hola").await.unwrap();
        assert_eq!(reply.reply, FALLBACK_REPLY);
        assert_eq!(reply.topic, UNKNOWN_TOPIC);
    }

    #[tokio::test]
    async fn test_persistence_failure_still_replies() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("chat_log.json");
        std::fs::write(&path, "not json").unwrap();
        let log = Arc::new(Store::open(&path, CorruptPolicy::Refuse).unwrap());
        let chat = ChatOrchestrator::new(Arc::new(Scripted::new(Ok("answer"), Ok("math"))), log);

        let reply = chat.handle_message("2+2").await.unwrap();
        assert_eq!(reply.reply, "answer");
        assert_eq!(reply.topic, "math");
        assert!(!reply.persisted);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not json");
    }

    #[test]
    fn test_reply_body_hides_persisted_flag() {
        let reply = ChatReply {
            reply: "r".to_string(),
            topic: "t".to_string(),
            persisted: false,
        };
        assert_eq!(serde_json::to_value(&reply).unwrap(), serde_json::json!({"reply": "r", "topic": "t"}));
    }
}
