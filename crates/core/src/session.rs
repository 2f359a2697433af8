use crate::embeddings::Embedder;
use crate::orchestrator::RetrievalQa;
use crate::traits::{TextGenerator, VectorIndex};
use crate::{QueryError, RetrievedChunk};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Assistant => f.write_str("assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub text: String,
    /// Empty when the reply came from the session cache.
    pub sources: Vec<RetrievedChunk>,
    pub cached: bool,
}

/// One interactive conversation. Holds the transcript and a cache of answers
/// keyed by the exact question text; both are dropped with the session.
pub struct ChatSession<E, V, G>
where
    E: Embedder,
    V: VectorIndex,
    G: TextGenerator,
{
    qa: RetrievalQa<E, V, G>,
    transcript: Vec<ChatMessage>,
    responses: HashMap<String, String>,
}

impl<E, V, G> ChatSession<E, V, G>
where
    E: Embedder,
    V: VectorIndex,
    G: TextGenerator,
{
    pub fn new(qa: RetrievalQa<E, V, G>) -> Self {
        Self {
            qa,
            transcript: Vec::new(),
            responses: HashMap::new(),
        }
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn cached_answer(&self, question: &str) -> Option<&str> {
        self.responses.get(question).map(String::as_str)
    }

    /// Records the question, answers it (from cache when the exact same text
    /// was answered before) and records the reply. A failed turn leaves only
    /// the user message behind and caches nothing.
    pub async fn ask(&mut self, question: &str) -> Result<ChatReply, QueryError> {
        self.push(Role::User, question);

        if let Some(cached) = self.responses.get(question).cloned() {
            debug!("answer served from session cache");
            self.push(Role::Assistant, &cached);
            return Ok(ChatReply {
                text: cached,
                sources: Vec::new(),
                cached: true,
            });
        }

        let answer = self.qa.answer(question).await?;
        let text = format_numbered_list(&answer.text)?;

        self.responses.insert(question.to_string(), text.clone());
        self.push(Role::Assistant, &text);

        Ok(ChatReply {
            text,
            sources: answer.sources,
            cached: false,
        })
    }

    fn push(&mut self, role: Role, content: &str) {
        self.transcript.push(ChatMessage {
            role,
            content: content.to_string(),
        });
    }
}

const NUMBERED_MARKER: &str = r"(\d+\.)";

/// Starts every `<digits>.` marker on a new line so inline numbered lists
/// read as lists.
pub fn format_numbered_list(text: &str) -> Result<String, regex::Error> {
    static MARKER: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

    let marker = MARKER
        .get_or_init(|| Regex::new(NUMBERED_MARKER))
        .as_ref()
        .map_err(Clone::clone)?;
    Ok(marker.replace_all(text, "\n$1").trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::fakes::{CountingIndex, ExtractiveGenerator, FailingGenerator};
    use crate::stores::LocalVectorStore;
    use crate::{CharacterNgramEmbedder, TextChunk};
    use std::sync::atomic::Ordering;

    fn store(embedder: &CharacterNgramEmbedder) -> LocalVectorStore {
        let texts = [
            "The capital of Example-land is Exemplar City.",
            "Drain the tank before replacing the filter.",
        ];
        LocalVectorStore::from_chunks(
            embedder.model_name(),
            embedder.dimensions(),
            texts
                .iter()
                .enumerate()
                .map(|(index, text)| TextChunk {
                    chunk_id: index.to_string(),
                    source_path: "manual.pdf".to_string(),
                    file_name: "manual.pdf".to_string(),
                    page: 1,
                    chunk_index: index as u64,
                    text: text.to_string(),
                })
                .collect(),
            texts.iter().map(|text| embedder.embed(text)).collect(),
        )
        .expect("store")
    }

    #[tokio::test]
    async fn repeated_question_is_served_from_cache() {
        let embedder = CharacterNgramEmbedder::default();
        let index = CountingIndex {
            inner: store(&embedder),
            calls: Default::default(),
        };
        let generator = ExtractiveGenerator::default();
        let searches = index.calls.clone();
        let generations = generator.calls.clone();
        let mut session = ChatSession::new(RetrievalQa::new(embedder, index, generator));

        let first = session
            .ask("What is the capital of Example-land?")
            .await
            .expect("first answer");
        let second = session
            .ask("What is the capital of Example-land?")
            .await
            .expect("second answer");

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.text.as_bytes(), second.text.as_bytes());
        assert_eq!(searches.load(Ordering::SeqCst), 1);
        assert_eq!(generations.load(Ordering::SeqCst), 1);

        let roles: Vec<Role> = session.transcript().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
    }

    #[tokio::test]
    async fn cache_key_is_the_raw_question() {
        let embedder = CharacterNgramEmbedder::default();
        let generator = ExtractiveGenerator::default();
        let generations = generator.calls.clone();
        let mut session = ChatSession::new(RetrievalQa::new(embedder, store(&embedder), generator));

        session
            .ask("What is the capital of Example-land?")
            .await
            .expect("answer");
        let reply = session
            .ask("what is the capital of example-land? ")
            .await
            .expect("answer");

        assert!(!reply.cached);
        assert_eq!(generations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_turns_are_not_cached() {
        let embedder = CharacterNgramEmbedder::default();
        let generator = FailingGenerator::default();
        let attempts = generator.calls.clone();
        let mut session = ChatSession::new(RetrievalQa::new(embedder, store(&embedder), generator));

        let first = session.ask("What is the capital of Example-land?").await;
        let second = session.ask("What is the capital of Example-land?").await;

        assert!(matches!(first, Err(QueryError::Generation(_))));
        assert!(second.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(session.cached_answer("What is the capital of Example-land?").is_none());
        assert!(session.transcript().iter().all(|m| m.role == Role::User));
    }

    struct ListGenerator;

    #[async_trait::async_trait]
    impl TextGenerator for ListGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, crate::GenerationError> {
            Ok("Maintenance steps: 1. Drain the tank 2. Replace the filter".to_string())
        }
    }

    #[tokio::test]
    async fn cached_answer_is_the_formatted_text() {
        let embedder = CharacterNgramEmbedder::default();
        let mut session =
            ChatSession::new(RetrievalQa::new(embedder, store(&embedder), ListGenerator));

        let reply = session
            .ask("Which maintenance steps are needed?")
            .await
            .expect("answer");

        assert!(reply.text.contains("\n1. Drain"));
        assert!(reply.text.contains("\n2. Replace"));
        assert_eq!(
            session.cached_answer("Which maintenance steps are needed?"),
            Some(reply.text.as_str())
        );
    }

    #[test]
    fn numbered_marker_pattern_compiles() {
        assert!(Regex::new(NUMBERED_MARKER).is_ok());
    }

    #[test]
    fn numbered_markers_start_new_lines() -> Result<(), regex::Error> {
        assert_eq!(
            format_numbered_list("Steps: 1. Open 2. Close")?,
            "Steps: \n1. Open \n2. Close"
        );
        assert_eq!(
            format_numbered_list("1. First 2. Second")?,
            "1. First \n2. Second"
        );
        assert_eq!(format_numbered_list("  no list here ")?, "no list here");
        Ok(())
    }

    #[test]
    fn roles_render_lowercase() {
        assert_eq!(Role::User.to_string(), "user");
        assert_eq!(Role::Assistant.to_string(), "assistant");
    }
}
