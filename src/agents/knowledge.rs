//! Knowledge-base retrieval over a directory of plain-text documents.
//!
//! Documents are split into paragraph chunks. A query is answered from the
//! three chunks sharing the most terms with it; the model only ever sees
//! those chunks.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::prompts;
use crate::error::{ConfigError, PortError};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::ports::Retriever;

/// Chunks handed to the model per query.
const TOP_K: usize = 3;

const ANSWER_MAX_TOKENS: u32 = 384;

/// Answer when the knowledge base has nothing relevant.
pub const UNKNOWN_ANSWER: &str = "I don't know.";

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "your", "with", "can", "what", "how",
    "does", "this", "that", "from", "have", "has", "was", "will", "would", "should", "could",
    "about", "into", "there", "their", "they", "our", "any", "all", "its", "who", "why", "when",
    "which", "been", "were", "also", "than", "then",
];

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

#[derive(Debug, Clone)]
struct Chunk {
    source: String,
    text: String,
    terms: HashSet<String>,
}

/// In-memory chunk index.
#[derive(Debug, Default)]
pub struct KnowledgeBase {
    chunks: Vec<Chunk>,
}

impl KnowledgeBase {
    /// Build from `(source name, text)` pairs.
    pub fn from_documents<I, S, T>(documents: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: AsRef<str>,
    {
        let mut chunks = Vec::new();
        for (source, text) in documents {
            let source = source.into();
            for paragraph in text.as_ref().split("\n\n") {
                let paragraph = paragraph.trim();
                if paragraph.is_empty() {
                    continue;
                }
                chunks.push(Chunk {
                    source: source.clone(),
                    text: paragraph.to_string(),
                    terms: terms(paragraph),
                });
            }
        }
        Self { chunks }
    }

    /// Load every `.md` and `.txt` file directly under `dir`.
    ///
    /// A missing directory yields an empty knowledge base.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        if !dir.exists() {
            warn!(dir = %dir.display(), "Knowledge directory missing, retrieval will answer \"I don't know.\"");
            return Ok(Self::default());
        }

        let mut documents = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_text = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("md") || e.eq_ignore_ascii_case("txt"));
            if !path.is_file() || !is_text {
                continue;
            }
            let text = std::fs::read_to_string(&path)?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            documents.push((name, text));
        }
        documents.sort_by(|a, b| a.0.cmp(&b.0));

        let kb = Self::from_documents(documents);
        info!(dir = %dir.display(), chunks = kb.len(), "Knowledge base loaded");
        Ok(kb)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Up to `k` chunk texts ranked by shared terms with `query`, best first.
    /// Chunks sharing no term are never returned.
    pub fn search(&self, query: &str, k: usize) -> Vec<&str> {
        let query_terms = terms(query);
        let mut scored: Vec<(usize, usize)> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| (i, chunk.terms.intersection(&query_terms).count()))
            .filter(|(_, score)| *score > 0)
            .collect();
        // Stable sort keeps document order among ties.
        scored.sort_by(|a, b| b.1.cmp(&a.1));
        scored
            .into_iter()
            .take(k)
            .map(|(i, _)| {
                let chunk = &self.chunks[i];
                debug!(source = %chunk.source, "Matched knowledge chunk");
                chunk.text.as_str()
            })
            .collect()
    }
}

/// Answers queries from the knowledge base, phrased by the model.
pub struct KnowledgeRetriever {
    kb: Arc<KnowledgeBase>,
    llm: Arc<dyn LlmProvider>,
}

impl KnowledgeRetriever {
    pub fn new(kb: Arc<KnowledgeBase>, llm: Arc<dyn LlmProvider>) -> Self {
        Self { kb, llm }
    }
}

#[async_trait]
impl Retriever for KnowledgeRetriever {
    async fn retrieve(&self, query: &str) -> Result<String, PortError> {
        let chunks = self.kb.search(query, TOP_K);
        if chunks.is_empty() {
            debug!(query, "No knowledge chunk matched");
            return Ok(UNKNOWN_ANSWER.to_string());
        }

        let request = CompletionRequest::new(vec![
            ChatMessage::system(prompts::answer_system_prompt()),
            ChatMessage::user(prompts::answer_user_prompt(query, &chunks)),
        ])
        .with_max_tokens(ANSWER_MAX_TOKENS);

        let response = self
            .llm
            .complete(request)
            .await
            .map_err(|e| PortError::RetrievalFailed(e.to_string()))?;
        let answer = response.content.trim();
        if answer.is_empty() {
            return Err(PortError::RetrievalFailed("model returned an empty answer".into()));
        }
        Ok(answer.to_string())
    }
}
