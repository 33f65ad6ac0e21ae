//! Session memory: conversation history, reference resolution and user
//! preferences, plus an agent that consults them around each run.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::agent::{Agent, StrategyKind};
use crate::config::StrategySettings;
use crate::llm::{GenerationError, Generator};
use crate::tools::CapabilityRegistry;

/// Phrases that point back at something said earlier.
const REFERENCE_PHRASES: &[&str] = &[
    "that meeting",
    "the meeting",
    "that appointment",
    "the appointment",
    "that task",
    "the task",
    "that event",
    "the event",
    "move it",
    "cancel it",
    "reschedule it",
    "about it",
    "what time",
    "when is",
];

/// Entity words a reference can be narrowed by.
const ENTITY_TYPES: &[&str] = &["meeting", "appointment", "task", "event"];

/// How many recent exchanges a reference is resolved against.
const RESOLUTION_WINDOW: usize = 10;

/// Metadata keys written by [`SessionAgent`] itself, never entity facts.
const BOOKKEEPING_KEYS: &[&str] = &["strategy", "resolved"];

/// Category and key of the preferred reasoning strategy.
pub const STRATEGY_PREFERENCE: (&str, &str) = ("reasoning", "strategy");

/// One user/agent exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub id: Uuid,
    pub session_id: String,
    pub user_text: String,
    pub agent_text: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Conversation memory consulted by [`SessionAgent`].
#[async_trait]
pub trait SessionMemory: Send + Sync {
    /// The entity an earlier exchange established, if `text` refers back to one.
    async fn resolve_reference(&self, text: &str) -> Option<Value>;

    async fn save(&self, user_text: &str, agent_text: &str, session_id: &str, metadata: Value);

    async fn get_preference(&self, category: &str, key: &str, default: Value) -> Value;

    async fn set_preference(&self, category: &str, key: &str, value: Value);
}

/// In-memory session store (non-persistent).
#[derive(Clone)]
pub struct InMemorySessionStore {
    exchanges: Arc<RwLock<Vec<Exchange>>>,
    preferences: Arc<RwLock<HashMap<(String, String), Value>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            exchanges: Arc::new(RwLock::new(Vec::new())),
            preferences: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Exchanges of one session, oldest first.
    pub async fn history(&self, session_id: &str) -> Vec<Exchange> {
        self.exchanges
            .read()
            .await
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.exchanges.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.exchanges.read().await.is_empty()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Entity facts carried by an exchange: its own facts first, then whatever
/// it had resolved a reference to.
fn entity_candidates(metadata: &Value) -> Vec<Value> {
    let Some(object) = metadata.as_object() else {
        return Vec::new();
    };
    let facts: Map<String, Value> = object
        .iter()
        .filter(|(k, _)| !BOOKKEEPING_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut candidates = Vec::new();
    if !facts.is_empty() {
        candidates.push(Value::Object(facts));
    }
    if let Some(resolved) = object.get("resolved").filter(|v| !v.is_null()) {
        candidates.push(resolved.clone());
    }
    candidates
}

fn mentions(entity: &Value, word: &str) -> bool {
    entity.to_string().to_lowercase().contains(word)
}

#[async_trait]
impl SessionMemory for InMemorySessionStore {
    async fn resolve_reference(&self, text: &str) -> Option<Value> {
        let lower = text.to_lowercase();
        if !REFERENCE_PHRASES.iter().any(|p| lower.contains(p)) {
            return None;
        }
        let entity_type = ENTITY_TYPES.iter().find(|t| lower.contains(*t));

        let exchanges = self.exchanges.read().await;
        let mut fallback = None;
        for exchange in exchanges.iter().rev().take(RESOLUTION_WINDOW) {
            for candidate in entity_candidates(&exchange.metadata) {
                match entity_type {
                    Some(word) if mentions(&candidate, word) => return Some(candidate),
                    Some(_) => {
                        fallback.get_or_insert(candidate);
                    }
                    None => return Some(candidate),
                }
            }
        }

        if fallback.is_some() {
            tracing::debug!("No {} found, using the most recent entity", entity_type.unwrap_or(&"entity"));
        }
        fallback
    }

    async fn save(&self, user_text: &str, agent_text: &str, session_id: &str, metadata: Value) {
        let exchange = Exchange {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            user_text: user_text.to_string(),
            agent_text: agent_text.to_string(),
            metadata,
            created_at: Utc::now(),
        };
        tracing::debug!("Saved exchange {} for session {}", exchange.id, session_id);
        self.exchanges.write().await.push(exchange);
    }

    async fn get_preference(&self, category: &str, key: &str, default: Value) -> Value {
        self.preferences
            .read()
            .await
            .get(&(category.to_string(), key.to_string()))
            .cloned()
            .unwrap_or(default)
    }

    async fn set_preference(&self, category: &str, key: &str, value: Value) {
        self.preferences
            .write()
            .await
            .insert((category.to_string(), key.to_string()), value);
    }
}

/// An agent that remembers: strategy choice comes from preferences, earlier
/// entities are added as context, and every exchange is saved.
pub struct SessionAgent {
    generator: Arc<dyn Generator>,
    registry: Arc<CapabilityRegistry>,
    settings: StrategySettings,
    default_kind: StrategyKind,
    memory: Arc<dyn SessionMemory>,
    session_id: String,
}

impl SessionAgent {
    pub fn new(
        default_kind: StrategyKind,
        generator: Arc<dyn Generator>,
        registry: Arc<CapabilityRegistry>,
        settings: StrategySettings,
        memory: Arc<dyn SessionMemory>,
    ) -> Self {
        let session_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        tracing::info!("Session {} started", session_id);
        Self {
            generator,
            registry,
            settings,
            default_kind,
            memory,
            session_id,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The preferred strategy, or the configured default.
    pub async fn strategy_kind(&self) -> StrategyKind {
        let (category, key) = STRATEGY_PREFERENCE;
        let preferred = self
            .memory
            .get_preference(category, key, json!(self.default_kind.as_str()))
            .await;
        match preferred.as_str().map(str::parse::<StrategyKind>) {
            Some(Ok(kind)) => kind,
            _ => {
                tracing::warn!("Ignoring unusable strategy preference {}", preferred);
                self.default_kind
            }
        }
    }

    /// Answer `query` within this session.
    pub async fn run(&self, query: &str) -> Result<String, GenerationError> {
        self.run_with_facts(query, Map::new()).await
    }

    /// Answer `query` and remember `facts` about it (e.g. an event and its
    /// time) so later references can resolve to them.
    pub async fn run_with_facts(
        &self,
        query: &str,
        facts: Map<String, Value>,
    ) -> Result<String, GenerationError> {
        let kind = self.strategy_kind().await;
        let resolved = self.memory.resolve_reference(query).await;

        let contextual_query = match &resolved {
            Some(entity) => {
                tracing::info!("[Session {}] Resolved reference to {}", self.session_id, entity);
                format!("{}\n\nContext from earlier in this conversation: {}", query, entity)
            }
            None => query.to_string(),
        };

        let agent = Agent::new(
            kind,
            Arc::clone(&self.generator),
            Arc::clone(&self.registry),
            self.settings.clone(),
        );
        let answer = agent.run(&contextual_query).await?;

        let mut metadata = facts;
        metadata.insert("strategy".to_string(), json!(kind.as_str()));
        metadata.insert("resolved".to_string(), resolved.unwrap_or(Value::Null));
        self.memory
            .save(query, &answer, &self.session_id, Value::Object(metadata))
            .await;

        Ok(answer)
    }
}
