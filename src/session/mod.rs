//! Conversation session state
//!
//! A [`SessionContext`] holds the bounded history and continuity state of
//! one chat; the [`SessionStore`] owns all contexts and serializes mutation
//! per chat id.

use crate::config::SessionSettings;
use crate::error::{LecternError, Result};
use crate::retrieval::Filters;
use crate::router::RouteDecision;
use crate::text::{normalize, token_sort_ratio, tokenize};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::sync::{Mutex, RwLock};

/// Operator or user forced routing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteOverride {
    ForceRetrieve,
    ForceGenerate,
    ForceHybrid,
}

impl RouteOverride {
    pub fn decision(self) -> RouteDecision {
        match self {
            RouteOverride::ForceRetrieve => RouteDecision::RetrieveOnly,
            RouteOverride::ForceGenerate => RouteDecision::GenerateOnly,
            RouteOverride::ForceHybrid => RouteDecision::GenerateWithRetrievalFallback,
        }
    }

    /// Parse the short names used by chat commands
    pub fn parse(mode: &str) -> Option<Self> {
        match mode.trim().to_lowercase().as_str() {
            "retrieve" | "force-retrieve" | "force_retrieve" => Some(RouteOverride::ForceRetrieve),
            "generate" | "force-generate" | "force_generate" => Some(RouteOverride::ForceGenerate),
            "hybrid" | "force-hybrid" | "force_hybrid" => Some(RouteOverride::ForceHybrid),
            _ => None,
        }
    }
}

impl fmt::Display for RouteOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RouteOverride::ForceRetrieve => "force_retrieve",
            RouteOverride::ForceGenerate => "force_generate",
            RouteOverride::ForceHybrid => "force_hybrid",
        };
        f.write_str(name)
    }
}

/// One question/answer pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
}

struct FollowUpPatterns {
    anaphora: Vec<Regex>,
    continuation: Vec<Regex>,
}

const ANAPHORA_PATTERNS: &[&str] = &[
    r"\b(it|its|this|that|these|those|them)\b",
    r"\bthis (topic|one|part|point|step)\b",
    r"\b(the )?(previous|last|above) (one|answer|point|example|exercise|topic)\b",
    r"\byou (said|mentioned|wrote|explained)\b",
    r"\b(same|again|more detail|in more depth)\b",
];

const CONTINUATION_PATTERNS: &[&str] = &[
    r"^(and|also|so|then|but|why|ok|okay|more|continue|next|another)\b",
    r"^(go on|what about|how about)\b",
];

fn compile_logged(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(r) => Some(r),
            Err(e) => {
                tracing::error!("Invalid follow-up pattern '{}': {}", p, e);
                None
            }
        })
        .collect()
}

fn follow_up_patterns() -> &'static FollowUpPatterns {
    static PATTERNS: OnceLock<FollowUpPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| FollowUpPatterns {
        anaphora: compile_logged(ANAPHORA_PATTERNS),
        continuation: compile_logged(CONTINUATION_PATTERNS),
    })
}

/// Per-chat conversation state
#[derive(Debug, Clone)]
pub struct SessionContext {
    chat_id: String,
    history: VecDeque<Exchange>,
    last_question: Option<String>,
    last_filters: Filters,
    last_decision: Option<RouteDecision>,
    last_top: Option<Filters>,
    pinned: Option<Filters>,
    route_override: Option<RouteOverride>,
    turns: u64,
    settings: SessionSettings,
}

impl SessionContext {
    pub fn new(chat_id: impl Into<String>, settings: SessionSettings) -> Self {
        Self {
            chat_id: chat_id.into(),
            history: VecDeque::with_capacity(settings.max_history),
            last_question: None,
            last_filters: Filters::default(),
            last_decision: None,
            last_top: None,
            pinned: None,
            route_override: None,
            turns: 0,
            settings,
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn history(&self) -> &VecDeque<Exchange> {
        &self.history
    }

    pub fn last_question(&self) -> Option<&str> {
        self.last_question.as_deref()
    }

    pub fn last_filters(&self) -> &Filters {
        &self.last_filters
    }

    pub fn last_decision(&self) -> Option<RouteDecision> {
        self.last_decision
    }

    pub fn last_top(&self) -> Option<&Filters> {
        self.last_top.as_ref()
    }

    pub fn pinned(&self) -> Option<&Filters> {
        self.pinned.as_ref()
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned.is_some()
    }

    /// Number of turns recorded so far
    pub fn turns(&self) -> u64 {
        self.turns
    }

    /// Record a completed exchange, evicting the oldest beyond the bound
    pub fn append_exchange(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        let question = question.into();
        self.history.push_back(Exchange {
            question: question.clone(),
            answer: answer.into(),
        });
        while self.history.len() > self.settings.max_history {
            self.history.pop_front();
        }
        self.last_question = Some(question);
    }

    /// Record the routing outcome of a turn
    pub fn record_turn(
        &mut self,
        question: impl Into<String>,
        decision: RouteDecision,
        filters: Filters,
        top_result: Option<Filters>,
    ) {
        self.turns += 1;
        self.last_question = Some(question.into());
        self.last_decision = Some(decision);
        self.last_filters = filters;
        if top_result.is_some() {
            self.last_top = top_result;
        }
    }

    /// Whether the query leans on the previous turn
    ///
    /// Needs a previous question. True on an anaphoric reference, a fuzzy
    /// match against the last question, or a short query opening with a
    /// continuation word.
    pub fn is_follow_up(&self, query: &str) -> bool {
        let Some(last) = self.last_question.as_deref() else {
            return false;
        };

        let normalized = normalize(query);
        if normalized.is_empty() {
            return false;
        }

        let patterns = follow_up_patterns();
        if patterns.anaphora.iter().any(|r| r.is_match(&normalized)) {
            return true;
        }

        if token_sort_ratio(&normalized, &normalize(last)) >= self.settings.follow_up_threshold {
            return true;
        }

        patterns.continuation.iter().any(|r| r.is_match(&normalized))
            && tokenize(&normalized).len() <= self.settings.continuation_max_tokens
    }

    /// Best available context: pinned > last top result > last retrieval filters
    pub fn best_context_metadata(&self) -> Option<Filters> {
        if let Some(pinned) = &self.pinned {
            return Some(pinned.clone());
        }
        if let Some(top) = &self.last_top {
            return Some(top.clone());
        }
        match self.last_decision {
            Some(decision) if decision.uses_retrieval() && !self.last_filters.is_empty() => {
                Some(self.last_filters.clone())
            }
            _ => None,
        }
    }

    /// Snapshot the best context into a sticky pin
    pub fn pin(&mut self) -> Option<&Filters> {
        let snapshot = self.best_context_metadata()?;
        tracing::debug!(chat_id = %self.chat_id, "Pinned context {:?}", snapshot);
        self.pinned = Some(snapshot);
        self.pinned.as_ref()
    }

    pub fn unpin(&mut self) {
        self.pinned = None;
    }

    /// Clear transient state; a full reset also drops the pin
    pub fn reset(&mut self, full: bool) {
        self.history.clear();
        self.last_question = None;
        self.last_filters = Filters::default();
        self.last_decision = None;
        self.last_top = None;
        self.route_override = None;
        if full {
            self.pinned = None;
            self.turns = 0;
        }
    }

    /// Forget the links to the previous turn, keeping pin and override
    pub fn forget_links(&mut self) {
        self.last_question = None;
        self.last_top = None;
    }

    pub fn set_route_override(&mut self, mode: Option<RouteOverride>) {
        self.route_override = mode;
    }

    pub fn get_route_override(&self) -> Option<RouteOverride> {
        self.route_override
    }
}

/// Shared handle to one chat's context
pub type SessionHandle = Arc<Mutex<SessionContext>>;

/// Owner of every chat's [`SessionContext`]
///
/// Each context sits behind its own mutex, so turns of one chat run one at
/// a time while different chats proceed in parallel.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    settings: SessionSettings,
}

impl SessionStore {
    pub fn new(settings: SessionSettings) -> Result<Self> {
        if settings.max_history == 0 {
            return Err(LecternError::invalid(
                "session.max_history",
                "History bound must be greater than 0",
            ));
        }

        Ok(Self {
            sessions: RwLock::new(HashMap::new()),
            settings,
        })
    }

    pub async fn get_or_create(&self, chat_id: &str) -> SessionHandle {
        if let Some(handle) = self.sessions.read().await.get(chat_id) {
            return Arc::clone(handle);
        }

        let mut sessions = self.sessions.write().await;
        let handle = sessions.entry(chat_id.to_string()).or_insert_with(|| {
            tracing::debug!(chat_id, "Created session");
            Arc::new(Mutex::new(SessionContext::new(
                chat_id,
                self.settings.clone(),
            )))
        });
        Arc::clone(handle)
    }

    pub async fn get(&self, chat_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(chat_id).cloned()
    }

    /// Copy of a context, for read-only use
    pub async fn snapshot(&self, chat_id: &str) -> Option<SessionContext> {
        let handle = self.get(chat_id).await?;
        let context = handle.lock().await;
        Some(context.clone())
    }

    /// Mutate an existing context under its lock
    pub async fn update<F, R>(&self, chat_id: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut SessionContext) -> R,
    {
        let handle = self
            .get(chat_id)
            .await
            .ok_or_else(|| LecternError::SessionNotFound {
                id: chat_id.to_string(),
            })?;
        let mut context = handle.lock().await;
        Ok(f(&mut context))
    }

    /// Destroy a context; returns whether it existed
    pub async fn clear(&self, chat_id: &str) -> bool {
        self.sessions.write().await.remove(chat_id).is_some()
    }

    pub async fn exists(&self, chat_id: &str) -> bool {
        self.sessions.read().await.contains_key(chat_id)
    }

    /// Known chat ids, sorted
    pub async fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
