//! Turns gateway dispatches into candidate signal messages.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use super::dedup::Deduplicator;
use crate::config::ListenerConfig;
use crate::events::RawEvent;
use crate::gateway::GatewayEvent;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProcessorStats {
    pub messages_seen: u64,
    pub wrong_channel: u64,
    pub own_messages: u64,
    pub duplicates: u64,
    pub not_signals: u64,
    pub forwarded: u64,
}

pub struct MessageProcessor {
    channel_ids: HashSet<String>,
    keywords: Vec<String>,
    ignore_own_messages: bool,
    dedup: Deduplicator,
    own_user_id: Option<String>,
    stats: ProcessorStats,
}

impl MessageProcessor {
    pub fn new(
        channel_ids: impl IntoIterator<Item = String>,
        keywords: impl IntoIterator<Item = String>,
        ignore_own_messages: bool,
        dedup: Deduplicator,
    ) -> Self {
        Self {
            channel_ids: channel_ids.into_iter().collect(),
            keywords: keywords
                .into_iter()
                .map(|k| k.to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            ignore_own_messages,
            dedup,
            own_user_id: None,
            stats: ProcessorStats::default(),
        }
    }

    pub fn from_config(config: &ListenerConfig) -> Self {
        let capacity = config.dedup.capacity;
        let evict = config.dedup.evict_count.unwrap_or(capacity / 2);
        Self::new(
            config.channel_ids.clone(),
            config.signal_keywords.clone(),
            config.ignore_own_messages,
            Deduplicator::with_eviction(capacity, evict),
        )
    }

    pub fn stats(&self) -> &ProcessorStats {
        &self.stats
    }

    /// Returns a `RawEvent` when the dispatch is a new message worth parsing.
    pub fn process(&mut self, event: &GatewayEvent) -> Option<RawEvent> {
        match event.event_type.as_str() {
            "READY" => {
                self.own_user_id = event
                    .data
                    .get("user")
                    .and_then(|u| u.get("id"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                info!("👤 [INGEST] Listening as user {:?}", self.own_user_id);
                None
            }
            "MESSAGE_CREATE" => self.on_message(&event.data),
            _ => None,
        }
    }

    fn on_message(&mut self, data: &Value) -> Option<RawEvent> {
        self.stats.messages_seen += 1;

        let event_id = data.get("id").and_then(|v| v.as_str())?.to_string();
        let channel_id = str_field(data, "channel_id");
        let author = data.get("author").cloned().unwrap_or(Value::Null);
        let author_id = str_field(&author, "id");
        let author_name = str_field(&author, "username");

        if !self.channel_ids.is_empty() && !self.channel_ids.contains(&channel_id) {
            self.stats.wrong_channel += 1;
            return None;
        }

        if self.ignore_own_messages && self.own_user_id.as_deref() == Some(author_id.as_str()) {
            self.stats.own_messages += 1;
            return None;
        }

        if self.dedup.seen(&event_id) {
            debug!("[DEDUP] Skipping already processed message {}", event_id);
            self.stats.duplicates += 1;
            return None;
        }

        let content = merged_content(data);
        if content.trim().is_empty() || !self.looks_like_signal(&content) {
            self.stats.not_signals += 1;
            return None;
        }

        let timestamp = data
            .get("timestamp")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        self.stats.forwarded += 1;
        info!(
            "📨 [INGEST] Signal candidate {} from {} in {}",
            event_id, author_name, channel_id
        );

        Some(RawEvent {
            event_id,
            channel_id,
            author_id,
            author_name,
            content,
            timestamp,
        })
    }

    fn looks_like_signal(&self, content: &str) -> bool {
        if self.keywords.is_empty() {
            return true;
        }
        let lowered = content.to_lowercase();
        self.keywords.iter().any(|k| lowered.contains(k.as_str()))
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Message text followed by each embed's title and description.
pub fn merged_content(data: &Value) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(content) = data.get("content").and_then(|v| v.as_str()) {
        if !content.trim().is_empty() {
            parts.push(content.to_string());
        }
    }

    if let Some(embeds) = data.get("embeds").and_then(|v| v.as_array()) {
        for embed in embeds {
            for key in ["title", "description"] {
                if let Some(text) = embed.get(key).and_then(|v| v.as_str()) {
                    if !text.trim().is_empty() {
                        parts.push(text.to_string());
                    }
                }
            }
        }
    }

    parts.join("\n")
}
