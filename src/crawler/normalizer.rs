//! Raw node to catalog entry normalization

use crate::crawler::fetcher::RawEntry;
use crate::storage::CatalogEntry;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

/// Why a raw node was dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// A field has the wrong JSON type, so the node cannot be decoded at all
    Malformed {
        node_id: Option<String>,
        reason: String,
    },

    /// No usable numeric identifier; such a node is never stored under a synthetic key
    MissingIdentifier { node_id: Option<String> },

    /// A field needed to build the canonical record is absent
    MissingField {
        entity_id: i64,
        field: &'static str,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { node_id, reason } => write!(
                f,
                "malformed node {}: {}",
                node_id.as_deref().unwrap_or("<unknown>"),
                reason
            ),
            Self::MissingIdentifier { node_id } => write!(
                f,
                "missing numeric identifier for node {}",
                node_id.as_deref().unwrap_or("<unknown>")
            ),
            Self::MissingField { entity_id, field } => {
                write!(f, "entity {} is missing {}", entity_id, field)
            }
        }
    }
}

/// Result of normalizing one page
#[derive(Debug, Clone, Default)]
pub struct NormalizedPage {
    /// Usable entries in upstream order
    pub entries: Vec<CatalogEntry>,
    /// Null or empty placeholder nodes
    pub skipped: usize,
    pub rejected: Vec<Rejection>,
}

/// Builds a catalog entry from a raw node
pub fn normalize_entry(raw: &RawEntry) -> Result<CatalogEntry, Rejection> {
    let entity_id = raw
        .database_id
        .filter(|id| *id > 0)
        .ok_or_else(|| Rejection::MissingIdentifier {
            node_id: raw.id.clone(),
        })?;

    let owner = raw
        .owner
        .as_ref()
        .and_then(|owner| owner.login.clone())
        .ok_or(Rejection::MissingField {
            entity_id,
            field: "owner",
        })?;
    let name = raw.name.clone().ok_or(Rejection::MissingField {
        entity_id,
        field: "name",
    })?;
    let url = raw.url.clone().ok_or(Rejection::MissingField {
        entity_id,
        field: "url",
    })?;

    let last_modified = raw.updated_at.as_deref().and_then(|value| {
        let parsed = DateTime::parse_from_rfc3339(value)
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
        if parsed.is_none() {
            tracing::debug!("Unparsable updatedAt '{}' for entity {}", value, entity_id);
        }
        parsed
    });

    Ok(CatalogEntry {
        entity_id,
        node_id: raw.id.clone(),
        full_name: format!("{}/{}", owner, name),
        owner,
        name,
        url,
        description: raw.description.clone(),
        language: raw
            .primary_language
            .as_ref()
            .and_then(|language| language.name.clone()),
        popularity: raw.stargazer_count.unwrap_or(0).max(0) as u64,
        last_modified,
    })
}

/// Decodes one untyped node
pub fn decode_node(node: &Value) -> Result<RawEntry, Rejection> {
    RawEntry::deserialize(node).map_err(|e| Rejection::Malformed {
        node_id: node.get("id").and_then(Value::as_str).map(str::to_string),
        reason: e.to_string(),
    })
}

/// Normalizes every node of a page, keeping upstream order
///
/// Placeholder nodes are skipped silently. Nodes that cannot be decoded or
/// cannot become a catalog entry are dropped with a warning; the rest of the
/// page is kept.
pub fn normalize_page(nodes: &[Option<Value>]) -> NormalizedPage {
    let mut page = NormalizedPage::default();

    for node in nodes {
        let Some(node) = node else {
            page.skipped += 1;
            continue;
        };

        let entry = decode_node(node).and_then(|raw| {
            if raw == RawEntry::default() {
                Ok(None)
            } else {
                normalize_entry(&raw).map(Some)
            }
        });

        match entry {
            Ok(None) => page.skipped += 1,
            Ok(Some(entry)) => page.entries.push(entry),
            Err(rejection) => {
                tracing::warn!("Dropping entry: {}", rejection);
                page.rejected.push(rejection);
            }
        }
    }

    page
}
