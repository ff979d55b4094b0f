use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entity identifiers are opaque UUIDs assigned by the upstream API layer.
pub type EntityId = Uuid;

// --- Entity kinds ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Lead,
    Deal,
    Contact,
}

impl EntityKind {
    /// Parse the wire string used by ingress payloads.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lead" => Some(EntityKind::Lead),
            "deal" => Some(EntityKind::Deal),
            "contact" => Some(EntityKind::Contact),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Lead => write!(f, "lead"),
            EntityKind::Deal => write!(f, "deal"),
            EntityKind::Contact => write!(f, "contact"),
        }
    }
}

// --- Attribute values ---

/// A typed attribute value. Attribute maps are string-keyed and carry one of
/// these five shapes; anything richer belongs in its own event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AttrValue {
    Number(f64),
    Text(String),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    /// Enum-style tag (e.g. a source channel or timeline bucket).
    Choice(String),
}

impl AttrValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttrValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) | AttrValue::Choice(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            AttrValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            AttrValue::Number(_) => "number",
            AttrValue::Text(_) => "text",
            AttrValue::Bool(_) => "bool",
            AttrValue::Timestamp(_) => "timestamp",
            AttrValue::Choice(_) => "choice",
        }
    }
}

// --- Entity ---

/// A CRM record tracked by the engine. Attribute mutations happen only via
/// applied events — callers never write to `attrs` directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub attrs: BTreeMap<String, AttrValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(
        id: EntityId,
        kind: EntityKind,
        attrs: BTreeMap<String, AttrValue>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            attrs,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key)
    }

    /// Apply a field update from an event. The event timestamp becomes the
    /// new `updated_at`.
    pub fn apply_field_update(&mut self, field: &str, new: AttrValue, ts: DateTime<Utc>) {
        self.attrs.insert(field.to_string(), new);
        self.updated_at = ts;
    }

    /// Record activity without changing attributes (activity / inactivity
    /// events still move `updated_at`).
    pub fn touch(&mut self, ts: DateTime<Utc>) {
        self.updated_at = ts;
    }
}
