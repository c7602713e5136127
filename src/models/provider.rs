use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The upstream kinds the registry knows how to dispatch to. One row per
/// real provider API key an indirected gateway key can be bound to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Some(ProviderKind::OpenAi),
            "anthropic" => Some(ProviderKind::Anthropic),
            "gemini" => Some(ProviderKind::Gemini),
            _ => None,
        }
    }
}

/// One upstream provider's real API key, held server-side so that
/// indirected gateway keys never expose it to the caller.
#[derive(Debug, Clone, FromRow)]
pub struct Provider {
    pub id: Uuid,
    pub name: String,
    pub kind: String,
    pub api_key: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public info returned by list/get — never exposes the full api_key.
#[derive(Debug, Serialize)]
pub struct ProviderInfo {
    pub id: Uuid,
    pub name: String,
    pub kind: String,
    pub api_key_preview: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Provider> for ProviderInfo {
    fn from(p: Provider) -> Self {
        let preview = if p.api_key.len() > 8 {
            format!("{}...{}", &p.api_key[..4], &p.api_key[p.api_key.len() - 4..])
        } else {
            "****".to_string()
        };
        Self {
            id: p.id,
            name: p.name,
            kind: p.kind,
            api_key_preview: preview,
            is_active: p.is_active,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}
