//! Domain models for support tickets

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Returned when a label string does not name a known variant
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} label: '{value}'")]
pub struct UnknownLabel {
    pub kind: &'static str,
    pub value: String,
}

/// Generates `as_str`, `Display` and case-insensitive `FromStr` for a
/// snake_case label enum.
macro_rules! label_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownLabel;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
                match normalized.as_str() {
                    $($label => Ok($name::$variant),)+
                    _ => Err(UnknownLabel {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

/// Status of a support ticket throughout its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    WaitingForCustomer,
    Escalated,
    Resolved,
    Closed,
}

label_enum!(TicketStatus, "status", {
    Open => "open",
    InProgress => "in_progress",
    WaitingForCustomer => "waiting_for_customer",
    Escalated => "escalated",
    Resolved => "resolved",
    Closed => "closed",
});

/// Categories for ticket classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketCategory {
    AccountAccess,
    Billing,
    Technical,
    Product,
    Shipping,
    Refund,
    General,
    Other,
}

label_enum!(TicketCategory, "category", {
    AccountAccess => "account_access",
    Billing => "billing",
    Technical => "technical",
    Product => "product",
    Shipping => "shipping",
    Refund => "refund",
    General => "general",
    Other => "other",
});

/// Priority levels for tickets
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Urgent,
}

label_enum!(TicketPriority, "priority", {
    Low => "low",
    Medium => "medium",
    High => "high",
    Urgent => "urgent",
});

/// Sentiment analysis results
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentScore {
    VeryNegative,
    Negative,
    Neutral,
    Positive,
    VeryPositive,
}

label_enum!(SentimentScore, "sentiment", {
    VeryNegative => "very_negative",
    Negative => "negative",
    Neutral => "neutral",
    Positive => "positive",
    VeryPositive => "very_positive",
});

impl SentimentScore {
    pub fn is_negative(&self) -> bool {
        matches!(self, SentimentScore::Negative | SentimentScore::VeryNegative)
    }
}

/// Role of the message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

label_enum!(MessageRole, "role", {
    User => "user",
    Assistant => "assistant",
    System => "system",
});

/// A prior turn in the customer conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// A knowledge-base document returned by retrieval, ranked by `score`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub content: String,
    /// Relevance in [0, 1]
    pub score: f64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RetrievedDocument {
    /// Creates a document, clamping `score` into [0, 1]. NaN scores become 0.
    pub fn new(content: impl Into<String>, score: f64) -> Self {
        let score = if score.is_nan() {
            0.0
        } else {
            score.clamp(0.0, 1.0)
        };
        Self {
            content: content.into(),
            score,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// An action proposed by the resolution stage, executed by the action stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl PendingAction {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            params: serde_json::Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}
