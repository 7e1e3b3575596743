// Core domain types shared across the gateway

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kinds of sensitive values the detector recognizes.
///
/// The variant name (snake_case) is the placeholder prefix: a detected SSN
/// becomes `[ssn_1]`, a person name `[person_3]`, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Ssn,
    Itin,
    Ein,
    Email,
    Phone,
    Url,
    Ip,
    Iban,
    CreditCard,
    BankCard,
    Currency,
    TaxYear,
    Dob,
    Date,
    BankAccount,
    RoutingNumber,
    Address,
    PartialAddress,
    Person,
    Secret,
}

impl Category {
    /// Every category, in a fixed order used for audit counts.
    pub const ALL: [Category; 20] = [
        Category::Ssn,
        Category::Itin,
        Category::Ein,
        Category::Email,
        Category::Phone,
        Category::Url,
        Category::Ip,
        Category::Iban,
        Category::CreditCard,
        Category::BankCard,
        Category::Currency,
        Category::TaxYear,
        Category::Dob,
        Category::Date,
        Category::BankAccount,
        Category::RoutingNumber,
        Category::Address,
        Category::PartialAddress,
        Category::Person,
        Category::Secret,
    ];

    /// Placeholder prefix for this category.
    pub fn prefix(&self) -> &'static str {
        match self {
            Category::Ssn => "ssn",
            Category::Itin => "itin",
            Category::Ein => "ein",
            Category::Email => "email",
            Category::Phone => "phone",
            Category::Url => "url",
            Category::Ip => "ip",
            Category::Iban => "iban",
            Category::CreditCard => "credit_card",
            Category::BankCard => "bank_card",
            Category::Currency => "currency",
            Category::TaxYear => "tax_year",
            Category::Dob => "dob",
            Category::Date => "date",
            Category::BankAccount => "bank_account",
            Category::RoutingNumber => "routing_number",
            Category::Address => "address",
            Category::PartialAddress => "partial_address",
            Category::Person => "person",
            Category::Secret => "secret",
        }
    }

    /// Reverse lookup from a placeholder prefix.
    pub fn from_prefix(prefix: &str) -> Option<Category> {
        Category::ALL.iter().copied().find(|c| c.prefix() == prefix)
    }

    /// Canonical bracketed placeholder for the n-th value of this category.
    pub fn placeholder(&self, n: u32) -> String {
        format!("[{}_{}]", self.prefix(), n)
    }
}

/// A single detector hit inside one text buffer.
///
/// Spans are byte offsets into the scanned string. Matches live only for the
/// duration of one sanitizer call; nothing here is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMatch {
    pub start: usize,
    pub end: usize,
    pub category: Category,
    pub text: String,
}

impl EntityMatch {
    pub fn new(start: usize, end: usize, category: Category, text: impl Into<String>) -> Self {
        EntityMatch {
            start,
            end,
            category,
            text: text.into(),
        }
    }
}

/// One persisted placeholder mapping.
///
/// `(session_id, token)` and `(session_id, original_value)` are both unique
/// within the vault; the second uniqueness is what makes allocation
/// idempotent across turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultEntry {
    pub token: String,
    pub original_value: String,
    pub category: Category,
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// JSON field names whose values are protocol metadata and are never sent to
/// the detector, no matter what they contain.
pub const STRUCTURAL_KEYS: &[&str] = &[
    "tool_call_id",
    "tool_use_id",
    "id",
    "model",
    "role",
    "type",
    "finish_reason",
    "name",
    "object",
    "created",
    "index",
    "system_fingerprint",
    "stream",
    "max_tokens",
    "temperature",
    "top_p",
    "top_k",
    "stop_reason",
    "stop_sequence",
    "media_type",
    "source_type",
    "prompt_tokens",
    "completion_tokens",
    "total_tokens",
    "input_tokens",
    "output_tokens",
    "refusal",
];

/// True when a JSON object key must be copied through verbatim.
pub fn is_structural_key(key: &str) -> bool {
    STRUCTURAL_KEYS.contains(&key)
}
