//! Core data models used throughout Capture OS.
//!
//! These types represent the license records kept in SQLite and the
//! ephemeral values that flow through the capture pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Activation state of a license key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseStatus {
    Unused,
    Active,
}

impl LicenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseStatus::Unused => "unused",
            LicenseStatus::Active => "active",
        }
    }

    /// Unknown strings read back as `Unused`.
    pub fn parse(s: &str) -> Self {
        match s {
            "active" => LicenseStatus::Active,
            _ => LicenseStatus::Unused,
        }
    }
}

/// One issued license key and its binding state.
#[derive(Debug, Clone)]
pub struct LicenseRecord {
    pub key: String,
    pub owner: String,
    /// Legacy flag, set together with the token.
    pub connected: bool,
    /// Raw expiry text as stored; see [`parse_expiry`].
    pub expiry: Option<String>,
    pub external_token: Option<String>,
    pub status: LicenseStatus,
    pub batch_id: Option<String>,
    pub is_admin: bool,
    pub database_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl LicenseRecord {
    /// A fresh, unbound record.
    pub fn new(key: impl Into<String>) -> Self {
        let now = Utc::now().timestamp();
        Self {
            key: key.into(),
            owner: String::new(),
            connected: false,
            expiry: None,
            external_token: None,
            status: LicenseStatus::Unused,
            batch_id: None,
            is_admin: false,
            database_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expiry.as_deref().and_then(parse_expiry)
    }
}

/// Parse a stored expiry: `YYYY-MM-DD` (midnight UTC) or RFC 3339.
pub fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(_) => {
            tracing::warn!(expiry = raw, "unparseable license expiry, treating as none");
            None
        }
    }
}

/// Body of `POST /capture`. The license key travels in the `Authorization` header.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptureRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub database_id: Option<String>,
}

impl CaptureRequest {
    /// Drop blank fields so `""` behaves like an absent value.
    pub fn normalized(self) -> Self {
        let clean = |v: Option<String>| {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        };
        Self {
            url: clean(self.url),
            text: self.text.filter(|t| !t.trim().is_empty()),
            database_id: clean(self.database_id),
        }
    }
}

/// Structured fields returned by the completion service.
///
/// Every field is optional on the wire; the document builder fills in defaults.
/// `category` and `difficulty` are kept as raw strings so values outside the
/// fixed sets pass through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExtractedKnowledge {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub key_insight: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub action_items: Option<Vec<String>>,
    #[serde(default)]
    pub emoji: Option<String>,
}

/// Content categories offered to the completion service. The labels are
/// select options in the destination database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Article,
    Tool,
    Inspiration,
    Resource,
    Opinion,
    Tutorial,
    Visual,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Article,
        Category::Tool,
        Category::Inspiration,
        Category::Resource,
        Category::Opinion,
        Category::Tutorial,
        Category::Visual,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Category::Article => "文章",
            Category::Tool => "工具",
            Category::Inspiration => "灵感",
            Category::Resource => "资源",
            Category::Opinion => "观点",
            Category::Tutorial => "教程",
            Category::Visual => "视觉",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.label() == label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Expert,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [
        Difficulty::Beginner,
        Difficulty::Intermediate,
        Difficulty::Expert,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Difficulty::Beginner => "入门",
            Difficulty::Intermediate => "进阶",
            Difficulty::Expert => "专业",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.label() == label)
    }
}
