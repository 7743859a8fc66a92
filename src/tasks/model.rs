//! Stored document shapes for connected accounts and scheduled posts.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const ACCOUNTS: &str = "accounts";
pub const POSTS: &str = "posts";
pub const ACCOUNT_HEALTH: &str = "account_health";

/// Per-user copy of the account collection.
pub fn user_accounts(user_id: &str) -> String {
    format!("users/{}/accounts", user_id)
}

/// Per-user copy of the post collection.
pub fn user_posts(user_id: &str) -> String {
    format!("users/{}/posts", user_id)
}

/// Social platforms an account or post can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Facebook,
    Instagram,
    Twitter,
    Linkedin,
    Tiktok,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
            Platform::Twitter => "twitter",
            Platform::Linkedin => "linkedin",
            Platform::Tiktok => "tiktok",
        }
    }

    /// Platforms whose tokens come from the Facebook app and can be
    /// exchanged for long-lived ones.
    pub fn uses_facebook_tokens(&self) -> bool {
        matches!(self, Platform::Facebook | Platform::Instagram)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "facebook" => Ok(Platform::Facebook),
            "instagram" => Ok(Platform::Instagram),
            "twitter" | "x" => Ok(Platform::Twitter),
            "linkedin" => Ok(Platform::Linkedin),
            "tiktok" => Ok(Platform::Tiktok),
            other => Err(ValidationError::new(format!("unknown platform '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Connected,
    RefreshFailed,
    Disconnected,
}

/// A connected social account.
///
/// The document id is `{user_id}_{platform}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: String,
    /// Kept as written by the app; parsed during validation.
    pub platform: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: AccountStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refreshed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Account {
    pub fn document_id(user_id: &str, platform: Platform) -> String {
        format!("{}_{}", user_id, platform)
    }

    /// Check the fields every task relies on.
    pub fn validate(&self) -> Result<Platform, ValidationError> {
        if self.user_id.trim().is_empty() {
            return Err(ValidationError::new("account has no user id"));
        }
        if self.access_token.trim().is_empty() {
            return Err(ValidationError::new("account has no access token"));
        }
        self.platform.parse()
    }

    /// True when the token expires before `now + threshold`, or its expiry
    /// was never recorded.
    pub fn needs_refresh(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        match self.token_expires_at {
            Some(expires_at) => expires_at <= now + threshold,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    #[default]
    Draft,
    Scheduled,
    Published,
    Failed,
}

/// A post written by a user, optionally scheduled for later publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub user_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub status: PostStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    /// Platform name to the id the platform assigned.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub platform_post_ids: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Post {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == PostStatus::Scheduled && self.scheduled_at.is_some_and(|at| at <= now)
    }

    /// Check the post can be published and return its parsed targets.
    pub fn validate(&self) -> Result<Vec<Platform>, ValidationError> {
        if self.user_id.trim().is_empty() {
            return Err(ValidationError::new("post has no user id"));
        }
        if self.content.trim().is_empty() {
            return Err(ValidationError::new("post content is empty"));
        }
        if self.platforms.is_empty() {
            return Err(ValidationError::new("post targets no platform"));
        }
        self.platforms.iter().map(|p| p.parse()).collect()
    }
}

/// Token health classification written by the health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenHealth {
    Healthy,
    Expiring,
    Expired,
    Unknown,
}

impl TokenHealth {
    pub fn classify(
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        threshold: chrono::Duration,
    ) -> Self {
        match expires_at {
            None => TokenHealth::Unknown,
            Some(at) if at <= now => TokenHealth::Expired,
            Some(at) if at <= now + threshold => TokenHealth::Expiring,
            Some(_) => TokenHealth::Healthy,
        }
    }
}

/// Document stored under `account_health/{account_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountHealth {
    pub account_id: String,
    pub user_id: String,
    pub platform: String,
    pub token: TokenHealth,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_until_expiry: Option<i64>,
    pub checked_at: DateTime<Utc>,
}
