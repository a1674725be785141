use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when a status/role string from the boundary is not one of the known values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        ParseEnumError { kind, value: value.to_string() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Editor,
    Journalist,
    Author,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Editor, Role::Journalist, Role::Author];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Editor => "editor",
            Role::Journalist => "journalist",
            Role::Author => "author",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "editor" => Ok(Role::Editor),
            "journalist" => Ok(Role::Journalist),
            "author" => Ok(Role::Author),
            _ => Err(ParseEnumError::new("role", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Pending,
    Active,
    Rejected,
    Suspended,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Pending => "pending",
            UserStatus::Active => "active",
            UserStatus::Rejected => "rejected",
            UserStatus::Suspended => "suspended",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(UserStatus::Pending),
            "active" => Ok(UserStatus::Active),
            "rejected" => Ok(UserStatus::Rejected),
            "suspended" => Ok(UserStatus::Suspended),
            _ => Err(ParseEnumError::new("user status", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    Draft,
    PendingReview,
    Published,
    Rejected,
    Scheduled,
}

impl ArticleStatus {
    pub const ALL: [ArticleStatus; 5] = [
        ArticleStatus::Draft,
        ArticleStatus::PendingReview,
        ArticleStatus::Published,
        ArticleStatus::Rejected,
        ArticleStatus::Scheduled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStatus::Draft => "draft",
            ArticleStatus::PendingReview => "pending_review",
            ArticleStatus::Published => "published",
            ArticleStatus::Rejected => "rejected",
            ArticleStatus::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for ArticleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArticleStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(ArticleStatus::Draft),
            "pending_review" => Ok(ArticleStatus::PendingReview),
            "published" => Ok(ArticleStatus::Published),
            "rejected" => Ok(ArticleStatus::Rejected),
            "scheduled" => Ok(ArticleStatus::Scheduled),
            _ => Err(ParseEnumError::new("article status", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub body: String,
    pub status: ArticleStatus,
    /// Whoever last sent the article to review, when that differs from the author.
    pub submitted_by: Option<String>,
    pub reviewed_by: Option<String>,
    pub review_note: Option<String>,
    pub is_breaking: bool,
    pub is_featured: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl Article {
    /// True when `user_id` wrote the article or sent it to review.
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.author_id == user_id || self.submitted_by.as_deref() == Some(user_id)
    }
}

/// Input for a new draft.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewArticle {
    pub title: String,
    pub body: String,
}

/// Content changes applied by an edit. `None` leaves the field as is.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArticleChanges {
    pub title: Option<String>,
    pub body: Option<String>,
    pub is_breaking: Option<bool>,
    pub is_featured: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArticleFilter {
    pub status: Option<ArticleStatus>,
    pub author_id: Option<String>,
}

impl ArticleFilter {
    pub fn matches(&self, article: &Article) -> bool {
        self.status.map_or(true, |s| article.status == s)
            && self.author_id.as_deref().map_or(true, |a| article.author_id == a)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Create,
    Update,
    Delete,
    Publish,
    Approve,
    Reject,
    Submit,
    Login,
    Upload,
    BulkDelete,
    Flag,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::Create => "create",
            ActivityAction::Update => "update",
            ActivityAction::Delete => "delete",
            ActivityAction::Publish => "publish",
            ActivityAction::Approve => "approve",
            ActivityAction::Reject => "reject",
            ActivityAction::Submit => "submit",
            ActivityAction::Login => "login",
            ActivityAction::Upload => "upload",
            ActivityAction::BulkDelete => "bulk_delete",
            ActivityAction::Flag => "flag",
        }
    }
}

impl fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(ActivityAction::Create),
            "update" => Ok(ActivityAction::Update),
            "delete" => Ok(ActivityAction::Delete),
            "publish" => Ok(ActivityAction::Publish),
            "approve" => Ok(ActivityAction::Approve),
            "reject" => Ok(ActivityAction::Reject),
            "submit" => Ok(ActivityAction::Submit),
            "login" => Ok(ActivityAction::Login),
            "upload" => Ok(ActivityAction::Upload),
            "bulk_delete" => Ok(ActivityAction::BulkDelete),
            "flag" => Ok(ActivityAction::Flag),
            _ => Err(ParseEnumError::new("activity action", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityResource {
    Article,
    Comment,
    Media,
    User,
    Category,
    Setting,
}

impl ActivityResource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityResource::Article => "article",
            ActivityResource::Comment => "comment",
            ActivityResource::Media => "media",
            ActivityResource::User => "user",
            ActivityResource::Category => "category",
            ActivityResource::Setting => "setting",
        }
    }
}

impl fmt::Display for ActivityResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityResource {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "article" => Ok(ActivityResource::Article),
            "comment" => Ok(ActivityResource::Comment),
            "media" => Ok(ActivityResource::Media),
            "user" => Ok(ActivityResource::User),
            "category" => Ok(ActivityResource::Category),
            "setting" => Ok(ActivityResource::Setting),
            _ => Err(ParseEnumError::new("activity resource", s)),
        }
    }
}

/// One row of the activity log. Never mutated after it is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_role: Role,
    pub action: ActivityAction,
    pub resource: ActivityResource,
    pub resource_id: Option<String>,
    pub resource_name: Option<String>,
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub mod db_operations;
