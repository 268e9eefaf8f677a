use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user row. Bots and webhook posters are users whose `password_hash` is
/// empty, which makes them valid message authors without being loginable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub display_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub avatar_url: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub avatar_url: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn to_response(&self) -> UserResponse {
        UserResponse {
            id: self.id.clone(),
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            avatar_url: self.avatar_url.clone(),
            status: self.status.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub description: String,
    pub is_direct: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelWithUnread {
    #[serde(flatten)]
    pub channel: Channel,
    pub unread_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    pub user_id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub widget_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageWithUser {
    #[serde(flatten)]
    pub message: Message,
    pub user: UserResponse,
    pub reply_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_reply: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Reaction {
    pub id: String,
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// Reactions on one message, grouped per emoji.
#[derive(Debug, Clone, Serialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: i64,
    pub users: Vec<UserResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Reminder {
    pub id: String,
    pub user_id: String,
    pub channel_id: String,
    pub message: String,
    pub remind_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Bot {
    pub id: String,
    pub name: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub description: String,
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub avatar_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Webhook {
    pub id: String,
    pub name: String,
    pub channel_id: String,
    pub token: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

// -- Kanban --

#[derive(Debug, Clone, Serialize)]
pub struct Board {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub description: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub icon: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BoardWithDetails {
    #[serde(flatten)]
    pub board: Board,
    pub column_count: i64,
    pub card_count: i64,
    pub member_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BoardMember {
    pub board_id: String,
    pub user_id: String,
    pub role: String,
    pub joined_at: DateTime<Utc>,
    pub user: UserResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct KanbanColumn {
    pub id: String,
    pub board_id: String,
    pub name: String,
    pub position: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnWithCards {
    #[serde(flatten)]
    pub column: KanbanColumn,
    pub cards: Vec<CardWithDetails>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KanbanLabel {
    pub id: String,
    pub board_id: String,
    pub name: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KanbanCard {
    pub id: String,
    pub column_id: String,
    pub board_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub description: String,
    pub position: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The cards-with-assignees-and-labels join shape.
#[derive(Debug, Clone, Serialize)]
pub struct CardWithDetails {
    #[serde(flatten)]
    pub card: KanbanCard,
    pub assignees: Vec<UserResponse>,
    pub labels: Vec<KanbanLabel>,
    pub comment_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<UserResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KanbanComment {
    pub id: String,
    pub card_id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserResponse>,
}

// -- Apps --

#[derive(Debug, Clone, Serialize)]
pub struct App {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub description: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub icon: String,
    pub html_content: String,
    pub css_content: String,
    pub js_content: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppWithDetails {
    #[serde(flatten)]
    pub app: App,
    pub member_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppMember {
    pub app_id: String,
    pub user_id: String,
    pub role: String,
    pub joined_at: DateTime<Utc>,
    pub user: UserResponse,
}

/// One turn of an app's builder conversation, role `user` or `assistant`.
#[derive(Debug, Clone, Serialize)]
pub struct AppMessage {
    pub id: String,
    pub app_id: String,
    pub user_id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// -- Custom commands --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomCommand {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub description: String,
    pub url: String,
    pub method: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub headers: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub body_template: String,
    pub is_global: bool,
    pub created_by: String,
    pub response_mode: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserPreference {
    pub key: String,
    pub value: String,
}
