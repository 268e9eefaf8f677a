use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{CustomCommand, UserResponse};

// -- Auth --

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub display_name: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserResponse,
}

// -- Users --

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

// -- Channels --

#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateChannelRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateDmRequest {
    pub user_id: String,
}

// -- Messages --

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub channel_id: String,
    pub content: String,
    #[serde(default)]
    pub thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub before: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TtsRequest {
    pub text: String,
    #[serde(default)]
    pub voice: String,
}

// -- Reactions --

#[derive(Debug, Deserialize)]
pub struct ReactionRequest {
    pub message_id: String,
    pub emoji: String,
}

// -- Reminders --

#[derive(Debug, Deserialize)]
pub struct CreateReminderRequest {
    #[serde(default)]
    pub channel_id: String,
    pub message: String,
    pub remind_at: String,
}

// -- Bots --

#[derive(Debug, Deserialize)]
pub struct CreateBotDmRequest {
    pub bot_id: String,
}

// -- Webhooks --

#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
    pub name: String,
    pub channel_id: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub id: String,
    pub name: String,
    pub channel_id: String,
    pub token: String,
    pub created_by: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub url: String,
}

/// Body of the public incoming-webhook endpoint. At least one of `content`
/// and `html` must be non-empty.
#[derive(Debug, Deserialize)]
pub struct IncomingWebhookRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub widget_size: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub avatar_url: String,
}

// -- Kanban --

#[derive(Debug, Deserialize)]
pub struct CreateBoardRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBoardRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddBoardMemberRequest {
    pub user_id: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateColumnRequest {
    pub name: String,
    #[serde(default)]
    pub position: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateColumnRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ReorderColumnsRequest {
    pub column_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCardRequest {
    pub column_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub due_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCardRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub assignee_ids: Option<Vec<String>>,
    #[serde(default)]
    pub label_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct MoveCardRequest {
    pub column_id: String,
    pub position: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateLabelRequest {
    pub name: String,
    pub color: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub content: String,
}

// -- Apps --

#[derive(Debug, Deserialize)]
pub struct CreateAppRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAppRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAppCodeRequest {
    #[serde(default)]
    pub html_content: Option<String>,
    #[serde(default)]
    pub css_content: Option<String>,
    #[serde(default)]
    pub js_content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AppCodeResponse {
    pub html_content: String,
    pub css_content: String,
    pub js_content: String,
}

#[derive(Debug, Deserialize)]
pub struct AddAppMemberRequest {
    pub user_id: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct AppChatRequest {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct AppQueryRequest {
    pub query: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

#[derive(Debug, Serialize, Default)]
pub struct AppQueryResponse {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<serde_json::Map<String, Value>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

// -- Custom commands --

#[derive(Debug, Deserialize)]
pub struct CreateCommandRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub headers: String,
    #[serde(default)]
    pub body_template: String,
    #[serde(default)]
    pub is_global: bool,
    #[serde(default)]
    pub response_mode: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateCommandRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: Option<String>,
    #[serde(default)]
    pub body_template: Option<String>,
    #[serde(default)]
    pub is_global: Option<bool>,
    #[serde(default)]
    pub response_mode: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteCommandRequest {
    pub command_id: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub channel_id: String,
}

#[derive(Debug, Serialize)]
pub struct CommandExecutionResult {
    pub success: bool,
    pub status_code: u16,
    pub response_body: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct AiGenerateCommandRequest {
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct AiGenerateCommandResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<CustomCommand>,
    pub preview: String,
}

#[derive(Debug, Deserialize)]
pub struct SetPreferenceRequest {
    pub key: String,
    pub value: String,
}
