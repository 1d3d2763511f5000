use serde::{Serialize, Deserialize};
use serde_with::skip_serializing_none;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StyleDefinition {
    pub id: String,
    pub name: String,
    pub prompt_text: String,
    #[serde(default)]
    pub category: String, // filled from the catalog file when absent
    pub hair_type: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default, alias = "image")]
    pub photo: Option<String>, // data:image/...;base64, URI or http(s) URL
    #[serde(default, alias = "style")]
    pub style_id: Option<String>,
}

/// A validated generation job, alive only for the duration of one request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub source_image: String,
    pub style_id: String,
    pub prompt: String,
    pub request_timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Pending,
    Succeeded,
    Failed,
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    #[serde(rename = "resultImageURI")]
    pub result_image_uri: String,
    pub style_id: String,
    pub status: GenerationStatus,
    pub error_message: Option<String>,
}

// --- Managed backend rows (snake_case, as stored in the tables) ---

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Favorite {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub user_id: Uuid,
    pub style_id: String,
    pub style_snapshot: serde_json::Value,
    #[serde(default)]
    pub personal_note: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserProfile {
    pub user_id: Uuid,
    #[serde(flatten)]
    pub preferences: serde_json::Map<String, serde_json::Value>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SharedStyleLink {
    pub share_id: String,
    #[serde(default)]
    pub user_id: Option<Uuid>, // anonymous shares have no owner
    pub style_snapshot: serde_json::Value,
    #[serde(default)]
    pub personal_note: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: User,
}
