use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Uniform result envelope returned by every action: `{success, data}` or
/// `{success, error}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ActionResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn into_result(self) -> Result<T, String> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            _ => Err(self.error.unwrap_or_else(|| "Unknown error".to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub claude_api_key: Option<String>, // encrypted
    pub claude_model: Option<String>,
    pub analysis_prompt: Option<String>,
    pub preparation_prompt: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettings {
    pub claude_api_key: Option<String>, // masked for display
    pub has_api_key: bool,
    pub claude_model: Option<String>,
    pub analysis_prompt: Option<String>,
    pub preparation_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub role: Option<String>,
    pub company: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub birthday: Option<String>,
    pub coaching_since: Option<String>,
    pub career_goal: Option<String>,
    pub key_challenge: Option<String>,
    pub key_stakeholders: Option<String>,
    pub reports_to_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Form data for creating or editing a client. Empty strings mean "unset".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientInput {
    pub name: String,
    pub role: Option<String>,
    pub company: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub birthday: Option<String>,
    pub coaching_since: Option<String>,
    pub career_goal: Option<String>,
    pub key_challenge: Option<String>,
    pub key_stakeholders: Option<String>,
    pub reports_to_id: Option<i64>,
}

impl From<&Client> for ClientInput {
    fn from(client: &Client) -> Self {
        Self {
            name: client.name.clone(),
            role: client.role.clone(),
            company: client.company.clone(),
            email: client.email.clone(),
            phone: client.phone.clone(),
            birthday: client.birthday.clone(),
            coaching_since: client.coaching_since.clone(),
            career_goal: client.career_goal.clone(),
            key_challenge: client.key_challenge.clone(),
            key_stakeholders: client.key_stakeholders.clone(),
            reports_to_id: client.reports_to_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSummary {
    #[serde(flatten)]
    pub client: Client,
    pub session_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientDetail {
    #[serde(flatten)]
    pub client: Client,
    pub reports_to: Option<Client>,
    pub direct_reports: Vec<Client>,
    pub team_members: Vec<Client>,
    pub sessions: Vec<Session>, // most recent first, capped
    pub notes: Vec<ClientNote>,
    pub session_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientNote {
    pub id: i64,
    pub client_id: i64,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub client_id: i64,
    pub user_id: i64,
    pub title: String,
    pub date: Option<String>,
    pub transcript: Option<String>,
    pub summary: Option<String>,
    pub follow_up_email: Option<String>,
    pub analysis: Option<String>, // custom analysis from the user's prompt
    pub preparation_notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionInput {
    pub title: String,
    pub client_id: Option<i64>,
    pub date: String,
    pub transcript: Option<String>,
}

/// Partial session update. `None` leaves a field untouched; `Some(None)`
/// clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPatch {
    pub title: Option<String>,
    pub date: Option<Option<String>>,
    pub transcript: Option<Option<String>>,
    pub summary: Option<Option<String>>,
    pub follow_up_email: Option<Option<String>>,
    pub analysis: Option<Option<String>>,
    pub preparation_notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionListItem {
    #[serde(flatten)]
    pub session: Session,
    pub client_name: String,
    pub tags: Vec<Tag>,
    pub resource_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: Session,
    pub client: Client,
    pub tags: Vec<Tag>,
    pub resources: Vec<ClientResource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagCategory {
    Session,
    Resource,
}

impl TagCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagCategory::Session => "session",
            TagCategory::Resource => "resource",
        }
    }
}

impl FromStr for TagCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(TagCategory::Session),
            "resource" => Ok(TagCategory::Resource),
            other => Err(format!("unknown tag category '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub category: TagCategory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: i64,
    pub title: String,
    #[serde(rename = "type")]
    pub resource_type: String, // "article", "framework", "tool", "book", "video", ...
    pub url: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub created_at: String,
}

/// A resource that has not been stored yet: typed in by hand or parsed out
/// of an LLM response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDraft {
    pub title: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub description: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientResource {
    pub id: i64,
    pub client_id: i64,
    pub session_id: Option<i64>,
    pub resource: Resource,
    pub suggested_by: String, // "ai" or "coach"
    pub reason: Option<String>,
    pub suggested_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptType {
    Analysis,
    Preparation,
}

impl PromptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptType::Analysis => "analysis",
            PromptType::Preparation => "preparation",
        }
    }
}

impl FromStr for PromptType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analysis" => Ok(PromptType::Analysis),
            "preparation" => Ok(PromptType::Preparation),
            other => Err(format!(
                "unknown prompt type '{}' (expected analysis or preparation)",
                other
            )),
        }
    }
}

impl fmt::Display for PromptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub template_type: PromptType,
    pub content: String,
    pub is_default: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextDocument {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub file_url: String,
    pub file_type: String, // "txt", "md", "pdf"
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    pub documents: Vec<ContextDocument>,
    pub combined_content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineKind {
    Session,
    Followup,
    Resource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineItem {
    pub kind: TimelineKind,
    pub date: String,
    pub title: String,
    pub description: String,
    pub session_id: Option<i64>,
}
