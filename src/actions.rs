//! Every user-facing operation. Each action re-checks ownership against the
//! acting coach, validates its input, and answers with an [`ActionResult`]
//! envelope. Storage failures are logged and reported with a generic
//! "Failed to ..." message.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::{error, info, warn};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

use crate::ai::{self, resolve_model, AIProvider, AiError, DEFAULT_CLAUDE_MODEL};
use crate::analysis::{self, AnalysisError, AnalysisOutcome};
use crate::auth::Identity;
use crate::config::{Config, ENCRYPTION_KEY_ENV};
use crate::crypto;
use crate::db::Database;
use crate::documents::{self, DocumentKind};
use crate::models::{
    ActionResult, Client, ClientDetail, ClientInput, ClientNote, ClientResource, ClientSummary,
    ContextBundle, ContextDocument, PromptTemplate, PromptType, Resource, ResourceDraft, Session,
    SessionDetail, SessionInput, SessionListItem, SessionPatch, Tag, TagCategory, TimelineItem,
    TimelineKind, User, UserProfile, UserSettings,
};
use crate::prompts::{default_analysis_prompt, default_preparation_prompt, DEFAULT_TEMPLATES};

const CLIENT_DETAIL_SESSIONS: usize = 10;
const MAX_NAME_CHARS: usize = 100;
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Forbidden(String),
    #[error(transparent)]
    Ai(#[from] AiError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<AnalysisError> for ActionError {
    fn from(e: AnalysisError) -> Self {
        match e {
            AnalysisError::Ai(e) => ActionError::Ai(e),
            AnalysisError::Storage(e) => ActionError::Internal(e),
        }
    }
}

fn invalid(message: impl Into<String>) -> ActionError {
    ActionError::Validation(message.into())
}

type Outcome<T> = Result<T, ActionError>;

fn respond<T>(failure: &str, action: impl FnOnce() -> Outcome<T>) -> ActionResult<T> {
    match action() {
        Ok(data) => ActionResult::ok(data),
        Err(ActionError::Internal(e)) => {
            error!("{}: {:#}", failure, e);
            ActionResult::err(failure)
        }
        Err(e) => ActionResult::err(e.to_string()),
    }
}

// --- Input cleaning ---

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex"));

fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

/// Trimmed value, or `None` when blank.
fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Accepts `YYYY-MM-DD`, RFC 3339, or a local date-time. Dates stay dates;
/// anything with a time becomes `YYYY-MM-DD HH:MM:SS`.
pub fn normalize_date(value: &str) -> Option<String> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date.format("%Y-%m-%d").to_string());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc().format(DATETIME_FORMAT).to_string());
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|dt| dt.format(DATETIME_FORMAT).to_string())
}

fn clean_date(value: Option<String>, label: &str) -> Outcome<Option<String>> {
    match clean(value) {
        Some(raw) => normalize_date(&raw)
            .map(Some)
            .ok_or_else(|| invalid(format!("Invalid {}", label))),
        None => Ok(None),
    }
}

// --- Users ---

/// Create the account for `email` with default prompts and templates.
/// Calling it again for an existing account returns that account.
pub fn create_new_user(db: &Database, email: &str, name: Option<&str>) -> ActionResult<User> {
    respond("Failed to create user", || {
        let email = email.trim().to_lowercase();
        if !is_valid_email(&email) {
            return Err(invalid("Invalid email"));
        }
        if let Some(existing) = db.get_user_by_email(&email)? {
            info!("User {} already exists, skipping setup", email);
            return Ok(existing);
        }

        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());

        let user_id = db.create_user(
            &email,
            &name,
            default_analysis_prompt(),
            default_preparation_prompt(),
        )?;
        info!("Created user {}", email);

        for template in DEFAULT_TEMPLATES {
            if let Err(e) = db.insert_template(
                user_id,
                template.name,
                template.template_type,
                template.content,
                true,
            ) {
                error!("Error creating default templates: {:#}", e);
                break;
            }
        }

        db.get_user(user_id)?.ok_or(ActionError::NotFound("User"))
    })
}

pub struct Actions<'a> {
    db: &'a Database,
    config: &'a Config,
    user_id: i64,
    connector: Box<dyn Fn(&str, &str) -> Box<dyn AIProvider>>,
}

impl<'a> Actions<'a> {
    pub fn new(db: &'a Database, config: &'a Config, identity: &Identity) -> Self {
        Self {
            db,
            config,
            user_id: identity.user_id,
            connector: Box::new(ai::connect),
        }
    }

    /// Replace how a model provider is built from a decrypted key and model id.
    pub fn with_connector(
        mut self,
        connector: impl Fn(&str, &str) -> Box<dyn AIProvider> + 'static,
    ) -> Self {
        self.connector = Box::new(connector);
        self
    }

    // --- Ownership lookups ---

    fn user(&self) -> Outcome<User> {
        self.db
            .get_user(self.user_id)?
            .ok_or(ActionError::NotFound("User"))
    }

    fn owned_client(&self, id: i64) -> Outcome<Client> {
        self.db
            .get_client(id, self.user_id)?
            .ok_or(ActionError::NotFound("Client"))
    }

    fn owned_session(&self, id: i64) -> Outcome<Session> {
        self.db
            .get_session(id, self.user_id)?
            .ok_or(ActionError::NotFound("Session"))
    }

    fn owned_note(&self, id: i64) -> Outcome<ClientNote> {
        self.db
            .get_note_for_user(id, self.user_id)?
            .ok_or(ActionError::NotFound("Note"))
    }

    fn owned_template(&self, id: i64) -> Outcome<PromptTemplate> {
        self.db
            .get_template(id, self.user_id)?
            .ok_or(ActionError::NotFound("Template"))
    }

    fn owned_document(&self, id: i64) -> Outcome<ContextDocument> {
        self.db
            .get_document(id, self.user_id)?
            .ok_or(ActionError::NotFound("Document"))
    }

    // --- Profile ---

    pub fn get_user_profile(&self) -> ActionResult<UserProfile> {
        respond("Failed to fetch profile", || {
            let user = self.user()?;
            Ok(UserProfile {
                id: user.id,
                email: user.email,
                name: user.name,
            })
        })
    }

    pub fn update_user_profile(&self, name: &str) -> ActionResult<UserProfile> {
        respond("Failed to update profile", || {
            if name.trim().is_empty() {
                return Err(invalid("Name cannot be empty"));
            }
            if name.chars().count() > MAX_NAME_CHARS {
                return Err(invalid("Name is too long (max 100 characters)"));
            }
            self.db.update_user_name(self.user_id, name.trim())?;
            let user = self.user()?;
            Ok(UserProfile {
                id: user.id,
                email: user.email,
                name: user.name,
            })
        })
    }

    // --- Clients ---

    pub fn get_clients(&self) -> ActionResult<Vec<ClientSummary>> {
        respond("Failed to fetch clients", || {
            Ok(self
                .db
                .list_clients(self.user_id)?
                .into_iter()
                .map(|(client, session_count)| ClientSummary {
                    client,
                    session_count,
                })
                .collect())
        })
    }

    pub fn get_client(&self, id: i64) -> ActionResult<ClientDetail> {
        respond("Failed to fetch client", || {
            let client = self.owned_client(id)?;
            let reports_to = match client.reports_to_id {
                Some(manager_id) => self.db.get_client(manager_id, self.user_id)?,
                None => None,
            };
            Ok(ClientDetail {
                reports_to,
                direct_reports: self.db.direct_reports(id)?,
                team_members: self.db.team_members(id)?,
                sessions: self.db.list_client_sessions(
                    id,
                    self.user_id,
                    Some(CLIENT_DETAIL_SESSIONS),
                )?,
                notes: self.db.list_notes(id)?,
                session_count: self.db.count_client_sessions(id)?,
                client,
            })
        })
    }

    fn validate_client(&self, input: ClientInput, editing: Option<i64>) -> Outcome<ClientInput> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(invalid("Name is required"));
        }

        let email = clean(input.email);
        if let Some(email) = &email {
            if !is_valid_email(email) {
                return Err(invalid("Invalid email"));
            }
        }

        if let Some(manager_id) = input.reports_to_id {
            if Some(manager_id) == editing {
                return Err(invalid("A client cannot report to themselves"));
            }
            if self.db.get_client(manager_id, self.user_id)?.is_none() {
                return Err(invalid("Reports-to client not found"));
            }
        }

        Ok(ClientInput {
            name,
            role: clean(input.role),
            company: clean(input.company),
            email,
            phone: clean(input.phone),
            birthday: clean_date(input.birthday, "birthday")?,
            coaching_since: clean_date(input.coaching_since, "coaching start date")?,
            career_goal: clean(input.career_goal),
            key_challenge: clean(input.key_challenge),
            key_stakeholders: clean(input.key_stakeholders),
            reports_to_id: input.reports_to_id,
        })
    }

    pub fn create_client(&self, input: ClientInput) -> ActionResult<Client> {
        respond("Failed to create client", || {
            let input = self.validate_client(input, None)?;
            let id = self.db.insert_client(self.user_id, &input)?;
            self.owned_client(id)
        })
    }

    pub fn update_client(&self, id: i64, input: ClientInput) -> ActionResult<Client> {
        respond("Failed to update client", || {
            self.owned_client(id)?;
            let input = self.validate_client(input, Some(id))?;
            self.db.update_client(id, &input)?;
            self.owned_client(id)
        })
    }

    pub fn delete_client(&self, id: i64) -> ActionResult<()> {
        respond("Failed to delete client", || {
            self.owned_client(id)?;
            self.db.delete_client(id)?;
            Ok(())
        })
    }

    pub fn add_team_member(&self, client_id: i64, member_id: i64) -> ActionResult<()> {
        respond("Failed to add team member", || {
            if client_id == member_id {
                return Err(invalid("A client cannot be their own team member"));
            }
            self.owned_client(client_id)?;
            self.owned_client(member_id)?;
            if self.db.are_team_members(client_id, member_id)? {
                return Err(ActionError::Forbidden("Already team members".to_string()));
            }
            self.db.add_team_member(client_id, member_id)?;
            Ok(())
        })
    }

    pub fn remove_team_member(&self, client_id: i64, member_id: i64) -> ActionResult<()> {
        respond("Failed to remove team member", || {
            self.owned_client(client_id)?;
            if self.db.remove_team_member(client_id, member_id)? == 0 {
                warn!("Clients #{} and #{} were not team members", client_id, member_id);
            }
            Ok(())
        })
    }

    pub fn create_client_note(&self, client_id: i64, content: &str) -> ActionResult<ClientNote> {
        respond("Failed to create note", || {
            self.owned_client(client_id)?;
            let content = content.trim();
            if content.is_empty() {
                return Err(invalid("Note content is required"));
            }
            Ok(self.db.insert_note(client_id, content)?)
        })
    }

    pub fn update_client_note(&self, note_id: i64, content: &str) -> ActionResult<ClientNote> {
        respond("Failed to update note", || {
            self.owned_note(note_id)?;
            let content = content.trim();
            if content.is_empty() {
                return Err(invalid("Note content is required"));
            }
            Ok(self.db.update_note(note_id, content)?)
        })
    }

    pub fn delete_client_note(&self, note_id: i64) -> ActionResult<()> {
        respond("Failed to delete note", || {
            self.owned_note(note_id)?;
            self.db.delete_note(note_id)?;
            Ok(())
        })
    }

    /// Sessions, follow-up emails and suggested resources, newest first.
    pub fn client_timeline(&self, client_id: i64) -> ActionResult<Vec<TimelineItem>> {
        respond("Failed to fetch client timeline", || {
            self.owned_client(client_id)?;
            let mut items = Vec::new();

            for session in self.db.list_client_sessions(client_id, self.user_id, None)? {
                if session.follow_up_email.is_some() {
                    items.push(TimelineItem {
                        kind: TimelineKind::Followup,
                        date: session.updated_at.clone(),
                        title: "Follow-up Email Sent".to_string(),
                        description: "Follow-up email generated and sent to client".to_string(),
                        session_id: Some(session.id),
                    });
                }
                items.push(TimelineItem {
                    kind: TimelineKind::Session,
                    date: session.date.clone().unwrap_or(session.created_at),
                    title: if session.title.is_empty() {
                        "Coaching Session".to_string()
                    } else {
                        session.title
                    },
                    description: session
                        .summary
                        .unwrap_or_else(|| "No summary available".to_string()),
                    session_id: Some(session.id),
                });
            }

            for link in self.db.client_resources(client_id)? {
                items.push(TimelineItem {
                    kind: TimelineKind::Resource,
                    date: link.suggested_at,
                    title: format!("Resource Suggested: {}", link.resource.title),
                    description: link
                        .reason
                        .unwrap_or_else(|| "Resource suggested for client".to_string()),
                    session_id: link.session_id,
                });
            }

            items.sort_by(|a, b| b.date.cmp(&a.date));
            Ok(items)
        })
    }

    pub fn get_client_resources(&self, client_id: i64) -> ActionResult<Vec<ClientResource>> {
        respond("Failed to fetch client resources", || {
            self.owned_client(client_id)?;
            Ok(self.db.client_resources(client_id)?)
        })
    }

    // --- Sessions ---

    pub fn get_sessions(&self) -> ActionResult<Vec<SessionListItem>> {
        respond("Failed to fetch sessions", || {
            let names: HashMap<i64, String> = self
                .db
                .list_clients(self.user_id)?
                .into_iter()
                .map(|(client, _)| (client.id, client.name))
                .collect();

            let mut items = Vec::new();
            for session in self.db.list_sessions(self.user_id)? {
                items.push(SessionListItem {
                    client_name: names.get(&session.client_id).cloned().unwrap_or_default(),
                    tags: self.db.session_tags(session.id)?,
                    resource_count: self.db.count_session_resources(session.id)?,
                    session,
                });
            }
            Ok(items)
        })
    }

    pub fn get_client_sessions(&self, client_id: i64) -> ActionResult<Vec<Session>> {
        respond("Failed to fetch client sessions", || {
            Ok(self
                .db
                .list_client_sessions(client_id, self.user_id, None)?)
        })
    }

    pub fn get_session(&self, id: i64) -> ActionResult<SessionDetail> {
        respond("Failed to fetch session", || {
            let session = self.owned_session(id)?;
            Ok(SessionDetail {
                client: self.owned_client(session.client_id)?,
                tags: self.db.session_tags(id)?,
                resources: self.db.session_resources(id)?,
                session,
            })
        })
    }

    pub fn create_session(&self, input: SessionInput) -> ActionResult<Session> {
        respond("Failed to create session", || {
            let title = input.title.trim();
            if title.is_empty() {
                return Err(invalid("Title is required"));
            }
            let client_id = input.client_id.ok_or_else(|| invalid("Client is required"))?;
            if input.date.trim().is_empty() {
                return Err(invalid("Session date is required"));
            }
            let date =
                normalize_date(&input.date).ok_or_else(|| invalid("Invalid session date"))?;
            self.owned_client(client_id)?;

            let transcript = clean(input.transcript);
            let id = self.db.insert_session(
                self.user_id,
                client_id,
                title,
                &date,
                transcript.as_deref(),
            )?;
            self.owned_session(id)
        })
    }

    pub fn update_session(&self, id: i64, patch: SessionPatch) -> ActionResult<Session> {
        respond("Failed to update session", || {
            self.owned_session(id)?;

            let title = match patch.title {
                Some(title) if title.trim().is_empty() => {
                    return Err(invalid("Title is required"));
                }
                Some(title) => Some(title.trim().to_string()),
                None => None,
            };
            let date = match patch.date {
                Some(date) => Some(clean_date(date, "session date")?),
                None => None,
            };
            let patch = SessionPatch {
                title,
                date,
                transcript: patch.transcript.map(clean),
                summary: patch.summary.map(clean),
                follow_up_email: patch.follow_up_email.map(clean),
                analysis: patch.analysis.map(clean),
                preparation_notes: patch.preparation_notes.map(clean),
            };

            self.db.update_session(id, &patch)?;
            self.owned_session(id)
        })
    }

    pub fn delete_session(&self, id: i64) -> ActionResult<()> {
        respond("Failed to delete session", || {
            self.owned_session(id)?;
            self.db.delete_session(id)?;
            Ok(())
        })
    }

    /// Replace the session's tags with the known session tags among `names`.
    pub fn update_session_tags(&self, session_id: i64, names: &[String]) -> ActionResult<Vec<Tag>> {
        respond("Failed to update session tags", || {
            self.owned_session(session_id)?;
            let names: Vec<String> = names
                .iter()
                .map(|n| n.trim().to_lowercase())
                .filter(|n| !n.is_empty())
                .collect();
            let tags = self.db.find_tags(&names, TagCategory::Session)?;
            if tags.len() < names.len() {
                warn!(
                    "Dropped {} unknown tag(s) for session #{}",
                    names.len() - tags.len(),
                    session_id
                );
            }
            let ids: Vec<i64> = tags.iter().map(|t| t.id).collect();
            self.db.replace_session_tags(session_id, &ids)?;
            Ok(self.db.session_tags(session_id)?)
        })
    }

    pub fn get_session_tags(&self) -> ActionResult<Vec<Tag>> {
        respond("Failed to fetch tags", || {
            Ok(self.db.list_tags(TagCategory::Session)?)
        })
    }

    // --- Resources ---

    pub fn list_resources(&self) -> ActionResult<Vec<Resource>> {
        respond("Failed to fetch resources", || Ok(self.db.list_resources()?))
    }

    /// Add a resource to the shared library by hand. An existing resource
    /// with the same title and type is returned instead of a duplicate.
    pub fn add_resource(&self, draft: ResourceDraft) -> ActionResult<Resource> {
        respond("Failed to add resource", || {
            let title = draft.title.trim().to_string();
            if title.is_empty() {
                return Err(invalid("Title is required"));
            }
            let draft = ResourceDraft {
                title,
                resource_type: Some(draft.resource_type.trim().to_lowercase())
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| "article".to_string()),
                url: clean(draft.url),
                description: draft.description.trim().to_string(),
                tags: draft
                    .tags
                    .iter()
                    .map(|t| t.trim().to_lowercase())
                    .filter(|t| !t.is_empty())
                    .collect(),
            };

            if let Some(existing) = self.db.find_resource(&draft.title, &draft.resource_type)? {
                return Ok(existing);
            }

            let id = self.db.insert_resource(&draft)?;
            let tags = self.db.find_tags(&draft.tags, TagCategory::Resource)?;
            let ids: Vec<i64> = tags.iter().map(|t| t.id).collect();
            self.db.link_resource_tags(id, &ids)?;

            self.db
                .find_resource(&draft.title, &draft.resource_type)?
                .ok_or(ActionError::NotFound("Resource"))
        })
    }

    // --- Settings and prompt templates ---

    pub fn get_user_settings(&self) -> ActionResult<UserSettings> {
        respond("Failed to fetch settings", || {
            let user = self.user()?;
            let masked = crypto::safe_decrypt(
                self.config.encryption_key.as_deref(),
                user.claude_api_key.as_deref(),
            )
            .map(|key| crypto::mask_secret(&key));
            Ok(UserSettings {
                claude_api_key: masked,
                has_api_key: user.claude_api_key.is_some(),
                claude_model: user.claude_model,
                analysis_prompt: user.analysis_prompt,
                preparation_prompt: user.preparation_prompt,
            })
        })
    }

    pub fn update_api_configuration(&self, api_key: &str, model: &str) -> ActionResult<()> {
        respond("Failed to update API configuration", || {
            let api_key = api_key.trim();
            if api_key.is_empty() {
                return Err(invalid("API key is required"));
            }
            let model = resolve_model(model).map_err(invalid)?;
            let key = self.config.encryption_key.as_deref().ok_or_else(|| {
                invalid(format!(
                    "No encryption key configured. Set {} (see 'coach keygen').",
                    ENCRYPTION_KEY_ENV
                ))
            })?;
            let sealed = crypto::encrypt(key, api_key)?;
            self.db
                .update_api_configuration(self.user_id, &sealed, model.model_id)?;
            Ok(())
        })
    }

    pub fn update_system_prompt(&self, prompt_type: PromptType, prompt: &str) -> ActionResult<()> {
        respond("Failed to update system prompt", || {
            self.db.update_user_prompt(self.user_id, prompt_type, prompt)?;
            Ok(())
        })
    }

    pub fn get_prompt_templates(&self) -> ActionResult<Vec<PromptTemplate>> {
        respond("Failed to fetch templates", || {
            Ok(self.db.list_templates(self.user_id)?)
        })
    }

    fn validate_template(name: &str, content: &str) -> Outcome<()> {
        if name.trim().is_empty() {
            return Err(invalid("Template name is required"));
        }
        if content.trim().is_empty() {
            return Err(invalid("Template content is required"));
        }
        Ok(())
    }

    pub fn create_prompt_template(
        &self,
        name: &str,
        template_type: PromptType,
        content: &str,
    ) -> ActionResult<PromptTemplate> {
        respond("Failed to create template", || {
            Self::validate_template(name, content)?;
            Ok(self
                .db
                .insert_template(self.user_id, name.trim(), template_type, content, false)?)
        })
    }

    pub fn update_prompt_template(
        &self,
        id: i64,
        name: &str,
        content: &str,
    ) -> ActionResult<PromptTemplate> {
        respond("Failed to update template", || {
            self.owned_template(id)?;
            Self::validate_template(name, content)?;
            self.db.update_template(id, name.trim(), content)?;
            self.owned_template(id)
        })
    }

    /// A template is active when its content equals either of the user's prompts.
    fn is_active_template(user: &User, template: &PromptTemplate) -> bool {
        user.analysis_prompt.as_deref() == Some(template.content.as_str())
            || user.preparation_prompt.as_deref() == Some(template.content.as_str())
    }

    pub fn delete_prompt_template(&self, id: i64) -> ActionResult<()> {
        respond("Failed to delete template", || {
            let template = self.owned_template(id)?;
            if Self::is_active_template(&self.user()?, &template) {
                return Err(ActionError::Forbidden(
                    "Cannot delete active template. Please set a different template as default first."
                        .to_string(),
                ));
            }
            self.db.delete_template(id)?;
            Ok(())
        })
    }

    pub fn set_template_as_default(&self, id: i64) -> ActionResult<()> {
        respond("Failed to set template as default", || {
            let template = self.owned_template(id)?;
            self.db
                .update_user_prompt(self.user_id, template.template_type, &template.content)?;
            Ok(())
        })
    }

    // --- Context documents ---

    pub fn get_context_documents(&self) -> ActionResult<Vec<ContextDocument>> {
        respond("Failed to fetch documents", || {
            Ok(self.db.list_documents(self.user_id)?)
        })
    }

    pub fn upload_context_document(&self, path: &Path) -> ActionResult<ContextDocument> {
        respond("Failed to upload document", || {
            if !path.is_file() {
                return Err(invalid("No file provided"));
            }
            let kind = DocumentKind::from_path(path).ok_or_else(|| {
                invalid("Invalid file type. Only PDF, TXT, and MD files are allowed.")
            })?;
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| invalid("No file provided"))?
                .to_string();

            let stored =
                documents::store_copy(&self.config.documents_dir(), self.user_id, path)
                    .map_err(|e| {
                        error!("Upload error: {:#}", e);
                        invalid("Failed to upload file")
                    })?;

            let content = match documents::extract_text(&stored, kind) {
                Ok(content) => content,
                Err(e) => {
                    error!("Text extraction error for {}: {:#}", name, e);
                    if let Err(e) = documents::remove_copy(&stored) {
                        warn!("{:#}", e);
                    }
                    return Err(invalid(match kind {
                        DocumentKind::Pdf => "Failed to parse PDF content",
                        _ => "Failed to read file content",
                    }));
                }
            };

            let file_url = stored.to_string_lossy();
            Ok(self
                .db
                .insert_document(self.user_id, &name, &file_url, kind.as_str(), &content)?)
        })
    }

    /// The stored copy is removed best-effort; the row is deleted regardless.
    pub fn delete_context_document(&self, id: i64) -> ActionResult<()> {
        respond("Failed to delete document", || {
            let document = self.owned_document(id)?;
            if let Err(e) = documents::remove_copy(&PathBuf::from(&document.file_url)) {
                error!("Storage delete error: {:#}", e);
            }
            self.db.delete_document(id)?;
            Ok(())
        })
    }

    pub fn get_all_user_context_documents(&self) -> ActionResult<ContextBundle> {
        respond("Failed to fetch documents", || {
            let documents = self.db.list_documents(self.user_id)?;
            Ok(ContextBundle {
                combined_content: documents::combine(&documents),
                documents,
            })
        })
    }

    fn context_content(&self) -> Option<String> {
        match self.get_all_user_context_documents().into_result() {
            Ok(bundle) => Some(bundle.combined_content).filter(|c| !c.is_empty()),
            Err(e) => {
                warn!("Continuing without context documents: {}", e);
                None
            }
        }
    }

    // --- AI ---

    fn provider(&self, user: &User) -> Outcome<Box<dyn AIProvider>> {
        let sealed = user
            .claude_api_key
            .as_deref()
            .ok_or(AiError::MissingApiKey)?;
        let api_key = crypto::safe_decrypt(self.config.encryption_key.as_deref(), Some(sealed))
            .ok_or(AiError::UndecryptableApiKey)?;
        let model = user.claude_model.as_deref().unwrap_or(DEFAULT_CLAUDE_MODEL);
        Ok((self.connector)(&api_key, model))
    }

    fn require_api_key(user: &User, purpose: &str) -> Outcome<()> {
        if user.claude_api_key.is_none() {
            return Err(invalid(format!(
                "Please configure your Claude API key in settings to {}",
                purpose
            )));
        }
        Ok(())
    }

    /// Everything an analysis run needs, checked before any model call.
    fn analysis_inputs(&self, session_id: i64) -> Outcome<(Session, User, Box<dyn AIProvider>)> {
        let session = self.owned_session(session_id)?;
        if session.transcript.as_deref().is_none_or(|t| t.trim().is_empty()) {
            return Err(invalid("No transcript available for analysis"));
        }
        let user = self.user()?;
        Self::require_api_key(&user, "use AI analysis")?;
        let provider = self.provider(&user)?;
        Ok((session, user, provider))
    }

    pub fn analyze_session(&self, session_id: i64) -> ActionResult<AnalysisOutcome> {
        respond("Failed to analyze session", || {
            let (session, user, provider) = self.analysis_inputs(session_id)?;
            let context = self.context_content();
            Ok(analysis::run_session_analysis(
                self.db,
                provider.as_ref(),
                &session,
                user.analysis_prompt.as_deref(),
                context.as_deref(),
            )?)
        })
    }

    /// Analyze again, replacing the stored analysis and tags. The old results
    /// are cleared only once the new generations have succeeded.
    pub fn reanalyze_session(&self, session_id: i64) -> ActionResult<AnalysisOutcome> {
        respond("Failed to re-analyze session", || {
            let (session, user, provider) = self.analysis_inputs(session_id)?;
            let context = self.context_content();
            let outcome = analysis::generate_session_analysis(
                provider.as_ref(),
                &session,
                user.analysis_prompt.as_deref(),
                context.as_deref(),
            )?;
            self.db.clear_analysis(session_id)?;
            analysis::save_session_analysis(self.db, &session, &outcome)?;
            Ok(outcome)
        })
    }

    pub fn prepare_for_session(&self, client_id: i64) -> ActionResult<String> {
        respond("Failed to generate preparation notes", || {
            self.owned_client(client_id)?;
            let user = self.user()?;
            Self::require_api_key(&user, "use AI preparation")?;
            let provider = self.provider(&user)?;
            let context = self.context_content();
            Ok(analysis::generate_preparation_notes(
                self.db,
                provider.as_ref(),
                &user,
                client_id,
                context.as_deref(),
            )?)
        })
    }

    /// Resource suggestions for a session, returned without being stored.
    pub fn discover_session_resources(&self, session_id: i64) -> ActionResult<Vec<ResourceDraft>> {
        respond("Failed to discover resources", || {
            let session = self.owned_session(session_id)?;
            let transcript = session
                .transcript
                .as_deref()
                .filter(|t| !t.trim().is_empty())
                .ok_or_else(|| invalid("No transcript available for resource discovery"))?;
            let user = self.user()?;
            Self::require_api_key(&user, "discover resources")?;
            let provider = self.provider(&user)?;
            Ok(analysis::discover_resources(provider.as_ref(), transcript)?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tests::ScriptedProvider;
    use crate::prompts::NO_PREVIOUS_SESSIONS;

    fn setup() -> (Database, Identity) {
        let db = Database::open_in_memory().unwrap();
        let user = create_new_user(&db, "Coach@Example.com", Some("Coach"))
            .into_result()
            .unwrap();
        let identity = Identity {
            user_id: user.id,
            email: user.email,
        };
        (db, identity)
    }

    fn test_config() -> Config {
        Config::for_tests(PathBuf::from("/tmp/coachlog-actions"))
    }

    fn scripted<'a>(db: &'a Database, config: &'a Config, identity: &Identity) -> Actions<'a> {
        Actions::new(db, config, identity)
            .with_connector(|_, _| Box::new(ScriptedProvider::new()) as Box<dyn AIProvider>)
    }

    fn add_client(actions: &Actions, name: &str) -> Client {
        actions
            .create_client(ClientInput {
                name: name.to_string(),
                ..Default::default()
            })
            .into_result()
            .unwrap()
    }

    fn add_session(actions: &Actions, client_id: i64, transcript: Option<&str>) -> Session {
        actions
            .create_session(SessionInput {
                title: "Week 1".to_string(),
                client_id: Some(client_id),
                date: "2025-03-01".to_string(),
                transcript: transcript.map(str::to_string),
            })
            .into_result()
            .unwrap()
    }

    fn other_coach(db: &Database) -> Identity {
        let user = create_new_user(db, "other@example.com", Some("Other"))
            .into_result()
            .unwrap();
        Identity {
            user_id: user.id,
            email: user.email,
        }
    }

    #[test]
    fn test_create_new_user_is_idempotent_and_seeds_templates() {
        let (db, identity) = setup();
        let again = create_new_user(&db, "coach@example.com", None)
            .into_result()
            .unwrap();
        assert_eq!(again.id, identity.user_id);
        assert_eq!(again.name, "Coach");
        assert_eq!(
            again.analysis_prompt.as_deref(),
            Some(default_analysis_prompt())
        );

        let templates = db.list_templates(identity.user_id).unwrap();
        assert_eq!(templates.len(), DEFAULT_TEMPLATES.len());
        assert!(templates.iter().all(|t| t.is_default));

        let other = create_new_user(&db, "dana.lee@example.com", None)
            .into_result()
            .unwrap();
        assert_eq!(other.name, "dana.lee");

        let bad = create_new_user(&db, "not-an-email", None);
        assert_eq!(bad.error.as_deref(), Some("Invalid email"));
    }

    #[test]
    fn test_update_user_profile_validation() {
        let (db, identity) = setup();
        let config = test_config();
        let actions = Actions::new(&db, &config, &identity);

        assert_eq!(
            actions.update_user_profile("   ").error.as_deref(),
            Some("Name cannot be empty")
        );
        assert_eq!(
            actions.update_user_profile(&"x".repeat(101)).error.as_deref(),
            Some("Name is too long (max 100 characters)")
        );
        let profile = actions
            .update_user_profile("  Alex Coach ")
            .into_result()
            .unwrap();
        assert_eq!(profile.name, "Alex Coach");
        assert_eq!(profile.email, "coach@example.com");
    }

    #[test]
    fn test_client_validation() {
        let (db, identity) = setup();
        let config = test_config();
        let actions = Actions::new(&db, &config, &identity);

        let missing = actions.create_client(ClientInput::default());
        assert_eq!(missing.error.as_deref(), Some("Name is required"));

        let bad_email = actions.create_client(ClientInput {
            name: "Dana".to_string(),
            email: Some("dana-at-acme".to_string()),
            ..Default::default()
        });
        assert_eq!(bad_email.error.as_deref(), Some("Invalid email"));

        let bad_date = actions.create_client(ClientInput {
            name: "Dana".to_string(),
            birthday: Some("March 3rd".to_string()),
            ..Default::default()
        });
        assert_eq!(bad_date.error.as_deref(), Some("Invalid birthday"));

        let client = actions
            .create_client(ClientInput {
                name: " Dana ".to_string(),
                email: Some("".to_string()),
                role: Some("  ".to_string()),
                coaching_since: Some("2024-09-01".to_string()),
                ..Default::default()
            })
            .into_result()
            .unwrap();
        assert_eq!(client.name, "Dana");
        assert_eq!(client.email, None);
        assert_eq!(client.role, None);
        assert_eq!(client.coaching_since.as_deref(), Some("2024-09-01"));
    }

    #[test]
    fn test_reports_to_rules() {
        let (db, identity) = setup();
        let config = test_config();
        let actions = Actions::new(&db, &config, &identity);
        let manager = add_client(&actions, "Manager");
        let report = add_client(&actions, "Report");

        let own = actions.update_client(
            report.id,
            ClientInput {
                name: "Report".to_string(),
                reports_to_id: Some(report.id),
                ..Default::default()
            },
        );
        assert_eq!(own.error.as_deref(), Some("A client cannot report to themselves"));

        let updated = actions
            .update_client(
                report.id,
                ClientInput {
                    name: "Report".to_string(),
                    reports_to_id: Some(manager.id),
                    ..Default::default()
                },
            )
            .into_result()
            .unwrap();
        assert_eq!(updated.reports_to_id, Some(manager.id));

        let detail = actions.get_client(manager.id).into_result().unwrap();
        assert_eq!(detail.direct_reports.len(), 1);
        assert_eq!(detail.direct_reports[0].id, report.id);
    }

    #[test]
    fn test_reports_to_must_be_own_client() {
        let (db, identity) = setup();
        let config = test_config();
        let actions = Actions::new(&db, &config, &identity);
        let report = add_client(&actions, "Report");

        let other = other_coach(&db);
        let theirs = add_client(&Actions::new(&db, &config, &other), "Their Manager");

        let created = actions.create_client(ClientInput {
            name: "Newcomer".to_string(),
            reports_to_id: Some(theirs.id),
            ..Default::default()
        });
        assert_eq!(created.error.as_deref(), Some("Reports-to client not found"));

        let updated = actions.update_client(
            report.id,
            ClientInput {
                name: "Report".to_string(),
                reports_to_id: Some(theirs.id),
                ..Default::default()
            },
        );
        assert_eq!(updated.error.as_deref(), Some("Reports-to client not found"));
        let stored = actions.get_client(report.id).into_result().unwrap();
        assert_eq!(stored.client.reports_to_id, None);
    }

    #[test]
    fn test_clients_of_other_users_are_invisible() {
        let (db, identity) = setup();
        let config = test_config();
        let actions = Actions::new(&db, &config, &identity);
        let client = add_client(&actions, "Dana");

        let other = create_new_user(&db, "other@example.com", None)
            .into_result()
            .unwrap();
        let other_identity = Identity {
            user_id: other.id,
            email: other.email,
        };
        let intruder = Actions::new(&db, &config, &other_identity);

        assert_eq!(
            intruder.get_client(client.id).error.as_deref(),
            Some("Client not found")
        );
        assert_eq!(
            intruder.delete_client(client.id).error.as_deref(),
            Some("Client not found")
        );
        assert!(intruder.get_clients().into_result().unwrap().is_empty());
        assert!(actions.get_client(client.id).success);
    }

    #[test]
    fn test_team_members() {
        let (db, identity) = setup();
        let config = test_config();
        let actions = Actions::new(&db, &config, &identity);
        let a = add_client(&actions, "Ana");
        let b = add_client(&actions, "Ben");

        assert_eq!(
            actions.add_team_member(a.id, a.id).error.as_deref(),
            Some("A client cannot be their own team member")
        );
        assert!(actions.add_team_member(a.id, b.id).success);
        assert_eq!(
            actions.add_team_member(b.id, a.id).error.as_deref(),
            Some("Already team members")
        );
        assert_eq!(
            actions.add_team_member(a.id, 999).error.as_deref(),
            Some("Client not found")
        );

        let detail = actions.get_client(b.id).into_result().unwrap();
        assert_eq!(detail.team_members[0].id, a.id);

        assert!(actions.remove_team_member(b.id, a.id).success);
        let detail = actions.get_client(a.id).into_result().unwrap();
        assert!(detail.team_members.is_empty());
    }

    #[test]
    fn test_notes() {
        let (db, identity) = setup();
        let config = test_config();
        let actions = Actions::new(&db, &config, &identity);
        let client = add_client(&actions, "Dana");

        assert_eq!(
            actions.create_client_note(client.id, "  ").error.as_deref(),
            Some("Note content is required")
        );
        let note = actions
            .create_client_note(client.id, "Prefers mornings")
            .into_result()
            .unwrap();
        let edited = actions
            .update_client_note(note.id, "Prefers afternoons")
            .into_result()
            .unwrap();
        assert_eq!(edited.content, "Prefers afternoons");

        assert!(actions.delete_client_note(note.id).success);
        assert_eq!(
            actions.delete_client_note(note.id).error.as_deref(),
            Some("Note not found")
        );
    }

    #[test]
    fn test_session_validation_and_patch() {
        let (db, identity) = setup();
        let config = test_config();
        let actions = Actions::new(&db, &config, &identity);
        let client = add_client(&actions, "Dana");

        let cases = [
            (SessionInput::default(), "Title is required"),
            (
                SessionInput {
                    title: "Kickoff".to_string(),
                    ..Default::default()
                },
                "Client is required",
            ),
            (
                SessionInput {
                    title: "Kickoff".to_string(),
                    client_id: Some(client.id),
                    ..Default::default()
                },
                "Session date is required",
            ),
            (
                SessionInput {
                    title: "Kickoff".to_string(),
                    client_id: Some(client.id),
                    date: "someday".to_string(),
                    ..Default::default()
                },
                "Invalid session date",
            ),
            (
                SessionInput {
                    title: "Kickoff".to_string(),
                    client_id: Some(client.id + 100),
                    date: "2025-03-01".to_string(),
                    ..Default::default()
                },
                "Client not found",
            ),
        ];
        for (input, expected) in cases {
            assert_eq!(actions.create_session(input).error.as_deref(), Some(expected));
        }

        let session = actions
            .create_session(SessionInput {
                title: "Kickoff".to_string(),
                client_id: Some(client.id),
                date: "2025-03-01T09:30".to_string(),
                transcript: Some("We began.".to_string()),
            })
            .into_result()
            .unwrap();
        assert_eq!(session.date.as_deref(), Some("2025-03-01 09:30:00"));

        let patched = actions
            .update_session(
                session.id,
                SessionPatch {
                    summary: Some(Some("Good start".to_string())),
                    transcript: Some(Some("".to_string())),
                    ..Default::default()
                },
            )
            .into_result()
            .unwrap();
        assert_eq!(patched.title, "Kickoff");
        assert_eq!(patched.summary.as_deref(), Some("Good start"));
        assert_eq!(patched.transcript, None);

        let blank_title = actions.update_session(
            session.id,
            SessionPatch {
                title: Some(" ".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(blank_title.error.as_deref(), Some("Title is required"));
    }

    #[test]
    fn test_update_session_tags_keeps_known_session_tags() {
        let (db, identity) = setup();
        let config = test_config();
        let actions = Actions::new(&db, &config, &identity);
        let client = add_client(&actions, "Dana");
        let session = add_session(&actions, client.id, None);

        let names = vec![
            "Leadership".to_string(),
            "framework".to_string(),
            "made-up".to_string(),
        ];
        let tags = actions
            .update_session_tags(session.id, &names)
            .into_result()
            .unwrap();
        let tag_names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(tag_names, vec!["leadership"]);

        let list = actions.get_sessions().into_result().unwrap();
        assert_eq!(list[0].client_name, "Dana");
        assert_eq!(list[0].tags.len(), 1);
    }

    #[test]
    fn test_add_resource_dedupes_and_tags() {
        let (db, identity) = setup();
        let config = test_config();
        let actions = Actions::new(&db, &config, &identity);

        let draft = ResourceDraft {
            title: "Radical Candor".to_string(),
            resource_type: "".to_string(),
            url: Some(" ".to_string()),
            description: "Feedback framework".to_string(),
            tags: vec!["Book".to_string(), "unknown".to_string()],
        };
        let first = actions.add_resource(draft.clone()).into_result().unwrap();
        assert_eq!(first.resource_type, "article");
        assert_eq!(first.url, None);
        assert_eq!(first.tags, vec!["book"]);

        let second = actions.add_resource(draft).into_result().unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(actions.list_resources().into_result().unwrap().len(), 1);
    }

    #[test]
    fn test_settings_mask_and_model_validation() {
        let (db, identity) = setup();
        let config = test_config();
        let actions = Actions::new(&db, &config, &identity);

        let settings = actions.get_user_settings().into_result().unwrap();
        assert!(!settings.has_api_key);
        assert_eq!(settings.claude_api_key, None);

        let unknown = actions.update_api_configuration("sk-ant-key", "gpt-4o");
        assert!(unknown.error.unwrap().starts_with("Unknown model 'gpt-4o'"));

        assert!(actions
            .update_api_configuration("sk-ant-api03-abcdef-9876", "sonnet-4")
            .success);
        let settings = actions.get_user_settings().into_result().unwrap();
        assert!(settings.has_api_key);
        assert_eq!(settings.claude_api_key.as_deref(), Some("sk-ant-...9876"));
        assert_eq!(
            settings.claude_model.as_deref(),
            Some("claude-sonnet-4-20250514")
        );

        let stored = db.get_user(identity.user_id).unwrap().unwrap();
        assert_ne!(stored.claude_api_key.as_deref(), Some("sk-ant-api03-abcdef-9876"));
    }

    #[test]
    fn test_active_template_cannot_be_deleted() {
        let (db, identity) = setup();
        let config = test_config();
        let actions = Actions::new(&db, &config, &identity);

        let templates = actions.get_prompt_templates().into_result().unwrap();
        let standard = templates
            .iter()
            .find(|t| t.name == "Standard Analysis")
            .unwrap();
        assert_eq!(
            actions.delete_prompt_template(standard.id).error.as_deref(),
            Some("Cannot delete active template. Please set a different template as default first.")
        );

        let custom = actions
            .create_prompt_template("Mine", PromptType::Analysis, "Find the themes.")
            .into_result()
            .unwrap();
        assert!(!custom.is_default);
        assert!(actions.set_template_as_default(custom.id).success);

        let settings = actions.get_user_settings().into_result().unwrap();
        assert_eq!(settings.analysis_prompt.as_deref(), Some("Find the themes."));
        assert!(actions.delete_prompt_template(standard.id).success);
        assert_eq!(
            actions.delete_prompt_template(standard.id).error.as_deref(),
            Some("Template not found")
        );
    }

    #[test]
    fn test_update_system_prompt() {
        let (db, identity) = setup();
        let config = test_config();
        let actions = Actions::new(&db, &config, &identity);

        assert!(actions
            .update_system_prompt(PromptType::Preparation, "Three questions to open with.")
            .success);
        let settings = actions.get_user_settings().into_result().unwrap();
        assert_eq!(
            settings.preparation_prompt.as_deref(),
            Some("Three questions to open with.")
        );
        assert_eq!(
            settings.analysis_prompt.as_deref(),
            Some(default_analysis_prompt())
        );

        assert!(actions
            .update_system_prompt(PromptType::Analysis, "Focus on delegation.")
            .success);
        let settings = actions.get_user_settings().into_result().unwrap();
        assert_eq!(settings.analysis_prompt.as_deref(), Some("Focus on delegation."));
        assert_eq!(
            settings.preparation_prompt.as_deref(),
            Some("Three questions to open with.")
        );
    }

    #[test]
    fn test_context_documents_upload_and_delete() {
        let (db, identity) = setup();
        let dir = tempfile::tempdir().unwrap();
        let config = Config::for_tests(dir.path().to_path_buf());
        let actions = Actions::new(&db, &config, &identity);

        let deck = dir.path().join("deck.pptx");
        std::fs::write(&deck, "slides").unwrap();
        assert_eq!(
            actions.upload_context_document(&deck).error.as_deref(),
            Some("Invalid file type. Only PDF, TXT, and MD files are allowed.")
        );

        let bio = dir.path().join("bio.txt");
        std::fs::write(&bio, "Twenty years in leadership coaching.").unwrap();
        let doc = actions.upload_context_document(&bio).into_result().unwrap();
        assert_eq!(doc.name, "bio.txt");
        assert_eq!(doc.file_type, "txt");
        assert!(Path::new(&doc.file_url).exists());

        let broken = dir.path().join("broken.pdf");
        std::fs::write(&broken, "not a pdf").unwrap();
        assert_eq!(
            actions.upload_context_document(&broken).error.as_deref(),
            Some("Failed to parse PDF content")
        );

        let bundle = actions.get_all_user_context_documents().into_result().unwrap();
        assert_eq!(bundle.documents.len(), 1);
        assert_eq!(
            bundle.combined_content,
            "--- CONTEXT DOCUMENT: bio.txt ---\nTwenty years in leadership coaching.\n--- END: bio.txt ---"
        );

        assert!(actions.delete_context_document(doc.id).success);
        assert!(!Path::new(&doc.file_url).exists());
        assert_eq!(
            actions.delete_context_document(doc.id).error.as_deref(),
            Some("Document not found")
        );
    }

    #[test]
    fn test_analyze_session_requirements() {
        let (db, identity) = setup();
        let config = test_config();
        let actions = scripted(&db, &config, &identity);
        let client = add_client(&actions, "Dana");
        let empty = add_session(&actions, client.id, None);
        let full = add_session(&actions, client.id, Some("We discussed delegation."));

        assert_eq!(
            actions.analyze_session(empty.id).error.as_deref(),
            Some("No transcript available for analysis")
        );
        assert_eq!(
            actions.analyze_session(full.id).error.as_deref(),
            Some("Please configure your Claude API key in settings to use AI analysis")
        );
        assert_eq!(
            actions.analyze_session(full.id + 100).error.as_deref(),
            Some("Session not found")
        );
    }

    #[test]
    fn test_undecryptable_key_is_reported() {
        let (db, identity) = setup();
        let config = test_config();
        let actions = scripted(&db, &config, &identity);
        let client = add_client(&actions, "Dana");
        let session = add_session(&actions, client.id, Some("transcript"));
        assert!(actions.update_api_configuration("sk-ant-key-123456", "opus-4").success);

        let rotated = Config::for_tests(PathBuf::from("/tmp/coachlog-actions"));
        let actions = scripted(&db, &rotated, &identity);
        assert_eq!(
            actions.analyze_session(session.id).error,
            Some(AiError::UndecryptableApiKey.to_string())
        );
    }

    #[test]
    fn test_analyze_and_reanalyze_session() {
        let (db, identity) = setup();
        let config = test_config();
        let actions = scripted(&db, &config, &identity);
        let client = add_client(&actions, "Dana");
        let session = add_session(&actions, client.id, Some("We discussed delegation."));
        assert!(actions.update_api_configuration("sk-ant-key-123456", "opus-4").success);

        let outcome = actions.analyze_session(session.id).into_result().unwrap();
        assert_eq!(outcome.summary, "Dana explored delegation.");

        let detail = actions.get_session(session.id).into_result().unwrap();
        assert_eq!(detail.tags.len(), 2);
        assert_eq!(detail.resources.len(), 1);
        assert!(detail.session.analysis.is_some());

        let timeline = actions.client_timeline(client.id).into_result().unwrap();
        let kinds: Vec<TimelineKind> = timeline.iter().map(|i| i.kind).collect();
        assert!(kinds.contains(&TimelineKind::Followup));
        assert!(kinds.contains(&TimelineKind::Resource));
        assert!(kinds.contains(&TimelineKind::Session));

        let again = actions.reanalyze_session(session.id).into_result().unwrap();
        assert_eq!(again.tags, outcome.tags);
        assert_eq!(db.session_tags(session.id).unwrap().len(), 2);
    }

    #[test]
    fn test_failed_reanalysis_keeps_previous_results() {
        let (db, identity) = setup();
        let config = test_config();
        let actions = scripted(&db, &config, &identity);
        let client = add_client(&actions, "Dana");
        let session = add_session(&actions, client.id, Some("We discussed delegation."));
        assert!(actions.update_api_configuration("sk-ant-key-123456", "opus-4").success);
        actions.analyze_session(session.id).into_result().unwrap();

        let limited = Actions::new(&db, &config, &identity).with_connector(|_, _| {
            Box::new(ScriptedProvider::failing(AiError::RateLimited)) as Box<dyn AIProvider>
        });
        assert_eq!(
            limited.reanalyze_session(session.id).error,
            Some(AiError::RateLimited.to_string())
        );

        let detail = actions.get_session(session.id).into_result().unwrap();
        assert_eq!(
            detail.session.summary.as_deref(),
            Some("Dana explored delegation.")
        );
        assert!(detail.session.analysis.is_some());
        assert_eq!(detail.tags.len(), 2);
    }

    #[test]
    fn test_reanalysis_without_api_key_keeps_summary() {
        let (db, identity) = setup();
        let config = test_config();
        let actions = scripted(&db, &config, &identity);
        let client = add_client(&actions, "Dana");
        let session = add_session(&actions, client.id, Some("We discussed delegation."));
        db.save_analysis(session.id, Some("Earlier summary"), None, None)
            .unwrap();

        assert_eq!(
            actions.reanalyze_session(session.id).error.as_deref(),
            Some("Please configure your Claude API key in settings to use AI analysis")
        );
        let stored = db.get_session(session.id, identity.user_id).unwrap().unwrap();
        assert_eq!(stored.summary.as_deref(), Some("Earlier summary"));
    }

    #[test]
    fn test_client_resources_after_analysis() {
        let (db, identity) = setup();
        let config = test_config();
        let actions = scripted(&db, &config, &identity);
        let client = add_client(&actions, "Dana");
        let session = add_session(&actions, client.id, Some("We discussed delegation."));
        assert!(actions
            .get_client_resources(client.id)
            .into_result()
            .unwrap()
            .is_empty());

        assert!(actions.update_api_configuration("sk-ant-key-123456", "opus-4").success);
        actions.analyze_session(session.id).into_result().unwrap();

        let links = actions.get_client_resources(client.id).into_result().unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].suggested_by, "ai");
        assert_eq!(links[0].session_id, Some(session.id));
        assert_eq!(links[0].resource.title, "The Coaching Habit");

        let intruder = other_coach(&db);
        let intruder = Actions::new(&db, &config, &intruder);
        assert_eq!(
            intruder.get_client_resources(client.id).error.as_deref(),
            Some("Client not found")
        );
    }

    #[test]
    fn test_prepare_and_discover() {
        let (db, identity) = setup();
        let config = test_config();
        let actions = scripted(&db, &config, &identity);
        let client = add_client(&actions, "Dana");
        assert!(actions.update_api_configuration("sk-ant-key-123456", "opus-4").success);

        let first = actions.prepare_for_session(client.id).into_result().unwrap();
        assert_eq!(first, NO_PREVIOUS_SESSIONS);

        let session = add_session(&actions, client.id, Some("We discussed delegation."));
        let notes = actions.prepare_for_session(client.id).into_result().unwrap();
        assert_eq!(notes, "Ask about the delegation experiment.");

        let found = actions
            .discover_session_resources(session.id)
            .into_result()
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(actions.list_resources().into_result().unwrap().is_empty());
    }
}
