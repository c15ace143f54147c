//! Session analysis pipeline: prompt assembly, parallel model calls, and
//! best-effort parsing of the replies into tags and resource suggestions.

use log::{debug, error, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;
use std::thread::{self, ScopedJoinHandle};
use thiserror::Error;

use crate::ai::{AIProvider, AiError, MAX_TOKENS};
use crate::db::Database;
use crate::models::{PromptType, ResourceDraft, Session, TagCategory, User};
use crate::prompts::{
    FALLBACK_PREPARATION_PROMPT, FOLLOWUP_EMAIL_PROMPT, NO_PREVIOUS_SESSIONS,
    RESOURCE_DISCOVERY_PROMPT, SESSION_TAGS_PROMPT, SUMMARY_PROMPT,
};

const MAX_RESOURCES: usize = 3;
const PREPARATION_SESSIONS: usize = 3;
const TRANSCRIPT_EXCERPT_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Ai(#[from] AiError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub summary: String,
    pub follow_up_email: String,
    pub analysis: String,
    pub tags: Vec<String>,
    pub resources: Vec<ResourceDraft>,
}

// --- Prompting ---

pub fn build_prompt(system_prompt: &str, transcript: &str, context: Option<&str>) -> String {
    let mut prompt = String::new();
    if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
        prompt.push_str("CONTEXT INFORMATION:\n");
        prompt.push_str(context);
        prompt.push_str("\n\n");
    }
    prompt.push_str(system_prompt.trim());
    prompt.push_str("\n\nSession Transcript:\n");
    prompt.push_str(transcript);
    prompt
}

pub fn generate_with_context(
    provider: &dyn AIProvider,
    system_prompt: &str,
    transcript: &str,
    context: Option<&str>,
) -> Result<String, AiError> {
    let prompt = build_prompt(system_prompt, transcript, context);
    provider.complete(&prompt, MAX_TOKENS)
}

fn join(handle: ScopedJoinHandle<'_, Result<String, AiError>>) -> Result<String, AiError> {
    handle.join().unwrap_or(Err(AiError::Worker))
}

fn non_empty(text: &str) -> Option<&str> {
    Some(text).filter(|t| !t.trim().is_empty())
}

// --- Session analysis ---

/// Run every analysis generation for a session in parallel and parse the
/// replies. Nothing is stored; the first model error is returned.
pub fn generate_session_analysis(
    provider: &dyn AIProvider,
    session: &Session,
    analysis_prompt: Option<&str>,
    context: Option<&str>,
) -> Result<AnalysisOutcome, AiError> {
    let transcript = session.transcript.as_deref().unwrap_or_default();
    let analysis_prompt = analysis_prompt.and_then(non_empty);

    let (summary, email, resources, custom, tags) = thread::scope(|s| {
        let summary =
            s.spawn(|| generate_with_context(provider, SUMMARY_PROMPT, transcript, context));
        let email =
            s.spawn(|| generate_with_context(provider, FOLLOWUP_EMAIL_PROMPT, transcript, context));
        let resources = s.spawn(|| {
            generate_with_context(provider, RESOURCE_DISCOVERY_PROMPT, transcript, None)
        });
        let custom = analysis_prompt.map(|prompt| {
            s.spawn(move || generate_with_context(provider, prompt, transcript, context))
        });
        let tags =
            s.spawn(|| generate_with_context(provider, SESSION_TAGS_PROMPT, transcript, None));

        (
            join(summary),
            join(email),
            join(resources),
            custom.map(join),
            join(tags),
        )
    });

    let summary = summary?;
    let follow_up_email = email?;
    let resources_reply = resources?;
    let analysis = custom.transpose()?.unwrap_or_default();
    let tags_reply = tags?;

    debug!(
        "Generated analysis for session #{} with {}",
        session.id,
        provider.model_name()
    );

    Ok(AnalysisOutcome {
        summary,
        follow_up_email,
        analysis,
        tags: parse_tags(&tags_reply),
        resources: parse_resources(&resources_reply),
    })
}

/// Store a generated analysis. Tag and resource persistence is best-effort:
/// failures are logged and do not fail the save.
pub fn save_session_analysis(
    db: &Database,
    session: &Session,
    outcome: &AnalysisOutcome,
) -> anyhow::Result<()> {
    db.save_analysis(
        session.id,
        non_empty(&outcome.summary),
        non_empty(&outcome.follow_up_email),
        non_empty(&outcome.analysis),
    )?;

    if !outcome.tags.is_empty() {
        if let Err(e) = assign_session_tags(db, session.id, &outcome.tags) {
            error!("Error assigning session tags: {:#}", e);
        }
    }

    if !outcome.resources.is_empty() {
        if let Err(e) = save_session_resources(db, session, &outcome.resources) {
            error!("Error saving session resources: {:#}", e);
        }
    }

    info!(
        "Analyzed session #{}: {} tags, {} resources",
        session.id,
        outcome.tags.len(),
        outcome.resources.len()
    );
    Ok(())
}

pub fn run_session_analysis(
    db: &Database,
    provider: &dyn AIProvider,
    session: &Session,
    analysis_prompt: Option<&str>,
    context: Option<&str>,
) -> Result<AnalysisOutcome, AnalysisError> {
    let outcome = generate_session_analysis(provider, session, analysis_prompt, context)?;
    save_session_analysis(db, session, &outcome)?;
    Ok(outcome)
}

/// Replace a session's tags with the known session tags among `names`.
/// Leaves existing tags alone when none of the names is known.
pub fn assign_session_tags(db: &Database, session_id: i64, names: &[String]) -> anyhow::Result<()> {
    let tags = db.find_tags(names, TagCategory::Session)?;
    if tags.is_empty() {
        return Ok(());
    }
    let ids: Vec<i64> = tags.iter().map(|t| t.id).collect();
    db.replace_session_tags(session_id, &ids)
}

/// Store discovered resources in the shared library (deduplicated by title
/// and type) and link them to the session's client.
pub fn save_session_resources(
    db: &Database,
    session: &Session,
    resources: &[ResourceDraft],
) -> anyhow::Result<()> {
    for draft in resources {
        let resource_id = match db.find_resource(&draft.title, &draft.resource_type)? {
            Some(existing) => existing.id,
            None => {
                let id = db.insert_resource(draft)?;
                if !draft.tags.is_empty() {
                    let tags = db.find_tags(&draft.tags, TagCategory::Resource)?;
                    let ids: Vec<i64> = tags.iter().map(|t| t.id).collect();
                    db.link_resource_tags(id, &ids)?;
                }
                id
            }
        };
        db.link_client_resource(session.client_id, resource_id, Some(session.id), "ai", None)?;
    }
    Ok(())
}

// --- Preparation ---

fn preparation_context(sessions: &[Session]) -> String {
    sessions
        .iter()
        .map(|s| {
            let date = s
                .date
                .as_deref()
                .map(|d| d.get(..10).unwrap_or(d).to_string())
                .unwrap_or_else(|| "No date".to_string());
            let body = match s.summary.as_deref().and_then(non_empty) {
                Some(summary) => summary.to_string(),
                None => s
                    .transcript
                    .as_deref()
                    .unwrap_or_default()
                    .chars()
                    .take(TRANSCRIPT_EXCERPT_CHARS)
                    .collect(),
            };
            format!("\nSession: {} ({})\n{}\n", s.title, date, body)
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

/// The user's preparation prompt, else the first default preparation
/// template, else a built-in fallback.
fn preparation_prompt(db: &Database, user: &User) -> anyhow::Result<String> {
    if let Some(prompt) = user.preparation_prompt.as_deref().and_then(non_empty) {
        return Ok(prompt.to_string());
    }
    if let Some(template) = db.first_default_template(user.id, PromptType::Preparation)? {
        return Ok(template.content);
    }
    Ok(FALLBACK_PREPARATION_PROMPT.to_string())
}

pub fn generate_preparation_notes(
    db: &Database,
    provider: &dyn AIProvider,
    user: &User,
    client_id: i64,
    context: Option<&str>,
) -> Result<String, AnalysisError> {
    let sessions = db.recent_transcribed_sessions(client_id, user.id, PREPARATION_SESSIONS)?;
    if sessions.is_empty() {
        return Ok(NO_PREVIOUS_SESSIONS.to_string());
    }

    let history = preparation_context(&sessions);
    let prompt = preparation_prompt(db, user)?;
    Ok(generate_with_context(provider, &prompt, &history, context)?)
}

// --- Resource discovery ---

/// Ask for resources without persisting them. Only a JSON reply is accepted.
pub fn discover_resources(
    provider: &dyn AIProvider,
    transcript: &str,
) -> Result<Vec<ResourceDraft>, AiError> {
    let reply = generate_with_context(provider, RESOURCE_DISCOVERY_PROMPT, transcript, None)?;
    Ok(parse_resources_from_json(&reply))
}

// --- Reply parsing ---

pub fn parse_tags(reply: &str) -> Vec<String> {
    reply
        .split(',')
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// JSON first, then the free-text fallback.
pub fn parse_resources(reply: &str) -> Vec<ResourceDraft> {
    let resources = parse_resources_from_json(reply);
    if !resources.is_empty() {
        return resources;
    }
    parse_resources_from_text(reply)
}

fn json_str<'a>(obj: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Parse a JSON array of resources, tolerating prose or a code fence
/// around it. Entries without a title are dropped.
pub fn parse_resources_from_json(reply: &str) -> Vec<ResourceDraft> {
    let candidate = match (reply.find('['), reply.rfind(']')) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => return Vec::new(),
    };
    let Ok(Value::Array(items)) = serde_json::from_str::<Value>(candidate) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            let title = json_str(obj, "title")?;
            let tags = obj
                .get("tags")
                .and_then(Value::as_array)
                .map(|tags| {
                    tags.iter()
                        .filter_map(Value::as_str)
                        .map(|t| t.trim().to_lowercase())
                        .filter(|t| !t.is_empty())
                        .collect()
                })
                .unwrap_or_default();
            Some(ResourceDraft {
                title: title.to_string(),
                resource_type: json_str(obj, "type").unwrap_or("article").to_string(),
                url: json_str(obj, "url").map(str::to_string),
                description: json_str(obj, "description").unwrap_or_default().to_string(),
                tags,
            })
        })
        .take(MAX_RESOURCES)
        .collect()
}

static ITEM_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:[\d\-\*•]|title:|resource:)").expect("valid regex"));
static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\d\-\*•\.\)]+\s*").expect("valid regex"));
static TITLE_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:title:|resource:)\s*").expect("valid regex"));
static TYPE_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)type:|format:").expect("valid regex"));
static URL_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:url:|link:)\s*").expect("valid regex"));
static DESCRIPTION_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:description:|why:)\s*").expect("valid regex"));
static FIELD_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:type:|format:|url:|link:|description:|why:|https?://)")
        .expect("valid regex")
});

enum Field {
    Type(String),
    Url(String),
    Description(String),
}

fn parse_field(line: &str) -> Option<Field> {
    let lower = line.to_lowercase();
    if lower.contains("type:") || lower.contains("format:") {
        let value = TYPE_LABEL
            .splitn(line, 2)
            .nth(1)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or("article");
        Some(Field::Type(value.to_string()))
    } else if lower.contains("url:") || lower.contains("link:") || lower.starts_with("http") {
        Some(Field::Url(URL_LABEL.replace(line, "").trim().to_string()))
    } else if lower.contains("description:") || lower.contains("why:") {
        Some(Field::Description(
            DESCRIPTION_LABEL.replace(line, "").trim().to_string(),
        ))
    } else {
        None
    }
}

fn apply_field(draft: &mut ResourceDraft, field: Field) {
    match field {
        Field::Type(value) => draft.resource_type = value,
        Field::Url(value) => draft.url = Some(value),
        Field::Description(value) => draft.description = value,
    }
}

/// Scrape loosely formatted list output. A numbered/bulleted line (or one
/// labelled `Title:`/`Resource:`) opens a new resource; following lines
/// fill in type, url and description.
pub fn parse_resources_from_text(reply: &str) -> Vec<ResourceDraft> {
    let mut resources = Vec::new();
    let mut current: Option<ResourceDraft> = None;

    for line in reply.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let body = LIST_MARKER.replace(line, "");

        // A bulleted "- Type: book" under an open resource is a field, not a new item.
        if let Some(draft) = current.as_mut() {
            if body.len() < line.len() && FIELD_LABEL.is_match(&body) {
                if let Some(field) = parse_field(&body) {
                    apply_field(draft, field);
                    continue;
                }
            }
        }

        if ITEM_START.is_match(line) {
            if let Some(done) = current.take().filter(|d| !d.title.is_empty()) {
                resources.push(done);
            }
            current = Some(ResourceDraft {
                title: TITLE_LABEL.replace(&body, "").trim().to_string(),
                resource_type: "article".to_string(),
                url: None,
                description: String::new(),
                tags: Vec::new(),
            });
            continue;
        }

        let Some(draft) = current.as_mut() else {
            continue;
        };
        match parse_field(line) {
            Some(field) => apply_field(draft, field),
            None if draft.description.is_empty() => draft.description = line.to_string(),
            None => {}
        }
    }

    if let Some(done) = current.filter(|d| !d.title.is_empty()) {
        resources.push(done);
    }

    if resources.len() > MAX_RESOURCES {
        warn!(
            "Dropping {} resources beyond the first {}",
            resources.len() - MAX_RESOURCES,
            MAX_RESOURCES
        );
        resources.truncate(MAX_RESOURCES);
    }
    resources
}
