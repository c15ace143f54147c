mod actions;
mod ai;
mod analysis;
mod auth;
mod config;
mod crypto;
mod db;
mod documents;
mod models;
mod prompts;
mod tui;

use actions::{create_new_user, Actions};
use ai::{CLAUDE_MODELS, DEFAULT_CLAUDE_MODEL};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use config::Config;
use db::Database;
use log::LevelFilter;
use models::{
    ActionResult, Client, ClientInput, PromptType, ResourceDraft, Session, SessionInput,
    SessionPatch,
};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "coach")]
#[command(about = "Coaching practice log - clients, sessions, and AI session analysis")]
struct Cli {
    /// Database file (overrides COACHLOG_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Email of the coach to act as (overrides COACHLOG_USER)
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Print the raw {success, data|error} result as JSON
    #[arg(long, global = true)]
    json: bool,

    /// More log output (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Print a new encryption key for COACHLOG_ENCRYPTION_KEY
    Keygen,

    /// Create an account (defaults to the --user email)
    Signup {
        /// Email address
        email: Option<String>,

        /// Display name (defaults to the part before '@')
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Show or change your profile
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },

    /// Manage clients
    Client {
        #[command(subcommand)]
        command: ClientCommands,
    },

    /// Manage client notes
    Note {
        #[command(subcommand)]
        command: NoteCommands,
    },

    /// Manage coaching sessions
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Generate summary, follow-up email, tags and resources for a session
    Analyze {
        /// Session ID
        session_id: i64,
    },

    /// Clear a session's analysis and tags, then analyze again
    Reanalyze {
        /// Session ID
        session_id: i64,
    },

    /// Generate preparation notes for the next session with a client
    Prepare {
        /// Client ID
        client_id: i64,

        /// Also store the notes on this session
        #[arg(long)]
        save_to: Option<i64>,
    },

    /// Suggest resources for a session without saving them
    Discover {
        /// Session ID
        session_id: i64,
    },

    /// Browse the shared resource library
    Resource {
        #[command(subcommand)]
        command: ResourceCommands,
    },

    /// API key, model and system prompts
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },

    /// Manage prompt templates
    Template {
        #[command(subcommand)]
        command: TemplateCommands,
    },

    /// Manage context documents included in AI prompts
    Doc {
        #[command(subcommand)]
        command: DocCommands,
    },

    /// Interactive session browser
    Browse,
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Show your profile
    Show,

    /// Change your display name
    SetName {
        /// New name
        name: String,
    },
}

/// Optional client fields. On edit, an empty value clears the field.
#[derive(Args)]
struct ClientFields {
    #[arg(long)]
    role: Option<String>,
    #[arg(long)]
    company: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    /// YYYY-MM-DD
    #[arg(long)]
    birthday: Option<String>,
    /// YYYY-MM-DD
    #[arg(long)]
    coaching_since: Option<String>,
    #[arg(long)]
    career_goal: Option<String>,
    #[arg(long)]
    key_challenge: Option<String>,
    #[arg(long)]
    key_stakeholders: Option<String>,
    /// ID of the client this one reports to
    #[arg(long)]
    reports_to: Option<i64>,
    /// Remove the reports-to link
    #[arg(long, conflicts_with = "reports_to")]
    no_reports_to: bool,
}

impl ClientFields {
    fn apply(self, mut input: ClientInput) -> ClientInput {
        let overlay = [
            (&mut input.role, self.role),
            (&mut input.company, self.company),
            (&mut input.email, self.email),
            (&mut input.phone, self.phone),
            (&mut input.birthday, self.birthday),
            (&mut input.coaching_since, self.coaching_since),
            (&mut input.career_goal, self.career_goal),
            (&mut input.key_challenge, self.key_challenge),
            (&mut input.key_stakeholders, self.key_stakeholders),
        ];
        for (field, value) in overlay {
            if value.is_some() {
                *field = value;
            }
        }
        if self.no_reports_to {
            input.reports_to_id = None;
        } else if self.reports_to.is_some() {
            input.reports_to_id = self.reports_to;
        }
        input
    }
}

#[derive(Subcommand)]
enum ClientCommands {
    /// List clients
    List,

    /// Show client details, team, recent sessions and notes
    Show {
        /// Client ID
        id: i64,
    },

    /// Add a client
    Add {
        /// Client name
        name: String,

        #[command(flatten)]
        fields: ClientFields,
    },

    /// Edit a client
    Edit {
        /// Client ID
        id: i64,

        /// New name
        #[arg(short, long)]
        name: Option<String>,

        #[command(flatten)]
        fields: ClientFields,
    },

    /// Delete a client with all of their sessions and notes
    Delete {
        /// Client ID
        id: i64,
    },

    /// Link two clients as team members
    TeamAdd {
        /// Client ID
        id: i64,
        /// Team member client ID
        member_id: i64,
    },

    /// Unlink two team members
    TeamRemove {
        /// Client ID
        id: i64,
        /// Team member client ID
        member_id: i64,
    },

    /// Sessions, follow-ups and resources for a client, newest first
    Timeline {
        /// Client ID
        id: i64,
    },

    /// Resources suggested to a client
    Resources {
        /// Client ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum NoteCommands {
    /// Add a note to a client
    Add {
        /// Client ID
        client_id: i64,
        /// Note text
        content: String,
    },

    /// Replace a note's text
    Edit {
        /// Note ID
        id: i64,
        /// New text
        content: String,
    },

    /// Delete a note
    Delete {
        /// Note ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// List sessions
    List {
        /// Only sessions of this client
        #[arg(short, long)]
        client: Option<i64>,
    },

    /// Show a session with its analysis, tags and resources
    Show {
        /// Session ID
        id: i64,
    },

    /// Log a session
    Add {
        /// Client ID
        #[arg(short, long)]
        client: i64,

        /// Session title
        #[arg(short, long)]
        title: String,

        /// Session date, YYYY-MM-DD or YYYY-MM-DDTHH:MM (defaults to today)
        #[arg(short, long)]
        date: Option<String>,

        /// Read the transcript from this file
        #[arg(long)]
        transcript_file: Option<PathBuf>,
    },

    /// Edit session fields; an empty value clears the field
    Edit {
        /// Session ID
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        date: Option<String>,
        /// Read the transcript from this file
        #[arg(long)]
        transcript_file: Option<PathBuf>,
        #[arg(long)]
        summary: Option<String>,
        #[arg(long)]
        follow_up_email: Option<String>,
        #[arg(long)]
        analysis: Option<String>,
        #[arg(long)]
        preparation_notes: Option<String>,
    },

    /// Delete a session
    Delete {
        /// Session ID
        id: i64,
    },

    /// List the available session tags
    Tags,

    /// Replace a session's tags
    SetTags {
        /// Session ID
        id: i64,
        /// Comma-separated tag names
        #[arg(value_delimiter = ',')]
        tags: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ResourceCommands {
    /// List all resources
    List,

    /// Add a resource by hand
    Add {
        /// Title
        title: String,
        /// Type (article, framework, tool, book, video)
        #[arg(short = 't', long = "type", default_value = "article")]
        resource_type: String,
        #[arg(long)]
        url: Option<String>,
        #[arg(short, long, default_value = "")]
        description: String,
        /// Comma-separated resource tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// Show settings (the API key is masked)
    Show,

    /// Set the Claude API key and model
    Api {
        /// Claude API key
        #[arg(short, long)]
        key: String,

        /// Model id or short name
        #[arg(short, long, default_value = DEFAULT_CLAUDE_MODEL)]
        model: String,
    },

    /// Set the analysis or preparation system prompt
    Prompt {
        /// analysis or preparation
        prompt_type: PromptType,
        /// Prompt text
        text: Option<String>,
        /// Read the prompt from this file
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum TemplateCommands {
    /// List prompt templates
    List,

    /// Create a template
    Add {
        /// Template name
        name: String,
        /// analysis or preparation
        #[arg(short = 't', long = "type")]
        template_type: PromptType,
        /// Template text
        #[arg(short, long)]
        content: Option<String>,
        /// Read the template from this file
        #[arg(short, long, conflicts_with = "content")]
        file: Option<PathBuf>,
    },

    /// Change a template's name or text
    Edit {
        /// Template ID
        id: i64,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        content: Option<String>,
        #[arg(short, long, conflicts_with = "content")]
        file: Option<PathBuf>,
    },

    /// Delete a template (not the active one)
    Delete {
        /// Template ID
        id: i64,
    },

    /// Make a template the active prompt for its type
    Use {
        /// Template ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum DocCommands {
    /// List context documents
    List,

    /// Upload a .txt, .md or .pdf file
    Upload {
        /// File path
        path: PathBuf,
    },

    /// Delete a context document
    Delete {
        /// Document ID
        id: i64,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    // RUST_LOG is parsed after the default so it wins.
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

/// Print an action result. With `--json` the envelope is printed as-is;
/// either way a failed action becomes a non-zero exit.
fn emit<T: Serialize>(json: bool, result: ActionResult<T>, render: impl FnOnce(T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }
    match result.into_result() {
        Ok(data) if !json => render(data),
        Ok(_) => {}
        Err(e) => bail!(e),
    }
    Ok(())
}

/// Print preparation notes, then store them on a session if asked. A failed
/// save only warns so the printed notes are not lost.
fn run_prepare(actions: &Actions, client_id: i64, save_to: Option<i64>, json: bool) -> Result<()> {
    let result = actions.prepare_for_session(client_id);
    let notes = result.data.clone();
    emit(json, result, |notes| println!("{}", notes))?;

    let (Some(session_id), Some(notes)) = (save_to, notes) else {
        return Ok(());
    };
    let patch = SessionPatch {
        preparation_notes: Some(Some(notes)),
        ..Default::default()
    };
    match actions.update_session(session_id, patch).into_result() {
        Ok(_) if !json => println!("\n(Saved to session #{})", session_id),
        Ok(_) => {}
        Err(e) => log::warn!(
            "Could not save preparation notes to session #{}: {}",
            session_id,
            e
        ),
    }
    Ok(())
}

fn read_text(text: Option<String>, file: Option<PathBuf>) -> Result<Option<String>> {
    match file {
        Some(path) => std::fs::read_to_string(&path)
            .map(Some)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => Ok(text),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Commands::Keygen = cli.command {
        println!("{}", crypto::generate_key());
        return Ok(());
    }

    let config = Config::load(cli.db, cli.user)?;
    let db = Database::open(&config.db_path)?;

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Signup { email, name } => {
            db.ensure_initialized()?;
            let email = email
                .or_else(|| config.user_email.clone())
                .ok_or_else(|| anyhow!("Pass an email or --user"))?;
            emit(cli.json, create_new_user(&db, &email, name.as_deref()), |user| {
                println!("Signed up {} as '{}' (ID: {})", user.email, user.name, user.id);
                if config.encryption_key.is_none() {
                    println!("Run 'coach keygen' and set COACHLOG_ENCRYPTION_KEY before adding an API key.");
                }
            })?;
        }

        command => {
            db.ensure_initialized()?;
            let identity = auth::current_identity(&db, &config)?;
            log::debug!("Acting as {} (user #{})", identity.email, identity.user_id);
            let actions = Actions::new(&db, &config, &identity);
            run_command(&actions, command, cli.json)?;
        }
    }

    Ok(())
}

fn run_command(actions: &Actions, command: Commands, json: bool) -> Result<()> {
    match command {
        Commands::Init | Commands::Keygen | Commands::Signup { .. } => {}

        Commands::Profile { command } => match command {
            ProfileCommands::Show => emit(json, actions.get_user_profile(), |profile| {
                println!("{} <{}> (ID: {})", profile.name, profile.email, profile.id);
            })?,
            ProfileCommands::SetName { name } => {
                emit(json, actions.update_user_profile(&name), |profile| {
                    println!("Name set to '{}'.", profile.name);
                })?
            }
        },

        Commands::Client { command } => run_client_command(actions, command, json)?,

        Commands::Note { command } => match command {
            NoteCommands::Add { client_id, content } => {
                emit(json, actions.create_client_note(client_id, &content), |note| {
                    println!("Added note #{} to client #{}", note.id, note.client_id);
                })?
            }
            NoteCommands::Edit { id, content } => {
                emit(json, actions.update_client_note(id, &content), |note| {
                    println!("Updated note #{}", note.id);
                })?
            }
            NoteCommands::Delete { id } => emit(json, actions.delete_client_note(id), |_| {
                println!("Deleted note #{}", id);
            })?,
        },

        Commands::Session { command } => run_session_command(actions, command, json)?,

        Commands::Analyze { session_id } => {
            emit(json, actions.analyze_session(session_id), |outcome| {
                println!("Analyzed session #{}", session_id);
                print_section("Summary", &outcome.summary);
                print_section("Follow-up Email", &outcome.follow_up_email);
                print_section("Analysis", &outcome.analysis);
                if !outcome.tags.is_empty() {
                    println!("\nTags: {}", outcome.tags.join(", "));
                }
                print_drafts(&outcome.resources);
            })?
        }

        Commands::Reanalyze { session_id } => {
            emit(json, actions.reanalyze_session(session_id), |outcome| {
                println!("Re-analyzed session #{}", session_id);
                print_section("Summary", &outcome.summary);
                if !outcome.tags.is_empty() {
                    println!("\nTags: {}", outcome.tags.join(", "));
                }
                print_drafts(&outcome.resources);
            })?
        }

        Commands::Prepare { client_id, save_to } => run_prepare(actions, client_id, save_to, json)?,

        Commands::Discover { session_id } => {
            emit(json, actions.discover_session_resources(session_id), |resources| {
                if resources.is_empty() {
                    println!("No resources suggested.");
                } else {
                    print_drafts(&resources);
                }
            })?
        }

        Commands::Resource { command } => match command {
            ResourceCommands::List => emit(json, actions.list_resources(), |resources| {
                if resources.is_empty() {
                    println!("No resources found.");
                    return;
                }
                println!("{:<6} {:<10} {:<40} {:<30}", "ID", "TYPE", "TITLE", "TAGS");
                println!("{}", "-".repeat(88));
                for r in resources {
                    println!(
                        "{:<6} {:<10} {:<40} {:<30}",
                        r.id,
                        truncate(&r.resource_type, 10),
                        truncate(&r.title, 38),
                        truncate(&r.tags.join(", "), 30)
                    );
                }
            })?,
            ResourceCommands::Add {
                title,
                resource_type,
                url,
                description,
                tags,
            } => {
                let draft = ResourceDraft {
                    title,
                    resource_type,
                    url,
                    description,
                    tags,
                };
                emit(json, actions.add_resource(draft), |r| {
                    println!("Resource #{}: {} [{}]", r.id, r.title, r.resource_type);
                })?
            }
        },

        Commands::Settings { command } => match command {
            SettingsCommands::Show => emit(json, actions.get_user_settings(), |s| {
                let key = match (&s.claude_api_key, s.has_api_key) {
                    (Some(masked), _) => masked.clone(),
                    (None, true) => "(set, cannot decrypt with current key)".to_string(),
                    (None, false) => "(not set)".to_string(),
                };
                println!("API key: {}", key);
                println!(
                    "Model:   {}",
                    s.claude_model.as_deref().unwrap_or(DEFAULT_CLAUDE_MODEL)
                );
                print_section("Analysis prompt", s.analysis_prompt.as_deref().unwrap_or(""));
                print_section(
                    "Preparation prompt",
                    s.preparation_prompt.as_deref().unwrap_or(""),
                );
                println!("\nAvailable models:");
                for m in CLAUDE_MODELS {
                    println!("  {:<12} {:<30} {}", m.short_name, m.model_id, m.label);
                }
            })?,
            SettingsCommands::Api { key, model } => {
                emit(json, actions.update_api_configuration(&key, &model), |_| {
                    println!("API configuration saved.");
                })?
            }
            SettingsCommands::Prompt {
                prompt_type,
                text,
                file,
            } => {
                let prompt = read_text(text, file)?
                    .ok_or_else(|| anyhow!("Pass the prompt text or --file"))?;
                emit(json, actions.update_system_prompt(prompt_type, &prompt), |_| {
                    println!("Updated {} prompt.", prompt_type);
                })?
            }
        },

        Commands::Template { command } => run_template_command(actions, command, json)?,

        Commands::Doc { command } => match command {
            DocCommands::List => emit(json, actions.get_context_documents(), |docs| {
                if docs.is_empty() {
                    println!("No context documents.");
                    return;
                }
                println!("{:<6} {:<6} {:<40} {:>10}", "ID", "TYPE", "NAME", "CHARS");
                println!("{}", "-".repeat(65));
                for doc in docs {
                    println!(
                        "{:<6} {:<6} {:<40} {:>10}",
                        doc.id,
                        doc.file_type,
                        truncate(&doc.name, 38),
                        doc.content.chars().count()
                    );
                }
            })?,
            DocCommands::Upload { path } => {
                emit(json, actions.upload_context_document(&path), |doc| {
                    println!(
                        "Uploaded '{}' (ID: {}, {} chars)",
                        doc.name,
                        doc.id,
                        doc.content.chars().count()
                    );
                })?
            }
            DocCommands::Delete { id } => {
                emit(json, actions.delete_context_document(id), |_| {
                    println!("Deleted document #{}", id);
                })?
            }
        },

        Commands::Browse => tui::run_browse(actions)?,
    }

    Ok(())
}

fn run_client_command(actions: &Actions, command: ClientCommands, json: bool) -> Result<()> {
    match command {
        ClientCommands::List => emit(json, actions.get_clients(), |clients| {
            if clients.is_empty() {
                println!("No clients found.");
                return;
            }
            println!(
                "{:<6} {:<25} {:<20} {:<20} {:>8}",
                "ID", "NAME", "ROLE", "COMPANY", "SESSIONS"
            );
            println!("{}", "-".repeat(83));
            for c in clients {
                println!(
                    "{:<6} {:<25} {:<20} {:<20} {:>8}",
                    c.client.id,
                    truncate(&c.client.name, 23),
                    truncate(c.client.role.as_deref().unwrap_or("-"), 18),
                    truncate(c.client.company.as_deref().unwrap_or("-"), 18),
                    c.session_count
                );
            }
        })?,

        ClientCommands::Show { id } => emit(json, actions.get_client(id), |detail| {
            print_client(&detail.client);
            if let Some(manager) = &detail.reports_to {
                println!("Reports to: {} (#{})", manager.name, manager.id);
            }
            if !detail.direct_reports.is_empty() {
                let names: Vec<String> = detail
                    .direct_reports
                    .iter()
                    .map(|c| format!("{} (#{})", c.name, c.id))
                    .collect();
                println!("Direct reports: {}", names.join(", "));
            }
            if !detail.team_members.is_empty() {
                let names: Vec<String> = detail
                    .team_members
                    .iter()
                    .map(|c| format!("{} (#{})", c.name, c.id))
                    .collect();
                println!("Team: {}", names.join(", "));
            }
            println!("\nSessions ({}):", detail.session_count);
            for s in &detail.sessions {
                print_session_line(s);
            }
            if !detail.notes.is_empty() {
                println!("\nNotes:");
                for note in &detail.notes {
                    println!("  #{} [{}] {}", note.id, note.updated_at, note.content);
                }
            }
        })?,

        ClientCommands::Add { name, fields } => {
            let input = fields.apply(ClientInput {
                name,
                ..Default::default()
            });
            emit(json, actions.create_client(input), |client| {
                println!("Added client #{}: {}", client.id, client.name);
            })?
        }

        ClientCommands::Edit { id, name, fields } => {
            let current = actions
                .get_client(id)
                .into_result()
                .map_err(anyhow::Error::msg)?;
            let mut input = fields.apply(ClientInput::from(&current.client));
            if let Some(name) = name {
                input.name = name;
            }
            emit(json, actions.update_client(id, input), |client| {
                println!("Updated client #{}: {}", client.id, client.name);
            })?
        }

        ClientCommands::Delete { id } => emit(json, actions.delete_client(id), |_| {
            println!("Deleted client #{}", id);
        })?,

        ClientCommands::TeamAdd { id, member_id } => {
            emit(json, actions.add_team_member(id, member_id), |_| {
                println!("Clients #{} and #{} are now team members.", id, member_id);
            })?
        }

        ClientCommands::TeamRemove { id, member_id } => {
            emit(json, actions.remove_team_member(id, member_id), |_| {
                println!("Clients #{} and #{} are no longer team members.", id, member_id);
            })?
        }

        ClientCommands::Timeline { id } => emit(json, actions.client_timeline(id), |items| {
            if items.is_empty() {
                println!("No activity yet. Start by creating a coaching session.");
                return;
            }
            for item in items {
                let session = item
                    .session_id
                    .map(|s| format!(" (session #{})", s))
                    .unwrap_or_default();
                println!("{:<20} {}{}", item.date, item.title, session);
                println!("{:<20} {}", "", truncate(&item.description, 70));
            }
        })?,

        ClientCommands::Resources { id } => {
            emit(json, actions.get_client_resources(id), |links| {
                if links.is_empty() {
                    println!("No resources suggested yet.");
                    return;
                }
                println!("{:<6} {:<10} {:<40} {:<8} {:<20}", "ID", "TYPE", "TITLE", "BY", "SUGGESTED");
                println!("{}", "-".repeat(88));
                for link in links {
                    println!(
                        "{:<6} {:<10} {:<40} {:<8} {:<20}",
                        link.resource.id,
                        truncate(&link.resource.resource_type, 10),
                        truncate(&link.resource.title, 38),
                        link.suggested_by,
                        link.suggested_at
                    );
                }
            })?
        }
    }
    Ok(())
}

fn run_session_command(actions: &Actions, command: SessionCommands, json: bool) -> Result<()> {
    match command {
        SessionCommands::List { client: Some(client_id) } => {
            emit(json, actions.get_client_sessions(client_id), |sessions| {
                if sessions.is_empty() {
                    println!("No sessions found.");
                }
                for s in &sessions {
                    print_session_line(s);
                }
            })?
        }

        SessionCommands::List { client: None } => emit(json, actions.get_sessions(), |items| {
            if items.is_empty() {
                println!("No sessions found.");
                return;
            }
            println!(
                "{:<6} {:<12} {:<30} {:<20} {:<30}",
                "ID", "DATE", "TITLE", "CLIENT", "TAGS"
            );
            println!("{}", "-".repeat(100));
            for item in items {
                let tags: Vec<&str> = item.tags.iter().map(|t| t.name.as_str()).collect();
                println!(
                    "{:<6} {:<12} {:<30} {:<20} {:<30}",
                    item.session.id,
                    short_date(item.session.date.as_deref()),
                    truncate(&item.session.title, 28),
                    truncate(&item.client_name, 18),
                    truncate(&tags.join(", "), 30)
                );
            }
        })?,

        SessionCommands::Show { id } => emit(json, actions.get_session(id), |detail| {
            let s = &detail.session;
            println!("Session #{}: {}", s.id, s.title);
            println!("Client: {} (#{})", detail.client.name, detail.client.id);
            if let Some(date) = &s.date {
                println!("Date: {}", date);
            }
            if !detail.tags.is_empty() {
                let tags: Vec<&str> = detail.tags.iter().map(|t| t.name.as_str()).collect();
                println!("Tags: {}", tags.join(", "));
            }
            print_section("Summary", s.summary.as_deref().unwrap_or(""));
            print_section("Follow-up Email", s.follow_up_email.as_deref().unwrap_or(""));
            print_section("Analysis", s.analysis.as_deref().unwrap_or(""));
            print_section("Preparation Notes", s.preparation_notes.as_deref().unwrap_or(""));
            if !detail.resources.is_empty() {
                println!("\n--- Resources ---");
                for link in &detail.resources {
                    println!(
                        "  #{} [{}] {}",
                        link.resource.id, link.resource.resource_type, link.resource.title
                    );
                    if let Some(url) = &link.resource.url {
                        println!("      {}", url);
                    }
                }
            }
            if let Some(transcript) = &s.transcript {
                println!("\n--- Transcript ---\n{}", transcript);
            }
        })?,

        SessionCommands::Add {
            client,
            title,
            date,
            transcript_file,
        } => {
            let input = SessionInput {
                title,
                client_id: Some(client),
                date: date.unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string()),
                transcript: read_text(None, transcript_file)?,
            };
            emit(json, actions.create_session(input), |session| {
                println!("Added session #{}: {}", session.id, session.title);
                if session.transcript.is_some() {
                    println!("Run 'coach analyze {}' to generate the analysis.", session.id);
                }
            })?
        }

        SessionCommands::Edit {
            id,
            title,
            date,
            transcript_file,
            summary,
            follow_up_email,
            analysis,
            preparation_notes,
        } => {
            let patch = SessionPatch {
                title,
                date: date.map(Some),
                transcript: read_text(None, transcript_file)?.map(Some),
                summary: summary.map(Some),
                follow_up_email: follow_up_email.map(Some),
                analysis: analysis.map(Some),
                preparation_notes: preparation_notes.map(Some),
            };
            emit(json, actions.update_session(id, patch), |session| {
                println!("Updated session #{}", session.id);
            })?
        }

        SessionCommands::Delete { id } => emit(json, actions.delete_session(id), |_| {
            println!("Deleted session #{}", id);
        })?,

        SessionCommands::Tags => emit(json, actions.get_session_tags(), |tags| {
            let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
            println!("{}", textwrap::fill(&names.join(", "), 80));
        })?,

        SessionCommands::SetTags { id, tags } => {
            emit(json, actions.update_session_tags(id, &tags), |tags| {
                let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
                if names.is_empty() {
                    println!("Session #{} has no tags.", id);
                } else {
                    println!("Session #{} tags: {}", id, names.join(", "));
                }
            })?
        }
    }
    Ok(())
}

fn run_template_command(actions: &Actions, command: TemplateCommands, json: bool) -> Result<()> {
    match command {
        TemplateCommands::List => {
            let settings = actions
                .get_user_settings()
                .into_result()
                .map_err(anyhow::Error::msg)?;
            emit(json, actions.get_prompt_templates(), |templates| {
                if templates.is_empty() {
                    println!("No templates found.");
                    return;
                }
                println!("{:<6} {:<12} {:<30} {:<8}", "ID", "TYPE", "NAME", "ACTIVE");
                println!("{}", "-".repeat(58));
                for t in templates {
                    let active_prompt = match t.template_type {
                        PromptType::Analysis => settings.analysis_prompt.as_deref(),
                        PromptType::Preparation => settings.preparation_prompt.as_deref(),
                    };
                    let active = if active_prompt == Some(t.content.as_str()) {
                        "*"
                    } else {
                        ""
                    };
                    println!(
                        "{:<6} {:<12} {:<30} {:<8}",
                        t.id,
                        t.template_type,
                        truncate(&t.name, 28),
                        active
                    );
                }
            })?
        }

        TemplateCommands::Add {
            name,
            template_type,
            content,
            file,
        } => {
            let content = read_text(content, file)?
                .ok_or_else(|| anyhow!("Pass --content or --file"))?;
            emit(
                json,
                actions.create_prompt_template(&name, template_type, &content),
                |t| println!("Created template #{}: {}", t.id, t.name),
            )?
        }

        TemplateCommands::Edit {
            id,
            name,
            content,
            file,
        } => {
            let current = actions
                .get_prompt_templates()
                .into_result()
                .map_err(anyhow::Error::msg)?
                .into_iter()
                .find(|t| t.id == id)
                .ok_or_else(|| anyhow!("Template not found"))?;
            let name = name.unwrap_or(current.name);
            let content = read_text(content, file)?.unwrap_or(current.content);
            emit(json, actions.update_prompt_template(id, &name, &content), |t| {
                println!("Updated template #{}: {}", t.id, t.name);
            })?
        }

        TemplateCommands::Delete { id } => {
            emit(json, actions.delete_prompt_template(id), |_| {
                println!("Deleted template #{}", id);
            })?
        }

        TemplateCommands::Use { id } => emit(json, actions.set_template_as_default(id), |_| {
            println!("Template #{} is now the active prompt.", id);
        })?,
    }
    Ok(())
}

fn print_client(client: &Client) {
    println!("Client #{}: {}", client.id, client.name);
    let fields = [
        ("Role", &client.role),
        ("Company", &client.company),
        ("Email", &client.email),
        ("Phone", &client.phone),
        ("Birthday", &client.birthday),
        ("Coaching since", &client.coaching_since),
        ("Career goal", &client.career_goal),
        ("Key challenge", &client.key_challenge),
        ("Key stakeholders", &client.key_stakeholders),
    ];
    for (label, value) in fields {
        if let Some(value) = value {
            println!("{}: {}", label, value);
        }
    }
}

fn print_session_line(session: &Session) {
    let analyzed = if session.summary.is_some() { "analyzed" } else { "" };
    println!(
        "  #{:<5} {:<12} {:<30} {}",
        session.id,
        short_date(session.date.as_deref()),
        truncate(&session.title, 28),
        analyzed
    );
}

fn print_section(title: &str, body: &str) {
    if body.trim().is_empty() {
        return;
    }
    println!("\n--- {} ---\n{}", title, body.trim());
}

fn print_drafts(resources: &[ResourceDraft]) {
    if resources.is_empty() {
        return;
    }
    println!("\n--- Resources ---");
    for r in resources {
        println!("  [{}] {}", r.resource_type, r.title);
        if let Some(url) = &r.url {
            println!("      {}", url);
        }
        if !r.description.is_empty() {
            println!("      {}", r.description);
        }
    }
}

fn short_date(date: Option<&str>) -> &str {
    match date {
        Some(d) => d.get(..10).unwrap_or(d),
        None => "-",
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::AIProvider;
    use crate::analysis::tests::ScriptedProvider;
    use crate::auth::Identity;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Dana", 10), "Dana");
        assert_eq!(truncate("Executive presence work", 10), "Executi...");
        assert_eq!(truncate("Zoë Ångström-Nakamura", 8), "Zoë Å...");
    }

    #[test]
    fn test_client_fields_overlay() {
        let cli = Cli::parse_from([
            "coach",
            "client",
            "edit",
            "3",
            "--company",
            "",
            "--role",
            "VP Sales",
            "--no-reports-to",
        ]);
        let Commands::Client {
            command: ClientCommands::Edit { fields, .. },
        } = cli.command
        else {
            panic!("expected client edit");
        };
        let current = ClientInput {
            name: "Dana".to_string(),
            company: Some("Acme".to_string()),
            phone: Some("555".to_string()),
            reports_to_id: Some(9),
            ..Default::default()
        };
        let input = fields.apply(current);
        assert_eq!(input.role.as_deref(), Some("VP Sales"));
        assert_eq!(input.company.as_deref(), Some(""));
        assert_eq!(input.phone.as_deref(), Some("555"));
        assert_eq!(input.reports_to_id, None);
    }

    #[test]
    fn test_global_flags_and_tag_list() {
        let cli = Cli::parse_from([
            "coach",
            "session",
            "set-tags",
            "4",
            "leadership,team management",
            "--json",
            "-vv",
        ]);
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Session {
                command: SessionCommands::SetTags { id, tags },
            } => {
                assert_eq!(id, 4);
                assert_eq!(tags, vec!["leadership", "team management"]);
            }
            _ => panic!("expected session set-tags"),
        }
    }

    #[test]
    fn test_prepare_keeps_notes_when_save_fails() {
        let db = Database::open_in_memory().unwrap();
        let user = create_new_user(&db, "coach@example.com", None)
            .into_result()
            .unwrap();
        let user_id = user.id;
        let identity = Identity {
            user_id,
            email: user.email,
        };
        let config = Config::for_tests(PathBuf::from("/tmp/coachlog-main"));
        let actions = Actions::new(&db, &config, &identity)
            .with_connector(|_, _| Box::new(ScriptedProvider::new()) as Box<dyn AIProvider>);
        assert!(actions.update_api_configuration("sk-ant-key-123456", "opus-4").success);

        let client = actions
            .create_client(ClientInput {
                name: "Dana".to_string(),
                ..Default::default()
            })
            .into_result()
            .unwrap();
        let session = actions
            .create_session(SessionInput {
                title: "Week 1".to_string(),
                client_id: Some(client.id),
                date: "2025-03-01".to_string(),
                transcript: Some("We discussed delegation.".to_string()),
            })
            .into_result()
            .unwrap();

        run_prepare(&actions, client.id, Some(session.id + 100), false).unwrap();
        assert_eq!(
            db.get_session(session.id, user_id).unwrap().unwrap().preparation_notes,
            None
        );

        run_prepare(&actions, client.id, Some(session.id), true).unwrap();
        let stored = db.get_session(session.id, user_id).unwrap().unwrap();
        assert_eq!(
            stored.preparation_notes.as_deref(),
            Some("Ask about the delegation experiment.")
        );
    }

    #[test]
    fn test_emit_fails_on_error_envelope() {
        let failed: ActionResult<i64> = ActionResult::err("Client not found");
        let err = emit(false, failed, |_| {}).unwrap_err();
        assert_eq!(err.to_string(), "Client not found");

        let mut seen = None;
        emit(false, ActionResult::ok(7), |v| seen = Some(v)).unwrap();
        assert_eq!(seen, Some(7));
    }
}
