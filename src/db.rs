use anyhow::{anyhow, Context, Result};
use log::info;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

use crate::models::{
    Client, ClientInput, ClientNote, ClientResource, ContextDocument, PromptTemplate, PromptType,
    Resource, ResourceDraft, Session, SessionPatch, Tag, TagCategory, User,
};
use crate::prompts::{RESOURCE_TAGS, SESSION_TAGS};

const USER_COLUMNS: &str = "id, email, name, claude_api_key, claude_model, analysis_prompt, \
     preparation_prompt, created_at, updated_at";

const CLIENT_COLUMNS: &str = "id, user_id, name, role, company, email, phone, birthday, \
     coaching_since, career_goal, key_challenge, key_stakeholders, reports_to_id, created_at, updated_at";

const SESSION_COLUMNS: &str = "id, client_id, user_id, title, date, transcript, summary, \
     follow_up_email, analysis, preparation_notes, created_at, updated_at";

const TEMPLATE_COLUMNS: &str =
    "id, user_id, name, type, content, is_default, created_at, updated_at";

const DOCUMENT_COLUMNS: &str =
    "id, user_id, name, file_url, file_type, content, created_at, updated_at";

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                claude_api_key TEXT,
                claude_model TEXT,
                analysis_prompt TEXT,
                preparation_prompt TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS clients (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                role TEXT,
                company TEXT,
                email TEXT,
                phone TEXT,
                birthday TEXT,
                coaching_since TEXT,
                career_goal TEXT,
                key_challenge TEXT,
                key_stakeholders TEXT,
                reports_to_id INTEGER REFERENCES clients(id) ON DELETE SET NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS client_team_members (
                client_id INTEGER NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
                member_id INTEGER NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
                PRIMARY KEY (client_id, member_id)
            );

            CREATE TABLE IF NOT EXISTS client_notes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id INTEGER NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id INTEGER NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                date TEXT,
                transcript TEXT,
                summary TEXT,
                follow_up_email TEXT,
                analysis TEXT,
                preparation_notes TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                category TEXT NOT NULL CHECK (category IN ('session', 'resource'))
            );

            CREATE TABLE IF NOT EXISTS session_tags (
                session_id INTEGER NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                PRIMARY KEY (session_id, tag_id)
            );

            CREATE TABLE IF NOT EXISTS resources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                type TEXT NOT NULL DEFAULT 'article',
                url TEXT,
                description TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS resource_tags (
                resource_id INTEGER NOT NULL REFERENCES resources(id) ON DELETE CASCADE,
                tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                PRIMARY KEY (resource_id, tag_id)
            );

            CREATE TABLE IF NOT EXISTS client_resources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id INTEGER NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
                resource_id INTEGER NOT NULL REFERENCES resources(id) ON DELETE CASCADE,
                session_id INTEGER REFERENCES sessions(id) ON DELETE SET NULL,
                suggested_by TEXT NOT NULL DEFAULT 'coach',
                reason TEXT,
                suggested_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (client_id, resource_id, session_id)
            );

            CREATE TABLE IF NOT EXISTS prompt_templates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                type TEXT NOT NULL CHECK (type IN ('analysis', 'preparation')),
                content TEXT NOT NULL,
                is_default INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS context_documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                file_url TEXT NOT NULL,
                file_type TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_clients_user ON clients(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_client ON sessions(client_id);
            CREATE INDEX IF NOT EXISTS idx_notes_client ON client_notes(client_id);
            CREATE INDEX IF NOT EXISTS idx_client_resources_client ON client_resources(client_id);
            CREATE INDEX IF NOT EXISTS idx_templates_user ON prompt_templates(user_id);
            CREATE INDEX IF NOT EXISTS idx_documents_user ON context_documents(user_id);
            "#,
        )?;
        self.seed_tags()?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='sessions'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!("Database not initialized. Run 'coach init' first."));
        }
        Ok(())
    }

    /// Insert the predefined tags. A name already present keeps its category.
    fn seed_tags(&self) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare("INSERT OR IGNORE INTO tags (name, category) VALUES (?1, ?2)")?;
        let mut added = 0;
        for name in SESSION_TAGS {
            added += stmt.execute(params![name, TagCategory::Session.as_str()])?;
        }
        for name in RESOURCE_TAGS {
            added += stmt.execute(params![name, TagCategory::Resource.as_str()])?;
        }
        if added > 0 {
            info!("Seeded {} tags", added);
        }
        Ok(())
    }

    // --- User operations ---

    pub fn create_user(
        &self,
        email: &str,
        name: &str,
        analysis_prompt: &str,
        preparation_prompt: &str,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO users (email, name, analysis_prompt, preparation_prompt)
             VALUES (?1, ?2, ?3, ?4)",
            params![email, name, analysis_prompt, preparation_prompt],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [id],
                Self::row_to_user,
            )
            .optional()
            .context("Failed to load user")
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER(?1)"),
                [email],
                Self::row_to_user,
            )
            .optional()
            .context("Failed to load user")
    }

    pub fn update_user_name(&self, id: i64, name: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE users SET name = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![name, id],
        )?;
        Ok(())
    }

    pub fn update_api_configuration(&self, id: i64, sealed_key: &str, model: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE users SET claude_api_key = ?1, claude_model = ?2, updated_at = datetime('now')
             WHERE id = ?3",
            params![sealed_key, model, id],
        )?;
        Ok(())
    }

    pub fn update_user_prompt(&self, id: i64, prompt_type: PromptType, prompt: &str) -> Result<()> {
        let column = match prompt_type {
            PromptType::Analysis => "analysis_prompt",
            PromptType::Preparation => "preparation_prompt",
        };
        self.conn.execute(
            &format!(
                "UPDATE users SET {column} = ?1, updated_at = datetime('now') WHERE id = ?2"
            ),
            params![prompt, id],
        )?;
        Ok(())
    }

    fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            claude_api_key: row.get(3)?,
            claude_model: row.get(4)?,
            analysis_prompt: row.get(5)?,
            preparation_prompt: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    // --- Client operations ---

    pub fn list_clients(&self, user_id: i64) -> Result<Vec<(Client, i64)>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CLIENT_COLUMNS},
                    (SELECT COUNT(*) FROM sessions s WHERE s.client_id = clients.id)
             FROM clients
             WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([user_id], |row| {
            Ok((Self::row_to_client(row)?, row.get(15)?))
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list clients")
    }

    pub fn get_client(&self, id: i64, user_id: i64) -> Result<Option<Client>> {
        self.conn
            .query_row(
                &format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
                Self::row_to_client,
            )
            .optional()
            .context("Failed to load client")
    }

    pub fn insert_client(&self, user_id: i64, input: &ClientInput) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO clients (user_id, name, role, company, email, phone, birthday,
                                  coaching_since, career_goal, key_challenge, key_stakeholders,
                                  reports_to_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                user_id,
                input.name,
                input.role,
                input.company,
                input.email,
                input.phone,
                input.birthday,
                input.coaching_since,
                input.career_goal,
                input.key_challenge,
                input.key_stakeholders,
                input.reports_to_id,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update_client(&self, id: i64, input: &ClientInput) -> Result<()> {
        self.conn.execute(
            "UPDATE clients SET name = ?1, role = ?2, company = ?3, email = ?4, phone = ?5,
                    birthday = ?6, coaching_since = ?7, career_goal = ?8, key_challenge = ?9,
                    key_stakeholders = ?10, reports_to_id = ?11, updated_at = datetime('now')
             WHERE id = ?12",
            params![
                input.name,
                input.role,
                input.company,
                input.email,
                input.phone,
                input.birthday,
                input.coaching_since,
                input.career_goal,
                input.key_challenge,
                input.key_stakeholders,
                input.reports_to_id,
                id,
            ],
        )?;
        Ok(())
    }

    pub fn delete_client(&self, id: i64) -> Result<()> {
        self.conn.execute("DELETE FROM clients WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn direct_reports(&self, client_id: i64) -> Result<Vec<Client>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE reports_to_id = ?1 ORDER BY name"
        ))?;
        let rows = stmt.query_map([client_id], Self::row_to_client)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list direct reports")
    }

    /// Team members in either direction of the stored pair.
    pub fn team_members(&self, client_id: i64) -> Result<Vec<Client>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients
             WHERE id IN (
                 SELECT member_id FROM client_team_members WHERE client_id = ?1
                 UNION
                 SELECT client_id FROM client_team_members WHERE member_id = ?1
             )
             ORDER BY name"
        ))?;
        let rows = stmt.query_map([client_id], Self::row_to_client)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list team members")
    }

    pub fn are_team_members(&self, a: i64, b: i64) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM client_team_members
             WHERE (client_id = ?1 AND member_id = ?2) OR (client_id = ?2 AND member_id = ?1)",
            params![a, b],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn add_team_member(&self, client_id: i64, member_id: i64) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO client_team_members (client_id, member_id) VALUES (?1, ?2)",
            params![client_id, member_id],
        )?;
        Ok(())
    }

    pub fn remove_team_member(&self, client_id: i64, member_id: i64) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM client_team_members
             WHERE (client_id = ?1 AND member_id = ?2) OR (client_id = ?2 AND member_id = ?1)",
            params![client_id, member_id],
        )?;
        Ok(removed)
    }

    pub fn count_client_sessions(&self, client_id: i64) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE client_id = ?1",
            [client_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn row_to_client(row: &rusqlite::Row) -> rusqlite::Result<Client> {
        Ok(Client {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            role: row.get(3)?,
            company: row.get(4)?,
            email: row.get(5)?,
            phone: row.get(6)?,
            birthday: row.get(7)?,
            coaching_since: row.get(8)?,
            career_goal: row.get(9)?,
            key_challenge: row.get(10)?,
            key_stakeholders: row.get(11)?,
            reports_to_id: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    // --- Client note operations ---

    pub fn insert_note(&self, client_id: i64, content: &str) -> Result<ClientNote> {
        self.conn.execute(
            "INSERT INTO client_notes (client_id, content) VALUES (?1, ?2)",
            params![client_id, content],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_note(id)?
            .ok_or_else(|| anyhow!("Note #{} not found after insert", id))
    }

    fn get_note(&self, id: i64) -> Result<Option<ClientNote>> {
        self.conn
            .query_row(
                "SELECT id, client_id, content, created_at, updated_at
                 FROM client_notes WHERE id = ?1",
                [id],
                Self::row_to_note,
            )
            .optional()
            .context("Failed to load note")
    }

    /// A note, only if its client belongs to `user_id`.
    pub fn get_note_for_user(&self, id: i64, user_id: i64) -> Result<Option<ClientNote>> {
        self.conn
            .query_row(
                "SELECT n.id, n.client_id, n.content, n.created_at, n.updated_at
                 FROM client_notes n
                 JOIN clients c ON c.id = n.client_id
                 WHERE n.id = ?1 AND c.user_id = ?2",
                params![id, user_id],
                Self::row_to_note,
            )
            .optional()
            .context("Failed to load note")
    }

    pub fn update_note(&self, id: i64, content: &str) -> Result<ClientNote> {
        self.conn.execute(
            "UPDATE client_notes SET content = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![content, id],
        )?;
        self.get_note(id)?
            .ok_or_else(|| anyhow!("Note #{} not found after update", id))
    }

    pub fn delete_note(&self, id: i64) -> Result<()> {
        self.conn.execute("DELETE FROM client_notes WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn list_notes(&self, client_id: i64) -> Result<Vec<ClientNote>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, client_id, content, created_at, updated_at
             FROM client_notes WHERE client_id = ?1
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([client_id], Self::row_to_note)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list notes")
    }

    fn row_to_note(row: &rusqlite::Row) -> rusqlite::Result<ClientNote> {
        Ok(ClientNote {
            id: row.get(0)?,
            client_id: row.get(1)?,
            content: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    // --- Session operations ---

    pub fn list_sessions(&self, user_id: i64) -> Result<Vec<Session>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([user_id], Self::row_to_session)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list sessions")
    }

    /// Sessions for a client, most recent session date first.
    pub fn list_client_sessions(
        &self,
        client_id: i64,
        user_id: i64,
        limit: Option<usize>,
    ) -> Result<Vec<Session>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE client_id = ?1 AND user_id = ?2
             ORDER BY COALESCE(date, created_at) DESC, id DESC
             LIMIT ?3"
        ))?;
        let rows = stmt.query_map(params![client_id, user_id, limit], Self::row_to_session)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list client sessions")
    }

    /// Most recent sessions of a client that have a transcript.
    pub fn recent_transcribed_sessions(
        &self,
        client_id: i64,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<Session>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE client_id = ?1 AND user_id = ?2 AND transcript IS NOT NULL
             ORDER BY COALESCE(date, created_at) DESC, id DESC
             LIMIT ?3"
        ))?;
        let rows = stmt.query_map(
            params![client_id, user_id, limit as i64],
            Self::row_to_session,
        )?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list recent sessions")
    }

    pub fn get_session(&self, id: i64, user_id: i64) -> Result<Option<Session>> {
        self.conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
                Self::row_to_session,
            )
            .optional()
            .context("Failed to load session")
    }

    pub fn insert_session(
        &self,
        user_id: i64,
        client_id: i64,
        title: &str,
        date: &str,
        transcript: Option<&str>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO sessions (user_id, client_id, title, date, transcript)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, client_id, title, date, transcript],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Apply only the fields present in the patch.
    pub fn update_session(&self, id: i64, patch: &SessionPatch) -> Result<()> {
        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        let mut push = |column: &str, value: Option<String>| {
            values.push(value.map(Value::Text).unwrap_or(Value::Null));
            sets.push(format!("{} = ?{}", column, values.len()));
        };

        if let Some(title) = &patch.title {
            push("title", Some(title.clone()));
        }
        let optional_fields = [
            ("date", &patch.date),
            ("transcript", &patch.transcript),
            ("summary", &patch.summary),
            ("follow_up_email", &patch.follow_up_email),
            ("analysis", &patch.analysis),
            ("preparation_notes", &patch.preparation_notes),
        ];
        for (column, field) in optional_fields {
            if let Some(value) = field {
                push(column, value.clone());
            }
        }

        if sets.is_empty() {
            return Ok(());
        }

        values.push(Value::Integer(id));
        let sql = format!(
            "UPDATE sessions SET {}, updated_at = datetime('now') WHERE id = ?{}",
            sets.join(", "),
            values.len()
        );
        self.conn.execute(&sql, params_from_iter(values.iter()))?;
        Ok(())
    }

    pub fn save_analysis(
        &self,
        id: i64,
        summary: Option<&str>,
        follow_up_email: Option<&str>,
        analysis: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE sessions SET summary = ?1, follow_up_email = ?2, analysis = ?3,
                    updated_at = datetime('now')
             WHERE id = ?4",
            params![summary, follow_up_email, analysis, id],
        )?;
        Ok(())
    }

    pub fn clear_analysis(&self, id: i64) -> Result<()> {
        self.save_analysis(id, None, None, None)?;
        self.conn
            .execute("DELETE FROM session_tags WHERE session_id = ?1", [id])?;
        Ok(())
    }

    pub fn delete_session(&self, id: i64) -> Result<()> {
        self.conn.execute("DELETE FROM sessions WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn count_session_resources(&self, session_id: i64) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM client_resources WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
        Ok(Session {
            id: row.get(0)?,
            client_id: row.get(1)?,
            user_id: row.get(2)?,
            title: row.get(3)?,
            date: row.get(4)?,
            transcript: row.get(5)?,
            summary: row.get(6)?,
            follow_up_email: row.get(7)?,
            analysis: row.get(8)?,
            preparation_notes: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    // --- Tag operations ---

    pub fn list_tags(&self, category: TagCategory) -> Result<Vec<Tag>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, category FROM tags WHERE category = ?1 ORDER BY name")?;
        let rows = stmt.query_map([category.as_str()], Self::row_to_tag)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list tags")
    }

    /// Tags of the given category whose name is in `names`. Unknown names are ignored.
    pub fn find_tags(&self, names: &[String], category: TagCategory) -> Result<Vec<Tag>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<String> = (0..names.len()).map(|i| format!("?{}", i + 2)).collect();
        let sql = format!(
            "SELECT id, name, category FROM tags WHERE category = ?1 AND name IN ({}) ORDER BY name",
            placeholders.join(", ")
        );
        let mut values: Vec<&str> = vec![category.as_str()];
        values.extend(names.iter().map(String::as_str));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), Self::row_to_tag)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to look up tags")
    }

    pub fn session_tags(&self, session_id: i64) -> Result<Vec<Tag>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.name, t.category FROM tags t
             JOIN session_tags st ON st.tag_id = t.id
             WHERE st.session_id = ?1
             ORDER BY t.name",
        )?;
        let rows = stmt.query_map([session_id], Self::row_to_tag)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list session tags")
    }

    pub fn replace_session_tags(&self, session_id: i64, tag_ids: &[i64]) -> Result<()> {
        self.conn
            .execute("DELETE FROM session_tags WHERE session_id = ?1", [session_id])?;
        let mut stmt = self
            .conn
            .prepare("INSERT OR IGNORE INTO session_tags (session_id, tag_id) VALUES (?1, ?2)")?;
        for tag_id in tag_ids {
            stmt.execute(params![session_id, tag_id])?;
        }
        Ok(())
    }

    fn row_to_tag(row: &rusqlite::Row) -> rusqlite::Result<Tag> {
        let category: String = row.get(2)?;
        let category = category.parse::<TagCategory>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?;
        Ok(Tag {
            id: row.get(0)?,
            name: row.get(1)?,
            category,
        })
    }

    // --- Resource operations ---

    pub fn find_resource(&self, title: &str, resource_type: &str) -> Result<Option<Resource>> {
        let found = self
            .conn
            .query_row(
                "SELECT id, title, type, url, description, created_at FROM resources
                 WHERE title = ?1 AND type = ?2
                 ORDER BY id LIMIT 1",
                params![title, resource_type],
                Self::row_to_resource,
            )
            .optional()?;
        match found {
            Some(resource) => Ok(Some(self.with_resource_tags(resource)?)),
            None => Ok(None),
        }
    }

    pub fn insert_resource(&self, draft: &ResourceDraft) -> Result<i64> {
        let description = Some(draft.description.as_str()).filter(|d| !d.is_empty());
        self.conn.execute(
            "INSERT INTO resources (title, type, url, description) VALUES (?1, ?2, ?3, ?4)",
            params![draft.title, draft.resource_type, draft.url, description],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn link_resource_tags(&self, resource_id: i64, tag_ids: &[i64]) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "INSERT OR IGNORE INTO resource_tags (resource_id, tag_id) VALUES (?1, ?2)",
        )?;
        for tag_id in tag_ids {
            stmt.execute(params![resource_id, tag_id])?;
        }
        Ok(())
    }

    pub fn list_resources(&self) -> Result<Vec<Resource>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, type, url, description, created_at FROM resources
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], Self::row_to_resource)?;
        let resources = rows
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list resources")?;
        resources
            .into_iter()
            .map(|r| self.with_resource_tags(r))
            .collect()
    }

    /// Link a resource to a client (and optionally the session that
    /// surfaced it). Returns false when the link already exists.
    pub fn link_client_resource(
        &self,
        client_id: i64,
        resource_id: i64,
        session_id: Option<i64>,
        suggested_by: &str,
        reason: Option<&str>,
    ) -> Result<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM client_resources
             WHERE client_id = ?1 AND resource_id = ?2 AND session_id IS ?3",
            params![client_id, resource_id, session_id],
            |row| row.get(0),
        )?;
        if exists > 0 {
            return Ok(false);
        }
        self.conn.execute(
            "INSERT INTO client_resources (client_id, resource_id, session_id, suggested_by, reason)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![client_id, resource_id, session_id, suggested_by, reason],
        )?;
        Ok(true)
    }

    pub fn client_resources(&self, client_id: i64) -> Result<Vec<ClientResource>> {
        self.query_client_resources("cr.client_id = ?1", client_id)
    }

    pub fn session_resources(&self, session_id: i64) -> Result<Vec<ClientResource>> {
        self.query_client_resources("cr.session_id = ?1", session_id)
    }

    fn query_client_resources(&self, filter: &str, id: i64) -> Result<Vec<ClientResource>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT cr.id, cr.client_id, cr.session_id, cr.suggested_by, cr.reason, cr.suggested_at,
                    r.id, r.title, r.type, r.url, r.description, r.created_at
             FROM client_resources cr
             JOIN resources r ON r.id = cr.resource_id
             WHERE {filter}
             ORDER BY cr.suggested_at DESC, cr.id DESC"
        ))?;
        let rows = stmt.query_map([id], |row| {
            Ok(ClientResource {
                id: row.get(0)?,
                client_id: row.get(1)?,
                session_id: row.get(2)?,
                suggested_by: row.get(3)?,
                reason: row.get(4)?,
                suggested_at: row.get(5)?,
                resource: Resource {
                    id: row.get(6)?,
                    title: row.get(7)?,
                    resource_type: row.get(8)?,
                    url: row.get(9)?,
                    description: row.get(10)?,
                    tags: Vec::new(),
                    created_at: row.get(11)?,
                },
            })
        })?;
        let links = rows
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list client resources")?;
        links
            .into_iter()
            .map(|mut link| {
                link.resource.tags = self.resource_tag_names(link.resource.id)?;
                Ok(link)
            })
            .collect()
    }

    fn resource_tag_names(&self, resource_id: i64) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.name FROM tags t
             JOIN resource_tags rt ON rt.tag_id = t.id
             WHERE rt.resource_id = ?1
             ORDER BY t.name",
        )?;
        let rows = stmt.query_map([resource_id], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list resource tags")
    }

    fn with_resource_tags(&self, mut resource: Resource) -> Result<Resource> {
        resource.tags = self.resource_tag_names(resource.id)?;
        Ok(resource)
    }

    fn row_to_resource(row: &rusqlite::Row) -> rusqlite::Result<Resource> {
        Ok(Resource {
            id: row.get(0)?,
            title: row.get(1)?,
            resource_type: row.get(2)?,
            url: row.get(3)?,
            description: row.get(4)?,
            tags: Vec::new(),
            created_at: row.get(5)?,
        })
    }

    // --- Prompt template operations ---

    pub fn list_templates(&self, user_id: i64) -> Result<Vec<PromptTemplate>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM prompt_templates WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([user_id], Self::row_to_template)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list templates")
    }

    pub fn get_template(&self, id: i64, user_id: i64) -> Result<Option<PromptTemplate>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {TEMPLATE_COLUMNS} FROM prompt_templates WHERE id = ?1 AND user_id = ?2"
                ),
                params![id, user_id],
                Self::row_to_template,
            )
            .optional()
            .context("Failed to load template")
    }

    /// The user's first template of this type flagged as a default.
    pub fn first_default_template(
        &self,
        user_id: i64,
        template_type: PromptType,
    ) -> Result<Option<PromptTemplate>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {TEMPLATE_COLUMNS} FROM prompt_templates
                     WHERE user_id = ?1 AND type = ?2 AND is_default = 1
                     ORDER BY id LIMIT 1"
                ),
                params![user_id, template_type.as_str()],
                Self::row_to_template,
            )
            .optional()
            .context("Failed to load default template")
    }

    pub fn insert_template(
        &self,
        user_id: i64,
        name: &str,
        template_type: PromptType,
        content: &str,
        is_default: bool,
    ) -> Result<PromptTemplate> {
        self.conn.execute(
            "INSERT INTO prompt_templates (user_id, name, type, content, is_default)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, name, template_type.as_str(), content, is_default],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_template(id, user_id)?
            .ok_or_else(|| anyhow!("Template #{} not found after insert", id))
    }

    pub fn update_template(&self, id: i64, name: &str, content: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE prompt_templates SET name = ?1, content = ?2, updated_at = datetime('now')
             WHERE id = ?3",
            params![name, content, id],
        )?;
        Ok(())
    }

    pub fn delete_template(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM prompt_templates WHERE id = ?1", [id])?;
        Ok(())
    }

    fn row_to_template(row: &rusqlite::Row) -> rusqlite::Result<PromptTemplate> {
        let template_type: String = row.get(3)?;
        let template_type = template_type.parse::<PromptType>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?;
        Ok(PromptTemplate {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            template_type,
            content: row.get(4)?,
            is_default: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    // --- Context document operations ---

    pub fn list_documents(&self, user_id: i64) -> Result<Vec<ContextDocument>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM context_documents WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([user_id], Self::row_to_document)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list context documents")
    }

    pub fn get_document(&self, id: i64, user_id: i64) -> Result<Option<ContextDocument>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM context_documents WHERE id = ?1 AND user_id = ?2"
                ),
                params![id, user_id],
                Self::row_to_document,
            )
            .optional()
            .context("Failed to load context document")
    }

    pub fn insert_document(
        &self,
        user_id: i64,
        name: &str,
        file_url: &str,
        file_type: &str,
        content: &str,
    ) -> Result<ContextDocument> {
        self.conn.execute(
            "INSERT INTO context_documents (user_id, name, file_url, file_type, content)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, name, file_url, file_type, content],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_document(id, user_id)?
            .ok_or_else(|| anyhow!("Document #{} not found after insert", id))
    }

    pub fn delete_document(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM context_documents WHERE id = ?1", [id])?;
        Ok(())
    }

    fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<ContextDocument> {
        Ok(ContextDocument {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            file_url: row.get(3)?,
            file_type: row.get(4)?,
            content: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let user_id = db
            .create_user("coach@example.com", "Coach", "analyze", "prepare")
            .unwrap();
        (db, user_id)
    }

    fn client(db: &Database, user_id: i64, name: &str) -> i64 {
        let input = ClientInput {
            name: name.to_string(),
            ..Default::default()
        };
        db.insert_client(user_id, &input).unwrap()
    }

    #[test]
    fn test_init_is_idempotent_and_seeds_tags() {
        let (db, _) = setup();
        db.init().unwrap();
        db.ensure_initialized().unwrap();

        let session_tags = db.list_tags(TagCategory::Session).unwrap();
        assert_eq!(session_tags.len(), SESSION_TAGS.len());
        // Names shared with the session list keep the session category.
        let resource_tags = db.list_tags(TagCategory::Resource).unwrap();
        assert!(resource_tags.iter().all(|t| t.name != "leadership"));
        assert!(resource_tags.iter().any(|t| t.name == "framework"));
    }

    #[test]
    fn test_clients_are_scoped_by_user() {
        let (db, user_id) = setup();
        let other = db.create_user("other@example.com", "Other", "", "").unwrap();
        let id = client(&db, user_id, "Dana");

        assert!(db.get_client(id, user_id).unwrap().is_some());
        assert!(db.get_client(id, other).unwrap().is_none());
        assert!(db.list_clients(other).unwrap().is_empty());
    }

    #[test]
    fn test_team_members_are_symmetric() {
        let (db, user_id) = setup();
        let a = client(&db, user_id, "Ana");
        let b = client(&db, user_id, "Ben");
        db.add_team_member(a, b).unwrap();

        assert!(db.are_team_members(b, a).unwrap());
        assert_eq!(db.team_members(b).unwrap()[0].id, a);
        assert_eq!(db.team_members(a).unwrap()[0].id, b);

        assert_eq!(db.remove_team_member(b, a).unwrap(), 1);
        assert!(db.team_members(a).unwrap().is_empty());
    }

    #[test]
    fn test_delete_client_cascades() {
        let (db, user_id) = setup();
        let manager = client(&db, user_id, "Manager");
        let report = db
            .insert_client(
                user_id,
                &ClientInput {
                    name: "Report".to_string(),
                    reports_to_id: Some(manager),
                    ..Default::default()
                },
            )
            .unwrap();
        let session_id = db
            .insert_session(user_id, manager, "Kickoff", "2025-01-10", Some("hi"))
            .unwrap();
        db.insert_note(manager, "Prefers mornings").unwrap();

        db.delete_client(manager).unwrap();

        assert!(db.get_session(session_id, user_id).unwrap().is_none());
        assert!(db.list_notes(manager).unwrap().is_empty());
        let report = db.get_client(report, user_id).unwrap().unwrap();
        assert_eq!(report.reports_to_id, None);
    }

    #[test]
    fn test_update_session_applies_only_present_fields() {
        let (db, user_id) = setup();
        let c = client(&db, user_id, "Dana");
        let id = db
            .insert_session(user_id, c, "First", "2025-02-01", Some("transcript"))
            .unwrap();

        let patch = SessionPatch {
            summary: Some(Some("short".to_string())),
            transcript: Some(None),
            ..Default::default()
        };
        db.update_session(id, &patch).unwrap();

        let session = db.get_session(id, user_id).unwrap().unwrap();
        assert_eq!(session.title, "First");
        assert_eq!(session.summary.as_deref(), Some("short"));
        assert_eq!(session.transcript, None);
        assert_eq!(session.date.as_deref(), Some("2025-02-01"));
    }

    #[test]
    fn test_find_tags_filters_category_and_unknown_names() {
        let (db, _) = setup();
        let names = vec![
            "leadership".to_string(),
            "framework".to_string(),
            "astrology".to_string(),
        ];
        let found = db.find_tags(&names, TagCategory::Session).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "leadership");
    }

    #[test]
    fn test_link_client_resource_ignores_duplicates() {
        let (db, user_id) = setup();
        let c = client(&db, user_id, "Dana");
        let s = db.insert_session(user_id, c, "S", "2025-02-01", None).unwrap();
        let draft = ResourceDraft {
            title: "Crucial Conversations".to_string(),
            resource_type: "book".to_string(),
            url: None,
            description: String::new(),
            tags: vec![],
        };
        let r = db.insert_resource(&draft).unwrap();

        assert!(db.link_client_resource(c, r, Some(s), "ai", None).unwrap());
        assert!(!db.link_client_resource(c, r, Some(s), "ai", None).unwrap());
        assert_eq!(db.count_session_resources(s).unwrap(), 1);

        let found = db.find_resource("Crucial Conversations", "book").unwrap().unwrap();
        assert_eq!(found.id, r);
        assert_eq!(found.description, None);
    }

    #[test]
    fn test_default_template_lookup_is_per_user() {
        let (db, user_id) = setup();
        let other = db.create_user("other@example.com", "Other", "", "").unwrap();
        db.insert_template(other, "Theirs", PromptType::Preparation, "other prep", true)
            .unwrap();
        assert!(db
            .first_default_template(user_id, PromptType::Preparation)
            .unwrap()
            .is_none());

        db.insert_template(user_id, "Custom", PromptType::Preparation, "not seeded", false)
            .unwrap();
        db.insert_template(user_id, "Mine", PromptType::Preparation, "my prep", true)
            .unwrap();
        let found = db
            .first_default_template(user_id, PromptType::Preparation)
            .unwrap()
            .unwrap();
        assert_eq!(found.content, "my prep");
        assert!(db
            .first_default_template(user_id, PromptType::Analysis)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_client_sessions_ordered_by_date() {
        let (db, user_id) = setup();
        let c = client(&db, user_id, "Dana");
        db.insert_session(user_id, c, "Older", "2025-01-01", None).unwrap();
        db.insert_session(user_id, c, "Newer", "2025-03-01", None).unwrap();
        db.insert_session(user_id, c, "Middle", "2025-02-01", Some("t")).unwrap();

        let titles: Vec<String> = db
            .list_client_sessions(c, user_id, Some(2))
            .unwrap()
            .into_iter()
            .map(|s| s.title)
            .collect();
        assert_eq!(titles, vec!["Newer", "Middle"]);

        let transcribed = db.recent_transcribed_sessions(c, user_id, 3).unwrap();
        assert_eq!(transcribed.len(), 1);
    }
}
