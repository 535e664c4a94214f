use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rusqlite::config::DbConfig;
use rusqlite::{params, Connection, OptionalExtension};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::{ConfigPaths, StorageOptions};
use crate::files;

mod schema;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
pub enum ControlState {
    #[default]
    #[strum(serialize = "NOT_STARTED")]
    NotStarted,
    #[strum(serialize = "IN_PROGRESS")]
    InProgress,
    #[strum(serialize = "NOT_APPLICABLE")]
    NotApplicable,
    #[strum(serialize = "IMPLEMENTED")]
    Implemented,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
pub enum TaskState {
    #[default]
    #[strum(serialize = "TODO")]
    Todo,
    #[strum(serialize = "DONE")]
    Done,
}

impl TaskState {
    pub fn toggled(self) -> TaskState {
        match self {
            TaskState::Todo => TaskState::Done,
            TaskState::Done => TaskState::Todo,
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
pub enum EvidenceState {
    #[default]
    #[strum(serialize = "VALID")]
    Valid,
    #[strum(serialize = "INVALID")]
    Invalid,
    #[strum(serialize = "EXPIRED")]
    Expired,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
pub enum PolicyStatus {
    #[default]
    #[strum(serialize = "DRAFT")]
    Draft,
    #[strum(serialize = "ACTIVE")]
    Active,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
pub enum Importance {
    #[strum(serialize = "MANDATORY")]
    Mandatory,
    #[default]
    #[strum(serialize = "PREFERRED")]
    Preferred,
    #[strum(serialize = "ADVANCED")]
    Advanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::AsRefStr)]
pub enum RecordKind {
    #[strum(serialize = "CONTROL")]
    Control,
    #[strum(serialize = "TASK")]
    Task,
    #[strum(serialize = "EVIDENCE")]
    Evidence,
}

/// Human label for a wire-format state string. Control states carry
/// fixed labels; anything else is lowercased with the first letter
/// capitalized, so `DONE` renders as `Done`.
pub fn state_label(state: &str) -> String {
    match state.to_uppercase().as_str() {
        "NOT_STARTED" => "Not Started".to_string(),
        "IN_PROGRESS" => "In Progress".to_string(),
        "NOT_APPLICABLE" => "Not Applicable".to_string(),
        "IMPLEMENTED" => "Implemented".to_string(),
        _ => {
            let lowered = state.to_lowercase();
            let mut chars = lowered.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{kind} #{id} not found")]
    NotFound { kind: &'static str, id: i64 },
    #[error("version conflict on {kind} #{id}: expected {expected}, found {actual}")]
    VersionConflict {
        kind: &'static str,
        id: i64,
        expected: i64,
        actual: i64,
    },
}

#[derive(Debug, Clone)]
pub struct FrameworkRecord {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct ControlRecord {
    pub id: i64,
    pub framework_id: i64,
    pub name: String,
    pub description: String,
    pub category: String,
    pub importance: Importance,
    pub state: ControlState,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: i64,
    pub control_id: i64,
    pub control_name: String,
    pub name: String,
    pub description: String,
    pub time_estimate: Option<String>,
    pub state: TaskState,
    pub version: i64,
    pub assigned_to: Option<i64>,
    pub assignee_name: Option<String>,
    pub evidence_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct EvidenceRecord {
    pub id: i64,
    pub task_id: i64,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub state: EvidenceState,
    pub content_ref: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct PolicyRecord {
    pub id: i64,
    pub name: String,
    pub content: String,
    pub status: PolicyStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct VendorRecord {
    pub id: i64,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct PersonRecord {
    pub id: i64,
    pub full_name: String,
    pub primary_email: String,
    pub additional_emails: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub id: i64,
    pub record_kind: String,
    pub record_id: i64,
    pub from_state: Option<String>,
    pub to_state: String,
    pub reason: Option<String>,
    pub created_at: String,
}

impl crate::browse::Browsable for PolicyRecord {
    fn name(&self) -> &str {
        &self.name
    }
    fn status(&self) -> &str {
        self.status.as_ref()
    }
    fn created_at(&self) -> &str {
        &self.created_at
    }
    fn updated_at(&self) -> &str {
        &self.updated_at
    }
}

impl crate::browse::Browsable for TaskRecord {
    fn name(&self) -> &str {
        &self.name
    }
    fn status(&self) -> &str {
        self.state.as_ref()
    }
    fn created_at(&self) -> &str {
        &self.created_at
    }
    fn updated_at(&self) -> &str {
        &self.updated_at
    }
}

#[derive(Clone)]
pub struct StorageHandle {
    db_path: Arc<PathBuf>,
    options: Arc<StorageOptions>,
}

impl StorageHandle {
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&*self.db_path)
            .with_context(|| format!("opening database {}", self.db_path.display()))?;
        prepare_connection(&conn, &self.options)?;
        Ok(conn)
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.connect()?;
        f(&conn)
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    pub fn evidence_dir(&self) -> &Path {
        &self.options.evidence_dir
    }

    // --- frameworks ---

    pub fn create_framework(&self, name: &str, description: &str) -> Result<i64> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            bail!("framework name cannot be empty");
        }
        self.with_connection(|conn| {
            let now = now_timestamp();
            conn.execute(
                "INSERT INTO frameworks (name, description, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)",
                params![trimmed, description, now],
            )
            .context("inserting framework")?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn list_frameworks(&self) -> Result<Vec<FrameworkRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, description, created_at, updated_at
                 FROM frameworks
                 ORDER BY name COLLATE NOCASE",
            )?;
            let records = stmt
                .query_map([], |row| {
                    Ok(FrameworkRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                        created_at: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(records)
        })
    }

    pub fn fetch_framework(&self, framework_id: i64) -> Result<Option<FrameworkRecord>> {
        self.with_connection(|conn| {
            let record = conn
                .query_row(
                    "SELECT id, name, description, created_at, updated_at
                     FROM frameworks WHERE id = ?1",
                    params![framework_id],
                    |row| {
                        Ok(FrameworkRecord {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            description: row.get(2)?,
                            created_at: row.get(3)?,
                            updated_at: row.get(4)?,
                        })
                    },
                )
                .optional()?;
            Ok(record)
        })
    }

    // --- controls ---

    pub fn create_control(
        &self,
        framework_id: i64,
        name: &str,
        description: &str,
        category: &str,
        importance: Importance,
    ) -> Result<i64> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            bail!("control name cannot be empty");
        }
        self.with_connection(|conn| {
            ensure_exists(conn, "framework", "frameworks", framework_id)?;
            let now = now_timestamp();
            conn.execute(
                "INSERT INTO controls
                     (framework_id, name, description, category, importance, state,
                      version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)",
                params![
                    framework_id,
                    trimmed,
                    description,
                    category.trim(),
                    importance.as_ref(),
                    ControlState::NotStarted.as_ref(),
                    now
                ],
            )
            .context("inserting control")?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn list_controls(&self, framework_id: i64) -> Result<Vec<ControlRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, framework_id, name, description, category, importance,
                        state, version, created_at, updated_at
                 FROM controls
                 WHERE framework_id = ?1
                 ORDER BY category COLLATE NOCASE, name COLLATE NOCASE",
            )?;
            let records = stmt
                .query_map([framework_id], row_to_control)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(records)
        })
    }

    pub fn fetch_control(&self, control_id: i64) -> Result<Option<ControlRecord>> {
        self.with_connection(|conn| {
            let record = conn
                .query_row(
                    "SELECT id, framework_id, name, description, category, importance,
                            state, version, created_at, updated_at
                     FROM controls WHERE id = ?1",
                    params![control_id],
                    row_to_control,
                )
                .optional()?;
            Ok(record)
        })
    }

    /// Moves a control to a new state, logging the transition. When
    /// `expected_version` is supplied the update only applies if it still
    /// matches; a stale version surfaces as [`StorageError::VersionConflict`]
    /// and nothing is written.
    pub fn set_control_state(
        &self,
        control_id: i64,
        new_state: ControlState,
        reason: Option<&str>,
        expected_version: Option<i64>,
    ) -> Result<ControlState> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        let current: Option<(String, i64)> = tx
            .query_row(
                "SELECT state, version FROM controls WHERE id = ?1",
                params![control_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((from_state, version)) = current else {
            return Err(StorageError::NotFound {
                kind: "control",
                id: control_id,
            }
            .into());
        };
        if let Some(expected) = expected_version {
            if expected != version {
                return Err(StorageError::VersionConflict {
                    kind: "control",
                    id: control_id,
                    expected,
                    actual: version,
                }
                .into());
            }
        }

        let now = now_timestamp();
        tx.execute(
            "UPDATE controls SET state = ?1, version = version + 1, updated_at = ?2
             WHERE id = ?3",
            params![new_state.as_ref(), now, control_id],
        )
        .context("updating control state")?;
        record_transition(
            &tx,
            RecordKind::Control,
            control_id,
            Some(&from_state),
            new_state.as_ref(),
            reason,
            &now,
        )?;
        tx.commit()?;
        Ok(from_state.parse().unwrap_or_default())
    }

    // --- tasks ---

    pub fn create_task(
        &self,
        control_id: i64,
        name: &str,
        description: &str,
        time_estimate: Option<&str>,
    ) -> Result<i64> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            bail!("task name cannot be empty");
        }
        let estimate = time_estimate.map(str::trim).filter(|value| !value.is_empty());
        self.with_connection(|conn| {
            ensure_exists(conn, "control", "controls", control_id)?;
            let now = now_timestamp();
            conn.execute(
                "INSERT INTO tasks
                     (control_id, name, description, time_estimate, state, version,
                      created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
                params![
                    control_id,
                    trimmed,
                    description,
                    estimate,
                    TaskState::Todo.as_ref(),
                    now
                ],
            )
            .context("inserting task")?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn list_tasks(&self, control_id: Option<i64>) -> Result<Vec<TaskRecord>> {
        self.with_connection(|conn| {
            let sql = format!(
                "SELECT t.id, t.control_id, c.name, t.name, t.description,
                        t.time_estimate, t.state, t.version, t.assigned_to,
                        p.full_name,
                        (SELECT COUNT(*) FROM evidences e WHERE e.task_id = t.id),
                        t.created_at, t.updated_at
                 FROM tasks t
                 INNER JOIN controls c ON c.id = t.control_id
                 LEFT JOIN people p ON p.id = t.assigned_to
                 {}
                 ORDER BY t.updated_at DESC",
                if control_id.is_some() {
                    "WHERE t.control_id = ?1"
                } else {
                    ""
                }
            );
            let mut stmt = conn.prepare(&sql)?;
            let records = match control_id {
                Some(id) => stmt
                    .query_map([id], row_to_task)?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
                None => stmt
                    .query_map([], row_to_task)?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
            };
            Ok(records)
        })
    }

    pub fn fetch_task(&self, task_id: i64) -> Result<Option<TaskRecord>> {
        self.with_connection(|conn| {
            let record = conn
                .query_row(
                    "SELECT t.id, t.control_id, c.name, t.name, t.description,
                            t.time_estimate, t.state, t.version, t.assigned_to,
                            p.full_name,
                            (SELECT COUNT(*) FROM evidences e WHERE e.task_id = t.id),
                            t.created_at, t.updated_at
                     FROM tasks t
                     INNER JOIN controls c ON c.id = t.control_id
                     LEFT JOIN people p ON p.id = t.assigned_to
                     WHERE t.id = ?1",
                    params![task_id],
                    row_to_task,
                )
                .optional()?;
            Ok(record)
        })
    }

    /// Same optimistic-versioning contract as [`set_control_state`].
    /// Returns the state the task was in before the change.
    pub fn set_task_state(
        &self,
        task_id: i64,
        new_state: TaskState,
        expected_version: Option<i64>,
    ) -> Result<TaskState> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        let current: Option<(String, i64)> = tx
            .query_row(
                "SELECT state, version FROM tasks WHERE id = ?1",
                params![task_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((from_state, version)) = current else {
            return Err(StorageError::NotFound {
                kind: "task",
                id: task_id,
            }
            .into());
        };
        if let Some(expected) = expected_version {
            if expected != version {
                return Err(StorageError::VersionConflict {
                    kind: "task",
                    id: task_id,
                    expected,
                    actual: version,
                }
                .into());
            }
        }

        let now = now_timestamp();
        tx.execute(
            "UPDATE tasks SET state = ?1, version = version + 1, updated_at = ?2
             WHERE id = ?3",
            params![new_state.as_ref(), now, task_id],
        )
        .context("updating task state")?;
        record_transition(
            &tx,
            RecordKind::Task,
            task_id,
            Some(&from_state),
            new_state.as_ref(),
            None,
            &now,
        )?;
        tx.commit()?;
        Ok(from_state.parse().unwrap_or_default())
    }

    pub fn assign_task(&self, task_id: i64, person_id: i64) -> Result<()> {
        self.with_connection(|conn| {
            ensure_exists(conn, "person", "people", person_id)?;
            let updated = conn.execute(
                "UPDATE tasks SET assigned_to = ?1, updated_at = ?2 WHERE id = ?3",
                params![person_id, now_timestamp(), task_id],
            )?;
            if updated == 0 {
                return Err(StorageError::NotFound {
                    kind: "task",
                    id: task_id,
                }
                .into());
            }
            Ok(())
        })
    }

    pub fn unassign_task(&self, task_id: i64) -> Result<()> {
        self.with_connection(|conn| {
            let updated = conn.execute(
                "UPDATE tasks SET assigned_to = NULL, updated_at = ?1 WHERE id = ?2",
                params![now_timestamp(), task_id],
            )?;
            if updated == 0 {
                return Err(StorageError::NotFound {
                    kind: "task",
                    id: task_id,
                }
                .into());
            }
            Ok(())
        })
    }

    pub fn delete_task(&self, task_id: i64) -> Result<()> {
        self.with_connection(|conn| {
            let deleted = conn.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
            if deleted == 0 {
                return Err(StorageError::NotFound {
                    kind: "task",
                    id: task_id,
                }
                .into());
            }
            Ok(())
        })
    }

    // --- evidence ---

    /// Copies the file at `source` into the evidence vault and records it
    /// against the task. Filename, size and MIME type are taken from the
    /// path; the stored copy is addressed by a fresh content reference.
    pub fn attach_evidence(&self, task_id: i64, source: &Path) -> Result<EvidenceRecord> {
        let metadata = fs::metadata(source)
            .with_context(|| format!("reading evidence file {}", source.display()))?;
        if !metadata.is_file() {
            bail!("evidence source {} is not a regular file", source.display());
        }
        let filename = source
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| "evidence.bin".to_string());
        let mime_type = files::guess_mime(source);
        let size = metadata.len();
        let content_ref = Uuid::new_v4().to_string();

        fs::create_dir_all(&self.options.evidence_dir).with_context(|| {
            format!(
                "creating evidence vault {}",
                self.options.evidence_dir.display()
            )
        })?;
        let stored = self.options.evidence_dir.join(&content_ref);
        fs::copy(source, &stored)
            .with_context(|| format!("copying evidence into vault {}", stored.display()))?;

        let result = self.with_connection(|conn| {
            ensure_exists(conn, "task", "tasks", task_id)?;
            let now = now_timestamp();
            conn.execute(
                "INSERT INTO evidences
                     (task_id, filename, mime_type, size, state, content_ref,
                      created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    task_id,
                    filename,
                    mime_type,
                    size as i64,
                    EvidenceState::Valid.as_ref(),
                    content_ref,
                    now
                ],
            )
            .context("inserting evidence")?;
            Ok(EvidenceRecord {
                id: conn.last_insert_rowid(),
                task_id,
                filename: filename.clone(),
                mime_type: mime_type.to_string(),
                size,
                state: EvidenceState::Valid,
                content_ref: content_ref.clone(),
                created_at: now.clone(),
                updated_at: now,
            })
        });

        if result.is_err() {
            // Do not leave an orphaned copy behind when the insert failed.
            fs::remove_file(&stored).ok();
        }
        result
    }

    pub fn list_evidence(&self, task_id: i64) -> Result<Vec<EvidenceRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, filename, mime_type, size, state, content_ref,
                        created_at, updated_at
                 FROM evidences
                 WHERE task_id = ?1
                 ORDER BY created_at",
            )?;
            let records = stmt
                .query_map([task_id], row_to_evidence)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(records)
        })
    }

    pub fn set_evidence_state(
        &self,
        evidence_id: i64,
        new_state: EvidenceState,
        reason: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let current: Option<String> = tx
            .query_row(
                "SELECT state FROM evidences WHERE id = ?1",
                params![evidence_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(from_state) = current else {
            return Err(StorageError::NotFound {
                kind: "evidence",
                id: evidence_id,
            }
            .into());
        };

        let now = now_timestamp();
        tx.execute(
            "UPDATE evidences SET state = ?1, updated_at = ?2 WHERE id = ?3",
            params![new_state.as_ref(), now, evidence_id],
        )
        .context("updating evidence state")?;
        record_transition(
            &tx,
            RecordKind::Evidence,
            evidence_id,
            Some(&from_state),
            new_state.as_ref(),
            reason,
            &now,
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn remove_evidence(&self, evidence_id: i64) -> Result<()> {
        let content_ref = self.with_connection(|conn| {
            let content_ref: Option<String> = conn
                .query_row(
                    "SELECT content_ref FROM evidences WHERE id = ?1",
                    params![evidence_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(content_ref) = content_ref else {
                return Err(StorageError::NotFound {
                    kind: "evidence",
                    id: evidence_id,
                }
                .into());
            };
            conn.execute("DELETE FROM evidences WHERE id = ?1", params![evidence_id])?;
            Ok(content_ref)
        })?;

        // Vault cleanup is best-effort; the row is already gone.
        let stored = self.options.evidence_dir.join(content_ref);
        if let Err(err) = fs::remove_file(&stored) {
            tracing::warn!(?err, path = %stored.display(), "could not remove evidence copy");
        }
        Ok(())
    }

    // --- policies ---

    pub fn create_policy(&self, name: &str, content: &str, status: PolicyStatus) -> Result<i64> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            bail!("policy name cannot be empty");
        }
        self.with_connection(|conn| {
            let now = now_timestamp();
            conn.execute(
                "INSERT INTO policies (name, content, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![trimmed, content, status.as_ref(), now],
            )
            .context("inserting policy")?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn list_policies(&self) -> Result<Vec<PolicyRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, content, status, created_at, updated_at
                 FROM policies
                 ORDER BY name COLLATE NOCASE",
            )?;
            let records = stmt
                .query_map([], row_to_policy)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(records)
        })
    }

    pub fn fetch_policy(&self, policy_id: i64) -> Result<Option<PolicyRecord>> {
        self.with_connection(|conn| {
            let record = conn
                .query_row(
                    "SELECT id, name, content, status, created_at, updated_at
                     FROM policies WHERE id = ?1",
                    params![policy_id],
                    row_to_policy,
                )
                .optional()?;
            Ok(record)
        })
    }

    pub fn set_policy_status(&self, policy_id: i64, status: PolicyStatus) -> Result<()> {
        self.with_connection(|conn| {
            let updated = conn.execute(
                "UPDATE policies SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_ref(), now_timestamp(), policy_id],
            )?;
            if updated == 0 {
                return Err(StorageError::NotFound {
                    kind: "policy",
                    id: policy_id,
                }
                .into());
            }
            Ok(())
        })
    }

    pub fn delete_policy(&self, policy_id: i64) -> Result<()> {
        self.with_connection(|conn| {
            let deleted = conn.execute("DELETE FROM policies WHERE id = ?1", params![policy_id])?;
            if deleted == 0 {
                return Err(StorageError::NotFound {
                    kind: "policy",
                    id: policy_id,
                }
                .into());
            }
            Ok(())
        })
    }

    // --- vendors ---

    pub fn create_vendor(&self, name: &str) -> Result<i64> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            bail!("vendor name cannot be empty");
        }
        self.with_connection(|conn| {
            let now = now_timestamp();
            conn.execute(
                "INSERT INTO vendors (name, created_at, updated_at) VALUES (?1, ?2, ?2)",
                params![trimmed, now],
            )
            .context("inserting vendor")?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn list_vendors(&self) -> Result<Vec<VendorRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, created_at, updated_at
                 FROM vendors
                 ORDER BY name COLLATE NOCASE",
            )?;
            let records = stmt
                .query_map([], |row| {
                    Ok(VendorRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        created_at: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(records)
        })
    }

    // --- people ---

    pub fn add_person(
        &self,
        full_name: &str,
        primary_email: &str,
        additional_emails: &[String],
    ) -> Result<i64> {
        let name = full_name.trim();
        let email = primary_email.trim();
        if name.is_empty() {
            bail!("person name cannot be empty");
        }
        if email.is_empty() {
            bail!("primary email cannot be empty");
        }
        let extra = serde_json::to_string(additional_emails)
            .context("serializing additional emails")?;
        self.with_connection(|conn| {
            let now = now_timestamp();
            conn.execute(
                "INSERT INTO people
                     (full_name, primary_email, additional_emails, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![name, email, extra, now],
            )
            .with_context(|| format!("inserting person '{name}'"))?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn list_people(&self) -> Result<Vec<PersonRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, full_name, primary_email, additional_emails,
                        created_at, updated_at
                 FROM people
                 ORDER BY full_name COLLATE NOCASE",
            )?;
            let records = stmt
                .query_map([], row_to_person)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(records)
        })
    }

    pub fn fetch_person(&self, person_id: i64) -> Result<Option<PersonRecord>> {
        self.with_connection(|conn| {
            let record = conn
                .query_row(
                    "SELECT id, full_name, primary_email, additional_emails,
                            created_at, updated_at
                     FROM people WHERE id = ?1",
                    params![person_id],
                    row_to_person,
                )
                .optional()?;
            Ok(record)
        })
    }

    // --- transitions ---

    pub fn list_transitions(
        &self,
        kind: RecordKind,
        record_id: i64,
    ) -> Result<Vec<TransitionRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, record_kind, record_id, from_state, to_state, reason, created_at
                 FROM state_transitions
                 WHERE record_kind = ?1 AND record_id = ?2
                 ORDER BY created_at, id",
            )?;
            let records = stmt
                .query_map(params![kind.as_ref(), record_id], |row| {
                    Ok(TransitionRecord {
                        id: row.get(0)?,
                        record_kind: row.get(1)?,
                        record_id: row.get(2)?,
                        from_state: row.get(3)?,
                        to_state: row.get(4)?,
                        reason: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(records)
        })
    }
}

fn row_to_control(row: &rusqlite::Row<'_>) -> rusqlite::Result<ControlRecord> {
    let importance: String = row.get(5)?;
    let state: String = row.get(6)?;
    Ok(ControlRecord {
        id: row.get(0)?,
        framework_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        category: row.get(4)?,
        importance: importance.parse().unwrap_or_default(),
        state: state.parse().unwrap_or_default(),
        version: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRecord> {
    let state: String = row.get(6)?;
    Ok(TaskRecord {
        id: row.get(0)?,
        control_id: row.get(1)?,
        control_name: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        time_estimate: row.get(5)?,
        state: state.parse().unwrap_or_default(),
        version: row.get(7)?,
        assigned_to: row.get(8)?,
        assignee_name: row.get(9)?,
        evidence_count: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn row_to_evidence(row: &rusqlite::Row<'_>) -> rusqlite::Result<EvidenceRecord> {
    let size: i64 = row.get(4)?;
    let state: String = row.get(5)?;
    Ok(EvidenceRecord {
        id: row.get(0)?,
        task_id: row.get(1)?,
        filename: row.get(2)?,
        mime_type: row.get(3)?,
        size: size.max(0) as u64,
        state: state.parse().unwrap_or_default(),
        content_ref: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn row_to_policy(row: &rusqlite::Row<'_>) -> rusqlite::Result<PolicyRecord> {
    let status: String = row.get(3)?;
    Ok(PolicyRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        content: row.get(2)?,
        status: status.parse().unwrap_or_default(),
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn row_to_person(row: &rusqlite::Row<'_>) -> rusqlite::Result<PersonRecord> {
    let extra: String = row.get(3)?;
    Ok(PersonRecord {
        id: row.get(0)?,
        full_name: row.get(1)?,
        primary_email: row.get(2)?,
        additional_emails: serde_json::from_str(&extra).unwrap_or_default(),
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn ensure_exists(
    conn: &Connection,
    kind: &'static str,
    table: &str,
    id: i64,
) -> Result<()> {
    let found = conn
        .query_row(
            &format!("SELECT 1 FROM {table} WHERE id = ?1"),
            params![id],
            |_row| Ok(()),
        )
        .optional()?
        .is_some();
    if !found {
        return Err(StorageError::NotFound { kind, id }.into());
    }
    Ok(())
}

fn record_transition(
    conn: &Connection,
    kind: RecordKind,
    record_id: i64,
    from_state: Option<&str>,
    to_state: &str,
    reason: Option<&str>,
    created_at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO state_transitions
             (record_kind, record_id, from_state, to_state, reason, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![kind.as_ref(), record_id, from_state, to_state, reason, created_at],
    )
    .context("recording state transition")?;
    Ok(())
}

/// RFC 3339 UTC at second precision; one producer keeps every stored
/// timestamp lexicographically ordered.
pub fn now_timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    let now = now.replace_nanosecond(0).unwrap_or(now);
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

pub fn init(paths: &ConfigPaths, storage: &StorageOptions) -> Result<StorageHandle> {
    let db_path = &storage.database_path;
    let existed = db_path.exists();
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    fs::create_dir_all(&paths.evidence_dir)
        .with_context(|| format!("creating evidence vault {}", paths.evidence_dir.display()))?;
    let conn = Connection::open(db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    prepare_connection(&conn, storage)?;
    schema::apply(&conn)?;
    if !existed {
        seed_initial_registers(&conn)?;
    }
    Ok(StorageHandle {
        db_path: Arc::new(db_path.clone()),
        options: Arc::new(storage.clone()),
    })
}

fn prepare_connection(conn: &Connection, storage: &StorageOptions) -> Result<()> {
    conn.set_db_config(DbConfig::SQLITE_DBCONFIG_ENABLE_FKEY, true)
        .context("enabling foreign keys")?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("setting journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("setting synchronous=NORMAL")?;
    conn.pragma_update(
        None,
        "wal_autocheckpoint",
        storage.wal_autocheckpoint.to_string(),
    )
    .context("setting wal_autocheckpoint")?;
    Ok(())
}

fn seed_initial_registers(conn: &Connection) -> Result<()> {
    let existing: Option<i64> = conn
        .query_row("SELECT id FROM frameworks LIMIT 1", [], |row| row.get(0))
        .optional()
        .context("checking for existing frameworks")?;
    if existing.is_some() {
        return Ok(());
    }

    tracing::info!("seeding first-run compliance registers");
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO frameworks (name, description, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)",
        params![
            "SOC 2",
            "Service Organization Control 2 trust services criteria.",
            now
        ],
    )
    .context("inserting seed framework")?;
    let framework_id = conn.last_insert_rowid();

    let controls = [
        (
            "Access reviews",
            "Review user access to production systems on a fixed cadence.",
            "Access Control",
            "MANDATORY",
        ),
        (
            "Offboarding checklist",
            "Revoke credentials within one business day of departure.",
            "Access Control",
            "MANDATORY",
        ),
        (
            "Encryption at rest",
            "Encrypt customer data stores with managed keys.",
            "Cryptography",
            "PREFERRED",
        ),
        (
            "Key rotation",
            "Rotate data-store encryption keys at least yearly.",
            "Cryptography",
            "ADVANCED",
        ),
    ];
    for (name, description, category, importance) in controls {
        conn.execute(
            "INSERT INTO controls
                 (framework_id, name, description, category, importance, state,
                  version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'NOT_STARTED', 1, ?6, ?6)",
            params![framework_id, name, description, category, importance, now],
        )
        .context("inserting seed control")?;
    }

    conn.execute(
        "INSERT INTO policies (name, content, status, created_at, updated_at)
         VALUES (?1, ?2, 'DRAFT', ?3, ?3)",
        params![
            "Information Security Policy",
            "# Information Security Policy\n\n<p>This policy defines how the \
             organization protects customer data &amp; internal systems. Review \
             it yearly and after every major incident.</p>\n",
            now
        ],
    )
    .context("inserting seed policy")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigPaths, StorageOptions};
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn temp_paths(root: &TempDir) -> ConfigPaths {
        let base = root.path();
        let config_dir = base.join("config");
        let data_dir = base.join("data");
        ConfigPaths {
            config_dir: config_dir.clone(),
            config_file: config_dir.join("config.toml"),
            data_dir: data_dir.clone(),
            database_path: data_dir.join("registers.db"),
            evidence_dir: data_dir.join("evidence"),
            cache_dir: base.join("cache"),
            log_dir: base.join("logs"),
            state_dir: base.join("state"),
        }
    }

    fn init_storage() -> anyhow::Result<(TempDir, StorageHandle)> {
        let temp = TempDir::new()?;
        let paths = temp_paths(&temp);
        paths.ensure_directories()?;
        let mut options = StorageOptions::default();
        options.database_path = paths.database_path.clone();
        options.evidence_dir = paths.evidence_dir.clone();
        let storage = init(&paths, &options)?;
        Ok((temp, storage))
    }

    fn seed_control(storage: &StorageHandle) -> anyhow::Result<(i64, i64)> {
        let framework_id = storage.create_framework("ISO 27001", "ISMS requirements")?;
        let control_id = storage.create_control(
            framework_id,
            "Asset inventory",
            "Keep an inventory of information assets.",
            "Asset Management",
            Importance::Mandatory,
        )?;
        Ok((framework_id, control_id))
    }

    #[test]
    fn first_run_seeds_a_starter_framework() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let frameworks = storage.list_frameworks()?;
        assert!(frameworks.iter().any(|f| f.name == "SOC 2"));
        let controls = storage.list_controls(frameworks[0].id)?;
        assert!(!controls.is_empty());
        assert!(storage.list_policies()?.iter().any(|p| p.status == PolicyStatus::Draft));
        Ok(())
    }

    #[test]
    fn control_state_change_logs_a_transition() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let (_framework_id, control_id) = seed_control(&storage)?;

        let previous = storage.set_control_state(
            control_id,
            ControlState::InProgress,
            Some("kickoff"),
            None,
        )?;
        assert_eq!(previous, ControlState::NotStarted);

        let control = storage.fetch_control(control_id)?.expect("control present");
        assert_eq!(control.state, ControlState::InProgress);
        assert_eq!(control.version, 2);

        let transitions = storage.list_transitions(RecordKind::Control, control_id)?;
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].from_state.as_deref(), Some("NOT_STARTED"));
        assert_eq!(transitions[0].to_state, "IN_PROGRESS");
        assert_eq!(transitions[0].reason.as_deref(), Some("kickoff"));
        Ok(())
    }

    #[test]
    fn stale_version_is_rejected_without_writing() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let (_framework_id, control_id) = seed_control(&storage)?;
        storage.set_control_state(control_id, ControlState::InProgress, None, Some(1))?;

        let err = storage
            .set_control_state(control_id, ControlState::Implemented, None, Some(1))
            .expect_err("stale version must fail");
        assert_matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::VersionConflict {
                expected: 1,
                actual: 2,
                ..
            })
        );

        let control = storage.fetch_control(control_id)?.expect("control present");
        assert_eq!(control.state, ControlState::InProgress);
        assert_eq!(storage.list_transitions(RecordKind::Control, control_id)?.len(), 1);
        Ok(())
    }

    #[test]
    fn task_round_trip_with_estimate_and_assignment() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let (_framework_id, control_id) = seed_control(&storage)?;
        let task_id =
            storage.create_task(control_id, "Collect asset list", "", Some("P2DT30M"))?;
        let person_id = storage.add_person("Ada Lovelace", "ada@example.com", &[])?;

        storage.assign_task(task_id, person_id)?;
        let task = storage.fetch_task(task_id)?.expect("task present");
        assert_eq!(task.time_estimate.as_deref(), Some("P2DT30M"));
        assert_eq!(task.assignee_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(task.control_name, "Asset inventory");

        let previous = storage.set_task_state(task_id, TaskState::Done, Some(1))?;
        assert_eq!(previous, TaskState::Todo);

        storage.unassign_task(task_id)?;
        let task = storage.fetch_task(task_id)?.expect("task present");
        assert_eq!(task.state, TaskState::Done);
        assert!(task.assignee_name.is_none());
        Ok(())
    }

    #[test]
    fn blank_time_estimate_is_stored_as_null() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let (_framework_id, control_id) = seed_control(&storage)?;
        let task_id = storage.create_task(control_id, "No estimate", "", Some("  "))?;
        let task = storage.fetch_task(task_id)?.expect("task present");
        assert!(task.time_estimate.is_none());
        Ok(())
    }

    #[test]
    fn missing_task_reports_not_found() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let err = storage
            .set_task_state(9999, TaskState::Done, None)
            .expect_err("missing task must fail");
        assert_matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::NotFound { kind: "task", id: 9999 })
        );
        Ok(())
    }

    #[test]
    fn evidence_attach_copies_into_the_vault() -> anyhow::Result<()> {
        let (temp, storage) = init_storage()?;
        let (_framework_id, control_id) = seed_control(&storage)?;
        let task_id = storage.create_task(control_id, "Export report", "", None)?;

        let source = temp.path().join("report.pdf");
        fs::write(&source, b"%PDF-1.4 fake")?;

        let evidence = storage.attach_evidence(task_id, &source)?;
        assert_eq!(evidence.filename, "report.pdf");
        assert_eq!(evidence.mime_type, "application/pdf");
        assert_eq!(evidence.state, EvidenceState::Valid);
        assert!(storage.evidence_dir().join(&evidence.content_ref).exists());

        let listed = storage.list_evidence(task_id)?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size, 13);

        storage.remove_evidence(evidence.id)?;
        assert!(storage.list_evidence(task_id)?.is_empty());
        assert!(!storage.evidence_dir().join(&evidence.content_ref).exists());
        Ok(())
    }

    #[test]
    fn evidence_state_change_is_logged() -> anyhow::Result<()> {
        let (temp, storage) = init_storage()?;
        let (_framework_id, control_id) = seed_control(&storage)?;
        let task_id = storage.create_task(control_id, "Screenshot", "", None)?;
        let source = temp.path().join("grab.png");
        fs::write(&source, b"png bytes")?;
        let evidence = storage.attach_evidence(task_id, &source)?;

        storage.set_evidence_state(evidence.id, EvidenceState::Expired, Some("stale"))?;
        let listed = storage.list_evidence(task_id)?;
        assert_eq!(listed[0].state, EvidenceState::Expired);

        let transitions = storage.list_transitions(RecordKind::Evidence, evidence.id)?;
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].to_state, "EXPIRED");
        Ok(())
    }

    #[test]
    fn duplicate_primary_email_is_rejected() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        storage.add_person("Ada Lovelace", "ada@example.com", &[])?;
        assert!(storage
            .add_person("Ada L.", "ada@example.com", &[])
            .is_err());
        Ok(())
    }

    #[test]
    fn additional_emails_survive_the_json_column() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let extra = vec!["ada@acm.org".to_string()];
        let person_id = storage.add_person("Ada Lovelace", "ada@example.com", &extra)?;
        let person = storage.fetch_person(person_id)?.expect("person present");
        assert_eq!(person.additional_emails, extra);
        Ok(())
    }

    #[test]
    fn state_labels_cover_known_and_unknown_states() {
        assert_eq!(state_label("NOT_APPLICABLE"), "Not Applicable");
        assert_eq!(state_label("IMPLEMENTED"), "Implemented");
        assert_eq!(state_label("DONE"), "Done");
        assert_eq!(state_label("custom"), "Custom");
    }
}
