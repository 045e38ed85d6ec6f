//! Persisted commit journal: one row per dispatched change map.

#![allow(clippy::result_large_err)]

use crate::errors::{from_rusqlite, serialization, Result};
use crate::store::Store;
use chrono::{DateTime, Utc};
use commitlog_core::errors::{ExError, ExErrorKind};
use commitlog_core::ChangeMap;
use commitlog_core_types::correlation::{CommitContext, CommitId, ContextId};
use rusqlite::params;

#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub commit_id: CommitId,
    pub context_id: ContextId,
    pub committed_at: DateTime<Utc>,
    pub changes: ChangeMap,
}

impl Store {
    /// Record the change map of a commit
    ///
    /// # Errors
    ///
    /// `Persistence` when the commit id was already journaled.
    pub fn append_journal(&self, commit: &CommitContext, changes: &ChangeMap) -> Result<()> {
        let payload =
            serde_json::to_string(changes).map_err(|e| serialization("append_journal", e))?;
        let committed_at = Utc::now().to_rfc3339();
        let change_count = changes.unique_changes().len() as i64;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO commit_journal (commit_id, context_id, committed_at, change_count, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    commit.commit_id.as_str(),
                    commit.context_id.as_str(),
                    committed_at,
                    change_count,
                    payload
                ],
            )
            .map_err(|e| from_rusqlite(e).with_commit_id(commit.commit_id.clone()))?;
            Ok(())
        })?;

        tracing::debug!(
            commit_id = %commit.commit_id,
            change_count,
            "journal entry appended"
        );
        Ok(())
    }

    /// All journal entries in insertion order
    pub fn journal_entries(&self) -> Result<Vec<JournalEntry>> {
        let raw = self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT commit_id, context_id, committed_at, payload
                     FROM commit_journal ORDER BY id",
                )
                .map_err(from_rusqlite)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .map_err(from_rusqlite)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(from_rusqlite)?;
            Ok(rows)
        })?;

        raw.into_iter()
            .map(|(commit_id, context_id, committed_at, payload)| {
                let committed_at = DateTime::parse_from_rfc3339(&committed_at)
                    .map_err(|e| {
                        ExError::new(ExErrorKind::Serialization)
                            .with_op("journal_entries")
                            .with_commit_id(CommitId::from_string(commit_id.clone()))
                            .with_message(e.to_string())
                    })?
                    .with_timezone(&Utc);
                let changes: ChangeMap = serde_json::from_str(&payload)
                    .map_err(|e| serialization("journal_entries", e))?;
                Ok(JournalEntry {
                    commit_id: CommitId::from_string(commit_id),
                    context_id: ContextId::from_string(context_id),
                    committed_at,
                    changes,
                })
            })
            .collect()
    }
}
