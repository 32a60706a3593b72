#![forbid(unsafe_code)]

use super::*;
use tl_core::model::VersionedKind;

impl SqliteStore {
    /// Inserts a new version for a scope key.
    ///
    /// At most one row per (kind, scope_key) is current at any time. If a
    /// current row exists and `supersede_existing` is false the call fails
    /// with a conflict; the caller must re-issue with the flag after explicit
    /// confirmation. With the flag, demotion of the old row, insertion of the
    /// new one, and the audit event land in a single transaction.
    pub fn create_version(
        &mut self,
        request: CreateVersionRequest,
    ) -> Result<VersionRow, StoreError> {
        let workspace = canonical_workspace(&request.workspace_id)?;
        let scope_key = canonical_id("scope_key", &request.scope_key)?;
        ensure_json("record_json", &request.record_json)?;
        let run_id = match request.run_id.as_deref() {
            Some(value) => Some(canonical_id("run_id", value)?),
            None => None,
        };

        let now_ms = now_ms();
        let tx = self.conn.transaction()?;
        ensure_workspace_tx(&tx, &workspace, now_ms)?;
        if let Some(run_id) = run_id.as_deref() {
            ensure_run_exists_tx(&tx, &workspace, run_id)?;
        }

        let existing = current_version_tx(&tx, &workspace, request.kind, &scope_key)?;
        if let Some(existing) = &existing
            && !request.supersede_existing
        {
            return Err(StoreError::CurrentVersionConflict {
                kind: request.kind.as_str(),
                scope_key,
                current_id: existing.id.clone(),
            });
        }

        let seq = next_counter_tx(&tx, &workspace, "version_seq")?;
        let id = format!("VER-{seq:03}");

        if let Some(old) = &existing {
            tx.execute(
                "UPDATE versioned_records SET is_current=0, superseded_by=?4 \
                 WHERE workspace=?1 AND kind=?2 AND id=?3",
                params![workspace, request.kind.as_str(), old.id, id],
            )?;
        }

        let insert = tx.execute(
            r#"
            INSERT INTO versioned_records(workspace, kind, id, scope_key, record_json, is_current, superseded_by, created_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, 1, NULL, ?6)
            "#,
            params![
                workspace,
                request.kind.as_str(),
                id,
                scope_key,
                request.record_json,
                now_ms
            ],
        );

        // The partial unique index backs the at-most-one-current invariant
        // even against a concurrent process; surface it as the same conflict.
        if let Err(err) = insert {
            if is_constraint_violation(&err) {
                let current_id = existing
                    .as_ref()
                    .map(|row| row.id.clone())
                    .unwrap_or_default();
                return Err(StoreError::CurrentVersionConflict {
                    kind: request.kind.as_str(),
                    scope_key,
                    current_id,
                });
            }
            return Err(StoreError::Sql(err));
        }

        let (event_type, payload) = match &existing {
            Some(old) => (
                "version_superseded",
                serde_json::json!({
                    "kind": request.kind.as_str(),
                    "scope_key": scope_key,
                    "old_id": old.id,
                    "new_id": id,
                }),
            ),
            None => (
                "version_created",
                serde_json::json!({
                    "kind": request.kind.as_str(),
                    "scope_key": scope_key,
                    "new_id": id,
                }),
            ),
        };
        insert_audit_tx(
            &tx,
            &workspace,
            now_ms,
            event_type,
            request.actor.actor_type,
            &request.actor.actor_id,
            run_id.as_deref(),
            Some(&scope_key),
            None,
            &payload.to_string(),
        )?;

        tx.commit()?;
        Ok(VersionRow {
            kind: request.kind,
            id,
            scope_key,
            record_json: request.record_json,
            is_current: true,
            superseded_by: None,
            created_at_ms: now_ms,
        })
    }

    pub fn current_version(
        &mut self,
        workspace_id: &str,
        kind: VersionedKind,
        scope_key: &str,
    ) -> Result<Option<VersionRow>, StoreError> {
        let workspace = canonical_workspace(workspace_id)?;
        let scope_key = canonical_id("scope_key", scope_key)?;
        let tx = self.conn.transaction()?;
        let row = current_version_tx(&tx, &workspace, kind, &scope_key)?;
        tx.commit()?;
        Ok(row)
    }

    /// Full supersession history for a scope key, oldest first. History is
    /// never deleted, so the chain always reaches back to the first version.
    pub fn version_history(
        &mut self,
        request: VersionHistoryRequest,
    ) -> Result<Vec<VersionRow>, StoreError> {
        let workspace = canonical_workspace(&request.workspace_id)?;
        let scope_key = canonical_id("scope_key", &request.scope_key)?;
        let limit = to_sqlite_i64(request.limit.clamp(1, 500))?;
        let offset = to_sqlite_i64(request.offset)?;

        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, scope_key, record_json, is_current, superseded_by, created_at_ms
            FROM versioned_records
            WHERE workspace=?1 AND kind=?2 AND scope_key=?3
            ORDER BY created_at_ms ASC, id ASC
            LIMIT ?4 OFFSET ?5
            "#,
        )?;
        let mut rows = stmt.query(params![
            workspace,
            request.kind.as_str(),
            scope_key,
            limit,
            offset
        ])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(VersionRow {
                kind: request.kind,
                id: row.get(0)?,
                scope_key: row.get(1)?,
                record_json: row.get(2)?,
                is_current: row.get::<_, i64>(3)? != 0,
                superseded_by: row.get(4)?,
                created_at_ms: row.get(5)?,
            });
        }
        Ok(out)
    }

    pub fn get_version(
        &mut self,
        workspace_id: &str,
        kind: VersionedKind,
        version_id: &str,
    ) -> Result<Option<VersionRow>, StoreError> {
        let workspace = canonical_workspace(workspace_id)?;
        Ok(self
            .conn
            .query_row(
                "SELECT id, scope_key, record_json, is_current, superseded_by, created_at_ms \
                 FROM versioned_records WHERE workspace=?1 AND kind=?2 AND id=?3",
                params![workspace, kind.as_str(), version_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?
            .map(
                |(id, scope_key, record_json, is_current, superseded_by, created_at_ms)| {
                    VersionRow {
                        kind,
                        id,
                        scope_key,
                        record_json,
                        is_current: is_current != 0,
                        superseded_by,
                        created_at_ms,
                    }
                },
            ))
    }
}

fn current_version_tx(
    tx: &Transaction<'_>,
    workspace: &str,
    kind: VersionedKind,
    scope_key: &str,
) -> Result<Option<VersionRow>, StoreError> {
    Ok(tx
        .query_row(
            r#"
            SELECT id, scope_key, record_json, superseded_by, created_at_ms
            FROM versioned_records
            WHERE workspace=?1 AND kind=?2 AND scope_key=?3 AND is_current=1
            "#,
            params![workspace, kind.as_str(), scope_key],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()?
        .map(
            |(id, scope_key, record_json, superseded_by, created_at_ms)| VersionRow {
                kind,
                id,
                scope_key,
                record_json,
                is_current: true,
                superseded_by,
                created_at_ms,
            },
        ))
}
