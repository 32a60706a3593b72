#![forbid(unsafe_code)]

use super::*;

impl SqliteStore {
    /// Creates one execution of the reasoning sequence. Runs are immutable;
    /// everything else in the ledger hangs off the id returned here.
    pub fn create_run(&mut self, request: CreateRunRequest) -> Result<RunRow, StoreError> {
        let workspace = canonical_workspace(&request.workspace_id)?;
        if request.profile.trim().is_empty() {
            return Err(StoreError::InvalidInput("profile must not be empty"));
        }
        if let Some(anchor) = request.anchor_json.as_deref() {
            ensure_json("anchor_json", anchor)?;
        }

        let now_ms = now_ms();
        let tx = self.conn.transaction()?;
        ensure_workspace_tx(&tx, &workspace, now_ms)?;

        let seq = next_counter_tx(&tx, &workspace, "run_seq")?;
        let id = format!("RUN-{seq:03}");

        tx.execute(
            "INSERT INTO runs(workspace, id, profile, anchor_json, created_at_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                workspace,
                id,
                request.profile.trim(),
                request.anchor_json,
                now_ms
            ],
        )?;

        insert_audit_tx(
            &tx,
            &workspace,
            now_ms,
            "run_created",
            request.actor.actor_type,
            &request.actor.actor_id,
            Some(&id),
            None,
            None,
            &serde_json::json!({ "run_id": id }).to_string(),
        )?;

        tx.commit()?;
        Ok(RunRow {
            id,
            profile: request.profile.trim().to_string(),
            anchor_json: request.anchor_json,
            created_at_ms: now_ms,
        })
    }

    pub fn get_run(&self, workspace_id: &str, run_id: &str) -> Result<Option<RunRow>, StoreError> {
        let workspace = canonical_workspace(workspace_id)?;
        let run_id = canonical_id("run_id", run_id)?;
        Ok(self
            .conn
            .query_row(
                "SELECT id, profile, anchor_json, created_at_ms \
                 FROM runs WHERE workspace=?1 AND id=?2",
                params![workspace, run_id],
                |row| {
                    Ok(RunRow {
                        id: row.get(0)?,
                        profile: row.get(1)?,
                        anchor_json: row.get(2)?,
                        created_at_ms: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn list_runs(
        &self,
        workspace_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RunRow>, StoreError> {
        let workspace = canonical_workspace(workspace_id)?;
        let limit = to_sqlite_i64(limit.clamp(1, 500))?;
        let offset = to_sqlite_i64(offset)?;

        let mut stmt = self.conn.prepare(
            "SELECT id, profile, anchor_json, created_at_ms \
             FROM runs WHERE workspace=?1 \
             ORDER BY created_at_ms ASC, id ASC \
             LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(params![workspace, limit, offset], |row| {
            Ok(RunRow {
                id: row.get(0)?,
                profile: row.get(1)?,
                anchor_json: row.get(2)?,
                created_at_ms: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
