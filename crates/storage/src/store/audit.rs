#![forbid(unsafe_code)]

use super::*;
use tl_core::model::ActorType;

impl SqliteStore {
    /// Appends an externally-observed decision (selection, acceptance,
    /// rejection) to the audit log. Internal writers append their own audit
    /// rows inside the same transaction as the state change they describe;
    /// this entry point is for collaborators.
    pub fn append_audit(&mut self, request: AppendAuditRequest) -> Result<AuditRow, StoreError> {
        let workspace = canonical_workspace(&request.workspace_id)?;
        if request.event_type.trim().is_empty() {
            return Err(StoreError::InvalidInput("event_type must not be empty"));
        }
        ensure_json("payload_json", &request.payload_json)?;

        let now_ms = now_ms();
        let tx = self.conn.transaction()?;
        ensure_workspace_tx(&tx, &workspace, now_ms)?;

        if let Some(run_id) = request.run_id.as_deref() {
            ensure_run_exists_tx(&tx, &workspace, run_id)?;
        }
        if let Some(tool_run_id) = request.tool_run_id.as_deref()
            && !tool_run_exists_tx(&tx, &workspace, tool_run_id)?
        {
            return Err(StoreError::DanglingReference {
                kind: "tool_run",
                id: tool_run_id.to_string(),
            });
        }

        let row = insert_audit_tx(
            &tx,
            &workspace,
            now_ms,
            request.event_type.trim(),
            request.actor.actor_type,
            &request.actor.actor_id,
            request.run_id.as_deref(),
            request.scope_key.as_deref(),
            request.tool_run_id.as_deref(),
            &request.payload_json,
        )?;

        tx.commit()?;
        Ok(row)
    }

    pub fn list_audit(&self, request: ListAuditRequest) -> Result<Vec<AuditRow>, StoreError> {
        let workspace = canonical_workspace(&request.workspace_id)?;
        let since_seq = request.since_seq.unwrap_or(0);
        let limit = to_sqlite_i64(request.limit.clamp(1, 500))?;

        let mut stmt = self.conn.prepare(
            r#"
            SELECT seq, ts_ms, event_type, actor_type, actor_id, run_id, scope_key, tool_run_id, payload_json
            FROM audit_events
            WHERE workspace=?1 AND seq > ?2 AND (?3 IS NULL OR run_id=?3)
            ORDER BY seq ASC
            LIMIT ?4
            "#,
        )?;
        let mut rows = stmt.query(params![workspace, since_seq, request.run_id, limit])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(read_audit_row(row)?);
        }
        Ok(out)
    }
}

pub(in crate::store) fn read_audit_row(row: &rusqlite::Row<'_>) -> Result<AuditRow, StoreError> {
    let actor_raw = row.get::<_, String>(3)?;
    Ok(AuditRow {
        seq: row.get(0)?,
        ts_ms: row.get(1)?,
        event_type: row.get(2)?,
        actor_type: ActorType::from_str(&actor_raw)
            .ok_or(StoreError::InvalidInput("invalid actor type row"))?,
        actor_id: row.get(4)?,
        run_id: row.get(5)?,
        scope_key: row.get(6)?,
        tool_run_id: row.get(7)?,
        payload_json: row.get(8)?,
    })
}
