#![forbid(unsafe_code)]

use super::*;
use tl_core::model::{EvidenceRole, MoveStatus, MoveType};

impl SqliteStore {
    /// Appends one reasoning step to a run's ledger.
    ///
    /// The sequence number is minted here, inside the write transaction, so it
    /// is strictly increasing per run without caller coordination. Backtracking
    /// records a reference to the superseded move; the original row is never
    /// touched. Any dangling evidence or tool-run citation rejects the whole
    /// append.
    pub fn append_move(&mut self, request: AppendMoveRequest) -> Result<MoveEventRow, StoreError> {
        let workspace = canonical_workspace(&request.workspace_id)?;
        let run_id = canonical_id("run_id", &request.run_id)?;
        for field in [
            ("inputs_json", request.inputs_json.as_deref()),
            ("outputs_json", request.outputs_json.as_deref()),
            ("assumptions_json", request.assumptions_json.as_deref()),
            ("uncertainties_json", request.uncertainties_json.as_deref()),
        ] {
            if let (name, Some(value)) = field {
                ensure_json(name, value)?;
            }
        }
        if request.backtrack_of_seq.is_none() && request.backtrack_reason.is_some() {
            return Err(StoreError::InvalidInput(
                "backtrack_reason requires backtrack_of_seq",
            ));
        }

        let now_ms = now_ms();
        let tx = self.conn.transaction()?;
        ensure_run_exists_tx(&tx, &workspace, &run_id)?;

        if let Some(target_seq) = request.backtrack_of_seq {
            let target_exists = tx
                .query_row(
                    "SELECT 1 FROM move_events WHERE workspace=?1 AND run_id=?2 AND seq=?3",
                    params![workspace, run_id, target_seq],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?
                .is_some();
            if !target_exists {
                return Err(StoreError::UnknownMove);
            }
        }

        for link in &request.evidence {
            if !evidence_exists_tx(&tx, &workspace, &link.evidence_id)? {
                return Err(StoreError::DanglingReference {
                    kind: "evidence",
                    id: link.evidence_id.clone(),
                });
            }
        }
        for tool_run_id in &request.tool_run_ids {
            if !tool_run_exists_tx(&tx, &workspace, tool_run_id)? {
                return Err(StoreError::DanglingReference {
                    kind: "tool_run",
                    id: tool_run_id.clone(),
                });
            }
        }

        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM move_events WHERE workspace=?1 AND run_id=?2",
            params![workspace, run_id],
            |row| row.get(0),
        )?;

        tx.execute(
            r#"
            INSERT INTO move_events(workspace, run_id, seq, move_type, status, inputs_json, outputs_json,
                                    assumptions_json, uncertainties_json, backtrack_of_seq, backtrack_reason, created_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                workspace,
                run_id,
                seq,
                request.move_type.as_str(),
                request.status.as_str(),
                request.inputs_json,
                request.outputs_json,
                request.assumptions_json,
                request.uncertainties_json,
                request.backtrack_of_seq,
                request.backtrack_reason,
                now_ms
            ],
        )?;

        for link in &request.evidence {
            tx.execute(
                "INSERT INTO move_evidence_links(workspace, run_id, seq, evidence_id, role, note) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    workspace,
                    run_id,
                    seq,
                    link.evidence_id,
                    link.role.as_str(),
                    link.note
                ],
            )?;
        }
        for tool_run_id in &request.tool_run_ids {
            tx.execute(
                "INSERT INTO move_tool_links(workspace, run_id, seq, tool_run_id) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![workspace, run_id, seq, tool_run_id],
            )?;
        }

        let audit_payload = serde_json::json!({
            "run_id": run_id,
            "seq": seq,
            "move_type": request.move_type.as_str(),
            "backtrack_of_seq": request.backtrack_of_seq,
        });
        insert_audit_tx(
            &tx,
            &workspace,
            now_ms,
            "move_appended",
            request.actor.actor_type,
            &request.actor.actor_id,
            Some(&run_id),
            None,
            None,
            &audit_payload.to_string(),
        )?;

        tx.commit()?;
        Ok(MoveEventRow {
            run_id,
            seq,
            move_type: request.move_type,
            status: request.status,
            inputs_json: request.inputs_json,
            outputs_json: request.outputs_json,
            assumptions_json: request.assumptions_json,
            uncertainties_json: request.uncertainties_json,
            backtrack_of_seq: request.backtrack_of_seq,
            backtrack_reason: request.backtrack_reason,
            evidence: request
                .evidence
                .into_iter()
                .map(|link| EvidenceLinkRow {
                    evidence_id: link.evidence_id,
                    role: link.role,
                    note: link.note,
                })
                .collect(),
            tool_run_ids: request.tool_run_ids,
            created_at_ms: now_ms,
        })
    }

    /// Full history, ascending by sequence. Backtracked-from moves stay
    /// visible; the ledger never rewrites.
    pub fn list_moves(&mut self, request: ListMovesRequest) -> Result<Vec<MoveEventRow>, StoreError> {
        let workspace = canonical_workspace(&request.workspace_id)?;
        let run_id = canonical_id("run_id", &request.run_id)?;
        let since_seq = request.since_seq.unwrap_or(0);
        let limit = to_sqlite_i64(request.limit.clamp(1, 500))?;

        let tx = self.conn.transaction()?;
        ensure_run_exists_tx(&tx, &workspace, &run_id)?;

        let mut out = Vec::new();
        {
            let mut stmt = tx.prepare(
                r#"
                SELECT seq, move_type, status, inputs_json, outputs_json, assumptions_json,
                       uncertainties_json, backtrack_of_seq, backtrack_reason, created_at_ms
                FROM move_events
                WHERE workspace=?1 AND run_id=?2 AND seq > ?3
                ORDER BY seq ASC
                LIMIT ?4
                "#,
            )?;
            let mut rows = stmt.query(params![workspace, run_id, since_seq, limit])?;
            while let Some(row) = rows.next()? {
                out.push(read_move_row(&run_id, row)?);
            }
        }

        for event in &mut out {
            event.evidence = move_evidence_links_tx(&tx, &workspace, &run_id, event.seq)?;
            event.tool_run_ids = move_tool_links_tx(&tx, &workspace, &run_id, event.seq)?;
        }

        tx.commit()?;
        Ok(out)
    }

    pub fn get_move(
        &mut self,
        workspace_id: &str,
        run_id: &str,
        seq: i64,
    ) -> Result<Option<MoveEventRow>, StoreError> {
        let workspace = canonical_workspace(workspace_id)?;
        let run_id = canonical_id("run_id", run_id)?;

        let tx = self.conn.transaction()?;
        let event = {
            let mut stmt = tx.prepare(
                r#"
                SELECT seq, move_type, status, inputs_json, outputs_json, assumptions_json,
                       uncertainties_json, backtrack_of_seq, backtrack_reason, created_at_ms
                FROM move_events
                WHERE workspace=?1 AND run_id=?2 AND seq=?3
                "#,
            )?;
            let mut rows = stmt.query(params![workspace, run_id, seq])?;
            match rows.next()? {
                Some(row) => Some(read_move_row(&run_id, row)?),
                None => None,
            }
        };

        let Some(mut event) = event else {
            tx.commit()?;
            return Ok(None);
        };

        event.evidence = move_evidence_links_tx(&tx, &workspace, &run_id, event.seq)?;
        event.tool_run_ids = move_tool_links_tx(&tx, &workspace, &run_id, event.seq)?;
        tx.commit()?;
        Ok(Some(event))
    }
}

fn read_move_row(run_id: &str, row: &rusqlite::Row<'_>) -> Result<MoveEventRow, StoreError> {
    let move_type_raw = row.get::<_, String>(1)?;
    let status_raw = row.get::<_, String>(2)?;
    Ok(MoveEventRow {
        run_id: run_id.to_string(),
        seq: row.get(0)?,
        move_type: MoveType::from_str(&move_type_raw)
            .ok_or(StoreError::InvalidInput("invalid move type row"))?,
        status: MoveStatus::from_str(&status_raw)
            .ok_or(StoreError::InvalidInput("invalid move status row"))?,
        inputs_json: row.get(3)?,
        outputs_json: row.get(4)?,
        assumptions_json: row.get(5)?,
        uncertainties_json: row.get(6)?,
        backtrack_of_seq: row.get(7)?,
        backtrack_reason: row.get(8)?,
        evidence: Vec::new(),
        tool_run_ids: Vec::new(),
        created_at_ms: row.get(9)?,
    })
}

pub(in crate::store) fn move_evidence_links_tx(
    tx: &Transaction<'_>,
    workspace: &str,
    run_id: &str,
    seq: i64,
) -> Result<Vec<EvidenceLinkRow>, StoreError> {
    let mut stmt = tx.prepare(
        "SELECT evidence_id, role, note FROM move_evidence_links \
         WHERE workspace=?1 AND run_id=?2 AND seq=?3 \
         ORDER BY evidence_id ASC, role ASC",
    )?;
    let mut rows = stmt.query(params![workspace, run_id, seq])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let role_raw = row.get::<_, String>(1)?;
        out.push(EvidenceLinkRow {
            evidence_id: row.get(0)?,
            role: EvidenceRole::from_str(&role_raw)
                .ok_or(StoreError::InvalidInput("invalid evidence role row"))?,
            note: row.get(2)?,
        });
    }
    Ok(out)
}

pub(in crate::store) fn move_tool_links_tx(
    tx: &Transaction<'_>,
    workspace: &str,
    run_id: &str,
    seq: i64,
) -> Result<Vec<String>, StoreError> {
    let mut stmt = tx.prepare(
        "SELECT tool_run_id FROM move_tool_links \
         WHERE workspace=?1 AND run_id=?2 AND seq=?3 \
         ORDER BY tool_run_id ASC",
    )?;
    let mut rows = stmt.query(params![workspace, run_id, seq])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(row.get::<_, String>(0)?);
    }
    Ok(out)
}
