#![forbid(unsafe_code)]

use super::*;
use tl_core::model::ToolRunStatus;

impl SqliteStore {
    /// Opens a tool-run record in `running` state. Every external call is
    /// logged, including ones that later fail; a failed call is still evidence
    /// of what was attempted.
    pub fn start_tool_run(&mut self, request: StartToolRunRequest) -> Result<ToolRunRow, StoreError> {
        let workspace = canonical_workspace(&request.workspace_id)?;
        if request.tool_name.trim().is_empty() {
            return Err(StoreError::InvalidInput("tool_name must not be empty"));
        }
        ensure_json("inputs_json", &request.inputs_json)?;

        let now_ms = now_ms();
        let tx = self.conn.transaction()?;
        ensure_workspace_tx(&tx, &workspace, now_ms)?;

        let seq = next_counter_tx(&tx, &workspace, "tool_run_seq")?;
        let id = format!("TOOL-{seq:03}");

        tx.execute(
            r#"
            INSERT INTO tool_runs(workspace, id, tool_name, status, inputs_json, started_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                workspace,
                id,
                request.tool_name.trim(),
                ToolRunStatus::Running.as_str(),
                request.inputs_json,
                now_ms
            ],
        )?;

        tx.commit()?;
        Ok(ToolRunRow {
            id,
            tool_name: request.tool_name.trim().to_string(),
            status: ToolRunStatus::Running,
            inputs_json: request.inputs_json,
            outputs_json: None,
            confidence_hint: None,
            uncertainty_note: None,
            started_at_ms: now_ms,
            ended_at_ms: None,
        })
    }

    /// Closes a running tool run as succeeded or failed. Terminal runs are
    /// immutable, so completing twice is rejected rather than overwritten.
    pub fn complete_tool_run(
        &mut self,
        request: CompleteToolRunRequest,
    ) -> Result<ToolRunRow, StoreError> {
        if !matches!(
            request.status,
            ToolRunStatus::Succeeded | ToolRunStatus::Failed
        ) {
            return Err(StoreError::InvalidInput(
                "complete status must be succeeded or failed",
            ));
        }
        ensure_json("outputs_json", &request.outputs_json)?;
        if let Some(hint) = request.confidence_hint
            && !(0.0..=1.0).contains(&hint)
        {
            return Err(StoreError::InvalidInput(
                "confidence_hint must be within 0.0..=1.0",
            ));
        }

        let workspace = canonical_workspace(&request.workspace_id)?;
        let tool_run_id = canonical_id("tool_run_id", &request.tool_run_id)?;
        let now_ms = now_ms();
        let tx = self.conn.transaction()?;

        let current = tool_run_status_tx(&tx, &workspace, &tool_run_id)?;
        if current.is_terminal() {
            return Err(StoreError::ToolRunClosed {
                id: tool_run_id,
                status: current.as_str(),
            });
        }

        tx.execute(
            r#"
            UPDATE tool_runs
            SET status=?3, outputs_json=?4, confidence_hint=?5, uncertainty_note=?6, ended_at_ms=?7
            WHERE workspace=?1 AND id=?2
            "#,
            params![
                workspace,
                tool_run_id,
                request.status.as_str(),
                request.outputs_json,
                request.confidence_hint,
                request.uncertainty_note,
                now_ms
            ],
        )?;

        let row = read_tool_run_tx(&tx, &workspace, &tool_run_id)?;
        tx.commit()?;
        row.ok_or(StoreError::UnknownToolRun)
    }

    /// Explicit cancellation: marks a running tool run `abandoned`. The row is
    /// never deleted; timeout policy lives with the external invoker.
    pub fn cancel_tool_run(
        &mut self,
        request: CancelToolRunRequest,
    ) -> Result<ToolRunRow, StoreError> {
        let workspace = canonical_workspace(&request.workspace_id)?;
        let tool_run_id = canonical_id("tool_run_id", &request.tool_run_id)?;
        let now_ms = now_ms();
        let tx = self.conn.transaction()?;

        let current = tool_run_status_tx(&tx, &workspace, &tool_run_id)?;
        if current.is_terminal() {
            return Err(StoreError::ToolRunClosed {
                id: tool_run_id,
                status: current.as_str(),
            });
        }

        tx.execute(
            "UPDATE tool_runs SET status=?3, uncertainty_note=?4, ended_at_ms=?5 \
             WHERE workspace=?1 AND id=?2",
            params![
                workspace,
                tool_run_id,
                ToolRunStatus::Abandoned.as_str(),
                request.note,
                now_ms
            ],
        )?;

        let row = read_tool_run_tx(&tx, &workspace, &tool_run_id)?;
        tx.commit()?;
        row.ok_or(StoreError::UnknownToolRun)
    }

    pub fn get_tool_run(
        &mut self,
        workspace_id: &str,
        tool_run_id: &str,
    ) -> Result<Option<ToolRunRow>, StoreError> {
        let workspace = canonical_workspace(workspace_id)?;
        let tool_run_id = canonical_id("tool_run_id", tool_run_id)?;
        let tx = self.conn.transaction()?;
        let row = read_tool_run_tx(&tx, &workspace, &tool_run_id)?;
        tx.commit()?;
        Ok(row)
    }
}

fn tool_run_status_tx(
    tx: &Transaction<'_>,
    workspace: &str,
    tool_run_id: &str,
) -> Result<ToolRunStatus, StoreError> {
    let raw = tx
        .query_row(
            "SELECT status FROM tool_runs WHERE workspace=?1 AND id=?2",
            params![workspace, tool_run_id],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    match raw {
        Some(value) => ToolRunStatus::from_str(&value)
            .ok_or(StoreError::InvalidInput("invalid tool run status row")),
        None => Err(StoreError::UnknownToolRun),
    }
}

pub(in crate::store) fn read_tool_run_tx(
    tx: &Transaction<'_>,
    workspace: &str,
    tool_run_id: &str,
) -> Result<Option<ToolRunRow>, StoreError> {
    let row = tx
        .query_row(
            r#"
            SELECT id, tool_name, status, inputs_json, outputs_json, confidence_hint,
                   uncertainty_note, started_at_ms, ended_at_ms
            FROM tool_runs WHERE workspace=?1 AND id=?2
            "#,
            params![workspace, tool_run_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<f64>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, Option<i64>>(8)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((
            id,
            tool_name,
            status_raw,
            inputs_json,
            outputs_json,
            confidence_hint,
            uncertainty_note,
            started_at_ms,
            ended_at_ms,
        )) => Ok(Some(ToolRunRow {
            id,
            tool_name,
            status: ToolRunStatus::from_str(&status_raw)
                .ok_or(StoreError::InvalidInput("invalid tool run status row"))?,
            inputs_json,
            outputs_json,
            confidence_hint,
            uncertainty_note,
            started_at_ms,
            ended_at_ms,
        })),
        None => Ok(None),
    }
}
