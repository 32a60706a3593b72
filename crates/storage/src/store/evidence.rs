#![forbid(unsafe_code)]

use super::*;

impl SqliteStore {
    /// Idempotent upsert keyed by the (source_type, source_id, fragment_id)
    /// triple: first write wins, later calls return the existing row. This is
    /// the one write collaborators may retry blindly.
    pub fn ensure_evidence_ref(
        &mut self,
        request: EnsureEvidenceRequest,
    ) -> Result<EvidenceRefRow, StoreError> {
        let workspace = canonical_workspace(&request.workspace_id)?;
        let source_type = canonical_id("source_type", request.source_type.as_str())?;
        let source_id = canonical_id("source_id", request.source_id.as_str())?;
        let fragment_id = canonical_id("fragment_id", request.fragment_id.as_str())?;

        let now_ms = now_ms();
        let tx = self.conn.transaction()?;
        ensure_workspace_tx(&tx, &workspace, now_ms)?;

        if let Some(existing) =
            evidence_by_triple_tx(&tx, &workspace, &source_type, &source_id, &fragment_id)?
        {
            tx.commit()?;
            return Ok(existing);
        }

        let seq = next_counter_tx(&tx, &workspace, "evidence_seq")?;
        let id = format!("EV-{seq:03}");

        let insert = tx.execute(
            r#"
            INSERT INTO evidence_refs(workspace, id, source_type, source_id, fragment_id, created_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![workspace, id, source_type, source_id, fragment_id, now_ms],
        );

        // Another process may have won the triple between check and insert;
        // first write wins, return the existing row.
        if let Err(err) = insert {
            if is_constraint_violation(&err)
                && let Some(existing) =
                    evidence_by_triple_tx(&tx, &workspace, &source_type, &source_id, &fragment_id)?
            {
                tx.commit()?;
                return Ok(existing);
            }
            return Err(StoreError::Sql(err));
        }

        tx.commit()?;
        Ok(EvidenceRefRow {
            id,
            source_type,
            source_id,
            fragment_id,
            created_at_ms: now_ms,
        })
    }

    pub fn get_evidence_ref(
        &self,
        workspace_id: &str,
        evidence_id: &str,
    ) -> Result<Option<EvidenceRefRow>, StoreError> {
        let workspace = canonical_workspace(workspace_id)?;
        let evidence_id = canonical_id("evidence_id", evidence_id)?;
        Ok(self
            .conn
            .query_row(
                "SELECT id, source_type, source_id, fragment_id, created_at_ms \
                 FROM evidence_refs WHERE workspace=?1 AND id=?2",
                params![workspace, evidence_id],
                |row| {
                    Ok(EvidenceRefRow {
                        id: row.get(0)?,
                        source_type: row.get(1)?,
                        source_id: row.get(2)?,
                        fragment_id: row.get(3)?,
                        created_at_ms: row.get(4)?,
                    })
                },
            )
            .optional()?)
    }
}

fn evidence_by_triple_tx(
    tx: &Transaction<'_>,
    workspace: &str,
    source_type: &str,
    source_id: &str,
    fragment_id: &str,
) -> Result<Option<EvidenceRefRow>, StoreError> {
    Ok(tx
        .query_row(
            "SELECT id, source_type, source_id, fragment_id, created_at_ms \
             FROM evidence_refs \
             WHERE workspace=?1 AND source_type=?2 AND source_id=?3 AND fragment_id=?4",
            params![workspace, source_type, source_id, fragment_id],
            |row| {
                Ok(EvidenceRefRow {
                    id: row.get(0)?,
                    source_type: row.get(1)?,
                    source_id: row.get(2)?,
                    fragment_id: row.get(3)?,
                    created_at_ms: row.get(4)?,
                })
            },
        )
        .optional()?)
}

pub(in crate::store) fn evidence_row_tx(
    tx: &Transaction<'_>,
    workspace: &str,
    evidence_id: &str,
) -> Result<Option<EvidenceRefRow>, StoreError> {
    Ok(tx
        .query_row(
            "SELECT id, source_type, source_id, fragment_id, created_at_ms \
             FROM evidence_refs WHERE workspace=?1 AND id=?2",
            params![workspace, evidence_id],
            |row| {
                Ok(EvidenceRefRow {
                    id: row.get(0)?,
                    source_type: row.get(1)?,
                    source_id: row.get(2)?,
                    fragment_id: row.get(3)?,
                    created_at_ms: row.get(4)?,
                })
            },
        )
        .optional()?)
}
