#![forbid(unsafe_code)]

use super::*;
use std::collections::BTreeSet;

const MAX_NEIGHBOR_DEPTH: usize = 8;

impl SqliteStore {
    /// Idempotent node upsert: first write wins, later calls return the
    /// existing row untouched.
    pub fn ensure_node(&mut self, request: EnsureNodeRequest) -> Result<NodeRow, StoreError> {
        let workspace = canonical_workspace(&request.workspace_id)?;
        let node_id = canonical_id("node_id", &request.node_id)?;
        if request.node_type.trim().is_empty() {
            return Err(StoreError::InvalidInput("node_type must not be empty"));
        }
        if let Some(props) = request.props_json.as_deref() {
            ensure_json("props_json", props)?;
        }

        let now_ms = now_ms();
        let tx = self.conn.transaction()?;
        ensure_workspace_tx(&tx, &workspace, now_ms)?;

        if let Some(existing) = node_row_tx(&tx, &workspace, &node_id)? {
            tx.commit()?;
            return Ok(existing);
        }

        tx.execute(
            r#"
            INSERT INTO kg_nodes(workspace, id, node_type, props_json, canonical_fk, created_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                workspace,
                node_id,
                request.node_type.trim(),
                request.props_json,
                request.canonical_fk,
                now_ms
            ],
        )?;

        tx.commit()?;
        Ok(NodeRow {
            id: node_id,
            node_type: request.node_type.trim().to_string(),
            props_json: request.props_json,
            canonical_fk: request.canonical_fk,
            created_at_ms: now_ms,
        })
    }

    /// Adds a typed edge. The provenance-mandatory invariant is enforced here,
    /// before any SQL runs: an edge citing neither an evidence ref nor a tool
    /// run is rejected regardless of storage backend. Endpoint nodes are
    /// created lazily as bare `entity` nodes.
    pub fn add_edge(&mut self, request: AddEdgeRequest) -> Result<EdgeRow, StoreError> {
        if request.evidence_id.is_none() && request.tool_run_id.is_none() {
            return Err(StoreError::ProvenanceMissing);
        }
        let workspace = canonical_workspace(&request.workspace_id)?;
        let src_id = canonical_id("node_id", &request.src_id)?;
        let dst_id = canonical_id("node_id", &request.dst_id)?;
        if request.edge_type.trim().is_empty() {
            return Err(StoreError::InvalidInput("edge_type must not be empty"));
        }
        if let Some(props) = request.props_json.as_deref() {
            ensure_json("props_json", props)?;
        }

        let now_ms = now_ms();
        let tx = self.conn.transaction()?;
        ensure_workspace_tx(&tx, &workspace, now_ms)?;

        if let Some(evidence_id) = request.evidence_id.as_deref()
            && !evidence_exists_tx(&tx, &workspace, evidence_id)?
        {
            return Err(StoreError::DanglingReference {
                kind: "evidence",
                id: evidence_id.to_string(),
            });
        }
        if let Some(tool_run_id) = request.tool_run_id.as_deref()
            && !tool_run_exists_tx(&tx, &workspace, tool_run_id)?
        {
            return Err(StoreError::DanglingReference {
                kind: "tool_run",
                id: tool_run_id.to_string(),
            });
        }

        ensure_node_lazy_tx(&tx, &workspace, &src_id, now_ms)?;
        if dst_id != src_id {
            ensure_node_lazy_tx(&tx, &workspace, &dst_id, now_ms)?;
        }

        let seq = next_counter_tx(&tx, &workspace, "edge_seq")?;
        let id = format!("EDGE-{seq:03}");

        tx.execute(
            r#"
            INSERT INTO kg_edges(workspace, id, src_id, dst_id, edge_type, props_json, evidence_id, tool_run_id, created_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                workspace,
                id,
                src_id,
                dst_id,
                request.edge_type.trim(),
                request.props_json,
                request.evidence_id,
                request.tool_run_id,
                now_ms
            ],
        )?;

        tx.commit()?;
        Ok(EdgeRow {
            id,
            src_id,
            dst_id,
            edge_type: request.edge_type.trim().to_string(),
            props_json: request.props_json,
            evidence_id: request.evidence_id,
            tool_run_id: request.tool_run_id,
            created_at_ms: now_ms,
        })
    }

    /// Breadth-first neighborhood, bounded by depth and result count so
    /// pathological cycles never produce unbounded walks. Edges are traversed
    /// in both directions.
    pub fn neighbors(
        &mut self,
        request: NeighborsRequest,
    ) -> Result<Vec<(EdgeRow, NodeRow)>, StoreError> {
        let workspace = canonical_workspace(&request.workspace_id)?;
        let node_id = canonical_id("node_id", &request.node_id)?;
        let depth = request.depth.clamp(1, MAX_NEIGHBOR_DEPTH);
        let limit = request.limit.clamp(1, 500);

        let tx = self.conn.transaction()?;
        if node_row_tx(&tx, &workspace, &node_id)?.is_none() {
            return Err(StoreError::UnknownNode);
        }

        let mut out: Vec<(EdgeRow, NodeRow)> = Vec::new();
        let mut seen_edges = BTreeSet::new();
        let mut visited = BTreeSet::new();
        visited.insert(node_id.clone());
        let mut frontier = vec![node_id];

        for _ in 0..depth {
            if frontier.is_empty() || out.len() >= limit {
                break;
            }
            let mut next_frontier = Vec::new();
            for current in &frontier {
                let edges =
                    incident_edges_tx(&tx, &workspace, current, request.edge_type.as_deref())?;
                for edge in edges {
                    if out.len() >= limit {
                        break;
                    }
                    if !seen_edges.insert(edge.id.clone()) {
                        continue;
                    }
                    let other_id = if edge.src_id == *current {
                        edge.dst_id.clone()
                    } else {
                        edge.src_id.clone()
                    };
                    let Some(other) = node_row_tx(&tx, &workspace, &other_id)? else {
                        continue;
                    };
                    if visited.insert(other_id.clone()) {
                        next_frontier.push(other_id);
                    }
                    out.push((edge, other));
                }
            }
            frontier = next_frontier;
        }

        tx.commit()?;
        Ok(out)
    }

    pub fn get_node(
        &mut self,
        workspace_id: &str,
        node_id: &str,
    ) -> Result<Option<NodeRow>, StoreError> {
        let workspace = canonical_workspace(workspace_id)?;
        let node_id = canonical_id("node_id", node_id)?;
        let tx = self.conn.transaction()?;
        let row = node_row_tx(&tx, &workspace, &node_id)?;
        tx.commit()?;
        Ok(row)
    }
}

fn ensure_node_lazy_tx(
    tx: &Transaction<'_>,
    workspace: &str,
    node_id: &str,
    now_ms: i64,
) -> Result<(), StoreError> {
    tx.execute(
        "INSERT OR IGNORE INTO kg_nodes(workspace, id, node_type, created_at_ms) \
         VALUES (?1, ?2, 'entity', ?3)",
        params![workspace, node_id, now_ms],
    )?;
    Ok(())
}

fn node_row_tx(
    tx: &Transaction<'_>,
    workspace: &str,
    node_id: &str,
) -> Result<Option<NodeRow>, StoreError> {
    Ok(tx
        .query_row(
            "SELECT id, node_type, props_json, canonical_fk, created_at_ms \
             FROM kg_nodes WHERE workspace=?1 AND id=?2",
            params![workspace, node_id],
            |row| {
                Ok(NodeRow {
                    id: row.get(0)?,
                    node_type: row.get(1)?,
                    props_json: row.get(2)?,
                    canonical_fk: row.get(3)?,
                    created_at_ms: row.get(4)?,
                })
            },
        )
        .optional()?)
}

fn incident_edges_tx(
    tx: &Transaction<'_>,
    workspace: &str,
    node_id: &str,
    edge_type: Option<&str>,
) -> Result<Vec<EdgeRow>, StoreError> {
    let mut stmt = tx.prepare(
        r#"
        SELECT id, src_id, dst_id, edge_type, props_json, evidence_id, tool_run_id, created_at_ms
        FROM kg_edges
        WHERE workspace=?1 AND (src_id=?2 OR dst_id=?2)
          AND (?3 IS NULL OR edge_type=?3)
        ORDER BY id ASC
        "#,
    )?;
    let mut rows = stmt.query(params![workspace, node_id, edge_type])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(EdgeRow {
            id: row.get(0)?,
            src_id: row.get(1)?,
            dst_id: row.get(2)?,
            edge_type: row.get(3)?,
            props_json: row.get(4)?,
            evidence_id: row.get(5)?,
            tool_run_id: row.get(6)?,
            created_at_ms: row.get(7)?,
        });
    }
    Ok(out)
}
