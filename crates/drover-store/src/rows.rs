//! Conversion between SQLite rows and domain records

use crate::StoreError;
use drover_domain::{
    AnalysisResult, Claim, ClaimId, ClaimPhase, Entity, EntityId, EscalationState,
    EscalationStatus, HistoryEntry, LifecycleState, Objection, RawPayload, Verdict, WorkerId,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Column list shared by every entity query, in `EntityRow::from_row` order
pub(crate) const ENTITY_COLUMNS: &str = "id, state, attempts, payload_body, payload_meta, \
     failure_reason, claim_id, claim_worker, claim_phase, claim_issued_at, lease_expires_at, \
     esc_status, esc_cycle, esc_objections, version, created_at, updated_at";

/// Everything in a payload except the opaque body
#[derive(Serialize, Deserialize)]
struct PayloadMeta {
    source_ids: BTreeSet<String>,
    #[serde(default)]
    missing_sections: BTreeSet<String>,
    #[serde(default)]
    data_quality: Option<f64>,
}

/// Raw column values of one `entities` row
pub(crate) struct EntityRow {
    id: String,
    state: String,
    attempts: i64,
    payload_body: Option<Vec<u8>>,
    payload_meta: Option<String>,
    failure_reason: Option<String>,
    claim_id: Option<Vec<u8>>,
    claim_worker: Option<String>,
    claim_phase: Option<String>,
    claim_issued_at: Option<i64>,
    lease_expires_at: Option<i64>,
    esc_status: String,
    esc_cycle: i64,
    esc_objections: String,
    version: i64,
    created_at: i64,
    updated_at: i64,
}

impl EntityRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            state: row.get(1)?,
            attempts: row.get(2)?,
            payload_body: row.get(3)?,
            payload_meta: row.get(4)?,
            failure_reason: row.get(5)?,
            claim_id: row.get(6)?,
            claim_worker: row.get(7)?,
            claim_phase: row.get(8)?,
            claim_issued_at: row.get(9)?,
            lease_expires_at: row.get(10)?,
            esc_status: row.get(11)?,
            esc_cycle: row.get(12)?,
            esc_objections: row.get(13)?,
            version: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }

    pub(crate) fn into_entity(self) -> Result<Entity, StoreError> {
        let id = EntityId::new(self.id);

        let state = LifecycleState::parse(&self.state)
            .ok_or_else(|| StoreError::InvalidData(format!("Unknown state: {}", self.state)))?;

        let payload = match (self.payload_body, self.payload_meta) {
            (Some(body), Some(meta)) => {
                let meta: PayloadMeta = serde_json::from_str(&meta)?;
                Some(RawPayload {
                    body,
                    source_ids: meta.source_ids,
                    missing_sections: meta.missing_sections,
                    data_quality: meta.data_quality,
                })
            }
            (None, None) => None,
            _ => {
                return Err(StoreError::InvalidData(format!(
                    "Half-written payload on entity {}",
                    id
                )))
            }
        };

        let claim = match self.claim_id {
            None => None,
            Some(bytes) => {
                let phase_text = self.claim_phase.unwrap_or_default();
                let phase = ClaimPhase::parse(&phase_text).ok_or_else(|| {
                    StoreError::InvalidData(format!("Unknown claim phase: {}", phase_text))
                })?;
                Some(Claim {
                    id: bytes_to_claim_id(&bytes)?,
                    entity_id: id.clone(),
                    worker_id: WorkerId::new(self.claim_worker.unwrap_or_default()),
                    phase,
                    issued_at: self.claim_issued_at.unwrap_or(0) as u64,
                    lease_expires_at: self.lease_expires_at.unwrap_or(0) as u64,
                })
            }
        };

        let status = EscalationStatus::parse(&self.esc_status).ok_or_else(|| {
            StoreError::InvalidData(format!("Unknown escalation status: {}", self.esc_status))
        })?;
        let objections: Vec<Objection> = serde_json::from_str(&self.esc_objections)?;

        Ok(Entity {
            escalation: EscalationState {
                entity_id: id.clone(),
                cycle: self.esc_cycle as u32,
                status,
                objections,
            },
            id,
            state,
            attempts: self.attempts as u32,
            payload,
            failure_reason: self.failure_reason,
            claim,
            version: self.version as u64,
            created_at: self.created_at as u64,
            updated_at: self.updated_at as u64,
        })
    }
}

/// Convert ClaimId to bytes for storage
pub(crate) fn claim_id_to_bytes(id: ClaimId) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

/// Convert bytes to ClaimId
pub(crate) fn bytes_to_claim_id(bytes: &[u8]) -> Result<ClaimId, StoreError> {
    let arr: [u8; 16] = bytes.try_into().map_err(|_| {
        StoreError::InvalidData(format!("Expected 16 bytes for ClaimId, got {}", bytes.len()))
    })?;
    Ok(ClaimId::from(u128::from_be_bytes(arr)))
}

/// Load one entity
pub(crate) fn load_entity(conn: &Connection, id: &EntityId) -> Result<Option<Entity>, StoreError> {
    let sql = format!("SELECT {} FROM entities WHERE id = ?1", ENTITY_COLUMNS);
    conn.query_row(&sql, params![id.as_str()], EntityRow::from_row)
        .optional()?
        .map(EntityRow::into_entity)
        .transpose()
}

/// Write every mutable column of `entity` back, guarded by its version
///
/// Returns false when the row changed since `entity` was read.
pub(crate) fn persist_entity(conn: &Connection, entity: &Entity, now: u64) -> Result<bool, StoreError> {
    let (payload_body, payload_meta) = match &entity.payload {
        Some(payload) => {
            let meta = PayloadMeta {
                source_ids: payload.source_ids.clone(),
                missing_sections: payload.missing_sections.clone(),
                data_quality: payload.data_quality,
            };
            (Some(payload.body.clone()), Some(serde_json::to_string(&meta)?))
        }
        None => (None, None),
    };
    let claim = entity.claim.as_ref();
    let objections = serde_json::to_string(&entity.escalation.objections)?;

    let changed = conn.execute(
        "UPDATE entities SET
            state = ?1, attempts = ?2, payload_body = ?3, payload_meta = ?4,
            failure_reason = ?5, claim_id = ?6, claim_worker = ?7, claim_phase = ?8,
            claim_issued_at = ?9, lease_expires_at = ?10, esc_status = ?11,
            esc_cycle = ?12, esc_objections = ?13, version = version + 1, updated_at = ?14
         WHERE id = ?15 AND version = ?16",
        params![
            entity.state.as_str(),
            entity.attempts as i64,
            payload_body,
            payload_meta,
            entity.failure_reason,
            claim.map(|c| claim_id_to_bytes(c.id)),
            claim.map(|c| c.worker_id.as_str().to_string()),
            claim.map(|c| c.phase.as_str()),
            claim.map(|c| c.issued_at as i64),
            claim.map(|c| c.lease_expires_at as i64),
            entity.escalation.status.as_str(),
            entity.escalation.cycle as i64,
            objections,
            now as i64,
            entity.id.as_str(),
            entity.version as i64,
        ],
    )?;
    Ok(changed == 1)
}

/// Load the history of one entity, oldest first
pub(crate) fn load_history(conn: &Connection, id: &EntityId) -> Result<Vec<HistoryEntry>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT seq, cycle, result, verdict, recorded_at FROM history
         WHERE entity_id = ?1 ORDER BY seq ASC",
    )?;
    let rows = stmt.query_map(params![id.as_str()], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, i64>(4)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (seq, cycle, result, verdict, recorded_at) = row?;
        let result: AnalysisResult = serde_json::from_str(&result)?;
        let verdict: Option<Verdict> = verdict.map(|v| serde_json::from_str(&v)).transpose()?;
        entries.push(HistoryEntry {
            seq: seq as u64,
            cycle: cycle as u32,
            result,
            verdict,
            recorded_at: recorded_at as u64,
        });
    }
    Ok(entries)
}

/// Sequence number of the newest result still awaiting its verdict
pub(crate) fn latest_unjudged(conn: &Connection, id: &EntityId) -> Result<Option<u64>, StoreError> {
    let seq: Option<i64> = conn
        .query_row(
            "SELECT seq FROM history WHERE entity_id = ?1 AND verdict IS NULL
             ORDER BY seq DESC LIMIT 1",
            params![id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(seq.map(|s| s as u64))
}
