//! `Ledger` implementation for [`SqliteLedger`]

use crate::rows::{
    latest_unjudged, load_entity, load_history, persist_entity, EntityRow, ENTITY_COLUMNS,
};
use crate::{SqliteLedger, StoreError};
use drover_domain::traits::Ledger;
use drover_domain::{
    AnalysisResult, AttentionItem, AttentionReason, Claim, ClaimId, ClaimOutcome, ClaimPhase,
    Entity, EntityId, EscalationState, EscalationStatus, HistoryEntry, LedgerError,
    LifecycleState, ProgressSnapshot, RawPayload, SweepReport, Verdict, WorkerId,
};
use rusqlite::{params, Connection};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Candidates examined per selection round inside `claim`
const CLAIM_BATCH: i64 = 32;

impl Ledger for SqliteLedger {
    fn register(&self, ids: &[EntityId]) -> Result<usize, LedgerError> {
        let inserted = self.write(|conn, now| {
            let mut stmt = conn.prepare(
                "INSERT OR IGNORE INTO entities (id, state, esc_status, created_at, updated_at)
                 VALUES (?1, 'pending', 'collecting', ?2, ?2)",
            )?;
            let mut inserted = 0;
            for id in ids {
                inserted += stmt.execute(params![id.as_str(), now as i64])?;
            }
            Ok(inserted)
        })?;

        info!(requested = ids.len(), inserted, "Registered entities");
        Ok(inserted)
    }

    fn claim(&self, worker: &WorkerId, lease: Duration) -> Result<ClaimOutcome, LedgerError> {
        let lease_ms = lease.as_millis() as u64;
        let max_attempts = self.options.max_attempts;

        let outcome = self.write(|conn, now| loop {
            let candidates = claimable(conn, now)?;
            if candidates.is_empty() {
                return Ok(ClaimOutcome::NoAvailableWork);
            }

            for mut entity in candidates {
                if let Some(expired) = entity.claim.take() {
                    entity.attempts += 1;
                    if entity.attempts >= max_attempts {
                        let reason = format!("Lease expired ({} attempts)", entity.attempts);
                        warn!(
                            entity = %entity.id,
                            previous_worker = %expired.worker_id,
                            attempts = entity.attempts,
                            "Attempts exhausted on takeover; marking failed"
                        );
                        mark_failed(&mut entity, reason);
                        save(conn, &entity, now)?;
                        continue;
                    }
                    debug!(
                        entity = %entity.id,
                        previous_worker = %expired.worker_id,
                        "Taking over expired lease"
                    );
                }

                let phase = match entity.state {
                    LifecycleState::Pending | LifecycleState::Claimed => ClaimPhase::Collection,
                    LifecycleState::Done | LifecycleState::Failed => ClaimPhase::Analysis,
                };
                if phase == ClaimPhase::Collection {
                    entity.state = LifecycleState::Claimed;
                }

                let claim = Claim {
                    id: ClaimId::new(),
                    entity_id: entity.id.clone(),
                    worker_id: worker.clone(),
                    phase,
                    issued_at: now,
                    lease_expires_at: now.saturating_add(lease_ms),
                };
                entity.claim = Some(claim.clone());
                save(conn, &entity, now)?;
                return Ok(ClaimOutcome::Granted(claim));
            }
        })?;

        match &outcome {
            ClaimOutcome::Granted(claim) => debug!(
                entity = %claim.entity_id,
                worker = %worker,
                phase = claim.phase.as_str(),
                claim = %claim.id,
                "Claim granted"
            ),
            ClaimOutcome::NoAvailableWork => debug!(worker = %worker, "No available work"),
        }
        Ok(outcome)
    }

    fn renew(&self, claim: &Claim, lease: Duration) -> Result<Claim, LedgerError> {
        let lease_ms = lease.as_millis() as u64;

        let renewed = self.write(|conn, now| {
            let mut entity = match held_entity(conn, claim, now) {
                Err(StoreError::Ledger(LedgerError::StaleClaim { entity, claim })) => {
                    return Err(LedgerError::ClaimExpired { entity, claim }.into())
                }
                other => other?,
            };

            let mut renewed = claim.clone();
            renewed.lease_expires_at = now.saturating_add(lease_ms);
            entity.claim = Some(renewed.clone());
            save(conn, &entity, now)?;
            Ok(renewed)
        })?;

        debug!(entity = %renewed.entity_id, expires_at = renewed.lease_expires_at, "Lease renewed");
        Ok(renewed)
    }

    fn complete(&self, claim: &Claim, payload: RawPayload) -> Result<(), LedgerError> {
        let cycle = self.write(|conn, now| {
            let mut entity = held_entity(conn, claim, now)?;
            require_phase(&entity, claim, ClaimPhase::Collection, "complete")?;

            entity.state = LifecycleState::Done;
            entity.payload = Some(payload);
            entity.failure_reason = None;
            entity.claim = None;
            entity.escalation.begin_analysis();
            save(conn, &entity, now)?;
            Ok(entity.escalation.cycle)
        })?;

        info!(entity = %claim.entity_id, worker = %claim.worker_id, cycle, "Collection complete");
        Ok(())
    }

    fn fail(
        &self,
        claim: &Claim,
        reason: &str,
        retryable: bool,
    ) -> Result<LifecycleState, LedgerError> {
        let max_attempts = self.options.max_attempts;

        let (state, attempts) = self.write(|conn, now| {
            let mut entity = held_entity(conn, claim, now)?;
            let phase = entity.claim.as_ref().map(|c| c.phase).unwrap_or(claim.phase);

            entity.claim = None;
            entity.attempts += 1;
            entity.failure_reason = Some(reason.to_string());
            entity.state = if !retryable || entity.attempts >= max_attempts {
                LifecycleState::Failed
            } else {
                match phase {
                    ClaimPhase::Collection => LifecycleState::Pending,
                    ClaimPhase::Analysis => LifecycleState::Done,
                }
            };
            save(conn, &entity, now)?;
            Ok((entity.state, entity.attempts))
        })?;

        if state == LifecycleState::Failed {
            warn!(entity = %claim.entity_id, attempts, retryable, reason, "Entity permanently failed");
        } else {
            warn!(entity = %claim.entity_id, attempts, reason, "Retryable failure; requeued");
        }
        Ok(state)
    }

    fn sweep_expired(&self) -> Result<SweepReport, LedgerError> {
        let max_attempts = self.options.max_attempts;

        let report = self.write(|conn, now| {
            let sql = format!(
                "SELECT {} FROM entities
                 WHERE claim_id IS NOT NULL AND lease_expires_at <= ?1
                 ORDER BY updated_at ASC, id ASC",
                ENTITY_COLUMNS
            );
            let expired = select_entities(conn, &sql, params![now as i64])?;

            let mut report = SweepReport::default();
            for mut entity in expired {
                let phase = entity.claim.take().map(|c| c.phase);
                entity.attempts += 1;

                if entity.attempts >= max_attempts {
                    let reason = format!("Lease expired ({} attempts)", entity.attempts);
                    mark_failed(&mut entity, reason);
                    report.failed += 1;
                } else if phase == Some(ClaimPhase::Collection) {
                    entity.state = LifecycleState::Pending;
                    report.reverted += 1;
                } else {
                    report.released += 1;
                }
                save(conn, &entity, now)?;
            }
            Ok(report)
        })?;

        if report.reclaimed() > 0 {
            info!(
                reverted = report.reverted,
                released = report.released,
                failed = report.failed,
                "Swept expired leases"
            );
        }
        Ok(report)
    }

    fn record_analysis(&self, claim: &Claim, result: &AnalysisResult) -> Result<(), LedgerError> {
        let cycle = self.write(|conn, now| {
            let mut entity = held_entity(conn, claim, now)?;
            require_phase(&entity, claim, ClaimPhase::Analysis, "record analysis")?;
            require_status(&entity, EscalationStatus::Analyzing, "record analysis")?;
            if result.entity_id != entity.id {
                return Err(invalid(&entity, "foreign result", "record analysis"));
            }
            if !result.is_finite() {
                return Err(invalid(&entity, "non-finite scores", "record analysis"));
            }

            conn.execute(
                "INSERT INTO history (entity_id, cycle, result, verdict, recorded_at)
                 VALUES (?1, ?2, ?3, NULL, ?4)",
                params![
                    entity.id.as_str(),
                    entity.escalation.cycle as i64,
                    serde_json::to_string(result)?,
                    now as i64,
                ],
            )?;

            entity.escalation.status = EscalationStatus::Evaluating;
            save(conn, &entity, now)?;
            Ok(entity.escalation.cycle)
        })?;

        info!(entity = %claim.entity_id, cycle, confidence = result.confidence, "Analysis recorded");
        Ok(())
    }

    fn record_verdict(
        &self,
        claim: &Claim,
        verdict: &Verdict,
        next: &EscalationState,
    ) -> Result<(), LedgerError> {
        self.write(|conn, now| {
            let mut entity = held_entity(conn, claim, now)?;
            require_phase(&entity, claim, ClaimPhase::Analysis, "record verdict")?;
            require_status(&entity, EscalationStatus::Evaluating, "record verdict")?;
            if verdict.entity_id != entity.id || next.entity_id != entity.id {
                return Err(invalid(&entity, "foreign verdict", "record verdict"));
            }
            if next.cycle < entity.escalation.cycle {
                return Err(invalid(&entity, "later cycle", "rewind cycle"));
            }
            if next.status == EscalationStatus::Evaluating {
                return Err(invalid(&entity, "evaluating", "stay evaluating"));
            }

            let seq = latest_unjudged(conn, &entity.id)?
                .ok_or_else(|| invalid(&entity, "no unjudged result", "record verdict"))?;
            let attached = conn.execute(
                "UPDATE history SET verdict = ?1 WHERE seq = ?2 AND verdict IS NULL",
                params![serde_json::to_string(verdict)?, seq as i64],
            )?;
            if attached != 1 {
                return Err(StoreError::Conflict(entity.id.to_string()));
            }

            entity.escalation = next.clone();
            entity.claim = None;
            if next.status == EscalationStatus::Collecting {
                entity.state = LifecycleState::Pending;
            }
            save(conn, &entity, now)
        })?;

        info!(
            entity = %claim.entity_id,
            cycle = next.cycle,
            outcome = ?verdict.outcome,
            confidence = verdict.confidence,
            status = next.status.as_str(),
            "Verdict recorded"
        );
        Ok(())
    }

    fn retry_failed(&self, id: &EntityId) -> Result<(), LedgerError> {
        let state = self.write(|conn, now| {
            let mut entity = load_entity(conn, id)?
                .ok_or_else(|| LedgerError::UnknownEntity(id.clone()))?;
            if entity.state != LifecycleState::Failed {
                return Err(invalid(&entity, entity.state.as_str(), "retry"));
            }

            entity.state = if entity.payload.is_some() && entity.escalation.status.wants_analysis() {
                LifecycleState::Done
            } else {
                LifecycleState::Pending
            };
            entity.claim = None;
            entity.failure_reason = None;
            save(conn, &entity, now)?;
            Ok(entity.state)
        })?;

        info!(entity = %id, state = state.as_str(), "Failed entity requeued");
        Ok(())
    }

    fn entity(&self, id: &EntityId) -> Result<Option<Entity>, LedgerError> {
        Ok(self.read(|conn, _| load_entity(conn, id))?)
    }

    fn history(&self, id: &EntityId) -> Result<Vec<HistoryEntry>, LedgerError> {
        Ok(self.read(|conn, _| {
            if load_entity(conn, id)?.is_none() {
                return Err(LedgerError::UnknownEntity(id.clone()).into());
            }
            load_history(conn, id)
        })?)
    }

    fn snapshot(&self) -> Result<ProgressSnapshot, LedgerError> {
        Ok(self.read(|conn, now| {
            let mut snap = ProgressSnapshot {
                taken_at: now,
                ..Default::default()
            };

            let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM entities GROUP BY state")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            for row in rows {
                let (state, count) = row?;
                let count = count as usize;
                match LifecycleState::parse(&state) {
                    Some(LifecycleState::Pending) => snap.pending = count,
                    Some(LifecycleState::Claimed) => snap.claimed = count,
                    Some(LifecycleState::Done) => snap.done = count,
                    Some(LifecycleState::Failed) => snap.failed = count,
                    None => return Err(StoreError::InvalidData(format!("Unknown state: {}", state))),
                }
            }

            // Failed entities are counted once, under `failed`
            let mut stmt = conn.prepare(
                "SELECT esc_status, COUNT(*) FROM entities WHERE state != 'failed' GROUP BY esc_status",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            for row in rows {
                let (status, count) = row?;
                let count = count as usize;
                match EscalationStatus::parse(&status) {
                    Some(EscalationStatus::Collecting) => snap.collecting = count,
                    Some(EscalationStatus::Analyzing) => snap.analyzing = count,
                    Some(EscalationStatus::Evaluating) => snap.evaluating = count,
                    Some(EscalationStatus::Accepted) => snap.accepted = count,
                    Some(EscalationStatus::Exhausted) => snap.exhausted = count,
                    None => {
                        return Err(StoreError::InvalidData(format!(
                            "Unknown escalation status: {}",
                            status
                        )))
                    }
                }
            }

            snap.live_claims = conn.query_row(
                "SELECT COUNT(*) FROM entities WHERE claim_id IS NOT NULL AND lease_expires_at > ?1",
                params![now as i64],
                |row| row.get::<_, i64>(0),
            )? as usize;

            let mut stmt = conn.prepare("SELECT id, esc_cycle FROM entities WHERE esc_cycle > 0")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            for row in rows {
                let (id, cycle) = row?;
                snap.cycles.insert(EntityId::new(id), cycle as u32);
            }

            Ok(snap)
        })?)
    }

    fn needs_attention(&self) -> Result<Vec<AttentionItem>, LedgerError> {
        Ok(self.read(|conn, _| {
            let sql = format!(
                "SELECT {} FROM entities
                 WHERE state = 'failed' OR esc_status = 'exhausted'
                 ORDER BY updated_at ASC, id ASC",
                ENTITY_COLUMNS
            );
            let items = select_entities(conn, &sql, params![])?
                .into_iter()
                .map(|entity| {
                    let reason = if entity.state == LifecycleState::Failed {
                        AttentionReason::PermanentlyFailed {
                            reason: entity.failure_reason.unwrap_or_default(),
                            attempts: entity.attempts,
                        }
                    } else {
                        AttentionReason::Exhausted {
                            cycles: entity.escalation.cycle,
                            objections: entity.escalation.objections,
                        }
                    };
                    AttentionItem {
                        entity_id: entity.id,
                        reason,
                        updated_at: entity.updated_at,
                    }
                })
                .collect();
            Ok(items)
        })?)
    }

    fn checkpoint(&self) -> Result<(), LedgerError> {
        self.read(|conn, _| {
            let (busy, log, checkpointed): (i64, i64, i64) = conn.query_row(
                "PRAGMA wal_checkpoint(TRUNCATE)",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            debug!(busy, log, checkpointed, "WAL checkpoint");
            Ok(())
        })?;
        Ok(())
    }
}

/// Entities offering collection or analysis work at `now`, oldest first
fn claimable(conn: &Connection, now: u64) -> Result<Vec<Entity>, StoreError> {
    let sql = format!(
        "SELECT {} FROM entities
         WHERE state = 'pending'
            OR (state = 'claimed' AND lease_expires_at <= ?1)
            OR (state = 'done' AND esc_status IN ('analyzing', 'evaluating')
                AND (claim_id IS NULL OR lease_expires_at <= ?1))
         ORDER BY updated_at ASC, id ASC
         LIMIT ?2",
        ENTITY_COLUMNS
    );
    select_entities(conn, &sql, params![now as i64, CLAIM_BATCH])
}

fn select_entities<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<Entity>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, EntityRow::from_row)?;
    let mut entities = Vec::new();
    for row in rows {
        entities.push(row?.into_entity()?);
    }
    Ok(entities)
}

/// The entity behind `claim`, provided the claim is still current
fn held_entity(conn: &Connection, claim: &Claim, now: u64) -> Result<Entity, StoreError> {
    let entity = load_entity(conn, &claim.entity_id)?
        .ok_or_else(|| LedgerError::UnknownEntity(claim.entity_id.clone()))?;

    match entity.live_claim(now) {
        Some(current) if current.id == claim.id => Ok(entity),
        _ => {
            warn!(entity = %claim.entity_id, claim = %claim.id, worker = %claim.worker_id, "Stale claim");
            Err(LedgerError::StaleClaim {
                entity: claim.entity_id.clone(),
                claim: claim.id,
            }
            .into())
        }
    }
}

fn save(conn: &Connection, entity: &Entity, now: u64) -> Result<(), StoreError> {
    if persist_entity(conn, entity, now)? {
        Ok(())
    } else {
        Err(StoreError::Conflict(entity.id.to_string()))
    }
}

fn mark_failed(entity: &mut Entity, reason: String) {
    entity.state = LifecycleState::Failed;
    entity.claim = None;
    entity.failure_reason = Some(reason);
}

fn require_phase(
    entity: &Entity,
    claim: &Claim,
    expected: ClaimPhase,
    operation: &str,
) -> Result<(), StoreError> {
    // The stored phase is authoritative; the caller's copy may be forged
    let phase = entity.claim.as_ref().map(|c| c.phase).unwrap_or(claim.phase);
    if phase == expected {
        Ok(())
    } else {
        Err(invalid(entity, &format!("{} claim", phase.as_str()), operation))
    }
}

fn require_status(
    entity: &Entity,
    expected: EscalationStatus,
    operation: &str,
) -> Result<(), StoreError> {
    if entity.escalation.status == expected {
        Ok(())
    } else {
        Err(invalid(entity, entity.escalation.status.as_str(), operation))
    }
}

fn invalid(entity: &Entity, from: &str, operation: &str) -> StoreError {
    LedgerError::InvalidTransition {
        entity: entity.id.clone(),
        from: from.to_string(),
        operation: operation.to_string(),
    }
    .into()
}
