//! Exclusivity and durability tests for drover-store
//!
//! Claims are raced from many threads, from two connections on the same file,
//! and across a simulated process restart.

use drover_domain::traits::Ledger;
use drover_domain::{
    AnalysisResult, ClaimPhase, Clock, EntityId, EscalationStatus, LifecycleState, ManualClock,
    RawPayload, SystemClock, WorkerId,
};
use drover_store::{LedgerOptions, SqliteLedger};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const LEASE: Duration = Duration::from_secs(60);

#[test]
fn test_racing_workers_single_entity() {
    let ledger = Arc::new(
        SqliteLedger::in_memory(LedgerOptions::default(), Arc::new(SystemClock)).unwrap(),
    );
    ledger.register(&[EntityId::new("acme")]).unwrap();

    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|n| {
            let ledger = Arc::clone(&ledger);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                ledger
                    .claim(&WorkerId::new(format!("w-{}", n)), LEASE)
                    .unwrap()
                    .into_claim()
            })
        })
        .collect();

    let granted: Vec<_> = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap())
        .collect();
    assert_eq!(granted.len(), 1, "Exactly one worker may hold the entity");
}

#[test]
fn test_racing_workers_many_entities() -> anyhow::Result<()> {
    let ledger = Arc::new(SqliteLedger::in_memory(
        LedgerOptions::default(),
        Arc::new(SystemClock),
    )?);
    let ids: Vec<_> = (0..50).map(|n| EntityId::new(format!("e-{:03}", n))).collect();
    ledger.register(&ids)?;

    let handles: Vec<_> = (0..6)
        .map(|n| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                let worker = WorkerId::new(format!("w-{}", n));
                let mut collected = Vec::new();
                // Analysis claims are taken and left to hold their lease, so
                // the loop ends once every entity is collected and held
                while let Some(claim) = ledger.claim(&worker, LEASE).unwrap().into_claim() {
                    if claim.phase == ClaimPhase::Collection {
                        ledger.complete(&claim, RawPayload::new("{}", ["s"])).unwrap();
                        collected.push(claim.entity_id);
                    }
                }
                collected
            })
        })
        .collect();

    let mut collected = Vec::new();
    for handle in handles {
        collected.extend(handle.join().expect("worker panicked"));
    }
    let unique: HashSet<_> = collected.iter().cloned().collect();
    assert_eq!(collected.len(), 50, "Every entity collected exactly once");
    assert_eq!(unique.len(), 50);

    let snap = ledger.snapshot()?;
    assert_eq!(snap.done, 50);
    assert_eq!(snap.live_claims, 50);
    Ok(())
}

#[test]
fn test_two_connections_same_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("ledger.db");

    let first = SqliteLedger::open(&path, LedgerOptions::default())?;
    let second = SqliteLedger::open(&path, LedgerOptions::default())?;
    first.register(&[EntityId::new("acme")])?;

    let a = first.claim(&WorkerId::new("proc-a"), LEASE)?;
    let b = second.claim(&WorkerId::new("proc-b"), LEASE)?;
    assert!(a.into_claim().is_some());
    assert!(b.into_claim().is_none());
    Ok(())
}

#[test]
fn test_restart_recovers_in_flight_work() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("ledger.db");
    let clock = Arc::new(ManualClock::new(10_000));

    let id = EntityId::new("acme");
    let result = AnalysisResult::new(id.clone(), 0.75);
    let dangling = {
        let ledger = SqliteLedger::open_with_clock(&path, LedgerOptions::default(), clock.clone())?;
        ledger.register(&[id.clone(), EntityId::new("globex")])?;

        let collect = ledger.claim(&WorkerId::new("w-1"), LEASE)?.into_claim().unwrap();
        ledger.complete(&collect, RawPayload::new("{}", ["earnings"]))?;
        let analysis = ledger.claim(&WorkerId::new("w-1"), LEASE)?.into_claim().unwrap();
        assert_eq!(analysis.phase, ClaimPhase::Analysis);
        ledger.record_analysis(&analysis, &result)?;
        ledger.checkpoint()?;
        analysis
        // Ledger dropped here without releasing the claim
    };

    clock.advance(LEASE);
    let ledger = SqliteLedger::open_with_clock(&path, LedgerOptions::default(), clock.clone())?;

    let entity = ledger.entity(&id)?.unwrap();
    assert_eq!(entity.state, LifecycleState::Done);
    assert_eq!(entity.escalation.status, EscalationStatus::Evaluating);
    assert_eq!(entity.claim.as_ref().map(|c| c.id), Some(dangling.id));
    assert!(entity.live_claim(clock.now_ms()).is_none());

    let history = ledger.history(&id)?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].result, result);
    assert!(history[0].verdict.is_none());

    // The unjudged result is offered again, oldest first
    let resumed = ledger.claim(&WorkerId::new("w-2"), LEASE)?.into_claim().unwrap();
    assert_eq!(resumed.entity_id, id);
    assert_eq!(resumed.phase, ClaimPhase::Analysis);
    assert_eq!(ledger.entity(&id)?.unwrap().attempts, 1);

    let snap = ledger.snapshot()?;
    assert_eq!(snap.pending, 1);
    assert_eq!(snap.evaluating, 1);
    Ok(())
}

#[derive(Debug, Clone)]
enum Op {
    Claim(u8),
    Complete(usize),
    Fail(usize, bool),
    Advance(u16),
    Sweep,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..4).prop_map(Op::Claim),
        2 => (0usize..16).prop_map(Op::Complete),
        1 => (0usize..16, any::<bool>()).prop_map(|(i, r)| Op::Fail(i, r)),
        2 => (0u16..5_000).prop_map(Op::Advance),
        1 => Just(Op::Sweep),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever the interleaving, no entity ever has two live claims
    #[test]
    fn test_at_most_one_live_claim(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let clock = Arc::new(ManualClock::new(0));
        let ledger = SqliteLedger::in_memory(
            LedgerOptions { max_attempts: 4, ..Default::default() },
            clock.clone(),
        ).unwrap();
        let ids: Vec<_> = (0..4).map(|n| EntityId::new(format!("e-{}", n))).collect();
        ledger.register(&ids).unwrap();

        let lease = Duration::from_millis(3_000);
        let mut issued = Vec::new();

        for op in ops {
            match op {
                Op::Claim(w) => {
                    if let Some(claim) = ledger
                        .claim(&WorkerId::new(format!("w-{}", w)), lease)
                        .unwrap()
                        .into_claim()
                    {
                        issued.push(claim);
                    }
                }
                Op::Complete(i) if !issued.is_empty() => {
                    let claim = &issued[i % issued.len()];
                    if claim.phase == ClaimPhase::Collection {
                        let _ = ledger.complete(claim, RawPayload::new("{}", ["s"]));
                    }
                }
                Op::Fail(i, retryable) if !issued.is_empty() => {
                    let claim = &issued[i % issued.len()];
                    let _ = ledger.fail(claim, "flaky", retryable);
                }
                Op::Advance(ms) => clock.advance(Duration::from_millis(ms as u64)),
                Op::Sweep => {
                    ledger.sweep_expired().unwrap();
                }
                _ => {}
            }

            let now = clock.now_ms();
            let live: Vec<_> = issued
                .iter()
                .filter(|c| {
                    ledger
                        .entity(&c.entity_id)
                        .unwrap()
                        .and_then(|e| e.live_claim(now).map(|l| l.id == c.id))
                        .unwrap_or(false)
                })
                .map(|c| c.entity_id.clone())
                .collect();
            let unique: HashSet<_> = live.iter().cloned().collect();
            prop_assert_eq!(live.len(), unique.len());

            let snap = ledger.snapshot().unwrap();
            prop_assert_eq!(snap.total(), 4);
            prop_assert!(snap.live_claims <= 4);
        }
    }
}
