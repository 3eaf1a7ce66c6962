//! Concurrency and durability integration tests
//!
//! These tests drive the coordinator from many tasks on a multi-threaded
//! runtime and check the ledger's guarantees under real parallelism:
//! no overdraft, exactly-once keyed requests, rollback on cancellation,
//! and recovery from the journal.

use credit_ledger::config::LedgerConfig;
use credit_ledger::core::{Journal, Pagination, RequestStatus, TransactionCoordinator};
use credit_ledger::types::{
    ActorRole, Credits, Disposition, IdempotencyKey, LedgerEntry, LedgerError, MutationRequest,
    Receipt, UserId,
};
use std::fs;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::oneshot;

fn ledger() -> TransactionCoordinator {
    TransactionCoordinator::in_memory(&LedgerConfig::default())
}

fn request(user: &str, minor: i64) -> MutationRequest {
    MutationRequest::new(user, Credits::from_minor(minor), "test", ActorRole::System)
}

fn balance(coordinator: &TransactionCoordinator, user: &str) -> Credits {
    coordinator.get_balance(&UserId::new(user)).balance
}

/// Retry `Conflict` the way a client would
async fn debit_until_settled(
    coordinator: &TransactionCoordinator,
    request: MutationRequest,
) -> Result<Receipt, LedgerError> {
    loop {
        match coordinator.debit(request.clone()).await {
            Err(LedgerError::Conflict { .. }) => tokio::task::yield_now().await,
            other => return other,
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_debits_never_overdraw() {
    let coordinator = ledger();
    coordinator.credit(request("u1", 5_000)).await.unwrap();

    let tasks: Vec<_> = (0..100)
        .map(|_| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.debit(request("u1", 100)).await })
        })
        .collect();

    let mut succeeded = 0;
    let mut insufficient = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(LedgerError::InsufficientBalance { available, .. }) => {
                assert_eq!(available, Credits::ZERO);
                insufficient += 1;
            }
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(succeeded, 50);
    assert_eq!(insufficient, 50);
    assert_eq!(balance(&coordinator, "u1"), Credits::ZERO);

    let history: Vec<LedgerEntry> = coordinator
        .get_ledger(&UserId::new("u1"), Pagination::first(7))
        .collect();
    assert_eq!(history.len(), 51);
    assert!(history.iter().all(|e| !e.balance_after.is_negative()));
    let sequences: Vec<u64> = history.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, (1..=51).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_scenario_repeated_keyed_credit() {
    let coordinator = ledger();
    let credit = request("u1", 10_000).with_idempotency_key("k1");

    let first = coordinator.credit(credit.clone()).await.unwrap();
    let second = coordinator.credit(credit).await.unwrap();

    assert_eq!(first.entry.id, second.entry.id);
    assert_eq!(first.disposition, Disposition::Committed);
    assert_eq!(second.disposition, Disposition::Replayed);
    assert_eq!(balance(&coordinator, "u1"), Credits::from_minor(10_000));
    assert_eq!(coordinator.entry_count(), 1);
}

#[tokio::test]
async fn test_scenario_debit_above_balance() {
    let coordinator = ledger();
    coordinator.credit(request("u1", 10_000)).await.unwrap();
    coordinator.debit(request("u1", 3_000)).await.unwrap();

    let error = coordinator.debit(request("u1", 15_000)).await.unwrap_err();

    assert_eq!(
        error,
        LedgerError::insufficient_balance(
            &UserId::new("u1"),
            Credits::from_minor(15_000),
            Credits::from_minor(7_000)
        )
    );
    assert_eq!(balance(&coordinator, "u1"), Credits::from_minor(7_000));

    let after: Vec<Credits> = coordinator
        .get_ledger(&UserId::new("u1"), Pagination::first(10))
        .map(|e| e.balance_after)
        .collect();
    assert_eq!(after, vec![Credits::from_minor(10_000), Credits::from_minor(7_000)]);
}

#[tokio::test]
async fn test_failed_key_can_be_retried_with_a_smaller_amount() {
    let coordinator = ledger();
    coordinator.credit(request("u1", 5_000)).await.unwrap();

    let too_much = coordinator
        .debit(request("u1", 8_000).with_idempotency_key("d1"))
        .await
        .unwrap_err();
    assert!(matches!(too_much, LedgerError::InsufficientBalance { .. }));

    let receipt = coordinator
        .debit(request("u1", 2_000).with_idempotency_key("d1"))
        .await
        .unwrap();
    assert_eq!(receipt.disposition, Disposition::Committed);
    assert_eq!(balance(&coordinator, "u1"), Credits::from_minor(3_000));

    // Once completed the key is bound to the request that succeeded
    let reused = coordinator
        .debit(request("u1", 8_000).with_idempotency_key("d1"))
        .await
        .unwrap_err();
    assert!(matches!(reused, LedgerError::IdempotencyKeyReuse { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scenario_two_concurrent_debits() {
    let coordinator = ledger();
    coordinator.credit(request("u1", 5_000)).await.unwrap();

    let a = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.debit(request("u1", 4_000)).await }
    });
    let b = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.debit(request("u1", 4_000)).await }
    });
    let results = [a.await.unwrap(), b.await.unwrap()];

    let committed: Vec<&Receipt> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].entry.balance_after, Credits::from_minor(1_000));

    let error = results
        .iter()
        .find_map(|r| r.as_ref().err())
        .expect("one debit must fail");
    assert_eq!(
        *error,
        LedgerError::insufficient_balance(
            &UserId::new("u1"),
            Credits::from_minor(4_000),
            Credits::from_minor(1_000)
        )
    );
    assert_eq!(balance(&coordinator, "u1"), Credits::from_minor(1_000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_identical_keyed_requests_execute_once() {
    let coordinator = ledger();
    coordinator.credit(request("u1", 10_000)).await.unwrap();
    let debit = request("u1", 2_500).with_idempotency_key("order-7");

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let coordinator = coordinator.clone();
            let debit = debit.clone();
            tokio::spawn(async move { debit_until_settled(&coordinator, debit).await })
        })
        .collect();

    let mut receipts = Vec::new();
    for task in tasks {
        receipts.push(task.await.unwrap().unwrap());
    }

    let committed = receipts
        .iter()
        .filter(|r| r.disposition == Disposition::Committed)
        .count();
    assert_eq!(committed, 1);
    assert!(receipts.iter().all(|r| r.entry == receipts[0].entry));
    assert_eq!(balance(&coordinator, "u1"), Credits::from_minor(7_500));
    assert_eq!(coordinator.entry_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_users_do_not_interfere() {
    let coordinator = ledger();

    let tasks: Vec<_> = (0..200)
        .map(|i| {
            let coordinator = coordinator.clone();
            let user = format!("user-{}", i % 10);
            tokio::spawn(async move { coordinator.credit(request(&user, 100)).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    for i in 0..10 {
        assert_eq!(
            balance(&coordinator, &format!("user-{}", i)),
            Credits::from_minor(2_000)
        );
    }
    assert!(coordinator.housekeeper().audit().await.is_clean());
}

/// Journal whose appends block until the test releases them
#[derive(Debug)]
struct GateJournal {
    entered: Mutex<Option<oneshot::Sender<()>>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl Journal for GateJournal {
    fn append(&self, _entry: &LedgerEntry) -> Result<(), LedgerError> {
        if let Some(entered) = self.entered.lock().unwrap().take() {
            let _ = entered.send(());
        }
        // Returns once the sender is dropped
        let _ = self.release.lock().unwrap().recv();
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_request_leaves_failed_key_and_no_entry() {
    let (entered_tx, entered_rx) = oneshot::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let journal = Arc::new(GateJournal {
        entered: Mutex::new(Some(entered_tx)),
        release: Mutex::new(release_rx),
    });
    let coordinator = TransactionCoordinator::with_journal(&LedgerConfig::default(), journal);

    // Holds u1's lock inside the journal append
    let holder = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.credit(request("u1", 1_000)).await }
    });
    entered_rx.await.unwrap();

    let key = IdempotencyKey::new("late");
    let waiting = coordinator.credit(request("u1", 500).with_idempotency_key("late"));
    let timed_out = tokio::time::timeout(Duration::from_millis(50), waiting).await;
    assert!(timed_out.is_err());

    let status = coordinator.replay_resolver().resolve(&key).unwrap();
    assert!(matches!(status, RequestStatus::Failed), "{:?}", status);

    drop(release_tx);
    holder.await.unwrap().unwrap();
    assert_eq!(coordinator.entry_count(), 1);
    assert_eq!(balance(&coordinator, "u1"), Credits::from_minor(1_000));

    // The failed key can be claimed again
    let retried = coordinator
        .credit(request("u1", 500).with_idempotency_key("late"))
        .await
        .unwrap();
    assert_eq!(retried.disposition, Disposition::Committed);
    assert_eq!(balance(&coordinator, "u1"), Credits::from_minor(1_500));
}

/// Journal that blocks appends for one user until the test releases them
#[derive(Debug)]
struct UserGateJournal {
    user: UserId,
    entered: Mutex<Option<oneshot::Sender<()>>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl Journal for UserGateJournal {
    fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        if entry.user_id != self.user {
            return Ok(());
        }
        if let Some(entered) = self.entered.lock().unwrap().take() {
            let _ = entered.send(());
        }
        let _ = self.release.lock().unwrap().recv();
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_keyed_requests_proceed_while_another_commit_is_parked() {
    let (entered_tx, entered_rx) = oneshot::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let journal = Arc::new(UserGateJournal {
        user: UserId::new("u0"),
        entered: Mutex::new(Some(entered_tx)),
        release: Mutex::new(release_rx),
    });
    let coordinator = TransactionCoordinator::with_journal(&LedgerConfig::default(), journal);
    let parked = IdempotencyKey::new("parked");

    let holder = tokio::spawn({
        let coordinator = coordinator.clone();
        async move {
            coordinator
                .credit(request("u0", 1_000).with_idempotency_key("parked"))
                .await
        }
    });
    entered_rx.await.unwrap();

    // Enough keys that some share a register shard with the parked one
    let others = async {
        for i in 1..=64 {
            let receipt = coordinator
                .credit(request(&format!("u{}", i), 100).with_idempotency_key(format!("key-{}", i)))
                .await?;
            assert_eq!(receipt.disposition, Disposition::Committed);
        }
        Ok::<_, LedgerError>(())
    };
    tokio::time::timeout(Duration::from_secs(5), others)
        .await
        .expect("keyed requests waited on an unrelated journal append")
        .unwrap();

    let status = coordinator.replay_resolver().resolve(&parked).unwrap();
    assert!(matches!(status, RequestStatus::InFlight), "{:?}", status);
    assert!(matches!(
        coordinator.housekeeper().abandon(&parked),
        Err(LedgerError::InvalidTransition { .. })
    ));

    drop(release_tx);
    let receipt = holder.await.unwrap().unwrap();
    match coordinator.replay_resolver().resolve(&parked).unwrap() {
        RequestStatus::Completed(entry) => assert_eq!(entry.id, receipt.entry.id),
        other => panic!("expected the parked key to complete, got {:?}", other),
    }
    assert_eq!(coordinator.entry_count(), 65);
    assert_eq!(balance(&coordinator, "u0"), Credits::from_minor(1_000));
}

/// Journal whose append waits for a message sent by another task
#[derive(Debug)]
struct HandoffJournal {
    entered: Mutex<Option<oneshot::Sender<()>>>,
    handoff: Mutex<mpsc::Receiver<()>>,
}

impl Journal for HandoffJournal {
    fn append(&self, _entry: &LedgerEntry) -> Result<(), LedgerError> {
        if let Some(entered) = self.entered.lock().unwrap().take() {
            let _ = entered.send(());
        }
        self.handoff
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(2))
            .map_err(|e| LedgerError::journal(format!("no handoff: {}", e)))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_journal_append_does_not_starve_the_worker() {
    let (entered_tx, entered_rx) = oneshot::channel();
    let (handoff_tx, handoff_rx) = mpsc::channel::<()>();
    let journal = Arc::new(HandoffJournal {
        entered: Mutex::new(Some(entered_tx)),
        handoff: Mutex::new(handoff_rx),
    });
    let coordinator = TransactionCoordinator::with_journal(&LedgerConfig::default(), journal);

    let writer = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.credit(request("u1", 250)).await }
    });
    entered_rx.await.unwrap();

    // Needs a worker while the only one is inside the append
    let sender = tokio::spawn(async move { handoff_tx.send(()) });

    let receipt = writer.await.unwrap().unwrap();
    sender.await.unwrap().unwrap();
    assert_eq!(receipt.disposition, Disposition::Committed);
    assert_eq!(balance(&coordinator, "u1"), Credits::from_minor(250));
}

#[tokio::test]
async fn test_recovery_reproduces_balances_ledger_and_replay() {
    let dir = tempdir().unwrap();
    let config = LedgerConfig::default().with_journal(dir.path().join("ledger.jsonl"));

    let (coordinator, stats) = TransactionCoordinator::open(&config).unwrap();
    assert_eq!(stats.entries, 0);
    let topup = request("u1", 10_000).with_idempotency_key("topup-1");
    let original = coordinator.credit(topup.clone()).await.unwrap();
    coordinator.debit(request("u1", 3_000)).await.unwrap();
    coordinator.credit(request("u2", 50)).await.unwrap();
    let before: Vec<LedgerEntry> = coordinator
        .get_ledger(&UserId::new("u1"), Pagination::first(10))
        .collect();
    drop(coordinator);

    let (recovered, stats) = TransactionCoordinator::open(&config).unwrap();
    assert_eq!(stats.entries, 3);
    assert_eq!(stats.users, 2);
    assert_eq!(stats.idempotency_keys, 1);

    assert_eq!(balance(&recovered, "u1"), Credits::from_minor(7_000));
    assert_eq!(balance(&recovered, "u2"), Credits::from_minor(50));
    let after: Vec<LedgerEntry> = recovered
        .get_ledger(&UserId::new("u1"), Pagination::first(10))
        .collect();
    assert_eq!(before, after);

    let replay = recovered.credit(topup).await.unwrap();
    assert_eq!(replay.disposition, Disposition::Replayed);
    assert_eq!(replay.entry, original.entry);

    // New entries continue the sequence
    let next = recovered.debit(request("u1", 1_000)).await.unwrap();
    assert_eq!(next.entry.sequence, 3);
    assert!(recovered.housekeeper().audit().await.is_clean());
}

#[tokio::test]
async fn test_tampered_journal_refuses_to_recover() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ledger.jsonl");
    let config = LedgerConfig::default().with_journal(&path);

    let (coordinator, _) = TransactionCoordinator::open(&config).unwrap();
    coordinator.credit(request("u1", 10_000)).await.unwrap();
    coordinator.debit(request("u1", 3_000)).await.unwrap();
    drop(coordinator);

    let journal = fs::read_to_string(&path).unwrap();
    assert!(journal.contains("\"balance_after\":7000"));
    fs::write(&path, journal.replace("\"balance_after\":7000", "\"balance_after\":7500")).unwrap();

    let error = TransactionCoordinator::open(&config).unwrap_err();
    assert!(matches!(error, LedgerError::LedgerInconsistency { .. }), "{}", error);
}

#[tokio::test]
async fn test_journal_missing_entries_refuses_to_recover() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ledger.jsonl");
    let config = LedgerConfig::default().with_journal(&path);

    let (coordinator, _) = TransactionCoordinator::open(&config).unwrap();
    for _ in 0..3 {
        coordinator.credit(request("u1", 100)).await.unwrap();
    }
    drop(coordinator);

    let journal = fs::read_to_string(&path).unwrap();
    let without_first: String = journal.lines().skip(1).map(|l| format!("{}\n", l)).collect();
    fs::write(&path, without_first).unwrap();

    assert!(TransactionCoordinator::open(&config).is_err());
}
