use agentpay::replay_store::{InMemoryReplayStore, ReplayStore};
use agentpay::sandbox::SandboxLedger;
use agentpay::{
    Amount, ChallengeIssuer, Decision, LedgerTransfer, NetworkConfig, PaymentProof,
    PaymentVerifier, RejectReason,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_purge_while_consuming() {
    let store = Arc::new(InMemoryReplayStore::new());
    let store_clone = store.clone();

    // Thread 1: continually purge
    let t1 = thread::spawn(move || {
        for _ in 0..100 {
            store_clone.purge_older_than(0);
        }
    });

    // Thread 2: continually consume
    let t2 = thread::spawn(move || {
        for i in 0..1000u64 {
            store.try_consume(&format!("0x{i:064x}"));
        }
    });

    t1.join().unwrap();
    t2.join().unwrap();
}

#[test]
fn test_concurrent_try_consume_claims_once() {
    let store = Arc::new(InMemoryReplayStore::new());
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let s = store.clone();
            thread::spawn(move || s.try_consume("0xSAME"))
        })
        .collect();
    let claimed = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|c| *c)
        .count();
    assert_eq!(claimed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_verification_grants_once() {
    let ledger = SandboxLedger::new();
    ledger.record(
        LedgerTransfer {
            tx_ref: "0xT1".to_string(),
            from: "0xPAYER".to_string(),
            to: "0xAB".to_string(),
            amount: Amount::from_minor_units(10_000),
            timestamp: agentpay::unix_now(),
        },
        true,
    );
    // Latency keeps every task inside the critical section at once.
    ledger.set_latency(Some(Duration::from_millis(20)));
    let verifier = Arc::new(PaymentVerifier::new(ledger));

    let issuer = ChallengeIssuer::new(b"secret".to_vec(), NetworkConfig::default());
    let challenge = issuer
        .issue("weather-v1", Amount::from_minor_units(10_000), "0xAB", "base")
        .unwrap();
    let proof = PaymentProof {
        tx_ref: "0xT1".to_string(),
        payer: "0xPAYER".to_string(),
        amount: Amount::from_minor_units(10_000),
        asset: "USDC".to_string(),
        network: "base".to_string(),
        recipient: "0xAB".to_string(),
    };

    let tasks: Vec<_> = (0..12)
        .map(|_| {
            let v = verifier.clone();
            let c = challenge.clone();
            let p = proof.clone();
            tokio::spawn(async move { v.verify(&p, &c).await })
        })
        .collect();

    let mut granted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Decision::Granted { .. } => granted += 1,
            other => assert_eq!(other, Decision::rejected(RejectReason::ReplayedProof)),
        }
    }
    assert_eq!(granted, 1);
}

#[tokio::test]
async fn test_shared_sqlite_store_survives_verifier_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("replay.db");
    let path = path.to_str().unwrap();

    let ledger = Arc::new(SandboxLedger::new());
    ledger.record(
        LedgerTransfer {
            tx_ref: "0xT1".to_string(),
            from: "0xPAYER".to_string(),
            to: "0xAB".to_string(),
            amount: Amount::from_minor_units(10_000),
            timestamp: agentpay::unix_now(),
        },
        true,
    );
    let issuer = ChallengeIssuer::new(b"secret".to_vec(), NetworkConfig::default());
    let challenge = issuer
        .issue("weather-v1", Amount::from_minor_units(10_000), "0xAB", "base")
        .unwrap();
    let proof = PaymentProof {
        tx_ref: "0xT1".to_string(),
        payer: "0xPAYER".to_string(),
        amount: Amount::from_minor_units(10_000),
        asset: "USDC".to_string(),
        network: "base".to_string(),
        recipient: "0xAB".to_string(),
    };

    {
        let store = Arc::new(agentpay::SqliteReplayStore::open(path).unwrap());
        let verifier = PaymentVerifier::new(ledger.clone()).with_replay_store(store);
        assert!(verifier.verify(&proof, &challenge).await.is_granted());
    }

    let store = Arc::new(agentpay::SqliteReplayStore::open(path).unwrap());
    let verifier = PaymentVerifier::new(ledger).with_replay_store(store);
    assert_eq!(
        verifier.verify(&proof, &challenge).await,
        Decision::rejected(RejectReason::ReplayedProof)
    );
}
