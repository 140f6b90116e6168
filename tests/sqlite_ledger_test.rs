mod common;

use std::sync::Arc;

use common::*;
use medchain_custody::blob::{EncryptedBlobStore, MemoryBackend, RecordCipher};
use medchain_custody::consent::{ConsentManager, UserRegistry};
use medchain_custody::custody::{AccessLogWriter, IntegrityVerdict, RecordCustodyEngine};
use medchain_custody::events::TracingSink;
use medchain_custody::identity::Role;
use medchain_custody::ledger::{
    verify_history, CommitClock, FieldPredicate, Ledger, LedgerError, SqliteLedger, WriteGuard,
};
use serde_json::json;

async fn in_memory() -> Arc<dyn Ledger> {
    Arc::new(
        SqliteLedger::connect_in_memory(CommitClock::default())
            .await
            .unwrap()
            .with_page_size(2),
    )
}

#[tokio::test]
async fn test_versions_and_snapshots() {
    let ledger = in_memory().await;
    let first = ledger.put("P1", br#"{"v":1}"#.to_vec()).await.unwrap();
    let second = ledger.put("P1", br#"{"v":2}"#.to_vec()).await.unwrap();
    ledger.put("P2", br#"{"v":1}"#.to_vec()).await.unwrap();

    assert_eq!(first.version, 1);
    assert_eq!(second.version, 2);
    assert!(second.timestamp > first.timestamp);

    let snapshot = ledger.get("P1").await.unwrap().unwrap();
    assert_eq!(snapshot.version, 2);
    assert_eq!(snapshot.tx_id, second.tx_id);
    assert!(ledger.get("P9").await.unwrap().is_none());
}

#[tokio::test]
async fn test_history_is_paged_and_chained() {
    let ledger = in_memory().await;
    for v in 1..=5 {
        ledger
            .put("P1", format!("{{\"v\":{}}}", v).into_bytes())
            .await
            .unwrap();
    }

    let entries = ledger.history("P1").collect_all().await.unwrap();
    assert_eq!(
        entries.iter().map(|e| e.version).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5]
    );
    let result = verify_history(&entries);
    assert!(result.is_valid, "{}", result.summary());
}

#[tokio::test]
async fn test_guards_and_tombstones() {
    let ledger = in_memory().await;
    ledger
        .commit("R1", WriteGuard::Absent, Some(b"{}".to_vec()))
        .await
        .unwrap();
    assert!(matches!(
        ledger.commit("R1", WriteGuard::Absent, Some(b"{}".to_vec())).await,
        Err(LedgerError::AlreadyExists(_))
    ));
    assert!(matches!(
        ledger.commit("R1", WriteGuard::Version(7), Some(b"{}".to_vec())).await,
        Err(LedgerError::VersionConflict { found: Some(1), .. })
    ));

    ledger.delete("R1").await.unwrap();
    assert!(ledger.get("R1").await.unwrap().is_none());
    assert_eq!(ledger.head_version("R1").await.unwrap(), Some(2));
    assert!(matches!(ledger.delete("R1").await, Err(LedgerError::NotFound(_))));

    // A tombstoned key can be written again under an Absent guard.
    let receipt = ledger
        .commit("R1", WriteGuard::Absent, Some(b"{}".to_vec()))
        .await
        .unwrap();
    assert_eq!(receipt.version, 3);
}

#[tokio::test]
async fn test_query_matches_live_documents() {
    let ledger = in_memory().await;
    ledger
        .put("D1", br#"{"docType":"user","role":"doctor"}"#.to_vec())
        .await
        .unwrap();
    ledger
        .put("P1", br#"{"docType":"user","role":"patient"}"#.to_vec())
        .await
        .unwrap();
    ledger
        .put("D2", br#"{"docType":"user","role":"doctor"}"#.to_vec())
        .await
        .unwrap();
    ledger.delete("D2").await.unwrap();

    let doctors = ledger
        .query(&FieldPredicate::new().eq("docType", "user").eq("role", "doctor"))
        .await
        .unwrap();
    assert_eq!(doctors.len(), 1);
    assert_eq!(doctors[0].key, "D1");
}

#[tokio::test]
async fn test_reopened_database_keeps_history() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("ledger.db").display());

    {
        let ledger = SqliteLedger::connect(&url, CommitClock::default())
            .await
            .unwrap();
        ledger.put("P1", b"{}".to_vec()).await.unwrap();
        ledger.put("P1", br#"{"v":2}"#.to_vec()).await.unwrap();
        ledger.pool().close().await;
    }

    let ledger: Arc<dyn Ledger> = Arc::new(
        SqliteLedger::connect(&url, CommitClock::default())
            .await
            .unwrap(),
    );
    let receipt = ledger.put("P1", br#"{"v":3}"#.to_vec()).await.unwrap();
    assert_eq!(receipt.version, 3);
    assert_eq!(receipt.timestamp, CommitClock::default().timestamp_for(3));

    let entries = ledger.history("P1").collect_all().await.unwrap();
    assert_eq!(entries.len(), 3);
    assert!(verify_history(&entries).is_valid);
}

#[tokio::test]
async fn test_custody_over_sqlite() {
    let config = test_config();
    let ledger = in_memory().await;
    let events = Arc::new(TracingSink);
    let registry = UserRegistry::new(ledger.clone(), events.clone(), config.registration.clone());
    let consent = Arc::new(ConsentManager::new(ledger.clone(), events.clone()));
    let (access_log, _failures) = AccessLogWriter::spawn(ledger.clone(), &config.access_log);
    let engine = RecordCustodyEngine::new(
        ledger.clone(),
        Arc::new(EncryptedBlobStore::new(
            MemoryBackend::new(),
            RecordCipher::new(TEST_KEY),
        )),
        consent.clone(),
        events,
        access_log,
        config.records.clone(),
    );

    registry
        .register_user(&admin(PATIENT_ORG), "P1", "Alice", Role::Patient, PATIENT_ORG)
        .await
        .unwrap();
    registry
        .register_user(&admin(PROVIDER_ORG), "D1", "Dr. One", Role::Doctor, PROVIDER_ORG)
        .await
        .unwrap();
    consent.grant_consent("P1", "D1", "P1").await.unwrap();

    engine
        .add_record(&doctor("D1"), "P1", "R1", json!({"bp": "120/80"}), b"scan")
        .await
        .unwrap();
    let view = engine.view_record(&doctor("D1"), "R1").await.unwrap();
    assert_eq!(view.verdict, IntegrityVerdict::Valid);
    assert_eq!(view.plaintext.as_deref(), Some(&b"scan"[..]));

    engine.access_log().flush().await.unwrap();
    assert_eq!(ledger.head_version("R1").await.unwrap(), Some(2));
}
