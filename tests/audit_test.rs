mod common;

use common::*;
use medchain_custody::audit::AuditEventKind;
use medchain_custody::error::ErrorKind;
use serde_json::json;

fn labels(events: &[medchain_custody::audit::AuditEvent]) -> Vec<String> {
    events.iter().map(|e| e.kind.to_string()).collect()
}

#[tokio::test]
async fn test_consent_history_replays_newest_first() {
    let h = setup().await;
    h.consent.grant_consent("P1", "D1", "P1").await.unwrap();
    h.consent.grant_consent("P1", "H1", "P1").await.unwrap();
    h.consent.revoke_consent("P1", "D1", "P1").await.unwrap();

    let report = h.audit.audit_log("P1").await.unwrap();
    assert_eq!(
        labels(&report.events),
        vec!["Revoked(D1)", "Granted(H1)", "Granted(D1)", "Registered"]
    );
    assert!(report.skipped.is_empty());
    assert!(report
        .events
        .windows(2)
        .all(|w| w[0].timestamp >= w[1].timestamp));
}

#[tokio::test]
async fn test_corrupt_history_entry_is_skipped() {
    let h = setup().await;
    h.consent.grant_consent("P1", "D1", "P1").await.unwrap();

    // A garbage version followed by a valid profile that also consents to H1.
    h.ledger.put("P1", b"{not json".to_vec()).await.unwrap();
    let (_, mut profile) = h
        .ledger
        .get_json::<serde_json::Value>("D1")
        .await
        .unwrap()
        .unwrap();
    profile["userId"] = json!("P1");
    profile["role"] = json!("patient");
    profile["consents"] = json!(["D1", "H1"]);
    h.ledger
        .put("P1", serde_json::to_vec(&profile).unwrap())
        .await
        .unwrap();

    let report = h.audit.audit_log("P1").await.unwrap();
    assert_eq!(
        labels(&report.events),
        vec!["Granted(H1)", "Granted(D1)", "Registered"]
    );
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].key, "P1");
    assert_eq!(report.skipped[0].version, 3);
}

#[tokio::test]
async fn test_record_uploads_and_views_are_included() {
    let h = setup().await;
    h.consent.grant_consent("P1", "D1", "P1").await.unwrap();
    h.engine
        .add_record(&doctor("D1"), "P1", "R1", json!({}), b"ecg")
        .await
        .unwrap();
    h.engine.view_record(&doctor("D1"), "R1").await.unwrap();
    h.drain_access_log().await;

    let report = h.audit.audit_log("P1").await.unwrap();
    assert_eq!(
        labels(&report.events),
        vec!["Viewed(R1)", "Uploaded(R1)", "Granted(D1)", "Registered"]
    );
    assert_eq!(report.events[0].actor_id, "D1");
    assert!(matches!(
        &report.events[0].kind,
        AuditEventKind::RecordViewed { actor_org, .. } if actor_org == PROVIDER_ORG
    ));
    assert_eq!(report.events[1].actor_id, "D1");
}

#[tokio::test]
async fn test_unknown_subject_is_not_found() {
    let h = setup().await;
    let err = h.audit.audit_log("P404").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_record_key_is_not_an_audit_subject() {
    let h = setup().await;
    h.consent.grant_consent("P1", "D1", "P1").await.unwrap();
    h.engine
        .add_record(&doctor("D1"), "P1", "R1", json!({}), b"ecg")
        .await
        .unwrap();

    let err = h.audit.audit_log("R1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_audit_access_rules() {
    let h = setup().await;
    assert!(h.audit.audit_log_as(&patient("P1"), "P1").await.is_ok());
    assert!(h.audit.audit_log_as(&admin(PATIENT_ORG), "P1").await.is_ok());
    assert_eq!(
        h.audit
            .audit_log_as(&doctor("D1"), "P1")
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::Authz
    );
    assert_eq!(
        h.audit.system_events(&patient("P1")).await.unwrap_err().kind(),
        ErrorKind::Authz
    );
}

#[tokio::test]
async fn test_system_events_cover_every_patient() {
    let h = setup().await;
    h.consent.grant_consent("P1", "D1", "P1").await.unwrap();
    h.consent.grant_consent("P2", "H1", "P2").await.unwrap();
    h.engine
        .add_record(&hospital("H1"), "P2", "R9", json!({}), b"mri")
        .await
        .unwrap();

    let report = h.audit.system_events(&admin(PROVIDER_ORG)).await.unwrap();
    assert!(report.subject_id.is_none());
    assert_eq!(
        labels(&report.events),
        vec![
            "Uploaded(R9)",
            "Granted(H1)",
            "Granted(D1)",
            "Registered",
            "Registered"
        ]
    );
    assert_eq!(report.events[0].subject_id, "P2");
}
