#![allow(dead_code)]

use std::sync::Arc;
use tokio::sync::mpsc;

use medchain_custody::audit::AuditTrail;
use medchain_custody::blob::{EncryptedBlobStore, MemoryBackend, RecordCipher};
use medchain_custody::config::{AccessLogConfig, AppConfig};
use medchain_custody::consent::{ConsentManager, UserRegistry};
use medchain_custody::custody::{AccessLogFailure, AccessLogWriter, RecordCustodyEngine};
use medchain_custody::events::BroadcastSink;
use medchain_custody::identity::{CallerContext, Role};
use medchain_custody::ledger::{Ledger, MemoryLedger};

pub const TEST_KEY: [u8; 32] = [0x42; 32];
pub const PATIENT_ORG: &str = "Org1MSP";
pub const PROVIDER_ORG: &str = "Org2MSP";

/// Fully wired in-memory custody stack.
pub struct Harness {
    pub ledger: Arc<dyn Ledger>,
    pub memory: MemoryLedger,
    pub backend: MemoryBackend,
    pub events: BroadcastSink,
    pub registry: UserRegistry,
    pub consent: Arc<ConsentManager>,
    pub engine: RecordCustodyEngine,
    pub audit: AuditTrail,
    pub access_failures: mpsc::Receiver<AccessLogFailure>,
}

impl Harness {
    /// Wait for queued access-log writes to land.
    pub async fn drain_access_log(&self) {
        self.engine
            .access_log()
            .flush()
            .await
            .expect("access log writer stopped");
    }

    pub async fn history_len(&self, key: &str) -> usize {
        self.ledger.history(key).collect_all().await.unwrap().len()
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.cipher_key_hex = hex::encode(TEST_KEY);
    config.access_log = AccessLogConfig {
        queue_capacity: 64,
        max_attempts: 3,
        retry_backoff_ms: 1,
        failure_channel_capacity: 64,
    };
    config
}

pub fn admin(org: &str) -> CallerContext {
    CallerContext::new("admin", Role::Admin, org)
}

pub fn patient(id: &str) -> CallerContext {
    CallerContext::new(id, Role::Patient, PATIENT_ORG)
}

pub fn doctor(id: &str) -> CallerContext {
    CallerContext::new(id, Role::Doctor, PROVIDER_ORG)
}

pub fn hospital(id: &str) -> CallerContext {
    CallerContext::new(id, Role::Hospital, PROVIDER_ORG)
}

/// Empty stack with no users.
pub fn empty_harness() -> Harness {
    let memory = MemoryLedger::new();
    harness_over(Arc::new(memory.clone()), memory)
}

/// Empty stack whose components talk to `ledger`, which must be backed by
/// `memory`.
pub fn harness_over(ledger: Arc<dyn Ledger>, memory: MemoryLedger) -> Harness {
    let config = test_config();
    let backend = MemoryBackend::new();
    let blobs = Arc::new(EncryptedBlobStore::new(
        backend.clone(),
        RecordCipher::new(TEST_KEY),
    ));
    let events = BroadcastSink::new(config.events.channel_capacity);

    let registry = UserRegistry::new(
        ledger.clone(),
        Arc::new(events.clone()),
        config.registration.clone(),
    );
    let consent = Arc::new(ConsentManager::new(ledger.clone(), Arc::new(events.clone())));
    let (access_log, access_failures) = AccessLogWriter::spawn(ledger.clone(), &config.access_log);
    let engine = RecordCustodyEngine::new(
        ledger.clone(),
        blobs,
        consent.clone(),
        Arc::new(events.clone()),
        access_log,
        config.records.clone(),
    );
    let audit = AuditTrail::new(ledger.clone());

    Harness {
        ledger,
        memory,
        backend,
        events,
        registry,
        consent,
        engine,
        audit,
        access_failures,
    }
}

/// Stack with patients P1 and P2, doctors D1 and D2, and hospital H1.
pub async fn setup() -> Harness {
    let harness = empty_harness();
    register_fixture_users(&harness).await;
    harness
}

pub async fn register_fixture_users(harness: &Harness) {
    let patients = admin(PATIENT_ORG);
    let providers = admin(PROVIDER_ORG);

    for (id, name) in [("P1", "Alice Patient"), ("P2", "Bob Patient")] {
        harness
            .registry
            .register_user(&patients, id, name, Role::Patient, PATIENT_ORG)
            .await
            .unwrap();
    }
    for (id, name, role) in [
        ("D1", "Dr. One", Role::Doctor),
        ("D2", "Dr. Two", Role::Doctor),
        ("H1", "General Hospital", Role::Hospital),
    ] {
        harness
            .registry
            .register_user(&providers, id, name, role, PROVIDER_ORG)
            .await
            .unwrap();
    }
}
