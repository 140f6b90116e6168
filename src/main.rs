//! Medical record custody CLI
//!
//! Every invocation carries the caller's identity claims (`--caller-id`,
//! `--role`, `--org`) as issued by the enclosing identity provider.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use medchain_custody::audit::AuditTrail;
use medchain_custody::blob::{BlobStore, EncryptedBlobStore, FsBackend, RecordCipher};
use medchain_custody::config::AppConfig;
use medchain_custody::consent::{ConsentManager, UserRegistry};
use medchain_custody::custody::{AccessLogWriter, RecordCustodyEngine};
use medchain_custody::events::{EventSink, TracingSink};
use medchain_custody::identity::{CallerContext, Role};
use medchain_custody::ledger::{verify_history, CommitClock, Ledger, SqliteLedger};

#[derive(Parser)]
#[command(name = "medchain-custody")]
#[command(about = "Consent-gated custody of encrypted medical records")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Authenticated caller id
    #[arg(long, global = true, default_value = "admin")]
    caller_id: String,

    /// Caller role (patient, doctor, hospital, admin)
    #[arg(long, global = true, default_value = "admin")]
    role: String,

    /// Caller organisation
    #[arg(long, global = true, default_value = "Org1MSP")]
    org: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a user (admins only)
    RegisterUser {
        user_id: String,
        name: String,
        /// Role of the new user
        user_role: String,
        /// Organisation of the new user
        user_org: String,
    },

    /// Update a user's name or email (admins only)
    UpdateUser {
        user_id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        email: Option<String>,
    },

    /// List registered users
    ListUsers {
        /// Only users with this role
        #[arg(long)]
        with_role: Option<String>,
    },

    /// Grant a provider consent to the caller's records
    Grant { patient_id: String, provider_id: String },

    /// Revoke a provider's consent
    Revoke { patient_id: String, provider_id: String },

    /// Check whether a provider holds a patient's consent
    CheckConsent { patient_id: String, provider_id: String },

    /// Encrypt and store a document for a patient
    AddRecord {
        patient_id: String,

        /// Document to store
        #[arg(short, long)]
        file: PathBuf,

        /// Record id (generated when omitted)
        #[arg(long)]
        record_id: Option<String>,

        /// Clinical payload as a JSON object
        #[arg(long, default_value = "{}")]
        payload: String,
    },

    /// Read a record and verify its integrity
    ViewRecord {
        record_id: String,

        /// Write the document here instead of printing it as base64
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List a patient's records, or the caller's authored records
    ListRecords {
        #[arg(long)]
        patient: Option<String>,
    },

    /// Reconstruct a patient's audit trail
    AuditLog { subject_id: String },

    /// Reconstruct the system-wide audit trail (admins only)
    SystemEvents,

    /// Verify the hash chain of a ledger key
    VerifyHistory { key: String },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "medchain_custody=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;
    let role: Role = cli.role.parse()?;
    let caller = CallerContext::new(cli.caller_id.clone(), role, cli.org.clone());

    let clock = CommitClock::from_config(&config.ledger);
    let ledger: Arc<dyn Ledger> = Arc::new(
        SqliteLedger::connect(&config.database_url, clock)
            .await?
            .with_page_size(config.ledger.history_page_size),
    );
    info!("Ledger connected");

    let backend = FsBackend::open(&config.blob_dir).await?;
    let blobs: Arc<dyn BlobStore> = Arc::new(EncryptedBlobStore::new(
        backend,
        RecordCipher::new(config.cipher_key()?),
    ));
    let events: Arc<dyn EventSink> = Arc::new(TracingSink);

    let registry = UserRegistry::new(ledger.clone(), events.clone(), config.registration.clone());
    let consent = Arc::new(ConsentManager::new(ledger.clone(), events.clone()));
    let (access_log, mut access_failures) = AccessLogWriter::spawn(ledger.clone(), &config.access_log);
    let engine = RecordCustodyEngine::new(
        ledger.clone(),
        blobs,
        consent.clone(),
        events,
        access_log,
        config.records.clone(),
    );
    let audit = AuditTrail::new(ledger.clone());

    match cli.command {
        Commands::RegisterUser {
            user_id,
            name,
            user_role,
            user_org,
        } => {
            let user_role: Role = user_role.parse()?;
            let profile = registry
                .register_user(&caller, &user_id, &name, user_role, &user_org)
                .await?;
            print_json(&profile)?;
        }

        Commands::UpdateUser {
            user_id,
            name,
            email,
        } => {
            let profile = registry
                .update_user(&caller, &user_id, name.as_deref(), email.as_deref())
                .await?;
            print_json(&profile)?;
        }

        Commands::ListUsers { with_role } => {
            let filter = with_role.map(|r| r.parse::<Role>()).transpose()?;
            print_json(&registry.list_users(filter).await?)?;
        }

        Commands::Grant {
            patient_id,
            provider_id,
        } => {
            let update = consent
                .grant_consent(&patient_id, &provider_id, &caller.caller_id)
                .await?;
            if update.changed {
                println!("Consent granted to {}", provider_id);
            } else {
                println!("{} already holds consent", provider_id);
            }
        }

        Commands::Revoke {
            patient_id,
            provider_id,
        } => {
            consent
                .revoke_consent(&patient_id, &provider_id, &caller.caller_id)
                .await?;
            println!("Consent revoked for {}", provider_id);
        }

        Commands::CheckConsent {
            patient_id,
            provider_id,
        } => {
            let authorized = consent.is_authorized(&patient_id, &provider_id).await?;
            println!("{}", authorized);
        }

        Commands::AddRecord {
            patient_id,
            file,
            record_id,
            payload,
        } => {
            let plaintext = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("Payload is not valid JSON")?;
            let record_id = record_id.unwrap_or_else(|| format!("REC-{}", Uuid::new_v4()));

            let receipt = engine
                .add_record(&caller, &patient_id, &record_id, payload, &plaintext)
                .await?;
            print_json(&serde_json::json!({
                "recordId": receipt.record_id,
                "patientId": receipt.patient_id,
                "contentAddress": receipt.content_address,
                "contentDigest": receipt.content_digest,
                "createdAt": receipt.created_at,
                "txId": receipt.tx_id,
            }))?;
        }

        Commands::ViewRecord { record_id, output } => {
            let view = engine.view_record(&caller, &record_id).await?;
            let document = match (&view.plaintext, output) {
                (Some(bytes), Some(path)) => {
                    tokio::fs::write(&path, bytes)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    serde_json::Value::String(path.display().to_string())
                }
                (Some(bytes), None) => serde_json::Value::String(STANDARD.encode(bytes)),
                (None, _) => serde_json::Value::Null,
            };
            print_json(&serde_json::json!({
                "record": view.record,
                "verdict": view.verdict,
                "calculatedDigest": view.calculated_digest,
                "document": document,
            }))?;
        }

        Commands::ListRecords { patient } => {
            let records = match patient {
                Some(patient_id) => engine.records_for_patient(&caller, &patient_id).await?,
                None => engine.records_by_author(&caller).await?,
            };
            print_json(&records)?;
        }

        Commands::AuditLog { subject_id } => {
            let report = audit.audit_log_as(&caller, &subject_id).await?;
            for skipped in &report.skipped {
                eprintln!("skipped {} v{}: {}", skipped.key, skipped.version, skipped.reason);
            }
            for event in &report.events {
                println!("{}", event);
            }
        }

        Commands::SystemEvents => {
            print_json(&audit.system_events(&caller).await?)?;
        }

        Commands::VerifyHistory { key } => {
            let entries = ledger.history(&key).collect_all().await?;
            let result = verify_history(&entries);
            println!("{}", result.summary());
            if !result.is_valid {
                return Err(anyhow!("History of {} failed verification", key));
            }
        }
    }

    engine.access_log().flush().await?;
    while let Ok(failure) = access_failures.try_recv() {
        error!(
            "Access to {} by {} was not logged: {}",
            failure.request.record_id, failure.request.actor_id, failure.error
        );
    }

    Ok(())
}
