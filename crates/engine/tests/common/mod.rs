#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sea_orm::{Database, DatabaseConnection};
use tokio::sync::Notify;
use uuid::Uuid;

use engine::{
    AccessKey, AuthorityOutcome, Authorization, AuthorizationClient, BuyerInfo, DocumentSigner,
    Engine, EngineError, IdentificationType, IssuanceSettings, IssuerInfo, LineItem, LineSource,
    MoneyCents, Sale, TaxRate,
};
use migration::MigratorTrait;

/// Holds a submission inside the authority call until the test releases it.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

/// Authority double answering from a queue; authorizes when the queue is empty.
#[derive(Default)]
pub struct FakeAuthority {
    outcomes: Mutex<VecDeque<AuthorityOutcome>>,
    gate: Option<Arc<Gate>>,
    pub submits: AtomicUsize,
    pub queries: AtomicUsize,
}

impl FakeAuthority {
    pub fn with_outcomes(outcomes: Vec<AuthorityOutcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            ..Self::default()
        })
    }

    /// Authority whose submissions wait on the returned gate.
    pub fn gated() -> (Arc<Self>, Arc<Gate>) {
        let gate = Arc::new(Gate::default());
        let authority = Arc::new(Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::default()
        });
        (authority, gate)
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn push(&self, outcome: AuthorityOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    fn next(&self, access_key: &AccessKey) -> AuthorityOutcome {
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| authorized(access_key.as_str()))
    }
}

#[async_trait]
impl AuthorizationClient for FakeAuthority {
    async fn submit(&self, access_key: &AccessKey, signed_xml: &str) -> AuthorityOutcome {
        assert!(signed_xml.contains("<ds:Signature"));
        self.submits.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        self.next(access_key)
    }

    async fn query(&self, access_key: &AccessKey) -> AuthorityOutcome {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.next(access_key)
    }
}

pub fn authorized(number: &str) -> AuthorityOutcome {
    AuthorityOutcome::Authorized(Authorization {
        number: number.to_string(),
        authorized_at: Utc::now(),
        authorized_xml: Some(format!("<autorizacion>{number}</autorizacion>")),
    })
}

pub fn rejected(message: &str) -> AuthorityOutcome {
    AuthorityOutcome::Rejected {
        errors: vec![message.to_string()],
    }
}

/// Signer double inserting an empty signature element.
#[derive(Default)]
pub struct FakeSigner {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl FakeSigner {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentSigner for FakeSigner {
    async fn sign(&self, xml: &str) -> Result<String, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EngineError::Signing("certificate expired".to_string()));
        }
        Ok(xml.replace("</factura>", "<ds:Signature></ds:Signature></factura>"))
    }
}

pub struct Harness {
    pub engine: Engine,
    pub db: DatabaseConnection,
    pub authority: Arc<FakeAuthority>,
    pub signer: Arc<FakeSigner>,
}

async fn build(
    db: DatabaseConnection,
    issuance: IssuanceSettings,
    authority: Arc<FakeAuthority>,
    signer: Arc<FakeSigner>,
) -> Harness {
    migration::Migrator::up(&db, None).await.unwrap();
    let engine = Engine::builder()
        .database(db.clone())
        .issuance(issuance)
        .authority(authority.clone())
        .signer(signer.clone())
        .build()
        .await
        .unwrap();
    Harness {
        engine,
        db,
        authority,
        signer,
    }
}

pub async fn harness() -> Harness {
    harness_with(FakeAuthority::with_outcomes(Vec::new()), Arc::default()).await
}

pub async fn harness_with(authority: Arc<FakeAuthority>, signer: Arc<FakeSigner>) -> Harness {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    build(db, IssuanceSettings::default(), authority, signer).await
}

/// Harness issuing every access key with the same numeric code.
pub async fn harness_with_numeric_code(numeric_code: u32) -> Harness {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    let issuance = IssuanceSettings {
        numeric_code: Some(numeric_code),
        ..IssuanceSettings::default()
    };
    build(
        db,
        issuance,
        FakeAuthority::with_outcomes(Vec::new()),
        Arc::default(),
    )
    .await
}

pub async fn harness_with_file_db() -> (Harness, std::path::PathBuf) {
    harness_with_file_db_and(FakeAuthority::with_outcomes(Vec::new())).await
}

pub async fn harness_with_file_db_and(authority: Arc<FakeAuthority>) -> (Harness, std::path::PathBuf) {
    let root = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../target/test_dbs");
    std::fs::create_dir_all(&root).unwrap();

    let path = root.join(format!("engine_{}.db", Uuid::new_v4()));
    let url = format!("sqlite:{}?mode=rwc", path.display());

    let db = Database::connect(&url).await.unwrap();
    let harness = build(db, IssuanceSettings::default(), authority, Arc::default()).await;
    (harness, path)
}

/// One car wash at 10.00 + one oil change at 2 x 8.50 with 1.00 off, all at 15%.
pub fn sale(sale_id: i64) -> Sale {
    Sale {
        sale_id,
        issuer: IssuerInfo {
            ruc: "1790012345001".to_string(),
            legal_name: "Lubricadora El Pana S.A.".to_string(),
            trade_name: Some("El Pana".to_string()),
            head_office_address: "Av. Amazonas N34-12".to_string(),
            establishment_address: "Av. Amazonas N34-12".to_string(),
            establishment: "001".to_string(),
            emission_point: "001".to_string(),
            accounting_required: false,
            rimpe_legend: None,
        },
        buyer: BuyerInfo {
            identification_type: IdentificationType::Cedula,
            identification: "1712345678".to_string(),
            name: "María Pérez".to_string(),
            address: None,
            email: Some("maria@example.com".to_string()),
        },
        line_items: vec![
            LineItem {
                code: "LAV-01".to_string(),
                description: "Lavado completo".to_string(),
                quantity: 1,
                unit_price: MoneyCents::new(1_000),
                discount: MoneyCents::ZERO,
                tax_rate: TaxRate::Fifteen,
                source: LineSource::Service { service_id: 3 },
            },
            LineItem {
                code: "ACE-10W30".to_string(),
                description: "Aceite 10W30".to_string(),
                quantity: 2,
                unit_price: MoneyCents::new(850),
                discount: MoneyCents::new(100),
                tax_rate: TaxRate::Fifteen,
                source: LineSource::AutomotiveProduct { product_id: 17 },
            },
        ],
        subtotal: MoneyCents::new(2_700),
        discount: MoneyCents::new(100),
        tax: MoneyCents::new(390),
        total: MoneyCents::new(2_990),
        emission_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        payments: Vec::new(),
    }
}
