use std::{fmt, sync::Arc};

use sea_orm::{ConnectionTrait, DatabaseConnection, EntityTrait};
use uuid::Uuid;

use crate::{
    AuthorizationClient, DocumentSigner, EngineError, IssuanceSettings, ResultEngine, invoice,
};

mod annul;
mod batch;
mod generate;
mod queries;
mod submit;

pub use batch::{BatchItemError, BatchReport};
pub use queries::{DEFAULT_LIST_LIMIT, InvoiceListFilter};

/// Run a block inside a DB transaction, committing on success and rolling back on error.
macro_rules! with_tx {
    ($self:expr, |$tx:ident| $body:expr) => {{
        let $tx = $self.database.begin().await?;
        let result = $body;
        match result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }};
}

pub(crate) use with_tx;

/// Electronic invoice lifecycle manager.
///
/// Only the methods of this type write an invoice's `state`, `sequential` or
/// `access_key`. Calls to the authority and to the signer are never made
/// while a database transaction is open.
pub struct Engine {
    database: DatabaseConnection,
    issuance: IssuanceSettings,
    authority: Arc<dyn AuthorizationClient>,
    signer: Arc<dyn DocumentSigner>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("database", &self.database)
            .field("issuance", &self.issuance)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }
}

fn normalize_required_text(value: &str, label: &str) -> ResultEngine<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Validation(format!("{label} must not be empty")));
    }
    Ok(trimmed.to_string())
}

async fn find_model<C: ConnectionTrait>(conn: &C, invoice_id: Uuid) -> ResultEngine<invoice::Model> {
    invoice::Entity::find_by_id(invoice_id.to_string())
        .one(conn)
        .await?
        .ok_or_else(|| EngineError::KeyNotFound(format!("invoice {invoice_id}")))
}

/// The builder for `Engine`
#[derive(Default)]
pub struct EngineBuilder {
    database: DatabaseConnection,
    issuance: IssuanceSettings,
    authority: Option<Arc<dyn AuthorizationClient>>,
    signer: Option<Arc<dyn DocumentSigner>>,
}

impl EngineBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> EngineBuilder {
        self.database = db;
        self
    }

    /// Environment, emission type and optional fixed numeric code.
    pub fn issuance(mut self, issuance: IssuanceSettings) -> EngineBuilder {
        self.issuance = issuance;
        self
    }

    /// Pass the required authority client
    pub fn authority(mut self, client: Arc<dyn AuthorizationClient>) -> EngineBuilder {
        self.authority = Some(client);
        self
    }

    /// Pass the required document signer
    pub fn signer(mut self, signer: Arc<dyn DocumentSigner>) -> EngineBuilder {
        self.signer = Some(signer);
        self
    }

    /// Construct `Engine`
    pub async fn build(self) -> ResultEngine<Engine> {
        self.issuance.validate()?;
        let authority = self
            .authority
            .ok_or_else(|| EngineError::InvalidConfig("authority client is required".to_string()))?;
        let signer = self
            .signer
            .ok_or_else(|| EngineError::InvalidConfig("document signer is required".to_string()))?;
        Ok(Engine {
            database: self.database,
            issuance: self.issuance,
            authority,
            signer,
        })
    }
}
