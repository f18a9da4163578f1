use chrono::Utc;
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, SqlErr,
    TransactionTrait,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    AccessKey, AccessKeyFields, ElectronicInvoice, EngineError, InvoiceHeader, InvoiceState,
    ResultEngine, Sale, access_key::INVOICE_DOCUMENT_TYPE, build_invoice_xml, invoice, sequence,
};

use super::{Engine, with_tx};

const MAX_ALLOCATION_ATTEMPTS: u32 = 3;

impl Engine {
    /// Issues the electronic invoice of `sale` in state `GENERATED`.
    ///
    /// The sequential is allocated, the access key and the document are built
    /// and the row is inserted in one transaction. A lost race on the
    /// sequential uniqueness is retried with a fresh allocation.
    #[instrument(skip(self, sale), fields(sale_id = sale.sale_id))]
    pub async fn generate(&self, sale: &Sale) -> ResultEngine<ElectronicInvoice> {
        sale.validate()?;
        let numeric_code = self.numeric_code();

        let mut last_conflict = String::new();
        for attempt in 1..=MAX_ALLOCATION_ATTEMPTS {
            match self.try_generate(sale, numeric_code).await {
                Ok(invoice) => {
                    info!(
                        invoice_id = %invoice.id,
                        number = %invoice.number(),
                        access_key = %invoice.access_key,
                        "invoice generated"
                    );
                    return Ok(invoice);
                }
                Err(EngineError::Storage(conflict)) => {
                    warn!(attempt, %conflict, "sequential conflict, retrying");
                    last_conflict = conflict;
                }
                Err(err) => return Err(err),
            }
        }
        Err(EngineError::Storage(format!(
            "no sequential committed after {MAX_ALLOCATION_ATTEMPTS} attempts: {last_conflict}"
        )))
    }

    /// Next sequential the key would receive. Nothing is reserved.
    pub async fn next_sequential(&self, establishment: &str, emission_point: &str) -> ResultEngine<i64> {
        Ok(self.last_sequential(establishment, emission_point).await? + 1)
    }

    /// Highest sequential issued (or reserved) for the key, `0` if none.
    pub async fn last_sequential(&self, establishment: &str, emission_point: &str) -> ResultEngine<i64> {
        sequence::last(&self.database, establishment, emission_point).await
    }

    fn numeric_code(&self) -> u32 {
        self.issuance
            .numeric_code
            .unwrap_or_else(|| rand::thread_rng().gen_range(10_000_000..=99_999_999))
    }

    async fn try_generate(&self, sale: &Sale, numeric_code: u32) -> ResultEngine<ElectronicInvoice> {
        with_tx!(self, |db_tx| {
            let issuer = &sale.issuer;
            // First statement is the counter write, so the key lock is held
            // for the whole transaction.
            let sequential =
                sequence::allocate(&db_tx, &issuer.establishment, &issuer.emission_point).await?;

            let existing = invoice::Entity::find()
                .filter(invoice::Column::SaleId.eq(sale.sale_id))
                .one(&db_tx)
                .await?;
            if existing.is_some() {
                return Err(EngineError::DuplicateInvoice(sale.sale_id));
            }

            let access_key = AccessKey::build(&AccessKeyFields {
                emission_date: sale.emission_date,
                document_type: INVOICE_DOCUMENT_TYPE,
                issuer_ruc: &issuer.ruc,
                environment: self.issuance.environment,
                establishment: &issuer.establishment,
                emission_point: &issuer.emission_point,
                sequential,
                numeric_code,
                emission_type: self.issuance.emission_type,
            })?;
            let header = InvoiceHeader {
                environment: self.issuance.environment,
                emission_type: self.issuance.emission_type,
                access_key: access_key.clone(),
                sequential,
            };
            let request_xml = build_invoice_xml(&header, sale)?;

            let now = Utc::now();
            let invoice = ElectronicInvoice {
                id: Uuid::new_v4(),
                sale_id: sale.sale_id,
                establishment: issuer.establishment.clone(),
                emission_point: issuer.emission_point.clone(),
                sequential,
                access_key,
                numeric_code,
                emission_date: sale.emission_date,
                environment: self.issuance.environment,
                buyer_identification: sale.buyer.identification.trim().to_string(),
                buyer_name: sale.buyer.name.trim().to_string(),
                subtotal: sale.subtotal,
                discount: sale.discount,
                tax: sale.tax,
                total: sale.total,
                state: InvoiceState::Generated,
                request_xml,
                signed_xml: None,
                authorization: None,
                authority_messages: Vec::new(),
                attempts: 0,
                sending_since: None,
                annulment_reason: None,
                annulled_at: None,
                created_at: now,
                updated_at: now,
            };

            if let Err(err) = invoice::ActiveModel::from(&invoice).insert(&db_tx).await {
                return Err(classify_insert_error(&db_tx, err, sale.sale_id).await);
            }

            Ok(invoice)
        })
    }
}

/// Maps a failed invoice insert. A uniqueness conflict is a duplicate when
/// the sale already holds an invoice; any other conflict is a lost race on
/// the sequential or the access key.
async fn classify_insert_error<C: ConnectionTrait>(conn: &C, err: DbErr, sale_id: i64) -> EngineError {
    let Some(SqlErr::UniqueConstraintViolation(detail)) = err.sql_err() else {
        return EngineError::Database(err);
    };
    let existing = invoice::Entity::find()
        .filter(invoice::Column::SaleId.eq(sale_id))
        .one(conn)
        .await;
    match existing {
        Ok(Some(_)) => EngineError::DuplicateInvoice(sale_id),
        Ok(None) => EngineError::Storage(detail),
        Err(query_err) => EngineError::Database(query_err),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use migration::MigratorTrait;
    use sea_orm::{Database, DatabaseConnection};

    use super::*;
    use crate::{EmissionType, Environment, MoneyCents};

    async fn database() -> DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        migration::Migrator::up(&db, None).await.unwrap();
        db
    }

    fn issued(sale_id: i64, sequential: i64) -> ElectronicInvoice {
        let emission_date = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let access_key = AccessKey::build(&AccessKeyFields {
            emission_date,
            document_type: INVOICE_DOCUMENT_TYPE,
            issuer_ruc: "1790012345001",
            environment: Environment::Test,
            establishment: "001",
            emission_point: "001",
            sequential,
            numeric_code: 12_345_678,
            emission_type: EmissionType::Normal,
        })
        .unwrap();
        let now = Utc::now();
        ElectronicInvoice {
            id: Uuid::new_v4(),
            sale_id,
            establishment: "001".to_string(),
            emission_point: "001".to_string(),
            sequential,
            access_key,
            numeric_code: 12_345_678,
            emission_date,
            environment: Environment::Test,
            buyer_identification: "9999999999999".to_string(),
            buyer_name: "CONSUMIDOR FINAL".to_string(),
            subtotal: MoneyCents::new(1_000),
            discount: MoneyCents::ZERO,
            tax: MoneyCents::new(150),
            total: MoneyCents::new(1_150),
            state: InvoiceState::Generated,
            request_xml: "<factura></factura>".to_string(),
            signed_xml: None,
            authorization: None,
            authority_messages: Vec::new(),
            attempts: 0,
            sending_since: None,
            annulment_reason: None,
            annulled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn insert_err(db: &DatabaseConnection, invoice: &ElectronicInvoice) -> DbErr {
        invoice::ActiveModel::from(invoice)
            .insert(db)
            .await
            .unwrap_err()
    }

    #[tokio::test]
    async fn conflict_on_an_invoiced_sale_is_a_duplicate() {
        let db = database().await;
        invoice::ActiveModel::from(&issued(5, 1)).insert(&db).await.unwrap();

        let err = insert_err(&db, &issued(5, 2)).await;
        assert_eq!(
            classify_insert_error(&db, err, 5).await,
            EngineError::DuplicateInvoice(5)
        );
    }

    #[tokio::test]
    async fn conflict_on_the_sequential_is_a_retryable_storage_error() {
        let db = database().await;
        invoice::ActiveModel::from(&issued(5, 1)).insert(&db).await.unwrap();

        let err = insert_err(&db, &issued(6, 1)).await;
        let classified = classify_insert_error(&db, err, 6).await;
        assert!(matches!(classified, EngineError::Storage(_)), "{classified:?}");
        assert!(classified.is_retryable());
    }

    #[tokio::test]
    async fn other_failures_stay_database_errors() {
        let db = database().await;
        let err = DbErr::Custom("disk I/O error".to_string());
        assert!(matches!(
            classify_insert_error(&db, err, 1).await,
            EngineError::Database(_)
        ));
    }
}
