use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{EngineError, InvoiceState, ResultEngine, invoice};

use super::Engine;

/// One invoice the batch could not get authorized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItemError {
    pub invoice_id: Uuid,
    pub kind: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub succeeded: u32,
    pub failed: u32,
    pub errors: Vec<BatchItemError>,
}

impl Engine {
    /// Submits up to `limit` GENERATED or REJECTED invoices, oldest first, one
    /// after the other. Failures are collected in the report.
    #[instrument(skip(self))]
    pub async fn process_batch(&self, limit: u64) -> ResultEngine<BatchReport> {
        let mut report = BatchReport::default();
        if limit == 0 {
            return Ok(report);
        }

        let pending = invoice::Entity::find()
            .filter(invoice::Column::State.is_in([
                InvoiceState::Generated.as_str(),
                InvoiceState::Rejected.as_str(),
            ]))
            .order_by_asc(invoice::Column::CreatedAt)
            .order_by_asc(invoice::Column::Sequential)
            .limit(limit)
            .all(&self.database)
            .await?;

        // An unreadable row is reported like any other failed item.
        for model in pending {
            let (invoice_id, result) = match Uuid::parse_str(&model.id) {
                Ok(id) => (id, self.submit(id).await),
                Err(err) => (
                    Uuid::nil(),
                    Err(EngineError::Validation(format!(
                        "invalid invoice id {}: {err}",
                        model.id
                    ))),
                ),
            };
            match result {
                Ok(_) => report.succeeded += 1,
                Err(err) => {
                    warn!(%invoice_id, error = %err, "batch item failed");
                    report.failed += 1;
                    report.errors.push(BatchItemError {
                        invoice_id,
                        kind: err.code().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "batch processed"
        );
        Ok(report)
    }
}
