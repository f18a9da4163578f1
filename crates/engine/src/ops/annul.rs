use chrono::Utc;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, TransactionTrait, sea_query::Expr};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{ElectronicInvoice, EngineError, InvoiceState, ResultEngine, invoice};

use super::{Engine, find_model, normalize_required_text, with_tx};

impl Engine {
    /// Annuls an AUTHORIZED invoice. The record is kept with its reason and
    /// timestamp.
    #[instrument(skip(self, reason))]
    pub async fn annul(&self, invoice_id: Uuid, reason: &str) -> ResultEngine<ElectronicInvoice> {
        let reason = normalize_required_text(reason, "annulment reason")?;
        let now = Utc::now();

        let annulled = with_tx!(self, |db_tx| {
            let result = invoice::Entity::update_many()
                .col_expr(
                    invoice::Column::State,
                    Expr::value(InvoiceState::Annulled.as_str()),
                )
                .col_expr(
                    invoice::Column::AnnulmentReason,
                    Expr::value(Some(reason.clone())),
                )
                .col_expr(invoice::Column::AnnulledAt, Expr::value(Some(now)))
                .col_expr(invoice::Column::UpdatedAt, Expr::value(now))
                .filter(invoice::Column::Id.eq(invoice_id.to_string()))
                .filter(invoice::Column::State.eq(InvoiceState::Authorized.as_str()))
                .exec(&db_tx)
                .await?;

            let model = find_model(&db_tx, invoice_id).await?;
            if result.rows_affected == 0 {
                return Err(EngineError::InvalidTransition(format!(
                    "invoice {invoice_id} is {}; only AUTHORIZED invoices can be annulled",
                    model.state
                )));
            }
            ElectronicInvoice::try_from(model)
        })?;

        info!(%invoice_id, "invoice annulled");
        Ok(annulled)
    }
}
