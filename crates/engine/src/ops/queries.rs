use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use uuid::Uuid;

use crate::{ElectronicInvoice, EngineError, InvoiceState, ResultEngine, invoice};

use super::{Engine, find_model};

pub const DEFAULT_LIST_LIMIT: u64 = 100;

/// Filter for listing invoices. Empty `states` means every state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InvoiceListFilter {
    pub states: Vec<InvoiceState>,
    pub limit: Option<u64>,
}

impl Engine {
    pub async fn invoice(&self, invoice_id: Uuid) -> ResultEngine<ElectronicInvoice> {
        ElectronicInvoice::try_from(find_model(&self.database, invoice_id).await?)
    }

    pub async fn invoice_for_sale(&self, sale_id: i64) -> ResultEngine<ElectronicInvoice> {
        let model = invoice::Entity::find()
            .filter(invoice::Column::SaleId.eq(sale_id))
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound(format!("invoice for sale {sale_id}")))?;
        ElectronicInvoice::try_from(model)
    }

    /// Newest first.
    pub async fn list_invoices(
        &self,
        filter: &InvoiceListFilter,
    ) -> ResultEngine<Vec<ElectronicInvoice>> {
        let mut query = invoice::Entity::find();
        if !filter.states.is_empty() {
            query = query.filter(
                invoice::Column::State.is_in(filter.states.iter().map(|s| s.as_str())),
            );
        }
        let models = query
            .order_by_desc(invoice::Column::CreatedAt)
            .order_by_desc(invoice::Column::Sequential)
            .limit(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT))
            .all(&self.database)
            .await?;
        models.into_iter().map(ElectronicInvoice::try_from).collect()
    }

    /// Most complete document available: authorized, else signed, else the
    /// unsigned request.
    pub async fn invoice_xml(&self, invoice_id: Uuid) -> ResultEngine<String> {
        let model = find_model(&self.database, invoice_id).await?;
        Ok(model
            .authorized_xml
            .or(model.signed_xml)
            .unwrap_or(model.request_xml))
    }
}
