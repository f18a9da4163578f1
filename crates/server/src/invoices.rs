//! Electronic invoice API endpoints

use api_types::{
    invoice::{
        AnnulRequest, AuthorizationView, InvoiceListQuery, InvoiceListResponse,
        InvoiceState as ApiState, InvoiceView,
    },
    sale::{
        BuyerNew, IdentificationType as ApiIdentification, IssuerNew, LineItemNew,
        LineSource as ApiSource, PaymentMethod as ApiMethod, SaleNew, TaxRate as ApiRate,
    },
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use engine::{ElectronicInvoice, InvoiceListFilter, InvoiceState, MoneyCents};
use uuid::Uuid;

use crate::{ServerError, server::ServerState};

fn map_state(state: InvoiceState) -> ApiState {
    match state {
        InvoiceState::Generated => ApiState::Generated,
        InvoiceState::Sent => ApiState::Sent,
        InvoiceState::Authorized => ApiState::Authorized,
        InvoiceState::Rejected => ApiState::Rejected,
        InvoiceState::Annulled => ApiState::Annulled,
    }
}

fn map_identification(kind: ApiIdentification) -> engine::IdentificationType {
    match kind {
        ApiIdentification::Ruc => engine::IdentificationType::Ruc,
        ApiIdentification::Cedula => engine::IdentificationType::Cedula,
        ApiIdentification::Passport => engine::IdentificationType::Passport,
        ApiIdentification::FinalConsumer => engine::IdentificationType::FinalConsumer,
        ApiIdentification::Foreign => engine::IdentificationType::Foreign,
    }
}

fn map_rate(rate: ApiRate) -> engine::TaxRate {
    match rate {
        ApiRate::Zero => engine::TaxRate::Zero,
        ApiRate::Twelve => engine::TaxRate::Twelve,
        ApiRate::Fourteen => engine::TaxRate::Fourteen,
        ApiRate::Fifteen => engine::TaxRate::Fifteen,
        ApiRate::Five => engine::TaxRate::Five,
        ApiRate::NotSubject => engine::TaxRate::NotSubject,
        ApiRate::Exempt => engine::TaxRate::Exempt,
    }
}

fn map_source(source: ApiSource) -> engine::LineSource {
    match source {
        ApiSource::Service { service_id } => engine::LineSource::Service { service_id },
        ApiSource::AutomotiveProduct { product_id } => {
            engine::LineSource::AutomotiveProduct { product_id }
        }
        ApiSource::PantryProduct { product_id } => engine::LineSource::PantryProduct { product_id },
    }
}

fn map_method(method: ApiMethod) -> engine::PaymentMethod {
    match method {
        ApiMethod::Cash => engine::PaymentMethod::Cash,
        ApiMethod::DebitCard => engine::PaymentMethod::DebitCard,
        ApiMethod::CreditCard => engine::PaymentMethod::CreditCard,
        ApiMethod::Transfer => engine::PaymentMethod::Transfer,
    }
}

fn map_issuer(issuer: IssuerNew) -> engine::IssuerInfo {
    engine::IssuerInfo {
        ruc: issuer.ruc,
        legal_name: issuer.legal_name,
        trade_name: issuer.trade_name,
        head_office_address: issuer.head_office_address,
        establishment_address: issuer.establishment_address,
        establishment: issuer.establishment,
        emission_point: issuer.emission_point,
        accounting_required: issuer.accounting_required,
        rimpe_legend: issuer.rimpe_legend,
    }
}

fn map_buyer(buyer: BuyerNew) -> engine::BuyerInfo {
    engine::BuyerInfo {
        identification_type: map_identification(buyer.identification_type),
        identification: buyer.identification,
        name: buyer.name,
        address: buyer.address,
        email: buyer.email,
    }
}

fn map_line(line: LineItemNew) -> engine::LineItem {
    engine::LineItem {
        code: line.code,
        description: line.description,
        quantity: line.quantity,
        unit_price: MoneyCents::new(line.unit_price_minor),
        discount: MoneyCents::new(line.discount_minor),
        tax_rate: map_rate(line.tax_rate),
        source: map_source(line.source),
    }
}

pub(crate) fn map_sale(sale: SaleNew) -> engine::Sale {
    engine::Sale {
        sale_id: sale.sale_id,
        issuer: map_issuer(sale.issuer),
        buyer: map_buyer(sale.buyer),
        line_items: sale.line_items.into_iter().map(map_line).collect(),
        subtotal: MoneyCents::new(sale.subtotal_minor),
        discount: MoneyCents::new(sale.discount_minor),
        tax: MoneyCents::new(sale.tax_minor),
        total: MoneyCents::new(sale.total_minor),
        emission_date: sale.emission_date,
        payments: sale
            .payments
            .into_iter()
            .map(|p| engine::Payment {
                method: map_method(p.method),
                amount: MoneyCents::new(p.amount_minor),
            })
            .collect(),
    }
}

pub(crate) fn invoice_view(invoice: ElectronicInvoice) -> InvoiceView {
    InvoiceView {
        id: invoice.id,
        sale_id: invoice.sale_id,
        number: invoice.number(),
        access_key: invoice.access_key.as_str().to_string(),
        establishment: invoice.establishment,
        emission_point: invoice.emission_point,
        sequential: invoice.sequential,
        emission_date: invoice.emission_date,
        environment: invoice.environment.as_str().to_string(),
        buyer_identification: invoice.buyer_identification,
        buyer_name: invoice.buyer_name,
        subtotal_minor: invoice.subtotal.cents(),
        discount_minor: invoice.discount.cents(),
        tax_minor: invoice.tax.cents(),
        total_minor: invoice.total.cents(),
        state: map_state(invoice.state),
        authorization: invoice.authorization.map(|a| AuthorizationView {
            number: a.number,
            authorized_at: a.authorized_at,
        }),
        authority_messages: invoice.authority_messages,
        attempts: invoice.attempts,
        annulment_reason: invoice.annulment_reason,
        annulled_at: invoice.annulled_at,
        created_at: invoice.created_at,
        updated_at: invoice.updated_at,
    }
}

fn parse_states(raw: Option<&str>) -> Result<Vec<InvoiceState>, ServerError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            InvoiceState::try_from(s)
                .map_err(|_| ServerError::Generic(format!("unknown invoice state '{s}'")))
        })
        .collect()
}

pub async fn invoice_new(
    State(state): State<ServerState>,
    Json(payload): Json<SaleNew>,
) -> Result<(StatusCode, Json<InvoiceView>), ServerError> {
    let invoice = state.engine.generate(&map_sale(payload)).await?;
    Ok((StatusCode::CREATED, Json(invoice_view(invoice))))
}

pub async fn list(
    State(state): State<ServerState>,
    Query(query): Query<InvoiceListQuery>,
) -> Result<Json<InvoiceListResponse>, ServerError> {
    let filter = InvoiceListFilter {
        states: parse_states(query.state.as_deref())?,
        limit: query.limit,
    };
    let invoices = state.engine.list_invoices(&filter).await?;

    Ok(Json(InvoiceListResponse {
        invoices: invoices.into_iter().map(invoice_view).collect(),
    }))
}

pub async fn get(
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
) -> Result<Json<InvoiceView>, ServerError> {
    Ok(Json(invoice_view(state.engine.invoice(id).await?)))
}

/// Document as stored: authorized, else signed, else unsigned.
pub async fn xml(
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServerError> {
    let document = state.engine.invoice_xml(id).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/xml; charset=utf-8")],
        document,
    ))
}

pub async fn submit(
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
) -> Result<Json<InvoiceView>, ServerError> {
    state.engine.submit(id).await?;
    Ok(Json(invoice_view(state.engine.invoice(id).await?)))
}

pub async fn resubmit(
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
) -> Result<Json<InvoiceView>, ServerError> {
    state.engine.resubmit(id).await?;
    Ok(Json(invoice_view(state.engine.invoice(id).await?)))
}

pub async fn check_authorization(
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
) -> Result<Json<InvoiceView>, ServerError> {
    state.engine.check_authorization(id).await?;
    Ok(Json(invoice_view(state.engine.invoice(id).await?)))
}

pub async fn annul(
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AnnulRequest>,
) -> Result<Json<InvoiceView>, ServerError> {
    let invoice = state.engine.annul(id, &payload.reason).await?;
    Ok(Json(invoice_view(invoice)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_parsed_case_insensitively() {
        let states = parse_states(Some("generated, REJECTED")).ok().unwrap();
        assert_eq!(states, vec![InvoiceState::Generated, InvoiceState::Rejected]);
        assert!(parse_states(None).ok().unwrap().is_empty());
        assert!(parse_states(Some("PAID")).is_err());
    }
}
