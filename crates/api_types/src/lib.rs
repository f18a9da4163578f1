use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod sale {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    pub struct IssuerNew {
        /// 13-digit RUC of the issuer.
        pub ruc: String,
        pub legal_name: String,
        pub trade_name: Option<String>,
        pub head_office_address: String,
        pub establishment_address: String,
        /// 3-digit establishment code, e.g. `001`.
        pub establishment: String,
        /// 3-digit emission point code, e.g. `002`.
        pub emission_point: String,
        #[serde(default)]
        pub accounting_required: bool,
        pub rimpe_legend: Option<String>,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum IdentificationType {
        Ruc,
        Cedula,
        Passport,
        FinalConsumer,
        Foreign,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct BuyerNew {
        pub identification_type: IdentificationType,
        pub identification: String,
        pub name: String,
        pub address: Option<String>,
        pub email: Option<String>,
    }

    /// IVA rate of a line.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum TaxRate {
        Zero,
        Twelve,
        Fourteen,
        Fifteen,
        Five,
        NotSubject,
        Exempt,
    }

    /// What a line was sold from.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "kind", rename_all = "snake_case")]
    pub enum LineSource {
        Service { service_id: i64 },
        AutomotiveProduct { product_id: i64 },
        PantryProduct { product_id: i64 },
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct LineItemNew {
        pub code: String,
        pub description: String,
        pub quantity: u32,
        pub unit_price_minor: i64,
        #[serde(default)]
        pub discount_minor: i64,
        pub tax_rate: TaxRate,
        pub source: LineSource,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum PaymentMethod {
        Cash,
        DebitCard,
        CreditCard,
        Transfer,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct PaymentNew {
        pub method: PaymentMethod,
        pub amount_minor: i64,
    }

    /// Sale snapshot an invoice is issued from. Amounts are in cents.
    #[derive(Debug, Serialize, Deserialize)]
    pub struct SaleNew {
        pub sale_id: i64,
        pub issuer: IssuerNew,
        pub buyer: BuyerNew,
        pub line_items: Vec<LineItemNew>,
        pub subtotal_minor: i64,
        #[serde(default)]
        pub discount_minor: i64,
        pub tax_minor: i64,
        pub total_minor: i64,
        pub emission_date: NaiveDate,
        /// Defaults to a single cash payment of the total.
        #[serde(default)]
        pub payments: Vec<PaymentNew>,
    }
}

pub mod invoice {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum InvoiceState {
        Generated,
        Sent,
        Authorized,
        Rejected,
        Annulled,
    }

    #[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct AuthorizationView {
        pub number: String,
        pub authorized_at: DateTime<Utc>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct InvoiceView {
        pub id: Uuid,
        pub sale_id: i64,
        /// Printed number, `establishment-emission_point-sequential`.
        pub number: String,
        pub establishment: String,
        pub emission_point: String,
        pub sequential: i64,
        pub access_key: String,
        pub emission_date: NaiveDate,
        pub environment: String,
        pub buyer_identification: String,
        pub buyer_name: String,
        pub subtotal_minor: i64,
        pub discount_minor: i64,
        pub tax_minor: i64,
        pub total_minor: i64,
        pub state: InvoiceState,
        pub authorization: Option<AuthorizationView>,
        /// Authority messages of the last submission, verbatim.
        pub authority_messages: Vec<String>,
        pub attempts: u32,
        pub annulment_reason: Option<String>,
        pub annulled_at: Option<DateTime<Utc>>,
        pub created_at: DateTime<Utc>,
        pub updated_at: DateTime<Utc>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct InvoiceListQuery {
        /// Comma separated states, e.g. `GENERATED,REJECTED`.
        pub state: Option<String>,
        pub limit: Option<u64>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct InvoiceListResponse {
        pub invoices: Vec<InvoiceView>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct AnnulRequest {
        pub reason: String,
    }
}

pub mod batch {
    use super::*;

    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct BatchRequest {
        pub limit: Option<u64>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct BatchItemErrorView {
        pub invoice_id: Uuid,
        pub kind: String,
        pub message: String,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct BatchReportView {
        pub succeeded: u32,
        pub failed: u32,
        pub errors: Vec<BatchItemErrorView>,
    }
}

pub mod error {
    use super::*;

    /// Body of every error response.
    #[derive(Debug, Serialize, Deserialize)]
    pub struct ErrorBody {
        /// Stable discriminator, e.g. `authority_rejected`.
        pub kind: String,
        pub message: String,
        /// Authority messages when the authority rejected the document.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub errors: Vec<String>,
    }
}
