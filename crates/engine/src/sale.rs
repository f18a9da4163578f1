//! Sale snapshot an invoice is issued from.
//!
//! The sale is owned by the point-of-sale side of the system; the engine only
//! reads it once, at generation, and keeps the monetary totals it reconciled.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{EngineError, MoneyCents, ResultEngine, access_key::require_digits};

/// Amounts may differ from the recomputed ones by at most this many cents.
pub const RECONCILE_TOLERANCE_CENTS: u64 = 1;

/// Identification used for a final consumer (`consumidor final`).
pub const FINAL_CONSUMER_ID: &str = "9999999999999";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerInfo {
    pub ruc: String,
    pub legal_name: String,
    pub trade_name: Option<String>,
    pub head_office_address: String,
    pub establishment_address: String,
    pub establishment: String,
    pub emission_point: String,
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

impl IdentificationType {
    /// `tipoIdentificacionComprador` code.
    pub fn code(self) -> &'static str {
        match self {
            Self::Ruc => "04",
            Self::Cedula => "05",
            Self::Passport => "06",
            Self::FinalConsumer => "07",
            Self::Foreign => "08",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyerInfo {
    pub identification_type: IdentificationType,
    pub identification: String,
    pub name: String,
    pub address: Option<String>,
    pub email: Option<String>,
}

impl BuyerInfo {
    pub fn final_consumer() -> Self {
        Self {
            identification_type: IdentificationType::FinalConsumer,
            identification: FINAL_CONSUMER_ID.to_string(),
            name: "CONSUMIDOR FINAL".to_string(),
            address: None,
            email: None,
        }
    }
}

/// IVA rates accepted by the SRI, by `codigoPorcentaje`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
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

impl TaxRate {
    pub fn code(self) -> &'static str {
        match self {
            Self::Zero => "0",
            Self::Twelve => "2",
            Self::Fourteen => "3",
            Self::Fifteen => "4",
            Self::Five => "5",
            Self::NotSubject => "6",
            Self::Exempt => "7",
        }
    }

    /// Rate in basis points.
    pub fn basis_points(self) -> u32 {
        match self {
            Self::Zero | Self::NotSubject | Self::Exempt => 0,
            Self::Twelve => 1_200,
            Self::Fourteen => 1_400,
            Self::Fifteen => 1_500,
            Self::Five => 500,
        }
    }

    /// The `tarifa` element, e.g. `15.00`.
    pub fn percent_label(self) -> String {
        let bp = self.basis_points();
        format!("{}.{:02}", bp / 100, bp % 100)
    }
}

impl TryFrom<&str> for TaxRate {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "0" => Ok(Self::Zero),
            "2" => Ok(Self::Twelve),
            "3" => Ok(Self::Fourteen),
            "4" => Ok(Self::Fifteen),
            "5" => Ok(Self::Five),
            "6" => Ok(Self::NotSubject),
            "7" => Ok(Self::Exempt),
            other => Err(EngineError::Validation(format!(
                "unknown IVA rate code: {other}"
            ))),
        }
    }
}

/// What a line item was sold from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LineSource {
    Service { service_id: i64 },
    AutomotiveProduct { product_id: i64 },
    PantryProduct { product_id: i64 },
}

impl LineSource {
    /// Internal reference written as `codigoAuxiliar`.
    pub fn reference(&self) -> String {
        match self {
            Self::Service { service_id } => format!("SERV-{service_id}"),
            Self::AutomotiveProduct { product_id } => format!("AUTO-{product_id}"),
            Self::PantryProduct { product_id } => format!("DESP-{product_id}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub code: String,
    pub description: String,
    pub quantity: u32,
    pub unit_price: MoneyCents,
    #[serde(default)]
    pub discount: MoneyCents,
    pub tax_rate: TaxRate,
    pub source: LineSource,
}

impl LineItem {
    /// Quantity times unit price, before discount.
    pub fn gross(&self) -> MoneyCents {
        self.unit_price * self.quantity
    }

    /// `precioTotalSinImpuesto`: gross minus the line discount.
    pub fn net(&self) -> MoneyCents {
        self.gross() - self.discount
    }

    pub fn tax(&self) -> MoneyCents {
        self.net().apply_rate_bp(self.tax_rate.basis_points())
    }
}

/// SRI payment method codes (`formaPago`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Cash,
    DebitCard,
    CreditCard,
    Transfer,
}

impl PaymentMethod {
    pub fn code(self) -> &'static str {
        match self {
            Self::Cash => "01",
            Self::DebitCard => "16",
            Self::CreditCard => "19",
            Self::Transfer => "20",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub method: PaymentMethod,
    pub amount: MoneyCents,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub sale_id: i64,
    pub issuer: IssuerInfo,
    pub buyer: BuyerInfo,
    pub line_items: Vec<LineItem>,
    pub subtotal: MoneyCents,
    pub discount: MoneyCents,
    pub tax: MoneyCents,
    pub total: MoneyCents,
    pub emission_date: NaiveDate,
    #[serde(default)]
    pub payments: Vec<Payment>,
}

/// Totals recomputed from the line items.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComputedTotals {
    pub subtotal: MoneyCents,
    pub discount: MoneyCents,
    pub tax: MoneyCents,
    pub total: MoneyCents,
}

impl Sale {
    /// Fails with `Validation` when a sum does not fit in an `i64` of cents.
    pub fn computed_totals(&self) -> ResultEngine<ComputedTotals> {
        let mut subtotal = MoneyCents::ZERO;
        let mut discount = MoneyCents::ZERO;
        let mut tax = MoneyCents::ZERO;
        for line in &self.line_items {
            let gross = line
                .unit_price
                .checked_mul(line.quantity)
                .ok_or_else(amount_too_large)?;
            let net = gross.checked_sub(line.discount).ok_or_else(amount_too_large)?;
            subtotal = subtotal.checked_add(gross).ok_or_else(amount_too_large)?;
            discount = discount
                .checked_add(line.discount)
                .ok_or_else(amount_too_large)?;
            tax = tax
                .checked_add(net.apply_rate_bp(line.tax_rate.basis_points()))
                .ok_or_else(amount_too_large)?;
        }
        let total = net_total(subtotal, discount, tax)?;
        Ok(ComputedTotals {
            subtotal,
            discount,
            tax,
            total,
        })
    }

    /// Payments as declared, or a single cash payment of the total.
    pub fn payments_or_default(&self) -> Vec<Payment> {
        if self.payments.is_empty() {
            vec![Payment {
                method: PaymentMethod::Cash,
                amount: self.total,
            }]
        } else {
            self.payments.clone()
        }
    }

    /// Field-level checks followed by [`Sale::reconcile`].
    pub fn validate(&self) -> ResultEngine<()> {
        if self.sale_id <= 0 {
            return Err(EngineError::Validation("sale id must be > 0".to_string()));
        }

        let issuer = &self.issuer;
        require_digits("issuer RUC", &issuer.ruc, 13)?;
        require_digits("establishment", &issuer.establishment, 3)?;
        require_digits("emission point", &issuer.emission_point, 3)?;
        require_text("issuer legal name", &issuer.legal_name)?;
        require_text("head office address", &issuer.head_office_address)?;
        require_text("establishment address", &issuer.establishment_address)?;

        self.validate_buyer()?;

        if self.line_items.is_empty() {
            return Err(EngineError::Validation(
                "a sale needs at least one line item".to_string(),
            ));
        }
        for (idx, line) in self.line_items.iter().enumerate() {
            let n = idx + 1;
            require_text(&format!("line {n} code"), &line.code)?;
            require_text(&format!("line {n} description"), &line.description)?;
            if line.quantity == 0 {
                return Err(EngineError::Validation(format!(
                    "line {n} quantity must be > 0"
                )));
            }
            if line.unit_price.is_negative() || line.discount.is_negative() {
                return Err(EngineError::Validation(format!(
                    "line {n} amounts must not be negative"
                )));
            }
            if line.unit_price.checked_mul(line.quantity).is_none() {
                return Err(EngineError::Validation(format!("line {n} amount too large")));
            }
            if line.discount > line.gross() {
                return Err(EngineError::Validation(format!(
                    "line {n} discount exceeds its gross amount"
                )));
            }
        }

        for payment in &self.payments {
            if !payment.amount.cents().is_positive() {
                return Err(EngineError::Validation(
                    "payment amounts must be > 0".to_string(),
                ));
            }
        }
        if !self.payments.is_empty() {
            let paid = self
                .payments
                .iter()
                .try_fold(MoneyCents::ZERO, |acc, p| acc.checked_add(p.amount))
                .ok_or_else(amount_too_large)?;
            check_close("payments", paid, self.total)?;
        }

        self.reconcile()
    }

    /// Re-derives the totals from the line items and compares them with the
    /// declared ones.
    pub fn reconcile(&self) -> ResultEngine<()> {
        let computed = self.computed_totals()?;
        let declared_total = net_total(self.subtotal, self.discount, self.tax)?;
        check_close("subtotal", self.subtotal, computed.subtotal)?;
        check_close("discount", self.discount, computed.discount)?;
        check_close("tax", self.tax, computed.tax)?;
        check_close(
            "total",
            self.total,
            declared_total,
        )?;
        Ok(())
    }

    fn validate_buyer(&self) -> ResultEngine<()> {
        let buyer = &self.buyer;
        require_text("buyer name", &buyer.name)?;
        let id = buyer.identification.trim();
        match buyer.identification_type {
            IdentificationType::Ruc => require_digits("buyer RUC", id, 13),
            IdentificationType::Cedula => require_digits("buyer cédula", id, 10),
            IdentificationType::FinalConsumer if id == FINAL_CONSUMER_ID => Ok(()),
            IdentificationType::FinalConsumer => Err(EngineError::Validation(format!(
                "final consumer identification must be {FINAL_CONSUMER_ID}"
            ))),
            IdentificationType::Passport | IdentificationType::Foreign => {
                require_text("buyer identification", id)
            }
        }
    }
}

fn amount_too_large() -> EngineError {
    EngineError::Validation("amount too large".to_string())
}

/// `subtotal - discount + tax`, checked.
fn net_total(
    subtotal: MoneyCents,
    discount: MoneyCents,
    tax: MoneyCents,
) -> ResultEngine<MoneyCents> {
    subtotal
        .checked_sub(discount)
        .and_then(|v| v.checked_add(tax))
        .ok_or_else(amount_too_large)
}

fn check_close(label: &str, declared: MoneyCents, expected: MoneyCents) -> ResultEngine<()> {
    if declared.abs_diff(expected) > RECONCILE_TOLERANCE_CENTS {
        return Err(EngineError::Validation(format!(
            "{label} mismatch: declared {declared}, computed {expected}"
        )));
    }
    Ok(())
}

fn require_text(label: &str, value: &str) -> ResultEngine<()> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!("{label} must not be empty")));
    }
    Ok(())
}
