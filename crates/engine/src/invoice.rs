//! Electronic invoice primitives.
//!
//! An `ElectronicInvoice` is the fiscal document issued for exactly one sale.
//! Its identity (establishment, emission point, sequential, access key) is
//! fixed at generation; afterwards only the lifecycle state and the payloads
//! exchanged with the authority change.

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AccessKey, Authorization, EngineError, Environment, MoneyCents, ResultEngine};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceState {
    Generated,
    Sent,
    Authorized,
    Rejected,
    Annulled,
}

impl InvoiceState {
    pub const ALL: [InvoiceState; 5] = [
        Self::Generated,
        Self::Sent,
        Self::Authorized,
        Self::Rejected,
        Self::Annulled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generated => "GENERATED",
            Self::Sent => "SENT",
            Self::Authorized => "AUTHORIZED",
            Self::Rejected => "REJECTED",
            Self::Annulled => "ANNULLED",
        }
    }

    /// Allowed edges of the lifecycle.
    ///
    /// `Sent -> Sent` is the retry after an ambiguous authority failure.
    pub fn can_transition_to(self, target: InvoiceState) -> bool {
        matches!(
            (self, target),
            (Self::Generated, Self::Sent)
                | (Self::Sent, Self::Authorized)
                | (Self::Sent, Self::Rejected)
                | (Self::Sent, Self::Sent)
                | (Self::Rejected, Self::Sent)
                | (Self::Authorized, Self::Annulled)
        )
    }
}

impl std::fmt::Display for InvoiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for InvoiceState {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == normalized)
            .ok_or_else(|| EngineError::Validation(format!("invalid invoice state: {value}")))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectronicInvoice {
    pub id: Uuid,
    pub sale_id: i64,
    pub establishment: String,
    pub emission_point: String,
    pub sequential: i64,
    pub access_key: AccessKey,
    pub numeric_code: u32,
    pub emission_date: NaiveDate,
    pub environment: Environment,
    pub buyer_identification: String,
    pub buyer_name: String,
    pub subtotal: MoneyCents,
    pub discount: MoneyCents,
    pub tax: MoneyCents,
    pub total: MoneyCents,
    pub state: InvoiceState,
    pub request_xml: String,
    pub signed_xml: Option<String>,
    pub authorization: Option<Authorization>,
    pub authority_messages: Vec<String>,
    pub attempts: u32,
    /// Set while a submission waits on the authority.
    pub sending_since: Option<DateTime<Utc>>,
    pub annulment_reason: Option<String>,
    pub annulled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ElectronicInvoice {
    /// Printed document number, e.g. `001-002-000000042`.
    pub fn number(&self) -> String {
        format!(
            "{}-{}-{:09}",
            self.establishment, self.emission_point, self.sequential
        )
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "electronic_invoices")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    #[sea_orm(unique)]
    pub sale_id: i64,
    pub establishment: String,
    pub emission_point: String,
    pub sequential: i64,
    #[sea_orm(unique)]
    pub access_key: String,
    pub numeric_code: i64,
    pub emission_date: Date,
    pub environment: String,
    pub buyer_identification: String,
    pub buyer_name: String,
    pub subtotal_minor: i64,
    pub discount_minor: i64,
    pub tax_minor: i64,
    pub total_minor: i64,
    pub state: String,
    #[sea_orm(column_type = "Text")]
    pub request_xml: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub signed_xml: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub authorized_xml: Option<String>,
    pub authorization_number: Option<String>,
    pub authorized_at: Option<DateTimeUtc>,
    #[sea_orm(column_type = "Text")]
    pub authority_messages: String,
    pub attempts: i32,
    pub sending_since: Option<DateTimeUtc>,
    pub annulment_reason: Option<String>,
    pub annulled_at: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

pub(crate) fn encode_messages(messages: &[String]) -> String {
    serde_json::to_string(messages).unwrap_or_else(|_| "[]".to_string())
}

fn decode_messages(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_else(|_| {
        if raw.trim().is_empty() {
            Vec::new()
        } else {
            vec![raw.to_string()]
        }
    })
}

impl From<&ElectronicInvoice> for ActiveModel {
    fn from(invoice: &ElectronicInvoice) -> Self {
        let authorization = invoice.authorization.as_ref();
        Self {
            id: ActiveValue::Set(invoice.id.to_string()),
            sale_id: ActiveValue::Set(invoice.sale_id),
            establishment: ActiveValue::Set(invoice.establishment.clone()),
            emission_point: ActiveValue::Set(invoice.emission_point.clone()),
            sequential: ActiveValue::Set(invoice.sequential),
            access_key: ActiveValue::Set(invoice.access_key.as_str().to_string()),
            numeric_code: ActiveValue::Set(i64::from(invoice.numeric_code)),
            emission_date: ActiveValue::Set(invoice.emission_date),
            environment: ActiveValue::Set(invoice.environment.as_str().to_string()),
            buyer_identification: ActiveValue::Set(invoice.buyer_identification.clone()),
            buyer_name: ActiveValue::Set(invoice.buyer_name.clone()),
            subtotal_minor: ActiveValue::Set(invoice.subtotal.cents()),
            discount_minor: ActiveValue::Set(invoice.discount.cents()),
            tax_minor: ActiveValue::Set(invoice.tax.cents()),
            total_minor: ActiveValue::Set(invoice.total.cents()),
            state: ActiveValue::Set(invoice.state.as_str().to_string()),
            request_xml: ActiveValue::Set(invoice.request_xml.clone()),
            signed_xml: ActiveValue::Set(invoice.signed_xml.clone()),
            authorized_xml: ActiveValue::Set(authorization.and_then(|a| a.authorized_xml.clone())),
            authorization_number: ActiveValue::Set(authorization.map(|a| a.number.clone())),
            authorized_at: ActiveValue::Set(authorization.map(|a| a.authorized_at)),
            authority_messages: ActiveValue::Set(encode_messages(&invoice.authority_messages)),
            attempts: ActiveValue::Set(i32::try_from(invoice.attempts).unwrap_or(i32::MAX)),
            sending_since: ActiveValue::Set(invoice.sending_since),
            annulment_reason: ActiveValue::Set(invoice.annulment_reason.clone()),
            annulled_at: ActiveValue::Set(invoice.annulled_at),
            created_at: ActiveValue::Set(invoice.created_at),
            updated_at: ActiveValue::Set(invoice.updated_at),
        }
    }
}

impl TryFrom<Model> for ElectronicInvoice {
    type Error = EngineError;

    fn try_from(model: Model) -> ResultEngine<Self> {
        let authorization = match (model.authorization_number, model.authorized_at) {
            (Some(number), Some(authorized_at)) => Some(Authorization {
                number,
                authorized_at,
                authorized_xml: model.authorized_xml,
            }),
            _ => None,
        };
        Ok(Self {
            id: Uuid::parse_str(&model.id)
                .map_err(|_| EngineError::KeyNotFound("invoice not exists".to_string()))?,
            sale_id: model.sale_id,
            establishment: model.establishment,
            emission_point: model.emission_point,
            sequential: model.sequential,
            access_key: AccessKey::parse(&model.access_key)?,
            numeric_code: u32::try_from(model.numeric_code).unwrap_or_default(),
            emission_date: model.emission_date,
            environment: Environment::try_from(model.environment.as_str()).unwrap_or_default(),
            buyer_identification: model.buyer_identification,
            buyer_name: model.buyer_name,
            subtotal: MoneyCents::new(model.subtotal_minor),
            discount: MoneyCents::new(model.discount_minor),
            tax: MoneyCents::new(model.tax_minor),
            total: MoneyCents::new(model.total_minor),
            state: InvoiceState::try_from(model.state.as_str())?,
            request_xml: model.request_xml,
            signed_xml: model.signed_xml,
            authorization,
            authority_messages: decode_messages(&model.authority_messages),
            attempts: u32::try_from(model.attempts).unwrap_or_default(),
            sending_since: model.sending_since,
            annulment_reason: model.annulment_reason,
            annulled_at: model.annulled_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_edges() {
        use InvoiceState::*;
        assert!(Generated.can_transition_to(Sent));
        assert!(Sent.can_transition_to(Authorized));
        assert!(Sent.can_transition_to(Rejected));
        assert!(Sent.can_transition_to(Sent));
        assert!(Rejected.can_transition_to(Sent));
        assert!(Authorized.can_transition_to(Annulled));

        assert!(!Generated.can_transition_to(Authorized));
        assert!(!Generated.can_transition_to(Annulled));
        assert!(!Rejected.can_transition_to(Annulled));
        assert!(!Authorized.can_transition_to(Sent));
        for target in InvoiceState::ALL {
            assert!(!Annulled.can_transition_to(target));
        }
    }

    #[test]
    fn state_round_trips_through_storage_form() {
        for state in InvoiceState::ALL {
            assert_eq!(InvoiceState::try_from(state.as_str()).unwrap(), state);
        }
        assert!(InvoiceState::try_from("PENDING").is_err());
    }

    #[test]
    fn messages_decode_tolerates_legacy_text() {
        assert_eq!(decode_messages("[\"a\",\"b\"]"), vec!["a", "b"]);
        assert_eq!(decode_messages(""), Vec::<String>::new());
        assert_eq!(decode_messages("plain"), vec!["plain"]);
        assert_eq!(encode_messages(&["RUC inválido".to_string()]), "[\"RUC inválido\"]");
    }
}
