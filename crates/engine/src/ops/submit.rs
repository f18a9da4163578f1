use chrono::{DateTime, TimeDelta, Utc};
use sea_orm::{
    ColumnTrait, Condition, EntityTrait, QueryFilter, TransactionTrait, sea_query::Expr,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    AuthorityOutcome, Authorization, ElectronicInvoice, EngineError, InvoiceState, ResultEngine,
    invoice::{self, encode_messages},
};

use super::{Engine, with_tx};

/// A submission older than this is taken as abandoned (the process stopped
/// while waiting on the authority) and the invoice may be sent again.
const SEND_LEASE_MINUTES: i64 = 15;

impl Engine {
    /// Sends the invoice to the authority and records the outcome.
    ///
    /// An already authorized invoice returns its stored authorization without
    /// contacting the authority.
    #[instrument(skip(self))]
    pub async fn submit(&self, invoice_id: Uuid) -> ResultEngine<Authorization> {
        let invoice = self.invoice(invoice_id).await?;
        match invoice.state {
            InvoiceState::Authorized => stored_authorization(&invoice),
            InvoiceState::Annulled => Err(EngineError::InvalidTransition(format!(
                "invoice {invoice_id} is ANNULLED"
            ))),
            InvoiceState::Generated | InvoiceState::Sent | InvoiceState::Rejected => {
                self.send(invoice).await
            }
        }
    }

    /// Sends a REJECTED or SENT invoice again with the same sequential, access
    /// key and signed document.
    #[instrument(skip(self))]
    pub async fn resubmit(&self, invoice_id: Uuid) -> ResultEngine<Authorization> {
        let invoice = self.invoice(invoice_id).await?;
        match invoice.state {
            InvoiceState::Rejected | InvoiceState::Sent => self.send(invoice).await,
            other => Err(EngineError::InvalidTransition(format!(
                "invoice {invoice_id} is {other}; only REJECTED or SENT invoices can be resent"
            ))),
        }
    }

    /// Asks the authority for the result of a SENT invoice without sending it
    /// again.
    #[instrument(skip(self))]
    pub async fn check_authorization(&self, invoice_id: Uuid) -> ResultEngine<Authorization> {
        let invoice = self.invoice(invoice_id).await?;
        match invoice.state {
            InvoiceState::Authorized => stored_authorization(&invoice),
            InvoiceState::Sent if submission_in_flight(&invoice, Utc::now()) => {
                Err(in_flight_error(invoice_id))
            }
            InvoiceState::Sent => {
                let outcome = self.authority.query(&invoice.access_key).await;
                self.apply_outcome(invoice_id, outcome, Origin::Query).await
            }
            other => Err(EngineError::InvalidTransition(format!(
                "invoice {invoice_id} is {other}; only SENT invoices can be queried"
            ))),
        }
    }

    async fn send(&self, invoice: ElectronicInvoice) -> ResultEngine<Authorization> {
        if submission_in_flight(&invoice, Utc::now()) {
            return Err(in_flight_error(invoice.id));
        }
        let signed_xml = match &invoice.signed_xml {
            Some(signed) => signed.clone(),
            None => self.signer.sign(&invoice.request_xml).await?,
        };

        self.mark_sent(&invoice, &signed_xml).await?;
        info!(
            invoice_id = %invoice.id,
            attempt = invoice.attempts + 1,
            "invoice sent to the authority"
        );

        let outcome = self.authority.submit(&invoice.access_key, &signed_xml).await;
        self.apply_outcome(invoice.id, outcome, Origin::Submission)
            .await
    }

    /// Moves the invoice to SENT only if it is still exactly as `invoice`
    /// read it and no other submission holds it. A caller losing the race
    /// gets `InvalidTransition` and must not contact the authority.
    async fn mark_sent(&self, invoice: &ElectronicInvoice, signed_xml: &str) -> ResultEngine<()> {
        if !invoice.state.can_transition_to(InvoiceState::Sent) {
            return Err(EngineError::InvalidTransition(format!(
                "invoice {} is {}; it cannot be sent",
                invoice.id, invoice.state
            )));
        }
        let attempts = i32::try_from(invoice.attempts)
            .ok()
            .filter(|n| *n < i32::MAX)
            .ok_or_else(|| {
                EngineError::Validation(format!("invoice {} has too many attempts", invoice.id))
            })?;
        let now = Utc::now();
        with_tx!(self, |db_tx| {
            let result = invoice::Entity::update_many()
                .col_expr(
                    invoice::Column::State,
                    Expr::value(InvoiceState::Sent.as_str()),
                )
                .col_expr(invoice::Column::Attempts, Expr::value(attempts + 1))
                .col_expr(
                    invoice::Column::SignedXml,
                    Expr::value(Some(signed_xml.to_string())),
                )
                .col_expr(invoice::Column::SendingSince, Expr::value(Some(now)))
                .col_expr(invoice::Column::UpdatedAt, Expr::value(now))
                .filter(invoice::Column::Id.eq(invoice.id.to_string()))
                .filter(invoice::Column::State.eq(invoice.state.as_str()))
                .filter(invoice::Column::Attempts.eq(attempts))
                .filter(no_submission_in_flight(now))
                .exec(&db_tx)
                .await?;
            if result.rows_affected == 0 {
                return Err(in_flight_error(invoice.id));
            }
            Ok(())
        })
    }

    async fn apply_outcome(
        &self,
        invoice_id: Uuid,
        outcome: AuthorityOutcome,
        origin: Origin,
    ) -> ResultEngine<Authorization> {
        match outcome {
            AuthorityOutcome::Authorized(authorization) => {
                self.record_authorization(invoice_id, &authorization, origin)
                    .await?;
                info!(%invoice_id, number = %authorization.number, "invoice authorized");
                Ok(authorization)
            }
            AuthorityOutcome::Rejected { errors } => {
                self.record_messages(invoice_id, Some(InvoiceState::Rejected), &errors, origin)
                    .await?;
                warn!(%invoice_id, errors = ?errors, "invoice rejected");
                Err(EngineError::AuthorityRejected(errors))
            }
            AuthorityOutcome::Unavailable { reason } => {
                self.record_messages(invoice_id, None, std::slice::from_ref(&reason), origin)
                    .await?;
                warn!(%invoice_id, %reason, "authority unavailable, invoice stays SENT");
                Err(EngineError::AuthorityUnavailable(reason))
            }
        }
    }

    async fn record_authorization(
        &self,
        invoice_id: Uuid,
        authorization: &Authorization,
        origin: Origin,
    ) -> ResultEngine<()> {
        let now = Utc::now();
        with_tx!(self, |db_tx| {
            let mut update = invoice::Entity::update_many()
                .col_expr(
                    invoice::Column::State,
                    Expr::value(InvoiceState::Authorized.as_str()),
                )
                .col_expr(
                    invoice::Column::AuthorizationNumber,
                    Expr::value(Some(authorization.number.clone())),
                )
                .col_expr(
                    invoice::Column::AuthorizedAt,
                    Expr::value(Some(authorization.authorized_at)),
                )
                .col_expr(
                    invoice::Column::AuthorizedXml,
                    Expr::value(authorization.authorized_xml.clone()),
                )
                .col_expr(
                    invoice::Column::AuthorityMessages,
                    Expr::value(encode_messages(&[])),
                )
                .col_expr(
                    invoice::Column::SendingSince,
                    Expr::value(Option::<DateTime<Utc>>::None),
                )
                .col_expr(invoice::Column::UpdatedAt, Expr::value(now))
                .filter(invoice::Column::Id.eq(invoice_id.to_string()))
                .filter(invoice::Column::State.eq(InvoiceState::Sent.as_str()));
            if origin == Origin::Query {
                update = update.filter(no_submission_in_flight(now));
            }
            let result = update.exec(&db_tx).await?;
            if result.rows_affected == 0 {
                return Err(EngineError::InvalidTransition(format!(
                    "invoice {invoice_id} is no longer SENT"
                )));
            }
            Ok(())
        })
    }

    /// Stores authority messages on a SENT invoice, moving it to `target` when
    /// given.
    async fn record_messages(
        &self,
        invoice_id: Uuid,
        target: Option<InvoiceState>,
        messages: &[String],
        origin: Origin,
    ) -> ResultEngine<()> {
        let now = Utc::now();
        with_tx!(self, |db_tx| {
            let mut update = invoice::Entity::update_many()
                .col_expr(
                    invoice::Column::AuthorityMessages,
                    Expr::value(encode_messages(messages)),
                )
                .col_expr(
                    invoice::Column::SendingSince,
                    Expr::value(Option::<DateTime<Utc>>::None),
                )
                .col_expr(invoice::Column::UpdatedAt, Expr::value(now));
            if let Some(target) = target {
                update = update.col_expr(invoice::Column::State, Expr::value(target.as_str()));
            }
            let mut update = update
                .filter(invoice::Column::Id.eq(invoice_id.to_string()))
                .filter(invoice::Column::State.eq(InvoiceState::Sent.as_str()));
            if origin == Origin::Query {
                update = update.filter(no_submission_in_flight(now));
            }
            let result = update.exec(&db_tx).await?;
            if result.rows_affected == 0 {
                return Err(EngineError::InvalidTransition(format!(
                    "invoice {invoice_id} is no longer SENT"
                )));
            }
            Ok(())
        })
    }
}

/// Who produced an authority outcome. A submission owns the in-flight
/// marker it set; a query must not overwrite a submission in progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Origin {
    Submission,
    Query,
}

fn stale_before(now: DateTime<Utc>) -> DateTime<Utc> {
    now - TimeDelta::minutes(SEND_LEASE_MINUTES)
}

fn submission_in_flight(invoice: &ElectronicInvoice, now: DateTime<Utc>) -> bool {
    invoice
        .sending_since
        .is_some_and(|since| since >= stale_before(now))
}

fn no_submission_in_flight(now: DateTime<Utc>) -> Condition {
    Condition::any()
        .add(invoice::Column::SendingSince.is_null())
        .add(invoice::Column::SendingSince.lt(stale_before(now)))
}

fn in_flight_error(invoice_id: Uuid) -> EngineError {
    EngineError::InvalidTransition(format!(
        "invoice {invoice_id} is being sent by another caller"
    ))
}

fn stored_authorization(invoice: &ElectronicInvoice) -> ResultEngine<Authorization> {
    invoice
        .authorization
        .clone()
        .ok_or_else(|| EngineError::KeyNotFound(format!("authorization of invoice {}", invoice.id)))
}
