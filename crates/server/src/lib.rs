use api_types::error::ErrorBody;
use axum::{Json, http::StatusCode, response::IntoResponse};
use engine::EngineError;

pub use server::{ServerState, app, run, run_with_listener};

mod batch;
mod invoices;
mod server;

pub mod types {
    pub mod sale {
        pub use api_types::sale::{
            BuyerNew, IdentificationType, IssuerNew, LineItemNew, LineSource, PaymentMethod,
            PaymentNew, SaleNew, TaxRate,
        };
    }

    pub mod invoice {
        pub use api_types::invoice::{
            AnnulRequest, AuthorizationView, InvoiceListQuery, InvoiceListResponse, InvoiceState,
            InvoiceView,
        };
    }

    pub mod batch {
        pub use api_types::batch::{BatchItemErrorView, BatchReportView, BatchRequest};
    }
}

pub enum ServerError {
    Engine(EngineError),
    Generic(String),
}

fn status_for_engine_error(err: &EngineError) -> StatusCode {
    match err {
        EngineError::KeyNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::DuplicateInvoice(_) | EngineError::InvalidTransition(_) => {
            StatusCode::CONFLICT
        }
        EngineError::Validation(_) | EngineError::AuthorityRejected(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        EngineError::Storage(_) | EngineError::AuthorityUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        EngineError::Signing(_) | EngineError::InvalidConfig(_) | EngineError::Database(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn body_for_engine_error(err: EngineError) -> ErrorBody {
    let kind = err.code().to_string();
    match err {
        EngineError::Database(db_err) => {
            tracing::error!("database error: {db_err}");
            ErrorBody {
                kind,
                message: "internal server error".to_string(),
                errors: Vec::new(),
            }
        }
        EngineError::AuthorityRejected(errors) => ErrorBody {
            kind,
            message: "the authority rejected the invoice".to_string(),
            errors,
        },
        other => {
            if other.is_retryable() {
                tracing::warn!(kind = %kind, "retryable failure: {other}");
            }
            ErrorBody {
                kind,
                message: other.to_string(),
                errors: Vec::new(),
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            ServerError::Engine(err) => (status_for_engine_error(&err), body_for_engine_error(err)),
            ServerError::Generic(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    kind: "bad_request".to_string(),
                    message,
                    errors: Vec::new(),
                },
            ),
        };

        (status, Json(body)).into_response()
    }
}

impl From<EngineError> for ServerError {
    fn from(value: EngineError) -> Self {
        Self::Engine(value)
    }
}
