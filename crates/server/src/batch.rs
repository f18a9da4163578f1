//! Batch processing endpoint

use api_types::batch::{BatchItemErrorView, BatchReportView, BatchRequest};
use axum::{Json, extract::State};

use crate::{ServerError, server::ServerState};

const DEFAULT_BATCH_LIMIT: u64 = 50;

/// Submits pending invoices. Individual failures are listed in the report,
/// the response itself is a success.
pub async fn process(
    State(state): State<ServerState>,
    payload: Option<Json<BatchRequest>>,
) -> Result<Json<BatchReportView>, ServerError> {
    let limit = payload
        .and_then(|Json(request)| request.limit)
        .unwrap_or(DEFAULT_BATCH_LIMIT);

    let report = state.engine.process_batch(limit).await?;

    Ok(Json(BatchReportView {
        succeeded: report.succeeded,
        failed: report.failed,
        errors: report
            .errors
            .into_iter()
            .map(|e| BatchItemErrorView {
                invoice_id: e.invoice_id,
                kind: e.kind,
                message: e.message,
            })
            .collect(),
    }))
}
