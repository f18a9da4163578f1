use axum::{
    Router,
    routing::{get, post},
};

use std::sync::Arc;

use crate::{batch, invoices};
use engine::Engine;

#[derive(Clone)]
pub struct ServerState {
    pub engine: Arc<Engine>,
}

/// Router with every invoice endpoint.
pub fn app(engine: Arc<Engine>) -> Router {
    router(ServerState { engine })
}

fn router(state: ServerState) -> Router {
    Router::new()
        .route(
            "/facturas-electronicas",
            post(invoices::invoice_new).get(invoices::list),
        )
        .route("/facturas-electronicas/procesar-lote", post(batch::process))
        .route("/facturas-electronicas/{id}", get(invoices::get))
        .route("/facturas-electronicas/{id}/xml", get(invoices::xml))
        .route(
            "/facturas-electronicas/{id}/procesar-sri",
            post(invoices::submit),
        )
        .route("/facturas-electronicas/{id}/reenviar", post(invoices::resubmit))
        .route(
            "/facturas-electronicas/{id}/consultar",
            post(invoices::check_authorization),
        )
        .route("/facturas-electronicas/{id}/anular", post(invoices::annul))
        .with_state(state)
}

pub async fn run(engine: Engine, addr: &str) {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("failed to bind server listener on {addr}: {err}");
            return;
        }
    };
    if let Err(err) = run_with_listener(engine, listener).await {
        tracing::error!("server failed: {err}");
    }
}

pub async fn run_with_listener(
    engine: Engine,
    listener: tokio::net::TcpListener,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app(Arc::new(engine))).await
}
