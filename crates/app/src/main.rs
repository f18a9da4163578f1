use std::{sync::Arc, time::Duration};

use engine::{CommandSigner, SriSoapClient};
use migration::{Migrator, MigratorTrait};
use settings::Database;

mod settings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = settings::Settings::new()?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "facturacion={level},server={level},engine={level}",
            level = settings.app.level
        ))
        .init();

    let issuance = settings.sri.issuance()?;
    let client_config = settings.sri.client_config()?;
    tracing::info!(
        environment = issuance.environment.as_str(),
        reception_url = %client_config.endpoints.reception_url,
        "using SRI endpoints"
    );
    let authority = SriSoapClient::new(client_config)?;
    let signer = CommandSigner::new(
        &settings.signer.program,
        settings.signer.args.clone(),
        Duration::from_secs(settings.signer.timeout_secs),
    );

    let db = parse_database(&settings.server.database).await?;
    let engine = engine::Engine::builder()
        .database(db)
        .issuance(issuance)
        .authority(Arc::new(authority))
        .signer(Arc::new(signer))
        .build()
        .await?;

    let bind = settings
        .server
        .bind
        .clone()
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let addr = format!("{}:{}", bind, settings.server.port);
    server::run(engine, &addr).await;

    Ok(())
}

async fn parse_database(
    config: &settings::Database,
) -> Result<sea_orm::DatabaseConnection, Box<dyn std::error::Error + Send + Sync>> {
    let url = match config {
        Database::Memory => String::from("sqlite::memory:"),
        Database::Sqlite(path) => format!("sqlite:{}?mode=rwc", path),
    };

    let database = sea_orm::Database::connect(url).await?;
    Migrator::up(&database, None).await?;
    Ok(database)
}
