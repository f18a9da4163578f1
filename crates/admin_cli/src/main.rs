use std::{error::Error, sync::Arc, time::Duration};

use clap::{Args, Parser, Subcommand};
use engine::{
    CommandSigner, ElectronicInvoice, Engine, EngineError, Environment, InvoiceListFilter,
    InvoiceState, IssuanceSettings, SriClientConfig, SriSoapClient,
};
use migration::MigratorTrait;
use sea_orm::{Database, DatabaseConnection};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "facturacion_admin")]
#[command(about = "Operator utilities for SRI electronic invoices")]
struct Cli {
    /// Database connection string (also read from `DATABASE_URL`).
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "sqlite:./facturacion.db?mode=rwc"
    )]
    database_url: String,

    /// SRI environment: `test` or `production`.
    #[arg(long, env = "FACTURACION_ENVIRONMENT", default_value = "test")]
    environment: String,

    /// External XAdES-BES signer (document on stdin, signed document on stdout).
    #[arg(long, env = "FACTURACION_SIGNER_PROGRAM", default_value = "firmar-xades")]
    signer_program: String,

    /// Argument passed to the signer, repeatable.
    #[arg(long = "signer-arg", allow_hyphen_values = true)]
    signer_args: Vec<String>,

    /// Timeout in seconds for each SRI request and for the signer.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit pending GENERATED and REJECTED invoices, oldest first.
    Batch {
        #[arg(long, default_value_t = 50)]
        limit: u64,
    },
    Submit(InvoiceId),
    Resubmit(InvoiceId),
    /// Query the authority for a SENT invoice without sending it again.
    Check(InvoiceId),
    Annul(AnnulArgs),
    Show(ShowArgs),
    List(ListArgs),
    /// Show the last and next sequential of an emission point.
    Sequence(SequenceArgs),
}

#[derive(Args, Debug)]
struct InvoiceId {
    id: Uuid,
}

#[derive(Args, Debug)]
struct AnnulArgs {
    id: Uuid,
    #[arg(long)]
    reason: String,
}

#[derive(Args, Debug)]
struct ShowArgs {
    /// Invoice id.
    #[arg(required_unless_present = "sale")]
    id: Option<Uuid>,
    /// Look the invoice up by sale instead.
    #[arg(long, conflicts_with = "id")]
    sale: Option<i64>,
    /// Print the stored XML document.
    #[arg(long)]
    xml: bool,
}

#[derive(Args, Debug)]
struct ListArgs {
    /// State filter, repeatable.
    #[arg(long = "state")]
    states: Vec<String>,
    #[arg(long)]
    limit: Option<u64>,
}

#[derive(Args, Debug)]
struct SequenceArgs {
    #[arg(long, default_value = "001")]
    establishment: String,
    #[arg(long, default_value = "001")]
    emission_point: String,
}

async fn connect_db(
    database_url: &str,
) -> Result<DatabaseConnection, Box<dyn Error + Send + Sync>> {
    let db = Database::connect(database_url).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

async fn build_engine(
    cli: &Cli,
    db: DatabaseConnection,
) -> Result<Engine, Box<dyn Error + Send + Sync>> {
    let environment = Environment::try_from(cli.environment.as_str())?;
    let timeout = Duration::from_secs(cli.timeout_secs);

    let mut client_config = SriClientConfig::new(environment);
    client_config.timeout = timeout;
    let authority = SriSoapClient::new(client_config)?;
    let signer = CommandSigner::new(&cli.signer_program, cli.signer_args.clone(), timeout);

    Ok(Engine::builder()
        .database(db)
        .issuance(IssuanceSettings {
            environment,
            ..IssuanceSettings::default()
        })
        .authority(Arc::new(authority))
        .signer(Arc::new(signer))
        .build()
        .await?)
}

fn print_invoice(invoice: &ElectronicInvoice) {
    println!(
        "{}  {}  sale {}  {}  {}  total {}  attempts {}",
        invoice.id,
        invoice.number(),
        invoice.sale_id,
        invoice.state,
        invoice.access_key,
        invoice.total,
        invoice.attempts
    );
    if let Some(authorization) = &invoice.authorization {
        println!(
            "    authorized {} at {}",
            authorization.number, authorization.authorized_at
        );
    }
    for message in &invoice.authority_messages {
        println!("    {message}");
    }
    if let Some(reason) = &invoice.annulment_reason {
        println!("    annulled: {reason}");
    }
}

fn exit_with(err: &EngineError) -> ! {
    match err {
        EngineError::AuthorityRejected(errors) => {
            eprintln!("rejected by the authority:");
            for error in errors {
                eprintln!("  {error}");
            }
        }
        other => eprintln!("{}: {other}", other.code()),
    }
    std::process::exit(if err.is_retryable() { 75 } else { 1 });
}

async fn run(cli: Cli, engine: Engine) -> Result<(), EngineError> {
    match cli.command {
        Command::Batch { limit } => {
            let report = engine.process_batch(limit).await?;
            println!(
                "succeeded: {}  failed: {}",
                report.succeeded, report.failed
            );
            for error in &report.errors {
                println!("  {} [{}] {}", error.invoice_id, error.kind, error.message);
            }
        }
        Command::Submit(InvoiceId { id }) => {
            let authorization = engine.submit(id).await?;
            println!("authorized: {}", authorization.number);
        }
        Command::Resubmit(InvoiceId { id }) => {
            let authorization = engine.resubmit(id).await?;
            println!("authorized: {}", authorization.number);
        }
        Command::Check(InvoiceId { id }) => {
            let authorization = engine.check_authorization(id).await?;
            println!("authorized: {}", authorization.number);
        }
        Command::Annul(args) => {
            let invoice = engine.annul(args.id, &args.reason).await?;
            print_invoice(&invoice);
        }
        Command::Show(args) => {
            let invoice = match (args.id, args.sale) {
                (Some(id), _) => engine.invoice(id).await?,
                (None, Some(sale_id)) => engine.invoice_for_sale(sale_id).await?,
                (None, None) => {
                    return Err(EngineError::Validation(
                        "provide an invoice id or --sale".to_string(),
                    ));
                }
            };
            if args.xml {
                println!("{}", engine.invoice_xml(invoice.id).await?);
            } else {
                print_invoice(&invoice);
            }
        }
        Command::List(args) => {
            let states = args
                .states
                .iter()
                .map(|s| InvoiceState::try_from(s.as_str()))
                .collect::<Result<Vec<_>, _>>()?;
            let invoices = engine
                .list_invoices(&InvoiceListFilter {
                    states,
                    limit: args.limit,
                })
                .await?;
            for invoice in &invoices {
                print_invoice(invoice);
            }
        }
        Command::Sequence(args) => {
            let last = engine
                .last_sequential(&args.establishment, &args.emission_point)
                .await?;
            let next = engine
                .next_sequential(&args.establishment, &args.emission_point)
                .await?;
            println!(
                "{}-{}  last {last:09}  next {next:09}",
                args.establishment, args.emission_point
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();

    let db = connect_db(&cli.database_url).await?;
    let engine = build_engine(&cli, db).await?;

    if let Err(err) = run(cli, engine).await {
        exit_with(&err);
    }

    Ok(())
}
