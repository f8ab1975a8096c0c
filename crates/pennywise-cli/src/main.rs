//! Pennywise CLI - Transaction extraction and normalization engine
//!
//! Usage:
//!   pennywise init                       Initialize database
//!   pennywise sms --text "..."           Ingest one SMS
//!   pennywise import --file backup.xml   Import a backup file (CSV, XML, TXT, JSON)
//!   pennywise enrich                     Detect recurring payments
//!   pennywise serve --port 3000          Start the API server

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use pennywise_core::models::TransactionEdit;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let owner = cli.owner.as_str();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db, cli.no_encrypt),
        Commands::Sms {
            ref text,
            ref sender,
            ref received_at,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let pipeline = commands::open_pipeline(db, config)?;
            commands::cmd_sms(
                &pipeline,
                owner,
                text,
                sender.as_deref(),
                received_at.as_deref(),
            )
            .await
        }
        Commands::Import {
            ref file,
            ref kind,
            validate_only,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let pipeline = commands::open_pipeline(db, config)?;
            commands::cmd_import(&pipeline, owner, file, kind.as_deref(), validate_only).await
        }
        Commands::Reprocess { ref ids } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let pipeline = commands::open_pipeline(db, config)?;
            commands::cmd_reprocess(&pipeline, owner, ids).await
        }
        Commands::Enrich => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let pipeline = commands::open_pipeline(db, config)?;
            commands::cmd_enrich(&pipeline, owner).await
        }
        Commands::Transactions { ref action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                None => commands::cmd_transactions_list(
                    &db,
                    owner,
                    &commands::ListArgs {
                        limit: 20,
                        sort: "date",
                        order: "desc",
                        ..Default::default()
                    },
                ),
                Some(TransactionsAction::List {
                    limit,
                    offset,
                    from,
                    to,
                    direction,
                    merchant,
                    category,
                    recurring,
                    sort,
                    order,
                }) => commands::cmd_transactions_list(
                    &db,
                    owner,
                    &commands::ListArgs {
                        limit: *limit,
                        offset: *offset,
                        from: from.as_deref(),
                        to: to.as_deref(),
                        direction: direction.as_deref(),
                        merchant: merchant.as_deref(),
                        category: category.as_deref(),
                        recurring: *recurring,
                        sort,
                        order,
                    },
                ),
                Some(TransactionsAction::Show { id }) => {
                    commands::cmd_transactions_show(&db, owner, *id)
                }
                Some(TransactionsAction::Add {
                    amount,
                    direction,
                    merchant,
                    category,
                    date,
                    mode,
                    reference,
                    remarks,
                }) => {
                    let pipeline = commands::open_pipeline(db, config)?;
                    commands::cmd_transactions_add(
                        &pipeline,
                        owner,
                        &commands::AddArgs {
                            amount,
                            direction,
                            merchant: merchant.as_deref(),
                            category: category.as_deref(),
                            date: date.as_deref(),
                            mode: mode.as_deref(),
                            reference: reference.as_deref(),
                            remarks: remarks.as_deref(),
                        },
                    )
                    .await
                }
                Some(TransactionsAction::Edit {
                    id,
                    category,
                    merchant,
                    remarks,
                    failed,
                }) => {
                    let pipeline = commands::open_pipeline(db, config)?;
                    let edit = TransactionEdit {
                        category: category.clone(),
                        merchant: merchant.clone(),
                        remarks: remarks.clone(),
                        failed: *failed,
                    };
                    commands::cmd_transactions_edit(&pipeline, owner, *id, &edit).await
                }
                Some(TransactionsAction::Delete { id }) => {
                    let pipeline = commands::open_pipeline(db, config)?;
                    commands::cmd_transactions_delete(&pipeline, owner, *id).await
                }
            }
        }
        Commands::Raw { ref action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                None => commands::cmd_raw_list(&db, owner, None, 20),
                Some(RawAction::List { status, limit }) => {
                    commands::cmd_raw_list(&db, owner, status.as_deref(), *limit)
                }
                Some(RawAction::Stats) => commands::cmd_raw_stats(&db, owner),
                Some(RawAction::Delete { id }) => commands::cmd_raw_delete(&db, owner, *id),
            }
        }
        Commands::Summary { ref from, ref to } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_summary(&db, owner, from.as_deref(), to.as_deref())
        }
        Commands::Export {
            ref format,
            ref output,
            ref from,
            ref to,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_export(
                &db,
                owner,
                format,
                output.as_deref(),
                from.as_deref(),
                to.as_deref(),
            )
        }
        Commands::Status => commands::cmd_status(&cli.db, owner, cli.no_encrypt).await,
        Commands::Serve {
            port,
            ref host,
            no_owner_header,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let pipeline = commands::open_pipeline(db, config)?;
            commands::cmd_serve(
                pipeline,
                host,
                port,
                no_owner_header,
                owner,
                cli.no_encrypt,
            )
            .await
        }
    }
}
