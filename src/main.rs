use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::update_listeners::Polling;

use kasabot::checkbox::{CatalogCache, CheckboxClient, ClientConfig, ReceiptController};
use kasabot::cli::{Cli, Commands};
use kasabot::core::{config, init_logger, install_panic_hook, Settings};
use kasabot::printer::Printer;
use kasabot::reconcile::engine::parse_cutoff;
use kasabot::reconcile::{
    build_source, CheckboxIssuer, DisabledLedger, Ledger, ReconcileEngine, SourceKind, TransactionSource,
};
use kasabot::sheets::SheetsLedger;
use kasabot::shift_close::ShiftCloser;
use kasabot::storage::{create_pool, DbPool};
use kasabot::telegram::{create_bot, schema, setup_bot_commands, Bot, Broadcaster, HandlerDeps, TelegramNotifier};

/// Shared services built once per process.
struct Components {
    settings: Arc<Settings>,
    db_pool: Arc<DbPool>,
    bot: Bot,
    broadcaster: Broadcaster,
    receipts: ReceiptController,
    catalog: CatalogCache,
    ledger: Arc<dyn Ledger>,
}

impl Components {
    fn build(settings: Settings) -> Result<Self> {
        let settings = Arc::new(settings);
        let db_pool = Arc::new(create_pool(&config::DATABASE_PATH).context("database")?);
        let bot = create_bot(&settings)?;
        let broadcaster = Broadcaster::new(bot.clone(), Arc::clone(&db_pool));

        let client = CheckboxClient::new(ClientConfig::from_settings(&settings)?)?;
        let receipts = ReceiptController::new(client.clone());
        let catalog = CatalogCache::new(client, Duration::from_secs(settings.checkbox.catalog_ttl_minutes * 60));

        let ledger: Arc<dyn Ledger> = match SheetsLedger::from_settings(&settings.google)? {
            Some(sheets) => Arc::new(sheets),
            None => {
                log::warn!("missing google spreadsheet config; ledger disabled");
                Arc::new(DisabledLedger)
            }
        };

        Ok(Self {
            settings,
            db_pool,
            bot,
            broadcaster,
            receipts,
            catalog,
            ledger,
        })
    }

    fn shift_closer(&self) -> Arc<ShiftCloser> {
        Arc::new(ShiftCloser::new(
            self.receipts.shifts().clone(),
            self.broadcaster.clone(),
            Arc::clone(&self.ledger),
            self.settings.google.worksheet.title.clone(),
        ))
    }

    fn engine(&self, source: Arc<dyn TransactionSource>) -> ReconcileEngine {
        ReconcileEngine::new(
            source,
            Arc::clone(&self.db_pool),
            Arc::new(TelegramNotifier::new(self.broadcaster.clone())),
            Arc::new(CheckboxIssuer::new(self.receipts.clone(), self.catalog.clone())),
            Arc::clone(&self.ledger),
        )
        .with_worksheet(self.settings.google.worksheet.title_cashless.clone())
        .with_cutoff(self.shift_close_time())
    }

    fn shift_close_time(&self) -> Option<chrono::NaiveTime> {
        let raw = self.settings.checkbox.shift_close_time.as_deref()?;
        let parsed = parse_cutoff(raw);
        if parsed.is_none() {
            log::error!("invalid checkbox.shift_close_time {:?}, expected HH:MM", raw);
        }
        parsed
    }
}

/// Main entry point
///
/// Parses CLI arguments and dispatches to the subcommand; `run` is the default.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    let _ = dotenv();
    install_panic_hook();
    init_logger(&config::LOG_FILE_PATH)?;

    let config_path = cli.config.clone().unwrap_or_else(|| config::CONFIG_PATH.clone());
    let settings = Settings::load(&config_path)?;
    let components = Components::build(settings)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_bot(components).await,
        Commands::ShiftClose => run_shift_close(components).await,
        Commands::Reconcile { source, once } => run_reconcile(components, source.into(), once).await,
    }
}

async fn run_bot(components: Components) -> Result<()> {
    log::info!("Starting {} {}", config::CLIENT_NAME, config::CLIENT_VERSION);

    if let Err(e) = setup_bot_commands(&components.bot).await {
        log::warn!("Failed to set bot commands: {}", e);
    }

    let shift_closer = components.shift_closer();
    match components.shift_close_time() {
        Some(at) => {
            tokio::spawn(Arc::clone(&shift_closer).run_daily(at));
        }
        None => log::warn!("missing shift close time; ignoring..."),
    }

    for kind in SourceKind::ALL {
        match build_source(kind, &components.settings, &config::DATA_DIR).await {
            Ok(Some(source)) => {
                tokio::spawn(components.engine(source).run());
            }
            Ok(None) => log::info!("{} reconciler not configured", kind.as_str()),
            Err(e) => log::error!("{} reconciler not started: {:#}", kind.as_str(), e),
        }
    }

    let printer = Printer::from_settings(&components.settings.print).map(Arc::new);

    let deps = HandlerDeps::new(
        Arc::clone(&components.db_pool),
        Arc::clone(&components.settings),
        components.receipts.clone(),
        components.catalog.clone(),
        printer,
        components.broadcaster.clone(),
        shift_closer,
    );

    let bot = components.bot.clone();
    let listener = Polling::builder(bot.clone()).drop_pending_updates().build();

    log::info!("Starting bot in long polling mode");
    Dispatcher::builder(bot, schema(deps))
        .enable_ctrlc_handler()
        .build()
        .dispatch_with_listener(
            listener,
            LoggingErrorHandler::with_custom_text("An error from the update listener"),
        )
        .await;

    log::info!("Dispatcher shutdown gracefully");
    Ok(())
}

async fn run_shift_close(components: Components) -> Result<()> {
    match components.shift_closer().close_and_report(None).await? {
        Some(income) => log::info!("shift closed: income {}", kasabot::core::money::format_price(income)),
        None => log::info!("shift is closed"),
    }
    Ok(())
}

async fn run_reconcile(components: Components, kind: SourceKind, once: bool) -> Result<()> {
    let source = build_source(kind, &components.settings, &config::DATA_DIR)
        .await?
        .ok_or_else(|| anyhow::anyhow!("{} is not configured", kind.as_str()))?;
    let engine = components.engine(source);

    if once {
        let report = engine.run_cycle().await;
        log::info!("{}: {:?}", kind.as_str(), report);
        if report.fetch_failed {
            anyhow::bail!("{}: fetch failed", kind.as_str());
        }
        return Ok(());
    }

    engine.run().await;
    Ok(())
}
