//! Equilibrium Arb - Main Entry Point
//!
//! Runs the autonomous trading loop by default; subcommands cover one-off scans,
//! status reports, emergency liquidation and settings updates.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use equilibrium_arb::config::{Config, ExitModel, ScannerConfig};
use equilibrium_arb::controller::TradingController;
use equilibrium_arb::events::{
    BroadcastSink, EventSink, FanoutSink, LogSink, TradingEvent, WebhookNotifier,
};
use equilibrium_arb::exchange::{MarketDataGateway, PaperGateway, PolymarketClient, TradingMode};
use equilibrium_arb::persistence::{PositionLedger, SqliteLedger};
use equilibrium_arb::risk::ExitStrategyEvaluator;
use equilibrium_arb::strategy::{
    EntryPolicy, MarketFilters, MarketScanner, OpportunityCache, ScanRequest,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Equilibrium Arb CLI
#[derive(Parser)]
#[command(name = "equilibrium-arb")]
#[command(version, about = "YES/NO equilibrium arbitrage on Polymarket")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading loop until Ctrl-C (default)
    Run,

    /// Run a single scan and print the ranking
    Scan {
        /// Markets to fetch
        #[arg(short, long, default_value = "100")]
        limit: usize,

        /// Minimum total score to show (0 shows everything)
        #[arg(short, long, default_value = "0")]
        min_score: u8,

        /// Rows to print
        #[arg(short, long, default_value = "20")]
        top: usize,
    },

    /// Show scanner settings, active positions and stored opportunities
    Status {
        /// Show trades of each active position
        #[arg(short, long)]
        verbose: bool,
    },

    /// Close every active position and disable auto-trading
    Panic {
        /// Skip the confirmation flag check
        #[arg(long)]
        yes: bool,
    },

    /// Update persisted scanner settings
    Configure(ConfigureArgs),
}

#[derive(Args, Default)]
struct ConfigureArgs {
    #[arg(long)]
    auto_trading: Option<bool>,
    #[arg(long)]
    exit_model: Option<ExitModel>,
    #[arg(long)]
    scan_interval: Option<u64>,
    #[arg(long)]
    max_markets: Option<usize>,
    #[arg(long)]
    min_score_to_trade: Option<u8>,
    #[arg(long)]
    min_score_to_show: Option<u8>,
    #[arg(long)]
    min_volume_24h: Option<Decimal>,
    #[arg(long)]
    min_liquidity: Option<Decimal>,
    #[arg(long)]
    max_positions: Option<u32>,
    #[arg(long)]
    max_capital_per_trade: Option<Decimal>,
    #[arg(long)]
    max_total_capital: Option<Decimal>,
    #[arg(long)]
    ratio_yes: Option<u32>,
    #[arg(long)]
    ratio_no: Option<u32>,
    #[arg(long)]
    stop_loss: Option<Decimal>,
    #[arg(long)]
    take_profit: Option<Decimal>,
    #[arg(long)]
    leg_stop_loss: Option<Decimal>,
    #[arg(long)]
    leg_take_profit_price: Option<Decimal>,
}

impl ConfigureArgs {
    /// Apply every flag that was given.
    fn apply(&self, config: &mut ScannerConfig) {
        macro_rules! set {
            ($($arg:ident => $field:ident),+ $(,)?) => {
                $(if let Some(v) = self.$arg { config.$field = v; })+
            };
        }
        set!(
            auto_trading => auto_trading_enabled,
            exit_model => exit_model,
            scan_interval => scan_interval_seconds,
            max_markets => max_markets_per_scan,
            min_score_to_trade => min_score_to_trade,
            min_score_to_show => min_score_to_show,
            min_volume_24h => min_volume_24h,
            min_liquidity => min_liquidity,
            max_positions => max_active_positions,
            max_capital_per_trade => max_capital_per_trade,
            max_total_capital => max_total_capital,
            ratio_yes => default_ratio_yes,
            ratio_no => default_ratio_no,
            stop_loss => stop_loss_percent,
            take_profit => take_profit_percent,
            leg_stop_loss => leg_stop_loss_percent,
            leg_take_profit_price => leg_take_profit_price,
        );
    }
}

/// Counters fed from the event stream.
#[derive(Debug, Default)]
struct AppMetrics {
    scans: u64,
    opportunities_seen: u64,
    positions_opened: u64,
    positions_closed: u64,
    legs_closed: u64,
}

impl AppMetrics {
    fn record(&mut self, event: &TradingEvent) {
        match event {
            TradingEvent::ScanComplete { count, .. } => {
                self.scans += 1;
                self.opportunities_seen += *count as u64;
            }
            TradingEvent::PositionOpened { .. } => self.positions_opened += 1,
            TradingEvent::PositionClosed { .. } => self.positions_closed += 1,
            TradingEvent::LegClosed { .. } => self.legs_closed += 1,
            TradingEvent::TradingStatus { .. } => {}
        }
    }
}

/// Components shared by every command.
struct App {
    config: Config,
    gateway: Arc<dyn MarketDataGateway>,
    ledger: Arc<dyn PositionLedger>,
    events: Arc<dyn EventSink>,
    broadcast: Arc<BroadcastSink>,
    scanner: Arc<MarketScanner>,
}

impl App {
    fn build(config: Config) -> Result<Self> {
        let trading_mode = if std::env::var("LIVE_TRADING").unwrap_or_default() == "true" {
            warn!("⚠️  LIVE TRADING MODE - order signing is not configured, entries will fail");
            TradingMode::Live
        } else {
            info!("📝 PAPER TRADING MODE - fills are simulated");
            TradingMode::Paper
        };

        let client: Arc<dyn MarketDataGateway> = Arc::new(PolymarketClient::new(&config.venue)?);
        let gateway: Arc<dyn MarketDataGateway> = match trading_mode {
            TradingMode::Live => client,
            TradingMode::Paper => Arc::new(PaperGateway::new(client)),
        };

        let ledger: Arc<dyn PositionLedger> = Arc::new(
            SqliteLedger::new(&config.storage.database_path)
                .context("Failed to open position ledger")?,
        );

        let broadcast = Arc::new(BroadcastSink::new(256));
        let events: Arc<dyn EventSink> = Arc::new(
            FanoutSink::new()
                .with(Arc::new(LogSink))
                .with(broadcast.clone()),
        );

        let mut scanner = MarketScanner::new(
            gateway.clone(),
            Arc::new(OpportunityCache::new(config.scanner.cache_ttl())),
            events.clone(),
            config.scanner.clone(),
        );
        if !config.notifications.webhook_url.is_empty() {
            let notifier = WebhookNotifier::new(config.notifications.webhook_url.clone())?;
            scanner = scanner.with_notifier(Arc::new(notifier), config.notifications.min_score);
            info!(min_score = config.notifications.min_score, "🔔 Webhook alerts enabled");
        }

        Ok(Self {
            config,
            gateway,
            ledger,
            events,
            broadcast,
            scanner: Arc::new(scanner),
        })
    }

    fn controller(&self) -> TradingController {
        let entry = EntryPolicy::new(
            self.gateway.clone(),
            self.ledger.clone(),
            self.scanner.clone(),
            self.events.clone(),
            chrono::Duration::minutes(self.config.scanner.stale_opportunity_minutes),
        );
        let exits =
            ExitStrategyEvaluator::new(self.gateway.clone(), self.ledger.clone(), self.events.clone());

        TradingController::new(
            self.ledger.clone(),
            entry,
            exits,
            self.events.clone(),
            self.config.controller.error_backoff(),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load()?;
    config.validate()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(App::build(config)?).await,
        Commands::Scan {
            limit,
            min_score,
            top,
        } => run_scan(&App::build(config)?, limit, min_score, top).await,
        Commands::Status { verbose } => show_status(&config, verbose),
        Commands::Panic { yes } => run_panic(App::build(config)?, yes).await,
        Commands::Configure(args) => configure(&config, &args),
    }
}

async fn run(app: App) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║          Equilibrium Arb v{} - Autonomous Trader           ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    let settings = app.ledger.load_scanner_config()?;
    log_settings(&settings);
    if !settings.auto_trading_enabled {
        warn!("Auto-trading is disabled; only exits will be monitored (enable with `configure --auto-trading true`)");
    }

    // Event-driven metrics
    let mut events_rx = app.broadcast.subscribe();
    let metrics_task = tokio::spawn(async move {
        let mut metrics = AppMetrics::default();
        loop {
            match events_rx.recv().await {
                Ok(event) => metrics.record(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Metrics subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        metrics
    });

    let controller = app.controller();
    controller.start()?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("🛑 Shutdown signal received, finishing current cycle...");

    if let Err(e) = controller.stop().await {
        warn!(error = %e, "Controller was not running at shutdown");
    }

    drop(controller);
    drop(app);
    match metrics_task.await {
        Ok(metrics) => info!(
            scans = metrics.scans,
            opportunities = metrics.opportunities_seen,
            opened = metrics.positions_opened,
            closed = metrics.positions_closed,
            legs_closed = metrics.legs_closed,
            "📊 Session summary"
        ),
        Err(e) => error!(error = %e, "Metrics task failed"),
    }

    info!("👋 Equilibrium Arb shutdown complete");
    Ok(())
}

async fn run_scan(app: &App, limit: usize, min_score: u8, top: usize) -> Result<()> {
    let settings = app.ledger.load_scanner_config()?;
    let opportunities = app
        .scanner
        .scan(&ScanRequest {
            limit,
            min_score,
            filters: MarketFilters {
                min_volume_24h: settings.min_volume_24h,
                min_liquidity: settings.min_liquidity,
            },
        })
        .await?;

    app.ledger.record_opportunities(&opportunities)?;

    println!("\n🔍 {} opportunities", opportunities.len());
    for (i, opp) in opportunities.iter().take(top).enumerate() {
        println!(
            "   {:>2}. [{:>2}/10] net {:+.4}  YES {:.3}  NO {:.3}  div {:.2}%  {}",
            i + 1,
            opp.total_score,
            opp.estimated_net_profit,
            opp.price_yes,
            opp.price_no,
            opp.spread_percent,
            opp.market_name
        );
    }
    Ok(())
}

fn show_status(config: &Config, verbose: bool) -> Result<()> {
    let path = std::path::Path::new(&config.storage.database_path);
    if !path.exists() {
        println!("\n❌ Database not found: {}", path.display());
        println!("   The trader has not been started yet, or the database path is incorrect.");
        return Ok(());
    }

    let ledger = SqliteLedger::new(path)?;
    let settings = ledger.load_scanner_config()?;

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║                  EQUILIBRIUM ARB STATUS                    ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    println!("\n⚙️  Settings");
    println!("   ├─ Auto-trading:     {}", settings.auto_trading_enabled);
    println!("   ├─ Exit model:       {}", settings.exit_model);
    println!("   ├─ Scan interval:    {}s", settings.scan_interval_seconds);
    println!("   ├─ Max positions:    {}", settings.max_active_positions);
    println!("   ├─ Capital / trade:  ${}", settings.capital_per_trade());
    println!(
        "   └─ Ratios YES/NO:    {}/{}",
        settings.default_ratio_yes, settings.default_ratio_no
    );

    let positions = ledger.list_active()?;
    println!("\n🔓 Active Positions ({})", positions.len());
    for pos in &positions {
        println!("   ┌─ #{} {}", pos.id, pos.market_name);
        println!(
            "   │  YES {} @ {:.3} → {:.3}   NO {} @ {:.3} → {:.3}",
            pos.amount_yes,
            pos.entry_price_yes,
            pos.current_price_yes,
            pos.amount_no,
            pos.entry_price_no,
            pos.current_price_no
        );
        println!(
            "   └─ PnL ${:.2} ({:+.2}%)  side {}",
            pos.pnl, pos.pnl_percent, pos.active_side
        );
        if verbose {
            for trade in ledger.trades_for_position(pos.id)? {
                println!(
                    "        {} {} {} @ {:.3} (${:.2}) {}",
                    trade.executed_at.format("%Y-%m-%d %H:%M:%S"),
                    trade.trade_type,
                    trade.side,
                    trade.price,
                    trade.total_value,
                    trade.order_id.as_deref().unwrap_or("-")
                );
            }
        }
    }

    let opportunities = ledger.top_opportunities(10, settings.min_score_to_show)?;
    println!("\n🎯 Top Stored Opportunities ({})", opportunities.len());
    for opp in &opportunities {
        println!(
            "   [{:>2}/10] YES {:.3}  NO {:.3}  div {:.4}  {}",
            opp.score, opp.price_yes, opp.price_no, opp.divergence, opp.market_name
        );
    }

    Ok(())
}

async fn run_panic(app: App, confirmed: bool) -> Result<()> {
    if !confirmed {
        println!("Refusing to liquidate without --yes");
        return Ok(());
    }

    let controller = app.controller();
    let closed = controller.panic_close().await?;
    println!("🚨 Closed {} positions; auto-trading disabled", closed);
    Ok(())
}

fn configure(config: &Config, args: &ConfigureArgs) -> Result<()> {
    let ledger = SqliteLedger::new(&config.storage.database_path)?;
    let mut settings = ledger.load_scanner_config()?;

    args.apply(&mut settings);
    settings.validate().context("Invalid scanner settings")?;
    ledger.save_scanner_config(&settings)?;

    log_settings(&settings);
    println!("✅ Scanner settings saved");
    Ok(())
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "equilibrium-arb.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    let filter = EnvFilter::from_default_env()
        .add_directive("equilibrium_arb=debug".parse()?)
        .add_directive(Level::INFO.into());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE);

    if std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
        builder.json().init();
    } else {
        builder.with_ansi(true).init();
    }

    Ok(())
}

/// Log scanner settings on startup.
fn log_settings(settings: &ScannerConfig) {
    info!("📋 Scanner settings:");
    info!("   Auto-trading: {}", settings.auto_trading_enabled);
    info!("   Exit model: {}", settings.exit_model);
    info!("   Scan interval: {}s", settings.scan_interval_seconds);
    info!("   Markets per scan: {}", settings.max_markets_per_scan);
    info!(
        "   Min score: trade {} / show {}",
        settings.min_score_to_trade, settings.min_score_to_show
    );
    info!(
        "   Capital: ${} per trade, {} max positions",
        settings.capital_per_trade(),
        settings.max_active_positions
    );
    info!(
        "   Exits: SL {}% / TP {}% / leg SL {}% / leg TP @{}",
        settings.stop_loss_percent,
        settings.take_profit_percent,
        settings.leg_stop_loss_percent,
        settings.leg_take_profit_price
    );
}
