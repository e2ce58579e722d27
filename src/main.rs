//! hashrent dry-run runner.
//!
//! Loads configuration, initialises structured logging, sets up the
//! configured providers against paper marketplaces, restores saved pool
//! state, places the configured manual rental, then runs the spot strategy
//! loop (and the sensor strategy, fed from stdin) until Ctrl+C.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};

use hashrent::config::AppConfig;
use hashrent::engine::{HashRenter, ProviderSelector, RentIntent};
use hashrent::marketplaces::paper::PaperMarketplace;
use hashrent::marketplaces::{MarketKind, RentalMarketplace};
use hashrent::provider::{Credentials, ProviderSettings};
use hashrent::storage::{JsonFileStore, SnapshotSink};
use hashrent::strategy::manual::ManualRentStrategy;
use hashrent::strategy::sensor::{SensorDrivenStrategy, SensorReading};
use hashrent::strategy::spot::{ProfitabilityEvaluator, SpotDecision, SpotRentalStrategy};
use hashrent::types::RentalRequest;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let cfg = AppConfig::load(&path)?;

    init_logging();
    info!(
        engine = %cfg.engine.name,
        aggregation = ?cfg.engine.aggregation,
        providers = cfg.providers.len(),
        "hashrent starting up (paper marketplaces)"
    );

    // -- Engine + persistence ----------------------------------------------

    let (engine, previous) = if cfg.engine.memory_only {
        (HashRenter::new(cfg.engine.settings()), None)
    } else {
        let store = JsonFileStore::new(&cfg.engine.state_file);
        let engine = HashRenter::with_snapshot_sink(
            cfg.engine.settings(),
            Arc::new(store.clone()) as Arc<dyn SnapshotSink>,
        );
        let previous = store.load()?;
        if let Some(previous) = &previous {
            info!(
                receipts = previous.receipts.len(),
                taken_at = %previous.taken_at,
                "Resumed receipts from saved snapshot"
            );
            engine.restore_receipts(previous.receipts.clone());
        }
        (engine, previous)
    };

    engine.on_rental_success(|report| info!(report = %report, ids = ?report.rental_ids(), "RENTAL_SUCCESS"));
    engine.on_rental_warning(|report| warn!(report = %report, "RENTAL_WARNING"));
    engine.on_rental_error(|report| error!(report = %report, "RENTAL_ERROR"));

    // -- Providers ---------------------------------------------------------

    let mut settings = Vec::new();
    for provider in cfg.providers.clone() {
        let kind = provider.kind;
        match provider.into_settings() {
            Ok(s) => settings.push(s),
            Err(e) => warn!(market = %kind, error = %e, "Skipping provider"),
        }
    }
    if settings.is_empty() {
        warn!("No usable provider credentials configured, using one paper NiceHash account");
        settings.push(
            ProviderSettings::new(
                MarketKind::NiceHash,
                Credentials::new("paper".into(), Some("paper".into()), None),
            )
            .with_name("paper-nicehash"),
        );
    }

    let mut clients: Vec<Arc<dyn RentalMarketplace>> = Vec::new();
    for s in settings {
        let client: Arc<dyn RentalMarketplace> = Arc::new(PaperMarketplace::new(
            s.kind,
            cfg.engine.paper_balance,
            rust_decimal_macros::dec!(0.45),
        ));
        engine
            .setup_provider(s, Arc::clone(&client))
            .await
            .context("Provider setup failed")?;
        clients.push(client);
    }

    if let Some(previous) = &previous {
        let restored = engine.restore_providers(&previous.providers).await;
        info!(providers = restored, "Restored pools and active pointers from saved snapshot");
    }

    let all_pointed = engine.providers().await.iter().all(|p| p.active_pool.is_some());
    match &cfg.pool {
        Some(_) if all_pointed => info!("Every provider already has an active pool, skipping [pool]"),
        Some(spec) => {
            let change = engine.create_pool(spec).await?;
            info!(pool_id = %change.id, success = change.success, message = %change.message, "Configured pool created");
        }
        None => {}
    }

    // -- Strategies --------------------------------------------------------

    let Some(request) = cfg.manual.clone() else {
        info!("No [manual] request configured. Nothing to rent.");
        return Ok(());
    };

    engine.setup_strategy(Arc::new(ManualRentStrategy::new()));
    let report = engine.manual_rent(RentIntent::new(request.clone())).await?;
    info!(status = %report.status, cost = %report.total_cost(), "Manual rental finished");

    if let Some(sensor) = cfg.sensor.clone() {
        engine.setup_strategy(Arc::new(SensorDrivenStrategy::new(sensor, request.clone())));
        tokio::spawn(feed_sensor_readings(engine.clone()));
        info!("Sensor strategy listening on stdin for `<source> <value>` readings");
    }

    let spot = Arc::new(SpotRentalStrategy::new(
        cfg.spot.clone(),
        Box::new(PriceCeiling {
            clients,
            request,
        }),
    ));
    engine.setup_strategy(spot.clone());

    info!(
        interval_secs = cfg.spot.interval_secs,
        "Entering spot loop. Press Ctrl+C to stop."
    );
    spot.run(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received.");
    })
    .await;

    info!(receipts = engine.receipts().len(), "hashrent shut down cleanly.");
    Ok(())
}

/// Rents whenever the cheapest market price is at or below the configured
/// request price.
struct PriceCeiling {
    clients: Vec<Arc<dyn RentalMarketplace>>,
    request: RentalRequest,
}

#[async_trait]
impl ProfitabilityEvaluator for PriceCeiling {
    async fn evaluate(&self) -> Result<SpotDecision> {
        let mut best = None;
        for client in &self.clients {
            let price = client
                .get_market_price(&self.request.algorithm)
                .await
                .with_context(|| format!("market price unavailable on {}", client.kind()))?;
            best = Some(best.map_or(price, |b: Decimal| b.min(price)));
        }
        Ok(match best {
            Some(price) if price <= self.request.price => SpotDecision::Rent {
                request: self.request.clone(),
                selector: ProviderSelector::All,
            },
            Some(price) => SpotDecision::Hold {
                reason: format!("market price {price} above ceiling {}", self.request.price),
            },
            None => SpotDecision::Hold {
                reason: "no providers".to_string(),
            },
        })
    }
}

/// Forward `<source> <value>` lines from stdin to the sensor strategy.
async fn feed_sensor_readings(engine: HashRenter) {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Sensor input closed");
                break;
            }
        };
        let Some(reading) = parse_reading(&line) else {
            if !line.trim().is_empty() {
                warn!(line = %line, "Ignoring malformed sensor reading");
            }
            continue;
        };
        match engine.sensor_signal(reading).await {
            Ok(Some(report)) => info!(status = %report.status, ids = ?report.rental_ids(), "Sensor rental finished"),
            Ok(None) => {}
            Err(e) => error!(error = %e, "Sensor signal failed"),
        }
    }
}

fn parse_reading(line: &str) -> Option<SensorReading> {
    let mut parts = line.split_whitespace();
    let source = parts.next()?;
    let value = parts.next()?.parse::<Decimal>().ok()?;
    Some(SensorReading::new(source, value))
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("hashrent=info"));

    let json_logging = std::env::var("HASHRENT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
