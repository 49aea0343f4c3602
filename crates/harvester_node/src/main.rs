use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use harvester_engine::{
    build_harvester, Caretaker, CaretakerServices, CaretakerSettings, HarvestServices, Harvester,
    HarvesterKind, HarvesterSettings, HttpPeerDirectory, HttpReplicator, HttpSettings,
    MemoryOutgoingBuffer, OutgoingBuffer, PeerClient, RemoteCatalog, RemoteSearchScraper,
    Replicator, Scraper,
};
use harvester_node::{load_config_map, ScriptUpgrader, DEFAULT_CONFIG_FILE};
use log::LevelFilter;
use node_logging::{node_info, node_warn, LogDestination};
use tokio::runtime::Runtime;

const SEARCH_SOURCE: &str = "twitter";

#[derive(Parser)]
#[command(
    name = "harvester_node",
    about = "Harvests messages for peer backends and replicates them"
)]
struct Cli {
    /// RON map of "dotted.key": "value" settings.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Where log output goes: terminal, file or both.
    #[arg(long, default_value = "both")]
    log: LogDestination,

    #[arg(long)]
    log_file: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    node_logging::initialize(cli.log, cli.log_level, cli.log_file.clone());

    let config = load_config_map(&cli.config)?;
    let caretaker_settings = CaretakerSettings::from_config(&config);
    let harvester_settings = HarvesterSettings::from_config(&config);
    let kind = match config
        .get_str("harvester.strategy", HarvesterKind::default().name())
        .parse::<HarvesterKind>()
    {
        Ok(kind) => kind,
        Err(err) => {
            node_warn!("{}, falling back to {}", err, HarvesterKind::default());
            HarvesterKind::default()
        }
    };

    let runtime = Arc::new(Runtime::new().context("failed to start the HTTP runtime")?);
    let client = PeerClient::with_runtime(
        runtime.clone(),
        HttpSettings {
            peer_hash: config.raw("peer.hash").map(str::to_string),
            ..HttpSettings::default()
        },
    )
    .context("failed to build the HTTP client")?;

    let replicator: Arc<dyn Replicator> = Arc::new(HttpReplicator::new(client.clone()));
    let outgoing: Arc<dyn OutgoingBuffer> = Arc::new(MemoryOutgoingBuffer::new());
    let mut services = CaretakerServices::new(replicator.clone(), outgoing.clone())
        .with_peers(Arc::new(HttpPeerDirectory::new(client.clone())))
        .with_upgrader(Arc::new(ScriptUpgrader::from_config(&config)));

    let harvester: Option<Arc<dyn Harvester>> = match caretaker_settings.peers.first() {
        Some(backend) => {
            let scraper: Arc<dyn Scraper> = Arc::new(RemoteSearchScraper::new(
                client.clone(),
                backend.clone(),
                SEARCH_SOURCE,
            ));
            let harvester = build_harvester(
                kind,
                harvester_settings,
                HarvestServices {
                    scraper: scraper.clone(),
                    catalog: Arc::new(RemoteCatalog::new(client.clone(), backend.clone())),
                    trends: None,
                    replicator,
                    outgoing,
                },
            );
            services = services
                .with_harvester(harvester.clone())
                .with_scraper(scraper);
            node_info!("Harvesting for {} with the {} strategy", backend, kind);
            Some(harvester)
        }
        None => {
            node_warn!("No backend configured, harvesting is disabled");
            None
        }
    };

    let handle = Caretaker::new(caretaker_settings, services)
        .spawn()
        .context("failed to start the caretaker thread")?;

    runtime
        .block_on(tokio::signal::ctrl_c())
        .context("failed to listen for Ctrl-C")?;
    node_info!("Shutting down");
    handle.shutdown();
    if let Some(harvester) = harvester {
        harvester.stop();
    }
    Ok(())
}
