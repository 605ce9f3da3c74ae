mod api;
mod countdown;
mod store;
mod ui;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;

use crate::api::{ApiServer, ApiServerConfig};
use crate::countdown::remaining::compute;
use crate::store::{ChangeSignal, CountdownStore};

#[derive(Parser, Debug)]
#[command(
    name = "tickdown",
    version,
    about = "Countdown tracker with a live once-per-second display"
)]
struct Cli {
    #[arg(long, default_value = "countdowns.json")]
    countdowns: PathBuf,

    /// Load and validate the countdown file, print each entry's remaining
    /// time once, and exit without opening a window.
    #[arg(long)]
    check: bool,

    #[arg(long, default_value = "0.0.0.0")]
    api_bind: String,

    #[arg(long, default_value_t = 8141)]
    api_port: u16,

    #[arg(long, default_value_t = true)]
    api_enabled: bool,

    #[arg(long, default_value_t = true)]
    discovery_enabled: bool,

    #[arg(long, default_value_t = 8141)]
    discovery_udp_port: u16,

    #[arg(long, default_value_t = true)]
    mdns_enabled: bool,

    #[arg(long, default_value = "tickdown")]
    mdns_instance: String,
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let signal = Arc::new(ChangeSignal::default());
    let store = CountdownStore::open(cli.countdowns.clone(), Arc::clone(&signal))
        .with_context(|| format!("failed to load {}", cli.countdowns.display()))?;

    if cli.check {
        return run_check(&store);
    }

    let store = Arc::new(Mutex::new(store));
    let api_server = if cli.api_enabled {
        let server = ApiServer::start(
            ApiServerConfig {
                bind_addr: cli.api_bind.clone(),
                port: cli.api_port,
                discovery_enabled: cli.discovery_enabled,
                discovery_udp_port: cli.discovery_udp_port,
                mdns_enabled: cli.mdns_enabled,
                mdns_instance: cli.mdns_instance,
            },
            Arc::clone(&store),
            Arc::clone(&signal),
        )
        .with_context(|| {
            format!(
                "failed to start local API at {}:{}",
                cli.api_bind, cli.api_port
            )
        })?;
        Some(server)
    } else {
        None
    };

    log::info!(
        "starting tickdown with data file {}",
        cli.countdowns.display()
    );
    let ui_result = ui::app::run_gui(
        store,
        signal,
        cli.countdowns,
        cli.api_bind,
        cli.api_port,
        cli.api_enabled,
    );

    drop(api_server);
    log::info!("tickdown shut down");
    ui_result
}

fn run_check(store: &CountdownStore) -> Result<()> {
    let now = Utc::now();
    let countdowns = store.list();
    println!("Tickdown countdown check");
    println!("Loaded {} countdowns", countdowns.len());
    for countdown in &countdowns {
        let remaining = compute(countdown.target_utc, now);
        println!(
            "  {} '{}' -> {}",
            countdown.id,
            countdown.title,
            remaining.display()
        );
    }
    Ok(())
}
