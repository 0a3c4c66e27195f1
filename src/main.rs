use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Result;
use dotenvy::dotenv;
use tracing::info;
use tracing_subscriber::EnvFilter;

use logfunnel::app_config::AppConfigStore;
use logfunnel::bus::UdpBus;
use logfunnel::config::Config;
use logfunnel::intake::BusFactory;
use logfunnel::sink::build_sink;
use logfunnel::supervisor::Supervisor;

const FILTER_OPTIONS: [&str; 5] = ["DEBUG", "INFO", "WARN", "ERROR", "FATAL"];

fn main() -> Result<()> {
    // Load environment from .env if present (bus address, sink path, etc.)
    let _ = dotenv();

    init_tracing();

    let cfg_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = Config::load(cfg_path)?;
    info!("starting logfunnel with config {:?}", cfg);

    let endpoint = UdpBus::bind(&cfg.bus_addr)?;
    info!("receiving log frames on {}", cfg.bus_addr);
    let bus_factory: BusFactory = Box::new(move |_| Ok(Box::new(endpoint.try_clone()?)));
    let sink = build_sink(&cfg)?;

    let store = AppConfigStore::new(cfg.app_config_path.clone());
    let mut supervisor = Supervisor::new(&cfg, bus_factory, sink);
    supervisor.start();

    operator_menu(&store)?;

    supervisor.stop();
    info!("shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Interactive console loop. Returns cleanly when the operator exits or
/// stdin closes.
fn operator_menu(store: &AppConfigStore) -> Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        println!("\n=== logfunnel ===");
        println!("1. Show app config");
        println!("2. Set app filter level");
        println!("3. Exit");
        let Some(choice) = prompt(&mut lines, "Choose option: ")? else {
            return Ok(());
        };

        match choice.as_str() {
            "1" => {
                let Some(app_id) = prompt_app_id(&mut lines)? else {
                    continue;
                };
                match store.get(app_id)? {
                    Some(app) => {
                        println!("Filters: {:?}", app.filters);
                        println!("Appenders: {:?}", app.appenders);
                    }
                    None => println!("No configuration for app_{app_id}."),
                }
            }
            "2" => {
                let Some(app_id) = prompt_app_id(&mut lines)? else {
                    continue;
                };
                for (i, level) in FILTER_OPTIONS.iter().enumerate() {
                    println!("{}: {level}", i + 1);
                }
                let Some(raw) = prompt(&mut lines, "Filter number: ")? else {
                    return Ok(());
                };
                let choice = raw.parse::<usize>().unwrap_or(0);
                let Some(level) = choice.checked_sub(1).and_then(|i| FILTER_OPTIONS.get(i)) else {
                    println!("Invalid filter choice.");
                    continue;
                };
                // Filters are replaced; appenders keep their current value.
                let appenders = store.get(app_id)?.map(|app| app.appenders).unwrap_or_default();
                store.update(app_id, vec![level.to_string()], appenders)?;
                println!("Updated app_{app_id}.");
            }
            "3" => return Ok(()),
            _ => println!("Invalid option."),
        }
    }
}

fn prompt(
    lines: &mut impl Iterator<Item = io::Result<String>>,
    msg: &str,
) -> Result<Option<String>> {
    print!("{msg}");
    io::stdout().flush()?;
    match lines.next() {
        Some(line) => Ok(Some(line?.trim().to_string())),
        None => Ok(None),
    }
}

fn prompt_app_id(
    lines: &mut impl Iterator<Item = io::Result<String>>,
) -> Result<Option<u32>> {
    let Some(raw) = prompt(lines, "App id: ")? else {
        return Ok(None);
    };
    match raw.parse::<u32>() {
        Ok(app_id) => Ok(Some(app_id)),
        Err(_) => {
            println!("Invalid app id.");
            Ok(None)
        }
    }
}
