//! Autocart CLI
//!
//! Runs the automation engine (`serve`) or talks to a running one as a host
//! (`start`, `stop`, `status`, `watch`, `export`, `reset`).
//!
//! Usage:
//!   autocart serve --demo                  # engine over an in-memory storefront
//!   autocart serve                         # engine driving the tab behind the extension
//!   autocart start --run-file run.json --wait --export cart.json
//!   autocart status
//!   autocart watch
//!   autocart export cart.json             # cart of the current or last run

use anyhow::{bail, Context, Result};
use autocart::channel::DEFAULT_CONTROL_ADDR;
use autocart::extension_bridge::{ExtensionBridge, DEFAULT_BRIDGE_ADDR};
use autocart::platforms::memory::{DemoCategory, DemoItem, Storefront};
use autocart::platforms::ExtensionPage;
use autocart::{Automation, ControlClient, ControlServer, Event, Page, TargetSet};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

mod run_file;
mod settings;
mod utils;

use run_file::{resolve_config, ConfigOverrides, RunFile};
use settings::Settings;

#[derive(Parser)]
#[command(name = "autocart")]
#[command(about = "Menu-to-cart browser automation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the automation engine and accept hosts over WebSocket
    Serve(ServeArgs),
    /// Start a run on a running engine
    Start(StartArgs),
    /// Ask the current run to stop
    Stop(HostArgs),
    /// Print the engine status
    Status(HostArgs),
    /// Print engine events until the current run ends
    Watch(WatchArgs),
    /// Write the cart of the current or most recent run to a file
    Export(ExportArgs),
    /// Return a finished engine to idle and empty its cart
    Reset(HostArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address the control server listens on
    #[clap(long, env = "AUTOCART_ADDR", default_value = DEFAULT_CONTROL_ADDR)]
    addr: String,

    /// Drive a built-in in-memory storefront instead of a browser tab
    #[clap(long)]
    demo: bool,

    /// Address the browser extension connects to
    #[clap(long, env = "AUTOCART_BRIDGE_ADDR", default_value = DEFAULT_BRIDGE_ADDR)]
    bridge_addr: String,

    /// How long to wait for the extension before serving anyway
    #[clap(long, default_value_t = 30)]
    extension_wait_secs: u64,
}

#[derive(Args, Debug, Clone)]
struct HostArgs {
    /// Engine control URL
    #[clap(long, env = "AUTOCART_URL", default_value = "ws://127.0.0.1:17380")]
    url: String,

    /// Connect and per-request timeout in milliseconds
    #[clap(long)]
    timeout_ms: Option<u64>,
}

#[derive(Args, Debug)]
struct StartArgs {
    #[command(flatten)]
    host: HostArgs,

    /// JSON file with `targets` and an optional partial `config`
    #[clap(long, required_unless_present = "demo")]
    run_file: Option<PathBuf>,

    /// Use the selectors of the built-in demo storefront
    #[clap(long, conflicts_with = "run_file")]
    demo: bool,

    #[clap(long)]
    step_delay_ms: Option<u64>,

    #[clap(long)]
    max_items: Option<usize>,

    #[clap(long)]
    max_scrolls: Option<u32>,

    /// Settings file (defaults to the user config dir)
    #[clap(long, env = "AUTOCART_SETTINGS")]
    settings: Option<PathBuf>,

    /// Wait for the run to finish
    #[clap(long)]
    wait: bool,

    /// Write the final cart to this file (implies --wait)
    #[clap(long)]
    export: Option<PathBuf>,

    /// Print events as JSON lines while waiting
    #[clap(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct WatchArgs {
    #[command(flatten)]
    host: HostArgs,

    /// Keep watching after a run ends
    #[clap(long)]
    follow: bool,

    /// Print events as JSON lines
    #[clap(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct ExportArgs {
    #[command(flatten)]
    host: HostArgs,

    /// Destination JSON file
    file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    utils::init_logging()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Start(args) => start(args).await,
        Commands::Stop(args) => {
            let client = connect(&args).await?;
            if client.stop().await? {
                println!("Stop requested");
            } else {
                println!("Nothing is running");
            }
            Ok(())
        }
        Commands::Status(args) => {
            let client = connect(&args).await?;
            let status = client.get_status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Commands::Watch(args) => watch(args).await,
        Commands::Export(args) => {
            let client = connect(&args.host).await?;
            let cart = client.get_cart().await?;
            cart.write_json(&args.file)
                .with_context(|| format!("Failed to export cart to {}", args.file.display()))?;
            println!(
                "{} items (${:.2}) written to {}",
                cart.items_count,
                cart.total,
                args.file.display()
            );
            Ok(())
        }
        Commands::Reset(args) => {
            let client = connect(&args).await?;
            client.reset().await?;
            println!("Engine reset");
            Ok(())
        }
    }
}

async fn connect(args: &HostArgs) -> Result<ControlClient> {
    let timeout = utils::get_timeout(args.timeout_ms);
    ControlClient::connect(&args.url, timeout)
        .await
        .with_context(|| format!("Is `autocart serve` running at {}?", args.url))
}

async fn serve(args: ServeArgs) -> Result<()> {
    let page = if args.demo {
        info!("Serving the demo storefront");
        Page::new(demo_storefront().build())
    } else {
        let bridge = ExtensionBridge::start(&args.bridge_addr).await?;
        if !bridge
            .wait_for_client(Duration::from_secs(args.extension_wait_secs))
            .await
        {
            warn!("No browser extension connected yet; runs will fail until one does");
        }
        Page::new(ExtensionPage::new(bridge))
    };

    let server = ControlServer::new(Automation::new(page));
    let (addr, listener) = server.listen(&args.addr).await?;
    println!("Engine ready at ws://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Shutting down");
    listener.abort();
    Ok(())
}

async fn start(args: StartArgs) -> Result<()> {
    let (file_config, targets): (_, TargetSet) = match &args.run_file {
        Some(path) => {
            let run = RunFile::load(path)?;
            (run.config, run.targets)
        }
        None if args.demo => (Default::default(), Storefront::targets()),
        None => bail!("Pass --run-file or --demo"),
    };

    let settings_path = match args.settings.clone().or_else(Settings::default_path) {
        Some(p) => p,
        None => bail!("No config directory on this system; pass --settings"),
    };
    let mut settings = Settings::load(settings_path)?;
    let overrides = ConfigOverrides {
        step_delay_ms: args.step_delay_ms,
        max_items_per_category: args.max_items,
        max_scrolls: args.max_scrolls,
    };
    let config = resolve_config(Some(&settings), &file_config, &overrides)?;

    let client = connect(&args.host).await?;
    let mut events = client.subscribe();
    client.start(config.clone(), targets).await?;
    if let Err(e) = settings.remember(&config) {
        warn!("Could not save settings to {}: {e:#}", settings.path().display());
    }
    println!("Automation started");

    if !(args.wait || args.export.is_some()) {
        return Ok(());
    }

    let json = args.json;
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(&event, json);
            if event.is_terminal() {
                break;
            }
        }
    });
    let terminal = client.wait_for_terminal().await?;
    let _ = printer.await;

    match terminal {
        Event::Complete { cart, .. } => {
            if let Some(path) = &args.export {
                cart.write_json(path)
                    .with_context(|| format!("Failed to export cart to {}", path.display()))?;
                println!("Cart written to {}", path.display());
            }
            Ok(())
        }
        Event::Error { reason } => bail!("Automation failed: {reason}"),
        other => bail!("Unexpected terminal event: {other:?}"),
    }
}

async fn watch(args: WatchArgs) -> Result<()> {
    let client = connect(&args.host).await?;
    let mut events = client.subscribe();
    let status = client.get_status().await?;
    println!("Engine is {}", status.state);

    loop {
        match events.recv().await {
            Ok(event) => {
                print_event(&event, args.json);
                if event.is_terminal() && !args.follow {
                    return Ok(());
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                warn!("Missed {n} events");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                bail!("Engine connection closed")
            }
        }
        if !client.is_connected() {
            bail!("Engine connection closed");
        }
    }
}

fn print_event(event: &Event, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("Could not encode event: {e}"),
        }
        return;
    }
    match event {
        Event::Progress { status } => println!(
            "[progress] {}/{} items={} total=${:.2}",
            status.progress.current, status.progress.total, status.items_count, status.total_value
        ),
        Event::Complete { status, .. } => println!(
            "[{}] items={} total=${:.2}",
            status.state, status.items_count, status.total_value
        ),
        Event::Error { reason } => println!("[error] {reason}"),
        Event::Log { level, text } => println!("[{level}] {text}"),
    }
}

fn demo_storefront() -> Storefront {
    Storefront::new(vec![
        DemoCategory::new(
            "Tacos",
            vec![
                DemoItem::new("Al Pastor", 3.50),
                DemoItem::new("Carnitas", 3.75),
                DemoItem::new("Baja Fish", 4.25).required_option(),
                DemoItem::new("Mushroom", 3.25).broken_modal(),
            ],
        ),
        DemoCategory::new(
            "Sides",
            vec![
                DemoItem::new("Chips & Salsa", 2.95),
                DemoItem::new("Elote", 3.50),
            ],
        ),
        DemoCategory::new("Seasonal", vec![DemoItem::new("Pozole", 8.00)]).never_renders(),
        DemoCategory::new(
            "Drinks",
            vec![
                DemoItem::new("Horchata", 2.50),
                DemoItem::new("Jarritos", 2.25).missing_add(),
            ],
        ),
    ])
    .items_per_screen(3)
}
