//! # `dicey-demo` — reference server/client binary
//!
//! Verbosity-driven `LevelFilter`, colorized stdout via
//! [`dicey::logging::ColorizedFormatter`], and an optional rolling file
//! log, in front of a Dicey server or a one-shot client call.

use anyhow::Result;
use clap::Parser;
use dicey::cli::{Args, Command};
use dicey::logging::ColorizedFormatter;
use dicey::registry::{Element, ElementKind, Trait};
use dicey::transport::default_address;
use dicey::{Client, Selector, Value};
use std::collections::HashSet;
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, prelude::*, Layer};

const GREETER_TRAIT: &str = "dicey.demo.Greeter";
const GREETER_PATH: &str = "/dicey/demo/greeter";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let guard;
    let detailed_log_layer = if let Some(path) = args.log_file.as_deref() {
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
        let filename = path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("dicey-demo.log"));
        let appender = tracing_appender::rolling::daily(dir, filename);
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        guard = Some(file_guard);
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_filter(log_level)
            .boxed()
    } else {
        guard = None;
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .event_format(ColorizedFormatter)
            .with_filter(log_level)
            .boxed()
    };

    tracing_subscriber::registry().with(detailed_log_layer).init();
    let _log_guard = guard;

    match args.command {
        Command::Serve { address } => run_server(address).await,
        Command::Get { address, path, trait_name, element } => run_get(address, path, trait_name, element).await,
    }
}

async fn run_server(address: Option<String>) -> Result<()> {
    let address = address.unwrap_or_else(|| default_address(&std::process::id().to_string()));
    info!(%address, "starting Dicey demo server");

    let handle = dicey::serve(&address).await?;
    handle
        .add_trait(Trait::new(GREETER_TRAIT).with_element(Element::new("Name", ElementKind::Property, "s")?))
        .await?;
    let mut traits = HashSet::new();
    traits.insert(GREETER_TRAIT.to_string());
    handle.add_object(GREETER_PATH, traits).await?;
    info!(path = GREETER_PATH, "registered demo object");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    handle.shutdown();
    Ok(())
}

async fn run_get(address: String, path: String, trait_name: String, element: String) -> Result<()> {
    let client = Client::connect(&address).await?;
    let selector = Selector::new(trait_name, element)?;
    let value = client.get(path, selector).await?;
    print_value(&value);
    client.close();
    Ok(())
}

fn print_value(value: &Value) {
    println!("{:?}", value);
}
