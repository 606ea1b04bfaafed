use std::path::PathBuf;

use feedkeeper::{App, Config, Result};

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    import: Option<PathBuf>,
    refresh: bool,
    clean: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Args {
    let mut parsed = Args::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => parsed.config = args.next().map(PathBuf::from),
            "--import" => parsed.import = args.next().map(PathBuf::from),
            "--refresh" => parsed.refresh = true,
            "--clean" => parsed.clean = true,
            other => tracing::warn!("Ignoring unknown argument {}", other),
        }
    }
    parsed
}

#[tokio::main]
async fn main() -> Result<()> {
    // Info and above unless RUST_LOG says otherwise
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args(std::env::args().skip(1));

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let app = App::new(&config).await?;

    // If import path provided, import OPML and exit
    if let Some(path) = &args.import {
        let summary = app.import_opml(path)?;
        println!(
            "Imported {} categories and {} feeds from {:?} ({} skipped)",
            summary.categories_added, summary.feeds_added, path, summary.skipped
        );
        return Ok(());
    }

    if args.refresh {
        let results = app.refresh_all().await;
        let new_items: usize = results.iter().filter_map(|(_, r)| r.as_ref().ok()).sum();
        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        println!(
            "Refreshed {} feeds: {} new items, {} failed",
            results.len(),
            new_items,
            failed
        );
        return Ok(());
    }

    if args.clean {
        let removed = match config.retention {
            Some(retention) => app.clean_archive(retention).await?,
            None => 0,
        };
        println!("Removed {} expired items", removed);
        return Ok(());
    }

    app.start()?;
    let sweep = app.spawn_retention_sweep();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    if let Some(sweep) = sweep {
        sweep.abort();
    }
    app.shutdown();
    Ok(())
}
