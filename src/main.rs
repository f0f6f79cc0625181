//! mediatree - command line front end to the media resource tree

mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tracing::{Level, info, warn};

use mediatree::config::LibraryConfig;
use mediatree::context::LibraryContext;
use mediatree::root::{ScanProgress, TreeRoot, progress_channel};
use mediatree::tree::NodeRef;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli::parse_flags();

    let level = if matches.is_present("debug") {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = match matches.value_of("config") {
        Some(path) => LibraryConfig::load_from_file(Path::new(path))
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => LibraryConfig::load(),
    };
    let ctx = LibraryContext::open(config).await?;
    let root = Arc::new(TreeRoot::new(Arc::new(ctx)));

    match matches.subcommand() {
        ("tree", Some(m)) => {
            let id = m.value_of("id").unwrap_or(mediatree::tree::ROOT_ID);
            let depth = m
                .value_of("depth")
                .and_then(|d| d.parse().ok())
                .unwrap_or(2);
            let node = root
                .find(id)
                .await
                .with_context(|| format!("No node with id {}", id))?;
            print_tree(&node, 0, depth).await;
        }
        ("scan", _) => scan(&root).await,
        ("watch", _) => {
            let _monitor = root.start_monitoring()?;
            root.children().await;
            info!("Watching for changes, press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("Failed to wait for Ctrl-C")?;
        }
        _ => println!("{}", matches.usage()),
    }

    Ok(())
}

fn print_tree(node: &NodeRef, level: usize, depth: usize) -> BoxFuture<'_, ()> {
    async move {
        node.discover().await;
        for child in node.children().iter() {
            let marker = if child.is_folder() { "+" } else { "-" };
            println!(
                "{}{} {} [{}]",
                "  ".repeat(level),
                marker,
                child.name(),
                child.id()
            );
            if child.is_folder() && level + 1 < depth {
                print_tree(child, level + 1, depth).await;
            }
        }
    }
    .boxed()
}

async fn scan(root: &Arc<TreeRoot>) {
    let (tx, mut rx) = progress_channel();
    root.spawn_scan(Some(tx));

    loop {
        tokio::select! {
            update = rx.recv() => match update {
                Some(ScanProgress::Entered { name }) => info!("Scanning {}", name),
                Some(ScanProgress::Completed { folders, files, removed, .. }) => {
                    println!("Scanned {} folders and {} files, {} stale entries removed", folders, files, removed);
                    break;
                }
                Some(ScanProgress::Cancelled) => {
                    println!("Scan cancelled");
                    break;
                }
                Some(ScanProgress::Started) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping scan");
                root.stop_scan();
            }
        }
    }
}
