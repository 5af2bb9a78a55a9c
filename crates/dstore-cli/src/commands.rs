use anyhow::Context;
use colored::Colorize;
use dstore_engine::{Collection, ExportReader};
use dstore_server::{DstoreServer, ServerConfig, StoreConfig};
use tokio_util::sync::CancellationToken;

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli.settings)?;
    match cli.command {
        Command::Serve(args) => cmd_serve(config, args).await,
        Command::Count(args) => cmd_count(&config, args).await,
        Command::Ids(args) => cmd_stream(&config, args, StreamKind::Ids).await,
        Command::Export(args) => cmd_stream(&config, args, StreamKind::Bodies).await,
        Command::Config => cmd_config(&config),
    }
}

/// Config file (or defaults) with command-line settings applied on top.
fn load_config(settings: &SettingsArgs) -> anyhow::Result<ServerConfig> {
    let mut config = match &settings.config {
        Some(path) => ServerConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => ServerConfig::default(),
    };

    if let Some(root) = &settings.local_root {
        config.store = StoreConfig::Local { root: root.clone() };
    } else if let Some(bucket) = &settings.bucket {
        config.store = StoreConfig::S3 {
            bucket: bucket.clone(),
            region: settings.region.clone(),
            endpoint: None,
        };
    }
    if let Some(workers) = settings.workers {
        config.workers = workers;
    }
    if let Some(code) = &settings.system_code {
        config.system_code = code.clone();
    }

    let overrides = [
        ("content", settings.content_prefix.as_ref(), settings.content_path.as_ref()),
        ("concept", settings.concept_prefix.as_ref(), settings.concept_path.as_ref()),
        ("generic", None, settings.generic_path.as_ref()),
    ];
    for (name, prefix, path) in overrides {
        let Some(collection) = config.collection_mut(name) else {
            continue;
        };
        if let Some(prefix) = prefix {
            collection.prefix = prefix.clone();
        }
        if let Some(path) = path {
            collection.path = Some(path.clone());
        }
    }

    config.validate()?;
    Ok(config)
}

fn open_collection(config: &ServerConfig, name: &str) -> anyhow::Result<Collection> {
    let collection = config
        .collection(name)
        .with_context(|| format!("no collection named {name:?}"))?;
    let store = config.store.connect()?;
    Ok(Collection::new(collection.clone(), store, config.export_config())?)
}

async fn cmd_serve(mut config: ServerConfig, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(port) = args.port {
        config.bind_addr.set_port(port);
    }
    eprintln!(
        "{} dstore serving {} collection(s) on {}",
        "✓".green().bold(),
        config.collections.len(),
        config.bind_addr.to_string().bold()
    );
    DstoreServer::new(config)?.serve().await?;
    Ok(())
}

async fn cmd_count(config: &ServerConfig, args: CollectionArgs) -> anyhow::Result<()> {
    let collection = open_collection(config, &args.collection)?;
    let n = collection.count().await?;
    println!("{n}");
    eprintln!("{} {} objects in {}", "✓".green(), n.to_string().bold(), args.collection.yellow());
    Ok(())
}

enum StreamKind {
    Ids,
    Bodies,
}

async fn cmd_stream(config: &ServerConfig, args: CollectionArgs, kind: StreamKind) -> anyhow::Result<()> {
    let collection = open_collection(config, &args.collection)?;
    let cancel = CancellationToken::new();
    let mut reader: ExportReader = match kind {
        StreamKind::Ids => collection.export_ids(&cancel).await?,
        StreamKind::Bodies => collection.export_all(&cancel).await?,
    };

    let mut stdout = tokio::io::stdout();
    let copied = tokio::select! {
        copied = tokio::io::copy(&mut reader, &mut stdout) => copied?,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            eprintln!("{} export interrupted", "✗".red());
            return Ok(());
        }
    };
    eprintln!("{} {} bytes from {}", "✓".green(), copied.to_string().bold(), args.collection.yellow());
    Ok(())
}

fn cmd_config(config: &ServerConfig) -> anyhow::Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
