use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "dstore",
    about = "Versioned, date-partitioned blob store over S3",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub settings: SettingsArgs,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Settings layered over the config file.
#[derive(Args, Debug, Default)]
pub struct SettingsArgs {
    /// TOML config file
    #[arg(long, global = true, env = "DSTORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// S3 bucket holding every collection
    #[arg(long, global = true, env = "BUCKET_NAME")]
    pub bucket: Option<String>,

    #[arg(long, global = true, env = "AWS_REGION", default_value = "eu-west-1")]
    pub region: String,

    /// Store objects as files under this directory instead of S3
    #[arg(long, global = true, env = "DSTORE_LOCAL_ROOT", conflicts_with = "bucket")]
    pub local_root: Option<PathBuf>,

    /// Fetch workers per export
    #[arg(long, global = true, env = "WORKERS")]
    pub workers: Option<usize>,

    #[arg(long, global = true, env = "BUCKET_CONTENT_PREFIX")]
    pub content_prefix: Option<String>,

    #[arg(long, global = true, env = "BUCKET_CONCEPT_PREFIX")]
    pub concept_prefix: Option<String>,

    #[arg(long, global = true, env = "CONTENT_RESOURCE_PATH")]
    pub content_path: Option<String>,

    #[arg(long, global = true, env = "CONCEPT_RESOURCE_PATH")]
    pub concept_path: Option<String>,

    #[arg(long, global = true, env = "GENERIC_STORE_RESOURCE_PATH")]
    pub generic_path: Option<String>,

    #[arg(long, global = true, env = "APP_SYSTEM_CODE")]
    pub system_code: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP server
    Serve(ServeArgs),
    /// Count the objects of a collection
    Count(CollectionArgs),
    /// Stream the entity ids of a collection as JSON lines
    Ids(CollectionArgs),
    /// Stream every object body of a collection, one per line
    Export(CollectionArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[arg(short, long, env = "APP_PORT")]
    pub port: Option<u16>,
}

#[derive(Args, Debug)]
pub struct CollectionArgs {
    #[arg(short, long, default_value = "content")]
    pub collection: String,
}
