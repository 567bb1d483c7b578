use anyhow::{Context, Result};
use clap::Parser;
use merkling_core::{Config, Outcome, Stasher, Tree};
use std::path::PathBuf;

/// Merkling - ingest a directory tree into a content-addressed store
#[derive(Parser)]
#[command(name = "merkling")]
#[command(about = "Ingest a directory tree into a content-addressed store", long_about = None)]
#[command(version)]
struct Cli {
    /// Root directory (or file) to ingest
    root: PathBuf,

    /// Destination path for the metadata tree
    meta: PathBuf,

    /// Configuration file (defaults to MERKLING_CONFIG or ./merkling.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Final pool for uncompressed objects
    #[arg(long)]
    pool: Option<PathBuf>,

    /// Final pool for compressed objects
    #[arg(long)]
    zpool: Option<PathBuf>,

    /// Staging pool
    #[arg(long)]
    tpool: Option<PathBuf>,

    /// Minimum object size in bytes before compression is attempted
    #[arg(long)]
    zsize: Option<u64>,

    /// Maximum acceptable compressed/original size ratio
    #[arg(long)]
    zrate: Option<f64>,

    /// zstd compression level
    #[arg(long)]
    zlevel: Option<i32>,

    /// Bundle files smaller than this many bytes (0 disables bundling)
    #[arg(long)]
    bsize: Option<u64>,

    /// Maximum bundle size in bytes
    #[arg(long)]
    asize: Option<u64>,

    /// Log staging and compression diagnostics to stderr
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = resolve_config(&cli)?;
    run(&cli, config)
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "error" }));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load the configuration file, then apply CLI overrides.
fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::load_default().context("Failed to load default config")?,
    };

    if let Some(pool) = &cli.pool {
        config.pool = Some(pool.clone());
    }
    if let Some(zpool) = &cli.zpool {
        config.zpool = Some(zpool.clone());
    }
    if let Some(tpool) = &cli.tpool {
        config.tpool = tpool.clone();
    }
    if let Some(zsize) = cli.zsize {
        config.zsize = zsize;
    }
    if let Some(zrate) = cli.zrate {
        config.zrate = zrate;
    }
    if let Some(zlevel) = cli.zlevel {
        config.zlevel = zlevel;
    }
    if let Some(bsize) = cli.bsize {
        config.bsize = bsize;
    }
    if let Some(asize) = cli.asize {
        config.asize = asize;
    }

    Ok(config)
}

fn run(cli: &Cli, config: Config) -> Result<()> {
    let bsize = config.bsize;
    let asize = config.asize;
    let tpool = config.tpool.clone();
    let stasher = Stasher::new(config);

    stasher
        .begin()
        .context("Failed to create staging pool")?;

    let mut files = 0usize;
    let mut tree = Tree::build(&cli.root, |path| {
        files += 1;
        stasher.stash(path)
    })
    .with_context(|| format!("Failed to ingest {}", cli.root.display()))?;

    let mut bundles = 0;
    if bsize > 0 && stasher.staging_enabled() {
        bundles = tree.bundle(bsize, asize, &tpool);
    }

    let mut compressed = 0usize;
    let mut raw = 0usize;
    tree.walk(|node| match stasher.select(node) {
        Outcome::Compressed => compressed += 1,
        Outcome::Raw => raw += 1,
        Outcome::Skipped => {}
    });

    stasher
        .end()
        .context("Failed to remove staging pool")?;

    tree.save(&cli.meta)
        .with_context(|| format!("Failed to write metadata to {}", cli.meta.display()))?;

    println!("{} files hashed from {}", files, cli.root.display());
    if stasher.staging_enabled() {
        if bundles > 0 {
            println!("{} bundles created", bundles);
        }
        println!("{} nodes compressed, {} raw", compressed, raw);
    }
    println!("Wrote {}", cli.meta.display());

    Ok(())
}
