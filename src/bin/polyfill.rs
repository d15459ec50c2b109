//! Command-line front end for the polyfill engine.
//!
//! Usage:
//!   polyfill resolve --features es6,Promise --ua chrome/40
//!   polyfill bundle --features Math.sign --ua ie/9 --minify
//!   polyfill check --catalog ./catalog
//!
//! Output goes to stdout; logs (`POLYFILL_LOG`, default `warn`) go to stderr.

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use polyfill_engine::{
    Bundle, BundleOptions, CatalogIndex, DirectorySourceStore, PolyfillEngine, ResolutionRequest,
    SourceStore, UnknownPolicy, default_catalog_dir, parse_feature_list, split_list,
};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "POLYFILL_LOG";

#[derive(Parser, Debug)]
#[command(name = "polyfill")]
#[command(about = "Resolve and bundle polyfills for a client")]
struct Cli {
    /// Catalog directory containing catalog.json and sources/.
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the resolved polyfill set as JSON.
    Resolve(RequestArgs),
    /// Print the assembled bundle.
    Bundle(BundleArgs),
    /// Validate the catalog, its dependency graph and its source fragments.
    Check,
}

#[derive(Args, Debug)]
struct RequestArgs {
    /// Features to request, comma or space separated; `name|flag|flag` adds flags.
    #[arg(long, default_value = "")]
    features: String,
    /// Capabilities never to include unless requested by name.
    #[arg(long, default_value = "")]
    excludes: String,
    /// Client identifier, e.g. `chrome/45`.
    #[arg(long)]
    ua: Option<String>,
    /// Policy for clients that cannot be identified: polyfill or ignore.
    #[arg(long, default_value = "polyfill")]
    unknown: UnknownPolicy,
}

#[derive(Args, Debug)]
struct BundleArgs {
    #[command(flatten)]
    request: RequestArgs,
    /// Write chunks as they are produced.
    #[arg(long)]
    stream: bool,
    #[arg(long)]
    minify: bool,
    /// Global function to call once the polyfills have run.
    #[arg(long)]
    callback: Option<String>,
}

fn main() {
    init_logging();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let catalog_dir = match cli.catalog {
        Some(dir) => dir,
        None => default_catalog_dir()?,
    };

    match cli.command {
        Command::Resolve(args) => {
            let engine = PolyfillEngine::from_dir(&catalog_dir)?;
            let resolution = engine.get_polyfills(&build_request(&args)?)?;
            for name in &resolution.unknown_features {
                eprintln!("unknown feature: {name}");
            }
            let rendered =
                serde_json::to_string_pretty(&resolution).context("serializing resolution")?;
            println!("{rendered}");
        }
        Command::Bundle(args) => {
            let engine = PolyfillEngine::from_dir(&catalog_dir)?;
            let options = BundleOptions {
                stream: args.stream,
                minify: args.minify,
                callback: args.callback,
            };
            let bundle = engine.get_polyfill_string(&build_request(&args.request)?, &options)?;
            write_bundle(bundle)?;
        }
        Command::Check => check(&catalog_dir)?,
    }
    Ok(())
}

fn build_request(args: &RequestArgs) -> Result<ResolutionRequest> {
    let mut request = ResolutionRequest::new().with_unknown(args.unknown);
    for (name, flags) in parse_feature_list(&args.features)? {
        request = request.with_flagged_feature(&name, flags);
    }
    for name in split_list(&args.excludes) {
        request = request.with_exclude(&name);
    }
    if let Some(ua) = &args.ua {
        request = request.with_client(ua);
    }
    Ok(request)
}

fn write_bundle(bundle: Bundle) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match bundle {
        Bundle::Buffered(text) => out.write_all(text.as_bytes()).context("writing bundle")?,
        Bundle::Stream(stream) => {
            for chunk in stream {
                out.write_all(chunk?.as_bytes()).context("writing bundle chunk")?;
                out.flush().context("flushing bundle chunk")?;
            }
        }
    }
    Ok(())
}

fn check(catalog_dir: &std::path::Path) -> Result<()> {
    let index = CatalogIndex::load(catalog_dir)?;
    index.check_acyclic()?;

    let sources = DirectorySourceStore::for_catalog(catalog_dir);
    let mut missing = Vec::new();
    for (_, capability) in index.capabilities() {
        let found = sources
            .fetch(&capability.source)
            .with_context(|| format!("reading source for {}", capability.name))?;
        if found.is_none() {
            missing.push(format!("{} ({})", capability.name, capability.source));
        }
    }
    if !missing.is_empty() {
        bail!("missing source fragments: {}", missing.join(", "));
    }

    println!(
        "catalog {}: {} capabilities, {} aliases ({})",
        index.key().0,
        index.capability_count(),
        index.aliases().count(),
        index.metadata().title
    );
    Ok(())
}
