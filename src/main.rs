/// Version injected at compile time via GCPGRAPH_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("GCPGRAPH_VERSION") {
    Some(v) => v,
    None => "dev",
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::future::join_all;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use gcpgraph::cache::MemoryCache;
use gcpgraph::catalog::Catalog;
use gcpgraph::config::Config;
use gcpgraph::gcp::auth::GcpCredentials;
use gcpgraph::gcp::client::{Endpoints, GcpClient, ResourceClient};
use gcpgraph::gcp::http::format_gcp_error;
use gcpgraph::sink::{ChannelSink, StreamEvent};
use gcpgraph::{wrappers, Adapter, Capabilities, Item, QueryContext, QueryError};

/// Discover GCP resources as linked items
#[derive(Parser, Debug)]
#[command(name = "gcpgraph", version, about, long_about = None)]
struct Args {
    /// GCP project to use
    #[arg(short, long, global = true)]
    project: Option<String>,

    /// Zone or region to query; repeat for several
    #[arg(short, long = "location", global = true)]
    locations: Vec<String>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json", global = true)]
    output: OutputFormat,

    /// Per-query deadline in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Use this access token instead of Application Default Credentials
    #[arg(long, global = true)]
    access_token: Option<String>,

    /// Skip the result cache
    #[arg(long, global = true)]
    ignore_cache: bool,

    /// Send every API call to this base URL instead of googleapis.com
    #[arg(long, global = true)]
    api_base: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the item types and what they support
    Types,
    /// Save the effective project and locations as defaults
    Configure,
    /// Look one item up
    Get {
        item_type: String,
        query: String,
        #[arg(long)]
        scope: Option<String>,
    },
    /// Enumerate every item of a type
    List {
        item_type: String,
        #[arg(long)]
        scope: Option<String>,
    },
    /// Enumerate items matching a secondary key
    Search {
        item_type: String,
        query: String,
        #[arg(long)]
        scope: Option<String>,
    },
    /// Stream items as they arrive (search when a query is given)
    Stream {
        item_type: String,
        query: Option<String>,
        #[arg(long)]
        scope: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> Option<&'static str> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some("error"),
            LogLevel::Warn => Some("warn"),
            LogLevel::Info => Some("info"),
            LogLevel::Debug => Some("debug"),
            LogLevel::Trace => Some("trace"),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let directive = level.as_filter()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file {:?}: {}", log_path, e);
            return None;
        },
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("gcpgraph {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("gcpgraph").join("gcpgraph.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".gcpgraph").join("gcpgraph.log");
    }
    PathBuf::from("gcpgraph.log")
}

fn print<T: Serialize>(format: OutputFormat, value: &T) -> Result<()> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
    };
    println!("{}", rendered);
    Ok(())
}

/// Results of a query fanned out over several scopes
#[derive(Debug, Default, Serialize)]
struct FanOut {
    items: Vec<Item>,
    errors: Vec<QueryError>,
}

impl FanOut {
    fn absorb(&mut self, result: Result<Vec<Item>, QueryError>) {
        match result {
            Ok(items) => self.items.extend(items),
            Err(err) => {
                tracing::warn!("{}", err);
                self.errors.push(err);
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct TypeSummary<'a> {
    name: &'a str,
    display_name: &'a str,
    category: &'a str,
    supported: bool,
}

#[derive(Debug, Serialize)]
struct AdapterSummary {
    item_type: &'static str,
    scopes: Vec<String>,
    capabilities: Capabilities,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_guard = setup_logging(args.log_level);

    let catalog = Catalog::builtin().context("loading the built-in type catalog")?;

    if let Command::Types = args.command {
        let summary: Vec<TypeSummary> = catalog
            .iter()
            .map(|def| TypeSummary {
                name: &def.name,
                display_name: &def.display_name,
                category: &def.category,
                supported: wrappers::SUPPORTED_TYPES.contains(&def.name.as_str()),
            })
            .collect();
        return print(args.output, &summary);
    }

    if let Command::Configure = args.command {
        let mut config = Config::load();
        config.project_id = config.effective_project(args.project.as_deref());
        config.locations = config.effective_locations(&args.locations);
        config.save()?;
        tracing::info!("Saved defaults: {:?}", config);
        return print(args.output, &config);
    }

    if let Err(err) = run(&args, &catalog).await {
        tracing::error!("{:#}", err);
        eprintln!("Error: {}", format_gcp_error(&err));
        drop(log_guard);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(args: &Args, catalog: &Catalog) -> Result<()> {
    let config = Config::load();
    let item_type = match &args.command {
        Command::Types | Command::Configure => return Ok(()),
        Command::Get { item_type, .. }
        | Command::List { item_type, .. }
        | Command::Search { item_type, .. }
        | Command::Stream { item_type, .. } => item_type.as_str(),
    };

    let project = config.effective_project(args.project.as_deref()).unwrap_or_default();
    let locations = config.effective_locations(&args.locations);
    if project.is_empty() && item_type != gcpgraph::catalog::types::RESOURCE_MANAGER_PROJECT {
        bail!("No GCP project configured. Set GOOGLE_CLOUD_PROJECT or use --project flag");
    }
    tracing::info!("Using project: {}, locations: {:?}", project, locations);

    let endpoints = match &args.api_base {
        Some(base) => Endpoints::with_base(base),
        None => Endpoints::default(),
    };
    let client = match &args.access_token {
        Some(token) => GcpClient::with_credentials(GcpCredentials::from_token(token), endpoints)?,
        None => GcpClient::new(endpoints).await?,
    };
    let client: Arc<dyn ResourceClient> = Arc::new(client);

    let binding = wrappers::binding_for(item_type, &project, &locations)?;
    let wrapper = wrappers::build(item_type, client, binding, catalog)?;
    let cache = Arc::new(MemoryCache::new());
    let adapter = Adapter::new(wrapper, cache.clone(), config.cache_ttl());

    let ctx = match config.effective_timeout(args.timeout) {
        Some(timeout) => QueryContext::with_timeout(timeout),
        None => QueryContext::new(),
    };
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling queries");
            interrupt.cancel();
        }
    });

    let ignore_cache = args.ignore_cache;
    let scopes_for = |scope: &Option<String>| match scope {
        Some(scope) => vec![scope.clone()],
        None => adapter.scopes(),
    };

    let outcome = match &args.command {
        Command::Types | Command::Configure => Ok(()),
        Command::Get { query, scope, .. } => {
            let scope = scope.clone().unwrap_or_else(|| adapter.default_scope());
            let item = adapter.get(&ctx, &scope, query, ignore_cache).await?;
            print(args.output, &item)
        },
        Command::List { scope, .. } => {
            let scopes = scopes_for(scope);
            let results = join_all(scopes.iter().map(|s| adapter.list(&ctx, s, ignore_cache))).await;
            let mut out = FanOut::default();
            results.into_iter().for_each(|r| out.absorb(r));
            print(args.output, &out)
        },
        Command::Search { query, scope, .. } => {
            let scopes = scopes_for(scope);
            let results = join_all(
                scopes
                    .iter()
                    .map(|s| adapter.search(&ctx, s, query, ignore_cache)),
            )
            .await;
            let mut out = FanOut::default();
            results.into_iter().for_each(|r| out.absorb(r));
            print(args.output, &out)
        },
        Command::Stream { query, scope, .. } => {
            let scopes = scopes_for(scope);
            tracing::debug!(
                "{}",
                serde_json::to_string(&AdapterSummary {
                    item_type: adapter.item_type(),
                    scopes: scopes.clone(),
                    capabilities: adapter.capabilities(),
                })?
            );
            stream(&adapter, &ctx, scopes, query.as_deref(), ignore_cache, args.output).await
        },
    };

    tracing::debug!("cache: {:?}", cache.stats().await);
    outcome
}

async fn stream(
    adapter: &Adapter,
    ctx: &QueryContext,
    scopes: Vec<String>,
    query: Option<&str>,
    ignore_cache: bool,
    format: OutputFormat,
) -> Result<()> {
    let (sink, mut rx) = ChannelSink::new();

    let producer = async move {
        let runs = scopes.iter().map(|scope| {
            let sink = &sink;
            async move {
                match query {
                    Some(query) => adapter.search_stream(ctx, scope, query, ignore_cache, sink).await,
                    None => adapter.list_stream(ctx, scope, ignore_cache, sink).await,
                }
            }
        });
        join_all(runs).await;
        // sink dropped here, closing the channel
    };

    let consumer = async move {
        let mut errors = 0usize;
        while let Some(event) = rx.recv().await {
            if let StreamEvent::Error(err) = &event {
                tracing::warn!("{}", err);
                errors += 1;
            }
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string(&event)?),
                OutputFormat::Yaml => println!("---\n{}", serde_yaml::to_string(&event)?),
            }
        }
        Ok::<usize, anyhow::Error>(errors)
    };

    let ((), errors) = tokio::join!(producer, consumer);
    let errors = errors?;
    if errors > 0 {
        tracing::info!("stream finished with {} error(s)", errors);
    }
    Ok(())
}
