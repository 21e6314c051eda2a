//! Command-line front end: load a YAML model, seed it from JSON and run
//! requests against it.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use http::Method;
use odata_engine::drivers::{MemoryStore, SqlTranslator};
use odata_engine::resource::ResourcePath;
use odata_engine::{Body, EngineConfig, EntitySet, Model, ModelConfig, Service, error_to_problem};
use odata_errors::Problem;
use tracing_subscriber::EnvFilter;

/// OData CLI - query a YAML-defined model backed by in-memory data
#[derive(Parser)]
#[command(name = "odata-cli")]
#[command(about = "Query a YAML-defined OData model backed by in-memory data")]
struct Cli {
    /// Path to engine configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the model definition (YAML)
    #[arg(short, long)]
    model: PathBuf,

    /// Dataset keyed by entity set name (JSON)
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Shape of error bodies printed on failure
    #[arg(long, value_enum, default_value_t = ErrorFormat::Problem)]
    error_format: ErrorFormat,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ErrorFormat {
    /// RFC 9457 problem details
    Problem,
    /// OData v4 `{"error": {...}}` body
    Odata,
}

impl ErrorFormat {
    fn render(self, problem: &Problem) -> Result<String> {
        let text = match self {
            ErrorFormat::Problem => serde_json::to_string_pretty(problem)?,
            ErrorFormat::Odata => serde_json::to_string_pretty(&problem.to_odata_error())?,
        };
        Ok(text)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one request and print the response body
    Request {
        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
        /// Request URI, absolute or relative to the service root
        uri: String,
        /// JSON request body
        #[arg(long)]
        body: Option<String>,
    },
    /// Print the SQL a collection query translates to
    Sql {
        /// Collection URI such as `/Pets?$filter=...`
        uri: String,
    },
    /// Validate configuration, model and dataset, then exit
    Check,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = EngineConfig::load(cli.config.as_deref())?;
    let store = MemoryStore::new();
    let model = load_model(&cli.model, &store)?;
    if let Some(path) = &cli.data {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read dataset {}", path.display()))?;
        let data: serde_json::Value =
            serde_json::from_str(&text).context("dataset is not valid JSON")?;
        store.seed(&model, &data)?;
    }
    let service = Service::new(model, config)?;
    tracing::info!(route = %service.context().config.endpoint.route(), "service ready");

    match cli.command {
        Commands::Request { method, uri, body } => {
            request(&service, cli.error_format, &method, &uri, body.as_deref())
        }
        Commands::Sql { uri } => sql(&service, &uri),
        Commands::Check => {
            println!("Configuration is valid");
            Ok(())
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("odata_engine={level},odata_cli={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_model(path: &Path, store: &MemoryStore) -> Result<Model> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read model {}", path.display()))?;
    let model = ModelConfig::from_yaml(&text)?.build(store)?;
    Ok(model)
}

fn request(
    service: &Service,
    errors: ErrorFormat,
    method: &str,
    uri: &str,
    body: Option<&str>,
) -> Result<()> {
    let method: Method = method
        .to_uppercase()
        .parse()
        .with_context(|| format!("invalid HTTP method '{method}'"))?;
    let body: Option<serde_json::Value> = body
        .map(serde_json::from_str)
        .transpose()
        .context("request body is not valid JSON")?;

    let outcome = service
        .transaction(method, uri, body)
        .map_err(|err| error_to_problem(&err, uri, None))
        .and_then(|tx| service.handle(&tx));
    match outcome {
        Ok(response) => {
            eprintln!("{}", response.status);
            match response.body {
                Body::Json(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Body::Text(text) => println!("{text}"),
                Body::Empty => {}
            }
            Ok(())
        }
        Err(problem) => {
            println!("{}", errors.render(&problem)?);
            bail!("request failed with status {}", problem.status)
        }
    }
}

fn sql(service: &Service, uri: &str) -> Result<()> {
    let tx = service.transaction(Method::GET, uri, None)?;
    let ctx = service.context();
    let path = ResourcePath::parse(ctx.config.endpoint.resource_path(&tx.path))?;
    let ResourcePath::Resource {
        segments,
        suffix: None,
    } = &path
    else {
        bail!("SQL translation needs a collection path such as /Pets");
    };
    let [segment] = segments.as_slice() else {
        bail!("SQL translation does not follow navigation properties");
    };
    if segment.key.is_some() {
        bail!("SQL translation needs a collection, not a single entity");
    }
    let Some(def) = ctx.model.entity_set(&segment.name) else {
        bail!("entity set '{}' does not exist", segment.name);
    };

    let set = EntitySet::new(ctx.clone(), def.clone(), tx.clone());
    let plan = set.plan()?;
    let translator = SqlTranslator::new(def.name.as_str(), &def.entity_type);
    let max = ctx.config.pagination.max_page_size;
    let limit = tx.options.top.map_or(max, |top| top.min(max));
    let select = translator.select_statement(&plan, tx.options.skip.unwrap_or(0), limit)?;
    println!("{};", SqlTranslator::render(&select));
    if tx.options.count {
        let count = translator.count_statement(&plan)?;
        println!("{};", SqlTranslator::render(&count));
    }
    Ok(())
}
