//! API DevTools - Main Application
//!
//! CLI for sending single requests, running the capture proxy and managing
//! saved requests.

use anyhow::Context;
use api_devtools::{
    api::start_api_server,
    client::{RequestBody, RequestOptions, RequestRunner},
    codegen::{generate, CodeTarget},
    config::{AppConfig, SharedConfig},
    display::{record_line, render_record},
    records::create_shared_log,
    server::CaptureProxy,
    storage::RequestStore,
    tui::TuiApp,
    ExchangeRecord,
};
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// API DevTools - capture proxy and request runner
#[derive(Parser)]
#[command(name = "api-devtools")]
#[command(about = "Observe, replay and generate code from HTTP traffic")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a GET request
    Get {
        url: String,
        /// Header to add, e.g. "Authorization: Bearer token"
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },
    /// Send a POST request
    Post {
        url: String,
        /// Request body (JSON, sent raw if it does not parse)
        #[arg(short, long)]
        data: Option<String>,
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },
    /// Send a PUT request
    Put {
        url: String,
        #[arg(short, long)]
        data: Option<String>,
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },
    /// Send a DELETE request
    Delete {
        url: String,
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },
    /// Replay a saved request, or GET a URL
    Run { name_or_url: String },
    /// Send a request and save it under a name
    Save {
        name: String,
        method: String,
        url: String,
        #[arg(short, long)]
        data: Option<String>,
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },
    /// List saved requests
    List,
    /// Delete a saved request
    Remove { name: String },
    /// Generate code or a test from a saved request
    Generate {
        name: String,
        #[arg(short, long, value_enum, default_value_t = CodeTarget::Curl)]
        target: CodeTarget,
    },
    /// Start the capture proxy
    Proxy {
        /// Port to listen on
        #[arg(short, long, env = "API_DEVTOOLS_PORT")]
        port: Option<u16>,
        /// Origin to forward to
        #[arg(short, long)]
        target: Option<String>,
        /// Print records instead of opening the TUI
        #[arg(long)]
        headless: bool,
    },
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let tui_mode = matches!(cli.command, Some(Commands::Proxy { headless: false, .. }));
    init_logging(cli.verbose, tui_mode);

    let config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path)
            .with_context(|| format!("failed to load config from {}", path))?,
        None => AppConfig::load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to load config, using defaults");
            AppConfig::default()
        }),
    };

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    match command {
        Commands::Get { url, headers } => {
            send(&config, "GET", &url, None, &headers).await?;
        }
        Commands::Post { url, data, headers } => {
            send(&config, "POST", &url, data.as_deref(), &headers).await?;
        }
        Commands::Put { url, data, headers } => {
            send(&config, "PUT", &url, data.as_deref(), &headers).await?;
        }
        Commands::Delete { url, headers } => {
            send(&config, "DELETE", &url, None, &headers).await?;
        }
        Commands::Run { name_or_url } => run_saved(&config, &name_or_url).await?,
        Commands::Save {
            name,
            method,
            url,
            data,
            headers,
        } => {
            let record = send(&config, &method, &url, data.as_deref(), &headers).await?;
            if let Some(warning) = failed_save_warning(&record) {
                eprintln!("{}", warning);
            }
            let store = RequestStore::open(config.storage.path.as_deref())?;
            store.save(&name, &record)?;
            println!("Saved as \"{}\"", name);
        }
        Commands::List => list_saved(&config)?,
        Commands::Remove { name } => {
            let store = RequestStore::open(config.storage.path.as_deref())?;
            if store.delete(&name)? {
                println!("Deleted \"{}\"", name);
            } else {
                anyhow::bail!("no saved request named \"{}\"", name);
            }
        }
        Commands::Generate { name, target } => {
            let store = RequestStore::open(config.storage.path.as_deref())?;
            let saved = store
                .get(&name)?
                .with_context(|| format!("no saved request named \"{}\"", name))?;
            println!("{}", generate(&saved.to_record(), target));
        }
        Commands::Proxy {
            port,
            target,
            headless,
        } => {
            let config = SharedConfig::new(config);
            apply_proxy_overrides(&config, port, target);
            run_proxy(config, headless).await?;
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, tui_mode: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("api_devtools={}", log_level).into());

    // The TUI owns the terminal, so log lines must not reach it.
    if tui_mode {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::sink))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Split `Key: Value` arguments on the first colon. Malformed entries are dropped.
fn parse_headers(raw: &[String]) -> Vec<(String, String)> {
    raw.iter()
        .filter_map(|header| {
            let (key, value) = header.split_once(':')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Apply `--port`/`--target` on top of the loaded proxy settings
fn apply_proxy_overrides(config: &SharedConfig, port: Option<u16>, target: Option<String>) {
    let mut proxy = config.get().proxy;
    if let Some(port) = port {
        proxy.port = port;
    }
    if target.is_some() {
        proxy.target = target;
    }
    config.update_proxy(proxy);
}

fn failed_save_warning(record: &ExchangeRecord) -> Option<String> {
    record
        .error
        .as_ref()
        .map(|error| format!("warning: the request failed ({}), saving it anyway", error))
}

async fn send(
    config: &AppConfig,
    method: &str,
    url: &str,
    data: Option<&str>,
    headers: &[String],
) -> anyhow::Result<ExchangeRecord> {
    let mut options = RequestOptions {
        headers: parse_headers(headers),
        body: None,
    };
    if let Some(data) = data {
        let (body, fell_back) = RequestBody::parse_lenient(data);
        if fell_back {
            eprintln!("warning: body is not valid JSON, sending it as a raw string");
        }
        options.body = Some(body);
    }

    run_request(config, method, url, options).await
}

async fn run_request(
    config: &AppConfig,
    method: &str,
    url: &str,
    options: RequestOptions,
) -> anyhow::Result<ExchangeRecord> {
    let runner = RequestRunner::from_config(&config.client)?;

    println!("{} {} ...", method.to_uppercase(), url);
    let record = runner.run(method, url, options).await;
    print!("{}", render_record(&record));

    Ok(record)
}

async fn run_saved(config: &AppConfig, name_or_url: &str) -> anyhow::Result<()> {
    if name_or_url.starts_with("http://") || name_or_url.starts_with("https://") {
        run_request(config, "GET", name_or_url, RequestOptions::default()).await?;
        return Ok(());
    }

    let store = RequestStore::open(config.storage.path.as_deref())?;
    let saved = store.get(name_or_url)?.with_context(|| {
        format!(
            "no saved request named \"{}\" (see `api-devtools list`)",
            name_or_url
        )
    })?;

    // Saved bodies are replayed verbatim.
    let options = RequestOptions {
        headers: saved.headers.clone().unwrap_or_default().into_iter().collect(),
        body: saved.body.clone().map(RequestBody::Text),
    };
    run_request(config, &saved.method, &saved.url, options).await?;
    Ok(())
}

fn list_saved(config: &AppConfig) -> anyhow::Result<()> {
    let store = RequestStore::open(config.storage.path.as_deref())?;
    let requests = store.list()?;

    if requests.is_empty() {
        println!("No saved requests");
        return Ok(());
    }

    println!("{}", "─".repeat(60));
    for request in &requests {
        println!("{}", request.name);
        println!("   {} {}", request.method, request.url);
        println!(
            "   created {}",
            request
                .created_at
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!("{}", "─".repeat(60));
    println!("Usage: api-devtools run <name>");

    Ok(())
}

async fn run_proxy(shared_config: SharedConfig, headless: bool) -> anyhow::Result<()> {
    let config = shared_config.get();
    let records = create_shared_log(config.proxy.max_records);

    if config.inspect.enabled {
        let api_config = shared_config.clone();
        let api_records = records.clone();
        tokio::spawn(async move {
            if let Err(e) = start_api_server(api_config, api_records).await {
                tracing::error!(error = %e, "Inspection API error");
            }
        });
    }

    let handle = CaptureProxy::new(config.proxy.clone(), records.clone())
        .start()
        .await?;

    if headless {
        println!(
            "Listening on {} -> {}",
            handle.local_addr(),
            config.proxy.target().unwrap_or("(no target)")
        );

        let mut rx = records.subscribe();
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                Some(record) = rx.recv() => println!("{}", record_line(&record)),
                _ = &mut shutdown => break,
            }
        }
    } else {
        let store = RequestStore::open(config.storage.path.as_deref())?;
        let mut app = TuiApp::new(
            handle.local_addr(),
            config.proxy.target().map(str::to_string),
            records,
            store,
        );
        app.run().await?;
    }

    handle.stop().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_headers() {
        let headers = parse_headers(&[
            "Authorization: Bearer a:b".to_string(),
            "broken".to_string(),
            " : empty".to_string(),
        ]);
        assert_eq!(
            headers,
            vec![("Authorization".to_string(), "Bearer a:b".to_string())]
        );
    }

    #[test]
    fn test_proxy_overrides_reach_shared_config() {
        let config = SharedConfig::new(AppConfig::default());
        apply_proxy_overrides(&config, Some(9000), Some("http://localhost:3000".to_string()));

        let proxy = config.get().proxy;
        assert_eq!(proxy.port, 9000);
        assert_eq!(proxy.target(), Some("http://localhost:3000"));

        apply_proxy_overrides(&config, None, None);
        assert_eq!(config.get().proxy.port, 9000);
    }

    #[test]
    fn test_failed_save_warning() {
        use api_devtools::capture::{HeaderFields, ResponseParts};
        use api_devtools::ExchangeRecorder;

        let failed = ExchangeRecorder::begin("GET", "http://localhost:1/", HeaderFields::new(), None)
            .complete_error("connection refused");
        let warning = failed_save_warning(&failed).unwrap();
        assert!(warning.contains("connection refused"));

        let ok = ExchangeRecorder::begin("GET", "http://localhost/", HeaderFields::new(), None)
            .complete_success(ResponseParts::new(200, HeaderFields::new(), "ok"));
        assert!(failed_save_warning(&ok).is_none());
    }

    #[test]
    fn test_cli_parses_proxy() {
        let cli = Cli::try_parse_from(["api-devtools", "proxy", "-t", "http://localhost:3000"])
            .unwrap();
        match cli.command {
            Some(Commands::Proxy {
                target, headless, ..
            }) => {
                assert_eq!(target.as_deref(), Some("http://localhost:3000"));
                assert!(!headless);
            }
            _ => panic!("expected proxy command"),
        }
    }

    #[test]
    fn test_cli_parses_generate_target() {
        let cli = Cli::try_parse_from(["api-devtools", "generate", "x", "--target", "jest-test"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Generate {
                target: CodeTarget::JestTest,
                ..
            })
        ));
    }
}
