use std::{error::Error, process, sync::Arc, time::Duration};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, warn, LevelFilter};
use url::Url;

use globeplayer::{
    channel::RodioChannel,
    config::Config,
    control::Controls,
    engine::Engine,
    events::Event,
    gateway::Gateway,
    http::Client as HttpClient,
    protocol::NowPlaying,
    provider::{Provider, WebApi},
    signal,
    store::Store,
    token::AccessToken,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when built in release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backend base URL
    ///
    /// The Globe Radio backend serving state, likes and audio streams.
    #[arg(short, long, value_name = "URL", value_hint = ValueHint::Url, default_value_t = String::from("http://localhost:8000"))]
    backend: String,

    /// Secrets file
    ///
    /// Contains the streaming provider access token. The player runs
    /// without provider support when this file is missing.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("secrets.toml"))]
    secrets_file: String,

    /// Device name
    ///
    /// Set the name this player reports to the streaming provider.
    ///
    /// [default: system hostname]
    #[arg(short, long, value_hint = ValueHint::Hostname)]
    name: Option<String>,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            // Quiet and verbose are mutually exclusive, and `verbose` is 0
            // by default. So this arm means: quiet mode.
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Loads the provider token, degrading to local-only playback when the
/// secrets file is missing or malformed.
fn load_token(secrets_file: &str) -> Option<AccessToken> {
    match AccessToken::from_file(secrets_file) {
        Ok(token) => Some(token),
        Err(e) => {
            warn!("no provider credential ({e}); provider playback disabled");
            None
        }
    }
}

/// Main application loop.
///
/// Wires the store, engine, provider and command layer together, then
/// services engine events until a shutdown signal arrives.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let base_url = Url::parse(&args.backend)?;
    let mut config = Config::new(base_url)?;
    if let Some(name) = args.name {
        config.device_name = name;
    }
    info!("backend at {}", config.base_url);

    let token = load_token(&args.secrets_file);

    let gateway = Arc::new(Gateway::new(&config)?);
    let store = Store::new(Arc::clone(&gateway), config.ws_url.clone());

    // The output stream must stay on this thread; only sinks move into the
    // engine task.
    let (_output_stream, output_handle) = rodio::OutputStream::try_default()?;
    let stream_client = HttpClient::new(&config)?;
    let channels = [
        RodioChannel::new("a", &output_handle, stream_client.unlimited.clone())?,
        RodioChannel::new("b", &output_handle, stream_client.unlimited.clone())?,
    ];

    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    let (engine, engine_handle) = Engine::new(channels, event_tx.clone());
    tokio::spawn(engine.run());

    let provider = Arc::new(Provider::new(WebApi::new(
        HttpClient::new(&config)?,
        token.as_ref(),
    )?));
    if token.is_some() {
        provider.connect(&config.device_id.to_string()).await;
        let _ = event_tx.send(Event::Connected);
    }
    {
        let engine_handle = engine_handle.clone();
        provider.on_state_changed(move |update| engine_handle.provider_state(update));
    }

    // Every store mutation re-derives the local stream; the engine
    // deduplicates, so redundant notifications are harmless.
    let _subscription = {
        let gateway = Arc::clone(&gateway);
        let engine_handle = engine_handle.clone();
        store.subscribe(move |record: &NowPlaying| {
            let stream = record.local_stream().and_then(|url| {
                gateway
                    .resolve(url)
                    .inspect_err(|e| error!("unusable stream url: {e}"))
                    .ok()
            });
            engine_handle.stream_changed(stream);
        })
    };

    let controls = Controls::new(
        Arc::clone(&store),
        Arc::clone(&gateway),
        Arc::clone(&provider),
        engine_handle.clone(),
    );

    let mut signals = signal::Handler::new()?;
    loop {
        tokio::select! {
            // Prioritize shutdown signals.
            biased;

            signal = signals.recv() => {
                info!("received {signal}, shutting down gracefully");
                break;
            }

            event = event_rx.recv() => match event {
                // The backend owns the station logic; ask it to advance.
                Some(Event::TrackEnded) => {
                    debug!("track ended, requesting next");
                    controls.skip_next().await;
                }
                Some(event) => debug!("event: {event:?}"),
                None => break,
            },
        }
    }

    provider.disconnect();
    let _ = event_tx.send(Event::Disconnected);
    store.shutdown();
    engine_handle.shutdown();
    // Log anything that raced the shutdown, then give the engine task a
    // moment to silence the channels.
    while let Ok(event) = event_rx.try_recv() {
        debug!("event at shutdown: {event:?}");
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(())
}

/// Main entry point of the application.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {args:#?}");

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
