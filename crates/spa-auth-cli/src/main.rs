use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use spa_auth_core::auth::{
    AuthError, FileStore, FrameHandle, FrameRequest, HostEnvironment, LoginState,
    LoginStateOptions, LoginTransaction, PopupHandle, RedirectLoginOptions, SpaAuth,
    WindowMessage,
};
use spa_auth_core::config::{AuthOptions, ConfigLocator};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing_subscriber::EnvFilter;
use url::Url;

/// Drive the redirect login flow of an OpenID Connect application from a terminal.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// JSON options file (domain, appId, redirectUri, ...).
    #[arg(long, global = true, default_value = "spa-auth.json")]
    config: PathBuf,
    /// Directory for stored login state and pending transactions.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a login: store the transaction and open the authorization page.
    Login {
        /// Ask for credentials even if a session exists.
        #[arg(long)]
        forced: bool,
        /// Page to return to once the callback has been handled.
        #[arg(long)]
        original_uri: Option<String>,
        /// JSON payload echoed back by the callback.
        #[arg(long)]
        custom_state: Option<String>,
        /// Print the authorization URL without launching a browser.
        #[arg(long)]
        no_browser: bool,
    },
    /// Complete a login from the URL the browser was redirected to.
    Callback {
        url: String,
    },
    /// Show the stored login state.
    Status {
        /// Ignore the stored state and ask the authorization server.
        #[arg(long)]
        refresh: bool,
    },
}

fn main() -> ExitCode {
    init_tracing();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("{err:?}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = runtime.block_on(run()) {
        eprintln!("{err:?}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("SPA_AUTH_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let options = AuthOptions::from_json_file(&cli.config)
        .with_context(|| format!("failed to load options from {}", cli.config.display()))?;
    let locator = match cli.data_dir {
        Some(dir) => ConfigLocator::from_root(dir)?,
        None => ConfigLocator::new()?,
    };

    match cli.command {
        Commands::Login {
            forced,
            original_uri,
            custom_state,
            no_browser,
        } => {
            let custom_state = custom_state
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .context("--custom-state must be valid JSON")?;
            let host = TerminalHost::new(options.redirect_uri.clone(), !no_browser);
            let auth = build_auth(options, host, &locator)?;
            auth.login_with_redirect(RedirectLoginOptions {
                original_uri,
                forced,
                custom_state,
            })
            .await?;
            eprintln!("After logging in, run `spa-auth callback <redirected URL>`.");
        }
        Commands::Callback { url } => {
            let location = Url::parse(&url).with_context(|| format!("invalid callback URL {url}"))?;
            let host = TerminalHost::new(location, true);
            let auth = build_auth(options, host, &locator)?;
            if !auth.is_redirect_callback() {
                bail!("{url} does not carry an authorization response");
            }
            let result = auth.handle_redirect_callback().await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Status { refresh } => {
            let host = TerminalHost::new(options.redirect_uri.clone(), false);
            let auth = build_auth(options, host, &locator)?;
            let state = auth
                .get_login_state(LoginStateOptions {
                    ignore_cache: refresh,
                })
                .await?;
            match state {
                Some(state) => {
                    if state.is_expired() {
                        tracing::warn!("stored login state has expired");
                    }
                    println!("{}", serde_json::to_string_pretty(&state)?);
                }
                None => println!("not logged in"),
            }
        }
    }
    Ok(())
}

fn build_auth(options: AuthOptions, host: TerminalHost, locator: &ConfigLocator) -> Result<SpaAuth> {
    let login_states = Arc::new(FileStore::<LoginState>::new(locator.clone()));
    // File-backed so the transaction outlives this process until the callback runs.
    let transactions = Arc::new(FileStore::<LoginTransaction>::new(locator.clone()));
    Ok(SpaAuth::with_stores(
        options,
        Arc::new(host),
        login_states,
        transactions,
    )?)
}

/// Host for a terminal session: navigation opens the system browser, and
/// there is no document to receive cross-window messages.
struct TerminalHost {
    location: Mutex<Url>,
    open_browser: bool,
}

impl TerminalHost {
    fn new(location: Url, open_browser: bool) -> Self {
        Self {
            location: Mutex::new(location),
            open_browser,
        }
    }
}

impl HostEnvironment for TerminalHost {
    fn location(&self) -> Url {
        self.location
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn replace_location(&self, url: &Url) {
        eprintln!("Open {url}");
        if self.open_browser {
            if let Err(err) = open::that(url.as_str()) {
                tracing::warn!(%err, "failed to launch system browser");
            }
        }
        *self
            .location
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = url.clone();
    }

    fn cross_origin_isolated(&self) -> bool {
        true
    }

    fn listen_messages(&self) -> UnboundedReceiver<WindowMessage> {
        let (_tx, rx) = mpsc::unbounded_channel();
        rx
    }

    fn mount_frame(&self, _request: FrameRequest) -> Result<Box<dyn FrameHandle>, AuthError> {
        Err(AuthError::FrameUnavailable(
            "a terminal has no document to attach frames to".into(),
        ))
    }

    fn open_popup(&self, _url: &Url, _name: &str, _features: &str) -> Option<Box<dyn PopupHandle>> {
        None
    }
}
