//! lmsdash - command-line client for the learning-management dashboard API.
//!
//! Keeps a session across invocations, refreshes expired access tokens on
//! the fly and can follow unread notifications.

mod cli;

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lmsdash_core::api::resources;
use lmsdash_core::{
    ApiRequest, Config, Notification, ReqwestTransport, SessionController, SessionState,
};

use cli::{Cli, Command, ReadTarget};

/// When set, logs go to daily-rotated files in this directory instead of stderr.
const LOG_DIR_ENV: &str = "LMSDASH_LOG_DIR";
const LOG_FILE_PREFIX: &str = "lmsdash.log";

/// Initialize the tracing subscriber. Hold on to the returned guard so
/// buffered file output is flushed on exit.
fn init_tracing() -> Option<WorkerGuard> {
    // RUST_LOG controls the level (e.g. RUST_LOG=lmsdash_core=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match std::env::var(LOG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir.trim(), LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _log_guard = init_tracing();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    config.apply_env();
    let mut settings = config.settings();
    // One-off override, never written back to the config file
    if let Some(base_url) = cli.base_url {
        settings.base_url = base_url;
    }
    info!(base_url = %settings.base_url, "lmsdash starting");

    let transport = Arc::new(ReqwestTransport::new(&settings.base_url, settings.request_timeout)?);
    let store = config.credential_store()?;
    let session = SessionController::new(transport, store, &settings);
    session.restore();

    let result = run(cli.command, &session, &mut config, &settings.base_url).await;
    session.shutdown();
    result
}

async fn run(
    command: Command,
    session: &Arc<SessionController>,
    config: &mut Config,
    base_url: &str,
) -> Result<()> {
    match command {
        Command::Login { username } => login(session, config, username).await,
        Command::Logout => {
            session.logout();
            println!("Logged out.");
            Ok(())
        }
        Command::Status => {
            status(session, config, base_url);
            Ok(())
        }
        Command::Whoami => {
            require_session(session)?;
            let profile = session.load_profile().await?;
            println!("{} ({})", profile.display_name(), profile.username);
            if let Some(email) = &profile.email {
                println!("  email: {}", email);
            }
            if let Some(role) = &profile.role {
                println!("  role:  {}", role);
            }
            Ok(())
        }
        Command::Get { path } => {
            require_session(session)?;
            let response = session.client().send(ApiRequest::get(&path)).await?;
            let status = response.status();
            print_body(response.bytes());
            if !status.is_success() {
                bail!("Request failed with status {}", status);
            }
            Ok(())
        }
        Command::List { resource, filter } => {
            require_session(session)?;
            let body: Value = session
                .client()
                .send_json(resources::list_filtered(resource, &filter.into()))
                .await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(())
        }
        Command::Notifications { watch } => {
            require_session(session)?;
            if watch {
                watch_notifications(session).await
            } else {
                let unread = session.notifications().fetch_unread().await?;
                print_notifications(&unread);
                Ok(())
            }
        }
        Command::Read(args) => {
            require_session(session)?;
            let poller = session.notifications();
            match args.target() {
                ReadTarget::One(id) => {
                    poller.mark_read(id).await?;
                    println!("Marked notification {} as read.", id);
                }
                ReadTarget::All => {
                    poller.mark_all_read().await?;
                    println!("Marked all notifications as read.");
                }
            }
            Ok(())
        }
    }
}

fn require_session(session: &SessionController) -> Result<()> {
    if !session.is_authenticated() {
        bail!("Not logged in. Run `lmsdash login` first.");
    }
    Ok(())
}

async fn login(
    session: &SessionController,
    config: &mut Config,
    username: Option<String>,
) -> Result<()> {
    let username = match username.or_else(|| config.last_username.clone()) {
        Some(name) => name,
        None => prompt("Username: ")?,
    };
    if username.is_empty() {
        bail!("Username is required");
    }
    let password = rpassword::prompt_password(format!("Password for {}: ", username))
        .context("Failed to read password")?;

    session.login(&username, &password).await?;

    config.last_username = Some(username.clone());
    if let Err(e) = config.save() {
        tracing::warn!("Failed to save config: {}", e);
    }

    match session.load_profile().await {
        Ok(profile) => println!("Logged in as {}.", profile.display_name()),
        Err(e) => {
            tracing::warn!("Could not load profile: {}", e);
            println!("Logged in as {}.", username);
        }
    }
    Ok(())
}

fn status(session: &SessionController, config: &Config, base_url: &str) {
    println!("Server:  {}", base_url);
    match session.state() {
        SessionState::Authenticated => {
            let who = session
                .current_user()
                .map(|u| format!("{} [{}]", u.display_name(), u.initials()))
                .or_else(|| config.last_username.clone())
                .unwrap_or_else(|| "unknown user".to_string());
            println!("Session: logged in as {}", who);
        }
        SessionState::Anonymous => println!("Session: not logged in"),
    }
}

/// Poll until the session ends or the user hits Ctrl-C.
async fn watch_notifications(session: &Arc<SessionController>) -> Result<()> {
    let mut unread = session.notifications().subscribe();
    let mut state = session.subscribe();
    session.notifications().start();
    println!(
        "Watching notifications every {}s (Ctrl-C to stop)...",
        session.notifications().interval().as_secs()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = unread.changed() => {
                if changed.is_err() {
                    break;
                }
                let list = unread.borrow_and_update().clone();
                print_notifications(&list);
            }
            changed = state.changed() => {
                if changed.is_err() || *state.borrow_and_update() == SessionState::Anonymous {
                    eprintln!("Session expired. Please log in again.");
                    break;
                }
            }
        }
    }
    Ok(())
}

fn print_notifications(list: &[Notification]) {
    if list.is_empty() {
        println!("No unread notifications.");
        return;
    }
    println!("{} unread:", list.len());
    for n in list {
        let when = n
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!("  #{:<5} [{:<7}] {}  {}", n.id, n.kind.label(), n.title, when);
        if !n.message.is_empty() {
            println!("          {}", n.message);
        }
        if let Some(target) = n.target() {
            println!("          -> {}", target);
        }
    }
}

fn print_body(bytes: &[u8]) {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => println!("{}", pretty),
            Err(_) => println!("{}", String::from_utf8_lossy(bytes)),
        },
        Err(_) => println!("{}", String::from_utf8_lossy(bytes)),
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
