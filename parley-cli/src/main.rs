//! CLI entry point for parley

mod client;

use anyhow::Result;
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use console::style;
use dialoguer::{Confirm, Input, Password};
use indicatif::{ProgressBar, ProgressStyle};
use parley_backend::{IdentityProvider, SignUpOutcome, SupabaseClient};
use parley_chat::{
    ConversationError, ConversationManager, LoadOutcome, Persistence, SendOutcome,
};
use parley_core::config::validate::validate_config;
use parley_core::config::{Config, ConfigLoader};
use parley_core::logging::init_logging;
use parley_core::session::{Role, Turn};
use parley_core::utils::{expand_tilde, truncate};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

use crate::client::{build_backend, build_manager, NOT_SIGNED_IN};

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Chat with Gemini, with history kept in Supabase")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration directory
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize parley configuration
    Onboard,
    /// Sign in with email and password, or with an OAuth provider
    Login {
        /// Account email
        #[arg(short, long)]
        email: Option<String>,
        /// OAuth provider (e.g. 'google', 'github')
        #[arg(long, conflicts_with = "email")]
        oauth: Option<String>,
    },
    /// Create an account
    Signup {
        /// Account email
        #[arg(short, long)]
        email: Option<String>,
    },
    /// Sign out
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Start an interactive chat
    Chat,
    /// Send one message and print the reply
    Send {
        /// Message to send
        #[arg(short, long)]
        message: String,
    },
    /// Print the current conversation
    History,
    /// Show status information
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_loader = if let Some(dir) = cli.config_dir {
        ConfigLoader::with_dir(dir)
    } else {
        ConfigLoader::new()
    };

    // Logging comes up even when the config is broken, so onboard can fix it
    let loaded = config_loader.load();
    let logging = loaded
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();
    let _log_guard = init_logging(&logging);

    if matches!(cli.command, Commands::Onboard) {
        info!("Running onboard command");
        return run_onboard(&config_loader, loaded.ok()).await;
    }

    let config = loaded?;
    debug!(config_dir = %config_loader.config_dir().display(), "Configuration loaded");

    match cli.command {
        Commands::Onboard => {}
        Commands::Login { email, oauth } => {
            info!("Running login command");
            match oauth {
                Some(provider) => run_oauth_login(&config_loader, &config, &provider).await?,
                None => run_login(&config_loader, &config, email).await?,
            }
        }
        Commands::Signup { email } => {
            info!("Running signup command");
            run_signup(&config_loader, &config, email).await?;
        }
        Commands::Logout => {
            info!("Running logout command");
            run_logout(&config_loader, &config).await?;
        }
        Commands::Whoami => {
            info!("Running whoami command");
            run_whoami(&config_loader, &config).await?;
        }
        Commands::Chat => {
            info!("Starting interactive chat");
            run_chat(&config_loader, &config).await?;
        }
        Commands::Send { message } => {
            info!("Sending one-shot message");
            run_send(&config_loader, &config, &message).await?;
        }
        Commands::History => {
            info!("Showing history");
            run_history(&config_loader, &config).await?;
        }
        Commands::Status => {
            info!("Showing status");
            run_status(&config_loader, &config)?;
        }
    }

    Ok(())
}

/// Prompt for a value, keeping `current` when the user just presses enter
fn prompt_text(prompt: &str, current: &str) -> Result<String> {
    let mut input = Input::<String>::new()
        .with_prompt(prompt)
        .allow_empty(true);
    if !current.is_empty() {
        input = input.default(current.to_string());
    }
    Ok(input.interact_text()?.trim().to_string())
}

/// Run the onboard wizard
async fn run_onboard(loader: &ConfigLoader, existing: Option<Config>) -> Result<()> {
    println!("{}", style("Welcome to parley!").bold().cyan());
    println!("Let's set up your configuration.\n");

    let config_path = loader.config_path();
    if config_path.exists() {
        let update = Confirm::new()
            .with_prompt("Configuration already exists. Update it?")
            .default(true)
            .interact()?;
        if !update {
            println!("Onboard cancelled.");
            return Ok(());
        }
    }

    let mut config = existing.unwrap_or_default();

    config.backend.url = prompt_text("Supabase project URL", &config.backend.url)?;
    config.backend.anon_key = prompt_text("Supabase anon key", &config.backend.anon_key)?;
    config.generation.api_key = prompt_text("Gemini API key", &config.generation.api_key)?;
    config.generation.model = prompt_text("Gemini model", &config.generation.model)?;

    validate_config(&config)?;
    loader.save(&config)?;

    let log_dir = expand_tilde(&config.logging.dir);
    std::fs::create_dir_all(&log_dir)?;

    println!(
        "\n{}",
        style("Configuration saved successfully!").green().bold()
    );
    println!("Config location: {}", config_path.display());
    println!("\nYou can now run:");
    println!("  {} - Sign in", style("parley login").cyan());
    println!("  {} - Start chatting", style("parley chat").cyan());

    Ok(())
}

fn display_name(user: &parley_backend::AuthUser) -> &str {
    user.email.as_deref().unwrap_or(&user.id)
}

async fn run_login(loader: &ConfigLoader, config: &Config, email: Option<String>) -> Result<()> {
    let backend = build_backend(loader, config)?;

    let email = match email {
        Some(email) => email,
        None => Input::<String>::new().with_prompt("Email").interact_text()?,
    };
    let password = Password::new().with_prompt("Password").interact()?;

    match backend.sign_in_with_password(email.trim(), &password).await {
        Ok(user) => {
            println!("{} {}", style("Signed in as").green(), display_name(&user));
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Sign-in failed");
            anyhow::bail!("Sign-in failed: {}", e)
        }
    }
}

async fn run_oauth_login(loader: &ConfigLoader, config: &Config, provider: &str) -> Result<()> {
    let backend = build_backend(loader, config)?;
    let redirect = &config.backend.oauth_redirect;
    let url = backend.sign_in_with_oauth(provider, redirect)?;

    println!("Open this URL in a browser and sign in:\n");
    println!("  {}\n", style(&url).cyan().underlined());
    println!(
        "The browser is then sent to {}. Copy the full address from the address bar.",
        redirect
    );

    let callback = Input::<String>::new()
        .with_prompt("Callback URL")
        .interact_text()?;

    match backend.complete_oauth(callback.trim()).await {
        Ok(user) => {
            println!("{} {}", style("Signed in as").green(), display_name(&user));
            Ok(())
        }
        Err(e) => {
            error!(provider, error = %e, "OAuth sign-in failed");
            anyhow::bail!("Sign-in failed: {}", e)
        }
    }
}

async fn run_signup(loader: &ConfigLoader, config: &Config, email: Option<String>) -> Result<()> {
    let backend = build_backend(loader, config)?;

    let email = match email {
        Some(email) => email,
        None => Input::<String>::new().with_prompt("Email").interact_text()?,
    };
    let password = Password::new()
        .with_prompt("Password")
        .with_confirmation("Confirm password", "Passwords do not match")
        .interact()?;

    match backend.sign_up(email.trim(), &password).await? {
        SignUpOutcome::SignedIn(user) => {
            println!(
                "{} {}",
                style("Account created, signed in as").green(),
                display_name(&user)
            );
        }
        SignUpOutcome::ConfirmationRequired { email } => {
            println!(
                "Check your inbox at {} to confirm the account, then run {}.",
                style(email).bold(),
                style("parley login").cyan()
            );
        }
    }
    Ok(())
}

async fn run_logout(loader: &ConfigLoader, config: &Config) -> Result<()> {
    let backend = build_backend(loader, config)?;
    backend.sign_out().await?;
    println!("Signed out.");
    Ok(())
}

async fn run_whoami(loader: &ConfigLoader, config: &Config) -> Result<()> {
    let backend = build_backend(loader, config)?;
    match backend.current_user().await? {
        Some(user) => {
            println!("{}", style(display_name(&user)).bold());
            println!("  id: {}", user.id);
            if let Some(avatar) = user.avatar_url() {
                println!("  avatar: {}", avatar);
            }
        }
        None => println!("{}", NOT_SIGNED_IN),
    }
    Ok(())
}

fn print_turn(turn: &Turn, model: &str) {
    match turn.role {
        Role::User => println!("{} {}", style("you ›").cyan().bold(), turn.text),
        Role::Model => println!("{} {}", style(format!("{} ›", model)).magenta().bold(), turn.text),
    }
}

/// Load the session, printing what was found unless `quiet`
async fn load_session(manager: &ConversationManager, quiet: bool) -> Result<()> {
    match manager.load_session().await {
        Ok(LoadOutcome::Resumed { .. }) => {
            if !quiet {
                for turn in manager.turns() {
                    print_turn(&turn, manager.model());
                }
            }
        }
        Ok(LoadOutcome::Empty) => {
            if !quiet {
                println!("{}", style("No conversation yet.").dim());
            }
        }
        Ok(LoadOutcome::Degraded { error }) => {
            eprintln!(
                "{}",
                style(format!(
                    "Could not load history ({}); starting a new conversation.",
                    error
                ))
                .dim()
            );
        }
        Err(ConversationError::Unauthenticated) => anyhow::bail!(NOT_SIGNED_IN),
        Err(e) => anyhow::bail!(e),
    }
    Ok(())
}

fn spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::with_template("{spinner:.magenta} {msg}") {
        spinner.set_style(template);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

async fn send_with_spinner(
    manager: &ConversationManager,
    prompt: &str,
) -> Result<SendOutcome, ConversationError> {
    let progress = spinner(format!("{} is thinking...", manager.model()));
    let outcome = manager.send_turn(prompt).await;
    progress.finish_and_clear();
    outcome
}

fn print_persistence_notice(persistence: &Persistence) {
    if let Persistence::Failed { stage, error } = persistence {
        eprintln!(
            "{}",
            style(format!("Not saved: {} insert failed ({})", stage, error)).dim()
        );
    }
}

async fn run_chat(loader: &ConfigLoader, config: &Config) -> Result<()> {
    let manager = build_manager(loader, config)?;
    load_session(&manager, false).await?;

    println!(
        "{}",
        style("Type a message and press enter. /retry resends a message that got no reply, /reload reloads the conversation, /exit quits.")
            .dim()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", style("you ›").cyan().bold());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let prompt = match line.trim() {
            "/exit" | "/quit" => break,
            "/reload" => {
                load_session(&manager, false).await?;
                continue;
            }
            "/retry" => {
                let prompt = manager.take_pending_input();
                if prompt.is_empty() {
                    println!("{}", style("Nothing to retry.").dim());
                    continue;
                }
                prompt
            }
            _ => {
                manager.take_pending_input();
                line
            }
        };

        match send_with_spinner(&manager, &prompt).await {
            Ok(SendOutcome::Ignored) => {}
            Ok(SendOutcome::NoReply { error }) => {
                // Kept so /retry can send it again
                manager.set_pending_input(prompt);
                println!("{}", style("(no reply, /retry to send again)").dim());
                debug!(error = %error, "Generation failed");
            }
            Ok(SendOutcome::Replied { reply, persistence }) => {
                print_turn(&Turn::model(reply), manager.model());
                print_persistence_notice(&persistence);
            }
            Err(ConversationError::Unauthenticated) => anyhow::bail!(NOT_SIGNED_IN),
            Err(e) => {
                warn!(error = %e, "Send rejected");
                eprintln!("{}", style(e).yellow());
            }
        }
    }

    Ok(())
}

async fn run_send(loader: &ConfigLoader, config: &Config, message: &str) -> Result<()> {
    let manager = build_manager(loader, config)?;
    load_session(&manager, true).await?;

    match send_with_spinner(&manager, message).await {
        Ok(SendOutcome::Ignored) => anyhow::bail!("Message is empty"),
        Ok(SendOutcome::NoReply { error }) => anyhow::bail!("No reply: {}", error),
        Ok(SendOutcome::Replied { reply, persistence }) => {
            println!("{}", reply);
            print_persistence_notice(&persistence);
            Ok(())
        }
        Err(ConversationError::Unauthenticated) => anyhow::bail!(NOT_SIGNED_IN),
        Err(e) => anyhow::bail!(e),
    }
}

async fn run_history(loader: &ConfigLoader, config: &Config) -> Result<()> {
    let manager = build_manager(loader, config)?;
    load_session(&manager, false).await
}

fn configured(value: &str) -> console::StyledObject<&'static str> {
    if value.trim().is_empty() {
        style("not configured").red()
    } else {
        style("configured").green()
    }
}

fn run_status(loader: &ConfigLoader, config: &Config) -> Result<()> {
    println!("{}", style("parley status").bold().cyan());
    println!("Version: {}\n", env!("CARGO_PKG_VERSION"));

    println!("{}", style("Configuration:").bold());
    println!("  Config directory: {}", loader.config_dir().display());
    println!(
        "  Log directory: {}",
        expand_tilde(&config.logging.dir).display()
    );
    println!();

    println!("{}", style("Backend:").bold());
    if config.backend.is_configured() {
        println!("  URL: {}", config.backend.url);
        println!("  Anon key: {}", truncate(&config.backend.anon_key, 12));
    } else {
        println!("  {}", style("not configured").red());
    }
    println!(
        "  Tables: {} / {}",
        config.backend.chats_table, config.backend.messages_table
    );
    println!();

    println!("{}", style("Generation:").bold());
    println!("  Model: {}", config.generation.model);
    println!("  API key: {}", configured(&config.generation.api_key));
    println!(
        "  temperature={} top_k={} top_p={} max_output_tokens={} safety={}",
        config.generation.temperature,
        config.generation.top_k,
        config.generation.top_p,
        config.generation.max_output_tokens,
        config.generation.safety_threshold
    );
    println!();

    println!("{}", style("Session:").bold());
    let session = SupabaseClient::new(&config.backend)
        .ok()
        .and_then(|client| client.with_session_file(loader.auth_session_path()).session());
    match session {
        Some(session) => {
            let who = session
                .user
                .as_ref()
                .map(display_name)
                .unwrap_or("unknown user");
            println!("  Signed in: {}", style(who).green());
            if let Some(expires) = session
                .expires_at
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
            {
                println!(
                    "  Token expires: {}",
                    expires.with_timezone(&Local).format("%Y-%m-%d %H:%M")
                );
            }
        }
        None => println!("  {}", style("not signed in").dim()),
    }

    Ok(())
}
