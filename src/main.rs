//! Follow-up User Bot - Main Entry Point
//!
//! A Telegram userbot that sends timed follow-up campaigns from your
//! accounts and stops messaging a contact once they reply.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::{Input, Password};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use followup_user_bot::commands::{AccountCommand, Command, CommandHandler};
use followup_user_bot::config::{CampaignPlan, TelegramConfig, WorkerSettings};
use followup_user_bot::scheduler::{
    CampaignScheduler, DeliveryLoop, ReplyWatcher, SchedulerMessage,
};
use followup_user_bot::store::{AccountStatus, SourceAccount, Store};
use followup_user_bot::telegram::{
    ChannelError, ConnectionRegistry, GrammersConnector, MessagingChannel, TelegramBot, mask_phone,
};

/// How long shutdown waits for queued replies to be recorded.
const REPLY_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Telegram userbot for multi-step follow-up campaigns.
#[derive(Parser, Debug)]
#[command(name = "followup_bot")]
#[command(about = "Send timed follow-up campaigns from your Telegram accounts")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env", global = true)]
    env_file: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Generate an example campaign plan file and exit.
    #[arg(long)]
    generate_plan: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level);

    // Handle example plan generation
    if args.generate_plan {
        generate_example_plan()?;
        return Ok(ExitCode::SUCCESS);
    }

    // Load environment variables
    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    // Load configurations
    let tg_config = TelegramConfig::from_env()
        .context("Failed to load Telegram configuration from environment")?;
    let settings = WorkerSettings::from_env().context("Invalid worker settings")?;

    let store = Store::connect(&settings.database_url)
        .await
        .context("Failed to open campaign store")?;

    let code = match args.command.unwrap_or(Command::Run) {
        Command::Run => {
            run_worker(&store, tg_config, &settings).await?;
            ExitCode::SUCCESS
        }
        Command::Account(AccountCommand::Add(add)) => {
            let account = store
                .create_account(&add.phone, add.name.as_deref(), add.tag.as_deref())
                .await
                .context("Failed to create account")?;
            println!("✓ Account {} created, signing in...", account.id);
            onboard(&store, &tg_config, &account).await?;
            ExitCode::SUCCESS
        }
        Command::Account(AccountCommand::Login { id }) => {
            let account = store.get_account(&id).await.context("Unknown account")?;
            onboard(&store, &tg_config, &account).await?;
            ExitCode::SUCCESS
        }
        command => run_command(&store, tg_config, &settings, command).await,
    };

    store.close().await;
    Ok(code)
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Generates an example campaign plan file.
fn generate_example_plan() -> Result<()> {
    let example = CampaignPlan::example();
    example.save_to_file("campaign.example.json")?;

    println!("✓ Example campaign plan written to: campaign.example.json");
    println!("\nTo use this bot:");
    println!("1. Create a .env file with TG_API_ID and TG_API_HASH");
    println!("2. Add a sending account: followup_bot account add --phone +123456789");
    println!("3. Import the plan: followup_bot campaign import --account <id> campaign.example.json");
    println!("4. Add contacts: followup_bot contact add --account <id> --identifier @user --campaign <id>");
    println!("5. Run: followup_bot run");

    Ok(())
}

/// Runs the scheduler and reply watcher until Ctrl+C.
async fn run_worker(
    store: &Store,
    tg_config: TelegramConfig,
    settings: &WorkerSettings,
) -> Result<()> {
    let (incoming_tx, incoming_rx) = mpsc::channel(settings.reply_queue_capacity);
    let registry = Arc::new(ConnectionRegistry::new(
        Arc::new(GrammersConnector::new(tg_config)),
        settings.min_send_interval(),
        incoming_tx,
    ));

    let watcher = ReplyWatcher::new(store.clone());
    let mut watcher_handle = tokio::spawn(async move {
        watcher.run(incoming_rx).await;
    });

    let scheduler = CampaignScheduler::new(
        DeliveryLoop::new(store.clone(), Arc::clone(&registry)),
        settings.tick_interval(),
    );

    // Create scheduler channel
    let (scheduler_tx, scheduler_rx) = mpsc::channel::<SchedulerMessage>(32);

    let accounts = store.active_accounts().await?;
    info!(
        "Starting follow-up bot with {} active account(s)...",
        accounts.len()
    );
    if accounts.is_empty() {
        warn!("No active accounts; add one with 'account add'");
    }

    // Spawn scheduler task
    let mut scheduler_handle = tokio::spawn(async move {
        scheduler.run(scheduler_rx).await;
    });

    info!("Bot is running. Use Ctrl+C to stop.");

    // Wait for Ctrl+C, or notice a scheduler that died on its own.
    let finished = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            None
        }
        result = &mut scheduler_handle => Some(result),
    };

    let scheduler_result = if let Some(result) = finished {
        error!("Scheduler stopped unexpectedly, shutting down...");
        result
    } else {
        info!("Received Ctrl+C, shutting down...");
        // The current tick finishes before the scheduler exits.
        if scheduler_tx.send(SchedulerMessage::Shutdown).await.is_err() {
            debug!("Scheduler already stopped");
        }
        scheduler_handle.await
    };
    if let Err(e) = scheduler_result {
        error!("Scheduler task failed: {}", e);
    }

    // Disconnecting drops every reply sender; the watcher then records what
    // is still queued and exits.
    registry.shutdown().await;
    drop(registry);
    match tokio::time::timeout(REPLY_DRAIN_TIMEOUT, &mut watcher_handle).await {
        Ok(Ok(())) => debug!("Reply watcher drained"),
        Ok(Err(e)) => error!("Reply watcher task failed: {}", e),
        Err(_) => {
            warn!("Reply watcher did not drain in time, stopping it");
            watcher_handle.abort();
        }
    }

    Ok(())
}

/// Executes a non-interactive command and prints its result.
async fn run_command(
    store: &Store,
    tg_config: TelegramConfig,
    settings: &WorkerSettings,
    command: Command,
) -> ExitCode {
    // Replies are not tracked outside the worker.
    let (incoming_tx, _incoming_rx) = mpsc::channel(1);
    let registry = Arc::new(ConnectionRegistry::new(
        Arc::new(GrammersConnector::new(tg_config)),
        settings.min_send_interval(),
        incoming_tx,
    ));

    let handler = CommandHandler::new(store.clone(), Arc::clone(&registry));
    let result = handler.execute(command).await;
    registry.shutdown().await;

    if result.success {
        println!("{}", result.message);
        ExitCode::SUCCESS
    } else {
        eprintln!("{}", result.message);
        ExitCode::FAILURE
    }
}

/// Signs an account in and activates it.
async fn onboard(store: &Store, config: &TelegramConfig, account: &SourceAccount) -> Result<()> {
    let session_path = config.session_path_for(&account.id);
    let bot = TelegramBot::connect(config, &session_path)
        .await
        .context("Failed to connect to Telegram")?;

    let outcome = match bot.is_authorized().await {
        Ok(true) => Ok(()),
        Ok(false) => authenticate(&bot, config, &account.phone).await,
        Err(e) => Err(e).context("Failed to check authorization"),
    };
    bot.disconnect();

    match outcome {
        Ok(()) => {
            let account = store
                .activate_account(&account.id, &session_path.to_string_lossy())
                .await
                .context("Failed to activate account")?;
            println!("✓ Account {} ({}) is active", account.id, account.label());
            Ok(())
        }
        Err(e) => {
            store
                .set_account_status(&account.id, AccountStatus::Error)
                .await
                .context("Failed to record sign-in failure")?;
            Err(e)
        }
    }
}

/// Handles Telegram authentication.
async fn authenticate(bot: &TelegramBot, config: &TelegramConfig, phone: &str) -> Result<()> {
    info!("Authentication required for {}", mask_phone(phone));

    let token = bot
        .request_login_code(phone, &config.api_hash)
        .await
        .context("Failed to request login code")?;

    info!("Login code sent to your Telegram app");

    let code: String = Input::new()
        .with_prompt("Enter the login code")
        .interact_text()?;

    match bot.sign_in(&token, &code).await {
        Ok(()) => {
            info!("Successfully signed in!");
            Ok(())
        }
        Err(ChannelError::PasswordRequired(password_token)) => {
            info!("Two-factor authentication is enabled");

            let hint = password_token.hint().unwrap_or("no hint");
            info!("Password hint: {}", hint);

            let password: String = Password::new()
                .with_prompt("Enter your 2FA password")
                .interact()?;

            bot.check_password(password_token, &password)
                .await
                .context("2FA authentication failed")?;

            info!("Successfully signed in with 2FA!");
            Ok(())
        }
        Err(e) => Err(e).context("Authentication failed"),
    }
}
