use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Instant;
use teloxide::prelude::*;
use teloxide::update_listeners::Polling;

use reelbot::cli::{Cli, Commands};
use reelbot::telegram::{create_bots, load_token, schema, setup_bot_commands, HandlerDeps, TeloxideTransport};
use reelcore::core::process::is_runnable;
use reelcore::download::catalog::CatalogPolicy;
use reelcore::download::{FfmpegTranscoder, FormatCatalog, HttpTransfer, YtDlpLookup};
use reelcore::{init_logger, Orchestrator, PipelineParts, Settings};

/// Main entry point for the Telegram bot
///
/// Parses CLI arguments and dispatches to appropriate subcommand.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("Panic caught: {:?}", panic_info);
        if let Some(location) = panic_info.location() {
            log::error!("Panic at {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));

    // .env may carry RUST_LOG and the token, so it goes first
    let _ = dotenvy::dotenv();

    let settings = Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logger(&settings.log)?;

    match cli.command {
        Some(Commands::Run) => run_bot(settings).await,
        Some(Commands::Formats { url }) => run_formats(&settings, &url).await,
        Some(Commands::Check) => run_check(&settings).await,
        None => {
            log::info!("No command specified, running bot in default mode");
            run_bot(settings).await
        }
    }
}

async fn run_bot(settings: Settings) -> Result<()> {
    let started = Instant::now();
    log::info!("Starting bot...");

    warn_missing_tools(&settings).await;

    let token = load_token()?;
    let bots = create_bots(&token, &settings.transport)?;

    let me = bots.regular.get_me().await.context("Failed to connect to Bot API")?;
    log::info!("Bot username: {:?}, Bot ID: {}", me.username, me.id);

    if let Err(e) = setup_bot_commands(&bots.regular).await {
        log::warn!("Failed to set bot commands: {}", e);
    }

    let orchestrator = Orchestrator::new(
        &settings,
        PipelineParts {
            transport: Arc::new(TeloxideTransport::new(bots.regular.clone(), bots.upload)),
            lookup: Arc::new(YtDlpLookup::from_settings(&settings.catalog)),
            transfer: Arc::new(HttpTransfer::new()?),
            transcoder: Arc::new(FfmpegTranscoder::new(settings.transcode.clone())),
        },
    );
    let handler = schema(HandlerDeps::new(orchestrator));

    let bot = bots.regular;
    let listener = Polling::builder(bot.clone()).drop_pending_updates().build();

    log::info!("🎉 Bot initialization complete in {:.2}s", started.elapsed().as_secs_f64());
    log::info!("📡 Ready to receive updates (workers: {})", settings.pipeline.worker_limit);

    Dispatcher::builder(bot, handler)
        .enable_ctrlc_handler()
        .build()
        .dispatch_with_listener(
            listener,
            LoggingErrorHandler::with_custom_text("An error from the update listener"),
        )
        .await;

    log::info!("Dispatcher shutdown gracefully");
    Ok(())
}

/// Prints the format list for a URL without touching Telegram.
async fn run_formats(settings: &Settings, url: &str) -> Result<()> {
    let catalog = FormatCatalog::new(
        Arc::new(YtDlpLookup::from_settings(&settings.catalog)),
        CatalogPolicy::from(&settings.catalog),
    );
    let catalog = catalog.resolve(url).await?;

    println!("🎬 {}", catalog.title.as_deref().unwrap_or("(untitled)"));
    for (i, format) in catalog.formats.iter().enumerate() {
        println!("{:>3}. {}  [{}, {}]", i + 1, format.button_text(), format.format_id, format.kind);
    }
    if let Some(audio) = &catalog.preferred_audio {
        println!("Audio for video-only formats: {} [{}]", audio.label(), audio.format_id);
    }
    Ok(())
}

async fn run_check(settings: &Settings) -> Result<()> {
    println!("{:#?}", settings);

    let mut missing = Vec::new();
    for (program, flag) in tools(settings) {
        let ok = is_runnable(program, flag).await;
        println!("{} {}", if ok { "✅" } else { "❌" }, program);
        if !ok {
            missing.push(program);
        }
    }

    if !missing.is_empty() {
        bail!("Not runnable: {}", missing.join(", "));
    }
    Ok(())
}

async fn warn_missing_tools(settings: &Settings) {
    for (program, flag) in tools(settings) {
        if !is_runnable(program, flag).await {
            log::warn!("{} is not runnable; requests needing it will fail", program);
        }
    }
}

fn tools(settings: &Settings) -> [(&str, &str); 3] {
    [
        (settings.catalog.ytdlp_bin.as_str(), "--version"),
        (settings.transcode.ffmpeg_bin.as_str(), "-version"),
        (settings.transcode.ffprobe_bin.as_str(), "-version"),
    ]
}
