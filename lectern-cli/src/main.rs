use std::{sync::Arc, time::Duration};

use clap::Parser;
use error::AppError;
use indicatif::MultiProgress;
use lectern_engine::hls::{BatchRange, HlsPipeline, PipelineConfig, ProgressEvent};
use lectern_engine::{
    CookieSessionFetcher, DownloaderConfig, ProxyAuth, ProxyConfig, ProxyType, ReqwestFetcher,
};
use mimalloc::MiMalloc;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::writer::MakeWriterExt;

mod cli;
mod config;
mod error;
mod processor;
mod utils;

use cli::CliArgs;
use utils::progress::ProgressManager;
use utils::{parse_duration, parse_headers};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        // Log the full error for debugging
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    // Parse command-line arguments
    let args = CliArgs::parse();

    // Setup logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open("lectern.log")?;

    let multi_writer = MakeWriterExt::and(std::io::stdout, log_file);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(multi_writer)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Initialization(e.to_string()))?;

    info!("██╗     ███████╗ ██████╗████████╗███████╗██████╗ ███╗   ██╗");
    info!("██║     ██╔════╝██╔════╝╚══██╔══╝██╔════╝██╔══██╗████╗  ██║");
    info!("██║     █████╗  ██║        ██║   █████╗  ██████╔╝██╔██╗ ██║");
    info!("██║     ██╔══╝  ██║        ██║   ██╔══╝  ██╔══██╗██║╚██╗██║");
    info!("███████╗███████╗╚██████╗   ██║   ███████╗██║  ██║██║ ╚████║");
    info!("╚══════╝╚══════╝ ╚═════╝   ╚═╝   ╚══════╝╚═╝  ╚═╝╚═╝  ╚═══╝");
    info!("");
    info!("HLS Lecture Downloader");
    info!("==================================================================");

    // Batch range; a missing bound means "from the first" / "to the last"
    let range = match (args.start, args.end) {
        (None, None) => None,
        (start, end) => Some(BatchRange::new(
            start.unwrap_or(0),
            end.unwrap_or(usize::MAX),
        )?),
    };

    let entries = match &args.units {
        Some(path) => config::load_units(path).await?,
        None => config::units_from_inputs(
            &args.input,
            args.title.as_deref(),
            args.index,
            args.group.as_deref(),
        )?,
    };
    info!(units = entries.len(), "Loaded unit list");

    // Handle proxy configuration
    let proxy_config = if let Some(proxy_url) = args.proxy.as_ref() {
        let proxy_type: ProxyType = args.proxy_type.parse()?;

        // Configure proxy authentication if both username and password are provided
        let auth = if let (Some(username), Some(password)) = (&args.proxy_user, &args.proxy_pass) {
            Some(ProxyAuth {
                username: username.clone(),
                password: password.clone(),
            })
        } else {
            None
        };

        info!(
            proxy_url = %proxy_url,
            proxy_type = ?proxy_type,
            has_auth = auth.is_some(),
            "Using explicit proxy configuration for downloads"
        );

        Some(ProxyConfig {
            url: proxy_url.clone(),
            proxy_type,
            auth,
        })
    } else {
        None
    };

    info!(
        "HTTP timeout configuration: overall={}s, connect={}s, read={}s",
        args.timeout, args.connect_timeout, args.read_timeout
    );

    let default_headers = parse_headers(&args.headers)?;

    // Create common download configuration
    let download_config = {
        let mut builder = DownloaderConfig::builder()
            .with_timeout(Duration::from_secs(args.timeout))
            .with_connect_timeout(Duration::from_secs(args.connect_timeout))
            .with_read_timeout(Duration::from_secs(args.read_timeout));

        if let Some(proxy) = proxy_config {
            builder = builder.with_proxy(proxy);
        } else {
            builder = builder.with_system_proxy(args.use_system_proxy);
        }
        builder.build()
    };

    let fetcher = ReqwestFetcher::from_config(&download_config)?;

    let key_wait = parse_duration(&args.key_wait)?;
    let mut pipeline_config = PipelineConfig::new(&args.output_dir)
        .with_force(args.force)
        .with_keep_encrypted(args.keep_encrypted)
        .with_max_segments(args.max_segments)
        .with_remux(!args.no_remux)
        .with_remux_tool(&args.ffmpeg)
        .with_target_extension(&args.format)
        .with_capture_wait(key_wait, Duration::from_millis(250))
        .with_iv_policy(args.iv_policy);
    if let Some(filter) = &args.playlist_filter {
        pipeline_config = pipeline_config.with_playlist_filter(filter);
    }

    // Create a progress manager based on show_progress flag
    let multi = MultiProgress::new();
    let progress_manager = if args.show_progress {
        ProgressManager::new(multi.clone())
    } else {
        ProgressManager::new_disabled(multi.clone())
    };

    let mut pipeline = HlsPipeline::new(pipeline_config, Arc::new(fetcher.clone()))
        .with_default_headers(default_headers)
        .with_progress(Arc::new(move |event: &ProgressEvent| {
            progress_manager.handle_event(event)
        }));

    if let Some(cookie) = &args.session_cookie {
        info!("Session cookie provided, enabling in-session key fetches");
        let session = CookieSessionFetcher::new(
            fetcher.client().clone(),
            cookie,
            args.session_referer.as_deref(),
        )?;
        pipeline = pipeline.with_session_fetcher(Arc::new(session));
    }

    processor::process_units(&entries, range, &pipeline).await
}
