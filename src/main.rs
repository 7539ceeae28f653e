use anyhow::{anyhow, Result};
use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use workout_clipper::{
    Config, Job, MovementVocabulary, Pipeline, ProgressBus, RenderSettings,
};

fn cli() -> Command {
    Command::new("Workout Clipper")
        .version(env!("CARGO_PKG_VERSION"))
        .author("TigreRoll")
        .about("Finds spoken exercise names in workout videos and cuts a GIF for each")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file (TOML)")
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("process")
                .about("Process one video and print the detected movements as JSON")
                .arg(
                    Arg::new("video")
                        .value_name("VIDEO")
                        .help("Workout video to process")
                        .required(true),
                )
                .arg(
                    Arg::new("movements")
                        .short('m')
                        .long("movements")
                        .value_name("LIST")
                        .help("Comma-separated movements, in priority order"),
                )
                .arg(
                    Arg::new("threshold")
                        .short('t')
                        .long("threshold")
                        .value_name("0-100")
                        .help("Similarity threshold")
                        .value_parser(clap::value_parser!(u8).range(0..=100)),
                )
                .arg(
                    Arg::new("fps")
                        .long("fps")
                        .value_name("NUM")
                        .help("GIF frame rate")
                        .value_parser(clap::value_parser!(u32).range(1..)),
                )
                .arg(
                    Arg::new("speed")
                        .long("speed")
                        .value_name("FACTOR")
                        .help("GIF speed multiplier")
                        .value_parser(clap::value_parser!(f64)),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("FILE")
                        .help("Write the JSON result to a file instead of stdout"),
                ),
        )
        .subcommand(
            Command::new("serve")
                .about("Run the HTTP server")
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .value_name("PORT")
                        .help("Port to listen on")
                        .value_parser(clap::value_parser!(u16)),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let default_filter = if matches.get_flag("verbose") {
        "workout_clipper=debug,info"
    } else {
        "workout_clipper=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = match matches.get_one::<String>("config") {
        Some(path) => Config::from_file(path)?,
        None => Config::load().unwrap_or_else(|e| {
            warn!("Failed to load config, using defaults: {}", e);
            Config::default()
        }),
    };

    match matches.subcommand() {
        Some(("process", sub)) => process_command(config, sub).await,
        Some(("serve", sub)) => serve_command(config, sub).await,
        _ => Err(anyhow!("unknown command")),
    }
}

async fn process_command(mut config: Config, matches: &ArgMatches) -> Result<()> {
    if let Some(movements) = matches.get_one::<String>("movements") {
        config.detection.movements = movements.split(',').map(|m| m.trim().to_string()).collect();
        config.detection.movements_file = None;
    }
    if let Some(threshold) = matches.get_one::<u8>("threshold") {
        config.detection.similarity_threshold = *threshold;
    }
    if let Some(fps) = matches.get_one::<u32>("fps") {
        config.render.fps = *fps;
    }
    if let Some(speed) = matches.get_one::<f64>("speed") {
        config.render.speed_multiplier = *speed;
    }
    config.validate()?;

    let video_path = matches
        .get_one::<String>("video")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("missing video argument"))?;
    if !video_path.exists() {
        error!("Video file not found: {}", video_path.display());
        return Err(anyhow!("Video file not found: {}", video_path.display()));
    }

    let vocabulary: MovementVocabulary = config.vocabulary().await?;
    info!("🚀 Workout Clipper starting...");
    info!("{}", config.summary());

    let bus = ProgressBus::new();
    let pipeline = Pipeline::from_config(&config, &vocabulary, bus.clone());
    let job = Job::new(&video_path);

    let mut progress = bus.consume(&job.id);
    let reporter = tokio::spawn(async move {
        while let Some(event) = progress.next().await {
            info!("📊 {}: {:.0}%", event.stage, event.progress);
        }
    });

    let start_time = std::time::Instant::now();
    let result = pipeline
        .run(
            &job,
            vocabulary.movements(),
            config.detection.similarity_threshold,
            RenderSettings::from(&config.render),
        )
        .await;
    let _ = reporter.await;
    let result = result?;

    info!("🎉 Processing completed in {:.2}s", start_time.elapsed().as_secs_f64());
    info!("🖼️  Clips written to {}", config.output.clips_dir.join(&job.id).display());

    let json = serde_json::to_string_pretty(&result)?;
    match matches.get_one::<String>("output") {
        Some(path) => {
            tokio::fs::write(path, json).await?;
            info!("💾 Result saved to: {}", path);
        }
        None => println!("{}", json),
    }
    Ok(())
}

#[cfg(feature = "api")]
async fn serve_command(mut config: Config, matches: &ArgMatches) -> Result<()> {
    use workout_clipper::api::{ApiServer, AppState};

    if let Some(port) = matches.get_one::<u16>("port") {
        config.server.port = *port;
    }
    config.validate()?;

    let state = AppState::from_config(config).await?;
    ApiServer::new(state).start().await
}

#[cfg(not(feature = "api"))]
async fn serve_command(_config: Config, _matches: &ArgMatches) -> Result<()> {
    Err(anyhow!("this binary was built without the `api` feature"))
}
