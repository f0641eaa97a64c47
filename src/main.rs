use anyhow::Result;
use clap::Parser;
use console::style;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clipnote::cli::{Cli, Commands, OutputFormat};
use clipnote::config::{Config, EngineKind};
use clipnote::note;
use clipnote::pipeline::{NotePipeline, SummaryResult};
use clipnote::resolver::{ParseResult, ParsedVideo, Resolver, StreamMedia, StreamRequest};
use clipnote::utils;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "clipnote=debug"
    } else {
        "clipnote=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::load().await?;

    match cli.command {
        Commands::Resolve {
            url,
            quality,
            format,
            output,
        } => {
            if let Some(quality) = quality {
                config.app.quality = quality;
            }
            if let Some(format) = format {
                config.app.format = format;
            }
            config.validate()?;

            let request = StreamRequest::for_format(config.app.quality, &config.app.format);
            let resolver = Resolver::new(config.bilibili.clone())?;
            let result = resolver.resolve(&url, &request).await;

            match output {
                OutputFormat::Json => println!("{}", result.to_json()?),
                OutputFormat::Pretty => print_parse_result(&result),
            }
            if !result.is_success() {
                std::process::exit(1);
            }
        }

        Commands::Summarize {
            url,
            output_dir,
            engine,
            keep_media,
            json,
        } => {
            if let Some(engine) = engine {
                config.app.engine = engine;
            }
            if keep_media {
                config.app.keep_media = true;
            }
            if let Some(dir) = output_dir {
                config.app.output_dir = Some(dir);
            }
            config.validate()?;

            if config.app.engine == EngineKind::Local {
                let missing = utils::check_dependencies(&config.whisper.binary).await;
                if !missing.is_empty() {
                    eprintln!("⚠️  Dependency check warnings:");
                    for dep in missing {
                        eprintln!("   • {}", dep);
                    }
                    eprintln!("   (Continuing anyway - tools may be available)");
                }
            }

            let pipeline = NotePipeline::new(config.clone(), cli.quiet)?;
            let result = pipeline.run(&url).await;

            if json {
                println!("{}", result.to_json()?);
                if !result.is_success() {
                    std::process::exit(1);
                }
            } else {
                match result {
                    SummaryResult::Success(note) => {
                        let path = note::write_note(
                            &note.title,
                            note.best_markdown(),
                            config.app.output_dir.as_deref(),
                        )?;
                        println!("Note saved to: {}", path.display());
                    }
                    SummaryResult::Failure(err) => anyhow::bail!(err),
                }
            }
        }

        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                let path = Config::config_path()?;
                if path.exists() {
                    println!("Configuration file: {}", path.display());
                } else {
                    config.save().await?;
                    println!("Wrote default configuration to {}", path.display());
                }
                println!("Edit it to set credentials, then check with: clipnote config --show");
            }
        }

        Commands::Doctor => {
            let missing = utils::check_dependencies(&config.whisper.binary).await;
            if missing.is_empty() {
                println!(
                    "{} All local transcription tools are available",
                    style("✓").green()
                );
            } else {
                println!("{} Missing tools:", style("✗").red());
                for dep in &missing {
                    println!("   • {}", dep);
                }
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn print_parse_result(result: &ParseResult) {
    match result {
        ParseResult::Success(video) => print_video(video),
        ParseResult::Failure(err) => {
            eprintln!(
                "{} {} stage failed ({}): {}",
                style("✗").red(),
                err.stage,
                err.code,
                err.message
            );
        }
    }
}

fn print_video(video: &ParsedVideo) {
    println!("{} {}", style("Title:").bold(), video.title);
    println!("{} {} (av{})", style("Video:").bold(), video.bvid, video.aid);
    println!(
        "{} {} ({})",
        style("Part:").bold(),
        video.part,
        utils::format_duration(video.duration_secs)
    );
    println!();
    println!("{}", style("Streams:").bold());
    for option in &video.streams {
        let detail = match &option.media {
            StreamMedia::Dash { video, audio } => {
                let mut tracks = Vec::new();
                if let Some(track) = video {
                    tracks.push(format!(
                        "video {}x{} {}",
                        track.width, track.height, track.codec
                    ));
                }
                if let Some(track) = audio {
                    tracks.push(format!("audio {}", track.codec));
                }
                format!("dash: {}", tracks.join(" + "))
            }
            StreamMedia::Flv { .. } => "flv".to_string(),
            StreamMedia::Mp4 { .. } => "mp4".to_string(),
        };
        println!(
            "  [{}] {} - {}",
            option.quality_rank, option.quality_label, detail
        );
    }
}
