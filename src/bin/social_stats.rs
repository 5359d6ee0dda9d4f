use std::collections::BTreeMap;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use social_stats::{build_orchestrator, AccountHandles, Config, PlatformKind, PlatformStats};

#[derive(Parser)]
#[command(name = "social-stats", about = "Scrape follower counts from public profiles")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch every given handle concurrently and print the results as JSON
    Fetch {
        #[arg(long)]
        instagram: Option<String>,
        #[arg(long)]
        youtube: Option<String>,
        #[arg(long)]
        tiktok: Option<String>,
        #[arg(long = "naver-blog")]
        naver_blog: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the JSON result
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("invalid configuration")?;

    match cli.command {
        Command::Fetch {
            instagram,
            youtube,
            tiktok,
            naver_blog,
        } => {
            let accounts: AccountHandles = [
                (PlatformKind::Instagram, instagram),
                (PlatformKind::Youtube, youtube),
                (PlatformKind::Tiktok, tiktok),
                (PlatformKind::NaverBlog, naver_blog),
            ]
            .into_iter()
            .filter_map(|(platform, handle)| handle.map(|handle| (platform, handle)))
            .collect();
            if accounts.is_empty() {
                anyhow::bail!("pass at least one of --instagram, --youtube, --tiktok, --naver-blog");
            }

            let orchestrator = build_orchestrator(&config).context("failed to build transport")?;
            let results = orchestrator.fetch_all(&accounts).await;

            let stats: BTreeMap<PlatformKind, PlatformStats> = results
                .into_iter()
                .map(|(platform, outcome)| {
                    let handle = accounts.get(&platform).map(String::as_str).unwrap_or_default();
                    let username = social_stats::extract::normalize_handle(platform, handle);
                    (platform, outcome.into_stats(platform, &username))
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
