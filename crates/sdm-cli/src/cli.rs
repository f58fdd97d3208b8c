use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sdm_core::config;
use sdm_core::manager::Manager;
use sdm_core::probe;
use sdm_core::queue::QueueConfig;
use sdm_core::task::{DownloadStatus, Task};
use sdm_core::time_window::TimeInterval;

/// Top-level CLI for the sdm download manager.
#[derive(Debug, Parser)]
#[command(name = "sdm")]
#[command(about = "sdm: multi-queue segmented download manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download one or more URLs, waiting until every task settles.
    Get {
        /// Direct HTTP/HTTPS URLs to download.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Target directory (defaults to the current directory).
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Byte-range segments per download.
        #[arg(long)]
        threads: Option<usize>,

        /// Retries per segment (and per probe) before a task fails.
        #[arg(long)]
        retries: Option<u32>,

        /// Aggregate speed limit in bytes per second (0 = unlimited).
        #[arg(long)]
        limit: Option<u64>,

        /// Concurrent downloads in the queue.
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Activation window, e.g. "23:00:00-06:00:00", or "always".
        #[arg(long)]
        window: Option<String>,
    },

    /// Probe a URL with a HEAD request and print download metadata.
    Probe {
        /// Direct HTTP/HTTPS URL to inspect.
        url: String,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Get {
                urls,
                dir,
                threads,
                retries,
                limit,
                max_concurrent,
                window,
            } => {
                let dir = match dir {
                    Some(d) => d,
                    None => std::env::current_dir()?,
                };
                let mut queue_cfg = QueueConfig::with_defaults("cli", &dir, &cfg);
                if let Some(n) = threads {
                    queue_cfg.threads_per_task = n;
                }
                if let Some(n) = retries {
                    queue_cfg.max_retries = n;
                }
                if let Some(bps) = limit {
                    queue_cfg.speed_limit_bps = bps;
                }
                if let Some(n) = max_concurrent {
                    queue_cfg.max_concurrent = n;
                }
                if let Some(spec) = window {
                    queue_cfg.active_interval = TimeInterval::parse(&spec)?;
                }
                run_get(queue_cfg, &urls).await
            }
            CliCommand::Probe { url } => run_probe(url).await,
        }
    }
}

async fn run_get(queue_cfg: QueueConfig, urls: &[String]) -> Result<()> {
    let manager = Manager::new();
    let queue = manager.create_queue(queue_cfg);

    let mut tasks: Vec<Arc<Task>> = Vec::with_capacity(urls.len());
    for url in urls {
        tasks.push(queue.add_task(url, None)?);
    }

    let interrupted = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("interrupted, stopping queue...");
                queue.stop();
                break true;
            }
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }

        let all_terminal = tasks.iter().all(|t| {
            matches!(
                t.status(),
                DownloadStatus::Completed | DownloadStatus::Canceled | DownloadStatus::Failed
            )
        });
        if all_terminal {
            break false;
        }
        // The scheduler exits when the activation window closes; anything
        // it paused will not make further progress, so report and leave.
        let none_active = tasks.iter().all(|t| {
            !matches!(t.status(), DownloadStatus::Pending | DownloadStatus::InProgress)
        });
        if !queue.is_running() && none_active {
            println!("queue stopped before all downloads finished");
            break true;
        }

        print_progress(&tasks);
    };

    println!("{:<12} {:>14} {:>14}  {}", "STATE", "BYTES", "SIZE", "FILE");
    let mut failed = 0usize;
    for task in &tasks {
        let state = format!("{:?}", task.status()).to_lowercase();
        let size = match task.total_size() {
            n if n >= 0 => n.to_string(),
            _ => "-".to_string(),
        };
        let file = task
            .file_name()
            .unwrap_or_else(|| task.url().to_string());
        println!("{:<12} {:>14} {:>14}  {}", state, task.downloaded(), size, file);
        if task.status() == DownloadStatus::Failed {
            failed += 1;
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} download(s) failed");
    }
    if interrupted {
        anyhow::bail!("stopped before completion");
    }
    Ok(())
}

fn print_progress(tasks: &[Arc<Task>]) {
    for task in tasks {
        let total = task.total_size();
        let pct = if total > 0 {
            format!("{:5.1}%", task.downloaded() as f64 * 100.0 / total as f64)
        } else {
            "    ?".to_string()
        };
        println!(
            "{:<12} {} {:>14} bytes  {}",
            format!("{:?}", task.status()).to_lowercase(),
            pct,
            task.downloaded(),
            task.url()
        );
    }
}

async fn run_probe(url: String) -> Result<()> {
    let probed = tokio::task::spawn_blocking(move || probe::probe(&url)).await??;

    println!(
        "size:          {}",
        probed
            .content_length
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    );
    println!("accept-ranges: {}", probed.accept_ranges);
    if let Some(cd) = &probed.content_disposition {
        println!("disposition:   {}", cd);
    }
    if let Some(ct) = &probed.content_type {
        println!("content-type:  {}", ct);
    }
    if let Some(final_url) = &probed.final_url {
        println!("final url:     {}", final_url);
    }
    Ok(())
}
