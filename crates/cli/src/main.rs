// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `dredge` — admin CLI for the crawling control plane.
//!
//! Thin by design: each command is one envelope over the bus. Replies
//! arrive on the regular statusUpdate / jobList channels.

mod client;

use anyhow::Result;
use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use client::AdminClient;
use dredge_core::AccountId;
use dredge_wire::{Destination, Payload, StartDiscovery};
use std::path::PathBuf;
use std::time::Duration;

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "dredge", about = "Admin CLI for the dredge crawling control plane")]
struct Cli {
    /// Backend socket path (defaults to $SOCKET_PATH, then the data root)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the crawler's current state
    Status,
    /// List jobs and their statuses
    Jobs,
    /// Pause the crawler (the in-flight page completes first)
    Pause,
    /// Resume a paused crawler
    Resume,
    /// Ask the crawler to park its work and go idle
    Shutdown,
    /// Queue discovery for stored authorizations
    Crawl {
        /// Restrict to one account id
        #[arg(long)]
        account: Option<String>,
    },
}

fn socket_path(cli: &Cli) -> PathBuf {
    if let Some(path) = &cli.socket {
        return path.clone();
    }
    if let Ok(path) = std::env::var("SOCKET_PATH") {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    if let Ok(root) = std::env::var("DATA_ROOT") {
        if !root.is_empty() {
            return PathBuf::from(root).join("config/api.sock");
        }
    }
    PathBuf::from("data/config/api.sock")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let socket = socket_path(&cli);
    let mut client = AdminClient::connect(&socket).await?;

    match cli.command {
        Command::Status => {
            client.send(Destination::backend(), Payload::GetStatus).await?;
            let payload = client
                .wait_for(REPLY_TIMEOUT, |p| matches!(p, Payload::StatusUpdate(_)))
                .await?;
            if let Payload::StatusUpdate(status) = payload {
                println!("state:          {}", status.state);
                println!(
                    "current job:    {}",
                    status.current_job_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into())
                );
                println!("queued:         {}", status.queue_size);
                println!("last heartbeat: {}", format_ms(status.last_heartbeat));
            }
        }
        Command::Jobs => {
            client.send(Destination::backend(), Payload::GetJobs).await?;
            let payload =
                client.wait_for(REPLY_TIMEOUT, |p| matches!(p, Payload::JobList(_))).await?;
            if let Payload::JobList(list) = payload {
                if list.jobs.is_empty() {
                    println!("no jobs");
                    return Ok(());
                }
                println!(
                    "{:<24} {:<26} {:<9} {:<30} {}",
                    "ID", "COMMAND", "STATUS", "PATH", "UPDATED"
                );
                for job in list.jobs {
                    println!(
                        "{:<24} {:<26} {:<9} {:<30} {}",
                        job.id,
                        job.command.to_string(),
                        job.status.to_string(),
                        job.full_path.unwrap_or_else(|| "-".into()),
                        format_ms(job.updated_at_ms),
                    );
                    if let Some(error) = job.error {
                        println!("    error: {error}");
                    }
                }
            }
        }
        Command::Pause => {
            client.send(Destination::crawler(), Payload::PauseCrawler).await?;
            println!("pause requested");
        }
        Command::Resume => {
            client.send(Destination::crawler(), Payload::ResumeCrawler).await?;
            println!("resume requested");
        }
        Command::Shutdown => {
            client.send(Destination::crawler(), Payload::Shutdown).await?;
            println!("shutdown requested");
        }
        Command::Crawl { account } => {
            client
                .send(
                    Destination::backend(),
                    Payload::StartDiscovery(StartDiscovery {
                        account_id: account.map(AccountId::new),
                    }),
                )
                .await?;
            println!("discovery queued");
        }
    }
    Ok(())
}

fn format_ms(ms: u64) -> String {
    if ms == 0 {
        return "-".to_string();
    }
    match Local.timestamp_millis_opt(ms as i64) {
        chrono::LocalResult::Single(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        _ => ms.to_string(),
    }
}
