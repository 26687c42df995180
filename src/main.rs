// src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tubetape::logging;
use tubetape::prelude::*;

#[derive(Debug, Parser)]
#[command(name = "tubetape", version, about = "Download media links as audio files")]
struct Cli {
    /// Configuration file; defaults apply when it does not exist.
    #[arg(long, default_value = "tubetape.toml")]
    config: PathBuf,

    /// Overrides `log_level` from the configuration file.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download a link into the current folder and wait for the result.
    Download { url: String },
    /// List the audio files in the current folder.
    List,
    /// Delete a file from the current folder.
    Delete { path: PathBuf },
    /// Show or change the download folder.
    Folder {
        #[command(subcommand)]
        action: FolderCommand,
    },
    /// Print the drag-and-drop request for a file.
    Drag { path: PathBuf },
    /// Print progress notifications until interrupted.
    Watch,
}

#[derive(Debug, Subcommand)]
enum FolderCommand {
    Show,
    Set { path: PathBuf },
    Reset,
}

/// Stands in for the folder dialog: the folder was given on the command line.
struct GivenFolder(PathBuf);

impl FolderPicker for GivenFolder {
    fn pick_folder(&self, _current: &Path) -> Option<PathBuf> {
        Some(self.0.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(&cli.config)?;
    let level = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    logging::init_logging(&level)?;

    let (app, notifications) = App::from_config(config).await.context("failed to start")?;

    match cli.command {
        Command::Download { url } => download(&app, notifications, &url).await,
        Command::List => list(&app).await,
        Command::Delete { path } => {
            app.delete_file(&path).await?;
            println!("Deleted {}", path.display());
            Ok(())
        }
        Command::Folder { action } => folder(&app, action).await,
        Command::Drag { path } => {
            let drag = app.drag_file(&path)?;
            println!("file: {}", drag.file.display());
            println!("icon: {}", drag.icon.display());
            Ok(())
        }
        Command::Watch => watch(&app, notifications).await,
    }
}

fn print_notification(note: &Notification) {
    println!("[{}] {}", note.kind.as_str(), note.message);
}

async fn download(
    app: &App,
    mut notifications: UnboundedReceiver<Notification>,
    url: &str,
) -> Result<()> {
    let shutdown = CancellationToken::new();
    let progress = app.start_progress(shutdown.clone());

    let result = await_download(app, &mut notifications, url).await;

    shutdown.cancel();
    if let Err(e) = progress.await {
        tracing::warn!(error = %e, "progress task ended abnormally");
    }
    result
}

async fn await_download(
    app: &App,
    notifications: &mut UnboundedReceiver<Notification>,
    url: &str,
) -> Result<()> {
    let mut outcome = app.download_audio(url).await?;
    loop {
        tokio::select! {
            Some(note) = notifications.recv() => print_notification(&note),
            done = &mut outcome => {
                // Terminal notifications are queued before the outcome resolves.
                while let Ok(note) = notifications.try_recv() {
                    print_notification(&note);
                }
                return match done.context("download task went away")? {
                    JobOutcome::Succeeded(path) => {
                        println!("Saved to {}", path.display());
                        Ok(())
                    }
                    JobOutcome::Failed(message) => bail!(message),
                };
            }
            _ = tokio::signal::ctrl_c() => bail!("interrupted"),
        }
    }
}

async fn list(app: &App) -> Result<()> {
    let dir = app.current_folder().await?;
    let files = app.refresh().await?;
    println!("{}", display_folder(&dir));
    if files.is_empty() {
        println!("(no files)");
        return Ok(());
    }

    for file in files {
        let meta = file.metadata.clone().unwrap_or_default();
        println!(
            "{:<40} {:>6} {:>4} {:>6} {}",
            file.display_name,
            format_duration(meta.duration_seconds),
            meta.key.as_deref().unwrap_or(""),
            meta.bpm.map(|b| format!("{b:.0}")).unwrap_or_default(),
            file.path.display()
        );
    }
    Ok(())
}

async fn folder(app: &App, action: FolderCommand) -> Result<()> {
    let dir = match action {
        FolderCommand::Show => app.current_folder().await?,
        FolderCommand::Set { path } => app
            .select_folder(&GivenFolder(path))
            .await?
            .context("no folder selected")?,
        FolderCommand::Reset => app.reset_folder().await?,
    };
    println!("{}", display_folder(&dir));
    Ok(())
}

async fn watch(app: &App, mut notifications: UnboundedReceiver<Notification>) -> Result<()> {
    let shutdown = CancellationToken::new();
    let progress = app.start_progress(shutdown.clone());

    loop {
        tokio::select! {
            Some(note) = notifications.recv() => print_notification(&note),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    shutdown.cancel();
    progress.await.context("progress task ended abnormally")?;
    Ok(())
}
