//! CLI command implementations

use crate::client::RelayClient;
use crate::output::{print_json, snapshot_table, styled_percent};
use crate::progress::StatusProgress;
use crate::{server, OutputFormat, UserAction};
use anyhow::{bail, Result};
use console::style;
use dlrelay_core::{credential_db_path, DlrelayCore, SqliteCredentialStore};
use dlrelay_types::{HttpAuth, Settings, SourceKind, SubmitResponse};
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Server
// ============================================================================

pub async fn serve(data_dir: &Path, settings: Settings) -> Result<()> {
    let core = DlrelayCore::from_settings(data_dir, &settings).await?;
    println!(
        "{} Relaying to {} on http://{}",
        style("▶").green().bold(),
        style(&settings.engine_rpc_url).cyan(),
        settings.listen_addr
    );
    server::serve(core, settings.listen_addr).await
}

// ============================================================================
// User Commands
// ============================================================================

pub async fn user_action(
    data_dir: &Path,
    settings: &Settings,
    action: UserAction,
    format: OutputFormat,
) -> Result<()> {
    let store = SqliteCredentialStore::open(credential_db_path(data_dir, settings)).await?;

    match action {
        UserAction::Add { username, password } => {
            let password = match password {
                Some(password) => password,
                None => dialoguer::Password::new()
                    .with_prompt(format!("Password for {}", username))
                    .with_confirmation("Confirm password", "Passwords do not match")
                    .interact()?,
            };
            store.upsert_user(&username, &password).await?;
            println!("{} Saved user {}", style("✓").green().bold(), style(&username).cyan());
        }

        UserAction::Remove { username } => {
            if store.remove_user(&username).await? {
                println!("{} Removed user {}", style("✓").green().bold(), username);
            } else {
                bail!("no such user: {}", username);
            }
        }

        UserAction::List => {
            let users = store.list_users().await?;
            match format {
                OutputFormat::Json => print_json(&users)?,
                OutputFormat::Human | OutputFormat::Table => {
                    if users.is_empty() {
                        println!("{}", style("No users configured").dim());
                    }
                    for user in &users {
                        println!("  {}", user);
                    }
                }
            }
        }
    }

    Ok(())
}

// ============================================================================
// Download Commands
// ============================================================================

pub async fn add_download(
    client: &RelayClient,
    owner: &str,
    uri: &str,
    kind: SourceKind,
    auth: Option<HttpAuth>,
    format: OutputFormat,
) -> Result<()> {
    let reply = client.submit(owner, uri, kind, auth.as_ref()).await?;

    if let OutputFormat::Json = format {
        return print_json(&reply);
    }
    match reply {
        SubmitResponse::Ok { gid } => {
            println!(
                "{} Added {} download for {}",
                style("✓").green().bold(),
                kind,
                style(owner).cyan()
            );
            println!("  GID: {}", gid);
            Ok(())
        }
        SubmitResponse::Error { message } => bail!("{}", message),
    }
}

pub async fn show_status(client: &RelayClient, owner: &str, format: OutputFormat) -> Result<()> {
    let snapshot = client.status(owner).await?;

    match format {
        OutputFormat::Json => print_json(&snapshot)?,
        OutputFormat::Table => println!("{}", snapshot_table(&snapshot)),
        OutputFormat::Human => {
            if snapshot.is_empty() {
                println!("{}", style("No downloads found").dim());
                return Ok(());
            }
            for entry in &snapshot.entries {
                println!("  {:>8}  {}", styled_percent(entry.percent), entry.label);
            }
            println!();
            println!("{} download(s) total", style(snapshot.len()).bold());
        }
    }

    Ok(())
}

/// Poll the server until every download is complete or Ctrl-C
pub async fn watch_status(client: &RelayClient, owner: &str, interval: Duration) -> Result<()> {
    let mut progress = StatusProgress::new();

    loop {
        let snapshot = client.status(owner).await?;
        if progress.update(&snapshot) && !snapshot.is_empty() {
            println!("{} All downloads complete", style("✓").green().bold());
            return Ok(());
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                progress.clear();
                return Ok(());
            }
        }
    }
}
