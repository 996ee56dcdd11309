//! Persisted operation commands.
//!
//! These work on raw rows, so no operation types need to be registered.

use console::style;

use opqueue::config::Settings;
use opqueue::{OperationRegistry, OperationStore, SqliteOperationStore};

use crate::cli::icons::{dim_arrow, success, warn};

fn open_store(settings: &Settings) -> anyhow::Result<SqliteOperationStore> {
    settings.ensure_directories()?;
    let store = SqliteOperationStore::new(&settings.database_path(), OperationRegistry::new())?;
    Ok(store)
}

/// List persisted operations.
pub async fn cmd_list(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let records = store.records()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("{} No persisted operations", style("→").cyan());
        return Ok(());
    }

    println!(
        "{:<6} {:<38} {:<24} {}",
        style("POS").bold(),
        style("ID").bold(),
        style("NAME").bold(),
        style("CREATED").bold()
    );
    for record in &records {
        println!(
            "{:<6} {:<38} {:<24} {}",
            record.position,
            record.id,
            record.name,
            style(&record.created_at).dim()
        );
    }
    println!("\n{} operations", records.len());
    Ok(())
}

/// Print the number of persisted operations.
pub async fn cmd_count(settings: &Settings) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    println!("{}", store.count()?);
    Ok(())
}

/// Remove a single persisted operation.
pub async fn cmd_remove(settings: &Settings, id: &str) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let Some(record) = store.records()?.into_iter().find(|r| r.id == id) else {
        anyhow::bail!("No persisted operation with id '{}'", id);
    };

    store.remove(id)?;
    println!("{} Removed operation {}", success(), style(id).cyan());
    println!("  {} {}", dim_arrow(), record.name);
    Ok(())
}

/// Delete every persisted operation.
pub async fn cmd_purge(settings: &Settings, confirm: bool) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let count = store.count()?;

    if !confirm {
        println!(
            "{} This would delete {} persisted operations from {}",
            warn(),
            count,
            store.database_path().display()
        );
        println!("  Run again with --confirm to proceed.");
        return Ok(());
    }

    let removed = store.clear()?;
    println!("{} Purged {} operations", success(), removed);
    println!("  {} {}", dim_arrow(), store.database_path().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_in(dir: &std::path::Path) -> Settings {
        Settings {
            data_dir: dir.to_path_buf(),
            database_path: None,
            queue: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_remove_unknown_id_fails() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());

        let err = cmd_remove(&settings, "missing").await.unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn test_purge_without_confirm_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());
        open_store(&settings).unwrap();

        cmd_purge(&settings, false).await.unwrap();
        assert!(settings.database_path().exists());
        assert_eq!(open_store(&settings).unwrap().count().unwrap(), 0);
    }
}
