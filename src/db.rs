use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Pool;
use sqlx::Row;
use sqlx::Sqlite;
use sqlx::migrate::Migrator;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::instrument;
use tracing::warn;

use crate::cache::Keyed;
use crate::cache::Snapshot;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite file holding the last snapshot of the pending-registration store.
#[derive(Clone)]
pub struct Db {
  pool: Pool<Sqlite>,
}

impl Db {
  pub async fn connect(database_url: &str) -> Result<Self> {
    let options = SqliteConnectOptions::from_str(database_url)
      .with_context(|| format!("invalid cache database url {database_url}"))?
      .create_if_missing(true);
    if let Some(parent) = options.get_filename().parent().filter(|dir| !dir.as_os_str().is_empty()) {
      tokio::fs::create_dir_all(parent)
        .await
        .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;
    MIGRATOR.run(&pool).await?;
    Ok(Self { pool })
  }

  /// Moves an unreadable database file (and its WAL sidecars) aside as
  /// `<file>.corrupt-<timestamp>`, then opens a fresh one at the same place.
  #[instrument]
  pub async fn recreate(database_url: &str) -> Result<Self> {
    let options = SqliteConnectOptions::from_str(database_url)
      .with_context(|| format!("invalid cache database url {database_url}"))?;
    let path = options.get_filename().to_path_buf();
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
      let suffix = format!(".corrupt-{}", Utc::now().format("%Y%m%d%H%M%S"));
      for sidecar in ["", "-wal", "-shm"] {
        let from = with_suffix(&path, sidecar);
        if !tokio::fs::try_exists(&from).await.unwrap_or(false) {
          continue;
        }
        let to = with_suffix(&from, &suffix);
        tokio::fs::rename(&from, &to)
          .await
          .with_context(|| format!("failed to move {} aside", from.display()))?;
        warn!(from = %from.display(), to = %to.display(), "moved unreadable cache database aside");
      }
    }
    Self::connect(database_url).await
  }

  pub async fn close(&self) {
    self.pool.close().await;
  }

  #[instrument(skip(self))]
  pub async fn load_snapshot<R: DeserializeOwned>(&self) -> Result<Snapshot<R>> {
    let mut snapshot = Snapshot::default();

    let rows = sqlx::query("SELECT id, payload FROM registrations ORDER BY id")
      .fetch_all(&self.pool)
      .await?;
    for row in rows {
      let id: String = row.try_get("id")?;
      let payload: String = row.try_get("payload")?;
      match serde_json::from_str(&payload) {
        Ok(record) => snapshot.records.push(record),
        Err(err) => warn!(registration_id = %id, error = %err, "skipping undecodable cached registration"),
      }
    }

    let rows = sqlx::query(
      r#"
      SELECT chat_id, registration_id
      FROM pending_registrations
      ORDER BY chat_id, position
      "#,
    )
    .fetch_all(&self.pool)
    .await?;
    for row in rows {
      let chat_id: i64 = row.try_get("chat_id")?;
      let id: String = row.try_get("registration_id")?;
      snapshot.pending.entry(chat_id).or_default().push(id);
    }

    Ok(snapshot)
  }

  /// Replaces the stored snapshot in one transaction.
  #[instrument(skip(self, snapshot))]
  pub async fn save_snapshot<R: Serialize + Keyed>(&self, snapshot: &Snapshot<R>) -> Result<()> {
    let mut tx = self.pool.begin().await?;
    sqlx::query("DELETE FROM pending_registrations").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM registrations").execute(&mut *tx).await?;

    for record in &snapshot.records {
      let payload = serde_json::to_string(record).context("failed to encode cached registration")?;
      sqlx::query("INSERT INTO registrations (id, payload) VALUES (?, ?)")
        .bind(record.key())
        .bind(payload)
        .execute(&mut *tx)
        .await?;
    }

    for (chat_id, ids) in &snapshot.pending {
      for (position, id) in ids.iter().enumerate() {
        sqlx::query(
          r#"
          INSERT INTO pending_registrations (chat_id, position, registration_id)
          VALUES (?, ?, ?)
          "#,
        )
        .bind(*chat_id)
        .bind(position as i64)
        .bind(id)
        .execute(&mut *tx)
        .await?;
      }
    }

    tx.commit().await?;
    Ok(())
  }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
  let mut name = path.as_os_str().to_owned();
  name.push(suffix);
  PathBuf::from(name)
}
