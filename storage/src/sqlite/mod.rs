#[cfg(test)]
#[path = "sqlite_test.rs"]
mod tests;

pub(crate) mod migration;

use async_trait::async_trait;
use eyre::{Context, Result};
use tokio_rusqlite::{Connection, params};

use crate::StateStore;

pub struct Sqlite {
    conn: Connection,
}

impl Sqlite {
    pub async fn new(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(path) => Connection::open(path)
                .await
                .wrap_err(format!("opening database path: {}", path))?,
            None => Connection::open_in_memory()
                .await
                .wrap_err("opening in-memory database")?,
        };

        Ok(Self { conn })
    }

    pub async fn run_migration(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                Ok::<_, tokio_rusqlite::rusqlite::Error>(conn.execute_batch(migration::MIGRATION)?)
            })
            .await
            .wrap_err("executing migration")?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for Sqlite {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        let value = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare("SELECT value FROM app_state WHERE key = ?")?;
                let mut rows = stmt.query(params![key])?;
                let value = match rows.next()? {
                    Some(row) => Some(row.get::<_, String>(0)?),
                    None => None,
                };
                Ok::<_, tokio_rusqlite::rusqlite::Error>(value)
            })
            .await
            .wrap_err("reading state")?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        let updated_at = chrono::Utc::now().timestamp_millis();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO app_state (key, value, updated_at) VALUES (?, ?, ?)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                    params![key, value, updated_at],
                )?;
                Ok::<_, tokio_rusqlite::rusqlite::Error>(())
            })
            .await
            .wrap_err("writing state")?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM app_state WHERE key = ?", params![key])?;
                Ok::<_, tokio_rusqlite::rusqlite::Error>(())
            })
            .await
            .wrap_err("removing state")?;
        Ok(())
    }
}
