//! Executable / namespace / file-descriptor metadata store.
//!
//! Backed by a single SQLite connection, matching the original design's
//! single-connection constraint for its embedded driver. `Executable` rows
//! persist across restarts; `FileDescriptor` and `Namespaces` are ephemeral
//! per-run bookkeeping and are recreated empty on each startup.

use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};
use std::path::Path;

pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, sqlx::Error> {
        if let Some(parent) = db_path.as_ref().parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&db_url)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executable (
                path TEXT PRIMARY KEY,
                dev INTEGER NOT NULL,
                inode INTEGER NOT NULL,
                hash TEXT NOT NULL,
                danger INTEGER NOT NULL DEFAULT -1
            );
            CREATE TABLE IF NOT EXISTS file_descriptor (
                fd INTEGER NOT NULL,
                pid INTEGER NOT NULL,
                path TEXT NOT NULL,
                PRIMARY KEY (fd, pid)
            );
            CREATE TABLE IF NOT EXISTS namespaces (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                data TEXT NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await?;

        // FileDescriptor and Namespaces are process-lifetime only.
        sqlx::query("DELETE FROM file_descriptor")
            .execute(&pool)
            .await?;
        sqlx::query("DELETE FROM namespaces").execute(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn executable_exists(&self, path: &str) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM executable WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn insert_executable(
        &self,
        path: &str,
        dev: u64,
        inode: u64,
        hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR IGNORE INTO executable (path, dev, inode, hash, danger) VALUES (?, ?, ?, ?, -1)",
        )
        .bind(path)
        .bind(dev as i64)
        .bind(inode as i64)
        .bind(hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Updates an existing row. Resets `danger` to -1 only if the hash
    /// changed, otherwise the previous danger classification survives.
    pub async fn update_executable(
        &self,
        path: &str,
        dev: u64,
        inode: u64,
        hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE executable
            SET dev = ?, inode = ?, hash = ?,
                danger = CASE WHEN hash != ? THEN -1 ELSE danger END
            WHERE path = ?
            "#,
        )
        .bind(dev as i64)
        .bind(inode as i64)
        .bind(hash)
        .bind(hash)
        .bind(path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_danger(&self, path: &str) -> Result<i32, sqlx::Error> {
        let row = sqlx::query("SELECT danger FROM executable WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i32, _>(0)).unwrap_or(-1))
    }

    pub async fn set_danger(&self, path: &str, danger: i32) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE executable SET danger = ? WHERE path = ?")
            .bind(danger)
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Soft delete: zero the identifying columns rather than remove the
    /// row, matching the original store's "makes debugging easier" choice.
    pub async fn delete_executable(&self, path: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE executable SET dev = 0, inode = 0, hash = '' WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn fd_insert(&self, fd: i32, pid: i32, path: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR REPLACE INTO file_descriptor (fd, pid, path) VALUES (?, ?, ?)",
        )
        .bind(fd)
        .bind(pid)
        .bind(path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fd_get_path(&self, fd: i32, pid: i32) -> Result<Option<String>, sqlx::Error> {
        let row = sqlx::query("SELECT path FROM file_descriptor WHERE fd = ? AND pid = ?")
            .bind(fd)
            .bind(pid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get(0)))
    }

    pub async fn fd_delete(&self, fd: i32, pid: i32) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM file_descriptor WHERE fd = ? AND pid = ?")
            .bind(fd)
            .bind(pid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn fd_delete_all(&self, pid: i32) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM file_descriptor WHERE pid = ?")
            .bind(pid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn namespace_new(&self, kind: &str, data: &str) -> Result<i64, sqlx::Error> {
        let result = sqlx::query("INSERT INTO namespaces (kind, data) VALUES (?, ?)")
            .bind(kind)
            .bind(data)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn namespace_get(&self, id: i64) -> Result<Option<(String, String)>, sqlx::Error> {
        let row = sqlx::query("SELECT kind, data FROM namespaces WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| (r.get(0), r.get(1))))
    }

    pub async fn namespace_update(&self, id: i64, data: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE namespaces SET data = ? WHERE id = ?")
            .bind(data)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_and_read_back_danger() {
        let store = Store::new(":memory:").await.unwrap();
        store
            .insert_executable("/bin/sh", 1, 2, "abc")
            .await
            .unwrap();
        assert_eq!(store.get_danger("/bin/sh").await.unwrap(), -1);
        store.set_danger("/bin/sh", 1).await.unwrap();
        assert_eq!(store.get_danger("/bin/sh").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_resets_danger_only_on_hash_change() {
        let store = Store::new(":memory:").await.unwrap();
        store.insert_executable("/bin/sh", 1, 2, "abc").await.unwrap();
        store.set_danger("/bin/sh", 1).await.unwrap();

        store.update_executable("/bin/sh", 1, 2, "abc").await.unwrap();
        assert_eq!(store.get_danger("/bin/sh").await.unwrap(), 1);

        store.update_executable("/bin/sh", 1, 2, "xyz").await.unwrap();
        assert_eq!(store.get_danger("/bin/sh").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn fd_round_trip() {
        let store = Store::new(":memory:").await.unwrap();
        store.fd_insert(3, 100, "/bin/sh").await.unwrap();
        assert_eq!(
            store.fd_get_path(3, 100).await.unwrap(),
            Some("/bin/sh".to_string())
        );
        store.fd_delete_all(100).await.unwrap();
        assert_eq!(store.fd_get_path(3, 100).await.unwrap(), None);
    }

    #[tokio::test]
    async fn namespace_round_trip() {
        let store = Store::new(":memory:").await.unwrap();
        let id = store.namespace_new("mount", "/").await.unwrap();
        store.namespace_update(id, "/containers/c1").await.unwrap();
        let (kind, data) = store.namespace_get(id).await.unwrap().unwrap();
        assert_eq!(kind, "mount");
        assert_eq!(data, "/containers/c1");
    }
}
