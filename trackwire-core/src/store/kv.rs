//! Typed key-value store on SQLite
//!
//! Provides scalar (string/number/bool) and opaque blob storage for the
//! pipeline and its collaborators. Absent keys read back as `Ok(None)`,
//! never as an error, so callers can probe before anything has been written.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

/// Which retention/visibility subset a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Everyday state: queue blob, app-version bookkeeping
    General,
    /// Identifiers and credentials, kept apart for stronger protection
    Sensitive,
}

impl Scope {
    fn table(self) -> &'static str {
        match self {
            Scope::General => "kv_general",
            Scope::Sensitive => "kv_sensitive",
        }
    }
}

/// Store handle with a single pooled connection
pub struct KeyValueStore {
    conn: Mutex<Connection>,
}

impl KeyValueStore {
    /// Open or create a store at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL mode for durability under concurrent readers
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open the store at the default XDG data path
    pub fn open_default() -> Result<Self> {
        Self::open(&crate::config::Config::store_path())
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Run migrations on this store
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    // ============================================
    // Scalar accessors
    // ============================================

    /// Store a string value
    pub fn set_string(&self, scope: Scope, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let sql = scalar_upsert_sql(scope, "text_value");
        conn.execute(&sql, params![key, "string", value, Utc::now().to_rfc3339()])?;
        Ok(())
    }

    /// Read a string value, `None` if absent
    pub fn get_string(&self, scope: Scope, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT text_value FROM {} WHERE key = ?1 AND kind = 'string'",
            scope.table()
        );
        let value = conn
            .query_row(&sql, [key], |r| r.get::<_, Option<String>>(0))
            .optional()?;
        Ok(value.flatten())
    }

    /// Store a numeric value
    pub fn set_number(&self, scope: Scope, key: &str, value: f64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let sql = scalar_upsert_sql(scope, "real_value");
        conn.execute(&sql, params![key, "number", value, Utc::now().to_rfc3339()])?;
        Ok(())
    }

    /// Read a numeric value, `None` if absent
    pub fn get_number(&self, scope: Scope, key: &str) -> Result<Option<f64>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT real_value FROM {} WHERE key = ?1 AND kind = 'number'",
            scope.table()
        );
        let value = conn
            .query_row(&sql, [key], |r| r.get::<_, Option<f64>>(0))
            .optional()?;
        Ok(value.flatten())
    }

    /// Store a boolean value
    pub fn set_bool(&self, scope: Scope, key: &str, value: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let sql = scalar_upsert_sql(scope, "int_value");
        conn.execute(
            &sql,
            params![key, "bool", value as i64, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Read a boolean value, `None` if absent
    pub fn get_bool(&self, scope: Scope, key: &str) -> Result<Option<bool>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT int_value FROM {} WHERE key = ?1 AND kind = 'bool'",
            scope.table()
        );
        let value = conn
            .query_row(&sql, [key], |r| r.get::<_, Option<i64>>(0))
            .optional()?;
        Ok(value.flatten().map(|v| v != 0))
    }

    // ============================================
    // Blob accessors
    // ============================================

    /// Store an opaque serialized record
    pub fn set_blob(&self, scope: Scope, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            r#"
            INSERT INTO {} (key, kind, blob_value, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(key) DO UPDATE SET
                kind = excluded.kind,
                text_value = NULL,
                real_value = NULL,
                int_value = NULL,
                blob_value = excluded.blob_value,
                updated_at = excluded.updated_at
            "#,
            scope.table()
        );
        conn.execute(&sql, params![key, "blob", value, Utc::now().to_rfc3339()])?;
        Ok(())
    }

    /// Read an opaque serialized record, `None` if absent
    pub fn get_blob(&self, scope: Scope, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT blob_value FROM {} WHERE key = ?1 AND kind = 'blob'",
            scope.table()
        );
        let value = conn
            .query_row(&sql, [key], |r| r.get::<_, Option<Vec<u8>>>(0))
            .optional()?;
        Ok(value.flatten())
    }

    // ============================================
    // Removal
    // ============================================

    /// Delete one key; deleting an absent key is a no-op
    pub fn delete(&self, scope: Scope, key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("DELETE FROM {} WHERE key = ?1", scope.table());
        conn.execute(&sql, [key])?;
        Ok(())
    }

    /// Remove every key in one scope
    pub fn clear(&self, scope: Scope) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("DELETE FROM {}", scope.table());
        conn.execute(&sql, [])?;
        Ok(())
    }

    /// Remove every key in both scopes
    pub fn clear_all(&self) -> Result<()> {
        self.clear(Scope::General)?;
        self.clear(Scope::Sensitive)?;
        Ok(())
    }

}

/// Upsert statement for one scalar column; the other value columns are
/// cleared so an overwrite also changes the stored kind.
fn scalar_upsert_sql(scope: Scope, column: &str) -> String {
    let cleared = ["text_value", "real_value", "int_value", "blob_value"]
        .iter()
        .filter(|c| **c != column)
        .map(|c| format!("{} = NULL", c))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"
        INSERT INTO {table} (key, kind, {column}, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(key) DO UPDATE SET
            kind = excluded.kind,
            {column} = excluded.{column},
            {cleared},
            updated_at = excluded.updated_at
        "#,
        table = scope.table(),
        column = column,
        cleared = cleared,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_absent_keys_read_as_none() {
        let store = KeyValueStore::open_in_memory().unwrap();
        assert_eq!(store.get_string(Scope::General, "missing").unwrap(), None);
        assert_eq!(store.get_number(Scope::General, "missing").unwrap(), None);
        assert_eq!(store.get_bool(Scope::Sensitive, "missing").unwrap(), None);
        assert_eq!(store.get_blob(Scope::General, "missing").unwrap(), None);
    }

    #[test]
    fn test_scalar_roundtrips() {
        let store = KeyValueStore::open_in_memory().unwrap();

        store
            .set_string(Scope::General, "app_version", "2.4.1")
            .unwrap();
        assert_eq!(
            store.get_string(Scope::General, "app_version").unwrap(),
            Some("2.4.1".to_string())
        );

        store.set_number(Scope::General, "launches", 7.0).unwrap();
        assert_eq!(
            store.get_number(Scope::General, "launches").unwrap(),
            Some(7.0)
        );

        store.set_bool(Scope::General, "opted_out", true).unwrap();
        assert_eq!(
            store.get_bool(Scope::General, "opted_out").unwrap(),
            Some(true)
        );
    }

    #[test]
    fn test_overwrite_changes_kind() {
        let store = KeyValueStore::open_in_memory().unwrap();
        store.set_string(Scope::General, "k", "v").unwrap();
        store.set_number(Scope::General, "k", 1.5).unwrap();

        // The old kind no longer matches
        assert_eq!(store.get_string(Scope::General, "k").unwrap(), None);
        assert_eq!(store.get_number(Scope::General, "k").unwrap(), Some(1.5));
    }

    #[test]
    fn test_blob_roundtrip() {
        let store = KeyValueStore::open_in_memory().unwrap();
        let blob = vec![0u8, 1, 2, 255];
        store.set_blob(Scope::General, "queue", &blob).unwrap();
        assert_eq!(
            store.get_blob(Scope::General, "queue").unwrap(),
            Some(blob)
        );
    }

    #[test]
    fn test_scopes_are_disjoint() {
        let store = KeyValueStore::open_in_memory().unwrap();
        store
            .set_string(Scope::Sensitive, "visitor_id", "v-123")
            .unwrap();
        assert_eq!(store.get_string(Scope::General, "visitor_id").unwrap(), None);
        assert_eq!(
            store.get_string(Scope::Sensitive, "visitor_id").unwrap(),
            Some("v-123".to_string())
        );

        store.clear(Scope::General).unwrap();
        assert_eq!(
            store.get_string(Scope::Sensitive, "visitor_id").unwrap(),
            Some("v-123".to_string())
        );
    }

    #[test]
    fn test_delete_and_clear_all() {
        let store = KeyValueStore::open_in_memory().unwrap();
        store.set_string(Scope::General, "a", "1").unwrap();
        store.set_string(Scope::Sensitive, "b", "2").unwrap();

        store.delete(Scope::General, "a").unwrap();
        assert_eq!(store.get_string(Scope::General, "a").unwrap(), None);
        // Deleting again is fine
        store.delete(Scope::General, "a").unwrap();

        store.clear_all().unwrap();
        assert_eq!(store.get_string(Scope::Sensitive, "b").unwrap(), None);
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.db");

        {
            let store = KeyValueStore::open(&path).unwrap();
            store
                .set_string(Scope::Sensitive, "visitor_id", "v-999")
                .unwrap();
            store.set_blob(Scope::General, "queue", b"[]").unwrap();
        }

        let store = KeyValueStore::open(&path).unwrap();
        assert_eq!(
            store.get_string(Scope::Sensitive, "visitor_id").unwrap(),
            Some("v-999".to_string())
        );
        assert_eq!(
            store.get_blob(Scope::General, "queue").unwrap(),
            Some(b"[]".to_vec())
        );
    }
}
