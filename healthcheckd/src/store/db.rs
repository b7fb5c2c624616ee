use std::path::Path;
use std::time::Duration;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use shared::types::{ServerRecord, ServerStatus};
use super::{Membership, StoreError};

const SELECT_COLUMNS: &str = "SELECT id, name, address, status, created_at, updated_at FROM servers";

pub struct ServerDb {
    conn: Connection,
}

impl ServerDb {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::Directory {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let conn = Connection::open(path).map_err(StoreError::database("Failed to open database"))?;

        // Several daemons may share one database file
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(StoreError::database("Failed to set busy timeout"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(StoreError::database("Failed to enable WAL mode"))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS servers (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                name        TEXT NOT NULL,
                address     TEXT NOT NULL UNIQUE,
                status      INTEGER NOT NULL DEFAULT 1,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );
            "#,
        )
        .map_err(StoreError::database("Failed to create database schema"))?;

        Ok(Self { conn })
    }

    /// Insert a new server. A taken address is reported as `Conflict`.
    pub fn create_server(
        &self,
        name: &str,
        address: &str,
        status: ServerStatus,
    ) -> Result<ServerRecord, StoreError> {
        let now = Utc::now();
        let inserted = self.conn.execute(
            "INSERT INTO servers (name, address, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![name, address, status.as_i64(), now.to_rfc3339()],
        );

        match inserted {
            Ok(_) => Ok(ServerRecord {
                id: self.conn.last_insert_rowid(),
                name: name.to_string(),
                address: address.to_string(),
                status,
                created_at: now,
                last_updated: now,
            }),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Conflict {
                address: address.to_string(),
            }),
            Err(e) => Err(StoreError::Database {
                context: "Failed to create server",
                source: e,
            }),
        }
    }

    pub fn get_by_address(&self, address: &str) -> Result<Option<ServerRecord>, StoreError> {
        self.conn
            .query_row(
                &format!("{} WHERE address = ?1", SELECT_COLUMNS),
                params![address],
                Self::row_to_record,
            )
            .optional()
            .map_err(StoreError::database("Failed to query server"))
    }

    pub fn get_all_servers(&self) -> Result<Vec<ServerRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} ORDER BY id", SELECT_COLUMNS))
            .map_err(StoreError::database("Failed to prepare query"))?;

        let servers = stmt
            .query_map([], Self::row_to_record)
            .map_err(StoreError::database("Failed to query servers"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::database("Failed to collect servers"))?;

        Ok(servers)
    }

    /// Bulk status update relative to an address set, in one transaction.
    /// Only rows whose status differs are written.
    pub fn set_status(
        &self,
        addresses: &[String],
        membership: Membership,
        status: ServerStatus,
    ) -> Result<u64, StoreError> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(StoreError::database("Failed to begin transaction"))?;

        tx.execute_batch(
            "CREATE TEMP TABLE IF NOT EXISTS window_addresses (address TEXT PRIMARY KEY);
             DELETE FROM window_addresses;",
        )
        .map_err(StoreError::database("Failed to prepare address set"))?;

        {
            let mut insert = tx
                .prepare("INSERT OR IGNORE INTO window_addresses (address) VALUES (?1)")
                .map_err(StoreError::database("Failed to prepare address insert"))?;
            for address in addresses {
                insert
                    .execute(params![address])
                    .map_err(StoreError::database("Failed to load address set"))?;
            }
        }

        let sql = match membership {
            Membership::In => {
                "UPDATE servers SET status = ?1, updated_at = ?2
                 WHERE status != ?1 AND address IN (SELECT address FROM window_addresses)"
            }
            Membership::NotIn => {
                "UPDATE servers SET status = ?1, updated_at = ?2
                 WHERE status != ?1 AND address NOT IN (SELECT address FROM window_addresses)"
            }
        };

        let count = tx
            .execute(sql, params![status.as_i64(), Utc::now().to_rfc3339()])
            .map_err(StoreError::database("Failed to update server status"))?;

        tx.execute("DELETE FROM window_addresses", [])
            .map_err(StoreError::database("Failed to clear address set"))?;
        tx.commit()
            .map_err(StoreError::database("Failed to commit status update"))?;

        Ok(count as u64)
    }

    fn row_to_record(row: &rusqlite::Row) -> Result<ServerRecord, rusqlite::Error> {
        let created_at: String = row.get(4)?;
        let updated_at: String = row.get(5)?;

        Ok(ServerRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            address: row.get(2)?,
            status: ServerStatus::from_i64(row.get(3)?),
            created_at: parse_timestamp(4, &created_at)?,
            last_updated: parse_timestamp(5, &updated_at)?,
        })
    }
}

fn parse_timestamp(column: usize, value: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addresses(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_create_and_query() {
        let db = ServerDb::open(":memory:").unwrap();

        let created = db.create_server("10.0.0.5", "10.0.0.5", ServerStatus::Up).unwrap();
        assert_eq!(created.status, ServerStatus::Up);

        let retrieved = db.get_by_address("10.0.0.5").unwrap().unwrap();
        assert_eq!(retrieved.id, created.id);
        assert_eq!(retrieved.name, "10.0.0.5");
        assert_eq!(retrieved.status, ServerStatus::Up);

        assert!(db.get_by_address("10.0.0.6").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_address_is_conflict() {
        let db = ServerDb::open(":memory:").unwrap();
        db.create_server("a", "10.0.0.5", ServerStatus::Up).unwrap();

        let err = db.create_server("b", "10.0.0.5", ServerStatus::Up).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { ref address } if address == "10.0.0.5"));
        assert_eq!(db.get_all_servers().unwrap().len(), 1);
    }

    #[test]
    fn test_set_status_in_and_not_in() {
        let db = ServerDb::open(":memory:").unwrap();
        for address in ["A", "B", "C"] {
            db.create_server(address, address, ServerStatus::Down).unwrap();
        }

        let seen = addresses(&["A", "B"]);
        assert_eq!(db.set_status(&seen, Membership::In, ServerStatus::Up).unwrap(), 2);
        assert_eq!(db.set_status(&seen, Membership::NotIn, ServerStatus::Down).unwrap(), 0);

        let status = |a: &str| db.get_by_address(a).unwrap().unwrap().status;
        assert_eq!(status("A"), ServerStatus::Up);
        assert_eq!(status("B"), ServerStatus::Up);
        assert_eq!(status("C"), ServerStatus::Down);

        // Only transitions are counted
        assert_eq!(db.set_status(&seen, Membership::In, ServerStatus::Up).unwrap(), 0);
    }

    #[test]
    fn test_set_status_with_empty_set() {
        let db = ServerDb::open(":memory:").unwrap();
        for address in ["A", "B"] {
            db.create_server(address, address, ServerStatus::Up).unwrap();
        }

        assert_eq!(db.set_status(&[], Membership::In, ServerStatus::Up).unwrap(), 0);
        assert_eq!(db.set_status(&[], Membership::NotIn, ServerStatus::Down).unwrap(), 2);
        assert!(db
            .get_all_servers()
            .unwrap()
            .iter()
            .all(|s| s.status == ServerStatus::Down));
    }

    #[test]
    fn test_set_status_ignores_unknown_addresses() {
        let db = ServerDb::open(":memory:").unwrap();
        db.create_server("A", "A", ServerStatus::Down).unwrap();

        let seen = addresses(&["A", "Z", "Z"]);
        assert_eq!(db.set_status(&seen, Membership::In, ServerStatus::Up).unwrap(), 1);
        assert_eq!(db.get_all_servers().unwrap().len(), 1);
    }

    #[test]
    fn test_open_reports_uncreatable_directory() {
        // A regular file where the parent directory should be
        let blocker = std::env::temp_dir().join(format!("healthcheckd-{}", uuid::Uuid::new_v4()));
        std::fs::write(&blocker, b"").unwrap();

        let result = ServerDb::open(blocker.join("servers.db"));
        std::fs::remove_file(&blocker).unwrap();

        assert!(matches!(result, Err(StoreError::Directory { ref path, .. }) if *path == blocker));
    }
}
