use duckdb::{AccessMode, Config, Connection};
use r2d2::ManageConnection;
use std::sync::{Mutex, PoisonError};

const IN_MEMORY: &str = ":memory:";

enum ConnectionTarget {
    File { path: String, read_only: bool },
    /// Every pooled connection is a clone of this root, so they all see the
    /// same in-memory database.
    Memory(Mutex<Connection>),
}

pub struct DuckDBConnectionManager {
    target: ConnectionTarget,
}

impl DuckDBConnectionManager {
    pub fn new(connection_string: String, read_only: bool) -> Result<Self, duckdb::Error> {
        if connection_string == IN_MEMORY {
            return Self::in_memory();
        }

        Ok(Self {
            target: ConnectionTarget::File {
                path: connection_string,
                read_only,
            },
        })
    }

    pub fn in_memory() -> Result<Self, duckdb::Error> {
        let root = Connection::open_in_memory()?;
        Ok(Self {
            target: ConnectionTarget::Memory(Mutex::new(root)),
        })
    }
}

impl ManageConnection for DuckDBConnectionManager {
    type Connection = Connection;
    type Error = duckdb::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        match &self.target {
            ConnectionTarget::File { path, read_only } => {
                if *read_only {
                    let config = Config::default().access_mode(AccessMode::ReadOnly)?;
                    Connection::open_with_flags(path, config)
                } else {
                    Connection::open(path)
                }
            }
            ConnectionTarget::Memory(root) => root
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .try_clone(),
        }
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.execute_batch("SELECT 1")?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}
