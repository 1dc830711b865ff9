use crate::error::{Error, Result};
use rusqlite::{Connection, Params, Row};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

/// Suffixes SQLite appends to the primary file for its durability side-files.
const SIDE_FILE_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

struct Connections {
    writer: Mutex<Connection>,
    /// `None` for in-memory stores, where reads share the writer.
    reader: Option<Mutex<Connection>>,
}

/// Handle to the catalog database.
///
/// Writes are serialized through a single writer connection. Reads go through
/// a separate connection so a search never waits for more than the one
/// transaction the writer is committing. `recover` swaps both connections
/// under an exclusive lock; every other operation holds the shared side.
pub struct Store {
    path: Option<PathBuf>,
    state: RwLock<Option<Connections>>,
    recoveries: AtomicUsize,
}

impl Store {
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let connections = open_connections(Some(&path))?;
        info!("Opened catalog database at {}", path.display());
        Ok(Store {
            path: Some(path),
            state: RwLock::new(Some(connections)),
            recoveries: AtomicUsize::new(0),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let connections = open_connections(None)?;
        Ok(Store {
            path: None,
            state: RwLock::new(Some(connections)),
            recoveries: AtomicUsize::new(0),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of times `recover` has completed on this handle.
    pub fn recovery_count(&self) -> usize {
        self.recoveries.load(Ordering::SeqCst)
    }

    /// Close everything, clear orphaned side-files if the primary file is
    /// gone, then reopen and recreate the schema.
    pub fn recover(&self) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        // Dropping the connections closes them before any file is touched.
        state.take();

        if let Some(path) = &self.path {
            if !path.exists() {
                remove_side_files(path);
            }
        }

        *state = Some(open_connections(self.path.as_deref())?);
        self.recoveries.fetch_add(1, Ordering::SeqCst);
        warn!(
            "Catalog database recovered ({})",
            self.path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ":memory:".to_string())
        );
        Ok(())
    }

    pub(crate) fn with_writer<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        self.ensure_file_present()?;
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let connections = state.as_ref().ok_or_else(|| self.closed_error())?;
        let mut conn = lock(&connections.writer);
        f(&mut conn)
    }

    pub(crate) fn with_reader<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.ensure_file_present()?;
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let connections = state.as_ref().ok_or_else(|| self.closed_error())?;
        let conn = lock(connections.reader.as_ref().unwrap_or(&connections.writer));
        f(&conn)
    }

    /// Run a single write statement.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        self.with_writer(|conn| Ok(conn.execute(sql, params)?))
    }

    /// Run a read query, mapping each row with `f`.
    pub fn query<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(sql)?;
            let rows = stmt
                .query_map(params, f)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    pub fn query_row<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<T>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.with_reader(|conn| Ok(conn.query_row(sql, params, f)?))
    }

    fn ensure_file_present(&self) -> Result<()> {
        match &self.path {
            Some(path) if !path.exists() => Err(Error::vanished(path)),
            _ => Ok(()),
        }
    }

    fn closed_error(&self) -> Error {
        Error::Io {
            code: rusqlite::ffi::SQLITE_CANTOPEN,
            detail: "catalog database is closed".to_string(),
        }
    }
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(|e| e.into_inner())
}

fn open_connections(path: Option<&Path>) -> Result<Connections> {
    match path {
        Some(path) => {
            let writer = Connection::open(path)?;
            configure_pragmas(&writer)?;
            create_schema(&writer)?;
            let reader = Connection::open(path)?;
            configure_pragmas(&reader)?;
            Ok(Connections {
                writer: Mutex::new(writer),
                reader: Some(Mutex::new(reader)),
            })
        }
        None => {
            let writer = Connection::open_in_memory()?;
            configure_pragmas(&writer)?;
            create_schema(&writer)?;
            Ok(Connections {
                writer: Mutex::new(writer),
                reader: None,
            })
        }
    }
}

fn configure_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA cache_size = -64000;
         PRAGMA busy_timeout = 5000;",
    )?;
    debug!("SQLite pragmas configured (WAL mode, 64MB cache)");
    Ok(())
}

fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(include_str!("schema.sql"))?;
    debug!("SQLite schema initialized (version 1)");
    Ok(())
}

fn remove_side_files(path: &Path) {
    for suffix in SIDE_FILE_SUFFIXES {
        let mut side = path.as_os_str().to_owned();
        side.push(suffix);
        let side = PathBuf::from(side);
        if side.exists() {
            match fs::remove_file(&side) {
                Ok(()) => debug!("Removed orphaned side-file {}", side.display()),
                Err(e) => warn!("Could not remove {}: {}", side.display(), e),
            }
        }
    }
}
