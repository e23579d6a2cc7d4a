//! SQLite-backed persistence shared by the session registry, approval
//! store, and break-glass store. One physical database, one schema,
//! migrated with `refinery` at startup (spec.md §6.1 "key-value store").
//!
//! All blocking I/O is dispatched through `tokio::task::spawn_blocking`;
//! callers never touch a `rusqlite::Connection` directly.

use anyhow::{Context, Result};
use refinery::embed_migrations;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

embed_migrations!("migrations/sqlite");

#[cfg(unix)]
use fs2::FileExt;
#[cfg(unix)]
use std::fs::OpenOptions;
#[cfg(unix)]
use std::time::Instant;

#[cfg(windows)]
use std::ffi::OsStr;
#[cfg(windows)]
use std::os::windows::ffi::OsStrExt;

use crate::utility::{set_secure_dir_permissions, set_secure_file_permissions};

#[cfg(windows)]
mod windows_lock {
    use super::*;
    use sha2::{Digest, Sha256};
    use std::time::Duration;
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::System::Threading::{CreateMutexW, ReleaseMutex, WaitForSingleObject};
    use windows::core::PCWSTR;

    pub struct NamedMutexGuard(HANDLE);

    impl Drop for NamedMutexGuard {
        fn drop(&mut self) {
            unsafe {
                let _ = ReleaseMutex(self.0);
                let _ = CloseHandle(self.0);
            }
        }
    }

    fn mutex_name_from_lock_path(lock_path: &Path) -> String {
        let mut hasher = Sha256::new();
        hasher.update(lock_path.to_string_lossy().as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("Global\\sentinel_migrate_{digest}")
    }

    pub fn acquire(lock_path: &Path, timeout: Duration) -> anyhow::Result<NamedMutexGuard> {
        let name = mutex_name_from_lock_path(lock_path);
        let wide: Vec<u16> = OsStr::new(&name).encode_wide().chain(std::iter::once(0)).collect();
        let pcw = PCWSTR(wide.as_ptr());

        unsafe {
            let handle = CreateMutexW(None, false, pcw)?;
            let ms: u32 = match timeout.as_millis().try_into() {
                Ok(v) => v,
                Err(_) => u32::MAX,
            };
            let wait = WaitForSingleObject(handle, ms);
            let wait_val: u32 = wait.0 as u32;
            if wait_val == 0 {
                return Ok(NamedMutexGuard(handle));
            }
            let _ = CloseHandle(handle);
            if wait_val == 0x102 {
                return Err(anyhow::anyhow!("timeout waiting for named mutex"));
            }
            Err(anyhow::anyhow!("waiting for named mutex failed: {wait_val}"))
        }
    }
}

#[cfg(unix)]
fn open_lock_file_with_retry(lock_path: &Path, timeout: Duration) -> anyhow::Result<std::fs::File> {
    use std::thread::sleep;

    let start = Instant::now();
    loop {
        match OpenOptions::new().create(true).read(true).write(true).open(lock_path) {
            Ok(f) => match f.try_lock_exclusive() {
                Ok(()) => return Ok(f),
                Err(_) => {
                    if start.elapsed() > timeout {
                        return Err(anyhow::anyhow!(
                            "timeout acquiring migration lock {}",
                            lock_path.display()
                        ));
                    }
                    sleep(Duration::from_millis(100));
                }
            },
            Err(e) => {
                if start.elapsed() > timeout {
                    return Err(anyhow::anyhow!(
                        "timeout opening migration lock file {}: {e}",
                        lock_path.display()
                    ));
                }
                sleep(Duration::from_millis(100));
            }
        }
    }
}

#[cfg(windows)]
type LockGuard = windows_lock::NamedMutexGuard;
#[cfg(unix)]
type LockGuard = (std::fs::File, PathBuf);

struct MigrationLockGuard(#[allow(dead_code)] LockGuard);

impl MigrationLockGuard {
    fn new(lock_path: &Path, timeout: Duration) -> anyhow::Result<Self> {
        #[cfg(windows)]
        {
            let guard = windows_lock::acquire(lock_path, timeout)?;
            Ok(MigrationLockGuard(guard))
        }
        #[cfg(unix)]
        {
            let file = open_lock_file_with_retry(lock_path, timeout)?;
            Ok(MigrationLockGuard((file, lock_path.to_path_buf())))
        }
    }
}

impl Drop for MigrationLockGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            let (file, path) = &self.0;
            let _ = file.unlock();
            let _ = std::fs::remove_file(path);
        }
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating parent dir {}", parent.display()))?;
        set_secure_dir_permissions(parent)
            .with_context(|| format!("setting secure permissions on {}", parent.display()))?;
    }
    Ok(())
}

fn open_db_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("opening sqlite db at {}", db_path.display()))?;
    conn.pragma_update(None, "journal_mode", "WAL").ok();
    conn.pragma_update(None, "synchronous", "NORMAL").ok();
    conn.pragma_update(None, "busy_timeout", 5000i64).ok();
    Ok(conn)
}

/// Handle to the broker's SQLite database. Cheap to clone; every operation
/// re-opens its own connection on a blocking thread.
#[derive(Clone, Debug)]
pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// Open (creating and migrating if necessary) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        ensure_parent_dir(&path)?;
        let db = Self { db_path: path.clone() };
        db.run_migrations()?;
        if path.exists() {
            set_secure_file_permissions(&path)
                .with_context(|| format!("setting secure permissions on {}", path.display()))?;
        }
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        let _guard = MigrationLockGuard::new(&self.db_path.with_extension("migrate.lock"), Duration::from_secs(30))?;
        let mut conn = open_db_connection(&self.db_path)?;
        migrations::runner()
            .run(&mut conn)
            .with_context(|| "applying embedded migrations")?;
        Ok(())
    }

    /// Run `f` against a freshly opened connection on a blocking thread.
    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open_db_connection(&db_path)?;
            f(&conn)
        })
        .await
        .context("database task panicked")?
    }
}
