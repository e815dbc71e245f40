//! Cooperative exclusive locks over filesystem markers.
//!
//! A lock on a resource is arbitrated through a sibling marker file
//! (`{resource}.lock`) created with `create_new`, so at most one holder can
//! win a round regardless of how many processes race. The marker body is a
//! JSON [`LockRecord`] carrying the holder identity and acquisition time,
//! which is what makes stale locks detectable after a holder dies. The
//! manager only ever touches the marker, never the resource itself.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::utils::errors::{Result, VaultError};

/// First sleep between contended acquisition attempts.
const POLL_INITIAL: Duration = Duration::from_millis(25);

/// Cap for the backoff sleep.
const POLL_MAX: Duration = Duration::from_secs(1);

static PROCESS_HOLDER: OnceLock<HolderId> = OnceLock::new();

/// Identity of a lock holder: host, pid, and a per-process random token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderId {
    pub hostname: String,
    pub pid: u32,
    pub token: Uuid,
}

impl HolderId {
    /// The identity shared by every lock taken from this process.
    pub fn process() -> &'static HolderId {
        PROCESS_HOLDER.get_or_init(HolderId::fresh)
    }

    /// A brand-new identity. Distinct identities behave like distinct
    /// processes, which is also how contention is simulated in tests.
    pub fn fresh() -> Self {
        Self {
            hostname: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string()),
            pid: std::process::id(),
            token: Uuid::new_v4(),
        }
    }
}

impl std::fmt::Display for HolderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} ({})", self.hostname, self.pid, self.token)
    }
}

/// An exclusive claim on a resource, as written into the marker file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub resource: PathBuf,
    pub holder: HolderId,
    /// Wall-clock acquisition time, Unix millis.
    pub acquired_at_ms: u64,
}

impl LockRecord {
    /// How long ago this lock was acquired.
    pub fn age(&self) -> Duration {
        Duration::from_millis(now_ms().saturating_sub(self.acquired_at_ms))
    }

    /// A lock whose holder has kept it at least `threshold` is considered
    /// abandoned and may be reclaimed by a new acquirer.
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.age() >= threshold
    }
}

/// Marker file that arbitrates access to `resource`.
pub fn marker_path(resource: &Path) -> PathBuf {
    let mut os = resource.as_os_str().to_os_string();
    os.push(".lock");
    PathBuf::from(os)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Read the marker body. `Ok(None)` means the file exists but does not
/// parse (a torn write); a missing file surfaces as `Err(NotFound)`.
fn read_marker(marker: &Path) -> std::io::Result<Option<LockRecord>> {
    let contents = fs::read_to_string(marker)?;
    Ok(serde_json::from_str(&contents).ok())
}

/// Age of the marker file itself, by mtime. Used only for torn markers
/// whose body cannot tell us when they were acquired.
fn marker_mtime_age(marker: &Path) -> std::io::Result<Duration> {
    let modified = fs::metadata(marker)?.modified()?;
    Ok(SystemTime::now()
        .duration_since(modified)
        .unwrap_or_default())
}

/// Acquires and releases marker-based locks on behalf of one holder.
pub struct LockManager {
    holder: HolderId,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    /// Manager bound to the process-wide holder identity.
    pub fn new() -> Self {
        Self {
            holder: HolderId::process().clone(),
        }
    }

    /// Manager with an explicit holder identity.
    pub fn with_holder(holder: HolderId) -> Self {
        Self { holder }
    }

    pub fn holder(&self) -> &HolderId {
        &self.holder
    }

    /// Acquire the lock on `resource`, polling with bounded backoff until
    /// `timeout` elapses. Markers older than `staleness` are reclaimed
    /// along the way. Fails with [`VaultError::LockTimeout`] if no round
    /// wins in time.
    pub async fn acquire(
        &self,
        resource: &Path,
        timeout: Duration,
        staleness: Duration,
    ) -> Result<LockRecord> {
        let started = Instant::now();
        let mut delay = POLL_INITIAL;

        loop {
            if let Some(record) = self.try_acquire(resource, staleness)? {
                return Ok(record);
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(VaultError::LockTimeout {
                    resource: resource.display().to_string(),
                    waited_ms: elapsed.as_millis() as u64,
                });
            }

            tokio::time::sleep(delay.min(timeout - elapsed)).await;
            delay = (delay * 2).min(POLL_MAX);
        }
    }

    /// One acquisition round: attempt the atomic marker create, and on
    /// contention clear the marker if it is verifiably stale so a later
    /// round can win. Returns `Ok(None)` when the resource stays busy.
    pub fn try_acquire(&self, resource: &Path, staleness: Duration) -> Result<Option<LockRecord>> {
        let marker = marker_path(resource);

        match OpenOptions::new().write(true).create_new(true).open(&marker) {
            Ok(mut file) => {
                let record = LockRecord {
                    resource: resource.to_path_buf(),
                    holder: self.holder.clone(),
                    acquired_at_ms: now_ms(),
                };
                let written = serde_json::to_writer(&mut file, &record)
                    .map_err(VaultError::from)
                    .and_then(|_| file.flush().map_err(VaultError::from));
                if let Err(e) = written {
                    drop(file);
                    let _ = fs::remove_file(&marker);
                    return Err(e);
                }
                debug!(resource = %resource.display(), holder = %self.holder, "lock acquired");
                Ok(Some(record))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                self.reclaim_if_stale(resource, &marker, staleness)?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Release a lock we hold. The marker is removed only when it still
    /// belongs to this holder; anything else reports
    /// [`VaultError::NotOwner`] and leaves the marker alone.
    pub fn release(&self, record: &LockRecord) -> Result<()> {
        let marker = marker_path(&record.resource);
        let not_owner = || VaultError::NotOwner(record.resource.display().to_string());

        match read_marker(&marker) {
            Ok(Some(current)) if current.holder == self.holder => {
                fs::remove_file(&marker)?;
                debug!(resource = %record.resource.display(), "lock released");
                Ok(())
            }
            Ok(_) => Err(not_owner()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_owner()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a contended marker when it has gone stale. The marker is
    /// re-read immediately before removal and must still carry the same
    /// holder and acquisition time we judged stale, so a holder that
    /// finished (or a fresh acquirer that replaced it) in the meantime is
    /// never clobbered.
    fn reclaim_if_stale(&self, resource: &Path, marker: &Path, staleness: Duration) -> Result<()> {
        let observed = match read_marker(marker) {
            Ok(observed) => observed,
            // Released between our failed create and the read. The next
            // round will win it cleanly.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        match observed {
            Some(existing) if existing.is_stale(staleness) => {
                let verified = matches!(
                    read_marker(marker),
                    Ok(Some(current))
                        if current.holder == existing.holder
                            && current.acquired_at_ms == existing.acquired_at_ms
                );
                if verified {
                    warn!(
                        resource = %resource.display(),
                        holder = %existing.holder,
                        age_ms = existing.age().as_millis() as u64,
                        "reclaiming stale lock"
                    );
                    remove_ignoring_missing(marker)?;
                }
            }
            Some(_) => {}
            None => {
                // Torn marker: no holder to verify, so only the file's own
                // age can justify removal.
                match marker_mtime_age(marker) {
                    Ok(age) if age >= staleness => {
                        warn!(resource = %resource.display(), "removing torn lock marker");
                        remove_ignoring_missing(marker)?;
                    }
                    Ok(_) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }
}

fn remove_ignoring_missing(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
