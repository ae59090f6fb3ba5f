use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

use parkr_core::{LotDirectory, UserIdentity};

/// Per-user client state for one signed-in period.
///
/// Created at sign-in and dropped at sign-out. Every component that needs to know
/// who is acting, or which lot is on screen, receives it explicitly.
#[derive(Debug)]
pub struct Session {
    user: UserIdentity,
    selected_lot: Option<String>,
    reservations: AtomicU64,
}

impl Session {
    pub fn new(user: UserIdentity) -> Self {
        Self {
            user,
            selected_lot: None,
            reservations: AtomicU64::new(0),
        }
    }

    pub fn user(&self) -> &UserIdentity {
        &self.user
    }

    pub fn selected_lot(&self) -> Option<&str> {
        self.selected_lot.as_deref()
    }

    pub fn select_lot(&mut self, lot_id: impl Into<String>) {
        self.selected_lot = Some(lot_id.into());
    }

    pub fn clear_lot(&mut self) {
        self.selected_lot = None;
    }

    /// Display-only count of successful reservations made by this user.
    pub fn reservation_count(&self) -> u64 {
        self.reservations.load(Ordering::Relaxed)
    }

    /// Bump the reservation counter, returning the new value.
    pub fn record_reservation(&self) -> u64 {
        self.reservations.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn to_persisted(&self) -> PersistedSession {
        PersistedSession {
            user: self.user.clone(),
            selected_lot: self.selected_lot.clone(),
            reservation_count: self.reservation_count(),
        }
    }

    /// Rebuild a session from saved state.
    ///
    /// The saved lot is only a hint: it is kept if the lot directory still lists it
    /// and dropped otherwise. If the directory cannot be reached the hint is kept and
    /// the first live-view fetch settles it.
    pub async fn resume(saved: PersistedSession, lots: &dyn LotDirectory) -> Self {
        let selected_lot = match saved.selected_lot {
            Some(lot_id) => match lots.list_lots().await {
                Ok(known) if known.iter().any(|l| l.lot_id == lot_id) => Some(lot_id),
                Ok(_) => {
                    info!("Saved lot {} no longer exists, clearing selection", lot_id);
                    None
                }
                Err(e) => {
                    warn!("Could not revalidate saved lot {}: {}", lot_id, e);
                    Some(lot_id)
                }
            },
            None => None,
        };

        Self {
            user: saved.user,
            selected_lot,
            reservations: AtomicU64::new(saved.reservation_count),
        }
    }
}

/// What survives an application restart. Not authoritative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    pub user: UserIdentity,
    #[serde(default)]
    pub selected_lot: Option<String>,
    #[serde(default)]
    pub reservation_count: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Session file is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// JSON file holding the persisted session.
#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn save(&self, session: &Session) -> Result<(), SessionError> {
        let json = serde_json::to_vec_pretty(&session.to_persisted())?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    /// Load the saved session. A corrupt file is removed and treated as absent.
    pub fn load(&self) -> Result<Option<PersistedSession>, SessionError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&bytes) {
            Ok(saved) => Ok(Some(saved)),
            Err(e) => {
                warn!("Discarding unreadable session file {}: {}", self.path.display(), e);
                self.clear()?;
                Ok(None)
            }
        }
    }

    /// Sign-out: forget the saved user and lot.
    pub fn clear(&self) -> Result<(), SessionError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
