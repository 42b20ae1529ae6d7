use std::collections::HashMap;
use std::path::{Path, PathBuf};

use core_types::jsonl;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::model::{Alert, DuplicateNotice, Emission, Escalation, Suppression};

#[derive(Debug, Error)]
pub enum AlertStoreError {
    #[error("alert store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("alert record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("alert store unavailable: {0}")]
    Unavailable(String),
}

impl AlertStoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AlertStoreError::Io(_) | AlertStoreError::Unavailable(_))
    }
}

/// Durable home of alerts and their side records.
///
/// `record` writes one [`Emission`] atomically; readers never see an alert
/// without the suppression or escalation recorded with it.
pub trait AlertStore: Send + Sync {
    fn record(&self, emission: &Emission) -> Result<(), AlertStoreError>;

    fn get(&self, alert_id: &str) -> Result<Option<Alert>, AlertStoreError>;

    fn find_by_dedup(&self, incident_id: &str, dedup_hash: &str)
        -> Result<Option<Alert>, AlertStoreError>;

    /// Most recently recorded alert for the incident.
    fn last_alert(&self, incident_id: &str) -> Result<Option<Alert>, AlertStoreError>;

    /// Alerts for the incident in emission order.
    fn alerts_for(&self, incident_id: &str) -> Result<Vec<Alert>, AlertStoreError>;

    fn suppressions_for(&self, alert_id: &str) -> Result<Vec<Suppression>, AlertStoreError>;

    fn escalations_for(&self, alert_id: &str) -> Result<Vec<Escalation>, AlertStoreError>;

    fn duplicates_for(&self, incident_id: &str) -> Result<Vec<DuplicateNotice>, AlertStoreError>;

    /// Incident ids with at least one alert, sorted.
    fn incidents(&self) -> Result<Vec<String>, AlertStoreError>;
}

/// Query index over applied emissions.
#[derive(Debug, Default)]
struct Index {
    alerts: HashMap<String, Alert>,
    chains: HashMap<String, Vec<String>>,
    by_dedup: HashMap<(String, String), String>,
    suppressions: HashMap<String, Vec<Suppression>>,
    escalations: HashMap<String, Vec<Escalation>>,
    duplicates: HashMap<String, Vec<DuplicateNotice>>,
}

impl Index {
    fn apply(&mut self, emission: &Emission) {
        match emission {
            Emission::Alert {
                alert,
                suppression,
                escalation,
            } => {
                self.by_dedup.insert(
                    (alert.incident_id.clone(), alert.dedup_hash.clone()),
                    alert.alert_id.clone(),
                );
                self.chains
                    .entry(alert.incident_id.clone())
                    .or_default()
                    .push(alert.alert_id.clone());
                self.alerts.insert(alert.alert_id.clone(), alert.clone());
                if let Some(s) = suppression {
                    self.suppressions
                        .entry(s.alert_id.clone())
                        .or_default()
                        .push(s.clone());
                }
                if let Some(e) = escalation {
                    self.escalations
                        .entry(e.alert_id.clone())
                        .or_default()
                        .push(e.clone());
                }
            }
            Emission::Duplicate { notice } => self
                .duplicates
                .entry(notice.incident_id.clone())
                .or_default()
                .push(notice.clone()),
            Emission::ManualSuppression { suppression } => self
                .suppressions
                .entry(suppression.alert_id.clone())
                .or_default()
                .push(suppression.clone()),
        }
    }

    fn get(&self, alert_id: &str) -> Option<Alert> {
        self.alerts.get(alert_id).cloned()
    }

    fn find_by_dedup(&self, incident_id: &str, dedup_hash: &str) -> Option<Alert> {
        self.by_dedup
            .get(&(incident_id.to_string(), dedup_hash.to_string()))
            .and_then(|id| self.get(id))
    }

    fn last_alert(&self, incident_id: &str) -> Option<Alert> {
        self.chains
            .get(incident_id)
            .and_then(|ids| ids.last())
            .and_then(|id| self.get(id))
    }

    fn alerts_for(&self, incident_id: &str) -> Vec<Alert> {
        self.chains
            .get(incident_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    fn incidents(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.chains.keys().cloned().collect();
        ids.sort();
        ids
    }
}

macro_rules! index_reads {
    () => {
        fn get(&self, alert_id: &str) -> Result<Option<Alert>, AlertStoreError> {
            Ok(self.index.read().get(alert_id))
        }

        fn find_by_dedup(
            &self,
            incident_id: &str,
            dedup_hash: &str,
        ) -> Result<Option<Alert>, AlertStoreError> {
            Ok(self.index.read().find_by_dedup(incident_id, dedup_hash))
        }

        fn last_alert(&self, incident_id: &str) -> Result<Option<Alert>, AlertStoreError> {
            Ok(self.index.read().last_alert(incident_id))
        }

        fn alerts_for(&self, incident_id: &str) -> Result<Vec<Alert>, AlertStoreError> {
            Ok(self.index.read().alerts_for(incident_id))
        }

        fn suppressions_for(&self, alert_id: &str) -> Result<Vec<Suppression>, AlertStoreError> {
            Ok(self
                .index
                .read()
                .suppressions
                .get(alert_id)
                .cloned()
                .unwrap_or_default())
        }

        fn escalations_for(&self, alert_id: &str) -> Result<Vec<Escalation>, AlertStoreError> {
            Ok(self
                .index
                .read()
                .escalations
                .get(alert_id)
                .cloned()
                .unwrap_or_default())
        }

        fn duplicates_for(
            &self,
            incident_id: &str,
        ) -> Result<Vec<DuplicateNotice>, AlertStoreError> {
            Ok(self
                .index
                .read()
                .duplicates
                .get(incident_id)
                .cloned()
                .unwrap_or_default())
        }

        fn incidents(&self) -> Result<Vec<String>, AlertStoreError> {
            Ok(self.index.read().incidents())
        }
    };
}

#[derive(Debug, Default)]
pub struct MemoryAlertStore {
    index: RwLock<Index>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AlertStore for MemoryAlertStore {
    fn record(&self, emission: &Emission) -> Result<(), AlertStoreError> {
        self.index.write().apply(emission);
        Ok(())
    }

    index_reads!();
}

/// One JSON line per emission. The index is rebuilt from the file on open,
/// and a line is only indexed once it has been written and fsynced. A torn
/// last line from an interrupted append is cut off on open.
#[derive(Debug)]
pub struct JsonlAlertStore {
    path: PathBuf,
    index: RwLock<Index>,
}

impl JsonlAlertStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AlertStoreError> {
        let path = path.as_ref().to_path_buf();
        let dropped = jsonl::truncate_torn_tail(&path)?;
        if dropped > 0 {
            warn!(path = %path.display(), bytes = dropped, "dropped torn alert store line");
        }
        let mut index = Index::default();
        let mut lines = 0usize;
        for emission in read_emissions(&path)? {
            index.apply(&emission);
            lines += 1;
        }
        debug!(path = %path.display(), emissions = lines, "alert store opened");
        Ok(Self {
            path,
            index: RwLock::new(index),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AlertStore for JsonlAlertStore {
    fn record(&self, emission: &Emission) -> Result<(), AlertStoreError> {
        let line = serde_json::to_string(emission)?;
        let mut index = self.index.write();

        if let Err(e) = jsonl::append_line(&self.path, &line) {
            error!(path = %self.path.display(), error = %e, "alert store append failed");
            return Err(e.into());
        }

        index.apply(emission);
        Ok(())
    }

    index_reads!();
}

/// Every emission recorded in a JSONL store file, in write order.
pub fn read_emissions(path: &Path) -> Result<Vec<Emission>, AlertStoreError> {
    let read = jsonl::read_lines(path)?;
    if read.torn_tail > 0 {
        warn!(path = %path.display(), bytes = read.torn_tail, "ignoring torn alert store line");
    }
    read.lines
        .iter()
        .map(|line| serde_json::from_str(line).map_err(AlertStoreError::from))
        .collect()
}
