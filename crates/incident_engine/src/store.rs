use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;

use crate::incident::Incident;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("incident store unavailable: {0}")]
    Unavailable(String),
    #[error("incident {incident_id} changed concurrently (expected version {expected}, found {found})")]
    Conflict {
        incident_id: String,
        expected: u64,
        found: u64,
    },
    #[error("incident {0} not found")]
    NotFound(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Conflict { .. })
    }
}

/// System of record for incidents.
///
/// `commit` is one atomic write: the incident and its `dedup_key` index
/// entry change together or not at all.
pub trait IncidentStore: Send + Sync {
    fn get(&self, incident_id: &str) -> Result<Option<Incident>, StoreError>;

    /// Most recent incident (open or closed) registered for `dedup_key`.
    fn latest_for_key(&self, dedup_key: &str) -> Result<Option<Incident>, StoreError>;

    /// Persist `incident`. `expected_version` is the version the caller read
    /// (`None` for a new incident).
    fn commit(&self, incident: &Incident, expected_version: Option<u64>) -> Result<(), StoreError>;

    fn list(&self) -> Result<Vec<Incident>, StoreError>;
}

#[derive(Default)]
struct Tables {
    incidents: HashMap<String, Incident>,
    by_key: HashMap<String, String>,
}

#[derive(Default)]
pub struct MemoryIncidentStore {
    tables: RwLock<Tables>,
}

impl MemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IncidentStore for MemoryIncidentStore {
    fn get(&self, incident_id: &str) -> Result<Option<Incident>, StoreError> {
        Ok(self.tables.read().incidents.get(incident_id).cloned())
    }

    fn latest_for_key(&self, dedup_key: &str) -> Result<Option<Incident>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .by_key
            .get(dedup_key)
            .and_then(|id| tables.incidents.get(id))
            .cloned())
    }

    fn commit(&self, incident: &Incident, expected_version: Option<u64>) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let found = tables.incidents.get(&incident.incident_id).map(|i| i.version);
        if found != expected_version {
            return Err(StoreError::Conflict {
                incident_id: incident.incident_id.clone(),
                expected: expected_version.unwrap_or(0),
                found: found.unwrap_or(0),
            });
        }
        tables
            .by_key
            .insert(incident.dedup_key.clone(), incident.incident_id.clone());
        tables
            .incidents
            .insert(incident.incident_id.clone(), incident.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<Incident>, StoreError> {
        let mut all: Vec<Incident> = self.tables.read().incidents.values().cloned().collect();
        all.sort_by(|a, b| {
            a.first_observed_at
                .cmp(&b.first_observed_at)
                .then_with(|| a.incident_id.cmp(&b.incident_id))
        });
        Ok(all)
    }
}
