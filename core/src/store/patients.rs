// Patient repository — durable record store with substring search
//
// Records are stored as JSON under a key prefix so the same backend can be
// shared with other stores. Search is synchronous: the on-device store is
// small and the gateway consults it inline before going to the mesh.

use std::sync::Arc;

use crate::patient::{current_timestamp, PatientRecord};
use crate::store::backend::{StorageBackend, StoreError};

const PATIENT_PREFIX: &[u8] = b"patient_";

/// Local patient record store
#[derive(Clone)]
pub struct PatientRepository {
    backend: Arc<dyn StorageBackend>,
}

impl PatientRepository {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    fn key(id: &str) -> Vec<u8> {
        let mut key = PATIENT_PREFIX.to_vec();
        key.extend_from_slice(id.as_bytes());
        key
    }

    /// Store a new record
    pub fn add(&self, record: &PatientRecord) -> Result<(), StoreError> {
        let value = serde_json::to_vec(record)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        self.backend.put(&Self::key(&record.id), &value)?;
        self.backend.flush()
    }

    /// Replace an existing record, bumping its modification timestamp
    pub fn update(&self, record: &PatientRecord) -> Result<(), StoreError> {
        if self.backend.get(&Self::key(&record.id))?.is_none() {
            return Err(StoreError::NotFound(record.id.clone()));
        }
        let mut record = record.clone();
        record.updated_at = current_timestamp();
        let value = serde_json::to_vec(&record)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        self.backend.put(&Self::key(&record.id), &value)?;
        self.backend.flush()
    }

    /// Delete a record by ID
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.backend.remove(&Self::key(id))?;
        self.backend.flush()
    }

    /// Fetch a single record by ID
    pub fn get(&self, id: &str) -> Result<Option<PatientRecord>, StoreError> {
        match self.backend.get(&Self::key(id))? {
            Some(bytes) => {
                let record = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// All stored records
    pub fn list(&self) -> Result<Vec<PatientRecord>, StoreError> {
        let mut records = Vec::new();
        for (_, value) in self.backend.scan_prefix(PATIENT_PREFIX)? {
            // Skip entries that fail to decode rather than failing the scan
            if let Ok(record) = serde_json::from_slice::<PatientRecord>(&value) {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Substring, case-insensitive search across name, phone, email,
    /// conditions, medications and allergies. Empty query returns nothing.
    pub fn search(&self, query: &str) -> Result<Vec<PatientRecord>, StoreError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query = query.trim();
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.matches(query))
            .collect())
    }

    /// Number of stored records
    pub fn count(&self) -> Result<usize, StoreError> {
        Ok(self.backend.scan_prefix(PATIENT_PREFIX)?.len())
    }
}
