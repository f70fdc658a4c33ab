// Local persistence — storage backend abstraction and the patient repository

pub mod backend;
pub mod patients;

pub use backend::{MemoryStorage, SledStorage, StorageBackend, StoreError};
pub use patients::PatientRepository;
