// MedRelay Core — store-and-forward patient lookups over a peer mesh
//
// Devices without internet access relay searches and record creation
// through nearby peers; any online peer executes the operation against
// the remote service and relays the result back.

pub mod aggregate;
pub mod backend;
pub mod connectivity;
pub mod gateway;
pub mod patient;
pub mod protocol;
pub mod store;
pub mod tracker;

pub use aggregate::{ResultAggregator, ResultSection};
pub use backend::{BackendError, HttpBackend, HttpBackendConfig, RemoteBackend};
pub use connectivity::ConnectivityMonitor;
pub use gateway::{GatewayConfig, GatewayEvent, MeshGateway, MeshTransport};
pub use patient::PatientRecord;
pub use store::{MemoryStorage, PatientRepository, SledStorage, StorageBackend, StoreError};
pub use tracker::{RequestKind, RequestTracker};
