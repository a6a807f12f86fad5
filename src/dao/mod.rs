/// Question content loading.
pub mod content;
/// Persisted document and partial-update models.
pub mod models;
/// Storage error taxonomy shared by every backend.
pub mod storage;
/// Shared state store abstraction and its backends.
pub mod store;
