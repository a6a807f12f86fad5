/// Reference admin controller and admin operations.
pub mod admin_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Idempotent per-question scoring.
pub mod scoring;
/// Participant session actors and their registry.
pub mod session_service;
/// Server-Sent Events forwarding of session views.
pub mod sse_service;
/// Store connection supervisor with backoff and health polling.
pub mod storage_supervisor;
