// ─── Cycle engine ───
pub mod cancellation;
pub mod coordinator;
pub mod executor;
pub mod proposal;
pub mod rate_limit;
pub mod snapshot;

// ─── Collaborator seams ───
pub mod exchange;
pub mod feed;
pub mod notify;

// ─── Shared ───
pub mod config;
pub mod error;
pub mod messages;
pub mod types;
