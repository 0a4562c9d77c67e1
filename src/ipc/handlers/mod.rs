pub mod attendance;
pub mod auth;
pub mod backup;
pub mod core;
pub mod dashboard;
pub mod documents;
pub mod events;
pub mod files;
pub mod students;
