//! Taskrank library crate
//!
//! A personal task list whose order is decided by a language model. Every
//! add, edit and delete sends each task, together with the rest of the list,
//! to the priority oracle; the returned 1-10 scores decide the display order.

pub mod api;
pub mod cli;
pub mod controller;
pub mod credential;
pub mod models;
pub mod oracle;
pub mod ranking;
pub mod store;

// Re-export commonly used types
pub use controller::{ControllerError, TaskList};
pub use credential::{Credential, CredentialError, CredentialStore};
pub use models::{Event, Notification, NotificationLevel, Task, TaskDraft, TaskId, Theme};
pub use oracle::{GeminiBackend, OracleConfig, OracleError, PriorityOracle, ScoringBackend};
pub use ranking::{sort_tasks, RankingError, RescoreReport, Reranker, ScoreFailure};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, StoreError, TaskStore};
