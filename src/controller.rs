//! List controller
//!
//! `TaskList` owns the application state: it turns user intents into store
//! updates, runs a rescoring pass where the intent calls for one, and
//! publishes `Event`s for whatever front end is attached.

use std::collections::HashSet;
use std::mem;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex, MutexGuard};

use crate::credential::{CredentialError, CredentialStore};
use crate::models::{Event, Notification, Task, TaskDraft, TaskId, Theme};
use crate::oracle::{OracleError, PriorityOracle, ScoringBackend};
use crate::ranking::{sort_tasks, RankingError, RescoreReport, Reranker};
use crate::store::{KeyValueStore, StoreError, TaskStore};

const EVENT_CAPACITY: usize = 100;

/// Controller errors
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Please add your Gemini API key to enable task prioritization")]
    MissingCredential,

    #[error("Please enter a task name")]
    EmptyName,

    #[error("Please wait for the current update to finish")]
    Busy,

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("Failed to save tasks: {0}")]
    Store(#[from] StoreError),
}

impl From<RankingError> for ControllerError {
    fn from(error: RankingError) -> Self {
        match error {
            RankingError::Busy => ControllerError::Busy,
        }
    }
}

fn notification_for(error: &ControllerError) -> Notification {
    match error {
        ControllerError::MissingCredential | ControllerError::EmptyName | ControllerError::Busy => {
            Notification::warning(error.to_string())
        }
        ControllerError::Credential(CredentialError::Store(e)) | ControllerError::Store(e) => {
            Notification::error(format!("Failed to save changes: {}", e))
        }
        ControllerError::Credential(e) => Notification::error(e.to_string()),
    }
}

fn notification_for_failure(error: &OracleError) -> Notification {
    match error {
        OracleError::MissingCredential => Notification::warning(error.to_string()),
        OracleError::InvalidCredential => Notification::error(error.to_string()),
        OracleError::Network(_) => {
            Notification::error("Network error. Please check your internet connection.")
        }
        other => Notification::error(format!("Failed to analyze priority: {}", other)),
    }
}

/// The task list and everything needed to keep it ranked
pub struct TaskList {
    tasks: TaskStore,
    credentials: CredentialStore,
    reranker: Reranker,
    events: broadcast::Sender<Event>,
    intent_lock: Mutex<()>,
}

impl TaskList {
    pub fn new(store: Arc<dyn KeyValueStore>, backend: Arc<dyn ScoringBackend>) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tasks: TaskStore::new(store.clone()),
            credentials: CredentialStore::new(store),
            reranker: Reranker::new(PriorityOracle::new(backend), events.clone()),
            events,
            intent_lock: Mutex::new(()),
        }
    }

    /// Subscribe to render, busy and notification events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn notify(&self, notification: Notification) {
        self.emit(Event::Notify(notification));
    }

    fn render(&self, tasks: &[Task]) {
        self.emit(Event::Render(tasks.to_vec()));
    }

    /// Publishes a notification for a failed intent and hands the result back
    fn settle<T>(&self, result: Result<T, ControllerError>) -> Result<T, ControllerError> {
        if let Err(error) = &result {
            match error {
                ControllerError::Store(_) | ControllerError::Credential(CredentialError::Store(_)) => {
                    tracing::error!(error = %error, "store operation failed")
                }
                _ => tracing::debug!(error = %error, "intent rejected"),
            }
            self.notify(notification_for(error));
        }
        result
    }

    fn begin(&self) -> Result<MutexGuard<'_, ()>, ControllerError> {
        self.intent_lock
            .try_lock()
            .map_err(|_| ControllerError::Busy)
    }

    fn report_failures(&self, report: &RescoreReport) {
        if report.unreadable_credential {
            self.notify(Notification::error(
                "Could not read the API key; priorities fell back to the lowest score",
            ));
        }

        let mut seen = HashSet::new();
        for failure in &report.failures {
            // An unreadable key already has its own notice.
            if report.unreadable_credential && failure.error == OracleError::MissingCredential {
                continue;
            }
            if seen.insert(mem::discriminant(&failure.error)) {
                self.notify(notification_for_failure(&failure.error));
            }
        }
    }

    async fn persist(&self, tasks: Vec<Task>) -> Result<Vec<Task>, ControllerError> {
        let sorted = sort_tasks(tasks);
        self.tasks.save_tasks(&sorted).await?;
        self.render(&sorted);
        Ok(sorted)
    }

    /// Rescores the whole collection, then sorts, persists and renders it
    async fn rescore_and_persist(&self, tasks: Vec<Task>) -> Result<Vec<Task>, ControllerError> {
        let report = self.reranker.rescore_all(&self.credentials, tasks).await?;
        self.report_failures(&report);
        self.persist(report.tasks).await
    }

    async fn require_credential(&self) -> Result<(), ControllerError> {
        match self.credentials.get().await? {
            Some(_) => Ok(()),
            None => Err(ControllerError::MissingCredential),
        }
    }

    /// Loads the list for display, reminding the user when no key is stored
    pub async fn load(&self) -> Result<Vec<Task>, ControllerError> {
        let result = self.load_inner().await;
        self.settle(result)
    }

    async fn load_inner(&self) -> Result<Vec<Task>, ControllerError> {
        let tasks = self.tasks.load_tasks().await?;
        self.render(&tasks);
        if self.credentials.get().await?.is_none() {
            self.notify(Notification::warning(
                OracleError::MissingCredential.to_string(),
            ));
        }
        Ok(tasks)
    }

    /// The persisted collection, in rank order
    pub async fn tasks(&self) -> Result<Vec<Task>, ControllerError> {
        let result = self.tasks.load_tasks().await.map_err(ControllerError::from);
        self.settle(result)
    }

    /// Adds a task and re-ranks the whole list
    pub async fn add(&self, draft: TaskDraft) -> Result<Task, ControllerError> {
        let result = self.add_inner(draft).await;
        self.settle(result)
    }

    async fn add_inner(&self, draft: TaskDraft) -> Result<Task, ControllerError> {
        let _intent = self.begin()?;
        self.require_credential().await?;

        let draft = draft.normalized();
        if draft.name.is_empty() {
            return Err(ControllerError::EmptyName);
        }

        let mut tasks = self.tasks.load_tasks().await?;
        let now = Utc::now();
        let ids: Vec<TaskId> = tasks.iter().map(Task::id).collect();
        let task = Task::new(TaskId::allocate(now, &ids), draft, now);
        let id = task.id();
        tasks.push(task.clone());
        tracing::info!(task = %id, "adding task");

        let saved = self.rescore_and_persist(tasks).await?;
        self.notify(Notification::success("Task added successfully!"));
        Ok(saved.into_iter().find(|t| t.id() == id).unwrap_or(task))
    }

    /// Replaces a task's name, details and due date, then re-ranks
    ///
    /// Returns `None` when no task has the given id.
    pub async fn edit(&self, id: TaskId, draft: TaskDraft) -> Result<Option<Task>, ControllerError> {
        let result = self.edit_inner(id, draft).await;
        self.settle(result)
    }

    async fn edit_inner(&self, id: TaskId, draft: TaskDraft) -> Result<Option<Task>, ControllerError> {
        let _intent = self.begin()?;

        let mut tasks = self.tasks.load_tasks().await?;
        let Some(task) = tasks.iter_mut().find(|t| t.id() == id) else {
            tracing::debug!(task = %id, "edit of unknown task ignored");
            return Ok(None);
        };

        self.require_credential().await?;
        let draft = draft.normalized();
        if draft.name.is_empty() {
            return Err(ControllerError::EmptyName);
        }
        task.apply_edit(draft, Utc::now());
        tracing::info!(task = %id, "editing task");

        let saved = self.rescore_and_persist(tasks).await?;
        self.notify(Notification::success("Task updated"));
        Ok(saved.into_iter().find(|t| t.id() == id))
    }

    /// Removes a task and re-ranks what is left
    ///
    /// Deleting the last task writes an empty list without consulting the
    /// oracle. Returns the removed task, or `None` for an unknown id.
    pub async fn delete(&self, id: TaskId) -> Result<Option<Task>, ControllerError> {
        let result = self.delete_inner(id).await;
        self.settle(result)
    }

    async fn delete_inner(&self, id: TaskId) -> Result<Option<Task>, ControllerError> {
        let _intent = self.begin()?;

        let mut tasks = self.tasks.load_tasks().await?;
        let Some(index) = tasks.iter().position(|t| t.id() == id) else {
            tracing::debug!(task = %id, "delete of unknown task ignored");
            return Ok(None);
        };
        let removed = tasks.remove(index);
        tracing::info!(task = %id, remaining = tasks.len(), "deleting task");

        if tasks.is_empty() {
            self.persist(tasks).await?;
        } else {
            self.rescore_and_persist(tasks).await?;
        }

        self.notify(Notification::success("Task deleted"));
        Ok(Some(removed))
    }

    /// Flips a task's completion flag and re-sorts without rescoring
    pub async fn toggle_complete(&self, id: TaskId) -> Result<Option<Task>, ControllerError> {
        let result = self.toggle_inner(id).await;
        self.settle(result)
    }

    async fn toggle_inner(&self, id: TaskId) -> Result<Option<Task>, ControllerError> {
        let _intent = self.begin()?;

        let mut tasks = self.tasks.load_tasks().await?;
        let Some(task) = tasks.iter_mut().find(|t| t.id() == id) else {
            tracing::debug!(task = %id, "toggle of unknown task ignored");
            return Ok(None);
        };
        task.toggle_completed();
        let toggled = task.clone();

        self.persist(tasks).await?;
        Ok(Some(toggled))
    }

    /// Validates and stores a new API key
    pub async fn set_credential(&self, raw: &str) -> Result<(), ControllerError> {
        let result = self
            .credentials
            .set(raw)
            .await
            .map(|_| ())
            .map_err(ControllerError::from);
        if result.is_ok() {
            self.notify(Notification::success("API key saved successfully"));
        }
        self.settle(result)
    }

    pub async fn clear_credential(&self) -> Result<(), ControllerError> {
        let result = self.credentials.clear().await.map_err(ControllerError::from);
        if result.is_ok() {
            self.notify(Notification::info("API key cleared"));
        }
        self.settle(result)
    }

    /// Whether a valid key is stored; never exposes the key itself
    pub async fn has_credential(&self) -> Result<bool, ControllerError> {
        let result = self
            .credentials
            .get()
            .await
            .map(|c| c.is_some())
            .map_err(ControllerError::from);
        self.settle(result)
    }

    /// The saved theme, `None` when the user never picked one
    pub async fn theme(&self) -> Result<Option<Theme>, ControllerError> {
        let result = self.tasks.load_theme().await.map_err(ControllerError::from);
        self.settle(result)
    }

    pub async fn set_theme(&self, theme: Theme) -> Result<(), ControllerError> {
        let result = self.tasks.save_theme(theme).await.map_err(ControllerError::from);
        self.settle(result)
    }

    /// Switches to the other theme; `fallback` stands in for a missing preference
    pub async fn toggle_theme(&self, fallback: Theme) -> Result<Theme, ControllerError> {
        let result = self.toggle_theme_inner(fallback).await;
        self.settle(result)
    }

    async fn toggle_theme_inner(&self, fallback: Theme) -> Result<Theme, ControllerError> {
        let next = self.tasks.load_theme().await?.unwrap_or(fallback).toggled();
        self.tasks.save_theme(next).await?;
        Ok(next)
    }
}
