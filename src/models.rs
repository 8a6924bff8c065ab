//! Core models for the taskrank library
//!
//! This module contains the task record, the priority scale, user preferences
//! and the events the controller publishes to front ends.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

/// Lowest score on the priority scale
pub const MIN_PRIORITY: u8 = 1;
/// Highest score on the priority scale
pub const MAX_PRIORITY: u8 = 10;
/// Priority a task carries before its first scoring pass
pub const DEFAULT_PRIORITY: u8 = 5;
/// Priority substituted whenever the oracle cannot produce a usable answer
pub const FALLBACK_PRIORITY: u8 = MIN_PRIORITY;

/// How long a notification stays visible before a front end dismisses it
pub const NOTIFICATION_TTL: Duration = Duration::from_secs(4);

/// Clamps any integer answer into `[MIN_PRIORITY, MAX_PRIORITY]`
pub fn clamp_priority(value: i64) -> u8 {
    value.clamp(MIN_PRIORITY as i64, MAX_PRIORITY as i64) as u8
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

/// Parses a due date written as RFC 3339, `YYYY-MM-DDTHH:MM` or `YYYY-MM-DD`
///
/// Times without an offset are taken as UTC; a bare date means 23:59 that day.
pub fn parse_due_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(23, 59, 0))
        .map(|dt| dt.and_utc())
}

// Older records store "" for missing details.
fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

// Older records keep the raw form input, e.g. "2024-06-01T10:30" or "".
fn lenient_due_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => parse_due_date(&raw)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid due date {:?}", raw))),
    }
}

fn clamped_priority<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    i64::deserialize(deserializer).map(clamp_priority)
}

/// Unique identifier of a task, derived from its creation time in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(i64);

impl TaskId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the inner value of the id.
    pub fn value(&self) -> i64 {
        self.0
    }

    /// Allocates an id from the clock, moved past every id in `existing` so
    /// that ids stay unique even when two tasks land in the same millisecond.
    pub fn allocate<'a, I>(now: DateTime<Utc>, existing: I) -> Self
    where
        I: IntoIterator<Item = &'a TaskId>,
    {
        let used: HashSet<i64> = existing.into_iter().map(|id| id.0).collect();
        let candidate = now.timestamp_millis();
        let next = match used.iter().max() {
            Some(&max) if max >= candidate => max.checked_add(1),
            _ => Some(candidate),
        };

        // Nothing fits above i64::MAX; take the closest free id below the clock.
        let id = next.unwrap_or_else(|| {
            (i64::MIN..=candidate)
                .rev()
                .find(|id| !used.contains(id))
                .unwrap_or(candidate)
        });
        Self(id)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(Self)
    }
}

/// User-supplied fields of a task, used for both creation and edits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    pub name: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

impl TaskDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            details: None,
            due_date: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_due_date(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    /// Trims text fields and turns blank details into `None`
    pub fn normalized(self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            details: self
                .details
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            due_date: self.due_date,
        }
    }
}

/// A single entry on the task list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    id: TaskId,
    name: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    details: Option<String>,
    #[serde(default, deserialize_with = "lenient_due_date")]
    due_date: Option<DateTime<Utc>>,
    created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    modified: Option<DateTime<Utc>>,
    #[serde(default)]
    completed: bool,
    #[serde(default = "default_priority", deserialize_with = "clamped_priority")]
    priority: u8,
}

impl Task {
    /// Creates an incomplete task carrying the default priority
    pub fn new(id: TaskId, draft: TaskDraft, created: DateTime<Utc>) -> Self {
        let draft = draft.normalized();
        Self {
            id,
            name: draft.name,
            details: draft.details,
            due_date: draft.due_date,
            created,
            modified: None,
            completed: false,
            priority: DEFAULT_PRIORITY,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    pub fn due_date(&self) -> Option<DateTime<Utc>> {
        self.due_date
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Time of the last edit, if the task was ever edited
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.modified
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// True when the due date has passed and is not on the same calendar day as `now`
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        match self.due_date {
            Some(due) => due < now && due.date_naive() != now.date_naive(),
            None => false,
        }
    }

    pub(crate) fn set_priority(&mut self, priority: u8) {
        self.priority = clamp_priority(priority as i64);
    }

    /// Replaces the user-editable fields and stamps the modification time
    pub(crate) fn apply_edit(&mut self, draft: TaskDraft, now: DateTime<Utc>) {
        let draft = draft.normalized();
        self.name = draft.name;
        self.details = draft.details;
        self.due_date = draft.due_date;
        self.modified = Some(now);
    }

    pub(crate) fn toggle_completed(&mut self) {
        self.completed = !self.completed;
    }
}

/// Colour scheme preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Theme::Light => write!(f, "light"),
            Theme::Dark => write!(f, "dark"),
        }
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(format!("unknown theme '{}', expected light or dark", other)),
        }
    }
}

/// Category of a user-facing notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A transient message for the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    /// Milliseconds until the front end should dismiss it
    pub ttl_ms: u64,
}

impl Notification {
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            ttl_ms: NOTIFICATION_TTL.as_millis() as u64,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Error, message)
    }
}

/// Everything the core tells its front ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Event {
    /// The full, ordered task list after a mutation
    Render(Vec<Task>),
    /// A rescoring pass started (`true`) or finished (`false`)
    Busy(bool),
    Notify(Notification),
}

impl Event {
    /// Name used for the server-sent event type
    pub fn name(&self) -> &'static str {
        match self {
            Event::Render(_) => "render",
            Event::Busy(_) => "busy",
            Event::Notify(_) => "notify",
        }
    }
}
