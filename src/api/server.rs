//! API Server module
//!
//! This module provides the HTTP front end for taskrank: JSON endpoints for
//! every list intent plus a server-sent event stream of render, busy and
//! notification events.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::controller::{ControllerError, TaskList};
use crate::credential::CredentialError;
use crate::models::{Event, TaskDraft, TaskId, Theme};

/// Request to store a new API key
#[derive(Serialize, Deserialize)]
pub struct CredentialRequest {
    pub key: String,
}

/// Whether an API key is stored; the key itself is never returned
#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialStatus {
    pub configured: bool,
}

/// Request to change the theme preference
#[derive(Serialize, Deserialize)]
pub struct ThemeRequest {
    pub theme: Theme,
}

/// Current theme preference, `null` when never set
#[derive(Debug, Serialize, Deserialize)]
pub struct ThemeResponse {
    pub theme: Option<Theme>,
}

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub address: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 3000).into(),
        }
    }
}

/// API responses
#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

fn error_status(error: &ControllerError) -> StatusCode {
    match error {
        ControllerError::EmptyName => StatusCode::BAD_REQUEST,
        ControllerError::Credential(CredentialError::Empty)
        | ControllerError::Credential(CredentialError::InvalidFormat) => StatusCode::BAD_REQUEST,
        ControllerError::MissingCredential => StatusCode::PRECONDITION_FAILED,
        ControllerError::Busy => StatusCode::CONFLICT,
        ControllerError::Credential(CredentialError::Store(_)) | ControllerError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Helper function to map controller results to Axum responses
fn respond<T: Serialize>(status: StatusCode, result: Result<T, ControllerError>) -> Response {
    match result {
        Ok(data) => (status, Json(ApiResponse::success(data))).into_response(),
        Err(e) => (
            error_status(&e),
            Json(ApiResponse::<T>::error(e.to_string())),
        )
            .into_response(),
    }
}

/// Like `respond`, with `None` mapped to 404
fn respond_found<T: Serialize>(id: TaskId, result: Result<Option<T>, ControllerError>) -> Response {
    match result {
        Ok(Some(data)) => (StatusCode::OK, Json(ApiResponse::success(data))).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<T>::error(format!("Task {} not found", id))),
        )
            .into_response(),
        Err(e) => respond::<T>(StatusCode::OK, Err(e)),
    }
}

/// Builds the application router
pub fn router(list: Arc<TaskList>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // --- Tasks --- //
        .route("/api/tasks", get(list_tasks).post(add_task))
        .route("/api/tasks/:id", put(edit_task).delete(delete_task))
        .route("/api/tasks/:id/toggle", post(toggle_task))
        // --- Preferences --- //
        .route(
            "/api/credential",
            get(credential_status)
                .put(set_credential)
                .delete(clear_credential),
        )
        .route("/api/theme", get(get_theme).put(set_theme))
        // --- Events --- //
        .route("/api/events", get(events_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(list)
}

/// Start the API server
pub async fn serve(list: Arc<TaskList>, config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(list);

    tracing::info!("Starting server on {}", config.address);
    let listener = TcpListener::bind(config.address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn list_tasks(State(list): State<Arc<TaskList>>) -> Response {
    respond(StatusCode::OK, list.load().await)
}

async fn add_task(State(list): State<Arc<TaskList>>, Json(draft): Json<TaskDraft>) -> Response {
    respond(StatusCode::CREATED, list.add(draft).await)
}

async fn edit_task(
    State(list): State<Arc<TaskList>>,
    Path(id): Path<i64>,
    Json(draft): Json<TaskDraft>,
) -> Response {
    let id = TaskId::new(id);
    respond_found(id, list.edit(id, draft).await)
}

async fn delete_task(State(list): State<Arc<TaskList>>, Path(id): Path<i64>) -> Response {
    let id = TaskId::new(id);
    respond_found(id, list.delete(id).await)
}

async fn toggle_task(State(list): State<Arc<TaskList>>, Path(id): Path<i64>) -> Response {
    let id = TaskId::new(id);
    respond_found(id, list.toggle_complete(id).await)
}

async fn credential_status(State(list): State<Arc<TaskList>>) -> Response {
    let result = list
        .has_credential()
        .await
        .map(|configured| CredentialStatus { configured });
    respond(StatusCode::OK, result)
}

async fn set_credential(
    State(list): State<Arc<TaskList>>,
    Json(request): Json<CredentialRequest>,
) -> Response {
    let result = list
        .set_credential(&request.key)
        .await
        .map(|_| CredentialStatus { configured: true });
    respond(StatusCode::OK, result)
}

async fn clear_credential(State(list): State<Arc<TaskList>>) -> Response {
    let result = list
        .clear_credential()
        .await
        .map(|_| CredentialStatus { configured: false });
    respond(StatusCode::OK, result)
}

async fn get_theme(State(list): State<Arc<TaskList>>) -> Response {
    let result = list.theme().await.map(|theme| ThemeResponse { theme });
    respond(StatusCode::OK, result)
}

async fn set_theme(State(list): State<Arc<TaskList>>, Json(request): Json<ThemeRequest>) -> Response {
    let result = list.set_theme(request.theme).await.map(|_| ThemeResponse {
        theme: Some(request.theme),
    });
    respond(StatusCode::OK, result)
}

/// Formats one event as a server-sent event frame
fn sse_frame(event: &Event) -> String {
    match serde_json::to_string(event) {
        Ok(data) => format!("event: {}\ndata: {}\n\n", event.name(), data),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode event");
            format!(": dropped {} event\n\n", event.name())
        }
    }
}

async fn events_handler(State(list): State<Arc<TaskList>>) -> impl IntoResponse {
    let receiver = list.subscribe();
    let stream = futures::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => return Some((Ok::<_, Infallible>(sse_frame(&event)), receiver)),
                Err(RecvError::Lagged(skipped)) => {
                    // The next render carries the full list anyway
                    tracing::warn!(skipped, "event stream lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    let headers = [
        (
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream"),
        ),
        (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
    ];

    (headers, Body::from_stream(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Notification, Task};
    use crate::oracle::testing::{FnBackend, VALID_KEY};
    use crate::store::MemoryStore;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use pretty_assertions::assert_eq;
    use serde::de::DeserializeOwned;
    use serde_json::json;
    use tower::ServiceExt;

    fn setup_test_app() -> (Arc<TaskList>, Router) {
        let backend = Arc::new(FnBackend::new(|_| Ok("7".to_string())));
        let list = Arc::new(TaskList::new(Arc::new(MemoryStore::new()), backend));
        (list.clone(), router(list))
    }

    // Helper to make requests and deserialize the JSON envelope
    async fn request_json<T: DeserializeOwned + Serialize>(
        app: &Router,
        method: &str,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, ApiResponse<T>) {
        let body = if body.is_null() {
            Body::empty()
        } else {
            Body::from(body.to_string())
        };
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("Content-Type", "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
        let envelope = serde_json::from_slice::<ApiResponse<T>>(&body_bytes).unwrap_or_else(|e| {
            panic!(
                "bad envelope ({}): {}",
                e,
                String::from_utf8_lossy(&body_bytes)
            )
        });
        (status, envelope)
    }

    #[tokio::test]
    async fn test_add_requires_credential() {
        let (list, app) = setup_test_app();

        let (status, resp) =
            request_json::<Task>(&app, "POST", "/api/tasks", json!({"name": "Fix prod outage"}))
                .await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert!(!resp.success);
        assert!(list.tasks().await.unwrap().is_empty());

        let (status, resp) = request_json::<CredentialStatus>(
            &app,
            "PUT",
            "/api/credential",
            json!({ "key": VALID_KEY }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(resp.data.unwrap().configured);

        let (status, resp) = request_json::<Task>(
            &app,
            "POST",
            "/api/tasks",
            json!({"name": "Fix prod outage", "details": "users are blocked"}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let task = resp.data.unwrap();
        assert_eq!(task.name(), "Fix prod outage");
        assert_eq!(task.priority(), 7);

        let (status, resp) = request_json::<Vec<Task>>(&app, "GET", "/api/tasks", json!(null)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp.data.unwrap(), vec![task]);
    }

    #[tokio::test]
    async fn test_input_errors_are_bad_requests() {
        let (list, app) = setup_test_app();

        let (status, resp) =
            request_json::<CredentialStatus>(&app, "PUT", "/api/credential", json!({"key": "abc"}))
                .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            resp.error.as_deref(),
            Some("Invalid API key format. Please check your key.")
        );

        list.set_credential(VALID_KEY).await.unwrap();
        let (status, resp) =
            request_json::<Task>(&app, "POST", "/api/tasks", json!({"name": "   "})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(resp.error.as_deref(), Some("Please enter a task name"));
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let (list, app) = setup_test_app();
        list.set_credential(VALID_KEY).await.unwrap();

        let (status, _) =
            request_json::<Task>(&app, "PUT", "/api/tasks/42", json!({"name": "Renamed"})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = request_json::<Task>(&app, "DELETE", "/api/tasks/42", json!(null)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, resp) =
            request_json::<Task>(&app, "POST", "/api/tasks/42/toggle", json!(null)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(resp.error.as_deref(), Some("Task 42 not found"));
    }

    #[tokio::test]
    async fn test_edit_toggle_delete_flow() {
        let (list, app) = setup_test_app();
        list.set_credential(VALID_KEY).await.unwrap();
        let task = list.add(TaskDraft::new("Draft report")).await.unwrap();
        let uri = format!("/api/tasks/{}", task.id());

        let (status, resp) =
            request_json::<Task>(&app, "PUT", &uri, json!({"name": "Final report"})).await;
        assert_eq!(status, StatusCode::OK);
        let edited = resp.data.unwrap();
        assert_eq!(edited.name(), "Final report");
        assert!(edited.modified().is_some());

        let (status, resp) =
            request_json::<Task>(&app, "POST", &format!("{}/toggle", uri), json!(null)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(resp.data.unwrap().is_completed());

        let (status, resp) = request_json::<Task>(&app, "DELETE", &uri, json!(null)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp.data.unwrap().id(), task.id());
        assert!(list.tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_theme_endpoints() {
        let (_list, app) = setup_test_app();

        let (_, resp) = request_json::<ThemeResponse>(&app, "GET", "/api/theme", json!(null)).await;
        assert_eq!(resp.data.unwrap().theme, None);

        let (status, _) =
            request_json::<ThemeResponse>(&app, "PUT", "/api/theme", json!({"theme": "dark"})).await;
        assert_eq!(status, StatusCode::OK);

        let (_, resp) = request_json::<ThemeResponse>(&app, "GET", "/api/theme", json!(null)).await;
        assert_eq!(resp.data.unwrap().theme, Some(Theme::Dark));
    }

    #[tokio::test]
    async fn test_credential_status_never_echoes_key() {
        let (list, app) = setup_test_app();
        list.set_credential(VALID_KEY).await.unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/credential")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("\"configured\":true"));
        assert!(!text.contains(VALID_KEY));

        let (_, resp) =
            request_json::<CredentialStatus>(&app, "DELETE", "/api/credential", json!(null)).await;
        assert!(!resp.data.unwrap().configured);
        assert!(!list.has_credential().await.unwrap());
    }

    #[test]
    fn test_sse_frame_format() {
        let frame = sse_frame(&Event::Notify(Notification::info("API key cleared")));
        assert!(frame.starts_with("event: notify\ndata: {"));
        assert!(frame.contains("\"message\":\"API key cleared\""));
        assert!(frame.ends_with("\n\n"));

        assert_eq!(
            sse_frame(&Event::Busy(true)),
            "event: busy\ndata: {\"type\":\"busy\",\"data\":true}\n\n"
        );
    }
}
