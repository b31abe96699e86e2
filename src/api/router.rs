//! HTTP router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//! REST routes live under `/api/`, the realtime stream at `/ws/subscribe`.
//!
//! Middleware stack (outermost → innermost):
//! 1. Tenant resolver → 2. Access logger

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;
use crate::api::websocket;
use crate::service::CareService;

/// Build the API router around a shared service.
///
/// Middleware uses `Extension<ApiContext>` (injected as the outermost layer).
/// Endpoint handlers use `State<ApiContext>` (provided via `with_state`).
pub fn api_router(service: Arc<CareService>) -> Router {
    build_router(ApiContext::new(service))
}

pub(crate) fn build_router(ctx: ApiContext) -> Router {
    // Tenant-scoped routes: every request carries `X-Tenant-Id`.
    //
    // NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
    let scoped = Router::new()
        .route(
            "/patients",
            get(endpoints::patients::list).post(endpoints::patients::create),
        )
        .route("/patients/:id/assignments", post(endpoints::patients::assign))
        .route("/patients/:id/tasks", get(endpoints::patients::tasks))
        .route(
            "/providers",
            get(endpoints::providers::list).post(endpoints::providers::create),
        )
        .route(
            "/protocols",
            get(endpoints::protocols::list).post(endpoints::protocols::create),
        )
        .route("/protocols/:id", get(endpoints::protocols::detail))
        .route("/tasks/:id/status", post(endpoints::tasks::update_status))
        .route(
            "/conversations",
            get(endpoints::conversations::list).post(endpoints::conversations::create),
        )
        .route(
            "/conversations/:id/status",
            post(endpoints::conversations::update_status),
        )
        .route(
            "/conversations/:id/messages",
            get(endpoints::conversations::messages).post(endpoints::conversations::send),
        )
        .route(
            "/conversations/:id/typing",
            post(endpoints::conversations::typing),
        )
        .route("/messages/:id/edit", post(endpoints::conversations::edit))
        .route("/messages/:id/read", post(endpoints::conversations::read))
        .with_state(ctx.clone())
        // Layers are applied innermost first, outermost last.
        .layer(axum::middleware::from_fn(middleware::audit::log_access))
        .layer(axum::middleware::from_fn(middleware::tenant::require_tenant))
        // Extension must be outermost so middleware can extract ApiContext
        .layer(axum::Extension(ctx.clone()));

    // No tenant yet: liveness, tenant registration and lookup.
    let unscoped = Router::new()
        .route("/health", get(endpoints::health::check))
        .route(
            "/tenants",
            get(endpoints::tenants::list).post(endpoints::tenants::create),
        )
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::audit::log_access));

    // Tenant and scope travel in the query string; checked before upgrade.
    let ws_routes = Router::new()
        .route("/ws/subscribe", get(websocket::ws_upgrade))
        .with_state(ctx);

    Router::new()
        .nest("/api", scoped)
        .nest("/api", unscoped)
        .merge(ws_routes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::api::middleware::tenant::TENANT_HEADER;
    use crate::config::ServiceConfig;

    fn test_app() -> Router {
        let service = CareService::in_memory(ServiceConfig::default()).unwrap();
        api_router(Arc::new(service))
    }

    fn make_request(
        method: &str,
        uri: &str,
        tenant: Option<&str>,
        body: Option<Value>,
    ) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(t) = tenant {
            builder = builder.header(TENANT_HEADER, t);
        }
        match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        tenant: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(make_request(method, uri, tenant, body))
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn create_tenant(app: &Router, name: &str) -> String {
        let (status, json) = call(
            app,
            "POST",
            "/api/tenants",
            None,
            Some(json!({"name": name, "kind": "clinic"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        json["id"].as_str().unwrap().to_string()
    }

    async fn create_patient(app: &Router, tenant: &str, surgery_date: Option<&str>) -> String {
        let (status, json) = call(
            app,
            "POST",
            "/api/patients",
            Some(tenant),
            Some(json!({"full_name": "Ana Silva", "surgery_date": surgery_date})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        json["id"].as_str().unwrap().to_string()
    }

    async fn create_provider(app: &Router, tenant: &str) -> String {
        let (status, json) = call(
            app,
            "POST",
            "/api/providers",
            Some(tenant),
            Some(json!({"full_name": "Dr. Okafor", "role": "surgeon"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        json["id"].as_str().unwrap().to_string()
    }

    fn knee_protocol() -> Value {
        json!({
            "name": "Knee replacement",
            "tasks": [
                {"title": "Pre-op form", "task_type": "form", "day_offset": -2},
                {
                    "title": "Ankle pumps",
                    "task_type": "exercise",
                    "day_offset": 1,
                    "recurrence": {"pattern": {"kind": "daily"}, "end_day_offset": 3}
                }
            ]
        })
    }

    #[tokio::test]
    async fn health_needs_no_tenant() {
        let app = test_app();
        let (status, json) = call(&app, "GET", "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn tenants_listed_without_header() {
        let app = test_app();
        let (status, json) = call(&app, "GET", "/api/tenants", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json.as_array().unwrap().is_empty());

        let south = create_tenant(&app, "South Hospital").await;
        let north = create_tenant(&app, "North Clinic").await;

        let (status, json) = call(&app, "GET", "/api/tenants", None, None).await;
        assert_eq!(status, StatusCode::OK);
        let listed = json.as_array().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0]["id"], north.as_str());
        assert_eq!(listed[0]["name"], "North Clinic");
        assert_eq!(listed[1]["id"], south.as_str());
    }

    #[tokio::test]
    async fn scoped_routes_require_known_tenant() {
        let app = test_app();

        let (status, json) = call(&app, "GET", "/api/patients", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"]["code"], "TENANT_REQUIRED");

        let (status, _) = call(&app, "GET", "/api/patients", Some("not-a-uuid"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let unknown = Uuid::new_v4().to_string();
        let (status, _) = call(&app, "GET", "/api/patients", Some(&unknown), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn not_found_for_unknown_route() {
        let app = test_app();
        let (status, _) = call(&app, "GET", "/api/nonexistent", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn protocol_assignment_schedules_tasks() {
        let app = test_app();
        let tenant = create_tenant(&app, "North Clinic").await;
        let patient = create_patient(&app, &tenant, Some("2024-03-10")).await;

        let (status, protocol) =
            call(&app, "POST", "/api/protocols", Some(&tenant), Some(knee_protocol())).await;
        assert_eq!(status, StatusCode::CREATED);
        let protocol_id = protocol["id"].as_str().unwrap().to_string();

        let (status, fetched) = call(
            &app,
            "GET",
            &format!("/api/protocols/{protocol_id}"),
            Some(&tenant),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["name"], "Knee replacement");

        let assign_uri = format!("/api/patients/{patient}/assignments");
        let (status, outcome) = call(
            &app,
            "POST",
            &assign_uri,
            Some(&tenant),
            Some(json!({"protocol_id": protocol_id})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        // One pre-op form plus ankle pumps on days 1, 2 and 3.
        assert_eq!(outcome["report"]["created"], 4);
        assert_eq!(outcome["assignment"]["anchor_date"], "2024-03-10");

        let (status, json) = call(
            &app,
            "POST",
            &assign_uri,
            Some(&tenant),
            Some(json!({"protocol_id": protocol_id})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"]["code"], "CONFLICT");

        let (status, tasks) = call(
            &app,
            "GET",
            &format!("/api/patients/{patient}/tasks"),
            Some(&tenant),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let tasks = tasks.as_array().unwrap();
        assert_eq!(tasks.len(), 4);
        assert_eq!(tasks[0]["scheduled_date"], "2024-03-08");
        assert_eq!(tasks[0]["title"], "Pre-op form");

        let (_, ranged) = call(
            &app,
            "GET",
            &format!("/api/patients/{patient}/tasks?from=2024-03-11&to=2024-03-12"),
            Some(&tenant),
            None,
        )
        .await;
        assert_eq!(ranged.as_array().unwrap().len(), 2);

        let task_id = tasks[0]["id"].as_str().unwrap();
        let status_uri = format!("/api/tasks/{task_id}/status");
        let (status, task) = call(
            &app,
            "POST",
            &status_uri,
            Some(&tenant),
            Some(json!({"status": "completed", "notes": "Signed"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(task["status"], "completed");
        assert_eq!(task["completion"]["notes"], "Signed");

        let (status, _) = call(
            &app,
            "POST",
            &status_uri,
            Some(&tenant),
            Some(json!({"status": "pending"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn assignment_without_anchor_is_bad_request() {
        let app = test_app();
        let tenant = create_tenant(&app, "North Clinic").await;
        let patient = create_patient(&app, &tenant, None).await;
        let (_, protocol) =
            call(&app, "POST", "/api/protocols", Some(&tenant), Some(knee_protocol())).await;

        let (status, json) = call(
            &app,
            "POST",
            &format!("/api/patients/{patient}/assignments"),
            Some(&tenant),
            Some(json!({"protocol_id": protocol["id"]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn invalid_protocol_is_bad_request() {
        let app = test_app();
        let tenant = create_tenant(&app, "North Clinic").await;
        let (status, _) = call(
            &app,
            "POST",
            "/api/protocols",
            Some(&tenant),
            Some(json!({"name": "Empty", "tasks": []})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn protocol_with_legacy_descriptor_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig {
            database_path: dir.path().join("carepath.db"),
            ..ServiceConfig::default()
        };
        let service = CareService::from_config(config.clone()).unwrap();
        let app = api_router(Arc::new(service));
        let tenant = create_tenant(&app, "North Clinic").await;

        let (status, protocol) = call(
            &app,
            "POST",
            "/api/protocols",
            Some(&tenant),
            Some(knee_protocol()),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let protocol_id = protocol["id"].as_str().unwrap().to_string();

        // An imported template row written straight to the database.
        let conn = crate::db::open_database(&config.database_path).unwrap();
        crate::db::insert_task_definition(
            &conn,
            &crate::models::TaskDefinitionRecord {
                id: Uuid::new_v4(),
                protocol_id: Uuid::parse_str(&protocol_id).unwrap(),
                title: "Monthly check-in".into(),
                task_type: crate::models::enums::TaskType::Message,
                day_offset: 30,
                recurrence: "monthly".into(),
                recurrence_end_day: Some(90),
            },
            2,
        )
        .unwrap();
        drop(conn);

        let (status, json) = call(
            &app,
            "GET",
            &format!("/api/protocols/{protocol_id}"),
            Some(&tenant),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let tasks = json["tasks"].as_array().unwrap();
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[2]["recurrence"]["pattern"]["kind"], "none");
        assert_eq!(tasks[2]["recurrence"]["end_day_offset"], 90);
        assert_eq!(tasks[2]["unrecognized_recurrence"], "monthly");
        assert!(tasks[0].get("unrecognized_recurrence").is_none());
    }

    #[tokio::test]
    async fn other_tenants_records_are_not_found() {
        let app = test_app();
        let north = create_tenant(&app, "North Clinic").await;
        let south = create_tenant(&app, "South Hospital").await;
        let patient = create_patient(&app, &north, Some("2024-03-10")).await;

        let (status, _) = call(
            &app,
            "GET",
            &format!("/api/patients/{patient}/tasks"),
            Some(&south),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, listed) = call(&app, "GET", "/api/patients", Some(&south), None).await;
        assert!(listed.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn conversation_flow() {
        let app = test_app();
        let tenant = create_tenant(&app, "North Clinic").await;
        let patient = create_patient(&app, &tenant, Some("2024-03-10")).await;
        let provider = create_provider(&app, &tenant).await;

        let (status, conversation) = call(
            &app,
            "POST",
            "/api/conversations",
            Some(&tenant),
            Some(json!({
                "patient_id": patient,
                "subject": "Swelling",
                "participants": [{"participant_id": provider, "role": "provider"}]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(conversation["participants"].as_array().unwrap().len(), 2);
        let conversation_id = conversation["id"].as_str().unwrap().to_string();
        let messages_uri = format!("/api/conversations/{conversation_id}/messages");

        let (status, _) = call(
            &app,
            "POST",
            &format!("/api/conversations/{conversation_id}/typing"),
            Some(&tenant),
            Some(json!({"user_id": patient, "is_typing": true})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, message) = call(
            &app,
            "POST",
            &messages_uri,
            Some(&tenant),
            Some(json!({"sender_id": patient, "body": "Knee is swollen"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(message["sender_role"], "patient");
        let message_id = message["id"].as_str().unwrap().to_string();

        let (status, edited) = call(
            &app,
            "POST",
            &format!("/api/messages/{message_id}/edit"),
            Some(&tenant),
            Some(json!({"editor_id": patient, "body": "Knee is very swollen"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(edited["edited"], true);

        let (status, _) = call(
            &app,
            "POST",
            &format!("/api/messages/{message_id}/edit"),
            Some(&tenant),
            Some(json!({"editor_id": provider, "body": "Not mine"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, read) = call(
            &app,
            "POST",
            &format!("/api/messages/{message_id}/read"),
            Some(&tenant),
            Some(json!({"reader_id": provider})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(read["read_by"].as_array().unwrap().len(), 1);

        let (_, listed) = call(&app, "GET", &messages_uri, Some(&tenant), None).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["body"], "Knee is very swollen");

        let (status, closed) = call(
            &app,
            "POST",
            &format!("/api/conversations/{conversation_id}/status"),
            Some(&tenant),
            Some(json!({"status": "closed"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(closed["status"], "closed");

        let (status, _) = call(
            &app,
            "POST",
            &messages_uri,
            Some(&tenant),
            Some(json!({"sender_id": provider, "body": "Too late"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
