//! 连接服务路由模块

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{
    activate_connection, create_connection, deactivate_all, deactivate_connection,
    delete_connection, get_connection, get_query_history, get_table_records, get_table_schema,
    get_tables_schema, health_check, list_connections, list_tables, parse_connection_string,
    run_query, test_connection,
};
use crate::state::AppState;

/// 创建连接管理路由
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/connections", get(list_connections).post(create_connection))
        .route("/api/connections/test", post(test_connection))
        .route("/api/connections/deactivate-all", post(deactivate_all))
        .route("/api/connection-strings/parse", post(parse_connection_string))
        .route("/api/connections/{id}", get(get_connection).delete(delete_connection))
        .route("/api/connections/{id}/activate", post(activate_connection))
        .route("/api/connections/{id}/deactivate", post(deactivate_connection))
        .route("/api/connections/{id}/tables", get(list_tables))
        .route("/api/connections/{id}/tables/{table}/schema", get(get_table_schema))
        .route("/api/connections/{id}/tables/{table}/records", get(get_table_records))
        .route("/api/connections/{id}/schemas", post(get_tables_schema))
        .route("/api/connections/{id}/query", post(run_query))
        .route("/api/connections/{id}/history", get(get_query_history))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use common::config::AppConfig;
    use common::middleware::USER_ID_HEADER;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::store::InMemoryConnectionStore;

    fn app() -> Router {
        let config = AppConfig::from_lookup("connection-service", |key| match key {
            "ENCRYPTION_KEY" => Some("KioqKioqKioqKioqKioqKioqKioqKioqKioqKioqKio=".into()),
            _ => None,
        })
        .unwrap();
        let state = AppState::new(config, Arc::new(InMemoryConnectionStore::new()));
        router().with_state(state)
    }

    async fn send(app: &Router, method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_ID_HEADER, user);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health_needs_no_identity() {
        let app = app();
        let (status, body) = send(&app, "GET", "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["active_pools"], 0);
    }

    #[tokio::test]
    async fn test_missing_identity_is_rejected() {
        let app = app();
        let (status, body) = send(&app, "GET", "/api/connections", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_parse_omits_password() {
        let app = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/connection-strings/parse",
            Some("u1"),
            Some(json!({ "db_type": "postgres", "conn_string": "postgresql://app:pw@db/shop?sslmode=require" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let form = &body["data"];
        assert_eq!(form["host"], "db");
        assert_eq!(form["port"], 5432);
        assert_eq!(form["ssl"], true);
        assert!(form.get("password").is_none());
    }

    #[tokio::test]
    async fn test_records_through_activated_pool() {
        let app = app();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.db").to_str().unwrap().to_string();

        let seeded = crate::drivers::DatabasePool::open(
            common::models::DbType::SQLite,
            &path,
            &Default::default(),
        )
        .await
        .unwrap();
        seeded
            .run_query(None, "CREATE TABLE t (a INTEGER PRIMARY KEY, b TEXT)")
            .await
            .unwrap();
        seeded
            .run_query(None, "INSERT INTO t VALUES (1, 'x')")
            .await
            .unwrap();
        seeded.close().await;

        let (status, created) = send(
            &app,
            "POST",
            "/api/connections",
            Some("u1"),
            Some(json!({ "name": "local", "db_type": "sqlite", "conn_string": path })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = created["data"]["id"].as_str().unwrap().to_string();

        let records_uri = format!("/api/connections/{id}/tables/t/records");
        let (status, body) = send(&app, "GET", &records_uri, Some("u1"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "POOL_NOT_FOUND");

        let activate_uri = format!("/api/connections/{id}/activate?db_type=sqlite");
        let (status, _) = send(&app, "POST", &activate_uri, Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, "GET", &records_uri, Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["records"], json!([{ "a": 1, "b": "x" }]));

        // Another user cannot see the pool.
        let (status, _) = send(&app, "GET", &records_uri, Some("u2"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &app,
            "GET",
            &format!("/api/connections/{id}/tables/missing/schema"),
            Some("u1"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_IDENTIFIER");

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/connections/{id}/query"),
            Some("u1"),
            Some(json!({ "query": "SELEC nonsense" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "QUERY_FAILED");

        let history_uri = format!("/api/connections/{id}/history");
        let (status, body) = send(&app, "GET", &history_uri, Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["query"], "SELEC nonsense");
        assert_eq!(body["data"][0]["success"], false);
        let (status, _) = send(&app, "GET", &history_uri, Some("u2"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, "POST", "/api/connections/deactivate-all", Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], 1);
    }

    #[tokio::test]
    async fn test_get_connection_by_id() {
        let app = app();
        let (status, created) = send(
            &app,
            "POST",
            "/api/connections",
            Some("u1"),
            Some(json!({
                "name": "pg",
                "db_type": "postgres",
                "conn_string": "postgres://app:pw@db.internal:6543/shop?sslmode=require"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = created["data"]["id"].as_str().unwrap().to_string();
        let uri = format!("/api/connections/{id}");

        let (status, body) = send(&app, "GET", &uri, Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["id"], id.as_str());
        assert_eq!(body["data"]["host"], "db.internal");
        assert_eq!(body["data"]["port"], 6543);
        assert!(body["data"].get("encrypted_conn_string").is_none());

        let (status, body) = send(&app, "GET", &uri, Some("u2"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "CONNECTION_NOT_FOUND");

        let (status, _) = send(&app, "DELETE", &uri, Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "GET", &uri, Some("u1"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
