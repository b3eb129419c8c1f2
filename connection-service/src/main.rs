//! 数据库连接池管理服务
//!
//! 提供数据库连接管理功能，包括：
//! - 连接的创建、列出、删除（连接串加密保存）
//! - 连接池的激活、关闭与过期回收
//! - 通过活跃连接池查看表结构、记录以及执行查询

mod drivers;
mod handlers;
mod pool_manager;
mod routes;
mod scheduler;
mod service;
mod state;
mod store;

use std::sync::Arc;

use anyhow::Context;
use axum::{middleware, routing::get, Json, Router};
use common::config::AppConfig;
use common::middleware::request_id::request_id_middleware;
use state::AppState;
use store::{ConnectionStore, InMemoryConnectionStore, MySqlConnectionStore};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

const SERVICE_NAME: &str = "connection-service";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "连接服务 API",
        version = "0.1.0",
        description = "数据库连接池管理与多后端驱动服务"
    ),
    paths(
        handlers::health_check,
        handlers::list_connections,
        handlers::create_connection,
        handlers::get_connection,
        handlers::delete_connection,
        handlers::test_connection,
        handlers::parse_connection_string,
        handlers::activate_connection,
        handlers::deactivate_connection,
        handlers::deactivate_all,
        handlers::list_tables,
        handlers::get_table_schema,
        handlers::get_table_records,
        handlers::get_tables_schema,
        handlers::run_query,
        handlers::get_query_history,
    ),
    components(schemas(
        common::models::ColumnSchema,
        common::models::ConnectionForm,
        common::models::ConnectionItem,
        common::models::CreateConnectionRequest,
        common::models::DbType,
        common::models::ParseConnectionStringRequest,
        common::models::QueryHistoryEntry,
        common::models::QueryRequest,
        common::models::QueryResult,
        common::models::TablesSchema,
        common::models::TablesSchemaRequest,
        common::models::TestConnectionRequest,
        handlers::ConnectionTestResult,
        handlers::HealthResponse,
        handlers::TableRecords,
    )),
    tags(
        (name = "connections", description = "连接管理端点"),
        (name = "pools", description = "连接池与数据访问端点"),
        (name = "health", description = "健康检查端点")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file (if present) before anything else
    load_dotenv();

    // 初始化日志追踪
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // 加载配置（密钥无效时直接退出）
    let config = AppConfig::load_with_service(SERVICE_NAME).context("invalid configuration")?;

    // 连接元数据存储
    let store: Arc<dyn ConnectionStore> = match config.database_url.as_deref() {
        Some(url) => Arc::new(
            MySqlConnectionStore::connect(url)
                .await
                .context("failed to initialize metadata store (check DATABASE_URL)")?,
        ),
        None => {
            warn!("DATABASE_URL not set, connections are kept in memory only");
            Arc::new(InMemoryConnectionStore::new())
        }
    };

    let state = AppState::new(config.clone(), store);
    let cleanup = scheduler::spawn_cleanup(state.pool_manager.clone(), config.cleanup_interval);

    // 创建路由
    let app = create_router(state.clone());

    // 启动服务
    let addr = format!("{}:{}", config.host, config.port);
    info!(service = SERVICE_NAME, address = %addr, "启动服务");

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("绑定地址失败: {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("服务运行失败")?;

    cleanup.abort();
    state.pool_manager.shutdown_all().await;
    info!(service = SERVICE_NAME, "服务已停止");
    Ok(())
}

fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::router())
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}

/// Load .env file from the working directory (best-effort, no error if missing).
fn load_dotenv() {
    let env_path = std::path::Path::new(".env");
    if env_path.exists() {
        if let Ok(content) = std::fs::read_to_string(env_path) {
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    let key = key.trim();
                    let value = value.trim();
                    // Only set if not already set by the environment
                    if std::env::var(key).is_err() {
                        std::env::set_var(key, value);
                    }
                }
            }
        }
    }
}
