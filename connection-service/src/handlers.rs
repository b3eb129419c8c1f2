//! Handler模块

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use common::errors::AppError;
use common::middleware::CurrentUser;
use common::models::{
    ActivateParams, ColumnSchema, ConnectionForm, ConnectionItem, CreateConnectionRequest,
    DbNameParams, ParseConnectionStringRequest, QueryHistoryEntry, QueryRequest, QueryResult,
    Record, TablesSchema, TablesSchemaRequest, TestConnectionRequest,
};
use common::response::ApiResponse;

use crate::state::AppState;

const SERVICE: &str = "connection-service";

/// 列出当前用户的数据库连接
#[utoipa::path(
    get,
    path = "/api/connections",
    tag = "connections",
    responses(
        (status = 200, description = "连接列表", body = ApiResponse<Vec<ConnectionItem>>),
        (status = 401, description = "未认证")
    )
)]
pub async fn list_connections(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<Vec<ConnectionItem>>>, AppError> {
    let data = state.service.list(user.id()).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE)))
}

/// 创建新的数据库连接
#[utoipa::path(
    post,
    path = "/api/connections",
    tag = "connections",
    request_body = CreateConnectionRequest,
    responses(
        (status = 200, description = "连接已创建", body = ApiResponse<ConnectionItem>),
        (status = 400, description = "连接串无效"),
        (status = 409, description = "重复连接")
    )
)]
pub async fn create_connection(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateConnectionRequest>,
) -> Result<Json<ApiResponse<ConnectionItem>>, AppError> {
    let data = state.service.create(user.id(), req).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE)))
}

/// 根据 ID 获取数据库连接
#[utoipa::path(
    get,
    path = "/api/connections/{id}",
    tag = "connections",
    params(
        ("id" = String, Path, description = "连接 ID")
    ),
    responses(
        (status = 200, description = "连接详情", body = ApiResponse<ConnectionItem>),
        (status = 404, description = "连接未找到")
    )
)]
pub async fn get_connection(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<ConnectionItem>>, AppError> {
    let data = state.service.get(user.id(), &id).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE)))
}

/// 根据 ID 删除数据库连接
#[utoipa::path(
    delete,
    path = "/api/connections/{id}",
    tag = "connections",
    params(
        ("id" = String, Path, description = "连接 ID")
    ),
    responses(
        (status = 200, description = "连接已删除", body = ApiResponse<bool>),
        (status = 404, description = "连接未找到")
    )
)]
pub async fn delete_connection(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<bool>>, AppError> {
    state.service.delete(user.id(), &id).await?;
    Ok(Json(ApiResponse::ok_with_service(true, SERVICE)))
}

/// 测试数据库连接（不保存）
#[utoipa::path(
    post,
    path = "/api/connections/test",
    tag = "connections",
    request_body = TestConnectionRequest,
    responses(
        (status = 200, description = "连接测试结果", body = ApiResponse<ConnectionTestResult>)
    )
)]
pub async fn test_connection(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(req): Json<TestConnectionRequest>,
) -> Result<Json<ApiResponse<ConnectionTestResult>>, AppError> {
    let result = match state.service.test(req).await {
        Ok(latency_ms) => ConnectionTestResult {
            success: true,
            latency_ms: Some(latency_ms),
            error: None,
        },
        Err(e) => ConnectionTestResult {
            success: false,
            latency_ms: None,
            error: Some(e.to_string()),
        },
    };
    Ok(Json(ApiResponse::ok_with_service(result, SERVICE)))
}

/// 解析连接串
#[utoipa::path(
    post,
    path = "/api/connection-strings/parse",
    tag = "connections",
    request_body = ParseConnectionStringRequest,
    responses(
        (status = 200, description = "解析结果（不含密码）", body = ApiResponse<ConnectionForm>),
        (status = 400, description = "连接串格式错误")
    )
)]
pub async fn parse_connection_string(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(req): Json<ParseConnectionStringRequest>,
) -> Result<Json<ApiResponse<ConnectionForm>>, AppError> {
    let data = state.service.parse(req).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE)))
}

/// 激活连接池
#[utoipa::path(
    post,
    path = "/api/connections/{id}/activate",
    tag = "pools",
    params(
        ("id" = String, Path, description = "连接 ID"),
        ActivateParams
    ),
    responses(
        (status = 200, description = "连接池已激活", body = ApiResponse<bool>),
        (status = 404, description = "连接未找到"),
        (status = 502, description = "无法连接数据库")
    )
)]
pub async fn activate_connection(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Query(params): Query<ActivateParams>,
) -> Result<Json<ApiResponse<bool>>, AppError> {
    state.service.activate(user.id(), &id, params.db_type).await?;
    Ok(Json(ApiResponse::ok_with_service(true, SERVICE)))
}

/// 关闭连接池
#[utoipa::path(
    post,
    path = "/api/connections/{id}/deactivate",
    tag = "pools",
    params(
        ("id" = String, Path, description = "连接 ID")
    ),
    responses(
        (status = 200, description = "连接池已关闭", body = ApiResponse<bool>),
        (status = 404, description = "连接未找到")
    )
)]
pub async fn deactivate_connection(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<bool>>, AppError> {
    state.service.deactivate(user.id(), &id).await?;
    Ok(Json(ApiResponse::ok_with_service(true, SERVICE)))
}

/// 关闭当前用户的所有连接池
#[utoipa::path(
    post,
    path = "/api/connections/deactivate-all",
    tag = "pools",
    responses(
        (status = 200, description = "已关闭的连接池数量", body = ApiResponse<usize>)
    )
)]
pub async fn deactivate_all(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<usize>>, AppError> {
    let closed = state.service.deactivate_all(user.id()).await?;
    Ok(Json(ApiResponse::ok_with_service(closed, SERVICE)))
}

/// 列出表（MongoDB 为集合）
#[utoipa::path(
    get,
    path = "/api/connections/{id}/tables",
    tag = "pools",
    params(
        ("id" = String, Path, description = "连接 ID"),
        DbNameParams
    ),
    responses(
        (status = 200, description = "表名列表", body = ApiResponse<Vec<String>>),
        (status = 404, description = "连接池未激活")
    )
)]
pub async fn list_tables(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Query(params): Query<DbNameParams>,
) -> Result<Json<ApiResponse<Vec<String>>>, AppError> {
    let data = state
        .service
        .list_tables(user.id(), &id, params.db_name.as_deref())
        .await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE)))
}

/// 获取表结构
#[utoipa::path(
    get,
    path = "/api/connections/{id}/tables/{table}/schema",
    tag = "pools",
    params(
        ("id" = String, Path, description = "连接 ID"),
        ("table" = String, Path, description = "表名"),
        DbNameParams
    ),
    responses(
        (status = 200, description = "列结构", body = ApiResponse<Vec<ColumnSchema>>),
        (status = 400, description = "表不存在"),
        (status = 404, description = "连接池未激活")
    )
)]
pub async fn get_table_schema(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((id, table)): Path<(String, String)>,
    Query(params): Query<DbNameParams>,
) -> Result<Json<ApiResponse<Vec<ColumnSchema>>>, AppError> {
    let data = state
        .service
        .table_schema(user.id(), &id, &table, params.db_name.as_deref())
        .await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE)))
}

/// 获取表记录
#[utoipa::path(
    get,
    path = "/api/connections/{id}/tables/{table}/records",
    tag = "pools",
    params(
        ("id" = String, Path, description = "连接 ID"),
        ("table" = String, Path, description = "表名"),
        DbNameParams
    ),
    responses(
        (status = 200, description = "表记录", body = ApiResponse<TableRecords>),
        (status = 400, description = "表不存在"),
        (status = 404, description = "连接池未激活")
    )
)]
pub async fn get_table_records(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((id, table)): Path<(String, String)>,
    Query(params): Query<DbNameParams>,
) -> Result<Json<ApiResponse<TableRecords>>, AppError> {
    let records = state
        .service
        .table_records(user.id(), &id, &table, params.db_name.as_deref())
        .await?;
    Ok(Json(ApiResponse::ok_with_service(
        TableRecords {
            count: records.len(),
            records,
        },
        SERVICE,
    )))
}

/// 批量获取表结构
#[utoipa::path(
    post,
    path = "/api/connections/{id}/schemas",
    tag = "pools",
    params(
        ("id" = String, Path, description = "连接 ID")
    ),
    request_body = TablesSchemaRequest,
    responses(
        (status = 200, description = "表结构及失败表", body = ApiResponse<TablesSchema>),
        (status = 404, description = "连接池未激活")
    )
)]
pub async fn get_tables_schema(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<TablesSchemaRequest>,
) -> Result<Json<ApiResponse<TablesSchema>>, AppError> {
    let data = state.service.tables_schema(user.id(), &id, req).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE)))
}

/// 执行查询
#[utoipa::path(
    post,
    path = "/api/connections/{id}/query",
    tag = "pools",
    params(
        ("id" = String, Path, description = "连接 ID")
    ),
    request_body = QueryRequest,
    responses(
        (status = 200, description = "查询结果", body = ApiResponse<QueryResult>),
        (status = 400, description = "查询失败"),
        (status = 404, description = "连接池未激活"),
        (status = 504, description = "查询超时")
    )
)]
pub async fn run_query(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<ApiResponse<QueryResult>>, AppError> {
    let data = state.service.run_query(user.id(), &id, req).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE)))
}

/// 获取连接的查询历史
#[utoipa::path(
    get,
    path = "/api/connections/{id}/history",
    tag = "connections",
    params(
        ("id" = String, Path, description = "连接 ID")
    ),
    responses(
        (status = 200, description = "查询历史（最新在前）", body = ApiResponse<Vec<QueryHistoryEntry>>),
        (status = 404, description = "连接未找到")
    )
)]
pub async fn get_query_history(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<QueryHistoryEntry>>>, AppError> {
    let data = state.service.query_history(user.id(), &id).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE)))
}

/// 健康检查端点
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "服务运行正常", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.config.service_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        active_pools: state.pool_manager.active_count().await,
    })
}

/// 连接测试结果
#[derive(Serialize, ToSchema)]
pub struct ConnectionTestResult {
    /// 测试是否成功
    pub success: bool,
    /// 连接延迟（毫秒）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// 错误信息（如果测试失败）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 表记录
#[derive(Serialize, ToSchema)]
pub struct TableRecords {
    #[schema(value_type = Vec<Object>)]
    pub records: Vec<Record>,
    pub count: usize,
}

/// 健康检查响应
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// 服务状态
    pub status: String,
    /// 服务名称
    pub service: String,
    /// 服务版本
    pub version: String,
    /// 当前时间戳
    pub timestamp: DateTime<Utc>,
    /// 活跃连接池数量
    pub active_pools: usize,
}
