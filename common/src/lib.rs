//! 数据库连接池管理服务公共模块
//!
//! 提供配置加载、错误类型、数据模型、统一响应格式、中间件以及
//! 连接字符串编解码和凭据加密等工具。

pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod response;
pub mod utils;
