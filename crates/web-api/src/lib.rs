//! Web API 层。
//!
//! 提供 Axum 路由：会话创建、WebSocket 接入、在线成员查询和运行统计，
//! 业务逻辑委托给应用层的服务和 Hub。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{Claims, JwtService};
pub use config::JwtConfig;
pub use error::{ApiError, ErrorBody};
pub use routes::router;
pub use state::AppState;
