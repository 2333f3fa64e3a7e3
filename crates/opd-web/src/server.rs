//! Web服务器

use axum::{
    routing::{get, post},
    Router,
};
use opd_core::Result;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

use crate::handlers::{
    call_next, cancel_assignment, complete_assignment, create_assignment, delete_assignment, expire_assignment,
    get_assignment, health, list_waiting, metrics, room_stats, run_sweep, skip_assignment, validate_token,
    wait_time,
};
use crate::AppState;

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new(addr: SocketAddr, state: AppState, request_timeout: Duration) -> Self {
        let app = Self::create_app(state).layer(TimeoutLayer::new(request_timeout));
        Self { addr, app }
    }

    pub fn create_app(state: AppState) -> Router {
        Router::new()
            // 健康检查
            .route("/health", get(health))
            .route("/metrics", get(metrics))
            // API路由
            .nest("/api/v1/queue", queue_routes())
            .with_state(state)
            // 全局中间件
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(
                        CorsLayer::new()
                            .allow_origin(Any)
                            .allow_methods(Any)
                            .allow_headers(Any),
                    ),
            )
    }

    /// 运行直到收到关闭信号，已接受的请求处理完再退出
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!("Starting web server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Web server stopped");
        Ok(())
    }
}

/// 排队 API 路由
fn queue_routes() -> Router<AppState> {
    Router::new()
        .route("/assignments", post(create_assignment))
        .route("/assignments/:id", get(get_assignment).delete(delete_assignment))
        .route("/assignments/:id/complete", post(complete_assignment))
        .route("/assignments/:id/expire", post(expire_assignment))
        .route("/assignments/:id/skip", post(skip_assignment))
        .route("/assignments/:id/cancel", post(cancel_assignment))
        .route("/assignments/:id/wait-time", get(wait_time))
        .route("/assignments/:id/validate", get(validate_token))
        .route("/waiting", get(list_waiting))
        .route("/call-next", post(call_next))
        .route("/room-stats", post(room_stats))
        .route("/sweep", post(run_sweep))
}
