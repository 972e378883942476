use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use switchboard_ami::LinkState;
use switchboard_db::DbPool;
use tokio::sync::watch;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    link_state: watch::Receiver<LinkState>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub manager: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, link_state: watch::Receiver<LinkState>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, link_state })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let manager = manager_check(*state.link_state.borrow());
    let ready = database.status == "ready" && manager.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        manager,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match switchboard_db::ping(pool).await {
        Ok(()) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

fn manager_check(state: LinkState) -> HealthCheck {
    let status = if state == LinkState::Authenticated { "ready" } else { "degraded" };
    HealthCheck { status, detail: format!("manager link {}", state.as_str()) }
}

#[cfg(test)]
mod tests {
    use axum::{extract::State, http::StatusCode, Json};
    use switchboard_ami::LinkState;
    use switchboard_db::connect_with_settings;
    use tokio::sync::watch;

    use crate::health::{health, HealthState};

    #[tokio::test]
    async fn health_is_ready_with_database_and_authenticated_link() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        let (_link, link_state) = watch::channel(LinkState::Authenticated);

        let (status, Json(payload)) =
            health(State(HealthState { db_pool: pool.clone(), link_state })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.manager.detail, "manager link authenticated");

        pool.close().await;
    }

    #[tokio::test]
    async fn health_degrades_while_the_link_reconnects() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        let (_link, link_state) = watch::channel(LinkState::Connecting);

        let (status, Json(payload)) =
            health(State(HealthState { db_pool: pool.clone(), link_state })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.manager.status, "degraded");

        pool.close().await;
    }

    #[tokio::test]
    async fn health_degrades_when_the_database_is_closed() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        pool.close().await;
        let (_link, link_state) = watch::channel(LinkState::Authenticated);

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool, link_state })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.database.status, "degraded");
    }
}
