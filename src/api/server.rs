use anyhow::Result;
use axum::{routing::get, Router};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::api::handlers;
use crate::engine::{LivenessRegistry, SharedDisplay};
use crate::types::DisplayZone;

#[derive(Clone)]
pub struct AppState {
    pub registry: LivenessRegistry,
    pub display: SharedDisplay,
    pub zone: DisplayZone,
    pub staleness_threshold: Duration,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/nodes", get(handlers::list_nodes))
        .route("/nodes/:node_id", get(handlers::get_node))
        .route("/events", get(handlers::list_events))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16, shutdown: CancellationToken) -> Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    log::info!("Fleetwatch API listening on port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::engine::{DisplayBuffer, LivenessRegistry};
    use crate::types::{EnvelopeFactory, NodeIdentity, NodeStatus, Severity};

    fn create_test_app() -> (Router, AppState) {
        let state = AppState {
            registry: LivenessRegistry::new(),
            display: DisplayBuffer::new(100, None).shared(),
            zone: "+05:30".parse().unwrap(),
            staleness_threshold: Duration::from_secs(10),
        };
        (create_router(state.clone()), state)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _) = create_test_app();
        let (status, json) = get_json(app, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
    }

    #[tokio::test]
    async fn test_nodes_listing_and_lookup() {
        let (app, state) = create_test_app();
        let factory = EnvelopeFactory::new(NodeIdentity::fixed("UserService_0001", "UserProfileService"));
        state.registry.observe(&factory.heartbeat(NodeStatus::Up)).await;

        let (status, json) = get_json(app.clone(), "/nodes").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0]["node_id"], "UserService_0001");
        assert_eq!(json[0]["declared_status"], "UP");
        assert_eq!(json[0]["stale"], false);
        assert!(json[0]["last_heartbeat_at"].as_str().unwrap().ends_with("+05:30"));

        let (status, json) = get_json(app.clone(), "/nodes/UserService_0001").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["service_name"], "UserProfileService");

        let (status, json) = get_json(app, "/nodes/nobody").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["error"].as_str().unwrap().contains("nobody"));
    }

    #[tokio::test]
    async fn test_events_in_display_zone() {
        let (app, state) = create_test_app();
        let factory = EnvelopeFactory::new(NodeIdentity::fixed("N2", "PaymentGatewayService"));
        {
            let mut display = state.display.write().await;
            for message in ["first", "second", "third"] {
                let envelope = factory.log(Severity::Info, message, serde_json::Map::new());
                display.push(envelope, chrono::Utc::now());
            }
        }

        let (status, json) = get_json(app.clone(), "/events?limit=2").await;
        assert_eq!(status, StatusCode::OK);
        let events = json.as_array().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["message"], "second");
        assert_eq!(events[1]["message"], "third");
        assert!(events[1]["timestamp"].as_str().unwrap().ends_with("+05:30"));
        assert!(events[1]["line"].as_str().unwrap().starts_with("[INFO] "));

        let (status, _) = get_json(app, "/events?limit=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
