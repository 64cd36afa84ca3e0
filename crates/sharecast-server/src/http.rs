//! HTTP room discovery.
//!
//! - `GET /rooms` - every room as `{id, users, is_being_shared, sharer_id}`
//! - `GET /room/:id` - one room, or `{}` if it does not exist

use axum::extract::{Path, State};
use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::registry::{RoomSnapshot, SharedRegistry};

/// Build the discovery router. An empty `cors_origin` allows any origin.
pub fn build_router(registry: SharedRegistry, cors_origin: &str) -> Router {
    Router::new()
        .route("/rooms", get(list_rooms))
        .route("/room/:id", get(get_room))
        .layer(cors_layer(cors_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

pub async fn serve(listener: TcpListener, router: Router) -> std::io::Result<()> {
    axum::serve(listener, router).await
}

fn cors_layer(origin: &str) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods([Method::GET]);
    if origin.is_empty() {
        return cors.allow_origin(Any);
    }
    match origin.parse::<HeaderValue>() {
        Ok(value) => cors.allow_origin(value),
        Err(e) => {
            tracing::warn!(origin, error = %e, "Invalid CORS origin, allowing any");
            cors.allow_origin(Any)
        }
    }
}

async fn list_rooms(State(registry): State<SharedRegistry>) -> Json<Vec<RoomSnapshot>> {
    Json(registry.read().await.snapshot())
}

async fn get_room(State(registry): State<SharedRegistry>, Path(id): Path<String>) -> Json<Value> {
    let snapshot = registry.read().await.room_snapshot(&id);
    match snapshot.and_then(|s| serde_json::to_value(s).ok()) {
        Some(value) => Json(value),
        None => Json(json!({})),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use sharecast_common::ConnectionId;
    use tower::ServiceExt;

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn populated() -> SharedRegistry {
        let shared = registry::shared();
        {
            let mut reg = shared.write().await;
            reg.get_or_create("r1");
            reg.add_user("r1", "a", &ConnectionId::from("a"));
            reg.add_user("r1", "b", &ConnectionId::from("b"));
            reg.room_mut("r1").unwrap().start_sharing("a");
            reg.get_or_create("r2");
            reg.add_user("r2", "c", &ConnectionId::from("c"));
        }
        shared
    }

    #[tokio::test]
    async fn rooms_lists_every_room() {
        let router = build_router(populated().await, "");
        let (status, body) = get_json(router, "/rooms").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!([
                { "id": "r1", "users": ["a", "b"], "is_being_shared": true, "sharer_id": "a" },
                { "id": "r2", "users": ["c"], "is_being_shared": false, "sharer_id": null },
            ])
        );
    }

    #[tokio::test]
    async fn empty_registry_lists_nothing() {
        let router = build_router(registry::shared(), "");
        let (_, body) = get_json(router, "/rooms").await;
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn room_by_id() {
        let router = build_router(populated().await, "http://localhost:8080");
        let (status, body) = get_json(router, "/room/r2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["users"], json!(["c"]));
    }

    #[tokio::test]
    async fn unknown_room_is_empty_object() {
        let router = build_router(populated().await, "");
        let (status, body) = get_json(router, "/room/missing").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));
    }

    #[tokio::test]
    async fn cors_header_uses_configured_origin() {
        let router = build_router(registry::shared(), "http://localhost:8080");
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/rooms")
                    .header("origin", "http://localhost:8080")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "http://localhost:8080"
        );
    }
}
