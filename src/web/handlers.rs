//! HTTP request handlers.

use super::AppState;
use crate::device::DeviceId;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};

pub async fn handle_health() -> &'static str {
    "ok"
}

pub async fn handle_get_devices(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.monitor.devices())
}

pub async fn handle_get_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id: DeviceId = match id.parse() {
        Ok(id) => id,
        Err(_) => return (StatusCode::BAD_REQUEST, "Invalid device id").into_response(),
    };

    match state.monitor.device(id) {
        Some(device) => Json(device).into_response(),
        None => (StatusCode::NOT_FOUND, "Device not found").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use crate::monitor::Monitor;
    use crate::scheduler::PingDriver;
    use crate::testing::{device_config, ms, ScriptedProber};
    use crate::web::Server;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use axum::Router;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<Monitor>) {
        let monitor = Arc::new(Monitor::new(
            PingDriver::new(ms(10), ms(10)),
            ScriptedProber::new(),
            Vec::new(),
        ));
        (Server::new(0, monitor.clone()).routes(), monitor)
    }

    async fn get(app: Router, uri: &str) -> Response {
        app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let response = get(app, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"ok");
    }

    #[tokio::test]
    async fn test_list_devices() {
        let (app, monitor) = app();
        let device = monitor.add_device(device_config(37, 300, 355));

        let response = get(app, "/api/devices").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        let list = json.as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["id"], device.id().get());
        assert_eq!(list[0]["alarm"], false);
        assert_eq!(list[0]["view"]["name"], "Test machine");
        assert_eq!(list[0]["view"]["limit_ms"], 37.0);
        assert!(list[0]["view"]["last_class"].is_null());
    }

    #[tokio::test]
    async fn test_get_device() {
        let (app, monitor) = app();
        let device = monitor.add_device(device_config(37, 300, 355));

        let uri = format!("/api/devices/{}", device.id().get());
        let response = get(app.clone(), &uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["view"]["address"], "192.0.2.1");

        let response = get(app.clone(), "/api/devices/999999").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = get(app, "/api/devices/router").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
