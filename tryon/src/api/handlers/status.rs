use crate::api::models::status::StatusMessage;
use axum::Json;

#[utoipa::path(
    get,
    path = "/",
    tag = "status",
    summary = "Service banner",
    responses(
        (status = 200, description = "Service is running", body = StatusMessage),
    )
)]
pub async fn root() -> Json<StatusMessage> {
    Json(StatusMessage {
        message: "Virtual Try-On API is running".to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/healthz",
    tag = "status",
    summary = "Health check",
    responses(
        (status = 200, description = "Service is healthy", body = String, content_type = "text/plain"),
    )
)]
pub async fn healthz() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use crate::api::models::status::StatusMessage;
    use crate::test_utils::create_test_app;

    #[test_log::test(tokio::test)]
    async fn root_reports_running() {
        let (server, _dir) = create_test_app().await;

        let response = server.get("/").await;
        response.assert_status_ok();
        let body: StatusMessage = response.json();
        assert_eq!(body.message, "Virtual Try-On API is running");
    }

    #[test_log::test(tokio::test)]
    async fn healthz_is_ok() {
        let (server, _dir) = create_test_app().await;

        let response = server.get("/healthz").await;
        response.assert_status_ok();
        response.assert_text("OK");
    }
}
