use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;

use crate::api::{error, sidecar_error, success, success_with_warning};
use crate::state::AppContext;

#[derive(Deserialize)]
pub struct AutoLaunchRequest {
    pub enabled: bool,
}

pub async fn core_status(data: web::Data<AppContext>) -> impl Responder {
    success(StatusCode::OK, data.sidecar.core_status().await)
}

pub async fn admin_password(data: web::Data<AppContext>) -> HttpResponse {
    match data.sidecar.admin_password() {
        Ok(password) => success(StatusCode::OK, serde_json::json!({ "password": password })),
        Err(e) => sidecar_error(e),
    }
}

pub async fn core_action(data: web::Data<AppContext>, path: web::Path<String>) -> HttpResponse {
    let action = path.into_inner();
    let result = match action.as_str() {
        "start" => data.sidecar.start_core().await.map(Some),
        "restart" => data.sidecar.restart_core().await.map(Some),
        "stop" => data.sidecar.stop_core().await.map(|_| None),
        other => return error(StatusCode::BAD_REQUEST, format!("unknown action '{other}'")),
    };
    match result {
        Ok(id) => success(StatusCode::OK, serde_json::json!({ "action": action, "id": id })),
        Err(e) => sidecar_error(e),
    }
}

pub async fn set_auto_launch(
    data: web::Data<AppContext>,
    req: web::Json<AutoLaunchRequest>,
) -> HttpResponse {
    match data.sidecar.set_core_auto_launch(req.enabled).await {
        Ok(updated) => success_with_warning(StatusCode::OK, updated.value, updated.warning),
        Err(e) => sidecar_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure;
    use crate::api::tests::test_state;
    use actix_web::{test, App};

    #[actix_rt::test]
    async fn core_lifecycle_over_http() {
        let (_dir, manager, state) = test_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post().uri("/api/core/stop").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post().uri("/api/core/start").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let id = body["data"]["id"].as_str().unwrap().to_string();
        assert!(manager.is_running(&id));

        let req = test::TestRequest::put()
            .uri("/api/core/auto-launch")
            .set_json(serde_json::json!({"enabled": true}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["auto_launch"], true);
        assert!(state.settings.openlist().auto_launch);

        let req = test::TestRequest::get().uri("/api/core/status").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["registered"], true);
        assert_eq!(body["data"]["url"], "http://localhost:5244");

        let req = test::TestRequest::get().uri("/api/core/admin-password").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }
}
