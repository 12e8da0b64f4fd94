use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;
use std::collections::HashMap;

use crate::api::{coordinator_error, success};
use crate::models::{ProcessDescriptor, ProcessPatch};
use crate::services::{DeleteOutcome, LifecycleCoordinator};
use crate::state::AppContext;

#[derive(Deserialize)]
pub struct CreateProcessRequest {
    pub name: String,
    pub bin_path: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env_vars: Option<HashMap<String, String>>,
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub auto_restart: bool,
    #[serde(default)]
    pub run_as_admin: bool,
    /// 为 true 时名称已存在直接返回已有 id
    #[serde(default)]
    pub ensure: bool,
}

impl CreateProcessRequest {
    fn into_descriptor(self) -> ProcessDescriptor {
        let mut descriptor = ProcessDescriptor::new(self.name, self.bin_path, self.args);
        descriptor.working_dir = self.working_dir;
        descriptor.env_vars = self.env_vars;
        descriptor.log_file = self.log_file;
        descriptor.auto_start = self.auto_start;
        descriptor.auto_restart = self.auto_restart;
        descriptor.run_as_admin = self.run_as_admin;
        descriptor
    }
}

fn view(coordinator: &LifecycleCoordinator, descriptor: ProcessDescriptor) -> serde_json::Value {
    let status = coordinator.get_status(&descriptor.id).ok();
    serde_json::json!({
        "config": descriptor,
        "status": status
    })
}

pub async fn list_processes(data: web::Data<AppContext>) -> impl Responder {
    let coordinator = &data.coordinator;
    let list: Vec<_> = coordinator
        .list()
        .into_iter()
        .map(|d| view(coordinator, d))
        .collect();
    success(StatusCode::OK, list)
}

pub async fn get_process(data: web::Data<AppContext>, path: web::Path<String>) -> HttpResponse {
    let id = path.into_inner();
    match data.coordinator.get(&id) {
        Some(descriptor) => success(StatusCode::OK, view(&data.coordinator, descriptor)),
        None => coordinator_error(crate::error::CoordinatorError::NotFound(id)),
    }
}

pub async fn create_process(
    data: web::Data<AppContext>,
    req: web::Json<CreateProcessRequest>,
) -> HttpResponse {
    let req = req.into_inner();
    let result = if req.ensure {
        let name = req.name.clone();
        data.coordinator
            .ensure_created(&name, || Ok(req.into_descriptor()))
            .await
    } else {
        data.coordinator.create(req.into_descriptor()).await
    };

    match result {
        Ok(id) => success(StatusCode::CREATED, serde_json::json!({ "id": id })),
        Err(e) => coordinator_error(e),
    }
}

pub async fn update_process(
    data: web::Data<AppContext>,
    path: web::Path<String>,
    patch: web::Json<ProcessPatch>,
) -> HttpResponse {
    match data.coordinator.update(&path.into_inner(), &patch).await {
        Ok(descriptor) => success(StatusCode::OK, descriptor),
        Err(e) => coordinator_error(e),
    }
}

/// 非干净删除返回 207，正文说明残留情况
pub async fn delete_process(data: web::Data<AppContext>, path: web::Path<String>) -> HttpResponse {
    match data.coordinator.delete(&path.into_inner()).await {
        Ok(outcome @ DeleteOutcome::Removed) => success(StatusCode::OK, outcome),
        Ok(outcome) => success(StatusCode::MULTI_STATUS, outcome),
        Err(e) => coordinator_error(e),
    }
}

pub async fn process_action(
    data: web::Data<AppContext>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (id, action) = path.into_inner();
    let result = match action.as_str() {
        "start" => data.coordinator.start(&id).await,
        "stop" => data.coordinator.stop(&id).await,
        "restart" => data.coordinator.restart(&id).await,
        other => {
            return crate::api::error(
                StatusCode::BAD_REQUEST,
                format!("unknown action '{other}'"),
            )
        }
    };
    match result {
        Ok(()) => success(StatusCode::OK, serde_json::json!({ "id": id, "action": action })),
        Err(e) => coordinator_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure;
    use crate::api::tests::test_state;
    use actix_web::{test, App};

    #[actix_rt::test]
    async fn create_start_and_delete() {
        let (_dir, manager, state) = test_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/processes")
            .set_json(serde_json::json!({"name": "worker", "bin_path": "/usr/bin/worker"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::post()
            .uri("/api/processes")
            .set_json(serde_json::json!({"name": "worker", "bin_path": "/usr/bin/worker"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::post()
            .uri(&format!("/api/processes/{id}/start"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        assert!(manager.is_running(&id));

        let req = test::TestRequest::get().uri("/api/processes").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"][0]["config"]["name"], "worker");

        let req = test::TestRequest::delete()
            .uri(&format!("/api/processes/{id}"))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["outcome"], "removed");
        assert!(state.coordinator.list().is_empty());
    }

    #[actix_rt::test]
    async fn unknown_ids_and_actions() {
        let (_dir, manager, state) = test_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::put()
            .uri("/api/processes/missing")
            .set_json(serde_json::json!({"auto_restart": true}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let id = state
            .coordinator
            .create(ProcessDescriptor::new("w", "/bin/w", vec![]))
            .await
            .unwrap();
        let req = test::TestRequest::post()
            .uri(&format!("/api/processes/{id}/explode"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        manager.fail("start", &id);
        let req = test::TestRequest::post()
            .uri(&format!("/api/processes/{id}/start"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_GATEWAY);
    }
}
