pub mod logs;
pub mod metrics;
pub mod openlist;
pub mod processes;
pub mod remotes;
pub mod settings;

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, Responder};
use serde::Serialize;

use crate::error::{CoordinatorError, SettingsError, SidecarError};
use crate::services::PersistenceFailure;

/// 注册全部路由
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/processes", web::get().to(processes::list_processes))
        .route("/api/processes", web::post().to(processes::create_process))
        .route("/api/processes/{id}", web::get().to(processes::get_process))
        .route("/api/processes/{id}", web::put().to(processes::update_process))
        .route("/api/processes/{id}", web::delete().to(processes::delete_process))
        .route("/api/processes/{id}/{action}", web::post().to(processes::process_action))
        .route("/api/remotes", web::get().to(remotes::list_remotes))
        .route("/api/remotes", web::post().to(remotes::create_remote))
        .route("/api/remotes/{name}", web::put().to(remotes::update_remote))
        .route("/api/remotes/{name}", web::delete().to(remotes::delete_remote))
        .route("/api/remotes/{name}/{action}", web::post().to(remotes::remote_action))
        .route("/api/mounts", web::get().to(remotes::list_mounts))
        .route("/api/core/status", web::get().to(openlist::core_status))
        .route("/api/core/admin-password", web::get().to(openlist::admin_password))
        .route("/api/core/auto-launch", web::put().to(openlist::set_auto_launch))
        .route("/api/core/{action}", web::post().to(openlist::core_action))
        .route("/api/logs/{source}", web::get().to(logs::get_logs))
        .route("/api/settings", web::get().to(settings::get_settings))
        .route("/api/settings", web::put().to(settings::replace_settings))
        .route("/api/settings/app", web::put().to(settings::update_app))
        .route("/api/settings/reset", web::post().to(settings::reset_settings))
        .route("/metrics", web::get().to(metrics::get_metrics))
        .route("/health", web::get().to(health));
}

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy"
    }))
}

pub(crate) fn success<T: Serialize>(status: StatusCode, data: T) -> HttpResponse {
    HttpResponse::build(status).json(serde_json::json!({
        "status": "success",
        "data": data
    }))
}

/// 成功但设置未能落盘时附带警告
pub(crate) fn success_with_warning<T: Serialize>(
    status: StatusCode,
    data: T,
    warning: Option<PersistenceFailure>,
) -> HttpResponse {
    match warning {
        None => success(status, data),
        Some(warning) => HttpResponse::build(status).json(serde_json::json!({
            "status": "success",
            "data": data,
            "warning": warning
        })),
    }
}

pub(crate) fn error(status: StatusCode, message: impl std::fmt::Display) -> HttpResponse {
    HttpResponse::build(status).json(serde_json::json!({
        "status": "error",
        "message": message.to_string()
    }))
}

fn coordinator_status(err: &CoordinatorError) -> StatusCode {
    match err {
        CoordinatorError::NotFound(_) => StatusCode::NOT_FOUND,
        CoordinatorError::DuplicateName { .. } => StatusCode::CONFLICT,
        CoordinatorError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        CoordinatorError::CreationFailed { .. } | CoordinatorError::ExternalManager { .. } => {
            StatusCode::BAD_GATEWAY
        }
    }
}

pub(crate) fn coordinator_error(err: CoordinatorError) -> HttpResponse {
    log::warn!("Request failed: {}", err);
    error(coordinator_status(&err), err)
}

pub(crate) fn sidecar_error(err: SidecarError) -> HttpResponse {
    let status = match &err {
        SidecarError::Coordinator(e) => coordinator_status(e),
        SidecarError::Settings(SettingsError::UnknownRemote(_)) | SidecarError::UnknownRemote(_) => {
            StatusCode::NOT_FOUND
        }
        SidecarError::InvalidName(_)
        | SidecarError::InvalidRemote(_)
        | SidecarError::MissingMountPoint(_) => StatusCode::BAD_REQUEST,
        SidecarError::InvalidLogSource(_) => StatusCode::BAD_REQUEST,
        SidecarError::RemoteExists(_) | SidecarError::NameCollision { .. } => StatusCode::CONFLICT,
        SidecarError::Log { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
            StatusCode::NOT_FOUND
        }
        SidecarError::AdminPasswordNotFound => StatusCode::NOT_FOUND,
        SidecarError::Settings(_)
        | SidecarError::MountPoint { .. }
        | SidecarError::RcloneConf(_)
        | SidecarError::LogDirUnset
        | SidecarError::Log { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    log::warn!("Request failed: {}", err);
    error(status, err)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::process_manager::fake::FakeProcessManager;
    use crate::services::SidecarPaths;
    use crate::state::{AppContext, AppState, ContextConfig};
    use actix_web::{test, App};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    pub(crate) fn test_state() -> (TempDir, Arc<FakeProcessManager>, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(FakeProcessManager::new());
        let state = AppContext::build(
            ContextConfig {
                settings_file: dir.path().join("settings.json"),
                poll_interval: Duration::from_secs(3),
                paths: SidecarPaths {
                    openlist_binary: "openlist".into(),
                    rclone_binary: "rclone".into(),
                    rclone_conf: dir.path().join("rclone.conf"),
                    log_dir: Some(dir.path().join("logs")),
                },
            },
            manager.clone(),
        )
        .unwrap();
        (dir, manager, state)
    }

    #[actix_rt::test]
    async fn health_reports_healthy() {
        let (_dir, _manager, state) = test_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(state))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
    }

    #[actix_rt::test]
    async fn error_mapping() {
        assert_eq!(
            coordinator_status(&CoordinatorError::NotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            coordinator_status(&CoordinatorError::DuplicateName {
                name: "a".into(),
                existing_id: "b".into()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            coordinator_status(&CoordinatorError::refused("start", "x")),
            StatusCode::BAD_GATEWAY
        );
        let resp = sidecar_error(SidecarError::InvalidName("a b".into()));
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
