use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, Responder};

use crate::api::{error, sidecar_error, success, success_with_warning};
use crate::models::MountEntry;
use crate::services::{DeleteOutcome, RenameOutcome};
use crate::state::AppContext;

pub async fn list_remotes(data: web::Data<AppContext>) -> impl Responder {
    success(StatusCode::OK, data.sidecar.remotes())
}

pub async fn list_mounts(data: web::Data<AppContext>) -> impl Responder {
    success(StatusCode::OK, data.sidecar.mount_infos())
}

pub async fn create_remote(
    data: web::Data<AppContext>,
    entry: web::Json<MountEntry>,
) -> HttpResponse {
    match data.sidecar.create_remote(entry.into_inner()).await {
        Ok(created) => success_with_warning(StatusCode::CREATED, created.value, created.warning),
        Err(e) => sidecar_error(e),
    }
}

/// 改名只部分完成时返回 207
pub async fn update_remote(
    data: web::Data<AppContext>,
    path: web::Path<String>,
    entry: web::Json<MountEntry>,
) -> HttpResponse {
    match data.sidecar.update_remote(&path.into_inner(), entry.into_inner()).await {
        Ok(updated) => {
            let status = match updated.value.rename {
                Some(RenameOutcome::PartialCompletion { .. }) => StatusCode::MULTI_STATUS,
                _ => StatusCode::OK,
            };
            success_with_warning(status, updated.value, updated.warning)
        }
        Err(e) => sidecar_error(e),
    }
}

pub async fn delete_remote(data: web::Data<AppContext>, path: web::Path<String>) -> HttpResponse {
    match data.sidecar.delete_remote(&path.into_inner()).await {
        Ok(removed) => {
            let status = match removed.value {
                None | Some(DeleteOutcome::Removed) => StatusCode::OK,
                Some(_) => StatusCode::MULTI_STATUS,
            };
            success_with_warning(status, removed.value, removed.warning)
        }
        Err(e) => sidecar_error(e),
    }
}

pub async fn remote_action(
    data: web::Data<AppContext>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (name, action) = path.into_inner();
    match action.as_str() {
        "mount" => match data.sidecar.mount(&name).await {
            Ok(mounted) => success_with_warning(
                StatusCode::OK,
                serde_json::json!({ "name": name, "process_id": mounted.value }),
                mounted.warning,
            ),
            Err(e) => sidecar_error(e),
        },
        "unmount" => match data.sidecar.unmount(&name).await {
            Ok(()) => success(StatusCode::OK, serde_json::json!({ "name": name })),
            Err(e) => sidecar_error(e),
        },
        other => error(StatusCode::BAD_REQUEST, format!("unknown action '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure;
    use crate::api::tests::test_state;
    use actix_web::{test, App};

    fn remote_json(dir: &std::path::Path, name: &str) -> serde_json::Value {
        serde_json::json!({
            "name": name,
            "remote": {"type": "other", "remote_type": "s3", "options": {"region": "eu-west-1"}},
            "mount": {"mount_point": dir.join("mnt").join(name)}
        })
    }

    #[actix_rt::test]
    async fn remote_mount_flow() {
        let (dir, manager, state) = test_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/remotes")
            .set_json(remote_json(dir.path(), "gdrive"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

        let req = test::TestRequest::post()
            .uri("/api/remotes")
            .set_json(remote_json(dir.path(), "gdrive"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::post()
            .uri("/api/remotes/gdrive/mount")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let id = body["data"]["process_id"].as_str().unwrap().to_string();
        assert!(manager.is_running(&id));

        let req = test::TestRequest::get().uri("/api/mounts").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"][0]["name"], "gdrive");

        let req = test::TestRequest::delete()
            .uri("/api/remotes/gdrive")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        assert!(state.coordinator.find("rclone_mount_gdrive_process").is_none());
    }

    #[actix_rt::test]
    async fn invalid_names_and_unknown_remotes() {
        let (dir, _manager, state) = test_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(state))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/remotes")
            .set_json(remote_json(dir.path(), "my drive"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/remotes/ghost/mount")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post()
            .uri("/api/remotes/ghost/unmount")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }
}
