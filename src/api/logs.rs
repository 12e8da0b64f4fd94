use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::api::{sidecar_error, success};
use crate::services::logs::LogSource;
use crate::state::AppContext;

#[derive(Deserialize)]
pub struct LogQuery {
    /// 只返回最后若干行
    pub tail: Option<usize>,
}

pub async fn get_logs(
    data: web::Data<AppContext>,
    path: web::Path<String>,
    query: web::Query<LogQuery>,
) -> HttpResponse {
    let lines = path
        .into_inner()
        .parse::<LogSource>()
        .and_then(|source| data.sidecar.logs(source, query.tail));
    match lines {
        Ok(lines) => success(StatusCode::OK, lines),
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
    async fn serves_log_tail_by_source() {
        let (dir, _manager, state) = test_state();
        let logs = dir.path().join("logs");
        std::fs::create_dir_all(&logs).unwrap();
        std::fs::write(logs.join("process_rclone.log"), "one\ntwo\nthree\n").unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(state))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/logs/rclone?tail=2").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"], serde_json::json!(["two", "three"]));

        let req = test::TestRequest::get().uri("/api/logs/openlist_core").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get().uri("/api/logs/kernel").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }
}
