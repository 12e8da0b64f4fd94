use actix_web::{web, HttpResponse, Responder};

use crate::metrics::METRICS;
use crate::state::AppContext;

pub async fn get_metrics(data: web::Data<AppContext>) -> impl Responder {
    // 进程级指标取自协调器缓存，不触发新的管理器查询
    METRICS.refresh_processes(&data.coordinator.statuses());

    // 渲染 Prometheus metrics
    match METRICS.render() {
        Ok(metrics_text) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(metrics_text),
        Err(e) => {
            log::error!("Failed to render metrics: {}", e);
            HttpResponse::InternalServerError().body("Failed to render metrics")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure;
    use crate::api::tests::test_state;
    use crate::models::ProcessDescriptor;
    use actix_web::{test, App};

    #[actix_rt::test]
    async fn exports_registered_processes() {
        let (_dir, _manager, state) = test_state();
        state
            .coordinator
            .create(ProcessDescriptor::new("exported_worker", "/bin/w", vec![]))
            .await
            .unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(state))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let body = test::call_and_read_body(&app, req).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("sidecar_process_up"));
        assert!(text.contains("exported_worker"));
    }
}
