use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, Responder};

use crate::api::{success, success_with_warning};
use crate::models::{AppConfig, Settings};
use crate::state::AppContext;

pub async fn get_settings(data: web::Data<AppContext>) -> impl Responder {
    success(StatusCode::OK, data.settings.snapshot())
}

/// 整体替换；落盘失败时运行时设置依然生效
pub async fn replace_settings(
    data: web::Data<AppContext>,
    settings: web::Json<Settings>,
) -> HttpResponse {
    let replaced = data.settings.replace(settings.into_inner());
    success_with_warning(StatusCode::OK, data.settings.snapshot(), replaced.warning)
}

pub async fn update_app(data: web::Data<AppContext>, app: web::Json<AppConfig>) -> HttpResponse {
    let updated = data.settings.update_app(app.into_inner());
    success_with_warning(StatusCode::OK, data.settings.snapshot().app, updated.warning)
}

pub async fn reset_settings(data: web::Data<AppContext>) -> HttpResponse {
    let reset = data.settings.reset();
    success_with_warning(StatusCode::OK, data.settings.snapshot(), reset.warning)
}
