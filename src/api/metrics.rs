use actix_web::{web, HttpResponse, Responder};

use crate::state::AppState;
use crate::metrics::METRICS;

pub async fn get_metrics(data: web::Data<AppState>) -> impl Responder {
    // 每次渲染前用最新快照重建单条记录的 gauge
    let records = data.coordinator.snapshot();
    METRICS.observe_records(&records);

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
