pub mod kill;
pub mod metrics;
pub mod prefs;
pub mod processes;

pub use kill::{kill_all, kill_container, kill_group, kill_pid};
pub use metrics::get_metrics;
pub use prefs::{get_preferences, update_preferences};
pub use processes::{list_groups, list_processes, refresh};

use actix_web::{web, HttpResponse, Responder};

/// 注册所有路由
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(get_metrics))
        .route("/api/processes", web::get().to(list_processes))
        .route("/api/groups", web::get().to(list_groups))
        .route("/api/refresh", web::post().to(refresh))
        .route("/api/kill/pid/{pid}", web::post().to(kill_pid))
        .route("/api/kill/container/{id}", web::post().to(kill_container))
        .route("/api/kill/group/{name}", web::post().to(kill_group))
        .route("/api/kill/all", web::post().to(kill_all))
        .route("/api/preferences", web::get().to(get_preferences))
        .route("/api/preferences", web::put().to(update_preferences));
}

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy"
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Preferences;
    use crate::state::new_state;
    use actix_web::{test as actix_test, App};

    #[actix_web::test]
    async fn test_health_and_empty_snapshot() {
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(new_state(Preferences::default())))
                .configure(configure),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");

        let req = actix_test::TestRequest::get().uri("/api/processes").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["records"], serde_json::json!([]));
        assert!(body["lastScan"].is_null());

        let req = actix_test::TestRequest::get().uri("/api/groups").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["groups"], serde_json::json!([]));

        let req = actix_test::TestRequest::get().uri("/api/preferences").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["preferences"]["refreshMs"], 5000);
    }
}
