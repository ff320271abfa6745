use actix_web::{web, HttpResponse, Responder};
use serde::Serialize;

use crate::models::{BulkScope, Record};
use crate::services::find_group;
use crate::services::terminator::{is_valid_container_id, is_valid_pid};
use crate::state::AppState;

/// 终止结果 + 通知文案
#[derive(Serialize)]
pub struct ActionResponse<T: Serialize> {
    #[serde(flatten)]
    pub result: T,
    pub summary: String,
}

fn bad_request(message: String) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({
        "status": "error",
        "message": message,
    }))
}

/// 动作完成后在后台触发一次（可合并的）重新扫描
fn schedule_rescan(data: &web::Data<AppState>) {
    let state = data.get_ref().clone();
    actix_web::rt::spawn(async move {
        state.refresh().await;
    });
}

pub fn parse_pid(raw: &str) -> Option<u32> {
    raw.trim().parse::<u32>().ok().filter(|pid| is_valid_pid(*pid))
}

pub async fn kill_pid(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let raw = path.into_inner();
    let pid = match parse_pid(&raw) {
        Some(pid) => pid,
        None => return bad_request(format!("Invalid pid '{}'", raw)),
    };

    log::info!("Kill requested for PID {}", pid);
    let outcome = data.terminator.kill_pid(pid).await;
    data.record_outcome(&outcome);
    schedule_rescan(&data);

    let summary = outcome.summary();
    HttpResponse::Ok().json(ActionResponse { result: outcome, summary })
}

pub async fn kill_container(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let id = path.into_inner();
    if !is_valid_container_id(&id) {
        return bad_request(format!("Invalid container id '{}'", id));
    }

    // 显示名取自最近一次扫描，找不到时用 id
    let snapshot = data.coordinator.snapshot();
    let name = snapshot
        .iter()
        .find_map(|r| match r {
            Record::Container(c) if c.container_id == id => Some(c.container_name.clone()),
            _ => None,
        })
        .unwrap_or_else(|| id.clone());

    log::info!("Stop requested for container {} ({})", name, id);
    let outcome = data.terminator.stop_container(&id, &name).await;
    data.record_outcome(&outcome);
    schedule_rescan(&data);

    let summary = outcome.summary();
    HttpResponse::Ok().json(ActionResponse { result: outcome, summary })
}

pub async fn kill_group(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let name = path.into_inner();
    let snapshot = data.coordinator.snapshot();
    let group = match find_group(&snapshot, &name) {
        Some(group) => group,
        None => {
            return HttpResponse::NotFound().json(serde_json::json!({
                "status": "error",
                "message": format!("Group '{}' not found", name),
            }));
        }
    };

    log::info!("Kill requested for group '{}' ({} records)", name, group.members.len());
    let report = data
        .terminator
        .kill_many(&group.records(), BulkScope::Group(name))
        .await;
    data.record_report(&report);
    schedule_rescan(&data);

    let summary = report.summary();
    HttpResponse::Ok().json(ActionResponse { result: report, summary })
}

/// 对最近一次完整记录集的快照逐个终止
pub async fn kill_all(data: web::Data<AppState>) -> impl Responder {
    let snapshot = data.coordinator.snapshot();
    log::info!("Kill all requested ({} records)", snapshot.len());

    let report = data.terminator.kill_many(&snapshot, BulkScope::All).await;
    data.record_report(&report);
    schedule_rescan(&data);

    let summary = report.summary();
    HttpResponse::Ok().json(ActionResponse { result: report, summary })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Preferences;
    use crate::state::new_state;
    use actix_web::{test as actix_test, App};

    #[test]
    fn test_parse_pid() {
        assert_eq!(parse_pid("4242"), Some(4242));
        assert_eq!(parse_pid("0"), None);
        assert_eq!(parse_pid("-1"), None);
        assert_eq!(parse_pid("abc"), None);
        assert_eq!(parse_pid("4294967295"), None);
    }

    #[actix_web::test]
    async fn test_invalid_targets_are_rejected() {
        let state = new_state(Preferences::default());
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/api/kill/pid/{pid}", web::post().to(kill_pid))
                .route("/api/kill/container/{id}", web::post().to(kill_container))
                .route("/api/kill/group/{name}", web::post().to(kill_group)),
        )
        .await;

        let req = actix_test::TestRequest::post().uri("/api/kill/pid/0").to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 400);

        let req = actix_test::TestRequest::post().uri("/api/kill/pid/notapid").to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 400);

        let req = actix_test::TestRequest::post().uri("/api/kill/container/-rm").to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 400);

        let req = actix_test::TestRequest::post().uri("/api/kill/group/nothing").to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 404);
    }
}
