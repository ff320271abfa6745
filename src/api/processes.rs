use actix_web::{web, HttpResponse, Responder};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::models::Record;
use crate::services::{group_records, ProcessGroup};
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessesResponse<'a> {
    pub records: &'a [Record],
    /// 上次成功扫描的 Unix 毫秒时间戳
    pub last_scan: Option<u64>,
    pub scanning: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupsResponse {
    pub groups: Vec<ProcessGroup>,
    pub last_scan: Option<u64>,
}

pub fn unix_millis(time: Option<SystemTime>) -> Option<u64> {
    time.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
}

pub async fn list_processes(data: web::Data<AppState>) -> impl Responder {
    let records = data.coordinator.snapshot();
    HttpResponse::Ok().json(ProcessesResponse {
        records: &records,
        last_scan: unix_millis(data.coordinator.last_scan()),
        scanning: data.coordinator.is_in_flight(),
    })
}

pub async fn list_groups(data: web::Data<AppState>) -> impl Responder {
    let records = data.coordinator.snapshot();
    HttpResponse::Ok().json(GroupsResponse {
        groups: group_records(&records),
        last_scan: unix_millis(data.coordinator.last_scan()),
    })
}

/// 立即刷新；已有周期在跑时合并为一次重跑
pub async fn refresh(data: web::Data<AppState>) -> impl Responder {
    let ran = data.refresh().await;
    if !ran {
        log::debug!("Refresh requested while a scan is in flight, coalesced");
    }

    let records = data.coordinator.snapshot();
    HttpResponse::Ok().json(serde_json::json!({
        "coalesced": !ran,
        "records": records.as_slice(),
        "lastScan": unix_millis(data.coordinator.last_scan()),
    }))
}
