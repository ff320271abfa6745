use actix_web::{web, HttpResponse, Responder};
use serde::Serialize;

use crate::models::prefs::{DEFAULT_REFRESH_MS, REFRESH_CHOICES};
use crate::models::{Preferences, PreferencesPatch, RefreshInterval};
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesMeta {
    pub refresh_choices: &'static [RefreshInterval],
    pub default_refresh_ms: u64,
}

#[derive(Serialize)]
pub struct PreferencesResponse {
    pub preferences: Preferences,
    pub meta: PreferencesMeta,
}

impl PreferencesResponse {
    fn new(preferences: Preferences) -> Self {
        Self {
            preferences,
            meta: PreferencesMeta {
                refresh_choices: &REFRESH_CHOICES,
                default_refresh_ms: DEFAULT_REFRESH_MS,
            },
        }
    }
}

pub async fn get_preferences(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(PreferencesResponse::new(data.preferences()))
}

/// 部分更新；更新后重新扫描并唤醒调度器以应用新的间隔
pub async fn update_preferences(
    data: web::Data<AppState>,
    patch: web::Json<PreferencesPatch>,
) -> impl Responder {
    let updated = data.update_preferences(patch.into_inner());
    log::info!(
        "Preferences updated: refresh {}, all users {}, types {:?}",
        updated.refresh_ms,
        updated.all_users,
        updated.process_types
    );

    data.refresh().await;
    data.wake.notify_one();

    HttpResponse::Ok().json(PreferencesResponse::new(updated))
}
