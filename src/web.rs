use actix_web::{middleware, web, App, HttpResponse, HttpServer, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::assignment::view::{IntervalHeader, SessionEntry};
use crate::assignment::{AssignmentScope, CourseView, SyncBus};
use crate::backend::{InMemoryBackend, MonitorBackend, SchoolContext};
use crate::config::Config;
use crate::error::AssignmentError;
use crate::prompt::{Prompter, ScriptedPrompter};

/// One open view, playing the role of a browser tab
pub struct ViewEntry {
    view: tokio::sync::Mutex<CourseView>,
    prompter: Arc<ScriptedPrompter>,
    in_flight: Arc<AtomicBool>,
    /// Monitor shown before the attempt in flight started
    restored_monitor: Mutex<Option<i64>>,
}

impl ViewEntry {
    fn restored_monitor(&self) -> Option<i64> {
        self.restored_monitor.lock().map(|m| *m).unwrap_or(None)
    }
}

type SharedView = Arc<ViewEntry>;

pub struct AppState {
    pub backend: Arc<InMemoryBackend>,
    pub bus: SyncBus,
    pub config: Config,
    pub school: SchoolContext,
    pub views: Mutex<HashMap<String, SharedView>>,
}

impl AppState {
    pub fn new(backend: Arc<InMemoryBackend>, config: Config, school: SchoolContext) -> Self {
        Self {
            backend,
            bus: SyncBus::new(config.sync_channel_capacity),
            config,
            school,
            views: Mutex::new(HashMap::new()),
        }
    }

    fn view(&self, view_id: &str) -> Option<SharedView> {
        self.views.lock().ok()?.get(view_id).cloned()
    }
}

#[derive(Deserialize)]
pub struct OpenViewRequest {
    course_id: i64,
    level: i64,
    position: usize,
}

#[derive(Serialize)]
pub struct OpenViewResponse {
    view_id: String,
    course_name: String,
    session_count: usize,
    multiple_intervals: bool,
}

#[derive(Deserialize)]
pub struct SelectDateRequest {
    session_index: usize,
}

#[derive(Deserialize)]
pub struct MonitorRequest {
    monitor_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct IntervalFilterRequest {
    interval_id: Option<String>,
}

#[derive(Deserialize)]
pub struct PageQuery {
    page: Option<usize>,
}

#[derive(Serialize)]
pub struct DatesPage {
    page: usize,
    page_size: usize,
    total: usize,
    dates: Vec<SessionEntry>,
}

#[derive(Serialize)]
pub struct IntervalsResponse {
    multiple: bool,
    headers: Vec<IntervalHeader>,
}

fn error_response(error: &AssignmentError) -> HttpResponse {
    let body = serde_json::json!({"success": false, "error": error.user_message()});
    match error {
        AssignmentError::Busy => HttpResponse::Conflict().json(body),
        AssignmentError::NoSessionSelected
        | AssignmentError::InvalidSession(_)
        | AssignmentError::NoSubgroup(_)
        | AssignmentError::Validation => HttpResponse::BadRequest().json(body),
        AssignmentError::NoAvailability { .. } | AssignmentError::TransferConflict(_) => {
            HttpResponse::UnprocessableEntity().json(body)
        }
        AssignmentError::Transport(_) => HttpResponse::BadGateway().json(body),
    }
}

/// 409 carrying the monitor the client should put back in its selector
fn busy_response(selected_monitor: Option<i64>) -> HttpResponse {
    HttpResponse::Conflict().json(serde_json::json!({
        "success": false,
        "error": AssignmentError::Busy.user_message(),
        "selected_monitor": selected_monitor,
    }))
}

fn view_not_found() -> HttpResponse {
    HttpResponse::NotFound().json(serde_json::json!({"success": false, "error": "Unknown view"}))
}

async fn open_view(
    req: web::Json<OpenViewRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let backend: Arc<dyn MonitorBackend> = state.backend.clone();
    let prompter = Arc::new(ScriptedPrompter::always(state.config.auto_confirm));
    let view_prompter: Arc<dyn Prompter> = prompter.clone();
    let opened = CourseView::open(
        req.course_id,
        req.level,
        req.position,
        state.school.clone(),
        backend,
        view_prompter,
        state.bus.clone(),
    )
    .await;

    let view = match opened {
        Ok(view) => view,
        Err(e) => return Ok(error_response(&e)),
    };
    let response = OpenViewResponse {
        view_id: view.instance_id().to_string(),
        course_name: view.course().name.clone(),
        session_count: view.course().sessions.len(),
        multiple_intervals: view.has_multiple_intervals(),
    };
    let entry = ViewEntry {
        in_flight: view.in_flight_flag(),
        view: tokio::sync::Mutex::new(view),
        prompter,
        restored_monitor: Mutex::new(None),
    };
    state
        .views
        .lock()
        .map_err(|_| actix_web::error::ErrorInternalServerError("view registry poisoned"))?
        .insert(response.view_id.clone(), Arc::new(entry));
    info!(view_id = %response.view_id, course_id = req.course_id, "view opened");
    Ok(HttpResponse::Ok().json(response))
}

async fn close_view(path: web::Path<String>, state: web::Data<AppState>) -> Result<HttpResponse> {
    let removed = state
        .views
        .lock()
        .map_err(|_| actix_web::error::ErrorInternalServerError("view registry poisoned"))?
        .remove(path.as_str());
    match removed {
        Some(_) => {
            info!(view_id = %path, "view closed");
            Ok(HttpResponse::Ok().json(serde_json::json!({"success": true})))
        }
        None => Ok(view_not_found()),
    }
}

async fn get_dates(
    path: web::Path<String>,
    query: web::Query<PageQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let Some(entry) = state.view(&path) else {
        return Ok(view_not_found());
    };
    let dates = entry.view.lock().await.get_dates_for_subgroup();
    let page_size = state.config.page_sizes.for_entity("course_dates");
    let page = query.page.unwrap_or(1).max(1);
    let total = dates.len();
    let dates = dates.into_iter().skip((page - 1) * page_size).take(page_size).collect();
    Ok(HttpResponse::Ok().json(DatesPage { page, page_size, total, dates }))
}

async fn get_intervals(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let Some(entry) = state.view(&path) else {
        return Ok(view_not_found());
    };
    let view = entry.view.lock().await;
    Ok(HttpResponse::Ok().json(IntervalsResponse {
        multiple: view.has_multiple_intervals(),
        headers: view.get_interval_headers(),
    }))
}

async fn set_interval_filter(
    path: web::Path<String>,
    req: web::Json<IntervalFilterRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let Some(entry) = state.view(&path) else {
        return Ok(view_not_found());
    };
    entry.view.lock().await.set_interval_filter(req.into_inner().interval_id);
    Ok(HttpResponse::Ok().json(serde_json::json!({"success": true})))
}

async fn select_date(
    path: web::Path<String>,
    req: web::Json<SelectDateRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let Some(entry) = state.view(&path) else {
        return Ok(view_not_found());
    };
    let mut view = entry.view.lock().await;
    match view.on_select_date(req.session_index).await {
        Ok(monitors) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "selected_monitor": view.selected_monitor(),
            "monitors": monitors,
        }))),
        Err(e) => Ok(error_response(&e)),
    }
}

async fn set_scope(
    path: web::Path<String>,
    req: web::Json<AssignmentScope>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let Some(entry) = state.view(&path) else {
        return Ok(view_not_found());
    };
    let effective = entry.view.lock().await.on_assignment_scope_change(req.into_inner());
    Ok(HttpResponse::Ok().json(serde_json::json!({"success": true, "scope": effective})))
}

async fn select_monitor(
    path: web::Path<String>,
    req: web::Json<MonitorRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let Some(entry) = state.view(&path) else {
        return Ok(view_not_found());
    };
    // A second request while one is saving is rejected, not queued
    if entry.in_flight.load(Ordering::Acquire) {
        return Ok(busy_response(entry.restored_monitor()));
    }
    let mut view = entry.view.lock().await;
    if let Ok(mut restored) = entry.restored_monitor.lock() {
        *restored = view.selected_monitor();
    }
    let result = view.on_monitor_selection_change(req.monitor_id).await;
    let notices = entry.prompter.take_notices();
    match result {
        Ok(attempt) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "attempt": attempt,
            "selected_monitor": view.selected_monitor(),
            "modified": view.legend().modified_indexes(),
            "notices": notices,
        }))),
        Err(AssignmentError::Busy) => Ok(busy_response(entry.restored_monitor())),
        Err(e) => Ok(error_response(&e)),
    }
}

async fn drain_sync(path: web::Path<String>, state: web::Data<AppState>) -> Result<HttpResponse> {
    let Some(entry) = state.view(&path) else {
        return Ok(view_not_found());
    };
    let applied = entry.view.lock().await.drain_sync_events().await;
    Ok(HttpResponse::Ok().json(serde_json::json!({"success": true, "applied": applied})))
}

async fn list_monitors(state: web::Data<AppState>) -> Result<HttpResponse> {
    let page_size = state.config.page_sizes.for_entity("monitors");
    let monitors: Vec<_> = state.backend.monitors().into_iter().take(page_size).collect();
    Ok(HttpResponse::Ok().json(monitors))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/views", web::post().to(open_view))
        .route("/api/views/{id}", web::delete().to(close_view))
        .route("/api/views/{id}/dates", web::get().to(get_dates))
        .route("/api/views/{id}/intervals", web::get().to(get_intervals))
        .route("/api/views/{id}/interval-filter", web::post().to(set_interval_filter))
        .route("/api/views/{id}/select-date", web::post().to(select_date))
        .route("/api/views/{id}/scope", web::post().to(set_scope))
        .route("/api/views/{id}/monitor", web::post().to(select_monitor))
        .route("/api/views/{id}/sync", web::post().to(drain_sync))
        .route("/api/monitors", web::get().to(list_monitors));
}

pub async fn start_server(
    config: Config,
    backend: Arc<InMemoryBackend>,
    school: SchoolContext,
) -> std::io::Result<()> {
    let port = config.port;
    let app_state = web::Data::new(AppState::new(backend, config, school));

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(middleware::Logger::default())
            .configure(configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::session_index::tests::course;
    use crate::assignment::sync::AssignmentChanged;
    use crate::assignment::types::Monitor;
    use actix_web::http::StatusCode;
    use actix_web::test;
    use serde_json::{json, Value};

    fn app_state() -> web::Data<AppState> {
        let ana = Monitor { id: 5, first_name: "Ana".into(), last_name: "Ruiz".into() };
        let backend = InMemoryBackend::new().with_course(course(4)).with_monitor(ana, Vec::new());
        let school = SchoolContext { school_id: 1, user_id: 1 };
        web::Data::new(AppState::new(Arc::new(backend), Config::default(), school))
    }

    fn open_request() -> test::TestRequest {
        test::TestRequest::post()
            .uri("/api/views")
            .set_json(json!({"course_id": 7, "level": 1, "position": 0}))
    }

    fn view_post(view_id: &str, action: &str, body: Value) -> test::TestRequest {
        test::TestRequest::post()
            .uri(&format!("/api/views/{}/{}", view_id, action))
            .set_json(body)
    }

    fn view_id(opened: &Value) -> String {
        opened["view_id"].as_str().unwrap_or_default().to_string()
    }

    #[actix_web::test]
    async fn open_select_and_assign() {
        let state = app_state();
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure)).await;
        let opened: Value = test::call_and_read_body_json(&app, open_request().to_request()).await;
        assert_eq!(opened["session_count"], 4);
        let id = view_id(&opened);

        let req = view_post(&id, "select-date", json!({"session_index": 1})).to_request();
        let selected: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(selected["monitors"][0]["id"], 5);

        let req = view_post(&id, "monitor", json!({"monitor_id": 5})).to_request();
        let assigned: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(assigned["attempt"]["result"], "applied");
        assert_eq!(assigned["selected_monitor"], 5);
        assert_eq!(assigned["modified"], json!([1]));
        assert_eq!(state.backend.transfers().len(), 1);
    }

    #[actix_web::test]
    async fn dates_are_paginated() {
        let app = test::init_service(App::new().app_data(app_state()).configure(configure)).await;
        let opened: Value = test::call_and_read_body_json(&app, open_request().to_request()).await;

        let req = test::TestRequest::get()
            .uri(&format!("/api/views/{}/dates?page=1", view_id(&opened)))
            .to_request();
        let page: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(page["total"], 4);
        assert_eq!(page["page_size"], 10);
        assert_eq!(page["dates"].as_array().map(Vec::len), Some(4));
    }

    #[actix_web::test]
    async fn monitor_without_selected_date_is_rejected() {
        let app = test::init_service(App::new().app_data(app_state()).configure(configure)).await;
        let opened: Value = test::call_and_read_body_json(&app, open_request().to_request()).await;

        let req = view_post(&view_id(&opened), "monitor", json!({"monitor_id": 5})).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn notices_stay_with_their_view() {
        let app = test::init_service(App::new().app_data(app_state()).configure(configure)).await;
        let first: Value = test::call_and_read_body_json(&app, open_request().to_request()).await;
        let second: Value = test::call_and_read_body_json(&app, open_request().to_request()).await;
        let (first, second) = (view_id(&first), view_id(&second));

        let req = view_post(&first, "monitor", json!({"monitor_id": 5})).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = view_post(&second, "select-date", json!({"session_index": 1})).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        let req = view_post(&second, "monitor", json!({"monitor_id": 5})).to_request();
        let assigned: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(assigned["notices"].as_array().map(Vec::len), Some(1));
        assert_eq!(assigned["notices"][0]["level"], "success");
    }

    #[actix_web::test]
    async fn saving_view_answers_conflict_with_previous_monitor() {
        let state = app_state();
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure)).await;
        let opened: Value = test::call_and_read_body_json(&app, open_request().to_request()).await;
        let id = view_id(&opened);

        let entry = state.view(&id).unwrap();
        entry.in_flight.store(true, Ordering::Release);
        *entry.restored_monitor.lock().unwrap() = Some(3);

        let req = view_post(&id, "monitor", json!({"monitor_id": 5})).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["selected_monitor"], 3);
        assert!(state.backend.transfers().is_empty());

        // reads still go through while the flag is set
        let req = test::TestRequest::get()
            .uri(&format!("/api/views/{}/intervals", id))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn closed_view_stops_listening() {
        let state = app_state();
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure)).await;
        let opened: Value = test::call_and_read_body_json(&app, open_request().to_request()).await;
        let uri = format!("/api/views/{}", view_id(&opened));
        let event = AssignmentChanged {
            source_instance_id: "elsewhere".to_string(),
            course_id: 7,
            monitor_id: None,
            affected_slot_keys: Vec::new(),
        };
        assert_eq!(state.bus.publish(event.clone()), 1);

        let req = test::TestRequest::delete().uri(&uri).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        assert_eq!(state.bus.publish(event), 0);

        let req = test::TestRequest::delete().uri(&uri).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn unknown_view_is_404() {
        let app = test::init_service(App::new().app_data(app_state()).configure(configure)).await;
        let req = test::TestRequest::get().uri("/api/views/nope/intervals").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
