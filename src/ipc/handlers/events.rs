use chrono::{Local, NaiveDate};
use serde_json::json;

use crate::calendar::{check_event_window, month_grid};
use crate::ipc::helpers::{
    authorize, create_record, delete_record, get_optional_class, get_optional_str, get_patch,
    get_required_str, respond, scope_class, store_mut, update_record, HandlerErr, ANY_ROLE, STAFF,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Role, ScheduledEvent};

fn events_list(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    let user = authorize(store, ANY_ROLE)?;
    let class = scope_class(store, &user, get_optional_class(params, "class")?)?;
    let events = match class {
        Some(c) => store.events_by_class(c),
        None => store.get_all::<ScheduledEvent>(),
    };
    Ok(json!({ "events": events }))
}

fn events_visible(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    let user = authorize(store, ANY_ROLE)?;
    let class = get_optional_class(params, "class")?;
    if user.role == Role::Student {
        scope_class(store, &user, class)?;
    }
    Ok(json!({ "events": store.events_visible_to(&user, class) }))
}

fn events_lectures(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    let user = authorize(store, STAFF)?;
    Ok(json!({ "events": store.teacher_lectures(&user) }))
}

fn events_create(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    authorize(store, STAFF)?;
    check_event_window(
        &get_required_str(params, "start")?,
        &get_required_str(params, "end")?,
    )?;
    create_record::<ScheduledEvent>(store, params)
}

/// The window is checked against the merged record, so a patch that only
/// moves `end` is still compared with the stored `start`.
fn events_update(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    authorize(store, STAFF)?;
    let id = get_required_str(params, "id")?;
    let patch = get_patch(params)?;
    let Some(existing) = store.find::<ScheduledEvent>(&id) else {
        return Ok(json!({ "record": null }));
    };
    let start = patch
        .get("start")
        .and_then(|v| v.as_str())
        .unwrap_or(&existing.data.start);
    let end = patch
        .get("end")
        .and_then(|v| v.as_str())
        .unwrap_or(&existing.data.end);
    check_event_window(start, end)?;
    update_record::<ScheduledEvent>(store, params)
}

fn events_delete(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    authorize(store, STAFF)?;
    delete_record::<ScheduledEvent>(store, params)
}

fn get_int(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// `month` is 1-12. `today` defaults to the local date.
fn calendar_month(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    let user = authorize(store, ANY_ROLE)?;

    let year = i32::try_from(get_int(params, "year")?)
        .map_err(|_| HandlerErr::bad_params("year out of range"))?;
    let month = u32::try_from(get_int(params, "month")?)
        .ok()
        .filter(|m| (1..=12).contains(m))
        .ok_or_else(|| HandlerErr::bad_params("month must be 1-12"))?;
    let today = match get_optional_str(params, "today")? {
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map_err(|_| HandlerErr::bad_params("today must be YYYY-MM-DD"))?,
        None => Local::now().date_naive(),
    };

    let class = get_optional_class(params, "class")?;
    if user.role == Role::Student {
        scope_class(store, &user, class)?;
    }
    let events = store.events_visible_to(&user, class);
    let days = month_grid(year, month, &events, today)?;
    Ok(json!({ "year": year, "month": month, "days": days }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "events.list" => events_list(state, &req.params),
        "events.visible" => events_visible(state, &req.params),
        "events.lectures" => events_lectures(state),
        "events.create" => events_create(state, &req.params),
        "events.update" => events_update(state, &req.params),
        "events.delete" => events_delete(state, &req.params),
        "calendar.month" => calendar_month(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
