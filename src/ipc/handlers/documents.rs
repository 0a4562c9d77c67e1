//! Result sheets and hall tickets: per-class PDF documents.

use chrono::Local;
use serde_json::json;

use crate::ipc::helpers::{
    authorize, create_record, delete_record, get_optional_class, respond, scope_class, store_mut,
    update_record, HandlerErr, ADMIN_ONLY, ANY_ROLE,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{ClassType, HallTicket, Record, ResultSheet};
use crate::store::{Collection, Store};

type ByClass<T> = fn(&Store, ClassType) -> Vec<Record<T>>;

fn list_documents<T: Collection>(
    state: &mut AppState,
    params: &serde_json::Value,
    by_class: ByClass<T>,
) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    let user = authorize(store, ANY_ROLE)?;
    let class = scope_class(store, &user, get_optional_class(params, "class")?)?;
    let records = match class {
        Some(c) => by_class(store, c),
        None => store.get_all::<T>(),
    };
    Ok(json!({ "records": records }))
}

fn create_document<T: Collection>(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    authorize(store, ADMIN_ONLY)?;
    let mut params = params.clone();
    if let Some(obj) = params.as_object_mut() {
        let missing = obj
            .get("uploadDate")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().is_empty())
            .unwrap_or(true);
        if missing {
            obj.insert(
                "uploadDate".to_string(),
                json!(Local::now().date_naive().format("%Y-%m-%d").to_string()),
            );
        }
    }
    create_record::<T>(store, &params)
}

fn update_document<T: Collection>(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    authorize(store, ADMIN_ONLY)?;
    update_record::<T>(store, params)
}

fn delete_document<T: Collection>(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    authorize(store, ADMIN_ONLY)?;
    delete_record::<T>(store, params)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "results.list" => list_documents::<ResultSheet>(state, p, Store::results_by_class),
        "results.create" => create_document::<ResultSheet>(state, p),
        "results.update" => update_document::<ResultSheet>(state, p),
        "results.delete" => delete_document::<ResultSheet>(state, p),
        "hallTickets.list" => list_documents::<HallTicket>(state, p, Store::hall_tickets_by_class),
        "hallTickets.create" => create_document::<HallTicket>(state, p),
        "hallTickets.update" => update_document::<HallTicket>(state, p),
        "hallTickets.delete" => delete_document::<HallTicket>(state, p),
        _ => return None,
    };
    Some(respond(req, result))
}
