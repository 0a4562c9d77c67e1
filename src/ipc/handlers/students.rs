use serde_json::json;
use tracing::info;

use crate::ipc::helpers::{
    authorize, create_record, delete_record, get_optional_class, get_optional_str,
    get_required_str, respond, scope_class, store_mut, update_record, write_failed, HandlerErr,
    ADMIN_ONLY, ANY_ROLE,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Role, Student};
use crate::stats::class_counts;
use crate::transfer::parse_students_csv;

fn students_list(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    let user = authorize(store, ANY_ROLE)?;
    let class = scope_class(store, &user, get_optional_class(params, "class")?)?;
    let students = match class {
        Some(c) => store.students_by_class(c),
        None => store.get_all::<Student>(),
    };
    Ok(json!({ "students": students }))
}

fn students_get(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    let user = authorize(store, ANY_ROLE)?;
    let id = get_required_str(params, "id")?;
    let student = store.find::<Student>(&id);
    if user.role == Role::Student {
        if let Some(s) = &student {
            scope_class(store, &user, Some(s.data.class))?;
        }
    }
    Ok(json!({ "student": student }))
}

fn students_create(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    authorize(store, ADMIN_ONLY)?;
    create_record::<Student>(store, params)
}

fn students_update(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    authorize(store, ADMIN_ONLY)?;
    update_record::<Student>(store, params)
}

fn students_delete(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    authorize(store, ADMIN_ONLY)?;
    delete_record::<Student>(store, params)
}

/// Accepts either `text` (CSV content) or `path` (a CSV file on disk).
fn students_import(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    authorize(store, ADMIN_ONLY)?;

    let text = match get_optional_str(params, "text")? {
        Some(t) => t,
        None => {
            let path = get_required_str(params, "path")?;
            std::fs::read_to_string(&path).map_err(|e| {
                HandlerErr::new("import_failed", format!("failed to read {}: {}", path, e))
            })?
        }
    };
    let parsed = parse_students_csv(&text)
        .map_err(|e| HandlerErr::from_anyhow("import_failed", e))?;

    let mut imported = Vec::with_capacity(parsed.students.len());
    for student in parsed.students {
        imported.push(store.add(student).map_err(write_failed)?);
    }
    info!(
        imported = imported.len(),
        skipped = parsed.skipped_incomplete + parsed.skipped_unknown_class.len(),
        "students imported"
    );
    Ok(json!({
        "imported": imported.len(),
        "students": imported,
        "skippedIncomplete": parsed.skipped_incomplete,
        "skippedUnknownClass": parsed.skipped_unknown_class,
    }))
}

fn students_class_counts(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    authorize(store, ANY_ROLE)?;
    let students = store.get_all::<Student>();
    Ok(json!({ "classes": class_counts(&students) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => students_list(state, &req.params),
        "students.get" => students_get(state, &req.params),
        "students.create" => students_create(state, &req.params),
        "students.update" => students_update(state, &req.params),
        "students.delete" => students_delete(state, &req.params),
        "students.import" => students_import(state, &req.params),
        "students.classCounts" => students_class_counts(state),
        _ => return None,
    };
    Some(respond(req, result))
}
