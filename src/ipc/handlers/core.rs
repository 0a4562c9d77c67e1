use serde_json::json;
use std::path::PathBuf;
use tracing::info;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{authorize, respond, store_mut, write_failed, HandlerErr, ADMIN_ONLY};
use crate::ipc::types::{AppState, Request};
use crate::model::{ClassType, UserAccount};
use crate::store::Store;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    // Release the previous workspace before opening the next one.
    state.store = None;
    match Store::open(&path) {
        Ok(store) => {
            state.workspace = Some(path.clone());
            state.store = Some(store);
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => {
            state.workspace = None;
            err(&req.id, "db_open_failed", format!("{e:#}"), None)
        }
    }
}

/// A workspace without accounts may be reset by anyone; otherwise admin only.
fn app_reset(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    if !store.get_all::<UserAccount>().is_empty() {
        authorize(store, ADMIN_ONLY)?;
    }
    store.reset_all().map_err(write_failed)?;
    info!("application reset");
    Ok(json!({ "reset": true }))
}

fn handle_meta_classes(req: &Request) -> serde_json::Value {
    let classes: Vec<serde_json::Value> = ClassType::ALL
        .into_iter()
        .map(|c| {
            json!({
                "value": c,
                "label": c.label(),
                "subjects": c.subjects(),
            })
        })
        .collect();
    ok(&req.id, json!({ "classes": classes }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "app.reset" => Some(respond(req, app_reset(state))),
        "meta.classes" => Some(handle_meta_classes(req)),
        _ => None,
    }
}
