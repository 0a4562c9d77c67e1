use serde_json::json;
use std::path::PathBuf;
use tracing::warn;

use crate::backup;
use crate::ipc::helpers::{authorize, respond, store_mut, HandlerErr, ADMIN_ONLY};
use crate::ipc::types::{AppState, Request};

fn required_path(params: &serde_json::Value, key: &str) -> Result<PathBuf, HandlerErr> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(PathBuf::from(v.trim())),
        _ => Err(HandlerErr::bad_params(format!("missing {}", key))),
    }
}

fn backup_export(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    authorize(store, ADMIN_ONLY)?;
    let out = required_path(params, "outPath")?;

    let summary = backup::export_bundle(store, &out).map_err(|e| HandlerErr {
        code: "export_failed",
        message: format!("{e:#}"),
        details: Some(json!({ "path": out.to_string_lossy() })),
    })?;
    Ok(json!({
        "path": out.to_string_lossy(),
        "bundleFormat": summary.bundle_format,
        "collections": summary.collections,
    }))
}

/// Every collection is replaced by the bundle's. A bundle that fails its
/// checks leaves the workspace as it was.
fn backup_import(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    authorize(store, ADMIN_ONLY)?;
    let src = required_path(params, "inPath")?;
    if !src.is_file() {
        return Err(HandlerErr {
            code: "not_found",
            message: "bundle file not found".to_string(),
            details: Some(json!({ "path": src.to_string_lossy() })),
        });
    }

    let summary = backup::import_bundle(store, &src).map_err(|e| {
        warn!(path = %src.display(), error = %format!("{e:#}"), "bundle import rejected");
        HandlerErr {
            code: "import_failed",
            message: format!("{e:#}"),
            details: Some(json!({ "path": src.to_string_lossy() })),
        }
    })?;
    Ok(json!({
        "bundleFormat": summary.bundle_format,
        "collections": summary.collections,
        "unreadable": summary.unreadable,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backup.exportBundle" => backup_export(state, &req.params),
        "backup.importBundle" => backup_import(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
