use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;
use serde_json::json;

use crate::ipc::helpers::{
    authorize, get_required_str, parse_params, respond, store_mut, write_failed, HandlerErr,
    ADMIN_ONLY, ANY_ROLE,
};
use crate::ipc::types::{AppState, Request};
use crate::store::UploadPolicy;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadParams {
    name: String,
    mime_type: String,
    data_base64: String,
    #[serde(default)]
    max_bytes: Option<u64>,
    #[serde(default)]
    accept: Option<Vec<String>>,
}

impl UploadParams {
    fn policy(&self) -> UploadPolicy {
        let mut policy = UploadPolicy::default();
        if let Some(max) = self.max_bytes {
            policy.max_bytes = max;
        }
        if let Some(accept) = &self.accept {
            policy.accept = accept.clone();
        }
        policy
    }
}

fn files_upload(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    authorize(store, ADMIN_ONLY)?;
    let p: UploadParams = parse_params(params)?;
    let bytes = BASE64
        .decode(p.data_base64.trim().as_bytes())
        .map_err(|e| HandlerErr::bad_params(format!("dataBase64 is not valid base64: {}", e)))?;
    let handle = store
        .upload_blob(&bytes, &p.name, &p.mime_type, &p.policy())
        .map_err(write_failed)?;
    Ok(json!({ "handle": handle, "size": bytes.len() }))
}

/// `url` is the resolved `data:` URL, the input unchanged when it is not a
/// file handle, or null for a missing file.
fn files_resolve(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    authorize(store, ANY_ROLE)?;
    let handle = get_required_str(params, "handle")?;
    Ok(json!({ "url": store.resolve_url(&handle) }))
}

fn files_info(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    authorize(store, ANY_ROLE)?;
    let handle = get_required_str(params, "handle")?;
    let info = store.blob_info(&handle).map(|b| {
        json!({
            "id": b.id,
            "name": b.name,
            "mimeType": b.mime_type,
            "size": b.size,
            "sha256": b.sha256,
            "uploadDate": b.upload_date,
        })
    });
    Ok(json!({ "file": info }))
}

fn files_delete(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    authorize(store, ADMIN_ONLY)?;
    let handle = get_required_str(params, "handle")?;
    let deleted = store.delete_blob(&handle).map_err(write_failed)?;
    Ok(json!({ "deleted": deleted }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "files.upload" => files_upload(state, &req.params),
        "files.resolve" => files_resolve(state, &req.params),
        "files.info" => files_info(state, &req.params),
        "files.delete" => files_delete(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
