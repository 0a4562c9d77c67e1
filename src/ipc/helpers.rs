use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::warn;

use crate::auth::{require_role, AuthService};
use crate::error::PortalError;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::{ClassType, Record, Role, User};
use crate::store::{Collection, Store};

pub const ANY_ROLE: &[Role] = &[Role::Admin, Role::Teacher, Role::Student];
pub const STAFF: &[Role] = &[Role::Admin, Role::Teacher];
pub const ADMIN_ONLY: &[Role] = &[Role::Admin];

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    /// Domain errors keep their own code; anything else gets `fallback`.
    pub fn from_anyhow(fallback: &'static str, e: anyhow::Error) -> Self {
        match e.downcast_ref::<PortalError>() {
            Some(pe) => Self::new(pe.code(), pe.to_string()),
            None => {
                warn!(code = fallback, error = %format!("{:#}", e), "request failed");
                Self::new(fallback, format!("{:#}", e))
            }
        }
    }
}

impl From<PortalError> for HandlerErr {
    fn from(e: PortalError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

pub fn write_failed(e: anyhow::Error) -> HandlerErr {
    HandlerErr::from_anyhow("db_write_failed", e)
}

pub fn respond(req: &Request, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn store_mut(state: &mut AppState) -> Result<&mut Store, HandlerErr> {
    state
        .store
        .as_mut()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn session_user(store: &mut Store) -> Result<User, HandlerErr> {
    AuthService::new(store)
        .current_user(Utc::now())
        .map_err(write_failed)?
        .ok_or_else(|| PortalError::Unauthenticated.into())
}

/// The session user, provided their role is one of `roles`.
pub fn authorize(store: &mut Store, roles: &[Role]) -> Result<User, HandlerErr> {
    let user = session_user(store)?;
    require_role(&user, roles)?;
    Ok(user)
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn get_optional_class(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<ClassType>, HandlerErr> {
    let Some(raw) = get_optional_str(params, key)? else {
        return Ok(None);
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    ClassType::parse_loose(&raw)
        .map(Some)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown class: {}", raw)))
}

pub fn get_required_class(params: &serde_json::Value, key: &str) -> Result<ClassType, HandlerErr> {
    get_optional_class(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_patch(
    params: &serde_json::Value,
) -> Result<serde_json::Map<String, serde_json::Value>, HandlerErr> {
    params
        .get("patch")
        .and_then(|v| v.as_object())
        .cloned()
        .ok_or_else(|| HandlerErr::bad_params("missing patch object"))
}

pub fn parse_params<T: DeserializeOwned>(params: &serde_json::Value) -> Result<T, HandlerErr> {
    serde_json::from_value(params.clone()).map_err(|e| HandlerErr::bad_params(e.to_string()))
}

/// Rewrites a loose `class` value (`"FY BSC"`) to its canonical key.
fn canonical_class_field(
    obj: &mut serde_json::Map<String, serde_json::Value>,
) -> Result<(), HandlerErr> {
    let Some(raw) = obj.get("class").and_then(|v| v.as_str()) else {
        return Ok(());
    };
    let class = ClassType::parse_loose(raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown class: {}", raw)))?;
    obj.insert("class".to_string(), json!(class));
    Ok(())
}

pub fn create_record<T: Collection>(
    store: &mut Store,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut params = params.clone();
    if let Some(obj) = params.as_object_mut() {
        obj.remove("id");
        canonical_class_field(obj)?;
    }
    let data: T = parse_params(&params)?;
    let record = store.add(data).map_err(write_failed)?;
    Ok(json!({ "record": record }))
}

/// A missing id is `record: null`, not an error.
pub fn update_record<T: Collection>(
    store: &mut Store,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let mut patch = get_patch(params)?;
    canonical_class_field(&mut patch)?;
    let record: Option<Record<T>> = store.update(&id, &patch).map_err(write_failed)?;
    Ok(json!({ "record": record }))
}

pub fn delete_record<T: Collection>(
    store: &mut Store,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let deleted = store.delete::<T>(&id).map_err(write_failed)?;
    Ok(json!({ "deleted": deleted }))
}

/// Students may only look at their own class; other roles pick freely.
pub fn scope_class(
    store: &Store,
    user: &User,
    requested: Option<ClassType>,
) -> Result<Option<ClassType>, HandlerErr> {
    if user.role != Role::Student {
        return Ok(requested);
    }
    let own = store.class_of_student_user(user);
    match (own, requested) {
        (Some(own), Some(req)) if own != req => Err(PortalError::unauthorized(
            "students may only view their own class",
        )
        .into()),
        (Some(own), _) => Ok(Some(own)),
        (None, _) => Err(PortalError::unauthorized("student account is not linked to a class").into()),
    }
}
