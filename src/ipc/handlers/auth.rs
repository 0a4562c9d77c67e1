use chrono::Utc;
use serde_json::json;

use crate::auth::{AuthService, Registration};
use crate::ipc::helpers::{
    get_optional_str, get_patch, get_required_str, parse_params, respond, session_user, store_mut,
    write_failed, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::Role;

fn parse_role(raw: &str) -> Result<Role, HandlerErr> {
    serde_json::from_value(json!(raw.trim().to_lowercase()))
        .map_err(|_| HandlerErr::bad_params(format!("unknown role: {}", raw)))
}

fn auth_register(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    let reg: Registration = parse_params(params)?;
    let user = AuthService::new(store)
        .register(reg)
        .map_err(write_failed)?;
    Ok(json!({ "user": user }))
}

fn auth_login(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    let email = get_required_str(params, "email")?;
    let password = get_required_str(params, "password")?;
    let role = parse_role(&get_required_str(params, "role")?)?;
    match AuthService::new(store)
        .login(&email, &password, role, Utc::now())
        .map_err(write_failed)?
    {
        Some(user) => Ok(json!({ "user": user })),
        None => Err(HandlerErr::new("invalid_credentials", "Invalid credentials")),
    }
}

fn auth_logout(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    AuthService::new(store).logout().map_err(write_failed)?;
    Ok(json!({ "loggedOut": true }))
}

fn auth_current_user(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    let user = AuthService::new(store)
        .current_user(Utc::now())
        .map_err(write_failed)?;
    Ok(json!({ "user": user }))
}

fn auth_change_password(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    let actor = session_user(store)?;
    let current = get_required_str(params, "currentPassword")?;
    let next = get_required_str(params, "newPassword")?;
    AuthService::new(store)
        .change_password(&actor, &current, &next)
        .map_err(write_failed)?;
    Ok(json!({ "changed": true }))
}

fn users_list(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    let actor = session_user(store)?;
    let role = match get_optional_str(params, "role")? {
        Some(r) => Some(parse_role(&r)?),
        None => None,
    };
    let users = AuthService::new(store)
        .list_users(&actor, role)
        .map_err(write_failed)?;
    Ok(json!({ "users": users }))
}

fn users_update(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    let actor = session_user(store)?;
    let id = get_required_str(params, "id")?;
    let patch = get_patch(params)?;
    let user = AuthService::new(store)
        .update_user(&actor, &id, &patch)
        .map_err(write_failed)?;
    Ok(json!({ "user": user }))
}

fn users_delete(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    let actor = session_user(store)?;
    let id = get_required_str(params, "id")?;
    let deleted = AuthService::new(store)
        .delete_user(&actor, &id)
        .map_err(write_failed)?;
    Ok(json!({ "deleted": deleted }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "auth.register" => auth_register(state, &req.params),
        "auth.login" => auth_login(state, &req.params),
        "auth.logout" => auth_logout(state),
        "auth.currentUser" => auth_current_user(state),
        "auth.changePassword" => auth_change_password(state, &req.params),
        "users.list" => users_list(state, &req.params),
        "users.update" => users_update(state, &req.params),
        "users.delete" => users_delete(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
