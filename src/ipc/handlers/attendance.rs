use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::calendar::parse_event_date;
use crate::error::PortalError;
use crate::ipc::helpers::{
    authorize, create_record, delete_record, get_optional_class, get_optional_str,
    get_required_class, parse_params, respond, store_mut, update_record, write_failed, HandlerErr,
    ANY_ROLE, STAFF,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Attendance, ClassType, Record, Role, Student, User};
use crate::stats::{class_rollup, overall_stats, student_stats};
use crate::store::{AttendanceSheet, Store};
use crate::transfer::attendance_to_csv;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkParams {
    date: String,
    subject: String,
    class: String,
    #[serde(default)]
    lecture_id: Option<String>,
    /// `studentId -> present`
    entries: BTreeMap<String, bool>,
}

/// Students only ever see their own linked record.
fn own_student_id(user: &User) -> Result<&str, HandlerErr> {
    user.student_id
        .as_deref()
        .ok_or_else(|| PortalError::unauthorized("student account is not linked to a student").into())
}

fn require_self_or_staff(user: &User, student_id: &str) -> Result<(), HandlerErr> {
    if user.role == Role::Student && own_student_id(user)? != student_id {
        return Err(PortalError::unauthorized("students may only view their own attendance").into());
    }
    Ok(())
}

fn scoped_attendance(
    store: &Store,
    user: &User,
    params: &serde_json::Value,
) -> Result<Vec<Record<Attendance>>, HandlerErr> {
    if let Some(student_id) = get_optional_str(params, "studentId")? {
        require_self_or_staff(user, &student_id)?;
        return Ok(store.attendance_by_student(&student_id));
    }
    if user.role == Role::Student {
        return Ok(store.attendance_by_student(own_student_id(user)?));
    }
    Ok(match get_optional_class(params, "class")? {
        Some(class) => store.attendance_by_class(class),
        None => store.get_all::<Attendance>(),
    })
}

fn attendance_list(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    let user = authorize(store, ANY_ROLE)?;
    let records = scoped_attendance(store, &user, params)?;
    Ok(json!({ "attendance": records }))
}

fn attendance_create(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    authorize(store, STAFF)?;
    create_record::<Attendance>(store, params)
}

fn attendance_mark(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    authorize(store, STAFF)?;
    let p: MarkParams = parse_params(params)?;
    let class = ClassType::parse_loose(&p.class)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown class: {}", p.class)))?;
    if p.subject.trim().is_empty() {
        return Err(HandlerErr::bad_params("subject is required"));
    }
    let Some(day) = parse_event_date(&p.date) else {
        return Err(HandlerErr::bad_params(format!("invalid date: {}", p.date)));
    };
    let sheet = AttendanceSheet {
        date: day.format("%Y-%m-%d").to_string(),
        subject: p.subject,
        class,
        lecture_id: p.lecture_id,
        entries: p.entries.into_iter().collect(),
    };
    let outcome = store.mark_attendance(&sheet).map_err(write_failed)?;
    Ok(json!({
        "created": outcome.created,
        "updated": outcome.updated,
        "records": outcome.records,
    }))
}

fn attendance_update(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    authorize(store, STAFF)?;
    update_record::<Attendance>(store, params)
}

fn attendance_delete(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    authorize(store, STAFF)?;
    delete_record::<Attendance>(store, params)
}

/// Returns the CSV text, or writes it to `outPath` when given.
fn attendance_export(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    authorize(store, STAFF)?;
    let records = match get_optional_class(params, "class")? {
        Some(class) => store.attendance_by_class(class),
        None => store.get_all::<Attendance>(),
    };
    let students = store.get_all::<Student>();
    let csv = attendance_to_csv(&records, &students)
        .map_err(|e| HandlerErr::from_anyhow("export_failed", e))?;

    match get_optional_str(params, "outPath")? {
        Some(out) => {
            let out = PathBuf::from(out);
            if let Some(parent) = out.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;
            }
            std::fs::write(&out, csv.as_bytes())
                .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;
            Ok(json!({ "path": out.to_string_lossy(), "rows": records.len() }))
        }
        None => Ok(json!({ "csv": csv, "rows": records.len() })),
    }
}

fn attendance_student_stats(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    let user = authorize(store, ANY_ROLE)?;
    let student_id = match get_optional_str(params, "studentId")? {
        Some(id) => id,
        None if user.role == Role::Student => own_student_id(&user)?.to_string(),
        None => return Err(HandlerErr::bad_params("missing studentId")),
    };
    require_self_or_staff(&user, &student_id)?;
    let subject = get_optional_str(params, "subject")?;
    let records = store.attendance_by_student(&student_id);
    Ok(json!({
        "studentId": student_id,
        "stats": student_stats(&records, subject.as_deref()),
    }))
}

fn attendance_class_rollup(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    authorize(store, STAFF)?;
    let class = get_required_class(params, "class")?;
    let subject = get_optional_str(params, "subject")?;
    let students = store.get_all::<Student>();
    let attendance = store.attendance_by_class(class);
    Ok(json!({
        "class": class,
        "rows": class_rollup(&students, &attendance, class, subject.as_deref()),
    }))
}

fn attendance_overall(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    let user = authorize(store, ANY_ROLE)?;
    let records = scoped_attendance(store, &user, params)?;
    Ok(json!({ "stats": overall_stats(&records) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "attendance.list" => attendance_list(state, &req.params),
        "attendance.create" => attendance_create(state, &req.params),
        "attendance.mark" => attendance_mark(state, &req.params),
        "attendance.update" => attendance_update(state, &req.params),
        "attendance.delete" => attendance_delete(state, &req.params),
        "attendance.export" => attendance_export(state, &req.params),
        "attendance.studentStats" => attendance_student_stats(state, &req.params),
        "attendance.classRollup" => attendance_class_rollup(state, &req.params),
        "attendance.overall" => attendance_overall(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
