use chrono::Utc;
use serde_json::json;

use crate::ipc::helpers::{authorize, respond, store_mut, HandlerErr, ANY_ROLE};
use crate::ipc::types::{AppState, Request};
use crate::model::{Attendance, HallTicket, ResultSheet, Role, ScheduledEvent, Student, UserAccount};
use crate::stats::{dashboard_stats, Snapshot};

fn dashboard_stats_handler(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let store = store_mut(state)?;
    let user = authorize(store, ANY_ROLE)?;
    let student_class = match user.role {
        Role::Student => store.class_of_student_user(&user),
        _ => None,
    };

    let students = store.get_all::<Student>();
    let users = store.get_all::<UserAccount>();
    let attendance = store.get_all::<Attendance>();
    let results = store.get_all::<ResultSheet>();
    let hall_tickets = store.get_all::<HallTicket>();
    let events = store.get_all::<ScheduledEvent>();
    let snap = Snapshot {
        students: &students,
        users: &users,
        attendance: &attendance,
        results: &results,
        hall_tickets: &hall_tickets,
        events: &events,
    };
    let stats = dashboard_stats(&user, student_class, &snap, Utc::now());
    Ok(json!({ "role": user.role, "stats": stats }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.stats" => Some(respond(req, dashboard_stats_handler(state))),
        _ => None,
    }
}
