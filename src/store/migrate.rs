//! Normalization run once when a store is opened.
//!
//! - every named collection exists with its empty initial value;
//! - loosely spelled class values ("FY BSC") are rewritten to their canonical form;
//! - student users that still carry `class` are linked to a student record
//!   through `studentId`, and the `class` field is removed.

use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::{keys, Store};
use crate::db::SCHEMA_VERSION;
use crate::model::ClassType;

pub(super) fn run(store: &mut Store) -> anyhow::Result<()> {
    ensure_initialized(store)?;
    for key in [
        keys::STUDENTS,
        keys::ATTENDANCE,
        keys::RESULTS,
        keys::HALL_TICKETS,
        keys::EVENTS,
    ] {
        normalize_class_field(store, key)?;
    }
    normalize_teacher_classes(store)?;
    link_legacy_student_users(store)?;

    let version = store.backend().schema_version()?;
    if version < SCHEMA_VERSION {
        store.backend_mut().set_schema_version(SCHEMA_VERSION)?;
        info!(from = version, to = SCHEMA_VERSION, "store schema upgraded");
    }
    Ok(())
}

fn ensure_initialized(store: &mut Store) -> anyhow::Result<()> {
    for key in keys::LIST_COLLECTIONS {
        if store.read_raw(key).is_none() {
            store.write_raw(key, "[]")?;
        }
    }
    if store.read_raw(keys::FILES).is_none() {
        store.write_raw(keys::FILES, "{}")?;
    }
    Ok(())
}

fn canonical_class(raw: &str) -> Option<&'static str> {
    ClassType::parse_loose(raw).map(ClassType::as_str)
}

fn normalize_class_value(v: &mut Value) -> bool {
    let Some(raw) = v.as_str() else {
        return false;
    };
    match canonical_class(raw) {
        Some(canonical) if canonical != raw => {
            *v = Value::String(canonical.to_string());
            true
        }
        _ => false,
    }
}

fn normalize_class_field(store: &mut Store, key: &str) -> anyhow::Result<()> {
    let mut values = store.read_values(key);
    let mut changed = 0usize;
    for v in values.iter_mut() {
        if let Some(class) = v.get_mut("class") {
            if normalize_class_value(class) {
                changed += 1;
            }
        }
    }
    if changed > 0 {
        store.write_values(key, &values)?;
        info!(key, changed, "normalized class values");
    }
    Ok(())
}

fn normalize_teacher_classes(store: &mut Store) -> anyhow::Result<()> {
    let mut users = store.read_values(keys::USERS);
    let mut changed = false;
    for u in users.iter_mut() {
        if let Some(Value::Array(classes)) = u.get_mut("classes") {
            for c in classes.iter_mut() {
                changed |= normalize_class_value(c);
            }
        }
    }
    if changed {
        store.write_values(keys::USERS, &users)?;
    }
    Ok(())
}

fn link_legacy_student_users(store: &mut Store) -> anyhow::Result<()> {
    let mut users = store.read_values(keys::USERS);
    let mut students = store.read_values(keys::STUDENTS);
    let mut users_changed = false;
    let mut students_changed = false;

    for u in users.iter_mut() {
        let Some(obj) = u.as_object_mut() else {
            continue;
        };
        if obj.get("role").and_then(|v| v.as_str()) != Some("student") {
            continue;
        }
        let Some(class_value) = obj.get("class").cloned() else {
            continue;
        };
        if obj.get("studentId").and_then(|v| v.as_str()).is_none() {
            let email = obj
                .get("email")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let existing = students.iter().find_map(|s| {
                let same = s
                    .get("email")
                    .and_then(|v| v.as_str())
                    .map(|e| e.eq_ignore_ascii_case(&email))
                    .unwrap_or(false);
                if same {
                    s.get("id").and_then(|v| v.as_str()).map(|s| s.to_string())
                } else {
                    None
                }
            });
            let student_id = match existing {
                Some(id) => Some(id),
                None => {
                    let class = class_value
                        .as_str()
                        .and_then(canonical_class)
                        .map(|c| c.to_string());
                    match class {
                        Some(class) => {
                            let id = Uuid::new_v4().to_string();
                            students.push(json!({
                                "id": id.clone(),
                                "name": obj.get("name").cloned().unwrap_or(Value::String(String::new())),
                                "email": email,
                                "class": class,
                            }));
                            students_changed = true;
                            Some(id)
                        }
                        None => {
                            warn!(email = %email, "student user has an unknown class; left unlinked");
                            None
                        }
                    }
                }
            };
            if let Some(id) = student_id {
                obj.insert("studentId".to_string(), Value::String(id));
            }
        }
        obj.remove("class");
        users_changed = true;
    }

    if students_changed {
        store.write_values(keys::STUDENTS, &students)?;
    }
    if users_changed {
        store.write_values(keys::USERS, &users)?;
        info!("linked legacy student users to student records");
    }
    Ok(())
}
