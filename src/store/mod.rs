//! Persisted named collections over a key-value backend.
//!
//! Every collection is one JSON array stored under a fixed key. Each
//! operation reads the whole array, transforms it in memory and writes the
//! whole array back; the last write wins.

mod blobs;
mod migrate;

pub use blobs::UploadPolicy;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::calendar::parse_event_date;
use crate::db;
use crate::error::PortalError;
use crate::model::{
    Attendance, ClassType, EventType, HallTicket, Record, ResultSheet, Role, ScheduledEvent,
    Student, User, UserAccount,
};

pub mod keys {
    pub const STUDENTS: &str = "students";
    pub const ATTENDANCE: &str = "attendance";
    pub const RESULTS: &str = "results";
    pub const HALL_TICKETS: &str = "hall_tickets";
    pub const EVENTS: &str = "events";
    pub const FILES: &str = "files";
    pub const USERS: &str = "users";
    pub const SESSION: &str = "session";

    /// Keys holding JSON arrays.
    pub const LIST_COLLECTIONS: [&str; 6] = [STUDENTS, ATTENDANCE, RESULTS, HALL_TICKETS, EVENTS, USERS];
}

/// Minimal string key-value storage. Implementations must be usable from a
/// single thread only.
pub trait KvBackend {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&mut self, key: &str) -> anyhow::Result<()>;
    fn schema_version(&self) -> anyhow::Result<i64>;
    fn set_schema_version(&mut self, version: i64) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryKv {
    values: BTreeMap<String, String>,
    version: i64,
}

impl KvBackend for MemoryKv {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        self.values.remove(key);
        Ok(())
    }

    fn schema_version(&self) -> anyhow::Result<i64> {
        Ok(self.version)
    }

    fn set_schema_version(&mut self, version: i64) -> anyhow::Result<()> {
        self.version = version;
        Ok(())
    }
}

/// An entity type persisted as a named collection.
pub trait Collection: Serialize + DeserializeOwned + Clone {
    const KEY: &'static str;
}

impl Collection for Student {
    const KEY: &'static str = keys::STUDENTS;
}
impl Collection for Attendance {
    const KEY: &'static str = keys::ATTENDANCE;
}
impl Collection for ResultSheet {
    const KEY: &'static str = keys::RESULTS;
}
impl Collection for HallTicket {
    const KEY: &'static str = keys::HALL_TICKETS;
}
impl Collection for ScheduledEvent {
    const KEY: &'static str = keys::EVENTS;
}
impl Collection for UserAccount {
    const KEY: &'static str = keys::USERS;
}

/// One attendance sheet for a lecture: every entry is upserted by
/// `(student_id, date, subject)`.
#[derive(Debug, Clone)]
pub struct AttendanceSheet {
    pub date: String,
    pub subject: String,
    pub class: ClassType,
    pub lecture_id: Option<String>,
    pub entries: Vec<(String, bool)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkOutcome {
    pub created: usize,
    pub updated: usize,
    pub records: Vec<Record<Attendance>>,
}

pub struct Store {
    kv: Box<dyn KvBackend>,
}

impl Store {
    pub fn new(kv: Box<dyn KvBackend>) -> anyhow::Result<Self> {
        let mut store = Self { kv };
        migrate::run(&mut store)?;
        Ok(store)
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Self::new(Box::new(MemoryKv::default()))
    }

    /// Opens (creating if needed) the SQLite-backed store of a workspace.
    pub fn open(workspace: &Path) -> anyhow::Result<Self> {
        info!(workspace = %workspace.display(), "opening workspace store");
        let conn = db::open_db(workspace)?;
        Self::new(Box::new(db::SqliteKv::new(conn)))
    }

    pub(crate) fn backend(&self) -> &dyn KvBackend {
        self.kv.as_ref()
    }

    pub(crate) fn backend_mut(&mut self) -> &mut dyn KvBackend {
        self.kv.as_mut()
    }

    /// Raw read. Backend failures read as "absent".
    pub fn read_raw(&self, key: &str) -> Option<String> {
        match self.kv.get(key) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "kv read failed; treating as absent");
                None
            }
        }
    }

    pub fn write_raw(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.kv
            .set(key, value)
            .with_context(|| format!("failed to write {}", key))
    }

    pub fn remove_raw(&mut self, key: &str) -> anyhow::Result<()> {
        self.kv
            .remove(key)
            .with_context(|| format!("failed to remove {}", key))
    }

    /// Reads a JSON array collection as raw values. Absent or corrupt data is
    /// an empty list.
    pub(crate) fn read_values(&self, key: &str) -> Vec<serde_json::Value> {
        let Some(text) = self.read_raw(key) else {
            return Vec::new();
        };
        match serde_json::from_str::<Vec<serde_json::Value>>(&text) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "collection is not a JSON array; treating as empty");
                Vec::new()
            }
        }
    }

    pub(crate) fn write_values(&mut self, key: &str, values: &[serde_json::Value]) -> anyhow::Result<()> {
        let text = serde_json::to_string(values)
            .with_context(|| format!("failed to serialize {}", key))?;
        self.write_raw(key, &text)
    }

    pub fn get_all<T: Collection>(&self) -> Vec<Record<T>> {
        self.read_values(T::KEY)
            .into_iter()
            .filter_map(|v| match serde_json::from_value::<Record<T>>(v) {
                Ok(r) => Some(r),
                Err(e) => {
                    warn!(key = T::KEY, error = %e, "skipping unreadable record");
                    None
                }
            })
            .collect()
    }

    fn id_of(value: &serde_json::Value) -> Option<&str> {
        value.get("id").and_then(|v| v.as_str())
    }

    pub fn find<T: Collection>(&self, id: &str) -> Option<Record<T>> {
        self.get_all::<T>().into_iter().find(|r| r.id == id)
    }

    // Writes work on the raw array so entries that no longer decode survive
    // unrelated edits untouched.

    pub fn add<T: Collection>(&mut self, data: T) -> anyhow::Result<Record<T>> {
        let mut values = self.read_values(T::KEY);
        let record = Record {
            id: Uuid::new_v4().to_string(),
            data,
        };
        values.push(serde_json::to_value(&record)?);
        self.write_values(T::KEY, &values)?;
        debug!(key = T::KEY, id = %record.id, total = values.len(), "record added");
        Ok(record)
    }

    /// Merges `patch` onto the record with `id`. `Ok(None)` when no record
    /// has that id. The `id` field of the patch is ignored.
    pub fn update<T: Collection>(
        &mut self,
        id: &str,
        patch: &serde_json::Map<String, serde_json::Value>,
    ) -> anyhow::Result<Option<Record<T>>> {
        let mut values = self.read_values(T::KEY);
        let Some(idx) = values.iter().position(|v| Self::id_of(v) == Some(id)) else {
            return Ok(None);
        };

        let mut merged = values[idx].clone();
        if let Some(obj) = merged.as_object_mut() {
            for (k, v) in patch {
                if k == "id" {
                    continue;
                }
                obj.insert(k.clone(), v.clone());
            }
        }
        let updated: Record<T> = serde_json::from_value(merged)
            .map_err(|e| PortalError::validation(format!("invalid {} update: {}", T::KEY, e)))?;

        values[idx] = serde_json::to_value(&updated)?;
        self.write_values(T::KEY, &values)?;
        debug!(key = T::KEY, id, "record updated");
        Ok(Some(updated))
    }

    pub fn delete<T: Collection>(&mut self, id: &str) -> anyhow::Result<bool> {
        let mut values = self.read_values(T::KEY);
        let before = values.len();
        values.retain(|v| Self::id_of(v) != Some(id));
        if values.len() == before {
            return Ok(false);
        }
        self.write_values(T::KEY, &values)?;
        debug!(key = T::KEY, id, "record deleted");
        Ok(true)
    }

    /// Clears every named collection and the active session.
    pub fn reset_all(&mut self) -> anyhow::Result<()> {
        for key in keys::LIST_COLLECTIONS {
            self.write_raw(key, "[]")?;
        }
        self.write_raw(keys::FILES, "{}")?;
        self.remove_raw(keys::SESSION)?;
        info!("store reset to empty collections");
        Ok(())
    }

    /// Replaces every collection with the given raw contents and normalizes
    /// the result the same way an open does. The session is kept.
    pub fn restore_collections(
        &mut self,
        lists: &[(&str, Vec<serde_json::Value>)],
        files: &serde_json::Map<String, serde_json::Value>,
    ) -> anyhow::Result<()> {
        for key in keys::LIST_COLLECTIONS {
            let values = lists
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_slice())
                .unwrap_or(&[]);
            self.write_values(key, values)?;
        }
        let text = serde_json::to_string(files).context("failed to serialize files")?;
        self.write_raw(keys::FILES, &text)?;
        migrate::run(self)?;
        info!("collections restored");
        Ok(())
    }

    // Students

    pub fn students_by_class(&self, class: ClassType) -> Vec<Record<Student>> {
        self.get_all::<Student>()
            .into_iter()
            .filter(|s| s.data.class == class)
            .collect()
    }

    pub fn student_by_email(&self, email: &str) -> Option<Record<Student>> {
        self.get_all::<Student>()
            .into_iter()
            .find(|s| s.data.email.eq_ignore_ascii_case(email))
    }

    // Attendance

    pub fn attendance_by_class(&self, class: ClassType) -> Vec<Record<Attendance>> {
        self.get_all::<Attendance>()
            .into_iter()
            .filter(|a| a.data.class == class)
            .collect()
    }

    pub fn attendance_by_student(&self, student_id: &str) -> Vec<Record<Attendance>> {
        self.get_all::<Attendance>()
            .into_iter()
            .filter(|a| a.data.student_id == student_id)
            .collect()
    }

    pub fn mark_attendance(&mut self, sheet: &AttendanceSheet) -> anyhow::Result<MarkOutcome> {
        let mut values = self.read_values(keys::ATTENDANCE);
        let mut out = MarkOutcome::default();

        for (student_id, present) in &sheet.entries {
            let existing = values.iter().enumerate().find_map(|(idx, v)| {
                let rec = serde_json::from_value::<Record<Attendance>>(v.clone()).ok()?;
                (rec.data.student_id == *student_id
                    && same_day(&rec.data.date, &sheet.date)
                    && rec.data.subject == sheet.subject)
                    .then_some((idx, rec))
            });
            match existing {
                Some((idx, mut rec)) => {
                    rec.data.present = *present;
                    rec.data.class = sheet.class;
                    if sheet.lecture_id.is_some() {
                        rec.data.lecture_id = sheet.lecture_id.clone();
                    }
                    values[idx] = serde_json::to_value(&rec)?;
                    out.updated += 1;
                    out.records.push(rec);
                }
                None => {
                    let rec = Record {
                        id: Uuid::new_v4().to_string(),
                        data: Attendance {
                            date: sheet.date.clone(),
                            student_id: student_id.clone(),
                            subject: sheet.subject.clone(),
                            present: *present,
                            class: sheet.class,
                            lecture_id: sheet.lecture_id.clone(),
                        },
                    };
                    values.push(serde_json::to_value(&rec)?);
                    out.created += 1;
                    out.records.push(rec);
                }
            }
        }

        self.write_values(keys::ATTENDANCE, &values)?;
        debug!(
            created = out.created,
            updated = out.updated,
            date = %sheet.date,
            subject = %sheet.subject,
            "attendance marked"
        );
        Ok(out)
    }

    // Results and hall tickets

    pub fn results_by_class(&self, class: ClassType) -> Vec<Record<ResultSheet>> {
        self.get_all::<ResultSheet>()
            .into_iter()
            .filter(|r| r.data.class == class)
            .collect()
    }

    pub fn hall_tickets_by_class(&self, class: ClassType) -> Vec<Record<HallTicket>> {
        self.get_all::<HallTicket>()
            .into_iter()
            .filter(|h| h.data.class == class)
            .collect()
    }

    // Events

    /// Events for one class plus every global (class-less) event.
    pub fn events_by_class(&self, class: ClassType) -> Vec<Record<ScheduledEvent>> {
        self.get_all::<ScheduledEvent>()
            .into_iter()
            .filter(|e| e.data.class.is_none_or_eq(class))
            .collect()
    }

    /// Events a user may see on the calendar, optionally narrowed to one class.
    pub fn events_visible_to(
        &self,
        user: &User,
        class_filter: Option<ClassType>,
    ) -> Vec<Record<ScheduledEvent>> {
        match (user.role, class_filter) {
            (Role::Admin, None) => self.get_all::<ScheduledEvent>(),
            (Role::Admin | Role::Teacher, Some(class)) => self.events_by_class(class),
            (Role::Teacher, None) => {
                let classes = user.teacher_classes();
                self.get_all::<ScheduledEvent>()
                    .into_iter()
                    .filter(|e| match e.data.class {
                        None => true,
                        Some(c) => classes.contains(&c),
                    })
                    .collect()
            }
            (Role::Student, _) => match self.class_of_student_user(user) {
                Some(class) => self.events_by_class(class),
                None => Vec::new(),
            },
        }
    }

    /// Lecture events scheduled for any of a teacher's classes.
    pub fn teacher_lectures(&self, user: &User) -> Vec<Record<ScheduledEvent>> {
        let classes = user.teacher_classes();
        self.get_all::<ScheduledEvent>()
            .into_iter()
            .filter(|e| {
                e.data.kind == EventType::Lecture
                    && e.data.class.map(|c| classes.contains(&c)).unwrap_or(false)
            })
            .collect()
    }

    // Users

    pub fn user_by_email(&self, email: &str) -> Option<Record<UserAccount>> {
        self.get_all::<UserAccount>()
            .into_iter()
            .find(|u| u.data.email.eq_ignore_ascii_case(email))
    }

    /// The class a student user belongs to, via its linked student record.
    pub fn class_of_student_user(&self, user: &User) -> Option<ClassType> {
        let student_id = user.student_id.as_deref()?;
        self.find::<Student>(student_id).map(|s| s.data.class)
    }
}

/// Attendance dates match by calendar day, so `2024-03-11` and
/// `2024-03-11T09:00` name the same lecture day.
fn same_day(a: &str, b: &str) -> bool {
    match (parse_event_date(a), parse_event_date(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a.trim() == b.trim(),
    }
}

trait OptionClassExt {
    fn is_none_or_eq(&self, class: ClassType) -> bool;
}

impl OptionClassExt for Option<ClassType> {
    fn is_none_or_eq(&self, class: ClassType) -> bool {
        match self {
            None => true,
            Some(c) => *c == class,
        }
    }
}
