use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

use crate::calendar;
use crate::model::{
    Attendance, ClassType, HallTicket, Record, ResultSheet, Role, ScheduledEvent, Student, User,
    UserAccount,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStats {
    pub total: usize,
    pub present: usize,
    pub percentage: u32,
}

/// `round(100 * present / total)`, 0 for an empty list.
pub fn attendance_percentage(present: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (100.0 * present as f64 / total as f64).round() as u32
}

/// Stats over one student's records, optionally for a single subject.
pub fn student_stats(records: &[Record<Attendance>], subject: Option<&str>) -> StudentStats {
    let mut total = 0usize;
    let mut present = 0usize;
    for r in records {
        if let Some(s) = subject {
            if r.data.subject != s {
                continue;
            }
        }
        total += 1;
        if r.data.present {
            present += 1;
        }
    }
    StudentStats {
        total,
        present,
        percentage: attendance_percentage(present, total),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttendanceBand {
    Good,
    Average,
    Poor,
}

impl AttendanceBand {
    /// Lower bounds are inclusive: 75 is Good, 50 is Average.
    pub fn for_percentage(pct: u32) -> Self {
        if pct >= 75 {
            AttendanceBand::Good
        } else if pct >= 50 {
            AttendanceBand::Average
        } else {
            AttendanceBand::Poor
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupRow {
    pub student_id: String,
    pub student_name: String,
    #[serde(flatten)]
    pub stats: StudentStats,
    pub status: AttendanceBand,
}

/// One row per student of `class`, in store order.
pub fn class_rollup(
    students: &[Record<Student>],
    attendance: &[Record<Attendance>],
    class: ClassType,
    subject: Option<&str>,
) -> Vec<RollupRow> {
    students
        .iter()
        .filter(|s| s.data.class == class)
        .map(|s| {
            let own: Vec<Record<Attendance>> = attendance
                .iter()
                .filter(|a| a.data.student_id == s.id)
                .cloned()
                .collect();
            let stats = student_stats(&own, subject);
            RollupRow {
                student_id: s.id.clone(),
                student_name: s.data.name.clone(),
                stats,
                status: AttendanceBand::for_percentage(stats.percentage),
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallStats {
    pub total: usize,
    pub present: usize,
    pub absent: usize,
    pub percentage: u32,
}

pub fn overall_stats(records: &[Record<Attendance>]) -> OverallStats {
    let total = records.len();
    let present = records.iter().filter(|r| r.data.present).count();
    OverallStats {
        total,
        present,
        absent: total - present,
        percentage: attendance_percentage(present, total),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassCount {
    pub class: ClassType,
    pub label: &'static str,
    pub students: usize,
}

/// Student head-count for each of the nine classes, zeros included.
pub fn class_counts(students: &[Record<Student>]) -> Vec<ClassCount> {
    ClassType::ALL
        .into_iter()
        .map(|class| ClassCount {
            class,
            label: class.label(),
            students: students.iter().filter(|s| s.data.class == class).count(),
        })
        .collect()
}

/// Everything the dashboard needs, read from one snapshot.
pub struct Snapshot<'a> {
    pub students: &'a [Record<Student>],
    pub users: &'a [Record<UserAccount>],
    pub attendance: &'a [Record<Attendance>],
    pub results: &'a [Record<ResultSheet>],
    pub hall_tickets: &'a [Record<HallTicket>],
    pub events: &'a [Record<ScheduledEvent>],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub students: usize,
    pub teachers: usize,
    pub upcoming_events: usize,
    pub classes: usize,
    pub attendance: usize,
    pub results: usize,
    pub hall_tickets: usize,
}

/// Summary cards for `user`'s dashboard. `student_class` is the class of a
/// student user's linked record, if any.
pub fn dashboard_stats(
    user: &User,
    student_class: Option<ClassType>,
    snap: &Snapshot<'_>,
    now: DateTime<Utc>,
) -> DashboardStats {
    let mut out = DashboardStats {
        upcoming_events: calendar::upcoming_events(snap.events, now).len(),
        ..DashboardStats::default()
    };

    match user.role {
        Role::Admin => {
            out.students = snap.students.len();
            out.teachers = snap
                .users
                .iter()
                .filter(|u| u.data.role == Role::Teacher)
                .count();
            out.classes = snap
                .students
                .iter()
                .map(|s| s.data.class)
                .collect::<BTreeSet<_>>()
                .len();
            out.results = snap.results.len();
            out.hall_tickets = snap.hall_tickets.len();
        }
        Role::Teacher => {
            let classes = user.teacher_classes();
            out.students = snap
                .students
                .iter()
                .filter(|s| classes.contains(&s.data.class))
                .count();
            out.classes = classes.len();
            out.attendance = snap
                .attendance
                .iter()
                .filter(|a| classes.contains(&a.data.class))
                .count();
        }
        Role::Student => {
            if let Some(student_id) = user.student_id.as_deref() {
                out.attendance = snap
                    .attendance
                    .iter()
                    .filter(|a| a.data.student_id == student_id)
                    .count();
            }
            if let Some(class) = student_class {
                out.results = snap.results.iter().filter(|r| r.data.class == class).count();
                out.hall_tickets = snap
                    .hall_tickets
                    .iter()
                    .filter(|h| h.data.class == class)
                    .count();
            }
        }
    }
    out
}
