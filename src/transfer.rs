//! Tabular import of students and export of attendance sheets (CSV).

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::model::{Attendance, ClassType, Record, Student};

pub const STUDENT_EMAIL_DOMAIN: &str = "student.spdm.edu";

#[derive(Debug, Clone, Deserialize)]
struct ImportRow {
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "Age", default)]
    age: Option<String>,
    #[serde(rename = "MobileNumber", default)]
    mobile: Option<String>,
    #[serde(rename = "Class", default)]
    class: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedImport {
    pub students: Vec<Student>,
    /// Rows missing `Name` or `Class`.
    pub skipped_incomplete: usize,
    /// Rows whose class is not one of the known cohorts.
    pub skipped_unknown_class: Vec<String>,
}

/// `"Asha  Rao"` becomes `asha.rao@student.spdm.edu`.
pub fn synthetic_email(name: &str) -> String {
    let local = name
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(".");
    format!("{}@{}", local, STUDENT_EMAIL_DOMAIN)
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Parses a `Name, Age, MobileNumber, Class` table. Nothing is stored here.
pub fn parse_students_csv(text: &str) -> anyhow::Result<ParsedImport> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut out = ParsedImport::default();
    let mut rows = 0usize;
    for row in rdr.deserialize::<ImportRow>() {
        let row = row.context("failed to read import row")?;
        rows += 1;
        let (Some(name), Some(class_raw)) = (non_empty(row.name), non_empty(row.class)) else {
            out.skipped_incomplete += 1;
            continue;
        };
        let Some(class) = ClassType::parse_loose(&class_raw) else {
            out.skipped_unknown_class.push(class_raw);
            continue;
        };
        let age = non_empty(row.age).and_then(|a| a.parse::<u32>().ok());
        out.students.push(Student {
            email: synthetic_email(&name),
            name,
            age,
            mobile: non_empty(row.mobile),
            class,
        });
    }

    if rows == 0 {
        anyhow::bail!("No data found in the import file");
    }
    debug!(
        rows,
        accepted = out.students.len(),
        skipped = out.skipped_incomplete + out.skipped_unknown_class.len(),
        "parsed student import"
    );
    Ok(out)
}

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    #[serde(rename = "Student Name")]
    student_name: &'a str,
    #[serde(rename = "Class")]
    class: &'a str,
    #[serde(rename = "Subject")]
    subject: &'a str,
    #[serde(rename = "Date")]
    date: &'a str,
    #[serde(rename = "Present")]
    present: &'a str,
}

/// Attendance sheet with student names resolved; unknown ids print as
/// `Unknown`.
pub fn attendance_to_csv(
    attendance: &[Record<Attendance>],
    students: &[Record<Student>],
) -> anyhow::Result<String> {
    let names: HashMap<&str, &str> = students
        .iter()
        .map(|s| (s.id.as_str(), s.data.name.as_str()))
        .collect();

    let mut wtr = csv::Writer::from_writer(Vec::new());
    for a in attendance {
        wtr.serialize(ExportRow {
            student_name: names.get(a.data.student_id.as_str()).copied().unwrap_or("Unknown"),
            class: a.data.class.as_str(),
            subject: &a.data.subject,
            date: &a.data.date,
            present: if a.data.present { "Yes" } else { "No" },
        })
        .context("failed to write attendance row")?;
    }
    if attendance.is_empty() {
        wtr.write_record(["Student Name", "Class", "Subject", "Date", "Present"])
            .context("failed to write header")?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to finish csv: {}", e))?;
    String::from_utf8(bytes).context("csv output is not utf-8")
}
