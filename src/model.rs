use serde::{Deserialize, Serialize};

/// One of the nine academic-program cohorts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClassType {
    FyBsc,
    SyBsc,
    TyBsc,
    FyBca,
    SyBca,
    TyBca,
    FyMsc,
    SyMsc,
    Mca,
}

impl ClassType {
    pub const ALL: [ClassType; 9] = [
        ClassType::FyBsc,
        ClassType::SyBsc,
        ClassType::TyBsc,
        ClassType::FyBca,
        ClassType::SyBca,
        ClassType::TyBca,
        ClassType::FyMsc,
        ClassType::SyMsc,
        ClassType::Mca,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ClassType::FyBsc => "fy-bsc",
            ClassType::SyBsc => "sy-bsc",
            ClassType::TyBsc => "ty-bsc",
            ClassType::FyBca => "fy-bca",
            ClassType::SyBca => "sy-bca",
            ClassType::TyBca => "ty-bca",
            ClassType::FyMsc => "fy-msc",
            ClassType::SyMsc => "sy-msc",
            ClassType::Mca => "mca",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ClassType::FyBsc => "FY B.Sc.",
            ClassType::SyBsc => "SY B.Sc.",
            ClassType::TyBsc => "TY B.Sc.",
            ClassType::FyBca => "FY BCA",
            ClassType::SyBca => "SY BCA",
            ClassType::TyBca => "TY BCA",
            ClassType::FyMsc => "FY M.Sc.",
            ClassType::SyMsc => "SY M.Sc.",
            ClassType::Mca => "MCA",
        }
    }

    pub fn subjects(self) -> &'static [&'static str] {
        match self {
            ClassType::FyBsc => &[
                "Mathematics-I",
                "Physics-I",
                "Chemistry-I",
                "Biology",
                "Computer Science",
            ],
            ClassType::SyBsc => &[
                "Mathematics-II",
                "Physics-II",
                "Chemistry-II",
                "Statistics",
                "Electronics",
            ],
            ClassType::TyBsc => &[
                "Mathematics-III",
                "Physics-III",
                "Chemistry-III",
                "Botany",
                "Zoology",
            ],
            ClassType::FyBca => &[
                "Computer Fundamentals",
                "Programming in C",
                "Database Management",
                "Mathematical Foundation",
                "Digital Electronics",
            ],
            ClassType::SyBca => &[
                "Data Structures",
                "OOP with C++",
                "Operating System",
                "Software Engineering",
                "Web Technologies",
            ],
            ClassType::TyBca => &[
                "Java Programming",
                "Computer Networks",
                "PHP & MySQL",
                "Software Testing",
                "Project Work",
            ],
            ClassType::FyMsc => &[
                "Advanced Algorithms",
                "Advanced Database",
                "Cloud Computing",
                "Research Methodology",
                "Elective-I",
            ],
            ClassType::SyMsc => &[
                "Machine Learning",
                "Information Security",
                "Big Data Analytics",
                "Soft Computing",
                "Project Dissertation",
            ],
            ClassType::Mca => &[
                "Advanced Java",
                "AI & Neural Networks",
                "Advanced Web Tech",
                "Mobile App Development",
                "Enterprise Resource Planning",
            ],
        }
    }

    /// Accepts spreadsheet-style spellings: "FY BSC", "fy bsc" and "fy-bsc"
    /// all map to `FyBsc`.
    pub fn parse_loose(raw: &str) -> Option<ClassType> {
        let normalized = normalize_class_key(raw);
        ClassType::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
    }
}

/// Lowercases and joins whitespace runs with a single hyphen.
pub fn normalize_class_key(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Lecture,
    Exam,
    Holiday,
    Event,
}

/// A persisted entity: the generated id plus the entity's own fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<T> {
    pub id: String,
    #[serde(flatten)]
    pub data: T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
    pub class: ClassType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendance {
    pub date: String,
    pub student_id: String,
    pub subject: String,
    pub present: bool,
    pub class: ClassType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lecture_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSheet {
    pub title: String,
    pub file_url: String,
    pub class: ClassType,
    pub upload_date: String,
    pub semester: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HallTicket {
    pub title: String,
    pub file_url: String,
    pub class: ClassType,
    pub upload_date: String,
    pub exam_date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledEvent {
    pub title: String,
    pub start: String,
    pub end: String,
    #[serde(rename = "type")]
    pub kind: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<ClassType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Stored user account. Never leaves the daemon with `password_hash` set;
/// handlers convert to [`User`] first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<ClassType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(default)]
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<ClassType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
}

impl From<&Record<UserAccount>> for User {
    fn from(r: &Record<UserAccount>) -> Self {
        User {
            id: r.id.clone(),
            name: r.data.name.clone(),
            email: r.data.email.clone(),
            role: r.data.role,
            classes: r.data.classes.clone(),
            student_id: r.data.student_id.clone(),
        }
    }
}

impl User {
    pub fn teacher_classes(&self) -> &[ClassType] {
        self.classes.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobRecord {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    /// Base64 (standard alphabet) of the stored bytes.
    pub data: String,
    #[serde(default)]
    pub sha256: String,
    pub upload_date: String,
}
