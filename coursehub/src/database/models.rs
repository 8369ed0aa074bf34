//! Record models
//!
//! Rust structs for every persisted record. Field names serialize in
//! camelCase, matching the JSON already held by existing clients.

use super::repository::generate_id;
use crate::storage::PendingFile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Role of a registered account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Student,
    Teacher,
    Admin,
}

impl fmt::Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UserType::Student => "student",
            UserType::Teacher => "teacher",
            UserType::Admin => "admin",
        };
        f.write_str(name)
    }
}

/// A registered account. `email` is the natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub email: String,
    pub password: String,
    pub user_type: UserType,
    #[serde(default)]
    pub full_name: String,
    /// Data URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.user_type == UserType::Admin
    }
}

/// The signed-in user as stored under `currentUser`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    #[serde(flatten)]
    pub user: User,
    #[serde(default)]
    pub remember_me: bool,
}

/// Registration form input
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub user_type: UserType,
    pub full_name: String,
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseImage {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseDocument {
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub size: u64,
    /// Data URI
    pub url: String,
}

/// A published course, owned by the teacher in `teacher_email`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub main_image: Option<CourseImage>,
    #[serde(default)]
    pub documents: Vec<CourseDocument>,
    #[serde(default)]
    pub teacher_id: Option<String>,
    #[serde(default)]
    pub teacher_name: String,
    pub teacher_email: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub subject: String,
}

/// Course form input; files are embedded before anything is written
#[derive(Debug, Clone, Default)]
pub struct CourseDraft {
    pub title: String,
    pub description: String,
    pub main_image: Option<PendingFile>,
    pub documents: Vec<PendingFile>,
}

/// Partial course update; absent fields keep their stored value
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub subject: Option<String>,
    pub main_image: Option<CourseImage>,
    pub documents: Option<Vec<CourseDocument>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub course_id: String,
    pub access_time: DateTime<Utc>,
}

/// Enrollment entry as it may appear in storage. Older clients stored
/// the bare course id.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum StoredEnrollment {
    Entry(Enrollment),
    LegacyId(String),
}

impl StoredEnrollment {
    pub(crate) fn is_legacy(&self) -> bool {
        matches!(self, StoredEnrollment::LegacyId(_))
    }

    pub(crate) fn normalize(self, now: DateTime<Utc>) -> Enrollment {
        match self {
            StoredEnrollment::Entry(entry) => entry,
            StoredEnrollment::LegacyId(course_id) => Enrollment {
                course_id,
                access_time: now,
            },
        }
    }
}

/// studentEmail -> enrollments in insertion order
pub type EnrollmentMap = BTreeMap<String, Vec<Enrollment>>;

/// One row of a teacher's access report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseAccess {
    pub student_email: String,
    pub access_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub course_id: String,
    pub author: String,
    #[serde(default)]
    pub author_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_avatar: Option<String>,
    pub text: String,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub edited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_date: Option<DateTime<Utc>>,
}

/// courseId -> studentEmail -> rating
pub type RatingMap = BTreeMap<String, BTreeMap<String, u8>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Empty only for records written before ids were assigned
    #[serde(default)]
    pub id: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub course_id: Option<String>,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

impl Notification {
    /// A fresh, unread notification stamped now
    pub fn new(title: impl Into<String>, message: impl Into<String>, course_id: Option<&str>) -> Self {
        Self {
            id: generate_id(),
            title: title.into(),
            message: message.into(),
            course_id: course_id.map(str::to_string),
            date: Utc::now(),
            read: false,
        }
    }
}

/// teacherEmail -> notifications, newest first
pub type NotificationMap = BTreeMap<String, Vec<Notification>>;

/// Older clients used a millisecond timestamp as comment id
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(text) => text,
        RawId::Number(number) => number.to_string(),
    })
}
