use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Student {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Teacher {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Course {
    pub id: String,
    /// Always shaped like `Class <N> <Subject>`.
    pub title: String,
    pub teacher_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub id: String,
    pub title: String,
}

/// One row of the fact table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressObservation {
    pub student_id: String,
    pub topic_id: String,
    pub score: i32,
    pub recorded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamAttempt {
    pub id: String,
    pub title: String,
    /// Free-text course label, e.g. "Computer Science".
    pub course: String,
    pub score: i32,
    pub total_marks: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinueLearning {
    pub title: String,
    pub chapter: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentCourse {
    pub id: String,
    pub title: String,
    pub progress: i32,
    pub teacher: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeakTopic {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub courses: Vec<StudentCourse>,
    pub recent_attempts: Vec<ExamAttempt>,
    pub weak_topics: Vec<WeakTopic>,
    pub continue_learning_topic: Option<ContinueLearning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProgress {
    pub id: String,
    pub name: String,
    pub course_progress: i32,
    pub last_exam_score: Option<String>,
    /// e.g. "2 days ago"; not stable across calls with the random source.
    pub last_activity: String,
    pub weak_topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeacherCourse {
    pub id: String,
    pub title: String,
    pub students: Vec<StudentProgress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeacherRoster {
    pub courses: Vec<TeacherCourse>,
}
