use std::collections::HashMap;

use crate::auth::{IdentityProvider, Role};
use crate::models::{
    ContinueLearning, Course, ExamAttempt, ProgressObservation, Student, Teacher, Topic,
};

/// Read-only access to the reference tables and the observation fact table.
pub trait DashboardStore {
    fn students(&self) -> &[Student];
    fn teachers(&self) -> &[Teacher];
    fn courses(&self) -> &[Course];
    fn course_topics(&self, course_id: &str) -> &[Topic];
    /// In insertion order.
    fn observations(&self) -> &[ProgressObservation];
    /// Most recent first.
    fn attempts(&self, student_id: &str) -> &[ExamAttempt];
    fn continue_learning(&self, student_id: &str) -> Option<&ContinueLearning>;

    fn topic_title(&self, topic_id: &str) -> Option<&str> {
        self.courses()
            .iter()
            .flat_map(|course| self.course_topics(&course.id))
            .find(|topic| topic.id == topic_id)
            .map(|topic| topic.title.as_str())
    }
}

/// Immutable in-memory copy of everything a dashboard query reads.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub students: Vec<Student>,
    pub teachers: Vec<Teacher>,
    pub courses: Vec<Course>,
    pub topics: HashMap<String, Vec<Topic>>,
    pub observations: Vec<ProgressObservation>,
    pub attempts: HashMap<String, Vec<ExamAttempt>>,
    pub continue_learning: HashMap<String, ContinueLearning>,
    /// User ids allowed to open every dashboard.
    pub admins: Vec<String>,
}

impl DashboardStore for Snapshot {
    fn students(&self) -> &[Student] {
        &self.students
    }

    fn teachers(&self) -> &[Teacher] {
        &self.teachers
    }

    fn courses(&self) -> &[Course] {
        &self.courses
    }

    fn course_topics(&self, course_id: &str) -> &[Topic] {
        self.topics.get(course_id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn observations(&self) -> &[ProgressObservation] {
        &self.observations
    }

    fn attempts(&self, student_id: &str) -> &[ExamAttempt] {
        self.attempts.get(student_id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn continue_learning(&self, student_id: &str) -> Option<&ContinueLearning> {
        self.continue_learning.get(student_id)
    }
}

impl IdentityProvider for Snapshot {
    fn role_of(&self, user_id: &str) -> Option<Role> {
        if self.students.iter().any(|s| s.id == user_id) {
            Some(Role::Student)
        } else if self.teachers.iter().any(|t| t.id == user_id) {
            Some(Role::Teacher)
        } else if self.admins.iter().any(|id| id == user_id) {
            Some(Role::Admin)
        } else {
            None
        }
    }
}

impl Snapshot {
    /// Demo data set: two courses, four students, one set of attempts.
    pub fn demo() -> Self {
        let students = [
            ("student-1", "Sam Sharma"),
            ("student-2", "Priya Patel"),
            ("student-3", "Rohan Mehta"),
            ("student-4", "Aisha Khan"),
        ]
        .into_iter()
        .map(|(id, name)| Student {
            id: id.to_string(),
            name: name.to_string(),
        })
        .collect();

        let teachers = [
            ("teacher-1", "Dr. Evelyn Reed"),
            ("teacher-2", "Mr. Alan Grant"),
        ]
        .into_iter()
        .map(|(id, name)| Teacher {
            id: id.to_string(),
            name: name.to_string(),
        })
        .collect();

        let courses = [
            ("course-cs", "Class XII Computer Science", "teacher-1"),
            ("course-phy", "Class XII Physics", "teacher-2"),
        ]
        .into_iter()
        .map(|(id, title, teacher_id)| Course {
            id: id.to_string(),
            title: title.to_string(),
            teacher_id: Some(teacher_id.to_string()),
        })
        .collect();

        fn topic_list(entries: &[(&str, &str)]) -> Vec<Topic> {
            entries
                .iter()
                .map(|(id, title)| Topic {
                    id: id.to_string(),
                    title: title.to_string(),
                })
                .collect()
        }
        let topics = HashMap::from([
            (
                "course-cs".to_string(),
                topic_list(&[
                    ("t-cs-1", "SQL"),
                    ("t-cs-2", "Data Structures"),
                    ("t-cs-3", "Computer Networks"),
                    ("t-cs-4", "Python Revision"),
                ]),
            ),
            (
                "course-phy".to_string(),
                topic_list(&[
                    ("t-phy-1", "Optics"),
                    ("t-phy-2", "Electrostatics"),
                    ("t-phy-3", "Magnetism"),
                    ("t-phy-4", "Modern Physics"),
                ]),
            ),
        ]);

        let observations = [
            ("student-1", "t-cs-1", 90),
            ("student-1", "t-cs-2", 75),
            ("student-1", "t-cs-3", 45),
            ("student-1", "t-phy-1", 65),
            ("student-1", "t-phy-2", 40),
            ("student-2", "t-cs-1", 95),
            ("student-2", "t-cs-2", 88),
            ("student-2", "t-cs-3", 92),
            ("student-3", "t-cs-1", 60),
            ("student-3", "t-cs-2", 40),
            ("student-3", "t-cs-3", 35),
            ("student-4", "t-cs-1", 78),
            ("student-4", "t-cs-2", 82),
            ("student-4", "t-cs-3", 75),
        ]
        .into_iter()
        .map(|(student_id, topic_id, score)| ProgressObservation {
            student_id: student_id.to_string(),
            topic_id: topic_id.to_string(),
            score,
            recorded_at: None,
        })
        .collect();

        let attempts = HashMap::from([(
            "student-1".to_string(),
            vec![
                ExamAttempt {
                    id: "attempt-1".to_string(),
                    title: "Data Structures Test".to_string(),
                    course: "Computer Science".to_string(),
                    score: 18,
                    total_marks: 25,
                    course_id: Some("course-cs".to_string()),
                },
                ExamAttempt {
                    id: "attempt-2".to_string(),
                    title: "Optics Practice".to_string(),
                    course: "Physics".to_string(),
                    score: 12,
                    total_marks: 30,
                    course_id: Some("course-phy".to_string()),
                },
            ],
        )]);

        let continue_learning = HashMap::from([(
            "student-1".to_string(),
            ContinueLearning {
                title: "Stacks".to_string(),
                chapter: "Data Structures".to_string(),
            },
        )]);

        Self {
            students,
            teachers,
            courses,
            topics,
            observations,
            attempts,
            continue_learning,
            admins: Vec::new(),
        }
    }

    pub fn course_of_topic(&self, topic_id: &str) -> Option<&Course> {
        self.courses
            .iter()
            .find(|course| self.course_topics(&course.id).iter().any(|t| t.id == topic_id))
    }
}
