use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::activity::{self, ActivitySource};
use crate::auth::{Identity, View};
use crate::error::DashboardError;
use crate::models::{
    Course, ExamAttempt, ProgressObservation, StudentCourse, StudentProgress, StudentSummary,
    TeacherCourse, TeacherRoster, WeakTopic,
};
use crate::store::DashboardStore;

/// Scores strictly below this mark a topic as weak.
pub const WEAK_SCORE_THRESHOLD: i32 = 50;

const UNKNOWN_TEACHER: &str = "Unknown";
const UNKNOWN_TOPIC: &str = "Unknown Topic";

/// How an exam attempt is linked to the course it belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttemptJoin {
    #[default]
    CourseId,
    /// Compare the attempt's course label with the last two words of the
    /// course title.
    LegacyTitle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateOptions {
    /// Build rosters for every course, not only the ones the teacher owns.
    pub include_all_courses: bool,
    pub attempt_join: AttemptJoin,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            include_all_courses: true,
            attempt_join: AttemptJoin::CourseId,
        }
    }
}

#[derive(Debug, Default)]
struct ResolutionStats {
    unresolved_teachers: AtomicU64,
    unresolved_topics: AtomicU64,
    dropped_topics: AtomicU64,
}

/// Counts of references that fell back to a default value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionCounts {
    pub unresolved_teachers: u64,
    pub unresolved_topics: u64,
    pub dropped_topics: u64,
}

/// Rounded (half up) mean of the scores, or 0 when there are none.
pub fn progress_percentage<I>(scores: I) -> i32
where
    I: IntoIterator<Item = i32>,
{
    let (sum, count) = scores
        .into_iter()
        .fold((0i64, 0i64), |(sum, count), score| (sum + i64::from(score), count + 1));

    if count == 0 {
        return 0;
    }

    (2 * sum + count).div_euclid(2 * count) as i32
}

pub fn is_weak(score: i32) -> bool {
    score < WEAK_SCORE_THRESHOLD
}

/// Last two words of a course title, e.g. "Computer Science".
pub fn legacy_course_label(title: &str) -> String {
    let words: Vec<&str> = title.split_whitespace().collect();
    words[words.len().saturating_sub(2)..].join(" ")
}

fn attempt_matches(attempt: &ExamAttempt, course: &Course, join: AttemptJoin) -> bool {
    match join {
        AttemptJoin::CourseId => attempt.course_id.as_deref() == Some(course.id.as_str()),
        AttemptJoin::LegacyTitle => attempt.course == legacy_course_label(&course.title),
    }
}

fn required_id<'a>(id: &'a str, kind: &'static str) -> Result<&'a str, DashboardError> {
    let id = id.trim();
    if id.is_empty() {
        Err(DashboardError::MissingId(kind))
    } else {
        Ok(id)
    }
}

fn course_observations<'a, S>(
    store: &'a S,
    student_id: &str,
    course_id: &str,
) -> Vec<&'a ProgressObservation>
where
    S: DashboardStore + ?Sized,
{
    let topics = store.course_topics(course_id);
    store
        .observations()
        .iter()
        .filter(|o| o.student_id == student_id && topics.iter().any(|t| t.id == o.topic_id))
        .collect()
}

/// Read-only dashboard queries over one store.
pub struct Dashboard<S> {
    store: S,
    options: AggregateOptions,
    activity: Box<dyn ActivitySource>,
    stats: ResolutionStats,
}

impl<S: DashboardStore> Dashboard<S> {
    pub fn new(store: S, options: AggregateOptions, activity: Box<dyn ActivitySource>) -> Self {
        Self {
            store,
            options,
            activity,
            stats: ResolutionStats::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn resolution_counts(&self) -> ResolutionCounts {
        ResolutionCounts {
            unresolved_teachers: self.stats.unresolved_teachers.load(Ordering::Relaxed),
            unresolved_topics: self.stats.unresolved_topics.load(Ordering::Relaxed),
            dropped_topics: self.stats.dropped_topics.load(Ordering::Relaxed),
        }
    }

    pub fn student_view(&self, identity: &Identity) -> Result<StudentSummary, DashboardError> {
        identity.authorize(View::Student)?;
        self.student_summary(&identity.user_id)
    }

    pub fn teacher_view(&self, identity: &Identity) -> Result<TeacherRoster, DashboardError> {
        identity.authorize(View::Teacher)?;
        self.teacher_roster(&identity.user_id)
    }

    /// Course progress, attempts and weak topics for one student. Unknown
    /// students get zeroed progress and empty lists.
    pub fn student_summary(&self, student_id: &str) -> Result<StudentSummary, DashboardError> {
        let student_id = required_id(student_id, "student")?;
        let store = &self.store;

        if !store.students().iter().any(|s| s.id == student_id) {
            tracing::debug!(student_id, "summary requested for unknown student");
        }

        let courses = store
            .courses()
            .iter()
            .map(|course| {
                let observations = course_observations(store, student_id, &course.id);
                StudentCourse {
                    id: course.id.clone(),
                    title: course.title.clone(),
                    progress: progress_percentage(observations.iter().map(|o| o.score)),
                    teacher: self.teacher_name(course),
                }
            })
            .collect();

        let weak_topics = store
            .observations()
            .iter()
            .filter(|o| o.student_id == student_id && is_weak(o.score))
            .map(|o| {
                let title = match store.topic_title(&o.topic_id).filter(|t| !t.is_empty()) {
                    Some(title) => title.to_string(),
                    None => {
                        self.stats.unresolved_topics.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(topic_id = %o.topic_id, student_id, "unresolved topic");
                        UNKNOWN_TOPIC.to_string()
                    }
                };
                WeakTopic {
                    id: o.topic_id.clone(),
                    title,
                }
            })
            .collect();

        Ok(StudentSummary {
            courses,
            recent_attempts: store.attempts(student_id).to_vec(),
            weak_topics,
            continue_learning_topic: store.continue_learning(student_id).cloned(),
        })
    }

    /// Per-course rosters visible to a teacher. Courses owned by other
    /// teachers are appended afterwards with empty rosters, so with
    /// `include_all_courses` they show up twice.
    pub fn teacher_roster(&self, teacher_id: &str) -> Result<TeacherRoster, DashboardError> {
        let teacher_id = required_id(teacher_id, "teacher")?;
        let owned = |course: &Course| course.teacher_id.as_deref() == Some(teacher_id);

        let mut courses: Vec<TeacherCourse> = self
            .store
            .courses()
            .iter()
            .filter(|&course| self.options.include_all_courses || owned(course))
            .map(|course| TeacherCourse {
                id: course.id.clone(),
                title: course.title.clone(),
                students: self.course_roster(course),
            })
            .collect();

        courses.extend(
            self.store
                .courses()
                .iter()
                .filter(|&course| !owned(course))
                .map(|course| TeacherCourse {
                    id: course.id.clone(),
                    title: course.title.clone(),
                    students: Vec::new(),
                }),
        );

        tracing::debug!(teacher_id, courses = courses.len(), "built teacher roster");
        Ok(TeacherRoster { courses })
    }

    fn course_roster(&self, course: &Course) -> Vec<StudentProgress> {
        let store = &self.store;
        let topics = store.course_topics(&course.id);

        store
            .students()
            .iter()
            .filter_map(|student| {
                let observations = course_observations(store, &student.id, &course.id);
                if observations.is_empty() {
                    return None;
                }

                let last_exam_score = store
                    .attempts(&student.id)
                    .iter()
                    .find(|a| attempt_matches(a, course, self.options.attempt_join))
                    .map(|a| format!("{}/{}", a.score, a.total_marks));

                // Unresolved titles are dropped here, while the student summary
                // reports them as "Unknown Topic". Candidate for unification.
                let weak_topics = observations
                    .iter()
                    .filter(|o| is_weak(o.score))
                    .filter_map(|o| {
                        let title = topics
                            .iter()
                            .find(|t| t.id == o.topic_id)
                            .map(|t| t.title.as_str())
                            .filter(|t| !t.is_empty());
                        if title.is_none() {
                            self.stats.dropped_topics.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(topic_id = %o.topic_id, course_id = %course.id, "dropped untitled weak topic");
                        }
                        title.map(str::to_string)
                    })
                    .collect();

                let days = self
                    .activity
                    .days_since_activity(&student.id, &course.id, &observations);

                Some(StudentProgress {
                    id: student.id.clone(),
                    name: student.name.clone(),
                    course_progress: progress_percentage(observations.iter().map(|o| o.score)),
                    last_exam_score,
                    last_activity: activity::describe(days),
                    weak_topics,
                })
            })
            .collect()
    }

    fn teacher_name(&self, course: &Course) -> String {
        let teacher = course
            .teacher_id
            .as_deref()
            .and_then(|id| self.store.teachers().iter().find(|t| t.id == id));

        match teacher {
            Some(teacher) => teacher.name.clone(),
            None => {
                self.stats.unresolved_teachers.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(course_id = %course.id, teacher_id = ?course.teacher_id, "unresolved teacher");
                UNKNOWN_TEACHER.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{FixedActivity, RandomActivity};
    use crate::auth::Role;
    use crate::models::{Topic, TeacherCourse};
    use crate::store::Snapshot;

    fn dashboard(snapshot: Snapshot, options: AggregateOptions) -> Dashboard<Snapshot> {
        Dashboard::new(snapshot, options, Box::new(FixedActivity(3)))
    }

    fn demo() -> Dashboard<Snapshot> {
        dashboard(Snapshot::demo(), AggregateOptions::default())
    }

    fn observe(snapshot: &mut Snapshot, student_id: &str, topic_id: &str, score: i32) {
        snapshot.observations.push(ProgressObservation {
            student_id: student_id.to_string(),
            topic_id: topic_id.to_string(),
            score,
            recorded_at: None,
        });
    }

    fn course<'a>(roster: &'a TeacherRoster, id: &str) -> &'a TeacherCourse {
        roster
            .courses
            .iter()
            .find(|c| c.id == id)
            .expect("course present")
    }

    #[test]
    fn progress_rounds_half_up() {
        assert_eq!(progress_percentage([90, 75, 45]), 70);
        assert_eq!(progress_percentage([65, 40]), 53);
        assert_eq!(progress_percentage([95, 88, 92]), 92);
        assert_eq!(progress_percentage([78, 82, 75]), 78);
        assert_eq!(progress_percentage(Vec::new()), 0);
    }

    #[test]
    fn weak_boundary_is_exclusive() {
        assert!(is_weak(49));
        assert!(!is_weak(50));
    }

    #[test]
    fn legacy_label_keeps_last_two_words() {
        assert_eq!(legacy_course_label("Class XII Computer Science"), "Computer Science");
        assert_eq!(legacy_course_label("Class XII Physics"), "XII Physics");
        assert_eq!(legacy_course_label("Physics"), "Physics");
        assert_eq!(legacy_course_label(""), "");
    }

    #[test]
    fn sam_sharma_summary_matches_fixture() {
        let summary = demo().student_summary("student-1").unwrap();

        let progress: Vec<(&str, i32, &str)> = summary
            .courses
            .iter()
            .map(|c| (c.id.as_str(), c.progress, c.teacher.as_str()))
            .collect();
        assert_eq!(
            progress,
            vec![
                ("course-cs", 70, "Dr. Evelyn Reed"),
                ("course-phy", 53, "Mr. Alan Grant"),
            ]
        );

        let weak: Vec<(&str, &str)> = summary
            .weak_topics
            .iter()
            .map(|t| (t.id.as_str(), t.title.as_str()))
            .collect();
        assert_eq!(
            weak,
            vec![("t-cs-3", "Computer Networks"), ("t-phy-2", "Electrostatics")]
        );

        assert_eq!(summary.recent_attempts.len(), 2);
        assert_eq!(summary.recent_attempts[0].id, "attempt-1");
        let next = summary.continue_learning_topic.expect("placeholder topic");
        assert_eq!(next.title, "Stacks");
        assert_eq!(next.chapter, "Data Structures");
    }

    #[test]
    fn courses_without_observations_report_zero() {
        let summary = demo().student_summary("student-2").unwrap();
        let physics = summary.courses.iter().find(|c| c.id == "course-phy").unwrap();
        assert_eq!(physics.progress, 0);
        assert!(summary.recent_attempts.is_empty());
        assert!(summary.continue_learning_topic.is_none());
    }

    #[test]
    fn unknown_student_gets_empty_summary() {
        let summary = demo().student_summary("student-404").unwrap();
        assert_eq!(summary.courses.len(), 2);
        assert!(summary.courses.iter().all(|c| c.progress == 0));
        assert!(summary.recent_attempts.is_empty());
        assert!(summary.weak_topics.is_empty());
        assert!(summary.continue_learning_topic.is_none());
    }

    #[test]
    fn blank_ids_are_contract_violations() {
        let dashboard = demo();
        assert_eq!(
            dashboard.student_summary("").unwrap_err(),
            DashboardError::MissingId("student")
        );
        assert_eq!(
            dashboard.teacher_roster("  ").unwrap_err(),
            DashboardError::MissingId("teacher")
        );
    }

    #[test]
    fn score_of_fifty_is_not_weak() {
        let mut snapshot = Snapshot::demo();
        observe(&mut snapshot, "student-2", "t-phy-3", 50);
        observe(&mut snapshot, "student-2", "t-phy-4", 49);
        let dashboard = dashboard(snapshot, AggregateOptions::default());

        let summary = dashboard.student_summary("student-2").unwrap();
        let ids: Vec<&str> = summary.weak_topics.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t-phy-4"]);

        let roster = dashboard.teacher_roster("teacher-2").unwrap();
        let priya = course(&roster, "course-phy")
            .students
            .iter()
            .find(|s| s.id == "student-2")
            .unwrap();
        assert_eq!(priya.weak_topics, vec!["Modern Physics".to_string()]);
    }

    #[test]
    fn weak_topics_follow_fact_table_order() {
        let mut snapshot = Snapshot::demo();
        snapshot.observations.retain(|o| o.student_id != "student-1");
        observe(&mut snapshot, "student-1", "t-phy-2", 10);
        observe(&mut snapshot, "student-1", "t-cs-3", 20);
        let summary = dashboard(snapshot, AggregateOptions::default())
            .student_summary("student-1")
            .unwrap();
        let ids: Vec<&str> = summary.weak_topics.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t-phy-2", "t-cs-3"]);
    }

    #[test]
    fn default_roster_lists_all_courses_then_foreign_ones() {
        let roster = demo().teacher_roster("teacher-1").unwrap();
        let shape: Vec<(&str, usize)> = roster
            .courses
            .iter()
            .map(|c| (c.id.as_str(), c.students.len()))
            .collect();
        assert_eq!(
            shape,
            vec![("course-cs", 4), ("course-phy", 1), ("course-phy", 0)]
        );
    }

    #[test]
    fn owned_only_roster_appends_foreign_courses_empty() {
        let options = AggregateOptions {
            include_all_courses: false,
            ..AggregateOptions::default()
        };
        let roster = dashboard(Snapshot::demo(), options)
            .teacher_roster("teacher-2")
            .unwrap();
        let shape: Vec<(&str, usize)> = roster
            .courses
            .iter()
            .map(|c| (c.id.as_str(), c.students.len()))
            .collect();
        assert_eq!(shape, vec![("course-phy", 1), ("course-cs", 0)]);
    }

    #[test]
    fn computer_science_roster_matches_fixture() {
        let roster = demo().teacher_roster("teacher-1").unwrap();
        let cs = course(&roster, "course-cs");

        let rows: Vec<(&str, i32, Option<&str>, Vec<&str>)> = cs
            .students
            .iter()
            .map(|s| {
                (
                    s.name.as_str(),
                    s.course_progress,
                    s.last_exam_score.as_deref(),
                    s.weak_topics.iter().map(String::as_str).collect(),
                )
            })
            .collect();
        assert_eq!(
            rows,
            vec![
                ("Sam Sharma", 70, Some("18/25"), vec!["Computer Networks"]),
                ("Priya Patel", 92, None, vec![]),
                ("Rohan Mehta", 45, None, vec!["Data Structures", "Computer Networks"]),
                ("Aisha Khan", 78, None, vec![]),
            ]
        );
        assert!(cs.students.iter().all(|s| s.last_activity == "3 days ago"));
    }

    #[test]
    fn roster_excludes_students_without_observations() {
        let mut snapshot = Snapshot::demo();
        snapshot.observations.retain(|o| o.student_id != "student-3");
        let roster = dashboard(snapshot, AggregateOptions::default())
            .teacher_roster("teacher-1")
            .unwrap();
        let cs = course(&roster, "course-cs");
        assert_eq!(cs.students.len(), 3);
        assert!(cs.students.iter().all(|s| s.id != "student-3"));
    }

    #[test]
    fn attempt_join_modes_differ_on_physics() {
        let by_id = demo().teacher_roster("teacher-2").unwrap();
        let sam = &course(&by_id, "course-phy").students[0];
        assert_eq!(sam.course_progress, 53);
        assert_eq!(sam.last_exam_score.as_deref(), Some("12/30"));

        let legacy = AggregateOptions {
            attempt_join: AttemptJoin::LegacyTitle,
            ..AggregateOptions::default()
        };
        let by_title = dashboard(Snapshot::demo(), legacy)
            .teacher_roster("teacher-2")
            .unwrap();
        let sam = &course(&by_title, "course-phy").students[0];
        assert_eq!(sam.last_exam_score, None);
        let sam_cs = &course(&by_title, "course-cs").students[0];
        assert_eq!(sam_cs.last_exam_score.as_deref(), Some("18/25"));
    }

    #[test]
    fn first_matching_attempt_wins() {
        let mut snapshot = Snapshot::demo();
        snapshot
            .attempts
            .get_mut("student-1")
            .unwrap()
            .insert(
                0,
                ExamAttempt {
                    id: "attempt-0".to_string(),
                    title: "SQL Quiz".to_string(),
                    course: "Computer Science".to_string(),
                    score: 9,
                    total_marks: 10,
                    course_id: Some("course-cs".to_string()),
                },
            );
        let roster = dashboard(snapshot, AggregateOptions::default())
            .teacher_roster("teacher-1")
            .unwrap();
        let sam = &course(&roster, "course-cs").students[0];
        assert_eq!(sam.last_exam_score.as_deref(), Some("9/10"));
    }

    #[test]
    fn unresolved_references_fall_back_and_are_counted() {
        let mut snapshot = Snapshot::demo();
        snapshot.courses.push(Course {
            id: "course-bio".to_string(),
            title: "Class XII Biology".to_string(),
            teacher_id: Some("teacher-9".to_string()),
        });
        snapshot.topics.insert(
            "course-bio".to_string(),
            vec![Topic {
                id: "t-bio-1".to_string(),
                title: String::new(),
            }],
        );
        observe(&mut snapshot, "student-4", "t-bio-1", 20);
        observe(&mut snapshot, "student-4", "t-ghost", 10);
        let dashboard = dashboard(snapshot, AggregateOptions::default());

        let summary = dashboard.student_summary("student-4").unwrap();
        let bio = summary.courses.iter().find(|c| c.id == "course-bio").unwrap();
        assert_eq!(bio.teacher, "Unknown");
        assert_eq!(bio.progress, 20);
        let weak: Vec<(&str, &str)> = summary
            .weak_topics
            .iter()
            .map(|t| (t.id.as_str(), t.title.as_str()))
            .collect();
        assert_eq!(
            weak,
            vec![("t-bio-1", "Unknown Topic"), ("t-ghost", "Unknown Topic")]
        );

        let roster = dashboard.teacher_roster("teacher-1").unwrap();
        let aisha = &course(&roster, "course-bio").students[0];
        assert_eq!(aisha.course_progress, 20);
        assert!(aisha.weak_topics.is_empty());

        assert_eq!(
            dashboard.resolution_counts(),
            ResolutionCounts {
                unresolved_teachers: 1,
                unresolved_topics: 2,
                dropped_topics: 1,
            }
        );
    }

    #[test]
    fn repeated_calls_are_identical_apart_from_activity() {
        let dashboard = Dashboard::new(
            Snapshot::demo(),
            AggregateOptions::default(),
            Box::new(RandomActivity),
        );
        assert_eq!(
            dashboard.student_summary("student-1").unwrap(),
            dashboard.student_summary("student-1").unwrap()
        );

        let strip = |mut roster: TeacherRoster| {
            for course in &mut roster.courses {
                for student in &mut course.students {
                    student.last_activity.clear();
                }
            }
            roster
        };
        assert_eq!(
            strip(dashboard.teacher_roster("teacher-1").unwrap()),
            strip(dashboard.teacher_roster("teacher-1").unwrap())
        );
    }

    #[test]
    fn outputs_round_trip_through_json() {
        let dashboard = demo();
        let summary = dashboard.student_summary("student-1").unwrap();
        let json = serde_json::to_string(&summary).unwrap();
        assert_eq!(serde_json::from_str::<StudentSummary>(&json).unwrap(), summary);

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["courses"][0]["progress"].is_i64());
        assert!(value["recentAttempts"][0]["totalMarks"].is_i64());
        assert_eq!(value["weakTopics"][1]["title"], "Electrostatics");

        let roster = dashboard.teacher_roster("teacher-1").unwrap();
        let json = serde_json::to_string(&roster).unwrap();
        assert_eq!(serde_json::from_str::<TeacherRoster>(&json).unwrap(), roster);

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let priya = &value["courses"][0]["students"][1];
        assert!(priya["courseProgress"].is_i64());
        assert!(priya["lastExamScore"].is_null());
    }

    #[test]
    fn unknown_student_serializes_null_continue_topic() {
        let summary = demo().student_summary("student-404").unwrap();
        let value = serde_json::to_value(&summary).unwrap();
        assert!(value["continueLearningTopic"].is_null());
    }

    #[test]
    fn views_check_identity_role() {
        let dashboard = demo();
        let teacher = Identity {
            user_id: "teacher-1".to_string(),
            role: Role::Teacher,
        };
        assert!(dashboard.teacher_view(&teacher).is_ok());
        assert!(matches!(
            dashboard.student_view(&teacher),
            Err(DashboardError::Forbidden { .. })
        ));

        let student = Identity {
            user_id: "student-1".to_string(),
            role: Role::Student,
        };
        let summary = dashboard.student_view(&student).unwrap();
        assert_eq!(summary.courses[0].progress, 70);
    }
}
