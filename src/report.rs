use std::fmt::Write;

use crate::aggregate::{is_weak, progress_percentage};
use crate::models::{StudentProgress, TeacherCourse, TeacherRoster};

#[derive(Debug, Clone)]
pub struct CourseOverview {
    pub title: String,
    pub student_count: usize,
    pub avg_progress: i32,
}

pub fn summarize_courses(roster: &TeacherRoster) -> Vec<CourseOverview> {
    roster
        .courses
        .iter()
        .filter(|course| !course.students.is_empty())
        .map(|course| CourseOverview {
            title: course.title.clone(),
            student_count: course.students.len(),
            avg_progress: progress_percentage(course.students.iter().map(|s| s.course_progress)),
        })
        .collect()
}

fn needs_attention(roster: &TeacherRoster) -> Vec<(&TeacherCourse, &StudentProgress)> {
    let mut flagged: Vec<(&TeacherCourse, &StudentProgress)> = roster
        .courses
        .iter()
        .flat_map(|course| course.students.iter().map(move |student| (course, student)))
        .filter(|(_, student)| !student.weak_topics.is_empty() || is_weak(student.course_progress))
        .collect();

    flagged.sort_by_key(|(_, student)| student.course_progress);
    flagged
}

pub fn build_report(teacher: &str, roster: &TeacherRoster) -> String {
    let overview = summarize_courses(roster);
    let flagged = needs_attention(roster);

    let mut output = String::new();

    let _ = writeln!(output, "# Teacher Roster Report");
    let _ = writeln!(output, "Generated for {}", teacher);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Course Overview");

    if overview.is_empty() {
        let _ = writeln!(output, "No students with recorded progress.");
    } else {
        for course in overview.iter() {
            let _ = writeln!(
                output,
                "- {}: {} students (avg progress {}%)",
                course.title, course.student_count, course.avg_progress
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Needs Attention");

    if flagged.is_empty() {
        let _ = writeln!(output, "No students below the weak-topic threshold.");
    } else {
        for (course, student) in flagged.iter().take(10) {
            let weak = if student.weak_topics.is_empty() {
                "none".to_string()
            } else {
                student.weak_topics.join(", ")
            };
            let _ = writeln!(
                output,
                "- {} ({}) progress {}%, weak topics: {}",
                student.name, course.title, student.course_progress, weak
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Rosters");

    for course in roster.courses.iter().filter(|c| !c.students.is_empty()) {
        let _ = writeln!(output);
        let _ = writeln!(output, "### {}", course.title);
        for student in course.students.iter() {
            let _ = writeln!(
                output,
                "- {}: {}% progress, last exam {}, active {}",
                student.name,
                student.course_progress,
                student.last_exam_score.as_deref().unwrap_or("n/a"),
                student.last_activity
            );
        }
    }

    if overview.is_empty() {
        let _ = writeln!(output, "No rosters to show.");
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::FixedActivity;
    use crate::aggregate::{AggregateOptions, Dashboard};
    use crate::store::Snapshot;

    fn demo_roster() -> TeacherRoster {
        Dashboard::new(
            Snapshot::demo(),
            AggregateOptions::default(),
            Box::new(FixedActivity(2)),
        )
        .teacher_roster("teacher-1")
        .unwrap()
    }

    #[test]
    fn overview_skips_empty_courses() {
        let overview = summarize_courses(&demo_roster());
        assert_eq!(overview.len(), 2);
        assert_eq!(overview[0].title, "Class XII Computer Science");
        assert_eq!(overview[0].student_count, 4);
        // (70 + 92 + 45 + 78) / 4 = 71.25
        assert_eq!(overview[0].avg_progress, 71);
        assert_eq!(overview[1].student_count, 1);
    }

    #[test]
    fn flags_lowest_progress_first() {
        let report = build_report("Dr. Evelyn Reed", &demo_roster());
        assert!(report.starts_with("# Teacher Roster Report\nGenerated for Dr. Evelyn Reed\n"));

        let rohan = report
            .find("- Rohan Mehta (Class XII Computer Science) progress 45%")
            .unwrap();
        let sam_cs = report
            .find("- Sam Sharma (Class XII Computer Science) progress 70%")
            .unwrap();
        assert!(rohan < sam_cs);
        assert!(report.contains("weak topics: Data Structures, Computer Networks"));
        assert!(!report.contains("- Priya Patel (Class XII Computer Science) progress"));
    }

    #[test]
    fn roster_lines_show_exam_and_activity() {
        let report = build_report("Dr. Evelyn Reed", &demo_roster());
        assert!(report.contains("### Class XII Physics"));
        assert!(report.contains("- Sam Sharma: 70% progress, last exam 18/25, active 2 days ago"));
        assert!(report.contains("- Priya Patel: 92% progress, last exam n/a, active 2 days ago"));
    }

    #[test]
    fn empty_roster_has_placeholders() {
        let report = build_report("nobody", &TeacherRoster { courses: Vec::new() });
        assert!(report.contains("No students with recorded progress."));
        assert!(report.contains("No students below the weak-topic threshold."));
        assert!(report.contains("No rosters to show."));
    }
}
