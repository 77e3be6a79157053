use std::cmp::Ordering;

use clap::ValueEnum;

use crate::activity;
use crate::models::{StudentProgress, TeacherCourse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortKey {
    Name,
    Progress,
    LastActivity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Case-insensitive substring match on the student name.
pub fn filter_by_name(students: &[StudentProgress], needle: &str) -> Vec<StudentProgress> {
    let needle = needle.to_lowercase();
    students
        .iter()
        .filter(|s| s.name.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

/// Stable sort; ties keep their roster order in either direction.
pub fn sort_students(students: &mut [StudentProgress], key: SortKey, direction: SortDirection) {
    students.sort_by(|a, b| compare(a, b, key, direction));
}

fn compare(
    a: &StudentProgress,
    b: &StudentProgress,
    key: SortKey,
    direction: SortDirection,
) -> Ordering {
    let ordering = match key {
        SortKey::Name => a.name.cmp(&b.name),
        SortKey::Progress => a.course_progress.cmp(&b.course_progress),
        SortKey::LastActivity => {
            let a_days = activity::parse_days(&a.last_activity);
            let b_days = activity::parse_days(&b.last_activity);
            match (a_days, b_days) {
                (Some(a_days), Some(b_days)) => a_days.cmp(&b_days),
                // Unparseable labels sort last in both directions.
                (Some(_), None) => return Ordering::Less,
                (None, Some(_)) => return Ordering::Greater,
                (None, None) => return Ordering::Equal,
            }
        }
    };
    match direction {
        SortDirection::Ascending => ordering,
        SortDirection::Descending => ordering.reverse(),
    }
}

/// Narrows a roster to one course. Only the first entry survives, which is the
/// populated one when foreign courses are repeated with an empty student list.
pub fn select_course(courses: &mut Vec<TeacherCourse>, course_id: &str) {
    let mut seen = false;
    courses.retain(|course| {
        let keep = course.id == course_id && !seen;
        seen |= keep;
        keep
    });
}
