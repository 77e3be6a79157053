use std::collections::HashMap;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{ContinueLearning, Course, ExamAttempt, ProgressObservation, Student, Teacher, Topic};
use crate::store::{DashboardStore, Snapshot};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Stable UUID for a demo key, so reseeding updates rows in place.
pub fn seed_uuid(key: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes())
}

fn demo_email(name: &str) -> String {
    let local: Vec<String> = name
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|word| !word.is_empty())
        .collect();
    format!("{}@example.com", local.join("."))
}

fn roman_value(numeral: &str) -> Option<i32> {
    let digits: Option<Vec<i32>> = numeral
        .chars()
        .map(|c| match c.to_ascii_uppercase() {
            'I' => Some(1),
            'V' => Some(5),
            'X' => Some(10),
            'L' => Some(50),
            'C' => Some(100),
            _ => None,
        })
        .collect();
    let digits = digits.filter(|d| !d.is_empty())?;

    let mut total = 0;
    for (i, value) in digits.iter().enumerate() {
        match digits.get(i + 1) {
            Some(next) if next > value => total -= value,
            _ => total += value,
        }
    }
    Some(total)
}

/// Class level from a `Class <N> <Subject>` title; N may be arabic or roman.
pub fn class_level(title: &str) -> i32 {
    title
        .split_whitespace()
        .nth(1)
        .and_then(|token| token.parse().ok().or_else(|| roman_value(token)))
        .unwrap_or(0)
}

/// UUID a seeded person actually ended up with. Rows created earlier by an
/// import keep their own id; anything not yet stored falls back to `seed_uuid`.
fn person_id(ids: &HashMap<String, Uuid>, key: &str) -> Uuid {
    ids.get(key).copied().unwrap_or_else(|| seed_uuid(key))
}

pub fn course_subject(title: &str) -> String {
    let words: Vec<&str> = title.split_whitespace().collect();
    if words.len() > 2 {
        words[2..].join(" ")
    } else {
        title.trim().to_string()
    }
}

/// Writes the demo snapshot and returns the UUID assigned to each person.
pub async fn seed(pool: &PgPool) -> anyhow::Result<Vec<(String, Uuid)>> {
    let snapshot = Snapshot::demo();
    let base = Utc::now();
    let mut tx = pool.begin().await?;
    let mut seeded = Vec::new();
    let mut ids = HashMap::new();

    let people = snapshot
        .teachers
        .iter()
        .map(|t| (t.id.as_str(), t.name.as_str(), "teacher"))
        .chain(
            snapshot
                .students
                .iter()
                .map(|s| (s.id.as_str(), s.name.as_str(), "student")),
        );

    for (index, (key, name, role)) in people.enumerate() {
        let id: Uuid = sqlx::query(
            r#"
            INSERT INTO users (id, email, display_name, role, created_at)
            VALUES ($1, $2, $3, $4::user_role, $5)
            ON CONFLICT (email) DO UPDATE
            SET display_name = EXCLUDED.display_name, role = EXCLUDED.role
            RETURNING id
            "#,
        )
        .bind(seed_uuid(key))
        .bind(demo_email(name))
        .bind(name)
        .bind(role)
        .bind(base + Duration::milliseconds(index as i64))
        .fetch_one(&mut *tx)
        .await?
        .get("id");
        ids.insert(key.to_string(), id);
        seeded.push((name.to_string(), id));
    }

    for (index, course) in snapshot.courses.iter().enumerate() {
        let course_id = seed_uuid(&course.id);
        sqlx::query(
            r#"
            INSERT INTO courses (id, title, class, subject, teacher_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET title = EXCLUDED.title, class = EXCLUDED.class,
                subject = EXCLUDED.subject, teacher_id = EXCLUDED.teacher_id
            "#,
        )
        .bind(course_id)
        .bind(&course.title)
        .bind(class_level(&course.title))
        .bind(course_subject(&course.title))
        .bind(course.teacher_id.as_deref().map(|key| person_id(&ids, key)))
        .bind(base + Duration::milliseconds(index as i64))
        .execute(&mut *tx)
        .await?;

        // One chapter per topic keeps the fixture's flat topic list.
        for (order, topic) in snapshot.course_topics(&course.id).iter().enumerate() {
            let chapter_id = seed_uuid(&format!("chapter:{}", topic.id));
            sqlx::query(
                r#"
                INSERT INTO chapters (id, course_id, title, "order")
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(chapter_id)
            .bind(course_id)
            .bind(&topic.title)
            .bind(order as i32 + 1)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO topics (id, chapter_id, title, "order")
                VALUES ($1, $2, $3, 1)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(seed_uuid(&topic.id))
            .bind(chapter_id)
            .bind(&topic.title)
            .execute(&mut *tx)
            .await?;
        }
    }

    for (index, observation) in snapshot.observations.iter().enumerate() {
        let Some(course) = snapshot.course_of_topic(&observation.topic_id) else {
            tracing::warn!(topic_id = %observation.topic_id, "skipping observation without a course");
            continue;
        };

        let enrolment_id: Uuid = sqlx::query(
            r#"
            INSERT INTO enrolments (id, course_id, student_id, teacher_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (course_id, student_id) DO UPDATE
            SET teacher_id = EXCLUDED.teacher_id
            RETURNING id
            "#,
        )
        .bind(seed_uuid(&format!("enrolment:{}:{}", observation.student_id, course.id)))
        .bind(seed_uuid(&course.id))
        .bind(person_id(&ids, &observation.student_id))
        .bind(course.teacher_id.as_deref().map(|key| person_id(&ids, key)))
        .fetch_one(&mut *tx)
        .await?
        .get("id");

        sqlx::query(
            r#"
            INSERT INTO progress (id, enrolment_id, topic_id, topic_pct, updated_at)
            VALUES ($1, $2, $3, $4, COALESCE($5, now()))
            ON CONFLICT (id) DO UPDATE SET topic_pct = EXCLUDED.topic_pct
            "#,
        )
        .bind(seed_uuid(&format!("progress:{index}")))
        .bind(enrolment_id)
        .bind(seed_uuid(&observation.topic_id))
        .bind(observation.score)
        .bind(observation.recorded_at)
        .execute(&mut *tx)
        .await?;
    }

    for student in &snapshot.students {
        for (index, attempt) in snapshot.attempts(&student.id).iter().enumerate() {
            let exam_id = seed_uuid(&format!("exam:{}", attempt.id));
            sqlx::query(
                r#"
                INSERT INTO exams (id, course_id, title, type, total_marks)
                VALUES ($1, $2, $3, 'test', $4)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(exam_id)
            .bind(attempt.course_id.as_deref().map(seed_uuid))
            .bind(&attempt.title)
            .bind(attempt.total_marks)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO attempts (id, exam_id, user_id, status, submitted_at, total_score)
                VALUES ($1, $2, $3, 'submitted', $4, $5)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(seed_uuid(&attempt.id))
            .bind(exam_id)
            .bind(person_id(&ids, &student.id))
            .bind(base - Duration::days(index as i64))
            .bind(attempt.score)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    tracing::info!(people = seeded.len(), "seeded demo data");
    Ok(seeded)
}

/// Reads every table the dashboard needs inside one read-only transaction.
pub async fn load_snapshot(pool: &PgPool) -> anyhow::Result<Snapshot> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to open snapshot transaction")?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
        .execute(&mut *tx)
        .await?;

    let mut snapshot = Snapshot::default();

    let users = sqlx::query(
        "SELECT id, COALESCE(display_name, '') AS name, role::text AS role \
         FROM users WHERE role IN ('student', 'teacher', 'admin') \
         ORDER BY created_at, id",
    )
    .fetch_all(&mut *tx)
    .await?;

    for row in users {
        let id: Uuid = row.get("id");
        let name: String = row.get("name");
        let role: String = row.get("role");
        match role.as_str() {
            "student" => snapshot.students.push(Student {
                id: id.to_string(),
                name,
            }),
            "teacher" => snapshot.teachers.push(Teacher {
                id: id.to_string(),
                name,
            }),
            _ => snapshot.admins.push(id.to_string()),
        }
    }

    let courses = sqlx::query("SELECT id, title, teacher_id FROM courses ORDER BY created_at, id")
        .fetch_all(&mut *tx)
        .await?;

    for row in courses {
        let id: Uuid = row.get("id");
        let teacher_id: Option<Uuid> = row.get("teacher_id");
        snapshot.courses.push(Course {
            id: id.to_string(),
            title: row.get("title"),
            teacher_id: teacher_id.map(|id| id.to_string()),
        });
    }

    let topics = sqlx::query(
        "SELECT t.id, t.title, ch.course_id \
         FROM topics t JOIN chapters ch ON ch.id = t.chapter_id \
         ORDER BY ch.\"order\", t.\"order\", t.id",
    )
    .fetch_all(&mut *tx)
    .await?;

    for row in topics {
        let id: Uuid = row.get("id");
        let course_id: Uuid = row.get("course_id");
        snapshot
            .topics
            .entry(course_id.to_string())
            .or_default()
            .push(Topic {
                id: id.to_string(),
                title: row.get("title"),
            });
    }

    let observations = sqlx::query(
        "SELECT e.student_id, p.topic_id, ROUND(p.topic_pct)::INT4 AS score, p.updated_at \
         FROM progress p JOIN enrolments e ON e.id = p.enrolment_id \
         WHERE p.topic_id IS NOT NULL AND p.topic_pct IS NOT NULL \
         ORDER BY p.seq",
    )
    .fetch_all(&mut *tx)
    .await?;

    for row in observations {
        let student_id: Uuid = row.get("student_id");
        let topic_id: Uuid = row.get("topic_id");
        let recorded_at: Option<DateTime<Utc>> = row.get("updated_at");
        snapshot.observations.push(ProgressObservation {
            student_id: student_id.to_string(),
            topic_id: topic_id.to_string(),
            score: row.get("score"),
            recorded_at,
        });
    }

    let attempts = sqlx::query(
        "SELECT a.id, a.user_id, ex.title, ex.course_id, \
                COALESCE(co.subject, '') AS course, \
                COALESCE(a.total_score, 0) AS score, \
                COALESCE(ex.total_marks, 0) AS total_marks \
         FROM attempts a \
         JOIN exams ex ON ex.id = a.exam_id \
         LEFT JOIN courses co ON co.id = ex.course_id \
         WHERE a.status = 'submitted' AND a.user_id IS NOT NULL \
         ORDER BY a.submitted_at DESC NULLS LAST, a.id",
    )
    .fetch_all(&mut *tx)
    .await?;

    for row in attempts {
        let id: Uuid = row.get("id");
        let user_id: Uuid = row.get("user_id");
        let course_id: Option<Uuid> = row.get("course_id");
        snapshot
            .attempts
            .entry(user_id.to_string())
            .or_default()
            .push(ExamAttempt {
                id: id.to_string(),
                title: row.get("title"),
                course: row.get("course"),
                score: row.get("score"),
                total_marks: row.get("total_marks"),
                course_id: course_id.map(|id| id.to_string()),
            });
    }

    let next_topics = sqlx::query(
        "SELECT DISTINCT ON (e.student_id) e.student_id, t.title, ch.title AS chapter \
         FROM progress p \
         JOIN enrolments e ON e.id = p.enrolment_id \
         JOIN topics t ON t.id = p.topic_id \
         JOIN chapters ch ON ch.id = t.chapter_id \
         WHERE p.topic_pct < 100 \
         ORDER BY e.student_id, p.updated_at DESC NULLS LAST, p.seq DESC",
    )
    .fetch_all(&mut *tx)
    .await?;

    for row in next_topics {
        let student_id: Uuid = row.get("student_id");
        snapshot.continue_learning.insert(
            student_id.to_string(),
            ContinueLearning {
                title: row.get("title"),
                chapter: row.get("chapter"),
            },
        );
    }

    tx.commit().await?;
    tracing::info!(
        students = snapshot.students.len(),
        courses = snapshot.courses.len(),
        observations = snapshot.observations.len(),
        "loaded dashboard snapshot"
    );
    Ok(snapshot)
}

#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    email: String,
    display_name: String,
    course_title: String,
    topic_title: String,
    score: i32,
    recorded_at: Option<DateTime<Utc>>,
}

fn check_score(line: usize, score: i32) -> anyhow::Result<()> {
    if !(0..=100).contains(&score) {
        anyhow::bail!("row {line}: score {score} is outside 0-100");
    }
    Ok(())
}

fn not_a_student(line: usize, row: &CsvRow) -> anyhow::Error {
    anyhow::anyhow!("row {line}: {} is not a student", row.email)
}

/// Appends one progress observation per CSV row. Students are upserted by
/// email; courses and topics must already exist.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut tx = pool.begin().await?;
    let mut inserted = 0usize;

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let line = index + 2;
        let row = result.with_context(|| format!("row {line}: malformed record"))?;
        check_score(line, row.score)?;

        let student_id: Uuid = sqlx::query(
            r#"
            INSERT INTO users (email, display_name, role)
            VALUES ($1, $2, 'student')
            ON CONFLICT (email) DO UPDATE
            SET display_name = EXCLUDED.display_name
            WHERE users.role = 'student'
            RETURNING id
            "#,
        )
        .bind(&row.email)
        .bind(&row.display_name)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| not_a_student(line, &row))?
        .get("id");

        let course = sqlx::query(
            "SELECT id, teacher_id FROM courses WHERE title = $1 ORDER BY created_at LIMIT 1",
        )
        .bind(&row.course_title)
        .fetch_optional(&mut *tx)
        .await?
        .with_context(|| format!("row {line}: unknown course {:?}", row.course_title))?;
        let course_id: Uuid = course.get("id");
        let teacher_id: Option<Uuid> = course.get("teacher_id");

        let topic_id: Uuid = sqlx::query(
            "SELECT t.id FROM topics t JOIN chapters ch ON ch.id = t.chapter_id \
             WHERE ch.course_id = $1 AND t.title = $2 LIMIT 1",
        )
        .bind(course_id)
        .bind(&row.topic_title)
        .fetch_optional(&mut *tx)
        .await?
        .with_context(|| {
            format!(
                "row {line}: unknown topic {:?} in {:?}",
                row.topic_title, row.course_title
            )
        })?
        .get("id");

        let enrolment_id: Uuid = sqlx::query(
            r#"
            INSERT INTO enrolments (course_id, student_id, teacher_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (course_id, student_id) DO UPDATE
            SET teacher_id = EXCLUDED.teacher_id
            RETURNING id
            "#,
        )
        .bind(course_id)
        .bind(student_id)
        .bind(teacher_id)
        .fetch_one(&mut *tx)
        .await?
        .get("id");

        sqlx::query(
            r#"
            INSERT INTO progress (enrolment_id, topic_id, topic_pct, updated_at)
            VALUES ($1, $2, $3, COALESCE($4, now()))
            "#,
        )
        .bind(enrolment_id)
        .bind(topic_id)
        .bind(row.score)
        .bind(row.recorded_at)
        .execute(&mut *tx)
        .await?;

        inserted += 1;
    }

    tx.commit().await?;
    Ok(inserted)
}
