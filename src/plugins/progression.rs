//! Lesson completion, quiz grading, and module advancement.
//!
//! Every mutation is a targeted statement against its own table or column:
//! lesson and module completion are primary-key guarded inserts, quiz
//! attempts are appended, and the `completed` transition is a conditional
//! UPDATE that re-counts completed modules inside the same transaction.

use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error::SchoolError;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::assignment::{self, AssignmentSummary};
use crate::plugins::curriculum::{self, QuizQuestion};
use crate::plugins::enrollment::{self, Enrollment, EnrollmentStatus};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuizScore {
    pub module_number: u32,
    pub score: u32,
    pub passed: bool,
    pub attempt_date: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionResult {
    pub index: usize,
    pub selected: Option<usize>,
    pub correct_answer: usize,
    pub is_correct: bool,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuizOutcome {
    pub enrollment_id: String,
    pub module_number: u32,
    pub score: u32,
    pub passed: bool,
    pub passing_score: u32,
    pub correct_count: usize,
    pub question_count: usize,
    pub results: Vec<QuestionResult>,
    /// True only on the attempt that first completed the module.
    pub module_completed: bool,
    pub current_module: u32,
    pub completed_modules: Vec<u32>,
    pub enrollment_status: EnrollmentStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressSummary {
    pub enrollment: Enrollment,
    pub completed_modules: Vec<u32>,
    pub completed_lessons: Vec<String>,
    pub quiz_scores: Vec<QuizScore>,
    pub assignments: Vec<AssignmentSummary>,
    pub percent_complete: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub enrollment_id: String,
    pub student_id: String,
    pub student_name: String,
    pub modules_attempted: usize,
    pub modules_passed: usize,
    pub average_best_score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct LeaderboardScope {
    pub org_id: Option<String>,
    pub batch_id: Option<String>,
}

/// `round(100 × correct / total)`, half away from zero.
pub fn score_percent(correct: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (100.0 * correct as f64 / total as f64).round() as u32
}

/// Strict index comparison; a missing answer is wrong.
pub fn grade_quiz(quiz: &[QuizQuestion], answers: &[usize]) -> (Vec<QuestionResult>, usize) {
    let results: Vec<QuestionResult> = quiz
        .iter()
        .enumerate()
        .map(|(index, q)| {
            let selected = answers.get(index).copied();
            QuestionResult {
                index,
                selected,
                correct_answer: q.correct_answer,
                is_correct: selected == Some(q.correct_answer),
                explanation: q.explanation.clone(),
            }
        })
        .collect();
    let correct = results.iter().filter(|r| r.is_correct).count();
    (results, correct)
}

pub fn lesson_key(module_number: u32, lesson_number: u32) -> String {
    format!("{}-{}", module_number, lesson_number)
}

fn completed_modules_in(conn: &Connection, enrollment_id: &str) -> Result<Vec<u32>, SchoolError> {
    let mut stmt = conn.prepare(
        "SELECT module_number FROM completed_modules WHERE enrollment_id = ?1 ORDER BY module_number",
    )?;
    let modules = stmt
        .query_map(params![enrollment_id], |row| row.get(0))?
        .collect::<Result<Vec<u32>, _>>()?;
    Ok(modules)
}

fn completed_lessons_in(conn: &Connection, enrollment_id: &str) -> Result<Vec<String>, SchoolError> {
    let mut stmt = conn.prepare(
        "SELECT lesson_key FROM completed_lessons WHERE enrollment_id = ?1 ORDER BY completed_at, lesson_key",
    )?;
    let lessons = stmt
        .query_map(params![enrollment_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(lessons)
}

fn quiz_scores_in(conn: &Connection, enrollment_id: &str) -> Result<Vec<QuizScore>, SchoolError> {
    let mut stmt = conn.prepare(
        "SELECT module_number, score, passed, attempt_date FROM quiz_attempts
         WHERE enrollment_id = ?1 ORDER BY attempt_date, id",
    )?;
    let scores = stmt
        .query_map(params![enrollment_id], |row| {
            Ok(QuizScore {
                module_number: row.get(0)?,
                score: row.get(1)?,
                passed: row.get(2)?,
                attempt_date: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(scores)
}

fn broker_for(store: &Store) -> (DbBroker, std::path::PathBuf) {
    (DbBroker::new(&store.root), db::school_db_path(&store.root))
}

/// `completeLesson`. Idempotent; returns the full lesson set afterwards.
pub fn complete_lesson(
    store: &Store,
    student_id: &str,
    module_number: u32,
    lesson_number: u32,
) -> Result<Vec<String>, SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_tx(&db_path, student_id, "progression.lesson", |conn| {
        let enrollment = enrollment::progressable_enrollment_in(conn, student_id)?;
        let module = curriculum::get_active_module_in(conn, module_number)?;
        if lesson_number == 0 || lesson_number as usize > module.lessons.len() {
            return Err(SchoolError::BadRequest(format!(
                "module {} has {} lessons; lesson {} does not exist",
                module_number,
                module.lessons.len(),
                lesson_number
            )));
        }

        let key = lesson_key(module_number, lesson_number);
        let added = conn.execute(
            "INSERT OR IGNORE INTO completed_lessons(enrollment_id, lesson_key, completed_at) VALUES(?1, ?2, ?3)",
            params![enrollment.id, key, time::now_epoch_z()],
        )?;
        if added > 0 {
            tracing::debug!(enrollment_id = %enrollment.id, lesson = %key, "lesson completed");
        }
        completed_lessons_in(conn, &enrollment.id)
    })
}

/// `submitQuiz`. Every attempt is kept; a first pass completes the module
/// and the last module to complete moves the enrollment to `completed`.
pub fn submit_quiz(
    store: &Store,
    student_id: &str,
    module_number: u32,
    answers: &[usize],
) -> Result<QuizOutcome, SchoolError> {
    let (broker, db_path) = broker_for(store);
    let outcome = broker.with_tx(&db_path, student_id, "progression.quiz", |conn| {
        let enrollment = enrollment::progressable_enrollment_in(conn, student_id)?;
        let module = curriculum::get_active_module_in(conn, module_number)?;
        if module.quiz.is_empty() {
            return Err(SchoolError::BadRequest(format!(
                "module {} has no quiz",
                module_number
            )));
        }
        if module_number > enrollment.total_modules {
            return Err(SchoolError::BadRequest(format!(
                "module {} is outside this enrollment's {} module curriculum",
                module_number, enrollment.total_modules
            )));
        }
        if answers.len() > module.quiz.len() {
            return Err(SchoolError::BadRequest(format!(
                "{} answers given for {} questions",
                answers.len(),
                module.quiz.len()
            )));
        }

        let (results, correct_count) = grade_quiz(&module.quiz, answers);
        let score = score_percent(correct_count, module.quiz.len());
        let passed = score >= module.passing_score;
        let now = time::now_epoch_z();

        conn.execute(
            "INSERT INTO quiz_attempts(id, enrollment_id, module_number, score, passed, attempt_date) VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
            params![time::prefixed_id("QA"), enrollment.id, module_number, score, passed, now],
        )?;

        let mut module_completed = false;
        if passed {
            module_completed = conn.execute(
                "INSERT OR IGNORE INTO completed_modules(enrollment_id, module_number, completed_at) VALUES(?1, ?2, ?3)",
                params![enrollment.id, module_number, now],
            )? > 0;
        }
        if module_completed {
            conn.execute(
                "UPDATE enrollments SET current_module = ?1, updated_at = ?2 WHERE id = ?3",
                params![module_number + 1, now, enrollment.id],
            )?;
            conn.execute(
                "UPDATE enrollments SET status = 'completed', completed_at = ?1, updated_at = ?1
                 WHERE id = ?2
                   AND status IN ('enrolled', 'active', 'in_progress')
                   AND (SELECT COUNT(*) FROM completed_modules WHERE enrollment_id = ?2) >= total_modules",
                params![now, enrollment.id],
            )?;
        }

        let refreshed = enrollment::get_enrollment_in(conn, &enrollment.id)?;
        Ok(QuizOutcome {
            enrollment_id: refreshed.id.clone(),
            module_number,
            score,
            passed,
            passing_score: module.passing_score,
            correct_count,
            question_count: module.quiz.len(),
            results,
            module_completed,
            current_module: refreshed.current_module,
            completed_modules: completed_modules_in(conn, &refreshed.id)?,
            enrollment_status: refreshed.status,
        })
    })?;

    tracing::info!(
        enrollment_id = %outcome.enrollment_id,
        module = module_number,
        score = outcome.score,
        passed = outcome.passed,
        status = outcome.enrollment_status.as_str(),
        "quiz graded"
    );
    Ok(outcome)
}

/// `getProgress`. NotFound when the student never enrolled.
pub fn get_progress(store: &Store, student_id: &str) -> Result<ProgressSummary, SchoolError> {
    let (broker, db_path) = broker_for(store);
    broker.with_conn(&db_path, student_id, "progression.progress", |conn| {
        let enrollment = enrollment::latest_enrollment_in(conn, student_id)?;
        let completed_modules = completed_modules_in(conn, &enrollment.id)?;
        let percent_complete = score_percent(
            completed_modules.len(),
            enrollment.total_modules as usize,
        );
        Ok(ProgressSummary {
            completed_lessons: completed_lessons_in(conn, &enrollment.id)?,
            quiz_scores: quiz_scores_in(conn, &enrollment.id)?,
            assignments: assignment::summaries_in(conn, &enrollment.id)?,
            completed_modules,
            percent_complete,
            enrollment,
        })
    })
}

/// Mean of the best score per attempted module.
pub fn best_attempt_average(attempts: &[(u32, u32)]) -> (usize, f64) {
    let mut best: BTreeMap<u32, u32> = BTreeMap::new();
    for &(module, score) in attempts {
        let entry = best.entry(module).or_insert(score);
        if score > *entry {
            *entry = score;
        }
    }
    if best.is_empty() {
        return (0, 0.0);
    }
    let sum: u32 = best.values().sum();
    let avg = sum as f64 / best.len() as f64;
    (best.len(), (avg * 10.0).round() / 10.0)
}

/// Ranking by modules passed, then by the average best score per module.
pub fn leaderboard(store: &Store, scope: &LeaderboardScope) -> Result<Vec<LeaderboardEntry>, SchoolError> {
    let (broker, db_path) = broker_for(store);
    let rows = broker.with_conn(&db_path, "ecclesia", "progression.leaderboard", |conn| {
        let mut stmt = conn.prepare(
            "SELECT e.id, e.student_id, e.student_name, q.module_number, q.score,
                    (SELECT COUNT(*) FROM completed_modules c WHERE c.enrollment_id = e.id)
             FROM enrollments e
             JOIN quiz_attempts q ON q.enrollment_id = e.id
             WHERE e.status NOT IN ('dropped', 'withdrawn')
               AND (?1 IS NULL OR e.org_id = ?1)
               AND (?2 IS NULL OR e.batch_id = ?2)
             ORDER BY e.id",
        )?;
        let rows = stmt
            .query_map(params![scope.org_id, scope.batch_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, u32>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    let mut grouped: BTreeMap<String, (String, String, usize, Vec<(u32, u32)>)> = BTreeMap::new();
    for (enrollment_id, student_id, student_name, module, score, passed) in rows {
        grouped
            .entry(enrollment_id)
            .or_insert_with(|| (student_id, student_name, passed as usize, Vec::new()))
            .3
            .push((module, score));
    }

    let mut board: Vec<LeaderboardEntry> = grouped
        .into_iter()
        .map(|(enrollment_id, (student_id, student_name, passed, attempts))| {
            let (attempted, average) = best_attempt_average(&attempts);
            LeaderboardEntry {
                enrollment_id,
                student_id,
                student_name,
                modules_attempted: attempted,
                modules_passed: passed,
                average_best_score: average,
            }
        })
        .collect();
    board.sort_by(|a, b| {
        b.modules_passed
            .cmp(&a.modules_passed)
            .then(
                b.average_best_score
                    .partial_cmp(&a.average_best_score)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(a.student_id.cmp(&b.student_id))
    });
    Ok(board)
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "progression",
        "version": "0.1.0",
        "description": "Lesson completion, quiz grading and module advancement",
        "commands": [
            { "name": "lesson", "parameters": ["module", "lesson"] },
            { "name": "quiz", "parameters": ["module", "answers"] },
            { "name": "progress", "parameters": ["student"] },
            { "name": "leaderboard", "parameters": ["org", "batch"] }
        ],
        "storage": ["school.db"]
    })
}
