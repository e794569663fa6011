//! Curriculum catalog: modules, their lessons, quizzes and assignments.
//!
//! Modules are loaded from a TOML file (`curriculum import`). Authoring
//! happens elsewhere; this catalog only stores and serves what it is given.

use crate::core::broker::DbBroker;
use crate::core::config;
use crate::core::db;
use crate::core::error::SchoolError;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::authz;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lesson {
    pub title: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: usize,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssignmentDescriptor {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub instructions: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub module_number: u32,
    pub title: String,
    pub description: String,
    pub lessons: Vec<Lesson>,
    pub quiz: Vec<QuizQuestion>,
    pub passing_score: u32,
    pub assignment: Option<AssignmentDescriptor>,
    pub active: bool,
    pub updated_at: String,
}

/// One `[[module]]` entry of a curriculum file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDef {
    pub module_number: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
    #[serde(default)]
    pub quiz: Vec<QuizQuestion>,
    #[serde(default)]
    pub passing_score: Option<u32>,
    #[serde(default)]
    pub assignment: Option<AssignmentDescriptor>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CurriculumFile {
    #[serde(default)]
    pub module: Vec<ModuleDef>,
}

/// Quiz as shown before an attempt: no answers, no explanations.
#[derive(Debug, Clone, Serialize)]
pub struct QuizView {
    pub module_number: u32,
    pub title: String,
    pub passing_score: u32,
    pub questions: Vec<QuizQuestionView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuizQuestionView {
    pub index: usize,
    pub question: String,
    pub options: Vec<String>,
}

impl ModuleDef {
    fn validate(&self) -> Result<(), SchoolError> {
        if self.module_number == 0 {
            return Err(SchoolError::BadRequest(
                "module_number starts at 1".to_string(),
            ));
        }
        if self.title.trim().is_empty() {
            return Err(SchoolError::BadRequest(format!(
                "module {} has no title",
                self.module_number
            )));
        }
        if let Some(score) = self.passing_score {
            if score > 100 {
                return Err(SchoolError::BadRequest(format!(
                    "module {} passing_score {} exceeds 100",
                    self.module_number, score
                )));
            }
        }
        for (i, q) in self.quiz.iter().enumerate() {
            if q.correct_answer >= q.options.len() {
                return Err(SchoolError::BadRequest(format!(
                    "module {} question {}: correct_answer {} is outside {} options",
                    self.module_number,
                    i + 1,
                    q.correct_answer,
                    q.options.len()
                )));
            }
        }
        Ok(())
    }
}

pub fn parse_curriculum(content: &str) -> Result<CurriculumFile, SchoolError> {
    let file: CurriculumFile = toml::from_str(content)
        .map_err(|e| SchoolError::BadRequest(format!("invalid curriculum file: {}", e)))?;
    let mut seen = std::collections::HashSet::new();
    for def in &file.module {
        def.validate()?;
        if !seen.insert(def.module_number) {
            return Err(SchoolError::BadRequest(format!(
                "module_number {} appears twice",
                def.module_number
            )));
        }
    }
    Ok(file)
}

fn module_from_row(row: &Row<'_>) -> rusqlite::Result<Module> {
    let json_col = |idx: usize, raw: String| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("malformed JSON column: {}", raw).into(),
        )
    };
    let lessons_raw: String = row.get(3)?;
    let quiz_raw: String = row.get(4)?;
    let assignment_raw: Option<String> = row.get(6)?;

    Ok(Module {
        module_number: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        lessons: serde_json::from_str(&lessons_raw).map_err(|_| json_col(3, lessons_raw.clone()))?,
        quiz: serde_json::from_str(&quiz_raw).map_err(|_| json_col(4, quiz_raw.clone()))?,
        passing_score: row.get(5)?,
        assignment: match assignment_raw {
            Some(raw) => Some(serde_json::from_str(&raw).map_err(|_| json_col(6, raw.clone()))?),
            None => None,
        },
        active: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

const MODULE_COLUMNS: &str =
    "module_number, title, description, lessons, quiz, passing_score, assignment, active, updated_at";

/// Active module by number. NotFound when missing or deactivated.
pub fn get_active_module_in(conn: &Connection, module_number: u32) -> Result<Module, SchoolError> {
    conn.query_row(
        &format!(
            "SELECT {} FROM modules WHERE module_number = ?1 AND active = 1",
            MODULE_COLUMNS
        ),
        params![module_number],
        module_from_row,
    )
    .optional()?
    .ok_or_else(|| SchoolError::NotFound(format!("module {} not found", module_number)))
}

pub fn count_active_in(conn: &Connection) -> Result<u32, SchoolError> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM modules WHERE active = 1", [], |row| {
        row.get(0)
    })?;
    Ok(n as u32)
}

/// Active module numbers must run 1..N with no gaps, so every enrollment's
/// `total_modules` names modules a student can actually pass.
fn require_contiguous_active_in(conn: &Connection) -> Result<(), SchoolError> {
    let mut stmt =
        conn.prepare("SELECT module_number FROM modules WHERE active = 1 ORDER BY module_number")?;
    let numbers = stmt
        .query_map([], |row| row.get::<_, u32>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    for (expected, number) in (1u32..).zip(&numbers) {
        if *number != expected {
            return Err(SchoolError::BadRequest(format!(
                "active modules must be numbered 1..{} without gaps; module {} is missing or inactive",
                numbers.len(),
                expected
            )));
        }
    }
    Ok(())
}

/// Insert or replace the given modules. Returns the number written.
///
/// Registrars only. The whole batch is rejected when it would leave a gap
/// in the active numbering.
pub fn upsert_modules(
    store: &Store,
    actor: &str,
    defs: &[ModuleDef],
    default_passing_score: u32,
) -> Result<usize, SchoolError> {
    for def in defs {
        def.validate()?;
    }
    let registrars = config::load_config(&store.root)?.school.registrars;
    let broker = DbBroker::new(&store.root);
    let db_path = db::school_db_path(&store.root);
    let written = broker.with_tx(&db_path, actor, "curriculum.upsert", |conn| {
        authz::require_registrar_in(conn, actor, &registrars, "change the curriculum")?;
        let now = time::now_epoch_z();
        for def in defs {
            let assignment = def
                .assignment
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            conn.execute(
                &format!(
                    "INSERT INTO modules({}) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(module_number) DO UPDATE SET
                        title = excluded.title,
                        description = excluded.description,
                        lessons = excluded.lessons,
                        quiz = excluded.quiz,
                        passing_score = excluded.passing_score,
                        assignment = excluded.assignment,
                        active = excluded.active,
                        updated_at = excluded.updated_at",
                    MODULE_COLUMNS
                ),
                params![
                    def.module_number,
                    def.title.trim(),
                    def.description,
                    serde_json::to_string(&def.lessons)?,
                    serde_json::to_string(&def.quiz)?,
                    def.passing_score.unwrap_or(default_passing_score),
                    assignment,
                    def.active,
                    now,
                ],
            )?;
        }
        require_contiguous_active_in(conn)?;
        Ok(defs.len())
    })?;
    tracing::info!(written, actor, "curriculum modules saved");
    Ok(written)
}

pub fn import_curriculum(
    store: &Store,
    actor: &str,
    path: &Path,
    default_passing_score: u32,
) -> Result<usize, SchoolError> {
    let content = fs::read_to_string(path).map_err(SchoolError::IoError)?;
    let file = parse_curriculum(&content)?;
    upsert_modules(store, actor, &file.module, default_passing_score)
}

pub fn list_modules(store: &Store, include_inactive: bool) -> Result<Vec<Module>, SchoolError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::school_db_path(&store.root);
    broker.with_conn(&db_path, "ecclesia", "curriculum.list", |conn| {
        let sql = if include_inactive {
            format!("SELECT {} FROM modules ORDER BY module_number", MODULE_COLUMNS)
        } else {
            format!(
                "SELECT {} FROM modules WHERE active = 1 ORDER BY module_number",
                MODULE_COLUMNS
            )
        };
        let mut stmt = conn.prepare(&sql)?;
        let modules = stmt
            .query_map([], module_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(modules)
    })
}

pub fn get_module(store: &Store, module_number: u32) -> Result<Module, SchoolError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::school_db_path(&store.root);
    broker.with_conn(&db_path, "ecclesia", "curriculum.get", |conn| {
        get_active_module_in(conn, module_number)
    })
}

pub fn redact_quiz(module: &Module) -> QuizView {
    QuizView {
        module_number: module.module_number,
        title: module.title.clone(),
        passing_score: module.passing_score,
        questions: module
            .quiz
            .iter()
            .enumerate()
            .map(|(index, q)| QuizQuestionView {
                index,
                question: q.question.clone(),
                options: q.options.clone(),
            })
            .collect(),
    }
}

/// Read path for quizzes. BadRequest when the module carries no quiz.
pub fn quiz_view(store: &Store, module_number: u32) -> Result<QuizView, SchoolError> {
    let module = get_module(store, module_number)?;
    if module.quiz.is_empty() {
        return Err(SchoolError::BadRequest(format!(
            "module {} has no quiz",
            module_number
        )));
    }
    Ok(redact_quiz(&module))
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "curriculum",
        "version": "0.1.0",
        "description": "Module catalog with lessons, quizzes and assignments",
        "commands": [
            { "name": "import", "parameters": ["file"] },
            { "name": "list", "parameters": ["all"] },
            { "name": "quiz", "parameters": ["module"] }
        ],
        "storage": ["school.db"]
    })
}
