use ecclesia::core::db::initialize_school_db;
use ecclesia::core::error::SchoolError;
use ecclesia::core::store::Store;
use ecclesia::plugins::curriculum::{
    Lesson, ModuleDef, QuizQuestion, list_modules, parse_curriculum, quiz_view, upsert_modules,
};
use ecclesia::plugins::enrollment::{EnrollRequest, EnrollmentStatus, enroll};
use ecclesia::plugins::organization::{
    GrantKind, NewOrganization, OrgType, create_organization, grant_role,
};
use ecclesia::plugins::progression::{
    LeaderboardScope, complete_lesson, get_progress, leaderboard, submit_quiz,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

/// Project layout whose config lets `registrar` write the catalog.
fn registrar_project(dir: &Path) -> PathBuf {
    let project_dir = dir.join(".ecclesia");
    fs::create_dir_all(&project_dir).unwrap();
    fs::write(
        project_dir.join("config.toml"),
        "[school]\nregistrars = [\"registrar\"]\n",
    )
    .unwrap();
    project_dir.join("data")
}

const CURRICULUM: &str = r#"
[[module]]
module_number = 1
title = "The New Creature"
lessons = [{ title = "Born again" }, { title = "A new nature" }]

[[module.quiz]]
question = "Who is a new creature?"
options = ["Anyone in Christ", "Only pastors", "Nobody"]
correct_answer = 0
explanation = "2 Corinthians 5:17"

[[module.quiz]]
question = "When does it happen?"
options = ["Later", "At the new birth"]
correct_answer = 1

[[module]]
module_number = 2
title = "The Holy Spirit"
passing_score = 60
lessons = [{ title = "Who He is" }]

[[module.quiz]]
question = "Q1"
options = ["a", "b", "c"]
correct_answer = 2

[[module.quiz]]
question = "Q2"
options = ["a", "b", "c"]
correct_answer = 0

[[module.quiz]]
question = "Q3"
options = ["a", "b", "c"]
correct_answer = 1
"#;

fn test_store() -> (tempfile::TempDir, Store) {
    let tmp = tempdir().unwrap();
    let root = registrar_project(tmp.path());
    initialize_school_db(&root).unwrap();
    let store = Store::scratch(root);
    let file = parse_curriculum(CURRICULUM).unwrap();
    upsert_modules(&store, "registrar", &file.module, 70).unwrap();
    (tmp, store)
}

fn enroll_student(store: &Store, student: &str) -> String {
    enroll(
        store,
        EnrollRequest {
            student_id: student.to_string(),
            student_name: Some(format!("Student {}", student)),
            ..EnrollRequest::default()
        },
    )
    .unwrap()
    .enrollment
    .id
}

#[test]
fn test_complete_lesson_is_a_set() {
    let (_tmp, store) = test_store();
    enroll_student(&store, "stu-1");

    let lessons = complete_lesson(&store, "stu-1", 1, 2).unwrap();
    assert_eq!(lessons, vec!["1-2".to_string()]);
    let lessons = complete_lesson(&store, "stu-1", 1, 2).unwrap();
    assert_eq!(lessons.len(), 1);
    let lessons = complete_lesson(&store, "stu-1", 2, 1).unwrap();
    assert_eq!(lessons, vec!["1-2".to_string(), "2-1".to_string()]);
}

#[test]
fn test_complete_lesson_validation() {
    let (_tmp, store) = test_store();
    assert!(matches!(
        complete_lesson(&store, "stu-1", 1, 1),
        Err(SchoolError::NotFound(_))
    ));

    enroll_student(&store, "stu-1");
    assert!(matches!(
        complete_lesson(&store, "stu-1", 1, 3),
        Err(SchoolError::BadRequest(_))
    ));
    assert!(matches!(
        complete_lesson(&store, "stu-1", 1, 0),
        Err(SchoolError::BadRequest(_))
    ));
    assert!(matches!(
        complete_lesson(&store, "stu-1", 9, 1),
        Err(SchoolError::NotFound(_))
    ));
}

#[test]
fn test_all_correct_quiz_scores_100() {
    let (_tmp, store) = test_store();
    enroll_student(&store, "stu-1");

    let outcome = submit_quiz(&store, "stu-1", 1, &[0, 1]).unwrap();
    assert_eq!(outcome.score, 100);
    assert!(outcome.passed);
    assert!(outcome.module_completed);
    assert_eq!(outcome.completed_modules, vec![1]);
    assert_eq!(outcome.current_module, 2);
    assert_eq!(outcome.results[0].explanation, "2 Corinthians 5:17");
    assert!(outcome.results.iter().all(|r| r.is_correct));
}

#[test]
fn test_failed_attempt_is_recorded_without_completion() {
    let (_tmp, store) = test_store();
    enroll_student(&store, "stu-1");

    let outcome = submit_quiz(&store, "stu-1", 1, &[0]).unwrap();
    assert_eq!(outcome.score, 50);
    assert!(!outcome.passed);
    assert!(!outcome.module_completed);
    assert!(outcome.completed_modules.is_empty());
    assert_eq!(outcome.current_module, 1);
    assert_eq!(outcome.results[1].selected, None);

    let progress = get_progress(&store, "stu-1").unwrap();
    assert_eq!(progress.quiz_scores.len(), 1);
    assert!(!progress.quiz_scores[0].passed);
}

#[test]
fn test_repeated_pass_never_duplicates_module() {
    let (_tmp, store) = test_store();
    enroll_student(&store, "stu-1");

    submit_quiz(&store, "stu-1", 1, &[0, 1]).unwrap();
    let again = submit_quiz(&store, "stu-1", 1, &[0, 1]).unwrap();
    assert!(again.passed);
    assert!(!again.module_completed);
    assert_eq!(again.completed_modules, vec![1]);

    let progress = get_progress(&store, "stu-1").unwrap();
    assert_eq!(progress.completed_modules, vec![1]);
    assert_eq!(progress.quiz_scores.len(), 2);
}

#[test]
fn test_module_passing_score_applies() {
    let (_tmp, store) = test_store();
    enroll_student(&store, "stu-1");

    // 2 of 3 is 67: passes module 2 at 60.
    let outcome = submit_quiz(&store, "stu-1", 2, &[2, 0, 0]).unwrap();
    assert_eq!(outcome.score, 67);
    assert_eq!(outcome.passing_score, 60);
    assert!(outcome.passed);
}

#[test]
fn test_last_module_completes_enrollment() {
    let (_tmp, store) = test_store();
    let id = enroll_student(&store, "stu-1");

    let first = submit_quiz(&store, "stu-1", 2, &[2, 0, 1]).unwrap();
    assert_eq!(first.enrollment_status, EnrollmentStatus::Active);
    assert_eq!(first.current_module, 3);

    let last = submit_quiz(&store, "stu-1", 1, &[0, 1]).unwrap();
    assert_eq!(last.enrollment_status, EnrollmentStatus::Completed);
    assert_eq!(last.enrollment_id, id);

    let progress = get_progress(&store, "stu-1").unwrap();
    assert_eq!(progress.enrollment.status, EnrollmentStatus::Completed);
    assert!(progress.enrollment.completed_at.is_some());
    assert_eq!(progress.percent_complete, 100);

    // Practice after completion is still recorded.
    let practice = submit_quiz(&store, "stu-1", 1, &[1, 1]).unwrap();
    assert_eq!(practice.enrollment_status, EnrollmentStatus::Completed);
}

#[test]
fn test_quiz_validation() {
    let (_tmp, store) = test_store();
    assert!(matches!(
        submit_quiz(&store, "stu-1", 1, &[0, 1]),
        Err(SchoolError::NotFound(_))
    ));

    enroll_student(&store, "stu-1");
    assert!(matches!(
        submit_quiz(&store, "stu-1", 1, &[0, 1, 2]),
        Err(SchoolError::BadRequest(_))
    ));
    assert!(matches!(
        submit_quiz(&store, "stu-1", 5, &[0]),
        Err(SchoolError::NotFound(_))
    ));

    // A module added after enrollment lies outside this enrollment's run,
    // and a quiz-less module cannot be attempted at all.
    upsert_modules(
        &store,
        "registrar",
        &[ModuleDef {
            module_number: 3,
            title: "Reading".to_string(),
            description: String::new(),
            lessons: vec![Lesson {
                title: "Read".to_string(),
                content: String::new(),
            }],
            quiz: vec![QuizQuestion {
                question: "?".to_string(),
                options: vec!["y".to_string(), "n".to_string()],
                correct_answer: 0,
                explanation: String::new(),
            }],
            passing_score: None,
            assignment: None,
            active: true,
        }],
        70,
    )
    .unwrap();
    assert!(matches!(
        submit_quiz(&store, "stu-1", 3, &[0]),
        Err(SchoolError::BadRequest(_))
    ));
}

#[test]
fn test_quiz_without_questions_is_bad_request() {
    let tmp = tempdir().unwrap();
    let root = registrar_project(tmp.path());
    initialize_school_db(&root).unwrap();
    let store = Store::scratch(root);
    let file = parse_curriculum("[[module]]\nmodule_number = 1\ntitle = \"Orientation\"\n").unwrap();
    upsert_modules(&store, "registrar", &file.module, 70).unwrap();
    enroll_student(&store, "stu-1");

    assert!(matches!(
        submit_quiz(&store, "stu-1", 1, &[]),
        Err(SchoolError::BadRequest(_))
    ));
    assert!(matches!(quiz_view(&store, 1), Err(SchoolError::BadRequest(_))));
}

#[test]
fn test_quiz_view_hides_answers() {
    let (_tmp, store) = test_store();
    let view = quiz_view(&store, 1).unwrap();
    assert_eq!(view.questions.len(), 2);
    let json = serde_json::to_string(&view).unwrap();
    assert!(!json.contains("correct_answer"));
    assert!(!json.contains("Corinthians"));
}

#[test]
fn test_progress_requires_enrollment() {
    let (_tmp, store) = test_store();
    assert!(matches!(
        get_progress(&store, "ghost"),
        Err(SchoolError::NotFound(_))
    ));

    enroll_student(&store, "stu-1");
    complete_lesson(&store, "stu-1", 1, 1).unwrap();
    let progress = get_progress(&store, "stu-1").unwrap();
    assert_eq!(progress.completed_lessons, vec!["1-1".to_string()]);
    assert_eq!(progress.percent_complete, 0);
    assert!(progress.assignments.is_empty());
}

#[test]
fn test_leaderboard_uses_best_attempt_per_module() {
    let (_tmp, store) = test_store();
    enroll_student(&store, "stu-1");
    enroll_student(&store, "stu-2");

    // stu-1: module 1 at 50 then 100; module 2 at 33. Average of best = 66.5.
    submit_quiz(&store, "stu-1", 1, &[0]).unwrap();
    submit_quiz(&store, "stu-1", 1, &[0, 1]).unwrap();
    submit_quiz(&store, "stu-1", 2, &[2]).unwrap();
    // stu-2: module 1 at 100 only.
    submit_quiz(&store, "stu-2", 1, &[0, 1]).unwrap();

    let board = leaderboard(&store, &LeaderboardScope::default()).unwrap();
    assert_eq!(board.len(), 2);
    assert_eq!(board[0].student_id, "stu-2");
    assert_eq!(board[0].average_best_score, 100.0);
    assert_eq!(board[1].student_id, "stu-1");
    assert_eq!(board[1].modules_attempted, 2);
    assert_eq!(board[1].modules_passed, 1);
    assert_eq!(board[1].average_best_score, 66.5);
    assert_eq!(board[1].student_name, "Student stu-1");
}

fn plain_module(n: u32, active: bool) -> ModuleDef {
    ModuleDef {
        module_number: n,
        title: format!("Module {}", n),
        description: String::new(),
        lessons: vec![Lesson {
            title: "Read".to_string(),
            content: String::new(),
        }],
        quiz: vec![QuizQuestion {
            question: "?".to_string(),
            options: vec!["y".to_string(), "n".to_string()],
            correct_answer: 0,
            explanation: String::new(),
        }],
        passing_score: None,
        assignment: None,
        active,
    }
}

#[test]
fn test_catalog_rejects_gaps_in_active_modules() {
    let (_tmp, store) = test_store();

    upsert_modules(&store, "registrar", &[plain_module(3, true)], 70).unwrap();

    // 1 and 3 active with 2 switched off would leave module 3 unreachable.
    assert!(matches!(
        upsert_modules(&store, "registrar", &[plain_module(2, false)], 70),
        Err(SchoolError::BadRequest(_))
    ));
    assert!(matches!(
        upsert_modules(&store, "registrar", &[plain_module(5, true)], 70),
        Err(SchoolError::BadRequest(_))
    ));
    // Rejected writes leave the catalog untouched.
    let modules = list_modules(&store, true).unwrap();
    assert_eq!(modules.len(), 3);
    assert!(modules.iter().all(|m| m.active));

    // Retiring the last module keeps the numbering whole.
    upsert_modules(&store, "registrar", &[plain_module(3, false)], 70).unwrap();
    let id = enroll_student(&store, "stu-1");
    submit_quiz(&store, "stu-1", 1, &[0, 1]).unwrap();
    let last = submit_quiz(&store, "stu-1", 2, &[2, 0, 1]).unwrap();
    assert_eq!(last.enrollment_id, id);
    assert_eq!(last.enrollment_status, EnrollmentStatus::Completed);
}

#[test]
fn test_catalog_writes_need_a_registrar() {
    let (_tmp, store) = test_store();
    let update = [plain_module(1, true)];

    assert!(matches!(
        upsert_modules(&store, "anonymous", &update, 70),
        Err(SchoolError::Forbidden(_))
    ));
    assert_eq!(quiz_view(&store, 1).unwrap().questions.len(), 2);

    let zone = create_organization(
        &store,
        "bishop",
        NewOrganization {
            name: "Lagos Zone".to_string(),
            org_type: OrgType::Zone,
            parent_id: None,
            description: String::new(),
        },
    )
    .unwrap();
    grant_role(&store, "bishop", &zone.id, "deacon", GrantKind::Assistant).unwrap();
    grant_role(&store, "bishop", &zone.id, "ada", GrantKind::Admin).unwrap();

    assert!(matches!(
        upsert_modules(&store, "deacon", &update, 70),
        Err(SchoolError::Forbidden(_))
    ));
    upsert_modules(&store, "ada", &update, 70).unwrap();
    upsert_modules(&store, "bishop", &update, 70).unwrap();
    assert_eq!(quiz_view(&store, 1).unwrap().questions.len(), 1);
}
