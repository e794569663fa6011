use ecclesia::core::db::initialize_school_db;
use ecclesia::core::error::SchoolError;
use ecclesia::core::store::Store;
use ecclesia::plugins::assignment::{
    GradeRequest, NewSubmission, SubmissionStatus, get_submission, grade_assignment,
    list_submissions, submit_assignment,
};
use ecclesia::plugins::batch::{NewBatch, add_teacher, create_batch};
use ecclesia::plugins::curriculum::{AssignmentDescriptor, Lesson, ModuleDef, QuizQuestion, upsert_modules};
use ecclesia::plugins::enrollment::{EndReason, EnrollRequest, end_enrollment, enroll};
use ecclesia::plugins::organization::{NewOrganization, OrgType, create_organization};
use ecclesia::plugins::progression::get_progress;
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

struct School {
    _tmp: tempfile::TempDir,
    store: Store,
    enrollment_id: String,
}

fn module(n: u32, assignment: Option<&str>) -> ModuleDef {
    ModuleDef {
        module_number: n,
        title: format!("Module {}", n),
        description: String::new(),
        lessons: vec![Lesson {
            title: "Intro".to_string(),
            content: String::new(),
        }],
        quiz: vec![QuizQuestion {
            question: "Pick A".to_string(),
            options: vec!["A".to_string(), "B".to_string()],
            correct_answer: 0,
            explanation: String::new(),
        }],
        passing_score: None,
        assignment: assignment.map(|id| AssignmentDescriptor {
            id: id.to_string(),
            title: "Write your testimony".to_string(),
            instructions: "One page.".to_string(),
        }),
        active: true,
    }
}

/// Church "Grace" led by `pastor`, one batch taught by `tess`, and `stu-1`
/// enrolled in it.
fn school() -> School {
    let tmp = tempdir().unwrap();
    let root = registrar_project(tmp.path());
    initialize_school_db(&root).unwrap();
    let store = Store::scratch(root);
    upsert_modules(&store, "registrar", &[module(1, Some("testimony")), module(2, None)], 70).unwrap();

    let org = create_organization(
        &store,
        "pastor",
        NewOrganization {
            name: "Grace".to_string(),
            org_type: OrgType::Church,
            parent_id: None,
            description: String::new(),
        },
    )
    .unwrap();
    let batch = create_batch(
        &store,
        "pastor",
        NewBatch {
            org_id: org.id.clone(),
            batch_number: 1,
            name: "Spring".to_string(),
            start_date: "2026-02-01".to_string(),
            end_date: None,
            principal_id: None,
        },
    )
    .unwrap();
    add_teacher(&store, "pastor", &batch.id, "tess").unwrap();
    let enrollment_id = enroll(
        &store,
        EnrollRequest {
            student_id: "stu-1".to_string(),
            ..EnrollRequest::default()
        },
    )
    .unwrap()
    .enrollment
    .id;

    School {
        _tmp: tmp,
        store,
        enrollment_id,
    }
}

fn testimony(content: &str) -> NewSubmission {
    NewSubmission {
        module_number: 1,
        assignment_id: "testimony".to_string(),
        content: content.to_string(),
        attachments: vec!["https://files.example/testimony.pdf".to_string()],
    }
}

fn grade(value: u32, allow: bool) -> GradeRequest {
    GradeRequest {
        grade: value,
        feedback: Some("Good work".to_string()),
        resubmission_allowed: allow,
    }
}

#[test]
fn test_submit_assignment() {
    let s = school();
    let sub = submit_assignment(&s.store, "stu-1", testimony("I was born again in 2019")).unwrap();
    assert!(sub.id.starts_with("SUB_"));
    assert_eq!(sub.enrollment_id, s.enrollment_id);
    assert_eq!(sub.status, SubmissionStatus::Submitted);
    assert_eq!(sub.attachments.len(), 1);
    assert_eq!(sub.grade, None);

    let listed = list_submissions(&s.store, &s.enrollment_id).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(get_submission(&s.store, &sub.id).unwrap().content, "I was born again in 2019");
}

#[test]
fn test_submit_rejects_unknown_assignment_and_duplicates() {
    let s = school();
    let mut wrong = testimony("text");
    wrong.assignment_id = "essay".to_string();
    assert!(matches!(
        submit_assignment(&s.store, "stu-1", wrong),
        Err(SchoolError::BadRequest(_))
    ));

    let mut no_assignment = testimony("text");
    no_assignment.module_number = 2;
    assert!(matches!(
        submit_assignment(&s.store, "stu-1", no_assignment),
        Err(SchoolError::BadRequest(_))
    ));

    assert!(matches!(
        submit_assignment(&s.store, "ghost", testimony("text")),
        Err(SchoolError::NotFound(_))
    ));

    submit_assignment(&s.store, "stu-1", testimony("first")).unwrap();
    assert!(matches!(
        submit_assignment(&s.store, "stu-1", testimony("second")),
        Err(SchoolError::BadRequest(_))
    ));
}

#[test]
fn test_grading_requires_school_staff() {
    let s = school();
    let sub = submit_assignment(&s.store, "stu-1", testimony("text")).unwrap();

    assert!(matches!(
        grade_assignment(&s.store, "stranger", &sub.id, grade(80, false)),
        Err(SchoolError::Forbidden(_))
    ));
    assert!(matches!(
        grade_assignment(&s.store, "stu-1", &sub.id, grade(100, false)),
        Err(SchoolError::Forbidden(_))
    ));

    let graded = grade_assignment(&s.store, "tess", &sub.id, grade(85, false)).unwrap();
    assert_eq!(graded.status, SubmissionStatus::Graded);
    assert_eq!(graded.grade, Some(85));
    assert_eq!(graded.graded_by.as_deref(), Some("tess"));
    assert!(graded.graded_at.is_some());

    // Org management may regrade.
    let regraded = grade_assignment(&s.store, "pastor", &sub.id, grade(90, false)).unwrap();
    assert_eq!(regraded.grade, Some(90));

    assert!(matches!(
        grade_assignment(&s.store, "pastor", &sub.id, grade(101, false)),
        Err(SchoolError::BadRequest(_))
    ));
    assert!(matches!(
        grade_assignment(&s.store, "pastor", "SUB_missing", grade(50, false)),
        Err(SchoolError::NotFound(_))
    ));
}

#[test]
fn test_resubmission_flow() {
    let s = school();
    let sub = submit_assignment(&s.store, "stu-1", testimony("draft")).unwrap();

    grade_assignment(&s.store, "tess", &sub.id, grade(40, true)).unwrap();
    let resubmitted = submit_assignment(&s.store, "stu-1", testimony("final")).unwrap();
    assert_eq!(resubmitted.id, sub.id);
    assert_eq!(resubmitted.status, SubmissionStatus::Resubmit);
    assert_eq!(resubmitted.content, "final");
    assert!(!resubmitted.resubmission_allowed);

    // Only one resubmission per grant.
    assert!(matches!(
        submit_assignment(&s.store, "stu-1", testimony("again")),
        Err(SchoolError::BadRequest(_))
    ));

    let regraded = grade_assignment(&s.store, "tess", &sub.id, grade(88, false)).unwrap();
    assert_eq!(regraded.status, SubmissionStatus::Graded);
}

#[test]
fn test_progress_reads_assignment_state_from_submissions() {
    let s = school();
    let sub = submit_assignment(&s.store, "stu-1", testimony("text")).unwrap();
    grade_assignment(&s.store, "tess", &sub.id, grade(77, false)).unwrap();

    let progress = get_progress(&s.store, "stu-1").unwrap();
    assert_eq!(progress.assignments.len(), 1);
    assert_eq!(progress.assignments[0].submission_id, sub.id);
    assert_eq!(progress.assignments[0].status, SubmissionStatus::Graded);
    assert_eq!(progress.assignments[0].grade, Some(77));
}

#[test]
fn test_ended_enrollment_cannot_submit() {
    let s = school();
    end_enrollment(&s.store, "stu-1", &s.enrollment_id, EndReason::Withdrawn).unwrap();
    assert!(matches!(
        submit_assignment(&s.store, "stu-1", testimony("late")),
        Err(SchoolError::BadRequest(_))
    ));
}
