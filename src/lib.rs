//! Ecclesia: a local-first Foundation School engine for church organizations.
//!
//! Students enroll in a fixed curriculum, complete lessons, pass a quiz per
//! module and submit assignments. Staff grade the work, and once every
//! module is passed an authorized staff member issues the certificate.
//!
//! # Architecture
//!
//! ## Project store
//!
//! State lives in `<project>/.ecclesia/data/school.db`, with an optional
//! `<project>/.ecclesia/config.toml` next to it.
//!
//! ## The Thin Waist
//!
//! All reads and writes route through [`core::broker::DbBroker`], which
//! serializes access in-process and appends an audit line per call to
//! `broker.events.jsonl`. Multi-step operations (enroll, quiz submission,
//! certificate issuance) run inside one `BEGIN IMMEDIATE` transaction.
//!
//! ## Subsystems (Plugins)
//!
//! - `organization`: the zone → church → fellowship → cell → bible study tree
//! - `authz`: role resolution and the management gate
//! - `curriculum`: modules, lessons and quizzes
//! - `batch`: cohorts with a principal and teachers
//! - `enrollment`: one active enrollment per student
//! - `progression`: lessons, quizzes, completion and the leaderboard
//! - `assignment`: submissions and grading
//! - `certificate`: graduation, rendering and verification
//!
//! # Examples
//!
//! ```bash
//! ecclesia init
//! ecclesia --actor pastor-ann org create --name "Grace Chapel" --type church
//! ecclesia --actor pastor-ann curriculum import --file curriculum.toml
//! ecclesia --actor stu-1 enroll --name "Sam Okoro"
//! ecclesia --actor stu-1 quiz --module 1 --answers 0,2,1
//! ecclesia --actor pastor-ann certificate issue --enrollment ENR_...
//! ```

mod cli;
pub mod core;
pub mod plugins;

use crate::cli::{
    AssignmentCommand, BatchCommand, CertificateCommand, Cli, Command, CurriculumCommand,
    EndReasonArg, EnrollmentCommand, OrgCommand, OutputFormat,
};
use crate::core::{
    config, db,
    error::SchoolError,
    logging,
    store::{Store, StoreKind},
    time,
};
use crate::plugins::{
    assignment, authz, batch, certificate, curriculum, enrollment, organization, progression,
};

use clap::Parser;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fs;
use std::path::{Path, PathBuf};

const PROJECT_DIR_NAME: &str = ".ecclesia";

fn find_ecclesia_project_root(start_dir: &Path) -> Result<PathBuf, SchoolError> {
    let mut current_dir = PathBuf::from(start_dir);
    loop {
        if current_dir.join(PROJECT_DIR_NAME).is_dir() {
            return Ok(current_dir);
        }
        if !current_dir.pop() {
            return Err(SchoolError::NotFound(
                "'.ecclesia' directory not found in current or parent directories. Run `ecclesia init` first.".to_string(),
            ));
        }
    }
}

fn project_store(project_root: &Path) -> Store {
    Store {
        kind: StoreKind::Project,
        root: project_root.join(PROJECT_DIR_NAME).join("data"),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<JsonValue, SchoolError> {
    Ok(serde_json::to_value(value)?)
}

fn emit(format: OutputFormat, cmd: &str, result: JsonValue) -> Result<(), SchoolError> {
    match format {
        OutputFormat::Json => {
            let envelope = time::command_envelope(cmd, "ok", serde_json::json!({ "result": result }));
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        }
        OutputFormat::Text => print_text(cmd, &result),
    }
    Ok(())
}

fn print_text(cmd: &str, result: &JsonValue) {
    use colored::Colorize;

    println!("{} {}", "▸".bright_cyan(), cmd.bold());
    match result {
        JsonValue::Object(map) => {
            for (key, value) in map {
                let shown = match value {
                    JsonValue::String(s) => s.clone(),
                    JsonValue::Null => "-".dimmed().to_string(),
                    other => other.to_string(),
                };
                println!("  {}: {}", key.bright_white(), shown);
            }
        }
        JsonValue::Array(items) if items.is_empty() => println!("  {}", "(none)".dimmed()),
        JsonValue::Array(items) => {
            for item in items {
                println!("  {} {}", "•".bright_magenta(), item);
            }
        }
        other => println!("  {}", other),
    }
}

pub fn run() -> Result<(), SchoolError> {
    let cli = Cli::parse();
    let current_dir = std::env::current_dir()?;

    if let Command::Init { dir } = &cli.command {
        logging::init_logging("warn");
        let target_dir = dir.clone().unwrap_or_else(|| current_dir.clone());
        fs::create_dir_all(&target_dir)?;
        let target_dir = fs::canonicalize(&target_dir)?;
        let store = project_store(&target_dir);
        db::initialize_school_db(&store.root)?;
        tracing::info!(path = %store.root.display(), "ecclesia project initialized");
        return emit(
            cli.format,
            "init",
            serde_json::json!({ "project_root": target_dir, "store_root": store.root }),
        );
    }

    let project_root = find_ecclesia_project_root(&current_dir)?;
    let store = project_store(&project_root);
    let settings = config::load_config(&project_root)?;
    logging::init_logging(&settings.logging.level);
    db::initialize_school_db(&store.root)?;

    let (cmd, result) = dispatch(&store, &settings, &cli.actor, cli.command)?;
    emit(cli.format, &cmd, result)
}

fn dispatch(
    store: &Store,
    settings: &config::EcclesiaConfig,
    actor: &str,
    command: Command,
) -> Result<(String, JsonValue), SchoolError> {
    let actor = actor.to_string();
    let out = match command {
        Command::Init { .. } => {
            return Err(SchoolError::BadRequest(
                "`init` runs outside command dispatch".to_string(),
            ));
        }
        Command::Org(org_cli) => run_org_cli(store, &actor, org_cli.command)?,
        Command::Curriculum(curriculum_cli) => match curriculum_cli.command {
            CurriculumCommand::Import { file } => {
                let imported = curriculum::import_curriculum(
                    store,
                    &actor,
                    &file,
                    settings.school.default_passing_score,
                )?;
                ("curriculum.import", serde_json::json!({ "imported": imported }))
            }
            CurriculumCommand::List { all } => {
                ("curriculum.list", to_json(&curriculum::list_modules(store, all)?)?)
            }
            CurriculumCommand::Quiz { module } => {
                ("curriculum.quiz", to_json(&curriculum::quiz_view(store, module)?)?)
            }
        },
        Command::Batch(batch_cli) => run_batch_cli(store, &actor, batch_cli.command)?,
        Command::Enroll {
            student,
            name,
            org,
            batch,
        } => {
            let outcome = enrollment::enroll(
                store,
                enrollment::EnrollRequest {
                    student_id: student.unwrap_or_else(|| actor.clone()),
                    student_name: name,
                    org_id: org,
                    batch_id: batch,
                },
            )?;
            ("enroll", to_json(&outcome)?)
        }
        Command::Enrollment(enrollment_cli) => match enrollment_cli.command {
            EnrollmentCommand::Get { id } => {
                ("enrollment.get", to_json(&enrollment::get_enrollment(store, &id)?)?)
            }
            EnrollmentCommand::List {
                student,
                org,
                batch,
                status,
            } => {
                let filter = enrollment::EnrollmentFilter {
                    student_id: student,
                    org_id: org,
                    batch_id: batch,
                    status: status
                        .as_deref()
                        .map(str::parse::<enrollment::EnrollmentStatus>)
                        .transpose()?,
                };
                ("enrollment.list", to_json(&enrollment::list_enrollments(store, &filter)?)?)
            }
            EnrollmentCommand::End { id, reason } => {
                let reason = match reason {
                    EndReasonArg::Dropped => enrollment::EndReason::Dropped,
                    EndReasonArg::Withdrawn => enrollment::EndReason::Withdrawn,
                };
                (
                    "enrollment.end",
                    to_json(&enrollment::end_enrollment(store, &actor, &id, reason)?)?,
                )
            }
        },
        Command::Progress { student } => {
            let student = student.unwrap_or_else(|| actor.clone());
            ("progress", to_json(&progression::get_progress(store, &student)?)?)
        }
        Command::Lesson { module, lesson } => {
            let lessons = progression::complete_lesson(store, &actor, module, lesson)?;
            ("lesson", serde_json::json!({ "completed_lessons": lessons }))
        }
        Command::Quiz { module, answers } => {
            ("quiz", to_json(&progression::submit_quiz(store, &actor, module, &answers)?)?)
        }
        Command::Assignment(assignment_cli) => match assignment_cli.command {
            AssignmentCommand::Submit {
                module,
                assignment: assignment_id,
                content,
                attachments,
            } => {
                let saved = assignment::submit_assignment(
                    store,
                    &actor,
                    assignment::NewSubmission {
                        module_number: module,
                        assignment_id,
                        content,
                        attachments,
                    },
                )?;
                ("assignment.submit", to_json(&saved)?)
            }
            AssignmentCommand::Grade {
                id,
                grade,
                feedback,
                allow_resubmission,
            } => {
                let graded = assignment::grade_assignment(
                    store,
                    &actor,
                    &id,
                    assignment::GradeRequest {
                        grade,
                        feedback,
                        resubmission_allowed: allow_resubmission,
                    },
                )?;
                ("assignment.grade", to_json(&graded)?)
            }
            AssignmentCommand::Get { id } => {
                ("assignment.get", to_json(&assignment::get_submission(store, &id)?)?)
            }
            AssignmentCommand::List { enrollment: id } => {
                ("assignment.list", to_json(&assignment::list_submissions(store, &id)?)?)
            }
        },
        Command::Certificate(certificate_cli) => match certificate_cli.command {
            CertificateCommand::Issue { enrollment: id, date } => {
                let issue = certificate::issue_certificate(store, &actor, &id, date.as_deref())?;
                ("certificate.issue", to_json(&issue)?)
            }
            CertificateCommand::Render { enrollment: id, out } => {
                let rendered = certificate::render_certificate(
                    store,
                    &id,
                    &certificate::SvgCertificateRenderer,
                )?;
                fs::write(&out, &rendered.bytes)?;
                let mut value = to_json(&rendered)?;
                if let Some(obj) = value.as_object_mut() {
                    obj.insert("path".to_string(), to_json(&out)?);
                    obj.insert("bytes".to_string(), rendered.bytes.len().into());
                }
                ("certificate.render", value)
            }
            CertificateCommand::Verify { number } => {
                ("certificate.verify", to_json(&certificate::verify_certificate(store, &number)?)?)
            }
        },
        Command::Leaderboard { org, batch } => {
            let scope = progression::LeaderboardScope {
                org_id: org,
                batch_id: batch,
            };
            ("leaderboard", to_json(&progression::leaderboard(store, &scope)?)?)
        }
        Command::Schema { subsystem } => ("schema", schemas(subsystem.as_deref())?),
    };
    Ok((out.0.to_string(), out.1))
}

fn run_org_cli(
    store: &Store,
    actor: &str,
    command: OrgCommand,
) -> Result<(&'static str, JsonValue), SchoolError> {
    Ok(match command {
        OrgCommand::Create {
            name,
            org_type,
            parent,
            description,
        } => {
            let created = organization::create_organization(
                store,
                actor,
                organization::NewOrganization {
                    name,
                    org_type: org_type.parse()?,
                    parent_id: parent,
                    description,
                },
            )?;
            ("org.create", to_json(&created)?)
        }
        OrgCommand::Get { id, slug, org_type } => {
            let org = match (id, slug, org_type) {
                (Some(id), _, _) => organization::get_organization(store, &id)?,
                (None, Some(slug), Some(org_type)) => {
                    organization::get_by_slug(store, &slug, org_type.parse()?)?
                }
                _ => {
                    return Err(SchoolError::BadRequest(
                        "pass --id, or --slug together with --type".to_string(),
                    ));
                }
            };
            let members = organization::member_count(store, &org.id)?;
            let mut value = to_json(&org)?;
            if let Some(obj) = value.as_object_mut() {
                obj.insert("member_count".to_string(), members.into());
            }
            ("org.get", value)
        }
        OrgCommand::List { org_type } => {
            let filter = org_type
                .as_deref()
                .map(str::parse::<organization::OrgType>)
                .transpose()?;
            ("org.list", to_json(&organization::list_organizations(store, filter)?)?)
        }
        OrgCommand::Children { id } => {
            ("org.children", to_json(&organization::list_children(store, &id)?)?)
        }
        OrgCommand::Members { id } => {
            ("org.members", to_json(&organization::list_members(store, &id)?)?)
        }
        OrgCommand::Update {
            id,
            name,
            description,
            leader,
        } => {
            let updated = organization::update_organization(
                store,
                actor,
                &id,
                organization::OrganizationUpdate {
                    name,
                    description,
                    leader_id: leader,
                },
            )?;
            ("org.update", to_json(&updated)?)
        }
        OrgCommand::AddMember {
            id,
            user,
            role,
            status,
        } => {
            let membership = organization::add_member(
                store,
                actor,
                &id,
                &user,
                role.parse()?,
                status.parse()?,
            )?;
            ("org.add_member", to_json(&membership)?)
        }
        OrgCommand::RemoveMember { id, user } => {
            organization::remove_member(store, actor, &id, &user)?;
            ("org.remove_member", serde_json::json!({ "org_id": id, "user_id": user }))
        }
        OrgCommand::MemberStatus { id, user, status } => {
            let status: organization::MemberStatus = status.parse()?;
            organization::set_member_status(store, actor, &id, &user, status)?;
            (
                "org.member_status",
                serde_json::json!({ "org_id": id, "user_id": user, "status": status.as_str() }),
            )
        }
        OrgCommand::Grant { id, user, role } => {
            let grant: organization::GrantKind = role.parse()?;
            organization::grant_role(store, actor, &id, &user, grant)?;
            (
                "org.grant",
                serde_json::json!({ "org_id": id, "user_id": user, "grant": grant.as_str() }),
            )
        }
        OrgCommand::Revoke { id, user, role } => {
            let grant: organization::GrantKind = role.parse()?;
            organization::revoke_role(store, actor, &id, &user, grant)?;
            (
                "org.revoke",
                serde_json::json!({ "org_id": id, "user_id": user, "grant": grant.as_str() }),
            )
        }
        OrgCommand::Role { id, user } => {
            let user = user.unwrap_or_else(|| actor.to_string());
            let role = authz::role_of(store, &user, &id)?;
            (
                "org.role",
                serde_json::json!({
                    "org_id": id,
                    "user_id": user,
                    "role": role.map(|r| r.as_str()),
                    "can_manage": authz::can_manage(role),
                }),
            )
        }
    })
}

fn run_batch_cli(
    store: &Store,
    actor: &str,
    command: BatchCommand,
) -> Result<(&'static str, JsonValue), SchoolError> {
    Ok(match command {
        BatchCommand::Create {
            org,
            number,
            name,
            start,
            end,
            principal,
        } => {
            let created = batch::create_batch(
                store,
                actor,
                batch::NewBatch {
                    org_id: org,
                    batch_number: number,
                    name,
                    start_date: start,
                    end_date: end,
                    principal_id: principal,
                },
            )?;
            ("batch.create", to_json(&created)?)
        }
        BatchCommand::Get { id } => ("batch.get", to_json(&batch::get_batch(store, &id)?)?),
        BatchCommand::List { org, status } => {
            let status = status
                .as_deref()
                .map(str::parse::<batch::BatchStatus>)
                .transpose()?;
            ("batch.list", to_json(&batch::list_batches(store, org.as_deref(), status)?)?)
        }
        BatchCommand::Status { id, status } => (
            "batch.status",
            to_json(&batch::update_batch_status(store, actor, &id, status.parse()?)?)?,
        ),
        BatchCommand::AddTeacher { id, user } => (
            "batch.add_teacher",
            to_json(&batch::add_teacher(store, actor, &id, &user)?)?,
        ),
        BatchCommand::RemoveTeacher { id, user } => (
            "batch.remove_teacher",
            to_json(&batch::remove_teacher(store, actor, &id, &user)?)?,
        ),
        BatchCommand::Principal { id, user } => (
            "batch.principal",
            to_json(&batch::set_principal(store, actor, &id, user.as_deref())?)?,
        ),
        BatchCommand::Roster { id } => {
            ("batch.roster", to_json(&enrollment::batch_roster(store, &id)?)?)
        }
        BatchCommand::Open { org } => {
            ("batch.open", to_json(&batch::open_batch_for(store, org.as_deref())?)?)
        }
    })
}

fn schemas(subsystem: Option<&str>) -> Result<JsonValue, SchoolError> {
    let mut schemas = std::collections::BTreeMap::new();
    schemas.insert("broker", core::broker::schema());
    schemas.insert("organization", organization::schema());
    schemas.insert("curriculum", curriculum::schema());
    schemas.insert("batch", batch::schema());
    schemas.insert("enrollment", enrollment::schema());
    schemas.insert("progression", progression::schema());
    schemas.insert("assignment", assignment::schema());
    schemas.insert("certificate", certificate::schema());

    match subsystem {
        Some(name) => schemas
            .get(name)
            .cloned()
            .ok_or_else(|| SchoolError::NotFound(format!("subsystem '{}' not found", name))),
        None => Ok(serde_json::json!({
            "schema_version": "1.0.0",
            "subsystems": schemas
        })),
    }
}
