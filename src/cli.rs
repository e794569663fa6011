//! CLI struct definitions for the `ecclesia` command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "ecclesia",
    version = env!("CARGO_PKG_VERSION"),
    about = "Ecclesia runs a church's Foundation School: organizations and roles, enrollment, lesson and quiz progression, assignment grading and certificates."
)]
pub(crate) struct Cli {
    /// Caller identity. Trusted as given; authentication happens upstream.
    #[clap(long, global = true, env = "ECCLESIA_ACTOR", default_value = "anonymous")]
    pub actor: String,
    /// Output format.
    #[clap(long, global = true, value_enum, default_value = "json")]
    pub format: OutputFormat,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Create `.ecclesia/` and the school database in a directory.
    Init {
        /// Directory to initialize (defaults to current working directory).
        #[clap(short, long)]
        dir: Option<PathBuf>,
    },
    /// Organization directory and role grants.
    Org(OrgCli),
    /// Curriculum catalog.
    Curriculum(CurriculumCli),
    /// Batches (cohorts) and their staff.
    Batch(BatchCli),
    /// Enroll a student (idempotent).
    Enroll {
        /// Student id (defaults to --actor).
        #[clap(long)]
        student: Option<String>,
        /// Display name shown on the certificate.
        #[clap(long)]
        name: Option<String>,
        #[clap(long)]
        org: Option<String>,
        #[clap(long)]
        batch: Option<String>,
    },
    /// Enrollment records.
    Enrollment(EnrollmentCli),
    /// Show a student's progress.
    Progress {
        /// Student id (defaults to --actor).
        #[clap(long)]
        student: Option<String>,
    },
    /// Mark a lesson complete for the calling student.
    Lesson {
        #[clap(long)]
        module: u32,
        #[clap(long)]
        lesson: u32,
    },
    /// Submit quiz answers for the calling student.
    Quiz {
        #[clap(long)]
        module: u32,
        /// Zero-based option index per question, comma separated.
        #[clap(long, value_delimiter = ',')]
        answers: Vec<usize>,
    },
    /// Assignment submissions and grading.
    Assignment(AssignmentCli),
    /// Certificate issuance, rendering and verification.
    Certificate(CertificateCli),
    /// Rank students by modules passed and best quiz scores.
    Leaderboard {
        #[clap(long)]
        org: Option<String>,
        #[clap(long)]
        batch: Option<String>,
    },
    /// Print subsystem schemas.
    Schema {
        /// Optional: filter by subsystem name
        #[clap(long)]
        subsystem: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct OrgCli {
    #[clap(subcommand)]
    pub command: OrgCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum OrgCommand {
    /// Create an organization; the caller becomes its leader.
    Create {
        #[clap(long)]
        name: String,
        /// zone | church | fellowship | cell | biblestudy
        #[clap(long = "type")]
        org_type: String,
        #[clap(long)]
        parent: Option<String>,
        #[clap(long, default_value = "")]
        description: String,
    },
    Get {
        /// Organization id
        #[clap(long)]
        id: Option<String>,
        /// Look up by slug instead (requires --type)
        #[clap(long, requires = "org_type")]
        slug: Option<String>,
        #[clap(long = "type")]
        org_type: Option<String>,
    },
    List {
        #[clap(long = "type")]
        org_type: Option<String>,
    },
    Children {
        #[clap(long)]
        id: String,
    },
    Members {
        #[clap(long)]
        id: String,
    },
    Update {
        #[clap(long)]
        id: String,
        #[clap(long)]
        name: Option<String>,
        #[clap(long)]
        description: Option<String>,
        #[clap(long)]
        leader: Option<String>,
    },
    AddMember {
        #[clap(long)]
        id: String,
        #[clap(long)]
        user: String,
        /// member | worker | leader | pastor | admin
        #[clap(long, default_value = "member")]
        role: String,
        /// active | inactive | pending
        #[clap(long, default_value = "active")]
        status: String,
    },
    RemoveMember {
        #[clap(long)]
        id: String,
        #[clap(long)]
        user: String,
    },
    MemberStatus {
        #[clap(long)]
        id: String,
        #[clap(long)]
        user: String,
        #[clap(long)]
        status: String,
    },
    /// Grant admin or assistant to a user.
    Grant {
        #[clap(long)]
        id: String,
        #[clap(long)]
        user: String,
        /// admin | assistant
        #[clap(long)]
        role: String,
    },
    Revoke {
        #[clap(long)]
        id: String,
        #[clap(long)]
        user: String,
        #[clap(long)]
        role: String,
    },
    /// Resolve a user's role on an organization.
    Role {
        #[clap(long)]
        id: String,
        /// User id (defaults to --actor).
        #[clap(long)]
        user: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct CurriculumCli {
    #[clap(subcommand)]
    pub command: CurriculumCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CurriculumCommand {
    /// Load or replace modules from a TOML file of `[[module]]` entries.
    Import {
        #[clap(long)]
        file: PathBuf,
    },
    List {
        #[clap(long)]
        all: bool,
    },
    /// Show a module's quiz without answers.
    Quiz {
        #[clap(long)]
        module: u32,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct BatchCli {
    #[clap(subcommand)]
    pub command: BatchCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum BatchCommand {
    Create {
        #[clap(long)]
        org: String,
        #[clap(long)]
        number: u32,
        #[clap(long)]
        name: String,
        /// YYYY-MM-DD
        #[clap(long)]
        start: String,
        #[clap(long)]
        end: Option<String>,
        #[clap(long)]
        principal: Option<String>,
    },
    Get {
        #[clap(long)]
        id: String,
    },
    List {
        #[clap(long)]
        org: Option<String>,
        #[clap(long)]
        status: Option<String>,
    },
    Status {
        #[clap(long)]
        id: String,
        /// draft | registration_open | in_progress | completed | graduated | archived
        #[clap(long)]
        status: String,
    },
    AddTeacher {
        #[clap(long)]
        id: String,
        #[clap(long)]
        user: String,
    },
    RemoveTeacher {
        #[clap(long)]
        id: String,
        #[clap(long)]
        user: String,
    },
    /// Set or clear (omit --user) the principal.
    Principal {
        #[clap(long)]
        id: String,
        #[clap(long)]
        user: Option<String>,
    },
    Roster {
        #[clap(long)]
        id: String,
    },
    /// Show the batch new enrollments would join.
    Open {
        #[clap(long)]
        org: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct EnrollmentCli {
    #[clap(subcommand)]
    pub command: EnrollmentCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum EnrollmentCommand {
    Get {
        #[clap(long)]
        id: String,
    },
    List {
        #[clap(long)]
        student: Option<String>,
        #[clap(long)]
        org: Option<String>,
        #[clap(long)]
        batch: Option<String>,
        #[clap(long)]
        status: Option<String>,
    },
    /// Mark an enrollment dropped or withdrawn.
    End {
        #[clap(long)]
        id: String,
        #[clap(long, value_enum, default_value = "withdrawn")]
        reason: EndReasonArg,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EndReasonArg {
    Dropped,
    Withdrawn,
}

#[derive(clap::Args, Debug)]
pub(crate) struct AssignmentCli {
    #[clap(subcommand)]
    pub command: AssignmentCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum AssignmentCommand {
    /// Submit (or resubmit) an assignment for the calling student.
    Submit {
        #[clap(long)]
        module: u32,
        #[clap(long)]
        assignment: String,
        #[clap(long)]
        content: String,
        #[clap(long = "attachment")]
        attachments: Vec<String>,
    },
    Grade {
        #[clap(long)]
        id: String,
        #[clap(long)]
        grade: u32,
        #[clap(long)]
        feedback: Option<String>,
        #[clap(long)]
        allow_resubmission: bool,
    },
    Get {
        #[clap(long)]
        id: String,
    },
    List {
        #[clap(long)]
        enrollment: String,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct CertificateCli {
    #[clap(subcommand)]
    pub command: CertificateCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CertificateCommand {
    Issue {
        #[clap(long)]
        enrollment: String,
        /// Issue date, YYYY-MM-DD (defaults to today).
        #[clap(long)]
        date: Option<String>,
    },
    /// Render the SVG certificate of a graduated enrollment.
    Render {
        #[clap(long)]
        enrollment: String,
        #[clap(long)]
        out: PathBuf,
    },
    Verify {
        #[clap(long)]
        number: String,
    },
}
