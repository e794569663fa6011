//! Database schema definitions.
//!
//! Everything lives in one SQLite file, `school.db`. Set-valued progress
//! (completed modules, completed lessons, role grants, batch teachers) is
//! stored as keyed tables so additions are idempotent `INSERT OR IGNORE`s
//! rather than read-modify-write of a document.

pub const SCHOOL_DB_NAME: &str = "school.db";
pub const SCHOOL_SCHEMA_VERSION: u32 = 1;

pub const SCHOOL_DB_SCHEMA_META: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
";

// --- Organization directory ---

pub const SCHOOL_DB_SCHEMA_ORGANIZATIONS: &str = "
    CREATE TABLE IF NOT EXISTS organizations (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        slug TEXT NOT NULL,
        org_type TEXT NOT NULL, -- zone, church, fellowship, cell, biblestudy
        parent_id TEXT,
        leader_id TEXT,
        created_by TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE(slug, org_type),
        FOREIGN KEY(parent_id) REFERENCES organizations(id)
    )
";
pub const SCHOOL_DB_INDEX_ORGANIZATIONS_PARENT: &str =
    "CREATE INDEX IF NOT EXISTS idx_organizations_parent ON organizations(parent_id)";

pub const SCHOOL_DB_SCHEMA_ORG_ROLE_GRANTS: &str = "
    CREATE TABLE IF NOT EXISTS org_role_grants (
        org_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        grant_kind TEXT NOT NULL, -- admin, assistant
        granted_by TEXT NOT NULL,
        granted_at TEXT NOT NULL,
        PRIMARY KEY(org_id, user_id, grant_kind),
        FOREIGN KEY(org_id) REFERENCES organizations(id)
    )
";

pub const SCHOOL_DB_SCHEMA_ORG_MEMBERS: &str = "
    CREATE TABLE IF NOT EXISTS org_members (
        org_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        role TEXT NOT NULL DEFAULT 'member', -- member, worker, leader, pastor, admin
        status TEXT NOT NULL DEFAULT 'active', -- active, inactive, pending
        joined_at TEXT NOT NULL,
        PRIMARY KEY(org_id, user_id),
        FOREIGN KEY(org_id) REFERENCES organizations(id)
    )
";

// --- Curriculum ---

pub const SCHOOL_DB_SCHEMA_MODULES: &str = "
    CREATE TABLE IF NOT EXISTS modules (
        module_number INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        lessons TEXT NOT NULL DEFAULT '[]', -- JSON array of lessons
        quiz TEXT NOT NULL DEFAULT '[]', -- JSON array of questions
        passing_score INTEGER NOT NULL DEFAULT 70,
        assignment TEXT, -- JSON assignment descriptor
        active INTEGER NOT NULL DEFAULT 1,
        updated_at TEXT NOT NULL
    )
";

// --- Batches ---

pub const SCHOOL_DB_SCHEMA_BATCHES: &str = "
    CREATE TABLE IF NOT EXISTS batches (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        batch_number INTEGER NOT NULL,
        name TEXT NOT NULL,
        start_date TEXT NOT NULL,
        end_date TEXT,
        status TEXT NOT NULL DEFAULT 'registration_open',
        principal_id TEXT,
        created_by TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE(org_id, batch_number),
        FOREIGN KEY(org_id) REFERENCES organizations(id)
    )
";
pub const SCHOOL_DB_INDEX_BATCHES_STATUS: &str =
    "CREATE INDEX IF NOT EXISTS idx_batches_status ON batches(status, start_date)";

pub const SCHOOL_DB_SCHEMA_BATCH_TEACHERS: &str = "
    CREATE TABLE IF NOT EXISTS batch_teachers (
        batch_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        added_at TEXT NOT NULL,
        PRIMARY KEY(batch_id, user_id),
        FOREIGN KEY(batch_id) REFERENCES batches(id)
    )
";

// --- Enrollments and progress ---

pub const SCHOOL_DB_SCHEMA_ENROLLMENTS: &str = "
    CREATE TABLE IF NOT EXISTS enrollments (
        id TEXT PRIMARY KEY,
        student_id TEXT NOT NULL,
        student_name TEXT NOT NULL,
        org_id TEXT,
        batch_id TEXT,
        status TEXT NOT NULL DEFAULT 'active',
        current_module INTEGER NOT NULL DEFAULT 1,
        total_modules INTEGER NOT NULL,
        enrolled_at TEXT NOT NULL,
        completed_at TEXT,
        ended_at TEXT,
        certificate_number TEXT UNIQUE,
        certificate_issued_by TEXT,
        certificate_issued_at TEXT,
        certificate_issue_date TEXT,
        updated_at TEXT NOT NULL,
        FOREIGN KEY(org_id) REFERENCES organizations(id),
        FOREIGN KEY(batch_id) REFERENCES batches(id)
    )
";
// Backs the one-open-enrollment-per-student rule at the storage layer.
pub const SCHOOL_DB_INDEX_ENROLLMENTS_OPEN: &str = "
    CREATE UNIQUE INDEX IF NOT EXISTS idx_enrollments_one_open
    ON enrollments(student_id)
    WHERE status IN ('enrolled', 'active', 'in_progress', 'completed')
";
pub const SCHOOL_DB_INDEX_ENROLLMENTS_BATCH: &str =
    "CREATE INDEX IF NOT EXISTS idx_enrollments_batch ON enrollments(batch_id)";

pub const SCHOOL_DB_SCHEMA_COMPLETED_MODULES: &str = "
    CREATE TABLE IF NOT EXISTS completed_modules (
        enrollment_id TEXT NOT NULL,
        module_number INTEGER NOT NULL,
        completed_at TEXT NOT NULL,
        PRIMARY KEY(enrollment_id, module_number),
        FOREIGN KEY(enrollment_id) REFERENCES enrollments(id)
    )
";

pub const SCHOOL_DB_SCHEMA_COMPLETED_LESSONS: &str = "
    CREATE TABLE IF NOT EXISTS completed_lessons (
        enrollment_id TEXT NOT NULL,
        lesson_key TEXT NOT NULL, -- '<module>-<lesson>'
        completed_at TEXT NOT NULL,
        PRIMARY KEY(enrollment_id, lesson_key),
        FOREIGN KEY(enrollment_id) REFERENCES enrollments(id)
    )
";

pub const SCHOOL_DB_SCHEMA_QUIZ_ATTEMPTS: &str = "
    CREATE TABLE IF NOT EXISTS quiz_attempts (
        id TEXT PRIMARY KEY,
        enrollment_id TEXT NOT NULL,
        module_number INTEGER NOT NULL,
        score INTEGER NOT NULL,
        passed INTEGER NOT NULL,
        attempt_date TEXT NOT NULL,
        FOREIGN KEY(enrollment_id) REFERENCES enrollments(id)
    )
";
pub const SCHOOL_DB_INDEX_QUIZ_ATTEMPTS: &str =
    "CREATE INDEX IF NOT EXISTS idx_quiz_attempts_enrollment ON quiz_attempts(enrollment_id, module_number)";

// --- Assignments ---

pub const SCHOOL_DB_SCHEMA_SUBMISSIONS: &str = "
    CREATE TABLE IF NOT EXISTS submissions (
        id TEXT PRIMARY KEY,
        enrollment_id TEXT NOT NULL,
        module_number INTEGER NOT NULL,
        assignment_id TEXT NOT NULL,
        content TEXT NOT NULL,
        attachments TEXT NOT NULL DEFAULT '[]', -- JSON array
        status TEXT NOT NULL DEFAULT 'submitted', -- submitted, graded, resubmit
        grade INTEGER,
        feedback TEXT,
        graded_by TEXT,
        graded_at TEXT,
        resubmission_allowed INTEGER NOT NULL DEFAULT 0,
        submitted_at TEXT NOT NULL,
        UNIQUE(enrollment_id, module_number, assignment_id),
        FOREIGN KEY(enrollment_id) REFERENCES enrollments(id)
    )
";

// --- Certificates ---

pub const SCHOOL_DB_SCHEMA_COUNTERS: &str = "
    CREATE TABLE IF NOT EXISTS counters (
        name TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    )
";

/// Applied in order by `db::initialize_school_db`.
pub const SCHOOL_DB_SCHEMA: &[&str] = &[
    SCHOOL_DB_SCHEMA_META,
    SCHOOL_DB_SCHEMA_ORGANIZATIONS,
    SCHOOL_DB_INDEX_ORGANIZATIONS_PARENT,
    SCHOOL_DB_SCHEMA_ORG_ROLE_GRANTS,
    SCHOOL_DB_SCHEMA_ORG_MEMBERS,
    SCHOOL_DB_SCHEMA_MODULES,
    SCHOOL_DB_SCHEMA_BATCHES,
    SCHOOL_DB_INDEX_BATCHES_STATUS,
    SCHOOL_DB_SCHEMA_BATCH_TEACHERS,
    SCHOOL_DB_SCHEMA_ENROLLMENTS,
    SCHOOL_DB_INDEX_ENROLLMENTS_OPEN,
    SCHOOL_DB_INDEX_ENROLLMENTS_BATCH,
    SCHOOL_DB_SCHEMA_COMPLETED_MODULES,
    SCHOOL_DB_SCHEMA_COMPLETED_LESSONS,
    SCHOOL_DB_SCHEMA_QUIZ_ATTEMPTS,
    SCHOOL_DB_INDEX_QUIZ_ATTEMPTS,
    SCHOOL_DB_SCHEMA_SUBMISSIONS,
    SCHOOL_DB_SCHEMA_COUNTERS,
];
