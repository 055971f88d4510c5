//! SQL schema for the enrollment novelty store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- ── Enrollment aggregate ──────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS students (
    student_id     TEXT PRIMARY KEY,
    institution_id TEXT NOT NULL,
    full_name      TEXT NOT NULL,
    user_active    INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS grades (
    grade_id    TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    level       INTEGER NOT NULL,
    is_terminal INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS class_groups (
    group_id      TEXT PRIMARY KEY,
    campus_id     TEXT NOT NULL,
    grade_id      TEXT NOT NULL REFERENCES grades(grade_id),
    academic_year INTEGER NOT NULL,
    shift         TEXT NOT NULL,
    modality      TEXT NOT NULL,
    name          TEXT NOT NULL,
    base_capacity INTEGER NOT NULL CHECK (base_capacity >= 0)
);

CREATE TABLE IF NOT EXISTS enrollments (
    enrollment_id TEXT PRIMARY KEY,
    student_id    TEXT NOT NULL REFERENCES students(student_id),
    campus_id     TEXT NOT NULL,
    grade_id      TEXT NOT NULL REFERENCES grades(grade_id),
    group_id      TEXT REFERENCES class_groups(group_id),
    academic_year INTEGER NOT NULL,
    status        TEXT NOT NULL,   -- 'active' | 'withdrawn' | 'graduated'
    updated_at    TEXT NOT NULL
);

-- ── Capacity configuration (read-only to the engine) ─────────────────────

CREATE TABLE IF NOT EXISTS capacity_buckets (
    campus_id     TEXT NOT NULL,
    grade_id      TEXT NOT NULL,
    academic_year INTEGER NOT NULL,
    shift         TEXT NOT NULL,
    modality      TEXT NOT NULL,
    capacity      INTEGER NOT NULL CHECK (capacity >= 0),
    active        INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (campus_id, grade_id, academic_year, shift, modality)
);

CREATE TABLE IF NOT EXISTS group_capacity_overrides (
    group_id TEXT PRIMARY KEY REFERENCES class_groups(group_id),
    capacity INTEGER NOT NULL CHECK (capacity >= 0),
    active   INTEGER NOT NULL DEFAULT 1
);

-- ── Cases ─────────────────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS novelty_cases (
    case_id         TEXT PRIMARY KEY,
    student_id      TEXT NOT NULL REFERENCES students(student_id),
    institution_id  TEXT NOT NULL,
    novelty_type    TEXT NOT NULL,
    reason_id       TEXT,
    status          TEXT NOT NULL,
    radicado        TEXT,
    radicado_year   INTEGER,
    radicado_seq    INTEGER,
    created_at      TEXT NOT NULL,
    requested_at    TEXT NOT NULL,
    filed_at        TEXT,
    executed_at     TEXT,
    closed_at       TEXT,
    payload         TEXT NOT NULL DEFAULT 'null',
    idempotency_key TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS novelty_cases_radicado_idx
    ON novelty_cases(institution_id, radicado_year, radicado_seq)
    WHERE radicado_seq IS NOT NULL;

CREATE INDEX IF NOT EXISTS novelty_cases_student_idx ON novelty_cases(student_id);

-- Last sequence issued per institution and calendar year.
CREATE TABLE IF NOT EXISTS radicado_counters (
    institution_id TEXT NOT NULL,
    year           INTEGER NOT NULL,
    last_sequence  INTEGER NOT NULL,
    PRIMARY KEY (institution_id, year)
);

-- Append-only. Rows may only disappear together with an unfiled draft.
CREATE TABLE IF NOT EXISTS case_transitions (
    transition_id TEXT PRIMARY KEY,
    case_id       TEXT NOT NULL REFERENCES novelty_cases(case_id),
    from_status   TEXT,
    to_status     TEXT NOT NULL,
    actor_id      TEXT NOT NULL,
    actor_role    TEXT NOT NULL,
    comment       TEXT,
    origin        TEXT,
    recorded_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS case_transitions_case_idx ON case_transitions(case_id);

CREATE TRIGGER IF NOT EXISTS case_transitions_no_update
BEFORE UPDATE ON case_transitions
BEGIN
    SELECT RAISE(ABORT, 'case_transitions is append-only');
END;

CREATE TRIGGER IF NOT EXISTS case_transitions_no_delete
BEFORE DELETE ON case_transitions
WHEN (SELECT radicado FROM novelty_cases WHERE case_id = OLD.case_id) IS NOT NULL
BEGIN
    SELECT RAISE(ABORT, 'case_transitions is append-only');
END;

CREATE TABLE IF NOT EXISTS novelty_executions (
    execution_id    TEXT PRIMARY KEY,
    case_id         TEXT NOT NULL UNIQUE REFERENCES novelty_cases(case_id),
    idempotency_key TEXT NOT NULL UNIQUE,
    executed_by     TEXT NOT NULL,
    executed_at     TEXT NOT NULL,
    before_json     TEXT NOT NULL,
    after_json      TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS novelty_executions_immutable
BEFORE UPDATE ON novelty_executions
BEGIN
    SELECT RAISE(ABORT, 'novelty_executions is immutable');
END;

CREATE TABLE IF NOT EXISTS novelty_reversions (
    reversion_id TEXT PRIMARY KEY,
    case_id      TEXT NOT NULL UNIQUE REFERENCES novelty_executions(case_id),
    reverted_by  TEXT NOT NULL,
    reverted_at  TEXT NOT NULL,
    comment      TEXT NOT NULL,
    before_json  TEXT NOT NULL,
    after_json   TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS novelty_reversions_immutable
BEFORE UPDATE ON novelty_reversions
BEGIN
    SELECT RAISE(ABORT, 'novelty_reversions is immutable');
END;

-- ── Required documents ───────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS document_rules (
    rule_id       TEXT PRIMARY KEY,
    novelty_type  TEXT NOT NULL,
    reason_id     TEXT,            -- NULL: baseline for the whole type
    document_type TEXT NOT NULL,
    active        INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS document_rules_type_idx ON document_rules(novelty_type);

CREATE TABLE IF NOT EXISTS case_documents (
    case_id       TEXT NOT NULL REFERENCES novelty_cases(case_id),
    document_type TEXT NOT NULL,
    attached_at   TEXT NOT NULL,
    PRIMARY KEY (case_id, document_type)
);

-- ── Capacity leases ──────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS lock_leases (
    lock_key   TEXT PRIMARY KEY,
    owner      TEXT NOT NULL,
    expires_at INTEGER NOT NULL    -- unix millis
);

PRAGMA user_version = 1;
";
