//! SQL migration definitions for the namex database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: domains, keywords",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Domain records and their harvested metadata
CREATE TABLE IF NOT EXISTS domains (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    domain         TEXT NOT NULL UNIQUE,
    title          TEXT,
    description    TEXT,
    og_title       TEXT,
    og_description TEXT,
    expiry_date    TEXT,
    enriched_at    TEXT
);

CREATE INDEX IF NOT EXISTS idx_domains_expiry ON domains(expiry_date);

-- One row per keyword; the unique pair keeps redelivered results idempotent
CREATE TABLE IF NOT EXISTS keywords (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    domain_id INTEGER NOT NULL REFERENCES domains(id) ON DELETE CASCADE,
    keyword   TEXT NOT NULL,
    UNIQUE(domain_id, keyword)
);

CREATE INDEX IF NOT EXISTS idx_keywords_domain ON keywords(domain_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
