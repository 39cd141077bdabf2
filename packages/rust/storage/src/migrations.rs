//! SQL migration definitions for the Trustline database.
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
    vec![
        Migration {
            version: 1,
            description: "Initial schema: tenants, knowledge store, demand signals, recommendations, content, receipts",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS tenants (
    id            TEXT PRIMARY KEY,
    domain        TEXT NOT NULL UNIQUE,
    name          TEXT NOT NULL,
    keywords_json TEXT NOT NULL DEFAULT '[]',
    created_at    TEXT NOT NULL
);

-- Knowledge store
CREATE TABLE IF NOT EXISTS claims (
    id           TEXT PRIMARY KEY,
    tenant_id    TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    key          TEXT NOT NULL,
    value        TEXT NOT NULL,
    confidence   INTEGER NOT NULL,
    freshness_at TEXT,
    scope        TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    UNIQUE(tenant_id, key)
);

CREATE TABLE IF NOT EXISTS evidence (
    id          TEXT PRIMARY KEY,
    claim_id    TEXT NOT NULL REFERENCES claims(id) ON DELETE CASCADE,
    url         TEXT NOT NULL,
    snippet     TEXT,
    captured_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_evidence_claim ON evidence(claim_id);

-- Demand signals
CREATE TABLE IF NOT EXISTS questions (
    id                  TEXT PRIMARY KEY,
    tenant_id           TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    taxonomy            TEXT NOT NULL,
    text                TEXT NOT NULL,
    impact_score        INTEGER NOT NULL,
    state               TEXT NOT NULL DEFAULT 'UNANSWERED',
    recommended_surface TEXT NOT NULL,
    product_handle      TEXT,
    UNIQUE(tenant_id, text)
);

CREATE TABLE IF NOT EXISTS needs (
    id          TEXT PRIMARY KEY,
    question_id TEXT NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
    claim_key   TEXT NOT NULL,
    required    INTEGER NOT NULL DEFAULT 1,
    claim_id    TEXT REFERENCES claims(id) ON DELETE SET NULL,
    UNIQUE(question_id, claim_key)
);

CREATE TABLE IF NOT EXISTS gaps (
    id          TEXT PRIMARY KEY,
    tenant_id   TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    question_id TEXT NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
    claim_key   TEXT NOT NULL,
    kind        TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    UNIQUE(question_id, claim_key)
);

CREATE INDEX IF NOT EXISTS idx_gaps_tenant ON gaps(tenant_id);

CREATE TABLE IF NOT EXISTS answer_samples (
    id            TEXT PRIMARY KEY,
    tenant_id     TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    question_text TEXT NOT NULL,
    answer        TEXT NOT NULL,
    hedging_score INTEGER NOT NULL,
    unverifiable  INTEGER NOT NULL DEFAULT 0,
    sampled_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_answer_samples_text ON answer_samples(tenant_id, question_text);

CREATE TABLE IF NOT EXISTS products (
    tenant_id   TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    handle      TEXT NOT NULL,
    title       TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    tags_json   TEXT NOT NULL DEFAULT '[]',
    specs_json  TEXT NOT NULL DEFAULT '{}',
    PRIMARY KEY (tenant_id, handle)
);

-- Recommendations, one per stable slug
CREATE TABLE IF NOT EXISTS recommendations (
    id             TEXT PRIMARY KEY,
    tenant_id      TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    action         TEXT NOT NULL,
    surface        TEXT NOT NULL,
    status         TEXT NOT NULL DEFAULT 'PROPOSED',
    stable_slug    TEXT NOT NULL,
    question_id    TEXT,
    product_handle TEXT,
    reason         TEXT NOT NULL,
    impact_score   INTEGER NOT NULL DEFAULT 0,
    draft_json     TEXT,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    UNIQUE(tenant_id, stable_slug)
);

-- Published content
CREATE TABLE IF NOT EXISTS assets (
    id             TEXT PRIMARY KEY,
    tenant_id      TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    asset_type     TEXT NOT NULL,
    slug           TEXT NOT NULL,
    title          TEXT NOT NULL,
    status         TEXT NOT NULL,
    latest_version INTEGER NOT NULL DEFAULT 1,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    UNIQUE(tenant_id, asset_type, slug)
);

CREATE TABLE IF NOT EXISTS asset_versions (
    id           TEXT PRIMARY KEY,
    asset_id     TEXT NOT NULL REFERENCES assets(id) ON DELETE CASCADE,
    version      INTEGER NOT NULL,
    title        TEXT NOT NULL,
    body         TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    UNIQUE(asset_id, version)
);

CREATE TABLE IF NOT EXISTS product_patches (
    id             TEXT PRIMARY KEY,
    tenant_id      TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    product_handle TEXT NOT NULL,
    slug           TEXT NOT NULL,
    status         TEXT NOT NULL,
    revision       INTEGER NOT NULL DEFAULT 1,
    patch_json     TEXT NOT NULL,
    published_at   TEXT,
    updated_at     TEXT NOT NULL,
    UNIQUE(tenant_id, product_handle)
);

CREATE TABLE IF NOT EXISTS trust_snapshots (
    id             TEXT PRIMARY KEY,
    tenant_id      TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    total          INTEGER NOT NULL,
    breakdown_json TEXT NOT NULL,
    created_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_trust_snapshots_tenant ON trust_snapshots(tenant_id);

-- Append-only receipt ledger; seq preserves append order
CREATE TABLE IF NOT EXISTS receipts (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    id          TEXT NOT NULL UNIQUE,
    tenant_id   TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    kind        TEXT NOT NULL,
    actor       TEXT NOT NULL,
    summary     TEXT NOT NULL,
    input_json  TEXT NOT NULL,
    output_json TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_receipts_tenant ON receipts(tenant_id, seq);

CREATE TRIGGER IF NOT EXISTS receipts_no_update BEFORE UPDATE ON receipts BEGIN
    SELECT RAISE(ABORT, 'receipts are append-only');
END;

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Growth: audience, campaigns, segment snapshots, send receipts",
            sql: r#"
CREATE TABLE IF NOT EXISTS audience (
    id              TEXT PRIMARY KEY,
    tenant_id       TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    address         TEXT NOT NULL,
    rating          INTEGER,
    sentiment       TEXT,
    referred        INTEGER NOT NULL DEFAULT 0,
    attributes_json TEXT NOT NULL DEFAULT 'null',
    UNIQUE(tenant_id, address)
);

CREATE TABLE IF NOT EXISTS campaigns (
    id          TEXT PRIMARY KEY,
    tenant_id   TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    dry_run     INTEGER NOT NULL,
    status      TEXT NOT NULL,
    rule_json   TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    approved_at TEXT,
    executed_at TEXT
);

CREATE TABLE IF NOT EXISTS segment_snapshots (
    id               TEXT PRIMARY KEY,
    campaign_id      TEXT NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
    eligible_count   INTEGER NOT NULL,
    suppressed_count INTEGER NOT NULL,
    reasons_json     TEXT NOT NULL,
    created_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS send_receipts (
    id          TEXT PRIMARY KEY,
    campaign_id TEXT NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
    address     TEXT NOT NULL,
    status      TEXT NOT NULL,
    reason      TEXT,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_send_receipts_campaign ON send_receipts(campaign_id);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
