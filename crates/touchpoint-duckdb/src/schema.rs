/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// startup.
///
/// `memory_limit` comes from `Config.duckdb_memory_limit`
/// (env `TOUCHPOINT_DUCKDB_MEMORY`, default `"1GB"`).
///
/// Timestamps are unix seconds (`BIGINT`). Property bags are JSON text and
/// are read back with `json_extract_string`.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- USERS
-- ===========================================
-- Several raw users may share one customer_user_id; attribution counts
-- COALESCE(customer_user_id, id) as the identity.
CREATE TABLE IF NOT EXISTS users (
    id                  VARCHAR NOT NULL,
    project_id          VARCHAR NOT NULL,
    customer_user_id    VARCHAR,
    created_at          TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (project_id, id)
);

-- ===========================================
-- EVENT NAMES
-- ===========================================
-- A name can be registered more than once (e.g. per source); every id
-- under a name is matched.
CREATE TABLE IF NOT EXISTS event_names (
    id              VARCHAR PRIMARY KEY,
    project_id      VARCHAR NOT NULL,
    name            VARCHAR NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_event_names_project_name ON event_names(project_id, name);

-- ===========================================
-- EVENTS
-- ===========================================
CREATE TABLE IF NOT EXISTS events (
    id                  VARCHAR PRIMARY KEY,
    project_id          VARCHAR NOT NULL,
    user_id             VARCHAR NOT NULL,
    event_name_id       VARCHAR NOT NULL,
    properties          VARCHAR,                -- JSON object
    user_properties     VARCHAR,                -- JSON object
    occurred_at         BIGINT NOT NULL         -- unix seconds
);
CREATE INDEX IF NOT EXISTS idx_events_project_name_ts ON events(project_id, event_name_id, occurred_at);
CREATE INDEX IF NOT EXISTS idx_events_project_user ON events(project_id, user_id);

-- ===========================================
-- MARKETING PERFORMANCE
-- ===========================================
-- Daily ad platform metrics per dimension value.
CREATE TABLE IF NOT EXISTS marketing_performance (
    project_id      VARCHAR NOT NULL,
    date            DATE NOT NULL,
    dimension       VARCHAR NOT NULL,           -- campaign | ad_group | keyword | source | channel_group
    key_value       VARCHAR NOT NULL,
    channel         VARCHAR,
    impressions     BIGINT NOT NULL DEFAULT 0,
    clicks          BIGINT NOT NULL DEFAULT 0,
    spend           DOUBLE NOT NULL DEFAULT 0,
    dimensions      VARCHAR                     -- JSON object of custom dimensions
);
CREATE INDEX IF NOT EXISTS idx_performance_project_dim_date ON marketing_performance(project_id, dimension, date);

-- ===========================================
-- PROJECT SETTINGS
-- ===========================================
-- account_ids is a comma-separated list; the first entry decides currency.
CREATE TABLE IF NOT EXISTS project_settings (
    project_id      VARCHAR PRIMARY KEY,
    channel         VARCHAR NOT NULL,
    account_ids     VARCHAR NOT NULL
);

CREATE TABLE IF NOT EXISTS channel_currency (
    project_id      VARCHAR NOT NULL,
    account_id      VARCHAR NOT NULL,
    date            DATE NOT NULL,
    currency        VARCHAR NOT NULL,
    PRIMARY KEY (project_id, account_id, date)
);
"#
    )
}
