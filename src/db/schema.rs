pub const SCHEMA: &str = r#"
-- watches table
CREATE TABLE IF NOT EXISTS watches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    terms TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    strict INTEGER NOT NULL DEFAULT 0,
    enabled_sites TEXT NOT NULL DEFAULT '{}',
    last_run TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- results table
CREATE TABLE IF NOT EXISTS results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    watch_id INTEGER NOT NULL REFERENCES watches(id) ON DELETE CASCADE,
    link TEXT NOT NULL,
    title TEXT NOT NULL,
    source TEXT NOT NULL,
    price TEXT,
    image TEXT,
    first_seen_at TEXT NOT NULL DEFAULT (datetime('now')),
    is_new INTEGER NOT NULL DEFAULT 1,
    UNIQUE(watch_id, link)
);

CREATE INDEX IF NOT EXISTS idx_results_watch_id ON results(watch_id);
CREATE INDEX IF NOT EXISTS idx_results_is_new ON results(watch_id, is_new);

-- results_meta table (derived counts, one row per watch)
CREATE TABLE IF NOT EXISTS results_meta (
    watch_id INTEGER NOT NULL UNIQUE REFERENCES watches(id) ON DELETE CASCADE,
    total_count INTEGER NOT NULL DEFAULT 0,
    new_count INTEGER NOT NULL DEFAULT 0
);
"#;
