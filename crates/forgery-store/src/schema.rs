/// Tables and indexes. `seq` gives a stable insertion order for "newest first".
pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    seq           INTEGER PRIMARY KEY AUTOINCREMENT,
    id            TEXT NOT NULL UNIQUE,
    email         TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    is_admin      INTEGER NOT NULL DEFAULT 0,
    created_at    REAL NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS users_by_email ON users(email);

CREATE TABLE IF NOT EXISTS uploads (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    id         TEXT NOT NULL UNIQUE,
    user_id    TEXT NOT NULL REFERENCES users(id),
    image_path TEXT NOT NULL,
    created_at REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS uploads_by_user ON uploads(user_id);

CREATE TABLE IF NOT EXISTS predictions (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    id              TEXT NOT NULL UNIQUE,
    upload_id       TEXT NOT NULL REFERENCES uploads(id),
    densenet_score  REAL NOT NULL,
    mobilenet_score REAL NOT NULL,
    ensemble_score  REAL NOT NULL,
    severity        TEXT NOT NULL,
    tampered_ratio  REAL NOT NULL,
    heatmap_paths   TEXT NOT NULL,
    created_at      REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS predictions_by_upload ON predictions(upload_id);

CREATE TABLE IF NOT EXISTS models (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    id         TEXT NOT NULL UNIQUE,
    name       TEXT NOT NULL,
    version    TEXT NOT NULL,
    accuracy   REAL NOT NULL,
    f1_score   REAL NOT NULL,
    created_at REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS models_by_name ON models(name);

CREATE TABLE IF NOT EXISTS retrain_triggers (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    id           TEXT NOT NULL UNIQUE,
    admin_id     TEXT NOT NULL REFERENCES users(id),
    triggered_at REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS retrain_triggers_by_admin ON retrain_triggers(admin_id);
";
