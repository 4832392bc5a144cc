use crate::records::{HistoryEntry, ModelMetric, NewPrediction, Prediction, RetrainTrigger, Upload, User};
use crate::schema::SCHEMA;
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("user already exists: {0}")]
    UserExists(String),
    #[error("no {kind} with id {id}")]
    UnknownReference { kind: &'static str, id: String },
    #[error("database: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

type Outcome<T> = Result<T, StoreError>;

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn exists(conn: &Connection, table: &str, id: &str) -> rusqlite::Result<bool> {
    conn.query_row(&format!("SELECT 1 FROM {table} WHERE id = ?1"), [id], |_| Ok(()))
        .optional()
        .map(|found| found.is_some())
}

const USER_COLUMNS: &str = "id, email, password_hash, is_admin, created_at";
const UPLOAD_COLUMNS: &str = "id, user_id, image_path, created_at";
const PREDICTION_COLUMNS: &str = "id, upload_id, densenet_score, mobilenet_score, ensemble_score, \
     severity, tampered_ratio, heatmap_paths, created_at";
const METRIC_COLUMNS: &str = "id, name, version, accuracy, f1_score, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        is_admin: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn upload_from_row(row: &Row<'_>) -> rusqlite::Result<Upload> {
    Ok(Upload {
        id: row.get(0)?,
        user_id: row.get(1)?,
        image_path: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn prediction_from_row(row: &Row<'_>) -> rusqlite::Result<Prediction> {
    let paths: String = row.get(7)?;
    let heatmap_paths = serde_json::from_str(&paths)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;
    Ok(Prediction {
        id: row.get(0)?,
        upload_id: row.get(1)?,
        densenet_score: row.get(2)?,
        mobilenet_score: row.get(3)?,
        ensemble_score: row.get(4)?,
        severity: row.get(5)?,
        tampered_ratio: row.get(6)?,
        heatmap_paths,
        created_at: row.get(8)?,
    })
}

fn metric_from_row(row: &Row<'_>) -> rusqlite::Result<ModelMetric> {
    Ok(ModelMetric {
        id: row.get(0)?,
        name: row.get(1)?,
        version: row.get(2)?,
        accuracy: row.get(3)?,
        f1_score: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn trigger_from_row(row: &Row<'_>) -> rusqlite::Result<RetrainTrigger> {
    Ok(RetrainTrigger {
        id: row.get(0)?,
        admin_id: row.get(1)?,
        triggered_at: row.get(2)?,
    })
}

fn predictions_for(conn: &Connection, upload_id: &str, limit: Option<u32>) -> rusqlite::Result<Vec<Prediction>> {
    let limit = limit.map(i64::from).unwrap_or(-1);
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {PREDICTION_COLUMNS} FROM predictions WHERE upload_id = ?1 ORDER BY seq DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![upload_id, limit], prediction_from_row)?;
    rows.collect()
}

fn uploads_for(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<Upload>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {UPLOAD_COLUMNS} FROM uploads WHERE user_id = ?1 ORDER BY seq DESC"
    ))?;
    let rows = stmt.query_map([user_id], upload_from_row)?;
    rows.collect()
}

/// Handle to the database. Cloning shares the same background connection.
#[derive(Clone)]
pub struct Store {
    conn: tokio_rusqlite::Connection,
}

impl Store {
    /// Open (or create) the database file and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> Outcome<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = tokio_rusqlite::Connection::open(&path).await?;
        conn.call(|c| {
            c.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
            Ok(())
        })
        .await?;
        let store = Self { conn };
        store.migrate().await?;
        tracing::info!(path = %path.display(), "store opened");
        Ok(store)
    }

    /// A throwaway database, used by tests and `forgery analyze`.
    pub async fn open_in_memory() -> Outcome<Self> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        let store = Self { conn };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Outcome<()> {
        self.conn
            .call(|c| {
                c.pragma_update(None, "foreign_keys", "ON")?;
                c.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // --- users ---

    /// Register a user. Emails are unique; a duplicate yields [`StoreError::UserExists`].
    pub async fn create_user(&self, email: &str, password_hash: &str, is_admin: bool) -> Outcome<User> {
        let user = User {
            id: new_id(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            is_admin,
            created_at: crate::now_secs(),
        };
        let row = user.clone();
        let inserted = self
            .conn
            .call(move |c| {
                let result = c.execute(
                    &format!("INSERT INTO users ({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
                    params![row.id, row.email, row.password_hash, row.is_admin, row.created_at],
                );
                match result {
                    Ok(_) => Ok(true),
                    Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                        Ok(false)
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await?;

        if !inserted {
            return Err(StoreError::UserExists(user.email));
        }
        tracing::info!(user_id = %user.id, email = %user.email, is_admin, "user created");
        Ok(user)
    }

    pub async fn get_user_by_email(&self, email: &str) -> Outcome<Option<User>> {
        let email = email.to_string();
        let user = self
            .conn
            .call(move |c| {
                Ok(c.query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                    [email],
                    user_from_row,
                )
                .optional()?)
            })
            .await?;
        Ok(user)
    }

    pub async fn get_user_by_id(&self, id: &str) -> Outcome<Option<User>> {
        let id = id.to_string();
        let user = self
            .conn
            .call(move |c| {
                Ok(c.query_row(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"), [id], user_from_row)
                    .optional()?)
            })
            .await?;
        Ok(user)
    }

    // --- uploads ---

    pub async fn create_upload(&self, user_id: &str, image_path: &str, created_at: f64) -> Outcome<Upload> {
        let upload = Upload {
            id: new_id(),
            user_id: user_id.to_string(),
            image_path: image_path.to_string(),
            created_at,
        };
        let row = upload.clone();
        let inserted = self
            .conn
            .call(move |c| {
                if !exists(c, "users", &row.user_id)? {
                    return Ok(false);
                }
                c.execute(
                    &format!("INSERT INTO uploads ({UPLOAD_COLUMNS}) VALUES (?1, ?2, ?3, ?4)"),
                    params![row.id, row.user_id, row.image_path, row.created_at],
                )?;
                Ok(true)
            })
            .await?;

        if !inserted {
            return Err(StoreError::UnknownReference { kind: "user", id: upload.user_id });
        }
        tracing::debug!(upload_id = %upload.id, user_id = %upload.user_id, "upload recorded");
        Ok(upload)
    }

    pub async fn get_upload_by_id(&self, id: &str) -> Outcome<Option<Upload>> {
        let id = id.to_string();
        let upload = self
            .conn
            .call(move |c| {
                Ok(c.query_row(
                    &format!("SELECT {UPLOAD_COLUMNS} FROM uploads WHERE id = ?1"),
                    [id],
                    upload_from_row,
                )
                .optional()?)
            })
            .await?;
        Ok(upload)
    }

    /// A user's uploads, newest first.
    pub async fn get_uploads_by_user(&self, user_id: &str) -> Outcome<Vec<Upload>> {
        let user_id = user_id.to_string();
        Ok(self.conn.call(move |c| Ok(uploads_for(c, &user_id)?)).await?)
    }

    // --- predictions ---

    pub async fn create_prediction(&self, new: NewPrediction) -> Outcome<Prediction> {
        let paths = serde_json::to_string(&new.heatmap_paths)?;
        let prediction = Prediction {
            id: new_id(),
            upload_id: new.upload_id,
            densenet_score: new.densenet_score,
            mobilenet_score: new.mobilenet_score,
            ensemble_score: new.ensemble_score,
            severity: new.severity,
            tampered_ratio: new.tampered_ratio,
            heatmap_paths: new.heatmap_paths,
            created_at: new.created_at,
        };
        let row = prediction.clone();
        let inserted = self
            .conn
            .call(move |c| {
                if !exists(c, "uploads", &row.upload_id)? {
                    return Ok(false);
                }
                c.execute(
                    &format!(
                        "INSERT INTO predictions ({PREDICTION_COLUMNS}) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                    ),
                    params![
                        row.id,
                        row.upload_id,
                        row.densenet_score,
                        row.mobilenet_score,
                        row.ensemble_score,
                        row.severity,
                        row.tampered_ratio,
                        paths,
                        row.created_at
                    ],
                )?;
                Ok(true)
            })
            .await?;

        if !inserted {
            return Err(StoreError::UnknownReference { kind: "upload", id: prediction.upload_id });
        }
        tracing::debug!(
            prediction_id = %prediction.id,
            upload_id = %prediction.upload_id,
            severity = %prediction.severity,
            "prediction recorded"
        );
        Ok(prediction)
    }

    /// Predictions for one upload, newest first.
    pub async fn get_predictions_by_upload(&self, upload_id: &str) -> Outcome<Vec<Prediction>> {
        let upload_id = upload_id.to_string();
        Ok(self.conn.call(move |c| Ok(predictions_for(c, &upload_id, None)?)).await?)
    }

    /// The user's uploads newest first, each with its latest prediction.
    /// Uploads never analysed are left out.
    pub async fn get_history_by_user(&self, user_id: &str) -> Outcome<Vec<HistoryEntry>> {
        let user_id = user_id.to_string();
        let history = self
            .conn
            .call(move |c| {
                let mut entries = Vec::new();
                for upload in uploads_for(c, &user_id)? {
                    if let Some(prediction) = predictions_for(c, &upload.id, Some(1))?.into_iter().next() {
                        entries.push(HistoryEntry { upload, prediction });
                    }
                }
                Ok(entries)
            })
            .await?;
        Ok(history)
    }

    // --- models ---

    pub async fn create_model_metric(
        &self,
        name: &str,
        version: &str,
        accuracy: f64,
        f1_score: f64,
        created_at: f64,
    ) -> Outcome<ModelMetric> {
        let metric = ModelMetric {
            id: new_id(),
            name: name.to_string(),
            version: version.to_string(),
            accuracy,
            f1_score,
            created_at,
        };
        let row = metric.clone();
        self.conn
            .call(move |c| {
                c.execute(
                    &format!("INSERT INTO models ({METRIC_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
                    params![row.id, row.name, row.version, row.accuracy, row.f1_score, row.created_at],
                )?;
                Ok(())
            })
            .await?;
        tracing::info!(name = %metric.name, version = %metric.version, accuracy, f1_score, "model metric recorded");
        Ok(metric)
    }

    /// Every recorded model run, newest first.
    pub async fn get_model_metrics(&self) -> Outcome<Vec<ModelMetric>> {
        let metrics = self
            .conn
            .call(|c| {
                let mut stmt = c.prepare_cached(&format!("SELECT {METRIC_COLUMNS} FROM models ORDER BY seq DESC"))?;
                let rows = stmt.query_map([], metric_from_row)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await?;
        Ok(metrics)
    }

    pub async fn get_model_metrics_by_name(&self, name: &str) -> Outcome<Vec<ModelMetric>> {
        let name = name.to_string();
        let metrics = self
            .conn
            .call(move |c| {
                let mut stmt = c.prepare_cached(&format!(
                    "SELECT {METRIC_COLUMNS} FROM models WHERE name = ?1 ORDER BY seq DESC"
                ))?;
                let rows = stmt.query_map([name], metric_from_row)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await?;
        Ok(metrics)
    }

    // --- retrain triggers ---

    pub async fn trigger_retrain(&self, admin_id: &str, triggered_at: f64) -> Outcome<RetrainTrigger> {
        let trigger = RetrainTrigger { id: new_id(), admin_id: admin_id.to_string(), triggered_at };
        let row = trigger.clone();
        let inserted = self
            .conn
            .call(move |c| {
                if !exists(c, "users", &row.admin_id)? {
                    return Ok(false);
                }
                c.execute(
                    "INSERT INTO retrain_triggers (id, admin_id, triggered_at) VALUES (?1, ?2, ?3)",
                    params![row.id, row.admin_id, row.triggered_at],
                )?;
                Ok(true)
            })
            .await?;

        if !inserted {
            return Err(StoreError::UnknownReference { kind: "user", id: trigger.admin_id });
        }
        tracing::info!(admin_id = %trigger.admin_id, "retrain triggered");
        Ok(trigger)
    }

    pub async fn get_retrain_triggers_by_admin(&self, admin_id: &str) -> Outcome<Vec<RetrainTrigger>> {
        let admin_id = admin_id.to_string();
        let triggers = self
            .conn
            .call(move |c| {
                let mut stmt = c.prepare_cached(
                    "SELECT id, admin_id, triggered_at FROM retrain_triggers WHERE admin_id = ?1 ORDER BY seq DESC",
                )?;
                let rows = stmt.query_map([admin_id], trigger_from_row)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await?;
        Ok(triggers)
    }
}
