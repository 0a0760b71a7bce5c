// src/audit.rs - Audit trail for mutating pharmacy operations

use sqlx::SqlitePool;
use uuid::Uuid;
use chrono::{Duration, Utc};
use actix_web::HttpRequest;
use serde::Serialize;
use serde_json::{Map, Value};

/// Field-level before/after values, stored as JSON in `audit_logs.changes`.
#[derive(Debug, Default)]
pub struct ChangeSet {
    changes: Map<String, Value>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `field` only when the value actually changes.
    pub fn add<T: Serialize + PartialEq>(&mut self, field: &str, old: &T, new: &T) -> &mut Self {
        if old != new {
            self.changes.insert(
                field.to_string(),
                serde_json::json!({ "old": old, "new": new }),
            );
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn to_json(&self) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(Value::Object(self.changes.clone()).to_string())
        }
    }
}

pub async fn log_activity(
    pool: &SqlitePool,
    user_id: Option<i64>,
    action: &str,
    entity_type: &str,
    entity_id: Option<i64>,
    description: Option<&str>,
    changes: Option<&str>,
    request: Option<&HttpRequest>,
) -> Result<(), sqlx::Error> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    let ip_address = request.and_then(|req| {
        req.connection_info()
            .realip_remote_addr()
            .map(|s| s.to_string())
    });

    let user_agent = request.and_then(|req| {
        req.headers()
            .get("User-Agent")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    });

    sqlx::query(
        r#"INSERT INTO audit_logs
           (id, user_id, action, entity_type, entity_id, description, changes, ip_address, user_agent, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
    )
        .bind(&id)
        .bind(user_id)
        .bind(action)
        .bind(entity_type)
        .bind(entity_id.map(|id| id.to_string()))
        .bind(description)
        .bind(changes)
        .bind(&ip_address)
        .bind(&user_agent)
        .bind(now)
        .execute(pool)
        .await?;

    Ok(())
}

/// Writes an audit entry after a committed change. Failures are logged only.
pub async fn audit(
    pool: &SqlitePool,
    user_id: i64,
    action: &str,
    entity_type: &str,
    entity_id: i64,
    description: &str,
    request: &HttpRequest,
) {
    audit_with_changes(pool, user_id, action, entity_type, entity_id, description, None, request).await
}

pub async fn audit_with_changes(
    pool: &SqlitePool,
    user_id: i64,
    action: &str,
    entity_type: &str,
    entity_id: i64,
    description: &str,
    changes: Option<&ChangeSet>,
    request: &HttpRequest,
) {
    let changes = changes.and_then(ChangeSet::to_json);
    if let Err(e) = log_activity(
        pool,
        Some(user_id),
        action,
        entity_type,
        Some(entity_id),
        Some(description),
        changes.as_deref(),
        Some(request),
    ).await {
        log::error!("Failed to write audit log: {}", e);
    }
}

/// Deletes audit entries older than `retention_days`. Returns the number removed.
pub async fn purge_older_than(pool: &SqlitePool, retention_days: i64) -> Result<u64, sqlx::Error> {
    let cutoff = Utc::now() - Duration::days(retention_days);
    let result = sqlx::query("DELETE FROM audit_logs WHERE created_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
