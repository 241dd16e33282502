use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::models::job::TaskStatus;
use crate::models::status::{StatusField, StatusRecord, StatusUpdate};

/// Apply a partial status update as a single upsert.
///
/// Only the update's columns are written; columns it does not name keep
/// their stored values.
pub async fn apply_status_update(
    pool: &PgPool,
    task_id: &str,
    update: &StatusUpdate,
) -> Result<(), sqlx::Error> {
    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("INSERT INTO analysis_tasks (task_id");
    for field in update.fields() {
        builder.push(", ").push(field.column());
    }

    builder.push(") VALUES (").push_bind(task_id.to_string());
    for field in update.fields() {
        builder.push(", ");
        match field {
            StatusField::Status(status) => builder.push_bind(status.to_string()),
            StatusField::ErrorMessage(message) => builder.push_bind(message.clone()),
            StatusField::StartTime(time) | StatusField::EndTime(time) => builder.push_bind(*time),
            StatusField::OutputArtifactKeys(keys) => builder.push_bind(keys.clone().map(Json)),
        };
    }

    builder.push(") ON CONFLICT (task_id) DO UPDATE SET updated_at = NOW()");
    for field in update.fields() {
        let column = field.column();
        builder.push(format!(", {column} = EXCLUDED.{column}"));
    }

    builder.build().execute(pool).await?;
    Ok(())
}

/// Get a task's status record
pub async fn get_status(pool: &PgPool, task_id: &str) -> Result<Option<StatusRecord>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT task_id, status, error_message, start_time, end_time, output_artifact_keys
        FROM analysis_tasks
        WHERE task_id = $1
        "#,
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await?;

    let Some(r) = row else {
        return Ok(None);
    };

    let status_str: String = r.try_get("status")?;
    let status = TaskStatus::from_str(&status_str).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    let keys: Option<Json<BTreeMap<String, String>>> = r.try_get("output_artifact_keys")?;

    Ok(Some(StatusRecord {
        task_id: r.try_get("task_id")?,
        status,
        error_message: r.try_get("error_message")?,
        start_time: r.try_get("start_time")?,
        end_time: r.try_get("end_time")?,
        output_artifact_keys: keys.map(|Json(k)| k),
    }))
}

/// Delete a task's status record
pub async fn delete_status(pool: &PgPool, task_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM analysis_tasks WHERE task_id = $1")
        .bind(task_id)
        .execute(pool)
        .await?;
    Ok(())
}
