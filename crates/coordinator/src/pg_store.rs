//! Postgres-backed attendance store.
//!
//! The gallery search uses pgvector's cosine distance operator; the daily
//! check-in invariant is enforced by a partial unique index on
//! `(user_id, ts::date) WHERE type = 'check_in' AND status <> 'unknown_user'`,
//! so concurrent read-compare-insert sequences cannot double-write.

use crate::store::{
  AttendanceQuery, AttendanceStore, GalleryMatch, InsertOutcome, NewAttendance, OrgSettings,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use common::attendance::{AttendanceAction, AttendanceLogEntry, DailySummary};
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub struct PgAttendanceStore {
  pool: PgPool,
}

impl PgAttendanceStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  fn parse_action(value: &str) -> AttendanceAction {
    match value {
      "check_out" => AttendanceAction::CheckOut,
      _ => AttendanceAction::CheckIn,
    }
  }
}

/// pgvector literal form of an embedding: `[v0,v1,...]`.
fn vector_literal(embedding: &[f32]) -> String {
  let mut out = String::with_capacity(embedding.len() * 10 + 2);
  out.push('[');
  for (i, v) in embedding.iter().enumerate() {
    if i > 0 {
      out.push(',');
    }
    out.push_str(&v.to_string());
  }
  out.push(']');
  out
}

#[async_trait]
impl AttendanceStore for PgAttendanceStore {
  async fn org_settings(&self, org_id: Uuid) -> Result<Option<OrgSettings>> {
    let row = sqlx::query("SELECT settings FROM orgs WHERE id = $1 AND is_active = TRUE")
      .bind(org_id)
      .fetch_optional(&self.pool)
      .await
      .context("failed to fetch org settings")?;

    Ok(row.map(|r| {
      let settings: serde_json::Value = r.try_get("settings").unwrap_or_default();
      OrgSettings {
        recognition_threshold: settings
          .get("recognition_threshold")
          .and_then(|v| v.as_f64())
          .map(|v| v as f32),
        check_in_end: settings
          .get("check_in_end")
          .and_then(|v| v.as_str())
          .unwrap_or("09:30")
          .to_string(),
        late_threshold_minutes: settings
          .get("late_threshold_minutes")
          .and_then(|v| v.as_u64())
          .unwrap_or(15) as u32,
      }
    }))
  }

  async fn find_best_match(
    &self,
    org_id: Uuid,
    embedding: &[f32],
    threshold: f32,
  ) -> Result<Option<GalleryMatch>> {
    let row = sqlx::query(
      r#"
      SELECT fe.user_id, u.name, 1 - (fe.embedding <=> $1::vector) AS score
      FROM face_embeddings fe
      JOIN users u ON fe.user_id = u.id
      WHERE u.org_id = $2
        AND u.is_active = TRUE
        AND 1 - (fe.embedding <=> $1::vector) >= $3
      ORDER BY fe.embedding <=> $1::vector
      LIMIT 1
      "#,
    )
    .bind(vector_literal(embedding))
    .bind(org_id)
    .bind(threshold as f64)
    .fetch_optional(&self.pool)
    .await
    .context("gallery similarity search failed")?;

    Ok(match row {
      Some(r) => Some(GalleryMatch {
        user_id: r.try_get("user_id")?,
        user_name: r.try_get("name")?,
        similarity: r.try_get::<f64, _>("score")? as f32,
      }),
      None => None,
    })
  }

  async fn insert_attendance(&self, entry: NewAttendance) -> Result<InsertOutcome> {
    let id = Uuid::new_v4();
    let result = sqlx::query(
      r#"
      INSERT INTO attendance_logs
        (id, org_id, user_id, device_id, ts, type, status, confidence_score, meta)
      VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
      "#,
    )
    .bind(id)
    .bind(entry.org_id)
    .bind(entry.user_id)
    .bind(entry.device_id)
    .bind(entry.ts)
    .bind(entry.action.as_str())
    .bind(entry.status.as_str())
    .bind(entry.confidence_score.map(|v| v as f64))
    .bind(&entry.meta)
    .execute(&self.pool)
    .await;

    match result {
      Ok(_) => Ok(InsertOutcome::Inserted(id)),
      Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some("23505") => {
        Ok(InsertOutcome::AlreadyCheckedIn)
      }
      Err(e) => Err(e).context("failed to insert attendance row"),
    }
  }

  async fn list_attendance(
    &self,
    org_id: Uuid,
    query: AttendanceQuery,
  ) -> Result<(Vec<AttendanceLogEntry>, u64)> {
    let page = query.page.max(1);
    let page_size = query.page_size.clamp(1, 100);
    let offset = ((page - 1) * page_size) as i64;
    let action = query.action.map(|a| a.as_str().to_string());

    let total: i64 = sqlx::query_scalar(
      r#"
      SELECT COUNT(*) FROM attendance_logs
      WHERE org_id = $1
        AND ($2::uuid IS NULL OR user_id = $2)
        AND ($3::uuid IS NULL OR device_id = $3)
        AND ($4::text IS NULL OR status = $4)
        AND ($5::text IS NULL OR type = $5)
        AND ($6::date IS NULL OR (ts AT TIME ZONE 'UTC')::date >= $6)
        AND ($7::date IS NULL OR (ts AT TIME ZONE 'UTC')::date <= $7)
      "#,
    )
    .bind(org_id)
    .bind(query.user_id)
    .bind(query.device_id)
    .bind(query.status.as_deref())
    .bind(action.as_deref())
    .bind(query.from_date)
    .bind(query.to_date)
    .fetch_one(&self.pool)
    .await
    .context("failed to count attendance rows")?;

    let rows = sqlx::query(
      r#"
      SELECT al.id, al.org_id, al.user_id, u.name AS user_name, al.device_id,
             al.ts, al.type, al.status, al.confidence_score
      FROM attendance_logs al
      LEFT JOIN users u ON al.user_id = u.id
      WHERE al.org_id = $1
        AND ($2::uuid IS NULL OR al.user_id = $2)
        AND ($3::uuid IS NULL OR al.device_id = $3)
        AND ($4::text IS NULL OR al.status = $4)
        AND ($5::text IS NULL OR al.type = $5)
        AND ($6::date IS NULL OR (al.ts AT TIME ZONE 'UTC')::date >= $6)
        AND ($7::date IS NULL OR (al.ts AT TIME ZONE 'UTC')::date <= $7)
      ORDER BY al.ts DESC
      OFFSET $8 LIMIT $9
      "#,
    )
    .bind(org_id)
    .bind(query.user_id)
    .bind(query.device_id)
    .bind(query.status.as_deref())
    .bind(action.as_deref())
    .bind(query.from_date)
    .bind(query.to_date)
    .bind(offset)
    .bind(page_size as i64)
    .fetch_all(&self.pool)
    .await
    .context("failed to list attendance rows")?;

    let items = rows
      .into_iter()
      .map(|r| {
        Ok(AttendanceLogEntry {
          id: r.try_get("id")?,
          org_id: r.try_get("org_id")?,
          user_id: r.try_get("user_id")?,
          user_name: r.try_get("user_name")?,
          device_id: r.try_get("device_id")?,
          ts: r.try_get("ts")?,
          action: Self::parse_action(r.try_get::<String, _>("type")?.as_str()),
          status: r.try_get("status")?,
          confidence_score: r
            .try_get::<Option<f64>, _>("confidence_score")?
            .map(|v| v as f32),
        })
      })
      .collect::<Result<Vec<_>>>()?;

    Ok((items, total as u64))
  }

  async fn daily_summary(&self, org_id: Uuid, date: NaiveDate) -> Result<DailySummary> {
    let total_users: i64 = sqlx::query_scalar(
      "SELECT COUNT(*) FROM users WHERE org_id = $1 AND is_active = TRUE",
    )
    .bind(org_id)
    .fetch_one(&self.pool)
    .await
    .context("failed to count users")?;

    let rows = sqlx::query(
      r#"
      SELECT status, COUNT(DISTINCT user_id) AS users, COUNT(*) AS attempts
      FROM attendance_logs
      WHERE org_id = $1 AND type = 'check_in' AND (ts AT TIME ZONE 'UTC')::date = $2
      GROUP BY status
      "#,
    )
    .bind(org_id)
    .bind(date)
    .fetch_all(&self.pool)
    .await
    .context("failed to summarize attendance")?;

    let mut on_time = 0u64;
    let mut late = 0u64;
    let mut unknown_attempts = 0u64;
    for r in rows {
      let status: String = r.try_get("status")?;
      let users: i64 = r.try_get("users")?;
      let attempts: i64 = r.try_get("attempts")?;
      match status.as_str() {
        "on_time" => on_time = users as u64,
        "late" => late = users as u64,
        "unknown_user" => unknown_attempts = attempts as u64,
        _ => {}
      }
    }

    let checked_in = on_time + late;
    Ok(DailySummary {
      date,
      total_users: total_users as u64,
      checked_in,
      on_time,
      late,
      absent: (total_users as u64).saturating_sub(checked_in),
      unknown_attempts,
    })
  }

  async fn health_check(&self) -> Result<bool> {
    Ok(
      sqlx::query("SELECT 1")
        .fetch_one(&self.pool)
        .await
        .is_ok(),
    )
  }
}
