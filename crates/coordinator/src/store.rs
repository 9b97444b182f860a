//! Attendance persistence behind a store trait.
//!
//! `MemoryAttendanceStore` backs tests and standalone runs; the Postgres
//! implementation lives in `pg_store`. Both enforce the same invariant: at
//! most one recognized check-in per user per calendar day.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use common::attendance::{AttendanceAction, AttendanceLogEntry, AttendanceStatus, DailySummary};
use common::face::cosine_similarity;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Per-organization settings relevant to attendance.
#[derive(Debug, Clone)]
pub struct OrgSettings {
  pub recognition_threshold: Option<f32>,
  pub check_in_end: String,
  pub late_threshold_minutes: u32,
}

impl Default for OrgSettings {
  fn default() -> Self {
    Self {
      recognition_threshold: None,
      check_in_end: "09:30".to_string(),
      late_threshold_minutes: 15,
    }
  }
}

/// Top-1 gallery match for a probe embedding.
#[derive(Debug, Clone)]
pub struct GalleryMatch {
  pub user_id: Uuid,
  pub user_name: String,
  pub similarity: f32,
}

/// A new attendance row to persist.
#[derive(Debug, Clone)]
pub struct NewAttendance {
  pub org_id: Uuid,
  pub user_id: Option<Uuid>,
  pub device_id: Option<Uuid>,
  pub ts: DateTime<Utc>,
  pub action: AttendanceAction,
  pub status: AttendanceStatus,
  pub confidence_score: Option<f32>,
  pub meta: serde_json::Value,
}

/// Result of an attendance insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
  Inserted(Uuid),
  /// The daily check-in invariant rejected the row; nothing was written.
  AlreadyCheckedIn,
}

/// Filters for listing attendance rows.
#[derive(Debug, Clone, Default)]
pub struct AttendanceQuery {
  pub user_id: Option<Uuid>,
  pub device_id: Option<Uuid>,
  pub status: Option<String>,
  pub action: Option<AttendanceAction>,
  pub from_date: Option<NaiveDate>,
  pub to_date: Option<NaiveDate>,
  pub page: u32,
  pub page_size: u32,
}

#[async_trait]
pub trait AttendanceStore: Send + Sync {
  async fn org_settings(&self, org_id: Uuid) -> Result<Option<OrgSettings>>;

  /// Top-1 cosine match within the org's active users at or above the
  /// threshold.
  async fn find_best_match(
    &self,
    org_id: Uuid,
    embedding: &[f32],
    threshold: f32,
  ) -> Result<Option<GalleryMatch>>;

  /// Insert an attendance row, enforcing the daily check-in invariant for
  /// recognized check-ins.
  async fn insert_attendance(&self, entry: NewAttendance) -> Result<InsertOutcome>;

  async fn list_attendance(
    &self,
    org_id: Uuid,
    query: AttendanceQuery,
  ) -> Result<(Vec<AttendanceLogEntry>, u64)>;

  async fn daily_summary(&self, org_id: Uuid, date: NaiveDate) -> Result<DailySummary>;

  async fn health_check(&self) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct UserRecord {
  org_id: Uuid,
  name: String,
  is_active: bool,
}

#[derive(Debug, Clone)]
struct GalleryRecord {
  user_id: Uuid,
  embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
struct LogRow {
  id: Uuid,
  entry: NewAttendance,
}

#[derive(Default)]
struct MemoryInner {
  orgs: HashMap<Uuid, OrgSettings>,
  users: HashMap<Uuid, UserRecord>,
  gallery: Vec<GalleryRecord>,
  logs: Vec<LogRow>,
}

/// In-memory store. A single lock spans the read-compare-insert window, so
/// concurrent check-ins by the same user serialize.
#[derive(Default)]
pub struct MemoryAttendanceStore {
  inner: RwLock<MemoryInner>,
}

impl MemoryAttendanceStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_org(&self, org_id: Uuid, settings: OrgSettings) {
    if let Ok(mut inner) = self.inner.write() {
      inner.orgs.insert(org_id, settings);
    }
  }

  pub fn add_user(&self, user_id: Uuid, org_id: Uuid, name: impl Into<String>) {
    if let Ok(mut inner) = self.inner.write() {
      inner.users.insert(
        user_id,
        UserRecord {
          org_id,
          name: name.into(),
          is_active: true,
        },
      );
    }
  }

  pub fn deactivate_user(&self, user_id: Uuid) {
    if let Ok(mut inner) = self.inner.write() {
      if let Some(user) = inner.users.get_mut(&user_id) {
        user.is_active = false;
      }
    }
  }

  pub fn enroll_face(&self, user_id: Uuid, embedding: Vec<f32>) {
    if let Ok(mut inner) = self.inner.write() {
      inner.gallery.push(GalleryRecord { user_id, embedding });
    }
  }

  pub fn log_count(&self) -> usize {
    self.inner.read().map(|inner| inner.logs.len()).unwrap_or(0)
  }
}

fn blocks_daily_check_in(row: &NewAttendance, user_id: Uuid, day: NaiveDate) -> bool {
  row.user_id == Some(user_id)
    && row.action == AttendanceAction::CheckIn
    && row.status != AttendanceStatus::UnknownUser
    && row.ts.date_naive() == day
}

#[async_trait]
impl AttendanceStore for MemoryAttendanceStore {
  async fn org_settings(&self, org_id: Uuid) -> Result<Option<OrgSettings>> {
    let inner = self
      .inner
      .read()
      .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
    Ok(inner.orgs.get(&org_id).cloned())
  }

  async fn find_best_match(
    &self,
    org_id: Uuid,
    embedding: &[f32],
    threshold: f32,
  ) -> Result<Option<GalleryMatch>> {
    let inner = self
      .inner
      .read()
      .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;

    let mut best: Option<GalleryMatch> = None;
    for record in &inner.gallery {
      let Some(user) = inner.users.get(&record.user_id) else {
        continue;
      };
      if user.org_id != org_id || !user.is_active {
        continue;
      }
      let similarity = cosine_similarity(embedding, &record.embedding);
      if similarity < threshold {
        continue;
      }
      if best.as_ref().map(|b| similarity > b.similarity).unwrap_or(true) {
        best = Some(GalleryMatch {
          user_id: record.user_id,
          user_name: user.name.clone(),
          similarity,
        });
      }
    }
    Ok(best)
  }

  async fn insert_attendance(&self, entry: NewAttendance) -> Result<InsertOutcome> {
    let mut inner = self
      .inner
      .write()
      .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;

    if entry.action == AttendanceAction::CheckIn
      && entry.status != AttendanceStatus::UnknownUser
    {
      if let Some(user_id) = entry.user_id {
        let day = entry.ts.date_naive();
        if inner
          .logs
          .iter()
          .any(|row| blocks_daily_check_in(&row.entry, user_id, day))
        {
          return Ok(InsertOutcome::AlreadyCheckedIn);
        }
      }
    }

    let id = Uuid::new_v4();
    inner.logs.push(LogRow { id, entry });
    Ok(InsertOutcome::Inserted(id))
  }

  async fn list_attendance(
    &self,
    org_id: Uuid,
    query: AttendanceQuery,
  ) -> Result<(Vec<AttendanceLogEntry>, u64)> {
    let inner = self
      .inner
      .read()
      .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;

    let mut rows: Vec<&LogRow> = inner
      .logs
      .iter()
      .filter(|row| {
        let e = &row.entry;
        e.org_id == org_id
          && query.user_id.map(|u| e.user_id == Some(u)).unwrap_or(true)
          && query
            .device_id
            .map(|d| e.device_id == Some(d))
            .unwrap_or(true)
          && query
            .status
            .as_deref()
            .map(|s| e.status.as_str() == s)
            .unwrap_or(true)
          && query.action.map(|a| e.action == a).unwrap_or(true)
          && query
            .from_date
            .map(|d| e.ts.date_naive() >= d)
            .unwrap_or(true)
          && query
            .to_date
            .map(|d| e.ts.date_naive() <= d)
            .unwrap_or(true)
      })
      .collect();

    rows.sort_by(|a, b| b.entry.ts.cmp(&a.entry.ts));
    let total = rows.len() as u64;

    let page = query.page.max(1);
    let page_size = query.page_size.max(1);
    let offset = ((page - 1) * page_size) as usize;

    let items = rows
      .into_iter()
      .skip(offset)
      .take(page_size as usize)
      .map(|row| AttendanceLogEntry {
        id: row.id,
        org_id: row.entry.org_id,
        user_id: row.entry.user_id,
        user_name: row
          .entry
          .user_id
          .and_then(|u| inner.users.get(&u))
          .map(|u| u.name.clone()),
        device_id: row.entry.device_id,
        ts: row.entry.ts,
        action: row.entry.action,
        status: row.entry.status.as_str().to_string(),
        confidence_score: row.entry.confidence_score,
      })
      .collect();

    Ok((items, total))
  }

  async fn daily_summary(&self, org_id: Uuid, date: NaiveDate) -> Result<DailySummary> {
    let inner = self
      .inner
      .read()
      .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;

    let total_users = inner
      .users
      .values()
      .filter(|u| u.org_id == org_id && u.is_active)
      .count() as u64;

    let day_check_ins = inner.logs.iter().filter(|row| {
      let e = &row.entry;
      e.org_id == org_id && e.action == AttendanceAction::CheckIn && e.ts.date_naive() == date
    });

    let mut on_time_users = std::collections::HashSet::new();
    let mut late_users = std::collections::HashSet::new();
    let mut unknown_attempts = 0u64;
    for row in day_check_ins {
      match row.entry.status {
        AttendanceStatus::OnTime => {
          on_time_users.insert(row.entry.user_id);
        }
        AttendanceStatus::Late => {
          late_users.insert(row.entry.user_id);
        }
        AttendanceStatus::UnknownUser => unknown_attempts += 1,
        _ => {}
      }
    }

    let on_time = on_time_users.len() as u64;
    let late = late_users.len() as u64;
    let checked_in = on_time + late;

    Ok(DailySummary {
      date,
      total_users,
      checked_in,
      on_time,
      late,
      absent: total_users.saturating_sub(checked_in),
      unknown_attempts,
    })
  }

  async fn health_check(&self) -> Result<bool> {
    Ok(true)
  }
}
