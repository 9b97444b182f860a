//! Wire types for the attendance coordinator.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of attendance event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceAction {
    CheckIn,
    CheckOut,
}

impl AttendanceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckIn => "check_in",
            Self::CheckOut => "check_out",
        }
    }
}

/// Outcome recorded for an attendance attempt.
///
/// `unknown_user` means the face was not found in the gallery; `failed` is
/// reserved for pipeline or transport errors kept for the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    OnTime,
    Late,
    UnknownUser,
    AlreadyCheckedIn,
    NoFaceDetected,
    Failed,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnTime => "on_time",
            Self::Late => "late",
            Self::UnknownUser => "unknown_user",
            Self::AlreadyCheckedIn => "already_checked_in",
            Self::NoFaceDetected => "no_face_detected",
            Self::Failed => "failed",
        }
    }
}

/// Response body for `POST /attendance/check-in` and `/check-out`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInResponse {
    pub success: bool,
    pub status: AttendanceStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_in_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f32>,
}

impl CheckInResponse {
    /// A failure response carrying only a status and a message.
    pub fn rejection(status: AttendanceStatus, message: impl Into<String>) -> Self {
        Self {
            success: false,
            status,
            message: message.into(),
            user_id: None,
            user_name: None,
            check_in_time: None,
            confidence_score: None,
        }
    }
}

/// One row of the attendance log as returned by `GET /attendance`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceLogEntry {
    pub id: Uuid,
    pub org_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<Uuid>,
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub action: AttendanceAction,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f32>,
}

/// Daily attendance roll-up for `GET /attendance/summary/daily`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub total_users: u64,
    pub checked_in: u64,
    pub on_time: u64,
    pub late: u64,
    pub absent: u64,
    pub unknown_attempts: u64,
}

/// Generic page of results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub pages: u32,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, page: u32, page_size: u32) -> Self {
        let pages = if total == 0 {
            1
        } else {
            ((total + page_size as u64 - 1) / page_size as u64) as u32
        };
        Self {
            items,
            total,
            page,
            page_size,
            pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_serde() {
        let json = serde_json::to_string(&AttendanceStatus::AlreadyCheckedIn).unwrap();
        assert_eq!(json, "\"already_checked_in\"");
        let back: AttendanceStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AttendanceStatus::AlreadyCheckedIn);
    }

    #[test]
    fn rejection_has_no_user_fields() {
        let resp = CheckInResponse::rejection(AttendanceStatus::UnknownUser, "not recognized");
        assert!(!resp.success);
        assert!(resp.user_id.is_none());
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("user_id").is_none());
        assert_eq!(json["status"], "unknown_user");
    }

    #[test]
    fn pagination_rounds_up() {
        let page: PaginatedResponse<u32> = PaginatedResponse::new(vec![], 101, 1, 50);
        assert_eq!(page.pages, 3);
        let empty: PaginatedResponse<u32> = PaginatedResponse::new(vec![], 0, 1, 50);
        assert_eq!(empty.pages, 1);
    }
}
