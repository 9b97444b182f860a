use crate::{
  error::ApiError,
  face_client::FaceClientError,
  state::CoordinatorState,
  store::{AttendanceQuery, InsertOutcome, NewAttendance, OrgSettings},
};
use axum::{
  Json, Router,
  extract::{DefaultBodyLimit, Multipart, Query, State},
  http::StatusCode,
  response::IntoResponse,
  routing::{get, post},
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use common::attendance::{
  AttendanceAction, AttendanceLogEntry, AttendanceStatus, CheckInResponse, DailySummary,
  PaginatedResponse,
};
use common::validation::parse_hhmm;
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

const MAX_UPLOAD_BYTES: usize = 15 * 1024 * 1024;

pub fn router(state: CoordinatorState) -> Router {
  Router::new()
    .route("/healthz", get(healthz))
    .route("/readyz", get(readyz))
    .route("/metrics", get(metrics))
    .route("/attendance/check-in", post(check_in))
    .route("/attendance/check-out", post(check_out))
    .route("/attendance", get(list_attendance))
    .route("/attendance/summary/daily", get(daily_summary))
    .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

async fn healthz() -> &'static str {
  "ok"
}

async fn readyz(State(state): State<CoordinatorState>) -> Result<&'static str, ApiError> {
  match state.store().health_check().await {
    Ok(true) => Ok("ready"),
    Ok(false) => Err(ApiError::unavailable("attendance store not ready")),
    Err(e) => Err(ApiError::unavailable(format!("health check failed: {}", e))),
  }
}

async fn metrics() -> impl IntoResponse {
  use prometheus::Encoder;
  let encoder = prometheus::TextEncoder::new();
  let metric_families = telemetry::metrics::REGISTRY.gather();
  let mut buffer = Vec::new();
  if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
    tracing::error!("failed to encode metrics: {}", e);
    return (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response();
  }
  String::from_utf8(buffer).unwrap_or_default().into_response()
}

struct AttendanceUpload {
  org_id: Uuid,
  device_id: Option<Uuid>,
  image: Vec<u8>,
}

async fn read_upload(mut multipart: Multipart) -> Result<AttendanceUpload, ApiError> {
  let mut org_id = None;
  let mut device_id = None;
  let mut image = None;

  while let Some(field) = multipart
    .next_field()
    .await
    .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {}", e)))?
  {
    let name = field.name().unwrap_or_default().to_string();
    match name.as_str() {
      "image" => {
        let bytes = field
          .bytes()
          .await
          .map_err(|e| ApiError::bad_request(format!("failed to read image: {}", e)))?;
        image = Some(bytes.to_vec());
      }
      "org_id" => {
        let text = field
          .text()
          .await
          .map_err(|e| ApiError::bad_request(format!("failed to read org_id: {}", e)))?;
        org_id = Some(
          Uuid::parse_str(text.trim())
            .map_err(|_| ApiError::bad_request("org_id is not a valid UUID"))?,
        );
      }
      "device_id" => {
        let text = field
          .text()
          .await
          .map_err(|e| ApiError::bad_request(format!("failed to read device_id: {}", e)))?;
        if !text.trim().is_empty() {
          device_id = Some(
            Uuid::parse_str(text.trim())
              .map_err(|_| ApiError::bad_request("device_id is not a valid UUID"))?,
          );
        }
      }
      _ => {}
    }
  }

  let org_id = org_id.ok_or_else(|| ApiError::bad_request("missing multipart field 'org_id'"))?;
  let image = image
    .filter(|bytes| !bytes.is_empty())
    .ok_or_else(|| ApiError::bad_request("missing multipart field 'image'"))?;

  Ok(AttendanceUpload {
    org_id,
    device_id,
    image,
  })
}

/// Process a check-in request with face recognition.
async fn check_in(
  State(state): State<CoordinatorState>,
  multipart: Multipart,
) -> Result<Json<CheckInResponse>, ApiError> {
  let upload = read_upload(multipart).await?;
  process_attendance(state, AttendanceAction::CheckIn, upload).await
}

/// Process a check-out request with face recognition.
async fn check_out(
  State(state): State<CoordinatorState>,
  multipart: Multipart,
) -> Result<Json<CheckInResponse>, ApiError> {
  let upload = read_upload(multipart).await?;
  process_attendance(state, AttendanceAction::CheckOut, upload).await
}

async fn process_attendance(
  state: CoordinatorState,
  action: AttendanceAction,
  upload: AttendanceUpload,
) -> Result<Json<CheckInResponse>, ApiError> {
  let store = state.store();
  let now = Utc::now();
  let recognition_started = Instant::now();

  // Step 1: embedding from the face service.
  let embed = match state.face_client().embed(upload.image).await {
    Ok(embed) => embed,
    Err(FaceClientError::NoFace) | Err(FaceClientError::Rejected(_)) => {
      observe(action, AttendanceStatus::NoFaceDetected);
      return Ok(Json(CheckInResponse::rejection(
        AttendanceStatus::NoFaceDetected,
        "No face detected in the image. Please try again.",
      )));
    }
    Err(e @ (FaceClientError::Timeout | FaceClientError::Unavailable(_))) => {
      warn!(error = %e, "face service unreachable, recording failed attempt");
      let outcome = store
        .insert_attendance(NewAttendance {
          org_id: upload.org_id,
          user_id: None,
          device_id: upload.device_id,
          ts: now,
          action,
          status: AttendanceStatus::Failed,
          confidence_score: None,
          meta: json!({ "reason": "face_service_unavailable", "error": e.to_string() }),
        })
        .await;
      if let Err(e) = outcome {
        tracing::error!(error = %e, "failed to record degraded attendance row");
      }
      observe(action, AttendanceStatus::Failed);
      return Ok(Json(CheckInResponse::rejection(
        AttendanceStatus::Failed,
        "Face recognition service is temporarily unavailable. Please try again later.",
      )));
    }
  };

  // Step 2: org settings and recognition threshold.
  let settings = store
    .org_settings(upload.org_id)
    .await?
    .ok_or_else(|| ApiError::not_found("organization not found"))?;
  let threshold = settings
    .recognition_threshold
    .unwrap_or(state.config().default_recognition_threshold);

  // Step 3: top-1 gallery search.
  let matched = store
    .find_best_match(upload.org_id, &embed.embedding, threshold)
    .await?;
  telemetry::metrics::ATTENDANCE_RECOGNITION_LATENCY
    .observe(recognition_started.elapsed().as_secs_f64());

  let Some(matched) = matched else {
    let outcome = store
      .insert_attendance(NewAttendance {
        org_id: upload.org_id,
        user_id: None,
        device_id: upload.device_id,
        ts: now,
        action,
        status: AttendanceStatus::UnknownUser,
        confidence_score: Some(embed.quality_score),
        meta: json!({ "reason": "no_match_found", "quality_score": embed.quality_score }),
      })
      .await;
    if let Err(e) = outcome {
      tracing::error!(error = %e, "failed to record unknown-user attempt");
    }
    observe(action, AttendanceStatus::UnknownUser);
    return Ok(Json(CheckInResponse::rejection(
      AttendanceStatus::UnknownUser,
      "Face not recognized. Please contact an administrator.",
    )));
  };

  // Step 4: write the attendance row.
  let status = match action {
    AttendanceAction::CheckIn => check_in_status(now, &settings),
    AttendanceAction::CheckOut => AttendanceStatus::OnTime,
  };

  let outcome = store
    .insert_attendance(NewAttendance {
      org_id: upload.org_id,
      user_id: Some(matched.user_id),
      device_id: upload.device_id,
      ts: now,
      action,
      status,
      confidence_score: Some(matched.similarity),
      meta: json!({ "quality_score": embed.quality_score }),
    })
    .await?;

  if outcome == InsertOutcome::AlreadyCheckedIn {
    observe(action, AttendanceStatus::AlreadyCheckedIn);
    return Ok(Json(CheckInResponse {
      success: false,
      status: AttendanceStatus::AlreadyCheckedIn,
      message: format!("You have already checked in today, {}.", matched.user_name),
      user_id: Some(matched.user_id),
      user_name: Some(matched.user_name),
      check_in_time: None,
      confidence_score: None,
    }));
  }

  observe(action, status);
  info!(
    user = %matched.user_name,
    action = action.as_str(),
    status = status.as_str(),
    similarity = matched.similarity,
    "attendance recorded"
  );

  let message = match (action, status) {
    (AttendanceAction::CheckOut, _) => {
      format!("Goodbye, {}! Have a great day.", matched.user_name)
    }
    (_, AttendanceStatus::OnTime) => format!("Welcome, {}!", matched.user_name),
    _ => format!("Welcome, {}. You are late.", matched.user_name),
  };

  Ok(Json(CheckInResponse {
    success: true,
    status,
    message,
    user_id: Some(matched.user_id),
    user_name: Some(matched.user_name),
    check_in_time: Some(now),
    confidence_score: Some(matched.similarity),
  }))
}

/// On time iff the timestamp is no later than the org's `check_in_end` on
/// the timestamp's own day. `late_threshold_minutes` does not move the
/// deadline; everything after `check_in_end` is late.
fn check_in_status(now: DateTime<Utc>, settings: &OrgSettings) -> AttendanceStatus {
  let (hours, minutes) = parse_hhmm(&settings.check_in_end).unwrap_or((9, 30));
  let deadline = now
    .date_naive()
    .and_hms_opt(hours, minutes, 0)
    .map(|dt| Utc.from_utc_datetime(&dt));

  match deadline {
    Some(deadline) if now <= deadline => AttendanceStatus::OnTime,
    Some(_) => AttendanceStatus::Late,
    None => AttendanceStatus::OnTime,
  }
}

fn observe(action: AttendanceAction, status: AttendanceStatus) {
  telemetry::metrics::ATTENDANCE_EVENTS
    .with_label_values(&[action.as_str(), status.as_str()])
    .inc();
}

#[derive(Debug, Deserialize)]
struct ListQuery {
  user_id: Option<Uuid>,
  device_id: Option<Uuid>,
  status: Option<String>,
  #[serde(rename = "type")]
  action: Option<AttendanceAction>,
  from_date: Option<NaiveDate>,
  to_date: Option<NaiveDate>,
  org_id: Uuid,
  #[serde(default = "default_page")]
  page: u32,
  #[serde(default = "default_page_size")]
  page_size: u32,
}

fn default_page() -> u32 {
  1
}

fn default_page_size() -> u32 {
  50
}

/// List attendance logs with filters and pagination.
async fn list_attendance(
  State(state): State<CoordinatorState>,
  Query(query): Query<ListQuery>,
) -> Result<Json<PaginatedResponse<AttendanceLogEntry>>, ApiError> {
  let page = query.page.max(1);
  let page_size = query.page_size.clamp(1, 100);

  let (items, total) = state
    .store()
    .list_attendance(
      query.org_id,
      AttendanceQuery {
        user_id: query.user_id,
        device_id: query.device_id,
        status: query.status,
        action: query.action,
        from_date: query.from_date,
        to_date: query.to_date,
        page,
        page_size,
      },
    )
    .await?;

  Ok(Json(PaginatedResponse::new(items, total, page, page_size)))
}

#[derive(Debug, Deserialize)]
struct SummaryQuery {
  org_id: Uuid,
  date: Option<NaiveDate>,
}

/// Daily attendance summary.
async fn daily_summary(
  State(state): State<CoordinatorState>,
  Query(query): Query<SummaryQuery>,
) -> Result<Json<DailySummary>, ApiError> {
  let date = query.date.unwrap_or_else(|| Utc::now().date_naive());
  let summary = state.store().daily_summary(query.org_id, date).await?;
  Ok(Json(summary))
}
