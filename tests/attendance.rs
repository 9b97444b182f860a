/// Integration tests for the attendance coordinator, run against the
/// in-memory store and a mock face client.
use async_trait::async_trait;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use coordinator::{
    config::CoordinatorConfig,
    face_client::{FaceClient, FaceClientError},
    routes,
    state::CoordinatorState,
    store::{AttendanceStore, MemoryAttendanceStore, OrgSettings},
};
use common::face::EmbeddingResponse;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

enum MockBehavior {
    Embed { embedding: Vec<f32>, quality: f32 },
    NoFace,
    Unavailable,
}

struct MockFaceClient {
    behavior: MockBehavior,
}

#[async_trait]
impl FaceClient for MockFaceClient {
    async fn embed(&self, _image: Vec<u8>) -> Result<EmbeddingResponse, FaceClientError> {
        match &self.behavior {
            MockBehavior::Embed { embedding, quality } => Ok(EmbeddingResponse {
                embedding: embedding.clone(),
                quality_score: *quality,
                bbox: None,
            }),
            MockBehavior::NoFace => Err(FaceClientError::NoFace),
            MockBehavior::Unavailable => {
                Err(FaceClientError::Unavailable("connection refused".to_string()))
            }
        }
    }

    async fn health(&self) -> bool {
        true
    }
}

fn unit(embedding: &[f32]) -> Vec<f32> {
    let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    embedding.iter().map(|x| x / norm).collect()
}

struct TestHarness {
    server: TestServer,
    store: Arc<MemoryAttendanceStore>,
    org_id: Uuid,
    user_id: Uuid,
}

fn harness(behavior: MockBehavior) -> TestHarness {
    let store = Arc::new(MemoryAttendanceStore::new());
    let org_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();

    store.add_org(org_id, OrgSettings::default());
    store.add_user(user_id, org_id, "Alice");
    store.enroll_face(user_id, unit(&[1.0, 0.0, 0.0, 0.0]));

    let config = CoordinatorConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        database_url: None,
        face_service_url: "http://127.0.0.1:0".to_string(),
        face_service_timeout_secs: 5,
        default_recognition_threshold: 0.75,
    };

    let state = CoordinatorState::new(
        config,
        store.clone() as Arc<dyn AttendanceStore>,
        Arc::new(MockFaceClient { behavior }),
    );
    let server = TestServer::new(routes::router(state)).unwrap();

    TestHarness {
        server,
        store,
        org_id,
        user_id,
    }
}

fn check_in_form(org_id: Uuid) -> MultipartForm {
    MultipartForm::new()
        .add_text("org_id", org_id.to_string())
        .add_part(
            "image",
            Part::bytes(vec![1u8; 32])
                .file_name("face.jpg")
                .mime_type("image/jpeg"),
        )
}

#[tokio::test]
async fn recognized_check_in_succeeds() {
    let h = harness(MockBehavior::Embed {
        embedding: unit(&[1.0, 0.0, 0.0, 0.0]),
        quality: 0.9,
    });

    let response = h
        .server
        .post("/attendance/check-in")
        .multipart(check_in_form(h.org_id))
        .await;

    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["user_name"], "Alice");
    assert_eq!(body["user_id"], h.user_id.to_string());
    let status = body["status"].as_str().unwrap();
    assert!(status == "on_time" || status == "late", "status was {status}");
    assert!(body["confidence_score"].as_f64().unwrap() > 0.99);
    assert_eq!(h.store.log_count(), 1);
}

#[tokio::test]
async fn second_check_in_same_day_is_rejected() {
    let h = harness(MockBehavior::Embed {
        embedding: unit(&[1.0, 0.0, 0.0, 0.0]),
        quality: 0.9,
    });

    let first = h
        .server
        .post("/attendance/check-in")
        .multipart(check_in_form(h.org_id))
        .await;
    assert_eq!(first.status_code(), 200);
    let first: Value = first.json();
    assert_eq!(first["success"], true);

    let second = h
        .server
        .post("/attendance/check-in")
        .multipart(check_in_form(h.org_id))
        .await;
    assert_eq!(second.status_code(), 200);
    let second: Value = second.json();
    assert_eq!(second["success"], false);
    assert_eq!(second["status"], "already_checked_in");
    assert_eq!(second["user_name"], "Alice");

    // Exactly one row for the day.
    assert_eq!(h.store.log_count(), 1);
}

#[tokio::test]
async fn unmatched_face_records_unknown_user() {
    let h = harness(MockBehavior::Embed {
        // Orthogonal to the enrolled identity.
        embedding: unit(&[0.0, 1.0, 0.0, 0.0]),
        quality: 0.8,
    });

    let response = h
        .server
        .post("/attendance/check-in")
        .multipart(check_in_form(h.org_id))
        .await;

    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["status"], "unknown_user");
    assert!(body.get("user_id").is_none());

    // The attempt is still audited, carrying the quality as confidence.
    assert_eq!(h.store.log_count(), 1);
}

#[tokio::test]
async fn no_face_is_reported_without_a_row() {
    let h = harness(MockBehavior::NoFace);

    let response = h
        .server
        .post("/attendance/check-in")
        .multipart(check_in_form(h.org_id))
        .await;

    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["status"], "no_face_detected");
    assert_eq!(h.store.log_count(), 0);
}

#[tokio::test]
async fn face_service_outage_keeps_the_audit_trail() {
    let h = harness(MockBehavior::Unavailable);

    let response = h
        .server
        .post("/attendance/check-in")
        .multipart(check_in_form(h.org_id))
        .await;

    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["status"], "failed");
    // A degraded response still writes the failed row.
    assert_eq!(h.store.log_count(), 1);
}

#[tokio::test]
async fn check_out_is_always_recorded() {
    let h = harness(MockBehavior::Embed {
        embedding: unit(&[1.0, 0.0, 0.0, 0.0]),
        quality: 0.9,
    });

    for _ in 0..2 {
        let response = h
            .server
            .post("/attendance/check-out")
            .multipart(check_in_form(h.org_id))
            .await;
        assert_eq!(response.status_code(), 200);
        let body: Value = response.json();
        assert_eq!(body["success"], true);
        assert_eq!(body["status"], "on_time");
    }
    assert_eq!(h.store.log_count(), 2);
}

#[tokio::test]
async fn unknown_org_is_404() {
    let h = harness(MockBehavior::Embed {
        embedding: unit(&[1.0, 0.0, 0.0, 0.0]),
        quality: 0.9,
    });

    let response = h
        .server
        .post("/attendance/check-in")
        .multipart(check_in_form(Uuid::new_v4()))
        .await;

    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn missing_org_id_field_is_400() {
    let h = harness(MockBehavior::NoFace);

    let response = h
        .server
        .post("/attendance/check-in")
        .multipart(MultipartForm::new().add_part(
            "image",
            Part::bytes(vec![1u8; 32])
                .file_name("face.jpg")
                .mime_type("image/jpeg"),
        ))
        .await;

    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn attendance_list_returns_recorded_rows() {
    let h = harness(MockBehavior::Embed {
        embedding: unit(&[1.0, 0.0, 0.0, 0.0]),
        quality: 0.9,
    });

    let check_in = h
        .server
        .post("/attendance/check-in")
        .multipart(check_in_form(h.org_id))
        .await;
    assert_eq!(check_in.status_code(), 200);

    let response = h
        .server
        .get("/attendance")
        .add_query_param("org_id", h.org_id.to_string())
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["user_name"], "Alice");
    assert_eq!(body["items"][0]["type"], "check_in");
}

#[tokio::test]
async fn daily_summary_reflects_check_ins() {
    let h = harness(MockBehavior::Embed {
        embedding: unit(&[1.0, 0.0, 0.0, 0.0]),
        quality: 0.9,
    });

    let check_in = h
        .server
        .post("/attendance/check-in")
        .multipart(check_in_form(h.org_id))
        .await;
    assert_eq!(check_in.status_code(), 200);

    let response = h
        .server
        .get("/attendance/summary/daily")
        .add_query_param("org_id", h.org_id.to_string())
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["total_users"], 1);
    assert_eq!(body["checked_in"], 1);
    assert_eq!(body["absent"], 0);
}

#[tokio::test]
async fn healthz_and_readyz_respond() {
    let h = harness(MockBehavior::NoFace);
    assert_eq!(h.server.get("/healthz").await.status_code(), 200);
    assert_eq!(h.server.get("/readyz").await.status_code(), 200);
}
