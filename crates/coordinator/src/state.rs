use crate::{config::CoordinatorConfig, face_client::FaceClient, store::AttendanceStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct CoordinatorState {
  inner: Arc<StateInner>,
}

struct StateInner {
  config: CoordinatorConfig,
  store: Arc<dyn AttendanceStore>,
  face_client: Arc<dyn FaceClient>,
}

impl CoordinatorState {
  pub fn new(
    config: CoordinatorConfig,
    store: Arc<dyn AttendanceStore>,
    face_client: Arc<dyn FaceClient>,
  ) -> Self {
    Self {
      inner: Arc::new(StateInner {
        config,
        store,
        face_client,
      }),
    }
  }

  pub fn config(&self) -> &CoordinatorConfig {
    &self.inner.config
  }

  pub fn store(&self) -> Arc<dyn AttendanceStore> {
    self.inner.store.clone()
  }

  pub fn face_client(&self) -> Arc<dyn FaceClient> {
    self.inner.face_client.clone()
  }
}
