//! Shared fixtures for the integration tests.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use sync_shared::{
    entity::EntityRecord,
    error::SyncResult,
    model,
    notify::ChangeNotifier,
    registry::{FieldMaskRegistry, TypeTag},
    service::DataService,
    store::{EntityId, EntitySource, EntityStore},
};
use tracing::debug;

/// Routes test logs through the test harness writer.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

pub fn registry() -> anyhow::Result<Arc<FieldMaskRegistry>> {
    Ok(Arc::new(model::bootstrap_registry()?))
}

pub fn service() -> anyhow::Result<DataService> {
    Ok(DataService::new(registry()?, ChangeNotifier::default()))
}

/// Entity source that counts fetches and can stall before answering,
/// standing in for a remote backing service.
pub struct CountingSource {
    store: Arc<EntityStore>,
    fetches: AtomicUsize,
    delay: Option<Duration>,
}

impl CountingSource {
    pub fn new(store: Arc<EntityStore>) -> Self {
        Self {
            store,
            fetches: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntitySource for CountingSource {
    async fn fetch(&self, type_tag: TypeTag, id: EntityId) -> SyncResult<Arc<dyn EntityRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            debug!(%type_tag, %id, ?delay, "Stalling fetch");
            tokio::time::sleep(delay).await;
        }
        self.store.get_record(type_tag, id)
    }
}
