use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use common::telemetry::{get_tracing_subscriber, init_tracing_subscriber};
use image_ingestion_worker::{
    configuration::HandleStoreSettings,
    domain::{
        entities::{
            collection_record::{Embeddings, ProjectedPosition},
            ingest_item::{ImageFile, IngestItem},
        },
        services::projection_scheduler::ProjectionScheduler,
    },
    handlers::ingestion_queue::{IngestionQueue, PipelineEvent, PipelineServices},
    ports::{
        embedding_service::{EmbeddingService, EmbeddingServiceError},
        handle_store::{FileHandlePayload, FileHandleRecord, HandleStore, HandleStoreError},
        vector_store::{VectorStoreClient, VectorStoreError},
    },
    repositories::file_handle_sqlite_repository::FileHandleSqliteRepository,
};
use once_cell::sync::Lazy;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

// Ensures that the `tracing` stack is only initialized once using `once_cell`
static TRACING: Lazy<()> = Lazy::new(|| {
    let default_filter_level = "info".to_string();
    let subscriber_name = "test".to_string();

    // The sink is part of the type returned by `get_tracing_subscriber`: one branch per sink
    if std::env::var("TEST_LOG").is_ok() {
        let subscriber =
            get_tracing_subscriber(subscriber_name, default_filter_level, std::io::stdout);
        init_tracing_subscriber(subscriber).expect("Failed to set up tracing");
    } else {
        let subscriber =
            get_tracing_subscriber(subscriber_name, default_filter_level, std::io::sink);
        init_tracing_subscriber(subscriber).expect("Failed to set up tracing");
    };
});

/// Calls made to the fake collaborators, in order, shared between them
///
/// Also tracks how many calls are in progress at the same time.
#[derive(Default)]
pub struct CallLog {
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl CallLog {
    async fn record(&self, call: String, delay: Duration) {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        self.calls.lock().unwrap().push(call);

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls starting with `prefix`, without the prefix
    pub fn calls_to(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| call.strip_prefix(prefix).map(str::to_string))
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Embeds an image as `[nb_bytes, first_byte]`, or fails for the configured names
pub struct FakeEmbeddingService {
    log: Arc<CallLog>,
    failing_names: HashSet<String>,
    delay: Duration,
}

#[async_trait]
impl EmbeddingService for FakeEmbeddingService {
    async fn embed(&self, item: &IngestItem) -> Result<Embeddings, EmbeddingServiceError> {
        self.log
            .record(format!("embed:{}", item.name()), self.delay)
            .await;

        if self.failing_names.contains(item.name()) {
            return Err(EmbeddingServiceError::ServerError(format!(
                "cannot embed {}",
                item.name()
            )));
        }

        let first_byte = item.raw_bytes().first().copied().unwrap_or_default();
        Ok(vec![item.raw_bytes().len() as f32, first_byte as f32])
    }
}

/// Keeps points in memory and projects each one on the x axis, by insertion order
///
/// Can be told to fail inserts of given ids, the next projection or the next clear.
pub struct FakeVectorStore {
    log: Arc<CallLog>,
    points: Mutex<Vec<(String, Vec<f32>)>>,
    failing_inserts: Mutex<HashSet<String>>,
    fail_next_projection: AtomicBool,
    fail_next_clear: AtomicBool,
}

impl FakeVectorStore {
    pub fn fail_inserts_of(&self, id: &str) {
        self.failing_inserts.lock().unwrap().insert(id.to_string());
    }

    pub fn fail_next_projection(&self) {
        self.fail_next_projection.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_clear(&self) {
        self.fail_next_clear.store(true, Ordering::SeqCst);
    }

    fn projection_failure(&self) -> Result<(), VectorStoreError> {
        if self.fail_next_projection.swap(false, Ordering::SeqCst) {
            return Err(VectorStoreError::Unreachable("projection timed out".to_string()));
        }
        Ok(())
    }

    pub fn point_ids(&self) -> Vec<String> {
        self.points
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[async_trait]
impl VectorStoreClient for FakeVectorStore {
    async fn insert(
        &self,
        id: &str,
        vector: &[f32],
        _metadata: &JsonValue,
    ) -> Result<(), VectorStoreError> {
        self.log
            .record(format!("insert:{}", id), Duration::from_millis(1))
            .await;
        if self.failing_inserts.lock().unwrap().contains(id) {
            return Err(VectorStoreError::Rejected(format!("{} rejected", id)));
        }

        self.points
            .lock()
            .unwrap()
            .push((id.to_string(), vector.to_vec()));
        Ok(())
    }

    async fn project_all(&self) -> Result<Vec<(String, ProjectedPosition)>, VectorStoreError> {
        self.log
            .record("project_all".to_string(), Duration::ZERO)
            .await;
        self.projection_failure()?;

        Ok(self
            .points
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(index, (id, _))| (id.clone(), ProjectedPosition([index as f32, 0.0, 0.0])))
            .collect())
    }

    async fn project_one(&self, vector: &[f32]) -> Result<ProjectedPosition, VectorStoreError> {
        self.log
            .record("project_one".to_string(), Duration::ZERO)
            .await;
        self.projection_failure()?;

        Ok(ProjectedPosition([-1.0, vector[0], vector[1]]))
    }

    async fn clear(&self) -> Result<(), VectorStoreError> {
        self.log.record("clear".to_string(), Duration::ZERO).await;
        if self.fail_next_clear.swap(false, Ordering::SeqCst) {
            return Err(VectorStoreError::Unreachable("clear timed out".to_string()));
        }

        self.points.lock().unwrap().clear();
        Ok(())
    }
}

/// A durable write to make fail once
#[derive(Debug, Clone, PartialEq)]
pub enum FailingWrite {
    Vector(&'static str),
    Position(&'static str),
}

/// Durable store failing the writes it is told to, and delegating everything else
pub struct FlakyHandleStore {
    inner: Arc<FileHandleSqliteRepository>,
    failing_writes: Mutex<Vec<FailingWrite>>,
    fail_next_clear: AtomicBool,
}

impl FlakyHandleStore {
    pub fn fail_once(&self, write: FailingWrite) {
        self.failing_writes.lock().unwrap().push(write);
    }

    pub fn fail_next_clear(&self) {
        self.fail_next_clear.store(true, Ordering::SeqCst);
    }

    fn take_failure(&self, id: &str, payload: &FileHandlePayload) -> bool {
        let mut failing_writes = self.failing_writes.lock().unwrap();
        let matching = failing_writes.iter().position(|write| match write {
            FailingWrite::Vector(failing_id) => *failing_id == id && payload.vector.is_some(),
            FailingWrite::Position(failing_id) => {
                *failing_id == id && payload.position.is_some()
            }
        });

        match matching {
            Some(index) => {
                failing_writes.remove(index);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl HandleStore for FlakyHandleStore {
    async fn put(&self, id: &str, payload: &FileHandlePayload) -> Result<(), HandleStoreError> {
        if self.take_failure(id, payload) {
            return Err(HandleStoreError::Backend("disk hiccup".to_string()));
        }
        self.inner.put(id, payload).await
    }

    async fn get(&self, id: &str) -> Result<FileHandleRecord, HandleStoreError> {
        self.inner.get(id).await
    }

    async fn get_all(&self) -> Result<Vec<FileHandleRecord>, HandleStoreError> {
        self.inner.get_all().await
    }

    async fn clear(&self) -> Result<(), HandleStoreError> {
        if self.fail_next_clear.swap(false, Ordering::SeqCst) {
            return Err(HandleStoreError::Backend("disk hiccup".to_string()));
        }
        self.inner.clear().await
    }
}

pub struct PipelineOptions {
    pub milestones: Vec<usize>,
    pub max_backlog: Option<usize>,
    pub failing_names: Vec<&'static str>,
    pub embedding_delay: Duration,
    /// Reuses the durable store of a previous pipeline
    pub database_path: Option<String>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            milestones: vec![1, 2, 3, 10, 20, 50, 100, 250, 500, 750, 1000],
            max_backlog: None,
            failing_names: vec![],
            embedding_delay: Duration::from_millis(2),
            database_path: None,
        }
    }
}

pub struct TestPipeline {
    pub queue: IngestionQueue,
    pub events: UnboundedReceiver<PipelineEvent>,
    pub log: Arc<CallLog>,
    pub vector_store: Arc<FakeVectorStore>,
    /// Durable store used to assert checks on what was persisted
    pub handle_store: Arc<FileHandleSqliteRepository>,
    /// The durable store seen by the queue, wrapping `handle_store`
    pub flaky_store: Arc<FlakyHandleStore>,
    pub database_path: String,
}

impl TestPipeline {
    /// Another set of services on the same fakes and durable store
    pub fn services(&self) -> PipelineServices {
        PipelineServices {
            embedding_service: Arc::new(FakeEmbeddingService {
                log: self.log.clone(),
                failing_names: HashSet::new(),
                delay: Duration::ZERO,
            }),
            vector_store: self.vector_store.clone(),
            handle_store: self.flaky_store.clone(),
            scheduler: ProjectionScheduler::default(),
        }
    }

    /// Waits for the queue to be idle then returns every event emitted so far
    pub async fn drain_events(&mut self) -> Vec<PipelineEvent> {
        self.queue.wait_until_idle().await;

        let mut events = vec![];
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Builds a queue on top of fake embedding and vector store services and a fresh SQLite store
pub async fn spawn_pipeline(options: PipelineOptions) -> TestPipeline {
    Lazy::force(&TRACING);

    // Uses a different database file for each test case
    let database_path = options.database_path.unwrap_or_else(|| {
        std::env::temp_dir()
            .join(format!("test_file_handles_{}.db", Uuid::new_v4()))
            .to_string_lossy()
            .to_string()
    });
    let handle_store = Arc::new(
        FileHandleSqliteRepository::try_new(&HandleStoreSettings {
            database_path: database_path.clone(),
            max_connections: 2,
        })
        .await
        .expect("Failed to open the file handles store."),
    );

    let log = Arc::new(CallLog::default());
    let embedding_service = Arc::new(FakeEmbeddingService {
        log: log.clone(),
        failing_names: options
            .failing_names
            .into_iter()
            .map(str::to_string)
            .collect(),
        delay: options.embedding_delay,
    });
    let vector_store = Arc::new(FakeVectorStore {
        log: log.clone(),
        points: Mutex::new(vec![]),
        failing_inserts: Mutex::new(HashSet::new()),
        fail_next_projection: AtomicBool::new(false),
        fail_next_clear: AtomicBool::new(false),
    });
    let flaky_store = Arc::new(FlakyHandleStore {
        inner: handle_store.clone(),
        failing_writes: Mutex::new(vec![]),
        fail_next_clear: AtomicBool::new(false),
    });

    let services = PipelineServices {
        embedding_service,
        vector_store: vector_store.clone(),
        handle_store: flaky_store.clone(),
        scheduler: ProjectionScheduler::try_new(options.milestones)
            .expect("Invalid milestones."),
    };
    let (queue, events) =
        IngestionQueue::new(services, options.max_backlog).expect("Failed to build the queue.");

    TestPipeline {
        queue,
        events,
        log,
        vector_store,
        handle_store,
        flaky_store,
        database_path,
    }
}

/// A small fake PNG file: its content only depends on its name
pub fn image_file(name: &str) -> ImageFile {
    ImageFile {
        name: name.to_string(),
        raw_bytes: name.as_bytes().to_vec(),
        mime_type: "image/png".to_string(),
    }
}

pub fn text_file(name: &str) -> ImageFile {
    ImageFile {
        name: name.to_string(),
        raw_bytes: b"not an image".to_vec(),
        mime_type: "text/plain".to_string(),
    }
}
