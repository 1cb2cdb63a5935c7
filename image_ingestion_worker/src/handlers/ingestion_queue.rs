use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use common::{dtos::position_update::PositionUpdateDto, helper::error_chain_fmt};
use serde::Serialize;
use serde_json::json;
use tokio::{
    runtime::{Handle, TryCurrentError},
    sync::{mpsc, Mutex as AsyncMutex, Notify},
};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    domain::{
        entities::{
            collection::{Collection, CollectionError},
            collection_record::CollectionRecord,
            ingest_item::{ImageFile, IngestItem},
        },
        services::projection_scheduler::{
            ProjectionDecision, ProjectionScheduler, ProjectionSchedulerError,
        },
    },
    ports::{
        embedding_service::{EmbeddingService, EmbeddingServiceError},
        handle_store::{FileHandlePayload, FileHandleRecord, HandleStore, HandleStoreError},
        vector_store::{VectorStoreClient, VectorStoreError},
    },
};

/// External collaborators driven by the pipeline
pub struct PipelineServices {
    pub embedding_service: Arc<dyn EmbeddingService>,
    pub vector_store: Arc<dyn VectorStoreClient>,
    pub handle_store: Arc<dyn HandleStore>,
    pub scheduler: ProjectionScheduler,
}

/// Side channel of the queue: what happened to each item
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// An item was ingested. Holds its own position after an incremental projection,
    /// or every position of the collection after a full reprojection.
    PositionsUpdated {
        generation: u64,
        decision: ProjectionDecision,
        updates: Vec<PositionUpdateDto>,
    },
    /// The item was dropped after a failure of one of the pipeline stages
    ItemFailed {
        sequence_index: u64,
        item_id: String,
        error: String,
    },
    /// The item was not processed: not an image, already ingested, or cancelled
    ItemSkipped {
        sequence_index: u64,
        item_id: String,
        reason: String,
    },
}

/// Acknowledgement of an `enqueue`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnqueuedItem {
    pub sequence_index: u64,
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct CollectionSnapshot {
    pub generation: u64,
    pub records: Vec<CollectionRecord>,
}

/// Serializes the ingestion of image files
///
/// Items are processed one at a time, end to end, in arrival order:
/// embedding -> vector store insert -> durable store -> projection.
/// A single consumer loop runs at any time. It is started by the first `enqueue` on an
/// idle queue and stops once the backlog is drained. A failing item is reported on the
/// event channel and dropped, the loop goes on with the next one.
///
/// Cloning gives another handle on the same queue.
#[derive(Clone)]
pub struct IngestionQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    backlog: Mutex<VecDeque<IngestItem>>,
    max_backlog: Option<usize>,
    /// Set while a consumer loop is active
    running: AtomicBool,
    next_sequence_index: AtomicU64,
    /// Items enqueued and not yet completed or cancelled
    nb_pending: AtomicUsize,
    idle: Notify,
    /// Held for the whole pipeline run of an item, and by `reset` and `recover`
    collection: AsyncMutex<Collection>,
    services: PipelineServices,
    events: mpsc::UnboundedSender<PipelineEvent>,
    runtime: Handle,
}

impl IngestionQueue {
    /// Builds a queue and the receiving end of its event channel
    ///
    /// Must be called from within a tokio runtime: the consumer loop is spawned on it.
    pub fn new(
        services: PipelineServices,
        max_backlog: Option<usize>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PipelineEvent>), IngestionQueueError> {
        if max_backlog == Some(0) {
            return Err(IngestionQueueError::InvalidBacklogBound);
        }

        let runtime = Handle::try_current()?;
        let (sender, receiver) = mpsc::unbounded_channel();

        let queue = Self {
            inner: Arc::new(QueueInner {
                backlog: Mutex::new(VecDeque::new()),
                max_backlog,
                running: AtomicBool::new(false),
                next_sequence_index: AtomicU64::new(0),
                nb_pending: AtomicUsize::new(0),
                idle: Notify::new(),
                collection: AsyncMutex::new(Collection::new()),
                services,
                events: sender,
                runtime,
            }),
        };

        Ok((queue, receiver))
    }

    /// Appends a file to the backlog and starts the consumer loop if it is not running
    ///
    /// Never waits on the pipeline. Only fails if a backlog bound is configured and reached.
    pub fn enqueue(&self, file: ImageFile) -> Result<EnqueuedItem, EnqueueError> {
        let enqueued = {
            let mut backlog = self.inner.lock_backlog();

            if let Some(max_backlog) = self.inner.max_backlog {
                if backlog.len() >= max_backlog {
                    return Err(EnqueueError::BacklogFull(max_backlog));
                }
            }

            // Assigned under the backlog lock: sequence indexes follow the FIFO order
            let sequence_index = self.inner.next_sequence_index.fetch_add(1, Ordering::SeqCst);
            let item = IngestItem::new(file, sequence_index);
            let enqueued = EnqueuedItem {
                sequence_index,
                id: item.record_id().to_string(),
            };

            self.inner.nb_pending.fetch_add(1, Ordering::SeqCst);
            backlog.push_back(item);
            enqueued
        };

        debug!(?enqueued, "Enqueued item");
        self.inner.clone().start_processing();

        Ok(enqueued)
    }

    /// Drops every item still waiting in the backlog
    ///
    /// The item being processed, if any, runs to completion.
    pub fn cancel_pending(&self) -> usize {
        let cancelled: Vec<IngestItem> = self.inner.lock_backlog().drain(..).collect();
        let nb_cancelled = cancelled.len();

        for item in cancelled {
            self.inner.emit(PipelineEvent::ItemSkipped {
                sequence_index: item.sequence_index(),
                item_id: item.record_id().to_string(),
                reason: "cancelled before processing".to_string(),
            });
        }

        if nb_cancelled > 0 {
            info!(nb_cancelled, "Cancelled pending items");
            self.inner.complete(nb_cancelled);
        }

        nb_cancelled
    }

    /// Resolves once every enqueued item has been processed or cancelled
    pub async fn wait_until_idle(&self) {
        loop {
            // Registered before the check so a completion in between is not missed
            let notified = self.inner.idle.notified();
            if self.inner.nb_pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn backlog_len(&self) -> usize {
        self.inner.lock_backlog().len()
    }

    pub fn is_processing(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Clears the vector store, the durable store and the in-memory collection, in that order
    ///
    /// Waits for the item being processed, if any. Items still in the backlog are
    /// ingested afterwards, in the new collection generation.
    ///
    /// If the vector store cannot be cleared nothing is changed. Once it is cleared, the
    /// in-memory collection is cleared too, even if the durable store fails: its records
    /// are then left behind until the next successful reset.
    #[tracing::instrument(name = "Resetting collection", skip(self))]
    pub async fn reset(&self) -> Result<(), ResetError> {
        let mut collection = self.inner.collection.lock().await;

        self.inner.services.vector_store.clear().await?;
        let handle_store_cleared = self.inner.services.handle_store.clear().await;
        collection.clear();

        if let Err(error) = handle_store_cleared {
            error!(
                ?error,
                generation = collection.generation(),
                "Collection reset, but the durable store still holds its records"
            );
            return Err(error.into());
        }

        info!(generation = collection.generation(), "Collection reset");
        Ok(())
    }

    /// Rebuilds the in-memory collection from the durable store
    ///
    /// Meant to be called once, before the first `enqueue`. Records without a vector
    /// (never embedded) are left out.
    #[tracing::instrument(name = "Recovering collection from durable store", skip(self))]
    pub async fn recover(&self) -> Result<usize, HandleStoreError> {
        let mut collection = self.inner.collection.lock().await;
        let records = self.inner.services.handle_store.get_all().await?;

        let mut nb_recovered = 0;
        for record in records {
            let FileHandleRecord {
                id,
                vector,
                position,
                ..
            } = record;

            if vector.is_none() {
                debug!(%id, "Skipping record without vector");
                continue;
            }

            let inserted = CollectionRecord::try_from_parts(id.clone(), vector, position)
                .map_err(CollectionError::from)
                .and_then(|record| collection.insert(record));
            match inserted {
                Ok(()) => nb_recovered += 1,
                Err(error) => warn!(%id, ?error, "Skipping invalid stored record"),
            }
        }

        info!(nb_recovered, "Recovered collection");
        Ok(nb_recovered)
    }

    /// Copy of the current collection, taken between two item runs
    pub async fn snapshot(&self) -> CollectionSnapshot {
        let collection = self.inner.collection.lock().await;

        CollectionSnapshot {
            generation: collection.generation(),
            records: collection.records().to_vec(),
        }
    }
}

impl QueueInner {
    fn lock_backlog(&self) -> MutexGuard<'_, VecDeque<IngestItem>> {
        // The backlog is never left half-updated, a poisoned lock is still usable
        self.backlog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pop_head(&self) -> Option<IngestItem> {
        self.lock_backlog().pop_front()
    }

    fn emit(&self, event: PipelineEvent) {
        if self.events.send(event).is_err() {
            debug!("No listener on the pipeline events channel");
        }
    }

    fn complete(&self, nb_items: usize) {
        if self.nb_pending.fetch_sub(nb_items, Ordering::SeqCst) == nb_items {
            self.idle.notify_waiters();
        }
    }

    /// Spawns the consumer loop, unless one is already running
    fn start_processing(self: Arc<Self>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let runtime = self.runtime.clone();
        runtime.spawn(
            self.run_consumer()
                .instrument(info_span!("Ingestion queue consumer")),
        );
    }

    async fn run_consumer(self: Arc<Self>) {
        loop {
            while let Some(item) = self.pop_head() {
                self.process(item).await;
                self.complete(1);
            }

            self.running.store(false, Ordering::SeqCst);

            // An enqueue landing between the last pop and the flag reset saw the loop
            // running and did not start a new one: take its item over.
            let backlog_is_empty = self.lock_backlog().is_empty();
            if backlog_is_empty
                || self
                    .running
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
            {
                break;
            }
        }
    }

    async fn process(&self, item: IngestItem) {
        let sequence_index = item.sequence_index();
        let item_id = item.record_id().to_string();

        async {
            let mut collection = self.collection.lock().await;
            let generation = collection.generation();

            match execute_handler(&self.services, &mut collection, &item).await {
                Ok(ItemOutcome { decision, updates }) => {
                    info!(
                        ?decision,
                        nb_updates = updates.len(),
                        collection_size = collection.len(),
                        "Successfully ingested item"
                    );
                    self.emit(PipelineEvent::PositionsUpdated {
                        generation,
                        decision,
                        updates,
                    });
                }
                Err(
                    error @ (ExecuteHandlerError::InvalidInput(_)
                    | ExecuteHandlerError::DuplicateId(_)),
                ) => {
                    info!(%error, "Skipping item");
                    self.emit(PipelineEvent::ItemSkipped {
                        sequence_index,
                        item_id: item_id.clone(),
                        reason: error.to_string(),
                    });
                }
                Err(error) => {
                    error!(?error, "Failed to ingest item, dropping it");
                    self.emit(PipelineEvent::ItemFailed {
                        sequence_index,
                        item_id: item_id.clone(),
                        error: error.to_string(),
                    });
                }
            }
        }
        .instrument(info_span!(
            "Processing ingest item",
            sequence_index,
            item_id = %item_id,
            run_id = %Uuid::new_v4(),
        ))
        .await
    }
}

/// Result of a successful pipeline run
#[derive(Debug)]
pub struct ItemOutcome {
    pub decision: ProjectionDecision,
    pub updates: Vec<PositionUpdateDto>,
}

#[derive(thiserror::Error)]
pub enum ExecuteHandlerError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("{0} was already ingested in this collection generation")]
    DuplicateId(String),
    #[error(transparent)]
    EmbeddingServiceError(#[from] EmbeddingServiceError),
    #[error(transparent)]
    VectorStoreError(#[from] VectorStoreError),
    #[error(transparent)]
    HandleStoreError(#[from] HandleStoreError),
    #[error(transparent)]
    ProjectionSchedulerError(#[from] ProjectionSchedulerError),
    #[error(transparent)]
    CollectionError(#[from] CollectionError),
}

impl std::fmt::Debug for ExecuteHandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Runs one item through the whole pipeline
///
/// embed -> insert in the vector store -> persist the vector -> project (full or incremental)
/// -> persist positions
///
/// The item joins `collection` once its vector is persisted, and leaves it again if the
/// projection fails: on error, `collection` holds exactly the records it held before.
/// Positions set on other records by a full reprojection are kept.
#[tracing::instrument(
    name = "Executing pipeline on ingest item",
    skip(services, collection, item),
    fields(count_before_insert = collection.len())
)]
pub async fn execute_handler(
    services: &PipelineServices,
    collection: &mut Collection,
    item: &IngestItem,
) -> Result<ItemOutcome, ExecuteHandlerError> {
    if !item.is_image() {
        return Err(ExecuteHandlerError::InvalidInput(format!(
            "{} has a non-image type: {}",
            item.name(),
            item.mime_type()
        )));
    }

    let id = item.record_id();
    if collection.contains(id) {
        return Err(ExecuteHandlerError::DuplicateId(id.to_string()));
    }

    // Identity known, vector unknown
    services
        .handle_store
        .put(id, &FileHandlePayload::identity(item.name()))
        .await?;

    let vector = services.embedding_service.embed(item).await?;

    let metadata = json!({
        "name": item.name(),
        "mime_type": item.mime_type(),
        "sequence_index": item.sequence_index(),
    });
    services.vector_store.insert(id, &vector, &metadata).await?;
    services
        .handle_store
        .put(id, &FileHandlePayload::vector(vector.clone()))
        .await?;

    // Every record of the collection has a persisted vector
    collection.insert(CollectionRecord::new(id.to_string(), vector.clone()))?;

    match project(services, collection, id, &vector).await {
        Ok(outcome) => Ok(outcome),
        Err(error) => {
            collection.remove(id);
            Err(error)
        }
    }
}

/// Projects the collection once `id` was inserted, and persists the resulting positions
async fn project(
    services: &PipelineServices,
    collection: &mut Collection,
    id: &str,
    vector: &[f32],
) -> Result<ItemOutcome, ExecuteHandlerError> {
    let decision = services.scheduler.decide(collection.len())?;
    let projections = match decision {
        ProjectionDecision::FullReprojection => services.vector_store.project_all().await?,
        ProjectionDecision::Incremental => {
            vec![(id.to_string(), services.vector_store.project_one(vector).await?)]
        }
    };

    let mut updates = Vec::with_capacity(projections.len());
    for (projected_id, position) in projections {
        // Points of dropped items stay in the vector store
        if !collection.contains(&projected_id) {
            warn!(%projected_id, "Vector store projected an id unknown to the collection");
            continue;
        }

        services
            .handle_store
            .put(&projected_id, &FileHandlePayload::position(position))
            .await?;
        collection.set_position(&projected_id, position)?;

        updates.push(PositionUpdateDto {
            id: projected_id,
            position: position.into(),
        });
    }

    Ok(ItemOutcome { decision, updates })
}

#[derive(thiserror::Error)]
pub enum IngestionQueueError {
    #[error("The ingestion queue must be built from within a tokio runtime")]
    NoRuntime(#[from] TryCurrentError),
    #[error("The backlog bound must allow at least one item")]
    InvalidBacklogBound,
}

impl std::fmt::Debug for IngestionQueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[derive(thiserror::Error)]
pub enum EnqueueError {
    #[error("The backlog already holds its maximum of {0} items")]
    BacklogFull(usize),
}

impl std::fmt::Debug for EnqueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[derive(thiserror::Error)]
pub enum ResetError {
    #[error(transparent)]
    VectorStoreError(#[from] VectorStoreError),
    #[error(transparent)]
    HandleStoreError(#[from] HandleStoreError),
}

impl std::fmt::Debug for ResetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
