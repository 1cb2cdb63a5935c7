use std::{net::TcpListener, sync::Arc};

use actix_web::{
    dev::Server,
    web::{self, Data},
    App, HttpServer,
};
use tokio::task::JoinHandle;
use tracing::info;
use tracing_actix_web::TracingLogger;

use crate::{
    configuration::Settings,
    domain::services::projection_scheduler::{ProjectionScheduler, ProjectionSchedulerError},
    handlers::{
        handler_pipeline_events::{self, PipelineEventsSummary},
        ingestion_queue::{IngestionQueue, IngestionQueueError, PipelineServices},
    },
    ports::handle_store::HandleStoreError,
    repositories::{
        embedding_http_repository::EmbeddingHttpRepository,
        file_handle_sqlite_repository::FileHandleSqliteRepository,
        vector_store_http_repository::VectorStoreHttpRepository,
    },
    routes::{add_images, get_collection, health_check, reset_collection},
};

/// Holds the newly built server, the ingestion queue it feeds, and some useful properties
pub struct Application {
    server: Server,
    port: u16,
    ingestion_queue: IngestionQueue,
    events_handler: JoinHandle<PipelineEventsSummary>,
}

impl Application {
    /// Opens the durable store, recovers the collection from it, then binds the server
    ///
    /// A durable store that cannot be opened fails the build: no upload is accepted
    /// without persistence.
    #[tracing::instrument(name = "Building application")]
    pub async fn build(settings: Settings) -> Result<Self, ApplicationError> {
        let handle_store = FileHandleSqliteRepository::try_new(&settings.handle_store).await?;
        let embedding_service = EmbeddingHttpRepository::try_new(&settings.embedding_service)?;
        let vector_store = VectorStoreHttpRepository::try_new(&settings.vector_store)?;
        let scheduler = ProjectionScheduler::try_new(settings.pipeline.milestones.clone())?;

        let services = PipelineServices {
            embedding_service: Arc::new(embedding_service),
            vector_store: Arc::new(vector_store),
            handle_store: Arc::new(handle_store),
            scheduler,
        };
        let (ingestion_queue, events) =
            IngestionQueue::new(services, settings.pipeline.max_backlog)?;

        // Before the server is bound: no item can be enqueued yet
        ingestion_queue.recover().await?;

        let events_handler = tokio::spawn(handler_pipeline_events::register_handler(events));

        let address = format!(
            "{}:{}",
            settings.application.host, settings.application.port
        );
        let listener = TcpListener::bind(address)?;
        let port = listener.local_addr()?.port();

        let server = run(listener, ingestion_queue.clone())?;

        Ok(Self {
            server,
            port,
            ingestion_queue,
            events_handler,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Another handle on the queue fed by the server
    pub fn ingestion_queue(&self) -> IngestionQueue {
        self.ingestion_queue.clone()
    }

    /// This function only returns when the application is stopped
    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        info!("Running server ...");
        self.server.await?;

        // The events channel closes once the last queue handle is dropped
        drop(self.ingestion_queue);
        match self.events_handler.await {
            Ok(summary) => info!(?summary, "Application stopped"),
            Err(error) => info!(?error, "Pipeline events handler did not complete"),
        }

        info!("👋 Bye!");
        Ok(())
    }
}

/// listener: the caller binds their own port
///
/// TracingLogger middleware: generates a `request_id` for each incoming request
/// and attaches it to every span of the request.
pub fn run(listener: TcpListener, ingestion_queue: IngestionQueue) -> Result<Server, std::io::Error> {
    // Shared by every worker: each clone is a handle on the same queue
    let ingestion_queue = Data::new(ingestion_queue);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .route("/health_check", web::get().to(health_check))
            .route("/images", web::post().to(add_images))
            .route("/collection", web::get().to(get_collection))
            .route("/reset", web::post().to(reset_collection))
            .app_data(ingestion_queue.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}

#[derive(thiserror::Error, Debug)]
pub enum ApplicationError {
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    #[error(transparent)]
    HandleStoreError(#[from] HandleStoreError),
    #[error("HTTP client could not be built: {0}")]
    HttpClientError(#[from] reqwest::Error),
    #[error(transparent)]
    ProjectionSchedulerError(#[from] ProjectionSchedulerError),
    #[error(transparent)]
    IngestionQueueError(#[from] IngestionQueueError),
}
