//! Process wiring: backend, repositories, handlers, worker and scheduler.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use shu_core::{Config, QueueBackendKind, QueueSettings};
use shu_core::models::WorkloadType;
use shu_db::{InMemoryDocumentRepository, InMemoryFeedRepository, InMemoryPluginExecutionRepository};
use shu_ingestion::{
    InMemoryChunkSink, InMemorySourceStore, IngestionCollaborators, IngestionPipeline, StageContext,
};
use shu_plugins::host::default_http_client;
use shu_plugins::{
    ExecutorConfig, HostPolicy, HostServices, InMemoryKeyValueStore, InMemoryKnowledgeBase,
    InMemorySecretStore, PluginCache, PluginExecutionHandler, PluginExecutor, PluginRegistry,
    StaticTokenProvider,
};
use shu_scheduler::{PluginsSchedulerService, SchedulerConfig};
use shu_worker::{
    HandlerRegistry, InMemoryQueueBackend, QueueBackend, RedisQueueBackend, Worker, WorkerConfig,
    WorkloadRouting,
};

use crate::demo::NotesPlugin;

/// Queue backend named by the configuration.
pub async fn build_backend(settings: &QueueSettings) -> Result<Arc<dyn QueueBackend>> {
    match settings.backend {
        QueueBackendKind::Memory => {
            tracing::info!("Using in-memory queue backend");
            Ok(Arc::new(InMemoryQueueBackend::new()))
        }
        QueueBackendKind::Redis => {
            let url = settings
                .redis_url
                .as_deref()
                .context("SHU_REDIS_URL is required for the redis backend")?;
            let backend = RedisQueueBackend::connect(url, &settings.prefix)
                .await
                .context("Failed to connect to Redis")?;
            tracing::info!(prefix = %settings.prefix, "Using Redis queue backend");
            Ok(Arc::new(backend))
        }
    }
}

/// The in-process stores, exposed so callers can seed and inspect them.
#[derive(Clone, Default)]
pub struct Stores {
    pub documents: InMemoryDocumentRepository,
    pub executions: InMemoryPluginExecutionRepository,
    pub feeds: InMemoryFeedRepository,
    pub sources: InMemorySourceStore,
    pub chunks: InMemoryChunkSink,
    pub knowledge: InMemoryKnowledgeBase,
}

pub struct App {
    pub config: Config,
    pub backend: Arc<dyn QueueBackend>,
    pub routing: Arc<WorkloadRouting>,
    pub stores: Stores,
    pub ingestion: IngestionPipeline,
    pub registry: PluginRegistry,
    pub worker: Worker,
    pub scheduler: PluginsSchedulerService,
}

impl App {
    pub async fn build(config: Config) -> Result<Self> {
        let backend = build_backend(&config.queue).await?;
        Self::with_backend(config, backend).await
    }

    pub async fn with_backend(config: Config, backend: Arc<dyn QueueBackend>) -> Result<Self> {
        let routing = Arc::new(WorkloadRouting::from_config(&config.queue));
        let stores = Stores::default();

        let services = HostServices {
            secrets: Arc::new(InMemorySecretStore::new()),
            storage: Arc::new(InMemoryKeyValueStore::new()),
            knowledge: Arc::new(stores.knowledge.clone()),
            tokens: Arc::new(StaticTokenProvider::new()),
            cache: PluginCache::new(config.plugins.cache_capacity),
            http_client: default_http_client(),
        };
        let registry = PluginRegistry::new();
        registry
            .register(Arc::new(NotesPlugin::new()))
            .await
            .context("Failed to register built-in plugins")?;
        let executor = Arc::new(PluginExecutor::new(
            registry.clone(),
            services,
            HostPolicy::from_settings(&config.plugins),
            ExecutorConfig::from_settings(&config.plugins),
        ));

        let ingestion = IngestionPipeline::new(
            StageContext::new(
                Arc::new(stores.documents.clone()),
                backend.clone(),
                routing.clone(),
            ),
            config.ingestion.clone(),
        );

        let mut handlers = HandlerRegistry::new();
        ingestion.register_handlers(
            &mut handlers,
            IngestionCollaborators::local(stores.sources.clone(), stores.chunks.clone()),
        );
        handlers.register(
            WorkloadType::PluginExecution,
            Arc::new(
                PluginExecutionHandler::new(executor, Arc::new(stores.executions.clone()))
                    .with_heartbeat_interval(config.scheduler.execution_heartbeat_interval()),
            ),
        );

        let worker = Worker::new(
            backend.clone(),
            routing.clone(),
            Arc::new(handlers),
            WorkerConfig::from_settings(&config.worker),
        );
        let scheduler = PluginsSchedulerService::new(
            Arc::new(stores.feeds.clone()),
            Arc::new(stores.executions.clone()),
            registry.clone(),
            backend.clone(),
            routing.clone(),
            SchedulerConfig::from_settings(&config.scheduler),
        );

        tracing::info!(queues = ?worker.queues(), "Worker wired");
        Ok(Self {
            config,
            backend,
            routing,
            stores,
            ingestion,
            registry,
            worker,
            scheduler,
        })
    }

    /// Run the worker pool, and the scheduler when enabled, until `shutdown`.
    pub async fn run(&self, shutdown: CancellationToken) {
        if self.config.scheduler.enabled {
            tokio::join!(
                self.worker.run(shutdown.clone()),
                self.scheduler.run(shutdown)
            );
        } else {
            self.worker.run(shutdown).await;
        }
        let stats = self.worker.stats();
        tracing::info!(
            processed = stats.processed,
            succeeded = stats.succeeded,
            retried = stats.retried,
            dead_lettered = stats.dead_lettered,
            "Worker stopped"
        );
    }
}
