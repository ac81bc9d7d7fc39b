//! Readiness tracking for chart stores. Queries obtained through a
//! [`ChartSession`] wait until ingestion has published every store they
//! need.

use std::sync::Arc;

use tokio::sync::{Notify, OnceCell};

use crate::config::ChartSettings;
use crate::error::{ChartError, Result};
use crate::models::ChartKind;
use crate::repository::{AlbumCatalog, ChartLibrary, ChartRepository, ChartStore};

/// A value that is published once and awaited by any number of readers.
/// The gate may instead settle to a failure, which every reader then sees.
#[derive(Debug)]
pub struct ReadinessGate<T> {
    value: OnceCell<std::result::Result<T, Arc<ChartError>>>,
    notify: Notify,
}

impl<T> Default for ReadinessGate<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReadinessGate<T> {
    pub fn new() -> Self {
        Self {
            value: OnceCell::new(),
            notify: Notify::new(),
        }
    }

    fn settle(&self, outcome: std::result::Result<T, Arc<ChartError>>) -> bool {
        if self.value.set(outcome).is_err() {
            return false;
        }
        self.notify.notify_waiters();
        true
    }

    /// Publishes `value`. A gate settles once; returns false when it already had.
    pub fn open(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Settles the gate to `error`. Returns false when it already had.
    pub fn fail(&self, error: Arc<ChartError>) -> bool {
        self.settle(Err(error))
    }

    pub fn get(&self) -> Option<&T> {
        self.value.get().and_then(|outcome| outcome.as_ref().ok())
    }

    pub fn is_open(&self) -> bool {
        self.get().is_some()
    }

    pub fn is_settled(&self) -> bool {
        self.value.initialized()
    }

    /// Waits until the gate settles.
    pub async fn wait(&self) -> std::result::Result<&T, Arc<ChartError>> {
        loop {
            // Register before checking so a settle() in between is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.value.get() {
                return outcome.as_ref().map_err(Arc::clone);
            }
            notified.await;
        }
    }
}

/// One ingestion run: a gate per chart kind plus the album catalog shared
/// by every repository.
#[derive(Debug)]
pub struct ChartSession {
    settings: ChartSettings,
    catalog: Arc<AlbumCatalog>,
    tracks: ReadinessGate<Arc<ChartRepository>>,
    albums: ReadinessGate<Arc<ChartRepository>>,
    artists: ReadinessGate<Arc<ChartRepository>>,
    library: OnceCell<Arc<ChartLibrary>>,
}

impl ChartSession {
    pub fn new(settings: ChartSettings) -> Self {
        Self::with_catalog(settings, Arc::new(AlbumCatalog::new()))
    }

    pub fn with_catalog(settings: ChartSettings, catalog: Arc<AlbumCatalog>) -> Self {
        Self {
            settings,
            catalog,
            tracks: ReadinessGate::new(),
            albums: ReadinessGate::new(),
            artists: ReadinessGate::new(),
            library: OnceCell::new(),
        }
    }

    fn gate(&self, kind: ChartKind) -> &ReadinessGate<Arc<ChartRepository>> {
        match kind {
            ChartKind::Track => &self.tracks,
            ChartKind::Album => &self.albums,
            ChartKind::Artist => &self.artists,
        }
    }

    pub fn catalog(&self) -> &Arc<AlbumCatalog> {
        &self.catalog
    }

    /// Makes `store` queryable. Each kind settles once.
    pub fn publish(&self, store: ChartStore) -> Result<Arc<ChartRepository>> {
        let kind = store.kind();
        let snapshots = store.len();
        let repository = Arc::new(ChartRepository::new(store, self.settings.clone()));
        if !self.gate(kind).open(Arc::clone(&repository)) {
            return Err(ChartError::AlreadyPublished(kind));
        }
        tracing::info!(%kind, snapshots, "charts published");
        Ok(repository)
    }

    /// Marks `kind` as failed so its waiters stop waiting. Returns the error
    /// every waiter receives.
    pub fn fail(&self, kind: ChartKind, error: ChartError) -> ChartError {
        let source = Arc::new(error);
        if self.gate(kind).fail(Arc::clone(&source)) {
            tracing::error!(%kind, error = %source, "chart ingestion failed");
        }
        ChartError::IngestionFailed { kind, source }
    }

    pub fn is_ready(&self, kind: ChartKind) -> bool {
        self.gate(kind).is_open()
    }

    /// The repository for `kind`, once it has been published.
    pub async fn repository(&self, kind: ChartKind) -> Result<Arc<ChartRepository>> {
        self.gate(kind)
            .wait()
            .await
            .map(Arc::clone)
            .map_err(|source| ChartError::IngestionFailed { kind, source })
    }

    /// The cross-kind library, once all three kinds have been published.
    pub async fn library(&self) -> Result<Arc<ChartLibrary>> {
        let library = self
            .library
            .get_or_try_init(|| async {
                let (tracks, albums, artists) = tokio::join!(
                    self.repository(ChartKind::Track),
                    self.repository(ChartKind::Album),
                    self.repository(ChartKind::Artist)
                );
                Ok::<_, ChartError>(Arc::new(ChartLibrary::new(tracks?, albums?, artists?, Arc::clone(&self.catalog))))
            })
            .await?;
        Ok(Arc::clone(library))
    }
}
