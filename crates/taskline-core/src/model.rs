//! The engine handle: a store plus the collaborators every entry point needs.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::ids::IdSource;
use crate::receiver::{ReceiverResolver, StoreReceivers};
use crate::store::Store;
use crate::version::Version;

/// Cheap to clone and safe to share between threads; every entry point runs
/// to completion on the calling thread.
#[derive(Clone)]
pub struct Model {
    store: Arc<Store>,
    receivers: Arc<dyn ReceiverResolver>,
    ids: Arc<dyn IdSource>,
    clock: Arc<dyn Clock>,
    agent_version: Version,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("store", &self.store)
            .field("agent_version", &self.agent_version)
            .finish_non_exhaustive()
    }
}

impl Model {
    /// A model whose receivers, sequences and clock all come from `store` and
    /// the system.
    pub fn new(store: Arc<Store>, agent_version: Version) -> Self {
        Self {
            receivers: Arc::new(StoreReceivers::new(store.clone())),
            ids: store.clone(),
            clock: Arc::new(SystemClock),
            store,
            agent_version,
        }
    }

    /// Open the store named by `config` and build a model on it.
    pub fn open(config: &Config) -> Result<Self> {
        let store = Store::open(&config.store_path, config.store_options())?;
        Ok(Self::new(Arc::new(store), config.agent_version))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_receivers(mut self, receivers: Arc<dyn ReceiverResolver>) -> Self {
        self.receivers = receivers;
        self
    }

    pub fn with_id_source(mut self, ids: Arc<dyn IdSource>) -> Self {
        self.ids = ids;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn agent_version(&self) -> Version {
        self.agent_version
    }

    /// Receiver registry backed by this model's store.
    pub fn store_receivers(&self) -> StoreReceivers {
        StoreReceivers::new(self.store.clone())
    }

    pub(crate) fn receivers(&self) -> &dyn ReceiverResolver {
        self.receivers.as_ref()
    }

    pub(crate) fn ids(&self) -> &dyn IdSource {
        self.ids.as_ref()
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }
}
