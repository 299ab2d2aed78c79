use conductor_checkpoint::{machine_id, CheckpointStore};
use conductor_providers::{Estimator, HeuristicTokenCounter, ProviderRouter};
use std::sync::Arc;

/// Everything a planner or executor needs, built once and shared by `Arc`.
pub struct EngineContext {
    /// Provider selection and calls.
    pub router: Arc<ProviderRouter>,
    /// Token and cost estimates for planning.
    pub estimator: Estimator,
    /// `None` disables checkpointing for every run.
    pub checkpoints: Option<Arc<dyn CheckpointStore>>,
    /// Host identity mixed into checkpoint fingerprints.
    pub machine_id: String,
    /// Opaque context text prepended to every phase prompt.
    pub memory: Option<String>,
}

impl EngineContext {
    /// A context over `router` with the heuristic token counter, the
    /// configured output ratio and this host's machine id.
    pub fn new(router: Arc<ProviderRouter>) -> Self {
        let ratio = router.config().output_ratio;
        Self {
            router,
            estimator: Estimator::new(Arc::new(HeuristicTokenCounter), ratio),
            checkpoints: None,
            machine_id: machine_id(),
            memory: None,
        }
    }

    /// Enable checkpointing through `store`.
    pub fn with_checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Replace the default estimator.
    pub fn with_estimator(mut self, estimator: Estimator) -> Self {
        self.estimator = estimator;
        self
    }

    /// Override the host name used in fingerprints.
    pub fn with_machine_id(mut self, machine_id: impl Into<String>) -> Self {
        self.machine_id = machine_id.into();
        self
    }

    /// Prepend `memory` to every phase prompt.
    pub fn with_memory(mut self, memory: impl Into<String>) -> Self {
        self.memory = Some(memory.into());
        self
    }

    /// The memory prefix, if any.
    pub fn memory(&self) -> Option<&str> {
        self.memory.as_deref()
    }
}
