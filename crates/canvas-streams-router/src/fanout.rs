//! Fan-out of independent sessions over their own transports.
//!
//! "Fill every empty cell of this matrix" launches one request per cell;
//! the cells are related (one group, one aggregate stop control) but each
//! owns its transport, so a member can be hard-cancelled or fail without
//! touching its siblings.

use std::sync::Arc;

use canvas_streams_core::{ContentSink, Producer};
use canvas_streams_session::{RegisterOptions, SessionId, SessionRegistry};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use uuid::Uuid;

use crate::driver::{DriverConfig, SessionDriver, SessionOutcome, SessionStatus};

/// One unit of work in a fan-out batch.
pub struct FanoutUnit {
    /// Session id; generated (UUID v4) when absent.
    pub id: Option<SessionId>,
    /// Owning feature, for diagnostics.
    pub tag: String,
    /// The unit's own transport.
    pub producer: Arc<dyn Producer>,
}

impl FanoutUnit {
    /// Unit with a caller-chosen id (a matrix cell key, a node id).
    #[must_use]
    pub fn new(id: impl Into<SessionId>, tag: impl Into<String>, producer: Arc<dyn Producer>) -> Self {
        Self {
            id: Some(id.into()),
            tag: tag.into(),
            producer,
        }
    }

    /// Unit with a generated id.
    #[must_use]
    pub fn anonymous(tag: impl Into<String>, producer: Arc<dyn Producer>) -> Self {
        Self {
            id: None,
            tag: tag.into(),
            producer,
        }
    }
}

/// All-settled result of a fan-out batch.
#[derive(Debug, Clone)]
pub struct FanoutReport {
    /// Group the batch ran under.
    pub group: String,
    /// Per-unit outcomes, sorted by session id.
    pub outcomes: Vec<SessionOutcome>,
}

impl FanoutReport {
    /// Number of units that failed.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == SessionStatus::Failed)
            .count()
    }

    /// Whether every unit finished cleanly.
    #[must_use]
    pub fn all_done(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.status == SessionStatus::Done)
    }
}

/// Launches N independent sessions concurrently and aggregates their
/// outcomes without letting one failure cancel the others.
pub struct FanoutCoordinator {
    registry: Arc<SessionRegistry>,
    sink: Arc<dyn ContentSink>,
    config: DriverConfig,
}

impl FanoutCoordinator {
    /// Create a coordinator with the default driver dispatch table.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, sink: Arc<dyn ContentSink>) -> Self {
        Self {
            registry,
            sink,
            config: DriverConfig::default(),
        }
    }

    /// Create a coordinator with an explicit driver configuration.
    #[must_use]
    pub fn with_config(
        registry: Arc<SessionRegistry>,
        sink: Arc<dyn ContentSink>,
        config: DriverConfig,
    ) -> Self {
        Self {
            registry,
            sink,
            config,
        }
    }

    /// Run a batch under `group` and wait for every unit to settle.
    ///
    /// Every unit is registered (with its own cancellation token) before
    /// any launch, so the group's aggregate affordance appears once, with
    /// the first registration. The join is all-settled: completions arrive
    /// in whatever order the network finishes, failures are recorded per
    /// unit, and nothing short-circuits the batch.
    pub async fn run(&self, group: &str, units: Vec<FanoutUnit>) -> FanoutReport {
        let mut launches = Vec::with_capacity(units.len());
        for unit in units {
            let id = unit
                .id
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            self.registry.register(
                id.clone(),
                RegisterOptions::tagged(unit.tag)
                    .with_group(group)
                    .with_cancel(CancellationToken::new()),
            );
            launches.push((id, unit.producer));
        }
        debug!(group = %group, units = launches.len(), "fan-out launched");

        let mut join_set = JoinSet::new();
        for (id, producer) in launches {
            let driver = SessionDriver::with_config(
                Arc::clone(&self.registry),
                Arc::clone(&self.sink),
                self.config.clone(),
            );
            join_set.spawn(async move { driver.drive(&id, producer.as_ref()).await });
        }

        let mut outcomes = Vec::with_capacity(join_set.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                // A panicked unit loses its outcome but not the batch.
                Err(e) => error!(group = %group, error = %e, "fan-out unit panicked"),
            }
        }
        outcomes.sort_by(|a, b| a.id.cmp(&b.id));

        FanoutReport {
            group: group.to_string(),
            outcomes,
        }
    }
}
