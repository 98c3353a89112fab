//! Per-session state shared with event listeners.

use crate::action::ActionQueue;
use crate::context::PersistenceContext;
use crate::entity::Metamodel;
use crate::influencers::LoadQueryInfluencers;
use crate::SessionConfig;
use rxsql_core::Connection;
use std::sync::Arc;

/// Everything a listener may read or change while handling an event.
///
/// Owned by the session and lent to listeners for the duration of one
/// dispatch.
#[derive(Debug)]
pub struct SessionState<C: Connection> {
    connection: C,
    context: PersistenceContext,
    actions: ActionQueue,
    influencers: Arc<LoadQueryInfluencers>,
    metamodel: Arc<Metamodel>,
    config: SessionConfig,
}

impl<C: Connection> SessionState<C> {
    pub fn new(connection: C, metamodel: Arc<Metamodel>, config: SessionConfig) -> Self {
        Self {
            connection,
            context: PersistenceContext::new(),
            actions: ActionQueue::new(),
            influencers: Arc::new(LoadQueryInfluencers::new(
                config.cache_mode,
                config.read_only,
            )),
            metamodel,
            config,
        }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn context(&self) -> &PersistenceContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut PersistenceContext {
        &mut self.context
    }

    pub fn actions(&self) -> &ActionQueue {
        &self.actions
    }

    pub fn actions_mut(&mut self) -> &mut ActionQueue {
        &mut self.actions
    }

    pub fn influencers(&self) -> &Arc<LoadQueryInfluencers> {
        &self.influencers
    }

    pub fn metamodel(&self) -> &Arc<Metamodel> {
        &self.metamodel
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Log a statement when `show_sql` is enabled.
    pub fn log_sql(&self, sql: &str) {
        if self.config.show_sql {
            tracing::debug!(sql = %sql, "Executing statement");
        }
    }

    pub fn into_connection(self) -> C {
        self.connection
    }
}
