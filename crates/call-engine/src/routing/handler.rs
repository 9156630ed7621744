//! Event bus handler that drives the call router

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::router::CallRouter;
use crate::error::Result;
use crate::events::{Event, EventHandler, EventPayload};

/// Subscribed by [`CallRouter::attach`]; holds only a weak reference so the
/// bus never keeps a dropped router alive
#[derive(Clone, Debug)]
pub struct RoutingEventHandler {
    pub router: Weak<CallRouter>,
}

#[async_trait]
impl EventHandler for RoutingEventHandler {
    async fn handle(&self, event: Arc<Event>) -> Result<()> {
        let Some(router) = self.router.upgrade() else {
            warn!("Call router has been dropped, ignoring {} event", event.topic);
            return Ok(());
        };
        let correlation_id = event.correlation_id.as_deref();

        match &event.payload {
            EventPayload::CallIncoming {
                call_id,
                caller_id,
                priority,
            } => {
                router
                    .handle_incoming(call_id, caller_id, *priority, correlation_id)
                    .await?;
            }
            EventPayload::AgentBecameAvailable { agent_id } => {
                let assigned = router.handle_agent_available(correlation_id).await?;
                debug!(
                    "Agent {} became available, {} queued calls assigned",
                    agent_id, assigned
                );
            }
            EventPayload::CallResolved { call_id } => {
                router.handle_resolved(call_id, correlation_id).await?;
            }
            EventPayload::CallAbandoned { call_id } => {
                router.handle_abandoned(call_id)?;
            }
            _ => debug!("Call router ignoring {} event", event.topic),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "call_router"
    }
}
