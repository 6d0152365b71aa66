//! Actor lookup for initiator cross-checks

use async_trait::async_trait;
use guardrails_policy::PolicyActor;
use guardrails_types::ActorId;
use std::collections::HashMap;
use std::sync::Arc;

/// Resolves stored actor ids back into policy actors.
///
/// Only needed for rules comparing a signer with the initiator of a request;
/// without a directory those checks are skipped.
#[async_trait]
pub trait ActorDirectory: Send + Sync {
    async fn find(&self, actor_id: &ActorId) -> Option<Arc<dyn PolicyActor>>;
}

/// Fixed set of actors
#[derive(Default)]
pub struct InMemoryDirectory {
    actors: HashMap<ActorId, Arc<dyn PolicyActor>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_actor(mut self, actor: impl PolicyActor + 'static) -> Self {
        let actor: Arc<dyn PolicyActor> = Arc::new(actor);
        self.actors.insert(actor.actor_id().clone(), actor);
        self
    }
}

#[async_trait]
impl ActorDirectory for InMemoryDirectory {
    async fn find(&self, actor_id: &ActorId) -> Option<Arc<dyn PolicyActor>> {
        self.actors.get(actor_id).cloned()
    }
}
