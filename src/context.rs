//! Per-client side-channel context: caller identity and analytics breadcrumbs.
//!
//! Created once with [`ClientContext::init`] and owned by the controller.
//! Breadcrumbs are plain `tracing` events on the `analytics` target and are
//! dropped after [`ClientContext::teardown`].

use crate::model::{JobRequest, UserIdentity};
use crate::storage::SessionStore;
use rand::RngCore;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ClientContext {
    identity: Option<UserIdentity>,
    anon_id: String,
    active: bool,
}

impl ClientContext {
    /// Resolve identity (explicit, else stored) and the anonymous client id.
    pub fn init(identity: Option<UserIdentity>, store: &SessionStore) -> Self {
        let identity = match identity {
            Some(identity) => {
                store.save_identity(&identity);
                Some(identity)
            }
            None => store.read_identity(),
        };
        let anon_id = store.read_anon_id().unwrap_or_else(|| {
            let id = gen_anon_id();
            store.save_anon_id(&id);
            id
        });
        debug!(
            anon_id = %anon_id,
            identified = identity.is_some(),
            "client context initialized"
        );
        Self {
            identity,
            anon_id,
            active: true,
        }
    }

    pub fn identity(&self) -> Option<&UserIdentity> {
        self.identity.as_ref()
    }

    pub fn anon_id(&self) -> &str {
        &self.anon_id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Attach the caller's identity to an outbound request, if known.
    pub fn attach_identity(&self, request: JobRequest) -> JobRequest {
        match self.identity() {
            Some(identity) => request.with_identity(identity),
            None => request,
        }
    }

    pub fn track(&self, event: &str, detail: &str) {
        if !self.is_active() {
            return;
        }
        let distinct_id = self
            .identity()
            .map_or(self.anon_id(), |i| i.user_id.as_str());
        info!(target: "analytics", event, distinct_id, detail, "track");
    }

    pub fn teardown(&mut self) {
        if self.is_active() {
            debug!(anon_id = %self.anon_id(), "client context torn down");
        }
        self.active = false;
    }
}

fn gen_anon_id() -> String {
    let mut b = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut b);
    b.iter().map(|byte| format!("{byte:02x}")).collect()
}
