//! Process-wide shared state
//!
//! Initialised once at startup, shared by every session task and the two
//! long-running loops, and never torn down before process exit.

use std::sync::Arc;

use webrtc::api::API;

use gridvoice_transport::{build_api, RtcConfig};

use crate::error::ServerError;
use crate::levels::LevelRegistry;
use crate::registry::PlayerRegistry;
use crate::router::SpatialRouter;
use crate::storage::IdentityStore;

pub struct ServerState {
    pub registry: PlayerRegistry,
    pub levels: LevelRegistry,
    pub store: IdentityStore,
    pub router: SpatialRouter,
    pub api: API,
    pub rtc: RtcConfig,
}

impl ServerState {
    pub fn new(
        levels: LevelRegistry,
        store: IdentityStore,
        rtc: RtcConfig,
    ) -> Result<Arc<Self>, ServerError> {
        Ok(Arc::new(Self {
            registry: PlayerRegistry::new(),
            levels,
            store,
            router: SpatialRouter::new(),
            api: build_api()?,
            rtc,
        }))
    }
}
