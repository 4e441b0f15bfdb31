use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use scratchfs_types::{Result, Status};

/// Trait implemented by RPC service handlers.
///
/// Each service is identified by a numeric `service_id` and exposes methods
/// identified by `method_id`. The handler receives a raw request payload and
/// returns either a raw response payload or a `Status` dispatch error.
/// Operation-level errors belong inside the response payload's `err` field.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    /// Unique numeric identifier for this service.
    fn service_id(&self) -> u16;

    /// Human-readable name for logging.
    fn service_name(&self) -> &str;

    /// Dispatch a method call.
    async fn handle(&self, method_id: u16, request: Bytes) -> Result<Bytes>;
}

/// Registry mapping service IDs to their handlers.
#[derive(Default)]
pub struct ServiceRegistry {
    services: DashMap<u16, Box<dyn ServiceHandler>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service handler, replacing any previous handler with the
    /// same service ID.
    pub fn register(&self, service: Box<dyn ServiceHandler>) {
        let id = service.service_id();
        self.services.insert(id, service);
    }

    /// Look up a service by its ID.
    pub fn get(
        &self,
        service_id: u16,
    ) -> Option<dashmap::mapref::one::Ref<'_, u16, Box<dyn ServiceHandler>>> {
        self.services.get(&service_id)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Convenience for handlers: convert a decode failure into a dispatch
/// error.
pub fn dispatch_error(msg: impl Into<String>) -> Status {
    Status::with_message(scratchfs_types::errno::EINVAL, msg)
}
