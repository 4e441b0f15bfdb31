//! Registry RPC handlers.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

use scratchfs_net::ServiceHandler;
use scratchfs_net::service::dispatch_error;
use scratchfs_proto::registry::{RegisterReq, RegisterRsp, RequestReq, RequestRsp};
use scratchfs_proto::{decode_message, encode_message, ids};
use scratchfs_types::Result;

use crate::merge::merge_workflows;
use crate::state::{RegistryState, WorkflowManifest};

/// Dispatches the registry service methods into [`RegistryState`] and the
/// manifest merge.
pub struct RegistryService {
    state: Arc<RegistryState>,
}

impl RegistryService {
    pub fn new(state: Arc<RegistryState>) -> Self {
        Self { state }
    }

    fn register(&self, req: RegisterReq) -> RegisterRsp {
        info!(
            workflow = %req.workflow,
            host_file = %req.host_file,
            "registering workflow"
        );
        self.state.register(
            req.workflow,
            WorkflowManifest {
                host_config_file: req.host_config_file,
                host_file: req.host_file,
            },
        );
        RegisterRsp { err: 0 }
    }

    fn request(&self, req: RequestReq) -> RequestRsp {
        debug!(flows = %req.flow_list, "merging workflows");
        let err = merge_workflows(
            &self.state,
            &req.flow_list,
            Path::new(&req.out_host_config_file),
            Path::new(&req.out_host_file),
        )
        .err()
        .map_or(0, |e| e.code());
        RequestRsp { err }
    }
}

#[async_trait]
impl ServiceHandler for RegistryService {
    fn service_id(&self) -> u16 {
        ids::REGISTRY_SERVICE
    }

    fn service_name(&self) -> &str {
        "registry"
    }

    async fn handle(&self, method_id: u16, request: Bytes) -> Result<Bytes> {
        match method_id {
            ids::registry::REGISTER => encode_message(&self.register(decode_message(&request)?)),
            ids::registry::REQUEST => encode_message(&self.request(decode_message(&request)?)),
            other => Err(dispatch_error(format!(
                "registry service has no method {other}"
            ))),
        }
    }
}
