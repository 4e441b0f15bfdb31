//! Registry RPC calls, issued once at startup.

use std::path::Path;

use scratchfs_net::RpcClient;
use scratchfs_proto::registry::{RegisterReq, RegisterRsp, RequestReq, RequestRsp};
use scratchfs_proto::{decode_message, encode_message, ids};
use scratchfs_types::{Result, Status};

/// Register `workflow`'s host manifests with the Registry at `addr`.
pub async fn forward_register_registry(
    rpc: &RpcClient,
    addr: &str,
    workflow: &str,
    host_config_file: &Path,
    host_file: &Path,
) -> Result<()> {
    let req = RegisterReq {
        workflow: workflow.to_string(),
        host_config_file: host_config_file.display().to_string(),
        host_file: host_file.display().to_string(),
    };
    let reply = rpc
        .call(
            addr,
            ids::REGISTRY_SERVICE,
            ids::registry::REGISTER,
            encode_message(&req)?,
        )
        .await?;
    let rsp: RegisterRsp = decode_message(&reply)?;
    if rsp.err != 0 {
        return Err(Status::new(rsp.err));
    }
    Ok(())
}

/// Ask the Registry at `addr` to merge `flow_list` into the output files.
pub async fn forward_request_registry(
    rpc: &RpcClient,
    addr: &str,
    flow_list: &str,
    out_host_config_file: &Path,
    out_host_file: &Path,
) -> Result<()> {
    let req = RequestReq {
        flow_list: flow_list.to_string(),
        out_host_config_file: out_host_config_file.display().to_string(),
        out_host_file: out_host_file.display().to_string(),
    };
    let reply = rpc
        .call(
            addr,
            ids::REGISTRY_SERVICE,
            ids::registry::REQUEST,
            encode_message(&req)?,
        )
        .await?;
    let rsp: RequestRsp = decode_message(&reply)?;
    if rsp.err != 0 {
        return Err(Status::new(rsp.err));
    }
    Ok(())
}
