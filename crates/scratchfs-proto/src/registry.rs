//! Registry service RPC types.

use serde::{Deserialize, Serialize};

/// Associate a workflow name with its host manifest files.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegisterReq {
    pub workflow: String,
    pub host_config_file: String,
    pub host_file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegisterRsp {
    pub err: i32,
}

/// Merge the named workflows into a federated manifest.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestReq {
    /// Semicolon-separated workflow names, in priority order.
    pub flow_list: String,
    pub out_host_config_file: String,
    pub out_host_file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestRsp {
    pub err: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{decode_message, encode_message};

    #[test]
    fn test_register_roundtrip() {
        let req = RegisterReq {
            workflow: "W1".into(),
            host_config_file: "/tmp/w1.cfg".into(),
            host_file: "/tmp/w1.hosts".into(),
        };
        let back: RegisterReq = decode_message(&encode_message(&req).unwrap()).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn test_request_roundtrip() {
        let req = RequestReq {
            flow_list: "W1;W2".into(),
            out_host_config_file: "/tmp/fed.cfg".into(),
            out_host_file: "/tmp/fed.hosts".into(),
        };
        let back: RequestReq = decode_message(&encode_message(&req).unwrap()).unwrap();
        assert_eq!(back, req);
    }
}
