//! Host files, host-config files and the federated host table.
//!
//! A host file has one line per daemon: `<hostname> <transport_uri>`, where
//! a `#suffix` on the hostname (if any) is stripped. A host-config file has
//! one line per instance: `<host_count> <priority>`. The two are aligned:
//! the host counts must sum to the host-file line count. The registry file
//! is a single line holding the Registry's transport URI.

use std::fs;
use std::path::Path;

use thiserror::Error;

use scratchfs_types::errno;
use scratchfs_types::{Status, TransportUri, UriParseError};

/// One daemon endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub hostname: String,
    pub uri: TransportUri,
}

/// One line of a host-config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceSpec {
    pub host_count: u32,
    pub priority: u32,
}

/// Errors from loading host, host-config or registry files.
#[derive(Debug, Error)]
pub enum HostFileError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed line {line} in {path}: {reason}")]
    Malformed {
        path: String,
        line: usize,
        reason: String,
    },
    #[error("bad transport uri in {path}: {source}")]
    Uri {
        path: String,
        source: UriParseError,
    },
    #[error("host file has {hosts} hosts but host-config sums to {expected}")]
    Misaligned { hosts: usize, expected: usize },
    #[error("{path} is empty")]
    Empty { path: String },
}

impl From<HostFileError> for Status {
    fn from(e: HostFileError) -> Self {
        Status::with_message(errno::EINVAL, e.to_string())
    }
}

fn io_err(path: &Path, source: std::io::Error) -> HostFileError {
    HostFileError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Load a host file. Blank lines are skipped; `#suffix` on the hostname is
/// stripped.
pub fn load_host_file(path: &Path) -> Result<Vec<Endpoint>, HostFileError> {
    let contents = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let mut endpoints = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (hostname, uri) = line.split_once(char::is_whitespace).ok_or_else(|| {
            HostFileError::Malformed {
                path: path.display().to_string(),
                line: lineno + 1,
                reason: "expected `<hostname> <uri>`".to_string(),
            }
        })?;
        let hostname = match hostname.rfind('#') {
            Some(idx) => &hostname[..idx],
            None => hostname,
        };
        let uri = uri
            .trim()
            .parse::<TransportUri>()
            .map_err(|source| HostFileError::Uri {
                path: path.display().to_string(),
                source,
            })?;
        endpoints.push(Endpoint {
            hostname: hostname.to_string(),
            uri,
        });
    }
    Ok(endpoints)
}

/// Write a host file, one `<hostname> <uri>` line per endpoint.
pub fn write_host_file(path: &Path, endpoints: &[Endpoint]) -> Result<(), HostFileError> {
    let mut out = String::new();
    for ep in endpoints {
        out.push_str(&format!("{} {}\n", ep.hostname, ep.uri));
    }
    fs::write(path, out).map_err(|e| io_err(path, e))
}

/// Load a host-config file: one `<host_count> <priority>` line per instance.
pub fn load_host_config_file(path: &Path) -> Result<Vec<InstanceSpec>, HostFileError> {
    let contents = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let mut specs = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let malformed = |reason: &str| HostFileError::Malformed {
            path: path.display().to_string(),
            line: lineno + 1,
            reason: reason.to_string(),
        };
        let (count, priority) = line
            .split_once(char::is_whitespace)
            .ok_or_else(|| malformed("expected `<host_count> <priority>`"))?;
        let host_count = count
            .parse::<u32>()
            .map_err(|_| malformed("bad host count"))?;
        let priority = priority
            .trim()
            .parse::<u32>()
            .map_err(|_| malformed("bad priority"))?;
        specs.push(InstanceSpec {
            host_count,
            priority,
        });
    }
    Ok(specs)
}

/// Write a host-config file.
pub fn write_host_config_file(path: &Path, specs: &[InstanceSpec]) -> Result<(), HostFileError> {
    let mut out = String::new();
    for spec in specs {
        out.push_str(&format!("{} {}\n", spec.host_count, spec.priority));
    }
    fs::write(path, out).map_err(|e| io_err(path, e))
}

/// Read the registry file: a single line with the Registry's URI.
pub fn read_registry_file(path: &Path) -> Result<TransportUri, HostFileError> {
    let contents = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let line = contents
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| HostFileError::Empty {
            path: path.display().to_string(),
        })?;
    line.parse::<TransportUri>()
        .map_err(|source| HostFileError::Uri {
            path: path.display().to_string(),
            source,
        })
}

/// Write the registry file.
pub fn write_registry_file(path: &Path, uri: &TransportUri) -> Result<(), HostFileError> {
    fs::write(path, format!("{uri}\n")).map_err(|e| io_err(path, e))
}

/// The federated host table: every daemon of every instance, in priority
/// order, with the instance boundaries carried separately.
///
/// Built once at startup and read-only afterwards; global daemon indices
/// are stable for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct HostTable {
    endpoints: Vec<Endpoint>,
    instance_sizes: Vec<u32>,
    priorities: Vec<u32>,
    /// `offsets[i]` is the global index of instance `i`'s first daemon.
    offsets: Vec<usize>,
}

impl HostTable {
    /// Build a table from aligned host and host-config data.
    pub fn new(
        endpoints: Vec<Endpoint>,
        specs: &[InstanceSpec],
    ) -> Result<Self, HostFileError> {
        let expected: usize = specs.iter().map(|s| s.host_count as usize).sum();
        if expected != endpoints.len() {
            return Err(HostFileError::Misaligned {
                hosts: endpoints.len(),
                expected,
            });
        }
        let mut offsets = Vec::with_capacity(specs.len());
        let mut acc = 0usize;
        for spec in specs {
            offsets.push(acc);
            acc += spec.host_count as usize;
        }
        Ok(Self {
            endpoints,
            instance_sizes: specs.iter().map(|s| s.host_count).collect(),
            priorities: specs.iter().map(|s| s.priority).collect(),
            offsets,
        })
    }

    /// A table holding one instance covering every endpoint, priority 1.
    pub fn single_instance(endpoints: Vec<Endpoint>) -> Self {
        let n = endpoints.len() as u32;
        Self::new(
            endpoints,
            &[InstanceSpec {
                host_count: n,
                priority: 1,
            }],
        )
        .expect("single instance is always aligned")
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoint(&self, global_idx: usize) -> &Endpoint {
        &self.endpoints[global_idx]
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn instance_count(&self) -> usize {
        self.instance_sizes.len()
    }

    pub fn is_single_instance(&self) -> bool {
        self.instance_count() == 1
    }

    /// Number of daemons in instance `i`.
    pub fn instance_size(&self, i: usize) -> u32 {
        self.instance_sizes[i]
    }

    pub fn priority(&self, i: usize) -> u32 {
        self.priorities[i]
    }

    /// Global index of instance `i`'s first daemon.
    pub fn instance_offset(&self, i: usize) -> usize {
        self.offsets[i]
    }

    /// Global index range of instance `i`'s daemons.
    pub fn instance_range(&self, i: usize) -> std::ops::Range<usize> {
        let start = self.offsets[i];
        start..start + self.instance_sizes[i] as usize
    }
}
