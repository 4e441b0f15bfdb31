//! Folding per-workflow manifests into one federated manifest.

use std::collections::HashSet;
use std::path::Path;

use tracing::warn;

use scratchfs_placement::hosts::{
    Endpoint, InstanceSpec, load_host_config_file, load_host_file, write_host_config_file,
    write_host_file,
};
use scratchfs_types::Result;

use crate::state::RegistryState;

/// One instance of one workflow, keyed for the priority fold.
struct Candidate {
    /// `(position of the workflow in the request, original priority)`;
    /// lexicographically lower wins.
    key: (usize, u32),
    endpoints: Vec<Endpoint>,
}

/// Merge the workflows named in `flow_list` (semicolon-separated, in
/// priority order) and write the federated host and host-config files.
///
/// Workflow names missing from the registry are skipped with a log line.
/// Daemon URIs appearing in several workflows are emitted once, owned by
/// the earlier-keyed instance. An empty union writes empty files; rejecting
/// that is the caller's policy.
pub fn merge_workflows(
    state: &RegistryState,
    flow_list: &str,
    out_host_config_file: &Path,
    out_host_file: &Path,
) -> Result<()> {
    let mut candidates = Vec::new();

    for (position, name) in flow_list
        .split(';')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .enumerate()
    {
        let Some(manifest) = state.get(name) else {
            warn!(workflow = name, "requested workflow is not registered, skipping");
            continue;
        };
        let specs = load_host_config_file(Path::new(&manifest.host_config_file))?;
        let endpoints = load_host_file(Path::new(&manifest.host_file))?;

        // Slice the flat host list into its instances. Hosts left over
        // past the declared counts belong to the workflow's last instance.
        let mut cursor = 0usize;
        let spec_count = specs.len();
        for (i, spec) in specs.into_iter().enumerate() {
            let end = if i + 1 == spec_count {
                if cursor + (spec.host_count as usize) < endpoints.len() {
                    warn!(
                        workflow = name,
                        "host-config counts fall short of the host file, \
                         attaching the remainder to the last instance"
                    );
                }
                endpoints.len()
            } else {
                (cursor + spec.host_count as usize).min(endpoints.len())
            };
            candidates.push(Candidate {
                key: (position, spec.priority),
                endpoints: endpoints[cursor..end].to_vec(),
            });
            cursor = end;
        }
    }

    candidates.sort_by_key(|c| c.key);

    let mut seen: HashSet<String> = HashSet::new();
    let mut merged_endpoints = Vec::new();
    let mut merged_specs = Vec::new();
    for candidate in candidates {
        let fresh: Vec<Endpoint> = candidate
            .endpoints
            .into_iter()
            .filter(|ep| seen.insert(ep.uri.to_string()))
            .collect();
        if fresh.is_empty() {
            // Every daemon of this instance already belongs to an
            // earlier-keyed one.
            continue;
        }
        merged_specs.push(InstanceSpec {
            host_count: fresh.len() as u32,
            priority: merged_specs.len() as u32 + 1,
        });
        merged_endpoints.extend(fresh);
    }

    write_host_file(out_host_file, &merged_endpoints)?;
    write_host_config_file(out_host_config_file, &merged_specs)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::WorkflowManifest;
    use std::fs;
    use tempfile::TempDir;

    fn write_workflow(
        dir: &TempDir,
        state: &RegistryState,
        name: &str,
        specs: &[(u32, u32)],
        uris: &[&str],
    ) {
        let hc = dir.path().join(format!("{name}.cfg"));
        let hf = dir.path().join(format!("{name}.hosts"));
        let mut cfg = String::new();
        for (count, priority) in specs {
            cfg.push_str(&format!("{count} {priority}\n"));
        }
        fs::write(&hc, cfg).unwrap();
        let mut hosts = String::new();
        for (i, uri) in uris.iter().enumerate() {
            hosts.push_str(&format!("host{i} {uri}\n"));
        }
        fs::write(&hf, hosts).unwrap();
        state.register(
            name,
            WorkflowManifest {
                host_config_file: hc.display().to_string(),
                host_file: hf.display().to_string(),
            },
        );
    }

    fn read_uris(path: &Path) -> Vec<String> {
        load_host_file(path)
            .unwrap()
            .into_iter()
            .map(|ep| ep.uri.to_string())
            .collect()
    }

    #[test]
    fn test_merge_dedups_and_orders() {
        let dir = TempDir::new().unwrap();
        let state = RegistryState::new();
        write_workflow(
            &dir,
            &state,
            "W1",
            &[(2, 1)],
            &[
                "ofi+sockets://10.0.0.1:5000",
                "ofi+sockets://10.0.0.2:5000",
            ],
        );
        write_workflow(
            &dir,
            &state,
            "W2",
            &[(1, 1)],
            &["ofi+sockets://10.0.0.2:5000"],
        );
        write_workflow(
            &dir,
            &state,
            "W2b",
            &[(1, 1)],
            &["ofi+sockets://10.0.0.3:5000"],
        );

        let out_hc = dir.path().join("out.cfg");
        let out_hf = dir.path().join("out.hosts");
        merge_workflows(&state, "W1;W2;W2b", &out_hc, &out_hf).unwrap();

        assert_eq!(
            read_uris(&out_hf),
            vec![
                "ofi+sockets://10.0.0.1:5000",
                "ofi+sockets://10.0.0.2:5000",
                "ofi+sockets://10.0.0.3:5000",
            ]
        );
        let specs = load_host_config_file(&out_hc).unwrap();
        // W2's only daemon deduplicated away entirely; W2b became the
        // second instance with assigned priority 2.
        assert_eq!(
            specs,
            vec![
                InstanceSpec {
                    host_count: 2,
                    priority: 1
                },
                InstanceSpec {
                    host_count: 1,
                    priority: 2
                },
            ]
        );
    }

    #[test]
    fn test_merge_respects_original_priority_within_workflow() {
        let dir = TempDir::new().unwrap();
        let state = RegistryState::new();
        // One workflow, two instances with inverted priorities: the
        // priority-1 instance (listed second in the file) must come first.
        write_workflow(
            &dir,
            &state,
            "W",
            &[(1, 2), (1, 1)],
            &[
                "ofi+sockets://10.0.0.1:5000",
                "ofi+sockets://10.0.0.2:5000",
            ],
        );

        let out_hc = dir.path().join("out.cfg");
        let out_hf = dir.path().join("out.hosts");
        merge_workflows(&state, "W", &out_hc, &out_hf).unwrap();

        assert_eq!(
            read_uris(&out_hf),
            vec![
                "ofi+sockets://10.0.0.2:5000",
                "ofi+sockets://10.0.0.1:5000",
            ]
        );
    }

    #[test]
    fn test_merge_with_short_host_config_counts() {
        // W1 = two daemons, one instance; W2's host-config declares one
        // host but its host file carries two, the first shared with W1.
        let dir = TempDir::new().unwrap();
        let state = RegistryState::new();
        write_workflow(
            &dir,
            &state,
            "W1",
            &[(2, 1)],
            &[
                "ofi+sockets://10.0.0.1:5000",
                "ofi+sockets://10.0.0.2:5000",
            ],
        );
        write_workflow(
            &dir,
            &state,
            "W2",
            &[(1, 1)],
            &[
                "ofi+sockets://10.0.0.2:5000",
                "ofi+sockets://10.0.0.3:5000",
            ],
        );

        let out_hc = dir.path().join("out.cfg");
        let out_hf = dir.path().join("out.hosts");
        merge_workflows(&state, "W1;W2", &out_hc, &out_hf).unwrap();

        assert_eq!(
            read_uris(&out_hf),
            vec![
                "ofi+sockets://10.0.0.1:5000",
                "ofi+sockets://10.0.0.2:5000",
                "ofi+sockets://10.0.0.3:5000",
            ]
        );
        assert_eq!(
            load_host_config_file(&out_hc).unwrap(),
            vec![
                InstanceSpec {
                    host_count: 2,
                    priority: 1
                },
                InstanceSpec {
                    host_count: 1,
                    priority: 2
                },
            ]
        );
    }

    #[test]
    fn test_unknown_workflow_skipped() {
        let dir = TempDir::new().unwrap();
        let state = RegistryState::new();
        write_workflow(
            &dir,
            &state,
            "W1",
            &[(1, 1)],
            &["ofi+sockets://10.0.0.1:5000"],
        );

        let out_hc = dir.path().join("out.cfg");
        let out_hf = dir.path().join("out.hosts");
        merge_workflows(&state, "W1;NOPE", &out_hc, &out_hf).unwrap();
        assert_eq!(read_uris(&out_hf).len(), 1);
    }

    #[test]
    fn test_empty_union_writes_empty_files() {
        let dir = TempDir::new().unwrap();
        let state = RegistryState::new();
        let out_hc = dir.path().join("out.cfg");
        let out_hf = dir.path().join("out.hosts");
        merge_workflows(&state, "GHOST", &out_hc, &out_hf).unwrap();
        assert!(read_uris(&out_hf).is_empty());
        assert!(load_host_config_file(&out_hc).unwrap().is_empty());
    }
}
