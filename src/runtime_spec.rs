//! Minimal view of the OCI runtime spec.
//!
//! Only the pieces the shim needs: the declared namespaces and the
//! user-namespace UID/GID mapping tables used to translate the
//! container's root identity to host ids.

use serde::{Deserialize, Serialize};

/// Namespace type string for a user namespace in an OCI spec.
pub const USER_NAMESPACE: &str = "user";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Spec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linux: Option<Linux>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Linux {
    #[serde(default)]
    pub namespaces: Vec<LinuxNamespace>,
    #[serde(default, rename = "uidMappings")]
    pub uid_mappings: Vec<IdMapping>,
    #[serde(default, rename = "gidMappings")]
    pub gid_mappings: Vec<IdMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinuxNamespace {
    #[serde(rename = "type")]
    pub ns_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// One ordered range mapping a container-side id interval to host ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdMapping {
    #[serde(rename = "containerID")]
    pub container_id: u32,
    #[serde(rename = "hostID")]
    pub host_id: u32,
    pub size: u32,
}

/// Resolve the host UID/GID corresponding to the container's root.
///
/// Without a declared user namespace there is no translation and both
/// results are 0. With one, container id 0 is resolved through the
/// declared mapping tables.
pub fn resolve_root_ids(spec: Option<&Spec>) -> (u32, u32) {
    let Some(linux) = spec.and_then(|s| s.linux.as_ref()) else {
        return (0, 0);
    };
    let has_userns = linux
        .namespaces
        .iter()
        .any(|ns| ns.ns_type == USER_NAMESPACE);
    if !has_userns {
        return (0, 0);
    }
    (
        host_id_from_map(0, &linux.uid_mappings),
        host_id_from_map(0, &linux.gid_mappings),
    )
}

/// Map a container-side id to a host id through ordered range mappings.
///
/// The first entry whose container range contains `id` wins. An unmapped
/// id resolves to 0 (host root) for compatibility with existing
/// runtimes. That default is surprising for a security boundary; callers
/// that want to reject unmapped ids must check the mappings themselves.
pub fn host_id_from_map(id: u32, mappings: &[IdMapping]) -> u32 {
    for m in mappings {
        if m.size > 0 && id >= m.container_id && id - m.container_id < m.size {
            return m.host_id + (id - m.container_id);
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn userns_spec(uid: Vec<IdMapping>, gid: Vec<IdMapping>) -> Spec {
        Spec {
            linux: Some(Linux {
                namespaces: vec![
                    LinuxNamespace {
                        ns_type: "pid".into(),
                        path: None,
                    },
                    LinuxNamespace {
                        ns_type: USER_NAMESPACE.into(),
                        path: None,
                    },
                ],
                uid_mappings: uid,
                gid_mappings: gid,
            }),
        }
    }

    fn mapping(container_id: u32, host_id: u32, size: u32) -> IdMapping {
        IdMapping {
            container_id,
            host_id,
            size,
        }
    }

    #[test]
    fn test_host_id_inside_range() {
        let maps = vec![mapping(0, 1000, 10)];
        assert_eq!(host_id_from_map(5, &maps), 1005);
        assert_eq!(host_id_from_map(0, &maps), 1000);
        assert_eq!(host_id_from_map(9, &maps), 1009);
    }

    #[test]
    fn test_host_id_outside_range_falls_back_to_zero() {
        let maps = vec![mapping(0, 1000, 10)];
        assert_eq!(host_id_from_map(10, &maps), 0);
        assert_eq!(host_id_from_map(20, &maps), 0);
    }

    #[test]
    fn test_host_id_first_matching_entry_wins() {
        let maps = vec![mapping(0, 1000, 5), mapping(0, 2000, 10)];
        assert_eq!(host_id_from_map(3, &maps), 1003);
        // Past the first range, the second applies
        assert_eq!(host_id_from_map(7, &maps), 2007);
    }

    #[test]
    fn test_host_id_empty_mappings() {
        assert_eq!(host_id_from_map(0, &[]), 0);
    }

    #[test]
    fn test_host_id_zero_size_range_never_matches() {
        let maps = vec![mapping(0, 1000, 0)];
        assert_eq!(host_id_from_map(0, &maps), 0);
    }

    #[test]
    fn test_resolve_root_ids_no_spec() {
        assert_eq!(resolve_root_ids(None), (0, 0));
    }

    #[test]
    fn test_resolve_root_ids_no_user_namespace() {
        let spec = Spec {
            linux: Some(Linux {
                namespaces: vec![LinuxNamespace {
                    ns_type: "pid".into(),
                    path: None,
                }],
                uid_mappings: vec![mapping(0, 1000, 10)],
                gid_mappings: vec![mapping(0, 2000, 10)],
            }),
        };
        assert_eq!(resolve_root_ids(Some(&spec)), (0, 0));
    }

    #[test]
    fn test_resolve_root_ids_with_user_namespace() {
        let spec = userns_spec(vec![mapping(0, 1000, 10)], vec![mapping(0, 2000, 10)]);
        assert_eq!(resolve_root_ids(Some(&spec)), (1000, 2000));
    }

    #[test]
    fn test_resolve_root_ids_unmapped_root() {
        let spec = userns_spec(vec![mapping(100, 1000, 10)], vec![]);
        assert_eq!(resolve_root_ids(Some(&spec)), (0, 0));
    }

    #[test]
    fn test_spec_deserializes_oci_field_names() {
        let json = r#"{
            "linux": {
                "namespaces": [{"type": "user"}],
                "uidMappings": [{"containerID": 0, "hostID": 1000, "size": 65536}],
                "gidMappings": [{"containerID": 0, "hostID": 1000, "size": 65536}]
            }
        }"#;
        let spec: Spec = serde_json::from_str(json).unwrap();
        assert_eq!(resolve_root_ids(Some(&spec)), (1000, 1000));
    }
}
