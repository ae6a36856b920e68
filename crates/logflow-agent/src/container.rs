//! Container-runtime metadata injection.
//!
//! The container manager hands the agent an array of container descriptions
//! (identity, mount table, overlay upper dir, runtime log path, metadata and
//! tags). Descriptions written by older managers carry no `MetaDatas` field;
//! on that legacy path every `Tags` entry stays a plain tag, while newer
//! descriptions promote the well-known key set into typed metadata.

use std::collections::HashMap;

use serde_json::Value;
use tracing::info;

use crate::config::ConfigError;

/// Well-known metadata keys promoted out of the tag list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContainerMetaKey {
    ImageName,
    ContainerName,
    PodName,
    Namespace,
    PodUid,
    ContainerIp,
}

impl ContainerMetaKey {
    #[must_use]
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "_image_name_" => Some(ContainerMetaKey::ImageName),
            "_container_name_" => Some(ContainerMetaKey::ContainerName),
            "_pod_name_" => Some(ContainerMetaKey::PodName),
            "_namespace_" => Some(ContainerMetaKey::Namespace),
            "_pod_uid_" => Some(ContainerMetaKey::PodUid),
            "_container_ip_" => Some(ContainerMetaKey::ContainerIp),
            _ => None,
        }
    }

    /// Tag key used when metadata is emitted on events.
    #[must_use]
    pub fn tag_key(self) -> &'static str {
        match self {
            ContainerMetaKey::ImageName => "_image_name_",
            ContainerMetaKey::ContainerName => "_container_name_",
            ContainerMetaKey::PodName => "_pod_name_",
            ContainerMetaKey::Namespace => "_namespace_",
            ContainerMetaKey::PodUid => "_pod_uid_",
            ContainerMetaKey::ContainerIp => "_container_ip_",
        }
    }
}

/// One mount of a container: host source and in-container destination.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContainerMount {
    pub source: String,
    pub destination: String,
}

/// Description of one container consumed by the file discovery layer.
#[derive(Clone, Debug, Default)]
pub struct ContainerInfo {
    pub id: String,
    pub mounts: Vec<ContainerMount>,
    pub upper_dir: String,
    pub log_path: String,
    /// Base directory recovered from a checkpoint, if present.
    pub real_base_dir: String,
    pub metadatas: Vec<(ContainerMetaKey, String)>,
    pub custom_metadatas: Vec<(String, String)>,
    pub tags: Vec<(String, String)>,
}

impl ContainerInfo {
    /// Parses the full injection payload into a map keyed by container id.
    pub fn parse_all(params: &Value) -> Result<HashMap<String, ContainerInfo>, ConfigError> {
        let mut map = HashMap::new();
        // a null payload means "no containers", not an error
        if params.is_null() {
            return Ok(map);
        }
        let Some(entries) = params.as_array() else {
            return Err(ConfigError::InvalidContainerInfo(format!(
                "param is not of type array, param: {params}"
            )));
        };
        for entry in entries {
            let info = Self::parse(entry)
                .map_err(|e| ConfigError::InvalidContainerInfo(format!(
                    "some container info is invalid: {e}"
                )))?;
            map.insert(info.id.clone(), info);
        }
        Ok(map)
    }

    /// Parses one container description.
    pub fn parse(params: &Value) -> Result<ContainerInfo, String> {
        let mut info = ContainerInfo::default();
        let legacy = params.get("MetaDatas").is_none();

        match params.get("ID").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => info.id = id.to_string(),
            Some(_) => return Err(format!("container id is empty, param: {params}")),
            None => {}
        }

        if let Some(mounts) = params.get("Mounts").and_then(Value::as_array) {
            for mount in mounts {
                if let (Some(source), Some(destination)) = (
                    mount.get("Source").and_then(Value::as_str),
                    mount.get("Destination").and_then(Value::as_str),
                ) {
                    info.mounts.push(ContainerMount {
                        source: trim_trailing_slash(source),
                        destination: trim_trailing_slash(destination),
                    });
                }
            }
        }

        if let Some(upper) = params.get("UpperDir").and_then(Value::as_str) {
            info.upper_dir = trim_trailing_slash(upper);
        }
        if let Some(log_path) = params.get("LogPath").and_then(Value::as_str) {
            info.log_path = log_path.to_string();
        }

        if let Some(metadatas) = params.get("MetaDatas").and_then(Value::as_array) {
            for pair in metadatas.chunks(2) {
                if let [key, value] = pair {
                    if let (Some(key), Some(value)) = (key.as_str(), value.as_str()) {
                        info.add_metadata(key, value);
                    }
                }
            }
        }

        if let Some(tags) = params.get("Tags").and_then(Value::as_array) {
            for pair in tags.chunks(2) {
                if let [key, value] = pair {
                    if let (Some(key), Some(value)) = (key.as_str(), value.as_str()) {
                        if legacy {
                            info.tags.push((key.to_string(), value.to_string()));
                        } else if ContainerMetaKey::parse(key).is_some() {
                            info.add_metadata(key, value);
                        } else {
                            info.tags.push((key.to_string(), value.to_string()));
                        }
                    }
                }
            }
        }

        if let Some(path) = params.get("Path").and_then(Value::as_str) {
            info.real_base_dir = path.to_string();
            info!(
                "recovered container base dir {:?} from checkpoint for container {}",
                info.real_base_dir, info.id
            );
        }
        Ok(info)
    }

    fn add_metadata(&mut self, key: &str, value: &str) {
        match ContainerMetaKey::parse(key) {
            Some(meta) => self.metadatas.push((meta, value.to_string())),
            None => self.custom_metadatas.push((key.to_string(), value.to_string())),
        }
    }

    #[must_use]
    pub fn metadata(&self, key: ContainerMetaKey) -> Option<&str> {
        self.metadatas
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn trim_trailing_slash(path: &str) -> String {
    match path.strip_suffix('/') {
        Some(stripped) if !stripped.is_empty() => stripped.to_string(),
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_payload_is_empty_map() {
        let map = ContainerInfo::parse_all(&Value::Null).expect("parse");
        assert!(map.is_empty());
    }

    #[test]
    fn non_array_payload_is_rejected() {
        assert!(ContainerInfo::parse_all(&json!({"ID": "abc"})).is_err());
    }

    #[test]
    fn full_description_parses() {
        let payload = json!([{
            "ID": "cont-1",
            "Mounts": [
                {"Source": "/var/lib/docker/volumes/app/", "Destination": "/data/"}
            ],
            "UpperDir": "/var/lib/docker/overlay2/abc/upper/",
            "LogPath": "/var/lib/docker/containers/cont-1/cont-1-json.log",
            "MetaDatas": ["_container_name_", "app", "team", "infra"],
            "Tags": ["env", "prod"],
            "Path": "/logtail_host/var"
        }]);
        let map = ContainerInfo::parse_all(&payload).expect("parse");
        let info = map.get("cont-1").expect("container");
        assert_eq!(info.mounts.len(), 1);
        assert_eq!(info.mounts[0].source, "/var/lib/docker/volumes/app");
        assert_eq!(info.mounts[0].destination, "/data");
        assert_eq!(info.upper_dir, "/var/lib/docker/overlay2/abc/upper");
        assert_eq!(info.metadata(ContainerMetaKey::ContainerName), Some("app"));
        assert_eq!(info.custom_metadatas, vec![("team".to_string(), "infra".to_string())]);
        assert_eq!(info.tags, vec![("env".to_string(), "prod".to_string())]);
        assert_eq!(info.real_base_dir, "/logtail_host/var");
    }

    #[test]
    fn legacy_description_keeps_all_tags() {
        // no MetaDatas: even well-known keys stay plain tags
        let payload = json!([{
            "ID": "cont-2",
            "Tags": ["_container_name_", "app", "env", "prod"]
        }]);
        let map = ContainerInfo::parse_all(&payload).expect("parse");
        let info = map.get("cont-2").expect("container");
        assert!(info.metadatas.is_empty());
        assert_eq!(info.tags.len(), 2);
        assert_eq!(info.tags[0], ("_container_name_".to_string(), "app".to_string()));
    }

    #[test]
    fn modern_description_promotes_known_keys_from_tags() {
        let payload = json!([{
            "ID": "cont-3",
            "MetaDatas": [],
            "Tags": ["_pod_name_", "web-0", "custom", "x"]
        }]);
        let map = ContainerInfo::parse_all(&payload).expect("parse");
        let info = map.get("cont-3").expect("container");
        assert_eq!(info.metadata(ContainerMetaKey::PodName), Some("web-0"));
        assert_eq!(info.tags, vec![("custom".to_string(), "x".to_string())]);
    }

    #[test]
    fn empty_id_is_rejected() {
        let payload = json!([{"ID": ""}]);
        assert!(ContainerInfo::parse_all(&payload).is_err());
    }
}
