//! Typed view over the compose declaration of the gateway stack.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ComposeDocument {
    #[serde(default)]
    pub services: BTreeMap<String, ComposeService>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ComposeService {
    #[serde(default)]
    pub ports: Vec<PortEntry>,
    #[serde(default)]
    pub volumes: Vec<VolumeEntry>,
    #[serde(default)]
    dns: Option<StringList>,
    #[serde(default)]
    tmpfs: Option<StringList>,
    #[serde(default)]
    pub user: Option<String>,
}

impl ComposeService {
    pub fn dns_entries(&self) -> &[String] {
        self.dns.as_ref().map(StringList::as_slice).unwrap_or(&[])
    }

    pub fn tmpfs_entries(&self) -> &[String] {
        self.tmpfs.as_ref().map(StringList::as_slice).unwrap_or(&[])
    }

    /// True when a tmpfs entry targets `path` exactly or as `path:<options>`.
    pub fn declares_tmpfs(&self, path: &str) -> bool {
        self.tmpfs_entries().iter().any(|entry| {
            entry == path
                || entry
                    .strip_prefix(path)
                    .is_some_and(|rest| rest.starts_with(':'))
        })
    }

    pub fn port_bindings(&self) -> Vec<PortBinding> {
        self.ports.iter().filter_map(PortEntry::binding).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "StringListRepr")]
/// Compose fields that accept either a scalar or a list of strings.
pub struct StringList(Vec<String>);

impl StringList {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringListRepr {
    One(String),
    Many(Vec<String>),
}

impl From<StringListRepr> for StringList {
    fn from(value: StringListRepr) -> Self {
        match value {
            StringListRepr::One(entry) => StringList(vec![entry]),
            StringListRepr::Many(entries) => StringList(entries),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PortEntry {
    Short(String),
    Number(u64),
    Long(LongPortEntry),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LongPortEntry {
    #[serde(default)]
    pub host_ip: Option<String>,
    #[serde(default)]
    pub target: Option<serde_yaml::Value>,
    #[serde(default)]
    pub published: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Normalized published port: host interface plus the container-side port.
pub struct PortBinding {
    pub host_ip: String,
    pub container_port: String,
    pub raw: String,
}

impl PortBinding {
    pub fn is_public(&self) -> bool {
        matches!(self.host_ip.as_str(), "" | "0.0.0.0" | "::")
    }

    pub fn is_loopback(&self) -> bool {
        self.host_ip == "127.0.0.1"
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(text) => Some(text.clone()),
        serde_yaml::Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn strip_protocol(port: &str) -> &str {
    port.split_once('/').map(|(port, _)| port).unwrap_or(port)
}

impl PortEntry {
    /// Bindings without a host side (a bare container port) are not published
    /// on a predictable interface and yield `None`.
    pub fn binding(&self) -> Option<PortBinding> {
        match self {
            PortEntry::Short(raw) => {
                let parts = raw.split(':').collect::<Vec<_>>();
                match parts.len() {
                    0 | 1 => None,
                    2 => Some(PortBinding {
                        host_ip: "0.0.0.0".to_string(),
                        container_port: strip_protocol(parts[1]).to_string(),
                        raw: raw.clone(),
                    }),
                    _ => Some(PortBinding {
                        host_ip: parts[0].to_string(),
                        container_port: strip_protocol(parts[parts.len() - 1]).to_string(),
                        raw: raw.clone(),
                    }),
                }
            }
            PortEntry::Number(_) => None,
            PortEntry::Long(entry) => {
                let target = entry.target.as_ref().and_then(scalar_to_string)?;
                if target.is_empty() {
                    return None;
                }
                let host_ip = entry
                    .host_ip
                    .clone()
                    .unwrap_or_else(|| "0.0.0.0".to_string());
                let published = entry
                    .published
                    .as_ref()
                    .and_then(scalar_to_string)
                    .unwrap_or_default();
                Some(PortBinding {
                    raw: format!("host_ip={host_ip} published={published} target={target}"),
                    host_ip,
                    container_port: target,
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum VolumeEntry {
    Short(String),
    Long(LongVolumeEntry),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LongVolumeEntry {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
}

impl VolumeEntry {
    pub fn mentions(&self, path: &str) -> bool {
        match self {
            VolumeEntry::Short(raw) => raw.contains(path),
            VolumeEntry::Long(entry) => entry
                .source
                .as_deref()
                .is_some_and(|source| source.contains(path)),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            VolumeEntry::Short(raw) => raw.clone(),
            VolumeEntry::Long(entry) => format!(
                "{}:{}",
                entry.source.as_deref().unwrap_or(""),
                entry.target.as_deref().unwrap_or("")
            ),
        }
    }
}

impl ComposeDocument {
    pub fn parse(source: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(source)
    }

    pub fn service(&self, name: &str) -> Option<&ComposeService> {
        self.services.get(name)
    }

    /// First candidate declared in the document, in candidate priority order.
    pub fn resolve_runtime_service(&self, candidates: &[String]) -> Option<String> {
        candidates
            .iter()
            .find(|candidate| self.services.contains_key(candidate.as_str()))
            .cloned()
    }

    /// The dedicated gateway service when declared, else the runtime service.
    pub fn resolve_gateway_service(
        &self,
        gateway_service: &str,
        runtime_service: Option<&str>,
    ) -> Option<String> {
        if self.services.contains_key(gateway_service) {
            return Some(gateway_service.to_string());
        }
        runtime_service.map(ToString::to_string)
    }

    pub fn stack_service_names(&self, prefix: &str) -> Vec<&str> {
        let dashed = format!("{prefix}-");
        self.services
            .keys()
            .filter(|name| name.as_str() == prefix || name.starts_with(&dashed))
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone)]
/// Compose file contents captured once per run. Read and parse failures are
/// kept as detail strings so each dependent check can report them.
pub struct ComposeSnapshot {
    path: PathBuf,
    source: Result<String, String>,
    document: Result<ComposeDocument, String>,
}

impl ComposeSnapshot {
    pub fn load(path: &Path) -> Self {
        if !path.is_file() {
            let missing = format!("Compose file not found at {}", path.display());
            return Self {
                path: path.to_path_buf(),
                source: Err(missing.clone()),
                document: Err(missing),
            };
        }
        match std::fs::read_to_string(path) {
            Ok(source) => Self::from_source(path, source),
            Err(error) => {
                let message = format!("failed to read compose file {}: {error}", path.display());
                Self {
                    path: path.to_path_buf(),
                    source: Err(message.clone()),
                    document: Err(message),
                }
            }
        }
    }

    pub fn from_source(path: &Path, source: String) -> Self {
        let document = ComposeDocument::parse(&source).map_err(|error| {
            format!(
                "Unable to parse {}: {}",
                path.display(),
                error.to_string().replace('\n', " ")
            )
        });
        Self {
            path: path.to_path_buf(),
            source: Ok(source),
            document,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source(&self) -> Result<&str, &str> {
        match &self.source {
            Ok(source) => Ok(source.as_str()),
            Err(error) => Err(error.as_str()),
        }
    }

    pub fn document(&self) -> Result<&ComposeDocument, &str> {
        match &self.document {
            Ok(document) => Ok(document),
            Err(error) => Err(error.as_str()),
        }
    }
}
