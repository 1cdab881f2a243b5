//! Deployment requests and their wire format.
//!
//! Inbound messages use [`DeploymentMessage`], which accepts both camelCase
//! keys and the PascalCase keys emitted by older producers. A message is
//! validated once and turned into an immutable [`DeploymentRequest`].

use std::collections::BTreeMap;
use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ControlError, ControlResult};
use crate::types::{ContainerGroupSpec, OsType, RestartPolicy};

/// Longest container group name the platform accepts.
const MAX_GROUP_NAME_LEN: usize = 63;

/// A credential that never shows up in `Debug` output.
///
/// Serialises to its plain value so requests can be checkpointed as
/// orchestration input.
#[derive(Clone)]
pub struct Secret(SecretString);

impl Secret {
    /// Wrap a secret value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    /// Exposes the secret value.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Whether no value was supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

impl Default for Secret {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.expose())
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// Private registry the image is pulled from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryCredentials {
    /// Registry server, e.g. `myregistry.example.io`.
    pub server: String,
    /// Registry user.
    pub username: String,
    /// Registry password.
    pub password: Secret,
}

/// Service principal the platform client is authenticated with.
///
/// Opaque to the controller; only a [`ResourceProvider`](crate::ResourceProvider)
/// looks inside.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformCredentials {
    /// Client (application) id.
    pub client_id: String,
    /// Client secret.
    pub secret: Secret,
    /// Directory tenant.
    pub tenant_id: String,
    /// Subscription the resource group lives in.
    pub subscription_id: String,
}

/// Validated deployment request. Never mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRequest {
    /// Resource group that owns the container group.
    pub resource_group: String,
    /// Container group name.
    pub container_group: String,
    /// Image reference, e.g. `repo/app:latest`.
    pub image: String,
    /// Registry the image is pulled from.
    pub registry: RegistryCredentials,
    /// CPU cores.
    pub cpu_cores: u32,
    /// Memory in GB.
    pub memory_gb: u32,
    /// Internal TCP port.
    pub port: u16,
    /// Caller-supplied correlation id.
    pub transaction_id: String,
    /// Environment passed to the container.
    pub environment: BTreeMap<String, String>,
    /// Platform credentials.
    pub credentials: PlatformCredentials,
}

impl DeploymentRequest {
    /// Decode and validate a queue or HTTP payload.
    pub fn from_message(payload: &[u8]) -> ControlResult<Self> {
        let message: DeploymentMessage =
            serde_json::from_slice(payload).map_err(|e| ControlError::malformed(e.to_string()))?;
        Self::try_from(message)
    }

    /// Definition for the platform's create call.
    #[must_use]
    pub fn container_group_spec(&self) -> ContainerGroupSpec {
        ContainerGroupSpec {
            resource_group: self.resource_group.clone(),
            name: self.container_group.clone(),
            image: self.image.clone(),
            registry_server: self.registry.server.clone(),
            registry_username: self.registry.username.clone(),
            port: self.port,
            cpu_cores: self.cpu_cores,
            memory_gb: self.memory_gb,
            environment: self.environment.clone(),
            os_type: OsType::Linux,
            restart_policy: RestartPolicy::Never,
        }
    }
}

/// Wire format of an inbound deployment request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentMessage {
    /// Resource group holding the container group.
    #[serde(
        default = "default_resource_group",
        alias = "ResourceGroupName",
        alias = "resourceGroup"
    )]
    pub resource_group_name: String,
    /// Container group to create or restart.
    #[serde(alias = "ContainerGroupName", alias = "group")]
    pub container_group_name: String,
    /// Image to run.
    #[serde(alias = "ContainerImage", alias = "image")]
    pub container_image: String,
    /// Private registry host, if any.
    #[serde(default, alias = "RegistryServer")]
    pub registry_server: String,
    /// Registry user name.
    #[serde(default, alias = "RegistryUsername")]
    pub registry_username: String,
    /// Registry password.
    #[serde(default, alias = "RegistryPassword")]
    pub registry_password: Secret,
    /// CPU cores requested.
    #[serde(default = "default_cpu_cores", alias = "CpuCoreCount")]
    pub cpu_core_count: u32,
    /// Memory requested, in GB.
    #[serde(
        default = "default_memory_gb",
        rename = "memorySizeInGB",
        alias = "MemorySizeInGB"
    )]
    pub memory_size_in_gb: u32,
    /// Port exposed by the container.
    #[serde(default = "default_port", alias = "Port")]
    pub port: u16,
    /// Caller-supplied correlation id.
    #[serde(alias = "TransactionId")]
    pub transaction_id: String,
    /// Passed to the container as `Arg1`.
    #[serde(default, alias = "Arg1")]
    pub arg1: Option<String>,
    /// Passed to the container as `Arg2`.
    #[serde(default, alias = "Arg2")]
    pub arg2: Option<String>,
    /// Extra environment variables.
    #[serde(default, alias = "Environment")]
    pub environment: BTreeMap<String, String>,
    /// Service principal client id.
    #[serde(default, alias = "ClientId")]
    pub client_id: String,
    /// Service principal secret.
    #[serde(default, alias = "Secret")]
    pub secret: Secret,
    /// Directory tenant.
    #[serde(default, alias = "TenantId")]
    pub tenant_id: String,
    /// Subscription the resource group belongs to.
    #[serde(default, alias = "SubscriptionId")]
    pub subscription_id: String,
}

/// Resource group used when a message names none.
pub const DEFAULT_RESOURCE_GROUP: &str = "nimbus";

fn default_resource_group() -> String {
    DEFAULT_RESOURCE_GROUP.to_owned()
}

const fn default_cpu_cores() -> u32 {
    1
}

const fn default_memory_gb() -> u32 {
    1
}

const fn default_port() -> u16 {
    80
}

impl TryFrom<DeploymentMessage> for DeploymentRequest {
    type Error = ControlError;

    fn try_from(message: DeploymentMessage) -> ControlResult<Self> {
        require("resourceGroupName", &message.resource_group_name)?;
        require("containerImage", &message.container_image)?;
        require("transactionId", &message.transaction_id)?;
        validate_group_name(&message.container_group_name)?;

        if message.cpu_core_count == 0 {
            return Err(ControlError::malformed("cpuCoreCount must be at least 1"));
        }
        if message.memory_size_in_gb == 0 {
            return Err(ControlError::malformed("memorySizeInGB must be at least 1"));
        }

        let mut environment = message.environment;
        if let Some(arg) = message.arg1 {
            environment.insert("Arg1".to_owned(), arg);
        }
        if let Some(arg) = message.arg2 {
            environment.insert("Arg2".to_owned(), arg);
        }

        Ok(Self {
            resource_group: message.resource_group_name,
            container_group: message.container_group_name,
            image: message.container_image,
            registry: RegistryCredentials {
                server: message.registry_server,
                username: message.registry_username,
                password: message.registry_password,
            },
            cpu_cores: message.cpu_core_count,
            memory_gb: message.memory_size_in_gb,
            port: message.port,
            transaction_id: message.transaction_id,
            environment,
            credentials: PlatformCredentials {
                client_id: message.client_id,
                secret: message.secret,
                tenant_id: message.tenant_id,
                subscription_id: message.subscription_id,
            },
        })
    }
}

fn require(field: &str, value: &str) -> ControlResult<()> {
    if value.trim().is_empty() {
        return Err(ControlError::malformed(format!("{field} is required")));
    }
    Ok(())
}

fn validate_group_name(name: &str) -> ControlResult<()> {
    require("containerGroupName", name)?;

    if name.len() > MAX_GROUP_NAME_LEN {
        return Err(ControlError::malformed(format!(
            "containerGroupName exceeds {MAX_GROUP_NAME_LEN} characters"
        )));
    }

    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid_chars || name.starts_with('-') || name.ends_with('-') {
        return Err(ControlError::malformed(format!(
            "containerGroupName {name:?} must be lowercase alphanumerics and inner hyphens"
        )));
    }

    Ok(())
}
