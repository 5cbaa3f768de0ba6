//! seams to the external cloud services
//!
//! The compiler and the stack resolver never talk to a control plane
//! directly. They consume the narrow traits defined here; production
//! binaries plug in real clients, tests and offline usage plug in the
//! static implementations below.
//!
//! Implementations own their timeout and cancellation handling and must
//! surface both as a retryable [ExternalServiceError] instead of aborting
//! unrelated in-flight work.

use crate::stacks::StackInventoryEntry;
use crate::value::Value;
use indexmap::IndexMap;
use std::time::Duration;

/// Failure of an external call
///
/// This is the only retryable error class. Deterministic input errors use
/// the compile-time taxonomy instead.
#[derive(thiserror::Error, Debug)]
#[error("{message}")]
pub struct ExternalServiceError {
    pub message: String,
    pub retryable: bool,
}

impl ExternalServiceError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Bounded retry with backoff for idempotent read calls
///
/// Mutating calls (stack create/delete, record set updates) must never go
/// through here; a duplicated side effect is worse than a surfaced failure.
pub fn with_retries<T>(
    attempts: usize,
    mut op: impl FnMut() -> Result<T, ExternalServiceError>,
) -> Result<T, ExternalServiceError> {
    let mut backoff = Duration::from_millis(100);
    let mut tried = 0;
    loop {
        tried += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.retryable && tried < attempts => {
                tracing::warn!(attempt = tried, error = %err, "retrying external call");
                std::thread::sleep(backoff);
                backoff *= 2;
            }
            Err(err) => return Err(err),
        }
    }
}

/// The cloud control plane that owns deployed stacks
///
/// `list_stacks` performs one logical listing; implementations follow
/// pagination internally so no partial result is ever dropped.
pub trait ControlPlane {
    fn list_stacks(&self) -> Result<Vec<StackInventoryEntry>, ExternalServiceError>;

    /// Output or resource id of an already-deployed stack
    ///
    /// `Ok(None)` means the stack exists but does not expose the logical id.
    fn get_stack_output(
        &self,
        stack: &str,
        logical_id: &str,
    ) -> Result<Option<String>, ExternalServiceError>;
}

/// A subnet as reported by the account metadata source
#[derive(Debug, Clone, derive_new::new)]
pub struct Subnet {
    pub id: String,
    pub name: String,
}

impl Subnet {
    /// DMZ subnets host load balancers, everything else hosts servers
    pub fn is_dmz(&self) -> bool {
        self.name.contains("dmz")
    }
}

/// Account/region metadata used by the auto-configuration components
pub trait MetadataSource {
    fn subnets(&self, region: &str) -> Result<Vec<Subnet>, ExternalServiceError>;

    fn latest_image(&self, region: &str) -> Result<Option<String>, ExternalServiceError>;

    fn security_group_id(
        &self,
        region: &str,
        name: &str,
    ) -> Result<Option<String>, ExternalServiceError>;
}

/// Account facts exposed to template expressions as `AccountInfo`
#[derive(Debug, Clone, Default)]
pub struct AccountInfo {
    pub region: String,
    pub account_id: Option<String>,
    pub account_alias: Option<String>,
    pub team_id: Option<String>,
    pub domain: Option<String>,
    pub vpc_id: Option<String>,
}

impl AccountInfo {
    pub fn for_region(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            ..Default::default()
        }
    }

    pub fn to_value(&self) -> Value {
        let mut map = IndexMap::new();
        map.insert("Region".to_string(), Value::from(self.region.clone()));
        let optional = [
            ("AccountID", &self.account_id),
            ("AccountAlias", &self.account_alias),
            ("TeamID", &self.team_id),
            ("Domain", &self.domain),
            ("VpcID", &self.vpc_id),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                map.insert(key.to_string(), Value::from(value.clone()));
            }
        }
        Value::Object(map)
    }
}

/// In-memory control plane for tests and library consumers
#[derive(Debug, Default)]
pub struct StaticControlPlane {
    stacks: Vec<StackInventoryEntry>,
    outputs: IndexMap<String, IndexMap<String, String>>,
}

impl StaticControlPlane {
    pub fn with_stack(mut self, entry: StackInventoryEntry) -> Self {
        self.stacks.push(entry);
        self
    }

    pub fn with_output(
        mut self,
        stack: impl Into<String>,
        logical_id: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.outputs
            .entry(stack.into())
            .or_default()
            .insert(logical_id.into(), value.into());
        self
    }
}

impl ControlPlane for StaticControlPlane {
    fn list_stacks(&self) -> Result<Vec<StackInventoryEntry>, ExternalServiceError> {
        Ok(self.stacks.clone())
    }

    fn get_stack_output(
        &self,
        stack: &str,
        logical_id: &str,
    ) -> Result<Option<String>, ExternalServiceError> {
        Ok(self
            .outputs
            .get(stack)
            .and_then(|outputs| outputs.get(logical_id))
            .cloned())
    }
}

/// Control plane stand-in for offline compilation
///
/// Listing yields nothing and output lookups fail, so definitions relying on
/// cross-stack references cannot be compiled without a real client.
#[derive(Debug, Default)]
pub struct NullControlPlane;

impl ControlPlane for NullControlPlane {
    fn list_stacks(&self) -> Result<Vec<StackInventoryEntry>, ExternalServiceError> {
        Ok(Vec::new())
    }

    fn get_stack_output(
        &self,
        _stack: &str,
        _logical_id: &str,
    ) -> Result<Option<String>, ExternalServiceError> {
        Err(ExternalServiceError::fatal(
            "no control plane client configured",
        ))
    }
}

/// In-memory metadata source for tests and offline compilation
#[derive(Debug, Default)]
pub struct StaticMetadata {
    subnets: IndexMap<String, Vec<Subnet>>,
    images: IndexMap<String, String>,
    security_groups: IndexMap<String, IndexMap<String, String>>,
}

impl StaticMetadata {
    pub fn with_subnet(
        mut self,
        region: impl Into<String>,
        id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        self.subnets
            .entry(region.into())
            .or_default()
            .push(Subnet::new(id.into(), name.into()));
        self
    }

    pub fn with_image(mut self, region: impl Into<String>, ami: impl Into<String>) -> Self {
        self.images.insert(region.into(), ami.into());
        self
    }

    pub fn with_security_group(
        mut self,
        region: impl Into<String>,
        name: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        self.security_groups
            .entry(region.into())
            .or_default()
            .insert(name.into(), id.into());
        self
    }
}

impl MetadataSource for StaticMetadata {
    fn subnets(&self, region: &str) -> Result<Vec<Subnet>, ExternalServiceError> {
        Ok(self.subnets.get(region).cloned().unwrap_or_default())
    }

    fn latest_image(&self, region: &str) -> Result<Option<String>, ExternalServiceError> {
        Ok(self.images.get(region).cloned())
    }

    fn security_group_id(
        &self,
        region: &str,
        name: &str,
    ) -> Result<Option<String>, ExternalServiceError> {
        Ok(self
            .security_groups
            .get(region)
            .and_then(|groups| groups.get(name))
            .cloned())
    }
}
