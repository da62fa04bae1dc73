//! Host-supplied view of the system: lease ceilings, replication state,
//! feature bits, identity lookups and entropy.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{FrameworkError, Result};

bitflags! {
    /// Replication role of the node serving a request.
    ///
    /// An empty set means the state is unknown or replication is disabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ReplicationState: u32 {
        const PERFORMANCE_PRIMARY = 1 << 0;
        const PERFORMANCE_SECONDARY = 1 << 1;
        const DR_PRIMARY = 1 << 3;
        const DR_SECONDARY = 1 << 4;
        const PERFORMANCE_BOOTSTRAPPING = 1 << 5;
        const DR_BOOTSTRAPPING = 1 << 6;
        const PERFORMANCE_STANDBY = 1 << 9;
        const PRIMARY = Self::PERFORMANCE_PRIMARY.bits() | Self::DR_PRIMARY.bits();
    }
}

impl Default for ReplicationState {
    fn default() -> Self {
        Self::empty()
    }
}

impl ReplicationState {
    /// True when any bit of `flag` is set.
    pub fn has_state(&self, flag: ReplicationState) -> bool {
        self.intersects(flag)
    }
}

/// Licensed feature bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Feature(pub u64);

impl Feature {
    /// No feature required.
    pub const NONE: Feature = Feature(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is present.
    pub fn contains(&self, other: Feature) -> bool {
        self.0 & other.0 == other.0
    }
}

/// An identity alias attached to an entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Alias {
    pub id: String,
    pub name: String,
    pub mount_accessor: String,
    pub mount_type: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// An identity entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<Alias>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub disabled: bool,
}

/// An identity group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub namespace_id: String,
}

/// Source of random bytes provided by the host, e.g. an HSM.
pub trait EntropySource: Send + Sync {
    /// Fills `dest` with random bytes.
    fn fill(&self, dest: &mut [u8]) -> Result<()>;
}

/// System information exposed to backends by the host.
#[async_trait]
pub trait SystemView: Send + Sync {
    /// Default lease TTL for the mount.
    fn default_lease_ttl(&self) -> Duration;

    /// Maximum lease TTL for the mount.
    fn max_lease_ttl(&self) -> Duration;

    fn replication_state(&self) -> ReplicationState;

    /// Whether the mount is local to this cluster (not replicated).
    fn local_mount(&self) -> bool;

    fn has_feature(&self, feature: Feature) -> bool;

    /// Looks up an entity; `None` when unknown.
    async fn entity_info(&self, entity_id: &str) -> Result<Option<Entity>>;

    /// Groups the entity belongs to, directly or through inheritance.
    async fn groups_for_entity(&self, entity_id: &str) -> Result<Vec<Group>>;

    /// Host entropy, when the host offers one.
    fn entropy_source(&self) -> Option<Arc<dyn EntropySource>> {
        None
    }

    /// Version string of the host.
    fn host_version(&self) -> String {
        String::new()
    }
}

/// A [`SystemView`] backed by plain fields.
///
/// Useful for tests and for plugins run outside a host.
#[derive(Clone, Default)]
pub struct StaticSystemView {
    pub default_lease_ttl: Duration,
    pub max_lease_ttl: Duration,
    pub replication_state: ReplicationState,
    pub local_mount: bool,
    pub features: Feature,
    pub entities: BTreeMap<String, Entity>,
    pub groups: BTreeMap<String, Vec<Group>>,
    pub entropy: Option<Arc<dyn EntropySource>>,
    pub host_version: String,
    /// Error to return from identity lookups
    pub identity_error: Option<String>,
}

impl StaticSystemView {
    /// A view with 24h default and 48h max lease TTLs.
    pub fn new() -> Self {
        Self {
            default_lease_ttl: Duration::from_secs(24 * 3600),
            max_lease_ttl: Duration::from_secs(48 * 3600),
            ..Self::default()
        }
    }

    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entities.insert(entity.id.clone(), entity);
        self
    }

    pub fn with_groups(mut self, entity_id: impl Into<String>, groups: Vec<Group>) -> Self {
        self.groups.insert(entity_id.into(), groups);
        self
    }

    pub fn with_replication_state(mut self, state: ReplicationState) -> Self {
        self.replication_state = state;
        self
    }

    fn identity_check(&self) -> Result<()> {
        match &self.identity_error {
            Some(msg) => Err(FrameworkError::Other(anyhow::anyhow!("{}", msg))),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for StaticSystemView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticSystemView")
            .field("default_lease_ttl", &self.default_lease_ttl)
            .field("max_lease_ttl", &self.max_lease_ttl)
            .field("replication_state", &self.replication_state)
            .field("local_mount", &self.local_mount)
            .field("features", &self.features)
            .field("entropy", &self.entropy.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SystemView for StaticSystemView {
    fn default_lease_ttl(&self) -> Duration {
        self.default_lease_ttl
    }

    fn max_lease_ttl(&self) -> Duration {
        self.max_lease_ttl
    }

    fn replication_state(&self) -> ReplicationState {
        self.replication_state
    }

    fn local_mount(&self) -> bool {
        self.local_mount
    }

    fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(feature)
    }

    async fn entity_info(&self, entity_id: &str) -> Result<Option<Entity>> {
        self.identity_check()?;
        Ok(self.entities.get(entity_id).cloned())
    }

    async fn groups_for_entity(&self, entity_id: &str) -> Result<Vec<Group>> {
        self.identity_check()?;
        Ok(self.groups.get(entity_id).cloned().unwrap_or_default())
    }

    fn entropy_source(&self) -> Option<Arc<dyn EntropySource>> {
        self.entropy.clone()
    }

    fn host_version(&self) -> String {
        self.host_version.clone()
    }
}

/// Entropy that replays a fixed byte pattern. Test use only.
#[derive(Debug, Default)]
pub struct FixedEntropy {
    pattern: Vec<u8>,
    offset: Mutex<usize>,
}

impl FixedEntropy {
    pub fn new(pattern: impl Into<Vec<u8>>) -> Self {
        Self {
            pattern: pattern.into(),
            offset: Mutex::new(0),
        }
    }
}

impl EntropySource for FixedEntropy {
    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        if self.pattern.is_empty() {
            return Err(FrameworkError::Other(anyhow::anyhow!("entropy source exhausted")));
        }
        let mut offset = self
            .offset
            .lock()
            .map_err(|_| FrameworkError::Other(anyhow::anyhow!("entropy source poisoned")))?;
        for byte in dest.iter_mut() {
            *byte = self.pattern[*offset % self.pattern.len()];
            *offset += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replication_state_has_state() {
        let state = ReplicationState::PERFORMANCE_SECONDARY | ReplicationState::DR_PRIMARY;

        assert!(state.has_state(ReplicationState::PERFORMANCE_SECONDARY));
        assert!(state.has_state(ReplicationState::PRIMARY));
        assert!(!state.has_state(ReplicationState::PERFORMANCE_STANDBY));
        assert!(!ReplicationState::default().has_state(ReplicationState::DR_SECONDARY));
    }

    #[test]
    fn test_feature_contains() {
        let enabled = Feature(0b101);

        assert!(enabled.contains(Feature(0b001)));
        assert!(enabled.contains(Feature::NONE));
        assert!(!enabled.contains(Feature(0b010)));
        assert!(Feature::NONE.is_none());
    }

    #[tokio::test]
    async fn test_static_view_identity() {
        let entity = Entity {
            id: "e1".to_string(),
            name: "alice".to_string(),
            ..Entity::default()
        };
        let view = StaticSystemView::new().with_entity(entity);

        assert_eq!(view.entity_info("e1").await.unwrap().unwrap().name, "alice");
        assert!(view.entity_info("nope").await.unwrap().is_none());
        assert!(view.groups_for_entity("e1").await.unwrap().is_empty());
        assert_eq!(view.max_lease_ttl(), Duration::from_secs(48 * 3600));
    }

    #[test]
    fn test_fixed_entropy_cycles() {
        let entropy = FixedEntropy::new(vec![1, 2, 3]);
        let mut buf = [0u8; 5];
        entropy.fill(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 1, 2]);
    }
}
