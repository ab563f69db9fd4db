//! Settings registry — typed, read-through configuration access.
//!
//! Loaded once per handler invocation from the platform adapter. Boolean
//! parsing is tolerant: `"true"` (any casing) is true, anything else is
//! false. Unknown keys are ignored on write and absent on read.

use std::collections::HashMap;

use tracing::debug;

use warden_election::ElectionConfig;
use warden_health::HealthPolicy;
use warden_license::LicenseConfig;
use warden_platform::PlatformAdapter;
use warden_state::{SettingItem, SettingKey, WardenError, WardenResult};

/// Read-through cache over the platform's settings table.
pub struct SettingsRegistry {
    items: HashMap<String, SettingItem>,
}

impl SettingsRegistry {
    /// Load all settings through the platform adapter.
    pub async fn load<P: PlatformAdapter>(platform: &P) -> WardenResult<Self> {
        let items = platform
            .get_settings()
            .await?
            .into_iter()
            .map(|item| (item.key.clone(), item))
            .collect();
        Ok(Self { items })
    }

    /// An empty registry (tests).
    pub fn empty() -> Self {
        Self {
            items: HashMap::new(),
        }
    }

    /// Raw value of a recognized key, if present.
    pub fn get(&self, key: SettingKey) -> Option<&str> {
        self.items.get(key.as_str()).map(|item| item.value.as_str())
    }

    /// Raw value of a recognized key, or `ConfigurationMissing`.
    pub fn require(&self, key: SettingKey) -> WardenResult<&str> {
        self.get(key)
            .ok_or_else(|| WardenError::ConfigurationMissing(key.as_str().to_string()))
    }

    /// Tolerant boolean: `"true"` in any casing is true, everything else
    /// (including absence) is false.
    pub fn get_bool(&self, key: SettingKey) -> bool {
        self.get(key).is_some_and(parse_bool)
    }

    fn require_u32(&self, key: SettingKey) -> WardenResult<u32> {
        let raw = self.require(key)?;
        raw.parse::<u32>().map_err(|_| {
            WardenError::ConfigurationMissing(format!("{key} is not an integer: {raw:?}"))
        })
    }

    fn u32_or(&self, key: SettingKey, default: u32) -> u32 {
        self.get(key)
            .and_then(|raw| raw.parse::<u32>().ok())
            .unwrap_or(default)
    }

    /// Persist a recognized setting and update the cache. Unknown keys
    /// never reach this method; see [`set_raw`](Self::set_raw).
    pub async fn set<P: PlatformAdapter>(
        &mut self,
        platform: &P,
        key: SettingKey,
        value: &str,
    ) -> WardenResult<()> {
        let mut item = self
            .items
            .get(key.as_str())
            .cloned()
            .unwrap_or_else(|| SettingItem::new(key.as_str(), "", ""));
        item.value = value.to_string();
        platform.set_setting(&item).await?;
        self.items.insert(item.key.clone(), item);
        Ok(())
    }

    /// Persist an arbitrary item; silently ignores unrecognized keys.
    pub async fn set_raw<P: PlatformAdapter>(
        &mut self,
        platform: &P,
        item: &SettingItem,
    ) -> WardenResult<()> {
        if SettingKey::parse(&item.key).is_none() {
            debug!(key = %item.key, "ignoring write to unrecognized setting");
            return Ok(());
        }
        platform.set_setting(item).await?;
        self.items.insert(item.key.clone(), item.clone());
        Ok(())
    }

    // ── Typed accessors ────────────────────────────────────────────

    pub fn deployment_settings_saved(&self) -> bool {
        self.get_bool(SettingKey::DeploymentSettingsSaved)
    }

    pub fn primary_scaling_group(&self) -> WardenResult<&str> {
        self.require(SettingKey::PrimaryScalingGroupName)
    }

    pub fn byol_scaling_group(&self) -> Option<&str> {
        self.get(SettingKey::ByolScalingGroupName)
    }

    pub fn payg_scaling_group(&self) -> Option<&str> {
        self.get(SettingKey::PaygScalingGroupName)
    }

    pub fn heartbeat_interval(&self) -> WardenResult<u32> {
        self.require_u32(SettingKey::HeartbeatInterval)
    }

    pub fn election_no_wait(&self) -> bool {
        self.get_bool(SettingKey::ElectionNoWait)
    }

    pub fn hybrid_licensing_enabled(&self) -> bool {
        self.get_bool(SettingKey::EnableHybridLicensing)
    }

    pub fn handler_url(&self) -> Option<&str> {
        self.get(SettingKey::HandlerUrl)
    }

    pub fn psk_secret(&self) -> Option<&str> {
        self.get(SettingKey::PskSecret)
    }

    pub fn sync_interface(&self) -> &str {
        self.get(SettingKey::SyncInterface).unwrap_or("port1")
    }

    pub fn traffic_port(&self) -> u32 {
        self.u32_or(SettingKey::TrafficPort, 443)
    }

    pub fn admin_port(&self) -> u32 {
        self.u32_or(SettingKey::AdminPort, 8443)
    }

    pub fn virtual_network_id(&self) -> Option<&str> {
        self.get(SettingKey::VirtualNetworkId)
    }

    /// Classification thresholds, with conventional defaults where the
    /// deployment left them unset.
    pub fn health_policy(&self) -> HealthPolicy {
        let defaults = HealthPolicy::default();
        HealthPolicy {
            max_loss_count: self.u32_or(SettingKey::HeartbeatLossCount, defaults.max_loss_count),
            delay_allowance_secs: self.u32_or(
                SettingKey::HeartbeatDelayAllowance,
                defaults.delay_allowance_secs,
            ),
            sync_recovery_count: self.u32_or(
                SettingKey::SyncRecoveryCount,
                defaults.sync_recovery_count,
            ),
        }
    }

    /// Election parameters for the runner.
    pub fn election_config(&self) -> WardenResult<ElectionConfig> {
        Ok(ElectionConfig {
            primary_scaling_group: self.primary_scaling_group()?.to_string(),
            election_timeout_secs: self.require_u32(SettingKey::ElectionTimeout)?,
            no_wait: self.election_no_wait(),
            policy: self.health_policy(),
        })
    }

    /// License pool parameters. Only meaningful when hybrid licensing is
    /// enabled; the storage name and key prefix become required then.
    pub fn license_config(&self) -> WardenResult<LicenseConfig> {
        let container = self.require(SettingKey::AssetStorageName)?.to_string();
        let license_prefix = self.require(SettingKey::LicenseStorageKeyPrefix)?;
        let key_prefix = match self.get(SettingKey::AssetStorageKeyPrefix) {
            Some(asset_prefix) if !asset_prefix.is_empty() => {
                format!("{asset_prefix}/{license_prefix}")
            }
            _ => license_prefix.to_string(),
        };
        Ok(LicenseConfig {
            product: "fortigate".to_string(),
            container,
            key_prefix,
            grace_period_secs: u64::from(self.u32_or(SettingKey::LicenseGracePeriod, 600)),
        })
    }
}

/// `"true"` (any casing, surrounding whitespace tolerated) is true;
/// anything else is false.
pub fn parse_bool(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("true")
}
