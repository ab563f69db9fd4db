//! Recognized configuration keys.
//!
//! The wire strings are stable: devices and deployment tooling read and
//! write these exact names. Unknown keys are ignored on write and absent
//! on read.

/// Closed enumeration of the configuration keys the core understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    /// Gate for the dispatcher: deployment finished saving settings.
    DeploymentSettingsSaved,
    /// Scaling group whose members are eligible for the primary role.
    PrimaryScalingGroupName,
    ByolScalingGroupName,
    PaygScalingGroupName,
    HeartbeatInterval,
    HeartbeatLossCount,
    HeartbeatDelayAllowance,
    /// Consecutive on-time heartbeats required to leave out-of-sync.
    SyncRecoveryCount,
    ElectionTimeout,
    ElectionNoWait,
    AssetStorageName,
    AssetStorageKeyPrefix,
    LicenseStorageKeyPrefix,
    EnableHybridLicensing,
    LicenseGracePeriod,
    HandlerUrl,
    PskSecret,
    SyncInterface,
    TrafficPort,
    AdminPort,
    /// Written by the core when a new primary is elected: its vm_id doubles
    /// as the device's initial admin password.
    DefaultPassword,
    /// Virtual network the fleet is expected to live in; heartbeats from
    /// other networks are rejected.
    VirtualNetworkId,
}

impl SettingKey {
    /// The wire string for this key.
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::DeploymentSettingsSaved => "deployment-settings-saved",
            SettingKey::PrimaryScalingGroupName => "master-scaling-group-name",
            SettingKey::ByolScalingGroupName => "byol-scaling-group-name",
            SettingKey::PaygScalingGroupName => "payg-scaling-group-name",
            SettingKey::HeartbeatInterval => "heartbeat-interval",
            SettingKey::HeartbeatLossCount => "heartbeat-loss-count",
            SettingKey::HeartbeatDelayAllowance => "heartbeat-delay-allowance",
            SettingKey::SyncRecoveryCount => "heartbeat-sync-recovery-count",
            SettingKey::ElectionTimeout => "master-election-timeout",
            SettingKey::ElectionNoWait => "master-election-no-wait",
            SettingKey::AssetStorageName => "asset-storage-name",
            SettingKey::AssetStorageKeyPrefix => "asset-storage-key-prefix",
            SettingKey::LicenseStorageKeyPrefix => "fortigate-license-storage-key-prefix",
            SettingKey::EnableHybridLicensing => "enable-hybrid-licensing",
            SettingKey::LicenseGracePeriod => "get-license-grace-period",
            SettingKey::HandlerUrl => "autoscale-handler-url",
            SettingKey::PskSecret => "fortigate-psk-secret",
            SettingKey::SyncInterface => "fortigate-sync-interface",
            SettingKey::TrafficPort => "fortigate-traffic-port",
            SettingKey::AdminPort => "fortigate-admin-port",
            SettingKey::DefaultPassword => "fortigate-default-password",
            SettingKey::VirtualNetworkId => "cluster-virtual-network-id",
        }
    }

    /// Parse a wire string into a recognized key, or `None` for unknown.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == s)
    }

    /// Every recognized key.
    pub const ALL: &'static [SettingKey] = &[
        SettingKey::DeploymentSettingsSaved,
        SettingKey::PrimaryScalingGroupName,
        SettingKey::ByolScalingGroupName,
        SettingKey::PaygScalingGroupName,
        SettingKey::HeartbeatInterval,
        SettingKey::HeartbeatLossCount,
        SettingKey::HeartbeatDelayAllowance,
        SettingKey::SyncRecoveryCount,
        SettingKey::ElectionTimeout,
        SettingKey::ElectionNoWait,
        SettingKey::AssetStorageName,
        SettingKey::AssetStorageKeyPrefix,
        SettingKey::LicenseStorageKeyPrefix,
        SettingKey::EnableHybridLicensing,
        SettingKey::LicenseGracePeriod,
        SettingKey::HandlerUrl,
        SettingKey::PskSecret,
        SettingKey::SyncInterface,
        SettingKey::TrafficPort,
        SettingKey::AdminPort,
        SettingKey::DefaultPassword,
        SettingKey::VirtualNetworkId,
    ];
}

impl std::fmt::Display for SettingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
