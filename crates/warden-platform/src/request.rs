//! Normalized request envelope and typed request classification.
//!
//! The transport hands the platform adapter a [`Request`]; the adapter
//! classifies it into a [`RequestType`] that the dispatcher routes on.
//! Wire fields follow the device protocol: `instance-id` is required on
//! all VM-originated requests, `interval` is integer seconds or the
//! literal `"use-existing"`, and the presence of `status` routes the
//! request to the status handler.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use warden_state::{WardenError, WardenResult};

/// Scaling-group lifecycle transitions delivered by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleTransition {
    Launching,
    Launched,
    Terminating,
    Terminated,
}

/// Sync telemetry a device attaches to its heartbeat reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceReport {
    #[serde(rename = "sync-time", skip_serializing_if = "Option::is_none")]
    pub sync_time: Option<u64>,
    #[serde(rename = "sync-fail-time", skip_serializing_if = "Option::is_none")]
    pub sync_fail_time: Option<u64>,
    #[serde(rename = "sync-status", skip_serializing_if = "Option::is_none")]
    pub sync_status: Option<String>,
    #[serde(rename = "is-primary", default)]
    pub is_primary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// The request envelope as normalized by the transport layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    /// `instance-id` — required on all VM-originated requests.
    #[serde(rename = "instance-id", skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// `interval` — integer seconds or the literal string `"use-existing"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<Value>,
    /// `status` — presence routes to the status handler.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Device sync telemetry riding along with a heartbeat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceReport>,
    /// Target service name on forwarded requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Set on scaling-group lifecycle notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<LifecycleTransition>,
    /// True when the VM is pulling its bootstrap configuration.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub config_request: bool,
}

impl Request {
    /// A heartbeat report from a VM.
    pub fn heartbeat(vm_id: &str, interval: Value) -> Self {
        Self {
            instance_id: Some(vm_id.to_string()),
            interval: Some(interval),
            ..Self::default()
        }
    }

    /// Attach device sync telemetry to this request.
    pub fn with_device_report(mut self, report: DeviceReport) -> Self {
        self.device = Some(report);
        self
    }

    /// A bootstrap configuration pull from a VM.
    pub fn bootstrap(vm_id: &str) -> Self {
        Self {
            instance_id: Some(vm_id.to_string()),
            config_request: true,
            ..Self::default()
        }
    }

    /// A scaling-group lifecycle notification for a VM.
    pub fn lifecycle(vm_id: &str, transition: LifecycleTransition) -> Self {
        Self {
            instance_id: Some(vm_id.to_string()),
            lifecycle: Some(transition),
            ..Self::default()
        }
    }

    /// A device status message.
    pub fn status(vm_id: &str, status: &str) -> Self {
        Self {
            instance_id: Some(vm_id.to_string()),
            status: Some(status.to_string()),
            ..Self::default()
        }
    }
}

/// Closed classification of incoming requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    LaunchingVm,
    LaunchedVm,
    TerminatingVm,
    TerminatedVm,
    BootstrapConfig,
    HeartbeatSync,
    StatusMessage,
    ServiceForwarding,
    Unknown,
}

/// Heartbeat interval carried by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatInterval {
    /// The sentinel `"use-existing"` (or an absent field): reuse the
    /// stored interval.
    UseExisting,
    /// Replace the stored interval with this many seconds.
    Seconds(u32),
}

/// Classify a request. Lifecycle notifications win over everything; a
/// config pull wins over heartbeat fields; `status` routes to the status
/// handler.
pub fn classify(req: &Request) -> RequestType {
    if let Some(transition) = req.lifecycle {
        return match transition {
            LifecycleTransition::Launching => RequestType::LaunchingVm,
            LifecycleTransition::Launched => RequestType::LaunchedVm,
            LifecycleTransition::Terminating => RequestType::TerminatingVm,
            LifecycleTransition::Terminated => RequestType::TerminatedVm,
        };
    }
    if req.config_request {
        return RequestType::BootstrapConfig;
    }
    if req.status.is_some() {
        return RequestType::StatusMessage;
    }
    if req.service.is_some() {
        return RequestType::ServiceForwarding;
    }
    if req.instance_id.is_some() {
        return RequestType::HeartbeatSync;
    }
    RequestType::Unknown
}

/// Parse the heartbeat interval field of a request.
pub fn parse_interval(req: &Request) -> WardenResult<HeartbeatInterval> {
    match &req.interval {
        None => Ok(HeartbeatInterval::UseExisting),
        Some(Value::String(s)) if s == "use-existing" => Ok(HeartbeatInterval::UseExisting),
        Some(Value::String(s)) => s
            .parse::<u32>()
            .map(HeartbeatInterval::Seconds)
            .map_err(|_| WardenError::TransientIo(format!("unparsable interval: {s:?}"))),
        Some(Value::Number(n)) => n
            .as_u64()
            .filter(|v| *v > 0 && *v <= u64::from(u32::MAX))
            .map(|v| HeartbeatInterval::Seconds(v as u32))
            .ok_or_else(|| WardenError::TransientIo(format!("unparsable interval: {n}"))),
        Some(other) => Err(WardenError::TransientIo(format!(
            "unparsable interval: {other}"
        ))),
    }
}
