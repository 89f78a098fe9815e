//! Domain entities persisted to the cluster store.
//!
//! Everything here is stored as JSON; whatever the write path encodes, the
//! watch decoders must read back into an equal value, including the empty
//! `host` a service carries before VIP allocation.

use serde::{Deserialize, Serialize};

/// A load-balanced service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Unique identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Assigned VIP; empty until the allocator fills it
    #[serde(default)]
    pub host: String,

    pub port: u16,
    pub protocol: Protocol,
    pub scheduler: Scheduler,
}

impl Service {
    /// Has this service been assigned a VIP yet?
    pub fn is_allocated(&self) -> bool {
        !self.host.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// Scheduling algorithm applied by the data plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheduler {
    /// Round-robin
    Rr,
    /// Weighted round-robin
    Wrr,
    /// Least connections
    Lc,
    /// Weighted least connections
    Wlc,
}

/// A backend real-server, child of exactly one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// Identifier, unique within the parent service
    pub id: String,

    /// Parent service
    pub service_id: String,

    pub host: String,
    pub port: u16,
    pub weight: i32,
    pub mode: ForwardingMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardingMode {
    Nat,
    Route,
    Tunnel,
}

/// A health-check definition scoped to one service.
///
/// Stored under a random token generated at write time, so structurally
/// identical specs coexist as distinct entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSpec {
    pub service_id: String,
    pub check_type: CheckType,

    /// Request path for HTTP checks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_path: Option<String>,

    pub interval_secs: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    Http,
    Tcp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_round_trip() {
        let svc = Service {
            id: "web".to_string(),
            name: "web frontend".to_string(),
            host: String::new(),
            port: 80,
            protocol: Protocol::Tcp,
            scheduler: Scheduler::Rr,
        };

        let bytes = serde_json::to_vec(&svc).unwrap();
        let decoded: Service = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, svc);
        assert!(!decoded.is_allocated());

        let mut allocated = svc;
        allocated.host = "10.0.0.2".to_string();
        let bytes = serde_json::to_vec(&allocated).unwrap();
        let decoded: Service = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, allocated);
        assert!(decoded.is_allocated());
    }

    #[test]
    fn test_destination_round_trip() {
        let dst = Destination {
            id: "web-1".to_string(),
            service_id: "web".to_string(),
            host: "192.168.1.10".to_string(),
            port: 8080,
            weight: 10,
            mode: ForwardingMode::Nat,
        };

        let bytes = serde_json::to_vec(&dst).unwrap();
        let decoded: Destination = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, dst);
    }

    #[test]
    fn test_check_spec_round_trip() {
        let http = CheckSpec {
            service_id: "web".to_string(),
            check_type: CheckType::Http,
            http_path: Some("/healthz".to_string()),
            interval_secs: 10,
            timeout_secs: 2,
        };
        let bytes = serde_json::to_vec(&http).unwrap();
        assert_eq!(serde_json::from_slice::<CheckSpec>(&bytes).unwrap(), http);

        let tcp = CheckSpec {
            service_id: "web".to_string(),
            check_type: CheckType::Tcp,
            http_path: None,
            interval_secs: 10,
            timeout_secs: 2,
        };
        let bytes = serde_json::to_vec(&tcp).unwrap();
        assert_eq!(serde_json::from_slice::<CheckSpec>(&bytes).unwrap(), tcp);
    }

    #[test]
    fn test_enum_wire_form() {
        assert_eq!(serde_json::to_string(&Protocol::Udp).unwrap(), "\"udp\"");
        assert_eq!(serde_json::to_string(&Scheduler::Wlc).unwrap(), "\"wlc\"");
        assert_eq!(
            serde_json::to_string(&ForwardingMode::Tunnel).unwrap(),
            "\"tunnel\""
        );
    }
}
