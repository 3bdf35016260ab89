pub mod container;
pub mod gateway;
pub mod k8s;
pub mod network;
pub mod result;
pub mod storage;
pub mod vm;

use std::fmt::Write as _;

use redis::{ErrorKind, FromRedisValue, RedisError, RedisResult, RedisWrite, ToRedisArgs, Value};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::security::keys;

pub use container::{Container, ContainerCapacity, ContainerMount, NetworkConnection};
pub use gateway::{Gateway4To6, GatewayDelegate, GatewayProxy, GatewayReverseProxy, GatewaySubdomain};
pub use k8s::{K8s, K8sCustomSize, CUSTOM_SIZE, CUSTOM_SIZE_SRU};
pub use network::{NetworkResource, PublicIp, WireguardPeer};
pub use result::{ResultState, WorkloadResult};
pub use storage::{DiskType, Volume, VolumeType, Zdb, ZdbMode};
pub use vm::VirtualMachine;

/// Workload schema version stamped on every newly created workload.
pub const WORKLOAD_VERSION: i64 = 2;

/// Raw resource units claimed by a workload: vCPU, GiB RAM, GiB SSD, GiB HDD.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rsu {
    pub cru: i64,
    pub mru: f64,
    pub sru: f64,
    pub hru: f64,
}

#[derive(Debug, Clone, Copy, Serialize_repr, Deserialize_repr, PartialEq, Eq, Hash, Default)]
#[repr(i64)]
pub enum NextAction {
    #[default]
    Create = 0,
    Sign = 1,
    Pay = 2,
    Deploy = 3,
    Delete = 4,
    Invalid = 5,
    Deleted = 6,
}

impl NextAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            NextAction::Create => "create",
            NextAction::Sign => "sign",
            NextAction::Pay => "pay",
            NextAction::Deploy => "deploy",
            NextAction::Delete => "delete",
            NextAction::Invalid => "invalid",
            NextAction::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize_repr, Deserialize_repr, PartialEq, Eq, Default)]
#[repr(i64)]
pub enum WorkloadType {
    Zdb = 0,
    Container = 1,
    #[default]
    Volume = 2,
    Kubernetes = 4,
    Proxy = 5,
    ReverseProxy = 6,
    Subdomain = 7,
    DomainDelegate = 8,
    Gateway4To6 = 9,
    NetworkResource = 10,
    PublicIp = 11,
    VirtualMachine = 12,
}

/// Threshold policy over a set of user identities.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SigningRequest {
    #[serde(default)]
    pub signers: Vec<i64>,
    #[serde(default)]
    pub quorum_min: i64,
}

impl SigningRequest {
    /// True once every required signer provided a distinct signature and the
    /// quorum size is reached.
    pub fn satisfied_by(&self, signatures: &[SigningSignature]) -> bool {
        let mut tids: Vec<i64> = signatures.iter().map(|s| s.tid).collect();
        tids.sort_unstable();
        tids.dedup();
        self.signers.iter().all(|s| tids.contains(s)) && tids.len() as i64 >= self.quorum_min
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SigningSignature {
    pub tid: i64,
    pub signature: String,
    #[serde(default)]
    pub epoch: i64,
}

/// Common header shared by every workload variant.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReservationInfo {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub workload_id: i64,
    pub node_id: String,
    pub pool_id: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub currencies: Vec<String>,
    #[serde(default)]
    pub signing_request_provision: SigningRequest,
    #[serde(default)]
    pub signing_request_delete: SigningRequest,
    #[serde(default)]
    pub expiration_provisioning: i64,
    pub customer_tid: i64,
    #[serde(default)]
    pub customer_signature: String,
    #[serde(default)]
    pub next_action: NextAction,
    #[serde(default)]
    pub signatures_provision: Vec<SigningSignature>,
    #[serde(default)]
    pub signatures_delete: Vec<SigningSignature>,
    #[serde(default)]
    pub epoch: i64,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub result: Option<WorkloadResult>,
    pub workload_type: WorkloadType,
    #[serde(default)]
    pub version: i64,
}

impl ReservationInfo {
    /// Fixed-order header part of the signature challenge. Variant payloads
    /// are appended after this.
    pub fn signature_challenge(&self) -> String {
        let mut b = String::new();
        let _ = write!(b, "{}", self.id);
        let _ = write!(b, "{}", self.customer_tid);
        let _ = write!(b, "{}", self.pool_id);
        let _ = write!(b, "{}", self.node_id);
        let _ = write!(b, "{}", self.currencies.join(","));
        let _ = write!(b, "{}", self.metadata);
        let _ = write!(b, "{}", self.description);
        let _ = write!(
            b,
            "{}",
            serde_json::to_string(&self.signing_request_provision).unwrap_or_default()
        );
        let _ = write!(
            b,
            "{}",
            serde_json::to_string(&self.signing_request_delete).unwrap_or_default()
        );
        let _ = write!(b, "{}", self.expiration_provisioning);
        b
    }
}

/// Variant payload of a workload. Which variant is live is dictated by the
/// header's `workload_type`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum WorkloadData {
    Volume(Volume),
    Zdb(Zdb),
    Container(Container),
    Kubernetes(K8s),
    VirtualMachine(VirtualMachine),
    NetworkResource(NetworkResource),
    PublicIp(PublicIp),
    GatewayProxy(GatewayProxy),
    GatewayReverseProxy(GatewayReverseProxy),
    GatewaySubdomain(GatewaySubdomain),
    GatewayDelegate(GatewayDelegate),
    Gateway4To6(Gateway4To6),
}

/// A deployable unit of compute, storage, network or gateway functionality,
/// attached to a capacity pool and assigned to a single node.
#[derive(Debug, Clone, Serialize)]
pub struct Workload {
    #[serde(flatten)]
    pub info: ReservationInfo,
    #[serde(flatten)]
    pub data: WorkloadData,
}

impl Workload {
    /// `"<id>-1"`; nodes address workloads by this composite id.
    pub fn unique_workload_id(&self) -> String {
        format!("{}-{}", self.info.id, 1)
    }

    /// Raw hardware units this workload claims on its node.
    pub fn rsu(&self) -> anyhow::Result<Rsu> {
        match &self.data {
            WorkloadData::Volume(v) => v.rsu(),
            WorkloadData::Zdb(z) => z.rsu(),
            WorkloadData::Container(c) => c.rsu(),
            WorkloadData::Kubernetes(k) => k.rsu(),
            WorkloadData::VirtualMachine(vm) => vm.rsu(),
            WorkloadData::NetworkResource(_)
            | WorkloadData::PublicIp(_)
            | WorkloadData::GatewayProxy(_)
            | WorkloadData::GatewayReverseProxy(_)
            | WorkloadData::GatewaySubdomain(_)
            | WorkloadData::GatewayDelegate(_)
            | WorkloadData::Gateway4To6(_) => Ok(Rsu::default()),
        }
    }

    /// Network units drawn per second while deployed.
    pub fn network_units(&self) -> f64 {
        match &self.data {
            WorkloadData::Kubernetes(_) => 1.0,
            _ => 0.0,
        }
    }

    /// IPv4 units drawn per second while deployed.
    pub fn ipv4_units(&self) -> f64 {
        match &self.data {
            WorkloadData::PublicIp(_) => 1.0,
            _ => 0.0,
        }
    }

    /// Id of the PublicIP workload this one references, 0 if none.
    pub fn public_ip_ref(&self) -> i64 {
        match &self.data {
            WorkloadData::Kubernetes(k) => k.public_ip,
            WorkloadData::VirtualMachine(vm) => vm.public_ip,
            _ => 0,
        }
    }

    /// The canonical byte stream every signature covers: header fields in
    /// fixed order, then the variant payload in declaration order.
    pub fn signature_challenge(&self) -> String {
        let mut b = self.info.signature_challenge();
        match &self.data {
            WorkloadData::Volume(v) => v.signature_challenge(&mut b),
            WorkloadData::Zdb(z) => z.signature_challenge(&mut b),
            WorkloadData::Container(c) => c.signature_challenge(&mut b),
            WorkloadData::Kubernetes(k) => k.signature_challenge(&mut b),
            WorkloadData::VirtualMachine(vm) => vm.signature_challenge(&mut b),
            WorkloadData::NetworkResource(n) => n.signature_challenge(&mut b),
            WorkloadData::PublicIp(p) => p.signature_challenge(&mut b),
            WorkloadData::GatewayProxy(g) => g.signature_challenge(&mut b),
            WorkloadData::GatewayReverseProxy(g) => g.signature_challenge(&mut b),
            WorkloadData::GatewaySubdomain(g) => g.signature_challenge(&mut b),
            WorkloadData::GatewayDelegate(g) => g.signature_challenge(&mut b),
            WorkloadData::Gateway4To6(g) => g.signature_challenge(&mut b),
        }
        b
    }

    /// Verify the customer signature against the challenge bytes.
    pub fn verify_customer(&self, pubkey_hex: &str) -> anyhow::Result<()> {
        keys::verify_hex(
            pubkey_hex,
            self.signature_challenge().as_bytes(),
            &self.info.customer_signature,
        )
    }

    /// Verify a co-signer signature (provision or delete) against the
    /// challenge bytes.
    pub fn verify_signer(&self, pubkey_hex: &str, signature: &SigningSignature) -> anyhow::Result<()> {
        keys::verify_hex(
            pubkey_hex,
            self.signature_challenge().as_bytes(),
            &signature.signature,
        )
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.info.node_id.is_empty() {
            anyhow::bail!("node_id is required");
        }
        if self.info.pool_id <= 0 {
            anyhow::bail!("workload must be attached to a capacity pool");
        }
        if self.info.customer_tid <= 0 {
            anyhow::bail!("customer_tid is required");
        }
        hex::decode(&self.info.customer_signature)
            .map_err(|_| anyhow::anyhow!("invalid signature format, expecting hex encoded string"))?;
        match &self.data {
            WorkloadData::Volume(v) => v.validate(),
            WorkloadData::Zdb(z) => z.validate(),
            WorkloadData::Container(c) => c.validate(),
            WorkloadData::Kubernetes(k) => k.validate(),
            WorkloadData::VirtualMachine(vm) => vm.validate(),
            WorkloadData::NetworkResource(n) => n.validate(),
            WorkloadData::PublicIp(p) => p.validate(),
            WorkloadData::GatewayProxy(g) => g.validate(),
            WorkloadData::GatewayReverseProxy(g) => g.validate(),
            WorkloadData::GatewaySubdomain(g) => g.validate(),
            WorkloadData::GatewayDelegate(g) => g.validate(),
            WorkloadData::Gateway4To6(g) => g.validate(),
        }
    }

    pub fn is_any(&self, actions: &[NextAction]) -> bool {
        actions.contains(&self.info.next_action)
    }
}

impl<'de> Deserialize<'de> for Workload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        let info: ReservationInfo =
            serde_json::from_value(value.clone()).map_err(D::Error::custom)?;

        let data = match info.workload_type {
            WorkloadType::Volume => WorkloadData::Volume(
                serde_json::from_value(value).map_err(D::Error::custom)?,
            ),
            WorkloadType::Zdb => {
                WorkloadData::Zdb(serde_json::from_value(value).map_err(D::Error::custom)?)
            }
            WorkloadType::Container => WorkloadData::Container(
                serde_json::from_value(value).map_err(D::Error::custom)?,
            ),
            WorkloadType::Kubernetes => WorkloadData::Kubernetes(
                serde_json::from_value(value).map_err(D::Error::custom)?,
            ),
            WorkloadType::VirtualMachine => WorkloadData::VirtualMachine(
                serde_json::from_value(value).map_err(D::Error::custom)?,
            ),
            WorkloadType::NetworkResource => WorkloadData::NetworkResource(
                serde_json::from_value(value).map_err(D::Error::custom)?,
            ),
            WorkloadType::PublicIp => WorkloadData::PublicIp(
                serde_json::from_value(value).map_err(D::Error::custom)?,
            ),
            WorkloadType::Proxy => WorkloadData::GatewayProxy(
                serde_json::from_value(value).map_err(D::Error::custom)?,
            ),
            WorkloadType::ReverseProxy => WorkloadData::GatewayReverseProxy(
                serde_json::from_value(value).map_err(D::Error::custom)?,
            ),
            WorkloadType::Subdomain => WorkloadData::GatewaySubdomain(
                serde_json::from_value(value).map_err(D::Error::custom)?,
            ),
            WorkloadType::DomainDelegate => WorkloadData::GatewayDelegate(
                serde_json::from_value(value).map_err(D::Error::custom)?,
            ),
            WorkloadType::Gateway4To6 => WorkloadData::Gateway4To6(
                serde_json::from_value(value).map_err(D::Error::custom)?,
            ),
        };

        Ok(Workload { info, data })
    }
}

impl FromRedisValue for Workload {
    fn from_redis_value(v: &Value) -> RedisResult<Self> {
        match v {
            Value::BulkString(s) => serde_json::from_slice(s).map_err(|_| {
                RedisError::from((
                    ErrorKind::TypeError,
                    "Failed to deserialize Workload from string",
                    format!("Invalid JSON string: {:?}", s),
                ))
            }),
            _ => Err(RedisError::from((
                ErrorKind::TypeError,
                "Response type not compatible with Workload",
                format!("Received: {:?}", v),
            ))),
        }
    }
}

impl ToRedisArgs for Workload {
    fn write_redis_args<W>(&self, out: &mut W)
    where
        W: ?Sized + RedisWrite,
    {
        let json = serde_json::to_string(self).expect("Failed to serialize Workload to JSON");
        out.write_arg(json.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn volume_workload(id: i64) -> Workload {
        Workload {
            info: ReservationInfo {
                id,
                workload_id: 1,
                node_id: "node-1".to_string(),
                pool_id: 7,
                customer_tid: 42,
                customer_signature: "00".to_string(),
                workload_type: WorkloadType::Volume,
                version: WORKLOAD_VERSION,
                ..Default::default()
            },
            data: WorkloadData::Volume(Volume {
                size: 1,
                kind: VolumeType::Ssd,
            }),
        }
    }

    #[test]
    fn header_challenge_is_stable() {
        let mut workload = volume_workload(3);
        workload.info.currencies = vec!["TFT".to_string(), "TFTA".to_string()];
        workload.info.metadata = "meta".to_string();
        workload.info.description = "desc".to_string();
        workload.info.signing_request_provision = SigningRequest {
            signers: vec![7, 9],
            quorum_min: 2,
        };
        workload.info.expiration_provisioning = 1_600_000_000;

        assert_eq!(
            workload.signature_challenge(),
            "3427node-1TFT,TFTAmetadesc\
             {\"signers\":[7,9],\"quorum_min\":2}\
             {\"signers\":[],\"quorum_min\":0}\
             16000000001SSD"
        );
    }

    #[test]
    fn json_round_trip_keeps_the_variant() {
        let workload = volume_workload(11);
        let json = serde_json::to_string(&workload).unwrap();
        let back: Workload = serde_json::from_str(&json).unwrap();

        assert_eq!(back.info.id, 11);
        assert_eq!(back.info.workload_type, WorkloadType::Volume);
        match back.data {
            WorkloadData::Volume(v) => {
                assert_eq!(v.size, 1);
                assert_eq!(v.kind, VolumeType::Ssd);
            }
            other => panic!("expected volume data, got {:?}", other),
        }
    }

    #[test]
    fn signing_request_thresholds() {
        let request = SigningRequest {
            signers: vec![7, 9],
            quorum_min: 2,
        };
        let sig = |tid: i64| SigningSignature {
            tid,
            signature: "00".to_string(),
            epoch: 0,
        };

        assert!(!request.satisfied_by(&[sig(7)]));
        assert!(request.satisfied_by(&[sig(7), sig(9)]));
        // duplicates do not inflate the quorum
        assert!(!request.satisfied_by(&[sig(7), sig(7)]));

        let open = SigningRequest::default();
        assert!(open.satisfied_by(&[]));
    }
}
