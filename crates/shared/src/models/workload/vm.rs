use std::fmt::Write as _;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::k8s::{size_table, K8sCustomSize, CUSTOM_SIZE};
use super::Rsu;

/// A standalone virtual machine. Shares the kubernetes size table and the
/// custom-size mechanism.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub size: i64,
    pub network_id: String,
    pub ipaddress: IpAddr,
    #[serde(default)]
    pub ssh_keys: Vec<String>,
    /// Id of a deployed PublicIP workload to expose this VM on, 0 if none.
    #[serde(default)]
    pub public_ip: i64,
    #[serde(default)]
    pub custom_size: K8sCustomSize,
}

impl VirtualMachine {
    pub fn rsu(&self) -> anyhow::Result<Rsu> {
        if self.size == CUSTOM_SIZE {
            return Ok(Rsu {
                cru: self.custom_size.cru,
                mru: self.custom_size.mru,
                sru: self.custom_size.sru,
                hru: 0.0,
            });
        }
        size_table(self.size)
            .ok_or_else(|| anyhow::anyhow!("VM size {} is not supported", self.size))
    }

    pub fn signature_challenge(&self, b: &mut String) {
        let _ = write!(b, "{}", self.size);
        let _ = write!(b, "{}", self.network_id);
        let _ = write!(b, "{}", self.ipaddress);
        for key in &self.ssh_keys {
            let _ = write!(b, "{}", key);
        }
        let _ = write!(b, "{}", self.public_ip);
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.network_id.is_empty() {
            anyhow::bail!("virtual machine needs a network");
        }
        if self.size != CUSTOM_SIZE && size_table(self.size).is_none() {
            anyhow::bail!("VM size {} is not supported", self.size);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn challenge_fixture() {
        let vm = VirtualMachine {
            size: 2,
            network_id: "net".to_string(),
            ipaddress: IpAddr::from_str("10.0.0.9").unwrap(),
            ssh_keys: vec!["ssh-ed25519 AAAA".to_string()],
            public_ip: 7,
            custom_size: K8sCustomSize::default(),
        };
        let mut b = String::new();
        vm.signature_challenge(&mut b);
        assert_eq!(b, "2net10.0.0.9ssh-ed25519 AAAA7");
    }

    #[test]
    fn custom_size_falls_back_to_the_bound_values() {
        let vm = VirtualMachine {
            size: CUSTOM_SIZE,
            network_id: "net".to_string(),
            ipaddress: IpAddr::from_str("10.0.0.9").unwrap(),
            ssh_keys: vec![],
            public_ip: 0,
            custom_size: K8sCustomSize {
                cru: 4,
                mru: 8.0,
                sru: 50.0,
            },
        };
        let rsu = vm.rsu().unwrap();
        assert_eq!(rsu.cru, 4);
        assert_eq!(rsu.mru, 8.0);
        assert_eq!(rsu.sru, 50.0);
    }
}
