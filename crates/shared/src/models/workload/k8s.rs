use std::fmt::Write as _;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::Rsu;

/// SSD size (GiB) assigned when a custom-sized cluster member is bound to a
/// node's residual capacity.
pub const CUSTOM_SIZE_SRU: f64 = 50.0;

/// Size `-1` asks the explorer to fill in a custom size from the target
/// node's residual capacity at admission time.
pub const CUSTOM_SIZE: i64 = -1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct K8sCustomSize {
    pub cru: i64,
    pub mru: f64,
    pub sru: f64,
}

/// The fixed VM size table. Sizes are stable identifiers on the wire; the
/// values never change for a given index.
pub fn size_table(size: i64) -> Option<Rsu> {
    let (cru, mru, sru) = match size {
        1 => (1, 2.0, 50.0),
        2 => (2, 4.0, 100.0),
        3 => (2, 8.0, 25.0),
        4 => (2, 5.0, 50.0),
        5 => (2, 8.0, 200.0),
        6 => (4, 16.0, 50.0),
        7 => (4, 16.0, 100.0),
        8 => (4, 16.0, 400.0),
        9 => (8, 32.0, 100.0),
        10 => (8, 32.0, 200.0),
        11 => (8, 32.0, 800.0),
        12 => (1, 64.0, 200.0),
        13 => (1, 64.0, 400.0),
        14 => (1, 64.0, 800.0),
        15 => (1, 2.0, 25.0),
        16 => (2, 4.0, 50.0),
        17 => (4, 8.0, 50.0),
        18 => (1, 1.0, 25.0),
        _ => return None,
    };
    Some(Rsu {
        cru,
        mru,
        sru,
        hru: 0.0,
    })
}

/// A Kubernetes cluster member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct K8s {
    pub size: i64,
    #[serde(default)]
    pub cluster_secret: String,
    pub network_id: String,
    pub ipaddress: IpAddr,
    #[serde(default)]
    pub master_ips: Vec<IpAddr>,
    #[serde(default)]
    pub ssh_keys: Vec<String>,
    /// Id of a deployed PublicIP workload to expose this member on, 0 if
    /// none.
    #[serde(default)]
    pub public_ip: i64,
    #[serde(default)]
    pub datastore_endpoint: String,
    #[serde(default)]
    pub disable_default_ingress: bool,
    #[serde(default)]
    pub custom_size: K8sCustomSize,
}

impl K8s {
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
            .ok_or_else(|| anyhow::anyhow!("kubernetes VM size {} is not supported", self.size))
    }

    pub fn signature_challenge(&self, b: &mut String) {
        let _ = write!(b, "{}", self.size);
        let _ = write!(b, "{}", self.cluster_secret);
        let _ = write!(b, "{}", self.network_id);
        let _ = write!(b, "{}", self.ipaddress);
        for ip in &self.master_ips {
            let _ = write!(b, "{}", ip);
        }
        for key in &self.ssh_keys {
            let _ = write!(b, "{}", key);
        }
        let _ = write!(b, "{}", self.public_ip);
        let _ = write!(b, "{}", self.datastore_endpoint);
        let _ = write!(b, "{}", self.disable_default_ingress);
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.network_id.is_empty() {
            anyhow::bail!("kubernetes member needs a network");
        }
        if self.size != CUSTOM_SIZE && size_table(self.size).is_none() {
            anyhow::bail!("kubernetes VM size {} is not supported", self.size);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn member(size: i64) -> K8s {
        K8s {
            size,
            cluster_secret: String::new(),
            network_id: "net".to_string(),
            ipaddress: IpAddr::from_str("10.0.0.2").unwrap(),
            master_ips: vec![],
            ssh_keys: vec![],
            public_ip: 0,
            datastore_endpoint: String::new(),
            disable_default_ingress: false,
            custom_size: K8sCustomSize::default(),
        }
    }

    #[test]
    fn size_table_lookup() {
        assert_eq!(member(1).rsu().unwrap(), Rsu { cru: 1, mru: 2.0, sru: 50.0, hru: 0.0 });
        assert_eq!(member(11).rsu().unwrap(), Rsu { cru: 8, mru: 32.0, sru: 800.0, hru: 0.0 });
        assert!(member(19).rsu().is_err());
        assert!(member(0).rsu().is_err());
    }

    #[test]
    fn custom_size_reads_the_bound_values() {
        let mut m = member(CUSTOM_SIZE);
        m.custom_size = K8sCustomSize {
            cru: 6,
            mru: 24.0,
            sru: CUSTOM_SIZE_SRU,
        };
        assert_eq!(m.rsu().unwrap(), Rsu { cru: 6, mru: 24.0, sru: 50.0, hru: 0.0 });
    }

    #[test]
    fn challenge_fixture() {
        let mut m = member(2);
        m.cluster_secret = "s3cret".to_string();
        m.master_ips = vec![IpAddr::from_str("10.0.0.1").unwrap()];
        m.ssh_keys = vec!["ssh-ed25519 AAAA".to_string()];
        m.public_ip = 12;

        let mut b = String::new();
        m.signature_challenge(&mut b);
        assert_eq!(b, "2s3cretnet10.0.0.210.0.0.1ssh-ed25519 AAAA12false");
    }
}
