use std::fmt::Write as _;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WireguardPeer {
    pub public_key: String,
    #[serde(default)]
    pub endpoint: String,
    /// "ip/mask" notation.
    pub iprange: String,
    #[serde(default)]
    pub allowed_iprange: Vec<String>,
}

impl WireguardPeer {
    fn signature_challenge(&self, b: &mut String) {
        let _ = write!(b, "{}", self.public_key);
        let _ = write!(b, "{}", self.endpoint);
        let _ = write!(b, "{}", self.iprange);
        for range in &self.allowed_iprange {
            let _ = write!(b, "{}", range);
        }
    }
}

/// One node's leg of an overlay network.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetworkResource {
    pub name: String,
    pub network_iprange: String,
    pub wireguard_private_key_encrypted: String,
    pub wireguard_public_key: String,
    pub wireguard_listen_port: i64,
    pub iprange: String,
    #[serde(default)]
    pub peers: Vec<WireguardPeer>,
}

impl NetworkResource {
    pub fn signature_challenge(&self, b: &mut String) {
        let _ = write!(b, "{}", self.name);
        let _ = write!(b, "{}", self.network_iprange);
        let _ = write!(b, "{}", self.wireguard_private_key_encrypted);
        let _ = write!(b, "{}", self.wireguard_public_key);
        let _ = write!(b, "{}", self.wireguard_listen_port);
        let _ = write!(b, "{}", self.iprange);
        for peer in &self.peers {
            peer.signature_challenge(b);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("network resource name is required");
        }
        validate_iprange(&self.network_iprange)?;
        validate_iprange(&self.iprange)?;
        for peer in &self.peers {
            validate_iprange(&peer.iprange)?;
        }
        Ok(())
    }
}

/// A reservation of a farm-owned routable IPv4 address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicIp {
    pub ipaddress: IpAddr,
}

impl PublicIp {
    pub fn signature_challenge(&self, b: &mut String) {
        let _ = write!(b, "{}", self.ipaddress);
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.ipaddress.is_ipv4() {
            anyhow::bail!("public ip reservations are ipv4 only");
        }
        Ok(())
    }
}

fn validate_iprange(range: &str) -> anyhow::Result<()> {
    let (ip, mask) = range
        .split_once('/')
        .ok_or_else(|| anyhow::anyhow!("ip range '{}' must be in ip/mask notation", range))?;
    ip.parse::<IpAddr>()?;
    let mask: u8 = mask.parse()?;
    if mask > 128 {
        anyhow::bail!("invalid mask /{}", mask);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn network_resource_challenge_fixture() {
        let resource = NetworkResource {
            name: "net-1".to_string(),
            network_iprange: "10.0.0.0/16".to_string(),
            wireguard_private_key_encrypted: "enc".to_string(),
            wireguard_public_key: "pub".to_string(),
            wireguard_listen_port: 51820,
            iprange: "10.0.1.0/24".to_string(),
            peers: vec![WireguardPeer {
                public_key: "peer".to_string(),
                endpoint: "1.2.3.4:51820".to_string(),
                iprange: "10.0.2.0/24".to_string(),
                allowed_iprange: vec!["10.0.0.0/16".to_string()],
            }],
        };

        let mut b = String::new();
        resource.signature_challenge(&mut b);
        assert_eq!(
            b,
            "net-110.0.0.0/16encpub5182010.0.1.0/24peer1.2.3.4:5182010.0.2.0/2410.0.0.0/16"
        );
    }

    #[test]
    fn public_ip_is_v4_only() {
        let v4 = PublicIp {
            ipaddress: IpAddr::from_str("203.0.113.7").unwrap(),
        };
        assert!(v4.validate().is_ok());

        let v6 = PublicIp {
            ipaddress: IpAddr::from_str("2001:db8::1").unwrap(),
        };
        assert!(v6.validate().is_err());
    }
}
