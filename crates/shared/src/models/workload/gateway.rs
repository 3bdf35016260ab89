use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// Forward traffic for a domain to a fixed backend address.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayProxy {
    pub domain: String,
    pub addr: String,
    pub port: u32,
    #[serde(default)]
    pub port_tls: u32,
}

impl GatewayProxy {
    pub fn signature_challenge(&self, b: &mut String) {
        let _ = write!(b, "{}", self.domain);
        let _ = write!(b, "{}", self.addr);
        let _ = write!(b, "{}", self.port);
        let _ = write!(b, "{}", self.port_tls);
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.domain.is_empty() {
            anyhow::bail!("gateway proxy domain is required");
        }
        if self.port == 0 {
            anyhow::bail!("gateway proxy port is required");
        }
        Ok(())
    }
}

/// Proxy where the backend dials out to the gateway with a shared secret.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayReverseProxy {
    pub domain: String,
    pub secret: String,
}

impl GatewayReverseProxy {
    pub fn signature_challenge(&self, b: &mut String) {
        let _ = write!(b, "{}", self.domain);
        let _ = write!(b, "{}", self.secret);
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.domain.is_empty() {
            anyhow::bail!("reverse proxy domain is required");
        }
        if self.secret.is_empty() {
            anyhow::bail!("reverse proxy secret is required");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewaySubdomain {
    pub domain: String,
    pub ips: Vec<String>,
}

impl GatewaySubdomain {
    pub fn signature_challenge(&self, b: &mut String) {
        let _ = write!(b, "{}", self.domain);
        for ip in &self.ips {
            let _ = write!(b, "{}", ip);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.domain.is_empty() {
            anyhow::bail!("subdomain is required");
        }
        if self.ips.is_empty() {
            anyhow::bail!("subdomain needs at least one destination ip");
        }
        Ok(())
    }
}

/// Delegate DNS control of a domain to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayDelegate {
    pub domain: String,
}

impl GatewayDelegate {
    pub fn signature_challenge(&self, b: &mut String) {
        let _ = write!(b, "{}", self.domain);
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.domain.is_empty() {
            anyhow::bail!("delegated domain is required");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Gateway4To6 {
    pub public_key: String,
}

impl Gateway4To6 {
    pub fn signature_challenge(&self, b: &mut String) {
        let _ = write!(b, "{}", self.public_key);
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.public_key.is_empty() {
            anyhow::bail!("gateway4to6 public key is required");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge_of(f: impl Fn(&mut String)) -> String {
        let mut b = String::new();
        f(&mut b);
        b
    }

    #[test]
    fn challenge_fixtures() {
        let proxy = GatewayProxy {
            domain: "app.grid.test".to_string(),
            addr: "10.1.0.5".to_string(),
            port: 8080,
            port_tls: 8443,
        };
        assert_eq!(
            challenge_of(|b| proxy.signature_challenge(b)),
            "app.grid.test10.1.0.580808443"
        );

        let reverse = GatewayReverseProxy {
            domain: "app.grid.test".to_string(),
            secret: "s3cret".to_string(),
        };
        assert_eq!(
            challenge_of(|b| reverse.signature_challenge(b)),
            "app.grid.tests3cret"
        );

        let subdomain = GatewaySubdomain {
            domain: "sub.grid.test".to_string(),
            ips: vec!["203.0.113.7".to_string(), "203.0.113.8".to_string()],
        };
        assert_eq!(
            challenge_of(|b| subdomain.signature_challenge(b)),
            "sub.grid.test203.0.113.7203.0.113.8"
        );

        let delegate = GatewayDelegate {
            domain: "grid.test".to_string(),
        };
        assert_eq!(challenge_of(|b| delegate.signature_challenge(b)), "grid.test");

        let gw46 = Gateway4To6 {
            public_key: "wgkey=".to_string(),
        };
        assert_eq!(challenge_of(|b| gw46.signature_challenge(b)), "wgkey=");
    }
}
