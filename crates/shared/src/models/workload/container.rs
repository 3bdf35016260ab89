use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::storage::DiskType;
use super::Rsu;

/// Disk space every container gets for free before storage units are
/// charged, in MiB.
const FREE_DISK_SPACE_MIB: i64 = 50 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContainerMount {
    pub volume_id: String,
    pub mountpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConnection {
    pub network_id: String,
    pub ipaddress: IpAddr,
    #[serde(default)]
    pub public_ip6: bool,
}

/// CPU, memory (MiB) and disk (MiB) claimed by a container.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContainerCapacity {
    pub cpu: i64,
    pub memory: i64,
    pub disk_type: DiskType,
    pub disk_size: i64,
}

impl ContainerCapacity {
    pub fn rsu(&self) -> Rsu {
        // memory is charged in GiB, rounded to 4 decimals
        let mru = (self.memory as f64 / 1024.0 * 10_000.0).round() / 10_000.0;
        let chargeable = (self.disk_size - FREE_DISK_SPACE_MIB).max(0) as f64 / 1024.0;
        let (sru, hru) = match self.disk_type {
            DiskType::Ssd => (chargeable, 0.0),
            DiskType::Hdd => (0.0, chargeable),
        };
        Rsu {
            cru: self.cpu,
            mru,
            sru,
            hru,
        }
    }

    pub fn signature_challenge(&self, b: &mut String) {
        let _ = write!(b, "{}", self.cpu);
        let _ = write!(b, "{}", self.memory);
        let _ = write!(b, "{}", self.disk_type.as_str());
        let _ = write!(b, "{}", self.disk_size);
    }
}

/// A containerized workload booted from a flist image.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Container {
    pub flist: String,
    #[serde(default)]
    pub hub_url: String,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub secret_environment: BTreeMap<String, String>,
    #[serde(default)]
    pub entrypoint: String,
    #[serde(default)]
    pub interactive: bool,
    #[serde(default)]
    pub volumes: Vec<ContainerMount>,
    #[serde(default)]
    pub network_connection: Vec<NetworkConnection>,
    pub capacity: ContainerCapacity,
}

impl Container {
    pub fn rsu(&self) -> anyhow::Result<Rsu> {
        Ok(self.capacity.rsu())
    }

    pub fn signature_challenge(&self, b: &mut String) {
        let _ = write!(b, "{}", self.flist);
        let _ = write!(b, "{}", self.hub_url);
        for (key, value) in &self.environment {
            let _ = write!(b, "{}={}", key, value);
        }
        for (key, value) in &self.secret_environment {
            let _ = write!(b, "{}={}", key, value);
        }
        let _ = write!(b, "{}", self.entrypoint);
        let _ = write!(b, "{}", self.interactive);
        for volume in &self.volumes {
            let _ = write!(b, "{}{}", volume.volume_id, volume.mountpoint);
        }
        for connection in &self.network_connection {
            let _ = write!(
                b,
                "{}{}{}",
                connection.network_id, connection.ipaddress, connection.public_ip6
            );
        }
        self.capacity.signature_challenge(b);
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.flist.is_empty() {
            anyhow::bail!("container flist is required");
        }
        if self.capacity.cpu <= 0 || self.capacity.memory <= 0 {
            anyhow::bail!("container capacity must claim cpu and memory");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_to_rsu() {
        let cases = [
            // (cpu, memory, disk_size, disk_type, expected)
            (1, 1024, 256, DiskType::Ssd, Rsu { cru: 1, mru: 1.0, sru: 0.0, hru: 0.0 }),
            (1, 1024, 1024, DiskType::Ssd, Rsu { cru: 1, mru: 1.0, sru: 0.0, hru: 0.0 }),
            (4, 2048, 10240, DiskType::Hdd, Rsu { cru: 4, mru: 2.0, sru: 0.0, hru: 0.0 }),
            (1, 200, 10000, DiskType::Hdd, Rsu { cru: 1, mru: 0.1953, sru: 0.0, hru: 0.0 }),
            (1, 200, 52224, DiskType::Ssd, Rsu { cru: 1, mru: 0.1953, sru: 1.0, hru: 0.0 }),
        ];

        for (cpu, memory, disk_size, disk_type, expected) in cases {
            let capacity = ContainerCapacity {
                cpu,
                memory,
                disk_type,
                disk_size,
            };
            assert_eq!(capacity.rsu(), expected, "capacity {:?}", capacity);
        }
    }

    #[test]
    fn environment_challenge_is_sorted() {
        let mut container = Container {
            flist: "https://hub/example.flist".to_string(),
            capacity: ContainerCapacity {
                cpu: 1,
                memory: 1024,
                disk_type: DiskType::Ssd,
                disk_size: 0,
            },
            ..Default::default()
        };
        container.environment.insert("B".to_string(), "2".to_string());
        container.environment.insert("A".to_string(), "1".to_string());

        let mut b = String::new();
        container.signature_challenge(&mut b);
        assert!(b.contains("A=1B=2"));
    }
}
