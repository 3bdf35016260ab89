use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use super::Rsu;

#[derive(Debug, Clone, Copy, Serialize_repr, Deserialize_repr, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum VolumeType {
    Hdd = 0,
    #[default]
    Ssd = 1,
}

impl VolumeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeType::Hdd => "HDD",
            VolumeType::Ssd => "SSD",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize_repr, Deserialize_repr, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DiskType {
    Hdd = 0,
    #[default]
    Ssd = 1,
}

impl DiskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskType::Hdd => "hdd",
            DiskType::Ssd => "ssd",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize_repr, Deserialize_repr, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ZdbMode {
    #[default]
    Seq = 0,
    User = 1,
}

impl ZdbMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZdbMode::Seq => "seq",
            ZdbMode::User => "user",
        }
    }
}

/// A raw block volume, sized in GiB.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Volume {
    pub size: i64,
    #[serde(rename = "type")]
    pub kind: VolumeType,
}

impl Volume {
    pub fn rsu(&self) -> anyhow::Result<Rsu> {
        Ok(match self.kind {
            VolumeType::Hdd => Rsu {
                hru: self.size as f64,
                ..Default::default()
            },
            VolumeType::Ssd => Rsu {
                sru: self.size as f64,
                ..Default::default()
            },
        })
    }

    pub fn signature_challenge(&self, b: &mut String) {
        let _ = write!(b, "{}", self.size);
        let _ = write!(b, "{}", self.kind.as_str());
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.size <= 0 {
            anyhow::bail!("volume size must be strictly positive");
        }
        Ok(())
    }
}

/// A zero-db storage namespace.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Zdb {
    pub size: i64,
    pub mode: ZdbMode,
    #[serde(default)]
    pub password: String,
    pub disk_type: DiskType,
    #[serde(default)]
    pub public: bool,
}

impl Zdb {
    pub fn rsu(&self) -> anyhow::Result<Rsu> {
        Ok(match self.disk_type {
            DiskType::Hdd => Rsu {
                hru: self.size as f64,
                ..Default::default()
            },
            DiskType::Ssd => Rsu {
                sru: self.size as f64,
                ..Default::default()
            },
        })
    }

    pub fn signature_challenge(&self, b: &mut String) {
        let _ = write!(b, "{}", self.size);
        let _ = write!(b, "{}", self.mode.as_str());
        let _ = write!(b, "{}", self.password);
        let _ = write!(b, "{}", self.disk_type.as_str());
        let _ = write!(b, "{}", self.public);
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.size <= 0 {
            anyhow::bail!("zdb namespace size must be strictly positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_rsu_lands_on_the_right_disk() {
        let ssd = Volume {
            size: 100,
            kind: VolumeType::Ssd,
        };
        assert_eq!(ssd.rsu().unwrap().sru, 100.0);
        assert_eq!(ssd.rsu().unwrap().hru, 0.0);

        let hdd = Volume {
            size: 100,
            kind: VolumeType::Hdd,
        };
        assert_eq!(hdd.rsu().unwrap().hru, 100.0);
        assert_eq!(hdd.rsu().unwrap().sru, 0.0);
    }

    #[test]
    fn zdb_challenge_fixture() {
        let zdb = Zdb {
            size: 10,
            mode: ZdbMode::User,
            password: "secret".to_string(),
            disk_type: DiskType::Hdd,
            public: true,
        };
        let mut b = String::new();
        zdb.signature_challenge(&mut b);
        assert_eq!(b, "10usersecrethddtrue");
    }
}
