use serde::{Deserialize, Serialize};

/// An asset on the stellar network, code and issuer in the form
/// `<CODE>:<ISSUER>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Asset(String);

impl Asset {
    pub fn tft_mainnet() -> Asset {
        Asset("TFT:GBOVQKJYHXRR3DX6NOX2RRYFRCUMSADGDESTDNBDS6CDVLGVESRTAC47".to_string())
    }

    pub fn tft_testnet() -> Asset {
        Asset("TFT:GA47YZA3PKFUZMPLQ3B5F2E3CJIB57TGGU7SPCQT2WAEYKN766PWIMB3".to_string())
    }

    pub fn tfta_mainnet() -> Asset {
        Asset("TFTA:GBUT4GP5GJ6B3XW5PXENHQA7TXJI5GOPW3NF4W3ZIW6OOO4ISY6WNLN2".to_string())
    }

    pub fn tfta_testnet() -> Asset {
        Asset("TFTA:GB55A4RR4G2MIORJTQA4L6FENZU7K4W7ATGY6YOT2CW47M5SZYGYKSCT".to_string())
    }

    pub fn free_tft_mainnet() -> Asset {
        Asset("FreeTFT:GCBGS5TFE2BPPUVY55ZPEMWWGR6CLQ7T6P46SOFGHXEBJ34MSP6HVEUT".to_string())
    }

    pub fn free_tft_testnet() -> Asset {
        Asset("FreeTFT:GBLDUINEFYTF7XEE7YNWA3JQS4K2VD37YU7I2YAE7R5AHZDKQXSS2J6R".to_string())
    }

    pub fn parse(s: &str) -> anyhow::Result<Asset> {
        let asset = Asset(s.to_string());
        asset.validate()?;
        Ok(asset)
    }

    pub fn code(&self) -> &str {
        self.0.split(':').next().unwrap_or_default()
    }

    pub fn issuer(&self) -> &str {
        self.0.split(':').nth(1).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(&self) -> anyhow::Result<()> {
        let parts: Vec<&str> = self.0.split(':').collect();
        if parts.len() != 2 {
            anyhow::bail!(
                "invalid amount of parts in asset string, got {}, expected 2",
                parts.len()
            );
        }
        if parts[0].is_empty() {
            anyhow::bail!("missing code in asset");
        }
        if parts[1].is_empty() {
            anyhow::bail!("missing issuer in asset");
        }
        Ok(())
    }
}

impl std::fmt::Display for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_and_issuer_split() {
        let asset = Asset::tft_mainnet();
        assert_eq!(asset.code(), "TFT");
        assert_eq!(
            asset.issuer(),
            "GBOVQKJYHXRR3DX6NOX2RRYFRCUMSADGDESTDNBDS6CDVLGVESRTAC47"
        );
    }

    #[test]
    fn parse_rejects_malformed_strings() {
        assert!(Asset::parse("TFT").is_err());
        assert!(Asset::parse(":ISSUER").is_err());
        assert!(Asset::parse("TFT:").is_err());
        assert!(Asset::parse("TFT:ISSUER").is_ok());
    }
}
