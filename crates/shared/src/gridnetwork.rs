use serde::{Deserialize, Serialize};

use crate::models::pool::CapacityReservationData;
use crate::stellar::asset::Asset;

/// FreeTFT is only billable when every node in the pool is free to use.
pub const FREE_TFT_CODE: &str = "FreeTFT";

/// Stroop prices per cloud-unit-hour. One stroop = 1e-7 of the asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloudUnitPrice {
    pub cu: i64,
    pub su: i64,
    pub nu: i64,
    pub ipv4u: i64,
}

const DEFAULT_PRICE: CloudUnitPrice = CloudUnitPrice {
    // 2.5 per CU hour
    cu: 25_000_000,
    // 1.0 per SU hour
    su: 10_000_000,
    // 0.5 per NU hour
    nu: 5_000_000,
    // 1.0 per IPv4U hour
    ipv4u: 10_000_000,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GridNetwork {
    Mainnet,
    Testnet,
}

impl std::str::FromStr for GridNetwork {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(GridNetwork::Mainnet),
            "testnet" => Ok(GridNetwork::Testnet),
            other => anyhow::bail!("unknown grid network '{}'", other),
        }
    }
}

/// Deployment-wide constants: supported assets, prices, cuts and windows.
/// Built once at boot and never mutated.
#[derive(Debug, Clone)]
pub struct GridPolicy {
    pub network: GridNetwork,
    pub foundation_address: String,
    /// Fraction of every sweep paid to the foundation.
    pub foundation_cut: f64,
    /// Seconds a customer has to fund an escrow.
    pub payment_window: i64,
    /// Extra slack granted on top of the window before expiry fires.
    pub payment_grace: i64,
    /// Seconds between capacity expiry sweeps.
    pub sweep_interval: u64,
}

impl GridPolicy {
    pub fn new(network: GridNetwork, foundation_address: String) -> Self {
        GridPolicy {
            network,
            foundation_address,
            foundation_cut: 0.10,
            payment_window: 3_600,
            payment_grace: 300,
            sweep_interval: 15,
        }
    }

    /// Assets billable on this deployment, in no particular order.
    pub fn supported_assets(&self) -> Vec<Asset> {
        match self.network {
            GridNetwork::Mainnet => vec![
                Asset::tft_mainnet(),
                Asset::tfta_mainnet(),
                Asset::free_tft_mainnet(),
            ],
            GridNetwork::Testnet => vec![
                Asset::tft_testnet(),
                Asset::tfta_testnet(),
                Asset::free_tft_testnet(),
            ],
        }
    }

    pub fn asset_by_code(&self, code: &str) -> Option<Asset> {
        self.supported_assets().into_iter().find(|a| a.code() == code)
    }

    pub fn price(&self, _asset: &Asset) -> CloudUnitPrice {
        // all supported assets currently share one price table
        DEFAULT_PRICE
    }

    /// Stroops owed for the requested cloud-unit-seconds.
    pub fn escrow_amount(&self, asset: &Asset, data: &CapacityReservationData) -> i64 {
        let price = self.price(asset);
        let per_hour = data.cus as i128 * price.cu as i128
            + data.sus as i128 * price.su as i128
            + data.nus as i128 * price.nu as i128
            + data.ipv4us as i128 * price.ipv4u as i128;
        (per_hour / 3_600) as i64
    }

    /// Stroops of a sweep that go to the foundation.
    pub fn foundation_amount(&self, total: i64) -> i64 {
        (total as f64 * self.foundation_cut) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escrow_amount_matches_the_price_table() {
        let policy = GridPolicy::new(GridNetwork::Mainnet, String::new());
        let asset = Asset::tft_mainnet();

        // 10 CU-hours at 2.5 TFT per hour = 25 TFT
        let data = CapacityReservationData {
            cus: 36_000,
            ..Default::default()
        };
        assert_eq!(policy.escrow_amount(&asset, &data), 250_000_000);
    }

    #[test]
    fn foundation_takes_its_cut() {
        let policy = GridPolicy::new(GridNetwork::Mainnet, String::new());
        assert_eq!(policy.foundation_amount(250_000_000), 25_000_000);
    }

    #[test]
    fn networks_expose_disjoint_issuers() {
        let main = GridPolicy::new(GridNetwork::Mainnet, String::new());
        let test = GridPolicy::new(GridNetwork::Testnet, String::new());

        let main_tft = main.asset_by_code("TFT").unwrap();
        let test_tft = test.asset_by_code("TFT").unwrap();
        assert_ne!(main_tft.issuer(), test_tft.issuer());
        assert!(main.asset_by_code("DOGE").is_none());
    }
}
