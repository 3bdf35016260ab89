pub mod asset;
pub mod wallet;

pub use asset::Asset;
pub use wallet::{PaymentInfo, Wallet};
