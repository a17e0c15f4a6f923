//! Collateral and borrow asset registry
//!
//! Static risk parameters per asset. The registry is immutable once a
//! [`crate::CollateralManager`] owns it; positions copy the parameters they
//! need at open time.

use ahash::AHashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{AssetRole, LedgerError, LedgerResult};

/// Collateral quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum QualityTier {
    /// Stablecoin collateral
    S,
    /// Blue-chip collateral
    AAA,
    /// High quality, more volatile
    AA,
    /// Volatile collateral
    A,
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::S => "S",
            Self::AAA => "AAA",
            Self::AA => "AA",
            Self::A => "A",
        };
        f.write_str(label)
    }
}

/// Risk parameters of an accepted collateral asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralAsset {
    /// Asset symbol
    pub symbol: String,
    /// Quality tier
    pub quality: QualityTier,
    /// Maximum loan-to-value at open (0..=1)
    pub max_ltv: Decimal,
    /// Minimum collateral/debt ratio before liquidation
    pub liquidation_threshold: Decimal,
    /// Fraction of collateral value taken on liquidation
    pub liquidation_penalty: Decimal,
}

/// Borrowable asset and its annual interest rate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowAsset {
    /// Asset symbol
    pub symbol: String,
    /// Annual interest rate in percent (5.0 = 5%)
    pub annual_rate_pct: Decimal,
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    collateral: Vec<CollateralAsset>,
    #[serde(default)]
    borrow: Vec<BorrowAsset>,
}

/// Registry of collateral and borrow assets
#[derive(Debug, Clone)]
pub struct CollateralRegistry {
    collateral: Vec<CollateralAsset>,
    borrow: Vec<BorrowAsset>,
    collateral_index: AHashMap<String, usize>,
    borrow_index: AHashMap<String, usize>,
}

impl CollateralRegistry {
    /// Build a registry from explicit asset lists
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Configuration`] on duplicate symbols or
    /// out-of-range risk parameters
    pub fn new(collateral: Vec<CollateralAsset>, borrow: Vec<BorrowAsset>) -> LedgerResult<Self> {
        let mut collateral_index = AHashMap::with_capacity(collateral.len());
        for (idx, asset) in collateral.iter().enumerate() {
            validate_collateral(asset)?;
            if collateral_index.insert(asset.symbol.clone(), idx).is_some() {
                return Err(LedgerError::config(format!("duplicate collateral asset {}", asset.symbol)));
            }
        }

        let mut borrow_index = AHashMap::with_capacity(borrow.len());
        for (idx, asset) in borrow.iter().enumerate() {
            if asset.symbol.is_empty() {
                return Err(LedgerError::config("borrow asset with empty symbol"));
            }
            if asset.annual_rate_pct.is_sign_negative() {
                return Err(LedgerError::config(format!("negative interest rate for {}", asset.symbol)));
            }
            if borrow_index.insert(asset.symbol.clone(), idx).is_some() {
                return Err(LedgerError::config(format!("duplicate borrow asset {}", asset.symbol)));
            }
        }

        Ok(Self {
            collateral,
            borrow,
            collateral_index,
            borrow_index,
        })
    }

    /// Parse a registry from TOML with `[[collateral]]` and `[[borrow]]` tables
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Configuration`] if the document is malformed or
    /// fails validation
    pub fn from_toml_str(source: &str) -> LedgerResult<Self> {
        let file: RegistryFile =
            toml::from_str(source).map_err(|e| LedgerError::config(format!("invalid registry: {e}")))?;
        Self::new(file.collateral, file.borrow)
    }

    /// Load a registry from a TOML file
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Configuration`] if the file cannot be read or parsed
    pub fn from_file<P: AsRef<Path>>(path: P) -> LedgerResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| LedgerError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Look up a collateral asset
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::UnsupportedAsset`] if the symbol is not accepted
    pub fn collateral(&self, symbol: &str) -> LedgerResult<&CollateralAsset> {
        self.collateral_index
            .get(symbol)
            .and_then(|idx| self.collateral.get(*idx))
            .ok_or_else(|| LedgerError::UnsupportedAsset {
                symbol: symbol.to_owned(),
                role: AssetRole::Collateral,
            })
    }

    /// Look up a borrowable asset
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::UnsupportedAsset`] if the symbol cannot be borrowed
    pub fn borrow_asset(&self, symbol: &str) -> LedgerResult<&BorrowAsset> {
        self.borrow_index
            .get(symbol)
            .and_then(|idx| self.borrow.get(*idx))
            .ok_or_else(|| LedgerError::UnsupportedAsset {
                symbol: symbol.to_owned(),
                role: AssetRole::Borrow,
            })
    }

    /// Collateral assets in registration order
    #[must_use]
    pub fn collateral_assets(&self) -> &[CollateralAsset] {
        &self.collateral
    }

    /// Borrow assets in registration order
    #[must_use]
    pub fn borrow_assets(&self) -> &[BorrowAsset] {
        &self.borrow
    }

    /// Whether the symbol can be borrowed
    #[must_use]
    pub fn is_borrowable(&self, symbol: &str) -> bool {
        self.borrow_index.contains_key(symbol)
    }
}

fn validate_collateral(asset: &CollateralAsset) -> LedgerResult<()> {
    if asset.symbol.is_empty() {
        return Err(LedgerError::config("collateral asset with empty symbol"));
    }
    if asset.max_ltv <= Decimal::ZERO || asset.max_ltv > Decimal::ONE {
        return Err(LedgerError::config(format!("max_ltv for {} must be in (0, 1]", asset.symbol)));
    }
    if asset.liquidation_threshold <= Decimal::ZERO {
        return Err(LedgerError::config(format!(
            "liquidation_threshold for {} must be positive",
            asset.symbol
        )));
    }
    if asset.liquidation_penalty.is_sign_negative() || asset.liquidation_penalty >= Decimal::ONE {
        return Err(LedgerError::config(format!(
            "liquidation_penalty for {} must be in [0, 1)",
            asset.symbol
        )));
    }
    Ok(())
}

fn collateral(symbol: &str, quality: QualityTier, ltv: i64, threshold: i64, penalty: i64) -> CollateralAsset {
    CollateralAsset {
        symbol: symbol.to_owned(),
        quality,
        max_ltv: Decimal::new(ltv, 2),
        liquidation_threshold: Decimal::new(threshold, 2),
        liquidation_penalty: Decimal::new(penalty, 2),
    }
}

fn borrow(symbol: &str, rate_tenths: i64) -> BorrowAsset {
    BorrowAsset {
        symbol: symbol.to_owned(),
        annual_rate_pct: Decimal::new(rate_tenths, 1),
    }
}

impl Default for CollateralRegistry {
    fn default() -> Self {
        let collateral = vec![
            collateral("ETH", QualityTier::AAA, 75, 82, 5),
            collateral("WBTC", QualityTier::AAA, 70, 80, 5),
            collateral("OBK-ETH", QualityTier::AAA, 72, 80, 5),
            collateral("OBK-BTC", QualityTier::AAA, 68, 78, 6),
            collateral("OBK-GOLD", QualityTier::AA, 65, 78, 7),
            collateral("SOL", QualityTier::A, 60, 75, 8),
            collateral("ARB", QualityTier::A, 55, 72, 10),
            collateral("AVAX", QualityTier::A, 58, 73, 9),
            collateral("USDC", QualityTier::S, 90, 95, 2),
        ];
        let borrow = vec![borrow("OBK-USD", 50), borrow("USDC", 45), borrow("USDT", 45)];

        let collateral_index = collateral
            .iter()
            .enumerate()
            .map(|(idx, asset)| (asset.symbol.clone(), idx))
            .collect();
        let borrow_index = borrow
            .iter()
            .enumerate()
            .map(|(idx, asset)| (asset.symbol.clone(), idx))
            .collect();

        Self {
            collateral,
            borrow,
            collateral_index,
            borrow_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_registry() {
        let registry = CollateralRegistry::default();
        assert_eq!(registry.collateral_assets().len(), 9);
        assert_eq!(registry.borrow_assets().len(), 3);

        let eth = registry.collateral("ETH");
        assert!(eth.is_ok());
        if let Ok(eth) = eth {
            assert_eq!(eth.quality, QualityTier::AAA);
            assert_eq!(eth.max_ltv, dec!(0.75));
            assert_eq!(eth.liquidation_threshold, dec!(0.82));
            assert_eq!(eth.liquidation_penalty, dec!(0.05));
        }

        assert!(registry.borrow_asset("USDC").is_ok_and(|usdc| usdc.annual_rate_pct == dec!(4.5)));
    }

    #[test]
    fn test_unknown_assets_rejected() {
        let registry = CollateralRegistry::default();
        assert!(matches!(
            registry.collateral("DOGE"),
            Err(LedgerError::UnsupportedAsset { role: AssetRole::Collateral, .. })
        ));
        assert!(matches!(
            registry.borrow_asset("ETH"),
            Err(LedgerError::UnsupportedAsset { role: AssetRole::Borrow, .. })
        ));
        assert!(registry.is_borrowable("OBK-USD"));
        assert!(!registry.is_borrowable("WBTC"));
    }

    #[test]
    fn test_from_toml() {
        let source = r#"
            [[collateral]]
            symbol = "ETH"
            quality = "AAA"
            max_ltv = "0.70"
            liquidation_threshold = "0.80"
            liquidation_penalty = "0.05"

            [[borrow]]
            symbol = "USDC"
            annual_rate_pct = "3.5"
        "#;
        let registry = CollateralRegistry::from_toml_str(source);
        assert!(registry.is_ok());
        if let Ok(registry) = registry {
            assert_eq!(registry.collateral_assets().len(), 1);
            assert!(registry.collateral("ETH").is_ok_and(|a| a.max_ltv == dec!(0.70)));
            assert!(registry.borrow_asset("USDC").is_ok_and(|a| a.annual_rate_pct == dec!(3.5)));
        }
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let mut asset = collateral("ETH", QualityTier::AAA, 75, 82, 5);
        asset.max_ltv = dec!(1.2);
        assert!(matches!(
            CollateralRegistry::new(vec![asset], vec![]),
            Err(LedgerError::Configuration { .. })
        ));

        let dup = vec![borrow("USDC", 45), borrow("USDC", 50)];
        assert!(CollateralRegistry::new(vec![], dup).is_err());

        assert!(CollateralRegistry::from_toml_str("[[collateral]]\nsymbol = 3").is_err());
    }
}
