use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Canonical marketplace identifiers used in credentials, logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketplaceId {
    Amazon,
    Trendyol,
    Hepsiburada,
    Ebay,
}

impl MarketplaceId {
    pub const ALL: [Self; 4] = [Self::Amazon, Self::Trendyol, Self::Hepsiburada, Self::Ebay];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Amazon => "amazon",
            Self::Trendyol => "trendyol",
            Self::Hepsiburada => "hepsiburada",
            Self::Ebay => "ebay",
        }
    }

    /// Prefix used for secret overrides, e.g. `PAZARSYNC_TRENDYOL_API_SECRET`.
    pub fn env_prefix(self) -> String {
        format!("PAZARSYNC_{}", self.as_str().to_ascii_uppercase())
    }
}

impl Display for MarketplaceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketplaceId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "amazon" => Ok(Self::Amazon),
            "trendyol" => Ok(Self::Trendyol),
            "hepsiburada" => Ok(Self::Hepsiburada),
            "ebay" => Ok(Self::Ebay),
            other => Err(ValidationError::UnknownMarketplace {
                value: other.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("Trendyol".parse::<MarketplaceId>(), Ok(MarketplaceId::Trendyol));
        assert_eq!(" EBAY ".parse::<MarketplaceId>(), Ok(MarketplaceId::Ebay));
    }

    #[test]
    fn rejects_unknown_marketplace() {
        let error = "n11".parse::<MarketplaceId>().expect_err("n11 has no adapter");
        assert_eq!(
            error,
            ValidationError::UnknownMarketplace {
                value: String::from("n11")
            }
        );
    }

    #[test]
    fn env_prefix_is_upper_case() {
        assert_eq!(MarketplaceId::Hepsiburada.env_prefix(), "PAZARSYNC_HEPSIBURADA");
    }
}
