use std::fmt;
use std::str::FromStr;

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("Unsupported currency `{0}`")]
pub struct UnsupportedCurrency(pub String);

/// Currencies a wallet can be held in.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Ghs,
    Usd,
    Gbp,
    Eur,
}

impl Currency {
    pub const ALL: [Currency; 4] = [Currency::Ghs, Currency::Usd, Currency::Gbp, Currency::Eur];

    pub fn code(&self) -> &'static str {
        match self {
            Currency::Ghs => "GHS",
            Currency::Usd => "USD",
            Currency::Gbp => "GBP",
            Currency::Eur => "EUR",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Currency::Ghs => "Ghana Cedi",
            Currency::Usd => "US Dollar",
            Currency::Gbp => "British Pound",
            Currency::Eur => "Euro",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::Ghs => "₵",
            Currency::Usd => "$",
            Currency::Gbp => "£",
            Currency::Eur => "€",
        }
    }
}

impl Default for Currency {
    /// The settlement currency deposits land in.
    fn default() -> Self {
        Currency::Ghs
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = UnsupportedCurrency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::ALL
            .into_iter()
            .find(|c| c.code().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnsupportedCurrency(s.to_string()))
    }
}
