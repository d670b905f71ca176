//! Domain enums persisted as text columns

use serde::{Deserialize, Serialize};

/// Raised when a stored or submitted value does not name a known variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Kind of monetary event recorded in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    /// Extends the payer's subscription (and the accounts it manages)
    Subscription,
    /// One-off contribution to the shared pot
    CommonPot,
    /// Refund of a previously completed payment
    Credit,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Subscription => "subscription",
            PaymentType::CommonPot => "common_pot",
            PaymentType::Credit => "credit",
        }
    }
}

impl std::fmt::Display for PaymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscription" => Ok(PaymentType::Subscription),
            "common_pot" => Ok(PaymentType::CommonPot),
            "credit" => Ok(PaymentType::Credit),
            _ => Err(UnknownVariant {
                kind: "payment type",
                value: s.to_string(),
            }),
        }
    }
}

/// Billing frequency of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Month,
    Year,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Month => "month",
            Frequency::Year => "year",
        }
    }

    /// Number of calendar months covered by one period
    pub fn months(&self) -> u32 {
        match self {
            Frequency::Month => 1,
            Frequency::Year => 12,
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Frequency {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "month" => Ok(Frequency::Month),
            "year" => Ok(Frequency::Year),
            _ => Err(UnknownVariant {
                kind: "frequency",
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_type_parsing() {
        assert_eq!("common_pot".parse::<PaymentType>().unwrap(), PaymentType::CommonPot);
        assert_eq!(PaymentType::Credit.to_string(), "credit");
        let err = "donation".parse::<PaymentType>().unwrap_err();
        assert_eq!(err.value, "donation");
    }

    #[test]
    fn test_frequency_months() {
        assert_eq!(Frequency::Month.months(), 1);
        assert_eq!(Frequency::Year.months(), 12);
        assert_eq!("year".parse::<Frequency>().unwrap(), Frequency::Year);
        assert!("week".parse::<Frequency>().is_err());
    }
}
