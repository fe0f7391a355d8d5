//! Static rail catalog
//!
//! Fees and timings are the published schedule the platform quotes from.
//! Routing picks the cheapest eligible rail; ties go to the faster one.

use crate::types::{Rail, RailProfile, RouteQuote};
use ledger_core::Currency;
use rust_decimal::Decimal;

/// Rail catalog
#[derive(Debug, Clone)]
pub struct RailCatalog {
    profiles: Vec<RailProfile>,
}

impl Default for RailCatalog {
    fn default() -> Self {
        let eurozone = ["AT", "BE", "DE", "ES", "FI", "FR", "IE", "IT", "NL", "PT"];

        Self::new(vec![
            RailProfile {
                rail: Rail::Pix,
                display_name: "Pix".to_string(),
                currencies: vec![Currency::BRL],
                countries: vec!["BR".to_string()],
                fee_percentage: Decimal::new(5, 3), // 0.5%
                fee_fixed: Decimal::ZERO,
                estimated_time_secs: 10,
                min_amount: Decimal::new(1, 2),
                max_amount: Decimal::new(1_000_000, 0),
                batched: false,
            },
            RailProfile {
                rail: Rail::Spei,
                display_name: "SPEI".to_string(),
                currencies: vec![Currency::MXN],
                countries: vec!["MX".to_string()],
                fee_percentage: Decimal::new(3, 3), // 0.3%
                fee_fixed: Decimal::ZERO,
                estimated_time_secs: 30,
                min_amount: Decimal::new(1, 2),
                max_amount: Decimal::new(5_000_000, 0),
                batched: false,
            },
            RailProfile {
                rail: Rail::Ach,
                display_name: "ACH".to_string(),
                currencies: vec![Currency::USD],
                countries: vec!["US".to_string()],
                fee_percentage: Decimal::ZERO,
                fee_fixed: Decimal::new(25, 2), // $0.25
                estimated_time_secs: 86_400,
                min_amount: Decimal::ONE,
                max_amount: Decimal::new(1_000_000, 0),
                batched: true,
            },
            RailProfile {
                rail: Rail::Sepa,
                display_name: "SEPA Credit Transfer".to_string(),
                currencies: vec![Currency::EUR],
                countries: eurozone.iter().map(|c| c.to_string()).collect(),
                fee_percentage: Decimal::ZERO,
                fee_fixed: Decimal::new(20, 2), // €0.20
                estimated_time_secs: 86_400,
                min_amount: Decimal::ONE,
                max_amount: Decimal::new(1_000_000, 0),
                batched: true,
            },
            RailProfile {
                rail: Rail::Wire,
                display_name: "International Wire".to_string(),
                currencies: vec![Currency::USD, Currency::EUR, Currency::GBP],
                countries: Vec::new(),
                fee_percentage: Decimal::new(1, 3), // 0.1%
                fee_fixed: Decimal::new(15, 0),
                estimated_time_secs: 172_800,
                min_amount: Decimal::new(100, 0),
                max_amount: Decimal::new(10_000_000, 0),
                batched: true,
            },
            RailProfile {
                rail: Rail::Usdc,
                display_name: "USDC".to_string(),
                currencies: vec![Currency::USDC],
                countries: Vec::new(),
                fee_percentage: Decimal::new(1, 3), // 0.1%
                fee_fixed: Decimal::new(50, 2),
                estimated_time_secs: 60,
                min_amount: Decimal::ONE,
                max_amount: Decimal::new(1_000_000, 0),
                batched: false,
            },
        ])
    }
}

impl RailCatalog {
    /// Catalog from explicit profiles
    pub fn new(profiles: Vec<RailProfile>) -> Self {
        Self { profiles }
    }

    /// All profiles
    pub fn profiles(&self) -> &[RailProfile] {
        &self.profiles
    }

    /// Profile for a rail
    pub fn get(&self, rail: Rail) -> Option<&RailProfile> {
        self.profiles.iter().find(|p| p.rail == rail)
    }

    /// Most instant rails any one currency can fall back across
    ///
    /// A batched rail ends an `execute` by queueing, so only instant rails
    /// add to its running time.
    pub fn max_instant_candidates(&self) -> usize {
        Currency::ALL
            .iter()
            .map(|currency| {
                self.profiles
                    .iter()
                    .filter(|p| !p.batched && p.currencies.contains(currency))
                    .count()
            })
            .max()
            .unwrap_or(0)
    }

    /// Eligible rails, cheapest first, faster first on equal fees
    pub fn quotes(&self, currency: Currency, country: Option<&str>, amount: Decimal) -> Vec<RouteQuote> {
        let mut quotes: Vec<RouteQuote> = self
            .profiles
            .iter()
            .filter(|p| p.accepts(currency, country, amount))
            .map(|p| RouteQuote {
                rail: p.rail,
                currency,
                fee: p.fee_for(amount),
                fee_percentage: p.fee_percentage,
                estimated_time_secs: p.estimated_time_secs,
                batched: p.batched,
            })
            .collect();

        quotes.sort_by(|a, b| {
            a.fee
                .cmp(&b.fee)
                .then(a.estimated_time_secs.cmp(&b.estimated_time_secs))
        });
        quotes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_brl_routes_to_pix() {
        let catalog = RailCatalog::default();
        let quotes = catalog.quotes(Currency::BRL, Some("BR"), dec!(1000));
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].rail, Rail::Pix);
        assert_eq!(quotes[0].fee, dec!(5.00));
        assert!(quotes[0].estimated_time_secs < 60);
    }

    #[test]
    fn test_usd_prefers_ach_over_wire() {
        let catalog = RailCatalog::default();
        let quotes = catalog.quotes(Currency::USD, Some("US"), dec!(5000));
        let rails: Vec<Rail> = quotes.iter().map(|q| q.rail).collect();
        assert_eq!(rails, vec![Rail::Ach, Rail::Wire]);
    }

    #[test]
    fn test_small_usd_amount_excludes_wire() {
        let catalog = RailCatalog::default();
        let quotes = catalog.quotes(Currency::USD, None, dec!(50));
        assert!(quotes.iter().all(|q| q.rail != Rail::Wire));
    }

    #[test]
    fn test_max_instant_candidates() {
        assert_eq!(RailCatalog::default().max_instant_candidates(), 1);

        let mut profiles = RailCatalog::default().profiles().to_vec();
        let second_pix = profiles
            .iter()
            .find(|p| p.rail == Rail::Pix)
            .cloned()
            .map(|p| RailProfile { rail: Rail::Usdc, ..p })
            .unwrap();
        profiles.push(second_pix);
        assert_eq!(RailCatalog::new(profiles).max_instant_candidates(), 2);
    }

    #[test]
    fn test_cop_has_no_rail() {
        let catalog = RailCatalog::default();
        assert!(catalog.quotes(Currency::COP, Some("CO"), dec!(100)).is_empty());
    }

    #[test]
    fn test_equal_fee_breaks_toward_faster_rail() {
        let slow = RailProfile {
            rail: Rail::Wire,
            display_name: "slow".to_string(),
            currencies: vec![Currency::USD],
            countries: vec![],
            fee_percentage: dec!(0),
            fee_fixed: dec!(1),
            estimated_time_secs: 600,
            min_amount: dec!(0),
            max_amount: dec!(1000),
            batched: false,
        };
        let fast = RailProfile {
            rail: Rail::Ach,
            estimated_time_secs: 5,
            ..slow.clone()
        };
        let catalog = RailCatalog::new(vec![slow, fast]);
        let quotes = catalog.quotes(Currency::USD, None, dec!(10));
        assert_eq!(quotes[0].rail, Rail::Ach);
    }
}
