use crate::fiscal::FiscalYear;
use crate::schema::NetSalesConfig;
use crate::store::FactSnapshot;
use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketBadge {
    Gold,
    Silver,
}

impl fmt::Display for MarketBadge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketBadge::Gold => write!(f, "Gold"),
            MarketBadge::Silver => write!(f, "Silver"),
        }
    }
}

/// Gold only strictly above the threshold.
pub fn badge_for_quantity(total_qty: i64, gold_threshold: u64) -> MarketBadge {
    match u64::try_from(total_qty) {
        Ok(qty) if qty > gold_threshold => MarketBadge::Gold,
        _ => MarketBadge::Silver,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketTier {
    pub market: String,
    pub fiscal_year: FiscalYear,
    pub total_qty: i64,
    pub badge: MarketBadge,
}

/// Classifies markets by yearly sold quantity.
///
/// Quantities are summed once at construction, per market and fiscal year,
/// from sales whose customer is in the customer dimension.
pub struct MarketTieringClassifier {
    totals: HashMap<String, BTreeMap<FiscalYear, i64>>,
    markets: BTreeSet<String>,
    default_market: String,
    gold_threshold: u64,
}

impl MarketTieringClassifier {
    pub fn new(snapshot: &FactSnapshot, config: &NetSalesConfig) -> Self {
        let customer_markets = snapshot.customer_markets();
        let mut totals: HashMap<String, BTreeMap<FiscalYear, i64>> = HashMap::new();
        let mut unattributed = 0usize;
        let mut saturated = 0usize;

        for sale in &snapshot.sales {
            let Some(market) = customer_markets.get(sale.record.customer_code.as_str()) else {
                unattributed += 1;
                continue;
            };
            let total = totals
                .entry((*market).to_string())
                .or_default()
                .entry(sale.fiscal_year)
                .or_default();
            // Quantities are non-negative, so capping only ever rounds a total down to i64::MAX.
            *total = total.checked_add(sale.record.sold_quantity).unwrap_or_else(|| {
                saturated += 1;
                i64::MAX
            });
        }

        if saturated > 0 {
            warn!(
                "{} sales pushed a market's yearly quantity past {}; totals capped",
                saturated,
                i64::MAX
            );
        }

        if unattributed > 0 {
            warn!(
                "{} sales have a customer outside the customer dimension and count toward no market",
                unattributed
            );
        }

        Self {
            totals,
            markets: customer_markets.values().map(|m| m.to_string()).collect(),
            default_market: config.default_market.clone(),
            gold_threshold: config.gold_threshold,
        }
    }

    /// Absent or blank markets fall back to the configured default.
    pub fn resolve_market<'m>(&'m self, market: Option<&'m str>) -> &'m str {
        match market.map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => &self.default_market,
        }
    }

    pub fn markets(&self) -> impl Iterator<Item = &str> {
        self.markets.iter().map(String::as_str)
    }

    pub fn total_quantity(&self, fiscal_year: FiscalYear, market: Option<&str>) -> i64 {
        let market = self.resolve_market(market);
        self.totals
            .get(market)
            .and_then(|by_year| by_year.get(&fiscal_year))
            .copied()
            .unwrap_or(0)
    }

    pub fn classify(&self, fiscal_year: FiscalYear, market: Option<&str>) -> MarketBadge {
        self.tier(fiscal_year, market).badge
    }

    pub fn tier(&self, fiscal_year: FiscalYear, market: Option<&str>) -> MarketTier {
        let resolved = self.resolve_market(market);
        let total_qty = self.total_quantity(fiscal_year, Some(resolved));
        let badge = badge_for_quantity(total_qty, self.gold_threshold);

        debug!(
            "Market {} in {}: {} units -> {}",
            resolved, fiscal_year, total_qty, badge
        );

        MarketTier {
            market: resolved.to_string(),
            fiscal_year,
            total_qty,
            badge,
        }
    }

    /// Every known market for the year, classified in parallel, ordered by market.
    pub fn classify_all(&self, fiscal_year: FiscalYear) -> Vec<MarketTier> {
        let markets: Vec<&str> = self.markets().collect();
        markets
            .into_par_iter()
            .map(|market| self.tier(fiscal_year, Some(market)))
            .collect()
    }
}

/// Classifies one market with the default configuration.
pub fn classify(
    snapshot: &FactSnapshot,
    fiscal_year: FiscalYear,
    market: Option<&str>,
) -> MarketBadge {
    MarketTieringClassifier::new(snapshot, &NetSalesConfig::default())
        .classify(fiscal_year, market)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiscal::FiscalCalendar;
    use crate::schema::{Channel, Customer, Platform, SalesRecord};
    use crate::store::{FactFilter, InMemoryFactStore};
    use chrono::NaiveDate;

    fn customer(code: &str, market: &str) -> Customer {
        Customer {
            customer_code: code.to_string(),
            customer: format!("Customer {code}"),
            platform: Platform::ECommerce,
            channel: Channel::Retailer,
            market: market.to_string(),
            sub_zone: String::new(),
            region: String::new(),
        }
    }

    fn sale(code: &str, y: i32, m: u32, qty: i64) -> SalesRecord {
        SalesRecord {
            date: NaiveDate::from_ymd_opt(y, m, 1).unwrap(),
            product_code: "P1".to_string(),
            customer_code: code.to_string(),
            sold_quantity: qty,
        }
    }

    fn snapshot(sales: Vec<SalesRecord>) -> FactSnapshot {
        let mut store = InMemoryFactStore::new(FiscalCalendar::default());
        store.customers = vec![
            customer("IN1", "India"),
            customer("IN2", "India"),
            customer("US1", "USA"),
        ];
        store.sales = sales;
        FactSnapshot::load(&store, &FactFilter::all()).unwrap()
    }

    #[test]
    fn test_badge_boundary_is_exclusive() {
        assert_eq!(badge_for_quantity(5_000_000, 5_000_000), MarketBadge::Silver);
        assert_eq!(badge_for_quantity(5_000_001, 5_000_000), MarketBadge::Gold);
        assert_eq!(badge_for_quantity(0, 5_000_000), MarketBadge::Silver);
    }

    #[test]
    fn test_sums_customers_of_market_within_fiscal_year() {
        // Sep 2020 and Aug 2021 are both FY2021; Aug 2020 is FY2020.
        let snapshot = snapshot(vec![
            sale("IN1", 2020, 9, 3_000_000),
            sale("IN2", 2021, 8, 2_000_001),
            sale("IN1", 2020, 8, 9_000_000),
            sale("US1", 2021, 1, 7_000_000),
        ]);
        let classifier = MarketTieringClassifier::new(&snapshot, &NetSalesConfig::default());

        assert_eq!(classifier.total_quantity(FiscalYear(2021), Some("India")), 5_000_001);
        assert_eq!(classifier.classify(FiscalYear(2021), Some("India")), MarketBadge::Gold);
        assert_eq!(classifier.classify(FiscalYear(2020), Some("USA")), MarketBadge::Silver);
    }

    #[test]
    fn test_exactly_threshold_is_silver() {
        let snapshot = snapshot(vec![sale("IN1", 2021, 2, 5_000_000)]);
        assert_eq!(
            classify(&snapshot, FiscalYear(2021), Some("India")),
            MarketBadge::Silver
        );
    }

    #[test]
    fn test_blank_market_defaults_to_india() {
        let snapshot = snapshot(vec![sale("IN1", 2021, 2, 6_000_000)]);
        let classifier = MarketTieringClassifier::new(&snapshot, &NetSalesConfig::default());

        let explicit = classifier.tier(FiscalYear(2021), Some("India"));
        assert_eq!(classifier.tier(FiscalYear(2021), Some("")), explicit);
        assert_eq!(classifier.tier(FiscalYear(2021), Some("  ")), explicit);
        assert_eq!(classifier.tier(FiscalYear(2021), None), explicit);
        assert_eq!(explicit.badge, MarketBadge::Gold);
    }

    #[test]
    fn test_no_data_is_silver_not_error() {
        let snapshot = snapshot(vec![]);
        let classifier = MarketTieringClassifier::new(&snapshot, &NetSalesConfig::default());

        let tier = classifier.tier(FiscalYear(1999), Some("Atlantis"));
        assert_eq!(tier.total_qty, 0);
        assert_eq!(tier.badge, MarketBadge::Silver);
    }

    #[test]
    fn test_classify_all_is_ordered_by_market() {
        let snapshot = snapshot(vec![sale("US1", 2021, 1, 7_000_000)]);
        let config = NetSalesConfig {
            gold_threshold: 1_000,
            ..NetSalesConfig::default()
        };
        let tiers = MarketTieringClassifier::new(&snapshot, &config).classify_all(FiscalYear(2021));

        let markets: Vec<&str> = tiers.iter().map(|t| t.market.as_str()).collect();
        assert_eq!(markets, vec!["India", "USA"]);
        assert_eq!(tiers[0].badge, MarketBadge::Silver);
        assert_eq!(tiers[1].badge, MarketBadge::Gold);
    }

    #[test]
    fn test_quantity_total_caps_instead_of_overflowing() {
        let snapshot = snapshot(vec![
            sale("IN1", 2021, 1, i64::MAX),
            sale("IN2", 2021, 2, i64::MAX),
            sale("IN1", 2021, 3, 1),
        ]);
        let classifier = MarketTieringClassifier::new(&snapshot, &NetSalesConfig::default());

        assert_eq!(classifier.total_quantity(FiscalYear(2021), Some("India")), i64::MAX);
        assert_eq!(classifier.classify(FiscalYear(2021), None), MarketBadge::Gold);
    }
}
