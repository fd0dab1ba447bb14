//! The discount cascade, modeled as explicit stages:
//! `Gross` → `PreInvoiceApplied` → `NetSalesRecord` (post-invoice applied).
//!
//! Each stage exposes its own figures so intermediate values can be audited.
//! Percentages are multiplied as decimals; only `net_sales` is rounded at the
//! end of the chain.

use crate::aggregation::{Measure, SalesFact};
use crate::enrichment::{EnrichedSalesRecord, DEFAULT_CURRENCY_SCALE};
use crate::error::{DataIntegrityError, MissingReference};
use crate::fiscal::FiscalYear;
use crate::report::{SkipReason, SkippedRecord};
use crate::schema::{PostInvoiceDeduction, PreInvoiceDeduction, SaleKey};
use crate::utils::round_currency;
use chrono::NaiveDate;
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gross {
    record: EnrichedSalesRecord,
}

impl Gross {
    pub fn new(record: EnrichedSalesRecord) -> Self {
        Self { record }
    }

    pub fn record(&self) -> &EnrichedSalesRecord {
        &self.record
    }

    pub fn gross_price_total(&self) -> Decimal {
        self.record.gross_price_total
    }

    pub fn apply_pre_invoice(
        self,
        pre: &PreInvoiceDeduction,
    ) -> Result<PreInvoiceApplied, DataIntegrityError> {
        let pct = pre.pre_invoice_discount_pct;
        let net_invoice_sales = Decimal::ONE
            .checked_sub(pct)
            .and_then(|kept| self.record.gross_price_total.checked_mul(kept))
            .ok_or_else(|| {
                DataIntegrityError::amount_overflow(&self.record.key(), "net_invoice_sales")
            })?;

        Ok(PreInvoiceApplied {
            record: self.record,
            pre_invoice_discount_pct: pct,
            net_invoice_sales,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreInvoiceApplied {
    record: EnrichedSalesRecord,
    pre_invoice_discount_pct: Decimal,
    net_invoice_sales: Decimal,
}

impl PreInvoiceApplied {
    pub fn record(&self) -> &EnrichedSalesRecord {
        &self.record
    }

    pub fn pre_invoice_discount_pct(&self) -> Decimal {
        self.pre_invoice_discount_pct
    }

    /// Unrounded value carried into the post-invoice stage.
    pub fn net_invoice_sales(&self) -> Decimal {
        self.net_invoice_sales
    }

    /// Terminal transition. A missing deduction keeps the record with
    /// `net_sales` equal to `net_invoice_sales` and the missing flag set.
    pub fn apply_post_invoice(
        self,
        post: Option<&PostInvoiceDeduction>,
        currency_scale: u32,
    ) -> Result<NetSalesRecord, DataIntegrityError> {
        let (discounts_pct, other_deductions_pct) = match post {
            Some(p) => (Some(p.discounts_pct), Some(p.other_deductions_pct)),
            None => (None, None),
        };

        // Not clamped: sums above 1 surface as negative net sales in verification.
        let overflow = || DataIntegrityError::amount_overflow(&self.record.key(), "net_sales");
        let post_invoice_discount_pct = discounts_pct
            .unwrap_or_default()
            .checked_add(other_deductions_pct.unwrap_or_default())
            .ok_or_else(overflow)?;
        let net_sales = Decimal::ONE
            .checked_sub(post_invoice_discount_pct)
            .and_then(|kept| self.net_invoice_sales.checked_mul(kept))
            .ok_or_else(overflow)?;

        Ok(NetSalesRecord {
            enriched: self.record,
            pre_invoice_discount_pct: self.pre_invoice_discount_pct,
            discounts_pct,
            other_deductions_pct,
            post_invoice_discount_pct,
            net_invoice_sales: round_currency(self.net_invoice_sales, currency_scale),
            net_sales: round_currency(net_sales, currency_scale),
            deduction_missing: post.is_none(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetSalesRecord {
    #[serde(flatten)]
    pub enriched: EnrichedSalesRecord,
    pub pre_invoice_discount_pct: Decimal,
    pub discounts_pct: Option<Decimal>,
    pub other_deductions_pct: Option<Decimal>,
    pub post_invoice_discount_pct: Decimal,
    pub net_invoice_sales: Decimal,
    pub net_sales: Decimal,
    /// No post-invoice deduction existed for the (customer, product, date) triple.
    pub deduction_missing: bool,
}

impl NetSalesRecord {
    pub fn key(&self) -> SaleKey {
        self.enriched.key()
    }
}

impl SalesFact for NetSalesRecord {
    fn date(&self) -> NaiveDate {
        self.enriched.date
    }

    fn fiscal_year(&self) -> FiscalYear {
        self.enriched.fiscal_year
    }

    fn customer_code(&self) -> &str {
        &self.enriched.customer_code
    }

    fn product_code(&self) -> &str {
        &self.enriched.product_code
    }

    fn market(&self) -> Option<&str> {
        self.enriched.market.as_deref()
    }

    fn measure(&self, measure: Measure) -> Option<Decimal> {
        match measure {
            Measure::NetInvoiceSales => Some(self.net_invoice_sales),
            Measure::NetSales => Some(self.net_sales),
            other => self.enriched.measure(other),
        }
    }
}

/// Runs the full cascade for one enriched record with two-decimal rounding.
pub fn apply_cascade(
    enriched: EnrichedSalesRecord,
    pre: &PreInvoiceDeduction,
    post: Option<&PostInvoiceDeduction>,
) -> Result<NetSalesRecord, DataIntegrityError> {
    Gross::new(enriched)
        .apply_pre_invoice(pre)?
        .apply_post_invoice(post, DEFAULT_CURRENCY_SCALE)
}

#[derive(Debug, Clone, Default)]
pub struct CascadeOutcome {
    pub records: Vec<NetSalesRecord>,
    pub skipped: Vec<SkippedRecord>,
}

/// Looks up deductions for enriched records and runs them through the cascade.
pub struct CascadeCalculator<'a> {
    pre_invoice: HashMap<&'a str, HashMap<FiscalYear, Vec<&'a PreInvoiceDeduction>>>,
    post_invoice: HashMap<SaleKey, Vec<&'a PostInvoiceDeduction>>,
    currency_scale: u32,
}

impl<'a> CascadeCalculator<'a> {
    pub fn new(
        pre_invoice: &'a [PreInvoiceDeduction],
        post_invoice: &'a [PostInvoiceDeduction],
        currency_scale: u32,
    ) -> Self {
        let mut pre_index: HashMap<&'a str, HashMap<FiscalYear, Vec<&'a PreInvoiceDeduction>>> =
            HashMap::new();
        for deduction in pre_invoice {
            pre_index
                .entry(deduction.customer_code.as_str())
                .or_default()
                .entry(deduction.fiscal_year)
                .or_default()
                .push(deduction);
        }

        let mut post_index: HashMap<SaleKey, Vec<&'a PostInvoiceDeduction>> = HashMap::new();
        for deduction in post_invoice {
            post_index
                .entry(SaleKey {
                    date: deduction.date,
                    customer_code: deduction.customer_code.clone(),
                    product_code: deduction.product_code.clone(),
                })
                .or_default()
                .push(deduction);
        }

        Self {
            pre_invoice: pre_index,
            post_invoice: post_index,
            currency_scale,
        }
    }

    pub fn pre_invoice_for(
        &self,
        customer_code: &str,
        fiscal_year: FiscalYear,
    ) -> std::result::Result<&'a PreInvoiceDeduction, SkipReason> {
        let matches = self
            .pre_invoice
            .get(customer_code)
            .and_then(|by_year| by_year.get(&fiscal_year))
            .map(Vec::as_slice)
            .unwrap_or_default();

        match matches {
            [rate] => Ok(*rate),
            [] => Err(MissingReference::PreInvoiceRate {
                customer_code: customer_code.to_string(),
                fiscal_year,
            }
            .into()),
            _ => Err(DataIntegrityError::DuplicatePreInvoiceRate {
                customer_code: customer_code.to_string(),
                fiscal_year,
                matches: matches.len(),
            }
            .into()),
        }
    }

    pub fn post_invoice_for(
        &self,
        key: &SaleKey,
    ) -> std::result::Result<Option<&'a PostInvoiceDeduction>, DataIntegrityError> {
        match self.post_invoice.get(key).map(Vec::as_slice) {
            None | Some([]) => Ok(None),
            Some([deduction]) => Ok(Some(*deduction)),
            Some(matches) => Err(DataIntegrityError::DuplicatePostInvoiceDeduction {
                customer_code: key.customer_code.clone(),
                product_code: key.product_code.clone(),
                date: key.date,
                matches: matches.len(),
            }),
        }
    }

    pub fn calculate_one(
        &self,
        enriched: EnrichedSalesRecord,
    ) -> std::result::Result<NetSalesRecord, SkipReason> {
        let pre = self.pre_invoice_for(&enriched.customer_code, enriched.fiscal_year)?;
        let post = self.post_invoice_for(&enriched.key())?;

        Ok(Gross::new(enriched)
            .apply_pre_invoice(pre)?
            .apply_post_invoice(post, self.currency_scale)?)
    }

    pub fn calculate(&self, enriched: Vec<EnrichedSalesRecord>) -> CascadeOutcome {
        let mut outcome = CascadeOutcome::default();

        for record in enriched {
            let sale = record.key();
            let fiscal_year = record.fiscal_year;

            match self.calculate_one(record) {
                Ok(net) => {
                    if net.deduction_missing {
                        debug!(
                            "No post-invoice deduction for {} / {} on {}",
                            sale.customer_code, sale.product_code, sale.date
                        );
                    }
                    outcome.records.push(net);
                }
                Err(reason) => {
                    warn!(
                        "Sale {} / {} on {} not netted: {}",
                        sale.customer_code, sale.product_code, sale.date, reason
                    );
                    outcome.skipped.push(SkippedRecord {
                        sale,
                        fiscal_year,
                        reason,
                    });
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn enriched(gross_total: Decimal) -> EnrichedSalesRecord {
        EnrichedSalesRecord {
            date: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            fiscal_year: FiscalYear(2021),
            product_code: "P1".to_string(),
            customer_code: "C1".to_string(),
            sold_quantity: 10,
            gross_price: gross_total / dec!(10),
            gross_price_total: gross_total,
            market: Some("India".to_string()),
            customer_name: None,
            product_name: None,
            variant: None,
        }
    }

    fn pre(pct: Decimal) -> PreInvoiceDeduction {
        PreInvoiceDeduction {
            customer_code: "C1".to_string(),
            fiscal_year: FiscalYear(2021),
            pre_invoice_discount_pct: pct,
        }
    }

    fn post(discounts: Decimal, other: Decimal) -> PostInvoiceDeduction {
        PostInvoiceDeduction {
            customer_code: "C1".to_string(),
            product_code: "P1".to_string(),
            date: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            discounts_pct: discounts,
            other_deductions_pct: other,
        }
    }

    #[test]
    fn test_stages_are_individually_inspectable() {
        let gross = Gross::new(enriched(dec!(1000.00)));
        assert_eq!(gross.gross_price_total(), dec!(1000.00));

        let pre_applied = gross.apply_pre_invoice(&pre(dec!(0.0703))).unwrap();
        assert_eq!(pre_applied.net_invoice_sales(), dec!(929.7000));
        assert_eq!(pre_applied.pre_invoice_discount_pct(), dec!(0.0703));

        let net = pre_applied
            .apply_post_invoice(Some(&post(dec!(0.2), dec!(0.05))), 2)
            .unwrap();
        assert_eq!(net.post_invoice_discount_pct, dec!(0.25));
        assert_eq!(net.net_invoice_sales, dec!(929.70));
        assert_eq!(net.net_sales, dec!(697.28));
        assert!(!net.deduction_missing);
    }

    #[test]
    fn test_only_final_value_is_rounded() {
        // 1.00 * 0.995 * 0.995 = 0.990025; rounding the middle stage first gives 0.995 -> 1.00
        let net = apply_cascade(
            enriched(dec!(1.00)),
            &pre(dec!(0.005)),
            Some(&post(dec!(0.005), dec!(0))),
        )
        .unwrap();
        assert_eq!(net.net_invoice_sales, dec!(1.00));
        assert_eq!(net.net_sales, dec!(0.99));
    }

    #[test]
    fn test_zero_discounts_are_identity() {
        let net = apply_cascade(
            enriched(dec!(512.34)),
            &pre(dec!(0)),
            Some(&post(dec!(0), dec!(0))),
        )
        .unwrap();
        assert_eq!(net.net_invoice_sales, dec!(512.34));
        assert_eq!(net.net_sales, dec!(512.34));
    }

    #[test]
    fn test_missing_post_invoice_keeps_record() {
        let net = apply_cascade(enriched(dec!(200.00)), &pre(dec!(0.1)), None).unwrap();
        assert!(net.deduction_missing);
        assert_eq!(net.net_sales, net.net_invoice_sales);
        assert_eq!(net.net_sales, dec!(180.00));
        assert_eq!(net.discounts_pct, None);
    }

    #[test]
    fn test_post_invoice_sum_above_one_is_not_clamped() {
        let net = apply_cascade(
            enriched(dec!(100.00)),
            &pre(dec!(0)),
            Some(&post(dec!(0.8), dec!(0.4))),
        )
        .unwrap();
        assert_eq!(net.post_invoice_discount_pct, dec!(1.2));
        assert_eq!(net.net_sales, dec!(-20.00));
    }

    #[test]
    fn test_calculator_reports_missing_and_duplicate_rates() {
        let pre_rates = vec![pre(dec!(0.1))];
        let posts = vec![post(dec!(0.1), dec!(0)), post(dec!(0.2), dec!(0))];
        let calculator = CascadeCalculator::new(&pre_rates, &posts, 2);

        let mut other_customer = enriched(dec!(10.00));
        other_customer.customer_code = "C2".to_string();

        let outcome = calculator.calculate(vec![enriched(dec!(10.00)), other_customer]);

        assert!(outcome.records.is_empty());
        assert_eq!(outcome.skipped.len(), 2);
        assert!(matches!(
            outcome.skipped[0].reason,
            SkipReason::DataIntegrity(DataIntegrityError::DuplicatePostInvoiceDeduction { .. })
        ));
        assert!(matches!(
            outcome.skipped[1].reason,
            SkipReason::MissingReference(MissingReference::PreInvoiceRate { .. })
        ));
    }

    #[test]
    fn test_duplicate_pre_invoice_rate_is_integrity_failure() {
        let pre_rates = vec![pre(dec!(0.1)), pre(dec!(0.2))];
        let calculator = CascadeCalculator::new(&pre_rates, &[], 2);

        let result = calculator.calculate_one(enriched(dec!(10.00)));
        assert!(matches!(
            result,
            Err(SkipReason::DataIntegrity(
                DataIntegrityError::DuplicatePreInvoiceRate { matches: 2, .. }
            ))
        ));
    }

    #[test]
    fn test_overflowing_deduction_is_integrity_failure() {
        let pre_rates = vec![pre(Decimal::MIN)];
        let calculator = CascadeCalculator::new(&pre_rates, &[], 2);

        let result = calculator.calculate_one(enriched(dec!(10.00)));
        assert!(matches!(
            result,
            Err(SkipReason::DataIntegrity(DataIntegrityError::AmountOverflow { ref stage, .. }))
                if stage == "net_invoice_sales"
        ));

        let net = apply_cascade(
            enriched(dec!(10.00)),
            &pre(dec!(0)),
            Some(&post(Decimal::MAX, Decimal::MAX)),
        );
        assert!(matches!(
            net,
            Err(DataIntegrityError::AmountOverflow { ref stage, .. }) if stage == "net_sales"
        ));
    }

    #[test]
    fn test_calculator_keeps_going_after_overflow() {
        let pre_rates = vec![pre(dec!(0.1))];
        let posts = vec![post(Decimal::MAX, dec!(1))];
        let calculator = CascadeCalculator::new(&pre_rates, &posts, 2);

        let mut next_month = enriched(dec!(10.00));
        next_month.date = NaiveDate::from_ymd_opt(2021, 2, 1).unwrap();

        let outcome = calculator.calculate(vec![enriched(dec!(10.00)), next_month]);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].net_sales, dec!(9.00));
        assert_eq!(outcome.skipped.len(), 1);
    }
}
