//! # Net Sales Builder
//!
//! A library for deriving reportable net sales from monthly sales, annual price
//! and deduction facts, on a fiscal year that starts in September.
//!
//! ## Core Concepts
//!
//! - **Fiscal Year**: `year(date + 4 months)`; September 2020 belongs to FY2021
//! - **Enrichment**: each sale is joined to its product's gross price for the sale's fiscal year
//! - **Discount Cascade**: pre-invoice discount first, then post-invoice deductions, in that order
//! - **Exclusion Report**: sales that cannot be priced or discounted are listed, never dropped
//! - **Market Badge**: Gold when a market sells more than 5,000,000 units in a fiscal year
//!
//! ## Example
//!
//! ```rust,ignore
//! use net_sales_builder::*;
//!
//! let store = InMemoryFactStore::from_csv_dir("data", FiscalCalendar::default())?;
//! let config = NetSalesConfig::default();
//!
//! let report = process_net_sales(&store, &FactFilter::all(), &config)?;
//! println!("{} records, {} skipped", report.records.len(), report.summary.skipped());
//!
//! let query = BatchQuery::parse(
//!     EntityKind::Market,
//!     "India,USA",
//!     GroupBy::DateAndEntity,
//!     Measure::NetSales,
//! )?;
//! let rows = aggregate(&report.records, &query)?;
//! ```

pub mod aggregation;
pub mod cascade;
pub mod enrichment;
pub mod error;
pub mod fiscal;
pub mod ingestion;
pub mod report;
pub mod reporting;
pub mod schema;
pub mod store;
pub mod tiering;
pub mod utils;
pub mod verification;

pub use aggregation::{
    aggregate, aggregate_parallel, combine_rows, AggregateRow, BatchQuery, EntityKeys, EntityKind,
    GroupBy, Measure, SalesFact,
};
pub use cascade::{apply_cascade, CascadeCalculator, Gross, NetSalesRecord, PreInvoiceApplied};
pub use enrichment::{enrich, EnrichedSalesRecord, Enricher};
pub use error::{DataIntegrityError, MissingReference, NetSalesError, Result};
pub use fiscal::{
    resolve, AnnotatedSale, FiscalCalendar, FiscalQuarter, FiscalYear, FiscalYearIndex,
};
pub use ingestion::*;
pub use report::{NetSalesReport, ReportSummary, SkipReason, SkippedRecord};
pub use reporting::{
    fiscal_year_totals, net_sales_share, top_n, EntityShare, FiscalYearTotal, RankedEntity,
};
pub use schema::*;
pub use store::{FactFilter, FactSnapshot, FactStore, InMemoryFactStore};
pub use tiering::{badge_for_quantity, MarketBadge, MarketTier, MarketTieringClassifier};
pub use verification::{CascadeVerifier, InvariantViolation, VerificationResult, ViolationKind};

use log::{debug, info};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Caller-owned stop flag. Checked before each fiscal-year partition starts,
/// never while a record is being computed.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

struct PartitionOutcome {
    records: Vec<NetSalesRecord>,
    skipped: Vec<SkippedRecord>,
}

pub struct NetSalesProcessor {
    config: NetSalesConfig,
}

impl NetSalesProcessor {
    pub fn new(config: NetSalesConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &NetSalesConfig {
        &self.config
    }

    /// The single bulk read from the fact store.
    pub fn load<S: FactStore + ?Sized>(
        &self,
        store: &S,
        filter: &FactFilter,
    ) -> Result<FactSnapshot> {
        let calendar = self.config.calendar()?;
        if store.calendar() != calendar {
            return Err(NetSalesError::InvalidConfig(format!(
                "Fact store fiscal year starts in month {}, configuration expects {}",
                store.calendar().start_month(),
                calendar.start_month()
            )));
        }
        FactSnapshot::load(store, filter)
    }

    pub fn process(&self, snapshot: &FactSnapshot) -> Result<NetSalesReport> {
        self.process_with_cancellation(snapshot, &CancellationToken::new())
    }

    /// Enriches and cascades each fiscal year independently in parallel.
    ///
    /// Output records are ordered by fiscal year, date, customer and product.
    /// Cancellation discards everything computed so far.
    pub fn process_with_cancellation(
        &self,
        snapshot: &FactSnapshot,
        token: &CancellationToken,
    ) -> Result<NetSalesReport> {
        info!(
            "Computing net sales for {} sales records",
            snapshot.sales.len()
        );

        let scale = self.config.currency_scale;
        let enricher = Enricher::new(
            &snapshot.prices,
            &snapshot.customers,
            &snapshot.products,
            scale,
        );
        let calculator =
            CascadeCalculator::new(&snapshot.pre_invoice, &snapshot.post_invoice, scale);

        let mut partitions: BTreeMap<FiscalYear, Vec<&AnnotatedSale>> = BTreeMap::new();
        for sale in &snapshot.sales {
            partitions.entry(sale.fiscal_year).or_default().push(sale);
        }

        let outcomes: Vec<PartitionOutcome> = partitions
            .into_par_iter()
            .map(|(fiscal_year, sales)| {
                if token.is_cancelled() {
                    return Err(NetSalesError::Cancelled);
                }
                debug!("Processing {} with {} sales", fiscal_year, sales.len());

                let enriched = enricher.enrich(sales);
                let netted = calculator.calculate(enriched.records);

                let mut skipped = enriched.skipped;
                skipped.extend(netted.skipped);
                Ok(PartitionOutcome {
                    records: netted.records,
                    skipped,
                })
            })
            .collect::<Result<_>>()?;

        let mut records = Vec::new();
        let mut skipped = Vec::new();
        for mut outcome in outcomes {
            outcome.records.sort_by(|a, b| {
                (a.enriched.date, &a.enriched.customer_code, &a.enriched.product_code).cmp(&(
                    b.enriched.date,
                    &b.enriched.customer_code,
                    &b.enriched.product_code,
                ))
            });
            outcome.skipped.sort_by(|a, b| a.sale.cmp(&b.sale));
            records.extend(outcome.records);
            skipped.extend(outcome.skipped);
        }

        let summary = ReportSummary::tally(snapshot.sales.len(), &records, &skipped);
        info!(
            "Net sales computed: {} records, {} skipped, {} without post-invoice deductions",
            summary.net_sales_records,
            summary.skipped(),
            summary.missing_post_invoice_deductions
        );

        Ok(NetSalesReport {
            records,
            skipped,
            summary,
        })
    }

    pub fn process_with_verification(&self, snapshot: &FactSnapshot) -> Result<NetSalesReport> {
        let report = self.process(snapshot)?;
        CascadeVerifier::new(&self.config).verify_strict(&report.records)?;
        Ok(report)
    }

    pub fn verify(&self, report: &NetSalesReport) -> VerificationResult {
        CascadeVerifier::new(&self.config).verify(&report.records)
    }

    pub fn classifier(&self, snapshot: &FactSnapshot) -> MarketTieringClassifier {
        MarketTieringClassifier::new(snapshot, &self.config)
    }
}

pub fn process_net_sales<S: FactStore + ?Sized>(
    store: &S,
    filter: &FactFilter,
    config: &NetSalesConfig,
) -> Result<NetSalesReport> {
    let processor = NetSalesProcessor::new(config.clone())?;
    let snapshot = processor.load(store, filter)?;
    processor.process(&snapshot)
}
