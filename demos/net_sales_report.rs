use chrono::NaiveDate;
use net_sales_builder::*;
use rust_decimal_macros::dec;
use std::io;

fn month(y: i32, m: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, 1).unwrap()
}

fn sample_store() -> InMemoryFactStore {
    let mut store = InMemoryFactStore::new(FiscalCalendar::default());

    store.customers = vec![
        Customer {
            customer_code: "90002002".to_string(),
            customer: "Croma".to_string(),
            platform: Platform::BrickAndMortar,
            channel: Channel::Retailer,
            market: "India".to_string(),
            sub_zone: "India".to_string(),
            region: "APAC".to_string(),
        },
        Customer {
            customer_code: "70027208".to_string(),
            customer: "Atliq e Store".to_string(),
            platform: Platform::ECommerce,
            channel: Channel::Direct,
            market: "USA".to_string(),
            sub_zone: "NA".to_string(),
            region: "NA".to_string(),
        },
    ];

    for (customer, qty) in [("90002002", 1_900_000), ("70027208", 240_000)] {
        for m in [9, 10, 11] {
            store.sales.push(SalesRecord {
                date: month(2020, m),
                product_code: "A0118150101".to_string(),
                customer_code: customer.to_string(),
                sold_quantity: qty,
            });
        }
    }

    store.prices.push(PriceRecord {
        product_code: "A0118150101".to_string(),
        fiscal_year: FiscalYear(2021),
        gross_price: dec!(19.0573),
    });
    store.pre_invoice.push(PreInvoiceDeduction {
        customer_code: "90002002".to_string(),
        fiscal_year: FiscalYear(2021),
        pre_invoice_discount_pct: dec!(0.2961),
    });
    store.pre_invoice.push(PreInvoiceDeduction {
        customer_code: "70027208".to_string(),
        fiscal_year: FiscalYear(2021),
        pre_invoice_discount_pct: dec!(0.1077),
    });
    store.post_invoice.push(PostInvoiceDeduction {
        customer_code: "90002002".to_string(),
        product_code: "A0118150101".to_string(),
        date: month(2020, 9),
        discounts_pct: dec!(0.2656),
        other_deductions_pct: dec!(0.0711),
    });

    store
}

fn main() -> anyhow::Result<()> {
    // Pass a directory holding the six CSV tables to run on real data.
    let store = match std::env::args().nth(1) {
        Some(dir) => InMemoryFactStore::from_csv_dir(dir, FiscalCalendar::default())?,
        None => sample_store(),
    };

    let config = NetSalesConfig::default();
    let processor = NetSalesProcessor::new(config)?;
    let snapshot = processor.load(&store, &FactFilter::all())?;
    let report = processor.process(&snapshot)?;

    println!("📊 Net sales for {} sales records", report.summary.input_records);
    println!("   computed: {}", report.summary.net_sales_records);
    println!("   skipped:  {}", report.summary.skipped());
    println!(
        "   without post-invoice deductions: {}",
        report.summary.missing_post_invoice_deductions
    );
    for skipped in &report.skipped {
        println!(
            "   ⚠️  {} / {} on {}: {}",
            skipped.sale.customer_code, skipped.sale.product_code, skipped.sale.date, skipped.reason
        );
    }

    let verification = processor.verify(&report);
    if !verification.is_valid() {
        println!("\n❌ {} invariant violations", verification.violations.len());
    }

    let markets: EntityKeys = snapshot.customers.iter().map(|c| c.market.clone()).collect();
    let query = BatchQuery::new(
        EntityKind::Market,
        markets,
        GroupBy::DateAndEntity,
        Measure::NetSales,
    );
    let rows = aggregate(&report.records, &query)?;

    println!("\n📅 Monthly net sales by market:");
    write_aggregate_csv(&rows, io::stdout())?;

    let classifier = processor.classifier(&snapshot);
    let fiscal_years: std::collections::BTreeSet<FiscalYear> =
        report.records.iter().map(|r| r.enriched.fiscal_year).collect();

    for fiscal_year in fiscal_years {
        println!("\n🏅 Market badges for {}:", fiscal_year);
        for tier in classifier.classify_all(fiscal_year) {
            println!("   {:<10} {:>12} units  {}", tier.market, tier.total_qty, tier.badge);
        }

        for ranked in top_n(&report.records, EntityKind::Customer, fiscal_year, 5)? {
            println!("   #{} {} {}", ranked.rank, ranked.entity, ranked.net_sales);
        }
    }

    Ok(())
}
