//! Integration tests for CLTV Forge

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use cltvforge::aggregate::aggregate_customers;
use cltvforge::clean::clean_transactions;
use cltvforge::{
    load_transactions, run_pipeline, run_with_models, CltvError, CltvResult, FrequencyModel,
    MonetaryModel, PipelineConfig,
};
use ndarray::{Array1, ArrayView1};
use std::collections::HashSet;
use std::io::Write;
use tempfile::NamedTempFile;

const HEADER: &str = "Invoice,StockCode,Description,Quantity,InvoiceDate,Price,Customer ID,Country";

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2011, 12, 11).unwrap()
}

fn days_before_today(days: i64) -> NaiveDateTime {
    (today() - Duration::days(days)).and_time(NaiveTime::MIN)
}

/// Small hand-written dataset covering each cleaning rule
fn create_test_csv() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{}", HEADER).unwrap();

    // Customer 12347 - two invoices, 400 and 370 days before the reference date
    writeln!(file, "536365,85123A,WHITE HANGING HEART T-LIGHT HOLDER,10,{},10.0,12347,United Kingdom", days_before_today(400)).unwrap();
    writeln!(file, "536420,71053,WHITE METAL LANTERN,10,{},15.0,12347,United Kingdom", days_before_today(370)).unwrap();

    // Customer 13047 - single purchase
    writeln!(file, "536367,84406B,CREAM CUPID HEARTS COAT HANGER,8,{},2.75,13047,United Kingdom", days_before_today(200)).unwrap();

    // Customer 14000 - cancellations only
    writeln!(file, "C536379,D,Discount,1,{},27.5,14000,United Kingdom", days_before_today(150)).unwrap();
    writeln!(file, "C536383,35004C,SET OF 3 COLOURED FLYING DUCKS,1,{},4.65,14000,United Kingdom", days_before_today(120)).unwrap();

    // Customer 12583 - repeat buyer outside the target market
    writeln!(file, "536370,22728,ALARM CLOCK BAKELIKE PINK,24,{},3.75,12583,France", days_before_today(300)).unwrap();
    writeln!(file, "536371,22727,ALARM CLOCK BAKELIKE RED,24,{},3.75,12583,France", days_before_today(100)).unwrap();

    // Customer 15100 - repeat buyer with rows the cleaner drops
    writeln!(file, "536374,21258,VICTORIAN SEWING BOX LARGE,2,{},10.95,15100,United Kingdom", days_before_today(250)).unwrap();
    writeln!(file, "536375,21259,VICTORIAN SEWING BOX SMALL,2,{},8.5,15100,United Kingdom", days_before_today(90)).unwrap();
    writeln!(file, "536376,POST,POSTAGE,-1,{},18.0,15100,United Kingdom", days_before_today(80)).unwrap();
    writeln!(file, "536377,22086,PAPER CHAIN KIT,4,{},0.0,15100,United Kingdom", days_before_today(70)).unwrap();
    writeln!(file, "536378,22086,PAPER CHAIN KIT,4,2011-12-20 09:00:00,2.95,15100,United Kingdom").unwrap();

    // Anonymous sale
    writeln!(file, "536380,22961,JAM MAKING SET PRINTED,6,{},1.45,,United Kingdom", days_before_today(60)).unwrap();

    file
}

/// Deterministic repeat customers with varied purchase histories
fn create_synthetic_csv(customers: usize) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{}", HEADER).unwrap();

    let mut invoice = 540_000;
    for k in 0..customers {
        let visits = 2 + k % 5;
        let gap = 5 + (k % 11) as i64 * 4;
        let first = 300 + (k % 60) as i64;
        for j in 0..visits {
            invoice += 1;
            let quantity = 1 + (k + j) % 7;
            let price = 2.0 + (k % 13) as f64 * 0.5;
            writeln!(
                file,
                "{},22423,REGENCY CAKESTAND 3 TIER,{},{},{:.2},{},United Kingdom",
                invoice,
                quantity,
                days_before_today(first - j as i64 * gap),
                price,
                15000 + k
            )
            .unwrap();
        }
    }
    file
}

/// Buys at the observed rate and spends the observed mean
struct RateModel;

impl FrequencyModel for RateModel {
    fn fit(&mut self, _: ArrayView1<f64>, _: ArrayView1<f64>, _: ArrayView1<f64>) -> CltvResult<()> {
        Ok(())
    }

    fn predict(
        &self,
        horizon: f64,
        frequency: ArrayView1<f64>,
        _recency: ArrayView1<f64>,
        t: ArrayView1<f64>,
    ) -> CltvResult<Array1<f64>> {
        Ok(&frequency / &t * horizon)
    }
}

struct ObservedSpend;

impl MonetaryModel for ObservedSpend {
    fn fit(&mut self, _: ArrayView1<f64>, _: ArrayView1<f64>) -> CltvResult<()> {
        Ok(())
    }

    fn conditional_expected_average_value(
        &self,
        _frequency: ArrayView1<f64>,
        monetary: ArrayView1<f64>,
    ) -> CltvResult<Array1<f64>> {
        Ok(monetary.to_owned())
    }
}

fn uncapped_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.cleaning.lower_quantile = 0.0;
    config.cleaning.upper_quantile = 1.0;
    config.segments = 2;
    config
}

fn fitting_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.model.max_iterations = 20_000;
    config.model.tolerance = 1e-7;
    config
}

#[test]
fn test_two_invoice_customer_summary() {
    let test_file = create_test_csv();
    let config = uncapped_config();

    let rows = load_transactions(test_file.path(), None).unwrap();
    assert_eq!(rows.len(), 13);

    let cleaned = clean_transactions(&rows, &config.cleaning, config.today).unwrap();
    let aggregates = aggregate_customers(
        &cleaned.frame,
        &config.aggregation,
        config.today,
        config.model.time_unit,
    )
    .unwrap();

    let customer = aggregates
        .iter()
        .find(|a| a.customer_id == "12347")
        .unwrap();
    assert_eq!(customer.frequency, 2);
    assert!((customer.monetary - 125.0).abs() < 1e-9);
    assert!((customer.recency - 30.0 / 7.0).abs() < 1e-9);
    assert!((customer.t - 400.0 / 7.0).abs() < 1e-9);
}

#[test]
fn test_cleaning_rules() {
    let test_file = create_test_csv();
    let config = PipelineConfig::default();

    let rows = load_transactions(test_file.path(), None).unwrap();
    let cleaned = clean_transactions(&rows, &config.cleaning, config.today).unwrap();
    let report = &cleaned.report;

    assert_eq!(report.missing_customer, 1);
    assert_eq!(report.cancelled, 2);
    assert_eq!(report.non_positive, 2);
    assert_eq!(report.other_country, 2);
    assert_eq!(report.after_reference_date, 1);
    assert_eq!(report.output_rows, 5);

    let quantity_bounds = cleaned.quantity_thresholds.unwrap();
    let price_bounds = cleaned.price_thresholds.unwrap();
    let cutoff = config.today.and_time(NaiveTime::MIN);
    let transactions = cleaned.transactions().unwrap();
    assert_eq!(transactions.len(), 5);
    for t in &transactions {
        assert!(quantity_bounds.contains(t.quantity));
        assert!(price_bounds.contains(t.price));
        assert_eq!(t.country, "United Kingdom");
        assert!(!t.invoice.contains('C'));
        assert!(t.invoice_date <= cutoff);
        assert!((t.total_price - t.quantity * t.price).abs() < 1e-9);
    }
}

#[test]
fn test_end_to_end_with_fixed_models() {
    let test_file = create_test_csv();
    let config = uncapped_config();

    let output = run_with_models(test_file.path(), &config, &mut RateModel, &mut ObservedSpend).unwrap();
    let table = output.table;

    // only 12347 and 15100 are repeat customers in the target market
    let ids: Vec<&str> = table.rows().iter().map(|r| r.customer_id.as_str()).collect();
    assert_eq!(ids, vec!["12347", "15100"]);
    assert!(table.get("14000").is_none());
    assert!(table.get("13047").is_none());
    assert!(table.get("12583").is_none());

    for row in table.rows() {
        assert!(row.recency <= row.t);
        assert!(row.clv.is_finite());
    }
    let top = table.top_n(cltvforge::Column::Clv, 1);
    assert_eq!(top[0].segment.label(), 'A');
}

#[test]
fn test_bundled_models_end_to_end() {
    let test_file = create_synthetic_csv(80);
    let config = fitting_config();

    let output = run_pipeline(test_file.path(), &config).unwrap();
    let table = &output.table;

    assert_eq!(output.customers, 80);
    assert_eq!(table.len(), 80);
    assert!(output.bgnbd.is_some());
    assert!(output.gamma_gamma.is_some());

    let mut ids = HashSet::new();
    for row in table.rows() {
        assert!(ids.insert(row.customer_id.clone()));
        assert!(row.frequency >= 2);
        assert!(row.recency <= row.t);
        assert!(row.expected_purchases_horizon.is_finite() && row.expected_purchases_horizon >= 0.0);
        assert!(row.expected_average_profit.is_finite() && row.expected_average_profit > 0.0);
        assert!(row.clv.is_finite() && row.clv >= 0.0);
    }

    // segments partition the table with non-overlapping CLV ranges
    let summary = table.segment_summary();
    assert_eq!(summary.len(), 4);
    assert_eq!(summary.iter().map(|s| s.customers).sum::<usize>(), 80);
    for pair in summary.windows(2) {
        let upper_min = table
            .rows()
            .iter()
            .filter(|r| r.segment == pair[0].segment)
            .map(|r| r.clv)
            .fold(f64::INFINITY, f64::min);
        let lower_max = table
            .rows()
            .iter()
            .filter(|r| r.segment == pair[1].segment)
            .map(|r| r.clv)
            .fold(f64::NEG_INFINITY, f64::max);
        assert!(lower_max < upper_min);
    }
}

#[test]
fn test_runs_are_deterministic() {
    let test_file = create_synthetic_csv(40);
    let config = fitting_config();

    let first = run_pipeline(test_file.path(), &config).unwrap();
    let second = run_pipeline(test_file.path(), &config).unwrap();
    assert_eq!(first.table, second.table);
    assert_eq!(first.bgnbd, second.bgnbd);
}

#[test]
fn test_empty_inputs_give_empty_table() {
    let empty = NamedTempFile::new().unwrap();
    let output = run_pipeline(empty.path(), &PipelineConfig::default()).unwrap();
    assert!(output.table.is_empty());
    assert!(output.bgnbd.is_none());

    let mut header_only = NamedTempFile::new().unwrap();
    writeln!(header_only, "{}", HEADER).unwrap();
    let output = run_pipeline(header_only.path(), &PipelineConfig::default()).unwrap();
    assert!(output.table.is_empty());
}

#[test]
fn test_error_handling_missing_file() {
    let result = run_pipeline("definitely/not/here.csv", &PipelineConfig::default());
    assert!(matches!(result, Err(CltvError::FileAccess { .. })));
}

#[test]
fn test_error_handling_missing_column() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "Invoice,StockCode,Description,Quantity,InvoiceDate,Price,Country").unwrap();
    writeln!(file, "536365,85123A,LANTERN,6,2010-12-01 08:26:00,2.55,United Kingdom").unwrap();

    match run_pipeline(file.path(), &PipelineConfig::default()) {
        Err(CltvError::Schema { column }) => assert_eq!(column, "customer_id"),
        other => panic!("expected schema error, got {:?}", other.map(|o| o.table.len())),
    }
}

#[test]
fn test_csv_export() {
    let test_file = create_synthetic_csv(20);
    let config = fitting_config();
    let output = run_pipeline(test_file.path(), &config).unwrap();

    let out = NamedTempFile::new().unwrap();
    output.table.write_csv(out.path()).unwrap();
    let written = std::fs::read_to_string(out.path()).unwrap();
    let mut lines = written.lines();
    assert_eq!(
        lines.next().unwrap(),
        "customer_id,recency,T,frequency,monetary,expected_purchases_horizon,expected_average_profit,clv,segment"
    );
    assert_eq!(lines.count(), 20);
}
