//! Per-customer recency, tenure, frequency and monetary summaries

use chrono::{NaiveDate, NaiveTime};
use ndarray::Array1;
use polars::prelude::*;

use crate::clean::{timestamp_micros, CUSTOMER_ID, INVOICE, INVOICE_TS, MICROS_PER_DAY, TOTAL_PRICE};
use crate::config::{AggregationConfig, TimeUnit};
use crate::error::CltvResult;

/// Summary statistics of one repeat customer. Time spans are in model time steps.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerAggregate {
    pub customer_id: String,
    /// Steps between first and last purchase
    pub recency: f64,
    /// Steps between first purchase and the reference date
    pub t: f64,
    /// Distinct invoices
    pub frequency: u32,
    /// Mean invoice value
    pub monetary: f64,
}

/// Column view of the aggregates, as the models consume them
#[derive(Debug, Clone)]
pub struct ModelInputs {
    pub frequency: Array1<f64>,
    pub recency: Array1<f64>,
    pub t: Array1<f64>,
    pub monetary: Array1<f64>,
}

impl ModelInputs {
    pub fn from_aggregates(aggregates: &[CustomerAggregate]) -> Self {
        Self {
            frequency: aggregates.iter().map(|a| f64::from(a.frequency)).collect(),
            recency: aggregates.iter().map(|a| a.recency).collect(),
            t: aggregates.iter().map(|a| a.t).collect(),
            monetary: aggregates.iter().map(|a| a.monetary).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.frequency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequency.is_empty()
    }
}

/// Whole days in a microsecond span, expressed in model time steps
fn span_in_steps(span: Expr, time_unit: TimeUnit) -> Expr {
    (span.cast(DataType::Float64) / lit(MICROS_PER_DAY as f64)).floor() / lit(time_unit.days_per_step())
}

/// Collapse cleaned transactions into one aggregate per repeat customer.
///
/// Spans are counted in whole days before conversion to `time_unit` steps.
/// Customers with `min_frequency` invoices or fewer, or with a non-positive
/// mean invoice value, are left out. Output follows first appearance in the frame.
pub fn aggregate_customers(
    transactions: &DataFrame,
    config: &AggregationConfig,
    today: NaiveDate,
    time_unit: TimeUnit,
) -> CltvResult<Vec<CustomerAggregate>> {
    let reference = timestamp_micros(today.and_time(NaiveTime::MIN));

    let summary = transactions
        .clone()
        .lazy()
        .group_by_stable([col(CUSTOMER_ID)])
        .agg([
            col(INVOICE_TS).min().alias("first"),
            col(INVOICE_TS).max().alias("last"),
            col(INVOICE).n_unique().cast(DataType::UInt32).alias("frequency"),
            col(TOTAL_PRICE).sum().alias("revenue"),
        ])
        .with_columns([
            span_in_steps(col("last") - col("first"), time_unit).alias("recency"),
            span_in_steps(lit(reference) - col("first"), time_unit).alias("T"),
            (col("revenue") / col("frequency").cast(DataType::Float64)).alias("monetary"),
        ])
        .collect()?;
    let total_customers = summary.height();

    let repeat = summary
        .lazy()
        .filter(
            col("frequency")
                .gt(lit(config.min_frequency))
                .and(col("monetary").gt(lit(0.0))),
        )
        .collect()?;

    let ids = repeat.column(CUSTOMER_ID)?.str()?;
    let recency = repeat.column("recency")?.f64()?;
    let tenure = repeat.column("T")?.f64()?;
    let frequency = repeat.column("frequency")?.u32()?;
    let monetary = repeat.column("monetary")?.f64()?;

    let aggregates: Vec<CustomerAggregate> = ids
        .into_iter()
        .zip(recency.into_iter())
        .zip(tenure.into_iter())
        .zip(frequency.into_iter())
        .zip(monetary.into_iter())
        .filter_map(|((((id, recency), t), frequency), monetary)| {
            Some(CustomerAggregate {
                customer_id: id?.to_string(),
                recency: recency?,
                t: t?,
                frequency: frequency?,
                monetary: monetary?,
            })
        })
        .collect();

    log::info!(
        "Aggregated {} customers into {} repeat customers (frequency above {}, positive monetary), time unit {}",
        total_customers,
        aggregates.len(),
        config.min_frequency,
        time_unit
    );
    if aggregates.is_empty() {
        log::warn!("No customers qualify for modelling");
    }
    Ok(aggregates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDateTime};

    fn sales_frame(sales: &[(&str, &str, NaiveDateTime, f64)]) -> DataFrame {
        DataFrame::new(vec![
            Series::new(INVOICE, sales.iter().map(|s| s.0).collect::<Vec<_>>()),
            Series::new(CUSTOMER_ID, sales.iter().map(|s| s.1).collect::<Vec<_>>()),
            Series::new(
                INVOICE_TS,
                sales.iter().map(|s| timestamp_micros(s.2)).collect::<Vec<_>>(),
            ),
            Series::new(TOTAL_PRICE, sales.iter().map(|s| s.3).collect::<Vec<_>>()),
        ])
        .unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2011, 12, 11).unwrap()
    }

    fn days_before_today(days: i64) -> NaiveDateTime {
        today().and_time(NaiveTime::MIN) - Duration::days(days)
    }

    fn aggregate(frame: &DataFrame, time_unit: TimeUnit) -> Vec<CustomerAggregate> {
        aggregate_customers(frame, &AggregationConfig::default(), today(), time_unit).unwrap()
    }

    #[test]
    fn test_two_invoice_customer() {
        let frame = sales_frame(&[
            ("536365", "17850", days_before_today(400), 60.0),
            ("536365", "17850", days_before_today(400), 40.0),
            ("541000", "17850", days_before_today(370), 150.0),
        ]);

        let aggregates = aggregate(&frame, TimeUnit::Week);

        assert_eq!(aggregates.len(), 1);
        let customer = &aggregates[0];
        assert_eq!(customer.customer_id, "17850");
        assert_eq!(customer.frequency, 2);
        assert!((customer.monetary - 125.0).abs() < 1e-9);
        assert!((customer.recency - 30.0 / 7.0).abs() < 1e-9);
        assert!((customer.t - 400.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_spans_follow_time_unit() {
        let frame = sales_frame(&[
            ("536365", "17850", days_before_today(400), 100.0),
            ("541000", "17850", days_before_today(370), 150.0),
        ]);

        let days = aggregate(&frame, TimeUnit::Day);
        assert!((days[0].recency - 30.0).abs() < 1e-9);
        assert!((days[0].t - 400.0).abs() < 1e-9);

        let months = aggregate(&frame, TimeUnit::Month);
        assert!((months[0].recency - 1.0).abs() < 1e-9);
        assert!((months[0].t - 400.0 / 30.0).abs() < 1e-9);

        let hours = aggregate(&frame, TimeUnit::Hour);
        assert!((hours[0].t - 9600.0).abs() < 1e-6);
    }

    #[test]
    fn test_partial_days_are_truncated() {
        let first = days_before_today(10) + Duration::hours(20);
        let frame = sales_frame(&[
            ("1", "12346", first, 10.0),
            ("2", "12346", first + Duration::hours(30), 10.0),
        ]);

        let aggregates = aggregate(&frame, TimeUnit::Week);
        // 30 hours -> 1 day, 9 days 4 hours -> 9 days
        assert!((aggregates[0].recency - 1.0 / 7.0).abs() < 1e-9);
        assert!((aggregates[0].t - 9.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_filters_single_purchase_and_non_positive() {
        let frame = sales_frame(&[
            ("1", "13047", days_before_today(100), 20.0),
            ("1", "13047", days_before_today(100), 30.0),
            ("2", "14000", days_before_today(50), 10.0),
            ("3", "14000", days_before_today(20), -10.0),
            ("4", "15000", days_before_today(90), 10.0),
            ("5", "15000", days_before_today(10), 10.0),
        ]);

        let aggregates = aggregate(&frame, TimeUnit::Week);
        let ids: Vec<&str> = aggregates.iter().map(|a| a.customer_id.as_str()).collect();
        assert_eq!(ids, vec!["15000"]);

        for a in &aggregates {
            assert!(a.frequency >= 2);
            assert!(a.monetary > 0.0);
            assert!(a.recency <= a.t);
            assert!(a.t >= 0.0);
        }
    }

    #[test]
    fn test_min_frequency_cutoff() {
        let frame = sales_frame(&[
            ("1", "15000", days_before_today(90), 10.0),
            ("2", "15000", days_before_today(10), 10.0),
        ]);
        let config = AggregationConfig { min_frequency: 2 };
        assert!(aggregate_customers(&frame, &config, today(), TimeUnit::Week)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_model_inputs() {
        let aggregates = vec![
            CustomerAggregate {
                customer_id: "a".into(),
                recency: 1.0,
                t: 2.0,
                frequency: 3,
                monetary: 4.0,
            },
            CustomerAggregate {
                customer_id: "b".into(),
                recency: 5.0,
                t: 6.0,
                frequency: 7,
                monetary: 8.0,
            },
        ];
        let inputs = ModelInputs::from_aggregates(&aggregates);
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs.frequency.to_vec(), vec![3.0, 7.0]);
        assert_eq!(inputs.monetary.to_vec(), vec![4.0, 8.0]);
        assert!(ModelInputs::from_aggregates(&[]).is_empty());
    }

    #[test]
    fn test_empty_input() {
        let frame = sales_frame(&[]);
        assert!(aggregate(&frame, TimeUnit::Week).is_empty());
    }
}
