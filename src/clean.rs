//! Row cleaning and outlier capping using Polars

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use polars::prelude::*;

use crate::config::CleaningConfig;
use crate::data::RawTransaction;
use crate::error::CltvResult;

// Column names of the transaction frame
pub const INVOICE: &str = "invoice";
pub const STOCK_CODE: &str = "stock_code";
pub const DESCRIPTION: &str = "description";
pub const QUANTITY: &str = "quantity";
/// Invoice timestamp in microseconds since the Unix epoch
pub const INVOICE_TS: &str = "invoice_ts";
pub const PRICE: &str = "price";
pub const CUSTOMER_ID: &str = "customer_id";
pub const COUNTRY: &str = "country";
pub const TOTAL_PRICE: &str = "total_price";

/// Microseconds in one day
pub const MICROS_PER_DAY: i64 = 86_400_000_000;

/// A completed sale attributable to a customer, after capping
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedTransaction {
    pub invoice: String,
    pub stock_code: String,
    pub description: String,
    pub quantity: f64,
    pub invoice_date: NaiveDateTime,
    pub price: f64,
    pub customer_id: String,
    pub country: String,
    /// `quantity * price`, computed after capping
    pub total_price: f64,
}

/// Capping range for one numeric column
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierThresholds {
    pub low: f64,
    pub high: f64,
}

impl OutlierThresholds {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }
}

/// Row counts removed or modified by each cleaning step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleaningReport {
    pub input_rows: usize,
    pub missing_customer: usize,
    pub incomplete: usize,
    pub cancelled: usize,
    pub non_positive: usize,
    pub quantity_capped: usize,
    pub price_capped: usize,
    pub other_country: usize,
    pub after_reference_date: usize,
    pub output_rows: usize,
}

#[derive(Debug, Clone)]
pub struct CleaningOutput {
    /// Cleaned sales; `quantity` is Float64 after capping and `total_price` is added
    pub frame: DataFrame,
    /// `None` when no rows were left to compute thresholds on
    pub quantity_thresholds: Option<OutlierThresholds>,
    pub price_thresholds: Option<OutlierThresholds>,
    pub report: CleaningReport,
}

impl CleaningOutput {
    /// Row view of the cleaned frame
    pub fn transactions(&self) -> CltvResult<Vec<CleanedTransaction>> {
        let df = &self.frame;
        let invoices = df.column(INVOICE)?.str()?;
        let stock_codes = df.column(STOCK_CODE)?.str()?;
        let descriptions = df.column(DESCRIPTION)?.str()?;
        let quantities = df.column(QUANTITY)?.f64()?;
        let timestamps = df.column(INVOICE_TS)?.i64()?;
        let prices = df.column(PRICE)?.f64()?;
        let customers = df.column(CUSTOMER_ID)?.str()?;
        let countries = df.column(COUNTRY)?.str()?;
        let totals = df.column(TOTAL_PRICE)?.f64()?;

        let rows = (0..df.height())
            .filter_map(|i| {
                Some(CleanedTransaction {
                    invoice: invoices.get(i)?.to_string(),
                    stock_code: stock_codes.get(i)?.to_string(),
                    description: descriptions.get(i)?.to_string(),
                    quantity: quantities.get(i)?,
                    invoice_date: from_timestamp_micros(timestamps.get(i)?)?,
                    price: prices.get(i)?,
                    customer_id: customers.get(i)?.to_string(),
                    country: countries.get(i)?.to_string(),
                    total_price: totals.get(i)?,
                })
            })
            .collect();
        Ok(rows)
    }
}

pub fn timestamp_micros(value: NaiveDateTime) -> i64 {
    value.and_utc().timestamp_micros()
}

fn from_timestamp_micros(micros: i64) -> Option<NaiveDateTime> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos).map(|dt| dt.naive_utc())
}

/// Build the transaction frame the cleaning stages operate on
pub fn transactions_frame(rows: &[RawTransaction]) -> CltvResult<DataFrame> {
    let text = |f: fn(&RawTransaction) -> Option<&str>| rows.iter().map(f).collect::<Vec<_>>();

    let df = DataFrame::new(vec![
        Series::new(INVOICE, text(|r| r.invoice.as_deref())),
        Series::new(STOCK_CODE, text(|r| r.stock_code.as_deref())),
        Series::new(DESCRIPTION, text(|r| r.description.as_deref())),
        Series::new(QUANTITY, rows.iter().map(|r| r.quantity).collect::<Vec<_>>()),
        Series::new(
            INVOICE_TS,
            rows.iter()
                .map(|r| r.invoice_date.map(timestamp_micros))
                .collect::<Vec<_>>(),
        ),
        Series::new(PRICE, rows.iter().map(|r| r.price).collect::<Vec<_>>()),
        Series::new(CUSTOMER_ID, text(|r| r.customer_id.as_deref())),
        Series::new(COUNTRY, text(|r| r.country.as_deref())),
    ])?;
    Ok(df)
}

/// Capping range `[q_lo - k*span, q_hi + k*span]` of a Float64 column, where `span = q_hi - q_lo`.
///
/// The default percentiles are 1st/99th rather than the textbook 25th/75th,
/// which only trims the far tails of skewed retail quantities and prices.
pub fn outlier_thresholds(
    frame: &DataFrame,
    column: &str,
    config: &CleaningConfig,
) -> CltvResult<Option<OutlierThresholds>> {
    if frame.height() == 0 {
        return Ok(None);
    }
    let q_lo = col(column).quantile(lit(config.lower_quantile), QuantileInterpolOptions::Linear);
    let q_hi = col(column).quantile(lit(config.upper_quantile), QuantileInterpolOptions::Linear);
    let span = q_hi.clone() - q_lo.clone();
    let k = lit(config.iqr_multiplier);

    let bounds = frame
        .clone()
        .lazy()
        .select([
            (q_lo - k.clone() * span.clone()).alias("low"),
            (q_hi + k * span).alias("high"),
        ])
        .collect()?;

    let low = bounds.column("low")?.f64()?.get(0);
    let high = bounds.column("high")?.f64()?.get(0);
    Ok(low.zip(high).map(|(low, high)| OutlierThresholds { low, high }))
}

/// Rows of `column` outside the range
fn count_outside(frame: &DataFrame, column: &str, thresholds: OutlierThresholds) -> CltvResult<usize> {
    let outside = frame
        .clone()
        .lazy()
        .filter(
            col(column)
                .lt(lit(thresholds.low))
                .or(col(column).gt(lit(thresholds.high))),
        )
        .collect()?;
    Ok(outside.height())
}

/// Keep the rows matching `predicate`, returning how many were removed
fn filter_counted(frame: DataFrame, predicate: Expr) -> CltvResult<(DataFrame, usize)> {
    let before = frame.height();
    let kept = frame.lazy().filter(predicate).collect()?;
    let removed = before - kept.height();
    Ok((kept, removed))
}

/// Turn raw rows into capped sales for the target market.
///
/// Thresholds are computed over all markets before the country filter is
/// applied, so the bounds reflect the full set of valid sales.
pub fn clean_transactions(
    rows: &[RawTransaction],
    config: &CleaningConfig,
    today: NaiveDate,
) -> CltvResult<CleaningOutput> {
    let frame = transactions_frame(rows)?;
    let mut report = CleaningReport {
        input_rows: frame.height(),
        ..Default::default()
    };

    let (frame, removed) = filter_counted(frame, col(CUSTOMER_ID).is_not_null())?;
    report.missing_customer = removed;

    let complete = [INVOICE, STOCK_CODE, DESCRIPTION, QUANTITY, INVOICE_TS, PRICE, COUNTRY]
        .into_iter()
        .fold(lit(true), |acc, name| acc.and(col(name).is_not_null()));
    let (frame, removed) = filter_counted(frame, complete)?;
    report.incomplete = removed;

    let (frame, removed) = filter_counted(
        frame,
        col(INVOICE)
            .str()
            .contains_literal(lit(config.cancellation_marker.as_str()))
            .not(),
    )?;
    report.cancelled = removed;

    let (frame, removed) = filter_counted(
        frame,
        col(QUANTITY).gt(lit(0)).and(col(PRICE).gt(lit(0.0))),
    )?;
    report.non_positive = removed;

    let mut frame = frame
        .lazy()
        .with_column(col(QUANTITY).cast(DataType::Float64))
        .collect()?;

    let quantity_thresholds = outlier_thresholds(&frame, QUANTITY, config)?;
    let price_thresholds = outlier_thresholds(&frame, PRICE, config)?;
    let mut capping = Vec::new();
    if let Some(thresholds) = quantity_thresholds {
        report.quantity_capped = count_outside(&frame, QUANTITY, thresholds)?;
        log::debug!(
            "Quantity bounds [{:.3}, {:.3}], {} values capped",
            thresholds.low,
            thresholds.high,
            report.quantity_capped
        );
        capping.push(col(QUANTITY).clip(lit(thresholds.low), lit(thresholds.high)));
    }
    if let Some(thresholds) = price_thresholds {
        report.price_capped = count_outside(&frame, PRICE, thresholds)?;
        log::debug!(
            "Price bounds [{:.3}, {:.3}], {} values capped",
            thresholds.low,
            thresholds.high,
            report.price_capped
        );
        capping.push(col(PRICE).clip(lit(thresholds.low), lit(thresholds.high)));
    }
    if !capping.is_empty() {
        frame = frame.lazy().with_columns(capping).collect()?;
    }

    let (frame, removed) = filter_counted(frame, col(COUNTRY).eq(lit(config.country.as_str())))?;
    report.other_country = removed;

    let cutoff = timestamp_micros(today.and_time(NaiveTime::MIN));
    let (frame, removed) = filter_counted(frame, col(INVOICE_TS).lt_eq(lit(cutoff)))?;
    report.after_reference_date = removed;
    if removed > 0 {
        log::warn!(
            "Dropped {} transactions dated after the reference date {}",
            removed,
            today
        );
    }

    let frame = frame
        .lazy()
        .with_column((col(QUANTITY) * col(PRICE)).alias(TOTAL_PRICE))
        .collect()?;
    report.output_rows = frame.height();

    log::info!(
        "Cleaning kept {} of {} rows (missing customer {}, incomplete {}, cancelled {}, non-positive {}, other country {})",
        report.output_rows,
        report.input_rows,
        report.missing_customer,
        report.incomplete,
        report.cancelled,
        report.non_positive,
        report.other_country
    );
    if report.output_rows == 0 {
        log::warn!("No transactions left after cleaning");
    }

    Ok(CleaningOutput {
        frame,
        quantity_thresholds,
        price_thresholds,
        report,
    })
}
