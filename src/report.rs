//! Final CLTV table: segmentation, ordering, export and console summaries

use polars::prelude::*;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;

use crate::error::{CltvError, CltvResult};
use crate::predict::CustomerPrediction;
use crate::segment::{assign_segments, Segment};

/// One output row per repeat customer
#[derive(Debug, Clone, PartialEq)]
pub struct CltvRow {
    pub customer_id: String,
    pub recency: f64,
    pub t: f64,
    pub frequency: u32,
    pub monetary: f64,
    pub expected_purchases_horizon: f64,
    pub expected_average_profit: f64,
    pub clv: f64,
    pub segment: Segment,
}

/// Numeric columns the table can be ordered by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Recency,
    T,
    Frequency,
    Monetary,
    ExpectedPurchases,
    ExpectedAverageProfit,
    Clv,
}

impl Column {
    pub fn name(self) -> &'static str {
        match self {
            Column::Recency => "recency",
            Column::T => "T",
            Column::Frequency => "frequency",
            Column::Monetary => "monetary",
            Column::ExpectedPurchases => "expected_purchases_horizon",
            Column::ExpectedAverageProfit => "expected_average_profit",
            Column::Clv => "clv",
        }
    }

    fn value(self, row: &CltvRow) -> f64 {
        match self {
            Column::Recency => row.recency,
            Column::T => row.t,
            Column::Frequency => f64::from(row.frequency),
            Column::Monetary => row.monetary,
            Column::ExpectedPurchases => row.expected_purchases_horizon,
            Column::ExpectedAverageProfit => row.expected_average_profit,
            Column::Clv => row.clv,
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Column {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "recency" => Ok(Column::Recency),
            "T" | "t" | "tenure" => Ok(Column::T),
            "frequency" => Ok(Column::Frequency),
            "monetary" => Ok(Column::Monetary),
            "expected_purchases_horizon" | "expected_purchases" => Ok(Column::ExpectedPurchases),
            "expected_average_profit" => Ok(Column::ExpectedAverageProfit),
            "clv" => Ok(Column::Clv),
            other => Err(format!("Unknown column '{}'", other)),
        }
    }
}

/// Per-segment totals
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSummary {
    pub segment: Segment,
    pub customers: usize,
    pub mean_clv: f64,
    pub total_clv: f64,
    pub mean_expected_purchases: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CltvTable {
    rows: Vec<CltvRow>,
}

impl CltvTable {
    /// Segment the predictions by `clv` and build the table, keeping input order
    pub fn from_predictions(predictions: Vec<CustomerPrediction>, buckets: usize) -> CltvResult<Self> {
        let clv: Vec<f64> = predictions.iter().map(|p| p.prediction.clv).collect();
        let segments = assign_segments(&clv, buckets)?;

        let rows = predictions
            .into_iter()
            .zip(segments)
            .map(|(p, segment)| CltvRow {
                customer_id: p.aggregate.customer_id,
                recency: p.aggregate.recency,
                t: p.aggregate.t,
                frequency: p.aggregate.frequency,
                monetary: p.aggregate.monetary,
                expected_purchases_horizon: p.prediction.expected_purchases_horizon,
                expected_average_profit: p.prediction.expected_average_profit,
                clv: p.prediction.clv,
                segment,
            })
            .collect();
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[CltvRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, customer_id: &str) -> Option<&CltvRow> {
        self.rows.iter().find(|r| r.customer_id == customer_id)
    }

    /// Stable sort; ties keep customer id order
    pub fn sort_by(&mut self, column: Column, descending: bool) {
        self.rows.sort_by(|a, b| {
            let ord = column.value(a).total_cmp(&column.value(b));
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });
    }

    /// The `n` highest rows by `column`
    pub fn top_n(&self, column: Column, n: usize) -> Vec<&CltvRow> {
        let mut rows: Vec<&CltvRow> = self.rows.iter().collect();
        rows.sort_by(|a, b| column.value(b).total_cmp(&column.value(a)));
        rows.truncate(n);
        rows
    }

    /// Segments ordered from highest to lowest
    pub fn segment_summary(&self) -> Vec<SegmentSummary> {
        let mut groups: BTreeMap<Segment, Vec<&CltvRow>> = BTreeMap::new();
        for row in &self.rows {
            groups.entry(row.segment).or_default().push(row);
        }

        groups
            .into_iter()
            .rev()
            .map(|(segment, rows)| {
                let n = rows.len() as f64;
                let total_clv: f64 = rows.iter().map(|r| r.clv).sum();
                let purchases: f64 = rows.iter().map(|r| r.expected_purchases_horizon).sum();
                SegmentSummary {
                    segment,
                    customers: rows.len(),
                    mean_clv: total_clv / n,
                    total_clv,
                    mean_expected_purchases: purchases / n,
                }
            })
            .collect()
    }

    pub fn to_dataframe(&self) -> CltvResult<DataFrame> {
        let rows = &self.rows;
        let df = DataFrame::new(vec![
            Series::new(
                "customer_id",
                rows.iter().map(|r| r.customer_id.as_str()).collect::<Vec<_>>(),
            ),
            Series::new("recency", rows.iter().map(|r| r.recency).collect::<Vec<_>>()),
            Series::new("T", rows.iter().map(|r| r.t).collect::<Vec<_>>()),
            Series::new("frequency", rows.iter().map(|r| r.frequency).collect::<Vec<_>>()),
            Series::new("monetary", rows.iter().map(|r| r.monetary).collect::<Vec<_>>()),
            Series::new(
                Column::ExpectedPurchases.name(),
                rows.iter()
                    .map(|r| r.expected_purchases_horizon)
                    .collect::<Vec<_>>(),
            ),
            Series::new(
                Column::ExpectedAverageProfit.name(),
                rows.iter()
                    .map(|r| r.expected_average_profit)
                    .collect::<Vec<_>>(),
            ),
            Series::new("clv", rows.iter().map(|r| r.clv).collect::<Vec<_>>()),
            Series::new(
                "segment",
                rows.iter()
                    .map(|r| r.segment.to_string())
                    .collect::<Vec<_>>(),
            ),
        ])?;
        Ok(df)
    }

    /// Write the table as CSV with a header row
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> CltvResult<()> {
        let path = path.as_ref();
        let mut df = self.to_dataframe()?;
        let mut file = File::create(path)
            .map_err(|e| CltvError::file_access(path.display().to_string(), e))?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut df)?;
        log::info!("Wrote {} customers to {}", self.len(), path.display());
        Ok(())
    }
}

/// Header and one line per customer for the top `n` rows by `column`
pub fn top_table_lines(table: &CltvTable, column: Column, n: usize) -> Vec<String> {
    let mut lines = vec![format!(
        "  {:>10} | {:>7} | {:>7} | {:>4} | {:>9} | {:>9} | {:>10} | {:>10} | Seg",
        "Customer", "Recency", "T", "Freq", "Monetary", "Exp.Purch", "Exp.Profit", "CLV"
    )];
    for row in table.top_n(column, n) {
        lines.push(format!(
            "  {:>10} | {:7.2} | {:7.2} | {:4} | {:9.2} | {:9.2} | {:10.2} | {:10.2} | {}",
            row.customer_id,
            row.recency,
            row.t,
            row.frequency,
            row.monetary,
            row.expected_purchases_horizon,
            row.expected_average_profit,
            row.clv,
            row.segment
        ));
    }
    lines
}

/// Print the highest-ranked customers by `column`
pub fn print_top(table: &CltvTable, column: Column, n: usize) {
    println!("\n=== Top {} customers by {} ===", n, column);
    for line in top_table_lines(table, column, n) {
        println!("{}", line);
    }
}

/// Print customer counts and value per segment
pub fn print_segment_summary(table: &CltvTable) {
    println!("\n=== Segment Summary ===");
    let total = table.len().max(1) as f64;
    for summary in table.segment_summary() {
        println!(
            "Segment {}: {} customers ({:.1}%), mean CLV {:.2}, total CLV {:.2}, mean expected purchases {:.2}",
            summary.segment,
            summary.customers,
            summary.customers as f64 / total * 100.0,
            summary.mean_clv,
            summary.total_clv,
            summary.mean_expected_purchases
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::CustomerAggregate;
    use crate::predict::Prediction;
    use tempfile::tempdir;

    fn prediction(id: &str, frequency: u32, clv: f64) -> CustomerPrediction {
        CustomerPrediction {
            aggregate: CustomerAggregate {
                customer_id: id.to_string(),
                recency: 10.0,
                t: 20.0,
                frequency,
                monetary: 50.0,
            },
            prediction: Prediction {
                expected_purchases_horizon: f64::from(frequency) / 2.0,
                expected_average_profit: 48.0,
                clv,
            },
        }
    }

    fn create_test_table() -> CltvTable {
        let predictions = vec![
            prediction("12346", 2, 15.0),
            prediction("12347", 7, 820.5),
            prediction("12348", 4, 210.0),
            prediction("12349", 3, 95.0),
            prediction("12350", 5, 400.0),
            prediction("12352", 2, 40.0),
            prediction("12353", 6, 600.0),
            prediction("12354", 3, 150.0),
        ];
        CltvTable::from_predictions(predictions, 4).unwrap()
    }

    #[test]
    fn test_from_predictions_keeps_order_and_segments() {
        let table = create_test_table();
        assert_eq!(table.len(), 8);
        assert_eq!(table.rows()[0].customer_id, "12346");
        assert_eq!(table.get("12346").unwrap().segment.label(), 'D');
        assert_eq!(table.get("12347").unwrap().segment.label(), 'A');
        assert_eq!(table.get("12353").unwrap().segment.label(), 'A');
        assert_eq!(table.get("12348").unwrap().segment.label(), 'B');
    }

    #[test]
    fn test_sort_and_top_n() {
        let mut table = create_test_table();
        let top = table.top_n(Column::Clv, 3);
        let ids: Vec<&str> = top.iter().map(|r| r.customer_id.as_str()).collect();
        assert_eq!(ids, vec!["12347", "12353", "12350"]);

        table.sort_by(Column::Frequency, false);
        let frequencies: Vec<u32> = table.rows().iter().map(|r| r.frequency).collect();
        assert!(frequencies.windows(2).all(|w| w[0] <= w[1]));
        // stable: equal frequencies keep their previous order
        assert_eq!(table.rows()[0].customer_id, "12346");
        assert_eq!(table.rows()[1].customer_id, "12352");

        assert!(table.top_n(Column::Monetary, 100).len() == 8);
    }

    #[test]
    fn test_segment_summary() {
        let table = create_test_table();
        let summary = table.segment_summary();
        assert_eq!(summary.len(), 4);
        assert_eq!(summary[0].segment.label(), 'A');
        assert_eq!(summary[3].segment.label(), 'D');
        assert_eq!(summary.iter().map(|s| s.customers).sum::<usize>(), 8);
        assert!((summary[0].total_clv - 1420.5).abs() < 1e-9);
        assert!((summary[0].mean_clv - 710.25).abs() < 1e-9);
    }

    #[test]
    fn test_column_parsing() {
        assert_eq!("clv".parse::<Column>().unwrap(), Column::Clv);
        assert_eq!("T".parse::<Column>().unwrap(), Column::T);
        assert_eq!(
            "expected_purchases".parse::<Column>().unwrap(),
            Column::ExpectedPurchases
        );
        assert!("segment".parse::<Column>().is_err());
    }

    #[test]
    fn test_dataframe_and_csv() {
        let table = create_test_table();
        let df = table.to_dataframe().unwrap();
        assert_eq!(df.shape(), (8, 9));
        assert_eq!(
            df.get_column_names(),
            vec![
                "customer_id",
                "recency",
                "T",
                "frequency",
                "monetary",
                "expected_purchases_horizon",
                "expected_average_profit",
                "clv",
                "segment"
            ]
        );

        let dir = tempdir().unwrap();
        let path = dir.path().join("cltv.csv");
        table.write_csv(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        let mut lines = written.lines();
        assert!(lines.next().unwrap().starts_with("customer_id,recency,T,frequency"));
        assert_eq!(lines.count(), 8);
    }

    #[test]
    fn test_top_table_columns_line_up() {
        let table = create_test_table();
        let lines = top_table_lines(&table, Column::Clv, 3);
        assert_eq!(lines.len(), 4);
        assert!(lines[1].contains("12347"));

        let separators = |line: &str| -> Vec<usize> {
            line.char_indices().filter(|(_, c)| *c == '|').map(|(i, _)| i).collect()
        };
        let header = separators(&lines[0]);
        assert_eq!(header.len(), 8);
        for line in &lines[1..] {
            assert_eq!(separators(line), header);
        }
    }

    #[test]
    fn test_empty_table() {
        let table = CltvTable::from_predictions(Vec::new(), 4).unwrap();
        assert!(table.is_empty());
        assert!(table.segment_summary().is_empty());
        assert_eq!(table.to_dataframe().unwrap().height(), 0);
    }
}
