//! CLTV Forge: customer lifetime value CLI using BG/NBD and Gamma-Gamma models
//!
//! This is the main entrypoint that orchestrates loading, cleaning,
//! model fitting, segmentation, export and visualization.

use anyhow::{Context, Result};
use clap::Parser;
use cltvforge::{report, run_pipeline, viz, Args};
use std::time::Instant;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if args.verbose {
        println!("CLTV Forge - Customer Lifetime Value with BG/NBD and Gamma-Gamma");
        println!("================================================================\n");
    }

    run_full_pipeline(&args)
}

/// Run the CLTV pipeline and write its outputs
fn run_full_pipeline(args: &Args) -> Result<()> {
    println!("=== CLTV Pipeline ===\n");

    let start_time = Instant::now();
    let config = args.to_config()?;

    if args.verbose {
        println!("Input file: {}", args.input.display());
        println!("Reference date: {}", config.today);
        println!("Market: {}", config.cleaning.country);
        println!(
            "Projection: {} months, time unit {}, discount {}",
            config.model.clv_months, config.model.time_unit, config.model.discount_rate
        );
    }

    // Step 1: Load, clean, aggregate and fit
    let pipeline_start = Instant::now();
    let output = run_pipeline(&args.input, &config)
        .with_context(|| format!("CLTV pipeline failed for {}", args.input.display()))?;
    let pipeline_time = pipeline_start.elapsed();

    let cleaning = &output.cleaning;
    println!(
        "✓ Data cleaned: {} of {} rows kept",
        cleaning.output_rows, cleaning.input_rows
    );
    if args.verbose {
        println!(
            "  Dropped: {} without customer, {} incomplete, {} cancelled, {} non-positive, {} other country, {} after reference date",
            cleaning.missing_customer,
            cleaning.incomplete,
            cleaning.cancelled,
            cleaning.non_positive,
            cleaning.other_country,
            cleaning.after_reference_date
        );
        println!(
            "  Capped: {} quantities, {} prices",
            cleaning.quantity_capped, cleaning.price_capped
        );
        if let Some(t) = output.quantity_thresholds {
            println!("  Quantity bounds: [{:.2}, {:.2}]", t.low, t.high);
        }
        if let Some(t) = output.price_thresholds {
            println!("  Price bounds: [{:.2}, {:.2}]", t.low, t.high);
        }
    }

    println!("✓ Models fitted on {} repeat customers", output.customers);
    if args.verbose {
        println!("  Pipeline time: {:.2}s", pipeline_time.as_secs_f64());
        if let Some(p) = output.bgnbd {
            println!(
                "  BG/NBD: r={:.4}, alpha={:.4}, a={:.4}, b={:.4}",
                p.r, p.alpha, p.a, p.b
            );
        }
        if let Some(p) = output.gamma_gamma {
            println!("  Gamma-Gamma: p={:.4}, q={:.4}, v={:.4}", p.p, p.q, p.v);
        }
    }

    let mut table = output.table;
    if table.is_empty() {
        println!("\nNo repeat customers remained; writing an empty table");
    }

    // Step 2: Export the table
    table.sort_by(args.sort_by, true);
    table
        .write_csv(&args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    println!("✓ CLTV table written: {}", args.output.display());

    // Step 3: Console summaries
    if !table.is_empty() {
        report::print_top(&table, args.sort_by, args.top);
        report::print_segment_summary(&table);
    }

    // Step 4: Optional charts
    if let Some(chart) = &args.chart {
        if table.is_empty() {
            println!("\nSkipping charts, nothing to plot");
        } else {
            let viz_start = Instant::now();
            let paths = viz::generate_visualization_report(&table, chart)?;
            println!("\n✓ Visualizations generated");
            for path in &paths {
                println!("  {}", path.display());
            }
            if args.verbose {
                println!("  Visualization time: {:.2}s", viz_start.elapsed().as_secs_f64());
            }
        }
    }

    let total_time = start_time.elapsed();
    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", total_time.as_secs_f64());

    Ok(())
}
