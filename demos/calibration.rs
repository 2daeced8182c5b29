//! Radiance Calibration Example
//!
//! Propagates detector noise and calibration drift through a linear radiance
//! calibration and writes the per-channel uncertainty budget to CSV

use mcprop::{Ensemble, McPropagation, Quantity, Request};
use nalgebra::DMatrix;
use std::error::Error;
use std::fs::{self, File};
use std::io::Write;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    println!("Running radiance calibration propagation...\n");

    // Create output directory
    fs::create_dir_all("out")?;

    let channels = 25;
    let steps = 20_000;

    // Measured counts, dark reading, and calibration gain per channel
    let dn = Quantity::vector((0..channels).map(|i| 420.0 + 14.0 * i as f64).collect());
    let dark = Quantity::vector(vec![48.0; channels]);
    let gain = Quantity::vector((0..channels).map(|i| 0.020 + 0.0004 * i as f64).collect());

    // Random components: shot and read noise on the counts
    let u_dn_random = Quantity::vector(vec![3.0; channels]);
    let u_dark_random = Quantity::vector(vec![1.5; channels]);
    let u_gain_random = Quantity::vector(vec![0.0; channels]);

    // Systematic components: dark offset drift and calibration lamp drift
    let u_dn_systematic = Quantity::vector(vec![0.0; channels]);
    let u_dark_systematic = Quantity::vector(vec![0.5; channels]);
    let u_gain_systematic =
        Quantity::vector((0..channels).map(|i| 0.0002 + 0.000_004 * i as f64).collect());

    // Counts and dark reading share the detector, so their errors correlate
    let corr_between = DMatrix::from_row_slice(
        3,
        3,
        &[
            1.0, 0.3, 0.0, //
            0.3, 1.0, 0.0, //
            0.0, 0.0, 1.0,
        ],
    );

    println!("Configuration:");
    println!("  Channels: {}", channels);
    println!("  Trials: {}", steps);
    println!("  Counts/dark correlation: {}", corr_between[(0, 1)]);
    println!();

    // Radiance calibration: L = gain * (counts - dark)
    let radiance = |inputs: &[Ensemble]| {
        let block =
            (inputs[0].samples() - inputs[1].samples()).component_mul(inputs[2].samples());
        Ensemble::new(inputs[0].shape(), block)
    };

    let prop = McPropagation::with_seed(steps, 42);
    let summary = prop.propagate_both(
        radiance,
        &[dn.clone(), dark, gain.clone()],
        &[u_dn_random, u_dark_random, u_gain_random],
        &[u_dn_systematic, u_dark_systematic, u_gain_systematic],
        Some(&corr_between),
        Request {
            corr: true,
            ..Default::default()
        },
    )?;

    // Print summary
    println!("UNCERTAINTY SUMMARY");
    println!("===================");
    println!("\nRadiance with combined uncertainty:");
    for e in [0, channels / 2, channels - 1] {
        let mean = summary.mean.values()[e];
        let u = summary.uncertainty.values()[e];
        println!(
            "  channel {:2}: {:.4} +/- {:.4} ({:.2}%)",
            e,
            mean,
            u,
            100.0 * u / mean
        );
    }

    if let Some(corr) = &summary.corr {
        println!("\nChannel-to-channel correlation:");
        println!("  adjacent (0, 1):   {:.4}", corr[(0, 1)]);
        println!("  extremes (0, {}): {:.4}", channels - 1, corr[(0, channels - 1)]);
    }

    // Write CSV
    let csv_path = "out/calibration.csv";
    let mut file = File::create(csv_path)?;

    writeln!(file, "channel,counts,gain,radiance,u_radiance,u_relative")?;

    for e in 0..channels {
        let mean = summary.mean.values()[e];
        let u = summary.uncertainty.values()[e];
        writeln!(
            file,
            "{},{:.6},{:.6},{:.6},{:.6},{:.6}",
            e,
            dn.values()[e],
            gain.values()[e],
            mean,
            u,
            u / mean
        )?;
    }

    println!("\nCSV output written to: {}", csv_path);
    println!("Done!");

    Ok(())
}
