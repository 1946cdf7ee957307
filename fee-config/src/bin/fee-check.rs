//! Check a Fee configuration file and print the space budget of each group
//!
//! Usage: `fee-check [path]` (defaults to `fee.toml`)

use std::process::ExitCode;

use fee_core::config::FeeConfig;

fn report(config: &FeeConfig) {
    let layout = &config.layout;
    println!(
        "layout: {}-byte pages, record header {} bytes, cluster header {} bytes",
        layout.virtual_page_size,
        layout.block_record_len(),
        layout.cluster_record_len()
    );

    for (index, group) in config.groups.iter().enumerate() {
        let footprints = || {
            config
                .blocks_in_group(index as u8)
                .map(|b| config.block_footprint(b))
        };
        let smallest = group.clusters.iter().map(|c| c.length).min().unwrap_or(0);
        let used: u32 = footprints().sum();
        let overhead = layout.cluster_record_len() + layout.block_record_len();
        let spare = smallest.saturating_sub(overhead + used + group.reserved);
        let records = footprints().min().and_then(|f| spare.checked_div(f)).unwrap_or(0);

        println!(
            "group {index}: {} clusters, smallest {smallest:#x} bytes, live set {used} bytes, reserved {}",
            group.clusters.len(),
            group.reserved
        );
        println!("  {spare} spare bytes, at least {records} writes between compactions");
    }
}

fn main() -> ExitCode {
    let path = std::env::args().nth(1).unwrap_or_else(|| "fee.toml".into());
    match fee_config::load(&path) {
        Ok(config) => {
            println!("{path}: {} blocks, {} groups", config.blocks.len(), config.groups.len());
            report(&config);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{path}: {e}");
            ExitCode::FAILURE
        }
    }
}
