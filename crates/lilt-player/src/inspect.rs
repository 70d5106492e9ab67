//! `inspect` subcommand: page table dump

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};

use lilt_core::analyze::{scan_pages, PageReport, StreamSummary};

pub fn inspect(path: &Path) -> Result<()> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let (pages, summary) = scan_pages(BufReader::new(file))
        .with_context(|| format!("Failed to scan {:?}", path))?;

    println!("{}", path.display());
    println!(
        "{:>5} {:>10} {:>6} {:>4} {:>6} {:>4} {:>10} {:>12} {:>9}  flags",
        "page", "offset", "size", "hdr", "body", "pkts", "serial", "granule", "time"
    );
    for page in &pages {
        println!("{}", format_row(page));
    }
    println!();
    print!("{}", format_summary(&summary));
    Ok(())
}

fn format_row(page: &PageReport) -> String {
    let time = page
        .time_ms
        .map(|ms| format!("{}.{:03}s", ms / 1000, ms % 1000))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:>5} {:>10} {:>6} {:>4} {:>6} {:>4} {:>10x} {:>12} {:>9}  {}",
        page.ordinal,
        page.offset,
        page.total_size,
        page.header_size,
        page.body_size,
        page.packets,
        page.serial,
        page.granule_position,
        time,
        flags(page)
    )
}

fn flags(page: &PageReport) -> String {
    let mut flags = Vec::new();
    if page.bos {
        flags.push("BOS");
    }
    if page.eos {
        flags.push("EOS");
    }
    if page.continued {
        flags.push("CONT");
    }
    flags.join(",")
}

fn format_summary(summary: &StreamSummary) -> String {
    let mut out = format!("pages: {}  packets: {}\n", summary.pages, summary.packets);
    if let Some(pre_skip) = summary.pre_skip {
        out.push_str(&format!("pre-skip: {} samples\n", pre_skip));
    } else {
        out.push_str("no OpusHead found\n");
    }
    if let Some(granule) = summary.last_granule {
        out.push_str(&format!("last granule: {}\n", granule));
    }
    if let Some(ms) = summary.duration_ms {
        out.push_str(&format!("duration: {}.{:03}s\n", ms / 1000, ms % 1000));
    }
    if summary.skipped_bytes > 0 {
        out.push_str(&format!("skipped bytes: {}\n", summary.skipped_bytes));
    }
    out
}
