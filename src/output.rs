use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    DownloadResult, InventoryResult, ProgressEvent, ProgressSink, RunResult, SearchResult,
};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_inventory(result: &InventoryResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_search(result: &SearchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_download(result: &DownloadResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_run(result: &RunResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Human readable output: progress on stderr, summaries on stdout.
pub struct TextOutput;

impl TextOutput {
    pub fn print_inventory(result: &InventoryResult) {
        println!(
            "{} inventory ({}) of {}",
            result.layout, result.source, result.root
        );
        for level in &result.levels {
            println!("  {:<16} {}", level.level.as_str(), level.count);
        }
        println!("  files            {}", result.files);
        if let Some(path) = &result.snapshot_path {
            println!("  snapshot: {path}");
        }
    }

    pub fn print_search(result: &SearchResult) {
        println!(
            "search ({}): {} files matched, {} listings, {} branches pruned",
            result.mode,
            result.files.len(),
            result.listings,
            result.pruned
        );
        if let Some(path) = &result.log_path {
            println!("  log: {path}");
        }
    }

    pub fn print_download(result: &DownloadResult) {
        println!(
            "download into {}: {} downloaded, {} skipped, {} planned, {} failed",
            result.root, result.downloaded, result.skipped, result.planned, result.failed
        );
        for item in &result.report.items {
            if let Some(error) = &item.error {
                println!("  failed {}: {error}", item.remote);
            }
        }
    }

    pub fn print_run(result: &RunResult) {
        Self::print_inventory(&result.inventory);
        if let Some(search) = &result.search {
            Self::print_search(search);
        }
        if let Some(download) = &result.download {
            Self::print_download(download);
        }
    }
}

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => eprintln!("{}", event.message),
        }
    }
}
