//! Per-host worker fan-out.
//!
//! One OS thread per target, all joined before returning. A failing host
//! never cancels its siblings; failures come back in input order.

use std::sync::Arc;
use std::thread;

use crate::error::{Error, Result};

/// Run `task` once per IP concurrently and collect every failure.
pub fn collect_failures<F>(ips: &[String], task: F) -> Vec<(String, Error)>
where
    F: Fn(&str) -> Result<()> + Send + Sync + 'static,
{
    if ips.len() <= 1 {
        return ips
            .iter()
            .filter_map(|ip| task(ip).err().map(|err| (ip.clone(), err)))
            .collect();
    }

    let task = Arc::new(task);
    let handles: Vec<_> = ips
        .iter()
        .map(|ip| {
            let ip = ip.clone();
            let task = Arc::clone(&task);
            thread::spawn(move || task(&ip))
        })
        .collect();

    let mut failures = Vec::new();
    for (ip, handle) in ips.iter().zip(handles) {
        let outcome = handle.join().unwrap_or_else(|_| {
            Err(Error::internal_unexpected(format!(
                "Worker thread for {} panicked",
                ip
            )))
        });
        if let Err(err) = outcome {
            failures.push((ip.clone(), err));
        }
    }
    failures
}

/// Run `task` per IP and fold failures into one `node.batch_failed` error.
pub fn run_per_host<F>(operation: &str, ips: &[String], task: F) -> Result<()>
where
    F: Fn(&str) -> Result<()> + Send + Sync + 'static,
{
    let failures = collect_failures(ips, task);
    if failures.is_empty() {
        return Ok(());
    }

    for (ip, err) in &failures {
        log_status!("batch", "{} failed on {}: {}", operation, ip, err.message);
    }
    Err(Error::node_batch_failed(operation, ips.len(), failures))
}
