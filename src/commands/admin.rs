use anyhow::{Context, Result};
use std::path::PathBuf;

use filebalancer::service::BalancerService;

use super::CLI_ACTOR;

/// Print the current plan as JSON
pub fn diagnostics(service: &BalancerService) -> Result<()> {
    let plan = service.diagnostics()?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

/// Run one manual cycle and print the report as JSON
pub async fn run_once(service: &BalancerService) -> Result<()> {
    let report = service.run_once().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub fn drain(service: &BalancerService, node: &str, reason: Option<&str>) -> Result<()> {
    let ack = service.drain(node, reason, CLI_ACTOR)?;
    println!("Node {} drained", ack.node);
    if let Some(reason) = &ack.reason {
        println!("  Reason: {reason}");
    }
    println!("  Files will move off the node on the next scheduling cycle.");
    Ok(())
}

pub fn undrain(service: &BalancerService, node: &str) -> Result<()> {
    let ack = service.undrain(node, CLI_ACTOR)?;
    println!("Node {} returned to service", ack.node);
    Ok(())
}

pub async fn ingest(service: &BalancerService, path: PathBuf, node: Option<&str>) -> Result<()> {
    let record = service
        .ingest(&path, node, CLI_ACTOR)
        .await
        .with_context(|| format!("Failed to ingest {}", path.display()))?;

    println!("Ingested {}", path.display());
    println!("  ID: {}", record.id);
    println!("  UUID: {}", record.uuid);
    println!("  Node: {}", record.node);
    println!("  Size: {} bytes", record.size_bytes);
    Ok(())
}

pub fn files(service: &BalancerService) -> Result<()> {
    let files = service.list_files()?;
    if files.is_empty() {
        println!("No files.");
        return Ok(());
    }

    println!("{:<6} {:<8} {:>10} {:<20} FILENAME", "ID", "NODE", "BYTES", "CREATED");
    for file in &files {
        println!(
            "{:<6} {:<8} {:>10} {:<20} {}",
            file.id,
            file.node,
            file.size_bytes,
            file.created_at.format("%Y-%m-%d %H:%M:%S"),
            file.filename
        );
    }
    println!();
    println!("{} file(s)", files.len());
    Ok(())
}

pub fn operations(service: &BalancerService, limit: Option<usize>) -> Result<()> {
    let ops = service.list_operations(limit)?;
    if ops.is_empty() {
        println!("No operations recorded.");
        return Ok(());
    }

    for op in &ops {
        println!(
            "#{:<5} {} {:<12} {:<8} {:<10} {}",
            op.id.unwrap_or_default(),
            op.timestamp.format("%Y-%m-%d %H:%M:%S"),
            op.action,
            op.status.as_str(),
            op.actor,
            op.nodes.join(" -> ")
        );
        if let Some(details) = &op.details {
            println!("       {details}");
        }
    }
    Ok(())
}
