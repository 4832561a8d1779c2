//! Rendering of command results
//!
//! Every printable type implements [`Record`]; the same value can then be
//! shown as an aligned table, a key/value card, JSON or CSV.

use anyhow::Result;
use clap::ValueEnum;
use colored::{ColoredString, Colorize};
use ripam_cidr::Validation;
use ripam_core::{
    Address, AddressStatus, CustomerService, OverlapConflict, Router, RouterStatus, ServicePlan,
    ServiceStatus, Subnet, SubnetStatus, Utilization,
};
use ripam_ledger::{GenerationReport, Provisioned};
use serde::Serialize;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table output
    Human,
    /// JSON output (pretty-printed)
    Json,
    /// JSON output (compact)
    JsonCompact,
    /// CSV output
    Csv,
}

/// Highlight for a row in human output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Plain,
    Good,
    Busy,
    Held,
    Bad,
}

impl Tone {
    fn paint(self, text: &str) -> ColoredString {
        match self {
            Tone::Plain => text.normal(),
            Tone::Good => text.green(),
            Tone::Busy => text.yellow(),
            Tone::Held => text.blue(),
            Tone::Bad => text.red(),
        }
    }
}

pub trait Record: Serialize {
    const TITLE: &'static str;
    const HEADERS: &'static [&'static str];

    fn row(&self) -> Vec<String>;

    fn tone(&self) -> Tone {
        Tone::Plain
    }
}

/// Print a single record
pub fn one<T: Record>(item: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Human => print_card(item),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(item)?),
        OutputFormat::JsonCompact => println!("{}", serde_json::to_string(item)?),
        OutputFormat::Csv => print_csv(std::slice::from_ref(item))?,
    }
    Ok(())
}

/// Print a list of records
pub fn many<T: Record>(items: &[T], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Human => print_table(items),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(items)?),
        OutputFormat::JsonCompact => println!("{}", serde_json::to_string(items)?),
        OutputFormat::Csv => print_csv(items)?,
    }
    Ok(())
}

fn print_card<T: Record>(item: &T) {
    println!();
    println!("{}", T::TITLE.bold().cyan());
    println!("{}", "─".repeat(50).dimmed());
    let tone = item.tone();
    for (header, value) in T::HEADERS.iter().zip(item.row()) {
        if value.is_empty() {
            continue;
        }
        println!("{:>15}: {}", header.bold(), tone.paint(&value));
    }
    println!();
}

fn print_table<T: Record>(items: &[T]) {
    if items.is_empty() {
        println!("{}", format!("No {} found", T::TITLE.to_lowercase()).dimmed());
        return;
    }

    let rows: Vec<Vec<String>> = items.iter().map(Record::row).collect();
    let widths: Vec<usize> = T::HEADERS
        .iter()
        .enumerate()
        .map(|(col, header)| {
            rows.iter()
                .map(|row| row[col].chars().count())
                .chain(std::iter::once(header.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let header: Vec<String> = T::HEADERS
        .iter()
        .zip(&widths)
        .map(|(h, w)| format!("{:<w$}", h.to_uppercase(), w = w))
        .collect();
    println!("{}", header.join("  ").bold().cyan());

    for (item, row) in items.iter().zip(&rows) {
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!("{:<w$}", cell, w = w))
            .collect();
        println!("{}", item.tone().paint(line.join("  ").trim_end()));
    }
    println!("{}", format!("{} {}", items.len(), T::TITLE.to_lowercase()).dimmed());
}

fn print_csv<T: Record>(items: &[T]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(std::io::stdout());
    wtr.write_record(T::HEADERS)?;
    for item in items {
        wtr.write_record(item.row())?;
    }
    wtr.flush()?;
    Ok(())
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map_or(String::new(), |v| v.to_string())
}

impl Record for Subnet {
    const TITLE: &'static str = "Subnets";
    const HEADERS: &'static [&'static str] = &[
        "id", "cidr", "name", "router", "gateway", "vlan", "status", "used", "reserved",
        "available",
    ];

    fn row(&self) -> Vec<String> {
        vec![
            self.id.0.to_string(),
            self.cidr.to_string(),
            self.name.clone(),
            self.router_id.0.to_string(),
            opt(self.gateway),
            opt(self.vlan_id),
            format!("{:?}", self.status).to_lowercase(),
            self.used_count.to_string(),
            self.reserved_count.to_string(),
            self.available_count.to_string(),
        ]
    }

    fn tone(&self) -> Tone {
        match self.status {
            SubnetStatus::Active if self.is_partially_generated() => Tone::Bad,
            SubnetStatus::Active => Tone::Plain,
            SubnetStatus::Inactive => Tone::Held,
        }
    }
}

impl Record for Address {
    const TITLE: &'static str = "Addresses";
    const HEADERS: &'static [&'static str] = &[
        "address", "subnet", "status", "service", "assigned_at", "last_synced_at", "notes",
    ];

    fn row(&self) -> Vec<String> {
        vec![
            self.address.to_string(),
            self.subnet_id.0.to_string(),
            self.status.to_string(),
            opt(self.service_id.map(|s| s.0)),
            opt(self.assigned_at.map(|t| t.to_rfc3339())),
            opt(self.last_synced_at.map(|t| t.to_rfc3339())),
            self.notes.clone().unwrap_or_default(),
        ]
    }

    fn tone(&self) -> Tone {
        match self.status {
            AddressStatus::Available => Tone::Good,
            AddressStatus::Assigned => Tone::Busy,
            AddressStatus::Reserved => Tone::Held,
        }
    }
}

impl Record for Utilization {
    const TITLE: &'static str = "Utilization";
    const HEADERS: &'static [&'static str] =
        &["subnet", "total", "used", "reserved", "available", "percent"];

    fn row(&self) -> Vec<String> {
        vec![
            self.subnet_id.0.to_string(),
            self.total.to_string(),
            self.used.to_string(),
            self.reserved.to_string(),
            self.available.to_string(),
            format!("{:.1}%", self.percent),
        ]
    }

    fn tone(&self) -> Tone {
        match self.percent {
            p if p >= 90.0 => Tone::Bad,
            p if p >= 70.0 => Tone::Busy,
            _ => Tone::Good,
        }
    }
}

impl Record for OverlapConflict {
    const TITLE: &'static str = "Overlapping subnets";
    const HEADERS: &'static [&'static str] = &["id", "cidr", "name", "router", "relation"];

    fn row(&self) -> Vec<String> {
        vec![
            self.id.0.to_string(),
            self.cidr.to_string(),
            self.name.clone(),
            self.router_id.0.to_string(),
            format!("{:?}", self.relation).to_lowercase(),
        ]
    }

    fn tone(&self) -> Tone {
        Tone::Bad
    }
}

impl Record for Router {
    const TITLE: &'static str = "Routers";
    const HEADERS: &'static [&'static str] = &["id", "name", "status"];

    fn row(&self) -> Vec<String> {
        vec![
            self.id.0.to_string(),
            self.name.clone(),
            format!("{:?}", self.status).to_lowercase(),
        ]
    }

    fn tone(&self) -> Tone {
        match self.status {
            RouterStatus::Online => Tone::Good,
            RouterStatus::Offline => Tone::Bad,
        }
    }
}

impl Record for ServicePlan {
    const TITLE: &'static str = "Plans";
    const HEADERS: &'static [&'static str] = &["id", "name", "download_mbps", "upload_mbps"];

    fn row(&self) -> Vec<String> {
        vec![
            self.id.0.to_string(),
            self.name.clone(),
            opt(self.download_mbps),
            opt(self.upload_mbps),
        ]
    }
}

impl Record for CustomerService {
    const TITLE: &'static str = "Services";
    const HEADERS: &'static [&'static str] = &[
        "id", "customer", "plan", "router", "status", "mode", "ip_address",
    ];

    fn row(&self) -> Vec<String> {
        vec![
            self.id.0.to_string(),
            self.customer_id.0.to_string(),
            self.plan_id.0.to_string(),
            self.router_id.0.to_string(),
            format!("{:?}", self.status).to_lowercase(),
            format!("{:?}", self.allocation_mode).to_lowercase(),
            opt(self.ip_address),
        ]
    }

    fn tone(&self) -> Tone {
        match self.status {
            ServiceStatus::Active => Tone::Good,
            ServiceStatus::Pending => Tone::Busy,
            ServiceStatus::Suspended => Tone::Held,
            ServiceStatus::Terminated => Tone::Bad,
        }
    }
}

impl Record for Provisioned {
    const TITLE: &'static str = "Provisioned service";
    const HEADERS: &'static [&'static str] =
        &["service", "customer", "router", "address", "subnet", "sync"];

    fn row(&self) -> Vec<String> {
        vec![
            self.service.id.0.to_string(),
            self.service.customer_id.0.to_string(),
            self.service.router_id.0.to_string(),
            self.address.address.to_string(),
            self.address.subnet_id.0.to_string(),
            format!("{:?}", self.sync.status).to_lowercase(),
        ]
    }

    fn tone(&self) -> Tone {
        Tone::Good
    }
}

impl Record for GenerationReport {
    const TITLE: &'static str = "Address generation";
    const HEADERS: &'static [&'static str] = &["subnet", "cidr", "generated", "batches", "available"];

    fn row(&self) -> Vec<String> {
        vec![
            self.subnet.id.0.to_string(),
            self.subnet.cidr.to_string(),
            self.count.to_string(),
            self.batches.to_string(),
            self.subnet.available_count.to_string(),
        ]
    }

    fn tone(&self) -> Tone {
        Tone::Good
    }
}

impl Record for Validation {
    const TITLE: &'static str = "CIDR validation";
    const HEADERS: &'static [&'static str] = &["valid", "normalized", "error"];

    fn row(&self) -> Vec<String> {
        vec![
            self.is_valid.to_string(),
            self.normalized.clone().unwrap_or_default(),
            self.error.clone().unwrap_or_default(),
        ]
    }

    fn tone(&self) -> Tone {
        if self.is_valid {
            Tone::Good
        } else {
            Tone::Bad
        }
    }
}

/// One usable host of a block
#[derive(Debug, Serialize)]
pub struct Host {
    pub index: u64,
    pub address: Ipv4Addr,
}

impl Record for Host {
    const TITLE: &'static str = "Hosts";
    const HEADERS: &'static [&'static str] = &["index", "address"];

    fn row(&self) -> Vec<String> {
        vec![self.index.to_string(), self.address.to_string()]
    }
}
