//! Console rendering of operation state.

use colored::Colorize;
use xe_plugin_core::{OperationState, OperationStatus, Report};

/// Format a status for display with color
pub fn format_status(status: OperationStatus) -> String {
    match status {
        OperationStatus::Pending => "pending".normal().to_string(),
        OperationStatus::Running => "running".blue().to_string(),
        OperationStatus::Succeeded => "succeeded".green().to_string(),
        OperationStatus::Failed => "failed".red().to_string(),
    }
}

pub fn print_report(report: &Report) {
    for section in &report.sections {
        if section.kind.is_failure() {
            println!("{}", section.heading().red());
        } else {
            println!("{}", section.heading().yellow());
        }
        for entry in &section.entries {
            println!("{}", entry);
        }
    }
}

pub fn print_outcome(report: &Report) {
    if report.is_empty() && report.status == OperationStatus::Succeeded {
        println!("Nothing changed.");
    }
    print_report(report);
    if let Some(reason) = &report.reason {
        println!("{} {}", "Reason:".red(), reason);
    }
    if let Some(log) = &report.log {
        println!("Log: {}", log.display());
    }
}

pub fn print_status(state: &OperationState, report: &Report) {
    let mut status = format_status(state.status);
    if state.is_expired(chrono::Utc::now()) {
        status.push_str(&format!(" {}", "(expired)".yellow()));
    }
    println!("Status: {}", status);
    if let Some(id) = state.id {
        println!("Operation: {}", id);
    }
    if let Some(started_at) = state.started_at {
        println!("Started: {}", started_at.to_rfc3339());
    }
    if let Some(finished_at) = state.finished_at {
        println!("Finished: {}", finished_at.to_rfc3339());
    }
    print_outcome(report);
}
