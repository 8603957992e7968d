use anyhow::Result;
use colored::Colorize;
use iam_audit_core::RunSummary;
use iam_audit_core::report::{DynamicGroupRow, PolicyRow};
use serde::Serialize;
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::cli::OutputFormat;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "!".yellow(), msg);
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_policy_rows(rows: &[PolicyRow], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(rows),
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("No policy statements found.");
                return Ok(());
            }
            let mut builder = Builder::default();
            builder.push_record(["Policy", "Compartment", "Hierarchy", "Statement"]);
            for row in rows {
                builder.push_record([
                    row.policy_name.as_str(),
                    row.compartment_name.as_str(),
                    row.hierarchy_path.as_str(),
                    row.statement.as_str(),
                ]);
            }
            let table = builder.build().with(Style::rounded()).to_string();
            println!("{table}");
            println!("Statements: {}", rows.len());
            Ok(())
        }
    }
}

pub fn print_dynamic_group_rows(rows: &[DynamicGroupRow], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(rows),
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("No dynamic groups found.");
                return Ok(());
            }
            let mut builder = Builder::default();
            builder.push_record(["Domain", "Name", "OCID", "Matching Rule"]);
            for row in rows {
                builder.push_record([
                    row.domain.as_str(),
                    row.name.as_str(),
                    row.ocid.as_str(),
                    row.rules.as_str(),
                ]);
            }
            let table = builder.build().with(Style::rounded()).to_string();
            println!("{table}");
            println!("Dynamic groups: {}", rows.len());
            Ok(())
        }
    }
}

/// Report what the run could not load. Written to stderr so JSON on stdout
/// stays parseable.
pub fn print_summary(summary: &RunSummary) {
    if summary.cache.hits > 0 || summary.cache.corrupt > 0 {
        eprintln!(
            "{}: {} hits, {} misses, {} corrupt",
            "Cache".cyan(),
            summary.cache.hits,
            summary.cache.misses,
            summary.cache.corrupt
        );
    }
    if summary.skipped_inactive > 0 {
        eprintln!(
            "{}: {} inactive compartments not descended into",
            "Skipped".cyan(),
            summary.skipped_inactive
        );
    }
    if summary.parse_warnings > 0 {
        print_warning(&format!(
            "{} entries could only be parsed partially (run with --verbose for details)",
            summary.parse_warnings
        ));
    }
    for orphan in &summary.orphaned {
        print_warning(&format!("Compartment {orphan} is not reachable from the root"));
    }
    for failure in &summary.failures {
        print_warning(&format!(
            "Could not load {} of {} ({}) after {} attempts: {}",
            failure.resource_kind,
            failure.compartment_name,
            failure.compartment_id,
            failure.attempts,
            failure.message
        ));
    }
    if !summary.is_complete() {
        print_warning("Results are incomplete");
    }
}
