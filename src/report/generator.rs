//! Run report generation.
//!
//! Renders what a command read, wrote and measured as Markdown or JSON.

use crate::cli::OutputFormat;
use crate::models::{RunMetadata, RunReport, StepOutcome};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &RunReport) -> String {
    let mut output = String::new();

    output.push_str("# Pendular Run Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_table_of_contents(&report.steps));
    output.push_str(&generate_summary_section(&report.steps));

    for step in &report.steps {
        output.push_str(&generate_step_section(step));
    }

    output.push_str(&generate_footer(&report.metadata));
    output
}

fn generate_metadata_section(metadata: &RunMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Command:** `{}`\n", metadata.command));
    section.push_str(&format!(
        "- **Started:** {}\n",
        metadata.started.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Data directory:** `{}`\n", metadata.data_dir));
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

fn anchor(name: &str) -> String {
    name.replace(['/', '.', ' ', '_'], "-").to_lowercase()
}

fn generate_table_of_contents(steps: &[StepOutcome]) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");
    toc.push_str("- [Summary](#summary)\n");
    for step in steps {
        toc.push_str(&format!("  - [{}](#{})\n", step.name, anchor(&step.name)));
    }
    toc.push('\n');

    toc
}

fn generate_summary_section(steps: &[StepOutcome]) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    if steps.is_empty() {
        section.push_str("Nothing was processed.\n\n");
        return section;
    }

    section.push_str("| Step | Inputs | Outputs | Notes |\n");
    section.push_str("|:---|:---:|:---:|:---:|\n");
    for step in steps {
        section.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            step.name,
            step.inputs.len(),
            step.outputs.len(),
            step.notes.len()
        ));
    }
    section.push('\n');

    section
}

/// Format a metric: integers without decimals, small values with more.
fn format_metric(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else if value.abs() < 1.0 {
        format!("{:.6}", value)
    } else {
        format!("{:.2}", value)
    }
}

fn generate_step_section(step: &StepOutcome) -> String {
    let mut section = String::new();

    section.push_str(&format!("### {} {{#{}}}\n\n", step.name, anchor(&step.name)));

    if !step.inputs.is_empty() {
        section.push_str("**Inputs:**\n\n");
        for input in &step.inputs {
            section.push_str(&format!("- `{}`\n", input));
        }
        section.push('\n');
    }

    if !step.outputs.is_empty() {
        section.push_str("**Outputs:**\n\n");
        for output in &step.outputs {
            section.push_str(&format!("- `{}`\n", output));
        }
        section.push('\n');
    }

    if !step.metrics.is_empty() {
        section.push_str("| Metric | Value |\n");
        section.push_str("|:---|---:|\n");
        for (name, value) in &step.metrics {
            section.push_str(&format!("| {} | {} |\n", name, format_metric(*value)));
        }
        section.push('\n');
    }

    for note in &step.notes {
        section.push_str(&format!("> {}\n\n", note));
    }

    section.push_str("---\n\n");
    section
}

fn generate_footer(metadata: &RunMetadata) -> String {
    format!("*Report generated by pendular {}*\n", metadata.version)
}

/// Generate a JSON report.
pub fn generate_json_report(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write the report in the requested format.
pub fn write_report(report: &RunReport, path: &Path, format: OutputFormat) -> Result<()> {
    let content = match format {
        OutputFormat::Markdown => generate_markdown_report(report),
        OutputFormat::Json => generate_json_report(report)?,
    };

    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create report file {}", path.display()))?;
    file.write_all(content.as_bytes())?;

    Ok(())
}
