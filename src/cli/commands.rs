use crate::analyzer::Analyzer;
use crate::config::AnalyzerConfig;
use crate::core::formula_engine::optimize_formula;
use crate::error::SheetcheckResult;
use crate::repository::JsonDirRepository;
use crate::types::{AnalysisResult, Finding, Severity};
use colored::Colorize;
use std::path::PathBuf;

const SEVERITIES: [Severity; 4] = [
    Severity::Critical,
    Severity::High,
    Severity::Medium,
    Severity::Low,
];

/// Options for the analyze command
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    /// Print the result as JSON instead of the colored report
    pub json: bool,
    /// YAML config file
    pub config: Option<PathBuf>,
    /// Overrides the config file's streaming threshold
    pub streaming_threshold: Option<u64>,
    /// Overrides the config file's memory ceiling
    pub memory_ceiling: Option<u64>,
    /// Keep the result as JSON in this directory
    pub store: Option<PathBuf>,
}

/// Effective configuration: file (or defaults) with command-line overrides on top
pub fn resolve_config(options: &AnalyzeOptions) -> SheetcheckResult<AnalyzerConfig> {
    let mut config = match &options.config {
        Some(path) => AnalyzerConfig::load(path)?,
        None => AnalyzerConfig::default(),
    };
    if let Some(threshold) = options.streaming_threshold {
        config.streaming_threshold_bytes = threshold;
    }
    if let Some(ceiling) = options.memory_ceiling {
        config.memory_ceiling_bytes = ceiling;
    }
    config.validate()?;
    Ok(config)
}

/// Execute the analyze command. Returns whether the analysis completed.
pub fn analyze(file: PathBuf, options: AnalyzeOptions) -> SheetcheckResult<bool> {
    let config = resolve_config(&options)?;
    let bytes = std::fs::read(&file)?;
    let mut analyzer = Analyzer::new(config);

    let (result, stored_id) = match &options.store {
        Some(dir) => {
            let mut repository = JsonDirRepository::open(dir)?;
            let stored = analyzer.analyze_and_store(&bytes, &mut repository)?;
            (stored.result, Some(stored.id))
        }
        None => (analyzer.analyze(&bytes), None),
    };

    if options.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_report(&file, &result);
        if let Some(id) = stored_id {
            println!("   Stored as {}", id.bright_blue());
        }
    }

    Ok(result.success)
}

fn print_report(file: &std::path::Path, result: &AnalysisResult) {
    println!("{}", "🔍 Sheetcheck - Workbook analysis".bold().green());
    println!("   File: {}", file.display());
    println!(
        "   Method: {} | {:.1} ms | {} sheets, {} rows, {} cells",
        result.performance.method.to_string().cyan(),
        result.performance.elapsed_time,
        result.metadata.total_sheets,
        result.metadata.total_rows,
        result.metadata.total_cells
    );
    println!();

    if !result.success {
        println!("{}", "❌ Analysis failed: the workbook could not be read".bold().red());
        return;
    }

    if result.findings.is_empty() {
        println!("{}", "✅ No issues found".bold().green());
        return;
    }

    for severity in SEVERITIES {
        let group: Vec<&Finding> = result
            .findings
            .iter()
            .filter(|f| f.severity == severity)
            .collect();
        if group.is_empty() {
            continue;
        }
        println!("{}", severity_heading(severity, group.len()));
        for finding in group {
            print_finding(finding);
        }
        println!();
    }

    println!("{}", format!("📋 {}", result.summary.message).bold());
}

fn severity_heading(severity: Severity, count: usize) -> String {
    let heading = format!("{} ({count})", severity.to_string().to_uppercase());
    match severity {
        Severity::Critical => heading.bold().red().to_string(),
        Severity::High => heading.red().to_string(),
        Severity::Medium => heading.yellow().to_string(),
        Severity::Low => heading.bright_black().to_string(),
    }
}

fn print_finding(finding: &Finding) {
    let fixable = if finding.auto_fixable { " [fixable]" } else { "" };
    println!(
        "   {} {}{}",
        finding.location.to_string().bright_blue(),
        finding.description,
        fixable.green()
    );
    if let Some(value) = &finding.value {
        println!("      {}", value.dimmed());
    }
    println!("      → {}", finding.suggestion);
}

/// Execute the optimize command
pub fn optimize(formula: String, json: bool) -> SheetcheckResult<()> {
    let optimization = optimize_formula(&formula);

    if json {
        println!("{}", serde_json::to_string_pretty(&optimization)?);
        return Ok(());
    }

    println!("{}", "⚡ Sheetcheck - Formula optimizer".bold().green());
    println!("   Formula: {}", optimization.original);
    println!();

    if !optimization.has_suggestions() {
        println!("{}", "✅ Nothing to optimize".green());
        return Ok(());
    }

    if optimization.is_rewritten() {
        println!("   Optimized: {}", optimization.optimized.bold().green());
    }
    for advice in &optimization.advice {
        match &advice.replacement {
            Some(replacement) => println!("   • {} → {}", advice.message, replacement.cyan()),
            None => println!("   • {}", advice.message),
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "commands_tests.rs"]
mod tests;
