//! Command-line surface (spec §6): a single executable invoked with
//! `--task=<name>` and auxiliary per-task flags, applied as the final
//! explicit overlay on top of [`super::Settings`].

use clap::{Parser, ValueEnum};

use crate::domain::report_synth::ReportFlow;

/// Task names accepted by `--task` (spec §6 task table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum TaskName {
    HighFreq,
    MediumFreq,
    LowFreq,
    FullCrawl,
    Scavenger,
    UserProfiling,
    PostInsights,
    UserAnalysis,
    IntelligenceReport,
    KolReport,
    FullAnalysis,
}

/// Output rendering for the final task result (spec §6 global flags).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Json,
    Text,
}

/// `--flow` values for `intelligence_report` (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum ReportFlowArg {
    Dual,
    Light,
    Deep,
    Intelligence,
}

impl From<ReportFlowArg> for ReportFlow {
    fn from(value: ReportFlowArg) -> Self {
        match value {
            ReportFlowArg::Dual => Self::Dual,
            ReportFlowArg::Light => Self::Light,
            ReportFlowArg::Deep => Self::Deep,
            ReportFlowArg::Intelligence => Self::Intelligence,
        }
    }
}

/// Parsed CLI invocation (spec §6).
#[derive(Debug, Clone, Parser)]
#[command(
    name = "intel-pipeline",
    about = "Adaptive fetch scheduling, LLM enrichment, and report synthesis"
)]
pub struct Cli {
    /// Which job to run.
    #[arg(long, value_enum)]
    pub task: TaskName,

    /// Result rendering: a JSON object or a short human-readable line.
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub output: OutputFormat,

    /// Run the explicit schema-bootstrap step before the task (spec §4.1:
    /// "never implicitly" on construction).
    #[arg(long, default_value_t = false)]
    pub recreate_db: bool,

    /// `high_freq`/`medium_freq`/`low_freq`/`full_crawl`/`scavenger`.
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// `high_freq`/`medium_freq`/`low_freq`: override the per-tier account
    /// selection cap.
    #[arg(long)]
    pub limit: Option<u32>,

    /// `full_crawl`/`post_insights`: accounts or posts per batch.
    #[arg(long)]
    pub batch_size: Option<u32>,

    /// `scavenger`/`post_insights`: lookback window in hours.
    #[arg(long)]
    pub hours_back: Option<i64>,

    /// `user_analysis`: cap on accounts considered for profiling.
    #[arg(long)]
    pub user_limit: Option<u32>,

    /// `user_analysis`/`kol_report`: lookback window in days.
    #[arg(long)]
    pub days: Option<i64>,

    /// `intelligence_report`: lookback window in hours.
    #[arg(long)]
    pub hours: Option<i64>,

    /// `intelligence_report`: candidate cap before packing.
    #[arg(long)]
    pub report_limit: Option<u32>,

    /// `intelligence_report`: which report variant(s) to synthesize.
    #[arg(long, value_enum)]
    pub flow: Option<ReportFlowArg>,

    /// `kol_report`: the account to report on.
    #[arg(long)]
    pub user_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn parses_minimal_invocation() {
        let cli = Cli::parse_from(["intel-pipeline", "--task", "high_freq"]);
        assert_eq!(cli.task, TaskName::HighFreq);
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(!cli.recreate_db);
    }

    #[rstest]
    fn parses_report_flow_and_overrides() {
        let cli = Cli::parse_from([
            "intel-pipeline",
            "--task",
            "intelligence_report",
            "--flow",
            "dual",
            "--hours",
            "12",
            "--output",
            "text",
        ]);
        assert_eq!(cli.task, TaskName::IntelligenceReport);
        assert_eq!(cli.flow, Some(ReportFlowArg::Dual));
        assert_eq!(cli.hours, Some(12));
        assert_eq!(cli.output, OutputFormat::Text);
    }
}
