//! Terminal rendering for run results

use colored::Colorize;
use crucible_core::{AggregateStatus, ResultStatus, TestRun};

fn status_label(status: ResultStatus) -> String {
    match status {
        ResultStatus::Pass => "pass".green().to_string(),
        ResultStatus::Fail => "fail".red().to_string(),
        ResultStatus::Error => "error".red().bold().to_string(),
        ResultStatus::Skip => "skip".yellow().to_string(),
        ResultStatus::Omit => "omit".dimmed().to_string(),
        ResultStatus::Wait => "wait".cyan().to_string(),
        ResultStatus::Cancel => "cancel".dimmed().to_string(),
    }
}

pub fn print_run(run: &TestRun, aggregate: AggregateStatus) {
    println!("run {} ({:?})", run.id, run.status);
    if let Some(identifier) = run.wait_identifier() {
        println!("  waiting on external request '{identifier}'");
    }
    for result in &run.results {
        let label = status_label(result.status);
        match &result.message {
            Some(message) => println!("  {label:<16} {}  - {message}", result.test_id),
            None => println!("  {label:<16} {}", result.test_id),
        }
        for message in &result.messages {
            println!("      [{:?}] {}", message.level, message.content);
        }
    }
    let aggregate = match aggregate {
        AggregateStatus::Pass => "pass".green().to_string(),
        AggregateStatus::Fail => "fail".red().to_string(),
        AggregateStatus::Error => "error".red().bold().to_string(),
        AggregateStatus::Wait => "wait".cyan().to_string(),
        AggregateStatus::Skip => "skip".yellow().to_string(),
        AggregateStatus::Pending => "pending".dimmed().to_string(),
    };
    println!("aggregate: {aggregate}");
}
