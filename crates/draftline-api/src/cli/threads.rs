//! Thread inspection and administration commands.

use anyhow::{Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use dialoguer::Confirm;
use draftline_core::repository::{ListOptions, SortOrder};
use draftline_core::workflow::AssemblyReadiness;
use draftline_types::checkpoint::{Checkpoint, CheckpointSource};
use draftline_types::status::{ProcessingStatus, RunStatus};
use draftline_types::workflow::{Stage, WorkflowState};

use crate::state::AppState;

pub async fn list_threads(state: &AppState, json: bool) -> Result<()> {
    let threads = state.checkpoints.list_threads().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&threads)?);
        return Ok(());
    }

    if threads.is_empty() {
        println!();
        println!("  {} No workflow threads found.", style("i").blue().bold());
        println!();
        return Ok(());
    }

    let mut table = new_table();
    table.set_header(vec![
        Cell::new("Thread").fg(Color::White),
        Cell::new("Checkpoints").fg(Color::White),
        Cell::new("Latest").fg(Color::White),
        Cell::new("Last Active").fg(Color::White),
    ]);
    for thread in &threads {
        table.add_row(vec![
            Cell::new(thread.thread_id.as_str()).fg(Color::Cyan),
            Cell::new(thread.checkpoint_count),
            Cell::new(short_id(&thread.latest_checkpoint_id)),
            Cell::new(format_relative_time(&thread.latest_at)),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!("  {} thread(s)", threads.len());
    println!();
    Ok(())
}

pub async fn show_thread(state: &AppState, thread_id: &str, json: bool) -> Result<()> {
    let (checkpoint, workflow) = state.checkpoints.load_latest(thread_id).await?;

    if json {
        let out = serde_json::json!({
            "thread_id": checkpoint.thread_id,
            "checkpoint_id": checkpoint.checkpoint_id,
            "created_at": checkpoint.created_at,
            "metadata": checkpoint.metadata,
            "next": checkpoint.next,
            "tasks": checkpoint.tasks,
            "state": checkpoint.values,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {} ({})",
        style("▸").cyan().bold(),
        style(&workflow.document.title).bold(),
        checkpoint.thread_id
    );
    println!("  Run status:   {}", run_status_label(checkpoint.metadata.run_status));
    if let Some(step) = &checkpoint.metadata.step {
        println!("  Last step:    {step}");
    }
    if !checkpoint.next.is_empty() {
        println!("  Next:         {}", checkpoint.next.join(", "));
    }
    if let Some(point) = workflow.interrupt.point.as_deref().filter(|_| workflow.interrupt.is_interrupted) {
        println!("  Awaiting:     {}", style(point).yellow());
    }
    println!(
        "  Checkpoint:   {} ({})",
        short_id(&checkpoint.checkpoint_id),
        format_relative_time(&checkpoint.created_at)
    );
    println!();
    println!("{}", artifact_table(&workflow));

    if !workflow.errors.is_empty() {
        println!();
        println!("  {}", style("Recent errors").red().bold());
        for event in workflow.errors.iter().rev().take(5) {
            println!(
                "  {} [{}] {}: {}",
                style("✗").red(),
                event.category,
                event.step,
                event.user_message()
            );
        }
    }
    println!();
    Ok(())
}

pub async fn thread_history(state: &AppState, thread_id: &str, limit: Option<u32>, asc: bool, json: bool) -> Result<()> {
    let options = ListOptions {
        limit,
        order: if asc { SortOrder::Asc } else { SortOrder::Desc },
    };
    let checkpoints = state.checkpoints.list(thread_id, options).await?;
    if checkpoints.is_empty() {
        bail!("thread '{thread_id}' has no checkpoints");
    }

    if json {
        let rows: Vec<_> = checkpoints
            .iter()
            .map(|c| {
                serde_json::json!({
                    "checkpoint_id": c.checkpoint_id,
                    "parent_checkpoint_id": c.parent_checkpoint_id,
                    "created_at": c.created_at,
                    "metadata": c.metadata,
                    "next": c.next,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!();
    println!("{}", history_table(&checkpoints));
    println!();
    Ok(())
}

pub async fn thread_readiness(state: &AppState, thread_id: &str, json: bool) -> Result<()> {
    let (_, workflow) = state.checkpoints.load_latest(thread_id).await?;
    let readiness = AssemblyReadiness::check(&workflow);

    if json {
        println!("{}", serde_json::to_string_pretty(&readiness)?);
        return Ok(());
    }

    println!();
    if readiness.ready {
        println!("  {} '{}' is ready for final assembly.", style("✓").green().bold(), thread_id);
    } else if readiness.blocking.is_empty() {
        println!("  {} '{}' has no sections yet.", style("○").yellow().bold(), thread_id);
    } else {
        println!(
            "  {} '{}' is blocked by {} artifact(s):",
            style("✗").red().bold(),
            thread_id,
            readiness.blocking.len()
        );
        for blocking in &readiness.blocking {
            println!("    {} {}", blocking.artifact, status_label(blocking.status));
        }
    }
    println!();
    Ok(())
}

pub async fn delete_thread(state: &AppState, thread_id: &str, force: bool, json: bool) -> Result<()> {
    if state.checkpoints.get_latest(thread_id).await?.is_none() {
        bail!("thread '{thread_id}' not found");
    }

    if !force && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Permanently delete every checkpoint of '{}'?",
                style(thread_id).red().bold()
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    let removed = state.checkpoints.delete_thread(thread_id).await?;

    if json {
        println!(
            "{}",
            serde_json::json!({"deleted": true, "thread_id": thread_id, "checkpoints": removed})
        );
    } else {
        println!(
            "  {} Thread '{}' deleted ({} checkpoint(s)).",
            style("✓").red().bold(),
            thread_id,
            removed
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Stages that have started, then every section.
fn artifact_table(workflow: &WorkflowState) -> Table {
    let mut table = new_table();
    table.set_header(vec![
        Cell::new("Artifact").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Version").fg(Color::White),
        Cell::new("Score").fg(Color::White),
    ]);

    for stage in Stage::ALL {
        let record = workflow.stage(stage);
        if record.status == ProcessingStatus::NotStarted {
            continue;
        }
        table.add_row(vec![
            Cell::new(stage.as_str()),
            status_cell(record.status),
            Cell::new(record.version),
            Cell::new(format_score(record.evaluation.as_ref().map(|e| e.score))),
        ]);
    }
    for section in workflow.sections.iter() {
        table.add_row(vec![
            Cell::new(&section.id),
            status_cell(section.status),
            Cell::new(section.version),
            Cell::new(format_score(section.evaluation.as_ref().map(|e| e.score))),
        ]);
    }
    table
}

fn history_table(checkpoints: &[Checkpoint]) -> Table {
    let mut table = new_table();
    table.set_header(vec![
        Cell::new("Checkpoint").fg(Color::White),
        Cell::new("Source").fg(Color::White),
        Cell::new("Step").fg(Color::White),
        Cell::new("Run").fg(Color::White),
        Cell::new("Next").fg(Color::White),
        Cell::new("Created").fg(Color::White),
    ]);
    for checkpoint in checkpoints {
        table.add_row(vec![
            Cell::new(short_id(&checkpoint.checkpoint_id)),
            Cell::new(source_label(checkpoint.metadata.source)),
            Cell::new(checkpoint.metadata.step.as_deref().unwrap_or("-")),
            Cell::new(checkpoint.metadata.run_status.to_string()),
            Cell::new(if checkpoint.next.is_empty() {
                "-".to_string()
            } else {
                checkpoint.next.join(", ")
            }),
            Cell::new(checkpoint.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }
    table
}

fn status_cell(status: ProcessingStatus) -> Cell {
    let color = match status {
        ProcessingStatus::Approved => Color::Green,
        ProcessingStatus::AwaitingReview | ProcessingStatus::NeedsRevision => Color::Yellow,
        ProcessingStatus::Queued | ProcessingStatus::Running => Color::Cyan,
        ProcessingStatus::Error => Color::Red,
        ProcessingStatus::Stale => Color::Magenta,
        ProcessingStatus::NotStarted => Color::DarkGrey,
    };
    Cell::new(status.as_str()).fg(color)
}

fn status_label(status: ProcessingStatus) -> String {
    match status {
        ProcessingStatus::Stale => style(status.as_str()).magenta().to_string(),
        ProcessingStatus::Error => style(status.as_str()).red().to_string(),
        _ => style(status.as_str()).yellow().to_string(),
    }
}

fn run_status_label(status: RunStatus) -> String {
    let label = status.to_string();
    match status {
        RunStatus::Completed => style(label).green().to_string(),
        RunStatus::Interrupted => style(label).yellow().to_string(),
        RunStatus::Failed => style(label).red().to_string(),
        RunStatus::Cancelled => style(label).dim().to_string(),
        RunStatus::Running => style(label).cyan().to_string(),
    }
}

fn source_label(source: CheckpointSource) -> &'static str {
    match source {
        CheckpointSource::Input => "input",
        CheckpointSource::Step => "step",
        CheckpointSource::Resume => "resume",
        CheckpointSource::Update => "update",
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.simple().to_string().chars().take(12).collect()
}

fn format_score(score: Option<f64>) -> String {
    score.map_or_else(|| "-".to_string(), |s| format!("{s:.2}"))
}

fn format_relative_time(dt: &chrono::DateTime<chrono::Utc>) -> String {
    let diff = chrono::Utc::now() - *dt;

    if diff.num_minutes() < 1 {
        "just now".to_string()
    } else if diff.num_hours() < 1 {
        format!("{}m ago", diff.num_minutes())
    } else if diff.num_days() < 1 {
        format!("{}h ago", diff.num_hours())
    } else if diff.num_days() < 30 {
        format!("{}d ago", diff.num_days())
    } else {
        dt.format("%Y-%m-%d").to_string()
    }
}

#[cfg(test)]
mod tests {
    use draftline_core::workflow::CheckpointWrite;
    use draftline_types::checkpoint::CheckpointMetadata;
    use draftline_types::workflow::SectionRecord;

    use super::*;

    fn workflow() -> WorkflowState {
        let mut state = WorkflowState::new("proposal_42", "Grant", "proposal");
        state.research.status = ProcessingStatus::Approved;
        state.sections = state
            .sections
            .merge([
                SectionRecord::new("introduction", "Introduction").with_status(ProcessingStatus::Approved),
                SectionRecord::new("methods", "Methods").with_status(ProcessingStatus::Stale),
            ])
            .unwrap();
        state
    }

    #[test]
    fn test_artifact_table_skips_unstarted_stages() {
        let rendered = artifact_table(&workflow()).to_string();
        assert!(rendered.contains("research"));
        assert!(!rendered.contains("solution_analysis"));
        assert!(rendered.contains("methods"));
        assert!(rendered.contains("stale"));
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_score(None), "-");
        assert_eq!(format_score(Some(0.756)), "0.76");
        assert_eq!(format_relative_time(&chrono::Utc::now()), "just now");
        let two_hours = chrono::Utc::now() - chrono::Duration::hours(2);
        assert_eq!(format_relative_time(&two_hours), "2h ago");
        assert_eq!(short_id(&uuid::Uuid::now_v7()).len(), 12);
    }

    #[tokio::test]
    async fn test_commands_against_sqlite_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::init_in(dir.path().to_path_buf()).await.unwrap();

        let first = state
            .checkpoints
            .put(
                "proposal_42",
                &workflow(),
                CheckpointWrite {
                    metadata: CheckpointMetadata {
                        source: CheckpointSource::Step,
                        step: Some("write_section".into()),
                        step_count: 1,
                        run_status: RunStatus::Interrupted,
                    },
                    next: vec!["write_section".into()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(first.thread_id.as_str(), "proposal_42");

        list_threads(&state, true).await.unwrap();
        show_thread(&state, "proposal_42", false).await.unwrap();
        thread_history(&state, "proposal_42", Some(10), true, false).await.unwrap();
        thread_readiness(&state, "proposal_42", true).await.unwrap();

        assert!(show_thread(&state, "proposal_7", true).await.is_err());
        assert!(thread_history(&state, "proposal_7", None, false, true).await.is_err());
        assert!(delete_thread(&state, "proposal_7", true, true).await.is_err());

        delete_thread(&state, "proposal_42", true, true).await.unwrap();
        assert!(state.checkpoints.get_latest("proposal_42").await.unwrap().is_none());
    }
}
