//! Plain-text and JSON renderings of command results.

use std::fmt::Write as _;

use cinesync_core::{
    SyncSummary,
    reporting::{CompletionBucket, ContentStatus, FailureBreakdown, ProlificPerson, TopRatedTitle},
};
use cinesync_model::ProcessingState;
use serde::Serialize;

pub fn json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn sync_summary(summary: &SyncSummary) -> String {
    let mut out = String::new();
    let status = &summary.status;
    let run = &summary.run;

    let _ = writeln!(out, "== {} ==", summary.content_type);
    match summary.listed {
        Some(listed) => {
            let _ = writeln!(
                out,
                "listed {listed}, seeded {} new ({} already tracked)",
                summary.seeded.inserted, summary.seeded.already_tracked
            );
        }
        None => {
            let _ = writeln!(out, "listing skipped");
        }
    }
    let _ = writeln!(
        out,
        "run: {} attempted, {} completed, {} not found, {} failed ({} terminal), {} throttled",
        run.attempted, run.completed, run.not_found, run.failed, run.terminal, run.throttled
    );
    let _ = writeln!(
        out,
        "state: {} completed / {} total ({:.1}%), {} pending, {} in progress, {} retryable, {} terminal",
        status.completed,
        status.total(),
        status.completion_rate() * 100.0,
        status.pending,
        status.in_progress,
        status.failed_retryable,
        status.failed_terminal,
    );
    if !summary.terminal_failures.is_empty() {
        let _ = writeln!(out, "terminal failures:");
        out.push_str(&failures(&summary.terminal_failures));
    }
    out
}

pub fn status(rows: &[ContentStatus]) -> String {
    let mut out = format!(
        "{:<10} {:>9} {:>11} {:>10} {:>9} {:>9} {:>9}\n",
        "type", "pending", "in_progress", "completed", "retryable", "terminal", "total"
    );
    for row in rows {
        let s = &row.summary;
        let _ = writeln!(
            out,
            "{:<10} {:>9} {:>11} {:>10} {:>9} {:>9} {:>9}",
            row.content_type.as_str(),
            s.pending,
            s.in_progress,
            s.completed,
            s.failed_retryable,
            s.failed_terminal,
            s.total()
        );
    }
    out
}

pub fn failures(rows: &[ProcessingState]) -> String {
    let mut out = String::new();
    for state in rows {
        let kind = state.error_kind.map(|k| k.as_str()).unwrap_or("unknown");
        let _ = writeln!(
            out,
            "  {}:{} [{kind}] retries={} {}",
            state.content_type,
            state.external_id,
            state.retry_count,
            state.error_message.as_deref().unwrap_or("")
        );
    }
    out
}

pub fn top_rated(rows: &[TopRatedTitle]) -> String {
    let mut out = String::new();
    for (rank, title) in rows.iter().enumerate() {
        let year = title
            .released
            .map(|d| d.format("%Y").to_string())
            .unwrap_or_else(|| "----".into());
        let _ = writeln!(
            out,
            "{:>3}. {} ({year}) {:.1} from {} votes",
            rank + 1,
            title.title,
            title.vote_average,
            title.vote_count
        );
    }
    out
}

pub fn prolific(rows: &[ProlificPerson]) -> String {
    let mut out = String::new();
    for (rank, person) in rows.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>3}. {} [{}] {} titles ({} movies, {} series)",
            rank + 1,
            person.name,
            person.known_for_department.as_deref().unwrap_or("-"),
            person.total_credits,
            person.movie_credits,
            person.series_credits
        );
    }
    out
}

pub fn timeline(rows: &[CompletionBucket]) -> String {
    let mut out = String::new();
    for bucket in rows {
        let _ = writeln!(
            out,
            "{} {:<10} {:>7}",
            bucket.hour.format("%Y-%m-%d %H:00"),
            bucket.content_type,
            bucket.completed
        );
    }
    out
}

pub fn breakdown(rows: &[FailureBreakdown]) -> String {
    let mut out = String::new();
    for row in rows {
        let _ = writeln!(
            out,
            "{:<10} {:<12} {:<9} {:>7}",
            row.content_type,
            row.error_kind.as_deref().unwrap_or("unknown"),
            if row.terminal { "terminal" } else { "retryable" },
            row.items
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinesync_core::state::StatusSummary;
    use cinesync_model::{ContentType, FailureKind, ProcessingStatus};

    fn failed_state(id: i64) -> ProcessingState {
        ProcessingState {
            content_type: ContentType::Movie,
            external_id: id,
            status: ProcessingStatus::Failed,
            retry_count: 3,
            error_kind: Some(FailureKind::NotFound),
            error_message: Some("catalog reports id as not found".into()),
            last_attempt_at: None,
            completed_at: None,
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn status_table_lists_every_row() {
        let rows = vec![
            ContentStatus {
                content_type: ContentType::Movie,
                summary: StatusSummary {
                    pending: 2,
                    completed: 8,
                    ..StatusSummary::default()
                },
            },
            ContentStatus {
                content_type: ContentType::Person,
                summary: StatusSummary::default(),
            },
        ];
        let table = status(&rows);
        assert_eq!(table.lines().count(), 3);
        assert!(table.contains("movie"));
        assert!(table.lines().nth(1).unwrap().trim_end().ends_with("10"));
    }

    #[test]
    fn failures_show_kind_and_message() {
        let rendered = failures(&[failed_state(404)]);
        assert!(rendered.contains("movie:404"));
        assert!(rendered.contains("[not_found]"));
        assert!(rendered.contains("not found"));
    }
}
