//! Free-text overview of the day's selection.

use crate::api::{CallKind, Complete};
use crate::models::SelectedEntry;
use std::fmt::Write;
use tracing::{info, instrument, warn};

const EXCERPT_CHARS: usize = 300;

fn summary_prompt(selected: &[SelectedEntry]) -> String {
    let mut digest = String::new();
    for (i, entry) in selected.iter().enumerate() {
        let _ = writeln!(
            digest,
            "{}. [{} - {}] {}\n   {}",
            i + 1,
            entry.source().name,
            entry.source().region,
            entry.display_title(),
            entry.preview(EXCERPT_CHARS).replace('\n', " "),
        );
    }
    format!(
        "You are a cyber-security analyst. Based on the stories below, write an \
         overview of today's global security situation in at most 250 words. \
         Cover the most significant threats, notable incidents, regional \
         differences and what defenders should do next. Plain prose, no lists.\n\n\
         {digest}"
    )
}

/// Ask the model for a situation overview. Any failure yields `None`.
#[instrument(level = "info", skip_all, fields(selected = selected.len()))]
pub async fn situation_summary<L: Complete>(llm: &L, selected: &[SelectedEntry]) -> Option<String> {
    if selected.is_empty() {
        return None;
    }
    match llm
        .complete(CallKind::Summary, &summary_prompt(selected))
        .await
    {
        Ok(text) => {
            let text = text.trim();
            if text.is_empty() {
                warn!("Empty situation summary");
                return None;
            }
            info!(chars = text.chars().count(), "Situation summary ready");
            Some(text.to_string())
        }
        Err(e) => {
            warn!(error = %e, "Situation summary unavailable");
            None
        }
    }
}
