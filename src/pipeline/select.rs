//! Top-N story selection.
//!
//! The model picks stories from a numbered digest; its picks are matched back
//! to candidates by title. Slots it leaves open, or all of them when the call
//! or the parse fails, are filled by source weight and recency.

use crate::api::{CallKind, Complete, ParseError, parse_structured};
use crate::models::{SelectedEntry, SelectionNote, UniqueEntry};
use itertools::Itertools;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt::Write;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_TOP_N: usize = 10;

const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
struct SelectionReply {
    selected_news: Vec<Pick>,
}

/// One story the model chose.
#[derive(Debug, Clone, Deserialize)]
pub struct Pick {
    #[serde(default)]
    pub title: String,
    pub source: Option<String>,
    pub region: Option<String>,
    /// A number or a numeric string, depending on the model.
    pub importance: Option<serde_json::Value>,
    pub reason: Option<String>,
}

impl Pick {
    pub fn importance(&self) -> Option<f64> {
        match self.importance.as_ref()? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn note(&self) -> SelectionNote {
        SelectionNote {
            importance: self.importance(),
            reason: self
                .reason
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
        }
    }
}

/// Numbered digest of the candidates, one block per story.
pub fn build_digest(candidates: &[UniqueEntry]) -> String {
    let mut digest = String::new();
    for (i, entry) in candidates.iter().enumerate() {
        let _ = writeln!(
            digest,
            "{}. [{} | {}] {}\n   {}",
            i + 1,
            entry.source().name,
            entry.source().region,
            entry.display_title(),
            entry.preview(PREVIEW_CHARS).replace('\n', " "),
        );
    }
    digest
}

fn selection_prompt(candidates: &[UniqueEntry], top_n: usize) -> String {
    format!(
        "You are a senior cyber-security analyst preparing a daily brief.\n\
         From the {count} stories below, choose the {top_n} most important ones. \
         Prefer major vulnerabilities, large incidents, significant threat \
         intelligence, policy changes and industry-wide trends. Avoid choosing \
         two stories about the same event.\n\n\
         {digest}\n\
         Reply with JSON only, in this shape:\n\
         {{\"selected_news\": [{{\"title\": \"exact story title\", \"source\": \"source name\", \
         \"region\": \"region\", \"importance\": 9, \"reason\": \"why it matters\"}}]}}",
        count = candidates.len(),
        digest = build_digest(candidates),
    )
}

/// Read the `selected_news` list out of a model reply.
pub fn parse_selection(reply: &str) -> Result<Vec<Pick>, ParseError> {
    let parsed: SelectionReply = parse_structured(reply)?;
    Ok(parsed.selected_news)
}

fn titles_match(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && (a.contains(b) || b.contains(a))
}

/// Map picks to candidate indices in reply order.
///
/// Each pick goes to the first candidate whose title contains it or is
/// contained by it; a pick whose candidate is already taken is dropped.
pub fn match_picks(
    picks: &[Pick],
    candidates: &[UniqueEntry],
    top_n: usize,
) -> Vec<(usize, SelectionNote)> {
    let mut taken = HashSet::new();
    let mut matched = Vec::new();
    for pick in picks {
        if matched.len() >= top_n {
            break;
        }
        let title = pick.title.trim();
        let Some(index) = candidates
            .iter()
            .position(|c| titles_match(c.display_title(), title))
        else {
            debug!(title, "Pick matches no candidate");
            continue;
        };
        if taken.insert(index) {
            debug!(title, reason = ?pick.reason, "Model pick");
            matched.push((index, pick.note()));
        }
    }
    matched
}

/// Candidate indices outside `exclude`, by weight then publish time, both
/// descending. Ties keep input order.
pub fn fallback_order(candidates: &[UniqueEntry], exclude: &HashSet<usize>) -> Vec<usize> {
    candidates
        .iter()
        .enumerate()
        .filter(|(i, _)| !exclude.contains(i))
        .sorted_by(|(_, a), (_, b)| {
            b.weight()
                .total_cmp(&a.weight())
                .then_with(|| b.published().cmp(&a.published()))
        })
        .map(|(i, _)| i)
        .collect()
}

/// Model picks first, then the fallback order, cut to `top_n`.
pub fn assemble(
    candidates: Vec<UniqueEntry>,
    matched: Vec<(usize, SelectionNote)>,
    top_n: usize,
) -> Vec<SelectedEntry> {
    let exclude: HashSet<usize> = matched.iter().map(|(i, _)| *i).collect();
    let fill = fallback_order(&candidates, &exclude);
    let mut slots: Vec<Option<UniqueEntry>> = candidates.into_iter().map(Some).collect();

    let order = matched
        .into_iter()
        .map(|(i, note)| (i, Some(note)))
        .chain(fill.into_iter().map(|i| (i, None)));
    let mut selected = Vec::with_capacity(top_n);
    for (i, note) in order {
        if selected.len() >= top_n {
            break;
        }
        if let Some(entry) = slots.get_mut(i).and_then(Option::take) {
            selected.push(SelectedEntry::new(entry, note));
        }
    }
    selected
}

/// Choose `min(top_n, candidates.len())` stories.
#[instrument(level = "info", skip_all, fields(candidates = candidates.len(), top_n))]
pub async fn select_top<L: Complete>(
    llm: &L,
    candidates: Vec<UniqueEntry>,
    top_n: usize,
) -> Vec<SelectedEntry> {
    if candidates.len() <= top_n {
        info!("Candidate set fits, keeping all");
        return candidates
            .into_iter()
            .map(|c| SelectedEntry::new(c, None))
            .collect();
    }

    let prompt = selection_prompt(&candidates, top_n);
    let picks = match llm.complete(CallKind::Selection, &prompt).await {
        Ok(reply) => parse_selection(&reply).unwrap_or_else(|e| {
            warn!(error = %e, "Unreadable selection reply, ranking by weight and date");
            Vec::new()
        }),
        Err(e) => {
            warn!(error = %e, "Selection call failed, ranking by weight and date");
            Vec::new()
        }
    };

    let matched = match_picks(&picks, &candidates, top_n);
    info!(
        model_picks = matched.len(),
        filled = top_n - matched.len(),
        "Selection assembled"
    );
    assemble(candidates, matched, top_n)
}
