//! Display model for vote counts.
//!
//! Live results are laid out against the session's option list, in option order. Final
//! results arrive without an option list and are laid out in the order the server sent
//! them, with synthetic ids starting at 1.

use std::collections::HashSet;

use serde::Serialize;
use shared::{
    domain::{OptionId, VotingOption},
    protocol::RawResultMap,
};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResult {
    pub option_id: OptionId,
    pub label: String,
    pub votes: u64,
    pub percentage: u8,
}

/// `votes / total` as a whole percentage, rounded half up. Zero when nobody has voted.
///
/// Each entry is rounded on its own, so a result set may sum to 99 or 101.
pub fn percentage(votes: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let votes = u128::from(votes.min(total));
    let total = u128::from(total);
    ((votes * 200 + total) / (total * 2)) as u8
}

pub fn aggregate(options: Option<&[VotingOption]>, raw: Option<&RawResultMap>) -> Vec<VoteResult> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    match options {
        Some(options) => live_results(options, raw),
        None => final_results(raw),
    }
}

fn live_results(options: &[VotingOption], raw: &RawResultMap) -> Vec<VoteResult> {
    let total = raw.total();
    let unmatched = unmatched_keys(options, raw);
    if !unmatched.is_empty() {
        warn!(
            unmatched = ?unmatched,
            "aggregate: live result keys match no session option; counted in total only"
        );
    }

    options
        .iter()
        .map(|option| {
            let votes = raw.get(&option.label).unwrap_or(0);
            VoteResult {
                option_id: option.id,
                label: option.label.clone(),
                votes,
                percentage: percentage(votes, total),
            }
        })
        .collect()
}

/// Result keys that are not exactly the label of any option, in server order. Their votes
/// reach no option.
pub fn unmatched_keys<'a>(options: &[VotingOption], raw: &'a RawResultMap) -> Vec<&'a str> {
    let labels: HashSet<&str> = options.iter().map(|option| option.label.as_str()).collect();
    raw.iter()
        .map(|(key, _)| key)
        .filter(|key| !labels.contains(key))
        .collect()
}

fn final_results(raw: &RawResultMap) -> Vec<VoteResult> {
    let total = raw.total();
    raw.iter()
        .enumerate()
        .map(|(index, (label, votes))| VoteResult {
            option_id: OptionId(index as i64 + 1),
            label: label.to_string(),
            votes,
            percentage: percentage(votes, total),
        })
        .collect()
}
