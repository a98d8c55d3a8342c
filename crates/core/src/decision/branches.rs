use crate::domain::analyze::{BranchName, BranchOverride};
use crate::domain::decision::Branch;

fn default_branches() -> Vec<Branch> {
    vec![
        Branch {
            name: BranchName::Base,
            probability: 0.5,
            rationale: "Most likely trajectory.".to_string(),
        },
        Branch {
            name: BranchName::Bull,
            probability: 0.25,
            rationale: "Constructive upside scenario.".to_string(),
        },
        Branch {
            name: BranchName::Bear,
            probability: 0.25,
            rationale: "Downside stress scenario.".to_string(),
        },
    ]
}

/// Merges per-branch probability overrides into the fixed BASE/BULL/BEAR set
/// and renormalizes to sum 1. A merged sum of zero (every branch overridden
/// away) falls back to the defaults unchanged.
pub fn normalize_branch_probabilities(overrides: &[BranchOverride]) -> Vec<Branch> {
    let defaults = default_branches();
    if overrides.is_empty() {
        return defaults;
    }

    let mut merged = defaults.clone();
    for branch in &mut merged {
        if let Some(or) = overrides.iter().find(|o| o.name == branch.name) {
            branch.probability = or.probability;
        }
    }

    let total: f64 = merged.iter().map(|b| b.probability).sum();
    if total <= 0.0 {
        return defaults;
    }
    for branch in &mut merged {
        branch.probability /= total;
    }
    merged
}
