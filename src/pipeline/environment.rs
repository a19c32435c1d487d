//! Environment Normalizer: apply an [`EnvironmentRuleTable`].
//!
//! Bodies are normalised before the environment that owns them
//! (innermost-first), so an outer `unwrap` splices content that is already
//! final. Macro arguments and bare groups are searched too; math spans are
//! not.

use crate::latex::fragment::{coalesce_text, Argument, DocumentNode, Fragment, NormalizedDocument};
use crate::rules::{EnvironmentRuleTable, NormalizationRule};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvironmentStats {
    pub renamed: usize,
    pub unwrapped: usize,
}

/// Normalise the macro-stripped document into the final artefact.
pub fn normalize_environments(
    node: DocumentNode,
    table: &EnvironmentRuleTable,
) -> (NormalizedDocument, EnvironmentStats) {
    let mut stats = EnvironmentStats::default();
    let fragments = sequence(node.fragments, table, &mut stats);
    debug!(
        "Environment normalisation on '{}': {} renamed, {} unwrapped",
        node.path, stats.renamed, stats.unwrapped
    );
    (NormalizedDocument { fragments }, stats)
}

fn sequence(input: Vec<Fragment>, table: &EnvironmentRuleTable, stats: &mut EnvironmentStats) -> Vec<Fragment> {
    let mut out = Vec::with_capacity(input.len());
    for frag in input {
        match frag {
            Fragment::Environment(mut e) => {
                e.body = sequence(std::mem::take(&mut e.body), table, stats);
                match table.rule(&e.name) {
                    NormalizationRule::Rename { to, keep_args } => {
                        if e.name != *to || (!keep_args && !e.args.is_empty()) {
                            stats.renamed += 1;
                        }
                        e.name = to.clone();
                        if *keep_args {
                            arguments(&mut e.args, table, stats);
                        } else {
                            e.args.clear();
                        }
                        out.push(Fragment::Environment(e));
                    }
                    NormalizationRule::Unwrap => {
                        stats.unwrapped += 1;
                        out.extend(e.body);
                    }
                    NormalizationRule::Passthrough => {
                        arguments(&mut e.args, table, stats);
                        out.push(Fragment::Environment(e));
                    }
                }
            }
            Fragment::Macro(mut m) => {
                arguments(&mut m.args, table, stats);
                out.push(Fragment::Macro(m));
            }
            Fragment::Group { body } => out.push(Fragment::Group {
                body: sequence(body, table, stats),
            }),
            other => out.push(other),
        }
    }
    coalesce_text(&mut out);
    out
}

fn arguments(args: &mut [Argument], table: &EnvironmentRuleTable, stats: &mut EnvironmentStats) {
    for arg in args {
        if let Some(body) = arg.body_mut() {
            *body = sequence(std::mem::take(body), table, stats);
        }
    }
}
