//! Resolves free-text payroll names to roster employees through the persistent alias table.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use utoipa::ToSchema;

use super::normalizer::normalize_payroll_name;
use super::store::PayrollStore;
use crate::error::{PayrollError, PayrollResult};
use crate::model::payroll::{
    IdentityMappingUpsert, MappingStatus, PayrollIdentityMapping, RosterEmployee,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedIdentity {
    /// Name stored on input rows: the employee's roster name once matched.
    pub canonical_name: String,
    pub user_id: Option<u64>,
    pub status: MappingStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct MappingSummary {
    pub total: usize,
    pub auto_matched: usize,
    pub manual_matched: usize,
    pub ambiguous: usize,
    pub unresolved: usize,
}

impl MappingSummary {
    fn count(&mut self, status: MappingStatus) {
        self.total += 1;
        match status {
            MappingStatus::AutoMatched => self.auto_matched += 1,
            MappingStatus::ManualMatched => self.manual_matched += 1,
            MappingStatus::Ambiguous => self.ambiguous += 1,
            MappingStatus::Unresolved => self.unresolved += 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IdentityMatchOutcome {
    pub summary: MappingSummary,
    /// Keyed by normalized payroll name.
    pub resolved: HashMap<String, ResolvedIdentity>,
    pub upserts: Vec<IdentityMappingUpsert>,
}

impl IdentityMatchOutcome {
    pub fn resolve(&self, raw_name: &str) -> Option<&ResolvedIdentity> {
        self.resolved.get(&normalize_payroll_name(raw_name))
    }

    fn record(&mut self, key: String, display: &str, identity: ResolvedIdentity, notes: Option<String>) {
        self.summary.count(identity.status);
        self.upserts.push(IdentityMappingUpsert {
            normalized_payroll_name: key.clone(),
            display_payroll_name: display.to_string(),
            user_id: identity.user_id,
            status: identity.status,
            notes,
        });
        self.resolved.insert(key, identity);
    }
}

/// Distinct names by normalized key, first spelling wins, blank names dropped.
fn distinct_names<S: AsRef<str>>(names: &[S]) -> Vec<(String, String)> {
    let mut seen = BTreeSet::new();
    names
        .iter()
        .filter_map(|raw| {
            let key = normalize_payroll_name(raw.as_ref());
            if key.is_empty() || !seen.insert(key.clone()) {
                None
            } else {
                Some((key, raw.as_ref().trim().to_string()))
            }
        })
        .collect()
}

fn token_key(normalized: &str) -> String {
    let mut tokens: Vec<&str> = normalized.split(' ').collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Matches workbook names against existing aliases and the roster.
///
/// Aliases already matched (auto or manual) are reused as-is. Anything else is matched
/// against the roster: exact normalized name first, then the same words in any order.
/// One distinct candidate auto-matches; several stay ambiguous for a human to resolve.
pub fn match_payroll_names<S: AsRef<str>>(
    names: &[S],
    roster: &[RosterEmployee],
    aliases: &[PayrollIdentityMapping],
) -> IdentityMatchOutcome {
    let by_alias: HashMap<&str, &PayrollIdentityMapping> = aliases
        .iter()
        .map(|a| (a.normalized_payroll_name.as_str(), a))
        .collect();
    let by_id: HashMap<u64, &RosterEmployee> = roster.iter().map(|e| (e.id, e)).collect();

    let mut exact: HashMap<String, BTreeSet<u64>> = HashMap::new();
    let mut reordered: HashMap<String, BTreeSet<u64>> = HashMap::new();
    for employee in roster {
        let key = normalize_payroll_name(&employee.name);
        reordered.entry(token_key(&key)).or_default().insert(employee.id);
        exact.entry(key).or_default().insert(employee.id);
    }

    let mut outcome = IdentityMatchOutcome::default();

    for (key, display) in distinct_names(names) {
        if let Some(alias) = by_alias.get(key.as_str()) {
            if let (true, Some(user_id)) = (alias.status.is_matched(), alias.user_id) {
                let canonical_name = by_id
                    .get(&user_id)
                    .map(|e| e.name.clone())
                    .unwrap_or_else(|| alias.display_payroll_name.clone());
                let identity = ResolvedIdentity {
                    canonical_name,
                    user_id: Some(user_id),
                    status: alias.status,
                };
                let display = alias.display_payroll_name.clone();
                outcome.record(key, &display, identity, alias.notes.clone());
                continue;
            }
        }

        let candidates = exact
            .get(&key)
            .filter(|c| !c.is_empty())
            .or_else(|| reordered.get(&token_key(&key)))
            .cloned()
            .unwrap_or_default();

        let (identity, notes) = match candidates.len() {
            1 => {
                let user_id = *candidates.iter().next().unwrap_or(&0);
                let canonical_name = by_id
                    .get(&user_id)
                    .map(|e| e.name.clone())
                    .unwrap_or_else(|| display.clone());
                (
                    ResolvedIdentity {
                        canonical_name,
                        user_id: Some(user_id),
                        status: MappingStatus::AutoMatched,
                    },
                    None,
                )
            }
            0 => (
                ResolvedIdentity {
                    canonical_name: display.clone(),
                    user_id: None,
                    status: MappingStatus::Unresolved,
                },
                Some("no roster employee matches this name".to_string()),
            ),
            _ => {
                let ids: Vec<String> = candidates.iter().map(|id| id.to_string()).collect();
                (
                    ResolvedIdentity {
                        canonical_name: display.clone(),
                        user_id: None,
                        status: MappingStatus::Ambiguous,
                    },
                    Some(format!("candidate users: {}", ids.join(", "))),
                )
            }
        };

        outcome.record(key, &display, identity, notes);
    }

    outcome
}

#[derive(Debug, Clone, PartialEq)]
pub struct RosterAlias {
    pub payroll_name: String,
    pub employee: RosterEmployee,
}

/// Deterministic round-robin aliasing for demo workbooks.
///
/// Distinct names keep their first-seen order and the roster is ordered by (name, id);
/// name `i` maps to roster employee `i mod M`. An empty roster yields no aliases.
pub fn build_roster_alias_map<S: AsRef<str>>(
    names: &[S],
    roster: &[RosterEmployee],
) -> Vec<RosterAlias> {
    if roster.is_empty() {
        return Vec::new();
    }

    let mut sorted_roster = roster.to_vec();
    sorted_roster.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

    distinct_names(names)
        .into_iter()
        .enumerate()
        .map(|(i, (_, display))| RosterAlias {
            payroll_name: display,
            employee: sorted_roster[i % sorted_roster.len()].clone(),
        })
        .collect()
}

fn roster_alias_outcome(aliases: Vec<RosterAlias>) -> IdentityMatchOutcome {
    let mut outcome = IdentityMatchOutcome::default();
    for alias in aliases {
        let key = normalize_payroll_name(&alias.payroll_name);
        let identity = ResolvedIdentity {
            canonical_name: alias.employee.name.clone(),
            user_id: Some(alias.employee.id),
            status: MappingStatus::AutoMatched,
        };
        outcome.record(key, &alias.payroll_name, identity, Some("roster alias".to_string()));
    }
    outcome
}

/// Live matching: loads roster and aliases, matches, and writes the aliases back.
pub async fn resolve_identities<S: AsRef<str> + Sync>(
    store: &dyn PayrollStore,
    names: &[S],
) -> PayrollResult<IdentityMatchOutcome> {
    let roster = store.list_roster().await?;
    let aliases = store.list_identity_mappings().await?;
    let outcome = match_payroll_names(names, &roster, &aliases);

    store.upsert_identity_mappings(outcome.upserts.clone()).await?;

    tracing::info!(
        total = outcome.summary.total,
        auto_matched = outcome.summary.auto_matched,
        ambiguous = outcome.summary.ambiguous,
        unresolved = outcome.summary.unresolved,
        "Payroll identities resolved"
    );

    Ok(outcome)
}

/// Roster-alias mode: every name is pinned to a roster employee and persisted.
pub async fn apply_roster_aliases<S: AsRef<str> + Sync>(
    store: &dyn PayrollStore,
    names: &[S],
) -> PayrollResult<IdentityMatchOutcome> {
    let roster = store.list_roster().await?;
    let outcome = roster_alias_outcome(build_roster_alias_map(names, &roster));

    store.upsert_identity_mappings(outcome.upserts.clone()).await?;

    tracing::info!(
        names = outcome.summary.total,
        roster = roster.len(),
        "Roster aliases applied"
    );

    Ok(outcome)
}

/// Human arbitration of an ambiguous or unresolved name.
pub async fn resolve_identity_manually(
    store: &dyn PayrollStore,
    payroll_name: &str,
    user_id: u64,
    notes: Option<String>,
) -> PayrollResult<PayrollIdentityMapping> {
    let key = normalize_payroll_name(payroll_name);
    if key.is_empty() {
        return Err(PayrollError::validation("payroll_name must not be empty"));
    }

    let roster = store.list_roster().await?;
    if !roster.iter().any(|e| e.id == user_id) {
        return Err(PayrollError::validation(format!(
            "user {} is not an active employee",
            user_id
        )));
    }

    store
        .upsert_identity_mappings(vec![IdentityMappingUpsert {
            normalized_payroll_name: key.clone(),
            display_payroll_name: payroll_name.trim().to_string(),
            user_id: Some(user_id),
            status: MappingStatus::ManualMatched,
            notes,
        }])
        .await?;

    store
        .list_identity_mappings()
        .await?
        .into_iter()
        .find(|m| m.normalized_payroll_name == key)
        .ok_or_else(|| PayrollError::not_found(format!("identity mapping `{}`", payroll_name)))
}
