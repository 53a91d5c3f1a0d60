// ── Domain grouping ──

use indexmap::IndexMap;

use crate::config::{DomainMenu, GroupingThresholds};
use crate::model::entity_state::domain_of;

/// Decide whether a listing of `entity_ids` should be grouped by domain.
///
/// `Conditional` groups when there are at least `min_entities` entities
/// spread over at least `min_domains` domains.
pub fn should_group_by_domain<S: AsRef<str>>(
    entity_ids: &[S],
    setting: DomainMenu,
    thresholds: GroupingThresholds,
) -> bool {
    match setting {
        DomainMenu::Yes => true,
        DomainMenu::No => false,
        DomainMenu::Conditional => {
            if entity_ids.len() < thresholds.min_entities {
                return false;
            }
            let mut domains: Vec<&str> = entity_ids.iter().map(|id| domain_of(id.as_ref())).collect();
            domains.sort_unstable();
            domains.dedup();
            domains.len() >= thresholds.min_domains
        }
    }
}

/// Bucket ids by domain, domains in first-seen order.
pub fn group_by_domain<S: AsRef<str>>(entity_ids: &[S]) -> IndexMap<&str, Vec<&str>> {
    let mut groups: IndexMap<&str, Vec<&str>> = IndexMap::new();
    for id in entity_ids {
        let id = id.as_ref();
        groups.entry(domain_of(id)).or_default().push(id);
    }
    groups
}

/// True when `entity_id`'s domain is in `ignored`.
pub fn is_ignored<S: AsRef<str>>(entity_id: &str, ignored: &[S]) -> bool {
    let domain = domain_of(entity_id);
    ignored.iter().any(|d| d.as_ref() == domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n_lights: usize, n_switches: usize) -> Vec<String> {
        (0..n_lights)
            .map(|i| format!("light.l{i}"))
            .chain((0..n_switches).map(|i| format!("switch.s{i}")))
            .collect()
    }

    #[test]
    fn explicit_settings_win() {
        let none: [&str; 0] = [];
        assert!(should_group_by_domain(&none, DomainMenu::Yes, GroupingThresholds::default()));
        assert!(!should_group_by_domain(&ids(20, 20), DomainMenu::No, GroupingThresholds::default()));
    }

    #[test]
    fn conditional_needs_both_thresholds() {
        let t = GroupingThresholds::default();
        assert!(should_group_by_domain(&ids(5, 5), DomainMenu::Conditional, t));
        assert!(!should_group_by_domain(&ids(5, 4), DomainMenu::Conditional, t));
        assert!(!should_group_by_domain(&ids(12, 0), DomainMenu::Conditional, t));
    }

    #[test]
    fn groups_keep_first_seen_order() {
        let ids = ["switch.a", "light.b", "switch.c"];
        let groups = group_by_domain(&ids);
        let domains: Vec<&str> = groups.keys().copied().collect();
        assert_eq!(domains, ["switch", "light"]);
        assert_eq!(groups["switch"], ["switch.a", "switch.c"]);
    }

    #[test]
    fn ignore_matches_domain_only() {
        let ignored = ["tts", "zone"];
        assert!(is_ignored("zone.home", &ignored));
        assert!(!is_ignored("light.zone", &ignored));
    }
}
