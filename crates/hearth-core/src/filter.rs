// ABOUTME: Decides whether an entity's changes are recorded, from include/exclude sets.
// ABOUTME: Pure and stateless; the precedence order below is relied on by existing configs.

use std::collections::HashSet;

/// Include/exclude sets for recording. Every set may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterConfig {
    pub include_domains: HashSet<String>,
    pub include_entities: HashSet<String>,
    pub exclude_domains: HashSet<String>,
    pub exclude_entities: HashSet<String>,
    /// Generic event types that are never recorded.
    pub exclude_event_types: HashSet<String>,
}

/// Recording filter built once from an immutable [`FilterConfig`].
///
/// Precedence, first match wins:
/// 1. entity in `include_entities` -> keep
/// 2. `include_domains` non-empty -> keep iff the domain is included and the
///    entity is not in `exclude_entities`
/// 3. `include_entities` is the only configured set -> drop
/// 4. otherwise drop if the entity or its domain is excluded, else keep
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    config: FilterConfig,
}

impl EntityFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// True when nothing would ever be dropped by entity rules.
    pub fn is_empty(&self) -> bool {
        let c = &self.config;
        c.include_domains.is_empty()
            && c.include_entities.is_empty()
            && c.exclude_domains.is_empty()
            && c.exclude_entities.is_empty()
    }

    /// Keep/drop decision for one entity id. The id is expected to be
    /// well-formed; anything before the first `.` is taken as the domain.
    pub fn should_keep(&self, entity_id: &str) -> bool {
        let c = &self.config;
        let domain = entity_id.split_once('.').map_or(entity_id, |(d, _)| d);

        if c.include_entities.contains(entity_id) {
            return true;
        }

        if !c.include_domains.is_empty() {
            return c.include_domains.contains(domain) && !c.exclude_entities.contains(entity_id);
        }

        if !c.include_entities.is_empty()
            && c.exclude_domains.is_empty()
            && c.exclude_entities.is_empty()
        {
            return false;
        }

        !(c.exclude_entities.contains(entity_id) || c.exclude_domains.contains(domain))
    }

    pub fn should_record_event_type(&self, event_type: &str) -> bool {
        !self.config.exclude_event_types.contains(event_type)
    }
}
