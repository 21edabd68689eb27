//! Dietary profile derived from `Preference` entities.
//!
//! A preference entity contributes when it carries a `dietary` attribute:
//! `"restriction"` (something to avoid, e.g. `gluten`) or `"preference"`
//! (something to favour, e.g. `organic`). The tag is the `tag` attribute,
//! falling back to the normalized entity name.
//!
//! Cached profiles are tagged with the graph version they were derived
//! from and are recomputed whenever a newer graph is presented.

use crate::graph::EntityGraph;
use crate::types::{normalize_name, EntityKind};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Derived dietary view of a user.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DietaryProfile {
    /// Tags the user avoids
    pub restrictions: BTreeSet<String>,
    /// Tags the user favours
    pub preferences: BTreeSet<String>,
    /// Highest confidence per restricted tag
    pub restriction_confidence: BTreeMap<String, f64>,
    /// Highest confidence per favoured tag
    pub preference_confidence: BTreeMap<String, f64>,
}

impl DietaryProfile {
    /// Derive the profile from a graph.
    pub fn from_graph(graph: &EntityGraph) -> Self {
        let mut profile = Self::default();
        for (_, entity) in graph.entities_of(EntityKind::Preference) {
            let Some(kind) = entity.attr_str("dietary") else {
                continue;
            };
            let tag = entity
                .attr_str("tag")
                .map(normalize_name)
                .unwrap_or_else(|| normalize_name(&entity.name));
            let scores = match kind {
                "restriction" => {
                    profile.restrictions.insert(tag.clone());
                    &mut profile.restriction_confidence
                }
                "preference" => {
                    profile.preferences.insert(tag.clone());
                    &mut profile.preference_confidence
                }
                _ => continue,
            };
            let score = scores.entry(tag).or_insert(0.0);
            *score = score.max(entity.confidence);
        }
        profile
    }

    /// Confidence that the user avoids `tag` (0.0 when unknown).
    pub fn restriction_confidence(&self, tag: &str) -> f64 {
        self.restriction_confidence.get(tag).copied().unwrap_or(0.0)
    }

    /// Confidence that the user favours `tag` (0.0 when unknown).
    pub fn preference_confidence(&self, tag: &str) -> f64 {
        self.preference_confidence.get(tag).copied().unwrap_or(0.0)
    }

    /// Whether nothing is known.
    pub fn is_empty(&self) -> bool {
        self.restrictions.is_empty() && self.preferences.is_empty()
    }
}

struct CachedProfile {
    graph_version: u64,
    profile: Arc<DietaryProfile>,
}

/// Per-user profile cache keyed by graph version.
#[derive(Default)]
pub struct DietaryCache {
    profiles: DashMap<String, CachedProfile>,
}

impl DietaryCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached profile, if any, whatever its version.
    pub fn cached(&self, user_id: &str) -> Option<Arc<DietaryProfile>> {
        self.profiles.get(user_id).map(|c| Arc::clone(&c.profile))
    }

    /// Graph version the cached profile was derived from.
    pub fn cached_version(&self, user_id: &str) -> Option<u64> {
        self.profiles.get(user_id).map(|c| c.graph_version)
    }

    /// Profile for `graph`, reusing the cached one unless it was derived
    /// from an older version. A profile computed from an older graph never
    /// replaces a newer cached one.
    pub fn get_or_compute(&self, user_id: &str, graph: &EntityGraph) -> Arc<DietaryProfile> {
        let graph_version = graph.version();
        if let Some(hit) = self.profiles.get(user_id) {
            if hit.graph_version >= graph_version {
                return Arc::clone(&hit.profile);
            }
        }

        let profile = Arc::new(DietaryProfile::from_graph(graph));
        let mut entry = self
            .profiles
            .entry(user_id.to_string())
            .or_insert_with(|| CachedProfile {
                graph_version,
                profile: Arc::clone(&profile),
            });
        if entry.graph_version < graph_version {
            *entry = CachedProfile {
                graph_version,
                profile,
            };
        }
        Arc::clone(&entry.profile)
    }

    /// Drop the cached profile so the next read recomputes it.
    pub fn invalidate(&self, user_id: &str) -> bool {
        self.profiles.remove(user_id).is_some()
    }

    /// Whether a profile is cached.
    pub fn contains(&self, user_id: &str) -> bool {
        self.profiles.contains_key(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Entity;

    fn pref(name: &str, dietary: &str, confidence: f64) -> Entity {
        Entity::new(EntityKind::Preference, name)
            .with_attribute("dietary", dietary)
            .with_confidence(confidence)
    }

    #[test]
    fn test_profile_from_graph() {
        let mut graph = EntityGraph::new();
        graph.merge(
            &[
                pref("Gluten", "restriction", 0.9),
                pref("organic", "preference", 0.6),
                Entity::new(EntityKind::Preference, "Acme fan"),
                Entity::new(EntityKind::Product, "Bread"),
            ],
            &[],
        );
        let profile = DietaryProfile::from_graph(&graph);
        assert!(profile.restrictions.contains("gluten"));
        assert!(profile.preferences.contains("organic"));
        assert_eq!(profile.restriction_confidence("gluten"), 0.9);
        assert_eq!(profile.restriction_confidence("dairy"), 0.0);
        assert_eq!(profile.preference_confidence("organic"), 0.6);
        assert_eq!(profile.restriction_confidence.len(), 1);
        assert_eq!(profile.preference_confidence.len(), 1);
    }

    #[test]
    fn test_restriction_and_preference_on_same_tag_keep_own_confidence() {
        let mut graph = EntityGraph::new();
        graph.merge(
            &[
                pref("sugar free", "restriction", 0.95).with_attribute("tag", "sugar"),
                pref("likes sugar", "preference", 0.3).with_attribute("tag", "sugar"),
            ],
            &[],
        );
        let profile = DietaryProfile::from_graph(&graph);
        assert!(profile.restrictions.contains("sugar"));
        assert!(profile.preferences.contains("sugar"));
        assert_eq!(profile.restriction_confidence("sugar"), 0.95);
        assert_eq!(profile.preference_confidence("sugar"), 0.3);
    }

    #[test]
    fn test_tag_attribute_overrides_name() {
        let mut graph = EntityGraph::new();
        graph.merge(
            &[pref("no milk please", "restriction", 0.8).with_attribute("tag", "Dairy")],
            &[],
        );
        let profile = DietaryProfile::from_graph(&graph);
        assert!(profile.restrictions.contains("dairy"));
    }

    #[test]
    fn test_cache_invalidation() {
        let cache = DietaryCache::new();
        let graph = EntityGraph::new();
        assert!(cache.get_or_compute("u1", &graph).is_empty());
        assert!(cache.invalidate("u1"));
        assert!(!cache.contains("u1"));
        assert!(!cache.invalidate("u1"));
    }

    #[test]
    fn test_newer_graph_recomputes_cached_profile() {
        let cache = DietaryCache::new();
        let mut graph = EntityGraph::new();
        assert!(cache.get_or_compute("u1", &graph).is_empty());

        graph.merge(&[pref("gluten", "restriction", 0.9)], &[]);
        assert!(cache.get_or_compute("u1", &graph).restrictions.contains("gluten"));
        assert_eq!(cache.cached_version("u1"), Some(graph.version()));
    }

    #[test]
    fn test_older_graph_does_not_replace_newer_profile() {
        let cache = DietaryCache::new();
        let old = EntityGraph::new();
        let mut new = old.clone();
        new.merge(&[pref("gluten", "restriction", 0.9)], &[]);

        cache.get_or_compute("u1", &new);
        let profile = cache.get_or_compute("u1", &old);
        assert!(profile.restrictions.contains("gluten"));
        assert_eq!(cache.cached_version("u1"), Some(1));
    }
}
