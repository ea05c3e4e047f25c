use crate::config::ContextSettings;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

/// A known fact about the planning environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub value: Value,
    pub source: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Times this exact value has been reported
    pub count: u64,
    /// Value this one replaced, if any
    pub superseded: Option<Value>,
}

/// What [`PlanningContextDeduplicator::add_fact`] did with a fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactOutcome {
    New,
    /// The key existed with a different value, now superseded
    Updated,
    /// Exact repeat; only the counters moved
    Duplicate,
}

impl FactOutcome {
    /// Whether the context changed
    #[must_use]
    pub const fn is_new(self) -> bool {
        !matches!(self, Self::Duplicate)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupStats {
    pub facts: usize,
    pub total_additions: u64,
    pub duplicates: u64,
    pub updates: u64,
    pub evictions: u64,
}

#[derive(Debug, Default)]
struct ContextState {
    facts: HashMap<String, Fact>,
    stats: DedupStats,
}

/// Fact store that suppresses repeated facts before they reach a planner's
/// context, keeps the value a changed fact replaced, and forgets facts that
/// have not been reported for a while.
#[derive(Debug)]
pub struct PlanningContextDeduplicator {
    max_facts: usize,
    stale_after: Duration,
    state: Mutex<ContextState>,
}

impl PlanningContextDeduplicator {
    #[must_use]
    pub fn new(max_facts: usize, stale_after: Duration) -> Self {
        Self {
            max_facts: max_facts.max(1),
            stale_after,
            state: Mutex::new(ContextState::default()),
        }
    }

    #[must_use]
    pub fn from_settings(settings: &ContextSettings) -> Self {
        Self::new(settings.max_facts, settings.stale_after())
    }

    pub fn add_fact(&self, key: &str, value: Value, source: &str) -> FactOutcome {
        self.add_fact_at(key, value, source, Utc::now())
    }

    /// Add a fact observed at `at`
    pub fn add_fact_at(
        &self,
        key: &str,
        value: Value,
        source: &str,
        at: DateTime<Utc>,
    ) -> FactOutcome {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.stats.total_additions += 1;

        let outcome = match state.facts.get_mut(key) {
            Some(fact) if fact.value == value => {
                fact.count += 1;
                fact.last_seen = fact.last_seen.max(at);
                FactOutcome::Duplicate
            }
            Some(fact) => {
                debug!(key, source, "Fact changed");
                let previous = std::mem::replace(&mut fact.value, value);
                fact.superseded = Some(previous);
                fact.source = source.to_string();
                fact.first_seen = at;
                fact.last_seen = at;
                fact.count = 1;
                FactOutcome::Updated
            }
            None => {
                state.facts.insert(
                    key.to_string(),
                    Fact {
                        value,
                        source: source.to_string(),
                        first_seen: at,
                        last_seen: at,
                        count: 1,
                        superseded: None,
                    },
                );
                FactOutcome::New
            }
        };

        match outcome {
            FactOutcome::Duplicate => state.stats.duplicates += 1,
            FactOutcome::Updated => state.stats.updates += 1,
            FactOutcome::New => self.evict_overflow(state, key),
        }
        outcome
    }

    fn evict_overflow(&self, state: &mut ContextState, keep: &str) {
        while state.facts.len() > self.max_facts {
            let Some(oldest) = state
                .facts
                .iter()
                .filter(|(key, _)| key.as_str() != keep)
                .min_by_key(|(_, fact)| fact.last_seen)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            state.facts.remove(&oldest);
            state.stats.evictions += 1;
            debug!(key = %oldest, "Evicted least recently seen fact");
        }
    }

    fn stale_cutoff(&self) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(self.stale_after)
            .ok()
            .and_then(|window| Utc::now().checked_sub_signed(window))
    }

    /// Flat key to value view, without stale facts unless asked for
    pub fn get_context(&self, include_stale: bool) -> BTreeMap<String, Value> {
        let cutoff = if include_stale { None } else { self.stale_cutoff() };
        self.state
            .lock()
            .facts
            .iter()
            .filter(|(_, fact)| cutoff.map_or(true, |cutoff| fact.last_seen >= cutoff))
            .map(|(key, fact)| (key.clone(), fact.value.clone()))
            .collect()
    }

    /// Drop stale facts, returning how many were removed
    pub fn clean_stale(&self) -> usize {
        let Some(cutoff) = self.stale_cutoff() else {
            return 0;
        };
        let mut state = self.state.lock();
        let before = state.facts.len();
        state.facts.retain(|_, fact| fact.last_seen >= cutoff);
        let removed = before - state.facts.len();
        if removed > 0 {
            debug!(removed, "Removed stale facts");
        }
        removed
    }

    pub fn get_fact(&self, key: &str) -> Option<Fact> {
        self.state.lock().facts.get(key).cloned()
    }

    pub fn stats(&self) -> DedupStats {
        let state = self.state.lock();
        DedupStats {
            facts: state.facts.len(),
            ..state.stats
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().facts.is_empty()
    }
}

impl Default for PlanningContextDeduplicator {
    fn default() -> Self {
        Self::from_settings(&ContextSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dedup() -> PlanningContextDeduplicator {
        PlanningContextDeduplicator::new(10, Duration::from_secs(3600))
    }

    #[test]
    fn test_repeat_is_not_new() {
        let context = dedup();
        assert_eq!(
            context.add_fact("gpu", json!("rtx 4090"), "nvidia-smi"),
            FactOutcome::New
        );
        let repeat = context.add_fact("gpu", json!("rtx 4090"), "nvidia-smi");
        assert_eq!(repeat, FactOutcome::Duplicate);
        assert!(!repeat.is_new());
        assert_eq!(context.get_fact("gpu").unwrap().count, 2);
    }

    #[test]
    fn test_change_keeps_superseded_value() {
        let context = dedup();
        context.add_fact("ollama", json!({"status": "up"}), "probe");
        let outcome = context.add_fact("ollama", json!({"status": "down"}), "watchdog");
        assert!(outcome.is_new());
        assert_eq!(outcome, FactOutcome::Updated);

        let fact = context.get_fact("ollama").unwrap();
        assert_eq!(fact.value, json!({"status": "down"}));
        assert_eq!(fact.superseded, Some(json!({"status": "up"})));
        assert_eq!(fact.source, "watchdog");
    }

    #[test]
    fn test_stale_facts_hidden_and_cleaned() {
        let context = dedup();
        context.add_fact_at("old", json!(1), "boot", Utc::now() - chrono::Duration::hours(2));
        context.add_fact("fresh", json!(2), "probe");

        let visible = context.get_context(false);
        assert_eq!(visible.len(), 1);
        assert!(visible.contains_key("fresh"));
        assert_eq!(context.get_context(true).len(), 2);

        assert_eq!(context.clean_stale(), 1);
        assert_eq!(context.len(), 1);
    }

    #[test]
    fn test_evicts_least_recently_seen() {
        let context = PlanningContextDeduplicator::new(2, Duration::from_secs(3600));
        let now = Utc::now();
        context.add_fact_at("a", json!(1), "s", now - chrono::Duration::minutes(3));
        context.add_fact_at("b", json!(1), "s", now - chrono::Duration::minutes(2));
        // Seeing "a" again makes "b" the oldest
        context.add_fact_at("a", json!(1), "s", now - chrono::Duration::minutes(1));
        context.add_fact("c", json!(1), "s");

        assert!(context.get_fact("a").is_some());
        assert!(context.get_fact("b").is_none());
        assert!(context.get_fact("c").is_some());

        let stats = context.stats();
        assert_eq!(stats.facts, 2);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.total_additions, 4);
    }
}
