use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

/// Drift detection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Decisions kept in the log, oldest evicted first
    pub window_size: usize,
    /// Most recent decisions per key compared for contradictions
    pub contradiction_window: usize,
    /// Reversals per key that count as flip-flopping
    pub oscillation_threshold: usize,
    /// Identical decisions per key tolerated before flagging redundancy
    pub redundancy_threshold: usize,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            contradiction_window: 5,
            oscillation_threshold: 3,
            redundancy_threshold: 2,
        }
    }
}

/// One recorded decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEntry {
    pub key: String,
    pub params: Value,
    pub rationale: String,
    pub timestamp: DateTime<Utc>,
    pub hash: String,
}

/// Advisory finding for one decision key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriftFinding {
    /// The same decision was made more often than needed
    Redundancy { hash: String, occurrences: usize },
    /// Recent decisions for the key disagree
    Contradiction { distinct_values: usize, window: usize },
    /// The key keeps flipping back to a previous value
    Oscillation { reversals: usize },
}

/// Result of [`DriftMitigator::check_drift`]; only keys with findings appear
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub findings: BTreeMap<String, Vec<DriftFinding>>,
    pub entries_checked: usize,
    pub checked_at: DateTime<Utc>,
}

impl DriftReport {
    #[must_use]
    pub fn has_findings(&self) -> bool {
        !self.findings.is_empty()
    }

    #[must_use]
    pub fn findings_for(&self, key: &str) -> &[DriftFinding] {
        self.findings.get(key).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Rebuild `value` with every object's keys in sorted order
#[must_use]
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let sorted: Map<String, Value> = keys
                .into_iter()
                .map(|k| (k.clone(), canonicalize(&map[k])))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Compact JSON with sorted object keys at every depth
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

/// SHA-256 (hex) over the canonical JSON of `{"key": key, "params": params}`.
/// Insertion order of nested object fields does not change the result.
#[must_use]
pub fn stable_hash(key: &str, params: &Value) -> String {
    let mut envelope = Map::new();
    envelope.insert("key".to_string(), Value::String(key.to_string()));
    envelope.insert("params".to_string(), params.clone());

    let mut hasher = Sha256::new();
    hasher.update(canonical_json(&Value::Object(envelope)).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Bounded decision log that flags redundant, contradictory and
/// oscillating decisions per key.
#[derive(Debug, Default)]
pub struct DriftMitigator {
    config: DriftConfig,
    log: Mutex<VecDeque<DecisionEntry>>,
}

impl DriftMitigator {
    #[must_use]
    pub fn new(config: DriftConfig) -> Self {
        Self {
            config,
            log: Mutex::new(VecDeque::new()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &DriftConfig {
        &self.config
    }

    /// Append a decision and return its stable hash
    pub fn record_decision(&self, key: &str, params: Value, rationale: &str) -> String {
        let hash = stable_hash(key, &params);
        let entry = DecisionEntry {
            key: key.to_string(),
            params,
            rationale: rationale.to_string(),
            timestamp: Utc::now(),
            hash: hash.clone(),
        };

        let mut log = self.log.lock();
        log.push_back(entry);
        while log.len() > self.config.window_size.max(1) {
            log.pop_front();
        }
        debug!(key, hash = %&hash[..12], "Recorded decision");
        hash
    }

    /// Analyse the log per key
    pub fn check_drift(&self) -> DriftReport {
        let log = self.log.lock();

        let mut by_key: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for entry in log.iter() {
            by_key.entry(&entry.key).or_default().push(&entry.hash);
        }

        let mut findings = BTreeMap::new();
        for (key, hashes) in by_key {
            let key_findings = self.analyse(&hashes);
            if !key_findings.is_empty() {
                warn!(key, findings = ?key_findings, "Decision drift detected");
                findings.insert(key.to_string(), key_findings);
            }
        }

        DriftReport {
            findings,
            entries_checked: log.len(),
            checked_at: Utc::now(),
        }
    }

    fn analyse(&self, hashes: &[&str]) -> Vec<DriftFinding> {
        let mut findings = Vec::new();

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for hash in hashes {
            *counts.entry(hash).or_default() += 1;
        }
        for (hash, occurrences) in counts {
            if occurrences > self.config.redundancy_threshold {
                findings.push(DriftFinding::Redundancy {
                    hash: hash.to_string(),
                    occurrences,
                });
            }
        }

        let window = self.config.contradiction_window;
        let recent = &hashes[hashes.len().saturating_sub(window)..];
        let distinct_values = recent.iter().collect::<HashSet<_>>().len();
        if distinct_values > 1 {
            findings.push(DriftFinding::Contradiction {
                distinct_values,
                window,
            });
        }

        let reversals = hashes
            .windows(3)
            .filter(|w| w[2] == w[0] && w[2] != w[1])
            .count();
        if reversals >= self.config.oscillation_threshold {
            findings.push(DriftFinding::Oscillation { reversals });
        }

        findings
    }

    /// Params of the majority decision for `key`; ties go to the value
    /// seen most recently
    pub fn get_stable_decision(&self, key: &str) -> Option<Value> {
        let log = self.log.lock();

        // hash -> (count, index of latest occurrence)
        let mut tally: HashMap<&str, (usize, usize)> = HashMap::new();
        for (index, entry) in log.iter().enumerate().filter(|(_, e)| e.key == key) {
            let slot = tally.entry(&entry.hash).or_insert((0, index));
            slot.0 += 1;
            slot.1 = index;
        }

        let (_, &(_, latest)) = tally.iter().max_by_key(|(_, tally)| **tally)?;
        log.get(latest).map(|entry| entry.params.clone())
    }

    /// Decisions recorded for `key`, oldest first
    pub fn history(&self, key: &str) -> Vec<DecisionEntry> {
        self.log
            .lock()
            .iter()
            .filter(|e| e.key == key)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.lock().is_empty()
    }
}
