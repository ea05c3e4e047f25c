use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tracing::{debug, info};

/// Agent selection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// UCB1 exploration weight `C`
    pub exploration_constant: f64,
    /// Outcomes kept per agent
    pub history_size: usize,
    /// Latency floor used when deriving a reward, in seconds
    pub min_latency_secs: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            exploration_constant: std::f64::consts::SQRT_2,
            history_size: 50,
            min_latency_secs: 0.001,
        }
    }
}

/// One recorded execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    pub latency_secs: f64,
    pub reward: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub successes: u64,
    pub attempts: u64,
    pub total_latency_secs: f64,
    pub total_reward: f64,
    pub history: VecDeque<Outcome>,
}

impl AgentStats {
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }

    #[must_use]
    pub fn avg_latency_secs(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.total_latency_secs / self.attempts as f64
        }
    }

    #[must_use]
    pub fn avg_reward(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.total_reward / self.attempts as f64
        }
    }
}

/// Row of [`AdaptiveOrchestrator::get_rankings`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRanking {
    pub agent: String,
    pub attempts: u64,
    pub successes: u64,
    pub success_rate: f64,
    pub avg_latency_secs: f64,
    pub avg_reward: f64,
}

#[derive(Debug, Default)]
struct OrchestratorState {
    agents: BTreeMap<String, AgentStats>,
    total_selections: u64,
}

/// Picks agents with UCB1 over observed rewards.
///
/// Untried candidates are always picked first, in list order. After that
/// each candidate scores `avg_reward + C * sqrt(ln(total_selections) / attempts)`.
/// Without an explicit reward, a success earns `1 / latency` and a failure 0.
#[derive(Debug, Default)]
pub struct AdaptiveOrchestrator {
    config: OrchestratorConfig,
    state: Mutex<OrchestratorState>,
}

impl AdaptiveOrchestrator {
    #[must_use]
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(OrchestratorState::default()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Choose one of `candidates`; `None` only for an empty list
    pub fn select_agent<S: AsRef<str>>(&self, candidates: &[S]) -> Option<String> {
        let mut state = self.state.lock();

        let untried = candidates.iter().map(AsRef::as_ref).find(|name| {
            state
                .agents
                .get(*name)
                .map_or(true, |stats| stats.attempts == 0)
        });

        let chosen = match untried {
            Some(name) => {
                debug!(agent = name, "Selecting untried agent");
                name
            }
            None => {
                let ln_total = (state.total_selections.max(1) as f64).ln();
                let mut best: Option<(&str, f64)> = None;
                for name in candidates.iter().map(AsRef::as_ref) {
                    let Some(stats) = state.agents.get(name) else {
                        continue;
                    };
                    let score = stats.avg_reward()
                        + self.config.exploration_constant
                            * (ln_total / stats.attempts as f64).sqrt();
                    if best.map_or(true, |(_, top)| score > top) {
                        best = Some((name, score));
                    }
                }
                let (name, score) = best?;
                debug!(agent = name, score, "Selecting agent by UCB1 score");
                name
            }
        };

        state.total_selections += 1;
        Some(chosen.to_string())
    }

    /// Record an execution result. `reward` overrides the latency-based
    /// default.
    pub fn record_outcome(
        &self,
        agent: &str,
        success: bool,
        latency: Duration,
        reward: Option<f64>,
    ) {
        let latency_secs = latency.as_secs_f64();
        let reward = reward.unwrap_or_else(|| {
            if success {
                1.0 / latency_secs.max(self.config.min_latency_secs)
            } else {
                0.0
            }
        });

        let mut state = self.state.lock();
        let stats = state.agents.entry(agent.to_string()).or_insert_with(|| {
            info!(agent, "Tracking new agent");
            AgentStats::default()
        });

        stats.attempts += 1;
        if success {
            stats.successes += 1;
        }
        stats.total_latency_secs += latency_secs;
        stats.total_reward += reward;
        stats.history.push_back(Outcome {
            success,
            latency_secs,
            reward,
            recorded_at: Utc::now(),
        });
        while stats.history.len() > self.config.history_size.max(1) {
            stats.history.pop_front();
        }

        debug!(agent, success, latency_secs, reward, "Recorded agent outcome");
    }

    /// Every agent seen so far, best success rate first
    pub fn get_rankings(&self) -> Vec<AgentRanking> {
        let state = self.state.lock();
        let mut rankings: Vec<AgentRanking> = state
            .agents
            .iter()
            .map(|(agent, stats)| AgentRanking {
                agent: agent.clone(),
                attempts: stats.attempts,
                successes: stats.successes,
                success_rate: stats.success_rate(),
                avg_latency_secs: stats.avg_latency_secs(),
                avg_reward: stats.avg_reward(),
            })
            .collect();

        // Stable sort keeps name order among equal rates
        rankings.sort_by(|a, b| b.success_rate.total_cmp(&a.success_rate));
        rankings
    }

    pub fn stats(&self, agent: &str) -> Option<AgentStats> {
        self.state.lock().agents.get(agent).cloned()
    }

    pub fn total_selections(&self) -> u64 {
        self.state.lock().total_selections
    }

    /// Forget all agents
    pub fn reset(&self) {
        *self.state.lock() = OrchestratorState::default();
        info!("Adaptive orchestrator reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    #[test]
    fn test_empty_candidates() {
        let orchestrator = AdaptiveOrchestrator::default();
        let none: [&str; 0] = [];
        assert_eq!(orchestrator.select_agent(&none), None);
        assert_eq!(orchestrator.total_selections(), 0);
    }

    #[test]
    fn test_untried_agents_come_first_in_order() {
        let orchestrator = AdaptiveOrchestrator::default();
        let agents = ["planner", "coder", "reviewer"];

        for expected in agents {
            assert_eq!(orchestrator.select_agent(&agents).as_deref(), Some(expected));
            orchestrator.record_outcome(expected, true, SECOND, None);
        }
        assert_eq!(orchestrator.total_selections(), 3);
    }

    #[test]
    fn test_exploits_better_agent() {
        let orchestrator = AdaptiveOrchestrator::new(OrchestratorConfig {
            exploration_constant: 0.0,
            ..OrchestratorConfig::default()
        });
        orchestrator.record_outcome("fast", true, Duration::from_millis(500), None);
        orchestrator.record_outcome("slow", true, Duration::from_secs(4), None);
        orchestrator.record_outcome("broken", false, Duration::from_millis(10), None);

        let candidates = vec!["slow".to_string(), "broken".to_string(), "fast".to_string()];
        assert_eq!(orchestrator.select_agent(&candidates).as_deref(), Some("fast"));
    }

    #[test]
    fn test_ties_go_to_first_candidate() {
        let orchestrator = AdaptiveOrchestrator::default();
        orchestrator.record_outcome("a", true, SECOND, None);
        orchestrator.record_outcome("b", true, SECOND, None);

        assert_eq!(orchestrator.select_agent(&["b", "a"]).as_deref(), Some("b"));
        assert_eq!(orchestrator.select_agent(&["a", "b"]).as_deref(), Some("a"));
    }

    #[test]
    fn test_exploration_revisits_neglected_agent() {
        let orchestrator = AdaptiveOrchestrator::default();
        orchestrator.record_outcome("rare", true, Duration::from_secs(2), None);
        for _ in 0..200 {
            orchestrator.record_outcome("common", true, SECOND, None);
        }

        // Push total_selections up so the exploration bonus of "rare" dominates
        let mut picked_rare = false;
        for _ in 0..2_000 {
            if orchestrator.select_agent(&["common", "rare"]).as_deref() == Some("rare") {
                picked_rare = true;
                break;
            }
        }
        assert!(picked_rare);
    }

    #[test]
    fn test_reward_defaults_and_override() {
        let orchestrator = AdaptiveOrchestrator::default();
        orchestrator.record_outcome("a", true, Duration::from_millis(250), None);
        orchestrator.record_outcome("a", false, Duration::from_millis(1), None);
        orchestrator.record_outcome("b", true, Duration::ZERO, Some(0.5));
        orchestrator.record_outcome("c", true, Duration::ZERO, None);

        let a = orchestrator.stats("a").unwrap();
        assert!((a.total_reward - 4.0).abs() < 1e-9);
        assert!((a.success_rate() - 0.5).abs() < f64::EPSILON);
        assert!((orchestrator.stats("b").unwrap().total_reward - 0.5).abs() < f64::EPSILON);
        // Zero latency is floored, not divided by
        assert!((orchestrator.stats("c").unwrap().total_reward - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_history_is_bounded() {
        let orchestrator = AdaptiveOrchestrator::default();
        for _ in 0..60 {
            orchestrator.record_outcome("a", true, SECOND, None);
        }
        let stats = orchestrator.stats("a").unwrap();
        assert_eq!(stats.attempts, 60);
        assert_eq!(stats.history.len(), 50);
    }

    #[test]
    fn test_rankings_by_success_rate() {
        let orchestrator = AdaptiveOrchestrator::default();
        for _ in 0..5 {
            orchestrator.record_outcome("A", true, SECOND, None);
            orchestrator.record_outcome("B", false, Duration::from_secs(5), None);
        }

        let rankings = orchestrator.get_rankings();
        assert_eq!(rankings[0].agent, "A");
        assert_eq!(rankings[0].attempts, 5);
        assert!((rankings[1].avg_latency_secs - 5.0).abs() < f64::EPSILON);

        orchestrator.reset();
        assert!(orchestrator.get_rankings().is_empty());
    }
}
