//! What one virtual user does per iteration.
//!
//! Two selection modes, decided once from the test plan:
//!
//! - **weighted** (no scenarios declared): every endpoint group runs in
//!   first-declared order each iteration, each operation a
//!   weight-proportional number of times, with a fixed pause between groups;
//! - **scenario**: one scenario is drawn per iteration with probability
//!   proportional to its weight, then its steps run in order with think-time
//!   pauses between them.
//!
//! Fractional weights resolve probabilistically: weight 2.5 runs twice plus a
//! third time with probability 0.5, so long runs converge on the configured
//! ratios without per-iteration bookkeeping.

use std::collections::HashMap;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{OperationDefinition, ScenarioDefinition, TestPlan};
use crate::dispatch::{Dispatcher, Outcome, RunResultMap};

/// Per-VU execution state: identity, iteration counter and a private RNG so
/// VUs never contend on a shared source of randomness.
pub struct VuContext {
    pub vu_id: u64,
    pub iteration: u64,
    rng: StdRng,
}

impl VuContext {
    pub fn new(vu_id: u64) -> Self {
        Self {
            vu_id,
            iteration: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic RNG for tests and reproducible runs.
    pub fn seeded(vu_id: u64, seed: u64) -> Self {
        Self {
            vu_id,
            iteration: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn advance(&mut self) {
        self.iteration += 1;
    }
}

enum ExecutionPlan {
    Weighted {
        /// Group name and its operations, in first-declared order.
        groups: Vec<(String, Vec<OperationDefinition>)>,
    },
    Scenarios {
        scenarios: Vec<ScenarioDefinition>,
        operations: HashMap<String, OperationDefinition>,
    },
}

impl ExecutionPlan {
    fn from_plan(plan: &TestPlan) -> Self {
        if plan.scenarios.is_empty() {
            let mut groups: Vec<(String, Vec<OperationDefinition>)> = Vec::new();
            for op in &plan.endpoints {
                match groups.iter_mut().find(|(name, _)| *name == op.group) {
                    Some((_, ops)) => ops.push(op.clone()),
                    None => groups.push((op.group.clone(), vec![op.clone()])),
                }
            }
            Self::Weighted { groups }
        } else {
            let operations = plan
                .endpoints
                .iter()
                .map(|op| (op.name.clone(), op.clone()))
                .collect();
            Self::Scenarios {
                scenarios: plan.scenarios.clone(),
                operations,
            }
        }
    }
}

/// Drives one iteration at a time for a VU against a dispatcher.
pub struct Selector {
    plan: ExecutionPlan,
    group_sleep: Duration,
}

impl Selector {
    pub fn new(plan: &TestPlan, group_sleep: Duration) -> Self {
        Self {
            plan: ExecutionPlan::from_plan(plan),
            group_sleep,
        }
    }

    /// Run one full iteration for `vu`, returning every call outcome in
    /// execution order. The caller advances the VU's iteration counter.
    pub async fn run_iteration(
        &self,
        dispatcher: &mut Dispatcher,
        vu: &mut VuContext,
        results: &RunResultMap,
    ) -> Vec<Outcome> {
        match &self.plan {
            ExecutionPlan::Weighted { groups } => {
                let mut outcomes = Vec::new();
                for (i, (_, ops)) in groups.iter().enumerate() {
                    if i > 0 && !self.group_sleep.is_zero() {
                        tokio::time::sleep(self.group_sleep).await;
                    }
                    for op in ops {
                        for _ in 0..attempts(op.weight, &mut vu.rng) {
                            outcomes
                                .push(dispatcher.execute(op, vu.vu_id, vu.iteration, results).await);
                        }
                    }
                }
                outcomes
            }
            ExecutionPlan::Scenarios {
                scenarios,
                operations,
            } => {
                let Some(scenario) = choose_scenario(scenarios, &mut vu.rng) else {
                    return Vec::new();
                };
                let mut outcomes = Vec::new();
                for (i, step) in scenario.steps.iter().enumerate() {
                    if i > 0 {
                        let pause = step.think_time.unwrap_or(scenario.think_time);
                        if pause > 0.0 {
                            tokio::time::sleep(Duration::from_secs_f64(pause)).await;
                        }
                    }
                    match operations.get(&step.operation) {
                        Some(op) => {
                            outcomes
                                .push(dispatcher.execute(op, vu.vu_id, vu.iteration, results).await);
                        }
                        None => {
                            tracing::warn!(
                                scenario = %scenario.name,
                                operation = %step.operation,
                                "scenario step references an unknown operation"
                            );
                            outcomes.push(Outcome::Skipped(format!(
                                "unknown operation `{}`",
                                step.operation
                            )));
                        }
                    }
                }
                outcomes
            }
        }
    }
}

/// How many times a weighted operation runs this iteration: the integer part
/// always, the fractional part as a biased coin flip. Non-positive weights
/// never run.
fn attempts(weight: f64, rng: &mut StdRng) -> usize {
    if weight <= 0.0 {
        return 0;
    }
    let whole = weight.floor();
    let frac = weight - whole;
    let mut n = whole as usize;
    if frac > 0.0 && rng.gen::<f64>() < frac {
        n += 1;
    }
    n
}

/// Weight-proportional draw. All-zero weights degrade to the last scenario
/// rather than panicking on an empty range.
fn choose_scenario<'a>(
    scenarios: &'a [ScenarioDefinition],
    rng: &mut StdRng,
) -> Option<&'a ScenarioDefinition> {
    if scenarios.is_empty() {
        return None;
    }
    let total: f64 = scenarios.iter().map(|s| s.weight.max(0.0)).sum();
    if total <= 0.0 {
        return scenarios.last();
    }
    let mut r = rng.gen_range(0.0..total);
    for scenario in scenarios {
        r -= scenario.weight.max(0.0);
        if r < 0.0 {
            return Some(scenario);
        }
    }
    scenarios.last()
}
