//! Setup rules wrapped around a transition test.
//!
//! A rule prepares something once for the whole test (a device setting, an
//! installed app) and restores it afterwards. Rules are set up in order and
//! torn down in reverse, so the innermost rule is closest to the test.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::errors::{Phase, PhaseFailure};
use crate::result::ResultSet;
use crate::runner::{TestSpec, TransitionRunner};

#[async_trait]
pub trait SetupRule: Send + Sync {
    fn name(&self) -> &str;

    async fn setup(&self) -> Result<()>;

    async fn teardown(&self) -> Result<()>;
}

/// A transition runner wrapped in an ordered chain of setup rules.
pub struct RuleChainRunner {
    rules: Vec<Arc<dyn SetupRule>>,
    runner: TransitionRunner,
}

impl RuleChainRunner {
    pub fn new(runner: TransitionRunner) -> Self {
        Self {
            rules: Vec::new(),
            runner,
        }
    }

    /// Add an inner rule. Rules added later run closer to the test.
    pub fn with_rule(mut self, rule: Arc<dyn SetupRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Set up every rule, run the test, tear the rules down.
    ///
    /// A rule that fails to set up is recorded as a test setup failure;
    /// the rules before it are torn down and the test does not run. A rule
    /// that fails to tear down is recorded as a test teardown failure and
    /// fails every result.
    pub async fn execute(&self, spec: &TestSpec) -> ResultSet {
        let mut ready = 0;
        let mut setup_failure = None;
        for rule in &self.rules {
            tracing::info!(rule = rule.name(), "Setting up rule");
            if let Err(e) = rule.setup().await {
                tracing::error!(rule = rule.name(), error = %format!("{e:#}"), "Rule setup failed");
                setup_failure = Some(
                    PhaseFailure::new(Phase::TestSetup, e.context(format!("Rule '{}' setup failed", rule.name()))),
                );
                break;
            }
            ready += 1;
        }

        let mut set = match setup_failure {
            Some(failure) => ResultSet::from_failure(failure),
            None => self.runner.execute(spec).await,
        };

        let mut teardown_failed = false;
        for rule in self.rules[..ready].iter().rev() {
            tracing::info!(rule = rule.name(), "Tearing down rule");
            if let Err(e) = rule.teardown().await {
                tracing::error!(rule = rule.name(), error = %format!("{e:#}"), "Rule teardown failed");
                set.push_execution_error(PhaseFailure::new(
                    Phase::TestTeardown,
                    e.context(format!("Rule '{}' teardown failed", rule.name())),
                ));
                teardown_failed = true;
            }
        }
        if teardown_failed {
            set.mark_all_failed();
        }

        set
    }
}
