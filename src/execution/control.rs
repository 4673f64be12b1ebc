//! Control-Flow Manager
//!
//! Decides the next space after one completes. From the current space:
//!
//! - no outgoing transition leads to `END`
//! - otherwise transitions are tried in declaration order; the first
//!   unconditioned one is taken, and a conditioned one is taken when its
//!   condition holds for a freshly requested user value
//! - if nothing matches, the run fails

use log::{debug, info};

use super::condition::Condition;
use super::context::RunContext;
use super::error::RunError;
use super::input::InputProvider;
use super::progress::ProgressEvent;
use crate::workflow::model::END;

pub struct ControlFlowManager<'a> {
    ctx: &'a RunContext,
    input: &'a dyn InputProvider,
}

impl<'a> ControlFlowManager<'a> {
    pub fn new(ctx: &'a RunContext, input: &'a dyn InputProvider) -> Self {
        Self { ctx, input }
    }

    /// Next space id, or `END`.
    pub async fn next_space(&self, current: &str) -> Result<String, RunError> {
        let outgoing: Vec<_> = self
            .ctx
            .artifact
            .control
            .transitions
            .iter()
            .filter(|t| t.from == current)
            .collect();

        if outgoing.is_empty() {
            debug!("Space '{}' has no outgoing transitions, ending", current);
            return Ok(END.to_string());
        }

        for transition in outgoing {
            let Some(text) = &transition.condition else {
                debug!("Taking unconditioned transition {} -> {}", current, transition.to);
                return Ok(transition.to.clone());
            };

            let condition = Condition::parse(text).map_err(|source| RunError::Condition {
                space: current.to_string(),
                condition: text.clone(),
                source,
            })?;

            let answer = match condition.placeholder() {
                Some(name) => Some(self.ask(current, name, &condition, &transition.to).await?),
                None => None,
            };

            let holds = condition
                .evaluate(answer.as_deref())
                .map_err(|source| RunError::Condition {
                    space: current.to_string(),
                    condition: text.clone(),
                    source,
                })?;

            if holds {
                info!(
                    "Condition '{}' holds, moving {} -> {}",
                    condition, current, transition.to
                );
                return Ok(transition.to.clone());
            }
            debug!("Condition '{}' does not hold", condition);
        }

        Err(RunError::NoTransition {
            space: current.to_string(),
        })
    }

    async fn ask(
        &self,
        space: &str,
        variable: &str,
        condition: &Condition,
        target: &str,
    ) -> Result<String, RunError> {
        let prompt = format!(
            "[{}] Value for '{}' (go to {} if {}):",
            space, variable, target, condition
        );
        self.ctx.emit(ProgressEvent::InputRequired {
            run_id: self.ctx.run_id.clone(),
            space: space.to_string(),
            prompt: prompt.clone(),
        });
        self.input.request(&prompt).await
    }
}
