use std::time::Duration;

/// Everything the exit handler knows when a child goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitContext {
    /// Uptime fell below `min_uptime`.
    pub spinning: bool,
    /// Restart counter after counting this exit.
    pub restarts: u32,
    pub max_restarts: Option<u32>,
    pub spin_sleep: Option<Duration>,
    pub force_stop: bool,
    pub force_restart: bool,
    /// Exit code 0 under `ignore_clean_exit`.
    pub clean_exit_ignored: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Terminal: settle in `Stopped`.
    Stop,
    RestartAfter(Duration),
    RestartNow,
}

impl RestartDecision {
    pub fn evaluate(ctx: &ExitContext) -> Self {
        let ceiling_reached = ctx
            .max_restarts
            .is_some_and(|max| ctx.restarts >= max);

        if ctx.force_stop
            || (ctx.clean_exit_ignored && !ctx.force_restart)
            || (ceiling_reached && !ctx.force_restart)
            || (ctx.spinning && ctx.spin_sleep.is_none() && !ctx.force_restart)
        {
            RestartDecision::Stop
        } else if ctx.spinning {
            // forced restarts of a spinning child without spin_sleep go straight through
            match ctx.spin_sleep {
                Some(delay) => RestartDecision::RestartAfter(delay),
                None => RestartDecision::RestartNow,
            }
        } else {
            RestartDecision::RestartNow
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RestartDecision::Stop)
    }
}

/// Halving used by cooldown collaborators.
pub fn decay(restarts: u32) -> u32 {
    restarts / 2
}
