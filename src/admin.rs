//! Administrative triggers.
//!
//! A small command surface over the [`Scheduler`] for operators and tooling.
//! Commands and responses are serde types so they can travel over any
//! transport (CLI, HTTP, a queue).

use serde::{Deserialize, Serialize};

use crate::error::HiveResult;
use crate::scheduler::{GrowthReport, HiveStats, Scheduler};
use crate::types::{ActivityRecord, Bot, BotId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum AdminCommand {
    InitializePopulation { count: usize },
    TriggerGrowth,
    Stats,
    Suspend { bot_id: BotId },
    Resume { bot_id: BotId },
    Retire { bot_id: BotId },
    RecentActivity { limit: usize },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum AdminResponse {
    Growth(GrowthReport),
    Stats(Box<HiveStats>),
    Bot(Box<Bot>),
    Activity(Vec<ActivityRecord>),
}

pub async fn handle(scheduler: &Scheduler, command: AdminCommand) -> HiveResult<AdminResponse> {
    tracing::info!(?command, "admin command");
    Ok(match command {
        AdminCommand::InitializePopulation { count } => {
            AdminResponse::Growth(scheduler.initialize_population(count).await?)
        }
        AdminCommand::TriggerGrowth => AdminResponse::Growth(scheduler.run_growth_cycle(true).await?),
        AdminCommand::Stats => AdminResponse::Stats(Box::new(scheduler.stats().await?)),
        AdminCommand::Suspend { bot_id } => AdminResponse::Bot(Box::new(scheduler.suspend(bot_id).await?)),
        AdminCommand::Resume { bot_id } => AdminResponse::Bot(Box::new(scheduler.resume(bot_id).await?)),
        AdminCommand::Retire { bot_id } => AdminResponse::Bot(Box::new(scheduler.retire(bot_id).await?)),
        AdminCommand::RecentActivity { limit } => {
            AdminResponse::Activity(scheduler.recent_activities(limit).await?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_from_json() {
        let cmd: AdminCommand =
            serde_json::from_str(r#"{"command":"initialize_population","count":20}"#).unwrap();
        assert_eq!(cmd, AdminCommand::InitializePopulation { count: 20 });

        let cmd: AdminCommand = serde_json::from_str(r#"{"command":"suspend","bot_id":4}"#).unwrap();
        assert_eq!(cmd, AdminCommand::Suspend { bot_id: BotId(4) });

        let cmd: AdminCommand = serde_json::from_str(r#"{"command":"trigger_growth"}"#).unwrap();
        assert_eq!(cmd, AdminCommand::TriggerGrowth);
    }
}
