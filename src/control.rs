use anyhow::Result;
use async_trait::async_trait;

use crate::api::ControlReply;
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::results::rows::AlgorithmGroup;
use crate::session::{SessionCommand, SessionView};

#[async_trait]
pub trait ControlApi: Send + Sync {
    async fn post_control(&self, action: &str, params: &[(&str, &str)]) -> Result<ControlReply>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    ChangeAlgorithm(AlgorithmGroup),
}

impl ControlCommand {
    pub fn action(&self) -> &'static str {
        match self {
            ControlCommand::ChangeAlgorithm(_) => "change_algo",
        }
    }

    pub fn params(&self) -> Vec<(&'static str, &'static str)> {
        match self {
            ControlCommand::ChangeAlgorithm(group) => vec![("algorithm", group.wire_name())],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    /// Server acknowledged; live state was reset.
    Applied { message: String },
    /// Requested algorithm is already running; nothing sent.
    AlreadyActive(AlgorithmGroup),
}

pub struct ControlCommandSender<A> {
    api: A,
    view: SessionView,
}

impl<A: ControlApi> ControlCommandSender<A> {
    pub fn new(api: A, view: SessionView) -> Self {
        Self { api, view }
    }

    /// Errors leave the session untouched and are for the user to see.
    pub async fn send(&self, command: ControlCommand) -> Result<ControlOutcome> {
        let ControlCommand::ChangeAlgorithm(target) = command;
        if self.view.current_algorithm() == Some(target) {
            log(
                Level::Info,
                Domain::Control,
                "already_active",
                obj(&[("algorithm", v_str(target.wire_name()))]),
            );
            return Ok(ControlOutcome::AlreadyActive(target));
        }

        let params = command.params();
        log(
            Level::Info,
            Domain::Control,
            "send",
            obj(&[
                ("action", v_str(command.action())),
                ("algorithm", v_str(target.wire_name())),
            ]),
        );
        let reply = self.api.post_control(command.action(), &params).await?;
        let message = reply
            .message
            .unwrap_or_else(|| "command executed successfully".to_string());

        self.view.request(SessionCommand::Reset {
            active: Some(target),
        });
        log(
            Level::Info,
            Domain::Control,
            "applied",
            obj(&[("action", v_str(command.action())), ("msg", v_str(&message))]),
        );
        Ok(ControlOutcome::Applied { message })
    }
}
