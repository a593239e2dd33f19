use simdash::api::DashboardApi;
use simdash::config::DashConfig;
use simdash::logging::console_to_stderr;
use simdash::control::{ControlCommand, ControlCommandSender, ControlOutcome};
use simdash::results::rows::AlgorithmGroup;
use simdash::session::session;

#[tokio::main]
async fn main() {
    console_to_stderr();
    let raw = std::env::args().nth(1).unwrap_or_default();
    let target = match AlgorithmGroup::parse(&raw) {
        Some(group) => group,
        None => {
            eprintln!("usage: switch_algo <sumo|custom>");
            std::process::exit(1);
        }
    };
    let cfg = match DashConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("config error: {:#}", err);
            std::process::exit(1);
        }
    };

    // No live stream here, so the current algorithm is unknown and the
    // command is always sent.
    let (_live, _publisher, view) = session(1);
    let sender = ControlCommandSender::new(DashboardApi::from_config(&cfg), view);
    match sender.send(ControlCommand::ChangeAlgorithm(target)).await {
        Ok(ControlOutcome::Applied { message }) => println!("{}", message),
        Ok(ControlOutcome::AlreadyActive(group)) => {
            println!("already using {} algorithm", group.display_name())
        }
        Err(err) => {
            eprintln!("failed to execute change_algo command: {:#}", err);
            std::process::exit(1);
        }
    }
}
