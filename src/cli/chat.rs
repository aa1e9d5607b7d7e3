use std::error::Error;
use std::io::Write;
use std::path::Path;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::agent::{
    Agent, AgentError, AgentOptions, BudgetPolicy, ChatCompletionPlanner, PlannerSettings,
};
use crate::cli::{connect, ChatArgs};
use crate::core::config::Config;
use crate::core::runtime::{cancel_on_ctrl_c, run_cancellable};
use crate::utils::logging::LoggingState;

/// What one line of input asks the REPL to do.
#[derive(Debug, PartialEq, Eq)]
pub enum ChatInput<'a> {
    Skip,
    Exit,
    Clear,
    Ask(&'a str),
}

pub fn classify_input(line: &str) -> ChatInput<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ChatInput::Skip;
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "exit" | "quit" => ChatInput::Exit,
        "clear" => ChatInput::Clear,
        _ => ChatInput::Ask(trimmed),
    }
}

pub fn agent_options(config: &Config, args: &ChatArgs) -> Result<AgentOptions, String> {
    let budget_policy = match args.budget {
        Some(policy) => policy,
        None => config.agent_budget().parse::<BudgetPolicy>()?,
    };
    Ok(AgentOptions {
        max_steps: args.max_steps.unwrap_or(config.agent_max_steps()),
        memory_enabled: config.agent_memory_enabled() && !args.no_memory,
        budget_policy,
    })
}

pub async fn run(
    config: &Config,
    config_path: Option<&Path>,
    args: ChatArgs,
) -> Result<(), Box<dyn Error>> {
    let settings = match PlannerSettings::from_config(config) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("❌ {e}");
            std::process::exit(1);
        }
    };
    let options = agent_options(config, &args)?;
    let logging = LoggingState::new(args.log.clone())?;
    let planner = ChatCompletionPlanner::new(settings)?;

    println!("Initializing chat...");
    let session = connect(config, config_path, &args.connect).await?;
    let mut agent = Agent::connect(session, planner, options).await?;

    println!("\n===== Interactive MCP Chat =====");
    println!("Type 'exit' or 'quit' to end the conversation");
    println!("Type 'clear' to clear conversation history");
    if logging.is_active() {
        println!("Logging: {}", logging.get_status_string());
    }
    println!("==================================");

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\nYou: ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };

        match classify_input(&line) {
            ChatInput::Skip => continue,
            ChatInput::Exit => {
                println!("Ending conversation...");
                break;
            }
            ChatInput::Clear => {
                agent.clear_memory();
                println!("Conversation history cleared.");
                log_entry(logging.log_event("Conversation history cleared."));
            }
            ChatInput::Ask(question) => {
                log_entry(logging.log_user(question));
                print!("\nAssistant: ");
                std::io::stdout().flush()?;
                match run_cancellable(
                    Some(&shutdown),
                    || AgentError::Interrupted,
                    agent.run_turn(question),
                )
                .await
                {
                    Ok(outcome) => {
                        println!("{}", outcome.text);
                        log_entry(logging.log_assistant(&outcome.text));
                    }
                    Err(AgentError::Interrupted) => break,
                    Err(e) => {
                        println!("\nError: {e}");
                        log_entry(logging.log_event(&format!("Error: {e}")));
                    }
                }
            }
        }
    }

    agent.close().await;
    shutdown.cancel();
    Ok(())
}

fn log_entry(result: Result<(), Box<dyn Error>>) {
    if let Err(err) = result {
        warn!(error = %err, "Failed to write chat log");
    }
}
