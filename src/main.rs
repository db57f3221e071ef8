// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Parley - chat with an OpenAI-compatible model from your terminal

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use parley::chat::{ConversationService, PromptParts, TurnEvent, TurnOutcome};
use parley::cli::{AskArgs, Cli, Commands, WarmupArgs};
use parley::config::Settings;
use parley::llm::lifecycle::warm_up;
use parley::llm::model::ModelProfile;
use parley::llm::{CancelScope, ChatClient, ConnectionManager, TransportPool, ToolCall};
use parley::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::load()?,
    };
    let api_key = settings.resolve_api_key()?;

    let pool = Arc::new(TransportPool::new()?);
    let client = ChatClient::from_settings(Arc::clone(&pool), &settings, api_key);
    let mut manager = ConnectionManager::new(pool);
    manager.start_with_config(&settings.connection);

    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let result = match cli.command {
        Commands::Ask(args) => run_ask(args, client, &settings, &token).await,
        Commands::Warmup(args) => run_warmup(args, client, &settings, &token).await,
    };

    manager.shutdown().await;
    result
}

/// Concatenate context files, each under a header naming its path
fn load_context(paths: &[PathBuf]) -> Result<Option<String>> {
    if paths.is_empty() {
        return Ok(None);
    }

    let mut context = String::new();
    for path in paths {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read context file {}", path.display()))?;
        context.push_str(&format!("--- {} ---\n{}\n", path.display(), contents));
    }
    Ok(Some(context))
}

async fn run_ask(
    args: AskArgs,
    client: ChatClient,
    settings: &Settings,
    token: &CancellationToken,
) -> Result<()> {
    let mut service = ConversationService::new(Arc::new(client), settings);
    if let Some(model) = args.model {
        service = service.with_model(model);
    }

    let mut parts = PromptParts::new(args.prompt);
    if let Some(context) = load_context(&args.context)? {
        parts = parts.with_context(context);
    }

    if !args.stream {
        return match service.send_turn(&[], &parts, &[], None, token).await {
            Ok(TurnOutcome::Text { text, .. }) => {
                println!("{text}");
                Ok(())
            }
            Ok(TurnOutcome::ToolCalls { text, calls }) => {
                print_tool_calls(&text, &calls);
                Ok(())
            }
            Err(err) => report(err),
        };
    }

    let mut turn = match service.stream_turn(&[], &parts, &[], None, token).await {
        Ok(turn) => turn,
        Err(err) => return report(err),
    };

    let mut stdout = std::io::stdout();
    while let Some(event) = turn.next_event().await {
        match event {
            TurnEvent::Text(delta) => {
                print!("{delta}");
                stdout.flush()?;
            }
            TurnEvent::Finished { .. } => println!(),
            TurnEvent::ToolCalls { calls, .. } => {
                println!();
                print_tool_calls("", &calls);
            }
            TurnEvent::Failed { error, .. } => {
                println!();
                return report(error);
            }
        }
    }
    Ok(())
}

fn print_tool_calls(text: &str, calls: &[ToolCall]) {
    if !text.is_empty() {
        println!("{text}");
    }
    for call in calls {
        println!("[tool call] {}({})", call.name, call.arguments);
    }
}

/// User cancellations end quietly; everything else exits with the short message
fn report(err: parley::ParleyError) -> Result<()> {
    if err.is_user_cancellation() {
        eprintln!("{}", err.user_message());
        return Ok(());
    }
    tracing::debug!(error = %err, "request failed");
    anyhow::bail!(err.user_message())
}

async fn run_warmup(
    args: WarmupArgs,
    client: ChatClient,
    settings: &Settings,
    token: &CancellationToken,
) -> Result<()> {
    let model = args.model.unwrap_or_else(|| settings.api.model.clone());
    let timeout = ModelProfile::for_model(&model, &settings.api).timeout(&settings.connection);
    let scope = CancelScope::with_timeout(token.clone(), timeout);

    match warm_up(&client, &model, &scope).await {
        Ok(()) => println!("connection to {} is warm", client.endpoint()),
        Err(err) => eprintln!("warm-up failed: {}", err.user_message()),
    }
    Ok(())
}
