//! The `run` command: a long-lived host reading events from stdin
//!
//! Each input line is one of
//! - `<source> <event> [json args...]`: emit an event through a source
//! - `!<name> [json args...]`: run a text command by name or alias
//! - `@<custom id> [json args...]`: run an interaction handler
//! - `:reload`: reload every extension
//!
//! Empty lines and lines starting with `#` are ignored.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use toolbox_host::{
    HostConfig, Registry, ReloadReason, ReloadTrigger, TreeScanner, setup_reload_signal,
};
use tracing::{error, info, warn};

use crate::build_registry;

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Emit {
        source: String,
        event: String,
        args: Vec<Value>,
    },
    Text {
        name: String,
        args: Vec<Value>,
    },
    Interaction {
        id: String,
        args: Vec<Value>,
    },
    Reload,
}

/// Parse one input line; `Ok(None)` for blank lines and comments
pub fn parse_line(line: &str) -> anyhow::Result<Option<Input>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));

    if let Some(directive) = head.strip_prefix(':') {
        return match directive {
            "reload" => Ok(Some(Input::Reload)),
            other => anyhow::bail!("unknown directive `:{}`", other),
        };
    }

    if let Some(name) = head.strip_prefix('!') {
        return Ok(Some(Input::Text {
            name: name.to_string(),
            args: parse_args(rest)?,
        }));
    }
    if let Some(id) = head.strip_prefix('@') {
        return Ok(Some(Input::Interaction {
            id: id.to_string(),
            args: parse_args(rest)?,
        }));
    }

    let rest = rest.trim_start();
    let (event, rest) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    if event.is_empty() {
        anyhow::bail!("expected `<source> <event> [args...]`");
    }

    Ok(Some(Input::Emit {
        source: head.to_string(),
        event: event.to_string(),
        args: parse_args(rest)?,
    }))
}

/// Whitespace separated JSON values
fn parse_args(input: &str) -> anyhow::Result<Vec<Value>> {
    serde_json::Deserializer::from_str(input)
        .into_iter::<Value>()
        .collect::<Result<_, _>>()
        .map_err(|e| anyhow::anyhow!("invalid JSON arguments: {}", e))
}

fn handle(registry: &Registry, reload: &ReloadTrigger, input: Input) {
    match input {
        Input::Reload => {
            reload.request(ReloadReason::Manual);
        }
        Input::Emit {
            source,
            event,
            args,
        } => {
            registry.emit_on(&source, &event, &args);
        }
        Input::Text { name, args } => match registry.text_command(&name) {
            Some(command) => {
                if let Err(e) = command.run(&args) {
                    error!("Text command {} failed: {:#}", name, e);
                }
            }
            None => warn!("Unknown text command {}", name),
        },
        Input::Interaction { id, args } => match registry.interaction(&id) {
            Some(interaction) => {
                if let Err(e) = interaction.handle(&args) {
                    error!("Interaction {} failed: {:#}", id, e);
                }
            }
            None => warn!("Unknown interaction {}", id),
        },
    }
}

#[cfg(feature = "discord")]
async fn register(registry: &Registry, config: &HostConfig) {
    use std::sync::Arc;
    use toolbox_host::{DiscordPublisher, Registrar};

    let registrar = match &config.discord {
        Some(discord) => match std::env::var(&discord.token_env) {
            Ok(token) => match DiscordPublisher::new(&token, discord.application_id) {
                Ok(publisher) => Registrar::new(Arc::new(publisher)),
                Err(e) => {
                    error!("Invalid discord settings: {:#}", e);
                    Registrar::disabled()
                }
            },
            Err(_) => {
                error!("{} not provided", discord.token_env);
                Registrar::disabled()
            }
        },
        None => Registrar::disabled(),
    };
    registrar.register_primary(registry).await;
}

#[cfg(not(feature = "discord"))]
async fn register(_registry: &Registry, _config: &HostConfig) {
    warn!("Built without the discord feature, skipping command registration");
}

pub async fn run(config: HostConfig, publish: bool) -> anyhow::Result<()> {
    let registry = build_registry(&config);
    if !registry.load() {
        warn!("Initial load failed, waiting for a reload");
    }
    if publish {
        register(&registry, &config).await;
    }

    let (reload, mut reload_rx) = setup_reload_signal();
    let mut signals = true;

    let mut scanner = config
        .hot_reload
        .enabled
        .then(|| TreeScanner::with_interval(config.paths.roots(), config.hot_reload.interval()));
    let mut scan_tick = tokio::time::interval(config.hot_reload.interval());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("Reading events from stdin");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            changed = reload_rx.changed(), if signals => {
                if changed.is_err() {
                    signals = false;
                } else {
                    let signal = *reload_rx.borrow_and_update();
                    info!("Reload #{} requested ({:?})", signal.generation, signal.reason);
                    registry.reload();
                }
            }
            _ = scan_tick.tick(), if scanner.is_some() => {
                if let Some(scanner) = scanner.as_mut() {
                    let result = scanner.scan_changes();
                    if result.has_changes() {
                        info!("{} descriptor file(s) changed, reloading", result.total());
                        registry.reload();
                    }
                }
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => match parse_line(&line) {
                    Ok(Some(input)) => handle(&registry, &reload, input),
                    Ok(None) => {}
                    Err(e) => warn!("{:#}", e),
                },
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    }

    let stopped = registry.stop_services();
    info!("Stopped {} service(s)", stopped);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_emit_with_json_args() {
        let input = parse_line(r#"client messageCreate "hello world" {"id": 1} 3"#).unwrap();
        assert_eq!(
            input,
            Some(Input::Emit {
                source: "client".into(),
                event: "messageCreate".into(),
                args: vec![json!("hello world"), json!({ "id": 1 }), json!(3)],
            })
        );
    }

    #[test]
    fn test_parse_text_and_interaction() {
        assert_eq!(
            parse_line("!p").unwrap(),
            Some(Input::Text {
                name: "p".into(),
                args: vec![],
            })
        );
        assert_eq!(
            parse_line("@confirm true").unwrap(),
            Some(Input::Interaction {
                id: "confirm".into(),
                args: vec![json!(true)],
            })
        );
    }

    #[test]
    fn test_parse_skips_blank_and_rejects_bad_lines() {
        assert_eq!(parse_line("   ").unwrap(), None);
        assert_eq!(parse_line("# comment").unwrap(), None);
        assert!(parse_line("client").is_err());
        assert!(parse_line("client ready {oops").is_err());
    }

    #[test]
    fn test_parse_reload_directive() {
        assert_eq!(parse_line(":reload").unwrap(), Some(Input::Reload));
        assert!(parse_line(":restart").is_err());
    }
}
