//! Line-oriented refinement session over one document.

use anyhow::Result;
use inkdraft_core::{
    MessageRole, RefineOutcome, RefinementKind, RefinementWorkflow, WorkflowError,
};
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "commands:
  refine <kind> <prompt>   kinds: improve shorten expand rephrase fix_grammar custom
  rollback                 restore the previous version
  save                     persist the current body
  history                  list restorable versions
  messages                 show the refinement conversation
  status                   show processing and operation state
  retry                    replay the last failed refinement
  help | quit";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Refine { kind: RefinementKind, prompt: String },
    Rollback,
    Save,
    History,
    Messages,
    Status,
    Retry,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let command = match head {
        "refine" => {
            let (kind, prompt) = rest
                .trim()
                .split_once(char::is_whitespace)
                .ok_or_else(|| "usage: refine <kind> <prompt>".to_string())?;
            let kind = kind.parse::<RefinementKind>().map_err(|err| err.to_string())?;
            Command::Refine {
                kind,
                prompt: prompt.trim().to_string(),
            }
        }
        "rollback" | "undo" => Command::Rollback,
        "save" => Command::Save,
        "history" => Command::History,
        "messages" => Command::Messages,
        "status" => Command::Status,
        "retry" => Command::Retry,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command `{other}`; type `help`")),
    };
    Ok(Some(command))
}

pub async fn run(workflow: &RefinementWorkflow) -> Result<()> {
    let store = workflow.store();
    if let Some(document) = store.document() {
        println!(
            "editing `{}` ({} blocks). type `help` for commands.",
            document.metadata.title,
            document.body.block_count()
        );
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };
        match command {
            Command::Refine { kind, prompt } => {
                report_refine(workflow.refine(&prompt, kind).await);
                print_body(workflow);
            }
            Command::Retry => {
                report_refine(workflow.retry_last().await);
                print_body(workflow);
            }
            Command::Rollback => {
                report(
                    workflow
                        .rollback()
                        .await
                        .map(|outcome| format!("restored {}", outcome.restored.label())),
                );
                print_body(workflow);
            }
            Command::Save => match store.save().await {
                Ok(receipt) => println!("saved revision {}", receipt.version),
                Err(err) => println!("error: {err}"),
            },
            Command::History => {
                let history = store.history();
                if history.is_empty() {
                    println!("no earlier versions");
                }
                for entry in history.iter().rev() {
                    println!(
                        "{:<12} {}  {}",
                        entry.label(),
                        entry.timestamp.format("%H:%M:%S"),
                        entry.preview_text().unwrap_or_default()
                    );
                }
            }
            Command::Messages => {
                for message in workflow.tracker().messages() {
                    let role = match message.role {
                        MessageRole::User => "you",
                        MessageRole::Assistant => "assistant",
                    };
                    println!("[{role}/{:?}] {}", message.status, message.content);
                }
            }
            Command::Status => {
                let state = workflow.tracker().processing_state();
                println!(
                    "processing={} status={} versions={} unsaved={}",
                    state.is_processing,
                    state.status.map_or("none", |status| status.as_str()),
                    store.version_count(),
                    store.has_unsaved_changes()
                );
                for operation in workflow.operations().active_operations() {
                    println!("  {} {:.0}%", operation.id, operation.progress);
                }
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => break,
        }
    }

    if store.has_unsaved_changes() {
        println!("warning: leaving with unsaved changes");
    }
    Ok(())
}

fn report(result: Result<String, WorkflowError>) {
    match result {
        Ok(message) => println!("{message}"),
        Err(err) => println!("error: {err}"),
    }
}

fn report_refine(result: Result<RefineOutcome, WorkflowError>) {
    if let Err(err) = &result {
        if err.is_retryable() {
            println!("error: {err} (type `retry` to try again)");
            return;
        }
    }
    report(result.map(|outcome| outcome.reply.content));
}

fn print_body(workflow: &RefinementWorkflow) {
    if let Some(body) = workflow.store().body() {
        println!("> {}", body.plain_text());
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_command, Command};
    use inkdraft_core::RefinementKind;

    #[test]
    fn parses_refine_with_kind_and_prompt() {
        assert_eq!(
            parse_command("refine fix-grammar  make it   clean ").unwrap(),
            Some(Command::Refine {
                kind: RefinementKind::FixGrammar,
                prompt: "make it   clean".to_string(),
            })
        );
    }

    #[test]
    fn rejects_incomplete_or_unknown_commands() {
        assert!(parse_command("refine shorten").is_err());
        assert!(parse_command("refine sideways do it").is_err());
        assert!(parse_command("publish").is_err());
        assert_eq!(parse_command("   ").unwrap(), None);
        assert_eq!(parse_command("quit").unwrap(), Some(Command::Quit));
    }
}
