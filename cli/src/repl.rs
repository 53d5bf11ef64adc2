//! Interactive REPL: reads a line, runs one agent turn, repeats until EOF or
//! `/quit`. Lines starting with `/` are dispatched straight to the core APIs
//! instead of being sent to the model.

use std::path::Path;

use tokio::io::{AsyncBufReadExt, BufReader};

use agent_core::{ApprovalDecision, AsyncSubagentManager, AsyncSubagentPersistence, Engine, WireEvent};
use stream_event::{format_duration, AsyncSubagentRecord};

/// Runs the REPL until EOF or `/quit`/`quit`/`exit`.
pub async fn run(
    engine: Engine,
    async_manager: AsyncSubagentManager,
    work_dir: std::path::PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut render_sub = engine.runtime().bus.subscribe();
    let renderer = tokio::spawn(async move {
        while let Some(event) = render_sub.recv().await {
            render_event(event).await;
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::Write::flush(&mut std::io::stdout())?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if is_quit(line) {
            break;
        }

        if let Some(rest) = line.strip_prefix('/') {
            handle_command(rest, &engine, &async_manager, &work_dir).await;
            continue;
        }

        if let Err(e) = engine.on_run(line).await {
            eprintln!("error: {e}");
        } else {
            println!();
        }
    }

    renderer.abort();
    println!("Bye.");
    Ok(())
}

fn is_quit(line: &str) -> bool {
    matches!(line.to_lowercase().as_str(), "quit" | "exit" | "/quit")
}

/// Renders one bus event. `ContentDelta` is the only variant that writes to
/// stdout; everything else goes to stderr so the model's own reply stays the
/// only thing on stdout a script piping this CLI would see.
pub async fn render_event(event: WireEvent) {
    match event {
        WireEvent::ContentDelta { text, .. } => {
            print!("{text}");
            let _ = std::io::Write::flush(&mut std::io::stdout());
        }
        WireEvent::ToolCallBegin { tool_call } => {
            eprintln!("\n[tool] {}", tool_call.name);
        }
        WireEvent::ApprovalRequest {
            action,
            description,
            resolve,
        } => {
            eprintln!("\n[auto-approved] {action}: {description}");
            resolve.resolve(ApprovalDecision::Approve).await;
        }
        WireEvent::HumanInputRequest {
            question,
            default,
            resolve,
            ..
        } => {
            let answer = default.unwrap_or_default();
            eprintln!("\n[auto-answered] {question} -> {answer:?}");
            resolve.resolve(answer).await;
        }
        WireEvent::AsyncStarted { id, name, .. } => {
            eprintln!("\n[async {id}] {name} started");
        }
        WireEvent::AsyncTrigger { id, matched_line, .. } => {
            eprintln!("\n[async {id}] trigger matched: {matched_line}");
        }
        WireEvent::AsyncCompleted { id, success, .. } => {
            eprintln!("\n[async {id}] finished (success={success})");
        }
        _ => {}
    }
}

async fn handle_command(
    rest: &str,
    engine: &Engine,
    async_manager: &AsyncSubagentManager,
    work_dir: &Path,
) {
    let mut parts = rest.split_whitespace();
    match parts.next() {
        Some("reset") => match engine.runtime().context.revert_to(0) {
            Ok(()) => println!("conversation reset."),
            Err(e) => eprintln!("reset failed: {e}"),
        },
        Some("compact") => match engine.compact_now().await {
            Ok(()) => println!("history compacted."),
            Err(e) => eprintln!("compaction failed: {e}"),
        },
        Some("history") => {
            let limit: usize = parts.next().and_then(|n| n.parse().ok()).unwrap_or(20);
            print_history(engine, limit);
        }
        Some("async") => handle_async_command(parts, async_manager, work_dir).await,
        Some(other) => eprintln!("unknown command: /{other}"),
        None => eprintln!(
            "usage: /reset | /compact | /history [n] | /async list|status <id>|cancel <id>|result <id>|history [n|clear]"
        ),
    }
}

fn print_history(engine: &Engine, limit: usize) {
    let history = engine.runtime().context.history();
    let start = history.len().saturating_sub(limit);
    for message in &history[start..] {
        println!("{:?}: {}", message.role, message.content.as_text());
    }
}

async fn handle_async_command(
    mut parts: std::str::SplitWhitespace<'_>,
    manager: &AsyncSubagentManager,
    work_dir: &Path,
) {
    match parts.next() {
        Some("list") => {
            let active = manager.list();
            if active.is_empty() {
                println!("no active async subagents.");
            }
            for record in active {
                println!("{} [{}] {:?} - {}", record.id, record.name, record.status, record.prompt);
            }
        }
        Some("status") => {
            let Some(id) = parts.next() else {
                eprintln!("usage: /async status <id>");
                return;
            };
            match manager.get(id) {
                Some(record) => print_record(&record),
                None => println!("no such async subagent: {id}"),
            }
        }
        Some("cancel") => {
            let Some(id) = parts.next() else {
                eprintln!("usage: /async cancel <id>");
                return;
            };
            if manager.cancel(id).await {
                println!("cancelled {id}.");
            } else {
                println!("no live async subagent with id {id}.");
            }
        }
        Some("result") => {
            let Some(id) = parts.next() else {
                eprintln!("usage: /async result <id>");
                return;
            };
            if let Some(record) = manager.get(id) {
                match record.result {
                    Some(result) => println!("{result}"),
                    None => println!("(no result yet; status = {:?})", record.status),
                }
                return;
            }
            match AsyncSubagentPersistence::load_record(Some(work_dir), id).await {
                Some(record) => println!("{}", record.result.unwrap_or_else(|| "(no result)".to_string())),
                None => println!("no such async subagent: {id}"),
            }
        }
        Some("history") => match parts.next() {
            Some("clear") => {
                let n = AsyncSubagentPersistence::clear_history(Some(work_dir)).await;
                println!("cleared {n} persisted async subagent record(s).");
            }
            Some(n) => {
                let limit: usize = n.parse().unwrap_or(20);
                print_async_history(work_dir, limit).await;
            }
            None => print_async_history(work_dir, 20).await,
        },
        _ => eprintln!("usage: /async list|status <id>|cancel <id>|result <id>|history [n|clear]"),
    }
}

fn print_record(record: &AsyncSubagentRecord) {
    println!("{} [{}] {:?}", record.id, record.name, record.status);
    println!("  prompt: {}", record.prompt);
    if let Some(duration) = record.duration_ms {
        println!("  duration: {}", format_duration(duration));
    }
    if let Some(result) = &record.result {
        println!("  result: {result}");
    }
    if let Some(error) = &record.error {
        println!("  error: {error}");
    }
}

async fn print_async_history(work_dir: &Path, limit: usize) {
    let entries = AsyncSubagentPersistence::get_history(Some(work_dir), limit).await;
    if entries.is_empty() {
        println!("no persisted async subagent history.");
    }
    for entry in entries {
        let duration = entry.duration_ms.map(format_duration).unwrap_or_default();
        println!("{} [{}] {:?} {duration}", entry.id, entry.name, entry.status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_quit_matches_expected_tokens() {
        assert!(is_quit("quit"));
        assert!(is_quit("EXIT"));
        assert!(is_quit("/quit"));
        assert!(!is_quit("continue"));
    }
}
