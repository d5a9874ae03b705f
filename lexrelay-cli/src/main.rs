//! lexrelay-cli: terminal client for a running Lexrelay server
//!
//! Streams an answer from `POST /api/chat-messages` and prints it as it
//! arrives. Useful for poking at the relay without the web frontend.
//!
//! # Subcommands
//! - `chat <query> [--conversation-id <id>] [--user <u>] [--raw]` — ask a question
//! - `stop <task_id> [--user <u>]`                                — stop an answer
//! - `status`                                                     — show server health

use std::io::{BufRead, BufReader, Write};
use std::time::Duration;

use clap::{Parser, Subcommand};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8787";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "lexrelay-cli",
    version,
    about = "Terminal client for the Lexrelay chat relay"
)]
struct Cli {
    /// Lexrelay server URL (overrides LEXRELAY_HTTP_URL env var)
    #[arg(long, env = "LEXRELAY_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ask a question and stream the answer
    Chat {
        /// Question text
        query: String,

        /// Continue an existing conversation
        #[arg(long)]
        conversation_id: Option<String>,

        /// User identifier forwarded upstream
        #[arg(long)]
        user: Option<String>,

        /// Print every SSE payload verbatim instead of the answer text
        #[arg(long)]
        raw: bool,
    },

    /// Stop an in-flight answer
    Stop {
        /// Task id from the streamed frames
        task_id: String,

        /// User identifier that started the task
        #[arg(long)]
        user: Option<String>,
    },

    /// Show Lexrelay server status
    Status,
}

// ============================================================================
// Stream rendering
// ============================================================================

/// What to do with one line of the relay's SSE output.
#[derive(Debug, PartialEq)]
pub enum Rendered {
    /// Answer text to print (no newline added)
    Text(String),
    /// Relay reported a failure
    Error(String),
    /// `[DONE]`
    Done,
    Nothing,
}

/// Identifiers picked up from frames while streaming.
#[derive(Debug, Default)]
pub struct Transcript {
    pub conversation_id: Option<String>,
    pub task_id: Option<String>,
}

impl Transcript {
    fn observe(&mut self, frame: &serde_json::Value) {
        if let Some(c) = frame["conversation_id"].as_str() {
            self.conversation_id = Some(c.to_string());
        }
        if let Some(t) = frame["task_id"].as_str() {
            self.task_id = Some(t.to_string());
        }
    }
}

/// Interpret one SSE line. With `raw`, every data payload is printed as-is.
pub fn render_line(line: &str, raw: bool, transcript: &mut Transcript) -> Rendered {
    let Some(payload) = line.strip_prefix("data: ") else {
        return Rendered::Nothing;
    };

    if payload == "[DONE]" {
        return Rendered::Done;
    }

    let frame: serde_json::Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(_) => {
            return if raw {
                Rendered::Text(format!("{}\n", payload))
            } else {
                Rendered::Nothing
            };
        }
    };

    transcript.observe(&frame);

    if let Some(err) = frame["error"].as_str() {
        return Rendered::Error(err.to_string());
    }

    if raw {
        return Rendered::Text(format!("{}\n", payload));
    }

    let text = match frame["event"].as_str().unwrap_or("") {
        "message" | "agent_message" => frame["answer"].as_str(),
        "workflow_finished" => frame["data"]["outputs"]["answer"].as_str(),
        _ => None,
    };

    match text {
        Some(t) if !t.is_empty() => Rendered::Text(t.to_string()),
        _ => Rendered::Nothing,
    }
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn do_chat(
    server: &str,
    query: &str,
    conversation_id: Option<String>,
    user: Option<String>,
    raw: bool,
) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(600))
        .build()?;

    let url = format!("{}/api/chat-messages", server);
    let mut body = serde_json::json!({ "query": query });
    if let Some(c) = conversation_id {
        body["conversation_id"] = serde_json::json!(c);
    }
    if let Some(u) = user {
        body["user"] = serde_json::json!(u);
    }

    let resp = match client.post(&url).json(&body).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("lexrelay-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        eprintln!("lexrelay-cli: server returned {}: {}", status, body);
        std::process::exit(1);
    }

    let mut transcript = Transcript::default();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    for line in BufReader::new(resp).lines() {
        match render_line(&line?, raw, &mut transcript) {
            Rendered::Text(t) => {
                out.write_all(t.as_bytes())?;
                out.flush()?;
            }
            Rendered::Error(e) => {
                writeln!(out)?;
                eprintln!("lexrelay-cli: relay error: {}", e);
                std::process::exit(1);
            }
            Rendered::Done => break,
            Rendered::Nothing => {}
        }
    }

    if !raw {
        writeln!(out)?;
    }
    if let Some(c) = &transcript.conversation_id {
        eprintln!("conversation: {}", c);
    }

    Ok(())
}

fn do_stop(server: &str, task_id: &str, user: Option<String>) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let url = format!("{}/api/chat-messages/{}/stop", server, task_id);
    let body = match user {
        Some(u) => serde_json::json!({ "user": u }),
        None => serde_json::json!({}),
    };

    let resp = client.post(&url).json(&body).send()?;
    let status = resp.status();
    let body: serde_json::Value = resp.json().unwrap_or_default();

    if !status.is_success() {
        eprintln!(
            "lexrelay-cli: stop failed (HTTP {}): {}",
            status,
            body["error"].as_str().unwrap_or("unknown error")
        );
        std::process::exit(1);
    }

    println!("Stopped task {}: {}", task_id, body["result"].as_str().unwrap_or("ok"));
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let url = format!("{}/health", server);
    let resp = client.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Lexrelay server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:         {}", body["version"].as_str().unwrap_or("?"));
            println!("Upstream:        {}", body["upstream"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            let status = r.status();
            let body: serde_json::Value = r.json().unwrap_or_default();
            eprintln!(
                "lexrelay-cli: server unhealthy (HTTP {}): {}",
                status,
                body["error"].as_str().unwrap_or("?")
            );
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("lexrelay-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Chat {
            query,
            conversation_id,
            user,
            raw,
        } => do_chat(&server, &query, conversation_id, user, raw),
        Commands::Stop { task_id, user } => do_stop(&server, &task_id, user),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("lexrelay-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_answer_rendered() {
        let mut t = Transcript::default();
        let r = render_line(
            r#"data: {"event":"message","id":"m1","answer":"Under the Labor Contract Law","conversation_id":"c1","task_id":"t1"}"#,
            false,
            &mut t,
        );
        assert_eq!(r, Rendered::Text("Under the Labor Contract Law".to_string()));
        assert_eq!(t.conversation_id.as_deref(), Some("c1"));
        assert_eq!(t.task_id.as_deref(), Some("t1"));
    }

    #[test]
    fn test_workflow_finished_answer_rendered() {
        let mut t = Transcript::default();
        let r = render_line(
            r#"data: {"event":"workflow_finished","data":{"outputs":{"answer":"Full answer"}}}"#,
            false,
            &mut t,
        );
        assert_eq!(r, Rendered::Text("Full answer".to_string()));
    }

    #[test]
    fn test_done_and_noise() {
        let mut t = Transcript::default();
        assert_eq!(render_line("data: [DONE]", false, &mut t), Rendered::Done);
        assert_eq!(render_line("", false, &mut t), Rendered::Nothing);
        assert_eq!(
            render_line(r#"data: {"event":"workflow_started"}"#, false, &mut t),
            Rendered::Nothing
        );
        assert_eq!(render_line("data: {broken", false, &mut t), Rendered::Nothing);
    }

    #[test]
    fn test_error_frame_detected() {
        let mut t = Transcript::default();
        let r = render_line(r#"data: {"error":"API error (500): boom"}"#, false, &mut t);
        assert_eq!(r, Rendered::Error("API error (500): boom".to_string()));
    }

    #[test]
    fn test_raw_mode_prints_payload() {
        let mut t = Transcript::default();
        let r = render_line(r#"data: {"event":"node_started"}"#, true, &mut t);
        assert_eq!(r, Rendered::Text("{\"event\":\"node_started\"}\n".to_string()));
    }
}
