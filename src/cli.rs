use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::agents::{AgentError, AgentResult, ChatService, TurnChunk};
use crate::config::HostingBackend;

/// Real-estate analyst agents: chat, bootstrap or serve
#[derive(Parser, Debug, Clone)]
#[command(name = "real-analyst", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "REAL_ANALYST_CONFIG", default_value = "real-analyst.toml")]
    pub config: PathBuf,

    /// REST server host address
    #[arg(long, env = "REAL_ANALYST_HOST")]
    pub host: Option<String>,

    /// REST server port
    #[arg(long, env = "REAL_ANALYST_PORT")]
    pub port: Option<u16>,

    /// Agent hosting backend
    #[arg(long, env = "REAL_ANALYST_BACKEND", value_enum)]
    pub backend: Option<HostingBackend>,

    /// Tool-call rounds allowed per turn
    #[arg(long, env = "REAL_ANALYST_MAX_TOOL_ROUNDS")]
    pub max_tool_rounds: Option<u32>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Interactive chat (default)
    Chat,
    /// Create or update the configured agents, then exit
    Bootstrap,
    /// Run the REST layer
    Serve,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Chat)
    }
}

pub const HELP: &str = "\
Commands:
  new [name]          start a new thread and switch to it
  ls                  list threads (* marks the current one)
  switch <name>       switch to another thread
  history             show the current thread's messages
  delete [name | -A]  delete the current or named thread, or all threads
  upload <path>...    index documents for the document agent
  help                show this help
  quit | exit         leave
Anything else is sent to the current thread.";

/// One line of REPL input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    New(Option<String>),
    List,
    Switch(String),
    History,
    Delete(Option<String>),
    DeleteAll,
    Upload(Vec<PathBuf>),
    Help,
    Quit,
    Message(String),
    Empty,
}

impl ReplCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Ok(ReplCommand::Empty);
        };
        let args: Vec<&str> = words.collect();

        let command = match (head, args.as_slice()) {
            ("new", []) => ReplCommand::New(None),
            ("new", [name]) => ReplCommand::New(Some(name.to_string())),
            ("ls", []) => ReplCommand::List,
            ("switch", [name]) => ReplCommand::Switch(name.to_string()),
            ("switch", _) => return Err("usage: switch <name>".to_string()),
            ("history", []) => ReplCommand::History,
            ("delete", []) => ReplCommand::Delete(None),
            ("delete", ["-A"]) => ReplCommand::DeleteAll,
            ("delete", [name]) => ReplCommand::Delete(Some(name.to_string())),
            ("delete", _) => return Err("usage: delete [name | -A]".to_string()),
            ("upload", []) => return Err("usage: upload <path>...".to_string()),
            ("upload", paths) => ReplCommand::Upload(paths.iter().map(PathBuf::from).collect()),
            ("help", []) => ReplCommand::Help,
            ("quit" | "exit", []) => ReplCommand::Quit,
            _ => ReplCommand::Message(line.to_string()),
        };
        Ok(command)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Interactive shell over a [`ChatService`]
pub struct Repl {
    service: Arc<ChatService>,
    current: String,
}

impl Repl {
    /// Start on a fresh thread
    pub async fn start(service: Arc<ChatService>) -> AgentResult<Self> {
        let thread = service.new_thread().await?;
        Ok(Self {
            service,
            current: thread.name,
        })
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    /// Read commands from stdin until `quit` or end of input
    pub async fn run(&mut self) -> AgentResult<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = std::io::stdout();

        writeln!(stdout, "Type 'help' for commands.")?;
        loop {
            write!(stdout, "[{}]> ", self.current)?;
            stdout.flush()?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let command = match ReplCommand::parse(&line) {
                Ok(command) => command,
                Err(usage) => {
                    writeln!(stdout, "{}", usage)?;
                    continue;
                }
            };

            match self.execute(command, &mut stdout).await {
                Ok(Flow::Quit) => break,
                Ok(Flow::Continue) => {}
                // the thread stays usable after a failed command
                Err(e) => writeln!(stdout, "Error: {}", e)?,
            }
        }
        Ok(())
    }

    pub async fn execute<W: Write + Send>(&mut self, command: ReplCommand, out: &mut W) -> AgentResult<Flow> {
        match command {
            ReplCommand::Empty => {}
            ReplCommand::Help => writeln!(out, "{}", HELP)?,
            ReplCommand::Quit => return Ok(Flow::Quit),
            ReplCommand::New(name) => {
                let thread = match name {
                    Some(name) => self.service.create_thread(&name).await?,
                    None => self.service.new_thread().await?,
                };
                self.current = thread.name;
                writeln!(out, "Switched to new thread '{}'", self.current)?;
            }
            ReplCommand::List => {
                for thread in self.service.list_threads().await {
                    let marker = if thread.name == self.current { "*" } else { " " };
                    writeln!(out, "{} {} ({} messages)", marker, thread.name, thread.message_count)?;
                }
            }
            ReplCommand::Switch(name) => {
                self.service.history(&name).await?;
                self.current = name;
                writeln!(out, "Switched to thread '{}'", self.current)?;
            }
            ReplCommand::History => {
                for line in self.service.history_lines(&self.current).await? {
                    writeln!(out, "{}", line)?;
                }
            }
            ReplCommand::Delete(None) => self.delete_current(out).await?,
            ReplCommand::Delete(Some(name)) if name == self.current => self.delete_current(out).await?,
            ReplCommand::Delete(Some(name)) => {
                self.service.delete_thread(&name).await?;
                writeln!(out, "Deleted thread '{}'", name)?;
            }
            ReplCommand::DeleteAll => {
                let deleted = self.service.delete_all().await?;
                self.current = self.service.new_thread().await?.name;
                writeln!(out, "Deleted {} threads; now on '{}'", deleted, self.current)?;
            }
            ReplCommand::Upload(paths) => self.upload(paths, out).await?,
            ReplCommand::Message(text) => self.send(&text, out).await?,
        }
        Ok(Flow::Continue)
    }

    /// Delete the current thread and move to the next one, or a fresh thread
    async fn delete_current<W: Write + Send>(&mut self, out: &mut W) -> AgentResult<()> {
        let before = self.service.list_threads().await;
        let position = before.iter().position(|t| t.name == self.current).unwrap_or(0);

        self.service.delete_thread(&self.current).await?;
        writeln!(out, "Deleted thread '{}'", self.current)?;

        let remaining = self.service.list_threads().await;
        self.current = match remaining.get(position).or_else(|| remaining.last()) {
            Some(next) => next.name.clone(),
            None => self.service.new_thread().await?.name,
        };
        writeln!(out, "Switched to thread '{}'", self.current)?;
        Ok(())
    }

    async fn upload<W: Write + Send>(&mut self, paths: Vec<PathBuf>, out: &mut W) -> AgentResult<()> {
        let mut files = Vec::with_capacity(paths.len());
        for path in &paths {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| AgentError::Validation(format!("'{}' is not a file path", path.display())))?;
            crate::agents::indexer::check_format(name)?;
            files.push((tokio::fs::read(path).await?, name.to_string()));
        }

        let handles = self.service.replace_documents(files).await?;
        if let Some(first) = handles.first() {
            writeln!(out, "Indexed {} file(s) into '{}'", handles.len(), first.index_id)?;
        }
        Ok(())
    }

    /// Stream one turn, showing tool activity inline
    async fn send<W: Write + Send>(&mut self, text: &str, out: &mut W) -> AgentResult<()> {
        let mut stream = self.service.stream_message(&self.current, text).await?;

        while let Some(item) = stream.next().await {
            match item? {
                TurnChunk::Text { content } => {
                    write!(out, "{}", content)?;
                    out.flush()?;
                }
                TurnChunk::ToolCall { name, arguments, .. } => writeln!(out, "\n-> {} {}", name, arguments)?,
                TurnChunk::ToolResult { name, success, error, .. } => match error {
                    Some(error) if !success => writeln!(out, "<- {} failed: {}", name, error)?,
                    _ => writeln!(out, "<- {} done", name)?,
                },
                TurnChunk::Complete { .. } => writeln!(out)?,
                TurnChunk::Error { message } => return Err(AgentError::Internal(message)),
                TurnChunk::Status { .. } => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["real-analyst"]);
        assert_eq!(cli.config, PathBuf::from("real-analyst.toml"));
        assert!(cli.host.is_none());
        assert!(cli.backend.is_none());
        assert_eq!(cli.command(), Command::Chat);
    }

    #[test]
    fn test_cli_with_args() {
        let cli = Cli::parse_from([
            "real-analyst",
            "--config",
            "custom.toml",
            "--port",
            "8080",
            "--backend",
            "in-memory",
            "--max-tool-rounds",
            "4",
            "serve",
        ]);
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert_eq!(cli.port, Some(8080));
        assert_eq!(cli.backend, Some(HostingBackend::InMemory));
        assert_eq!(cli.max_tool_rounds, Some(4));
        assert_eq!(cli.command(), Command::Serve);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(ReplCommand::parse("  "), Ok(ReplCommand::Empty));
        assert_eq!(ReplCommand::parse("new"), Ok(ReplCommand::New(None)));
        assert_eq!(ReplCommand::parse("ls"), Ok(ReplCommand::List));
        assert_eq!(ReplCommand::parse("switch deal-123"), Ok(ReplCommand::Switch("deal-123".into())));
        assert!(ReplCommand::parse("switch").is_err());
        assert_eq!(ReplCommand::parse("delete"), Ok(ReplCommand::Delete(None)));
        assert_eq!(ReplCommand::parse("delete -A"), Ok(ReplCommand::DeleteAll));
        assert_eq!(ReplCommand::parse("delete t2"), Ok(ReplCommand::Delete(Some("t2".into()))));
        assert_eq!(
            ReplCommand::parse("upload a.pdf b.txt"),
            Ok(ReplCommand::Upload(vec![PathBuf::from("a.pdf"), PathBuf::from("b.txt")]))
        );
        assert_eq!(ReplCommand::parse("exit"), Ok(ReplCommand::Quit));
    }

    #[test]
    fn test_free_text_is_a_message() {
        assert_eq!(
            ReplCommand::parse("new zoning rules for 12 Oak St?"),
            Ok(ReplCommand::Message("new zoning rules for 12 Oak St?".into()))
        );
        assert_eq!(
            ReplCommand::parse("What is the cap rate?"),
            Ok(ReplCommand::Message("What is the cap rate?".into()))
        );
    }
}
