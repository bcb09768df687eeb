//! Line-oriented console on stdin.
//!
//! A line starting with `{` is an event to enqueue:
//! `{"kind":"declaration","action":"create","payload":{...}}`.
//! Anything else is an admin command; every reply is one JSON line.

use customs_sync_outbox::{
    EventAction, EventId, EventKind, EventStatus, OutboxError, SyncOutbox,
};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Events returned by `list` when no limit is given.
const DEFAULT_LIST_LIMIT: usize = 50;

const HELP: &[&str] = &[
    "{\"kind\":..,\"action\":..,\"payload\":..}  enqueue an event",
    "stats",
    "list [status] [limit]",
    "retry <id>",
    "remove <id>",
    "clear [status]",
    "drain",
    "start",
    "stop",
];

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command: {0} (try `help`)")]
    Unknown(String),

    #[error("missing argument for {0}")]
    MissingArgument(&'static str),

    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),

    #[error("invalid event: {0}")]
    InvalidEvent(#[from] serde_json::Error),

    #[error(transparent)]
    Outbox(#[from] OutboxError),
}

#[derive(Debug, Deserialize)]
struct EnqueueRequest {
    kind: EventKind,
    action: EventAction,
    #[serde(default)]
    payload: Value,
}

/// A parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Enqueue {
        kind: EventKind,
        action: EventAction,
        payload: Value,
    },
    Stats,
    List {
        status: Option<EventStatus>,
        limit: usize,
    },
    Retry(EventId),
    Remove(EventId),
    Clear(Option<EventStatus>),
    Drain,
    Start,
    Stop,
    Help,
}

impl ConsoleCommand {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        if line.starts_with('{') {
            let request: EnqueueRequest = serde_json::from_str(line)?;
            return Ok(Some(ConsoleCommand::Enqueue {
                kind: request.kind,
                action: request.action,
                payload: request.payload,
            }));
        }

        let mut words = line.split_whitespace();
        let name = words.next().unwrap_or_default().to_lowercase();
        let args: Vec<&str> = words.collect();

        let command = match name.as_str() {
            "stats" => ConsoleCommand::Stats,
            "list" => parse_list(&args)?,
            "retry" => ConsoleCommand::Retry(id_arg(&args, "retry")?),
            "remove" => ConsoleCommand::Remove(id_arg(&args, "remove")?),
            "clear" => ConsoleCommand::Clear(match args.first() {
                Some(s) => Some(s.parse()?),
                None => None,
            }),
            "drain" => ConsoleCommand::Drain,
            "start" => ConsoleCommand::Start,
            "stop" => ConsoleCommand::Stop,
            "help" | "?" => ConsoleCommand::Help,
            _ => return Err(CommandError::Unknown(name)),
        };
        Ok(Some(command))
    }

    /// Run the command against `outbox` and build the JSON reply.
    pub async fn execute(self, outbox: &SyncOutbox) -> Result<Value, CommandError> {
        let reply = match self {
            ConsoleCommand::Enqueue {
                kind,
                action,
                payload,
            } => {
                let id = outbox.enqueue(kind, action, payload);
                json!({ "eventId": id })
            }
            ConsoleCommand::Stats => serde_json::to_value(outbox.stats())?,
            ConsoleCommand::List { status, limit } => {
                serde_json::to_value(outbox.list(status, limit))?
            }
            ConsoleCommand::Retry(id) => json!({ "eventId": id, "retried": outbox.retry(&id) }),
            ConsoleCommand::Remove(id) => json!({ "eventId": id, "removed": outbox.remove(&id) }),
            ConsoleCommand::Clear(status) => json!({ "cleared": outbox.clear(status) }),
            ConsoleCommand::Drain => match outbox.drain_now().await {
                Some(summary) => serde_json::to_value(summary)?,
                None => json!({ "drained": false }),
            },
            ConsoleCommand::Start => json!({ "started": outbox.start() }),
            ConsoleCommand::Stop => json!({ "stopped": outbox.stop() }),
            ConsoleCommand::Help => json!({ "commands": HELP }),
        };
        Ok(reply)
    }
}

fn parse_list(args: &[&str]) -> Result<ConsoleCommand, CommandError> {
    let mut status = None;
    let mut limit = DEFAULT_LIST_LIMIT;

    for arg in args {
        if let Ok(n) = arg.parse::<usize>() {
            limit = n;
        } else if status.is_none() {
            status = Some(arg.parse()?);
        } else {
            return Err(CommandError::UnexpectedArgument(arg.to_string()));
        }
    }

    Ok(ConsoleCommand::List { status, limit })
}

fn id_arg(args: &[&str], command: &'static str) -> Result<EventId, CommandError> {
    args.first()
        .map(|id| EventId::from(*id))
        .ok_or(CommandError::MissingArgument(command))
}
