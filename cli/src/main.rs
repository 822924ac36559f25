use clap::{Args, Parser, Subcommand};
use foundation_api::config::{
    BackoffConfig, DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_MS, DEFAULT_CONNECT_TIMEOUT_SECS,
    DEFAULT_REQUEST_TIMEOUT_SECS, Timeouts,
};
use foundation_api::types::{classification, security_context};
use foundation_api::{
    ApiConfig, ApiConnection, ApiError, EventFilter, EventType, MessageEvent, OutgoingMessage, SearchCriteria,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("message parts must be a JSON array")]
    PartsNotArray,
    #[error("io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("stream task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Parser, Debug)]
#[command(name = "foundation-bot", about = "Foundation API demo bot")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ConnectionArgs {
    #[arg(long, env = "FOUNDATION_HOST")]
    host: String,

    #[arg(long, env = "FOUNDATION_USERNAME")]
    username: String,

    #[arg(long, env = "FOUNDATION_PASSWORD", hide_env_values = true)]
    password: String,

    #[arg(long, env = "FOUNDATION_AGENT")]
    agent: String,

    #[arg(long, env = "FOUNDATION_REQUEST_TIMEOUT_SECS", default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    request_timeout_secs: u64,

    #[arg(long, env = "FOUNDATION_CONNECT_TIMEOUT_SECS", default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS)]
    connect_timeout_secs: u64,

    #[arg(long, env = "FOUNDATION_BACKOFF_BASE_MS", default_value_t = DEFAULT_BACKOFF_BASE_MS)]
    backoff_base_ms: u64,

    #[arg(long, env = "FOUNDATION_BACKOFF_MAX_MS", default_value_t = DEFAULT_BACKOFF_MAX_MS)]
    backoff_max_ms: u64,

    #[arg(long, env = "FOUNDATION_REAUTHENTICATE", default_value_t = false)]
    reauthenticate: bool,
}

impl ConnectionArgs {
    fn into_config(self) -> ApiConfig {
        ApiConfig::new(self.host, self.username, self.password, self.agent)
            .with_timeouts(Timeouts {
                request_secs: self.request_timeout_secs,
                connect_secs: self.connect_timeout_secs,
            })
            .with_backoff(BackoffConfig {
                base_ms: self.backoff_base_ms,
                max_ms: self.backoff_max_ms,
            })
            .with_reauthenticate(self.reauthenticate)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Authenticate and print the session token.
    Token,
    /// Print recent messages from a channel.
    Messages {
        channel: String,
        #[arg(long, default_value_t = 10)]
        count: u32,
        #[arg(long, help = "Message token to page back from")]
        before: Option<String>,
    },
    /// Send a plain text message, or a story when --subject is given.
    Send {
        channel: String,
        text: String,
        #[arg(long, default_value_t = false)]
        alert: bool,
        #[arg(long)]
        subject: Option<String>,
        #[command(flatten)]
        marking: MarkingArgs,
    },
    /// Send message parts given as a JSON array.
    Parts {
        channel: String,
        #[arg(long)]
        data: String,
        #[arg(long, default_value_t = false)]
        alert: bool,
        #[command(flatten)]
        marking: MarkingArgs,
    },
    /// Search channel history.
    Search(SearchArgs),
    /// Set or clear the composing indicator.
    Composing {
        channel: String,
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        on: bool,
    },
    /// List the channels the agent is provisioned for.
    Channels,
    Channel {
        channel: String,
    },
    State {
        channel: String,
    },
    /// Print the agent's metadata.
    Metadata,
    /// Print events until interrupted.
    Stream(StreamArgs),
    /// Reply to every message on a channel until interrupted.
    Echo {
        channel: String,
    },
}

#[derive(Args, Debug)]
struct MarkingArgs {
    #[arg(long, help = "Classification token")]
    classification: Option<String>,

    #[arg(long = "security-context", help = "Security context id (repeatable)")]
    security_contexts: Vec<String>,
}

impl MarkingArgs {
    fn apply(self, message: OutgoingMessage) -> OutgoingMessage {
        let message = match self.classification {
            Some(token) => message.with_classification(classification(token)),
            None => message,
        };
        if self.security_contexts.is_empty() {
            return message;
        }
        message.with_security_contexts(self.security_contexts.into_iter().map(security_context).collect())
    }
}

#[derive(Args, Debug)]
struct SearchArgs {
    #[arg(required = true, value_delimiter = ',')]
    channels: Vec<String>,

    #[arg(long, default_value = "")]
    term: String,

    #[arg(long, default_value_t = foundation_api::types::DEFAULT_SEARCH_LIMIT)]
    limit: u32,

    #[arg(long, default_value_t = false)]
    match_case: bool,

    #[arg(long, default_value_t = false)]
    match_exact: bool,

    #[arg(long, default_value_t = false)]
    match_all: bool,

    #[arg(long, conflicts_with_all = ["from", "days_back"])]
    on: Option<String>,

    #[arg(long, requires = "to", conflicts_with = "days_back")]
    from: Option<String>,

    #[arg(long, requires = "from")]
    to: Option<String>,

    #[arg(long)]
    days_back: Option<u32>,
}

impl SearchArgs {
    fn into_criteria(self) -> SearchCriteria {
        let criteria = SearchCriteria::new(self.term, self.channels)
            .with_limit(self.limit)
            .with_matching(self.match_case, self.match_exact, self.match_all);
        match (self.on, self.from, self.to, self.days_back) {
            (Some(on), ..) => criteria.on_date(on),
            (None, Some(from), Some(to), _) => criteria.between(from, to),
            (None, _, _, Some(days)) => criteria.days_back(days),
            _ => criteria,
        }
    }
}

#[derive(Args, Debug)]
struct StreamArgs {
    #[arg(value_delimiter = ',')]
    channels: Vec<String>,

    #[arg(long, value_delimiter = ',', default_value = "message")]
    types: Vec<EventType>,

    #[arg(long, default_value = "")]
    regex: String,

    #[arg(long, default_value = "remote")]
    origins: Option<String>,
}

impl StreamArgs {
    fn into_filter(self) -> EventFilter {
        EventFilter {
            types: self.types,
            channels: self.channels,
            regex: self.regex,
            origins: self.origins.filter(|o| !o.is_empty()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let conn = ApiConnection::new(cli.connection.into_config())?;

    match cli.command {
        Command::Token => {
            let token = conn.authenticate().await?;
            println!("{token}");
            Ok(())
        }
        Command::Messages { channel, count, before } => {
            let messages = match before {
                Some(before) => conn.get_messages_before(&channel, count, &before).await?,
                None => conn.get_messages(&channel, count).await?,
            };
            print_json(&serde_json::to_value(messages)?)
        }
        Command::Send { channel, text, alert, subject, marking } => {
            let message = OutgoingMessage::text(text).with_alert(alert);
            let message = match subject {
                Some(subject) => message.with_subject(subject),
                None => message,
            };
            conn.send_outgoing(&channel, &marking.apply(message)).await?;
            println!("sent");
            Ok(())
        }
        Command::Parts { channel, data, alert, marking } => {
            let parts = parse_parts(&data)?;
            let message = OutgoingMessage::parts(&parts)?.with_alert(alert);
            conn.send_outgoing(&channel, &marking.apply(message)).await?;
            println!("sent {} parts", parts.len());
            Ok(())
        }
        Command::Search(args) => {
            let results = conn.search_channels(&args.into_criteria()).await?;
            print_json(&serde_json::to_value(results)?)
        }
        Command::Composing { channel, on } => {
            conn.update_channel_agent_state(&channel, on).await?;
            Ok(())
        }
        Command::Channels => print_json(&serde_json::to_value(conn.get_channels().await?)?),
        Command::Channel { channel } => print_json(&serde_json::to_value(conn.get_channel(&channel).await?)?),
        Command::State { channel } => print_json(&serde_json::to_value(conn.get_channel_state(&channel).await?)?),
        Command::Metadata => print_json(&serde_json::to_value(conn.get_metadata().await?)?),
        Command::Stream(args) => run_stream(&conn, args.into_filter()).await,
        Command::Echo { channel } => run_echo(&conn, &channel).await,
    }
}

async fn run_stream(conn: &ApiConnection, filter: EventFilter) -> Result<(), CliError> {
    conn.start_streaming_filtered(filter, |event| match serde_json::to_string(&event) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, event_id = event.event_id, "failed to render event"),
    })?;

    tokio::signal::ctrl_c().await?;
    shutdown(conn).await
}

async fn run_echo(conn: &ApiConnection, channel: &str) -> Result<(), CliError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<MessageEvent>();
    conn.start_streaming(channel, move |event| {
        if let Some(message) = event.as_message() {
            if tx.send(message).is_err() {
                warn!(event_id = event.event_id, "echo receiver dropped");
            }
        }
    })?;
    info!(channel, "echo bot listening");

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            result = &mut interrupt => {
                result?;
                break;
            }
            Some(message) = rx.recv() => {
                if let Err(e) = reply(conn, &message).await {
                    warn!(error = %e, code = e.error_code(), channel = %message.channel_id, "echo reply failed");
                }
            }
        }
    }

    shutdown(conn).await
}

async fn reply(conn: &ApiConnection, message: &MessageEvent) -> Result<(), ApiError> {
    let Some(content) = message.content.as_deref() else {
        return Ok(());
    };
    conn.update_channel_agent_state(&message.channel_id, true).await?;
    let sent = conn
        .send_message(&message.channel_id, &format!("You said: {content}"), false)
        .await;
    conn.update_channel_agent_state(&message.channel_id, false).await?;
    sent
}

async fn shutdown(conn: &ApiConnection) -> Result<(), CliError> {
    if let Some(task) = conn.stop_streaming() {
        task.await?;
    }
    info!(last_event = conn.last_event_id(), "stream stopped");
    Ok(())
}

fn parse_parts(data: &str) -> Result<Vec<Value>, CliError> {
    match serde_json::from_str::<Value>(data)? {
        Value::Array(parts) => Ok(parts),
        _ => Err(CliError::PartsNotArray),
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
