use super::*;
use clap::CommandFactory;

const CONNECTION: [&str; 9] = [
    "foundation-bot",
    "--host",
    "https://foundation.example.test/",
    "--username",
    "bot",
    "--password",
    "secret",
    "--agent",
    "agent-1",
];

fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(CONNECTION.iter().chain(args)).unwrap()
}

#[test]
fn command_definition_is_valid() {
    Cli::command().debug_assert();
}

#[test]
fn connection_args_build_config() {
    let cli = parse(&["--backoff-base-ms", "5", "--reauthenticate", "token"]);
    let config = cli.connection.into_config();
    assert_eq!(config.host, "https://foundation.example.test");
    assert_eq!(config.agent, "agent-1");
    assert_eq!(config.backoff.base_ms, 5);
    assert_eq!(config.backoff.max_ms, DEFAULT_BACKOFF_MAX_MS);
    assert_eq!(config.timeouts.request_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
    assert!(config.reauthenticate_on_unauthorized);
}

#[test]
fn messages_defaults() {
    let cli = parse(&["messages", "chat-1"]);
    match cli.command {
        Command::Messages { channel, count, before } => {
            assert_eq!(channel, "chat-1");
            assert_eq!(count, 10);
            assert!(before.is_none());
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn stream_args_default_to_remote_messages() {
    let cli = parse(&["stream", "chat-1,chat-2"]);
    let Command::Stream(args) = cli.command else {
        panic!("expected stream command");
    };
    let filter = args.into_filter();
    assert_eq!(filter.types, vec![EventType::Message]);
    assert_eq!(filter.channels, vec!["chat-1".to_owned(), "chat-2".to_owned()]);
    assert_eq!(filter.origins.as_deref(), Some("remote"));
}

#[test]
fn stream_args_parse_types_and_clear_origins() {
    let cli = parse(&["stream", "--types", "meta-data,channel-state", "--origins", ""]);
    let Command::Stream(args) = cli.command else {
        panic!("expected stream command");
    };
    let filter = args.into_filter();
    assert_eq!(filter.types, vec![EventType::MetaData, EventType::ChannelState]);
    assert!(filter.channels.is_empty());
    assert!(filter.origins.is_none());
}

#[test]
fn stream_rejects_unknown_event_type() {
    let result = Cli::try_parse_from(CONNECTION.iter().chain(&["stream", "--types", "presence"]));
    assert!(result.is_err());
}

#[test]
fn parts_must_be_an_array() {
    let parts = parse_parts(r##"[{"Text":"hi"},{"Hashtag":"#x"}]"##).unwrap();
    assert_eq!(parts.len(), 2);
    assert!(matches!(parse_parts(r#"{"Text":"hi"}"#), Err(CliError::PartsNotArray)));
    assert!(matches!(parse_parts("not json"), Err(CliError::InvalidJson(_))));
}

#[test]
fn search_args_build_criteria() {
    let cli = parse(&["search", "chat-1,chat-2", "--term", "outage", "--days-back", "7", "--match-all"]);
    let Command::Search(args) = cli.command else {
        panic!("expected search command");
    };
    let criteria = args.into_criteria();
    assert_eq!(criteria.search_term, "outage");
    assert_eq!(criteria.channel_ids, vec!["chat-1".to_owned(), "chat-2".to_owned()]);
    assert_eq!(criteria.days_back, Some(7));
    assert!(criteria.match_all);
    assert!(criteria.on_date.is_none());
}

#[test]
fn search_rejects_conflicting_windows() {
    let result = Cli::try_parse_from(CONNECTION.iter().chain(&["search", "chat-1", "--on", "2024-01-01", "--days-back", "2"]));
    assert!(result.is_err());
}

#[test]
fn marking_args_attach_classification_and_contexts() {
    let cli = parse(&["send", "chat-1", "hi", "--classification", "primary.us", "--security-context", "ODD", "--security-context", "coi1"]);
    let Command::Send { marking, .. } = cli.command else {
        panic!("expected send command");
    };
    let message = marking.apply(OutgoingMessage::text("hi"));
    assert_eq!(message.classification, Some(classification("primary.us")));
    assert_eq!(message.security_contexts, Some(vec![security_context("ODD"), security_context("coi1")]));
}
