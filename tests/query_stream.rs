#![cfg(unix)]

mod common;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use futures::StreamExt;

use claude_agent_bridge::error::{SdkError, StreamError};
use claude_agent_bridge::message::Message;
use claude_agent_bridge::{query, ClaudeAgentOptions, PromptMode, Query};

use common::{assistant, result, system_init, FakeCli};

#[test]
fn print_mode_yields_messages_in_order_then_none() {
    let cli = FakeCli::printing(&[system_init("abc"), result("4")]);
    let stream = query("2+2?", Some(cli.options())).expect("start query");
    assert!(!stream.is_streaming());

    match stream.pull() {
        Some(Message::System(system)) => assert!(system.is_init()),
        other => panic!("expected system init, got {other:?}"),
    }
    assert_eq!(stream.session_id().as_deref(), Some("abc"));

    match stream.pull() {
        Some(Message::Result(result)) => {
            assert_eq!(result.result.as_deref(), Some("4"));
            assert_eq!(result.num_turns, 1);
        }
        other => panic!("expected result, got {other:?}"),
    }
    assert_eq!(stream.session_id().as_deref(), Some("abc"));

    assert!(stream.pull().is_none());
    assert!(stream.is_finished());
    assert!(stream.error().is_none(), "unexpected error: {:?}", stream.error());
}

#[test]
fn silent_process_times_out() {
    let cli = FakeCli::new("exec sleep 30");
    let options = ClaudeAgentOptions {
        timeout: Some(Duration::from_secs(1)),
        ..cli.options()
    };
    let stream = query("hello", Some(options)).expect("start query");

    let started = Instant::now();
    assert!(stream.pull().is_none());
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert!(stream.is_finished());
    assert!(matches!(stream.error(), Some(StreamError::Timeout(_))));
}

#[test]
fn nonzero_exit_is_reported_with_stderr() {
    let cli = FakeCli::new("echo 'error: unknown option --frobnicate' >&2\nexit 3");
    let stream = query("hello", Some(cli.options())).expect("start query");

    assert!(stream.pull().is_none());
    match stream.error() {
        Some(StreamError::ProcessExit(err)) => {
            assert_eq!(err.exit_code(), Some(3));
            assert!(err.stderr().unwrap_or_default().contains("--frobnicate"));
        }
        other => panic!("expected process exit error, got {other:?}"),
    }
}

#[test]
fn missing_cli_fails_construction() {
    let options = ClaudeAgentOptions {
        cli_path: Some(PathBuf::from("/nonexistent/claude")),
        ..Default::default()
    };
    match query("hello", Some(options)) {
        Err(SdkError::CliNotFound(err)) => assert!(err.message().contains("/nonexistent/claude")),
        other => panic!("expected CliNotFound, got {other:?}"),
    }
}

#[test]
fn malformed_lines_are_skipped() {
    let cli = FakeCli::new(
        "echo 'not json at all'\n\
         echo '{\"no_type\": true}'\n\
         printf '%s\\n' '{\"type\":\"assistant\",\"message\":{\"model\":\"m\",\"content\":[{\"type\":\"text\",\"text\":\"ok\"}]}}'",
    );
    let stream = query("hello", Some(cli.options())).expect("start query");

    match stream.pull() {
        Some(Message::Assistant(message)) => assert_eq!(message.content.text(), "ok"),
        other => panic!("expected assistant message, got {other:?}"),
    }
    assert!(stream.pull().is_none());
    assert!(stream.error().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pending_pulls_resolve_in_registration_order() {
    let lines = [assistant("one"), assistant("two"), result("done")]
        .iter()
        .map(|line| format!("printf '%s\\n' '{line}'"))
        .collect::<Vec<_>>()
        .join("\n");
    let cli = FakeCli::new(&format!("sleep 0.3\n{lines}"));
    let stream = query("hello", Some(cli.options())).expect("start query");

    let first = stream.pull_async();
    let second = stream.pull_async();
    let third = stream.pull_async();
    let fourth = stream.pull_async();

    let texts: Vec<String> = [first.await, second.await]
        .into_iter()
        .map(|message| match message {
            Some(Message::Assistant(message)) => message.content.text(),
            other => panic!("expected assistant, got {other:?}"),
        })
        .collect();
    assert_eq!(texts, ["one", "two"]);
    assert!(matches!(third.await, Some(Message::Result(_))));
    assert!(fourth.await.is_none());
}

#[tokio::test]
async fn owning_stream_ends_after_result() {
    let cli = FakeCli::printing(&[system_init("s-1"), assistant("hi"), result("bye")]);
    let stream = Query::new(PromptMode::Text("hello".into()), cli.options()).expect("start query");

    let types: Vec<String> = stream
        .into_stream()
        .map(|message| message.message_type().to_string())
        .collect()
        .await;
    assert_eq!(types, ["system", "assistant", "result"]);
}

#[test]
fn stderr_lines_reach_callback() {
    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&seen);
    let cli = FakeCli::new("echo 'warming up' >&2");
    let options = ClaudeAgentOptions {
        stderr: Some(std::sync::Arc::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string());
        })),
        ..cli.options()
    };

    let stream = query("hello", Some(options)).expect("start query");
    assert!(stream.pull().is_none());
    assert_eq!(seen.lock().unwrap().as_slice(), ["warming up"]);
}
