//! End-to-end session behavior against a scripted transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;

use common::*;
use runweave::config::{ClientConfig, Section, DEFAULT_STREAM_MODES};
use runweave::error::RunweaveError;
use runweave::run::{CancelClient, CancelOutcome, CancelResponse};
use runweave::session::Session;
use runweave::threads::{ThreadDirectory, ThreadOpen};
use runweave::types::{MessageSource, RunMeta, TransportEvent};

async fn settle(session: &mut runweave::session::Session) -> Vec<CancelOutcome> {
    let mut outcomes = Vec::new();
    for handle in session.take_pending_cancels() {
        outcomes.push(handle.await.expect("cancel task"));
    }
    outcomes
}

#[tokio::test]
async fn full_run_builds_transcript_tools_stage_and_sources() {
    let transport = ScriptedTransport::new();
    let cancel = RecordingCancel::new();
    let user = json!({"id": "u1", "type": "human", "content": "Plan the rollout"});
    transport.queue(vec![
        created("r1", "t1"),
        TransportEvent::ThreadAssigned {
            thread_id: "t1".into(),
        },
        messages(vec![
            user.clone(),
            json!({"id": "a1", "type": "ai", "content": "Working",
                   "tool_call_chunks": [{"id": "c1", "name": "search", "args": "{\"q\":"}]}),
        ]),
        messages(vec![
            user.clone(),
            json!({"id": "a1", "type": "ai", "content": "Working on it",
                   "tool_call_chunks": [
                       {"id": "c1", "name": "search", "args": "{\"q\":"},
                       {"id": "c1", "args": "\"docs\"}"}
                   ]}),
        ]),
        values(json!({"stage": "planning", "progress": 40})),
        custom(json!({"source": {"id": "s1", "title": "Runbook"}})),
        finished("r1", "t1"),
    ]);

    let mut session = session_with(transport.clone(), cancel.clone());
    assert!(session.send("  Plan the rollout ").await.unwrap());
    assert!(session.is_loading());

    for _ in 0..3 {
        assert!(session.pump().await);
    }
    let mid = session.view();
    assert_eq!(mid.thread_id.as_deref(), Some("t1"));
    assert!(mid.messages[1].streaming);
    assert!(mid.tool_outputs_appeared);
    assert_eq!(mid.active_run.map(|run| run.run_id).as_deref(), Some("r1"));

    session.drain().await;
    let view = session.view();

    let texts: Vec<&str> = view.messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["Plan the rollout", "Working on it"]);
    assert!(view.messages.iter().all(|m| !m.streaming));
    assert!(!view.is_loading);
    assert!(view.active_run.is_none());

    assert_eq!(view.tool_outputs.len(), 1);
    assert_eq!(view.tool_outputs[0].title, "search");
    assert_eq!(view.tool_outputs[0].content, "{\"q\":\"docs\"}");
    assert!(!view.tool_outputs_appeared);

    assert_eq!(view.stage.as_deref(), Some("planning"));
    assert_eq!(view.stage_history, vec!["planning"]);
    assert_eq!(view.progress, 40.0);
    assert_eq!(view.sources.len(), 1);
    assert_eq!(session.current_path(), "/chat/t1");
    assert!(cancel.calls().is_empty());

    let (input, options) = &transport.submissions()[0];
    assert_eq!(input.messages[0].content, "Plan the rollout");
    assert_eq!(options.thread_id, None);
    assert_eq!(
        options.metadata,
        Some(json!({"thread_name": "Plan the rollout", "graph_id": "agent"}))
    );
    assert!(options.stream_resumable && options.stream_subgraphs);
    assert_eq!(options.stream_modes, DEFAULT_STREAM_MODES);
    assert_eq!(options.assistant_id.as_deref(), Some("agent"));
}

#[tokio::test]
async fn follow_up_on_existing_thread_carries_no_metadata() {
    let transport = ScriptedTransport::new();
    let mut session = session_with(transport.clone(), RecordingCancel::new());
    session.select_thread("t7");

    assert!(session.send("again").await.unwrap());
    assert!(!session.send("ignored while loading").await.unwrap());

    let submissions = transport.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].1.thread_id.as_deref(), Some("t7"));
    assert_eq!(submissions[0].1.metadata, None);
}

#[tokio::test]
async fn response_failed_cancels_exactly_once() {
    let transport = ScriptedTransport::new();
    let cancel = RecordingCancel::new();
    let failed = json!({"type": "response.failed", "run_id": "r1", "thread_id": "t1"});
    transport.queue(vec![
        created("r1", "t1"),
        metadata(failed.clone()),
        metadata(failed),
        TransportEvent::Failed {
            error: "stream closed".into(),
            meta: Some(RunMeta::new("r1", Some("t1".into()))),
        },
    ]);

    let mut session = session_with(transport, cancel.clone());
    session.send("go").await.unwrap();
    session.drain().await;
    let outcomes = settle(&mut session).await;

    assert_eq!(cancel.calls(), vec![("t1".to_string(), "r1".to_string())]);
    assert_eq!(outcomes.iter().filter(|o| o.reached_server()).count(), 1);
    assert!(session.runs().active().is_none());
    assert!(session.runs().slot("t1").is_none());
    assert!(!session.is_loading());
}

#[tokio::test]
async fn failed_cancel_still_clears_the_handle() {
    let transport = ScriptedTransport::new();
    let cancel = RecordingCancel::responding(Err(502));
    transport.queue(vec![
        created("r1", "t1"),
        metadata(json!({"event": "response.failed", "run": {"run_id": "r1", "thread_id": "t1"}})),
    ]);

    let mut session = session_with(transport, cancel.clone());
    session.send("go").await.unwrap();
    session.drain().await;
    let outcomes = settle(&mut session).await;

    assert!(matches!(outcomes.as_slice(), [CancelOutcome::Failed { .. }]));
    assert_eq!(cancel.calls().len(), 1);
    assert!(session.runs().active().is_none());
}

#[tokio::test]
async fn stream_error_cancels_the_active_run() {
    let transport = ScriptedTransport::new();
    let cancel = RecordingCancel::responding(Ok(CancelResponse::NotFound));
    transport.queue(vec![
        created("r1", "t1"),
        messages(vec![json!({"type": "human", "content": "hi"}), json!({"type": "ai", "content": "partial"})]),
        TransportEvent::Failed {
            error: "socket reset".into(),
            meta: None,
        },
    ]);

    let mut session = session_with(transport, cancel.clone());
    session.send("hi").await.unwrap();
    session.drain().await;
    let outcomes = settle(&mut session).await;

    assert_eq!(cancel.calls(), vec![("t1".to_string(), "r1".to_string())]);
    assert!(matches!(outcomes[0], CancelOutcome::AlreadyGone { .. }));
    assert_eq!(session.messages().len(), 2);
    assert!(session.messages().iter().all(|m| !m.streaming));
}

#[tokio::test]
async fn stopping_without_a_known_run_makes_no_cancel_request() {
    let transport = ScriptedTransport::new();
    let cancel = RecordingCancel::new();
    let mut session = session_with(transport.clone(), cancel.clone());

    assert!(!session.stop().await);

    session.send("hi").await.unwrap();
    assert!(session.stop().await);
    assert_eq!(settle(&mut session).await, vec![CancelOutcome::NoTarget]);
    assert_eq!(transport.stop_count(), 1);
    assert!(cancel.calls().is_empty());
    assert!(!session.is_loading());
}

#[tokio::test]
async fn stop_cancels_the_active_run() {
    let transport = ScriptedTransport::new();
    let cancel = RecordingCancel::new();
    transport.queue(vec![created("r5", "t5")]);
    let mut session = session_with(transport.clone(), cancel.clone());

    session.send("long job").await.unwrap();
    assert!(session.pump().await);
    assert!(session.stop().await);

    assert_eq!(
        settle(&mut session).await,
        vec![CancelOutcome::Cancelled {
            thread_id: "t5".into(),
            run_id: "r5".into()
        }]
    );
    assert!(!session.has_stream());
    assert!(session.runs().active().is_none());
}

struct StalledCancel;

#[async_trait]
impl CancelClient for StalledCancel {
    async fn cancel_run(&self, _thread_id: &str, _run_id: &str) -> Result<CancelResponse, RunweaveError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn stop_does_not_wait_for_the_cancel_request() {
    let transport = ScriptedTransport::new();
    transport.queue(vec![created("r6", "t6")]);
    let mut session = Session::new(ClientConfig::default(), Section::Chat, transport.clone(), Arc::new(StalledCancel));

    session.send("slow job").await.unwrap();
    assert!(session.pump().await);
    let stopped = tokio::time::timeout(Duration::from_secs(2), session.stop()).await;

    assert_eq!(stopped.ok(), Some(true));
    assert_eq!(transport.stop_count(), 1);
    assert!(!session.is_loading());
    let pending = session.take_pending_cancels();
    assert_eq!(pending.len(), 1);
    assert!(!pending[0].is_finished());
    pending[0].abort();
}

#[test]
fn thread_switch_restores_cached_sources_only() {
    let mut session = session_with(ScriptedTransport::new(), RecordingCancel::new());

    session.select_thread("t1");
    session.handle_event(custom(json!({"source": [{"id": "s1", "title": "A"}]})));
    session.handle_event(messages(vec![json!({"type": "ai", "tool_calls": [{"id": "c1", "name": "lookup"}]})]));
    assert_eq!(session.tool_outputs().len(), 1);
    assert!(!session.tool_tracker().is_empty());

    session.select_thread("t2");
    assert!(session.sources().is_empty());
    assert!(session.tool_outputs().is_empty());
    assert!(session.tool_tracker().is_empty());
    assert!(session.messages().is_empty());
    session.handle_event(custom(json!({"source": {"id": "s2"}})));

    session.select_thread("t1");
    let keys: Vec<&str> = session.sources().iter().map(|s| s.key.as_str()).collect();
    assert_eq!(keys, vec!["s1"]);
    assert!(session.tool_outputs().is_empty());

    session.select_thread("t3");
    assert!(session.sources().is_empty());
}

#[test]
fn reselecting_the_same_thread_keeps_state() {
    let mut session = session_with(ScriptedTransport::new(), RecordingCancel::new());
    session.select_thread("t1");
    session.handle_event(messages(vec![json!({"type": "ai", "tool_calls": [{"id": "c1"}]})]));

    session.select_thread(" t1 ");
    assert_eq!(session.tool_outputs().len(), 1);
    assert!(session.tool_tracker().is_seen("c1"));
}

#[tokio::test]
async fn thread_switch_drops_the_old_stream() {
    let transport = ScriptedTransport::new();
    transport.queue(vec![
        created("r1", "t1"),
        messages(vec![json!({"type": "ai", "content": "old thread"})]),
    ]);
    let mut session = session_with(transport, RecordingCancel::new());

    session.send("hi").await.unwrap();
    session.select_thread("t2");

    assert!(!session.has_stream());
    assert!(!session.pump().await);
    assert!(session.messages().is_empty());
    assert!(session.is_transitioning());
}

#[tokio::test]
async fn assigned_thread_keeps_the_stream_and_rescans_tools() {
    let transport = ScriptedTransport::new();
    transport.queue(vec![
        messages(vec![json!({"type": "ai", "tool_calls": [{"id": "c1", "name": "plan"}]})]),
        TransportEvent::ThreadAssigned {
            thread_id: "fresh".into(),
        },
        messages(vec![json!({"type": "ai", "content": "done", "tool_calls": [{"id": "c1", "name": "plan"}]})]),
    ]);
    let mut session = session_with(transport, RecordingCancel::new());

    session.send("start").await.unwrap();
    assert!(session.pump().await);
    assert!(session.pump().await);
    assert!(session.has_stream());
    assert_eq!(session.thread_id(), Some("fresh"));
    assert_eq!(session.tool_outputs().len(), 1);

    session.drain().await;
    assert_eq!(session.messages()[0].text, "done");
}

#[tokio::test]
async fn assigned_thread_keeps_stage_history_but_selection_resets_it() {
    let transport = ScriptedTransport::new();
    transport.queue(vec![
        values(json!({"stage": "research"})),
        TransportEvent::ThreadAssigned {
            thread_id: "fresh".into(),
        },
        values(json!({"stage": "writing"})),
    ]);
    let mut session = session_with(transport, RecordingCancel::new());

    session.send("start").await.unwrap();
    session.drain().await;
    assert_eq!(session.thread_id(), Some("fresh"));
    assert_eq!(session.stage().history, vec!["research", "writing"]);

    session.select_thread("other");
    assert!(session.stage().history.is_empty());
}

#[test]
fn values_snapshot_messages_replace_the_transcript() {
    let mut session = session_with(ScriptedTransport::new(), RecordingCancel::new());
    session.handle_event(messages(vec![json!({"type": "ai", "content": "stale"})]));
    session.handle_event(values(json!({
        "messages": [
            {"type": "human", "content": "teach me"},
            {"type": "ai", "content": "Module ready", "tool_calls": [{"id": "t1", "name": "render"}]}
        ],
        "module": "Lesson outline",
        "stage": "drafting"
    })));

    let view = session.view();
    let texts: Vec<&str> = view.messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["teach me", "Module ready", "Lesson outline"]);
    assert_eq!(view.messages[2].source, MessageSource::ValuesModule);
    assert_eq!(view.tool_outputs.len(), 1);
    assert_eq!(view.stage_history, vec!["drafting"]);
    assert_eq!(view.progress, 0.0);
}

#[test]
fn custom_and_metadata_payloads_feed_the_sinks() {
    let mut session = session_with(ScriptedTransport::new(), RecordingCancel::new());
    session.handle_event(custom(json!({"tool": {"id": "x1", "name": "fetch", "output": {"text": "200 OK"}}})));
    session.handle_event(metadata(json!({"tools": [{"id": "x1", "title": "Fetch page"}], "sources": {"id": "doc"}})));

    let tools = session.tool_outputs();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].title, "Fetch page");
    assert_eq!(tools[0].content, "200 OK");
    assert_eq!(session.sources()[0].key, "doc");
}

#[tokio::test]
async fn failed_submit_hands_the_input_back() {
    let transport = ScriptedTransport::new();
    transport.fail_next_submit();
    let mut session = session_with(transport, RecordingCancel::new());

    let err = session.send(" draft ").await.unwrap_err();
    assert!(matches!(err, RunweaveError::Submit { ref input, .. } if input == "draft"));
    assert!(!session.is_loading());
}

#[tokio::test]
async fn start_new_thread_stops_and_resets() {
    let transport = ScriptedTransport::new();
    transport.queue(vec![created("r1", "t1")]);
    let mut session = session_with(transport.clone(), RecordingCancel::new());
    session.select_thread("t1");
    session.send("hi").await.unwrap();

    assert_eq!(session.start_new_thread().await, "/chat");
    assert_eq!(transport.stop_count(), 1);
    assert_eq!(session.thread_id(), None);
    assert!(!session.is_loading());
    assert!(session.is_transitioning());
}

struct KnownThreads(Vec<&'static str>);

#[async_trait]
impl ThreadDirectory for KnownThreads {
    async fn list_thread_ids(&self) -> Result<Vec<String>, RunweaveError> {
        Ok(self.0.iter().map(|id| id.to_string()).collect())
    }
}

#[tokio::test]
async fn open_thread_redirects_unknown_ids() {
    let mut session = session_with(ScriptedTransport::new(), RecordingCancel::new())
        .with_directory(Arc::new(KnownThreads(vec!["t1"])));

    assert_eq!(session.open_thread("t1").await, ThreadOpen::Opened("t1".into()));
    assert_eq!(session.thread_id(), Some("t1"));

    assert_eq!(session.open_thread("gone").await, ThreadOpen::Redirect("/chat"));
    assert_eq!(session.thread_id(), Some("t1"));
}
