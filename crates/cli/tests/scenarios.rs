//! End-to-end session tests for the fundwise orchestrator.
//!
//! These drive the public `Orchestrator` API with a scripted streaming
//! backend and in-process tools, and check the record stream a client sees.

use std::sync::Arc;

use fundwise_agent::testing::{
    FailingTool, PanickingTool, ScriptedProvider, StaticTool, collect_records, fast_config,
    text_round, tool_round,
};
use fundwise_agent::{Orchestrator, StreamRecord};
use fundwise_config::AppConfig;
use fundwise_core::message::{ContentBlock, HistoryTurn, Role, SessionRequest, is_well_formed};
use fundwise_core::tool::{KnownTool, ToolCatalog};
use fundwise_telemetry::TelemetryRecorder;
use serde_json::json;

// ── Helpers ──────────────────────────────────────────────────────────────

fn kinds(records: &[StreamRecord]) -> Vec<&'static str> {
    records.iter().map(StreamRecord::kind).collect()
}

fn meta(records: &[StreamRecord]) -> &fundwise_agent::MetaRecord {
    records
        .iter()
        .find_map(|r| match r {
            StreamRecord::Meta(m) => Some(m),
            _ => None,
        })
        .expect("session should emit meta")
}

/// The tool results the backend saw in the user turn after `round`.
fn tool_results(provider: &ScriptedProvider, round: usize) -> Vec<(String, bool)> {
    let requests = provider.requests();
    let last = requests[round].messages.last().unwrap();
    assert_eq!(last.role, Role::User);
    last.content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolResult {
                content, is_error, ..
            } => Some((content.clone(), *is_error)),
            _ => None,
        })
        .collect()
}

fn security_catalog() -> Arc<ToolCatalog> {
    Arc::new(ToolCatalog::new().with(
        KnownTool::LookupSecurity,
        Arc::new(StaticTool::new(json!({
            "name": "Investor AB B",
            "isin": "SE0000108656",
            "citations": [{"title": "Security master", "source": "sm"}]
        }))),
    ))
}

fn orchestrator(
    config: &AppConfig,
    provider: Arc<ScriptedProvider>,
    catalog: Arc<ToolCatalog>,
) -> Orchestrator {
    Orchestrator::new(config, provider, catalog, TelemetryRecorder::disabled())
}

async fn run(orchestrator: &Orchestrator, request: SessionRequest) -> Vec<StreamRecord> {
    let handle = orchestrator.start(request).await.unwrap();
    collect_records(handle.records).await
}

fn lookup(id: &str) -> (&str, &str, serde_json::Value) {
    (id, "lookup_security", json!({"isin": "SE0000108656"}))
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn scenario_a_plain_greeting() {
    let provider = Arc::new(ScriptedProvider::new(vec![text_round(&[
        "Hej! ",
        "Vad kan jag hjälpa dig med?",
    ])]));
    let orch = orchestrator(&fast_config(), provider.clone(), security_catalog());

    let records = run(&orch, SessionRequest::new("Hej")).await;

    assert_eq!(kinds(&records), vec!["progress", "text", "text", "meta", "done"]);
    assert!(records.iter().all(|r| !matches!(r, StreamRecord::ToolCall(_))));
    assert!(meta(&records).tools_used.is_empty());
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn scenario_b_single_tool_round() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_round("", &[lookup("toolu_1")]),
        text_round(&["SE0000108656 is Investor AB B."]),
    ]));
    let orch = orchestrator(&fast_config(), provider.clone(), security_catalog());

    let records = run(&orch, SessionRequest::new("What is SE0000108656?")).await;

    let call = records
        .iter()
        .position(|r| matches!(r, StreamRecord::ToolCall(n) if n.name == "lookup_security"))
        .unwrap();
    assert!(matches!(&records[call + 1], StreamRecord::ToolCallDone(d) if d.name == "lookup_security"));

    let meta = meta(&records);
    assert_eq!(meta.tools_used, vec!["lookup_security"]);
    assert_eq!(meta.citations.len(), 1);
    assert!(matches!(records.last(), Some(StreamRecord::Done(true))));

    // Round two carries the assistant turn and the tool results, well formed.
    assert_eq!(provider.calls(), 2);
    let second = &provider.requests()[1].messages;
    assert!(is_well_formed(second));
    assert_eq!(second.len(), 3);
    let results = tool_results(&provider, 1);
    assert_eq!(results.len(), 1);
    assert!(!results[0].1);
    assert!(results[0].0.contains("Investor AB B"));
}

#[tokio::test]
async fn scenario_c_round_budget_forces_finalization() {
    let mut config = fast_config();
    config.orchestrator.max_rounds = 2;
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_round("Checking the security.", &[lookup("toolu_1")]),
        tool_round("Checking once more.", &[lookup("toolu_2")]),
        text_round(&["never requested"]),
    ]));
    let orch = orchestrator(&config, provider.clone(), security_catalog());

    let records = run(&orch, SessionRequest::new("Tell me about SE0000108656")).await;

    assert_eq!(provider.calls(), 2);
    assert!(matches!(records.last(), Some(StreamRecord::Done(true))));
    // The last produced text is re-emitted as the durable answer.
    let final_text = records
        .iter()
        .rev()
        .find_map(|r| match r {
            StreamRecord::Text(t) => Some(t.as_str()),
            _ => None,
        })
        .unwrap();
    assert_eq!(final_text, "Checking once more.");
    assert_eq!(meta(&records).tools_used, vec!["lookup_security"]);
}

#[tokio::test]
async fn scenario_d_failing_tool_does_not_abort_round() {
    let catalog = Arc::new(
        ToolCatalog::new()
            .with(KnownTool::LookupSecurity, Arc::new(PanickingTool))
            .with(
                KnownTool::MarketData,
                Arc::new(StaticTool::new(json!({"price": 231.4, "currency": "SEK"}))),
            ),
    );
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_round(
            "",
            &[
                lookup("toolu_1"),
                ("toolu_2", "market_data", json!({"isin": "SE0000108656"})),
            ],
        ),
        text_round(&["The price is 231.40 SEK."]),
    ]));
    let orch = orchestrator(&fast_config(), provider.clone(), catalog);

    let records = run(&orch, SessionRequest::new("Price of SE0000108656?")).await;

    assert!(matches!(records.last(), Some(StreamRecord::Done(true))));
    let results = tool_results(&provider, 1);
    assert_eq!(results.len(), 2);
    assert!(results[0].1, "panicking tool should yield an error result");
    assert!(results[0].0.contains("error"));
    assert!(!results[1].1);
    assert!(results[1].0.contains("231.4"));
}

// ── Properties ───────────────────────────────────────────────────────────

#[tokio::test]
async fn every_retracted_round_clears_once_before_next_round() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_round("Let me look.", &[lookup("toolu_1")]),
        tool_round("One more check.", &[lookup("toolu_2")]),
        text_round(&["Done: Investor AB B."]),
    ]));
    let orch = orchestrator(&fast_config(), provider, security_catalog());

    let records = run(&orch, SessionRequest::new("SE0000108656?")).await;

    let clears = records
        .iter()
        .filter(|r| matches!(r, StreamRecord::ClearText(_)))
        .count();
    assert_eq!(clears, 2);
    for (i, r) in records.iter().enumerate() {
        if matches!(r, StreamRecord::ToolCall(_)) {
            // Any text in the round must have been cleared before the notice.
            let since_clear = records[..i]
                .iter()
                .rev()
                .take_while(|r| !matches!(r, StreamRecord::ClearText(_) | StreamRecord::Progress(_)))
                .any(|r| matches!(r, StreamRecord::Text(_)));
            assert!(!since_clear);
        }
    }
}

#[tokio::test]
async fn every_dispatched_tool_produces_one_outcome() {
    let catalog = Arc::new(
        ToolCatalog::new()
            .with(KnownTool::LookupSecurity, Arc::new(FailingTool::new("upstream 500")))
            .with(KnownTool::MarketData, Arc::new(StaticTool::new(json!({"price": 1.0})))),
    );
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_round(
            "",
            &[
                lookup("toolu_1"),
                ("toolu_2", "market_data", json!({})),
                ("toolu_3", "search_documents", json!({"query": "fees"})),
                ("toolu_4", "rebalance_portfolio", json!({})),
            ],
        ),
        text_round(&["Partial answer."]),
    ]));
    let orch = orchestrator(&fast_config(), provider.clone(), catalog);

    let records = run(&orch, SessionRequest::new("Overview please")).await;

    let starts = records.iter().filter(|r| matches!(r, StreamRecord::ToolCall(_))).count();
    let dones = records
        .iter()
        .filter(|r| matches!(r, StreamRecord::ToolCallDone(_)))
        .count();
    assert_eq!(starts, 4);
    assert_eq!(dones, 4);

    let results = tool_results(&provider, 1);
    let errors: Vec<bool> = results.iter().map(|(_, e)| *e).collect();
    assert_eq!(errors, vec![true, false, true, true]);
}

#[tokio::test]
async fn messy_history_still_reaches_backend_well_formed() {
    let provider = Arc::new(ScriptedProvider::new(vec![text_round(&["Sure."])]));
    let orch = orchestrator(&fast_config(), provider.clone(), security_catalog());

    let request = SessionRequest {
        history: vec![
            HistoryTurn {
                role: Role::Assistant,
                text: "Welcome!".into(),
            },
            HistoryTurn {
                role: Role::User,
                text: "Hi".into(),
            },
            HistoryTurn {
                role: Role::User,
                text: "   ".into(),
            },
            HistoryTurn {
                role: Role::Assistant,
                text: "Hello".into(),
            },
            HistoryTurn {
                role: Role::Assistant,
                text: "Anything else?".into(),
            },
        ],
        ..SessionRequest::new("Show my holdings")
    };
    let records = run(&orch, request).await;

    assert!(matches!(records.last(), Some(StreamRecord::Done(true))));
    let sent = &provider.requests()[0].messages;
    assert!(is_well_formed(sent));
    assert_eq!(sent.last().unwrap().role, Role::User);
}
