//! Response lifecycle against in-process upstreams.

mod common;

use common::{drain, pipeline, recv_until, EchoTts, Round, ScriptedModel};
use serde_json::json;
use std::time::Duration;
use timewalk_voice::{
    Content, FunctionCall, FunctionResponse, GuideContext, ModelEvent, Part, ResponseController,
    Role, ServerMessage, SystemCue, Trigger,
};

async fn wait_idle(controller: &ResponseController) {
    for _ in 0..500 {
        if !controller.is_running() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("response cycle never finished");
}

fn fact_call() -> ModelEvent {
    ModelEvent::ToolCall(FunctionCall {
        name: "generate_fact".into(),
        args: json!({"fact_text": "The Pantheon dome is unreinforced concrete.", "category": "architecture"}),
    })
}

#[tokio::test]
async fn new_turn_mid_speech_supersedes_the_old_response() {
    let model = ScriptedModel::new(vec![
        Round::hanging("Rome was founded in 753 BCE."),
        Round::text("Egypt, then."),
    ]);
    let tts = EchoTts::failing(0);
    let (pipeline, _engine, mut rx) = pipeline(model.clone(), tts.clone());
    let mut controller = ResponseController::new(pipeline);
    let ctx = GuideContext::default();

    let first = controller
        .submit(Trigger::UserTurn("Tell me about Rome".into()), &ctx)
        .await
        .unwrap();
    recv_until(&mut rx, |m| {
        matches!(m, ServerMessage::Audio { response_id, .. } if *response_id == first)
    })
    .await;

    let second = controller
        .submit(Trigger::UserTurn("Actually, Egypt".into()), &ctx)
        .await
        .unwrap();
    assert_ne!(first, second);

    let after = recv_until(&mut rx, |m| {
        matches!(m, ServerMessage::Audio { response_id, .. } if *response_id == second)
    })
    .await;
    assert_eq!(after[0], ServerMessage::Interrupt { response_id: first.clone() });
    assert_eq!(after[1], ServerMessage::ResponseStart { response_id: second.clone() });

    wait_idle(&controller).await;
    let rest = drain(&mut rx);
    for msg in after[1..].iter().chain(rest.iter()) {
        if let Some(id) = msg.response_id() {
            assert_eq!(id, &second, "late frame from superseded response: {:?}", msg);
        }
    }

    // the old session was released before the new one was opened
    assert_eq!(tts.log()[..3], ["open0", "close0", "open1"]);

    // the abandoned turn stays in history as user input only
    let requests = model.requests.lock().unwrap();
    assert_eq!(
        requests[1].contents,
        vec![
            Content::user_text("Tell me about Rome"),
            Content::user_text("Actually, Egypt"),
        ]
    );
}

#[tokio::test]
async fn unresponsive_synthesis_does_not_block_the_next_turn() {
    let model = ScriptedModel::new(vec![
        Round::hanging("Rome was founded in 753 BCE."),
        Round::text("Egypt, then."),
    ]);
    let tts = EchoTts::stalling();
    let (pipeline, _engine, mut rx) = pipeline(model, tts.clone());
    let mut controller = ResponseController::new(pipeline);
    let ctx = GuideContext::default();

    controller
        .submit(Trigger::UserTurn("Rome".into()), &ctx)
        .await
        .unwrap();
    recv_until(&mut rx, |m| matches!(m, ServerMessage::GuideText { .. })).await;

    let second = tokio::time::timeout(
        Duration::from_secs(10),
        controller.submit(Trigger::UserTurn("Egypt".into()), &ctx),
    )
    .await
    .expect("second turn stuck behind synthesis release");
    assert!(second.is_some());
    assert_eq!(tts.open_count(), 2);
}

#[tokio::test]
async fn system_cue_replaces_a_response_without_interrupt() {
    let model = ScriptedModel::new(vec![
        Round::hanging("While we wait, consider the aqueducts."),
        Round::text("Your world is ready."),
    ]);
    let (pipeline, _engine, mut rx) = pipeline(model, EchoTts::failing(0));
    let mut controller = ResponseController::new(pipeline);
    let ctx = GuideContext::default();

    let first = controller
        .submit(Trigger::UserTurn("What were aqueducts for?".into()), &ctx)
        .await
        .unwrap();
    recv_until(&mut rx, |m| matches!(m, ServerMessage::GuideText { .. })).await;

    let second = controller
        .submit(Trigger::System(SystemCue::WorldReady), &ctx)
        .await
        .unwrap();
    let seen = recv_until(&mut rx, |m| {
        matches!(m, ServerMessage::ResponseStart { response_id } if *response_id == second)
    })
    .await;
    assert!(!seen
        .iter()
        .any(|m| matches!(m, ServerMessage::Interrupt { response_id } if *response_id == first)));
    wait_idle(&controller).await;
    assert!(!drain(&mut rx).iter().any(|m| matches!(m, ServerMessage::Interrupt { .. })));
}

#[tokio::test]
async fn bare_interrupt_stops_without_starting_anything() {
    let model = ScriptedModel::new(vec![Round::hanging("The Nile floods every summer.")]);
    let (pipeline, _engine, mut rx) = pipeline(model.clone(), EchoTts::failing(0));
    let mut controller = ResponseController::new(pipeline);
    let ctx = GuideContext::default();

    controller
        .submit(Trigger::UserTurn("Why was Egypt rich?".into()), &ctx)
        .await
        .unwrap();
    recv_until(&mut rx, |m| matches!(m, ServerMessage::GuideText { .. })).await;

    assert_eq!(controller.submit(Trigger::Interrupt, &ctx).await, None);
    assert!(!controller.is_running());
    tokio::time::sleep(Duration::from_millis(50)).await;
    let rest = drain(&mut rx);
    assert!(rest
        .iter()
        .all(|m| !matches!(m, ServerMessage::ResponseStart { .. } | ServerMessage::Interrupt { .. })));
    assert_eq!(model.request_count(), 1);
}

#[tokio::test]
async fn cancel_current_is_idempotent() {
    let model = ScriptedModel::new(vec![Round::hanging("Constantinople stood for a thousand years.")]);
    let (pipeline, _engine, mut rx) = pipeline(model, EchoTts::failing(0));
    let mut controller = ResponseController::new(pipeline);

    let id = controller
        .submit(Trigger::UserTurn("Byzantium".into()), &GuideContext::default())
        .await
        .unwrap();
    recv_until(&mut rx, |m| matches!(m, ServerMessage::GuideText { .. })).await;

    assert_eq!(controller.cancel_current().await, Some(id));
    assert_eq!(controller.cancel_current().await, None);
    assert_eq!(controller.current_id(), None);
    assert!(!controller.is_running());
}

#[tokio::test]
async fn round_without_tool_calls_ends_the_cycle() {
    let model = ScriptedModel::new(vec![Round::text("Welcome to Kyoto in 1600.")]);
    let (pipeline, engine, mut rx) = pipeline(model.clone(), EchoTts::failing(0));
    let mut controller = ResponseController::new(pipeline);

    let id = controller
        .submit(Trigger::UserTurn("Kyoto please".into()), &GuideContext::default())
        .await
        .unwrap();
    wait_idle(&controller).await;

    assert_eq!(model.request_count(), 1);
    let history = engine.lock().await.history().to_vec();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].role, Role::Model);

    let msgs = drain(&mut rx);
    assert_eq!(msgs[0], ServerMessage::ResponseStart { response_id: id.clone() });
    assert!(msgs.iter().any(|m| matches!(m, ServerMessage::GuideText { text, .. } if text == "Welcome to Kyoto in 1600.")));
    assert!(msgs.iter().any(|m| matches!(m, ServerMessage::Audio { response_id, .. } if *response_id == id)));

    // a finished cycle is not "running" and cancelling it reports nothing
    assert_eq!(controller.cancel_current().await, None);
}

#[tokio::test]
async fn tool_results_are_recorded_before_the_follow_up_round() {
    let model = ScriptedModel::new(vec![
        Round {
            events: vec![fact_call()],
            hang: false,
        },
        Round::text("Remarkable, isn't it?"),
    ]);
    let (pipeline, engine, mut rx) = pipeline(model.clone(), EchoTts::failing(0));
    let mut controller = ResponseController::new(pipeline);

    controller
        .submit(Trigger::UserTurn("Tell me something about Rome".into()), &GuideContext::default())
        .await
        .unwrap();
    wait_idle(&controller).await;

    assert_eq!(model.request_count(), 2);
    let follow_up = model.requests.lock().unwrap()[1].contents.clone();
    assert_eq!(
        follow_up.last(),
        Some(&Content {
            role: Role::User,
            parts: vec![Part::FunctionResponse(FunctionResponse {
                name: "generate_fact".into(),
                response: json!({"status": "displayed"}),
            })],
        })
    );
    assert_eq!(engine.lock().await.unresolved_calls(), 0);
    assert!(drain(&mut rx)
        .iter()
        .any(|m| matches!(m, ServerMessage::Fact { category, .. } if category == "architecture")));
}

#[tokio::test]
async fn tool_rounds_are_capped() {
    let rounds = (0..5)
        .map(|_| Round {
            events: vec![fact_call()],
            hang: false,
        })
        .collect();
    let model = ScriptedModel::new(rounds);
    let (pipeline, engine, _rx) = pipeline(model.clone(), EchoTts::failing(0));
    let mut controller = ResponseController::new(pipeline);

    controller
        .submit(Trigger::UserTurn("More facts!".into()), &GuideContext::default())
        .await
        .unwrap();
    wait_idle(&controller).await;

    assert_eq!(model.request_count(), 3);
    assert_eq!(engine.lock().await.unresolved_calls(), 0);
}

#[tokio::test]
async fn synthesis_recovers_after_transient_failures() {
    let model = ScriptedModel::new(vec![Round::text("Athens, 430 BCE.")]);
    let tts = EchoTts::failing(2);
    let (pipeline, _engine, mut rx) = pipeline(model, tts.clone());
    let mut controller = ResponseController::new(pipeline);

    controller
        .submit(Trigger::UserTurn("Athens".into()), &GuideContext::default())
        .await
        .unwrap();
    wait_idle(&controller).await;

    assert_eq!(tts.open_count(), 3);
    assert!(drain(&mut rx).iter().any(|m| matches!(m, ServerMessage::Audio { .. })));
}

#[tokio::test]
async fn exhausted_synthesis_degrades_to_text_only() {
    let model = ScriptedModel::new(vec![Round::text("Babylon's gardens may be legend.")]);
    let tts = EchoTts::failing(10);
    let (pipeline, _engine, mut rx) = pipeline(model, tts.clone());
    let mut controller = ResponseController::new(pipeline);

    controller
        .submit(Trigger::UserTurn("Babylon".into()), &GuideContext::default())
        .await
        .unwrap();
    wait_idle(&controller).await;

    assert_eq!(tts.open_count(), 3);
    let msgs = drain(&mut rx);
    assert!(msgs.iter().any(|m| matches!(m, ServerMessage::GuideText { .. })));
    assert!(!msgs
        .iter()
        .any(|m| matches!(m, ServerMessage::Audio { .. } | ServerMessage::WordTimestamp { .. })));
    assert!(!msgs.iter().any(|m| matches!(m, ServerMessage::Error { .. })));
}
