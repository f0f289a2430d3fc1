// End-to-end tests of a running group chat against a scripted completion boundary.
mod common;

use common::{start_chat, test_config, ScriptedClient};
use groupllm::agent::AgentDefinition;
use groupllm::client_wrapper::ClientError;
use groupllm::event::SessionEvent;
use groupllm::message::{Message, Role};
use groupllm::store::ConfigStore;
use groupllm::{ConfigError, GroupChatConfig};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn ann_and_bob() -> Vec<AgentDefinition> {
    vec![
        AgentDefinition::new("Ann").with_auto_respond_to_public(true),
        AgentDefinition::new("Bob").with_auto_respond_to_public(false),
    ]
}

fn no_agent_chatter() -> GroupChatConfig {
    GroupChatConfig {
        allow_agent_conversations: false,
        ..test_config()
    }
}

fn system_messages(history: &[Message]) -> Vec<&Message> {
    history.iter().filter(|m| m.role() == Role::System).collect()
}

#[tokio::test]
async fn test_public_message_is_answered_by_public_responders_only() {
    let h = start_chat(ann_and_bob(), ScriptedClient::introducing(), no_agent_chatter());

    let sent = h.chat.send_human_message("hello everyone").unwrap();
    assert!(sent.is_public());
    h.chat.wait_idle().await;

    assert_eq!(h.client.callers(), vec!["Ann"]);
    let history = h.chat.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].sender_name(), "Alice");
    assert_eq!(history[1].sender_name(), "Ann");
    assert_eq!(history[1].content(), "Ann here");
    assert_eq!(history[1].role(), Role::Agent);
}

#[tokio::test]
async fn test_addressed_message_is_answered_by_addressee_only() {
    let h = start_chat(ann_and_bob(), ScriptedClient::introducing(), no_agent_chatter());

    let sent = h.chat.send_human_message("@Bob status?").unwrap();
    assert_eq!(sent.content(), "status?");
    assert_eq!(sent.target(), Some("Bob"));
    h.chat.wait_idle().await;

    assert_eq!(h.client.callers(), vec!["Bob"]);
    assert_eq!(h.chat.history().last().unwrap().content(), "Bob here");
}

#[tokio::test]
async fn test_boundary_error_yields_one_notice_and_round_continues() {
    let agents = vec![
        AgentDefinition::new("Ann").with_auto_respond_to_public(true),
        AgentDefinition::new("Bob").with_auto_respond_to_public(true),
        AgentDefinition::new("Cid").with_auto_respond_to_public(true),
    ];
    let client = ScriptedClient::new(|agent, _| {
        if agent == "Bob" {
            Err(ClientError::Status {
                status: 500,
                body: "boom".into(),
            })
        } else {
            Ok(format!("{} here", agent))
        }
    });
    let h = start_chat(agents, client, no_agent_chatter());

    h.chat.send_human_message("roll call").unwrap();
    h.chat.wait_idle().await;

    assert_eq!(h.client.callers(), vec!["Ann", "Bob", "Cid"]);
    let history = h.chat.history();
    let notices = system_messages(&history);
    assert_eq!(notices.len(), 1);
    assert_eq!(
        notices[0].content(),
        "Bob failed to respond: API returned status 500: boom"
    );
    let senders: Vec<&str> = history.iter().map(|m| m.sender_name()).collect();
    assert_eq!(senders, vec!["Alice", "Ann", "System", "Cid"]);

    let failures = h
        .events
        .events()
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::AgentFailed { agent, .. } if agent == "Bob"))
        .count();
    assert_eq!(failures, 1);
}

#[tokio::test]
async fn test_panicking_responder_is_contained() {
    let agents = vec![
        AgentDefinition::new("Ann").with_auto_respond_to_public(true),
        AgentDefinition::new("Bob").with_auto_respond_to_public(true),
    ];
    let client = ScriptedClient::new(|agent, _| {
        if agent == "Ann" {
            panic!("provider exploded");
        }
        Ok("still here".to_string())
    });
    let h = start_chat(agents, client, no_agent_chatter());

    h.chat.send_human_message("anyone?").unwrap();
    h.chat.wait_idle().await;

    let history = h.chat.history();
    assert_eq!(history.len(), 3);
    assert_eq!(history[1].content(), "Ann failed to respond: provider exploded");
    assert_eq!(history[2].sender_name(), "Bob");

    // The consumer is still alive.
    h.chat.send_human_message("@Bob again").unwrap();
    h.chat.wait_idle().await;
    assert_eq!(h.chat.history().len(), 5);
}

#[tokio::test]
async fn test_turn_limit_bounds_autonomous_rounds() {
    let agents = vec![AgentDefinition::new("Ann"), AgentDefinition::new("Bob")];
    let config = GroupChatConfig {
        max_agent_turns: 3,
        ..test_config()
    };
    let h = start_chat(agents, ScriptedClient::new(|_, _| Ok("ok".into())), config);

    for i in 0..4 {
        h.chat
            .submit(Message::agent(format!("ping {}", i), "Ann", None).unwrap())
            .unwrap();
    }
    h.chat.wait_idle().await;

    assert_eq!(h.events.autonomous_rounds_started(), 3);
    let history = h.chat.history();
    let notices = system_messages(&history);
    assert_eq!(notices.len(), 1);
    assert!(notices[0].content().contains("Maximum autonomous turns (3)"));
    assert_eq!(h.chat.turn_status().turn_count, 3);

    // Halted: more agent traffic starts no round and repeats no notice.
    h.chat
        .submit(Message::agent("anyone?", "Bob", None).unwrap())
        .unwrap();
    h.chat.wait_idle().await;
    assert_eq!(h.events.autonomous_rounds_started(), 3);
    assert_eq!(system_messages(&h.chat.history()).len(), 1);

    // A human message resets the budget.
    h.chat.send_human_message("@Ann go on").unwrap();
    h.chat.wait_idle().await;
    assert!(h.events.autonomous_rounds_started() > 3);
}

#[tokio::test]
async fn test_looping_agents_keep_at_most_one_trigger_waiting() {
    let agents = vec![
        AgentDefinition::new("Ann"),
        AgentDefinition::new("Bob"),
        AgentDefinition::new("Cid"),
    ];
    // Every round yields two agent replies. Once the boundary starts
    // failing, rounds only produce notices and the chain stops.
    let answered = Arc::new(AtomicUsize::new(0));
    let counter = answered.clone();
    let client = ScriptedClient::new(move |agent, _| {
        if counter.fetch_add(1, Ordering::SeqCst) < 20 {
            Ok(format!("{} agrees", agent))
        } else {
            Err(ClientError::Status {
                status: 503,
                body: "overloaded".into(),
            })
        }
    });
    let h = start_chat(agents, client, test_config());
    h.chat.set_loop_enabled(true);

    h.chat
        .submit(Message::agent("shall we start?", "Ann", None).unwrap())
        .unwrap();
    h.chat.wait_idle().await;

    // Two calls per round and one waiting trigger: the chain ends within a
    // round of the first failure instead of draining a backlog.
    let calls = h.client.calls().len();
    assert!(calls > 20);
    assert!(calls <= 24, "{} calls after the boundary started failing", calls);
    assert!(!system_messages(&h.chat.history()).is_empty());
}

#[tokio::test]
async fn test_agents_address_each_other() {
    let agents = vec![
        AgentDefinition::new("Ann").with_auto_respond_to_agents(false),
        AgentDefinition::new("Bob"),
    ];
    let client = ScriptedClient::new(|agent, _| {
        Ok(match agent {
            "Ann" => "Ann: @Bob what is your view?".to_string(),
            _ => "I agree".to_string(),
        })
    });
    let h = start_chat(agents, client, test_config());

    h.chat.send_human_message("@Ann new topic").unwrap();
    h.chat.wait_idle().await;

    let history = h.chat.history();
    assert_eq!(history.len(), 3);
    assert_eq!(history[1].content(), "what is your view?");
    assert_eq!(history[1].target(), Some("Bob"));
    assert_eq!(history[2].sender_name(), "Bob");
    assert!(history[2].is_public());
    assert_eq!(h.client.callers(), vec!["Ann", "Bob"]);
    // Bob's public reply still started a (responder-less) autonomous round.
    assert_eq!(h.chat.turn_status().turn_count, 2);
}

#[tokio::test]
async fn test_disallowed_agent_conversations_start_no_rounds() {
    let agents = vec![AgentDefinition::new("Ann"), AgentDefinition::new("Bob")];
    let h = start_chat(agents, ScriptedClient::introducing(), test_config());

    h.chat.set_allow_agent_conversations(false).unwrap();
    assert_eq!(
        h.store.load_setting("allow_agent_conversations", json!(true)),
        json!(false)
    );

    h.chat
        .submit(Message::agent("hi Bob", "Ann", None).unwrap())
        .unwrap();
    h.chat.wait_idle().await;
    assert!(h.client.calls().is_empty());
    assert_eq!(h.chat.history().len(), 1);
}

#[tokio::test]
async fn test_round_uses_history_snapshot_from_round_start() {
    let agents = vec![
        AgentDefinition::new("Ann").with_auto_respond_to_public(true),
        AgentDefinition::new("Bob").with_auto_respond_to_public(true),
    ];
    let h = start_chat(agents, ScriptedClient::introducing(), no_agent_chatter());

    h.chat.send_human_message("what do you think?").unwrap();
    h.chat.wait_idle().await;

    let bob_request = &h.client.requests_for("Bob")[0];
    assert!(bob_request.messages.iter().all(|m| m.content != "Ann here"));
    assert_eq!(bob_request.messages.last().unwrap().content, "what do you think?");
}

#[tokio::test]
async fn test_addressed_traffic_stays_hidden_from_others() {
    let h = start_chat(ann_and_bob(), ScriptedClient::introducing(), no_agent_chatter());

    h.chat.send_human_message("@Bob the secret word is fig").unwrap();
    h.chat.wait_idle().await;
    h.chat.send_human_message("hello").unwrap();
    h.chat.wait_idle().await;

    let ann_request = &h.client.requests_for("Ann")[0];
    assert!(ann_request.messages.iter().all(|m| !m.content.contains("fig")));
    // Bob's public reply is fine for Ann to see.
    assert!(ann_request.messages.iter().any(|m| m.content == "Bob here"));

    let ann_view = h.chat.view_for("Ann").unwrap();
    assert!(ann_view.iter().all(|m| !m.content().contains("fig")));
    let bob_view = h.chat.view_for("Bob").unwrap();
    assert!(bob_view.iter().any(|m| m.content().contains("fig")));
    assert!(h.chat.view_for("Nobody").is_none());
}

#[tokio::test]
async fn test_clear_resets_to_persona_seed() {
    let agents = vec![
        AgentDefinition::new("Ann")
            .with_persona("You love plants.")
            .with_auto_respond_to_public(true),
        AgentDefinition::new("Bob"),
    ];
    let h = start_chat(agents, ScriptedClient::introducing(), test_config());

    assert_eq!(h.chat.history().len(), 1);
    h.chat.send_human_message("hello").unwrap();
    h.chat.wait_idle().await;
    assert!(h.chat.history().len() > 1);

    h.chat.clear().await.unwrap();
    let history = h.chat.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].persona_owner(), Some("Ann"));
    assert_eq!(h.chat.turn_status().turn_count, 0);
    assert!(h
        .events
        .events()
        .iter()
        .any(|e| matches!(e, SessionEvent::HistoryCleared)));
}

#[tokio::test]
async fn test_clear_discards_replies_from_earlier_rounds() {
    let agents = vec![
        AgentDefinition::new("Ann")
            .with_persona("You love plants.")
            .with_auto_respond_to_public(true),
        AgentDefinition::new("Bob").with_auto_respond_to_public(false),
    ];
    let client = ScriptedClient::introducing().with_delay(Duration::from_millis(200));
    let h = start_chat(agents, client, test_config());

    h.chat.send_human_message("hello").unwrap();
    h.chat.clear().await.unwrap();
    h.chat.wait_idle().await;

    // Ann was asked, but her late reply belongs to the cleared conversation.
    assert_eq!(h.client.calls_for("Ann"), 1);
    assert_eq!(h.client.calls_for("Bob"), 0);
    let history = h.chat.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].persona_owner(), Some("Ann"));
    assert_eq!(h.chat.turn_status().turn_count, 0);
    assert_eq!(h.events.autonomous_rounds_started(), 0);
}

#[tokio::test]
async fn test_subscribers_see_commits_in_order() {
    let h = start_chat(ann_and_bob(), ScriptedClient::introducing(), no_agent_chatter());
    let mut commits = h.chat.subscribe();

    h.chat.send_human_message("hello").unwrap();
    h.chat.wait_idle().await;

    let first = commits.recv().await.unwrap();
    let second = commits.recv().await.unwrap();
    assert_eq!(first.seq, 1);
    assert_eq!(second.seq, 2);
    assert!(first.committed_at <= second.committed_at);
    assert_eq!(first.message.content(), "hello");
    assert_eq!(second.message.sender_name(), "Ann");
}

#[tokio::test]
async fn test_dev_mode_publishes_context_views() {
    let h = start_chat(ann_and_bob(), ScriptedClient::introducing(), no_agent_chatter());

    h.chat.send_human_message("quiet please").unwrap();
    h.chat.wait_idle().await;
    let built = |events: Vec<SessionEvent>| {
        events
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::ContextBuilt { .. }))
            .count()
    };
    assert_eq!(built(h.events.events()), 0);

    h.chat.set_dev_mode(true);
    h.chat.send_human_message("now loud").unwrap();
    h.chat.wait_idle().await;
    let views: Vec<Vec<Message>> = h
        .events
        .events()
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::ContextBuilt { agent, view, .. } if agent == "Ann" => Some(view),
            _ => None,
        })
        .collect();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].last().unwrap().content(), "now loud");
}

#[tokio::test]
async fn test_settings_validation_and_persistence() {
    let h = start_chat(ann_and_bob(), ScriptedClient::introducing(), test_config());

    assert!(h.chat.set_max_turns(0).is_err());
    assert_eq!(h.chat.turn_status().max_turns, 10);
    h.chat.set_max_turns(4).unwrap();
    assert_eq!(h.chat.turn_status().max_turns, 4);
    assert_eq!(h.store.load_setting("max_agent_turns", json!(10)), json!(4));

    h.chat.set_loop_enabled(true);
    assert!(h.chat.turn_status().loop_enabled);
    assert!(h.chat.state().loop_enabled);
    h.chat.set_loop_enabled(false);

    assert!(h.chat.set_human_name("Ann").is_err());
    assert!(matches!(
        h.chat.set_human_name("   "),
        Err(ConfigError::EmptyUserName)
    ));
    h.chat.set_human_name("Zoe").unwrap();
    let sent = h.chat.send_human_message("@Bob hi").unwrap();
    assert_eq!(sent.sender_name(), "Zoe");
    h.chat.wait_idle().await;
}

#[tokio::test]
async fn test_registry_edits_apply_to_later_rounds() {
    let h = start_chat(ann_and_bob(), ScriptedClient::introducing(), no_agent_chatter());

    h.chat
        .registry()
        .upsert(AgentDefinition::new("Bob").with_auto_respond_to_public(true))
        .unwrap();
    h.chat.registry().remove("Ann").unwrap();

    h.chat.send_human_message("@Ann are you there?").unwrap();
    h.chat.wait_idle().await;
    // Ann is gone, so the mention is plain text and Bob answers it publicly.
    let history = h.chat.history();
    assert_eq!(history[0].content(), "@Ann are you there?");
    assert!(history[0].is_public());
    assert_eq!(h.client.callers(), vec!["Bob"]);
}

#[tokio::test]
async fn test_empty_input_is_rejected_and_shutdown_closes() {
    let h = start_chat(ann_and_bob(), ScriptedClient::introducing(), test_config());
    assert!(h.chat.send_human_message("   ").is_err());

    let counter = Arc::new(AtomicUsize::new(0));
    let seen = counter.clone();
    let mut commits = h.chat.subscribe();
    let watcher = tokio::spawn(async move {
        while commits.recv().await.is_ok() {
            seen.fetch_add(1, Ordering::SeqCst);
        }
    });

    h.chat.send_human_message("@Bob bye").unwrap();
    h.chat.wait_idle().await;
    h.chat.shutdown().await;
    watcher.await.unwrap();
    assert!(counter.load(Ordering::SeqCst) >= 2);
}
