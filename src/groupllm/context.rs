//! Per-agent context views.
//!
//! An agent never sees the raw history. [`build_view`] filters it down to
//! what that agent is allowed to observe and prepends an introduction that
//! tells the agent who it is, who else is in the room and how addressing
//! works. The function is pure: the same history and roster always yield the
//! same view.
//!
//! Visibility, per message and in history order:
//!
//! 1. persona reminders of *other* agents are hidden; every other system
//!    message is shown,
//! 2. public messages are shown,
//! 3. messages addressed to the agent are shown,
//! 4. the agent's own messages are shown, whoever they were addressed to,
//! 5. anything addressed to a third party is hidden.

use crate::groupllm::agent::AgentDefinition;
use crate::groupllm::message::{Message, Role};
use crate::groupllm::registry::Roster;

/// Whether `message` may appear in `agent_name`'s view.
pub fn is_visible_to(message: &Message, agent_name: &str) -> bool {
    if message.role() == Role::System {
        return match message.persona_owner() {
            Some(owner) => owner == agent_name,
            None => true,
        };
    }
    match message.target() {
        None => true,
        Some(target) if target == agent_name => true,
        Some(_) => message.sender_name() == agent_name,
    }
}

/// The leading system message for `agent`: identity, persona, roster and
/// the addressing contract.
pub fn introduction(agent: &AgentDefinition, roster: &Roster) -> Message {
    let mut text = format!("Your name is {}.", agent.name);
    if agent.has_persona() {
        text.push(' ');
        text.push_str(agent.persona_prompt.trim());
    }
    text.push_str("\n\nGroup chat members:\n");
    text.push_str(&format!("- human: {}\n", roster.human_name()));
    for member in roster.active_agents() {
        text.push_str(&format!("- agent: {}\n", member.name));
    }

    text.push_str(&format!(
        "\nYou are an agent named {name}.\n\
         In this group chat:\n\
         - You only see messages addressed to you (@{name}) and public messages (no @).\n\
         - Messages addressed to another participant are hidden from you and are not yours to answer.\n\
         - If a message addresses you, you must respond.\n\
         - If a message is public, you may choose to respond.\n\
         - To address one participant, start your reply with @name followed by a space.\n\
         Reply with your own view directly. Do not begin with your name or any prefix; \
         your name is attached automatically.",
        name = agent.name
    ));

    Message::system(text)
}

/// Messages `agent` is allowed to see, introduction first.
pub fn build_view(history: &[Message], agent: &AgentDefinition, roster: &Roster) -> Vec<Message> {
    let mut view = Vec::with_capacity(history.len() + 1);
    view.push(introduction(agent, roster));
    view.extend(
        history
            .iter()
            .filter(|m| is_visible_to(m, &agent.name))
            .cloned(),
    );
    view
}

/// Minimal history a conversation starts from (and returns to on clear):
/// one persona reminder per active agent that has a persona.
pub fn persona_seed(roster: &Roster) -> Vec<Message> {
    roster
        .active_agents()
        .into_iter()
        .filter(|a| a.has_persona())
        .map(|a| Message::persona_reminder(&a.name, a.persona_prompt.trim()))
        .collect()
}
