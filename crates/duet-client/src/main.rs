//! Terminal front end for the chat client.
//!
//! Reads commands from stdin (see [`duet_client::parse_line`]) and prints the
//! contact list, the open conversation and notices to stdout.

use std::collections::HashSet;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use duet_client::events::{Notice, NoticeKind};
use duet_client::{parse_line, ChatSession, ChatState, ClientConfig, Command, Phase};
use duet_shared::{MessageId, UserId};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    duet_client::init_tracing();

    let config = ClientConfig::from_env();
    let session = ChatSession::new(config).context("Failed to start chat session")?;

    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(read_commands(tx));

    let mut view = TerminalView::default();
    session
        .run(rx, |state, notices| view.render(state, notices))
        .await?;
    Ok(())
}

async fn read_commands(tx: mpsc::Sender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read stdin");
                break;
            }
        };
        match parse_line(&line) {
            Ok(Some(command)) => {
                if tx.send(command).await.is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => println!("! {e}"),
        }
    }
}

/// Prints what changed since the previous render.
#[derive(Default)]
struct TerminalView {
    sidebar_revision: u64,
    selected: Option<UserId>,
    printed: HashSet<MessageId>,
}

impl TerminalView {
    fn render(&mut self, state: &ChatState, notices: Vec<Notice>) {
        if state.sidebar_revision() != self.sidebar_revision {
            self.sidebar_revision = state.sidebar_revision();
            print_contacts(state);
        }

        if state.selected() != self.selected {
            self.selected = state.selected();
            self.printed.clear();
            match self.selected {
                Some(other) => println!("== {}", display_name(state, other)),
                None => println!("== no conversation open"),
            }
        }

        if state.phase() == Phase::Ready {
            // Drop ids that were deleted so the view does not grow unbounded.
            let visible: HashSet<MessageId> = state.messages().iter().map(|m| m.id).collect();
            self.printed.retain(|id| visible.contains(id));

            for message in state.messages() {
                if self.printed.insert(message.id) {
                    let who = if message.sender_id == state.me() {
                        "me".to_string()
                    } else {
                        display_name(state, message.sender_id)
                    };
                    let image = message
                        .image
                        .as_deref()
                        .map(|url| format!(" [image {url}]"))
                        .unwrap_or_default();
                    let seen = if message.seen { " ✓" } else { "" };
                    println!(
                        "[{}] {who}: {}{image}{seen}  ({})",
                        message.created_at.format("%H:%M"),
                        message.text,
                        message.id
                    );
                }
            }
        }

        for notice in notices {
            match notice.kind {
                NoticeKind::NewMessage => println!("* {}", notice.text),
                NoticeKind::Info => println!("- {}", notice.text),
                NoticeKind::Error => println!("! {}", notice.text),
            }
        }
    }
}

fn display_name(state: &ChatState, user: UserId) -> String {
    state
        .user(user)
        .map(|u| u.full_name.clone())
        .unwrap_or_else(|| user.to_string())
}

fn print_contacts(state: &ChatState) {
    println!("-- contacts --");
    for user in state.users() {
        let presence = if state.is_online(user.id) { "online" } else { "offline" };
        let unseen = match state.unseen(user.id) {
            0 => String::new(),
            n => format!(" ({n} new)"),
        };
        let preview = state
            .last_message(user.id)
            .map(|m| {
                if m.text.is_empty() && m.image.is_some() {
                    " | [image]".to_string()
                } else {
                    format!(" | {}", m.text)
                }
            })
            .unwrap_or_default();
        println!("{} [{}] {presence}{unseen}{preview}", user.full_name, user.id);
    }
}
