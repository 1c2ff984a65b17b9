//! Terminal chat client for a running session manager.

use anyhow::{bail, Context, Result};
use clap::Args;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::tungstenite::{self, Message};
use uuid::Uuid;

use rma_core::contracts::{ClientMessage, ClientUpdate};
use rma_core::endpoint::query_url;
use rma_core::transcript::{ChatEntry, EntryKind, Sender, Transcript};

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Session manager base URL (http, https, ws or wss)
    #[arg(long, env = "VITE_SESSION_MANAGER_URL", default_value = "http://localhost:5000")]
    pub url: String,

    /// Reuse an existing session id (default: a new random one)
    #[arg(long)]
    pub session_id: Option<String>,

    /// Send a single message, print the answer and exit
    #[arg(long, short = 'm')]
    pub message: Option<String>,
}

pub fn run(args: ChatArgs) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(chat(args))
}

async fn chat(args: ChatArgs) -> Result<()> {
    let session_id = args
        .session_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let url = query_url(&args.url, &session_id)?;
    let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    let (mut sink, mut stream) = ws.split();

    let mut transcript = Transcript::new();
    let mut view = View::default();

    if let Some(message) = args.message {
        submit(&mut sink, &mut transcript, &message).await?;
        loop {
            let terminal = apply_frame(&mut transcript, stream.next().await);
            view.print(&transcript);
            if terminal {
                break;
            }
        }
        return finish(&transcript);
    }

    eprintln!("session {session_id}. Type a message and press enter; Ctrl-D quits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => submit(&mut sink, &mut transcript, &line).await?,
                None => break,
            },
            frame = stream.next() => {
                apply_frame(&mut transcript, frame);
            }
        }
        view.print(&transcript);
        if transcript.is_closed() {
            return finish(&transcript);
        }
    }

    let _ = sink.close().await;
    Ok(())
}

async fn submit<S>(sink: &mut S, transcript: &mut Transcript, text: &str) -> Result<()>
where
    S: futures::Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let frame = ClientMessage::text(Uuid::new_v4().to_string(), text.trim());
    sink.send(Message::text(serde_json::to_string(&frame)?))
        .await
        .context("failed to send message")?;
    transcript.push_user(text.trim());
    Ok(())
}

/// Apply one inbound frame. Returns true once the current dialog is over:
/// a final answer arrived or the conversation ended.
fn apply_frame(
    transcript: &mut Transcript,
    frame: Option<std::result::Result<Message, tungstenite::Error>>,
) -> bool {
    match frame {
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientUpdate>(text.as_str()) {
            Ok(update) => {
                let done = update.error.is_some()
                    || update.answer.as_ref().is_some_and(|a| !a.is_intermediate());
                transcript.apply(update);
                done
            }
            Err(_) => {
                transcript.apply_raw(text.as_str());
                true
            }
        },
        Some(Ok(Message::Close(_))) | None => {
            transcript.transport_error("Connection closed by server");
            true
        }
        Some(Ok(_)) => false,
        Some(Err(e)) => {
            transcript.transport_error(format!("Connection error: {e}"));
            true
        }
    }
}

fn finish(transcript: &Transcript) -> Result<()> {
    if transcript.is_closed() {
        let reason = transcript
            .entries()
            .iter()
            .rev()
            .find(|e| e.kind == EntryKind::Error)
            .map(|e| e.text.clone())
            .unwrap_or_default();
        bail!("conversation ended: {reason}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Prints transcript entries once each. The intermediate entry is reprinted
/// only when its text changes.
#[derive(Debug, Default)]
struct View {
    next_id: u64,
    shown_intermediate: Option<String>,
}

impl View {
    fn print(&mut self, transcript: &Transcript) {
        for line in self.render(transcript) {
            println!("{line}");
        }
    }

    fn render(&mut self, transcript: &Transcript) -> Vec<String> {
        let mut lines = Vec::new();
        for entry in transcript.entries() {
            if entry.kind == EntryKind::Intermediate || entry.id < self.next_id {
                continue;
            }
            self.next_id = entry.id + 1;
            // the user already sees what they typed
            if entry.sender == Sender::User {
                continue;
            }
            lines.push(format_entry(entry));
        }

        match transcript.intermediate() {
            Some(entry) if self.shown_intermediate.as_deref() != Some(entry.text.as_str()) => {
                self.shown_intermediate = Some(entry.text.clone());
                lines.push(format!("  ... {}", entry.text));
            }
            Some(_) => {}
            None => self.shown_intermediate = None,
        }
        lines
    }
}

fn format_entry(entry: &ChatEntry) -> String {
    match entry.kind {
        EntryKind::Image => format!("bot> [image] {}", entry.image_url.as_deref().unwrap_or("")),
        EntryKind::Error => format!("error> {}", entry.text),
        _ => format!("bot> {}", entry.text),
    }
}
