//! Client-side message list reconciliation.
//!
//! A chat client applies every inbound [`ClientUpdate`] to a [`Transcript`].
//! While the relay streams non-final updates the transcript shows at most one
//! intermediate bot entry, replaced in place. The first final update clears
//! it and appends the final text and any image URLs. Errors, whether carried
//! in a frame or raised by the transport, end the transcript.

use crate::contracts::{AnswerFrame, ClientUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Bot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A progress update that will be replaced or removed.
    Intermediate,
    Final,
    Image,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatEntry {
    pub id: u64,
    pub sender: Sender,
    pub kind: EntryKind,
    pub text: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<ChatEntry>,
    next_id: u64,
    closed: bool,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    /// The in-flight intermediate bot entry, if one is shown.
    pub fn intermediate(&self) -> Option<&ChatEntry> {
        self.entries
            .iter()
            .find(|e| e.kind == EntryKind::Intermediate)
    }

    /// Whether an error has ended the conversation.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Record a message typed by the user. Clears any intermediate first.
    pub fn push_user(&mut self, text: impl Into<String>) -> u64 {
        self.clear_intermediate();
        self.push(Sender::User, EntryKind::Final, text.into(), None)
    }

    /// Apply one inbound frame.
    pub fn apply(&mut self, update: ClientUpdate) {
        if let Some(err) = update.error {
            self.fail(err.error_str);
            return;
        }
        if let Some(answer) = update.answer {
            self.apply_answer(answer);
        }
    }

    /// Parse and apply a raw text frame. A frame that does not parse is
    /// treated like a transport failure.
    pub fn apply_raw(&mut self, raw: &str) {
        match serde_json::from_str::<ClientUpdate>(raw) {
            Ok(update) => self.apply(update),
            Err(e) => self.transport_error(format!("Malformed message from server: {e}")),
        }
    }

    /// The connection failed or was closed. No reconnection is attempted.
    pub fn transport_error(&mut self, reason: impl Into<String>) {
        self.fail(reason.into());
    }

    fn apply_answer(&mut self, answer: AnswerFrame) {
        if answer.is_intermediate() {
            match self
                .entries
                .iter_mut()
                .find(|e| e.kind == EntryKind::Intermediate)
            {
                Some(entry) => entry.text = answer.answer_string,
                None => {
                    self.push(Sender::Bot, EntryKind::Intermediate, answer.answer_string, None);
                }
            }
            return;
        }

        self.clear_intermediate();
        if !answer.answer_string.is_empty() {
            self.push(Sender::Bot, EntryKind::Final, answer.answer_string, None);
        }
        for url in answer.data_points {
            self.push(Sender::Bot, EntryKind::Image, String::new(), Some(url));
        }
    }

    fn fail(&mut self, text: String) {
        self.clear_intermediate();
        self.push(Sender::Bot, EntryKind::Error, text, None);
        self.closed = true;
    }

    fn clear_intermediate(&mut self) {
        self.entries.retain(|e| e.kind != EntryKind::Intermediate);
    }

    fn push(&mut self, sender: Sender, kind: EntryKind, text: String, image_url: Option<String>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(ChatEntry {
            id,
            sender,
            kind,
            text,
            image_url,
        });
        id
    }
}
