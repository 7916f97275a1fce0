//! Transient notices surfaced to the user.

use std::collections::VecDeque;

use duet_shared::ChatError;

/// Notices kept before the oldest are dropped.
pub const MAX_NOTICES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// A message arrived in a conversation that is not open.
    NewMessage,
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Info,
            text: text.into(),
        }
    }

    pub fn error(err: &ChatError) -> Self {
        Self {
            kind: NoticeKind::Error,
            text: err.message().to_string(),
        }
    }
}

/// Bounded FIFO of notices waiting to be shown.
#[derive(Debug, Clone, Default)]
pub struct NoticeQueue {
    items: VecDeque<Notice>,
}

impl NoticeQueue {
    pub fn push(&mut self, notice: Notice) {
        if self.items.len() == MAX_NOTICES {
            self.items.pop_front();
        }
        self.items.push_back(notice);
    }

    /// Take every pending notice, oldest first.
    pub fn drain(&mut self) -> Vec<Notice> {
        self.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oldest_notice_is_dropped_when_full() {
        let mut queue = NoticeQueue::default();
        for i in 0..=MAX_NOTICES {
            queue.push(Notice::info(i.to_string()));
        }
        assert_eq!(queue.len(), MAX_NOTICES);
        let drained = queue.drain();
        assert_eq!(drained[0].text, "1");
        assert!(queue.is_empty());
    }
}
