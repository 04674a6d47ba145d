//! FIFO of requests waiting for the data link.

use std::collections::VecDeque;

use crate::message::Command;
use crate::protocol::Request;

/// Caller supplied request identifier.
pub type RequestId = u64;

/// Who is waiting for the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A caller; resolved with `Complete`.
    Caller(RequestId),
    /// A list refresh issued by the connection itself; announced as an event.
    Refresh,
    /// Version or user properties fetched right after a login.
    SessionInfo,
}

// ── PendingRequest ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub origin: Origin,
    pub request: Request,
    /// Consecutive timeouts since the last (re)send from a fresh login.
    pub timeouts: u32,
    /// Reconnect cycles this request went through.
    pub reconnects: u32,
    /// Resubmissions after stale-list answers.
    pub stale_retries: u32,
    /// Logins forced by not-logged-in answers to this request.
    pub relogins: u32,
}

impl PendingRequest {
    pub fn new(origin: Origin, request: Request) -> Self {
        Self {
            origin,
            request,
            timeouts: 0,
            reconnects: 0,
            stale_retries: 0,
            relogins: 0,
        }
    }

    pub fn command(&self) -> Command {
        self.request.command()
    }
}

// ── RequestQueue ─────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct RequestQueue {
    items: VecDeque<PendingRequest>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, pending: PendingRequest) {
        self.items.push_back(pending);
    }

    /// Put a request back ahead of everything else.
    pub fn push_front(&mut self, pending: PendingRequest) {
        self.items.push_front(pending);
    }

    pub fn pop_front(&mut self) -> Option<PendingRequest> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, origin: Origin, command: Command) -> bool {
        self.items
            .iter()
            .any(|p| p.origin == origin && p.command() == command)
    }

    /// Remove every request, in FIFO order.
    pub fn drain(&mut self) -> impl Iterator<Item = PendingRequest> + '_ {
        self.items.drain(..)
    }
}

// ── Tests ────────────────────────────────────────────────────────
