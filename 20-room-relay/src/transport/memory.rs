//! In-process pub/sub bus.
//!
//! Every subscriber sees every frame published after it was created and keeps
//! the ones matching its patterns, which is how Redis behaves for
//! `PSUBSCRIBE`. Several adaptors sharing one bus behave like several
//! processes sharing one Redis server.

use std::collections::VecDeque;

use tokio::sync::broadcast;
use tracing::warn;

use super::{Publisher, RelayError, RelayEvent, Subscriber};

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum Frame {
    Publish { channel: String, payload: Vec<u8> },
    UnsubscribeAll,
}

#[derive(Clone)]
pub struct MemoryBus {
    frames: broadcast::Sender<Frame>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// `capacity` bounds how far a slow subscriber may fall behind before it
    /// starts skipping frames.
    pub fn with_capacity(capacity: usize) -> Self {
        let (frames, _) = broadcast::channel(capacity);
        Self { frames }
    }

    pub fn publisher(&self) -> MemoryPublisher {
        MemoryPublisher {
            frames: self.frames.clone(),
        }
    }

    /// Opens a subscriber. It only sees frames published from now on.
    pub fn subscriber(&self) -> MemorySubscriber {
        MemorySubscriber {
            frames: self.frames.subscribe(),
            patterns: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    /// Drops every pattern on every subscriber, which then report a
    /// subscription count of zero.
    pub fn unsubscribe_all(&self) {
        let _ = self.frames.send(Frame::UnsubscribeAll);
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MemoryPublisher {
    frames: broadcast::Sender<Frame>,
}

impl Publisher for MemoryPublisher {
    async fn publish(&mut self, channel: &str, payload: &[u8]) -> Result<(), RelayError> {
        // No live subscribers is not an error, same as PUBLISH returning 0.
        let _ = self.frames.send(Frame::Publish {
            channel: channel.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

pub struct MemorySubscriber {
    frames: broadcast::Receiver<Frame>,
    patterns: Vec<String>,
    pending: VecDeque<RelayEvent>,
}

impl Subscriber for MemorySubscriber {
    async fn psubscribe(&mut self, pattern: &str) -> Result<(), RelayError> {
        if !self.patterns.iter().any(|existing| existing == pattern) {
            self.patterns.push(pattern.to_string());
        }
        self.pending.push_back(RelayEvent::Subscription {
            kind: "psubscribe".to_string(),
            channel: pattern.to_string(),
            count: self.patterns.len(),
        });
        Ok(())
    }

    async fn receive(&mut self) -> RelayEvent {
        if let Some(event) = self.pending.pop_front() {
            return event;
        }

        loop {
            match self.frames.recv().await {
                Ok(Frame::Publish { channel, payload }) => {
                    let matched = self
                        .patterns
                        .iter()
                        .find(|pattern| glob_match(pattern, &channel));
                    if let Some(pattern) = matched {
                        return RelayEvent::Message {
                            pattern: pattern.clone(),
                            channel,
                            payload,
                        };
                    }
                }
                Ok(Frame::UnsubscribeAll) => {
                    self.patterns.clear();
                    return RelayEvent::Subscription {
                        kind: "punsubscribe".to_string(),
                        channel: String::new(),
                        count: 0,
                    };
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "memory bus subscriber lagged; frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return RelayEvent::Error(RelayError::Closed);
                }
            }
        }
    }
}

/// Redis-style glob matching limited to `*` (any run) and `?` (any byte).
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern = pattern.as_bytes();
    let text = text.as_bytes();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == b'?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, consumed)) => {
                    p = star + 1;
                    t = consumed + 1;
                    backtrack = Some((star, consumed + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}
