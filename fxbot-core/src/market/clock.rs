//! Bar-close tick sources that drive the session loop

use async_trait::async_trait;

use super::types::TickEvent;

/// Source of bar-close events.
///
/// Returning `None` ends the session cleanly. Implementations may block on
/// real time or replay prepared history; the engine does not care which.
#[async_trait]
pub trait TickSource: Send {
    async fn next(&mut self) -> Option<TickEvent>;
}

/// Replays a prepared sequence of ticks (tests, demos, historical replay)
pub struct ReplayTickSource {
    ticks: std::vec::IntoIter<TickEvent>,
}

impl ReplayTickSource {
    pub fn new(ticks: Vec<TickEvent>) -> Self {
        Self {
            ticks: ticks.into_iter(),
        }
    }
}

#[async_trait]
impl TickSource for ReplayTickSource {
    async fn next(&mut self) -> Option<TickEvent> {
        self.ticks.next()
    }
}
