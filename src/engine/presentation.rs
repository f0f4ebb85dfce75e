//! Bounded, time-ordered display of recent envelopes.

use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::types::{DisplayZone, Envelope, EnvelopeKind};

pub type SharedDisplay = Arc<RwLock<DisplayBuffer>>;

/// Recent envelopes kept for rendering.
///
/// The buffer holds at most `capacity` envelopes and, when a window is set,
/// only envelopes whose timestamp lies within `window` of the latest push.
/// It is fully re-sorted by timestamp on every push; envelopes with equal
/// timestamps keep arrival order.
#[derive(Debug)]
pub struct DisplayBuffer {
    capacity: usize,
    window: Option<ChronoDuration>,
    entries: Vec<Envelope>,
}

impl DisplayBuffer {
    pub fn new(capacity: usize, window: Option<std::time::Duration>) -> Self {
        Self {
            capacity: capacity.max(1),
            window: window.and_then(|w| ChronoDuration::from_std(w).ok()),
            entries: Vec::new(),
        }
    }

    pub fn shared(self) -> SharedDisplay {
        Arc::new(RwLock::new(self))
    }

    /// Buffer `envelope`, which must already carry a timestamp; `now` is the
    /// aggregator's receipt time and anchors the eviction window.
    pub fn push(&mut self, envelope: Envelope, now: DateTime<Utc>) {
        self.entries.push(envelope);
        self.entries.sort_by_key(|e| e.timestamp);

        if let Some(window) = self.window {
            let horizon = now - window;
            self.entries
                .retain(|e| e.timestamp.map_or(true, |ts| ts >= horizon));
        }
        if self.entries.len() > self.capacity {
            let excess = self.entries.len() - self.capacity;
            self.entries.drain(..excess);
        }
    }

    /// Buffered envelopes, earliest first.
    pub fn view(&self) -> &[Envelope] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `[LABEL] timestamp - node_id - message`, with the timestamp in `zone`.
pub fn render_line(envelope: &Envelope, zone: &DisplayZone) -> String {
    let label = match envelope.kind {
        EnvelopeKind::Log => envelope.severity.map_or("UNKNOWN", |s| s.as_str()),
        kind => kind.as_str(),
    };
    let timestamp = envelope
        .timestamp
        .map(|ts| zone.normalize(&ts).to_rfc3339_opts(SecondsFormat::Micros, false))
        .unwrap_or_default();
    let text = match (&envelope.message, envelope.status) {
        (Some(message), _) => message.as_str(),
        (None, Some(status)) => status.as_str(),
        (None, None) => "",
    };
    format!("[{}] {} - {} - {}", label, timestamp, envelope.node_id, text)
}

/// Receives the sorted view after every arrival.
pub trait Presenter: Send + Sync {
    fn present(&self, view: &[Envelope], zone: &DisplayZone);
}

/// Redraws the whole buffered view on stdout.
///
/// A failed write is logged once; the next successful redraw re-arms it.
#[derive(Debug, Default)]
pub struct StdoutPresenter {
    failing: AtomicBool,
}

impl StdoutPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    fn render_to(&self, out: &mut dyn Write, view: &[Envelope], zone: &DisplayZone) {
        let written = writeln!(out, "----").and_then(|_| {
            view.iter()
                .try_for_each(|envelope| writeln!(out, "{}", render_line(envelope, zone)))
        });
        match written {
            Ok(()) => self.failing.store(false, Ordering::Relaxed),
            Err(e) => {
                if !self.failing.swap(true, Ordering::Relaxed) {
                    log::warn!("Failed to render {} envelopes: {}", view.len(), e);
                }
            }
        }
    }
}

impl Presenter for StdoutPresenter {
    fn present(&self, view: &[Envelope], zone: &DisplayZone) {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        self.render_to(&mut out, view, zone);
    }
}
