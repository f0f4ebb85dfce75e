use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Source of uniform draws in `[0, 1)` for fault injection, severity
/// selection and template picking.
pub trait Entropy: Send + Sync {
    fn draw(&self) -> f64;

    /// Uniform index in `0..len`. `len` must be non-zero.
    fn pick(&self, len: usize) -> usize {
        ((self.draw() * len as f64) as usize).min(len.saturating_sub(1))
    }

    /// Uniform integer in `low..=high`.
    fn between(&self, low: u64, high: u64) -> u64 {
        if high <= low {
            return low;
        }
        let spread = high - low;
        // Float to int casts saturate, so a full-width range cannot overflow.
        let offset = (self.draw() * (spread as f64 + 1.0)) as u64;
        low + offset.min(spread)
    }
}

/// Draws from the operating system RNG backing v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl Entropy for OsEntropy {
    fn draw(&self) -> f64 {
        // Low 53 bits sit below the fixed variant bits of a v4 UUID.
        let bits = (uuid::Uuid::new_v4().as_u128() as u64) & ((1u64 << 53) - 1);
        bits as f64 / (1u64 << 53) as f64
    }
}

/// Replays a fixed sequence of draws, cycling when exhausted.
#[derive(Debug)]
pub struct ScriptedEntropy {
    script: Vec<f64>,
    queue: Mutex<VecDeque<f64>>,
}

impl ScriptedEntropy {
    pub fn new(script: Vec<f64>) -> Self {
        Self {
            queue: Mutex::new(script.iter().copied().collect()),
            script,
        }
    }

    pub fn constant(value: f64) -> Self {
        Self::new(vec![value])
    }
}

impl Entropy for ScriptedEntropy {
    fn draw(&self) -> f64 {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if queue.is_empty() {
            queue.extend(self.script.iter().copied());
        }
        queue.pop_front().unwrap_or(0.0)
    }
}
