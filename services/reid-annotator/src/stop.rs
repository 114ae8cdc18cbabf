//! Operator stop request: Ctrl-C, or `q` typed on stdin while the display is active.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

pub const STOP_KEY: &str = "q";

#[derive(Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self { Self::default() }

    /// Spawns the Ctrl-C watcher, plus the stdin key reader when `watch_keys` is set.
    pub fn install(watch_keys: bool) -> Self {
        let signal = Self::new();
        let on_ctrl_c = signal.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                on_ctrl_c.trigger();
            }
        });
        if watch_keys {
            let on_key = signal.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(tokio::io::stdin()).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if on_key.handle_key(&line) { break; }
                }
            });
        }
        signal
    }

    pub fn trigger(&self) { self.flag.store(true, Ordering::SeqCst); }

    pub fn is_stopped(&self) -> bool { self.flag.load(Ordering::SeqCst) }

    /// Returns true when the input requested a stop. Anything else only prints a reminder.
    pub fn handle_key(&self, input: &str) -> bool {
        if input.trim() == STOP_KEY {
            info!("stop key pressed");
            self.trigger();
            return true;
        }
        println!("Press '{STOP_KEY}' key for EXIT!");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_stop_key_stops() {
        let s = StopSignal::new();
        assert!(!s.handle_key("x"));
        assert!(!s.handle_key(""));
        assert!(!s.is_stopped());
        assert!(s.handle_key("q\n"));
        assert!(s.is_stopped());
    }

    #[test]
    fn clones_share_the_flag() {
        let s = StopSignal::new();
        let c = s.clone();
        c.trigger();
        assert!(s.is_stopped());
    }
}
