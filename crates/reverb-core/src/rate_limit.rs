//! Per-workspace call budget against the upstream feed API.
//!
//! The limiter is an explicit service injected into the orchestrator and
//! shared (via `Arc`) across concurrent source fetches within a run and
//! across concurrent runs for the same workspace. The counter map lives
//! behind a single mutex so updates are atomic.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::error::AppError;

/// Configuration for the workspace rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum upstream calls per window per workspace.
    pub max_calls: u32,
    /// Length of the fixed window.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: 60,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct WindowState {
    window_start: Instant,
    used: u32,
}

/// Thread-safe per-workspace rate limiter with fixed windows.
#[derive(Debug)]
pub struct WorkspaceRateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<Uuid, WindowState>>,
}

impl WorkspaceRateLimiter {
    /// Creates a limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true if a call would currently be permitted.
    ///
    /// Non-consuming probe used by the eligibility gate; the actual permit
    /// is taken by [`acquire`](Self::acquire) immediately before each
    /// network round-trip.
    pub fn check(&self, workspace_id: Uuid) -> bool {
        let mut windows = self.windows.lock().unwrap();
        let state = Self::current_window(&mut windows, workspace_id, self.config.window);
        state.used < self.config.max_calls
    }

    /// Consumes one permit for the workspace.
    ///
    /// Returns [`AppError::RateLimited`] when the window budget is spent.
    pub fn acquire(&self, workspace_id: Uuid) -> Result<(), AppError> {
        let mut windows = self.windows.lock().unwrap();
        let state = Self::current_window(&mut windows, workspace_id, self.config.window);
        if state.used >= self.config.max_calls {
            return Err(AppError::RateLimited);
        }
        state.used += 1;
        Ok(())
    }

    /// Remaining permits in the current window.
    pub fn remaining(&self, workspace_id: Uuid) -> u32 {
        let mut windows = self.windows.lock().unwrap();
        let state = Self::current_window(&mut windows, workspace_id, self.config.window);
        self.config.max_calls.saturating_sub(state.used)
    }

    fn current_window<'a>(
        windows: &'a mut HashMap<Uuid, WindowState>,
        workspace_id: Uuid,
        window: Duration,
    ) -> &'a mut WindowState {
        let state = windows.entry(workspace_id).or_insert_with(|| WindowState {
            window_start: Instant::now(),
            used: 0,
        });
        if state.window_start.elapsed() >= window {
            state.window_start = Instant::now();
            state.used = 0;
        }
        state
    }
}
