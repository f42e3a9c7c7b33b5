// Copyright 2025 Flatbase Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Execution context
//!
//! Carries the ambient cancellation token and optional deadline through
//! every long-running operation. Record loops call [`ExecutionContext::
//! check_at`] once per 16 iterations; I/O and lock waits call
//! [`ExecutionContext::check`] directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::{Error, Result};

/// Iteration mask for periodic cancellation checks: `i & MASK == 0`
pub const CANCEL_CHECK_MASK: usize = 15;

/// Ambient cancellation and deadline for one statement batch
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl ExecutionContext {
    /// A context that is never cancelled
    pub fn background() -> ExecutionContext {
        ExecutionContext {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    /// A context sharing an external cancellation flag
    pub fn with_cancellation(flag: Arc<AtomicBool>) -> ExecutionContext {
        ExecutionContext {
            cancelled: flag,
            deadline: None,
        }
    }

    /// Derive a context that also expires after `timeout`
    pub fn with_timeout(&self, timeout: Duration) -> ExecutionContext {
        ExecutionContext {
            cancelled: Arc::clone(&self.cancelled),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Handle the front-end flips to cancel the running batch
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail fast when cancelled or past the deadline
    pub fn check(&self) -> Result<()> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(Error::ContextCanceled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::ContextDeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Periodic form for record loops
    #[inline]
    pub fn check_at(&self, i: usize) -> Result<()> {
        if i & CANCEL_CHECK_MASK == 0 {
            self.check()
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_observed() {
        let ctx = ExecutionContext::background();
        assert!(ctx.check().is_ok());
        ctx.cancel();
        assert_eq!(ctx.check(), Err(Error::ContextCanceled));
    }

    #[test]
    fn deadline_expires() {
        let ctx = ExecutionContext::background().with_timeout(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(ctx.check(), Err(Error::ContextDeadlineExceeded));
    }

    #[test]
    fn periodic_check_only_fires_on_mask() {
        let ctx = ExecutionContext::background();
        ctx.cancel();
        assert!(ctx.check_at(1).is_ok());
        assert!(ctx.check_at(16).is_err());
    }
}
