//! `AgentControl`: the capability interface the orchestrator drives an
//! agent backend through. Implementations may wrap OS processes, terminal
//! multiplexers, or (in tests) an in-memory double.

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait AgentControl: Send + Sync {
    async fn started(&self) -> bool;
    async fn is_alive(&self) -> bool;
    async fn send_prompt(&self, text: &str) -> Result<()>;
    async fn preview(&self) -> Result<String>;
    async fn pause(&self) -> Result<()>;
    async fn resume(&self) -> Result<()>;
    async fn kill(&self) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// In-memory `AgentControl` double for orchestrator tests. Every probe
    /// and command is independently toggleable.
    pub struct MockAgentControl {
        pub alive: AtomicBool,
        pub started: AtomicBool,
        pub paused: AtomicBool,
        pub fail_kill: AtomicBool,
        pub prompts: Mutex<Vec<String>>,
    }

    impl Default for MockAgentControl {
        fn default() -> Self {
            Self {
                alive: AtomicBool::new(true),
                started: AtomicBool::new(true),
                paused: AtomicBool::new(false),
                fail_kill: AtomicBool::new(false),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AgentControl for MockAgentControl {
        async fn started(&self) -> bool {
            self.started.load(Ordering::Acquire)
        }

        async fn is_alive(&self) -> bool {
            self.alive.load(Ordering::Acquire)
        }

        async fn send_prompt(&self, text: &str) -> Result<()> {
            self.prompts.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn preview(&self) -> Result<String> {
            Ok(self.prompts.lock().unwrap().last().cloned().unwrap_or_default())
        }

        async fn pause(&self) -> Result<()> {
            self.paused.store(true, Ordering::Release);
            Ok(())
        }

        async fn resume(&self) -> Result<()> {
            self.paused.store(false, Ordering::Release);
            Ok(())
        }

        async fn kill(&self) -> Result<()> {
            if self.fail_kill.load(Ordering::Acquire) {
                return Err(crate::error::ToolkitError::Internal("mock kill failure".into()));
            }
            self.alive.store(false, Ordering::Release);
            Ok(())
        }
    }
}
