//! Post-export hook registry
//!
//! Collaborators can chain side effects (notifications, cache busts) behind
//! a completed export without touching the exporter itself. Hooks run in
//! registration order after the transaction commits; a hook failure is
//! logged and never fails the already-completed export.

use async_trait::async_trait;

use searchlink_common::types::ExportEvent;

use crate::exporter::ExportOutcome;

/// Side effect invoked after an export invocation completes
#[async_trait]
pub trait PostExportHook: Send + Sync {
    /// Short name used in log lines
    fn name(&self) -> &str;

    /// Called after commit with the event that drove the invocation and
    /// whether it was applied or skipped as stale
    async fn after_export(&self, event: &ExportEvent, outcome: ExportOutcome)
        -> anyhow::Result<()>;
}

/// Ordered list of post-export hooks
#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Box<dyn PostExportHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Box<dyn PostExportHook>) {
        self.hooks.push(hook);
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every hook in order, logging failures instead of propagating them
    pub async fn run(&self, event: &ExportEvent, outcome: ExportOutcome) {
        for hook in &self.hooks {
            if let Err(err) = hook.after_export(event, outcome).await {
                tracing::warn!(
                    hook = hook.name(),
                    binding_id = %event.binding_id,
                    error = %err,
                    "Post-export hook failed"
                );
            }
        }
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.hooks.iter().map(|h| h.name()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use searchlink_common::types::Operation;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PostExportHook for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn after_export(
            &self,
            _event: &ExportEvent,
            _outcome: ExportOutcome,
        ) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl PostExportHook for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn after_export(
            &self,
            _event: &ExportEvent,
            _outcome: ExportOutcome,
        ) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    fn event() -> ExportEvent {
        ExportEvent {
            operation: Operation::Update,
            binding_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload: None,
        }
    }

    #[tokio::test]
    async fn test_hooks_run_in_order_and_failures_do_not_stop_the_chain() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = HookRegistry::new();
        registry.register(Box::new(Failing));
        registry.register(Box::new(Counting {
            calls: Arc::clone(&calls),
        }));

        registry.run(&event(), ExportOutcome::Applied).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
