use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::BoxFuture;

/// Callback run around a game-server update.
pub type UpdateHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    BeforeUpdate,
    AfterUpdate,
}

/// Named update callbacks, run in registration order.
#[derive(Default)]
pub struct UpdateHooks {
    before: Mutex<Vec<(String, UpdateHook)>>,
    after: Mutex<Vec<(String, UpdateHook)>>,
}

impl UpdateHooks {
    pub fn new() -> Self {
        Self::default()
    }

    fn stage(&self, stage: HookStage) -> &Mutex<Vec<(String, UpdateHook)>> {
        match stage {
            HookStage::BeforeUpdate => &self.before,
            HookStage::AfterUpdate => &self.after,
        }
    }

    /// Register a hook. Re-registering a name replaces it in place.
    pub fn register<F, Fut>(&self, stage: HookStage, name: impl Into<String>, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let hook: UpdateHook = Arc::new(move || Box::pin(hook()));
        let mut hooks = self
            .stage(stage)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match hooks.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = hook,
            None => hooks.push((name, hook)),
        }
    }

    /// Remove a hook. Returns whether it was registered.
    pub fn unregister(&self, stage: HookStage, name: &str) -> bool {
        let mut hooks = self
            .stage(stage)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = hooks.len();
        hooks.retain(|(existing, _)| existing != name);
        hooks.len() != before
    }

    pub fn names(&self, stage: HookStage) -> Vec<String> {
        self.stage(stage)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Run every hook of a stage, one after another.
    pub async fn run(&self, stage: HookStage) {
        let hooks: Vec<(String, UpdateHook)> = self
            .stage(stage)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (name, hook) in hooks {
            tracing::debug!(hook = %name, stage = ?stage, "Running update hook");
            hook().await;
        }
    }
}
