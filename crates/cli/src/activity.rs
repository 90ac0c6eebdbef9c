//! JSON-lines activity log fed by the engine's post-forward hooks.

use std::path::PathBuf;

use {
    async_trait::async_trait,
    tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex},
};

use telefeed_common::{
    Result,
    hooks::{HookEvent, HookHandler, HookPayload},
};

/// Appends one JSON object per hook event to a file.
pub struct ActivityLog {
    path: PathBuf,
    /// Keeps concurrent dispatches from interleaving lines.
    write: Mutex<()>,
}

impl ActivityLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write: Mutex::new(()),
        }
    }
}

#[async_trait]
impl HookHandler for ActivityLog {
    fn name(&self) -> &str {
        "activity-log"
    }

    fn events(&self) -> &[HookEvent] {
        &[
            HookEvent::MessageForwarded,
            HookEvent::MessageEdited,
            HookEvent::MessageDeleted,
            HookEvent::ForwardFailed,
            HookEvent::SessionExpired,
        ]
    }

    async fn handle(&self, _event: HookEvent, payload: &HookPayload) -> Result<()> {
        let mut line = serde_json::to_vec(payload)?;
        line.push(b'\n');

        let _guard = self.write.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
