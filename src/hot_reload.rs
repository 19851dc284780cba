// Shader hot reload
//
// Watches the compiled shader directory and reports when any SPIR-V file
// changes. Rebuilding pipelines is left to the caller.

use anyhow::{Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::mpsc;

pub struct ShaderWatcher {
    /// Kept alive for the lifetime of the watch
    _watcher: RecommendedWatcher,
    event_rx: mpsc::Receiver<notify::Event>,
}

impl ShaderWatcher {
    pub fn new(dir: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<notify::Event>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(e) => log::warn!("Shader watch error: {}", e),
            }
        })
        .context("Failed to create shader watcher")?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch shader directory {:?}", dir))?;

        log::info!("Watching {:?} for shader changes", dir);

        Ok(Self {
            _watcher: watcher,
            event_rx: rx,
        })
    }

    /// Drain pending events; true if any compiled shader changed
    pub fn poll_changed(&self) -> bool {
        let mut changed = false;
        while let Ok(event) = self.event_rx.try_recv() {
            if is_shader_change(&event) {
                log::debug!("Shader change: {:?}", event.paths);
                changed = true;
            }
        }
        changed
    }
}

pub fn is_shader_change(event: &notify::Event) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|path| path.extension().is_some_and(|ext| ext == "spv"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind};
    use notify::Event;

    #[test]
    fn spirv_writes_count_as_changes() {
        let modify = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path("shaders/simple_shader.vert.spv".into());
        let create = Event::new(EventKind::Create(CreateKind::File))
            .add_path("shaders/flat_shader.frag.spv".into());
        assert!(is_shader_change(&modify));
        assert!(is_shader_change(&create));
    }

    #[test]
    fn sources_and_other_events_are_ignored() {
        let glsl = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path("shaders/simple_shader.vert".into());
        let removed = Event::new(EventKind::Remove(RemoveKind::File))
            .add_path("shaders/simple_shader.vert.spv".into());
        let read = Event::new(EventKind::Access(AccessKind::Any))
            .add_path("shaders/simple_shader.vert.spv".into());
        assert!(!is_shader_change(&glsl));
        assert!(!is_shader_change(&removed));
        assert!(!is_shader_change(&read));
    }

    #[test]
    fn watching_a_missing_directory_fails() {
        assert!(ShaderWatcher::new(Path::new("definitely/not/a/shader/dir")).is_err());
    }
}
