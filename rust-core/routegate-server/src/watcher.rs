//! Routes file watcher for hot reload.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use routegate_core::configurator::Configurator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Reloads the route table when the routes file changes
///
/// The parent directory is watched so that editors which replace the file
/// instead of writing it in place are still noticed.
pub struct RouteWatcher {
    path: PathBuf,
    configurator: Arc<Configurator>,
}

impl RouteWatcher {
    /// Create a watcher for `path`
    pub fn new(path: &Path, configurator: Arc<Configurator>) -> Self {
        Self {
            path: path.to_path_buf(),
            configurator,
        }
    }

    /// Whether an event concerns the routes file
    fn is_relevant(&self, event: &Event) -> bool {
        let changed = event.kind.is_modify() || event.kind.is_create();
        changed
            && event
                .paths
                .iter()
                .any(|p| p.file_name() == self.path.file_name())
    }

    /// Reload on a relevant event; a failed reload keeps the current table
    fn apply(&self, event: &Event) -> bool {
        if !self.is_relevant(event) {
            return false;
        }
        tracing::info!(path = ?self.path, "Routes file change detected, reloading...");
        match self.configurator.reload(&self.path) {
            Ok(report) => {
                tracing::info!(
                    accepted = report.accepted,
                    rejected = report.rejected.len(),
                    "Route table swapped"
                );
                true
            }
            Err(e) => {
                tracing::error!("Failed to reload routes: {}. Keeping current route table.", e);
                false
            }
        }
    }

    /// Start watching in the background
    ///
    /// The returned watcher must be kept alive for reloads to happen.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    self.apply(&event);
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?dir, "Routes watcher started");
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, EventKind, ModifyKind};
    use routegate_core::dispatch::DispatchKey;
    use routegate_core::handler::HandlerCatalog;
    use routegate_core::response::ApiResponse;
    use serde_json::Value;

    fn configurator() -> Arc<Configurator> {
        let catalog = HandlerCatalog::new().with("system.echo", |_req| async { Ok(ApiResponse::ok(Value::Null)) });
        Arc::new(Configurator::new(catalog))
    }

    fn route(path: &str) -> String {
        format!(r#"{{"apiRoutes": [{{"path": "{path}", "method": "GET", "auth": "none", "handler": "system.echo"}}]}}"#)
    }

    #[test]
    fn test_apply_reloads_and_keeps_table_on_failure() {
        let dir = std::env::temp_dir().join(format!("routegate-watch-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("routes.json");
        std::fs::write(&file, route("/v1")).unwrap();

        let configurator = configurator();
        configurator.load_file(&file).unwrap();
        let watcher = RouteWatcher::new(&file, configurator.clone());

        std::fs::write(&file, route("/v2")).unwrap();
        let modified = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(file.clone());
        assert!(watcher.apply(&modified));
        assert!(configurator.snapshot().resolve(&DispatchKey::new("/v2", "GET")).is_some());

        std::fs::write(&file, "{ broken").unwrap();
        assert!(!watcher.apply(&modified));
        assert!(configurator.snapshot().resolve(&DispatchKey::new("/v2", "GET")).is_some());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_irrelevant_events_are_ignored() {
        let watcher = RouteWatcher::new(Path::new("/etc/routegate/routes.json"), configurator());

        let other_file = Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/etc/routegate/settings.json"));
        assert!(!watcher.is_relevant(&other_file));

        let access = Event::new(EventKind::Access(AccessKind::Any)).add_path(PathBuf::from("/etc/routegate/routes.json"));
        assert!(!watcher.is_relevant(&access));

        let created = Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/etc/routegate/routes.json"));
        assert!(watcher.is_relevant(&created));
    }
}
