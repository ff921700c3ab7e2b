//! # Configuration Hot Reload
//!
//! Watches a configuration file and re-parses it on every change so runtime
//! knobs (traversal limit, cache enable flag) can be applied without restart.

use crate::config::Config;
use crate::file_loader::load_and_validate;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Configuration reload event.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigReloadEvent {
    /// The watcher is installed
    Ready,

    /// The file changed and parsed into a valid configuration
    Reloaded { path: PathBuf, config: Box<Config> },

    /// The file was removed; the running configuration stays in effect
    Removed(PathBuf),

    /// The file changed but could not be loaded or failed validation
    Error { path: PathBuf, error: String }
}

/// Turns a raw file-system notification into a reload event by loading the
/// file again. Returns `None` for notifications that do not affect content.
pub fn reload_event_for(kind: &EventKind, path: &Path) -> Option<ConfigReloadEvent> {
    match kind {
        EventKind::Create(_) | EventKind::Modify(_) => match load_and_validate(path) {
            Ok(config) => {
                info!("Config file reloaded: {:?}", path);
                Some(ConfigReloadEvent::Reloaded {
                    path: path.to_path_buf(),
                    config: Box::new(config)
                })
            }
            Err(e) => {
                warn!("Rejected config reload from {:?}: {}", path, e);
                Some(ConfigReloadEvent::Error {
                    path: path.to_path_buf(),
                    error: e.to_string()
                })
            }
        },
        EventKind::Remove(_) => {
            warn!("Config file removed: {:?}", path);
            Some(ConfigReloadEvent::Removed(path.to_path_buf()))
        }
        _ => {
            debug!("Ignoring event: {:?}", kind);
            None
        }
    }
}

/// Watch a configuration file for changes and emit reload events.
///
/// # M-CANONICAL-DOCS
///
/// ## Usage
/// ```rust,no_run
/// use config::{hot_reload::ConfigReloadEvent, watch_config};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let (_tx, mut rx) = watch_config(std::path::Path::new("acs.toml")).await?;
///     while let Some(event) = rx.recv().await {
///         if let ConfigReloadEvent::Reloaded { config, .. } = event {
///             println!("traversal limit now {}", config.attributes.traversal_limit);
///         }
///     }
///     Ok(())
/// }
/// ```
///
/// The watcher task stops once every receiver has been dropped.
pub async fn watch_config(
    config_path: &Path
) -> Result<
    (
        tokio::sync::mpsc::Sender<ConfigReloadEvent>,
        tokio::sync::mpsc::Receiver<ConfigReloadEvent>
    ),
    Box<dyn std::error::Error>
> {
    let config_path = config_path.to_path_buf();

    if !config_path.exists() {
        return Err(Box::new(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Config file not found: {:?}", config_path)
        )));
    }

    let (tx, rx) = tokio::sync::mpsc::channel(100);
    let tx_task = tx.clone();
    let path_task = config_path.clone();

    tokio::spawn(async move {
        let (event_tx, mut event_rx) = tokio::sync::mpsc::channel(100);
        let mut watcher = match RecommendedWatcher::new(
            move |res| {
                let _ = event_tx.blocking_send(res);
            },
            notify::Config::default()
        ) {
            Ok(w) => w,
            Err(e) => {
                let error_msg = format!("Failed to create file watcher: {}", e);
                error!("{}", error_msg);
                let _ = tx_task
                    .send(ConfigReloadEvent::Error {
                        path: path_task,
                        error: error_msg
                    })
                    .await;
                return;
            }
        };

        if let Err(e) = watcher.watch(&config_path, RecursiveMode::NonRecursive) {
            let error_msg = format!("Failed to watch config file: {}", e);
            error!("{}", error_msg);
            let _ = tx_task
                .send(ConfigReloadEvent::Error {
                    path: path_task,
                    error: error_msg
                })
                .await;
            return;
        }

        info!("Watching config file: {:?}", config_path);
        let _ = tx_task.send(ConfigReloadEvent::Ready).await;

        loop {
            tokio::select! {
                _ = tx_task.closed() => {
                    debug!("Receiver dropped, stopping watcher for {:?}", config_path);
                    break;
                }
                event_result = event_rx.recv() => {
                    let Some(event_result) = event_result else {
                        break;
                    };

                    match event_result {
                        Ok(event) => {
                            let Some(path) = event.paths.first().cloned() else {
                                continue;
                            };
                            let Some(reload_event) = reload_event_for(&event.kind, &path) else {
                                continue;
                            };
                            if let Err(e) = tx_task.send(reload_event).await {
                                error!("Failed to send config reload event: {}", e);
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Watch error: {}", e);
                        }
                    }
                }
            }
        }
    });

    Ok((tx, rx))
}
