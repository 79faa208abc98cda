//! Injection and removal of the KWin listener script.
//!
//! Uses KWin's `org.kde.kwin.Scripting` D-Bus API (`loadScript` /
//! `unloadScript`), so the script does not need to be installed as a KWin
//! package.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};
use zbus::Connection;

use super::dbus::{BUS_NAME, INTERFACE_NAME, OBJECT_PATH};

/// KWin's bus name.
const KWIN_SERVICE: &str = "org.kde.KWin";
const SCRIPTING_PATH: &str = "/Scripting";
const SCRIPTING_INTERFACE: &str = "org.kde.kwin.Scripting";
const SCRIPT_INTERFACE: &str = "org.kde.kwin.Script";

/// Listener script template shipped with the binary.
const LISTENER_TEMPLATE: &str = include_str!("../../kwin/focus_listener.js");

/// File name the embedded script is rendered to.
const LISTENER_FILE: &str = "focus_listener.js";

/// Errors managing the KWin script.
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("KWin script not found: {0}")]
    NotFound(PathBuf),

    #[error("KWin script path is not valid UTF-8: {0}")]
    InvalidPath(PathBuf),

    #[error("KWin refused to load script from {0}")]
    LoadRefused(PathBuf),

    #[error("KWin script '{0}' was not loaded")]
    NotLoaded(String),

    #[error("Failed to write KWin script: {0}")]
    Io(#[from] io::Error),

    #[error("KWin scripting D-Bus call failed: {0}")]
    Dbus(#[from] zbus::Error),
}

/// KWin's script control interface.
#[async_trait]
pub trait ScriptHost: Send + Sync {
    /// Whether a script is registered under `plugin_name`.
    async fn is_script_loaded(&self, plugin_name: &str) -> Result<bool, ScriptError>;

    /// Load a script file. Returns KWin's script id, negative on refusal.
    async fn load_script(&self, path: &str, plugin_name: &str) -> Result<i32, ScriptError>;

    /// Start a loaded script.
    async fn run_script(&self, id: i32) -> Result<(), ScriptError>;

    /// Unload the script registered under `plugin_name`.
    async fn unload_script(&self, plugin_name: &str) -> Result<bool, ScriptError>;
}

/// [`ScriptHost`] backed by KWin on the session bus.
#[derive(Debug, Clone)]
pub struct KwinScripting {
    connection: Connection,
}

impl KwinScripting {
    /// Wrap an existing session bus connection.
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    async fn scripting_proxy(&self) -> Result<zbus::Proxy<'_>, ScriptError> {
        Ok(zbus::Proxy::new(
            &self.connection,
            KWIN_SERVICE,
            SCRIPTING_PATH,
            SCRIPTING_INTERFACE,
        )
        .await?)
    }
}

#[async_trait]
impl ScriptHost for KwinScripting {
    async fn is_script_loaded(&self, plugin_name: &str) -> Result<bool, ScriptError> {
        let proxy = self.scripting_proxy().await?;
        Ok(proxy.call("isScriptLoaded", &(plugin_name,)).await?)
    }

    async fn load_script(&self, path: &str, plugin_name: &str) -> Result<i32, ScriptError> {
        let proxy = self.scripting_proxy().await?;
        Ok(proxy.call("loadScript", &(path, plugin_name)).await?)
    }

    async fn run_script(&self, id: i32) -> Result<(), ScriptError> {
        let path = format!("{SCRIPTING_PATH}/Script{id}");
        let proxy = zbus::Proxy::new(&self.connection, KWIN_SERVICE, path, SCRIPT_INTERFACE).await?;
        proxy.call::<_, _, ()>("run", &()).await?;
        Ok(())
    }

    async fn unload_script(&self, plugin_name: &str) -> Result<bool, ScriptError> {
        let proxy = self.scripting_proxy().await?;
        Ok(proxy.call("unloadScript", &(plugin_name,)).await?)
    }
}

/// Handle to the injected listener script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KwinScript {
    id: i32,
    plugin_name: String,
    path: PathBuf,
}

impl KwinScript {
    /// Load and start the script at `path` under `plugin_name`.
    ///
    /// A script already registered under the same name (e.g. left behind by a
    /// crashed previous run) is unloaded first so events are not doubled.
    pub async fn install(
        host: &dyn ScriptHost,
        path: &Path,
        plugin_name: &str,
    ) -> Result<Self, ScriptError> {
        let path = std::path::absolute(path)?;
        if !path.is_file() {
            return Err(ScriptError::NotFound(path));
        }
        let path_str = path
            .to_str()
            .ok_or_else(|| ScriptError::InvalidPath(path.clone()))?;

        if host.is_script_loaded(plugin_name).await? {
            info!("KWin script '{}' already loaded, reloading", plugin_name);
            host.unload_script(plugin_name).await?;
        }

        let id = host.load_script(path_str, plugin_name).await?;
        if id < 0 {
            return Err(ScriptError::LoadRefused(path));
        }

        host.run_script(id).await?;
        info!("Injected KWin script (ID: {}) from {}", id, path.display());

        Ok(Self {
            id,
            plugin_name: plugin_name.to_string(),
            path,
        })
    }

    /// Unload the script.
    pub async fn remove(self, host: &dyn ScriptHost) -> Result<(), ScriptError> {
        if host.unload_script(&self.plugin_name).await? {
            info!("Unloaded KWin script '{}'", self.plugin_name);
            Ok(())
        } else {
            Err(ScriptError::NotLoaded(self.plugin_name))
        }
    }

    /// KWin's id for the script.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Absolute path the script was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Listener script source with the bus coordinates filled in.
pub fn listener_script_source() -> String {
    LISTENER_TEMPLATE
        .replace("@BUS_NAME@", BUS_NAME)
        .replace("@OBJECT_PATH@", OBJECT_PATH)
        .replace("@INTERFACE_NAME@", INTERFACE_NAME)
}

/// Write the embedded listener script into `dir` and return its path.
pub fn render_listener_script(dir: &Path) -> Result<PathBuf, ScriptError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(LISTENER_FILE);
    std::fs::write(&path, listener_script_source())?;
    debug!("Wrote KWin listener script to {}", path.display());
    Ok(path)
}

/// Remove a script file written by [`render_listener_script`].
pub fn discard_listener_script(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != io::ErrorKind::NotFound
    {
        warn!("Failed to remove KWin script file {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records calls and simulates KWin's bookkeeping.
    #[derive(Default)]
    struct MockHost {
        loaded: Mutex<Vec<String>>,
        calls: Mutex<Vec<String>>,
        refuse_load: bool,
        next_id: i32,
    }

    impl MockHost {
        fn with_loaded(name: &str) -> Self {
            Self {
                loaded: Mutex::new(vec![name.to_string()]),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ScriptHost for MockHost {
        async fn is_script_loaded(&self, plugin_name: &str) -> Result<bool, ScriptError> {
            self.calls.lock().unwrap().push(format!("is_loaded {plugin_name}"));
            Ok(self.loaded.lock().unwrap().iter().any(|n| n == plugin_name))
        }

        async fn load_script(&self, _path: &str, plugin_name: &str) -> Result<i32, ScriptError> {
            self.calls.lock().unwrap().push(format!("load {plugin_name}"));
            let mut loaded = self.loaded.lock().unwrap();
            if self.refuse_load || loaded.iter().any(|n| n == plugin_name) {
                return Ok(-1);
            }
            loaded.push(plugin_name.to_string());
            Ok(self.next_id)
        }

        async fn run_script(&self, id: i32) -> Result<(), ScriptError> {
            self.calls.lock().unwrap().push(format!("run {id}"));
            Ok(())
        }

        async fn unload_script(&self, plugin_name: &str) -> Result<bool, ScriptError> {
            self.calls.lock().unwrap().push(format!("unload {plugin_name}"));
            let mut loaded = self.loaded.lock().unwrap();
            let before = loaded.len();
            loaded.retain(|n| n != plugin_name);
            Ok(loaded.len() != before)
        }
    }

    fn script_file() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = render_listener_script(dir.path()).unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn test_install_and_remove() {
        let (_dir, path) = script_file();
        let host = MockHost {
            next_id: 7,
            ..Default::default()
        };

        let script = KwinScript::install(&host, &path, "kanata-focusd").await.unwrap();
        assert_eq!(script.id(), 7);
        assert_eq!(script.path(), path.as_path());

        script.remove(&host).await.unwrap();
        assert_eq!(
            host.calls(),
            vec![
                "is_loaded kanata-focusd",
                "load kanata-focusd",
                "run 7",
                "unload kanata-focusd",
            ]
        );
    }

    #[tokio::test]
    async fn test_install_unloads_stale_script_first() {
        let (_dir, path) = script_file();
        let host = MockHost::with_loaded("kanata-focusd");

        KwinScript::install(&host, &path, "kanata-focusd").await.unwrap();
        assert_eq!(
            host.calls(),
            vec![
                "is_loaded kanata-focusd",
                "unload kanata-focusd",
                "load kanata-focusd",
                "run 0",
            ]
        );
    }

    #[tokio::test]
    async fn test_install_refused() {
        let (_dir, path) = script_file();
        let host = MockHost {
            refuse_load: true,
            ..Default::default()
        };

        let err = KwinScript::install(&host, &path, "kanata-focusd").await.unwrap_err();
        assert!(matches!(err, ScriptError::LoadRefused(_)));
        assert!(!host.calls().iter().any(|c| c.starts_with("run")));
    }

    #[tokio::test]
    async fn test_install_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let host = MockHost::default();

        let err = KwinScript::install(&host, &dir.path().join("missing.js"), "kanata-focusd")
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::NotFound(_)));
        assert!(host.calls().is_empty());
    }

    #[tokio::test]
    async fn test_remove_not_loaded() {
        let (_dir, path) = script_file();
        let host = MockHost::default();

        let script = KwinScript::install(&host, &path, "kanata-focusd").await.unwrap();
        host.loaded.lock().unwrap().clear();

        let err = script.remove(&host).await.unwrap_err();
        assert!(matches!(err, ScriptError::NotLoaded(name) if name == "kanata-focusd"));
    }

    #[test]
    fn test_listener_script_source() {
        let source = listener_script_source();
        assert!(!source.contains('@'));
        assert!(source.contains(BUS_NAME));
        assert!(source.contains(OBJECT_PATH));
        assert!(source.contains("notifyFocusChanged"));
        assert!(source.contains("notifyCaptionChanged"));
    }

    #[test]
    fn test_discard_listener_script() {
        let (_dir, path) = script_file();
        assert!(path.exists());
        discard_listener_script(&path);
        assert!(!path.exists());
        // Second call is a no-op.
        discard_listener_script(&path);
    }
}
