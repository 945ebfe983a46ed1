//! Deferred asset proxy
//!
//! A [`LazyAsset`] holds a recipe for its bytes (a [`LazySource`]) and the
//! resolved serializer, and decodes on first access. It can be unloaded and
//! reloaded any number of times; subscribers see every transition.

use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use tempfile::TempPath;

use crate::asset::Asset;
use crate::container::RegionReader;
use crate::error::{Error, Result};
use crate::registry::TypeInfo;

/// Where a lazy asset's bytes live
#[derive(Debug, Clone)]
pub enum LazySource {
    /// Byte range of a file (container data region, external or side file)
    Range {
        path: PathBuf,
        start: u64,
        length: u64,
    },
    /// Spilled inline payload, kept alive as long as a proxy refers to it
    Spilled { file: Arc<TempPath>, length: u64 },
    /// No bytes
    Empty,
}

impl LazySource {
    /// Whole-file source
    pub fn file(path: impl Into<PathBuf>, length: u64) -> Self {
        LazySource::Range {
            path: path.into(),
            start: 0,
            length,
        }
    }

    pub fn len(&self) -> u64 {
        match self {
            LazySource::Range { length, .. } | LazySource::Spilled { length, .. } => *length,
            LazySource::Empty => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Backing file path, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            LazySource::Range { path, .. } => Some(path),
            LazySource::Spilled { file, .. } => {
                let path: &Path = file;
                Some(path)
            }
            LazySource::Empty => None,
        }
    }

    /// Open a fresh bounded reader. The handle lives only as long as the
    /// returned reader.
    pub fn open(&self) -> io::Result<Box<dyn Read>> {
        match self {
            LazySource::Range {
                path,
                start,
                length,
            } => Ok(Box::new(RegionReader::open(path, *start, *length)?)),
            LazySource::Spilled { file, length } => {
                Ok(Box::new(File::open(&**file)?.take(*length)))
            }
            LazySource::Empty => Ok(Box::new(Cursor::new(Vec::new()))),
        }
    }
}

/// Lifecycle notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LazyEvent {
    Loaded { id: String },
    Unloaded { id: String },
}

type Listener = Arc<dyn Fn(&LazyEvent) + Send + Sync>;

enum LazyState {
    Unloaded,
    Loaded(Arc<Asset>),
}

/// Lazily decoded asset.
///
/// Load and unload transitions are serialized by an internal lock and
/// listeners run while it is held. A listener that calls back into
/// [`get`](Self::get) or [`unload`](Self::unload) on the same proxy gets
/// [`Error::LazyReentrant`] instead of a deadlock.
pub struct LazyAsset {
    id: String,
    info: Arc<TypeInfo>,
    source: LazySource,
    state: Mutex<LazyState>,
    loaded: AtomicBool,
    owner: Mutex<Option<ThreadId>>,
    listeners: Mutex<Vec<Listener>>,
}

/// Holds the state lock and marks the current thread as its owner
struct Transition<'a> {
    proxy: &'a LazyAsset,
    state: MutexGuard<'a, LazyState>,
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if let Ok(mut owner) = self.proxy.owner.lock() {
            *owner = None;
        }
    }
}

impl LazyAsset {
    pub fn new(id: impl Into<String>, info: Arc<TypeInfo>, source: LazySource) -> Self {
        Self {
            id: id.into(),
            info,
            source,
            state: Mutex::new(LazyState::Unloaded),
            loaded: AtomicBool::new(false),
            owner: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn type_name(&self) -> &str {
        &self.info.type_name
    }

    pub fn source(&self) -> &LazySource {
        &self.source
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Register a listener for load/unload transitions
    pub fn subscribe(&self, listener: impl Fn(&LazyEvent) + Send + Sync + 'static) -> Result<()> {
        self.listeners
            .lock()
            .map_err(|_| Error::LockPoisoned("lazy asset listeners"))?
            .push(Arc::new(listener));
        Ok(())
    }

    /// Decode on first call, return the cached asset afterwards.
    ///
    /// Concurrent callers decode at most once.
    pub fn get(&self) -> Result<Arc<Asset>> {
        if self.is_loaded()
            && let LazyState::Loaded(asset) = &*self.transition()?.state
        {
            return Ok(Arc::clone(asset));
        }

        let mut transition = self.transition()?;
        // Re-check: another thread may have finished loading while we waited
        if let LazyState::Loaded(asset) = &*transition.state {
            return Ok(Arc::clone(asset));
        }

        let mut reader = self.source.open()?;
        let asset = Arc::new(self.info.decode(&self.id, &mut reader, self.source.len())?);
        drop(reader);

        *transition.state = LazyState::Loaded(Arc::clone(&asset));
        self.loaded.store(true, Ordering::Release);
        tracing::trace!("Loaded lazy asset '{}'", self.id);
        self.notify(&LazyEvent::Loaded {
            id: self.id.clone(),
        });
        Ok(asset)
    }

    /// Force a load without keeping the returned handle
    pub fn load(&self) -> Result<()> {
        self.get().map(|_| ())
    }

    /// Drop the decoded value; the next [`get`](Self::get) decodes again.
    ///
    /// Returns whether anything was unloaded.
    pub fn unload(&self) -> Result<bool> {
        let mut transition = self.transition()?;
        if let LazyState::Unloaded = &*transition.state {
            return Ok(false);
        }
        *transition.state = LazyState::Unloaded;
        self.loaded.store(false, Ordering::Release);
        tracing::trace!("Unloaded lazy asset '{}'", self.id);
        self.notify(&LazyEvent::Unloaded {
            id: self.id.clone(),
        });
        Ok(true)
    }

    fn transition(&self) -> Result<Transition<'_>> {
        let me = thread::current().id();
        if *self.owner()? == Some(me) {
            return Err(Error::LazyReentrant(self.id.clone()));
        }
        let state = self
            .state
            .lock()
            .map_err(|_| Error::LockPoisoned("lazy asset state"))?;
        *self.owner()? = Some(me);
        Ok(Transition { proxy: self, state })
    }

    fn owner(&self) -> Result<MutexGuard<'_, Option<ThreadId>>> {
        self.owner
            .lock()
            .map_err(|_| Error::LockPoisoned("lazy asset owner"))
    }

    fn notify(&self, event: &LazyEvent) {
        // Snapshot so listeners may subscribe further listeners
        let listeners: Vec<Listener> = match self.listeners.lock() {
            Ok(listeners) => listeners.clone(),
            Err(_) => return,
        };
        for listener in listeners {
            listener(event);
        }
    }
}

impl fmt::Debug for LazyAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyAsset")
            .field("id", &self.id)
            .field("type_name", &self.info.type_name)
            .field("source", &self.source)
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetBody;
    use crate::registry::TypeRegistry;
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;
    use tempfile::NamedTempFile;

    fn text_proxy(bytes: &[u8]) -> (LazyAsset, NamedTempFile) {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"xx").unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();

        let info = TypeRegistry::with_builtins().resolve("text").unwrap();
        let source = LazySource::Range {
            path: file.path().to_path_buf(),
            start: 2,
            length: bytes.len() as u64,
        };
        (LazyAsset::new("greeting", info, source), file)
    }

    #[test]
    fn test_get_decodes_window() {
        let (proxy, _file) = text_proxy(b"hello");
        assert!(!proxy.is_loaded());
        let asset = proxy.get().unwrap();
        assert_eq!(asset.body, AssetBody::Text("hello".into()));
        assert!(proxy.is_loaded());
        // Cached value is shared
        assert!(Arc::ptr_eq(&asset, &proxy.get().unwrap()));
    }

    #[test]
    fn test_unload_and_reload() {
        let (proxy, _file) = text_proxy(b"hello");
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        proxy
            .subscribe(move |e| sink.lock().unwrap().push(e.clone()))
            .unwrap();

        assert!(!proxy.unload().unwrap());
        proxy.load().unwrap();
        assert!(proxy.unload().unwrap());
        assert!(!proxy.is_loaded());
        proxy.load().unwrap();

        let id = "greeting".to_string();
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                LazyEvent::Loaded { id: id.clone() },
                LazyEvent::Unloaded { id: id.clone() },
                LazyEvent::Loaded { id },
            ]
        );
    }

    #[test]
    fn test_reentrant_unload_is_an_error() {
        let (proxy, _file) = text_proxy(b"hello");
        let proxy = Arc::new(proxy);
        let seen = Arc::new(Mutex::new(None));

        let weak = Arc::downgrade(&proxy);
        let slot = Arc::clone(&seen);
        proxy
            .subscribe(move |event| {
                if let (LazyEvent::Loaded { .. }, Some(p)) = (event, weak.upgrade()) {
                    *slot.lock().unwrap() = Some(p.unload().is_err());
                }
            })
            .unwrap();

        proxy.get().unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(true));
        assert!(proxy.is_loaded());
        // Lock ownership is released afterwards
        assert!(proxy.unload().unwrap());
    }

    #[test]
    fn test_concurrent_get_decodes_once() {
        let (proxy, _file) = text_proxy(b"shared");
        let proxy = Arc::new(proxy);
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        proxy
            .subscribe(move |e| {
                if matches!(e, LazyEvent::Loaded { .. }) {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let proxy = Arc::clone(&proxy);
                thread::spawn(move || proxy.get().unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().body, AssetBody::Text("shared".into()));
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_source() {
        let info = TypeRegistry::with_builtins().resolve("record").unwrap();
        let proxy = LazyAsset::new("r", info, LazySource::Empty);
        assert_eq!(
            proxy.get().unwrap().body,
            AssetBody::Record(crate::asset::Record::new())
        );
    }

    #[test]
    fn test_missing_backing_file_fails_on_access() {
        let info = TypeRegistry::with_builtins().resolve("text").unwrap();
        let proxy = LazyAsset::new("gone", info, LazySource::file("/nonexistent/asset.txt", 4));
        assert!(matches!(proxy.get(), Err(Error::Io(_))));
        assert!(!proxy.is_loaded());
    }
}
