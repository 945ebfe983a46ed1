//! Asset type registry
//!
//! Maps a logical type name (as written in a manifest) to an [`AssetKind`]
//! and a serializer. Registries are plain values shared through `Arc`, so
//! writers and readers each get the registry they were constructed with.
//!
//! Serializer instances are built lazily the first time a type name is
//! resolved and cached afterwards. The registry lock is only held while a
//! mapping changes or a serializer is first built, never while bytes are
//! being encoded or decoded.

mod serializers;

use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::asset::{Asset, AssetBody, AssetKind};
use crate::error::{Error, Result};

pub use serializers::{BinarySerializer, ImageSerializer, RecordSerializer, TextSerializer};

/// How to handle a contribution whose key is already taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Replace the existing entry
    Override,
    /// Keep the existing entry
    Ignore,
    /// Fail with [`Error::Duplicate`]
    #[default]
    Reject,
}

impl ConflictPolicy {
    /// Apply the policy to a collision on `key`.
    ///
    /// `replace` runs only for `Override`. Returns whether the new value was
    /// stored.
    pub fn resolve(self, what: &'static str, key: &str, replace: impl FnOnce()) -> Result<bool> {
        match self {
            ConflictPolicy::Override => {
                tracing::debug!("Overriding existing {} '{}'", what, key);
                replace();
                Ok(true)
            }
            ConflictPolicy::Ignore => {
                tracing::debug!("Ignoring duplicate {} '{}'", what, key);
                Ok(false)
            }
            ConflictPolicy::Reject => Err(Error::Duplicate {
                what,
                key: key.to_string(),
            }),
        }
    }

    /// Insert into an ordered map under this policy
    pub fn insert<V>(
        self,
        map: &mut IndexMap<String, V>,
        what: &'static str,
        key: String,
        value: V,
    ) -> Result<bool> {
        if let Some(slot) = map.get_mut(&key) {
            self.resolve(what, &key, || *slot = value)
        } else {
            map.insert(key, value);
            Ok(true)
        }
    }
}

/// Per-type (de)serialization of asset bodies.
///
/// Implementations see only the bounded byte window of one item, never the
/// whole container.
pub trait AssetSerializer: Send + Sync {
    /// The asset class this serializer handles
    fn kind(&self) -> AssetKind;

    /// Write the asset's bytes
    fn serialize(&self, asset: &Asset, out: &mut dyn Write) -> Result<()>;

    /// Decode `length` bytes into a body
    fn deserialize(&self, input: &mut dyn Read, length: u64) -> Result<AssetBody>;
}

/// Builds serializer instances for a mapping
pub type SerializerFactory = Arc<dyn Fn() -> Box<dyn AssetSerializer> + Send + Sync>;

/// A registration: type name, asset class and serializer factory.
///
/// This is also the unit external plugin loaders contribute through
/// [`TypeRegistry::extend`].
#[derive(Clone)]
pub struct TypeMapping {
    pub type_name: String,
    pub kind: AssetKind,
    pub factory: SerializerFactory,
}

impl TypeMapping {
    pub fn new(
        type_name: impl Into<String>,
        kind: AssetKind,
        factory: impl Fn() -> Box<dyn AssetSerializer> + Send + Sync + 'static,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            kind,
            factory: Arc::new(factory),
        }
    }

    /// Mapping for a default-constructible serializer type
    pub fn of<S: AssetSerializer + Default + 'static>(
        type_name: impl Into<String>,
        kind: AssetKind,
    ) -> Self {
        Self::new(type_name, kind, || Box::new(S::default()))
    }
}

impl fmt::Debug for TypeMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeMapping")
            .field("type_name", &self.type_name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Resolved type metadata: the cached serializer instance for a type name
pub struct TypeInfo {
    pub type_name: String,
    pub kind: AssetKind,
    serializer: Box<dyn AssetSerializer>,
}

impl TypeInfo {
    /// Serialize an asset, checking its body matches this type's class
    pub fn encode(&self, asset: &Asset, out: &mut dyn Write) -> Result<()> {
        let found = asset.body.kind();
        if found != self.kind {
            return Err(Error::AssetKindMismatch {
                type_name: self.type_name.clone(),
                expected: self.kind.as_str(),
                found: found.as_str(),
            });
        }
        self.serializer.serialize(asset, out)
    }

    /// Decode `length` bytes into an asset with the given id
    pub fn decode(&self, id: &str, input: &mut dyn Read, length: u64) -> Result<Asset> {
        let body = self.serializer.deserialize(input, length)?;
        Ok(Asset::new(id, self.type_name.clone(), body))
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfo")
            .field("type_name", &self.type_name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RegistryState {
    mappings: IndexMap<String, TypeMapping>,
    resolved: HashMap<String, Arc<TypeInfo>>,
}

/// Registry of asset type mappings
#[derive(Default)]
pub struct TypeRegistry {
    state: RwLock<RegistryState>,
}

impl TypeRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `text`, `image`, `record` and `binary` types
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        let builtins = [
            TypeMapping::of::<TextSerializer>(AssetKind::Text.as_str(), AssetKind::Text),
            TypeMapping::of::<ImageSerializer>(AssetKind::Image.as_str(), AssetKind::Image),
            TypeMapping::of::<RecordSerializer>(AssetKind::Record.as_str(), AssetKind::Record),
            TypeMapping::of::<BinarySerializer>(AssetKind::Binary.as_str(), AssetKind::Binary),
        ];
        // An empty registry cannot collide
        let _ = registry.extend(builtins, ConflictPolicy::Reject);
        registry
    }

    /// Register a default-constructible serializer type under `type_name`
    pub fn register<S: AssetSerializer + Default + 'static>(
        &self,
        type_name: impl Into<String>,
        kind: AssetKind,
        policy: ConflictPolicy,
    ) -> Result<bool> {
        self.add(TypeMapping::of::<S>(type_name, kind), policy)
    }

    /// Register a serializer factory under `type_name`
    pub fn register_with(
        &self,
        type_name: impl Into<String>,
        kind: AssetKind,
        factory: impl Fn() -> Box<dyn AssetSerializer> + Send + Sync + 'static,
        policy: ConflictPolicy,
    ) -> Result<bool> {
        self.add(TypeMapping::new(type_name, kind, factory), policy)
    }

    /// Register a single mapping
    pub fn add(&self, mapping: TypeMapping, policy: ConflictPolicy) -> Result<bool> {
        let mut state = self.write()?;
        Self::insert_mapping(&mut state, mapping, policy)
    }

    /// Register a batch of mappings (e.g. contributed by a plugin).
    ///
    /// Under [`ConflictPolicy::Reject`] the batch is checked before anything
    /// is stored, so a rejected batch leaves the registry unchanged.
    /// Returns the number of mappings stored.
    pub fn extend(
        &self,
        mappings: impl IntoIterator<Item = TypeMapping>,
        policy: ConflictPolicy,
    ) -> Result<usize> {
        let mappings: Vec<TypeMapping> = mappings.into_iter().collect();
        let mut state = self.write()?;

        if policy == ConflictPolicy::Reject {
            let mut seen = std::collections::HashSet::new();
            for mapping in &mappings {
                if state.mappings.contains_key(&mapping.type_name)
                    || !seen.insert(mapping.type_name.as_str())
                {
                    return Err(Error::Duplicate {
                        what: "type mapping",
                        key: mapping.type_name.clone(),
                    });
                }
            }
        }

        let mut stored = 0;
        for mapping in mappings {
            if Self::insert_mapping(&mut state, mapping, policy)? {
                stored += 1;
            }
        }
        Ok(stored)
    }

    fn insert_mapping(
        state: &mut RegistryState,
        mapping: TypeMapping,
        policy: ConflictPolicy,
    ) -> Result<bool> {
        let type_name = mapping.type_name.clone();
        let stored = policy.insert(&mut state.mappings, "type mapping", type_name.clone(), mapping)?;
        if stored {
            // Drop a serializer built from a replaced mapping
            state.resolved.remove(&type_name);
            tracing::debug!("Registered asset type '{}'", type_name);
        }
        Ok(stored)
    }

    /// Resolve a type name to its metadata, building the serializer on first use
    pub fn resolve(&self, type_name: &str) -> Result<Arc<TypeInfo>> {
        {
            let state = self.read()?;
            if let Some(info) = state.resolved.get(type_name) {
                return Ok(Arc::clone(info));
            }
            if !state.mappings.contains_key(type_name) {
                return Err(Error::UnknownAssetType(type_name.to_string()));
            }
        }

        let mut state = self.write()?;
        // Another thread may have built it between the two locks
        if let Some(info) = state.resolved.get(type_name) {
            return Ok(Arc::clone(info));
        }
        let mapping = state
            .mappings
            .get(type_name)
            .ok_or_else(|| Error::UnknownAssetType(type_name.to_string()))?;

        let serializer = (mapping.factory)();
        if serializer.kind() != mapping.kind {
            return Err(Error::AssetKindMismatch {
                type_name: type_name.to_string(),
                expected: mapping.kind.as_str(),
                found: serializer.kind().as_str(),
            });
        }
        let info = Arc::new(TypeInfo {
            type_name: type_name.to_string(),
            kind: mapping.kind,
            serializer,
        });
        state
            .resolved
            .insert(type_name.to_string(), Arc::clone(&info));
        tracing::debug!("Built serializer for asset type '{}'", type_name);
        Ok(info)
    }

    /// Whether a mapping exists for `type_name`
    pub fn contains(&self, type_name: &str) -> bool {
        self.read()
            .map(|s| s.mappings.contains_key(type_name))
            .unwrap_or(false)
    }

    /// Asset class registered for `type_name`
    pub fn kind_of(&self, type_name: &str) -> Option<AssetKind> {
        self.read()
            .ok()
            .and_then(|s| s.mappings.get(type_name).map(|m| m.kind))
    }

    /// Registered type names in registration order
    pub fn type_names(&self) -> Vec<String> {
        self.read()
            .map(|s| s.mappings.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, RegistryState>> {
        self.state
            .read()
            .map_err(|_| Error::LockPoisoned("type registry"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, RegistryState>> {
        self.state
            .write()
            .map_err(|_| Error::LockPoisoned("type registry"))
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Text serializer that upper-cases on decode, to tell mappings apart
    #[derive(Default)]
    struct ShoutSerializer;

    impl AssetSerializer for ShoutSerializer {
        fn kind(&self) -> AssetKind {
            AssetKind::Text
        }

        fn serialize(&self, asset: &Asset, out: &mut dyn Write) -> Result<()> {
            TextSerializer.serialize(asset, out)
        }

        fn deserialize(&self, input: &mut dyn Read, length: u64) -> Result<AssetBody> {
            match TextSerializer.deserialize(input, length)? {
                AssetBody::Text(s) => Ok(AssetBody::Text(s.to_uppercase())),
                other => Ok(other),
            }
        }
    }

    fn decode_with(registry: &TypeRegistry, type_name: &str, bytes: &[u8]) -> AssetBody {
        let info = registry.resolve(type_name).unwrap();
        info.decode("x", &mut &bytes[..], bytes.len() as u64).unwrap().body
    }

    #[test]
    fn test_builtins_resolve() {
        let registry = TypeRegistry::with_builtins();
        assert_eq!(registry.type_names(), vec!["text", "image", "record", "binary"]);
        assert_eq!(registry.kind_of("image"), Some(AssetKind::Image));
        assert!(matches!(
            registry.resolve("mesh"),
            Err(Error::UnknownAssetType(name)) if name == "mesh"
        ));
    }

    #[test]
    fn test_reject_keeps_first() {
        let registry = TypeRegistry::new();
        registry
            .register::<TextSerializer>("note", AssetKind::Text, ConflictPolicy::Reject)
            .unwrap();
        let err = registry
            .register::<ShoutSerializer>("note", AssetKind::Text, ConflictPolicy::Reject)
            .unwrap_err();
        assert!(matches!(err, Error::Duplicate { what: "type mapping", .. }));
        assert_eq!(decode_with(&registry, "note", b"hi"), AssetBody::Text("hi".into()));
    }

    #[test]
    fn test_ignore_keeps_first() {
        let registry = TypeRegistry::new();
        registry
            .register::<TextSerializer>("note", AssetKind::Text, ConflictPolicy::Ignore)
            .unwrap();
        let stored = registry
            .register::<ShoutSerializer>("note", AssetKind::Text, ConflictPolicy::Ignore)
            .unwrap();
        assert!(!stored);
        assert_eq!(decode_with(&registry, "note", b"hi"), AssetBody::Text("hi".into()));
    }

    #[test]
    fn test_override_keeps_second_and_evicts_cache() {
        let registry = TypeRegistry::new();
        registry
            .register::<TextSerializer>("note", AssetKind::Text, ConflictPolicy::Override)
            .unwrap();
        // Populate the cache with the first serializer
        assert_eq!(decode_with(&registry, "note", b"hi"), AssetBody::Text("hi".into()));

        registry
            .register::<ShoutSerializer>("note", AssetKind::Text, ConflictPolicy::Override)
            .unwrap();
        assert_eq!(decode_with(&registry, "note", b"hi"), AssetBody::Text("HI".into()));
    }

    #[test]
    fn test_rejected_batch_is_atomic() {
        let registry = TypeRegistry::with_builtins();
        let batch = vec![
            TypeMapping::of::<TextSerializer>("script", AssetKind::Text),
            TypeMapping::of::<ShoutSerializer>("text", AssetKind::Text),
        ];
        assert!(registry.extend(batch, ConflictPolicy::Reject).is_err());
        assert!(!registry.contains("script"));
    }

    #[test]
    fn test_serializer_built_once() {
        static BUILT: AtomicUsize = AtomicUsize::new(0);
        let registry = Arc::new(TypeRegistry::new());
        registry
            .register_with(
                "note",
                AssetKind::Text,
                || {
                    BUILT.fetch_add(1, Ordering::SeqCst);
                    Box::new(TextSerializer)
                },
                ConflictPolicy::Reject,
            )
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.resolve("note").unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(BUILT.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_kind_mismatch_on_encode() {
        let registry = TypeRegistry::with_builtins();
        let info = registry.resolve("text").unwrap();
        let mut out = Vec::new();
        let err = info
            .encode(&Asset::binary("b", vec![1, 2]), &mut out)
            .unwrap_err();
        assert!(matches!(err, Error::AssetKindMismatch { .. }));
    }

    #[test]
    fn test_factory_kind_must_match_mapping() {
        let registry = TypeRegistry::new();
        registry
            .register::<TextSerializer>("pic", AssetKind::Image, ConflictPolicy::Reject)
            .unwrap();
        assert!(matches!(
            registry.resolve("pic"),
            Err(Error::AssetKindMismatch { .. })
        ));
    }
}
