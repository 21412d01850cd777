//! Native binaries and symbol resolution
//!
//! A binary is a loaded module of the host process, addressed by a logical
//! name. Functions are located in it by symbol name, absolute address or a
//! byte signature scanned over the module image.

use crate::address::NativeAddress;
use crate::config::BinaryConfig;
use crate::error::{BindError, Result};
use crate::function::{NativeFunction, Signature};
use libloading::Library;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

/// Byte value treated as a wildcard in signatures
pub const SIGNATURE_WILDCARD: u8 = 0x2A;

/// A loaded native module
pub trait NativeBinary: Send + Sync {
    /// Logical name of the binary
    fn name(&self) -> &str;

    /// Address of an exported symbol
    fn symbol(&self, name: &str) -> Option<NativeAddress>;

    /// Base address and length of the mapped image, if known
    fn image(&self) -> Option<(NativeAddress, usize)> {
        None
    }
}

/// A byte pattern with wildcards
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BytePattern(Vec<Option<u8>>);

impl BytePattern {
    /// Parse `"55 8B EC 2A"` or `"[55 8B EC 2A]"`; `2A` and `??` match any byte
    pub fn parse(text: &str) -> Option<Self> {
        let inner = text.trim().trim_start_matches('[').trim_end_matches(']');
        let bytes = inner
            .split_whitespace()
            .map(|token| {
                if token == "??" {
                    return Some(None);
                }
                let token = token.trim_start_matches("\\x");
                let byte = u8::from_str_radix(token, 16).ok()?;
                Some((byte != SIGNATURE_WILDCARD).then_some(byte))
            })
            .collect::<Option<Vec<_>>>()?;

        if bytes.is_empty() {
            return None;
        }
        Some(Self(bytes))
    }

    /// Number of bytes in the pattern
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Offset of the first match in `haystack`
    pub fn find(&self, haystack: &[u8]) -> Option<usize> {
        if haystack.len() < self.0.len() {
            return None;
        }
        haystack.windows(self.0.len()).position(|window| {
            window
                .iter()
                .zip(&self.0)
                .all(|(byte, expected)| expected.map_or(true, |e| e == *byte))
        })
    }
}

impl fmt::Display for BytePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match byte {
                Some(b) => write!(f, "{:02X}", b)?,
                None => write!(f, "{:02X}", SIGNATURE_WILDCARD)?,
            }
        }
        f.write_str("]")
    }
}

/// How a function is located inside a binary
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    /// Exported (possibly mangled) symbol name
    Symbol(String),
    /// Absolute address
    Address(NativeAddress),
    /// Byte signature scanned over the image
    Signature(BytePattern),
}

impl Identifier {
    /// Classify an identifier string: bracketed text is a signature
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if text.starts_with('[') {
            return BytePattern::parse(text).map(Identifier::Signature);
        }
        Some(Identifier::Symbol(text.to_string()))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Symbol(name) => f.write_str(name),
            Identifier::Address(address) => write!(f, "{}", address),
            Identifier::Signature(pattern) => write!(f, "{}", pattern),
        }
    }
}

/// A binary backed by a dynamic library
pub struct LibraryBinary {
    library: Library,
    name: String,
    path: PathBuf,
    image: OnceLock<Option<(NativeAddress, usize)>>,
}

impl LibraryBinary {
    /// Load a dynamic library
    pub fn load(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        // Safety: loading runs the library's initializers, which the host
        // already trusts for every module it hands us
        let library = unsafe { Library::new(path) }.map_err(|e| {
            log::trace!("Failed to load '{}': {}", path.display(), e);
            BindError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()))
        })?;

        Ok(Self {
            library,
            name: name.into(),
            path: path.to_path_buf(),
            image: OnceLock::new(),
        })
    }

    /// Path the library was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NativeBinary for LibraryBinary {
    fn name(&self) -> &str {
        &self.name
    }

    fn symbol(&self, name: &str) -> Option<NativeAddress> {
        // Safety: only the symbol's address is taken, never its value
        let symbol = unsafe { self.library.get::<*mut c_void>(name.as_bytes()) }.ok()?;
        let address = NativeAddress::from_ptr(*symbol as *const c_void);
        (!address.is_null()).then_some(address)
    }

    fn image(&self) -> Option<(NativeAddress, usize)> {
        *self.image.get_or_init(|| {
            let image = loaded_image(&self.path);
            if image.is_none() {
                log::debug!("No executable image found for '{}'", self.path.display());
            }
            image
        })
    }
}

/// Executable segment of the loaded module at `path`
#[cfg(target_os = "linux")]
fn loaded_image(path: &Path) -> Option<(NativeAddress, usize)> {
    use std::os::unix::ffi::OsStrExt;

    struct Search<'a> {
        path: &'a Path,
        canonical: Option<PathBuf>,
        found: Option<(NativeAddress, usize)>,
    }

    impl Search<'_> {
        fn matches(&self, loaded: &Path) -> bool {
            if loaded.as_os_str().is_empty() {
                return false;
            }
            if loaded == self.path {
                return true;
            }
            if let Some(canonical) = &self.canonical {
                if std::fs::canonicalize(loaded).ok().as_ref() == Some(canonical) {
                    return true;
                }
            }
            // Bare names are found through the loader's search path
            self.path.parent().map_or(true, |p| p.as_os_str().is_empty())
                && loaded.file_name() == self.path.file_name()
        }
    }

    unsafe extern "C" fn visit(
        info: *mut libc::dl_phdr_info,
        _size: libc::size_t,
        data: *mut libc::c_void,
    ) -> libc::c_int {
        // Safety: `data` is the `Search` passed below and `info` is valid
        // for the duration of the callback
        let search = unsafe { &mut *(data as *mut Search<'_>) };
        let info = unsafe { &*info };
        if info.dlpi_name.is_null() || info.dlpi_phdr.is_null() {
            return 0;
        }

        let name = unsafe { std::ffi::CStr::from_ptr(info.dlpi_name) };
        let name = std::ffi::OsStr::from_bytes(name.to_bytes());
        if !search.matches(Path::new(name)) {
            return 0;
        }

        let headers = unsafe { std::slice::from_raw_parts(info.dlpi_phdr, info.dlpi_phnum as usize) };
        search.found = headers
            .iter()
            .filter(|header| header.p_type == libc::PT_LOAD && header.p_flags & libc::PF_X != 0)
            .max_by_key(|header| header.p_memsz)
            .map(|header| {
                let base = NativeAddress::new(info.dlpi_addr as usize + header.p_vaddr as usize);
                (base, header.p_memsz as usize)
            });
        1
    }

    let mut search = Search {
        path,
        canonical: std::fs::canonicalize(path).ok(),
        found: None,
    };
    // Safety: the callback only touches `search`, which outlives the walk
    unsafe { libc::dl_iterate_phdr(Some(visit), &mut search as *mut Search<'_> as *mut libc::c_void) };
    search.found
}

#[cfg(not(target_os = "linux"))]
fn loaded_image(_path: &Path) -> Option<(NativeAddress, usize)> {
    None
}

/// A binary described by an explicit symbol table
///
/// Used for modules whose exports the host publishes itself.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    name: String,
    symbols: HashMap<String, NativeAddress>,
    image: Option<(NativeAddress, usize)>,
}

impl SymbolTable {
    /// Create an empty table
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a symbol
    pub fn with_symbol(mut self, name: impl Into<String>, address: NativeAddress) -> Self {
        self.symbols.insert(name.into(), address);
        self
    }

    /// Set the image scanned for signatures
    pub fn with_image(mut self, base: NativeAddress, len: usize) -> Self {
        self.image = Some((base, len));
        self
    }
}

impl NativeBinary for SymbolTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn symbol(&self, name: &str) -> Option<NativeAddress> {
        self.symbols.get(name).copied()
    }

    fn image(&self) -> Option<(NativeAddress, usize)> {
        self.image
    }
}

struct LoadedBinary {
    binary: Box<dyn NativeBinary>,
    /// Signature scan results
    signatures: RwLock<HashMap<BytePattern, NativeAddress>>,
}

/// Shared handle to a resolved binary
#[derive(Clone)]
pub struct BinaryHandle {
    inner: Arc<LoadedBinary>,
}

impl BinaryHandle {
    /// Wrap a binary
    pub fn new(binary: impl NativeBinary + 'static) -> Self {
        Self {
            inner: Arc::new(LoadedBinary {
                binary: Box::new(binary),
                signatures: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Logical name
    pub fn name(&self) -> &str {
        self.inner.binary.name()
    }

    /// Resolve an identifier to an entry address
    pub fn resolve(&self, identifier: &Identifier) -> Result<NativeAddress> {
        match identifier {
            Identifier::Symbol(name) => self
                .inner
                .binary
                .symbol(name)
                .ok_or_else(|| BindError::symbol_not_found(self.name(), name.as_str())),
            Identifier::Address(address) => Ok(*address),
            Identifier::Signature(pattern) => self.scan(pattern),
        }
    }

    /// Resolve an identifier and wrap it as a callable function
    pub fn make_function(&self, identifier: &Identifier, signature: Signature) -> Result<NativeFunction> {
        signature.validate()?;
        let address = self.resolve(identifier)?;
        log::debug!("Resolved '{}' in '{}' at {}", identifier, self.name(), address);
        Ok(NativeFunction::new(address, signature))
    }

    fn scan(&self, pattern: &BytePattern) -> Result<NativeAddress> {
        // Check cache first
        if let Some(address) = self.inner.signatures.read().get(pattern) {
            return Ok(*address);
        }

        let not_found = || BindError::symbol_not_found(self.name(), pattern.to_string());
        let (base, len) = self.inner.binary.image().ok_or_else(not_found)?;
        // Safety: providers report the mapped, readable extent of their image
        let image = unsafe { std::slice::from_raw_parts(base.as_ptr::<u8>() as *const u8, len) };
        let address = base + pattern.find(image).ok_or_else(not_found)?;

        // Cache it
        self.inner.signatures.write().insert(pattern.clone(), address);
        Ok(address)
    }
}

impl fmt::Debug for BinaryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryHandle").field("name", &self.name()).finish()
    }
}

/// Finds binaries by logical name and caches them
pub struct BinaryResolver {
    config: BinaryConfig,
    /// Binaries registered by the host, by name
    registered: RwLock<HashMap<String, BinaryHandle>>,
    /// Libraries loaded from disk, by (name, server check)
    loaded: RwLock<HashMap<(String, bool), BinaryHandle>>,
}

impl BinaryResolver {
    /// Create a resolver
    pub fn new(config: BinaryConfig) -> Self {
        Self {
            config,
            registered: RwLock::new(HashMap::new()),
            loaded: RwLock::new(HashMap::new()),
        }
    }

    /// Resolver configuration
    pub fn config(&self) -> &BinaryConfig {
        &self.config
    }

    /// Register a binary under its own name, replacing any previous one
    pub fn register(&self, binary: impl NativeBinary + 'static) -> BinaryHandle {
        let handle = BinaryHandle::new(binary);
        log::debug!("Registered binary '{}'", handle.name());
        self.registered
            .write()
            .insert(handle.name().to_string(), handle.clone());
        handle
    }

    /// Find a binary, loading it if needed
    ///
    /// With `server_check`, the dedicated server variant
    /// (`<name><server_suffix>`) is preferred over `<name>`.
    pub fn find_binary(&self, name: &str, server_check: bool) -> Result<BinaryHandle> {
        let stems = self.stems(name, server_check);

        {
            let registered = self.registered.read();
            if let Some(handle) = stems.iter().find_map(|stem| registered.get(stem)) {
                return Ok(handle.clone());
            }
        }

        let key = (name.to_string(), server_check);
        if let Some(handle) = self.loaded.read().get(&key) {
            return Ok(handle.clone());
        }

        let mut tried = Vec::new();
        for path in self.candidates(&stems) {
            match LibraryBinary::load(name, &path) {
                Ok(binary) => {
                    log::info!("Loaded binary '{}' from '{}'", name, path.display());
                    let handle = BinaryHandle::new(binary);
                    self.loaded.write().insert(key, handle.clone());
                    return Ok(handle);
                }
                Err(_) => tried.push(path),
            }
        }

        Err(BindError::BinaryNotFound {
            name: name.to_string(),
            tried,
        })
    }

    /// Check if a binary is available without loading anything
    pub fn is_loaded(&self, name: &str) -> bool {
        self.registered.read().contains_key(name)
            || self.loaded.read().keys().any(|(loaded, _)| loaded == name)
    }

    /// Drop a registered or loaded binary
    pub fn forget(&self, name: &str) {
        self.registered.write().remove(name);
        self.loaded.write().retain(|(loaded, _), _| loaded != name);
    }

    fn stems(&self, name: &str, server_check: bool) -> Vec<String> {
        let mut stems = Vec::with_capacity(2);
        if server_check && !self.config.server_suffix.is_empty() {
            stems.push(format!("{}{}", name, self.config.server_suffix));
        }
        stems.push(name.to_string());
        stems
    }

    /// Candidate paths for the given stems, in the order they are tried
    pub fn candidates(&self, stems: &[String]) -> Vec<PathBuf> {
        let dirs: Vec<PathBuf> = if self.config.search_paths.is_empty() {
            vec![PathBuf::new()]
        } else {
            self.config.search_paths.clone()
        };

        let mut paths = Vec::new();
        for stem in stems {
            for dir in &dirs {
                paths.push(dir.join(stem));
                if self.config.platform_names {
                    paths.push(dir.join(libloading::library_filename(stem)));
                }
            }
        }
        paths
    }
}

impl Default for BinaryResolver {
    fn default() -> Self {
        Self::new(BinaryConfig::default())
    }
}

impl fmt::Debug for BinaryResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryResolver")
            .field("config", &self.config)
            .field("registered", &self.registered.read().len())
            .field("loaded", &self.loaded.read().len())
            .finish()
    }
}
