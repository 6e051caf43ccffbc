// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! A library for working with text-format symbol files as used by
//! crash-report processors, and for locating them on disk or over HTTP.
//!
//! The highest-level API is [`Symbolizer`], which loads symbol files
//! through a [`SymbolSupplier`] at most once per module and uses them to
//! fill source information into stack frames:
//!
//! ```
//! use airbag_symbols::{SimpleSymbolSupplier, Symbolizer};
//! use std::path::PathBuf;
//!
//! let paths = vec![PathBuf::from("../testdata/symbols/")];
//! let supplier = SimpleSymbolSupplier::new(paths);
//! let symbolizer = Symbolizer::new(supplier);
//! if let Some(name) = symbolizer.get_symbol_at_address("test_app.pdb",
//!                                                      "5A9832E5287241C1838ED98914E9B7FF1",
//!                                                      0x1010) {
//!     println!("{}", name);
//! }
//! ```

#[macro_use]
extern crate nom;

use failure::Fail;
use log::debug;
use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io::prelude::*;
use std::path::PathBuf;

pub use airbag_common::traits::Module;

mod sym_file;

pub use crate::sym_file::*;

/// Things that can go wrong while locating or parsing a symbol file.
#[derive(Debug, Fail)]
pub enum SymbolError {
    /// No symbol file could be found for the module.
    #[fail(display = "symbol file not found")]
    NotFound,
    /// The symbol file could not be read.
    #[fail(display = "couldn't read symbol file")]
    LoadError(#[fail(cause)] std::io::Error),
    /// The symbol file was malformed.
    #[fail(display = "parse error: {}", _0)]
    ParseError(&'static str),
}

impl PartialEq for SymbolError {
    fn eq(&self, other: &SymbolError) -> bool {
        match (self, other) {
            (SymbolError::NotFound, SymbolError::NotFound) => true,
            (SymbolError::LoadError(_), SymbolError::LoadError(_)) => true,
            (SymbolError::ParseError(a), SymbolError::ParseError(b)) => a == b,
            _ => false,
        }
    }
}

/// A trait for setting symbol information on something, probably a stack
/// frame.
pub trait FrameSymbolizer {
    /// The program counter whose symbols are wanted.
    fn get_instruction(&self) -> u64;
    /// Set the name, base address, and parameter size of the enclosing
    /// function.
    fn set_function(&mut self, name: &str, base: u64, parameter_size: u32);
    /// Set the source file, (1-based) line number, and line base address.
    fn set_source_file(&mut self, file: &str, line: u32, base: u64);
}

/// A simple `FrameSymbolizer` that just holds the data it is given.
#[derive(Debug, Default)]
pub struct SimpleFrame {
    pub instruction: u64,
    pub function: Option<String>,
    pub function_base: Option<u64>,
    pub parameter_size: Option<u32>,
    pub source_file: Option<String>,
    pub source_line: Option<u32>,
    pub source_line_base: Option<u64>,
}

impl SimpleFrame {
    /// An empty frame looking up `instruction`.
    pub fn with_instruction(instruction: u64) -> SimpleFrame {
        SimpleFrame {
            instruction,
            ..SimpleFrame::default()
        }
    }
}

impl FrameSymbolizer for SimpleFrame {
    fn get_instruction(&self) -> u64 {
        self.instruction
    }
    fn set_function(&mut self, name: &str, base: u64, parameter_size: u32) {
        self.function = Some(String::from(name));
        self.function_base = Some(base);
        self.parameter_size = Some(parameter_size);
    }
    fn set_source_file(&mut self, file: &str, line: u32, base: u64) {
        self.source_file = Some(String::from(file));
        self.source_line = Some(line);
        self.source_line_base = Some(base);
    }
}

// Can't use std::path::file_name here because it doesn't handle
// Windows paths on non-Windows systems.
fn leafname(path: &str) -> &str {
    path.rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(path)
}

/// If `filename` ends with `match_extension`, remove it. Append
/// `new_extension` regardless.
fn replace_or_add_extension(filename: &str, match_extension: &str, new_extension: &str) -> String {
    let mut bits = filename.split('.').collect::<Vec<_>>();
    if bits.len() > 1
        && bits
            .last()
            .map_or(false, |extension| extension.to_lowercase() == match_extension)
    {
        bits.pop();
    }
    bits.push(new_extension);
    bits.join(".")
}

/// The relative path under a symbol root at which `module`'s symbol file
/// should be found: `<debug file>/<debug identifier>/<debug file minus
/// .pdb>.<extension>`.
pub fn relative_symbol_path(module: &dyn Module, extension: &str) -> Option<String> {
    module.debug_file().and_then(|debug_file| {
        module.debug_identifier().map(|debug_id| {
            let leaf = leafname(&debug_file);
            let filename = replace_or_add_extension(leaf, "pdb", extension);
            [leaf, &debug_id[..], &filename[..]].join("/")
        })
    })
}

/// A trait for things that can locate symbols for a given module.
///
/// The [`Symbolizer`] calls this at most once per distinct module.
pub trait SymbolSupplier {
    /// Locate and load a symbol file for `module`.
    fn locate_symbols(&self, module: &dyn Module) -> Result<SymbolFile, SymbolError>;
}

/// A supplier that looks up symbols under a list of local paths, using the
/// layout produced by [`relative_symbol_path`].
#[derive(Debug)]
pub struct SimpleSymbolSupplier {
    paths: Vec<PathBuf>,
}

impl SimpleSymbolSupplier {
    pub fn new(paths: Vec<PathBuf>) -> SimpleSymbolSupplier {
        SimpleSymbolSupplier { paths }
    }
}

impl SymbolSupplier for SimpleSymbolSupplier {
    fn locate_symbols(&self, module: &dyn Module) -> Result<SymbolFile, SymbolError> {
        if let Some(rel_path) = relative_symbol_path(module, "sym") {
            for path in self.paths.iter() {
                let test_path = path.join(&rel_path);
                if fs::metadata(&test_path)
                    .ok()
                    .map_or(false, |metadata| metadata.is_file())
                {
                    return SymbolFile::from_file(&test_path);
                }
            }
        }
        Err(SymbolError::NotFound)
    }
}

/// A supplier that maps module code files to in-memory symbol file
/// contents, mostly useful for tests.
#[derive(Debug, Default)]
pub struct StringSymbolSupplier {
    modules: HashMap<String, String>,
}

impl StringSymbolSupplier {
    pub fn new(modules: HashMap<String, String>) -> StringSymbolSupplier {
        StringSymbolSupplier { modules }
    }
}

impl SymbolSupplier for StringSymbolSupplier {
    fn locate_symbols(&self, module: &dyn Module) -> Result<SymbolFile, SymbolError> {
        match self.modules.get(&module.code_file()[..]) {
            Some(text) => SymbolFile::from_bytes(text.as_bytes()),
            None => Err(SymbolError::NotFound),
        }
    }
}

/// A supplier that fetches symbol files over HTTP, caching them locally.
///
/// Tries local paths first, then each URL in turn. Fetched files are
/// written into the cache directory, which is also one of the local
/// lookup paths.
pub struct HttpSymbolSupplier {
    local: SimpleSymbolSupplier,
    urls: Vec<String>,
    client: reqwest::blocking::Client,
    cache: PathBuf,
}

impl HttpSymbolSupplier {
    pub fn new(
        urls: Vec<String>,
        cache: PathBuf,
        mut local_paths: Vec<PathBuf>,
    ) -> HttpSymbolSupplier {
        local_paths.push(cache.clone());
        HttpSymbolSupplier {
            local: SimpleSymbolSupplier::new(local_paths),
            urls,
            client: reqwest::blocking::Client::new(),
            cache,
        }
    }
}

fn fetch_symbol_file(
    client: &reqwest::blocking::Client,
    base_url: &str,
    rel_path: &str,
    cache: &PathBuf,
) -> Result<SymbolFile, SymbolError> {
    let url = format!("{}/{}", base_url.trim_end_matches('/'), rel_path);
    debug!("fetching symbol file from {}", url);
    let mut response = client
        .get(&url)
        .send()
        .and_then(|response| response.error_for_status())
        .map_err(|_| SymbolError::NotFound)?;
    let mut bytes = Vec::new();
    response
        .read_to_end(&mut bytes)
        .map_err(SymbolError::LoadError)?;
    let file = SymbolFile::from_bytes(&bytes)?;
    // Cache the fetched bytes; a failure here just means a refetch later.
    let local = cache.join(rel_path);
    if let Some(parent) = local.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let _ = fs::write(&local, &bytes);
    Ok(file)
}

impl SymbolSupplier for HttpSymbolSupplier {
    fn locate_symbols(&self, module: &dyn Module) -> Result<SymbolFile, SymbolError> {
        match self.local.locate_symbols(module) {
            Err(SymbolError::NotFound) => {}
            other => return other,
        }
        if let Some(rel_path) = relative_symbol_path(module, "sym") {
            for url in &self.urls {
                if let Ok(file) = fetch_symbol_file(&self.client, url, &rel_path, &self.cache) {
                    return Ok(file);
                }
            }
        }
        Err(SymbolError::NotFound)
    }
}

type ModuleKey = (String, String, Option<String>, Option<String>);

/// The unique identity of a module within a symbol cache.
fn key(module: &dyn Module) -> ModuleKey {
    (
        module.code_file().to_string(),
        module.code_identifier().to_string(),
        module.debug_file().map(Cow::into_owned),
        module.debug_identifier().map(Cow::into_owned),
    )
}

/// Symbolicate stack frames.
///
/// A `Symbolizer` manages loading symbols and looking up symbols in them,
/// consulting its [`SymbolSupplier`] at most once per distinct module: a
/// module whose symbols fail to load is not retried, and leaves no
/// partial state behind.
pub struct Symbolizer {
    /// Symbol supplier for locating symbols.
    supplier: Box<dyn SymbolSupplier + 'static>,
    /// Cache of symbol locating results, keyed by module identity.
    symbols: RefCell<HashMap<ModuleKey, Result<SymbolFile, SymbolError>>>,
}

impl Symbolizer {
    /// Create a `Symbolizer` that uses `supplier` to locate symbols.
    pub fn new<T: SymbolSupplier + 'static>(supplier: T) -> Symbolizer {
        Symbolizer {
            supplier: Box::new(supplier),
            symbols: RefCell::new(HashMap::new()),
        }
    }

    /// Helper method for non-minidump-using callers: get the symbol for
    /// `address` in the module identified by `debug_file` and `debug_id`.
    pub fn get_symbol_at_address(
        &self,
        debug_file: &str,
        debug_id: &str,
        address: u64,
    ) -> Option<String> {
        let module = (debug_file, debug_id);
        let mut frame = SimpleFrame::with_instruction(address);
        self.fill_symbol(&module, &mut frame);
        frame.function
    }

    /// Fill symbol information in `frame` using the instruction address
    /// from `frame`, and the module information from `module`.
    pub fn fill_symbol(&self, module: &dyn Module, frame: &mut dyn FrameSymbolizer) {
        self.ensure_module(module);
        if let Some(Ok(sym)) = self.symbols.borrow().get(&key(module)) {
            sym.fill_symbol(module, frame)
        }
    }

    /// The STACK WIN unwind record covering `address` within `module`, if
    /// the module's symbols carry one.
    pub fn win_frame_info(&self, module: &dyn Module, address: u64) -> Option<StackInfoWin> {
        self.ensure_module(module);
        match self.symbols.borrow().get(&key(module)) {
            Some(Ok(sym)) => sym.find_win_frame_info(module, address).cloned(),
            _ => None,
        }
    }

    fn ensure_module(&self, module: &dyn Module) {
        let k = key(module);
        if !self.symbols.borrow().contains_key(&k) {
            let result = self.supplier.locate_symbols(module);
            if let Err(ref e) = result {
                debug!("no symbols for module {}: {}", module.code_file(), e);
            }
            self.symbols.borrow_mut().insert(k, result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::fs::File;
    use std::path::Path;
    use std::rc::Rc;
    use tempdir::TempDir;

    #[test]
    fn test_leafname() {
        assert_eq!(leafname("c:\\foo\\bar\\test.pdb"), "test.pdb");
        assert_eq!(leafname("c:/foo/bar/test.pdb"), "test.pdb");
        assert_eq!(leafname("test.pdb"), "test.pdb");
        assert_eq!(leafname("test"), "test");
        assert_eq!(leafname("/path/to/test"), "test");
    }

    #[test]
    fn test_replace_or_add_extension() {
        assert_eq!(replace_or_add_extension("test.pdb", "pdb", "sym"), "test.sym");
        assert_eq!(replace_or_add_extension("TEST.PDB", "pdb", "sym"), "TEST.sym");
        assert_eq!(replace_or_add_extension("test.x", "pdb", "sym"), "test.x.sym");
        assert_eq!(replace_or_add_extension("test", "pdb", "sym"), "test.sym");
        assert_eq!(replace_or_add_extension("test.x", "x", "y"), "test.y");
    }

    #[test]
    fn test_relative_symbol_path() {
        let module = ("foo.pdb", "abcd1234");
        assert_eq!(
            relative_symbol_path(&module, "sym").unwrap(),
            "foo.pdb/abcd1234/foo.sym"
        );

        let module = ("C:\\foo\\bar\\test.pdb", "abcd1234");
        assert_eq!(
            relative_symbol_path(&module, "sym").unwrap(),
            "test.pdb/abcd1234/test.sym"
        );

        let module = ("bin/libfoo.so", "abcd1234");
        assert_eq!(
            relative_symbol_path(&module, "sym").unwrap(),
            "libfoo.so/abcd1234/libfoo.so.sym"
        );
    }

    fn write_symbol_file(path: &Path, contents: &[u8]) {
        let dir = path.parent().unwrap();
        if !fs::metadata(&dir).ok().map_or(false, |m| m.is_dir()) {
            fs::create_dir_all(&dir).unwrap();
        }
        let mut file = File::create(path).unwrap();
        file.write_all(contents).unwrap();
    }

    #[test]
    fn test_simple_symbol_supplier() {
        let temp = TempDir::new("symbols").unwrap();
        let module = ("test_app.pdb", "5A9832E5287241C1838ED98914E9B7FF1");
        let supplier = SimpleSymbolSupplier::new(vec![temp.path().to_path_buf()]);
        assert_eq!(
            supplier.locate_symbols(&module).err(),
            Some(SymbolError::NotFound)
        );

        write_symbol_file(
            &temp
                .path()
                .join("test_app.pdb/5A9832E5287241C1838ED98914E9B7FF1/test_app.sym"),
            b"MODULE windows x86 5A9832E5287241C1838ED98914E9B7FF1 test_app.pdb
FILE 1 test_app.cc
FUNC 1000 30 0 vswprintf
1000 30 51 1
",
        );
        let sym = supplier.locate_symbols(&module).unwrap();
        let mut frame = SimpleFrame::with_instruction(0x1010);
        sym.fill_symbol(&module, &mut frame);
        assert_eq!(frame.function.as_deref(), Some("vswprintf"));
        assert_eq!(frame.source_line, Some(51));
    }

    #[test]
    fn test_symbolizer() {
        let mut modules = HashMap::new();
        modules.insert(
            "a.pdb".to_string(),
            "MODULE windows x86 ffff a.pdb
FILE 1 a.cc
FUNC 1000 30 0 Function_A
1000 30 7 1
"
            .to_string(),
        );
        let symbolizer = Symbolizer::new(StringSymbolSupplier::new(modules));
        // The (debug_file, debug_id) convenience module has code_file "",
        // so look up through a module whose code_file matches.
        struct TestModule;
        impl Module for TestModule {
            fn base_address(&self) -> u64 {
                0
            }
            fn size(&self) -> u64 {
                0x4000
            }
            fn code_file(&self) -> Cow<str> {
                Cow::Borrowed("a.pdb")
            }
            fn code_identifier(&self) -> Cow<str> {
                Cow::Borrowed("ffff")
            }
            fn debug_file(&self) -> Option<Cow<str>> {
                Some(Cow::Borrowed("a.pdb"))
            }
            fn debug_identifier(&self) -> Option<Cow<str>> {
                Some(Cow::Borrowed("ffff"))
            }
            fn version(&self) -> Option<Cow<str>> {
                None
            }
        }
        let mut frame = SimpleFrame::with_instruction(0x1010);
        symbolizer.fill_symbol(&TestModule, &mut frame);
        assert_eq!(frame.function.as_deref(), Some("Function_A"));
        assert_eq!(frame.source_file.as_deref(), Some("a.cc"));
        assert_eq!(frame.source_line, Some(7));
    }

    /// A supplier that counts how many times it has been consulted.
    struct CountingSupplier {
        calls: Rc<Cell<u32>>,
    }

    impl SymbolSupplier for CountingSupplier {
        fn locate_symbols(&self, _module: &dyn Module) -> Result<SymbolFile, SymbolError> {
            self.calls.set(self.calls.get() + 1);
            Err(SymbolError::NotFound)
        }
    }

    #[test]
    fn test_supplier_called_once_per_module() {
        let calls = Rc::new(Cell::new(0));
        let symbolizer = Symbolizer::new(CountingSupplier {
            calls: calls.clone(),
        });
        let module = ("dupe.pdb", "0000");
        for _ in 0..3 {
            let mut frame = SimpleFrame::with_instruction(0x1000);
            symbolizer.fill_symbol(&module, &mut frame);
            assert!(frame.function.is_none());
        }
        assert!(symbolizer.win_frame_info(&module, 0x1000).is_none());
        // One lookup, the rest served from the cache.
        assert_eq!(calls.get(), 1);
    }
}
