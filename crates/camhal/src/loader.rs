// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Discovery of vendor camera modules.
//!
//! A vendor module is a shared object exporting [`MODULE_ENTRY_SYMBOL`] with
//! the [`ModuleEntry`] signature. The platform buffer mapper is loaded the same
//! way through [`MAPPER_ENTRY_SYMBOL`]. Both must be built with the same
//! compiler as the adapter since the entry points use the Rust ABI.
//!
//! The library stays loaded for as long as the returned module lives.

use crate::{
    buffer::BufferHandle,
    hal::{CameraDevice, CameraModule, HalCameraInfo, ModuleCallbacks},
    mapper::{AllocationDescriptor, BufferMapper, MappedImage},
    Error,
};
use libloading::{Library, Symbol};
use log::{debug, info, warn};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Entry point every vendor module library exports.
pub const MODULE_ENTRY_SYMBOL: &[u8] = b"camhal_module_entry";

/// Entry point of the buffer mapper library.
pub const MAPPER_ENTRY_SYMBOL: &[u8] = b"camhal_mapper_entry";

pub type ModuleEntry = unsafe fn() -> Box<dyn CameraModule>;

pub type MapperEntry = unsafe fn() -> Box<dyn BufferMapper>;

/// A module together with the library its code lives in.
pub struct LoadedModule {
    // Declared before `library` so it is dropped first.
    module: Box<dyn CameraModule>,
    library: Library,
    path: PathBuf,
}

impl LoadedModule {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CameraModule for LoadedModule {
    fn name(&self) -> &str {
        self.module.name()
    }

    fn init(&self) -> Result<(), Error> {
        self.module.init()
    }

    fn get_number_of_cameras(&self) -> u32 {
        self.module.get_number_of_cameras()
    }

    fn get_camera_info(&self, camera_id: u32) -> Result<HalCameraInfo, Error> {
        self.module.get_camera_info(camera_id)
    }

    fn set_callbacks(&self, callbacks: Arc<dyn ModuleCallbacks>) -> Result<(), Error> {
        self.module.set_callbacks(callbacks)
    }

    fn open(&self, camera_id: u32) -> Result<Box<dyn CameraDevice>, Error> {
        self.module.open(camera_id)
    }

    fn set_torch_mode(&self, camera_id: u32, enabled: bool) -> Result<(), Error> {
        self.module.set_torch_mode(camera_id, enabled)
    }
}

impl Drop for LoadedModule {
    fn drop(&mut self) {
        debug!("unloading {} ({:?})", self.path.display(), self.library);
    }
}

/// The platform buffer mapper loaded from a library.
pub struct LoadedMapper {
    mapper: Box<dyn BufferMapper>,
    _library: Library,
}

impl BufferMapper for LoadedMapper {
    fn allocate(&self, descriptor: &AllocationDescriptor) -> Result<BufferHandle, Error> {
        self.mapper.allocate(descriptor)
    }

    fn read(&self, buffer: &BufferHandle) -> Result<MappedImage, Error> {
        self.mapper.read(buffer)
    }

    fn write(&self, buffer: &BufferHandle, image: &MappedImage) -> Result<(), Error> {
        self.mapper.write(buffer, image)
    }
}

/// Loads one vendor module library.
pub fn load_module(path: &Path) -> Result<LoadedModule, Error> {
    // SAFETY: loading runs the library's initializers; vendor module
    // libraries are trusted to be well-behaved.
    let library = unsafe { Library::new(path)? };
    // SAFETY: the symbol is declared with the ModuleEntry signature by
    // contract with module authors.
    let module = unsafe {
        let entry: Symbol<ModuleEntry> = library.get(MODULE_ENTRY_SYMBOL)?;
        entry()
    };
    info!("loaded camera module {} from {}", module.name(), path.display());
    Ok(LoadedModule {
        module,
        library,
        path: path.to_owned(),
    })
}

/// Loads every `*.so` in `dir`, in file name order.
///
/// A library that fails to load is skipped with a warning. Fails only when
/// the directory cannot be read.
pub fn load_modules(dir: &Path) -> Result<Vec<Arc<dyn CameraModule>>, Error> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "so"))
        .collect();
    paths.sort();

    let mut modules: Vec<Arc<dyn CameraModule>> = Vec::with_capacity(paths.len());
    for path in paths {
        match load_module(&path) {
            Ok(module) => modules.push(Arc::new(module)),
            Err(err) => warn!("skipping {}: {}", path.display(), err),
        }
    }
    Ok(modules)
}

/// Loads the platform buffer mapper.
pub fn load_mapper(path: &Path) -> Result<Arc<dyn BufferMapper>, Error> {
    // SAFETY: as for load_module.
    let library = unsafe { Library::new(path)? };
    // SAFETY: the symbol is declared with the MapperEntry signature.
    let mapper = unsafe {
        let entry: Symbol<MapperEntry> = library.get(MAPPER_ENTRY_SYMBOL)?;
        entry()
    };
    info!("loaded buffer mapper from {}", path.display());
    Ok(Arc::new(LoadedMapper {
        mapper,
        _library: library,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn scratch_dir(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "camhal-loader-{}-{}-{}",
            tag,
            std::process::id(),
            nanos
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_missing_directory() {
        match load_modules(Path::new("/nonexistent/camhal/modules")) {
            Err(err) => assert!(matches!(err, Error::Io(_))),
            Ok(_) => panic!("listed a missing directory"),
        }
    }

    #[test]
    fn test_empty_directory() {
        let dir = scratch_dir("empty");
        assert!(load_modules(&dir).unwrap().is_empty());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_invalid_library_is_skipped() {
        let dir = scratch_dir("invalid");
        fs::write(dir.join("libbroken.so"), b"not an elf").unwrap();
        fs::write(dir.join("README"), b"ignored").unwrap();

        assert!(load_modules(&dir).unwrap().is_empty());
        match load_module(&dir.join("libbroken.so")) {
            Err(err) => assert_eq!(err.errno(), -libc::ENOENT),
            Ok(_) => panic!("loaded a broken library"),
        }
        fs::remove_dir_all(dir).unwrap();
    }
}
