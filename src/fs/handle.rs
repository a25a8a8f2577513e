// Open handle table
//
// Maps the opaque 64-bit handles given to the kernel onto native SMB file and
// directory handles. Handles come back from the kernel as plain numbers, so an
// unknown handle is an ordinary error, not a broken invariant.

use std::collections::HashMap;

/// Native resource behind an open handle.
#[derive(Debug)]
pub enum OpenResource<F, D> {
    File(F),
    Dir(D),
}

/// Handle -> native resource
#[derive(Debug)]
pub struct OpenHandleTable<T> {
    handles: HashMap<u64, T>,
    next_handle: u64,
}

impl<T> Default for OpenHandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OpenHandleTable<T> {
    pub fn new() -> Self {
        Self { handles: HashMap::new(), next_handle: 1 }
    }

    /// Register a native resource and return its handle.
    ///
    /// # Panics
    ///
    /// If the handle counter wraps; handles are never reused.
    pub fn insert(&mut self, resource: T) -> u64 {
        let handle = self.next_handle;
        self.next_handle = handle.checked_add(1).expect("open handle counter wrapped");
        self.handles.insert(handle, resource);
        handle
    }

    pub fn get(&mut self, handle: u64) -> Option<&mut T> {
        self.handles.get_mut(&handle)
    }

    pub fn contains(&self, handle: u64) -> bool {
        self.handles.contains_key(&handle)
    }

    pub fn remove(&mut self, handle: u64) -> Option<T> {
        self.handles.remove(&handle)
    }

    /// Take every remaining resource, for teardown
    pub fn drain(&mut self) -> Vec<(u64, T)> {
        self.handles.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl<F, D> OpenHandleTable<OpenResource<F, D>> {
    /// The open file behind `handle`, if it is one
    pub fn file(&mut self, handle: u64) -> Option<&mut F> {
        match self.handles.get_mut(&handle) {
            Some(OpenResource::File(file)) => Some(file),
            _ => None,
        }
    }

    /// The open directory behind `handle`, if it is one
    pub fn dir(&mut self, handle: u64) -> Option<&mut D> {
        match self.handles.get_mut(&handle) {
            Some(OpenResource::Dir(dir)) => Some(dir),
            _ => None,
        }
    }

    /// Remove `handle` if it names an open file
    pub fn remove_file(&mut self, handle: u64) -> Option<F> {
        if self.file(handle).is_none() {
            return None;
        }
        match self.handles.remove(&handle) {
            Some(OpenResource::File(file)) => Some(file),
            _ => None,
        }
    }

    /// Remove `handle` if it names an open directory
    pub fn remove_dir(&mut self, handle: u64) -> Option<D> {
        if self.dir(handle).is_none() {
            return None;
        }
        match self.handles.remove(&handle) {
            Some(OpenResource::Dir(dir)) => Some(dir),
            _ => None,
        }
    }
}
