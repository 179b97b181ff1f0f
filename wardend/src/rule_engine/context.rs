use crate::store::Store;
use crate::task::TaskTable;
use crate::yara_scan::YaraScanner;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything a handler needs beyond the triggering event and its current
/// task: the shared task table, the metadata store, the YARA scanner, and
/// a couple of filesystem facts resolved once at startup.
pub struct EventContext<'a> {
    pub task: Arc<crate::task::Task>,
    pub tasks: &'a TaskTable,
    pub store: &'a Store,
    pub scanner: &'a dyn YaraScanner,
    pub files_dir: &'a Path,
    pub self_exe: &'a Path,
}

impl<'a> EventContext<'a> {
    pub fn elf_files_dir(&self) -> PathBuf {
        self.files_dir.to_path_buf()
    }
}
