//! Startup executable-inventory scan.
//!
//! Walks the standard binary directories, hashes every ELF-magic file it
//! finds, and seeds the executable store so later `Elf::open` calls have a
//! pre-existing row to update rather than insert-from-scratch. Mirrors the
//! original scanner's concurrent directory walk (there: a fixed worker pool
//! draining a bounded channel of file paths; here: bounded concurrent tokio
//! tasks over the same walk).

use crate::elf::{check_elf_magic, dev_inode, sha256_hex};
use crate::store::Store;
use std::path::PathBuf;
use std::sync::Arc;
use walkdir::WalkDir;

const SCAN_ROOTS: &[&str] = &["/usr/bin", "/usr/sbin", "/bin", "/sbin", "/usr/local"];

pub async fn scan_system(store: Arc<Store>) {
    let concurrency = std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(4);
    let semaphore = Arc::new(tokio::sync::Semaphore::new(concurrency));
    let mut handles = Vec::new();

    for root in SCAN_ROOTS {
        for entry in WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let path: PathBuf = entry.into_path();
            let store = Arc::clone(&store);
            let permit = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire().await;
                scan_one(&store, &path).await;
            }));
        }
    }

    for handle in handles {
        let _ = handle.await;
    }

    log::info!("system scan complete");
}

async fn scan_one(store: &Store, path: &PathBuf) {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(_) => return,
    };
    if !check_elf_magic(&bytes) {
        return;
    }
    let Ok((dev, inode)) = dev_inode(path) else {
        return;
    };
    let hash = sha256_hex(&bytes);
    let path_str = path.to_string_lossy();

    if store.executable_exists(&path_str).await.unwrap_or(false) {
        let _ = store.update_executable(&path_str, dev, inode, &hash).await;
    } else {
        let _ = store
            .insert_executable(&path_str, dev, inode, &hash)
            .await;
    }
}
