use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

fn main() {
    // Askama reads templates at compile time; cargo does not track them on its own.
    watch_dir("templates", "html");

    // Reported by /health so a stale binary is easy to spot.
    let build_id = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "dev".to_string());
    println!("cargo:rustc-env=DASHBOARD_BUILD_ID={}", build_id);
}

fn watch_dir(dir: impl AsRef<Path>, extension: &str) {
    let dir = dir.as_ref();
    if !dir.exists() {
        return;
    }
    let mut pending: Vec<PathBuf> = vec![dir.to_path_buf()];
    while let Some(path) = pending.pop() {
        let Ok(entries) = fs::read_dir(&path) else {
            continue;
        };
        for entry in entries.flatten() {
            let p = entry.path();
            if p.is_dir() {
                pending.push(p);
            } else if p.extension().and_then(|s| s.to_str()) == Some(extension) {
                println!("cargo:rerun-if-changed={}", p.display());
            }
        }
    }
}
