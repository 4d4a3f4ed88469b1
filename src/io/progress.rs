use std::sync::{Mutex, OnceLock};

type ProgressCb = Box<dyn Fn(u64, u64) + Send + 'static>;

static DOWNLOAD_PROGRESS_CB: OnceLock<Mutex<Option<ProgressCb>>> = OnceLock::new();

fn slot() -> &'static Mutex<Option<ProgressCb>> {
    DOWNLOAD_PROGRESS_CB.get_or_init(|| Mutex::new(None))
}

/// Installs (or replaces) the process-wide model download progress hook.
pub fn set_download_progress_callback(cb: impl Fn(u64, u64) + Send + 'static) {
    if let Ok(mut g) = slot().lock() {
        *g = Some(Box::new(cb));
    }
}

pub fn clear_download_progress_callback() {
    if let Ok(mut g) = slot().lock() {
        *g = None;
    }
}

pub fn emit_download_progress(done: u64, total: u64) {
    if let Ok(g) = slot().lock() {
        if let Some(cb) = &*g {
            cb(done, total);
        }
    }
}
