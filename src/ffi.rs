//! C ABI for GUI front ends.
//!
//! `ot_translate` blocks the calling thread until the document is finished. Events are delivered
//! through the callbacks from a runtime worker thread; callbacks must not block for long.

use std::collections::HashMap;
use std::ffi::{c_char, c_void, CStr, CString};
use std::path::PathBuf;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use tokio_util::sync::CancellationToken;

use crate::config::{api_key_from_env, parse_config};
use crate::events::{EventSink, Stage, TranslateEvent};
use crate::pipeline::{PipelineConfig, Translator};

/// `(user_data, stage, done, total)`; `stage` is valid only for the duration of the call.
pub type ProgressCallback = extern "C" fn(*mut c_void, *const c_char, u64, u64);
/// `(user_data, stage, message)`; both strings are valid only for the duration of the call.
pub type ErrorCallback = extern "C" fn(*mut c_void, *const c_char, *const c_char);

static TASKS: Lazy<Mutex<HashMap<i64, CancellationToken>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn cstring(msg: &str) -> CString {
    CString::new(msg.replace('\0', " ")).unwrap_or_default()
}

fn take_cstr(ptr: *const c_char, name: &str) -> Result<String, String> {
    if ptr.is_null() {
        return Err(format!("{name} is null"));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map(|s| s.to_string())
        .map_err(|_| format!("{name} is not valid UTF-8"))
}

struct Callbacks {
    progress: Option<ProgressCallback>,
    error: Option<ErrorCallback>,
    user_data: usize,
}

impl Callbacks {
    fn deliver(&self, event: &TranslateEvent) {
        let user_data = self.user_data as *mut c_void;
        match event {
            TranslateEvent::Progress {
                stage, done, total, ..
            } => {
                if let Some(cb) = self.progress {
                    let stage = cstring(stage.as_str());
                    cb(user_data, stage.as_ptr(), *done as u64, *total as u64);
                }
            }
            TranslateEvent::Error { stage, message, .. } => self.report_error(*stage, message),
            _ => {}
        }
    }

    fn report_error(&self, stage: Stage, message: &str) {
        if let Some(cb) = self.error {
            let stage = cstring(stage.as_str());
            let message = cstring(message);
            cb(self.user_data as *mut c_void, stage.as_ptr(), message.as_ptr());
        }
    }
}

struct TaskGuard(i64);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        TASKS
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.0);
    }
}

/// Translates `input` into `output` with settings from `config_toml` (TOML text, may be null or
/// empty for defaults).
///
/// Returns null on success, otherwise an error message to release with [`ot_free_string`].
/// `task_id` identifies the run for [`ot_cancel`].
///
/// # Safety
/// String arguments must be null or valid NUL-terminated strings. `user_data` is passed back to the
/// callbacks untouched and must stay valid until this call returns.
#[no_mangle]
pub unsafe extern "C" fn ot_translate(
    task_id: i64,
    input: *const c_char,
    output: *const c_char,
    config_toml: *const c_char,
    progress_cb: Option<ProgressCallback>,
    error_cb: Option<ErrorCallback>,
    user_data: *mut c_void,
) -> *mut c_char {
    let callbacks = Callbacks {
        progress: progress_cb,
        error: error_cb,
        user_data: user_data as usize,
    };
    match run_translate(task_id, input, output, config_toml, &callbacks) {
        Ok(()) => std::ptr::null_mut(),
        Err(msg) => cstring(&msg).into_raw(),
    }
}

fn run_translate(
    task_id: i64,
    input: *const c_char,
    output: *const c_char,
    config_toml: *const c_char,
    callbacks: &Callbacks,
) -> Result<(), String> {
    let input = PathBuf::from(take_cstr(input, "input")?);
    let output = PathBuf::from(take_cstr(output, "output")?);
    let toml_text = if config_toml.is_null() {
        String::new()
    } else {
        take_cstr(config_toml, "config_toml")?
    };

    let init_failed = |msg: String| {
        callbacks.report_error(Stage::Init, &msg);
        msg
    };
    let file_cfg = parse_config(&toml_text).map_err(|e| init_failed(format!("{e:#}")))?;
    let mut cfg = PipelineConfig::from_app_config(&file_cfg);
    if cfg.api_key.is_empty() {
        cfg.api_key = api_key_from_env().unwrap_or_default();
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| init_failed(format!("start runtime: {e}")))?;

    let cancel = CancellationToken::new();
    TASKS
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(task_id, cancel.clone());
    let _guard = TaskGuard(task_id);

    runtime.block_on(async {
        let (events, mut rx) = EventSink::channel(64);
        let translator = Translator::new(&cfg, events).map_err(|e| init_failed(e.to_string()))?;
        let forward = async {
            while let Some(event) = rx.recv().await {
                callbacks.deliver(&event);
            }
        };
        let work = async {
            let result = translator.translate_document(&input, &output, &cancel).await;
            drop(translator);
            result
        };
        let (result, ()) = tokio::join!(work, forward);
        result.map_err(|e| e.to_string())
    })
}

/// Cancels a running `ot_translate`. Returns 1 if the task was found, 0 otherwise.
#[no_mangle]
pub extern "C" fn ot_cancel(task_id: i64) -> i32 {
    let guard = TASKS.lock().unwrap_or_else(|e| e.into_inner());
    match guard.get(&task_id) {
        Some(token) => {
            token.cancel();
            1
        }
        None => 0,
    }
}

/// Releases a string returned by [`ot_translate`]. Null is ignored.
///
/// # Safety
/// `ptr` must come from `ot_translate` and must not be freed twice.
#[no_mangle]
pub unsafe extern "C" fn ot_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}
