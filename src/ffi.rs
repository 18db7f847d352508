//! FFI bindings for Sleep Flux
//!
//! This module exposes in-memory sleep detection over a C ABI. All functions
//! take null-terminated UTF-8 strings and return allocated memory that must be
//! freed by the caller using `sleep_flux_free_string`.
//!
//! Results are JSON objects of the form `{"periods": [...], "metrics": {...}}`.
//! Nothing is written to disk from this interface.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use serde::Serialize;

use crate::config::PipelineConfig;
use crate::error::SleepError;
use crate::loader::{parse_str, InputFormat};
use crate::pipeline::{PipelineOutput, SleepPipeline};
use crate::report::PeriodRecord;
use crate::types::SleepMetrics;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

#[derive(Serialize)]
struct DetectResponse<'a> {
    periods: Vec<PeriodRecord>,
    metrics: &'a SleepMetrics,
}

/// Configuration from an optional JSON pointer; NULL means defaults
unsafe fn config_from_ptr(config_json: *const c_char) -> Result<PipelineConfig, String> {
    if config_json.is_null() {
        return Ok(PipelineConfig::default());
    }
    let json = cstr_to_string(config_json).ok_or("Invalid config string pointer")?;
    PipelineConfig::from_json(&json).map_err(|e| e.to_string())
}

/// Pipeline that keeps results in memory
fn in_memory_pipeline(config: PipelineConfig) -> SleepPipeline<'static> {
    SleepPipeline::new(config)
        .with_exporters(Vec::new())
        .with_visualizer(None)
}

/// Parse `input` as `format`, run detection and encode the response
unsafe fn detect_to_json(
    pipeline: &SleepPipeline<'_>,
    input: *const c_char,
    format: *const c_char,
) -> Result<String, String> {
    let content = cstr_to_string(input).ok_or("Invalid input string pointer")?;
    let format_name = cstr_to_string(format).ok_or("Invalid format string pointer")?;
    let format: InputFormat = format_name.parse().map_err(|e: SleepError| e.to_string())?;

    let packets = parse_str(&content, format, "<ffi>").map_err(|e| e.to_string())?;
    let output = pipeline.detect(&packets).map_err(|e| e.to_string())?;
    encode_output(&output)
}

fn encode_output(output: &PipelineOutput) -> Result<String, String> {
    let response = DetectResponse {
        periods: output.periods.iter().map(PeriodRecord::from).collect(),
        metrics: &output.metrics,
    };
    serde_json::to_string(&response).map_err(|e| e.to_string())
}

// ============================================================================
// Stateless API
// ============================================================================

/// Detect sleep periods in sensor packets held in memory.
///
/// `format` is one of `jsonl`, `json` or `csv`. `config_json` may be NULL to
/// use the default configuration.
///
/// # Safety
/// - `input` and `format` must be valid null-terminated C strings.
/// - `config_json` must be NULL or a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `sleep_flux_free_string`.
/// - Returns NULL on error; call `sleep_flux_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn sleep_flux_detect(
    input: *const c_char,
    format: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let config = match config_from_ptr(config_json) {
        Ok(config) => config,
        Err(e) => {
            set_last_error(&e);
            return ptr::null_mut();
        }
    };

    match detect_to_json(&in_memory_pipeline(config), input, format) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e);
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Reusable Pipeline API
// ============================================================================

/// Opaque handle to a configured pipeline
pub struct SleepPipelineHandle {
    pipeline: SleepPipeline<'static>,
}

/// Create a pipeline from a JSON configuration (NULL for defaults).
///
/// # Safety
/// - `config_json` must be NULL or a valid null-terminated C string.
/// - Returns a pointer that must be freed with `sleep_flux_pipeline_free`.
/// - Returns NULL on error; call `sleep_flux_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn sleep_flux_pipeline_new(
    config_json: *const c_char,
) -> *mut SleepPipelineHandle {
    clear_last_error();

    let config = match config_from_ptr(config_json) {
        Ok(config) => config,
        Err(e) => {
            set_last_error(&e);
            return ptr::null_mut();
        }
    };

    let handle = Box::new(SleepPipelineHandle {
        pipeline: in_memory_pipeline(config),
    });
    Box::into_raw(handle)
}

/// Free a pipeline.
///
/// # Safety
/// - `pipeline` must be a valid pointer returned by `sleep_flux_pipeline_new`.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn sleep_flux_pipeline_free(pipeline: *mut SleepPipelineHandle) {
    if !pipeline.is_null() {
        drop(Box::from_raw(pipeline));
    }
}

/// Detect sleep periods with a configured pipeline.
///
/// # Safety
/// - `pipeline` must be a valid pointer returned by `sleep_flux_pipeline_new`.
/// - `input` and `format` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `sleep_flux_free_string`.
/// - Returns NULL on error; call `sleep_flux_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn sleep_flux_pipeline_detect(
    pipeline: *const SleepPipelineHandle,
    input: *const c_char,
    format: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if pipeline.is_null() {
        set_last_error("Null pipeline pointer");
        return ptr::null_mut();
    }
    let handle = &*pipeline;

    match detect_to_json(&handle.pipeline, input, format) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e);
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by any `sleep_flux_*` function.
///
/// # Safety
/// - `s` must be a pointer returned by a `sleep_flux_*` function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn sleep_flux_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

/// Get the last error message on this thread.
///
/// # Safety
/// - Returns a pointer to a static string that is valid until the next
///   `sleep_flux_*` call on the same thread.
/// - Returns NULL if no error occurred.
/// - Do NOT free this pointer.
#[no_mangle]
pub unsafe extern "C" fn sleep_flux_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free this pointer.
#[no_mangle]
pub unsafe extern "C" fn sleep_flux_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    /// Two minutes at 10 Hz: still for the first 90 s, then moving
    fn jsonl_night() -> String {
        let t0: i64 = 1_690_000_000_000;
        (0..120)
            .map(|second| {
                let samples: Vec<String> = (0..10)
                    .map(|i| {
                        let t = t0 + second * 1000 + i * 100;
                        let x = if second >= 90 && i % 2 == 0 { 4.0 } else { 0.0 };
                        format!(r#"{{"t": {t}, "x": {x}, "y": 0.0, "z": 9.81}}"#)
                    })
                    .collect();
                format!(
                    r#"{{"device_id": "phone-01", "timestamp_start": {}, "sampling_rate": 10, "sensor": "accelerometer", "samples": [{}]}}"#,
                    t0 + second * 1000,
                    samples.join(", ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn config_json() -> CString {
        CString::new(r#"{"window": {"window_s": 10.0, "step_s": 5.0, "fs": 10}, "aggregation": {"min_duration_s": 30.0}}"#).unwrap()
    }

    unsafe fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null(), "{:?}", CStr::from_ptr(sleep_flux_last_error()));
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        sleep_flux_free_string(ptr);
        s
    }

    #[test]
    fn test_ffi_detect() {
        let input = CString::new(jsonl_night()).unwrap();
        let format = CString::new("jsonl").unwrap();
        let config = config_json();

        unsafe {
            let result = sleep_flux_detect(input.as_ptr(), format.as_ptr(), config.as_ptr());
            let json: Value = serde_json::from_str(&take_string(result)).unwrap();

            let periods = json["periods"].as_array().unwrap();
            assert_eq!(periods.len(), 1);
            assert!(json["metrics"]["total_sleep_s"].as_f64().unwrap() > 60.0);
            assert!(sleep_flux_last_error().is_null());
        }
    }

    #[test]
    fn test_ffi_pipeline_lifecycle() {
        let input = CString::new(jsonl_night()).unwrap();
        let format = CString::new("ndjson").unwrap();
        let config = config_json();

        unsafe {
            let pipeline = sleep_flux_pipeline_new(config.as_ptr());
            assert!(!pipeline.is_null());

            let first = take_string(sleep_flux_pipeline_detect(
                pipeline,
                input.as_ptr(),
                format.as_ptr(),
            ));
            let second = take_string(sleep_flux_pipeline_detect(
                pipeline,
                input.as_ptr(),
                format.as_ptr(),
            ));
            assert_eq!(first, second);

            sleep_flux_pipeline_free(pipeline);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        let format = CString::new("jsonl").unwrap();
        let bad_format = CString::new("xml").unwrap();
        let input = CString::new("not json").unwrap();

        unsafe {
            let result = sleep_flux_detect(input.as_ptr(), format.as_ptr(), ptr::null());
            assert!(result.is_null());
            let error = CStr::from_ptr(sleep_flux_last_error()).to_str().unwrap();
            assert!(error.contains("<ffi>:1: invalid JSON"), "{error}");

            let result = sleep_flux_detect(input.as_ptr(), bad_format.as_ptr(), ptr::null());
            assert!(result.is_null());
            let error = CStr::from_ptr(sleep_flux_last_error()).to_str().unwrap();
            assert!(error.contains("unknown input format"));

            let result = sleep_flux_detect(ptr::null(), format.as_ptr(), ptr::null());
            assert!(result.is_null());

            let result = sleep_flux_pipeline_detect(ptr::null(), input.as_ptr(), format.as_ptr());
            assert!(result.is_null());
            let error = CStr::from_ptr(sleep_flux_last_error()).to_str().unwrap();
            assert_eq!(error, "Null pipeline pointer");
        }
    }

    #[test]
    fn test_ffi_rejects_invalid_config() {
        let config = CString::new(r#"{"window": {"window_s": 0.0}}"#).unwrap();

        unsafe {
            let pipeline = sleep_flux_pipeline_new(config.as_ptr());
            assert!(pipeline.is_null());
            assert!(!sleep_flux_last_error().is_null());
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = CStr::from_ptr(sleep_flux_version()).to_str().unwrap();
            assert_eq!(version, env!("CARGO_PKG_VERSION"));
        }
    }
}
