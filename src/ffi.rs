// src/ffi.rs

//! The C ABI used by host-language bindings.
//!
//! Handles crossing the boundary are registry ids, never pointers, so a stale
//! or double-closed handle is harmless. A submission rejected on the spot is
//! reported through the return value of `command`; the callbacks only ever
//! carry the single outcome of an accepted request. Nothing is raised across
//! the boundary.

use crate::config::ConnectionSpec;
use crate::core::connection::HandleId;
use crate::core::logging::{self, Level};
use crate::core::registry::REGISTRY;
use crate::core::{BridgeError, Client, CompletionCallbacks, ErrorKind, RequestType};
use bytes::Bytes;
use std::ffi::{CStr, CString, c_char};
use std::ptr;
use std::slice;
use std::sync::Arc;
use tracing::warn;

/// Called once per successful request.
///
/// `channel` is the value passed to `command`. `payload` points to
/// `payload_len` bytes that are only valid during the call, or is null for a
/// nil reply.
pub type SuccessCallback =
    unsafe extern "C" fn(channel: usize, payload: *const u8, payload_len: usize);

/// Called once per failed request. `error_message` is only valid during the call.
pub type FailureCallback =
    unsafe extern "C" fn(channel: usize, error_message: *const c_char, error_type: ErrorKind);

/// The result of `create_client`. Free it with `free_connection_response`.
///
/// `conn_handle` is `0` on failure, in which case `connection_error_message`
/// and `error_type` describe the failure. On success the message is null.
#[repr(C)]
pub struct ConnectionResponse {
    pub conn_handle: u64,
    pub connection_error_message: *const c_char,
    pub error_type: ErrorKind,
}

/// Why `command` refused a submission. Free it with `free_command_error`.
#[repr(C)]
pub struct CommandError {
    pub error_message: *const c_char,
    pub error_type: ErrorKind,
}

impl CommandError {
    fn into_raw(err: &BridgeError) -> *mut CommandError {
        Box::into_raw(Box::new(CommandError {
            error_message: to_c_string(&err.to_string()).into_raw(),
            error_type: err.kind(),
        }))
    }
}

struct FfiCallbacks {
    success: SuccessCallback,
    failure: FailureCallback,
}

impl CompletionCallbacks for FfiCallbacks {
    fn on_success(&self, token: u64, payload: Option<&[u8]>) {
        let (data, len) = payload.map_or((ptr::null(), 0), |p| (p.as_ptr(), p.len()));
        unsafe { (self.success)(token as usize, data, len) }
    }

    fn on_failure(&self, token: u64, message: &str, kind: ErrorKind) {
        let message = to_c_string(message);
        unsafe { (self.failure)(token as usize, message.as_ptr(), kind) }
    }
}

fn to_c_string(message: &str) -> CString {
    CString::new(message.replace('\0', " ")).unwrap_or_default()
}

fn create_client_internal(
    spec_bytes: &[u8],
    success_callback: SuccessCallback,
    failure_callback: FailureCallback,
) -> Result<HandleId, BridgeError> {
    let spec = ConnectionSpec::from_bytes(spec_bytes)?;
    let callbacks = Arc::new(FfiCallbacks {
        success: success_callback,
        failure: failure_callback,
    });
    let client = Client::create(&spec, callbacks)?;
    Ok(REGISTRY.insert(client))
}

/// Creates a client from a JSON connection descriptor.
///
/// Blocks until connected or the connection timeout elapses.
///
/// # Safety
///
/// * `spec_bytes` must point to `spec_len` readable bytes, or be null with `spec_len == 0`.
/// * Both callbacks must stay callable until the client is closed with `close_client`.
/// * The returned pointer must be released with `free_connection_response`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn create_client(
    spec_bytes: *const u8,
    spec_len: usize,
    success_callback: SuccessCallback,
    failure_callback: FailureCallback,
) -> *const ConnectionResponse {
    let bytes = if spec_bytes.is_null() {
        &[][..]
    } else {
        unsafe { slice::from_raw_parts(spec_bytes, spec_len) }
    };

    let response = match create_client_internal(bytes, success_callback, failure_callback) {
        Ok(id) => ConnectionResponse {
            conn_handle: id.0,
            connection_error_message: ptr::null(),
            error_type: ErrorKind::Request,
        },
        Err(e) => ConnectionResponse {
            conn_handle: 0,
            connection_error_message: to_c_string(&e.to_string()).into_raw(),
            error_type: e.kind(),
        },
    };
    Box::into_raw(Box::new(response))
}

/// Releases a `ConnectionResponse` and its error message.
///
/// # Safety
///
/// `response` must come from `create_client` and must not be used afterwards.
/// Null is ignored.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn free_connection_response(response: *mut ConnectionResponse) {
    if response.is_null() {
        return;
    }
    let response = unsafe { Box::from_raw(response) };
    if !response.connection_error_message.is_null() {
        drop(unsafe { CString::from_raw(response.connection_error_message as *mut c_char) });
    }
}

/// Closes a client. Every request still pending receives a closing failure
/// before this returns. Unknown handles are ignored.
#[unsafe(no_mangle)]
pub extern "C" fn close_client(conn_handle: u64) {
    REGISTRY.destroy(HandleId(conn_handle));
}

/// Copies the argument buffers out of host memory.
///
/// # Safety
///
/// When `arg_count > 0`, `args` and `args_len` must each point to `arg_count`
/// readable elements, and every non-empty argument pointer must point to its
/// length in readable bytes.
unsafe fn collect_args(
    arg_count: usize,
    args: *const *const u8,
    args_len: *const usize,
) -> Result<Vec<Bytes>, BridgeError> {
    if arg_count == 0 {
        return Ok(Vec::new());
    }
    if args.is_null() || args_len.is_null() {
        return Err(BridgeError::InvalidRequest(
            "argument array is null".to_string(),
        ));
    }

    let pointers = unsafe { slice::from_raw_parts(args, arg_count) };
    let lengths = unsafe { slice::from_raw_parts(args_len, arg_count) };
    pointers
        .iter()
        .zip(lengths)
        .enumerate()
        .map(|(index, (&data, &len))| {
            if len == 0 {
                Ok(Bytes::new())
            } else if data.is_null() {
                Err(BridgeError::InvalidRequest(format!(
                    "argument {index} is null"
                )))
            } else {
                Ok(Bytes::copy_from_slice(unsafe {
                    slice::from_raw_parts(data, len)
                }))
            }
        })
        .collect()
}

/// Submits a command without waiting for its reply.
///
/// Returns null when the request was accepted; its outcome then arrives
/// exactly once through the client's callbacks with `channel`. Otherwise the
/// request was not registered, no callback will fire for it, and the returned
/// error must be released with `free_command_error`. A channel still in
/// flight keeps its pending outcome when a duplicate is refused.
///
/// # Safety
///
/// See `collect_args` for the requirements on `args` and `args_len`. The
/// argument memory may be released as soon as this returns.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn command(
    conn_handle: u64,
    channel: usize,
    request_type: u32,
    arg_count: usize,
    args: *const *const u8,
    args_len: *const usize,
) -> *mut CommandError {
    let submitted = REGISTRY.get(HandleId(conn_handle)).and_then(|client| {
        let kind = RequestType::from_u32(request_type)?;
        let args = unsafe { collect_args(arg_count, args, args_len) }?;
        client.submit(channel as u64, kind, args)
    });
    match submitted {
        Ok(()) => ptr::null_mut(),
        Err(e) => {
            warn!("Rejected command on client {conn_handle} (channel {channel}): {e}");
            CommandError::into_raw(&e)
        }
    }
}

/// Releases a `CommandError` and its message.
///
/// # Safety
///
/// `error` must come from `command` and must not be used afterwards. Null is
/// ignored.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn free_command_error(error: *mut CommandError) {
    if error.is_null() {
        return;
    }
    let error = unsafe { Box::from_raw(error) };
    if !error.error_message.is_null() {
        drop(unsafe { CString::from_raw(error.error_message as *mut c_char) });
    }
}

/// Initializes process-wide logging once and returns the level in effect.
///
/// `level` values outside the `Level` range select the default level.
///
/// # Safety
///
/// `file_name` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn init_logging(level: u32, file_name: *const c_char) -> Level {
    let file = if file_name.is_null() {
        None
    } else {
        unsafe { CStr::from_ptr(file_name) }.to_str().ok()
    };
    logging::init(Level::from_repr(level), file)
}

/// Emits a log line on behalf of the host.
///
/// # Safety
///
/// `identifier` and `message` must be null or valid NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn log_message(
    level: u32,
    identifier: *const c_char,
    message: *const c_char,
) {
    let Some(level) = Level::from_repr(level) else {
        return;
    };
    let identifier = unsafe { lossy(identifier) };
    let message = unsafe { lossy(message) };
    logging::log(level, &identifier, &message);
}

unsafe fn lossy(s: *const c_char) -> String {
    if s.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(s) }.to_string_lossy().into_owned()
    }
}
