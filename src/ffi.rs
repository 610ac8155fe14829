use libc::size_t;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::slice;

use crate::{File, FsError};

#[repr(C)]
#[allow(non_camel_case_types)]
pub enum AgrimErrorCode {
    AGRIM_SUCCESS = 0,
    AGRIM_NETWORK = 1,
    AGRIM_PROTOCOL = 2,
    AGRIM_IO = 3,
    AGRIM_FILE_CLOSED = 4,
    AGRIM_UNSUPPORTED_PROTOCOL = 5,
    AGRIM_INVALID_ARGUMENT = 6,
    AGRIM_SEEK_FAILED = 7,
    AGRIM_READ_FAILED = 8,
    AGRIM_SHUTDOWN = 9,
    AGRIM_NOT_BUFFERABLE = 10,
    AGRIM_UNKNOWN = 99,
}

impl From<&FsError> for AgrimErrorCode {
    fn from(err: &FsError) -> Self {
        match err {
            FsError::Network(_) => AgrimErrorCode::AGRIM_NETWORK,
            FsError::Protocol(_) => AgrimErrorCode::AGRIM_PROTOCOL,
            FsError::Io(_) => AgrimErrorCode::AGRIM_IO,
            FsError::FileClosed => AgrimErrorCode::AGRIM_FILE_CLOSED,
            FsError::UnsupportedProtocol(_) => AgrimErrorCode::AGRIM_UNSUPPORTED_PROTOCOL,
            FsError::Seek { .. } => AgrimErrorCode::AGRIM_SEEK_FAILED,
            FsError::Read { .. } => AgrimErrorCode::AGRIM_READ_FAILED,
            FsError::Shutdown => AgrimErrorCode::AGRIM_SHUTDOWN,
            FsError::NotBufferable(_) => AgrimErrorCode::AGRIM_NOT_BUFFERABLE,
        }
    }
}

thread_local! {
    static LAST_ERROR: std::cell::RefCell<Option<CString>>  = const { std::cell::RefCell::new(None) };
}

fn set_last_error(err: &FsError) {
    let error_msg = CString::new(err.to_string().replace('\0', " "))
        .unwrap_or_else(|_| c"Failed to format error message".to_owned());
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = Some(error_msg);
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

fn invalid_argument(msg: &str) -> FsError {
    FsError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, msg.to_owned()))
}

/// # Safety
/// >> ptr must be NULL or a valid null-terminated C string that outlives 'a
unsafe fn c_str<'a>(ptr: *const c_char, what: &str) -> Result<&'a str, FsError> {
    if ptr.is_null() {
        return Err(invalid_argument(&format!("{what} is null")));
    }

    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| invalid_argument(&format!("Invalid UTF-8 in {what}")))
}

/// Opaque file handle
pub struct AgrimFile {
    inner: Box<dyn File>,
}

/// Get the last error message for this thread
/// Returns NULL if no error
/// The returned string is valid until the next agrim call on this thread
#[unsafe(no_mangle)]
pub extern "C" fn agrim_last_error() -> *const c_char {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|s| s.as_ptr())
            .unwrap_or(ptr::null())
    })
}

/// Open a URL for reading. Files with a known size get a read-ahead buffer.
/// Returns NULL on error
///
/// # Safety
/// >> url must be a valid null-terminated C string
/// >> mode must be a valid null-terminated C string
/// >> Caller must free the returned pointer with agrim_file_close()
#[unsafe(no_mangle)]
pub unsafe extern "C" fn agrim_open_url(
    url: *const c_char,
    mode: *const c_char,
) -> *mut AgrimFile {
    clear_last_error();

    let opened = unsafe { c_str(url, "URL") }
        .and_then(|url| Ok((url, unsafe { c_str(mode, "mode") }?)))
        .and_then(|(url, mode)| crate::open(url, mode));

    match opened {
        Ok(file) => Box::into_raw(Box::new(AgrimFile { inner: file })),
        Err(e) => {
            set_last_error(&e);
            ptr::null_mut()
        }
    }
}

/// Read up to size bytes from file into buffer
/// Returns number of bytes read (0 at end of file), or -1 on error
///
/// # Safety
/// >> file must be a valid file handle
/// >> buffer must be valid for writes of at least size bytes
#[unsafe(no_mangle)]
pub unsafe extern "C" fn agrim_read(file: *mut AgrimFile, buffer: *mut c_void, size: size_t) -> isize {
    clear_last_error();

    if file.is_null() || buffer.is_null() {
        set_last_error(&invalid_argument("Null pointer argument"));
        return -1;
    }

    let file_ref = unsafe { &mut *file };
    let buf = unsafe { slice::from_raw_parts_mut(buffer as *mut u8, size) };

    match file_ref.inner.read(buf) {
        Ok(n) => n as isize,
        Err(e) => {
            set_last_error(&e);
            -1
        }
    }
}

/// Seek to absolute position in file
/// Returns 0 on success, error code on failure
///
/// # Safety
/// >> file must be a valid file handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn agrim_seek(file: *mut AgrimFile, pos: u64) -> c_int {
    clear_last_error();

    if file.is_null() {
        set_last_error(&invalid_argument("Null file pointer"));
        return AgrimErrorCode::AGRIM_INVALID_ARGUMENT as c_int;
    }

    let file_ref = unsafe { &mut *file };

    match file_ref.inner.seek(pos) {
        Ok(_) => AgrimErrorCode::AGRIM_SUCCESS as c_int,
        Err(e) => {
            let code = AgrimErrorCode::from(&e);
            set_last_error(&e);
            code as c_int
        }
    }
}

/// Get current position in file
/// Returns current position, or 0 if file is invalid
///
/// # Safety
/// >> file must be a valid file handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn agrim_tell(file: *const AgrimFile) -> u64 {
    clear_last_error();

    if file.is_null() {
        set_last_error(&invalid_argument("Null file pointer"));
        return 0;
    }

    unsafe { &*file }.inner.tell()
}

/// Get file size if available
/// Returns size, or 0 if not available
/// Sets has_size to 1 if size is available, 0 otherwise
///
/// # Safety
/// >> file must be a valid file handle
/// >> has_size must be valid for writes
#[unsafe(no_mangle)]
pub unsafe extern "C" fn agrim_size(file: *const AgrimFile, has_size: *mut c_int) -> u64 {
    clear_last_error();

    if file.is_null() || has_size.is_null() {
        if !has_size.is_null() {
            unsafe { *has_size = 0 };
        }
        set_last_error(&invalid_argument("Null pointer argument"));
        return 0;
    }

    let size = unsafe { &*file }.inner.size();
    unsafe { *has_size = size.is_some() as c_int };
    size.unwrap_or(0)
}

/// Check if at end of file
/// Returns 1 if EOF, 0 otherwise
///
/// # Safety
/// >> file must be a valid file handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn agrim_eof(file: *const AgrimFile) -> c_int {
    clear_last_error();

    if file.is_null() {
        return 0;
    }

    unsafe { &*file }.inner.eof() as c_int
}

/// Check whether the next read returns without waiting for the network
/// Returns 1 if data (or end of file) is ready, 0 otherwise
///
/// # Safety
/// >> file must be a valid file handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn agrim_is_available(file: *const AgrimFile) -> c_int {
    clear_last_error();

    if file.is_null() {
        return 0;
    }

    unsafe { &*file }.inner.is_available() as c_int
}

/// Close a file and free its resources
/// Stops the read-ahead worker of buffered files
///
/// # Safety
/// >> file must be a valid file handle or NULL
/// >> file must not be used after this call
#[unsafe(no_mangle)]
pub unsafe extern "C" fn agrim_file_close(file: *mut AgrimFile) {
    if !file.is_null() {
        let mut file_box = unsafe { Box::from_raw(file) };
        file_box.inner.close();
    }
}

/// Get library version string
/// Returns pointer to static version string
#[unsafe(no_mangle)]
pub extern "C" fn agrim_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_follow_error_kind() {
        let code = |err: FsError| AgrimErrorCode::from(&err) as c_int;
        assert_eq!(code(FsError::Shutdown), 9);
        assert_eq!(code(FsError::seek_failure(1, FsError::FileClosed)), 7);
        assert_eq!(code(FsError::read_failure(1, FsError::FileClosed)), 8);
    }

    #[test]
    fn null_url_sets_last_error() {
        let file = unsafe { agrim_open_url(ptr::null(), c"r".as_ptr()) };
        assert!(file.is_null());

        let msg = unsafe { CStr::from_ptr(agrim_last_error()) };
        assert!(msg.to_str().unwrap().contains("URL is null"));
    }

    #[test]
    fn unsupported_scheme_is_reported() {
        let file = unsafe { agrim_open_url(c"ftp://host/x".as_ptr(), c"r".as_ptr()) };
        assert!(file.is_null());
        assert!(!agrim_last_error().is_null());
    }
}
