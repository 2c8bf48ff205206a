//! Interpreter-side hook for the file broker.
//!
//! The hook is a `sitecustomize` module placed on the child's `PYTHONPATH`.
//! At interpreter start it reads the broker address from
//! [`BROKER_ENV`] (removing it from the environment) and replaces
//! `builtins.open`, `io.open` and `pathlib.Path.open`. Read-mode opens ask the
//! broker for the path; on a miss, or for any write, append, update or
//! exclusive-create mode, the real `open` runs.

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Environment variable carrying `host:port:nonce:timeout` to the child.
pub const BROKER_ENV: &str = "GRADER_FILE_BROKER";

/// Module file name the interpreter imports automatically.
pub const SHIM_MODULE: &str = "sitecustomize.py";

const SHIM_SOURCE: &str = r#"import builtins
import io
import locale
import os
import pathlib
import socket

_BROKER = None
_raw = os.environ.pop("__BROKER_ENV__", None)
if _raw:
    try:
        _host, _port, _nonce, _timeout = _raw.split(":", 3)
        _BROKER = (_host, int(_port), _nonce, float(_timeout))
    except ValueError:
        _BROKER = None

_real_open = builtins.open


def _read_line(sock):
    data = b""
    while not data.endswith(b"\n"):
        chunk = sock.recv(1)
        if not chunk:
            return None
        data += chunk
    return data[:-1].decode("ascii", "replace")


def _fetch(file):
    host, port, nonce, timeout = _BROKER
    try:
        target = os.fsdecode(file)
        cwd = os.getcwd()
    except (TypeError, OSError):
        return None
    if "\n" in target or "\n" in cwd:
        return None
    request = "%s\n%s\n%s\n" % (nonce, cwd, target)
    try:
        with socket.create_connection((host, port), timeout=timeout) as sock:
            sock.sendall(request.encode("utf-8", "surrogateescape"))
            header = _read_line(sock)
            if not header or not header.startswith("OK "):
                return None
            remaining = int(header[3:])
            chunks = []
            while remaining > 0:
                chunk = sock.recv(min(remaining, 65536))
                if not chunk:
                    return None
                chunks.append(chunk)
                remaining -= len(chunk)
            return b"".join(chunks)
    except (OSError, ValueError):
        return None


def _open(file, mode="r", buffering=-1, encoding=None, errors=None,
          newline=None, closefd=True, opener=None):
    if (_BROKER is None or isinstance(file, int)
            or any(flag in mode for flag in "wax+")):
        return _real_open(file, mode, buffering, encoding, errors, newline, closefd, opener)
    data = _fetch(file)
    if data is None:
        return _real_open(file, mode, buffering, encoding, errors, newline, closefd, opener)
    buffer = io.BytesIO(data)
    try:
        buffer.name = os.fsdecode(file)
    except (TypeError, AttributeError):
        pass
    if "b" in mode:
        return buffer
    return io.TextIOWrapper(
        buffer,
        encoding=encoding or locale.getpreferredencoding(False) or "utf-8",
        errors=errors,
        newline=newline,
    )


def _path_open(self, mode="r", buffering=-1, encoding=None, errors=None, newline=None):
    return _open(self, mode, buffering, encoding, errors, newline)


if _BROKER is not None:
    builtins.open = _open
    io.open = _open
    pathlib.Path.open = _path_open
"#;

/// Hook source with the environment variable name filled in.
pub fn shim_source() -> String {
    SHIM_SOURCE.replace("__BROKER_ENV__", BROKER_ENV)
}

/// Write the hook module into `dir` and return the module path.
///
/// `dir` must not be inside the student-visible execution root.
pub async fn install_shim(dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(SHIM_MODULE);
    tokio::fs::write(&path, shim_source()).await?;
    Ok(path)
}

/// `dir` prepended to an existing `PYTHONPATH` value.
pub fn prepend_pythonpath(dir: &Path, existing: Option<&str>) -> std::ffi::OsString {
    let mut paths = vec![dir.to_path_buf()];
    if let Some(existing) = existing.filter(|v| !v.is_empty()) {
        paths.extend(std::env::split_paths(existing));
    }
    std::env::join_paths(paths).unwrap_or_else(|_| dir.as_os_str().to_os_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shim_source_names_env_var() {
        let source = shim_source();
        assert!(source.contains("os.environ.pop(\"GRADER_FILE_BROKER\""));
        assert!(!source.contains("__BROKER_ENV__"));
    }

    #[tokio::test]
    async fn test_install_shim_writes_module() {
        let dir = tempfile::tempdir().unwrap();
        let path = install_shim(&dir.path().join("helpers")).await.unwrap();
        assert!(path.ends_with("sitecustomize.py"));
        let written = std::fs::read_to_string(path).unwrap();
        assert!(written.starts_with("import builtins"));
    }

    #[test]
    fn test_prepend_pythonpath() {
        let joined = prepend_pythonpath(Path::new("/h"), Some("/a:/b"));
        let parts: Vec<PathBuf> = std::env::split_paths(&joined).collect();
        assert_eq!(parts[0], PathBuf::from("/h"));
        assert_eq!(parts.len(), 3);

        let only = prepend_pythonpath(Path::new("/h"), None);
        assert_eq!(only, std::ffi::OsString::from("/h"));
    }
}
