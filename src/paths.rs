use std::path::{Path, PathBuf};

/// Directory the platform scans for hook sidecar sockets.
pub const HOOK_SOCKETS_DIR: &str = "/var/run/kubevirt-hooks";

/// Socket for a hook: `<dir>/<name>.sock`
pub fn socket_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.sock"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_named_after_hook() {
        assert_eq!(
            socket_path(Path::new(HOOK_SOCKETS_DIR), "android-x86"),
            PathBuf::from("/var/run/kubevirt-hooks/android-x86.sock")
        );
    }
}
