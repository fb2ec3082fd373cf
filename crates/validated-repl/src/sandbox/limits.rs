use serde::{Deserialize, Serialize};

const MEMORY_LIMIT: u64 = 512 * 1024 * 1024; // 512MB
const CPU_LIMIT: u64 = 60; // 60 seconds
const FILE_SIZE_LIMIT: u64 = 100 * 1024 * 1024; // 100MB
const NOFILE_LIMIT: u64 = 100; // Max 100 file descriptors

/// Per-process limits applied to the interpreter before it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    pub memory_bytes: u64,
    pub cpu_seconds: u64,
    pub file_size_bytes: u64,
    pub max_open_files: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_bytes: MEMORY_LIMIT,
            cpu_seconds: CPU_LIMIT,
            file_size_bytes: FILE_SIZE_LIMIT,
            max_open_files: NOFILE_LIMIT,
        }
    }
}

impl ResourceLimits {
    /// Applies the limits to the calling process.
    ///
    /// Meant to run in the forked child right before exec, so it only makes
    /// raw syscalls and does not allocate.
    #[cfg(unix)]
    pub fn apply(&self) -> std::io::Result<()> {
        use rlimit::{setrlimit, Resource};

        setrlimit(Resource::AS, self.memory_bytes, self.memory_bytes)?;
        setrlimit(Resource::CPU, self.cpu_seconds, self.cpu_seconds)?;
        setrlimit(Resource::FSIZE, self.file_size_bytes, self.file_size_bytes)?;
        setrlimit(Resource::NOFILE, self.max_open_files, self.max_open_files)?;

        Ok(())
    }

    #[cfg(not(unix))]
    pub fn apply(&self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.memory_bytes, 512 * 1024 * 1024);
        assert_eq!(limits.cpu_seconds, 60);
        assert_eq!(limits.max_open_files, 100);
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let limits: ResourceLimits = serde_json::from_str(r#"{"cpu_seconds": 5}"#).unwrap();
        assert_eq!(limits.cpu_seconds, 5);
        assert_eq!(limits.file_size_bytes, 100 * 1024 * 1024);
    }
}
