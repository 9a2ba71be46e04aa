// CLI binary path resolution for agent tools

use std::path::PathBuf;

/// Locates an agent CLI binary by program name
pub trait BinaryResolver: Send + Sync + std::fmt::Debug {
    fn resolve(&self, program: &str) -> Option<PathBuf>;
}

/// Checks common install locations, then PATH
#[derive(Debug, Clone, Copy, Default)]
pub struct CliPathResolver;

impl CliPathResolver {
    /// Resolve Claude CLI binary path
    pub fn resolve_claude() -> Option<PathBuf> {
        Self::resolve_cli(
            "claude",
            &[dirs::home_dir().map(|h| h.join(".claude/local/claude"))],
        )
    }

    /// Resolve Gemini CLI binary path
    pub fn resolve_gemini() -> Option<PathBuf> {
        Self::resolve_cli("gemini", &[])
    }

    /// Resolve a CLI binary by checking common paths then falling back to PATH
    fn resolve_cli(name: &str, extra_paths: &[Option<PathBuf>]) -> Option<PathBuf> {
        let standard_paths = [
            dirs::home_dir().map(|h| h.join(format!(".npm-global/bin/{}", name))),
            Some(PathBuf::from(format!("/usr/local/bin/{}", name))),
            Some(PathBuf::from(format!("/opt/homebrew/bin/{}", name))),
        ];

        for path in extra_paths.iter().chain(standard_paths.iter()).flatten() {
            if path.exists() {
                log::info!("[CliPathResolver] Found {} at: {:?}", name, path);
                return Some(path.clone());
            }
        }

        Self::which(name)
    }

    /// Search PATH for a binary
    fn which(cmd: &str) -> Option<PathBuf> {
        match which::which(cmd) {
            Ok(path) => {
                log::info!("[CliPathResolver] Found {} via PATH at: {:?}", cmd, path);
                Some(path)
            }
            Err(_) => None,
        }
    }
}

impl BinaryResolver for CliPathResolver {
    fn resolve(&self, program: &str) -> Option<PathBuf> {
        match program {
            "claude" => Self::resolve_claude(),
            "gemini" => Self::resolve_gemini(),
            other => Self::resolve_cli(other, &[]),
        }
    }
}

/// An explicitly configured binary; resolves only if the file exists
#[derive(Debug, Clone)]
pub struct FixedBinary(PathBuf);

impl FixedBinary {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }
}

impl BinaryResolver for FixedBinary {
    fn resolve(&self, _program: &str) -> Option<PathBuf> {
        if self.0.exists() {
            Some(self.0.clone())
        } else {
            log::warn!("[CliPathResolver] Configured binary {:?} does not exist", self.0);
            None
        }
    }
}
