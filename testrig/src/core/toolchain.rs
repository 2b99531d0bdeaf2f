//! Go toolchain environment overlays

use std::collections::BTreeMap;

use shared::{process_info, Component};

/// Target platform settings passed to the Go toolchain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainEnv {
    pub cgo: bool,
    pub goos: String,
    pub goarch: String,
}

impl Default for ToolchainEnv {
    fn default() -> Self {
        Self {
            cgo: false,
            goos: "linux".to_string(),
            goarch: "amd64".to_string(),
        }
    }
}

impl ToolchainEnv {
    pub fn new(cgo: bool, goos: impl Into<String>, goarch: impl Into<String>) -> Self {
        Self {
            cgo,
            goos: goos.into(),
            goarch: goarch.into(),
        }
    }

    /// Overlay for listing commands: only the cgo switch
    pub fn listing_env(&self) -> BTreeMap<String, String> {
        let mut overlay = BTreeMap::new();
        if !self.cgo {
            overlay.insert("CGO_ENABLED".to_string(), "0".to_string());
        }
        overlay
    }

    /// Overlay for compile commands: cgo switch plus target platform
    pub fn compiler_env(&self) -> BTreeMap<String, String> {
        let mut overlay = self.listing_env();
        overlay.insert("GOOS".to_string(), self.goos.clone());
        overlay.insert("GOARCH".to_string(), self.goarch.clone());
        overlay
    }

    pub fn log(&self) {
        process_info!(
            Component::Builder,
            "Toolchain env CGO_ENABLED={} GOOS={} GOARCH={}",
            u8::from(self.cgo),
            self.goos,
            self.goarch
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_overlays() {
        let toolchain = ToolchainEnv::default();
        assert_eq!(toolchain.listing_env().get("CGO_ENABLED").map(String::as_str), Some("0"));
        assert_eq!(toolchain.listing_env().len(), 1);

        let compiler = toolchain.compiler_env();
        assert_eq!(compiler.get("GOOS").map(String::as_str), Some("linux"));
        assert_eq!(compiler.get("GOARCH").map(String::as_str), Some("amd64"));
    }

    #[test]
    fn test_cgo_enabled_drops_switch() {
        let toolchain = ToolchainEnv::new(true, "darwin", "arm64");
        assert!(toolchain.listing_env().is_empty());
        assert!(!toolchain.compiler_env().contains_key("CGO_ENABLED"));
    }
}
