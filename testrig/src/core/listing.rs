//! Test listing across program roots

use std::collections::BTreeMap;
use std::path::Path;

use shared::{logging, process_info, Component};

use crate::core::build::BuildOrchestrator;
use crate::core::toolchain::ToolchainEnv;
use crate::error::HarnessResult;
use crate::services::discovery::{command_name, find_tests, PackageCatalog};
use crate::traits::CommandRunner;

/// Directory test binaries are installed into inside the test image
pub const DEFAULT_BIN_DIR: &str = "/bin";

impl<R> BuildOrchestrator<R>
where
    R: CommandRunner + 'static,
{
    /// Discover tests per program root, keyed by root command name.
    ///
    /// Without explicit targets the program roots are discovered, except
    /// inside a container where only explicit targets are listed. A root whose
    /// tests cannot be listed is logged and left out.
    pub async fn list_tests(&self, targets: &[String], toolchain: &ToolchainEnv) -> HarnessResult<BTreeMap<String, PackageCatalog>> {
        let targets = if targets.is_empty() && self.inside_container() {
            Vec::new()
        } else {
            self.resolve_targets(targets, toolchain).await?
        };

        let listing_env = toolchain.listing_env();
        let mut roots = BTreeMap::new();
        for target in targets {
            let root = target.trim_end_matches('/');
            match find_tests(self.runner().as_ref(), self.workdir(), root, &listing_env).await {
                Ok(catalog) => {
                    roots.insert(command_name(self.workdir(), root), catalog);
                }
                Err(e) => logging::log_error(&Component::Discovery, &format!("Listing tests in {target}"), &e),
            }
        }

        for catalog in roots.values() {
            for info in catalog.values().filter(|info| info.has_tests()) {
                let binary = Path::new(DEFAULT_BIN_DIR).join(&info.out_name);
                process_info!(Component::Discovery, "Test binary: {} tests: {:?}", binary.display(), info.tests);
            }
        }
        Ok(roots)
    }
}
