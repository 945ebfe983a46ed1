use std::path::Path;
use std::sync::Arc;

use assetpak::config::PackConfig;
use assetpak::container::ContainerReader;
use assetpak::loading::LoadPolicy;
use assetpak::registry::TypeRegistry;

pub fn execute(file: &Path, config: &PackConfig) -> anyhow::Result<()> {
    let reader = ContainerReader::new(Arc::new(TypeRegistry::with_builtins()))
        .with_options(config.reader.clone());

    // Lazy handles verify every hashed item without decoding it
    match reader.read(file, &mut LoadPolicy::lazy()) {
        Ok(catalog) => {
            let unhashed = catalog.items.iter().filter(|i| i.hash.is_none()).count();
            println!(
                "✓ {} ({} items, {} without hash)",
                file.display(),
                catalog.items.len(),
                unhashed
            );
            Ok(())
        }
        Err(err) => {
            println!("✗ {}: {}", file.display(), err.trail());
            Err(err.into())
        }
    }
}
