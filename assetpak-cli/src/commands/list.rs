use std::path::Path;

use assetpak::container::ContainerOperations;

pub fn execute(file: &Path, json: bool) -> anyhow::Result<()> {
    let items = ContainerOperations::list(file)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    for item in &items {
        let length = item
            .length
            .map_or_else(|| "-".to_string(), |l| l.to_string());
        let hash = item.hash.map(|h| h.to_hex()).unwrap_or_default();
        let location = item.outside_path.as_deref().unwrap_or("");
        println!(
            "{:<32} {:<8} {:<12} {:>10} {:<32} {}",
            item.asset_id,
            item.type_name,
            item.storage.as_str(),
            length,
            hash,
            location
        );
    }
    println!("{} items", items.len());
    Ok(())
}
