use std::path::Path;

use assetpak::container::ContainerOperations;

pub fn execute(file: &Path) -> anyhow::Result<()> {
    let (header, head) = ContainerOperations::read_head(file)?;

    println!("Container: {}", file.display());
    println!("  version:   {}", header.version);
    println!("  app tag:   {:#010x}", header.app_tag);
    println!(
        "  manifest:  offset {} length {} md5 {}",
        header.manifest_offset, header.manifest_length, header.manifest_hash
    );
    println!(
        "  data:      offset {} length {} md5 {}",
        header.data_offset, header.data_length, header.data_hash
    );
    println!("  checksum:  ok");
    println!();
    println!("Package: {}", head.key);
    println!("  name:      {}", head.name);
    println!("  version:   {}", head.version);
    println!("  created:   {}", head.created.to_rfc3339());
    if !head.remark.is_empty() {
        println!("  remark:    {}", head.remark);
    }
    Ok(())
}
