use std::path::Path;

use anyhow::Result;

use crate::config::SyncConfig;

pub fn hash(config: &SyncConfig, entity: &str, file: Option<&Path>, canonical: bool) -> Result<()> {
    let snapshot = super::read_snapshot(entity, file)?;
    let canonicalizer = super::canonicalizer(config)?;
    if canonical {
        println!("{}", canonicalizer.canonicalize(&snapshot)?);
    } else {
        println!("{}", canonicalizer.hash(&snapshot)?);
    }
    Ok(())
}

pub fn hash_file(path: &Path) -> Result<()> {
    println!("{}", crate::hash::hash_file(path)?);
    Ok(())
}
