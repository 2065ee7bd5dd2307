//! kiln update

use crate::GlobalArgs;
use anyhow::Result;

/// Resolve from scratch, ignoring kiln.lock, then build and integrate
///
/// The lockfile is rewritten with whatever the resolution picked.
pub fn run(global: &GlobalArgs) -> Result<()> {
    super::sync(global, false)
}
