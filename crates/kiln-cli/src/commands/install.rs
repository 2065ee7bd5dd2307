//! kiln install

use crate::GlobalArgs;
use anyhow::Result;

/// Resolve honouring kiln.lock, then build and integrate
pub fn run(global: &GlobalArgs) -> Result<()> {
    super::sync(global, true)
}
