/*!
 * Context Switch Seam
 * The register/stack/address-space swap lives outside this core
 */

use crate::process::Thread;

/// The context-switch primitive, opaque to the scheduler core
///
/// Given the previously running thread and the next one, performs the actual
/// hand-off. The core only decides *what* runs; this seam decides *how*.
pub trait ContextSwitch: Send + Sync {
    fn switch(&self, previous: Option<&Thread>, next: &Thread);
}

/// Switch primitive that does nothing; for bring-up and tests
pub struct NoopSwitch;

impl ContextSwitch for NoopSwitch {
    fn switch(&self, _previous: Option<&Thread>, _next: &Thread) {}
}
