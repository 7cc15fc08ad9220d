//! The two public pipeline shapes.

mod generate;
mod install;

pub use generate::{generate_cluster, GenerateArgs, GenerateProcessor, GenerateToolkit, MASTER_LABEL};
pub use install::InstallProcessor;

use crate::error::{Error, Result};

/// Borrow a handle that an earlier stage was supposed to create.
fn handle<'a, T: ?Sized>(slot: &'a Option<Box<T>>, stage: &str) -> Result<&'a T> {
    slot.as_deref().ok_or_else(|| {
        Error::internal_unexpected(format!("stage '{}' ran before 'init'", stage))
    })
}
