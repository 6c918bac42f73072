//! Shared helpers for integration tests.
//!
//! The fakes live in the crate's `testkit` (enabled here through the
//! `test-utils` feature); this module only adds the toolkit shape the
//! service-level tests want.

#![allow(dead_code)]

pub use edgequake_fileops::pipeline::testkit::*;

use edgequake_fileops::engine::PdfNormalizer;
use edgequake_fileops::Toolkit;
use std::path::Path;
use std::sync::Arc;

/// Fake PDF engine and a no-op optimiser around the given normalizer.
pub fn toolkit(dir: &Path, normalizer: Arc<dyn PdfNormalizer>) -> Toolkit {
    toolkit_with(dir, normalizer, Arc::new(CountingOptimizer::default()))
}
