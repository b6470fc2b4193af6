//! Commonly used types, re-exported for a single glob import.

#[doc(inline)]
pub use crate::fs::Filesystem;
#[doc(inline)]
pub use crate::header::{BoardIdentity, HeaderVersion, SignatureAlgorithm};
#[doc(inline)]
pub use crate::image::ImageBackend;
#[cfg(feature = "std")]
#[doc(inline)]
pub use crate::image::FileImage;
#[doc(inline)]
pub use crate::image::MemoryImage;
#[doc(inline)]
pub use crate::record::FileRecord;

pub mod header {
    pub use crate::header::Error;
}

pub mod record {
    pub use crate::record::Error;
}

pub mod image {
    pub use crate::image::Error;
}

pub mod fs {
    pub use crate::fs::Error;
}
