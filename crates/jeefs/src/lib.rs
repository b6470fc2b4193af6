//! A tiny flat file system for EEPROM-backed board identity and configuration blobs.
//!
//! An image is a fixed-size byte array with a versioned board-identity [`header`] at offset
//! zero, followed by a singly-linked list of [`record`]s. The [`fs`] module ties the two
//! together into a handle that owns an [`image`] backend and performs list/find/read/write/
//! add/delete against it.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
mod no_std {
    extern crate alloc;
    pub use alloc::{boxed::Box, vec, vec::Vec};
}

pub mod header;
pub mod image;
pub mod record;

pub mod fs;

pub mod prelude;
