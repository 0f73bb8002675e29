//! NumPy `.npy` reading and writing, plus the adaptation of loaded arrays to engine slots.

pub mod adapter;
pub mod element;
pub mod reader;
pub mod writer;

pub use element::{ElementType, TypedArray};
pub use reader::{read_npy, read_npy_native};
pub use writer::write_npy;
