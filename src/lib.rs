#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

mod object;
pub use crate::object::{Dictionary, Object, ObjectId, Stream, StringFormat};

mod document;
pub use document::{Document, FileState};

mod copier;
pub use copier::{CopyCache, CopyOptions, CopyStats, ObjectCopier, copy_subgraph};

mod datetime;
pub use datetime::DateTime;

mod error;
pub use error::{DecompressError, Error, ParseError, Result, StructureError, Warning};

pub mod filters;
pub use filters::Filter;

mod incremental;
mod object_stream;
pub use object_stream::ObjectStream;

mod parser;
pub use parser::parse_object;

mod processor;

mod reader;
pub use reader::Reader;

mod save_options;
pub use save_options::{Compression, SaveOptions, SaveOptionsBuilder, XrefFormat};

mod writer;
pub use writer::{CountingWrite, Writer};

pub mod xref;
pub use xref::{Revision, Xref, XrefEntry, XrefType};
