use thiserror::Error;

use crate::ObjectId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// An Object has the wrong type, e.g. the Object is an Array where a Name would be expected.
    #[error("object has wrong type; expected type {expected} but found type {found}")]
    ObjectType {
        expected: &'static str,
        found: &'static str,
    },
    /// Dictionary key was not found.
    #[error("missing required dictionary key \"{0}\"")]
    DictKey(String),
    /// Failed to parse input.
    #[error("couldn't parse input: {0}")]
    Parse(#[from] ParseError),
    /// The file structure (trailer, root, cross-reference chain) is unusable.
    #[error("invalid file structure: {0}")]
    Structure(#[from] StructureError),
    /// A stream uses a filter that cannot be decoded.
    #[error("unsupported stream filter /{0}")]
    UnsupportedFilter(String),
    /// The stream couldn't be decompressed.
    #[error("couldn't decompress stream: {0}")]
    Decompress(#[from] DecompressError),
    /// The stream is inconsistent with its dictionary.
    #[error("invalid stream: {0}")]
    InvalidStream(String),
    /// The object is not registered in the document.
    #[error("object {0:?} not found")]
    ObjectNotFound(ObjectId),
    /// Dereferencing object failed due to a reference cycle.
    #[error("reference cycle detected at object {0:?}")]
    ReferenceCycle(ObjectId),
    /// Page number was not found in document.
    #[error("page {0} not found")]
    PageNotFound(u32),
    /// The document declares an `Encrypt` dictionary.
    #[error("encrypted documents can only be inspected, not rewritten")]
    Encrypted,
    /// Decoding byte vector to UTF8 String failed.
    #[error("invalid UTF-8 data")]
    UTF8,
    /// IO error
    #[error("I/O failure: {0}")]
    IO(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unexpected end of input")]
    EndOfInput,
    #[error("invalid file header")]
    InvalidFileHeader,
    #[error("malformed numeric literal `{0}`")]
    InvalidNumber(String),
    #[error("invalid indirect object at offset {offset}")]
    IndirectObject { offset: usize },
    #[error("object id mismatch at offset {offset}: expected {expected:?}")]
    ObjectIdMismatch { offset: usize, expected: ObjectId },
    #[error("invalid trailer")]
    InvalidTrailer,
    #[error("invalid cross-reference table")]
    InvalidXref,
    #[error("invalid object token")]
    InvalidObject,
}

#[derive(Debug, Error)]
pub enum StructureError {
    #[error("could not locate startxref")]
    MissingStartXref,
    #[error("startxref points outside the file ({0})")]
    InvalidStartXref(usize),
    #[error("trailer Prev entry points outside the file ({0})")]
    InvalidPrev(i64),
    #[error("trailer XRefStm entry points outside the file ({0})")]
    InvalidXrefStream(i64),
    #[error("cross-reference section at {offset} is corrupt: {source}")]
    CorruptXref { offset: usize, source: ParseError },
    #[error("trailer has no Root entry")]
    MissingRoot,
    #[error("no trailer found after the cross-reference section")]
    MissingTrailer,
}

#[derive(Debug, Error)]
pub enum DecompressError {
    #[error("inflate failed: {0}")]
    Flate(std::io::Error),
    #[error("LZW decoding failed: {0}")]
    Lzw(String),
    #[error("decoding ASCIIHex failed: {0}")]
    AsciiHex(&'static str),
    #[error("decoding ASCII85 failed: {0}")]
    Ascii85(&'static str),
    #[error("decoding RunLength failed: {0}")]
    RunLength(&'static str),
    #[error("PNG predictor failed: {0}")]
    Predictor(std::io::Error),
    #[error("predictor {predictor} with {bits} bits per component is not supported")]
    UnsupportedPredictor { predictor: i64, bits: usize },
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(_err: std::string::FromUtf8Error) -> Self {
        Error::UTF8
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_err: std::str::Utf8Error) -> Self {
        Error::UTF8
    }
}

/// A recovered, per-object problem recorded while the document stayed usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// A reference that does not resolve; its value was read as `null`.
    DanglingReference(ObjectId),
    /// The object could not be parsed at its recorded offset.
    CorruptObject { id: ObjectId, offset: usize, reason: String },
    /// The trailer `Size` disagreed with the entries found.
    SizeMismatch { declared: u32, actual: u32 },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::DanglingReference(id) => write!(f, "dangling reference {} {} R", id.0, id.1),
            Warning::CorruptObject { id, offset, reason } => {
                write!(f, "object {} {} R at offset {} is corrupt: {}", id.0, id.1, offset, reason)
            }
            Warning::SizeMismatch { declared, actual } => {
                write!(f, "trailer Size is {}, correct value is {}", declared, actual)
            }
        }
    }
}
