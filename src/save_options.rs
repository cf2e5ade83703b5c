use std::fmt;
use std::str::FromStr;

/// How stream payloads are filtered when written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    /// Payloads are written exactly as stored.
    None,
    /// Unfiltered payloads are deflated (`/FlateDecode`).
    #[default]
    Flate,
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "flate" | "flatedecode" | "deflate" => Ok(Compression::Flate),
            "none" | "" => Ok(Compression::None),
            other => Err(format!("unknown compression \"{}\"", other)),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Compression::None => "none",
            Compression::Flate => "flate",
        })
    }
}

/// Shape of the cross-reference section written by a full save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum XrefFormat {
    /// Classic `xref` table followed by `trailer`.
    #[default]
    Table,
    /// A `/Type /XRef` stream (PDF 1.5).
    Stream,
}

/// Options for saving PDF documents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOptions {
    pub compression: Compression,

    /// Deflate level, 0 to 9.
    pub compression_level: u32,

    /// Ignored by incremental saves, which follow the format of the file they extend.
    pub xref_format: XrefFormat,

    /// Header version of a full save. `None` writes `1.4` (`1.5` with xref streams).
    pub version: Option<String>,

    /// Set `ModDate` in the `Info` dictionary before saving.
    pub stamp_modification_date: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        SaveOptions {
            compression: Compression::Flate,
            compression_level: 6,
            xref_format: XrefFormat::Table,
            version: None,
            stamp_modification_date: false,
        }
    }
}

impl SaveOptions {
    /// Create a builder for SaveOptions
    pub fn builder() -> SaveOptionsBuilder {
        SaveOptionsBuilder::default()
    }

    /// The version written to the header of a full save.
    pub fn header_version(&self) -> &str {
        match (self.version.as_deref(), self.xref_format) {
            (Some(version), XrefFormat::Stream) if version < "1.5" => "1.5",
            (Some(version), _) => version,
            (None, XrefFormat::Stream) => "1.5",
            (None, XrefFormat::Table) => "1.4",
        }
    }
}

/// Builder for SaveOptions
#[derive(Debug, Default)]
pub struct SaveOptionsBuilder {
    options: SaveOptions,
}

impl SaveOptionsBuilder {
    pub fn compression(mut self, value: Compression) -> Self {
        self.options.compression = value;
        self
    }

    /// Set compression level (0-9)
    pub fn compression_level(mut self, value: u32) -> Self {
        self.options.compression_level = value.min(9);
        self
    }

    pub fn xref_format(mut self, value: XrefFormat) -> Self {
        self.options.xref_format = value;
        self
    }

    /// Raise the header version above the default.
    pub fn version<S: Into<String>>(mut self, value: S) -> Self {
        self.options.version = Some(value.into());
        self
    }

    pub fn stamp_modification_date(mut self, value: bool) -> Self {
        self.options.stamp_modification_date = value;
        self
    }

    /// Build the SaveOptions
    pub fn build(self) -> SaveOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_accepts_textual_spellings() {
        assert_eq!("flate".parse::<Compression>(), Ok(Compression::Flate));
        assert_eq!(" None ".parse::<Compression>(), Ok(Compression::None));
        assert!("zip".parse::<Compression>().is_err());
    }

    #[test]
    fn header_version_defaults() {
        assert_eq!(SaveOptions::default().header_version(), "1.4");
        let streams = SaveOptions::builder().xref_format(XrefFormat::Stream).build();
        assert_eq!(streams.header_version(), "1.5");
        let raised = SaveOptions::builder().version("1.7").build();
        assert_eq!(raised.header_version(), "1.7");
        let low = SaveOptions::builder().version("1.3").xref_format(XrefFormat::Stream).build();
        assert_eq!(low.header_version(), "1.5");
    }
}
