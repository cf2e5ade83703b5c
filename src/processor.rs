use log::warn;

use super::{Document, Result};
use crate::filters::Filter;

impl Document {
    /// Flate-compress every unfiltered stream that allows it.
    pub fn compress(&mut self, level: u32) -> Result<()> {
        self.update_streams(|stream| {
            if stream.is_compressed() || !stream.allows_compression {
                return Ok(false);
            }
            stream.compress(level)?;
            Ok(stream.is_compressed())
        })
    }

    /// Decode every stream whose filter chain can be undone.
    ///
    /// Image codecs and unknown filters are left encoded.
    pub fn decompress(&mut self) -> Result<()> {
        self.update_streams(|stream| {
            if !stream.is_compressed() {
                return Ok(false);
            }
            let decodable = stream
                .filters()?
                .iter()
                .all(|name| matches!(Filter::from_name(name), Ok(filter) if !filter.is_image_codec()));
            if !decodable {
                return Ok(false);
            }
            match stream.decompress() {
                Ok(()) => Ok(true),
                Err(err) => {
                    warn!("stream left compressed: {}", err);
                    Ok(false)
                }
            }
        })
    }
}
