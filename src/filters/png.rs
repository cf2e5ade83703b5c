//! PNG row predictors (`Predictor` 10..=15 in `DecodeParms`).

use std::io::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    None,
    Sub,
    Up,
    Avg,
    Paeth,
}

impl TryFrom<u8> for FilterType {
    type Error = u8;

    fn try_from(n: u8) -> std::result::Result<FilterType, u8> {
        match n {
            0 => Ok(FilterType::None),
            1 => Ok(FilterType::Sub),
            2 => Ok(FilterType::Up),
            3 => Ok(FilterType::Avg),
            4 => Ok(FilterType::Paeth),
            other => Err(other),
        }
    }
}

fn paeth_predict(left: u8, above: u8, upper_left: u8) -> u8 {
    let estimate = i16::from(left) + i16::from(above) - i16::from(upper_left);
    let dist_left = (estimate - i16::from(left)).abs();
    let dist_above = (estimate - i16::from(above)).abs();
    let dist_upper_left = (estimate - i16::from(upper_left)).abs();

    if dist_left <= dist_above && dist_left <= dist_upper_left {
        left
    } else if dist_above <= dist_upper_left {
        above
    } else {
        upper_left
    }
}

fn unfilter_row(filter: FilterType, bpp: usize, previous: &[u8], current: &mut [u8]) {
    let len = current.len();
    let bpp = bpp.min(len);

    match filter {
        FilterType::None => {}
        FilterType::Sub => {
            for i in bpp..len {
                current[i] = current[i].wrapping_add(current[i - bpp]);
            }
        }
        FilterType::Up => {
            for i in 0..len {
                current[i] = current[i].wrapping_add(previous[i]);
            }
        }
        FilterType::Avg => {
            for i in 0..len {
                let left = if i >= bpp { u16::from(current[i - bpp]) } else { 0 };
                current[i] = current[i].wrapping_add(((left + u16::from(previous[i])) / 2) as u8);
            }
        }
        FilterType::Paeth => {
            for i in 0..len {
                let (left, upper_left) = if i >= bpp {
                    (current[i - bpp], previous[i - bpp])
                } else {
                    (0, 0)
                };
                current[i] = current[i].wrapping_add(paeth_predict(left, previous[i], upper_left));
            }
        }
    }
}

/// Undo PNG prediction. Every row starts with its filter-type byte.
pub fn decode_frame(content: &[u8], bytes_per_pixel: usize, bytes_per_row: usize) -> Result<Vec<u8>> {
    if bytes_per_row == 0 {
        return Err(Error::new(ErrorKind::InvalidInput, "zero-width predictor row"));
    }
    let mut previous = vec![0_u8; bytes_per_row];
    let mut decoded = Vec::with_capacity(content.len());

    for row in content.chunks(bytes_per_row + 1) {
        let filter = FilterType::try_from(row[0])
            .map_err(|kind| Error::new(ErrorKind::InvalidData, format!("invalid PNG filter type ({})", kind)))?;
        let mut current = row[1..].to_vec();
        // A short final row is padded so the arithmetic stays in bounds.
        current.resize(bytes_per_row, 0);
        unfilter_row(filter, bytes_per_pixel, &previous, &mut current);
        decoded.extend_from_slice(&current[..row.len() - 1]);
        previous = current;
    }
    Ok(decoded)
}
