//! Minimal PPM (Netpbm portable pixmap) decoder, scoped to exactly what
//! the Pixmap Store needs (spec.md §6: "Plain or raw PPM (magic 'P3'/'P6'),
//! 8-bit channels. Any other magic is an error."). Deliberately not a
//! general-purpose image crate: no palette formats, no comments inside the
//! header beyond `#`-prefixed lines, no 16-bit samples.

use alloc::vec::Vec;

use crate::error::{FbError, FbResult};

pub struct Ppm {
    pub width: u16,
    pub height: u16,
    /// Row-major RGB triples, 3 bytes per pixel.
    pub rgb: Vec<u8>,
}

fn skip_whitespace_and_comments(data: &[u8], mut i: usize) -> usize {
    loop {
        while i < data.len() && (data[i] as char).is_ascii_whitespace() {
            i += 1;
        }
        if i < data.len() && data[i] == b'#' {
            while i < data.len() && data[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        break;
    }
    i
}

fn read_uint(data: &[u8], mut i: usize) -> FbResult<(u32, usize)> {
    i = skip_whitespace_and_comments(data, i);
    let start = i;
    while i < data.len() && (data[i] as char).is_ascii_digit() {
        i += 1;
    }
    if start == i {
        return Err(FbError::InvalidArgs);
    }
    let s = core::str::from_utf8(&data[start..i]).map_err(|_| FbError::InvalidArgs)?;
    let v: u32 = s.parse().map_err(|_| FbError::InvalidArgs)?;
    Ok((v, i))
}

/// Decodes a PPM image from `data`. Fails with `InvalidArgs` on any magic
/// other than `P3`/`P6`, malformed header fields, or truncated pixel data.
pub fn decode(data: &[u8]) -> FbResult<Ppm> {
    if data.len() < 2 || data[0] != b'P' {
        return Err(FbError::InvalidArgs);
    }
    let raw = match data[1] {
        b'3' => false,
        b'6' => true,
        _ => return Err(FbError::InvalidArgs),
    };
    let mut i = 2;
    let (width, ni) = read_uint(data, i)?;
    i = ni;
    let (height, ni) = read_uint(data, i)?;
    i = ni;
    let (maxval, ni) = read_uint(data, i)?;
    i = ni;
    if width == 0 || height == 0 || maxval == 0 || maxval > 255 || width > u16::MAX as u32 || height > u16::MAX as u32 {
        return Err(FbError::InvalidArgs);
    }
    // Raw PPM requires exactly one whitespace byte after maxval before
    // binary data begins.
    if raw {
        if i >= data.len() || !(data[i] as char).is_ascii_whitespace() {
            return Err(FbError::InvalidArgs);
        }
        i += 1;
    }
    let count = width as usize * height as usize * 3;
    let mut rgb = alloc::vec![0u8; count];
    if raw {
        if data.len() - i < count {
            return Err(FbError::InvalidArgs);
        }
        rgb.copy_from_slice(&data[i..i + count]);
    } else {
        for out in rgb.iter_mut() {
            let (v, ni) = read_uint(data, i)?;
            if v > maxval {
                return Err(FbError::InvalidArgs);
            }
            *out = v as u8;
            i = ni;
        }
    }
    Ok(Ppm { width: width as u16, height: height as u16, rgb })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_ppm() {
        let src = b"P3 4 4 255\n\
            255 0 0  0 255 0  0 0 255  255 255 0\n\
            0 0 0  128 128 128  255 255 255  64 64 64\n\
            1 2 3  4 5 6  7 8 9  10 11 12\n\
            13 14 15  16 17 18  19 20 21  22 23 24\n";
        let ppm = decode(src).unwrap();
        assert_eq!((ppm.width, ppm.height), (4, 4));
        assert_eq!(&ppm.rgb[0..3], &[255, 0, 0]);
        assert_eq!(&ppm.rgb[9..12], &[255, 255, 0]);
    }

    #[test]
    fn rejects_bad_magic() {
        assert_eq!(decode(b"XX 4 4 255\n").unwrap_err(), FbError::InvalidArgs);
    }

    #[test]
    fn rejects_truncated_raw_data() {
        let mut src = alloc::vec::Vec::new();
        src.extend_from_slice(b"P6 2 2 255\n");
        src.extend_from_slice(&[1, 2, 3]);
        assert_eq!(decode(&src).unwrap_err(), FbError::InvalidArgs);
    }

    #[test]
    fn decodes_raw_ppm() {
        let mut src = alloc::vec::Vec::new();
        src.extend_from_slice(b"P6 2 1 255\n");
        src.extend_from_slice(&[10, 20, 30, 40, 50, 60]);
        let ppm = decode(&src).unwrap();
        assert_eq!((ppm.width, ppm.height), (2, 1));
        assert_eq!(ppm.rgb, alloc::vec![10, 20, 30, 40, 50, 60]);
    }
}
