use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context, Result};
use memmap2::{Mmap, MmapOptions};

use crate::model::header::{FitsHeader, BLOCK_SIZE, CARD_SIZE};

fn create_mmap(file: &File) -> Result<Mmap> {
    let mmap = unsafe { MmapOptions::new().map(file).context("mmap failed")? };
    #[cfg(unix)]
    {
        let _ = mmap.advise(memmap2::Advice::Sequential);
    }
    Ok(mmap)
}

fn extract_card_value(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('\'') {
        if let Some(end) = trimmed[1..].find('\'') {
            return trimmed[1..1 + end].trim_end().to_string();
        }
    }
    match trimmed.find('/') {
        Some(pos) => trimmed[..pos].trim().to_string(),
        None => trimmed.to_string(),
    }
}

pub struct ParsedHdu {
    pub header: FitsHeader,
    pub data_start: usize,
    pub next_hdu_offset: usize,
}

pub fn parse_header_at(buf: &[u8], offset: usize) -> Result<ParsedHdu> {
    let mut cards = Vec::new();
    let mut pos = offset;
    let mut end_found = false;

    while !end_found {
        if pos + BLOCK_SIZE > buf.len() {
            bail!(
                "Unexpected end of file while reading header at offset {}",
                offset
            );
        }

        let block = &buf[pos..pos + BLOCK_SIZE];
        pos += BLOCK_SIZE;

        for card_bytes in block.chunks_exact(CARD_SIZE) {
            let keyword_bytes = &card_bytes[0..8];
            let keyword = String::from_utf8_lossy(keyword_bytes).trim().to_string();

            if keyword == "END" {
                end_found = true;
                break;
            }

            if card_bytes.len() < 10 || &card_bytes[8..10] != b"= " {
                continue;
            }

            let value_str = String::from_utf8_lossy(&card_bytes[10..]);
            cards.push((keyword, extract_card_value(&value_str)));
        }
    }

    let header = FitsHeader::new(cards);
    let data_start = pos;
    let next_hdu_offset = data_start + header.padded_data_bytes();

    Ok(ParsedHdu {
        header,
        data_start,
        next_hdu_offset,
    })
}

/// Reads the header of the first HDU that carries a 2D image. Files whose
/// primary HDU is dataless (NAXIS = 0) are walked until an image extension
/// is found.
pub fn read_image_header(path: &Path) -> Result<FitsHeader> {
    let file =
        File::open(path).with_context(|| format!("Failed to open FITS file {:?}", path))?;
    let mmap = create_mmap(&file)?;
    let mut offset: usize = 0;

    while offset < mmap.len() {
        let parsed = parse_header_at(&mmap, offset)?;
        if parsed.header.is_image() {
            return Ok(parsed.header);
        }
        offset = parsed.next_hdu_offset;
    }

    bail!("No image HDU found in {:?}", path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn card(key: &str, value: &str) -> Vec<u8> {
        format!("{:<8}= {:<70}", key, value).into_bytes()
    }

    fn fits_bytes(cards: &[(&str, &str)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (k, v) in cards {
            out.extend_from_slice(&card(k, v));
        }
        out.extend_from_slice(format!("{:<80}", "END").as_bytes());
        while out.len() % BLOCK_SIZE != 0 {
            out.push(b' ');
        }
        out
    }

    fn image_bytes(extra: &[(&str, &str)], naxis1: usize, naxis2: usize) -> Vec<u8> {
        let n1 = naxis1.to_string();
        let n2 = naxis2.to_string();
        let mut cards: Vec<(&str, &str)> = vec![
            ("SIMPLE", "T"),
            ("BITPIX", "8"),
            ("NAXIS", "2"),
            ("NAXIS1", &n1),
            ("NAXIS2", &n2),
        ];
        cards.extend_from_slice(extra);
        let mut out = fits_bytes(&cards);
        let data = naxis1 * naxis2;
        let padded = ((data + BLOCK_SIZE - 1) / BLOCK_SIZE) * BLOCK_SIZE;
        out.extend(std::iter::repeat(0u8).take(padded));
        out
    }

    fn write_tmp(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new()
            .suffix(".fits")
            .tempfile()
            .unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_parse_header_cards() {
        let bytes = fits_bytes(&[
            ("SIMPLE", "T"),
            ("BITPIX", "16"),
            ("NAXIS", "2 / number of axes"),
            ("NAXIS1", "10"),
            ("NAXIS2", "4"),
            ("FILTER", "'SII     '          / narrowband"),
        ]);
        let parsed = parse_header_at(&bytes, 0).unwrap();
        assert_eq!(parsed.header.get_i64("NAXIS"), Some(2));
        assert_eq!(parsed.header.get("FILTER"), Some("SII"));
        assert_eq!(parsed.data_start, BLOCK_SIZE);
    }

    #[test]
    fn test_extract_card_value_quotes_and_comments() {
        assert_eq!(extract_card_value("'R       '       / filter"), "R");
        assert_eq!(extract_card_value("  123 / comment"), "123");
        assert_eq!(extract_card_value("  1.5  "), "1.5");
    }

    #[test]
    fn test_truncated_header_is_error() {
        let bytes = vec![b' '; BLOCK_SIZE / 2];
        assert!(parse_header_at(&bytes, 0).is_err());
    }

    #[test]
    fn test_read_image_header_primary() {
        let f = write_tmp(&image_bytes(&[("FILTER", "'R'")], 8, 8));
        let header = read_image_header(f.path()).unwrap();
        assert_eq!(header.get("FILTER"), Some("R"));
        assert_eq!(header.get_i64("NAXIS1"), Some(8));
    }

    #[test]
    fn test_read_image_header_skips_dataless_primary() {
        let mut bytes = fits_bytes(&[("SIMPLE", "T"), ("BITPIX", "8"), ("NAXIS", "0")]);
        bytes.extend(image_bytes(&[("FILTER", "'G'")], 4, 4));
        let f = write_tmp(&bytes);
        let header = read_image_header(f.path()).unwrap();
        assert_eq!(header.get("FILTER"), Some("G"));
    }

    #[test]
    fn test_read_image_header_no_image_hdu() {
        let f = write_tmp(&fits_bytes(&[("SIMPLE", "T"), ("BITPIX", "8"), ("NAXIS", "0")]));
        assert!(read_image_header(f.path()).is_err());
    }
}
