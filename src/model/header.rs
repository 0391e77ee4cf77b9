use std::collections::HashMap;

pub const BLOCK_SIZE: usize = 2880;
pub const CARD_SIZE: usize = 80;

/// Parsed FITS header of a single HDU: the cards in file order plus a
/// keyword index for lookups. Later cards win on duplicate keywords.
#[derive(Debug, Clone, Default)]
pub struct FitsHeader {
    pub cards: Vec<(String, String)>,
    index: HashMap<String, String>,
}

impl FitsHeader {
    pub fn new(cards: Vec<(String, String)>) -> Self {
        let index = cards.iter().cloned().collect();
        Self { cards, index }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.index.get(key).map(|s| s.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.index.get(key)?.trim().parse().ok()
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.index.get(key)?.trim().parse().ok()
    }

    pub fn data_byte_count(&self) -> usize {
        let naxis = self.get_i64("NAXIS").unwrap_or(0);
        if naxis == 0 {
            return 0;
        }
        let bitpix = self.get_i64("BITPIX").unwrap_or(0);
        let bytes_per_pixel = (bitpix.unsigned_abs() / 8) as usize;
        let mut total: usize = 1;
        for i in 1..=naxis {
            total *= self.get_i64(&format!("NAXIS{}", i)).unwrap_or(1) as usize;
        }
        total * bytes_per_pixel
    }

    pub fn padded_data_bytes(&self) -> usize {
        let raw = self.data_byte_count();
        ((raw + BLOCK_SIZE - 1) / BLOCK_SIZE) * BLOCK_SIZE
    }

    /// True when this HDU carries a two-dimensional image with data.
    pub fn is_image(&self) -> bool {
        self.get_i64("NAXIS").unwrap_or(0) >= 2
            && self.get_i64("NAXIS1").unwrap_or(0) > 0
            && self.get_i64("NAXIS2").unwrap_or(0) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_with(pairs: &[(&str, &str)]) -> FitsHeader {
        FitsHeader::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_typed_getters() {
        let h = header_with(&[("NAXIS", "2"), ("GAIN", "2.5"), ("FILTER", "SII")]);
        assert_eq!(h.get_i64("NAXIS"), Some(2));
        assert!((h.get_f64("GAIN").unwrap() - 2.5).abs() < 1e-12);
        assert_eq!(h.get("FILTER"), Some("SII"));
        assert_eq!(h.get("MISSING"), None);
        assert!(h.contains("GAIN"));
    }

    #[test]
    fn test_data_byte_count() {
        let h = header_with(&[
            ("BITPIX", "16"),
            ("NAXIS", "2"),
            ("NAXIS1", "10"),
            ("NAXIS2", "4"),
        ]);
        assert_eq!(h.data_byte_count(), 80);
        assert_eq!(h.padded_data_bytes(), BLOCK_SIZE);
    }

    #[test]
    fn test_no_data_when_naxis_zero() {
        let h = header_with(&[("BITPIX", "8"), ("NAXIS", "0")]);
        assert_eq!(h.data_byte_count(), 0);
        assert_eq!(h.padded_data_bytes(), 0);
        assert!(!h.is_image());
    }

    #[test]
    fn test_is_image() {
        let h = header_with(&[("NAXIS", "2"), ("NAXIS1", "64"), ("NAXIS2", "64")]);
        assert!(h.is_image());
        let cube = header_with(&[
            ("NAXIS", "3"),
            ("NAXIS1", "8"),
            ("NAXIS2", "8"),
            ("NAXIS3", "4"),
        ]);
        assert!(cube.is_image());
    }
}
