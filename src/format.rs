//! Pixel-format resolution: CFA layout and 8-bit normalization for a sensor format name.

use crate::error::GrabError;

/// Bayer color-filter-array layout, named by the first two rows of the 2x2 tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfaPattern {
    /// G B / R G
    Gbrg,
    /// R G / G B
    Rggb,
    /// G R / B G
    Grbg,
    /// B G / G R
    Bggr,
}

impl CfaPattern {
    /// Identifier stems and the layout each one denotes.
    const PREFIXES: [(&'static str, Self); 4] = [
        ("BayerGB", Self::Gbrg),
        ("BayerRG", Self::Rggb),
        ("BayerGR", Self::Grbg),
        ("BayerBG", Self::Bggr),
    ];

    /// The `bayer` crate's name for this layout.
    #[must_use]
    pub const fn to_bayer(self) -> bayer::CFA {
        match self {
            Self::Gbrg => bayer::CFA::GBRG,
            Self::Rggb => bayer::CFA::RGGB,
            Self::Grbg => bayer::CFA::GRBG,
            Self::Bggr => bayer::CFA::BGGR,
        }
    }

    /// Colour codes of the 2x2 tile in row-major order, as the DNG `CFAPattern` tag
    /// stores them (0 red, 1 green, 2 blue).
    #[must_use]
    pub const fn dng_codes(self) -> [u8; 4] {
        match self {
            Self::Gbrg => [1, 2, 0, 1],
            Self::Rggb => [0, 1, 1, 2],
            Self::Grbg => [1, 0, 2, 1],
            Self::Bggr => [2, 1, 1, 0],
        }
    }
}

/// Declared bits per sample of a sensor format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitDepth {
    /// One byte per sample.
    Eight,
    /// Ten bits in a 16-bit container.
    Ten,
    /// Twelve bits in a 16-bit container.
    Twelve,
}

impl BitDepth {
    const fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(Self::Eight),
            10 => Some(Self::Ten),
            12 => Some(Self::Twelve),
            _ => None,
        }
    }

    /// Number of significant bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::Eight => 8,
            Self::Ten => 10,
            Self::Twelve => 12,
        }
    }

    /// Largest sample value, the sensor's saturation level.
    #[must_use]
    pub const fn white_level(self) -> u16 {
        u16::MAX >> (16 - self.bits())
    }

    /// Bytes per sample in the delivered buffer.
    #[must_use]
    pub const fn container_bytes(self) -> usize {
        match self {
            Self::Eight => 1,
            Self::Ten | Self::Twelve => 2,
        }
    }

    /// Divisor that brings a sample into 0..=255 for preview.
    #[must_use]
    pub const fn normalization_divisor(self) -> u16 {
        match self {
            Self::Eight => 1,
            Self::Ten => 64,
            Self::Twelve => 16,
        }
    }
}

/// Everything the pipeline needs to know about a sensor format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    /// Sensor CFA layout.
    pub pattern: CfaPattern,
    /// Declared bit depth.
    pub depth: BitDepth,
}

impl PixelFormat {
    /// Resolve a device pixel-format identifier such as `BayerGB12`.
    ///
    /// The layout is found by substring; whatever follows it must be exactly the bit depth.
    ///
    /// # Errors
    ///
    /// [`GrabError::UnsupportedFormat`] for non-Bayer identifiers, packed variants and
    /// bit depths other than 8, 10 and 12.
    pub fn resolve(identifier: &str) -> Result<Self, GrabError> {
        let unsupported = || GrabError::UnsupportedFormat(identifier.to_owned());

        let (pattern, suffix) = CfaPattern::PREFIXES
            .iter()
            .find_map(|(prefix, pattern)| {
                identifier
                    .split_once(prefix)
                    .map(|(_, suffix)| (*pattern, suffix))
            })
            .ok_or_else(unsupported)?;

        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return Err(unsupported());
        }

        let depth = suffix
            .parse::<u32>()
            .ok()
            .and_then(BitDepth::from_bits)
            .ok_or_else(unsupported)?;

        Ok(Self { pattern, depth })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_independent_of_bit_depth() {
        let twelve = PixelFormat::resolve("BayerGB12").expect("BayerGB12 should resolve");
        let eight = PixelFormat::resolve("BayerGB8").expect("BayerGB8 should resolve");

        assert_eq!(twelve.pattern, CfaPattern::Gbrg);
        assert_eq!(eight.pattern, CfaPattern::Gbrg);
        assert_ne!(
            twelve.depth.normalization_divisor(),
            eight.depth.normalization_divisor()
        );
    }

    #[test]
    fn test_all_patterns() {
        let cases = [
            ("BayerGB10", CfaPattern::Gbrg),
            ("BayerRG10", CfaPattern::Rggb),
            ("BayerGR10", CfaPattern::Grbg),
            ("BayerBG10", CfaPattern::Bggr),
        ];
        for (identifier, expected) in cases {
            let format = PixelFormat::resolve(identifier).expect("should resolve");
            assert_eq!(format.pattern, expected, "{identifier}");
            assert_eq!(format.depth, BitDepth::Ten);
        }
    }

    #[test]
    fn test_vendor_prefixed_identifier() {
        let format = PixelFormat::resolve("PFNC_BayerBG12").expect("should resolve");
        assert_eq!(format.pattern, CfaPattern::Bggr);
        assert_eq!(format.depth, BitDepth::Twelve);
    }

    #[test]
    fn test_divisors() {
        let divisor = |id: &str| {
            PixelFormat::resolve(id)
                .expect("should resolve")
                .depth
                .normalization_divisor()
        };
        assert_eq!(divisor("BayerRG12"), 16);
        assert_eq!(divisor("BayerRG10"), 64);
        assert_eq!(divisor("BayerRG8"), 1);
    }

    #[test]
    fn test_unsupported_identifiers() {
        for identifier in [
            "Mono8",
            "RGB8Packed",
            "YUV422Packed",
            "BayerGB16",
            "BayerGB12p",
            "BayerGB12Packed",
            "BayerGB",
            "",
        ] {
            let result = PixelFormat::resolve(identifier);
            assert!(
                matches!(result, Err(GrabError::UnsupportedFormat(ref id)) if id == identifier),
                "{identifier} should be unsupported, got {result:?}"
            );
        }
    }

    #[test]
    fn test_container_bytes() {
        assert_eq!(BitDepth::Eight.container_bytes(), 1);
        assert_eq!(BitDepth::Ten.container_bytes(), 2);
        assert_eq!(BitDepth::Twelve.container_bytes(), 2);
        assert_eq!(BitDepth::Twelve.bits(), 12);
    }

    #[test]
    fn test_white_levels() {
        assert_eq!(BitDepth::Eight.white_level(), 255);
        assert_eq!(BitDepth::Ten.white_level(), 1023);
        assert_eq!(BitDepth::Twelve.white_level(), 4095);
    }

    #[test]
    fn test_dng_codes_follow_tile_rows() {
        // G B / R G
        assert_eq!(CfaPattern::Gbrg.dng_codes(), [1, 2, 0, 1]);
        assert_eq!(CfaPattern::Bggr.dng_codes(), [2, 1, 1, 0]);
        for pattern in [CfaPattern::Rggb, CfaPattern::Grbg] {
            let codes = pattern.dng_codes();
            assert_eq!(codes.iter().filter(|&&code| code == 1).count(), 2);
        }
    }
}
