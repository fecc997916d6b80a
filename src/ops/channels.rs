// ============================================================================
// CHANNEL TRANSFORMS — pure per-pixel functions
// ============================================================================
//
// A transform maps one source pixel to one destination pixel of the same
// size. The first three channels are color; anything after them (alpha and
// extra channels) is copied through untouched. Transforms never look at
// neighbouring pixels, so strategies may visit pixels in any order.
// ============================================================================

/// A pure pixel-to-pixel mapping over `N >= min_channels()` bytes.
pub trait PixelTransform: Sync {
    /// Short verb used in progress labels ("Discolouring", "Inverting", ...).
    fn label(&self) -> &'static str;

    /// Pixels with fewer channels are rejected before a run starts.
    fn min_channels(&self) -> usize {
        3
    }

    /// `src` and `dst` have the same length; `dst` is fully overwritten.
    fn apply(&self, src: &[u8], dst: &mut [u8]);

    /// Transform a pixel where it lies.
    fn apply_in_place(&self, px: &mut [u8]) {
        let mut tmp = [0u8; crate::pixels::MAX_CHANNELS];
        let n = px.len();
        tmp[..n].copy_from_slice(px);
        self.apply(&tmp[..n], px);
    }
}

/// Unweighted gray: every color channel becomes `floor((r + g + b) / 3)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Discolour;

/// Gray value of an RGB triple, truncating.
#[inline(always)]
pub fn gray_of(r: u8, g: u8, b: u8) -> u8 {
    ((r as u16 + g as u16 + b as u16) / 3) as u8
}

impl PixelTransform for Discolour {
    fn label(&self) -> &'static str {
        "Discolouring"
    }

    #[inline]
    fn apply(&self, src: &[u8], dst: &mut [u8]) {
        debug_assert!(src.len() >= 3 && src.len() == dst.len());
        let gray = gray_of(src[0], src[1], src[2]);
        dst[0] = gray;
        dst[1] = gray;
        dst[2] = gray;
        dst[3..].copy_from_slice(&src[3..]);
    }
}

/// Color negative: `255 - c` for each color channel.
///
/// Gray and gray-alpha pixels have a single color channel; only that one
/// is inverted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Invert;

impl PixelTransform for Invert {
    fn label(&self) -> &'static str {
        "Inverting"
    }

    fn min_channels(&self) -> usize {
        1
    }

    #[inline]
    fn apply(&self, src: &[u8], dst: &mut [u8]) {
        debug_assert!(!src.is_empty() && src.len() == dst.len());
        let colors = if src.len() < 3 { 1 } else { 3 };
        for c in 0..colors {
            dst[c] = 255 - src[c];
        }
        dst[colors..].copy_from_slice(&src[colors..]);
    }
}

/// Which color channel a split layer keeps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorChannel {
    Red,
    Green,
    Blue,
}

impl ColorChannel {
    pub const ALL: [ColorChannel; 3] = [ColorChannel::Red, ColorChannel::Green, ColorChannel::Blue];

    pub fn index(&self) -> usize {
        match self {
            ColorChannel::Red => 0,
            ColorChannel::Green => 1,
            ColorChannel::Blue => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ColorChannel::Red => "Red",
            ColorChannel::Green => "Green",
            ColorChannel::Blue => "Blue",
        }
    }
}

/// Keep one color channel, zero the other two.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IsolateChannel(pub ColorChannel);

impl PixelTransform for IsolateChannel {
    fn label(&self) -> &'static str {
        "Splitting"
    }

    #[inline]
    fn apply(&self, src: &[u8], dst: &mut [u8]) {
        debug_assert!(src.len() >= 3 && src.len() == dst.len());
        let keep = self.0.index();
        for c in 0..3 {
            dst[c] = if c == keep { src[c] } else { 0 };
        }
        dst[3..].copy_from_slice(&src[3..]);
    }
}
