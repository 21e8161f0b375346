//! Palette construction and pixel remapping.
//!
//! One shared palette is built from a representative sample of frames
//! (first, middle, last) so the whole animation can use a single global
//! color table. A frame whose remap error against the shared palette is too
//! high gets a fresh local palette instead; the pipeline makes that call.
//!
//! Reduction is median-cut over an exact histogram. Everything here is
//! deterministic: entries are kept in a canonical order and ties always
//! break toward the lower index, so identical input produces identical
//! output bytes.

use std::collections::HashMap;

use imgref::ImgRef;
use rgb::{RGB8, RGBA8};

use crate::error::{Error, GifResult};

/// Hard GIF limit for one color table.
pub(crate) const MAX_COLORS: usize = 256;

/// An ordered color table of at most [`MAX_COLORS`] entries, with an
/// optional reserved slot for fully transparent pixels.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Palette {
    colors: Vec<RGBA8>,
    transparent: Option<u8>,
}

/// A quantized frame, ready for the encoder. `palette` is `None` when the
/// frame uses the conversion's shared palette.
pub(crate) struct IndexedFrame {
    pub width: usize,
    pub height: usize,
    pub indices: Vec<u8>,
    pub palette: Option<Palette>,
    /// Display time until the next frame, in centiseconds.
    pub delay_cs: u16,
}

impl Palette {
    /// Builds a palette from the colors of `samples`.
    ///
    /// A transparency slot is reserved if any sampled pixel is fully
    /// transparent. Partial alpha is ignored; such pixels count as opaque.
    pub fn from_frames(samples: &[ImgRef<'_, RGBA8>]) -> GifResult<Palette> {
        if samples.iter().map(|s| s.width() * s.height()).sum::<usize>() == 0 {
            return Err(Error::Quantization("cannot build a palette from zero pixels".into()));
        }

        let mut histogram: HashMap<RGB8, u64> = HashMap::new();
        let mut has_transparency = false;
        for sample in samples {
            for row in sample.rows() {
                for px in row {
                    if px.a == 0 {
                        has_transparency = true;
                    } else {
                        *histogram.entry(px.rgb()).or_insert(0) += 1;
                    }
                }
            }
        }

        let limit = MAX_COLORS - usize::from(has_transparency);
        // canonical order makes the cut (and therefore the table) reproducible
        let mut entries: Vec<(RGB8, u64)> = histogram.into_iter().collect();
        entries.sort_unstable_by_key(|(c, _)| (c.r, c.g, c.b));

        let mut colors: Vec<RGBA8> = if entries.len() <= limit {
            entries.iter().map(|(c, _)| RGBA8::new(c.r, c.g, c.b, 255)).collect()
        } else {
            median_cut(&mut entries, limit)
        };

        let transparent = if has_transparency {
            colors.push(RGBA8::new(0, 0, 0, 0));
            Some((colors.len() - 1) as u8)
        } else {
            None
        };
        debug_assert!(colors.len() <= MAX_COLORS);

        Ok(Palette { colors, transparent })
    }

    pub fn colors(&self) -> &[RGBA8] {
        &self.colors
    }

    pub fn transparent(&self) -> Option<u8> {
        self.transparent
    }

    /// Number of entries in the on-disk color table: the palette padded to
    /// the next power of two, with the GIF minimum of 2.
    pub fn table_len(&self) -> usize {
        self.colors.len().next_power_of_two().max(2)
    }

    /// log2 of the padded table size; the descriptor size field is this
    /// minus one.
    pub fn table_bits(&self) -> u8 {
        self.table_len().trailing_zeros() as u8
    }

    /// LZW minimum code size for this table, which GIF floors at 2 even for
    /// two-color tables.
    pub fn min_code_size(&self) -> u8 {
        self.table_bits().max(2)
    }

    fn nearest(&self, target: RGB8) -> u8 {
        let mut best = 0u8;
        let mut best_dist = u64::MAX;
        for (i, candidate) in self.colors.iter().enumerate() {
            if Some(i as u8) == self.transparent {
                continue;
            }
            let dist = color_distance(candidate.rgb(), target);
            if dist < best_dist {
                best_dist = dist;
                best = i as u8;
            }
        }
        best
    }
}

/// Maps every pixel of `frame` to its nearest palette entry.
///
/// Returns the index image together with the mean squared RGB error per
/// pixel, which the pipeline compares against the shared-palette error
/// limit. Fully transparent pixels map to the reserved slot at zero cost;
/// if the palette has no such slot they are matched by color and charged
/// the maximum error, which pushes the frame toward a local palette.
pub(crate) fn remap(frame: ImgRef<'_, RGBA8>, palette: &Palette) -> GifResult<(Vec<u8>, f64)> {
    let pixel_count = frame.width() * frame.height();
    if pixel_count == 0 {
        return Err(Error::Quantization("cannot quantize a frame with zero pixels".into()));
    }

    let exact: HashMap<RGB8, u8> = palette
        .colors
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i as u8) != palette.transparent)
        .map(|(i, c)| (c.rgb(), i as u8))
        .collect();
    let mut memo: HashMap<RGB8, u8> = HashMap::new();

    let mut indices = Vec::with_capacity(pixel_count);
    let mut total_error = 0u64;
    for row in frame.rows() {
        for px in row {
            if px.a == 0 {
                if let Some(t) = palette.transparent {
                    indices.push(t);
                    continue;
                }
                total_error += MAX_PIXEL_ERROR;
            }
            let rgb = px.rgb();
            let index = match exact.get(&rgb) {
                Some(&i) => i,
                None => {
                    let i = *memo.entry(rgb).or_insert_with(|| palette.nearest(rgb));
                    total_error += color_distance(palette.colors[i as usize].rgb(), rgb);
                    i
                }
            };
            indices.push(index);
        }
    }

    Ok((indices, total_error as f64 / pixel_count as f64))
}

const MAX_PIXEL_ERROR: u64 = 255 * 255 * 3;

#[inline]
fn color_distance(a: RGB8, b: RGB8) -> u64 {
    let dr = i64::from(a.r) - i64::from(b.r);
    let dg = i64::from(a.g) - i64::from(b.g);
    let db = i64::from(a.b) - i64::from(b.b);
    (dr * dr + dg * dg + db * db) as u64
}

/// Splits the histogram into `limit` boxes, cutting the box with the widest
/// channel range at its population median each round, then averages each box
/// into one representative color.
fn median_cut(entries: &mut [(RGB8, u64)], limit: usize) -> Vec<RGBA8> {
    // (start, len) ranges into `entries`
    let mut boxes: Vec<(usize, usize)> = vec![(0, entries.len())];

    while boxes.len() < limit {
        let mut widest = 0u8;
        let mut pick = None;
        for (i, &(start, len)) in boxes.iter().enumerate() {
            if len < 2 {
                continue;
            }
            let (_, range) = widest_channel(&entries[start..start + len]);
            if pick.is_none() || range > widest {
                widest = range;
                pick = Some(i);
            }
        }
        let pick = match pick {
            Some(i) => i,
            None => break, // nothing left to split
        };

        let (start, len) = boxes[pick];
        let slice = &mut entries[start..start + len];
        let (channel, _) = widest_channel(slice);
        slice.sort_unstable_by_key(|(c, _)| match channel {
            0 => (c.r, c.g, c.b),
            1 => (c.g, c.b, c.r),
            _ => (c.b, c.r, c.g),
        });

        let split = median_split(slice);
        boxes[pick] = (start, split);
        boxes.push((start + split, len - split));
    }

    let mut colors: Vec<RGBA8> = boxes
        .iter()
        .map(|&(start, len)| average_color(&entries[start..start + len]))
        .collect();
    colors.sort_unstable_by_key(|c| (c.r, c.g, c.b));
    colors.dedup();
    colors
}

fn widest_channel(entries: &[(RGB8, u64)]) -> (u8, u8) {
    let mut min = RGB8::new(255, 255, 255);
    let mut max = RGB8::new(0, 0, 0);
    for (c, _) in entries {
        min.r = min.r.min(c.r);
        min.g = min.g.min(c.g);
        min.b = min.b.min(c.b);
        max.r = max.r.max(c.r);
        max.g = max.g.max(c.g);
        max.b = max.b.max(c.b);
    }
    let ranges = [max.r - min.r, max.g - min.g, max.b - min.b];
    let channel: u8 = if ranges[0] >= ranges[1] && ranges[0] >= ranges[2] {
        0
    } else if ranges[1] >= ranges[2] {
        1
    } else {
        2
    };
    (channel, ranges[usize::from(channel)])
}

/// Index that puts half the population on each side, clamped so neither
/// side is empty.
fn median_split(entries: &[(RGB8, u64)]) -> usize {
    let total: u64 = entries.iter().map(|(_, n)| n).sum();
    let mut seen = 0u64;
    for (i, (_, n)) in entries.iter().enumerate() {
        seen += n;
        if seen * 2 >= total {
            return i.min(entries.len() - 2) + 1;
        }
    }
    entries.len() - 1
}

fn average_color(entries: &[(RGB8, u64)]) -> RGBA8 {
    let mut r = 0u64;
    let mut g = 0u64;
    let mut b = 0u64;
    let mut n = 0u64;
    for (c, count) in entries {
        r += u64::from(c.r) * count;
        g += u64::from(c.g) * count;
        b += u64::from(c.b) * count;
        n += count;
    }
    RGBA8::new(
        ((r + n / 2) / n) as u8,
        ((g + n / 2) / n) as u8,
        ((b + n / 2) / n) as u8,
        255,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgref::ImgVec;

    fn img(pixels: Vec<RGBA8>, width: usize, height: usize) -> ImgVec<RGBA8> {
        ImgVec::new(pixels, width, height)
    }

    #[test]
    fn small_color_set_is_used_exactly() {
        let red = RGBA8::new(255, 0, 0, 255);
        let blue = RGBA8::new(0, 0, 255, 255);
        let frame = img(vec![red, blue, red, blue], 2, 2);
        let palette = Palette::from_frames(&[frame.as_ref()]).unwrap();
        assert_eq!(palette.colors().len(), 2);

        let (indices, error) = remap(frame.as_ref(), &palette).unwrap();
        assert_eq!(error, 0.0);
        let decoded: Vec<RGBA8> = indices.iter().map(|&i| palette.colors()[i as usize]).collect();
        assert_eq!(decoded, vec![red, blue, red, blue]);
    }

    #[test]
    fn zero_pixel_frame_fails() {
        let frame = img(vec![], 0, 0);
        assert!(matches!(
            Palette::from_frames(&[frame.as_ref()]),
            Err(Error::Quantization(_))
        ));
    }

    #[test]
    fn many_colors_reduce_to_table_limit() {
        // 4096 distinct colors
        let mut pixels = Vec::new();
        for y in 0..64u32 {
            for x in 0..64u32 {
                pixels.push(RGBA8::new((x * 4) as u8, (y * 4) as u8, ((x + y) * 2) as u8, 255));
            }
        }
        let frame = img(pixels, 64, 64);
        let palette = Palette::from_frames(&[frame.as_ref()]).unwrap();
        assert!(palette.colors().len() <= MAX_COLORS);
        assert!(palette.colors().len() > 64, "cut collapsed too far: {}", palette.colors().len());

        let (indices, error) = remap(frame.as_ref(), &palette).unwrap();
        assert_eq!(indices.len(), 64 * 64);
        // mean error should stay well under one full channel step per pixel
        assert!(error < 300.0, "mean squared error too high: {}", error);
    }

    #[test]
    fn transparent_pixels_get_reserved_index() {
        let clear = RGBA8::new(0, 0, 0, 0);
        let red = RGBA8::new(255, 0, 0, 255);
        let frame = img(vec![clear, red, red, clear], 2, 2);
        let palette = Palette::from_frames(&[frame.as_ref()]).unwrap();
        let t = palette.transparent().expect("transparency slot");

        let (indices, error) = remap(frame.as_ref(), &palette).unwrap();
        assert_eq!(error, 0.0);
        assert_eq!(indices[0], t);
        assert_eq!(indices[3], t);
        assert_ne!(indices[1], t);
    }

    #[test]
    fn partial_alpha_is_treated_as_opaque() {
        let ghost = RGBA8::new(10, 20, 30, 128);
        let frame = img(vec![ghost; 4], 2, 2);
        let palette = Palette::from_frames(&[frame.as_ref()]).unwrap();
        assert_eq!(palette.transparent(), None);
        assert_eq!(palette.colors(), &[RGBA8::new(10, 20, 30, 255)]);
    }

    #[test]
    fn palette_construction_is_deterministic() {
        let mut pixels = Vec::new();
        for i in 0..2048u32 {
            pixels.push(RGBA8::new((i % 251) as u8, (i % 241) as u8, (i % 239) as u8, 255));
        }
        let frame = img(pixels, 64, 32);
        let a = Palette::from_frames(&[frame.as_ref()]).unwrap();
        let b = Palette::from_frames(&[frame.as_ref()]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn tiny_tables_keep_the_gif_minimum_code_size() {
        let frame = img(vec![RGBA8::new(1, 2, 3, 255); 4], 2, 2);
        let palette = Palette::from_frames(&[frame.as_ref()]).unwrap();
        assert_eq!(palette.table_len(), 2);
        assert_eq!(palette.table_bits(), 1);
        assert_eq!(palette.min_code_size(), 2);
    }
}
