//! GIF-flavored LZW: variable-width codes starting at `min_code_size + 1`
//! bits, growing to 12, with clear/end-of-information codes and a table
//! reset when the dictionary fills.
//!
//! Output is the raw code stream, LSB-first packed; the encoder chops it
//! into 255-byte sub-blocks. The width-growth check runs after every
//! emitted code, mirroring what conformant decoders do on every code read.

use std::collections::HashMap;

const MAX_CODE_BITS: u32 = 12;
const TABLE_LIMIT: u16 = 1 << MAX_CODE_BITS;

struct Compressor<'a> {
    out: &'a mut Vec<u8>,
    acc: u32,
    acc_bits: u32,
    code_bits: u32,
    max_code: u16,
    init_bits: u32,
    free_code: u16,
    clear_pending: bool,
}

impl<'a> Compressor<'a> {
    fn new(out: &'a mut Vec<u8>, min_code_size: u8) -> Self {
        let init_bits = u32::from(min_code_size) + 1;
        Compressor {
            out,
            acc: 0,
            acc_bits: 0,
            code_bits: init_bits,
            max_code: (1 << init_bits) - 1,
            init_bits,
            free_code: (1 << min_code_size) + 2,
            clear_pending: false,
        }
    }

    fn output(&mut self, code: u16) {
        debug_assert!(u32::from(code) < (1 << self.code_bits));
        self.acc |= u32::from(code) << self.acc_bits;
        self.acc_bits += self.code_bits;
        while self.acc_bits >= 8 {
            self.out.push(self.acc as u8);
            self.acc >>= 8;
            self.acc_bits -= 8;
        }

        // The decoder widens after each code it reads once the table
        // outgrows the current width; track the same boundary here.
        if self.free_code > self.max_code || self.clear_pending {
            if self.clear_pending {
                self.code_bits = self.init_bits;
                self.max_code = (1 << self.code_bits) - 1;
                self.clear_pending = false;
            } else {
                self.code_bits += 1;
                self.max_code = if self.code_bits == MAX_CODE_BITS {
                    TABLE_LIMIT
                } else {
                    (1 << self.code_bits) - 1
                };
            }
        }
    }

    fn flush(&mut self) {
        if self.acc_bits > 0 {
            self.out.push(self.acc as u8);
            self.acc = 0;
            self.acc_bits = 0;
        }
    }
}

/// Compresses an index image into `out`.
///
/// `min_code_size` is the value the encoder writes ahead of the image data:
/// the bit width of the palette indices, floored at 2 per the GIF spec.
pub(crate) fn compress(min_code_size: u8, indices: &[u8], out: &mut Vec<u8>) {
    let clear: u16 = 1 << min_code_size;
    let end_of_info: u16 = clear + 1;
    let mut table: HashMap<(u16, u8), u16> = HashMap::new();

    let mut c = Compressor::new(out, min_code_size);
    c.output(clear);

    let mut iter = indices.iter().copied();
    let mut prefix = match iter.next() {
        Some(first) => u16::from(first),
        None => {
            c.output(end_of_info);
            c.flush();
            return;
        }
    };

    for px in iter {
        if let Some(&code) = table.get(&(prefix, px)) {
            prefix = code;
            continue;
        }
        c.output(prefix);
        if c.free_code < TABLE_LIMIT {
            table.insert((prefix, px), c.free_code);
            c.free_code += 1;
        } else {
            // dictionary full: emit a clear and start over
            table.clear();
            c.free_code = clear + 2;
            c.clear_pending = true;
            c.output(clear);
        }
        prefix = u16::from(px);
    }

    c.output(prefix);
    c.output(end_of_info);
    c.flush();
}
