//! Nibble paths
//!
//! Keys are walked through the trie one nibble (4-bit value, 0-15) at a time,
//! which gives every branch a fan-out of 16.
//!
//! Paths are stored packed two nibbles per byte. An odd-length path gets a
//! zero padding nibble in the high half of the first byte, and the node
//! records `parity = true` so the decoder knows to drop it:
//!
//! ```text
//! [a, b, c]    -> parity=true,  bytes=[0x0a, 0xbc]
//! [a, b, c, d] -> parity=false, bytes=[0xab, 0xcd]
//! ```

use crate::{Error, Result};
use std::fmt;

/// A sequence of nibbles
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Nibbles {
    /// One nibble per byte, in the low 4 bits
    data: Vec<u8>,
}

impl Nibbles {
    /// Create an empty path
    pub fn new() -> Self {
        Nibbles { data: Vec::new() }
    }

    /// Create a path from raw nibble values
    pub fn from_raw(nibbles: Vec<u8>) -> Self {
        debug_assert!(nibbles.iter().all(|&n| n < 16), "nibbles must be < 16");
        Nibbles { data: nibbles }
    }

    /// A single-nibble path
    pub fn single(nibble: u8) -> Self {
        Nibbles::from_raw(vec![nibble])
    }

    /// Expand a byte string into its nibbles, high nibble first
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut data = Vec::with_capacity(bytes.len() * 2);
        for byte in bytes {
            data.push(byte >> 4);
            data.push(byte & 0x0f);
        }
        Nibbles { data }
    }

    /// Pack into bytes, returning the packed bytes and the parity flag
    pub fn to_bytes(&self) -> (Vec<u8>, bool) {
        let parity = self.data.len() % 2 == 1;
        let mut packed = Vec::with_capacity((self.data.len() + 1) / 2);

        let rest = if parity {
            packed.push(self.data[0]);
            &self.data[1..]
        } else {
            &self.data[..]
        };
        for pair in rest.chunks(2) {
            packed.push((pair[0] << 4) | pair[1]);
        }

        (packed, parity)
    }

    /// Unpack bytes produced by [`Nibbles::to_bytes`]
    pub fn from_packed(bytes: &[u8], parity: bool) -> Result<Self> {
        if !parity {
            return Ok(Nibbles::from_bytes(bytes));
        }

        let (first, rest) = bytes
            .split_first()
            .ok_or_else(|| Error::CorruptEncoding("odd parity on an empty path".into()))?;
        if first >> 4 != 0 {
            return Err(Error::CorruptEncoding(format!(
                "non-zero padding nibble in path byte {:#04x}",
                first
            )));
        }

        let mut data = Vec::with_capacity(bytes.len() * 2 - 1);
        data.push(first & 0x0f);
        data.extend(Nibbles::from_bytes(rest).data);
        Ok(Nibbles { data })
    }

    /// Original key bytes, if this path has an even number of nibbles
    pub fn to_key(&self) -> Option<Vec<u8>> {
        match self.to_bytes() {
            (bytes, false) => Some(bytes),
            (_, true) => None,
        }
    }

    /// Number of nibbles
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True when the path has an odd number of nibbles
    pub fn parity(&self) -> bool {
        self.data.len() % 2 == 1
    }

    /// Nibble at `index`
    pub fn get(&self, index: usize) -> Option<u8> {
        self.data.get(index).copied()
    }

    /// Nibbles from `start` to the end
    pub fn slice_from(&self, start: usize) -> Self {
        Nibbles {
            data: self.data[start..].to_vec(),
        }
    }

    /// Nibbles in `start..end`
    pub fn slice(&self, start: usize, end: usize) -> Self {
        Nibbles {
            data: self.data[start..end].to_vec(),
        }
    }

    pub fn starts_with(&self, prefix: &Nibbles) -> bool {
        self.data.starts_with(&prefix.data)
    }

    /// Length in nibbles of the longest shared prefix
    pub fn common_prefix_length(&self, other: &Nibbles) -> usize {
        self.data
            .iter()
            .zip(other.data.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// Append a single nibble
    pub fn push(&mut self, nibble: u8) {
        debug_assert!(nibble < 16, "nibble must be < 16");
        self.data.push(nibble);
    }

    /// Append another path
    pub fn extend(&mut self, other: &Nibbles) {
        self.data.extend_from_slice(&other.data);
    }

    /// `self` followed by `other`
    pub fn concat(&self, other: &Nibbles) -> Self {
        let mut joined = self.clone();
        joined.extend(other);
        joined
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// One hex digit per nibble
    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Nibbles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for nibble in &self.data {
            write!(f, "{:x}", nibble)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Nibbles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nibbles({})", self)
    }
}
