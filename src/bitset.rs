//! Fixed-length bitsets for splits, subsplits and PCSSs.
//!
//! # Overview
//! A bitset records which taxa belong to a clade. Each bit position corresponds to a
//! taxon (leaf) id. The same type is used at three lengths:
//!
//! - **split** (`n` bits): one clade, e.g. `01100` = taxa {1, 2} out of 5.
//! - **subsplit** (`2n` bits): two adjacent blocks `sister|focal`, e.g. `10000|01100`.
//! - **PCSS** (`3n` bits): `sister|focal|child`, a parent subsplit plus one
//!   canonicalized child split of the focal clade.
//!
//! # Ordering
//! Bitsets compare lexicographically by position, position 0 first, with `0 < 1`.
//! That is the order in which strings like `"00110"` sort, and it is the canonical
//! enumeration order for every map keyed by bitsets in this crate.
//!
//! Bits are stored most-significant-first inside each `u64` word so that the derived
//! `Ord` on the word vector is exactly this lexicographic order.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SbnError};

const WORD_BITS: usize = 64;

/// A fixed-length bitset.
///
/// Internally stores bits in `Vec<u64>` words to support arbitrarily many taxa.
/// Padding bits past `len` are always zero.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Bitset {
    words: Vec<u64>,
    len: usize,
}

#[inline]
fn locate(idx: usize) -> (usize, u64) {
    (idx >> 6, 1u64 << (63 - (idx & 63)))
}

impl Bitset {
    /// Creates a new bitset of `len` bits, all set to 0.
    ///
    /// # Example
    /// ```
    /// # use rust_python_sbn::bitset::Bitset;
    /// let bs = Bitset::zeros(5);
    /// assert_eq!(bs.to_string(), "00000");
    /// ```
    pub fn zeros(len: usize) -> Self {
        Bitset {
            words: vec![0u64; len.div_ceil(WORD_BITS)],
            len,
        }
    }

    /// Creates a split of length `len` with the given positions set.
    pub fn from_indices(len: usize, indices: impl IntoIterator<Item = usize>) -> Self {
        let mut bitset = Bitset::zeros(len);
        for idx in indices {
            bitset.set(idx);
        }
        bitset
    }

    /// Creates a split with exactly one taxon present.
    pub fn singleton(len: usize, idx: usize) -> Self {
        Self::from_indices(len, [idx])
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Sets the bit at the given index to 1.
    ///
    /// # Panics
    /// If `idx` is past the end of the bitset.
    ///
    /// # Example
    /// ```
    /// # use rust_python_sbn::bitset::Bitset;
    /// let mut bs = Bitset::zeros(6);
    /// bs.set(0);
    /// bs.set(5);
    /// assert_eq!(bs.to_string(), "100001");
    /// ```
    #[inline]
    pub fn set(&mut self, idx: usize) {
        assert!(idx < self.len, "bit {idx} out of range for bitset of length {}", self.len);
        let (word, bit) = locate(idx);
        self.words[word] |= bit;
    }

    #[inline]
    pub fn get(&self, idx: usize) -> bool {
        if idx >= self.len {
            return false;
        }
        let (word, bit) = locate(idx);
        self.words[word] & bit != 0
    }

    /// Counts the number of set bits (population count).
    ///
    /// For a split this is the number of taxa in the clade.
    #[inline]
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Positions of the set bits, in increasing order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |&idx| self.get(idx))
    }

    fn check_same_len(&self, other: &Bitset, op: &str) -> Result<()> {
        if self.len != other.len {
            return Err(SbnError::structural(format!(
                "{op} of bitsets with different lengths ({} vs {})",
                self.len, other.len
            )));
        }
        Ok(())
    }

    fn clear_padding(&mut self) {
        let used = self.len % WORD_BITS;
        if used != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= !0u64 << (WORD_BITS - used);
            }
        }
    }

    /// Performs bitwise OR with another bitset (union operation).
    ///
    /// Merges two leaf sets: `self` becomes `self ∪ other`.
    ///
    /// # Example
    /// ```
    /// # use rust_python_sbn::bitset::Bitset;
    /// let mut left = Bitset::singleton(3, 0);
    /// left.or_assign(&Bitset::singleton(3, 1)).unwrap();
    /// assert_eq!(left.to_string(), "110");
    /// ```
    ///
    /// # Errors
    /// `SbnError::Structural` if the lengths differ.
    #[inline]
    pub fn or_assign(&mut self, other: &Bitset) -> Result<()> {
        self.check_same_len(other, "union")?;
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a |= *b;
        }
        Ok(())
    }

    pub fn union(&self, other: &Bitset) -> Result<Bitset> {
        let mut result = self.clone();
        result.or_assign(other)?;
        Ok(result)
    }

    pub fn intersection(&self, other: &Bitset) -> Result<Bitset> {
        self.check_same_len(other, "intersection")?;
        let words = self
            .words
            .iter()
            .zip(&other.words)
            .map(|(a, b)| a & b)
            .collect();
        Ok(Bitset {
            words,
            len: self.len,
        })
    }

    /// Flips every bit within the length of the bitset.
    pub fn complement(&self) -> Bitset {
        let mut result = Bitset {
            words: self.words.iter().map(|w| !w).collect(),
            len: self.len,
        };
        result.clear_padding();
        result
    }

    /// Replaces the split by the lexicographically smaller of itself and its
    /// complement.
    ///
    /// A rootsplit read from either side of its edge therefore lands on the same key.
    ///
    /// # Example
    /// ```
    /// # use rust_python_sbn::bitset::Bitset;
    /// let mut split: Bitset = "10000".parse().unwrap();
    /// split.minorize();
    /// assert_eq!(split.to_string(), "01111");
    /// ```
    pub fn minorize(&mut self) {
        let complement = self.complement();
        if complement < *self {
            *self = complement;
        }
    }

    pub fn minorized(&self) -> Bitset {
        let mut result = self.clone();
        result.minorize();
        result
    }

    pub fn is_minorized(&self) -> bool {
        *self <= self.complement()
    }

    /// Returns chunk `i` when the bitset is cut into `chunk_count` equal blocks.
    ///
    /// # Errors
    /// `SbnError::Structural` if the length is not divisible by `chunk_count` or `i` is
    /// out of range.
    pub fn chunk(&self, i: usize, chunk_count: usize) -> Result<Bitset> {
        if chunk_count == 0 || self.len % chunk_count != 0 || i >= chunk_count {
            return Err(SbnError::structural(format!(
                "cannot take chunk {i} of {chunk_count} from a bitset of length {}",
                self.len
            )));
        }
        let chunk_len = self.len / chunk_count;
        let offset = i * chunk_len;
        Ok(Bitset::from_indices(
            chunk_len,
            (0..chunk_len).filter(|&j| self.get(offset + j)),
        ))
    }

    /// Concatenates two bitsets: `self` occupies the first block.
    pub fn concat(&self, other: &Bitset) -> Bitset {
        let mut result = Bitset::zeros(self.len + other.len);
        for idx in self.iter_ones() {
            result.set(idx);
        }
        for idx in other.iter_ones() {
            result.set(self.len + idx);
        }
        result
    }

    /// Writes `source` into this bitset starting at `offset`, complemented if `flip`.
    ///
    /// This is how a parent subsplit is assembled from a sister and a focal split.
    ///
    /// # Example
    /// ```
    /// # use rust_python_sbn::bitset::Bitset;
    /// let clade: Bitset = "0110".parse().unwrap();
    /// let mut parent = Bitset::zeros(8);
    /// parent.copy_from(&clade, 0, false).unwrap();
    /// parent.copy_from(&clade, 4, true).unwrap();
    /// assert_eq!(parent.subsplit_to_string().unwrap(), "0110|1001");
    /// ```
    ///
    /// # Errors
    /// `SbnError::Structural` if `source` does not fit at `offset`.
    pub fn copy_from(&mut self, source: &Bitset, offset: usize, flip: bool) -> Result<()> {
        if offset + source.len > self.len {
            return Err(SbnError::structural(format!(
                "cannot copy a bitset of length {} to offset {offset} of a bitset of length {}",
                source.len, self.len
            )));
        }
        for j in 0..source.len {
            let (word, bit) = locate(offset + j);
            if source.get(j) != flip {
                self.words[word] |= bit;
            } else {
                self.words[word] &= !bit;
            }
        }
        Ok(())
    }

    /// Swaps the two halves of a subsplit.
    pub fn rotate_subsplit(&self) -> Result<Bitset> {
        Ok(self.chunk(1, 2)?.concat(&self.chunk(0, 2)?))
    }

    /// If exactly one bit is set, its position.
    pub fn singleton_option(&self) -> Option<usize> {
        if self.count_ones() == 1 {
            self.iter_ones().next()
        } else {
            None
        }
    }

    /// Builds the subsplit a PCSS hands down to the next level of the sampler.
    ///
    /// Given the parent subsplit `sister|focal` and the child split `child` (a subset of
    /// `focal`), returns `(focal \ child)|child`. Its second half is expanded next,
    /// its rotation expands the remaining part of the focal clade.
    pub fn child_subsplit(parent: &Bitset, child: &Bitset) -> Result<Bitset> {
        if parent.len != 2 * child.len {
            return Err(SbnError::structural(format!(
                "parent subsplit of length {} does not match child split of length {}",
                parent.len, child.len
            )));
        }
        let focal = parent.chunk(1, 2)?;
        let rest = focal.intersection(&child.complement())?;
        Ok(rest.concat(child))
    }

    /// The parent subsplit (`sister|focal`) of a PCSS.
    pub fn pcss_parent(&self) -> Result<Bitset> {
        Ok(self.chunk(0, 3)?.concat(&self.chunk(1, 3)?))
    }

    /// The `focal|child` part of a PCSS.
    pub fn pcss_without_sister(&self) -> Result<Bitset> {
        Ok(self.chunk(1, 3)?.concat(&self.chunk(2, 3)?))
    }

    /// Whether the parent of this PCSS is a rootsplit expanded into a subsplit, i.e. the
    /// sister clade is exactly the complement of the focal clade.
    pub fn pcss_is_rootsplit(&self) -> Result<bool> {
        Ok(self.chunk(0, 3)? == self.chunk(1, 3)?.complement())
    }

    fn chunked_string(&self, chunk_count: usize) -> Result<String> {
        let chunks = (0..chunk_count)
            .map(|i| self.chunk(i, chunk_count).map(|c| c.to_string()))
            .collect::<Result<Vec<_>>>()?;
        Ok(chunks.join("|"))
    }

    /// `sister|focal` rendering of a subsplit.
    pub fn subsplit_to_string(&self) -> Result<String> {
        self.chunked_string(2)
    }

    /// `sister|focal|child` rendering of a PCSS.
    pub fn pcss_to_string(&self) -> Result<String> {
        self.chunked_string(3)
    }
}

impl std::ops::Not for &Bitset {
    type Output = Bitset;

    fn not(self) -> Bitset {
        self.complement()
    }
}

impl fmt::Display for Bitset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for idx in 0..self.len {
            f.write_str(if self.get(idx) { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl FromStr for Bitset {
    type Err = SbnError;

    fn from_str(s: &str) -> Result<Self> {
        let mut bitset = Bitset::zeros(s.len());
        for (idx, ch) in s.chars().enumerate() {
            match ch {
                '0' => {}
                '1' => bitset.set(idx),
                other => {
                    return Err(SbnError::structural(format!(
                        "unexpected character {other:?} in bitset string {s:?}"
                    )));
                }
            }
        }
        Ok(bitset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bs(s: &str) -> Bitset {
        s.parse().unwrap()
    }

    #[test]
    fn test_bitset_basic() {
        let mut b = Bitset::zeros(4);
        b.set(0);
        b.set(2);
        assert_eq!(b.to_string(), "1010");
        assert!(b.get(2));
        assert!(!b.get(3));
        assert_eq!(b.count_ones(), 2);
        assert_eq!(b.iter_ones().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_bitset_or() {
        let mut b1 = bs("1100");
        b1.or_assign(&bs("0011")).unwrap();
        assert_eq!(b1, bs("1111"));
    }

    #[test]
    fn test_length_mismatch_is_structural() {
        let mut b1 = bs("1100");
        assert!(matches!(
            b1.or_assign(&bs("001")),
            Err(SbnError::Structural { .. })
        ));
        assert!(bs("10").intersection(&bs("1")).is_err());
        assert!(Bitset::zeros(4).copy_from(&bs("111"), 2, false).is_err());
        assert!(bs("10101").chunk(0, 2).is_err());
    }

    #[test]
    fn test_lexicographic_order() {
        let mut strings = vec!["0110", "0001", "1000", "0100", "0011"];
        let mut bitsets: Vec<Bitset> = strings.iter().map(|s| bs(s)).collect();
        strings.sort();
        bitsets.sort();
        let sorted: Vec<String> = bitsets.iter().map(|b| b.to_string()).collect();
        assert_eq!(sorted, strings);
    }

    #[test]
    fn test_complement_and_minorize() {
        assert_eq!(bs("0110").complement(), bs("1001"));
        assert_eq!((!&bs("11100")).to_string(), "00011");

        let mut split = bs("11000");
        split.minorize();
        assert_eq!(split, bs("00111"));
        assert!(split.is_minorized());
        assert_eq!(bs("00111").minorized(), bs("00111"));
        assert_eq!(bs("10000").minorized(), bs("01111"));
    }

    #[test]
    fn test_large_tree() {
        // More than 64 leaves: the complement must not leak into padding bits.
        let mut b = Bitset::zeros(70);
        b.set(0);
        b.set(63);
        b.set(64);
        b.set(69);
        assert_eq!(b.count_ones(), 4);
        let c = b.complement();
        assert_eq!(c.count_ones(), 66);
        assert!(!c.get(69));
        assert!(c.get(68));
        assert_eq!(c.complement(), b);
    }

    #[test]
    fn test_chunks_and_rotation() {
        let subsplit = bs("1100000111");
        assert_eq!(subsplit.chunk(0, 2).unwrap(), bs("11000"));
        assert_eq!(subsplit.chunk(1, 2).unwrap(), bs("00111"));
        assert_eq!(subsplit.rotate_subsplit().unwrap(), bs("0011111000"));
        assert_eq!(subsplit.subsplit_to_string().unwrap(), "11000|00111");
        assert_eq!(bs("11000").concat(&bs("00111")), subsplit);
    }

    #[test]
    fn test_copy_from_overwrites_block() {
        let mut parent = bs("11111111");
        parent.copy_from(&bs("0110"), 4, false).unwrap();
        assert_eq!(parent.to_string(), "11110110");
        parent.copy_from(&bs("0110"), 0, true).unwrap();
        assert_eq!(parent.to_string(), "10010110");
    }

    #[test]
    fn test_singleton_option() {
        assert_eq!(bs("00100").singleton_option(), Some(2));
        assert_eq!(bs("00110").singleton_option(), None);
        assert_eq!(bs("00000").singleton_option(), None);
    }

    /// ```text
    ///   PCSS  10000|01111|00001
    ///         sister {0}, focal {1,2,3,4}, child {4}
    ///   child subsplit handed to the sampler: 01110|00001
    /// ```
    #[test]
    fn test_pcss_parts() {
        let pcss = bs("100000111100001");
        assert_eq!(pcss.pcss_to_string().unwrap(), "10000|01111|00001");
        assert_eq!(pcss.pcss_parent().unwrap(), bs("1000001111"));
        assert_eq!(pcss.pcss_without_sister().unwrap(), bs("0111100001"));
        assert!(pcss.pcss_is_rootsplit().unwrap());
        assert!(!bs("000010111000100").pcss_is_rootsplit().unwrap());

        let child = Bitset::child_subsplit(&bs("1000001111"), &bs("00001")).unwrap();
        assert_eq!(child.subsplit_to_string().unwrap(), "01110|00001");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("01x1".parse::<Bitset>().is_err());
        assert_eq!("".parse::<Bitset>().unwrap().len(), 0);
    }
}
