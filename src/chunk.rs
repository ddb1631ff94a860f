//! Streaming batch chunker.
//!
//! Turns an arbitrary iterator into fixed-size batches without buffering
//! more than one batch. Used by import (batched inserts) and by the
//! maintenance scans (batched content checks).
//!
//! # Guarantees
//!
//! - Every batch holds between 1 and `size` items.
//! - Items keep their source order.
//! - Blank items (see [`Blank`]) are dropped and do not count toward `size`.
//! - An exhausted or all-blank source yields no batches at all; there is
//!   never an empty trailing batch.
//! - Single pass: the source is consumed as batches are pulled.

use crate::models::TranslationUnit;

/// Values a scan stream may contain as empty placeholders.
pub trait Blank {
    fn is_blank(&self) -> bool;
}

impl<T> Blank for Option<T> {
    fn is_blank(&self) -> bool {
        self.is_none()
    }
}

impl Blank for String {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

impl Blank for &str {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

impl<T> Blank for Vec<T> {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

impl Blank for TranslationUnit {
    fn is_blank(&self) -> bool {
        !self.is_usable()
    }
}

macro_rules! never_blank {
    ($($t:ty),*) => {
        $(impl Blank for $t {
            fn is_blank(&self) -> bool {
                false
            }
        })*
    };
}

never_blank!(i32, i64, u32, u64, usize);

/// Lazy iterator of batches, see [`chunk`].
pub struct Chunks<I: Iterator> {
    source: I,
    size: usize,
}

impl<I> Iterator for Chunks<I>
where
    I: Iterator,
    I::Item: Blank,
{
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut batch = Vec::with_capacity(self.size);
        for item in self.source.by_ref() {
            if item.is_blank() {
                continue;
            }
            batch.push(item);
            if batch.len() == self.size {
                break;
            }
        }
        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }
}

/// Split `source` into batches of at most `size` items. A `size` of 0 is
/// treated as 1.
pub fn chunk<I>(source: I, size: usize) -> Chunks<I::IntoIter>
where
    I: IntoIterator,
    I::Item: Blank,
{
    Chunks {
        source: source.into_iter(),
        size: size.max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LangPair;

    #[test]
    fn test_even_and_remainder() {
        let batches: Vec<Vec<i32>> = chunk(vec![1, 2, 3, 4, 5], 2).collect();
        assert_eq!(batches, vec![vec![1, 2], vec![3, 4], vec![5]]);
    }

    #[test]
    fn test_exact_multiple_has_no_trailing_batch() {
        let batches: Vec<Vec<i32>> = chunk(vec![1, 2, 3, 4], 2).collect();
        assert_eq!(batches, vec![vec![1, 2], vec![3, 4]]);
    }

    #[test]
    fn test_empty_source_yields_nothing() {
        let batches: Vec<Vec<i32>> = chunk(Vec::<i32>::new(), 2).collect();
        assert!(batches.is_empty());
    }

    #[test]
    fn test_blank_items_dropped() {
        let source = vec![Some(1), None, Some(2), None, None, Some(3)];
        let batches: Vec<_> = chunk(source, 2).collect();
        assert_eq!(batches, vec![vec![Some(1), Some(2)], vec![Some(3)]]);

        let all_blank: Vec<Vec<String>> = chunk(vec![String::new(), String::new()], 3).collect();
        assert!(all_blank.is_empty());
    }

    #[test]
    fn test_unusable_units_dropped() {
        let pair = LangPair::new("en", "es");
        let units = vec![
            TranslationUnit::new("a", "b", &pair),
            TranslationUnit::new("", "b", &pair),
            TranslationUnit::new("c", "d", &pair),
        ];
        let batches: Vec<_> = chunk(units, 50).collect();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }

    #[test]
    fn test_lazy_over_unbounded_source() {
        let mut batches = chunk(1u64.., 3);
        assert_eq!(batches.next(), Some(vec![1, 2, 3]));
        assert_eq!(batches.next(), Some(vec![4, 5, 6]));
    }

    #[test]
    fn test_zero_size_is_one() {
        let batches: Vec<Vec<i32>> = chunk(vec![7, 8], 0).collect();
        assert_eq!(batches, vec![vec![7], vec![8]]);
    }
}
