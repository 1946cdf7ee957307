//! Flag page encoding
//!
//! A flag page is one virtual page. Set means the flag pattern in the first
//! byte followed by erased bytes; Unset means the page is still erased.
//! Anything else is a page whose programming was interrupted.

use crate::geometry::{Layout, LayoutError};
use crate::is_erased;

/// Decoded state of a single flag page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlagState {
    /// Flag pattern followed by erased bytes
    Set,
    /// Page is erased
    Unset,
    /// Neither set nor erased
    Garbled,
}

/// State of a record derived from its validity and invalidity pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecordState {
    /// Header, data and validity flag committed
    Valid,
    /// Record was invalidated or its invalidation page is damaged
    Invalid,
    /// Record was invalidated (reported only if the layout asks for it)
    Invalidated,
    /// Header committed but the validity flag never was
    Inconsistent,
}

/// Write a flag page into `out`
pub fn encode_flag(layout: &Layout, set: bool, out: &mut [u8]) -> Result<usize, LayoutError> {
    let page = layout.page() as usize;
    if out.len() < page {
        return Err(LayoutError::BufferTooSmall);
    }
    out[..page].fill(layout.erase_value);
    if set {
        out[0] = layout.flag_pattern;
    }
    Ok(page)
}

/// Decode a flag page
pub fn decode_flag(layout: &Layout, page: &[u8]) -> FlagState {
    match page.split_first() {
        None => FlagState::Garbled,
        Some((&first, rest)) if is_erased(rest, layout.erase_value) => {
            if first == layout.erase_value {
                FlagState::Unset
            } else if first == layout.flag_pattern {
                FlagState::Set
            } else {
                FlagState::Garbled
            }
        }
        Some(_) => FlagState::Garbled,
    }
}

/// Combine the two flag pages of a record
///
/// | validity | invalidity | state |
/// |---|---|---|
/// | Set | Unset | Valid |
/// | Unset | Unset | Inconsistent |
/// | Garbled | Unset | Inconsistent |
/// | any | Set | Invalidated / Invalid |
/// | any | Garbled | Invalid |
pub fn combine_flags(layout: &Layout, valid: FlagState, invalid: FlagState) -> RecordState {
    match (valid, invalid) {
        (FlagState::Set, FlagState::Unset) => RecordState::Valid,
        (FlagState::Unset | FlagState::Garbled, FlagState::Unset) => RecordState::Inconsistent,
        (_, FlagState::Set) if layout.invalidated_status => RecordState::Invalidated,
        (_, FlagState::Set) => RecordState::Invalid,
        (_, FlagState::Garbled) => RecordState::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_encode_decode() {
        let layout = Layout::new();
        let mut page = [0u8; 8];

        encode_flag(&layout, true, &mut page).unwrap();
        assert_eq!(page[0], layout.flag_pattern);
        assert_eq!(decode_flag(&layout, &page), FlagState::Set);

        encode_flag(&layout, false, &mut page).unwrap();
        assert_eq!(decode_flag(&layout, &page), FlagState::Unset);
    }

    #[test]
    fn test_flag_garbled() {
        let layout = Layout::new();
        let mut page = [0xFFu8; 8];
        page[0] = 0x12;
        assert_eq!(decode_flag(&layout, &page), FlagState::Garbled);

        let mut page = [0xFFu8; 8];
        page[0] = layout.flag_pattern;
        page[5] = 0x00;
        assert_eq!(decode_flag(&layout, &page), FlagState::Garbled);
    }

    #[test]
    fn test_encode_buffer_too_small() {
        let layout = Layout::new();
        let mut page = [0u8; 4];
        assert_eq!(
            encode_flag(&layout, true, &mut page),
            Err(LayoutError::BufferTooSmall)
        );
    }

    #[test]
    fn test_truth_table() {
        use FlagState::*;
        let layout = Layout::new();

        assert_eq!(combine_flags(&layout, Set, Unset), RecordState::Valid);
        assert_eq!(combine_flags(&layout, Unset, Unset), RecordState::Inconsistent);
        assert_eq!(combine_flags(&layout, Garbled, Unset), RecordState::Inconsistent);
        assert_eq!(combine_flags(&layout, Set, Set), RecordState::Invalid);
        assert_eq!(combine_flags(&layout, Unset, Set), RecordState::Invalid);
        assert_eq!(combine_flags(&layout, Set, Garbled), RecordState::Invalid);
        assert_eq!(combine_flags(&layout, Garbled, Garbled), RecordState::Invalid);
    }

    #[test]
    fn test_truth_table_invalidated() {
        use FlagState::*;
        let layout = Layout {
            invalidated_status: true,
            ..Layout::new()
        };

        assert_eq!(combine_flags(&layout, Set, Set), RecordState::Invalidated);
        assert_eq!(combine_flags(&layout, Unset, Set), RecordState::Invalidated);
        // A damaged invalidity page never reports an explicit invalidation
        assert_eq!(combine_flags(&layout, Set, Garbled), RecordState::Invalid);
    }
}
