//! Marker strings and fixed-column offsets for the solver's text formats.
//!
//! The deck, the diagnostic report, and the result file are legacy
//! fixed-layout formats; every byte offset here must match the solver's
//! convention exactly. Keeping them in one place keeps compatibility bugs
//! out of the iteration logic.

use std::ops::Range;

use crate::error::ShapeshiftError;

// --- model deck (.inp) ---

/// A deck line starting with this character opens a keyword section
pub const DECK_KEYWORD_CHAR: char = '*';
/// A doubled keyword character marks a comment line
pub const DECK_COMMENT_PREFIX: &str = "**";
/// Node-definition keyword, matched case-insensitively over its own length
pub const DECK_NODE_KEYWORD: &str = "*NODE";
/// First analysis step; ends the model-definition region
pub const DECK_STEP_KEYWORD: &str = "*STEP";
/// Textual-inclusion directive carrying an INPUT=<file> argument
pub const DECK_INCLUDE_KEYWORD: &str = "*INCLUDE";

// --- diagnostic report (.dat) ---

/// Introduces an objective block; the type is the second whitespace token
pub const DAT_OBJECTIVE_MARKER: &str = " OBJECTIVE:";
/// Objective type whose values are numbered by occurrence order
pub const DAT_EIGENFREQUENCY_TYPE: &str = "EIGENFREQUENCY";

// --- result file (.frd) ---

/// Closes the current result block
pub const FRD_BLOCK_END: &str = " -3";
/// Opens a result block; any block start also ends the block before it
pub const FRD_BLOCK_START: &str = " -4";
/// Prefix of a per-node data row inside a block
pub const FRD_DATA_ROW: &str = " -1";
/// Surface-normal block marker
pub const FRD_NORM_BLOCK: &str = " -4  NORM";
/// Nodal-displacement block marker
pub const FRD_DISP_BLOCK: &str = " -4  DISP";
/// Sensitivity block markers, all compared over this fixed width
pub const FRD_SENMASS_BLOCK: &str = " -4  SENMASS";
pub const FRD_SENSTRE_BLOCK: &str = " -4  SENSTRE";
pub const FRD_SENFREQ_BLOCK: &str = " -4  SENFREQ";
pub const FRD_SENENER_BLOCK: &str = " -4  SENENER";
pub const FRD_SENDISA_BLOCK: &str = " -4  SENDISA";
pub const FRD_PRJGRAD_BLOCK: &str = " -4  PRJGRAD";

/// Node id column of a data row
pub const FRD_NODE_ID_COLS: Range<usize> = 3..13;
/// First 12-character numeric slot after the node id
pub const FRD_FIELD_1_COLS: Range<usize> = 13..25;
/// Second numeric slot; sensitivity blocks carry their filtered value here
pub const FRD_FIELD_2_COLS: Range<usize> = 25..37;
/// Third numeric slot
pub const FRD_FIELD_3_COLS: Range<usize> = 37..49;

/// Extracts a fixed column range from a line
///
/// # Arguments
/// * `line` - The full data row
/// * `cols` - Byte range of the column
///
/// # Returns
/// The trimmed column content, or a Format error naming the short line
pub fn column<'a>(line: &'a str, cols: &Range<usize>) -> Result<&'a str, ShapeshiftError> {
    match line.get(cols.clone()) {
        Some(s) => Ok(s.trim()),
        None => Err(ShapeshiftError::Format(format!(
            "Data row too short for columns {}..{}: '{}'",
            cols.start,
            cols.end,
            line.trim_end()
        ))),
    }
}

/// Parses a fixed-column floating-point field
pub fn float_column(line: &str, cols: &Range<usize>) -> Result<f64, ShapeshiftError> {
    let raw = column(line, cols)?;
    raw.parse().map_err(|_| {
        ShapeshiftError::Format(format!(
            "Non-numeric field '{}' in data row '{}'",
            raw,
            line.trim_end()
        ))
    })
}

/// Parses the fixed-column node id field
pub fn node_id_column(line: &str, cols: &Range<usize>) -> Result<u64, ShapeshiftError> {
    let raw = column(line, cols)?;
    raw.parse().map_err(|_| {
        ShapeshiftError::Format(format!(
            "Bad node id '{}' in data row '{}'",
            raw,
            line.trim_end()
        ))
    })
}

/// True if the line opens a deck keyword of the given name, compared
/// case-insensitively over the keyword's own length. Byte comparison, so a
/// multi-byte character straddling the keyword length cannot panic.
pub fn deck_keyword_is(line: &str, keyword: &str) -> bool {
    line.as_bytes()
        .get(..keyword.len())
        .map_or(false, |prefix| prefix.eq_ignore_ascii_case(keyword.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_match_solver_layout() {
        //         0123456789012345678901234567890123456789012345678
        let row = " -1       427-1.23456E+00 5.00000E-01-7.00000E-03";
        assert_eq!(node_id_column(row, &FRD_NODE_ID_COLS).unwrap(), 427);
        assert_eq!(float_column(row, &FRD_FIELD_1_COLS).unwrap(), -1.23456);
        assert_eq!(float_column(row, &FRD_FIELD_2_COLS).unwrap(), 0.5);
        assert_eq!(float_column(row, &FRD_FIELD_3_COLS).unwrap(), -7.0e-3);
    }

    #[test]
    fn short_row_is_format_error() {
        let row = " -1       427";
        assert!(float_column(row, &FRD_FIELD_1_COLS).is_err());
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        assert!(deck_keyword_is("*Node, NSET=Nall", DECK_NODE_KEYWORD));
        assert!(deck_keyword_is("*step", DECK_STEP_KEYWORD));
        assert!(!deck_keyword_is("*NOD", DECK_NODE_KEYWORD));
        assert!(!deck_keyword_is("*ELEMENT", DECK_NODE_KEYWORD));
    }

    #[test]
    fn keyword_match_survives_multibyte_characters() {
        // é straddles the 8-byte *INCLUDE comparison width
        assert!(!deck_keyword_is("**abcdeé comment", DECK_INCLUDE_KEYWORD));
        assert!(!deck_keyword_is("**Gehäuse-Netz", DECK_NODE_KEYWORD));
        assert!(deck_keyword_is("*node, nset=Gehäuse", DECK_NODE_KEYWORD));
    }
}
