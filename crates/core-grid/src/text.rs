use core_geom::GlyphCoord;

use crate::{Glyph, GlyphError};

/// Lay `text` out on the grid starting at `origin`: one glyph per column,
/// `\n` returning to the origin column one row down. `\r` is ignored so CRLF
/// pastes behave like LF. Any other unplaceable character rejects the whole
/// string.
pub fn edits_for_text(origin: GlyphCoord, text: &str) -> Result<Vec<(GlyphCoord, Glyph)>, GlyphError> {
    let mut out = Vec::with_capacity(text.len());
    let mut at = origin;
    for c in text.chars() {
        match c {
            '\n' => at = GlyphCoord::new(origin.x, at.y + 1),
            '\r' => {}
            _ => {
                out.push((at, Glyph::checked(c)?));
                at = at.offset(1, 0);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newline_returns_to_origin_column() {
        let edits = edits_for_text(GlyphCoord::new(5, 1), "ab\r\nc").unwrap();
        let coords: Vec<_> = edits.iter().map(|(g, _)| *g).collect();
        assert_eq!(
            coords,
            vec![GlyphCoord::new(5, 1), GlyphCoord::new(6, 1), GlyphCoord::new(5, 2)]
        );
    }

    #[test]
    fn wide_glyph_rejects_text() {
        let err = edits_for_text(GlyphCoord::origin(), "ok\u{4e2d}").unwrap_err();
        assert_eq!(err, GlyphError::Width { glyph: '\u{4e2d}', width: 2 });
        assert_eq!(
            edits_for_text(GlyphCoord::origin(), "\t"),
            Err(GlyphError::Control('\t'))
        );
    }
}
