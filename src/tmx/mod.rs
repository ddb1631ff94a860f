//! TMX interchange: streaming reader and streaming zip writer.
//!
//! Both directions are pull-based. [`TmxReader::parse`] returns an iterator
//! that reads one `<tu>` at a time from a plain file or from each member of
//! a zip archive; [`TmxWriter::write_iter`] returns an iterator of byte
//! chunks forming a zip archive, ready to be copied to a file or socket.

pub mod reader;
pub mod writer;

use crate::markup::{normalize_markup, TAG_RE};

pub use reader::{ParseOptions, ParseReport, TmxReader, TmxUnits};
pub use writer::{TmxWriter, WriterOptions};

/// Property carrying a unit's provenance file name.
pub const PROP_FILE_NAME: &str = "file_name";
pub const PROP_INDUSTRY: &str = "tda-industry";
pub const PROP_TYPE: &str = "tda-type";
pub const PROP_ORGANIZATION: &str = "tda-org";

/// Properties with dedicated fields on the unit.
pub(crate) const CLASSIFICATION_PROPS: [&str; 3] = [PROP_INDUSTRY, PROP_TYPE, PROP_ORGANIZATION];

/// Escape segment text for XML while keeping inline tags verbatim.
///
/// Tags survive only when the escaped segment is already in normalized
/// form, i.e. the reader would rebuild exactly this markup. Otherwise
/// (`a < b`, unbalanced or literal tags) the whole text is escaped and
/// reads back as the same characters.
pub(crate) fn escape_segment(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut last = 0usize;
    for m in TAG_RE.find_iter(text) {
        out.push_str(&quick_xml::escape::escape(&text[last..m.start()]));
        out.push_str(m.as_str());
        last = m.end();
    }
    out.push_str(&quick_xml::escape::escape(&text[last..]));
    if last > 0 && normalize_markup(&out) != out {
        return quick_xml::escape::escape(text).into_owned();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_segment_keeps_tags() {
        assert_eq!(
            escape_segment("Tom & <T1>Jerry</T1> \"x\""),
            "Tom &amp; <T1>Jerry</T1> &quot;x&quot;"
        );
        assert_eq!(escape_segment("a < b"), "a &lt; b");
    }

    #[test]
    fn test_escape_segment_escapes_literal_markup() {
        assert_eq!(
            escape_segment("if a < b and c > d"),
            "if a &lt; b and c &gt; d"
        );
        assert_eq!(
            escape_segment("Tom & <T1><b></T1>Jerry"),
            "Tom &amp; &lt;T1&gt;&lt;b&gt;&lt;/T1&gt;Jerry"
        );
        assert_eq!(escape_segment("<b>x</b>"), "&lt;b&gt;x&lt;/b&gt;");
    }
}
