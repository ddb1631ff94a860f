//! Streaming TMX writer producing a zip archive.
//!
//! The archive is written in zip streaming mode into a small shared sink;
//! every step of [`TmxWriter::write_iter`] drains whatever compressed bytes
//! the sink holds and hands them to the caller. Memory stays bounded by the
//! compressor's window, not by the corpus.

use std::fmt::Write as _;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Datelike, Timelike, Utc};
use quick_xml::escape::escape;
use zip::write::{SimpleFileOptions, StreamWriter};
use zip::{CompressionMethod, ZipWriter};

use super::{escape_segment, CLASSIFICATION_PROPS, PROP_FILE_NAME, PROP_INDUSTRY, PROP_ORGANIZATION, PROP_TYPE};
use crate::config::TmxConfig;
use crate::error::{TmError, TmResult};
use crate::models::{format_compact, TranslationUnit};

/// Identity and defaults stamped into every member.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub srclang: String,
    pub creation_tool: String,
    pub creation_tool_version: String,
    /// Header timestamp; fixing it makes output reproducible.
    pub creation_date: DateTime<Utc>,
    pub default_member: String,
}

impl WriterOptions {
    pub fn new(srclang: impl Into<String>) -> Self {
        Self::from_config(srclang, &TmxConfig::default())
    }

    pub fn from_config(srclang: impl Into<String>, config: &TmxConfig) -> Self {
        Self {
            srclang: srclang.into(),
            creation_tool: config.creation_tool.clone(),
            creation_tool_version: config.creation_tool_version.clone(),
            creation_date: Utc::now(),
            default_member: config.default_member.clone(),
        }
    }

    pub fn with_creation_date(mut self, creation_date: DateTime<Utc>) -> Self {
        self.creation_date = creation_date;
        self
    }

    fn header(&self) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <tmx version=\"1.4\">\n  \
             <header creationtool=\"{}\" creationtoolversion=\"{}\" datatype=\"PlainText\" \
             segtype=\"sentence\" adminlang=\"en-us\" srclang=\"{}\" o-tmf=\"{}\" creationdate=\"{}\"/>\n  \
             <body>\n",
            escape(self.creation_tool.as_str()),
            escape(self.creation_tool_version.as_str()),
            escape(self.srclang.as_str()),
            escape(self.creation_tool.as_str()),
            format_compact(&self.creation_date),
        )
    }
}

const FOOTER: &str = "  </body>\n</tmx>\n";

/// Shared in-memory sink the zip stream writes into.
#[derive(Clone, Default)]
struct Sink(Arc<Mutex<Vec<u8>>>);

impl Sink {
    fn drain(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// One zip archive of TMX members, produced as a sequence of byte chunks.
pub struct TmxWriter {
    zip: Option<ZipWriter<StreamWriter<Sink>>>,
    sink: Sink,
    options: WriterOptions,
}

impl TmxWriter {
    pub fn new(options: WriterOptions) -> Self {
        let sink = Sink::default();
        Self {
            zip: Some(ZipWriter::new_stream(sink.clone())),
            sink,
            options,
        }
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    /// Start member `file_name` (or the default member) and lazily write
    /// `units` into it, header first and footer last.
    pub fn write_iter<I>(&mut self, units: I, file_name: Option<&str>) -> WriteIter<'_, I::IntoIter>
    where
        I: IntoIterator<Item = TranslationUnit>,
    {
        let member = file_name
            .unwrap_or(&self.options.default_member)
            .to_string();
        WriteIter {
            writer: self,
            units: units.into_iter(),
            member,
            stage: Stage::Header,
        }
    }

    /// Finish the archive. The returned chunks complete the byte stream.
    pub fn write_close(&mut self) -> impl Iterator<Item = TmResult<Vec<u8>>> {
        let finished = match self.zip.take() {
            Some(zip) => zip
                .finish()
                .map(|_| self.sink.drain())
                .map_err(TmError::from),
            None => Ok(Vec::new()),
        };
        std::iter::once(finished).filter(|chunk| !matches!(chunk, Ok(bytes) if bytes.is_empty()))
    }

    fn zip(&mut self) -> TmResult<&mut ZipWriter<StreamWriter<Sink>>> {
        self.zip
            .as_mut()
            .ok_or_else(|| TmError::archive("<stream>", "archive already closed"))
    }

    fn member_options(&self) -> SimpleFileOptions {
        let ts = self.options.creation_date;
        let modified = zip::DateTime::from_date_and_time(
            ts.year().clamp(1980, 2107) as u16,
            ts.month() as u8,
            ts.day() as u8,
            ts.hour() as u8,
            ts.minute() as u8,
            ts.second() as u8,
        )
        .unwrap_or_default();
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(modified)
    }
}

enum Stage {
    Header,
    Units,
    Footer,
    Done,
}

/// Lazy byte chunks for one archive member. See [`TmxWriter::write_iter`].
pub struct WriteIter<'w, I> {
    writer: &'w mut TmxWriter,
    units: I,
    member: String,
    stage: Stage,
}

impl<I> WriteIter<'_, I>
where
    I: Iterator<Item = TranslationUnit>,
{
    fn step(&mut self) -> TmResult<Option<Vec<u8>>> {
        loop {
            match self.stage {
                Stage::Header => {
                    let options = self.writer.member_options();
                    let header = self.writer.options.header();
                    let zip = self.writer.zip()?;
                    zip.start_file(self.member.as_str(), options)?;
                    zip.write_all(header.as_bytes())?;
                    self.stage = Stage::Units;
                }
                Stage::Units => match self.units.next() {
                    Some(unit) => {
                        let xml = unit_xml(&unit);
                        self.writer.zip()?.write_all(xml.as_bytes())?;
                    }
                    None => self.stage = Stage::Footer,
                },
                Stage::Footer => {
                    self.writer.zip()?.write_all(FOOTER.as_bytes())?;
                    self.stage = Stage::Done;
                }
                Stage::Done => {
                    let rest = self.writer.sink.drain();
                    return Ok((!rest.is_empty()).then_some(rest));
                }
            }
            let chunk = self.writer.sink.drain();
            if !chunk.is_empty() {
                return Ok(Some(chunk));
            }
        }
    }
}

impl<I> Iterator for WriteIter<'_, I>
where
    I: Iterator<Item = TranslationUnit>,
{
    type Item = TmResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(chunk) => chunk.map(Ok),
            Err(e) => {
                self.stage = Stage::Done;
                Some(Err(e))
            }
        }
    }
}

fn prop(out: &mut String, indent: &str, key: &str, value: &str) {
    let _ = writeln!(
        out,
        "{indent}<prop type=\"{}\">{}</prop>",
        escape(key),
        escape(value)
    );
}

/// Pretty-printed `<tu>` element for one unit.
fn unit_xml(unit: &TranslationUnit) -> String {
    let mut out = String::with_capacity(256 + unit.source_text.len() + unit.target_text.len());
    out.push_str("    <tu");
    if let Some(tuid) = &unit.tuid {
        let _ = write!(out, " tuid=\"{}\"", escape(tuid.as_str()));
    }
    if let Some(date) = &unit.tm_creation_date {
        let _ = write!(out, " creationdate=\"{}\"", escape(date.as_str()));
    }
    if let Some(date) = &unit.tm_change_date {
        let _ = write!(out, " changedate=\"{}\"", escape(date.as_str()));
    }
    out.push_str(">\n");

    const TU: &str = "      ";
    if let Some(name) = &unit.file_name {
        prop(&mut out, TU, PROP_FILE_NAME, name);
    }
    for (key, value) in [
        (PROP_INDUSTRY, &unit.industry),
        (PROP_TYPE, &unit.unit_type),
        (PROP_ORGANIZATION, &unit.organization),
    ] {
        if let Some(value) = value {
            prop(&mut out, TU, key, value);
        }
    }
    for (key, value) in &unit.metadata {
        if key != PROP_FILE_NAME && !CLASSIFICATION_PROPS.contains(&key.as_str()) {
            prop(&mut out, TU, key, value);
        }
    }

    for (lang, props, text) in [
        (&unit.source_language, &unit.source_metadata, &unit.source_text),
        (&unit.target_language, &unit.target_metadata, &unit.target_text),
    ] {
        let _ = writeln!(out, "{TU}<tuv xml:lang=\"{}\">", escape(lang.as_str()));
        for (key, value) in props {
            prop(&mut out, "        ", key, value);
        }
        let _ = writeln!(out, "        <seg>{}</seg>", escape_segment(text));
        let _ = writeln!(out, "{TU}</tuv>");
    }
    out.push_str("    </tu>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LangPair;
    use crate::tmx::TmxReader;
    use chrono::TimeZone;
    use std::io::Read;

    fn fixed_options() -> WriterOptions {
        WriterOptions::new("en")
            .with_creation_date(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
    }

    fn unit(src: &str, tgt: &str) -> TranslationUnit {
        let mut u = TranslationUnit::new(src, tgt, &LangPair::new("en", "es"));
        u.file_name = Some("doc.txt".into());
        u
    }

    fn collect(chunks: impl Iterator<Item = TmResult<Vec<u8>>>, out: &mut Vec<u8>) {
        for chunk in chunks {
            out.extend(chunk.unwrap());
        }
    }

    fn archive_bytes(members: &[(&str, Vec<TranslationUnit>)]) -> Vec<u8> {
        let mut writer = TmxWriter::new(fixed_options());
        let mut bytes = Vec::new();
        for (name, units) in members {
            collect(writer.write_iter(units.clone(), Some(name)), &mut bytes);
        }
        collect(writer.write_close(), &mut bytes);
        bytes
    }

    fn member_text(bytes: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        let mut text = String::new();
        archive
            .by_name(name)
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        text
    }

    #[test]
    fn test_default_member_and_structure() {
        let mut writer = TmxWriter::new(fixed_options());
        let mut bytes = Vec::new();
        collect(writer.write_iter(vec![unit("Hello", "Hola")], None), &mut bytes);
        collect(writer.write_close(), &mut bytes);

        let text = member_text(&bytes, "pangeatm.tmx");
        let header = text.find("<header").unwrap();
        let body = text.find("<body>").unwrap();
        let tu = text.find("<tu>").unwrap();
        let end = text.find("</body>").unwrap();
        assert!(text.starts_with("<?xml"));
        assert!(header < body && body < tu && tu < end);
        assert!(text.trim_end().ends_with("</tmx>"));
        assert!(text.contains("srclang=\"en\""));
        assert!(text.contains("creationdate=\"20240102T030405Z\""));
        assert!(text.contains(&format!("creationtool=\"{}\"", env!("CARGO_PKG_NAME"))));
        assert!(text.contains('\n'));
    }

    #[test]
    fn test_multiple_members() {
        let bytes = archive_bytes(&[
            ("one.tmx", vec![unit("One", "Uno")]),
            ("two.tmx", vec![unit("Two", "Dos"), unit("Three", "Tres")]),
        ]);
        let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.as_slice())).unwrap();
        let names: Vec<_> = archive.file_names().collect();
        assert_eq!(names.len(), 2);
        assert!(member_text(&bytes, "two.tmx").contains("<seg>Tres</seg>"));
        assert!(!member_text(&bytes, "one.tmx").contains("Tres"));
    }

    #[test]
    fn test_reproducible_output() {
        let members = [("a.tmx", vec![unit("Hello", "Hola")])];
        assert_eq!(archive_bytes(&members), archive_bytes(&members));
    }

    #[test]
    fn test_props_and_escaping() {
        let mut u = unit("Tom & <T1>Jerry</T1>", "Tom y Jerry");
        u.tuid = Some("7".into());
        u.tm_creation_date = Some("20230101T000000Z".into());
        u.industry = Some("Legal".into());
        u.metadata.insert("tda-industry".into(), "Legal".into());
        u.metadata.insert("client".into(), "A&B".into());
        u.source_metadata.insert("reviewed".into(), "yes".into());

        let bytes = archive_bytes(&[("p.tmx", vec![u])]);
        let text = member_text(&bytes, "p.tmx");
        assert!(text.contains("<tu tuid=\"7\" creationdate=\"20230101T000000Z\">"));
        assert!(text.contains("<prop type=\"file_name\">doc.txt</prop>"));
        assert_eq!(text.matches("tda-industry").count(), 1);
        assert!(text.contains("<prop type=\"client\">A&amp;B</prop>"));
        assert!(text.contains("<prop type=\"reviewed\">yes</prop>"));
        assert!(text.contains("<seg>Tom &amp; <T1>Jerry</T1></seg>"));
    }

    #[test]
    fn test_round_trip_through_reader() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut original = unit("Fish & chips", "Pescado con patatas");
        original.metadata.insert("client".into(), "ACME".into());
        original.target_metadata.insert("translator".into(), "ana".into());
        let bytes = archive_bytes(&[("rt.tmx", vec![original.clone(), unit("Yes", "Sí")])]);
        let path = dir.path().join("rt.zip");
        std::fs::write(&path, bytes).unwrap();

        let units: Vec<_> = TmxReader::new(&path).parse().unwrap().collect();
        assert_eq!(units.len(), 2);
        let back = &units[0];
        assert_eq!(back.source_text, original.source_text);
        assert_eq!(back.target_text, original.target_text);
        assert_eq!(back.lang_pair(), original.lang_pair());
        assert_eq!(back.file_name, original.file_name);
        assert_eq!(back.metadata, original.metadata);
        assert_eq!(back.target_metadata, original.target_metadata);
        assert_eq!(units[1].target_text, "Sí");
    }

    #[test]
    fn test_round_trip_keeps_escaped_markup() {
        let dir = tempfile::TempDir::new().unwrap();
        let fixture = r#"<?xml version="1.0" encoding="UTF-8"?>
<tmx version="1.4">
  <header srclang="en" creationtool="test" datatype="PlainText" segtype="sentence"/>
  <body>
    <tu>
      <tuv xml:lang="en"><seg>Tom &amp; <bpt i="1">&lt;b&gt;</bpt>Jerry</seg></tuv>
      <tuv xml:lang="es"><seg>Tom <b>y</b> Jerry</seg></tuv>
    </tu>
    <tu>
      <tuv xml:lang="en"><seg>if a &lt; b and c &gt; d</seg></tuv>
      <tuv xml:lang="es"><seg>si a &lt; b y c &gt; d</seg></tuv>
    </tu>
  </body>
</tmx>
"#;
        let input = dir.path().join("in.tmx");
        std::fs::write(&input, fixture).unwrap();
        let first: Vec<_> = TmxReader::new(&input).parse().unwrap().collect();
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].source_text, "if a < b and c > d");

        let bytes = archive_bytes(&[("esc.tmx", first.clone())]);
        let text = member_text(&bytes, "esc.tmx");
        assert!(text.contains("<seg>if a &lt; b and c &gt; d</seg>"));
        assert!(text.contains("<seg>Tom <T1>y</T1> Jerry</seg>"));

        let output = dir.path().join("out.zip");
        std::fs::write(&output, bytes).unwrap();
        let mut units = TmxReader::new(&output).parse().unwrap();
        let second: Vec<_> = units.by_ref().collect();
        assert!(units.report().is_clean());
        assert_eq!(second.len(), first.len());
        for (back, orig) in second.iter().zip(&first) {
            assert_eq!(back.source_text, orig.source_text);
            assert_eq!(back.target_text, orig.target_text);
        }
    }

    #[test]
    fn test_write_after_close_errors() {
        let mut writer = TmxWriter::new(fixed_options());
        let _ = writer.write_close().count();
        let mut chunks = writer.write_iter(vec![unit("a", "b")], None);
        assert!(matches!(chunks.next(), Some(Err(_))));
        assert!(chunks.next().is_none());
        assert_eq!(writer.write_close().count(), 0);
    }
}
