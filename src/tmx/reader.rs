//! Streaming TMX reader.
//!
//! A document is read event by event with `quick-xml`; a unit record is
//! materialized when its `</tu>` (or whatever implicitly closes it) is seen
//! and is turned into zero or more [`TranslationUnit`]s, one per language
//! pair. Zip archives are read member by member straight from the archive
//! file, so nothing is ever fully buffered.
//!
//! # Recovery
//!
//! Closing tags are not checked against opening tags. A `<tu>` left open is
//! closed by the next `<tu>`, by `</body>`/`</tmx>`, or by end of input. A
//! record that yields no usable pair is skipped. A document producing too
//! many consecutive XML errors is abandoned and listed in the
//! [`ParseReport`].

use std::borrow::Cow;
use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::DeflateDecoder;
use quick_xml::errors::IllFormedError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use zip::{CompressionMethod, ZipArchive};

use super::{PROP_FILE_NAME, PROP_INDUSTRY, PROP_ORGANIZATION, PROP_TYPE};
use crate::error::{TmError, TmResult};
use crate::markup::{normalize_markup, TAG_RE};
use crate::models::{normalize_lang, LangPair, TranslationUnit};

const MAX_CONSECUTIVE_ERRORS: usize = 16;
const LOCAL_HEADER_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];
const LOCAL_HEADER_LEN: usize = 30;

/// Caller-supplied attributes and filters applied while parsing.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Stored as the unit's single domain tag.
    pub domain: Option<String>,
    /// When non-empty, only these (source, target) pairs are yielded.
    pub lang_pairs: Vec<LangPair>,
    pub username: Option<String>,
}

impl ParseOptions {
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_lang_pairs(mut self, lang_pairs: Vec<LangPair>) -> Self {
        self.lang_pairs = lang_pairs;
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

/// What happened while a [`TmxUnits`] stream was consumed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseReport {
    pub documents: usize,
    pub units: usize,
    /// Unit records that produced no usable pair.
    pub skipped_records: usize,
    /// XML errors and implicitly closed records the parser worked around.
    pub recovered_errors: usize,
    /// Documents that could not be opened, were not TMX, or were abandoned.
    pub failed_documents: Vec<String>,
}

impl ParseReport {
    pub fn is_clean(&self) -> bool {
        self.failed_documents.is_empty()
    }
}

/// Reader for a plain TMX file or a zip archive of TMX files.
#[derive(Debug, Clone)]
pub struct TmxReader {
    path: PathBuf,
    options: ParseOptions,
}

impl TmxReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            options: ParseOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ParseOptions) -> Self {
        self.options = options;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lazily parse every document in the input.
    ///
    /// Fails up front when the input cannot be opened, is a corrupt archive,
    /// or contains a member with an unsupported compression method.
    pub fn parse(&self) -> TmResult<TmxUnits> {
        let sources = discover(&self.path)?;
        tracing::debug!(
            path = %self.path.display(),
            documents = sources.len(),
            "opened TMX input"
        );
        Ok(TmxUnits {
            sources: sources.into(),
            current: None,
            options: Arc::new(self.options.clone()),
            report: ParseReport::default(),
        })
    }

    /// Distinct (source, target) pairs present, in first-seen order.
    pub fn language_pairs(&self) -> TmResult<Vec<LangPair>> {
        let unfiltered = TmxReader {
            path: self.path.clone(),
            options: ParseOptions {
                lang_pairs: Vec::new(),
                ..self.options.clone()
            },
        };
        let mut pairs: Vec<LangPair> = Vec::new();
        for unit in unfiltered.parse()? {
            let pair = unit.lang_pair();
            if !pairs.contains(&pair) {
                pairs.push(pair);
            }
        }
        Ok(pairs)
    }
}

/// Lazy sequence of units over every document of one input.
pub struct TmxUnits {
    sources: VecDeque<DocumentSource>,
    current: Option<Document>,
    options: Arc<ParseOptions>,
    report: ParseReport,
}

impl TmxUnits {
    /// Counters so far; complete once the iterator is exhausted.
    pub fn report(&self) -> &ParseReport {
        &self.report
    }
}

impl Iterator for TmxUnits {
    type Item = TranslationUnit;

    fn next(&mut self) -> Option<TranslationUnit> {
        loop {
            if let Some(doc) = &mut self.current {
                if let Some(unit) = doc.next() {
                    self.report.units += 1;
                    return Some(unit);
                }
                if let Some(done) = self.current.take() {
                    let state = done.state;
                    self.report.skipped_records += state.skipped;
                    self.report.recovered_errors += state.recovered;
                    if state.failed {
                        self.report.failed_documents.push(state.file_name);
                    }
                }
            }

            let source = self.sources.pop_front()?;
            self.report.documents += 1;
            match source.open() {
                Ok(input) => {
                    self.current = Some(Document::new(
                        input,
                        source.file_name(),
                        Arc::clone(&self.options),
                    ))
                }
                Err(e) => {
                    tracing::warn!(document = %source.display_name(), error = %e, "cannot open TMX document");
                    self.report.failed_documents.push(source.display_name());
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

enum DocumentSource {
    Plain(PathBuf),
    Member {
        archive: PathBuf,
        name: String,
        header_start: u64,
        compressed_size: u64,
        method: CompressionMethod,
    },
}

impl DocumentSource {
    /// Base name recorded as the unit's provenance.
    fn file_name(&self) -> String {
        match self {
            DocumentSource::Plain(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            DocumentSource::Member { name, .. } => {
                name.rsplit('/').next().unwrap_or(name).to_string()
            }
        }
    }

    fn display_name(&self) -> String {
        match self {
            DocumentSource::Plain(path) => path.display().to_string(),
            DocumentSource::Member { archive, name, .. } => {
                format!("{}!{}", archive.display(), name)
            }
        }
    }

    fn open(&self) -> TmResult<Box<dyn BufRead + Send>> {
        match self {
            DocumentSource::Plain(path) => Ok(Box::new(BufReader::new(File::open(path)?))),
            DocumentSource::Member {
                archive,
                name,
                header_start,
                compressed_size,
                method,
            } => {
                // `ZipFile` borrows its archive (`by_index`) or stream
                // (`read_zipfile_from_stream`), so it cannot be boxed as an owned
                // reader; the member is read from its local header instead.
                let mut file = File::open(archive)?;
                file.seek(SeekFrom::Start(*header_start))?;
                let mut header = [0u8; LOCAL_HEADER_LEN];
                file.read_exact(&mut header)?;
                if header[..4] != LOCAL_HEADER_SIGNATURE {
                    return Err(TmError::archive(
                        archive.display().to_string(),
                        format!("member {name} has no local file header"),
                    ));
                }
                let name_len = u16::from_le_bytes([header[26], header[27]]) as i64;
                let extra_len = u16::from_le_bytes([header[28], header[29]]) as i64;
                file.seek(SeekFrom::Current(name_len + extra_len))?;
                let data = file.take(*compressed_size);
                Ok(match method {
                    CompressionMethod::Deflated => {
                        Box::new(BufReader::new(DeflateDecoder::new(data)))
                    }
                    _ => Box::new(BufReader::new(data)),
                })
            }
        }
    }
}

fn is_zip(path: &Path) -> TmResult<bool> {
    let mut magic = Vec::with_capacity(4);
    File::open(path)?.take(4).read_to_end(&mut magic)?;
    Ok(magic == LOCAL_HEADER_SIGNATURE || magic == [0x50, 0x4b, 0x05, 0x06])
}

fn discover(path: &Path) -> TmResult<Vec<DocumentSource>> {
    if !is_zip(path)? {
        return Ok(vec![DocumentSource::Plain(path.to_path_buf())]);
    }

    let display = path.display().to_string();
    let mut archive =
        ZipArchive::new(File::open(path)?).map_err(|e| TmError::archive(display.clone(), e))?;
    let mut members = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive
            .by_index_raw(i)
            .map_err(|e| TmError::archive(display.clone(), e))?;
        if entry.is_dir() {
            continue;
        }
        if entry.encrypted() {
            return Err(TmError::archive(
                display,
                format!("member {} is encrypted", entry.name()),
            ));
        }
        let method = entry.compression();
        if !matches!(
            method,
            CompressionMethod::Stored | CompressionMethod::Deflated
        ) {
            return Err(TmError::archive(
                display,
                format!(
                    "member {} uses unsupported compression {:?}",
                    entry.name(),
                    method
                ),
            ));
        }
        members.push(DocumentSource::Member {
            archive: path.to_path_buf(),
            name: entry.name().to_string(),
            header_start: entry.header_start(),
            compressed_size: entry.compressed_size(),
            method,
        });
    }
    Ok(members)
}

// ---------------------------------------------------------------------------
// One document
// ---------------------------------------------------------------------------

struct Document {
    reader: Reader<Box<dyn BufRead + Send>>,
    buf: Vec<u8>,
    state: DocState,
    pending: VecDeque<TranslationUnit>,
    consecutive_errors: usize,
    finished: bool,
}

impl Document {
    fn new(input: Box<dyn BufRead + Send>, file_name: String, options: Arc<ParseOptions>) -> Self {
        let mut reader = Reader::from_reader(input);
        let config = reader.config_mut();
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
        config.trim_text(false);
        Self {
            reader,
            buf: Vec::new(),
            state: DocState::new(file_name, options),
            pending: VecDeque::new(),
            consecutive_errors: 0,
            finished: false,
        }
    }
}

impl Iterator for Document {
    type Item = TranslationUnit;

    fn next(&mut self) -> Option<TranslationUnit> {
        loop {
            if let Some(unit) = self.pending.pop_front() {
                return Some(unit);
            }
            if self.finished {
                return None;
            }
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf) {
                Ok(Event::Eof)
                | Err(quick_xml::Error::IllFormed(IllFormedError::MissingEndTag(_))) => {
                    self.state.finish(&mut self.pending);
                    self.finished = true;
                }
                Ok(event) => {
                    self.consecutive_errors = 0;
                    self.state.on_event(event, &mut self.pending);
                }
                Err(e) => {
                    self.consecutive_errors += 1;
                    self.state.recovered += 1;
                    tracing::warn!(
                        document = %self.state.file_name,
                        position = self.reader.buffer_position(),
                        error = %e,
                        "XML error in TMX document"
                    );
                    if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        tracing::warn!(document = %self.state.file_name, "giving up on TMX document");
                        self.state.failed = true;
                        self.finished = true;
                    }
                }
            }
        }
    }
}

#[derive(Default)]
struct TuRecord {
    tuid: Option<String>,
    creation_date: Option<String>,
    change_date: Option<String>,
    props: Vec<(String, String)>,
    variants: Vec<Variant>,
}

#[derive(Default)]
struct Variant {
    lang: String,
    props: BTreeMap<String, String>,
    seg: Option<String>,
}

struct Prop {
    key: String,
    value: String,
}

/// Raw inner markup of a `<seg>` being read.
#[derive(Default)]
struct SegBuf {
    raw: String,
    depth: usize,
}

struct DocState {
    file_name: String,
    options: Arc<ParseOptions>,
    srclang: Option<String>,
    saw_root: bool,
    tu: Option<TuRecord>,
    tuv: Option<Variant>,
    prop: Option<Prop>,
    seg: Option<SegBuf>,
    skipped: usize,
    recovered: usize,
    failed: bool,
}

impl DocState {
    fn new(file_name: String, options: Arc<ParseOptions>) -> Self {
        Self {
            file_name,
            options,
            srclang: None,
            saw_root: false,
            tu: None,
            tuv: None,
            prop: None,
            seg: None,
            skipped: 0,
            recovered: 0,
            failed: false,
        }
    }

    fn on_event(&mut self, event: Event<'_>, out: &mut VecDeque<TranslationUnit>) {
        match event {
            Event::Start(e) => self.on_start(&e, false, out),
            Event::Empty(e) => self.on_start(&e, true, out),
            Event::End(e) => self.on_end(e.name().as_ref(), out),
            Event::Text(t) => {
                if let Some(seg) = &mut self.seg {
                    seg.raw.push_str(&String::from_utf8_lossy(&t));
                } else if let Some(prop) = &mut self.prop {
                    match t.unescape() {
                        Ok(text) => prop.value.push_str(&text),
                        Err(_) => prop.value.push_str(&String::from_utf8_lossy(&t)),
                    }
                }
            }
            Event::CData(c) => {
                let text = String::from_utf8_lossy(&c).into_owned();
                if let Some(seg) = &mut self.seg {
                    seg.raw.push_str(&quick_xml::escape::escape(text.as_str()));
                } else if let Some(prop) = &mut self.prop {
                    prop.value.push_str(&text);
                }
            }
            _ => {}
        }
    }

    fn on_start(&mut self, e: &BytesStart<'_>, empty: bool, out: &mut VecDeque<TranslationUnit>) {
        if let Some(seg) = &mut self.seg {
            seg.raw.push('<');
            seg.raw.push_str(&String::from_utf8_lossy(e));
            if empty {
                seg.raw.push_str("/>");
            } else {
                seg.raw.push('>');
                seg.depth += 1;
            }
            return;
        }

        match e.name().as_ref() {
            b"tmx" => self.saw_root = true,
            b"header" => {
                self.srclang = attr(e, &[b"srclang"])
                    .map(|l| normalize_lang(&l))
                    .filter(|l| !l.is_empty() && l != "*all*");
            }
            b"tu" => {
                if self.tu.is_some() {
                    self.recovered += 1;
                    tracing::warn!(document = %self.file_name, "unit record not closed before the next one");
                    self.close_tu(out);
                }
                self.tu = Some(TuRecord {
                    tuid: attr(e, &[b"tuid"]),
                    creation_date: attr(e, &[b"creationdate"]),
                    change_date: attr(e, &[b"changedate"]),
                    ..Default::default()
                });
                if empty {
                    self.close_tu(out);
                }
            }
            b"tuv" => {
                let Some(tu) = &mut self.tu else { return };
                if let Some(open) = self.tuv.take() {
                    tu.variants.push(open);
                }
                let variant = Variant {
                    lang: attr(e, &[b"xml:lang", b"lang"])
                        .map(|l| normalize_lang(&l))
                        .unwrap_or_default(),
                    ..Default::default()
                };
                if empty {
                    tu.variants.push(variant);
                } else {
                    self.tuv = Some(variant);
                }
            }
            b"prop" if !empty => {
                self.prop = Some(Prop {
                    key: attr(e, &[b"type"]).unwrap_or_default(),
                    value: String::new(),
                });
            }
            b"seg" => {
                if let Some(tuv) = &mut self.tuv {
                    if empty {
                        tuv.seg = Some(String::new());
                    } else {
                        self.seg = Some(SegBuf::default());
                    }
                }
            }
            _ => {}
        }
    }

    fn on_end(&mut self, name: &[u8], out: &mut VecDeque<TranslationUnit>) {
        if let Some(seg) = &mut self.seg {
            if seg.depth > 0 {
                seg.depth -= 1;
                seg.raw.push_str("</");
                seg.raw.push_str(&String::from_utf8_lossy(name));
                seg.raw.push('>');
                return;
            }
            if !matches!(name, b"seg" | b"tuv" | b"tu" | b"body" | b"tmx") {
                // Stray close inside the segment.
                seg.raw.push_str("</");
                seg.raw.push_str(&String::from_utf8_lossy(name));
                seg.raw.push('>');
                return;
            }
            let seg = std::mem::take(seg);
            self.seg = None;
            if let Some(tuv) = &mut self.tuv {
                tuv.seg = Some(seg.raw);
            }
            if name == b"seg" {
                return;
            }
            self.recovered += 1;
        }

        match name {
            b"prop" => {
                let Some(prop) = self.prop.take() else { return };
                if let Some(tuv) = &mut self.tuv {
                    tuv.props.insert(prop.key, prop.value);
                } else if let Some(tu) = &mut self.tu {
                    tu.props.push((prop.key, prop.value));
                }
            }
            b"tuv" => {
                if let (Some(tuv), Some(tu)) = (self.tuv.take(), &mut self.tu) {
                    tu.variants.push(tuv);
                }
            }
            b"tu" => self.close_tu(out),
            b"body" | b"tmx" => {
                if self.tu.is_some() {
                    self.recovered += 1;
                    tracing::warn!(document = %self.file_name, "unit record not closed before end of body");
                    self.close_tu(out);
                }
            }
            _ => {}
        }
    }

    fn finish(&mut self, out: &mut VecDeque<TranslationUnit>) {
        if self.tu.is_some() {
            self.recovered += 1;
            tracing::warn!(document = %self.file_name, "unit record not closed before end of input");
            self.close_tu(out);
        }
        if !self.saw_root {
            tracing::warn!(document = %self.file_name, "no <tmx> root element");
            self.failed = true;
        }
    }

    fn close_tu(&mut self, out: &mut VecDeque<TranslationUnit>) {
        let Some(mut tu) = self.tu.take() else { return };
        if let Some(open) = self.tuv.take() {
            tu.variants.push(open);
        }
        self.seg = None;
        self.prop = None;

        let tuid = tu.tuid.clone();
        let units = self.build_units(tu);
        if units.is_empty() {
            self.skipped += 1;
            tracing::debug!(document = %self.file_name, tuid = ?tuid, "skipping unit record without a usable pair");
        }
        out.extend(units);
    }

    fn build_units(&self, tu: TuRecord) -> Vec<TranslationUnit> {
        let variants: Vec<Variant> = tu
            .variants
            .into_iter()
            .filter_map(|v| {
                let text = clean_segment(v.seg.as_deref()?);
                if text.is_empty() || v.lang.is_empty() {
                    return None;
                }
                Some(Variant {
                    seg: Some(text),
                    ..v
                })
            })
            .collect();

        let pairs = self.select_pairs(&variants);
        if pairs.is_empty() {
            return Vec::new();
        }

        let mut file_name = self.file_name.clone();
        let mut metadata = BTreeMap::new();
        for (key, value) in tu.props {
            if key == PROP_FILE_NAME {
                if !value.trim().is_empty() {
                    file_name = value.trim().to_string();
                }
            } else {
                metadata.insert(key, value);
            }
        }

        let template = TranslationUnit {
            domain: self.options.domain.iter().cloned().collect(),
            file_name: Some(file_name),
            tuid: tu.tuid,
            tm_creation_date: tu.creation_date,
            tm_change_date: tu.change_date,
            industry: metadata.get(PROP_INDUSTRY).cloned(),
            unit_type: metadata.get(PROP_TYPE).cloned(),
            organization: metadata.get(PROP_ORGANIZATION).cloned(),
            metadata,
            username: self.options.username.clone(),
            ..Default::default()
        };

        pairs
            .into_iter()
            .map(|(s, t)| {
                let (src, tgt) = (&variants[s], &variants[t]);
                TranslationUnit {
                    source_text: src.seg.clone().unwrap_or_default(),
                    target_text: tgt.seg.clone().unwrap_or_default(),
                    source_language: src.lang.clone(),
                    target_language: tgt.lang.clone(),
                    source_metadata: src.props.clone(),
                    target_metadata: tgt.props.clone(),
                    ..template.clone()
                }
            })
            .collect()
    }

    /// Indices of (source, target) variants to emit.
    fn select_pairs(&self, variants: &[Variant]) -> Vec<(usize, usize)> {
        let position = |lang: &str| variants.iter().position(|v| v.lang == lang);

        if !self.options.lang_pairs.is_empty() {
            return self
                .options
                .lang_pairs
                .iter()
                .filter_map(|p| Some((position(&p.source)?, position(&p.target)?)))
                .collect();
        }

        match &self.srclang {
            Some(src) => match position(src) {
                Some(s) => (0..variants.len())
                    .filter(|&t| variants[t].lang != variants[s].lang)
                    .map(|t| (s, t))
                    .collect(),
                None => Vec::new(),
            },
            None => {
                let mut pairs = Vec::new();
                for i in 0..variants.len() {
                    for j in i + 1..variants.len() {
                        if variants[i].lang != variants[j].lang {
                            pairs.push((i, j));
                        }
                    }
                }
                pairs
            }
        }
    }
}

/// First attribute among `keys` present on the element, trimmed.
fn attr(e: &BytesStart<'_>, keys: &[&[u8]]) -> Option<String> {
    keys.iter().find_map(|key| {
        e.attributes()
            .flatten()
            .find(|a| a.key.as_ref() == *key)
            .and_then(|a| a.unescape_value().ok().map(|v| v.trim().to_string()))
    })
}

/// Raw segment markup to stored text: tags normalized, text unescaped.
fn clean_segment(raw: &str) -> String {
    let normalized = normalize_markup(raw.trim());
    let mut out = String::with_capacity(normalized.len());
    let mut last = 0usize;
    for m in TAG_RE.find_iter(&normalized) {
        out.push_str(&unescape_lossy(&normalized[last..m.start()]));
        out.push_str(m.as_str());
        last = m.end();
    }
    out.push_str(&unescape_lossy(&normalized[last..]));
    out.trim().to_string()
}

fn unescape_lossy(text: &str) -> Cow<'_, str> {
    quick_xml::escape::unescape(text).unwrap_or(Cow::Borrowed(text))
}
