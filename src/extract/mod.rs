//! Text extraction from source files
//!
//! Each supported format has a [`FileProcessor`]; the [`ProcessorRegistry`]
//! walks them in registration order and the first one that claims a path
//! extracts it. Plain text is registered last as the catch-all.

use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Bytes sampled from the head of a file when sniffing for text
const TEXT_SNIFF_BYTES: usize = 8 * 1024;

/// Share of control characters above which a file is treated as binary
const MAX_CONTROL_RATIO: f64 = 0.30;

/// Maximum sheets read from a workbook
const XLSX_MAX_SHEETS: usize = 100;

/// Maximum cells read per sheet
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;

/// Maximum decompressed bytes read from a single archive member
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extraction failures. Always per-file: the caller skips the file and
/// leaves its manifest row untouched.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("No processor can handle {0}")]
    Unsupported(String),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("{0} does not look like a text file")]
    Binary(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
}

/// One text-extraction capability
pub trait FileProcessor: Send + Sync {
    /// Short name used in logs and as the chunk's `file_type`
    fn name(&self) -> &'static str;

    fn can_handle(&self, path: &Path) -> bool;

    fn extract_text(&self, path: &Path) -> Result<String, ExtractError>;
}

/// Ordered set of processors; first match wins
pub struct ProcessorRegistry {
    processors: Vec<Box<dyn FileProcessor>>,
}

impl ProcessorRegistry {
    pub fn empty() -> Self {
        Self {
            processors: Vec::new(),
        }
    }

    /// Register a processor after the existing ones
    pub fn register(&mut self, processor: Box<dyn FileProcessor>) {
        self.processors.push(processor);
    }

    /// First processor that claims `path`
    pub fn processor_for(&self, path: &Path) -> Option<&dyn FileProcessor> {
        self.processors
            .iter()
            .find(|p| p.can_handle(path))
            .map(|p| p.as_ref())
    }

    /// Extract text with the first matching processor, returning the
    /// processor name alongside the text
    pub fn extract(&self, path: &Path) -> Result<(&'static str, String), ExtractError> {
        let processor = self
            .processor_for(path)
            .ok_or_else(|| ExtractError::Unsupported(path.display().to_string()))?;
        let text = processor.extract_text(path)?;
        Ok((processor.name(), text))
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(PdfProcessor));
        registry.register(Box::new(DocxProcessor));
        registry.register(Box::new(PptxProcessor));
        registry.register(Box::new(XlsxProcessor));
        registry.register(Box::new(TextProcessor));
        registry
    }
}

fn has_extension(path: &Path, wanted: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(wanted))
        .unwrap_or(false)
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, ExtractError> {
    std::fs::read(path).map_err(|source| ExtractError::Read {
        path: path.display().to_string(),
        source,
    })
}

/// Plain text of any extension, sniffed by content
pub struct TextProcessor;

impl TextProcessor {
    /// Heuristic binary check over the head of the buffer
    pub fn looks_like_text(bytes: &[u8]) -> bool {
        let sample = &bytes[..bytes.len().min(TEXT_SNIFF_BYTES)];
        if sample.is_empty() {
            return true;
        }
        if sample.contains(&0) {
            return false;
        }

        let control = sample
            .iter()
            .filter(|&&b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r'))
            .count();
        (control as f64 / sample.len() as f64) <= MAX_CONTROL_RATIO
    }

    /// Decode as UTF-8 (lossy on invalid sequences) and normalise line endings
    pub fn decode(bytes: &[u8]) -> String {
        let text = match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => String::from_utf8_lossy(bytes).into_owned(),
        };
        let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
        text.replace("\r\n", "\n")
    }
}

impl FileProcessor for TextProcessor {
    fn name(&self) -> &'static str {
        "text"
    }

    fn can_handle(&self, path: &Path) -> bool {
        let Ok(mut file) = std::fs::File::open(path) else {
            return false;
        };
        let mut head = vec![0u8; TEXT_SNIFF_BYTES];
        let mut filled = 0;
        while filled < head.len() {
            match file.read(&mut head[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(_) => return false,
            }
        }
        Self::looks_like_text(&head[..filled])
    }

    fn extract_text(&self, path: &Path) -> Result<String, ExtractError> {
        let bytes = read_bytes(path)?;
        if !Self::looks_like_text(&bytes) {
            return Err(ExtractError::Binary(path.display().to_string()));
        }
        Ok(Self::decode(&bytes))
    }
}

pub struct PdfProcessor;

impl FileProcessor for PdfProcessor {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn can_handle(&self, path: &Path) -> bool {
        has_extension(path, "pdf")
    }

    fn extract_text(&self, path: &Path) -> Result<String, ExtractError> {
        let bytes = read_bytes(path)?;
        pdf_extract::extract_text_from_mem(&bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
    }
}

pub struct DocxProcessor;

impl FileProcessor for DocxProcessor {
    fn name(&self) -> &'static str {
        "docx"
    }

    fn can_handle(&self, path: &Path) -> bool {
        has_extension(path, "docx")
    }

    fn extract_text(&self, path: &Path) -> Result<String, ExtractError> {
        extract_docx(&read_bytes(path)?)
    }
}

pub struct PptxProcessor;

impl FileProcessor for PptxProcessor {
    fn name(&self) -> &'static str {
        "pptx"
    }

    fn can_handle(&self, path: &Path) -> bool {
        has_extension(path, "pptx")
    }

    fn extract_text(&self, path: &Path) -> Result<String, ExtractError> {
        extract_pptx(&read_bytes(path)?)
    }
}

pub struct XlsxProcessor;

impl FileProcessor for XlsxProcessor {
    fn name(&self) -> &'static str {
        "xlsx"
    }

    fn can_handle(&self, path: &Path) -> bool {
        has_extension(path, "xlsx")
    }

    fn extract_text(&self, path: &Path) -> Result<String, ExtractError> {
        extract_xlsx(&read_bytes(path)?)
    }
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_member(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "{} exceeds the {} byte limit",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Archive members matching `<prefix>N.xml`, ordered by N
fn numbered_members(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Concatenate the text of every `<*:t>` element. Paragraph ends (`</w:p>`,
/// `</a:p>`) become newlines so sentence splitting sees the breaks.
fn collect_text_runs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" if !out.ends_with('\n') && !out.is_empty() => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_member(&mut archive, "word/document.xml")?;
    collect_text_runs(&xml)
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let mut slides = Vec::new();
    for name in numbered_members(&archive, "ppt/slides/slide") {
        let xml = read_member(&mut archive, &name)?;
        let text = collect_text_runs(&xml)?;
        if !text.is_empty() {
            slides.push(text);
        }
    }
    Ok(slides.join("\n\n"))
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    // Workbooks with only numeric cells carry no shared string table
    let shared = if archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        shared_strings(&read_member(&mut archive, "xl/sharedStrings.xml")?)?
    } else {
        Vec::new()
    };

    let mut sheets = Vec::new();
    for name in numbered_members(&archive, "xl/worksheets/sheet")
        .into_iter()
        .take(XLSX_MAX_SHEETS)
    {
        let xml = read_member(&mut archive, &name)?;
        let cells = sheet_cells(&xml, &shared)?;
        if !cells.is_empty() {
            sheets.push(cells);
        }
    }
    Ok(sheets.join("\n"))
}

fn shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => strings.extend(current.take()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Cell values of one sheet, one line per row
fn sheet_cells(xml: &[u8], shared: &[String]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut rows: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_value = false;
    let mut shared_cell = false;
    let mut cell_count = 0usize;

    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared_cell = e.attributes().flatten().any(|a| {
                        a.key.as_ref() == b"t" && a.value.as_ref() == b"s"
                    });
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let raw = te.unescape().unwrap_or_default();
                let value = raw.trim();
                if !value.is_empty() {
                    let resolved = if shared_cell {
                        value
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared.get(i).cloned())
                    } else {
                        Some(value.to_string())
                    };
                    if let Some(v) = resolved {
                        row.push(v);
                        cell_count += 1;
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => shared_cell = false,
                b"row" if !row.is_empty() => rows.push(std::mem::take(&mut row).join(" ")),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !row.is_empty() {
        rows.push(row.join(" "));
    }
    Ok(rows.join("\n"))
}
