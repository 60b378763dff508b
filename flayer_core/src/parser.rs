//! Streaming parser for the tool's XML error output.
//!
//! The tool writes its XML log while the target runs, so the log is often
//! cut short or followed by junk when the target dies. The parser keeps an
//! explicit stack of [`Tag`]s (one entry per open element, whatever its kind)
//! and routes text to the innermost open record from that stack alone.
//! A syntax error or a premature end of input stops parsing without losing
//! the records completed so far; only I/O failures are fatal.

use crate::record::{CountPair, ErrorEvent, Frame};
use quick_xml::Reader;
use quick_xml::events::Event as XmlEvent;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Failures that abort parsing without any partial result.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to open error log {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error while reading error log: {0}")]
    Io(#[source] Arc<std::io::Error>),
}

/// A recoverable problem in the input. Everything completed before it is kept.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseWarning {
    #[error("malformed error log near byte {position}: {message}; some errors may be missing")]
    Malformed { position: u64, message: String },
    #[error("error log ended with {open_elements} element(s) still open; some errors may be missing")]
    Truncated { open_elements: usize },
}

/// Leaf elements whose text is captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Unique,
    Tid,
    Kind,
    What,
    Ip,
    Obj,
    Fn,
    Dir,
    File,
    Line,
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Error,
    Stack,
    Frame,
    ErrorCounts,
    Pair,
    Field(Field),
    Other,
}

impl Tag {
    fn from_name(name: &[u8]) -> Self {
        match name {
            b"error" => Tag::Error,
            b"stack" => Tag::Stack,
            b"frame" => Tag::Frame,
            b"errorcounts" => Tag::ErrorCounts,
            b"pair" => Tag::Pair,
            b"unique" => Tag::Field(Field::Unique),
            b"tid" => Tag::Field(Field::Tid),
            b"kind" => Tag::Field(Field::Kind),
            b"what" => Tag::Field(Field::What),
            b"ip" => Tag::Field(Field::Ip),
            b"obj" => Tag::Field(Field::Obj),
            b"fn" => Tag::Field(Field::Fn),
            b"dir" => Tag::Field(Field::Dir),
            b"file" => Tag::Field(Field::File),
            b"line" => Tag::Field(Field::Line),
            b"count" => Tag::Field(Field::Count),
            _ => Tag::Other,
        }
    }
}

/// Events that may not follow the closing tag of the root element.
/// Comments, processing instructions and whitespace are still allowed there.
fn is_document_content(event: &XmlEvent<'_>) -> bool {
    match event {
        XmlEvent::Start(_) | XmlEvent::Empty(_) | XmlEvent::CData(_) | XmlEvent::Decl(_) => true,
        XmlEvent::Text(t) => t.iter().any(|b| !b.is_ascii_whitespace()),
        _ => false,
    }
}

/// Records extracted from one error log, in completion order.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub errors: Vec<ErrorEvent>,
    pub counts: Vec<CountPair>,
    pub warning: Option<ParseWarning>,
}

/// An error whose closing tag has not been seen yet. Its inline count
/// arrives as text and is only converted when the error closes.
#[derive(Debug, Default)]
struct OpenError {
    error: ErrorEvent,
    count: String,
}

/// Single-use parser state for one input stream.
///
/// The element-level methods (`start_element`, `end_element`, `characters`)
/// are public so that callers with their own tokenizer can drive the state
/// machine directly; [`ErrorLogParser::parse`] drives it from `quick-xml`.
#[derive(Debug, Default)]
pub struct ErrorLogParser {
    elements: Vec<Tag>,
    open_errors: Vec<OpenError>,
    open_pair: Option<CountPair>,
    errors: Vec<ErrorEvent>,
    counts: Vec<CountPair>,
}

impl ErrorLogParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently open elements.
    pub fn depth(&self) -> usize {
        self.elements.len()
    }

    fn parent(&self) -> Option<Tag> {
        self.elements.iter().rev().nth(1).copied()
    }

    fn grandparent(&self) -> Option<Tag> {
        self.elements.iter().rev().nth(2).copied()
    }

    pub fn start_element(&mut self, name: &[u8]) {
        let tag = Tag::from_name(name);
        let parent = self.elements.last().copied();
        self.elements.push(tag);

        match tag {
            // Errors never nest in practice. If they do, the outer record is
            // left untouched and the inner one is filled instead.
            Tag::Error => self.open_errors.push(OpenError::default()),
            Tag::Frame if parent == Some(Tag::Stack) => match self.open_errors.last_mut() {
                Some(open) => open.error.frames.push(Frame::new()),
                None => debug!("Ignoring <frame> outside of an <error>"),
            },
            Tag::Pair if parent == Some(Tag::ErrorCounts) => {
                self.open_pair = Some(CountPair::new());
            }
            _ => {}
        }
    }

    pub fn end_element(&mut self) {
        let Some(tag) = self.elements.pop() else {
            debug!("Ignoring close of an element that was never opened");
            return;
        };

        match tag {
            Tag::Error => {
                if let Some(OpenError { mut error, count }) = self.open_errors.pop() {
                    if let Ok(count) = count.trim().parse() {
                        error.count = count;
                    }
                    self.errors.push(error);
                }
            }
            Tag::Pair => {
                if let Some(pair) = self.open_pair.take() {
                    self.counts.push(pair);
                }
            }
            _ => {}
        }
    }

    /// Appends a chunk of character data to the field selected by the
    /// current element, its parent and its grandparent. Chunks with no
    /// matching context are dropped.
    pub fn characters(&mut self, text: &str) {
        let Some(Tag::Field(field)) = self.elements.last().copied() else {
            return;
        };

        let target = match (self.parent(), self.grandparent()) {
            (Some(Tag::Error), _) => self.open_errors.last_mut().and_then(|open| match field {
                Field::Unique => Some(&mut open.error.unique),
                Field::Tid => Some(&mut open.error.tid),
                Field::Kind => Some(&mut open.error.kind),
                Field::What => Some(&mut open.error.what),
                Field::Count => Some(&mut open.count),
                _ => None,
            }),
            (Some(Tag::Frame), Some(Tag::Stack)) => self
                .open_errors
                .last_mut()
                .and_then(|open| open.error.frames.last_mut())
                .and_then(|frame| match field {
                    Field::Ip => Some(&mut frame.instruction_pointer),
                    Field::Obj => Some(&mut frame.obj),
                    Field::Fn => Some(&mut frame.function_name),
                    Field::Dir => Some(&mut frame.dir),
                    Field::File => Some(&mut frame.file),
                    Field::Line => Some(&mut frame.line),
                    _ => None,
                }),
            (Some(Tag::Pair), Some(Tag::ErrorCounts)) => {
                self.open_pair.as_mut().and_then(|pair| match field {
                    Field::Unique => Some(&mut pair.unique),
                    Field::Count => Some(&mut pair.count),
                    _ => None,
                })
            }
            _ => None,
        };

        if let Some(target) = target {
            target.push_str(text);
        }
    }

    /// Consumes the parser, returning completed records. Records whose
    /// closing tag was never seen are discarded.
    pub fn finish(self, warning: Option<ParseWarning>) -> ParseOutcome {
        if !self.open_errors.is_empty() || self.open_pair.is_some() {
            debug!(
                open_errors = self.open_errors.len(),
                open_pair = self.open_pair.is_some(),
                "Discarding incomplete records"
            );
        }
        ParseOutcome {
            errors: self.errors,
            counts: self.counts,
            warning,
        }
    }

    /// Reads `input` to the end (or to the first malformed construct) and
    /// returns the extracted records. Anything but whitespace, comments or
    /// processing instructions after the root element closes is malformed,
    /// so a second concatenated document is never merged into the first.
    ///
    /// The caller owns `input`; it is neither opened nor closed here.
    pub fn parse<R: BufRead>(mut self, input: R) -> Result<ParseOutcome, ParseError> {
        let mut reader = Reader::from_reader(input);
        let mut buf = Vec::new();

        let mut root_closed = false;
        let warning = loop {
            let event = reader.read_event_into(&mut buf);
            if root_closed && matches!(&event, Ok(e) if is_document_content(e)) {
                break Some(ParseWarning::Malformed {
                    position: reader.buffer_position() as u64,
                    message: "junk after document element".to_string(),
                });
            }
            match event {
                Ok(XmlEvent::Start(e)) => self.start_element(e.local_name().as_ref()),
                Ok(XmlEvent::Empty(e)) => {
                    self.start_element(e.local_name().as_ref());
                    self.end_element();
                    root_closed = self.depth() == 0;
                }
                Ok(XmlEvent::End(_)) => {
                    self.end_element();
                    root_closed = self.depth() == 0;
                }
                Ok(XmlEvent::Text(t)) => match t.unescape() {
                    Ok(text) => self.characters(&text),
                    Err(_) => self.characters(&String::from_utf8_lossy(&t)),
                },
                Ok(XmlEvent::CData(c)) => self.characters(&String::from_utf8_lossy(&c)),
                Ok(XmlEvent::Eof) => {
                    break (self.depth() > 0).then(|| ParseWarning::Truncated {
                        open_elements: self.depth(),
                    });
                }
                Ok(_) => {}
                Err(quick_xml::Error::Io(e)) => return Err(ParseError::Io(e)),
                Err(e) => {
                    break Some(ParseWarning::Malformed {
                        position: reader.buffer_position() as u64,
                        message: e.to_string(),
                    });
                }
            }
            buf.clear();
        };

        if let Some(w) = &warning {
            warn!("{w}");
        }
        Ok(self.finish(warning))
    }

    /// Opens and parses the log at `path`.
    pub fn parse_file(self, path: &Path) -> Result<ParseOutcome, ParseError> {
        let file = File::open(path).map_err(|source| ParseError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse(BufReader::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(xml: &str) -> ParseOutcome {
        ErrorLogParser::new()
            .parse(xml.as_bytes())
            .expect("in-memory input never fails to read")
    }

    fn error_xml(unique: &str, frames: &[(&str, &str)]) -> String {
        let mut s = format!(
            "<error><unique>{unique}</unique><tid>1</tid><kind>TaintedCondition</kind>\
             <what>Conditional jump depends on tainted data</what><stack>"
        );
        for (ip, line) in frames {
            s.push_str(&format!(
                "<frame><ip>{ip}</ip><obj>/bin/target</obj><fn>main</fn>\
                 <dir>/src</dir><file>main.c</file><line>{line}</line></frame>"
            ));
        }
        s.push_str("</stack></error>");
        s
    }

    #[test]
    fn parses_errors_with_frames_in_source_order() {
        let xml = format!(
            "<valgrindoutput>{}{}</valgrindoutput>",
            error_xml("0x1", &[("0xA", "1"), ("0xB", "2"), ("0xC", "3")]),
            error_xml("0x2", &[("0xD", "4")]),
        );
        let outcome = parse_str(&xml);

        assert!(outcome.warning.is_none());
        assert_eq!(outcome.errors.len(), 2);
        let first = &outcome.errors[0];
        assert_eq!(first.unique, "0x1");
        assert_eq!(first.tid, "1");
        assert_eq!(first.kind, "TaintedCondition");
        let ips: Vec<&str> = first
            .frames
            .iter()
            .map(|f| f.instruction_pointer.as_str())
            .collect();
        assert_eq!(ips, vec!["0xA", "0xB", "0xC"], "frame 0 is the innermost frame");
        assert_eq!(first.frames[2].line, "3");
        assert_eq!(outcome.errors[1].frames.len(), 1);
    }

    #[test]
    fn text_chunks_are_concatenated() {
        let mut parser = ErrorLogParser::new();
        parser.start_element(b"error");
        parser.start_element(b"stack");
        parser.start_element(b"frame");
        parser.start_element(b"ip");
        parser.characters("0x");
        parser.characters("1234");
        parser.end_element();
        parser.end_element();
        parser.end_element();
        parser.start_element(b"what");
        parser.characters("split ");
        parser.characters("text");
        parser.end_element();
        parser.end_element();

        let outcome = parser.finish(None);
        assert_eq!(outcome.errors[0].frames[0].instruction_pointer, "0x1234");
        assert_eq!(outcome.errors[0].what, "split text");
    }

    #[test]
    fn cdata_and_entities_join_the_same_field() {
        let xml = "<error><unique>0x<![CDATA[1]]>f</unique>\
                   <what>a &lt; b &amp;&amp; c</what></error>";
        let outcome = parse_str(xml);
        assert_eq!(outcome.errors[0].unique, "0x1f");
        assert_eq!(outcome.errors[0].what, "a < b && c");
    }

    #[test]
    fn inline_count_is_parsed_on_close() {
        let outcome = parse_str(
            "<root><error><unique>0x5</unique><count> 7 </count></error>\
             <error><unique>0x6</unique><count>lots</count></error></root>",
        );
        assert_eq!(outcome.errors[0].count, 7);
        assert_eq!(outcome.errors[1].count, 0);
    }

    #[test]
    fn error_without_frames_is_kept() {
        let outcome = parse_str("<error><unique>0x3</unique><stack/></error>");
        assert_eq!(outcome.errors.len(), 1);
        assert!(!outcome.errors[0].has_debug_frames());
    }

    #[test]
    fn count_pairs_only_under_errorcounts() {
        let xml = "<root>\
                   <errorcounts><pair><count>5</count><unique>0x1</unique></pair></errorcounts>\
                   <suppcounts><pair><count>9</count><name>libc</name></pair></suppcounts>\
                   </root>";
        let outcome = parse_str(xml);
        assert_eq!(
            outcome.counts,
            vec![CountPair {
                unique: "0x1".to_string(),
                count: "5".to_string(),
            }]
        );
    }

    #[test]
    fn stray_text_and_unknown_elements_are_ignored() {
        let xml = "<root>noise<tool>flayer</tool>\
                   <error><unique>0x4</unique><auxwhat>extra</auxwhat><kind>K</kind></error>\
                   <unique>0x99</unique></root>";
        let outcome = parse_str(xml);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].unique, "0x4");
        assert_eq!(outcome.errors[0].kind, "K");
        assert!(outcome.errors[0].what.is_empty());
    }

    #[test]
    fn nested_error_does_not_corrupt_outer_record() {
        let xml = "<error><unique>0x1</unique>\
                   <error><unique>0x2</unique></error>\
                   <kind>Outer</kind></error>";
        let outcome = parse_str(xml);
        assert_eq!(outcome.errors.len(), 2);
        assert_eq!(outcome.errors[0].unique, "0x2");
        assert!(outcome.errors[0].kind.is_empty());
        assert_eq!(outcome.errors[1].unique, "0x1");
        assert_eq!(outcome.errors[1].kind, "Outer");
    }

    #[test]
    fn truncated_input_keeps_completed_errors() {
        let xml = format!(
            "<valgrindoutput>{}{}<error><unique>0x3</uni",
            error_xml("0x1", &[("0xA", "1")]),
            error_xml("0x2", &[("0xB", "2")]),
        );
        let outcome = parse_str(&xml);
        assert!(outcome.warning.is_some(), "a warning is expected");
        let ids: Vec<&str> = outcome.errors.iter().map(|e| e.unique.as_str()).collect();
        assert_eq!(ids, vec!["0x1", "0x2"]);
    }

    #[test]
    fn depth_tracks_open_elements() {
        let mut parser = ErrorLogParser::new();
        parser.start_element(b"valgrindoutput");
        parser.start_element(b"error");
        assert_eq!(parser.depth(), 2);
        parser.end_element();
        assert_eq!(parser.depth(), 1);
    }

    #[test]
    fn premature_end_reports_open_elements() {
        let xml = format!("<valgrindoutput>{}<error>", error_xml("0x1", &[]));
        let outcome = parse_str(&xml);
        assert_eq!(
            outcome.warning,
            Some(ParseWarning::Truncated { open_elements: 2 })
        );
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn content_after_root_stops_parsing() {
        let second_document = format!(
            "<valgrindoutput>{}</valgrindoutput>\n<valgrindoutput>{}</valgrindoutput>",
            error_xml("0x1", &[]),
            error_xml("0x2", &[]),
        );
        let outcome = parse_str(&second_document);
        assert!(matches!(
            &outcome.warning,
            Some(ParseWarning::Malformed { message, .. }) if message == "junk after document element"
        ));
        let ids: Vec<&str> = outcome.errors.iter().map(|e| e.unique.as_str()).collect();
        assert_eq!(ids, vec!["0x1"]);

        let empty_root = parse_str("<valgrindoutput/>trailing");
        assert!(matches!(empty_root.warning, Some(ParseWarning::Malformed { .. })));
    }

    #[test]
    fn whitespace_and_comments_after_root_are_fine() {
        let xml = format!(
            "<valgrindoutput>{}</valgrindoutput>\n  <!-- done -->\n",
            error_xml("0x1", &[])
        );
        let outcome = parse_str(&xml);
        assert!(outcome.warning.is_none());
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn mismatched_close_is_recoverable() {
        let xml = format!("<root>{}<error></stack>", error_xml("0x7", &[]));
        let outcome = parse_str(&xml);
        assert!(matches!(
            outcome.warning,
            Some(ParseWarning::Malformed { .. })
        ));
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let result = ErrorLogParser::new().parse_file(&dir.path().join("flayer.12345"));
        assert!(matches!(result, Err(ParseError::Open { .. })));
    }
}
