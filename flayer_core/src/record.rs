use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Error kind reported by the flayer tool for a conditional jump that depends
/// on tainted data. Only errors of this kind can be turned into branch alterations.
pub const TAINTED_CONDITION_KIND: &str = "TaintedCondition";

/// One entry of an error's backtrace, exactly as the tool reported it.
///
/// Every field is kept as raw text. The instruction pointer in particular is
/// not parsed, since branch alterations are keyed by its textual form.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Frame {
    pub instruction_pointer: String,
    pub obj: String,
    pub function_name: String,
    pub dir: String,
    pub file: String,
    pub line: String,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins `dir` and `file`. Returns `None` when the tool reported neither.
    pub fn source_path(&self) -> Option<PathBuf> {
        if self.dir.is_empty() && self.file.is_empty() {
            return None;
        }
        Some(PathBuf::from(&self.dir).join(&self.file))
    }

    /// `dir/file:line`, or an empty string without debug information.
    pub fn location(&self) -> String {
        match self.source_path() {
            Some(path) => format!("{}:{}", path.display(), self.line),
            None if self.line.is_empty() => String::new(),
            None => format!(":{}", self.line),
        }
    }

    /// The source line as a number, if the tool reported a decimal one.
    pub fn line_number(&self) -> Option<usize> {
        self.line.trim().parse().ok()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.instruction_pointer, self.function_name)?;
        let location = self.location();
        if !location.is_empty() {
            write!(f, " ({location})")?;
        }
        if !self.obj.is_empty() {
            write!(f, " in {}", self.obj)?;
        }
        Ok(())
    }
}

/// A single diagnostic error occurrence.
///
/// Equality and hashing cover every field, including the whole frame
/// sequence, so two errors sharing a unique id but differing anywhere else
/// are distinct values.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ErrorEvent {
    /// Hexadecimal id as reported, e.g. `0x1a`.
    pub unique: String,
    pub tid: String,
    pub kind: String,
    pub what: String,
    /// Index 0 is the innermost (faulting) frame.
    pub frames: Vec<Frame>,
    pub count: u64,
}

impl ErrorEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// False when the tool could not produce any backtrace for this error.
    pub fn has_debug_frames(&self) -> bool {
        !self.frames.is_empty()
    }

    /// The innermost frame, where the error was raised.
    pub fn top_frame(&self) -> Option<&Frame> {
        self.frames.first()
    }

    pub fn is_tainted_condition(&self) -> bool {
        self.kind == TAINTED_CONDITION_KIND
    }
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "error {} [{}] tid {}: {} (count {}, {} frames)",
            self.unique,
            self.kind,
            self.tid,
            self.what,
            self.count,
            self.frames.len()
        )
    }
}

/// An `(id, count)` report from the tool's separate error-count section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountPair {
    pub unique: String,
    pub count: String,
}

impl CountPair {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ip: &str, line: &str) -> Frame {
        Frame {
            instruction_pointer: ip.to_string(),
            obj: "/usr/bin/target".to_string(),
            function_name: "main".to_string(),
            dir: "/src".to_string(),
            file: "main.c".to_string(),
            line: line.to_string(),
        }
    }

    #[test]
    fn default_records_are_empty() {
        let error = ErrorEvent::new();
        assert!(error.unique.is_empty());
        assert_eq!(error.count, 0);
        assert!(!error.has_debug_frames());
        assert!(error.top_frame().is_none());
        assert_eq!(Frame::new().location(), "");
        assert_eq!(CountPair::new(), CountPair::default());
    }

    #[test]
    fn equality_covers_frames() {
        let mut a = ErrorEvent {
            unique: "0x1".to_string(),
            kind: TAINTED_CONDITION_KIND.to_string(),
            frames: vec![frame("0x400123", "10")],
            ..Default::default()
        };
        let b = a.clone();
        assert_eq!(a, b);

        a.frames[0].line = "11".to_string();
        assert_ne!(a, b, "a differing frame line must break equality");
    }

    #[test]
    fn frame_location_and_line_number() {
        let f = frame("0x400123", "42");
        assert_eq!(f.location(), "/src/main.c:42");
        assert_eq!(f.line_number(), Some(42));

        let no_debug = Frame {
            instruction_pointer: "0x1".to_string(),
            ..Default::default()
        };
        assert_eq!(no_debug.location(), "");
        assert_eq!(no_debug.line_number(), None);
        assert_eq!(no_debug.to_string(), "0x1 ");
    }

    #[test]
    fn display_mentions_key_fields() {
        let error = ErrorEvent {
            unique: "0x2".to_string(),
            tid: "1".to_string(),
            kind: TAINTED_CONDITION_KIND.to_string(),
            what: "Conditional jump depends on tainted data".to_string(),
            frames: vec![frame("0x400123", "7")],
            count: 3,
        };
        let rendered = error.to_string();
        assert!(rendered.contains("0x2"));
        assert!(rendered.contains("TaintedCondition"));
        assert!(rendered.contains("count 3"));
        assert!(error.is_tainted_condition());
        assert!(frame("0x400123", "7").to_string().contains("/src/main.c:7"));
    }
}
